//! Client facing views of the session state, serialized as protocol bodies.

use crate::vm::debug_info::{Location, Position, SourceRange};
use serde::Serialize;
use std::path::Path;
use strum_macros::{Display, IntoStaticStr};

/// Line and column numbering base of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOrigin {
    pub first_line: u32,
    pub first_column: u32,
}

impl Default for ClientOrigin {
    fn default() -> Self {
        Self {
            first_line: 1,
            first_column: 1,
        }
    }
}

impl ClientOrigin {
    pub fn new(lines_start_at1: bool, columns_start_at1: bool) -> Self {
        Self {
            first_line: lines_start_at1 as u32,
            first_column: columns_start_at1 as u32,
        }
    }

    pub fn line_to_client(&self, line: u32) -> u32 {
        line.saturating_add(self.first_line)
    }

    pub fn column_to_client(&self, column: u32) -> u32 {
        column.saturating_add(self.first_column)
    }

    /// Zero-based position of a client supplied line and column.
    pub fn position_from_client(&self, line: i64, column: i64) -> Position {
        let zero_based = |value: i64, first: u32| {
            u32::try_from(value.saturating_sub(first as i64).max(0)).unwrap_or(u32::MAX)
        };
        Position {
            line: zero_based(line, self.first_line),
            character: zero_based(column, self.first_column),
        }
    }

    fn range(&self, range: &SourceRange) -> ClientRange {
        ClientRange {
            line: self.line_to_client(range.start.line),
            column: self.column_to_client(range.start.character),
            end_line: self.line_to_client(range.end.line),
            end_column: self.column_to_client(range.end.character),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRange {
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub name: String,
    pub path: String,
}

impl Source {
    pub fn new(path: &Path) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: path.to_string_lossy().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
    pub instruction_pointer_reference: String,
}

impl StackFrame {
    pub fn at(
        id: i64,
        name: String,
        file: &Path,
        range: &SourceRange,
        origin: &ClientOrigin,
        instruction: usize,
    ) -> Self {
        let range = origin.range(range);
        Self {
            id,
            name,
            source: Some(Source::new(file)),
            line: range.line,
            column: range.column,
            end_line: Some(range.end_line),
            end_column: Some(range.end_column),
            instruction_pointer_reference: instruction.to_string(),
        }
    }

    pub fn bare(id: i64, name: String, instruction: usize) -> Self {
        Self {
            id,
            name,
            source: None,
            line: 0,
            column: 0,
            end_line: None,
            end_column: None,
            instruction_pointer_reference: instruction.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeHint {
    Arguments,
    Locals,
    ReturnValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_hint: Option<ScopeHint>,
    pub variables_reference: i64,
    pub named_variables: usize,
    pub expensive: bool,
    pub source: Source,
    #[serde(flatten)]
    pub range: ClientRange,
}

impl Scope {
    pub fn new(
        name: &str,
        presentation_hint: Option<ScopeHint>,
        variables_reference: i64,
        named_variables: usize,
        location: &Location,
        origin: &ClientOrigin,
    ) -> Self {
        Self {
            name: name.to_string(),
            presentation_hint,
            variables_reference,
            named_variables,
            expensive: false,
            source: Source::new(&location.file),
            range: origin.range(&location.range),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub variables_reference: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_variables: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub named_variables: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakpointFailure {
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: i64,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<BreakpointFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction_reference: Option<String>,
}

impl Breakpoint {
    pub fn unverified(id: i64, reason: BreakpointFailure, message: Option<String>) -> Self {
        Self {
            id,
            verified: false,
            message,
            reason: Some(reason),
            source: None,
            line: None,
            column: None,
            end_line: None,
            end_column: None,
            instruction_reference: None,
        }
    }

    pub fn with_range(mut self, range: &SourceRange, origin: &ClientOrigin) -> Self {
        let range = origin.range(range);
        self.line = Some(range.line);
        self.column = Some(range.column);
        self.end_line = Some(range.end_line);
        self.end_column = Some(range.end_column);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, IntoStaticStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum BreakpointEventReason {
    Changed,
    New,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointLocation {
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum OutputCategory {
    Console,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub category: OutputCategory,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Output {
    pub fn new(category: OutputCategory, output: impl Into<String>) -> Self {
        Self {
            category,
            output: output.into(),
            source: None,
            line: None,
            column: None,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self::new(OutputCategory::Stderr, output)
    }

    pub fn at(mut self, location: &Location, origin: &ClientOrigin) -> Self {
        self.source = Some(Source::new(&location.file));
        self.line = Some(origin.line_to_client(location.range.start.line));
        self.column = Some(origin.column_to_client(location.range.start.character));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub type_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    pub exception_id: String,
    pub description: String,
    pub break_mode: &'static str,
    pub details: ExceptionDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisassembledInstruction {
    pub address: String,
    pub instruction: String,
}

/// Memory block read from the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    pub address: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryWrite {
    pub offset: usize,
    pub bytes_written: usize,
}
