use crate::vm::memory;
use crate::vm::types::GeneralType;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Zero-based position in a source file.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Source range, `end` is exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: Position,
    pub end: Position,
}

impl SourceRange {
    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: PathBuf,
    pub range: SourceRange,
}

/// Half-open range of instruction addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstructionRange {
    pub start: usize,
    pub end: usize,
}

impl InstructionRange {
    pub fn contains(&self, address: usize) -> bool {
        self.start <= address && address < self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One entry of the source-location table: instructions generated for a source range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCodeLocation {
    pub instructions: InstructionRange,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInformation {
    pub instructions: InstructionRange,
    pub identifier: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub position: SourceRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackElementKind {
    Variable,
    Parameter,
    Internal,
}

/// Layout of a single stack-resident element (variable, parameter or compiler internal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackElementInformation {
    pub kind: StackElementKind,
    pub identifier: String,
    /// Offset from the frame base pointer or from the stack origin.
    pub address: i64,
    #[serde(default)]
    pub base_pointer_relative: bool,
    #[serde(rename = "type")]
    pub ty: GeneralType,
}

impl StackElementInformation {
    pub const RETURN_VALUE: &'static str = "Return Value";

    /// Absolute address of the element in a frame with base pointer `base_pointer`.
    pub fn absolute_address(&self, base_pointer: usize, stack_start: usize) -> i64 {
        if self.base_pointer_relative {
            base_pointer as i64 + self.address
        } else {
            stack_start as i64 + self.address
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeInformation {
    pub instructions: InstructionRange,
    pub location: Location,
    #[serde(default)]
    pub stack: Vec<StackElementInformation>,
}

/// Offsets of saved registers relative to a frame base pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOffsets {
    pub saved_base_pointer: i64,
    pub saved_code_pointer: i64,
}

impl Default for StackOffsets {
    fn default() -> Self {
        Self {
            saved_base_pointer: 0,
            saved_code_pointer: DEFAULT_POINTER_SIZE as i64,
        }
    }
}

pub const DEFAULT_POINTER_SIZE: usize = 4;

fn default_pointer_size() -> usize {
    DEFAULT_POINTER_SIZE
}

/// Compiler produced debug metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    #[serde(default)]
    pub source_locations: Vec<SourceCodeLocation>,
    #[serde(default)]
    pub functions: Vec<FunctionInformation>,
    #[serde(default)]
    pub scopes: Vec<ScopeInformation>,
    #[serde(default)]
    pub stack_offsets: StackOffsets,
    #[serde(default = "default_pointer_size")]
    pub pointer_size: usize,
}

fn tightest<'a, T>(
    items: impl Iterator<Item = &'a T>,
    range: impl Fn(&T) -> InstructionRange,
) -> Option<&'a T> {
    items.min_by(|a, b| match range(a).len().cmp(&range(b).len()) {
        Ordering::Equal => range(a).start.cmp(&range(b).start),
        ord => ord,
    })
}

impl DebugInfo {
    /// Source location of the innermost range containing instruction `ip`.
    pub fn source_location(&self, ip: usize) -> Option<&SourceCodeLocation> {
        tightest(
            self.source_locations
                .iter()
                .filter(|l| l.instructions.contains(ip)),
            |l| l.instructions,
        )
    }

    pub fn function_info(&self, ip: usize) -> Option<&FunctionInformation> {
        tightest(
            self.functions.iter().filter(|f| f.instructions.contains(ip)),
            |f| f.instructions,
        )
    }

    /// Lexical scopes valid at instruction `ip`, innermost first.
    pub fn scopes_at(&self, ip: usize) -> Vec<&ScopeInformation> {
        let mut scopes: Vec<_> = self
            .scopes
            .iter()
            .filter(|s| s.instructions.contains(ip))
            .collect();
        scopes.sort_by_key(|s| (s.instructions.len(), s.instructions.start));
        scopes
    }

    /// Entries of the source-location table that belong to `file`.
    pub fn locations_in<'a>(
        &'a self,
        file: &'a Path,
    ) -> impl Iterator<Item = &'a SourceCodeLocation> + 'a {
        self.source_locations
            .iter()
            .filter(move |l| l.location.file == file)
    }

    /// All distinct source files mentioned by the debug metadata.
    pub fn files(&self) -> Vec<&Path> {
        self.source_locations
            .iter()
            .map(|l| l.location.file.as_path())
            .unique()
            .collect()
    }
}

/// Saved (base pointer, instruction pointer) pair of a call frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallTraceItem {
    pub base_pointer: usize,
    pub instruction_pointer: usize,
}

impl CallTraceItem {
    pub fn new(base_pointer: usize, instruction_pointer: usize) -> Self {
        Self {
            base_pointer,
            instruction_pointer,
        }
    }
}

/// Guard against corrupted saved base pointers.
const MAX_TRACE_DEPTH: usize = 4096;

/// Walk saved base pointers starting at `base_pointer`.
/// Returns caller frames ordered from innermost to outermost, the live frame is not included.
pub fn trace_stack(
    memory: &[u8],
    base_pointer: usize,
    offsets: &StackOffsets,
    pointer_size: usize,
) -> Vec<CallTraceItem> {
    let mut trace = vec![];
    let mut bp = base_pointer;

    while trace.len() < MAX_TRACE_DEPTH {
        let Some(saved_bp) =
            memory::read_pointer(memory, bp as i64 + offsets.saved_base_pointer, pointer_size)
        else {
            break;
        };
        let Some(saved_ip) =
            memory::read_pointer(memory, bp as i64 + offsets.saved_code_pointer, pointer_size)
        else {
            break;
        };

        if saved_bp <= 0 || saved_ip < 0 || saved_bp as usize >= memory.len() {
            break;
        }
        let saved_bp = saved_bp as usize;
        if saved_bp == base_pointer
            || trace
                .iter()
                .any(|i: &CallTraceItem| i.base_pointer == saved_bp)
        {
            break;
        }

        trace.push(CallTraceItem::new(saved_bp, saved_ip as usize));
        bp = saved_bp;
    }

    trace
}
