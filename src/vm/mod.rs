//! Boundary to the language toolchain and the bytecode processor.
//!
//! The debugger core never executes or compiles code itself, it drives a [`Toolchain`]
//! (compiler + code generator) and the [`Processor`] instances it produces.

pub mod debug_info;
pub mod memory;
pub mod sim;
pub mod types;

use crate::vm::debug_info::{DebugInfo, Location};
use crate::vm::types::GeneralType;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub instruction_pointer: usize,
    pub base_pointer: usize,
    pub stack_pointer: usize,
}

/// Fault raised by the processor while executing an instruction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    pub kind: String,
    pub message: String,
}

impl RuntimeError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Sink for characters written by the running program.
pub trait StdIo {
    fn stdout(&mut self, c: char);
}

impl StdIo for String {
    fn stdout(&mut self, c: char) {
        self.push(c)
    }
}

/// A bytecode processor instance executing generated code.
pub trait Processor: Send + 'static {
    /// Execute one instruction.
    fn tick(&mut self, io: &mut dyn StdIo) -> Result<(), RuntimeError>;

    fn registers(&self) -> Registers;

    fn registers_mut(&mut self) -> &mut Registers;

    fn memory(&self) -> &[u8];

    fn memory_mut(&mut self) -> &mut [u8];

    /// Number of instructions in the code buffer.
    fn code_len(&self) -> usize;

    /// Human readable representation of the instruction at `address`.
    fn instruction(&self, address: usize) -> Option<String>;

    fn is_done(&self) -> bool;

    fn debug_info(&self) -> &DebugInfo;

    /// Address of the stack origin, non frame-relative stack elements are placed relative to it.
    fn stack_start(&self) -> usize;

    /// Tick until the code is done, fails if `budget` ticks are not enough.
    fn run_until_completion(
        &mut self,
        io: &mut dyn StdIo,
        mut budget: u64,
    ) -> Result<(), RuntimeError> {
        while !self.is_done() {
            if budget == 0 {
                return Err(RuntimeError::new(
                    "TickLimitExceeded",
                    "execution did not finish in the given number of ticks",
                ));
            }
            budget -= 1;
            self.tick(io)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = &self.location {
            write!(
                f,
                "{}:{}:{}: ",
                location.file.display(),
                location.range.start.line + 1,
                location.range.start.character + 1
            )?;
        }
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{severity}: {}", self.message)
    }
}

/// Diagnostics collected by the compiler or the code generator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn single(diagnostic: Diagnostic) -> Self {
        Self(vec![diagnostic])
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in self.0.iter().filter(|d| d.severity == Severity::Error) {
            writeln!(f, "{d}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

/// Settings passed to the compiler, assembled from project configuration files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilerSettings {
    pub additional_imports: Vec<String>,
    pub extra_directories: Vec<PathBuf>,
    pub external_constants: BTreeMap<String, i64>,
}

/// Named, typed and address-bound input of an evaluated expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionVariable {
    pub name: String,
    pub address: i64,
    pub ty: GeneralType,
}

/// Compiler and code generator of the debugged language.
pub trait Toolchain: Send + Sync + 'static {
    /// Compiled program artifact.
    type Program: Send + Sync + 'static;
    /// Generated code together with its debug metadata.
    type Image: Send + Sync + 'static;
    /// Single compiled statement of an expression unit.
    type Statement;
    type Processor: Processor;

    fn compile_file(
        &self,
        path: &Path,
        settings: &CompilerSettings,
    ) -> Result<Self::Program, Diagnostics>;

    fn generate(&self, program: &Self::Program) -> Result<Self::Image, Diagnostics>;

    /// Source files the program was compiled from.
    fn sources(&self, program: &Self::Program) -> Vec<PathBuf>;

    /// Compile `text` as an isolated unit reusing the external function table of `program`.
    fn compile_expression(
        &self,
        text: &str,
        program: &Self::Program,
        variables: &[ExpressionVariable],
    ) -> Result<Vec<Self::Statement>, Diagnostics>;

    /// Type of the value produced by a statement, `void` if it does not save a value.
    fn statement_type(&self, statement: &Self::Statement) -> GeneralType;

    fn generate_expression(
        &self,
        statement: &Self::Statement,
        program: &Self::Program,
    ) -> Result<Self::Image, Diagnostics>;

    /// Create a processor over `image`, with fresh memory if `memory` is `None`.
    fn instantiate(&self, image: &Self::Image, memory: Option<Vec<u8>>) -> Self::Processor;
}
