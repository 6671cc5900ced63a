//! Scripted reference processor.
//!
//! Programs are JSON images holding generated code together with debug metadata, the
//! "compiler" only loads and validates them. Used by the `bc-dap` binary and by tests.

use crate::vm::debug_info::{DebugInfo, Location, Position, SourceRange};
use crate::vm::memory;
use crate::vm::types::{BasicType, GeneralType};
use crate::vm::{
    CompilerSettings, Diagnostic, Diagnostics, ExpressionVariable, Processor, Registers,
    RuntimeError, StdIo, Toolchain,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Processor instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Nop,
    Jump { target: usize },
    /// Write bytes at an absolute address.
    Store { address: i64, bytes: Vec<u8> },
    /// Write bytes relative to the base pointer.
    StoreLocal { offset: i64, bytes: Vec<u8> },
    Push { bytes: Vec<u8> },
    /// Push `size` bytes read from an absolute address.
    Copy { from: i64, size: usize },
    Call {
        target: usize,
        #[serde(default)]
        locals: usize,
    },
    Ret,
    Print { text: String },
    Fault { message: String },
    Halt,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Nop => f.write_str("NOP"),
            Op::Jump { target } => write!(f, "JUMP {target}"),
            Op::Store { address, bytes } => write!(f, "STORE {address} {bytes:?}"),
            Op::StoreLocal { offset, bytes } => write!(f, "STORE [BP{offset:+}] {bytes:?}"),
            Op::Push { bytes } => write!(f, "PUSH {bytes:?}"),
            Op::Copy { from, size } => write!(f, "COPY {from} {size}"),
            Op::Call { target, locals } => write!(f, "CALL {target} {locals}"),
            Op::Ret => f.write_str("RET"),
            Op::Print { text } => write!(f, "PRINT {text:?}"),
            Op::Fault { message } => write!(f, "FAULT {message:?}"),
            Op::Halt => f.write_str("HALT"),
        }
    }
}

/// Generated code and debug metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimImage {
    pub memory_size: usize,
    /// Stack origin, the stack grows downwards from here.
    pub stack_start: usize,
    /// Bytes reserved for locals of the entry frame.
    #[serde(default)]
    pub main_locals: usize,
    pub code: Vec<Op>,
    #[serde(default)]
    pub debug_info: DebugInfo,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
}

impl SimImage {
    fn header_size(&self) -> usize {
        2 * self.debug_info.pointer_size
    }

    fn validate(&self) -> Result<(), Diagnostics> {
        let mut errors = vec![];

        if self.stack_start > self.memory_size || self.stack_start < self.header_size() {
            errors.push(Diagnostic::error(format!(
                "stack origin {} does not fit into {} bytes of memory",
                self.stack_start, self.memory_size
            )));
        }
        if !matches!(self.debug_info.pointer_size, 1 | 2 | 4 | 8) {
            errors.push(Diagnostic::error(format!(
                "unsupported pointer size {}",
                self.debug_info.pointer_size
            )));
        }
        for (i, op) in self.code.iter().enumerate() {
            if let Op::Jump { target } | Op::Call { target, .. } = op {
                if *target >= self.code.len() {
                    errors.push(Diagnostic::error(format!(
                        "instruction {i}: target {target} is out of code"
                    )));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Diagnostics(errors))
        }
    }
}

/// Loaded program.
pub struct SimProgram {
    pub path: PathBuf,
    pub image: SimImage,
    pub constants: BTreeMap<String, i64>,
}

/// Compiled expression statement.
#[derive(Debug, Clone)]
pub struct SimStatement {
    ops: Vec<Op>,
    ty: GeneralType,
}

#[derive(Default)]
pub struct SimToolchain;

fn resolve_path(path: &Path, base: &Path, extra: &[PathBuf]) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let primary = base.join(path);
    if primary.exists() {
        return primary;
    }
    extra
        .iter()
        .map(|dir| dir.join(path))
        .find(|p| p.exists())
        .unwrap_or(primary)
}

fn resolve_paths(image: &mut SimImage, base: &Path, extra: &[PathBuf]) {
    let info = &mut image.debug_info;
    for l in &mut info.source_locations {
        l.location.file = resolve_path(&l.location.file, base, extra);
    }
    for f in &mut info.functions {
        if let Some(file) = f.file.as_mut() {
            *file = resolve_path(file, base, extra);
        }
    }
    for s in &mut info.scopes {
        s.location.file = resolve_path(&s.location.file, base, extra);
    }
    for s in &mut image.sources {
        *s = resolve_path(s, base, extra);
    }
}

fn file_diagnostic(path: &Path, message: impl Into<String>) -> Diagnostics {
    Diagnostics::single(Diagnostic::error(message).at(Location {
        file: path.to_path_buf(),
        range: SourceRange {
            start: Position::default(),
            end: Position::default(),
        },
    }))
}

impl Toolchain for SimToolchain {
    type Program = SimProgram;
    type Image = SimImage;
    type Statement = SimStatement;
    type Processor = SimProcessor;

    fn compile_file(
        &self,
        path: &Path,
        settings: &CompilerSettings,
    ) -> Result<Self::Program, Diagnostics> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| file_diagnostic(path, format!("read program: {e}")))?;
        let mut image: SimImage = serde_json::from_str(&text)
            .map_err(|e| file_diagnostic(path, format!("invalid program image: {e}")))?;

        let base = path.parent().unwrap_or(Path::new("."));
        resolve_paths(&mut image, base, &settings.extra_directories);
        if image.sources.is_empty() {
            image.sources = image
                .debug_info
                .files()
                .into_iter()
                .map(Path::to_path_buf)
                .collect();
        }

        Ok(SimProgram {
            path: path.to_path_buf(),
            image,
            constants: settings.external_constants.clone(),
        })
    }

    fn generate(&self, program: &Self::Program) -> Result<Self::Image, Diagnostics> {
        program.image.validate()?;
        Ok(program.image.clone())
    }

    fn sources(&self, program: &Self::Program) -> Vec<PathBuf> {
        program.image.sources.clone()
    }

    fn compile_expression(
        &self,
        text: &str,
        program: &Self::Program,
        variables: &[ExpressionVariable],
    ) -> Result<Vec<Self::Statement>, Diagnostics> {
        let pointer_size = program.image.debug_info.pointer_size;
        let parts: Vec<&str> = text
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            return Err(Diagnostics::single(Diagnostic::error("empty expression")));
        }

        let constant = |value: i64| SimStatement {
            ops: vec![Op::Push {
                bytes: (value as i32).to_le_bytes().to_vec(),
            }],
            ty: GeneralType::Builtin(BasicType::I32),
        };

        parts
            .into_iter()
            .map(|part| {
                if let Ok(value) = part.parse::<i64>() {
                    return Ok(constant(value));
                }
                if let Some(var) = variables.iter().find(|v| v.name == part) {
                    let size = var.ty.size(pointer_size).ok_or_else(|| {
                        Diagnostics::single(Diagnostic::error(format!(
                            "size of `{part}` is not known"
                        )))
                    })?;
                    return Ok(SimStatement {
                        ops: vec![Op::Copy {
                            from: var.address,
                            size,
                        }],
                        ty: var.ty.clone(),
                    });
                }
                if let Some(value) = program.constants.get(part) {
                    return Ok(constant(*value));
                }
                Err(Diagnostics::single(Diagnostic::error(format!(
                    "unknown identifier `{part}`"
                ))))
            })
            .collect()
    }

    fn statement_type(&self, statement: &Self::Statement) -> GeneralType {
        statement.ty.clone()
    }

    fn generate_expression(
        &self,
        statement: &Self::Statement,
        program: &Self::Program,
    ) -> Result<Self::Image, Diagnostics> {
        let mut code = statement.ops.clone();
        code.push(Op::Halt);
        Ok(SimImage {
            memory_size: program.image.memory_size,
            stack_start: program.image.stack_start,
            main_locals: 0,
            code,
            debug_info: DebugInfo {
                stack_offsets: program.image.debug_info.stack_offsets,
                pointer_size: program.image.debug_info.pointer_size,
                ..Default::default()
            },
            sources: vec![],
        })
    }

    fn instantiate(&self, image: &Self::Image, memory: Option<Vec<u8>>) -> Self::Processor {
        SimProcessor::new(image, memory)
    }
}

pub struct SimProcessor {
    code: Arc<[Op]>,
    debug_info: Arc<DebugInfo>,
    memory: Vec<u8>,
    registers: Registers,
    stack_start: usize,
    done: bool,
}

impl SimProcessor {
    pub fn new(image: &SimImage, memory: Option<Vec<u8>>) -> Self {
        let memory = memory.unwrap_or_else(|| vec![0; image.memory_size]);
        let base_pointer = image.stack_start.saturating_sub(image.header_size());

        Self {
            code: image.code.clone().into(),
            debug_info: Arc::new(image.debug_info.clone()),
            memory,
            registers: Registers {
                instruction_pointer: 0,
                base_pointer,
                stack_pointer: base_pointer.saturating_sub(image.main_locals),
            },
            stack_start: image.stack_start,
            done: false,
        }
    }

    fn pointer_size(&self) -> usize {
        self.debug_info.pointer_size
    }

    fn fault_access(&self, address: i64) -> RuntimeError {
        RuntimeError::new(
            "MemoryAccessViolation",
            format!(
                "address {address} is out of memory at instruction {}",
                self.registers.instruction_pointer
            ),
        )
    }

    fn write(&mut self, address: i64, bytes: &[u8]) -> Result<(), RuntimeError> {
        if memory::write_bytes(&mut self.memory, address, bytes) {
            Ok(())
        } else {
            Err(self.fault_access(address))
        }
    }

    fn read_pointer(&self, address: i64) -> Result<i64, RuntimeError> {
        memory::read_pointer(&self.memory, address, self.pointer_size())
            .ok_or_else(|| self.fault_access(address))
    }

    fn push(&mut self, bytes: &[u8]) -> Result<(), RuntimeError> {
        let sp = self
            .registers
            .stack_pointer
            .checked_sub(bytes.len())
            .ok_or_else(|| RuntimeError::new("StackOverflow", "stack overflow"))?;
        self.write(sp as i64, bytes)?;
        self.registers.stack_pointer = sp;
        Ok(())
    }
}

impl Processor for SimProcessor {
    fn tick(&mut self, io: &mut dyn StdIo) -> Result<(), RuntimeError> {
        if self.done {
            return Ok(());
        }
        let ip = self.registers.instruction_pointer;
        let Some(op) = self.code.get(ip).cloned() else {
            self.done = true;
            return Ok(());
        };

        let offsets = self.debug_info.stack_offsets;
        let pointer_size = self.pointer_size();
        let mut next = ip + 1;

        match op {
            Op::Nop => {}
            Op::Jump { target } => next = target,
            Op::Store { address, bytes } => self.write(address, &bytes)?,
            Op::StoreLocal { offset, bytes } => {
                self.write(self.registers.base_pointer as i64 + offset, &bytes)?
            }
            Op::Push { bytes } => self.push(&bytes)?,
            Op::Copy { from, size } => {
                let range = memory::checked_range(&self.memory, from, size)
                    .ok_or_else(|| self.fault_access(from))?;
                let bytes = self.memory[range].to_vec();
                self.push(&bytes)?;
            }
            Op::Call { target, locals } => {
                let frame = self
                    .registers
                    .stack_pointer
                    .checked_sub(2 * pointer_size)
                    .ok_or_else(|| RuntimeError::new("StackOverflow", "stack overflow"))?;
                let saved_bp = memory::pointer_bytes(self.registers.base_pointer as i64, pointer_size);
                let saved_ip = memory::pointer_bytes(next as i64, pointer_size);
                self.write(frame as i64 + offsets.saved_base_pointer, &saved_bp)?;
                self.write(frame as i64 + offsets.saved_code_pointer, &saved_ip)?;
                self.registers.base_pointer = frame;
                self.registers.stack_pointer = frame
                    .checked_sub(locals)
                    .ok_or_else(|| RuntimeError::new("StackOverflow", "stack overflow"))?;
                next = target;
            }
            Op::Ret => {
                let frame = self.registers.base_pointer as i64;
                let saved_bp = self.read_pointer(frame + offsets.saved_base_pointer)?;
                let saved_ip = self.read_pointer(frame + offsets.saved_code_pointer)?;
                if saved_bp <= 0 {
                    self.done = true;
                    return Ok(());
                }
                self.registers.stack_pointer = frame as usize + 2 * pointer_size;
                self.registers.base_pointer = saved_bp as usize;
                next = saved_ip as usize;
            }
            Op::Print { text } => text.chars().for_each(|c| io.stdout(c)),
            Op::Fault { message } => return Err(RuntimeError::new("RuntimeFault", message)),
            Op::Halt => {
                self.done = true;
                return Ok(());
            }
        }

        self.registers.instruction_pointer = next;
        if next >= self.code.len() {
            self.done = true;
        }
        Ok(())
    }

    fn registers(&self) -> Registers {
        self.registers
    }

    fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn code_len(&self) -> usize {
        self.code.len()
    }

    fn instruction(&self, address: usize) -> Option<String> {
        self.code.get(address).map(ToString::to_string)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn debug_info(&self) -> &DebugInfo {
        &self.debug_info
    }

    fn stack_start(&self) -> usize {
        self.stack_start
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vm::debug_info::trace_stack;
    use crate::vm::Severity;

    fn image(code: Vec<Op>) -> SimImage {
        SimImage {
            memory_size: 128,
            stack_start: 128,
            main_locals: 4,
            code,
            debug_info: DebugInfo {
                pointer_size: 4,
                ..Default::default()
            },
            sources: vec![],
        }
    }

    #[test]
    fn test_call_and_return() {
        let image = image(vec![
            Op::Call {
                target: 3,
                locals: 4,
            },
            Op::Print {
                text: "ok".to_string(),
            },
            Op::Halt,
            Op::StoreLocal {
                offset: -4,
                bytes: vec![42, 0, 0, 0],
            },
            Op::Ret,
        ]);
        let mut processor = SimProcessor::new(&image, None);
        let mut out = String::new();
        let main_bp = processor.registers().base_pointer;
        assert_eq!(main_bp, 120);

        processor.tick(&mut out).unwrap();
        let regs = processor.registers();
        assert_eq!(regs.instruction_pointer, 3);
        assert_eq!(regs.base_pointer, 108);

        let trace = trace_stack(
            processor.memory(),
            regs.base_pointer,
            &processor.debug_info().stack_offsets,
            4,
        );
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].base_pointer, main_bp);
        assert_eq!(trace[0].instruction_pointer, 1);

        processor.run_until_completion(&mut out, 10).unwrap();
        assert_eq!(out, "ok");
        assert_eq!(processor.memory()[104], 42);
    }

    #[test]
    fn test_fault() {
        let mut processor = SimProcessor::new(
            &image(vec![Op::Fault {
                message: "boom".to_string(),
            }]),
            None,
        );
        let err = processor.tick(&mut String::new()).unwrap_err();
        assert_eq!(err.kind, "RuntimeFault");
        assert_eq!(processor.registers().instruction_pointer, 0);
    }

    #[test]
    fn test_tick_limit() {
        let mut processor = SimProcessor::new(&image(vec![Op::Jump { target: 0 }]), None);
        let err = processor
            .run_until_completion(&mut String::new(), 100)
            .unwrap_err();
        assert_eq!(err.kind, "TickLimitExceeded");
    }

    #[test]
    fn test_validate() {
        let err = image(vec![Op::Jump { target: 7 }]).validate().unwrap_err();
        assert!(err.0.iter().any(|d| d.severity == Severity::Error));
    }
}
