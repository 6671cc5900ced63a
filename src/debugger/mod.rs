pub mod breakpoint;
pub mod error;
pub mod evaluate;
mod rendezvous;
mod runtime;
pub mod stack;
pub mod stdout;
pub mod step;
pub mod utils;
pub mod variable;
pub mod view;

pub use error::Error;
pub use step::StopReason;

use crate::debugger::breakpoint::{BreakpointRequest, BreakpointTable, InstructionBreakpointRequest};
use crate::debugger::rendezvous::Gate;
use crate::debugger::stack::FetchedFrame;
use crate::debugger::stdout::StdoutBuffer;
use crate::debugger::step::StopContext;
use crate::debugger::utils::{clamp_window, parse_reference, UniqueIds};
use crate::debugger::variable::{IndirectRegistry, VariableReader};
use crate::debugger::view::{
    BreakpointEventReason, BreakpointLocation, ClientOrigin, DisassembledInstruction,
    EvaluateResult, ExceptionDetails, ExceptionInfo, MemoryBlock, MemoryWrite, Output,
};
use crate::vm::{memory, CompilerSettings, Processor, RuntimeError, Toolchain};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Receiver of session events.
///
/// Hooks are called while the session lock is held and must not call back into the debugger.
pub trait EventHook: Send + Sync + 'static {
    /// Program stopped and session state may be inspected.
    fn on_stop(&self, reason: &StopReason);
    /// Program execution started or resumed.
    fn on_continue(&self);
    fn on_output(&self, output: Output);
    fn on_breakpoint(&self, reason: BreakpointEventReason, breakpoint: view::Breakpoint);
    fn on_exit(&self, code: i64);
    fn on_terminate(&self);
}

/// Engine tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Buffered program output is flushed after this number of ticks without new output.
    pub stdout_flush_ticks: u64,
    /// Maximum number of ticks an evaluated expression may take.
    pub evaluation_budget: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stdout_flush_ticks: 30,
            evaluation_budget: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub program: PathBuf,
    pub stop_on_entry: bool,
    pub no_debug: bool,
    pub settings: CompilerSettings,
}

/// Source breakpoint in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceBreakpoint {
    pub line: i64,
    pub column: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    /// Client disconnected, the worker reports termination.
    Disconnect,
    /// Worker is replaced silently.
    Restart,
}

struct Session<T: Toolchain> {
    program: Option<T::Program>,
    image: Option<T::Image>,
    processor: Option<T::Processor>,

    breakpoints: BreakpointTable,
    breakpoint_ids: UniqueIds,

    frames: Vec<FetchedFrame>,
    registry: IndirectRegistry,
    /// Ids of frames, scopes and indirect variables, renewed at every stop.
    ids: UniqueIds,

    stop: Option<StopReason>,
    is_stopped: bool,
    last_stop: Option<StopContext>,
    crash: Option<RuntimeError>,

    stdout: StdoutBuffer,
    time: u64,

    no_debug: bool,
    stop_on_entry: bool,
    configuration_done: bool,
    shutdown: Option<Shutdown>,
    terminated: bool,
    origin: ClientOrigin,
}

impl<T: Toolchain> Session<T> {
    fn new() -> Self {
        Self {
            program: None,
            image: None,
            processor: None,
            breakpoints: BreakpointTable::default(),
            breakpoint_ids: UniqueIds::default(),
            frames: vec![],
            registry: IndirectRegistry::default(),
            ids: UniqueIds::default(),
            stop: None,
            is_stopped: false,
            last_stop: None,
            crash: None,
            stdout: StdoutBuffer::default(),
            time: 0,
            no_debug: false,
            stop_on_entry: false,
            configuration_done: false,
            shutdown: None,
            terminated: false,
            origin: ClientOrigin::default(),
        }
    }

    /// Drop everything produced by a previous run, breakpoints and the compiled program stay.
    fn reset_runtime(&mut self) {
        self.processor = None;
        self.frames.clear();
        self.registry.clear();
        self.ids = UniqueIds::default();
        self.stop = None;
        self.is_stopped = false;
        self.last_stop = None;
        self.crash = None;
        self.stdout = StdoutBuffer::default();
        self.time = 0;
        self.shutdown = None;
        self.terminated = false;
    }

    fn arm_entry_stop(&mut self) {
        if self.stop_on_entry && !self.no_debug {
            self.stop = Some(StopReason::Pause);
        }
    }

    /// Resolve pending breakpoints against the current processor, returns breakpoint events.
    fn resolve_pending(&mut self) -> Vec<view::Breakpoint> {
        let Some(processor) = self.processor.as_ref() else {
            return vec![];
        };
        self.breakpoints
            .resolve_pending(processor.debug_info())
            .into_iter()
            .map(|(file, bp)| bp.to_view(&file, &self.origin))
            .collect()
    }

    fn processor(&self) -> Result<&T::Processor, Error> {
        self.processor.as_ref().ok_or(Error::NoSession)
    }

    fn frame(&self, id: i64) -> Result<&FetchedFrame, Error> {
        self.frames
            .iter()
            .find(|f| f.id == id)
            .ok_or(Error::FrameNotFound(id))
    }
}

struct Shared<T: Toolchain, H: EventHook> {
    toolchain: T,
    hooks: H,
    config: SessionConfig,
    session: Mutex<Session<T>>,
    /// Raised while the worker may tick.
    allow_proceed: Gate,
    /// Raised by the worker once it left a stop.
    did_proceed: Gate,
}

impl<T: Toolchain, H: EventHook> Shared<T, H> {
    fn lock(&self) -> MutexGuard<'_, Session<T>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Debug session over programs produced by toolchain `T`.
///
/// Requests are served from the caller thread, the program itself runs in a worker thread
/// started on launch (or on configuration done, whichever comes last).
pub struct Debugger<T: Toolchain, H: EventHook> {
    shared: Arc<Shared<T, H>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Toolchain, H: EventHook> Debugger<T, H> {
    pub fn new(toolchain: T, hooks: H, config: SessionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                toolchain,
                hooks,
                config,
                session: Mutex::new(Session::new()),
                allow_proceed: Gate::new(true),
                did_proceed: Gate::new(false),
            }),
            worker: None,
        }
    }

    pub fn hooks(&self) -> &H {
        &self.shared.hooks
    }

    fn lock(&self) -> MutexGuard<'_, Session<T>> {
        self.shared.lock()
    }

    pub fn set_client_origin(&self, origin: ClientOrigin) {
        self.lock().origin = origin;
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().is_stopped
    }

    fn start_worker(&mut self) -> Result<(), Error> {
        if let Some(worker) = self.worker.take() {
            if !worker.is_finished() {
                self.worker = Some(worker);
                return Ok(());
            }
            if worker.join().is_err() {
                log::error!(target: "debugger", "worker thread panicked");
            }
        }

        let shared = self.shared.clone();
        let worker = thread::Builder::new()
            .name("vm-worker".to_string())
            .spawn(move || runtime::run(shared))?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Unblock the worker and wait until it exits.
    fn stop_worker(&mut self, shutdown: Shutdown) {
        {
            let mut session = self.lock();
            session.shutdown = Some(shutdown);
            session.stop = None;
            session.is_stopped = false;
        }
        self.shared.allow_proceed.set();

        if let Some(worker) = self.worker.take() {
            log::debug!(target: "debugger", "waiting for worker ({shutdown:?})");
            if worker.join().is_err() {
                log::error!(target: "debugger", "worker thread panicked");
            }
        }
    }

    /// Compile and load a program. Execution starts once configuration is done.
    pub fn launch(&mut self, options: LaunchOptions) -> Result<(), Error> {
        self.stop_worker(Shutdown::Restart);

        let start = {
            let hooks = &self.shared.hooks;
            let toolchain = &self.shared.toolchain;
            let mut session = self.lock();

            session.reset_runtime();
            session.program = None;
            session.image = None;
            session.breakpoints.unresolve();
            session.breakpoints.clear_instructions();
            session.no_debug = options.no_debug;
            session.stop_on_entry = options.stop_on_entry;

            log::info!(target: "debugger", "launch {}", options.program.display());
            let built = toolchain
                .compile_file(&options.program, &options.settings)
                .and_then(|program| {
                    let image = toolchain.generate(&program)?;
                    Ok((program, image))
                });
            let (program, image) = match built {
                Ok(built) => built,
                Err(diagnostics) => {
                    hooks.on_output(Output::error(diagnostics.to_string()));
                    session.terminated = true;
                    hooks.on_exit(-1);
                    hooks.on_terminate();
                    return Err(diagnostics.into());
                }
            };

            session.processor = Some(toolchain.instantiate(&image, None));
            session.program = Some(program);
            session.image = Some(image);
            session.arm_entry_stop();
            for bp in session.resolve_pending() {
                hooks.on_breakpoint(BreakpointEventReason::Changed, bp);
            }

            session.configuration_done
        };

        if start {
            self.start_worker()?;
        }
        Ok(())
    }

    pub fn configuration_done(&mut self) -> Result<(), Error> {
        let loaded = {
            let mut session = self.lock();
            session.configuration_done = true;
            session.processor.is_some()
        };
        if loaded {
            self.start_worker()?;
        }
        Ok(())
    }

    /// Run the loaded program again from the beginning.
    pub fn restart(&mut self) -> Result<(), Error> {
        self.stop_worker(Shutdown::Restart);

        {
            let hooks = &self.shared.hooks;
            let mut guard = self.lock();
            let session = &mut *guard;
            let Some(image) = session.image.as_ref() else {
                return Err(Error::NoSession);
            };
            let processor = self.shared.toolchain.instantiate(image, None);

            session.reset_runtime();
            session.processor = Some(processor);
            session.arm_entry_stop();
            session.breakpoints.unresolve();
            for bp in session.resolve_pending() {
                hooks.on_breakpoint(BreakpointEventReason::Changed, bp);
            }
        }

        log::info!(target: "debugger", "restart");
        self.start_worker()
    }

    /// End the session, safe to call several times and before launch.
    pub fn disconnect(&mut self) {
        self.stop_worker(Shutdown::Disconnect);
        let mut session = self.lock();
        session.processor = None;
        session.frames.clear();
        session.registry.clear();
    }

    /// Request a stop at the next tick boundary. No-op while stopped.
    pub fn pause(&self) -> Result<(), Error> {
        let mut session = self.lock();
        session.processor()?;
        if session.no_debug || session.is_stopped {
            return Ok(());
        }
        session.stop = Some(StopReason::Pause);
        self.shared.allow_proceed.reset();
        Ok(())
    }

    fn proceed(&self, reason: Option<StopReason>) -> Result<(), Error> {
        let was_stopped = {
            let mut session = self.lock();
            session.processor()?;
            session.stop = if session.no_debug { None } else { reason };
            std::mem::replace(&mut session.is_stopped, false)
        };

        if was_stopped {
            self.shared.allow_proceed.set();
            self.shared.did_proceed.wait();
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<(), Error> {
        self.proceed(None)
    }

    pub fn step_over(&self) -> Result<(), Error> {
        self.proceed(Some(StopReason::StepForward))
    }

    pub fn step_in(&self) -> Result<(), Error> {
        self.proceed(Some(StopReason::StepIn))
    }

    pub fn step_out(&self) -> Result<(), Error> {
        self.proceed(Some(StopReason::StepOut))
    }

    /// Replace breakpoints of `file`, returns one breakpoint per request.
    pub fn set_breakpoints(
        &self,
        file: &Path,
        breakpoints: &[SourceBreakpoint],
    ) -> Vec<view::Breakpoint> {
        let mut guard = self.lock();
        let session = &mut *guard;
        let origin = session.origin;

        let requests: Vec<_> = breakpoints
            .iter()
            .map(|bp| {
                BreakpointRequest::new(
                    origin.position_from_client(bp.line, bp.column.unwrap_or(0)),
                    bp.column.is_some(),
                )
            })
            .collect();

        let info = session.processor.as_ref().map(|p| p.debug_info());
        session
            .breakpoints
            .set(file, &requests, info, &session.breakpoint_ids)
            .iter()
            .map(|bp| bp.to_view(file, &origin))
            .collect()
    }

    /// Replace all instruction breakpoints.
    pub fn set_instruction_breakpoints(
        &self,
        breakpoints: &[InstructionBreakpointRequest],
    ) -> Vec<view::Breakpoint> {
        let mut guard = self.lock();
        let session = &mut *guard;
        let code_len = session.processor.as_ref().map_or(0, |p| p.code_len());
        session
            .breakpoints
            .set_instructions(breakpoints, code_len, &session.breakpoint_ids)
    }

    /// Source ranges of verified breakpoints placed in `file`.
    pub fn breakpoint_locations(&self, file: &Path) -> Vec<BreakpointLocation> {
        let session = self.lock();
        let origin = session.origin;
        session
            .breakpoints
            .verified_in(file)
            .filter_map(|bp| bp.location.as_ref())
            .map(|l| {
                let range = l.location.range;
                BreakpointLocation {
                    line: origin.line_to_client(range.start.line),
                    column: origin.column_to_client(range.start.character),
                    end_line: origin.line_to_client(range.end.line),
                    end_column: origin.column_to_client(range.end.character),
                }
            })
            .collect()
    }

    /// Frames captured at the last stop and the total number of frames.
    pub fn stack_trace(
        &self,
        start: Option<i64>,
        levels: Option<i64>,
    ) -> Result<(Vec<view::StackFrame>, usize), Error> {
        let session = self.lock();
        session.processor()?;
        if !session.is_stopped {
            return Err(Error::NotStopped);
        }

        let total = session.frames.len();
        let frames = session.frames[clamp_window(total, start, levels)]
            .iter()
            .map(|f| f.to_view(&session.origin))
            .collect();
        Ok((frames, total))
    }

    pub fn scopes(&self, frame_id: i64) -> Result<Vec<view::Scope>, Error> {
        let session = self.lock();
        let frame = session.frame(frame_id)?;
        Ok(frame
            .scopes
            .iter()
            .map(|s| s.to_view(&session.origin))
            .collect())
    }

    /// Variables of a scope or children of an expandable value.
    pub fn variables(
        &self,
        reference: i64,
        start: Option<i64>,
        count: Option<i64>,
    ) -> Result<Vec<view::Variable>, Error> {
        let mut guard = self.lock();
        let session = &mut *guard;
        let processor = session.processor.as_ref().ok_or(Error::NoSession)?;
        let stack_start = processor.stack_start();
        let mut reader = VariableReader::new(
            processor.memory(),
            processor.debug_info().pointer_size,
            &mut session.registry,
            &session.ids,
        );

        let scope = session
            .frames
            .iter()
            .find_map(|f| f.scope(reference).map(|s| (f.raw.base_pointer, s)));

        let result = match scope {
            Some((base_pointer, scope)) => scope.variables
                [clamp_window(scope.variables.len(), start, count)]
            .iter()
            .map(|e| {
                let address = e.absolute_address(base_pointer, stack_start);
                reader.read(&e.identifier, &e.ty, address)
            })
            .collect(),
            None => {
                let entry = reader
                    .entry(reference)
                    .cloned()
                    .ok_or(Error::ReferenceNotFound(reference))?;
                let children = reader.children(&entry);
                children[clamp_window(children.len(), start, count)]
                    .iter()
                    .map(|(name, ty, address)| reader.read(name, ty, *address))
                    .collect()
            }
        };

        if let Err(e) = &result {
            if e.is_invariant_violation() {
                log::error!(target: "debugger", "variables of {reference}: {e}");
            }
        }
        result
    }

    /// Evaluate an expression, optionally in the context of a frame.
    ///
    /// Compilation and runtime failures are reported as error output with an empty result.
    pub fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
    ) -> Result<EvaluateResult, Error> {
        let session = self.lock();
        let processor = session.processor()?;
        let program = session.program.as_ref().ok_or(Error::NoSession)?;
        let variables = match frame_id {
            Some(id) => evaluate::frame_variables(session.frame(id)?, processor.stack_start()),
            None => vec![],
        };

        let result = evaluate::evaluate(
            &self.shared.toolchain,
            program,
            processor,
            &variables,
            expression,
            self.shared.config.evaluation_budget,
        );
        match result {
            Err(e @ (Error::Diagnostics(_) | Error::Evaluation(_))) => {
                let message = e.to_string();
                self.shared
                    .hooks
                    .on_output(Output::error(format!("{}\n", message.trim_end())));
                Ok(EvaluateResult::default())
            }
            result => result,
        }
    }

    pub fn exception_info(&self) -> Result<ExceptionInfo, Error> {
        let session = self.lock();
        let crash = session.crash.as_ref().ok_or(Error::NoException)?;
        Ok(ExceptionInfo {
            exception_id: crash.kind.clone(),
            description: crash.message.clone(),
            break_mode: "unhandled",
            details: ExceptionDetails {
                type_name: crash.kind.clone(),
                message: crash.message.clone(),
            },
        })
    }

    /// Read up to `count` bytes, the range is clamped into the memory buffer.
    pub fn read_memory(
        &self,
        reference: &str,
        offset: Option<i64>,
        count: i64,
    ) -> Result<MemoryBlock, Error> {
        let session = self.lock();
        let buffer = session.processor()?.memory();
        let address = parse_reference(reference, 'm')
            .ok_or_else(|| Error::InvalidMemoryReference(reference.to_string()))?;

        if buffer.is_empty() {
            return Ok(MemoryBlock {
                address: 0,
                data: vec![],
            });
        }
        let start = address
            .saturating_add(offset.unwrap_or(0))
            .clamp(0, buffer.len() as i64 - 1) as usize;
        let count = count.clamp(0, (buffer.len() - start) as i64) as usize;
        Ok(MemoryBlock {
            address: start,
            data: buffer[start..start + count].to_vec(),
        })
    }

    /// Write `data`, truncated at the end of the memory buffer.
    pub fn write_memory(
        &self,
        reference: &str,
        offset: Option<i64>,
        data: &[u8],
    ) -> Result<MemoryWrite, Error> {
        let mut session = self.lock();
        let buffer = session
            .processor
            .as_mut()
            .ok_or(Error::NoSession)?
            .memory_mut();
        let address = parse_reference(reference, 'm')
            .ok_or_else(|| Error::InvalidMemoryReference(reference.to_string()))?;

        let offset = offset.unwrap_or(0);
        let start = address.saturating_add(offset);
        if start < 0 || start as usize >= buffer.len() {
            return Ok(MemoryWrite {
                offset: 0,
                bytes_written: 0,
            });
        }
        let len = data.len().min(buffer.len() - start as usize);
        memory::write_bytes(buffer, start, &data[..len]);
        Ok(MemoryWrite {
            offset: offset.max(0) as usize,
            bytes_written: len,
        })
    }

    /// Textual representation of up to `count` instructions.
    pub fn disassemble(
        &self,
        reference: &str,
        offset: Option<i64>,
        instruction_offset: Option<i64>,
        count: i64,
    ) -> Result<Vec<DisassembledInstruction>, Error> {
        let session = self.lock();
        let processor = session.processor()?;
        let base = parse_reference(reference, 'c')
            .ok_or_else(|| Error::InvalidMemoryReference(reference.to_string()))?;
        let start = base
            .saturating_add(offset.unwrap_or(0))
            .saturating_add(instruction_offset.unwrap_or(0));
        let end = start
            .saturating_add(count.max(0))
            .min(processor.code_len() as i64);

        Ok((start.max(0)..end)
            .map_while(|address| {
                let instruction = processor.instruction(address as usize)?;
                Some(DisassembledInstruction {
                    address: address.to_string(),
                    instruction,
                })
            })
            .collect())
    }

    pub fn loaded_sources(&self) -> Vec<view::Source> {
        let session = self.lock();
        session
            .program
            .as_ref()
            .map(|program| {
                self.shared
                    .toolchain
                    .sources(program)
                    .iter()
                    .map(|path| view::Source::new(path))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<T: Toolchain, H: EventHook> Drop for Debugger<T, H> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
