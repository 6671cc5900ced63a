use crate::vm::debug_info::{
    trace_stack, CallTraceItem, DebugInfo, FunctionInformation, SourceCodeLocation,
};
use crate::vm::{Processor, RuntimeError};
use strum_macros::IntoStaticStr;

/// Reason of a program stop.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
pub enum StopReason {
    /// External pause request (or stop on entry).
    Pause,
    /// Breakpoint with client visible id `id` hit.
    Breakpoint { id: i64 },
    /// Step over calls to the next source location.
    StepForward,
    /// Step to the next source location at any depth.
    StepIn,
    /// Step until the current function returns.
    StepOut,
    /// Processor raised a fault.
    Crash(RuntimeError),
}

impl StopReason {
    pub fn is_step(&self) -> bool {
        matches!(
            self,
            StopReason::StepForward | StopReason::StepIn | StopReason::StepOut
        )
    }

    /// Reason as reported in a `stopped` event.
    pub fn event_reason(&self) -> &'static str {
        match self {
            StopReason::Pause => "pause",
            StopReason::Breakpoint { .. } => "breakpoint",
            StopReason::StepForward | StopReason::StepIn | StopReason::StepOut => "step",
            StopReason::Crash(_) => "exception",
        }
    }
}

/// Program state observed at a stop.
#[derive(Debug, Clone)]
pub struct StopContext {
    pub instruction_pointer: usize,
    /// Caller frames, innermost first.
    pub trace: Vec<CallTraceItem>,
    pub function: Option<FunctionInformation>,
    pub location: Option<SourceCodeLocation>,
}

impl StopContext {
    pub fn capture<P: Processor + ?Sized>(processor: &P) -> Self {
        let registers = processor.registers();
        let info: &DebugInfo = processor.debug_info();
        let ip = registers.instruction_pointer;

        Self {
            instruction_pointer: ip,
            trace: trace_stack(
                processor.memory(),
                registers.base_pointer,
                &info.stack_offsets,
                info.pointer_size,
            ),
            function: info.function_info(ip).cloned(),
            location: info.source_location(ip).cloned(),
        }
    }

    pub fn depth(&self) -> usize {
        self.trace.len()
    }

    fn same_location(&self, other: &StopContext) -> bool {
        match (&self.location, &other.location) {
            (Some(a), Some(b)) => a.location == b.location,
            _ => false,
        }
    }
}

/// Decide whether an armed stop should be reported at `current`.
///
/// # Arguments
///
/// * `reason`: armed stop reason
/// * `current`: state before the next tick
/// * `last`: state of the previous stop, the point where a step started
pub fn should_stop(reason: &StopReason, current: &StopContext, last: Option<&StopContext>) -> bool {
    if !reason.is_step() {
        return true;
    }
    if current.location.is_none() {
        return false;
    }
    let Some(last) = last else {
        return true;
    };

    match reason {
        StopReason::StepForward => !current.same_location(last) && current.depth() <= last.depth(),
        StopReason::StepIn => !current.same_location(last),
        StopReason::StepOut => current.depth() < last.depth(),
        _ => true,
    }
}
