//! Worker loop: ticks the processor, detects stops and hands control to the request thread.

use crate::debugger::stack::fetch_frames;
use crate::debugger::stdout::Flushed;
use crate::debugger::step::{self, StopContext, StopReason};
use crate::debugger::utils::UniqueIds;
use crate::debugger::view::{ClientOrigin, Output, OutputCategory};
use crate::debugger::{EventHook, Session, Shared, Shutdown};
use crate::vm::debug_info::{trace_stack, CallTraceItem};
use crate::vm::{Processor, Toolchain};
use std::sync::{Arc, MutexGuard};
use std::thread;

fn stdout_event(flushed: Flushed, origin: &ClientOrigin) -> Output {
    let output = Output::new(OutputCategory::Stdout, flushed.text);
    match &flushed.location {
        Some(location) => output.at(location, origin),
        None => output,
    }
}

fn flush_stdout<T: Toolchain, H: EventHook>(shared: &Shared<T, H>, session: &mut Session<T>) {
    let Some(processor) = session.processor.as_ref() else {
        return;
    };
    if let Some(flushed) = session.stdout.flush(processor.debug_info()) {
        shared.hooks.on_output(stdout_event(flushed, &session.origin));
    }
}

fn check_breakpoint<T: Toolchain>(session: &mut Session<T>) {
    if session.no_debug {
        return;
    }
    let Some(processor) = session.processor.as_ref() else {
        return;
    };
    let ip = processor.registers().instruction_pointer;
    if let Some(id) = session.breakpoints.hit(ip) {
        log::debug!(target: "debugger", "breakpoint {id} hit at {ip}");
        session.stop = Some(StopReason::Breakpoint { id });
    }
}

/// Report a stop and block until the request thread lets the program proceed.
fn stop<'a, T: Toolchain, H: EventHook>(
    shared: &'a Shared<T, H>,
    mut guard: MutexGuard<'a, Session<T>>,
    reason: StopReason,
    context: StopContext,
) -> MutexGuard<'a, Session<T>> {
    {
        let session = &mut *guard;
        flush_stdout(shared, session);

        session.ids = UniqueIds::default();
        session.registry.clear();
        session.frames = match session.processor.as_ref() {
            Some(processor) => fetch_frames(processor, &session.ids),
            None => vec![],
        };
        session.is_stopped = true;
        session.last_stop = Some(context);

        shared.did_proceed.reset();
        shared.allow_proceed.reset();
        log::debug!(target: "debugger", "stopped: {}", <&'static str>::from(&reason));
        shared.hooks.on_stop(&reason);
    }
    drop(guard);

    shared.allow_proceed.wait();
    shared.did_proceed.set();

    let guard = shared.lock();
    if guard.shutdown.is_none() {
        shared.hooks.on_continue();
    }
    guard
}

fn tick<T: Toolchain, H: EventHook>(shared: &Shared<T, H>, session: &mut Session<T>) {
    let Some(processor) = session.processor.as_mut() else {
        return;
    };
    let before = processor.registers();
    let mut out = String::new();
    let result = processor.tick(&mut out);
    let processor = &*processor;

    if !out.is_empty() {
        let info = processor.debug_info();
        let mut trace = vec![CallTraceItem::new(
            before.base_pointer,
            before.instruction_pointer,
        )];
        trace.extend(trace_stack(
            processor.memory(),
            before.base_pointer,
            &info.stack_offsets,
            info.pointer_size,
        ));
        trace.reverse();

        for c in out.chars() {
            for flushed in session.stdout.push(c, &trace, session.time, info) {
                shared.hooks.on_output(stdout_event(flushed, &session.origin));
            }
        }
    }

    match result {
        Ok(()) => check_breakpoint(session),
        Err(error) => {
            log::warn!(target: "debugger", "runtime fault: {error}");
            if !session.no_debug {
                session.stop = Some(StopReason::Crash(error.clone()));
            }
            session.crash = Some(error);
        }
    }

    if session
        .stdout
        .is_idle(session.time, shared.config.stdout_flush_ticks)
    {
        flush_stdout(shared, session);
    }
    session.time += 1;
}

fn finish<T: Toolchain, H: EventHook>(shared: &Shared<T, H>) {
    let mut guard = shared.lock();
    let session = &mut *guard;

    match session.shutdown {
        Some(Shutdown::Restart) => {}
        Some(Shutdown::Disconnect) => {
            if !session.terminated {
                session.terminated = true;
                shared.hooks.on_terminate();
            }
        }
        None => {
            flush_stdout(shared, session);
            if session.no_debug {
                if let Some(crash) = &session.crash {
                    shared.hooks.on_output(Output::error(format!("{crash}\n")));
                }
            }
            if !session.terminated {
                session.terminated = true;
                shared.hooks.on_exit(0);
                shared.hooks.on_terminate();
            }
        }
    }

    session.processor = None;
    session.is_stopped = false;
}

pub(super) fn run<T: Toolchain, H: EventHook>(shared: Arc<Shared<T, H>>) {
    {
        let mut session = shared.lock();
        log::debug!(target: "debugger", "worker started");
        shared.hooks.on_continue();
        check_breakpoint(&mut session);
    }

    loop {
        let mut guard = shared.lock();
        let session = &mut *guard;

        if session.shutdown.is_some() {
            break;
        }
        let Some(processor) = session.processor.as_ref() else {
            break;
        };
        if session.crash.is_some() && session.no_debug {
            break;
        }
        if processor.is_done() && session.crash.is_none() {
            break;
        }

        // a crashed program stays at the faulting instruction until disconnect
        // a crashed program stays at the faulting instruction until disconnect,
        // any requested step or pause reports the crash again
        if let Some(crash) = &session.crash {
            session.stop = Some(StopReason::Crash(crash.clone()));
        }

        if let Some(reason) = session.stop.clone() {
            let context = StopContext::capture(processor);
            if step::should_stop(&reason, &context, session.last_stop.as_ref()) {
                drop(stop(&shared, guard, reason, context));
                continue;
            }
        }

        if session.crash.is_none() {
            tick(&shared, session);
        }
        drop(guard);
        thread::yield_now();
    }

    finish(&shared);
    log::debug!(target: "debugger", "worker exited");
}
