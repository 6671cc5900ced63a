use bytecode_dap::debugger::breakpoint::InstructionBreakpointRequest;
use bytecode_dap::debugger::view::{self, BreakpointEventReason, Output, OutputCategory};
use bytecode_dap::debugger::{
    Debugger, EventHook, LaunchOptions, SessionConfig, SourceBreakpoint, StopReason,
};
use bytecode_dap::vm::sim::SimToolchain;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Stopped(StopReason),
    Continued,
    Output(Output),
    Breakpoint(BreakpointEventReason, view::Breakpoint),
    Exited(i64),
    Terminated,
}

struct Recorder(Mutex<Sender<Event>>);

impl Recorder {
    fn send(&self, event: Event) {
        let _ = self.0.lock().unwrap().send(event);
    }
}

impl EventHook for Recorder {
    fn on_stop(&self, reason: &StopReason) {
        self.send(Event::Stopped(reason.clone()));
    }

    fn on_continue(&self) {
        self.send(Event::Continued);
    }

    fn on_output(&self, output: Output) {
        self.send(Event::Output(output));
    }

    fn on_breakpoint(&self, reason: BreakpointEventReason, breakpoint: view::Breakpoint) {
        self.send(Event::Breakpoint(reason, breakpoint));
    }

    fn on_exit(&self, code: i64) {
        self.send(Event::Exited(code));
    }

    fn on_terminate(&self) {
        self.send(Event::Terminated);
    }
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

struct Harness {
    dbg: Debugger<SimToolchain, Recorder>,
    events: Receiver<Event>,
}

impl Harness {
    fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            dbg: Debugger::new(
                SimToolchain,
                Recorder(Mutex::new(tx)),
                SessionConfig::default(),
            ),
            events: rx,
        }
    }

    fn launch(&mut self, program: &str, stop_on_entry: bool, no_debug: bool) {
        self.dbg
            .launch(LaunchOptions {
                program: fixture(program),
                stop_on_entry,
                no_debug,
                ..Default::default()
            })
            .unwrap();
    }

    fn next_event(&self) -> Event {
        self.events
            .recv_timeout(EVENT_TIMEOUT)
            .expect("event expected")
    }

    /// Skip events until one matching `f` arrives, skipped events are returned besides.
    fn wait_for(&self, f: impl Fn(&Event) -> bool) -> (Event, Vec<Event>) {
        let mut skipped = vec![];
        loop {
            let event = self.next_event();
            if f(&event) {
                return (event, skipped);
            }
            skipped.push(event);
        }
    }

    fn wait_stop(&self) -> StopReason {
        match self.wait_for(|e| matches!(e, Event::Stopped(_))).0 {
            Event::Stopped(reason) => reason,
            _ => unreachable!(),
        }
    }

    fn wait_terminated(&self) -> Vec<Event> {
        self.wait_for(|e| *e == Event::Terminated).1
    }

    fn assert_quiet(&self) {
        match self.events.recv_timeout(Duration::from_millis(200)) {
            Err(RecvTimeoutError::Timeout) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    fn top_frame(&self) -> view::StackFrame {
        let (frames, _) = self.dbg.stack_trace(None, None).unwrap();
        frames[0].clone()
    }
}

fn stdout_of(events: &[Event]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Output(o) if o.category == OutputCategory::Stdout => Some(o.output.as_str()),
            _ => None,
        })
        .collect()
}

fn main_bc() -> PathBuf {
    fixture("main.bc")
}

fn at_line(line: i64) -> SourceBreakpoint {
    SourceBreakpoint { line, column: None }
}

/// Launch `calls.json` and stop at the call of `f`.
fn stopped_at_call() -> Harness {
    let mut h = Harness::new();
    let bps = h.dbg.set_breakpoints(&main_bc(), &[at_line(5)]);
    assert!(!bps[0].verified);

    h.launch("calls.json", false, false);
    let (event, _) = h.wait_for(|e| matches!(e, Event::Breakpoint(..)));
    let Event::Breakpoint(reason, bp) = event else {
        unreachable!()
    };
    assert_eq!(reason, BreakpointEventReason::Changed);
    assert!(bp.verified);
    assert_eq!(bp.line, Some(5));

    h.dbg.configuration_done().unwrap();
    assert_eq!(h.wait_stop(), StopReason::Breakpoint { id: bp.id });
    h
}

#[test]
fn test_breakpoint_then_step_over_call() {
    let h = stopped_at_call();
    let frame = h.top_frame();
    assert_eq!(frame.name, "main");
    assert_eq!(frame.line, 5);
    assert_eq!(frame.instruction_pointer_reference, "4");

    h.dbg.step_over().unwrap();
    let (reason, skipped) = h.wait_for(|e| matches!(e, Event::Stopped(_)));
    assert_eq!(reason, Event::Stopped(StopReason::StepForward));
    assert_eq!(skipped[0], Event::Continued);
    assert_eq!(stdout_of(&skipped), "in f\n");

    let (frames, total) = h.dbg.stack_trace(None, None).unwrap();
    assert_eq!(total, 1);
    assert_eq!(frames[0].line, 6);

    h.dbg.resume().unwrap();
    let events = h.wait_terminated();
    assert_eq!(stdout_of(&events), "done\n");
    assert!(events.contains(&Event::Exited(0)));
    assert!(!h.dbg.is_stopped());
}

#[test]
fn test_step_in_and_out() {
    let h = stopped_at_call();

    h.dbg.step_in().unwrap();
    assert_eq!(h.wait_stop(), StopReason::StepIn);
    let (frames, total) = h.dbg.stack_trace(None, None).unwrap();
    assert_eq!(total, 2);
    assert_eq!(frames[0].name, "f");
    assert_eq!(frames[0].line, 11);
    assert_eq!(frames[1].name, "main");
    assert_eq!(frames[1].line, 6);

    let (window, total) = h.dbg.stack_trace(Some(1), Some(5)).unwrap();
    assert_eq!(total, 2);
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].name, "main");

    h.dbg.step_out().unwrap();
    let (event, skipped) = h.wait_for(|e| matches!(e, Event::Stopped(_)));
    assert_eq!(event, Event::Stopped(StopReason::StepOut));
    assert_eq!(stdout_of(&skipped), "in f\n");
    let (frames, total) = h.dbg.stack_trace(None, None).unwrap();
    assert_eq!(total, 1);
    assert_eq!(frames[0].line, 6);
}

#[test]
fn test_scopes_and_variables() {
    let h = stopped_at_call();
    let frame = h.top_frame();

    let scopes = h.dbg.scopes(frame.id).unwrap();
    let names: Vec<_> = scopes.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Locals", "Internals"]);
    assert_eq!(scopes[0].named_variables, 4);

    let locals = h
        .dbg
        .variables(scopes[0].variables_reference, None, None)
        .unwrap();
    assert_eq!(locals.len(), 4);
    assert_eq!((locals[0].name.as_str(), locals[0].value.as_str()), ("x", "1"));
    assert_eq!(locals[0].memory_reference.as_deref(), Some("244"));

    let p = &locals[1];
    assert_eq!(p.value, "0xf4");
    assert_eq!(p.ty, "i32*");
    assert!(p.variables_reference > 0);
    let pointee = h.dbg.variables(p.variables_reference, None, None).unwrap();
    assert_eq!(pointee.len(), 1);
    assert_eq!((pointee[0].name.as_str(), pointee[0].value.as_str()), ("*p", "1"));

    // same address, same reference during one stop
    let again = h
        .dbg
        .variables(scopes[0].variables_reference, None, None)
        .unwrap();
    assert_eq!(again[1].variables_reference, p.variables_reference);

    let bytes = &locals[2];
    assert_eq!(bytes.value, "[...]");
    assert_eq!(bytes.indexed_variables, Some(3));
    let items: Vec<_> = h
        .dbg
        .variables(bytes.variables_reference, None, None)
        .unwrap()
        .into_iter()
        .map(|v| (v.name, v.value))
        .collect();
    assert_eq!(
        items,
        vec![
            ("[0]".to_string(), "10".to_string()),
            ("[1]".to_string(), "20".to_string()),
            ("[2]".to_string(), "30".to_string()),
        ]
    );

    let pair = &locals[3];
    assert_eq!(pair.value, "{...}");
    assert_eq!(pair.named_variables, Some(2));
    let fields = h.dbg.variables(pair.variables_reference, None, None).unwrap();
    assert_eq!(fields[0].name, "left");
    assert_eq!(fields[0].value, "4");
    assert_eq!(fields[0].ty, "u8");
    assert_eq!(fields[1].name, "right");
    assert_eq!(fields[1].value, "5");

    let page = h
        .dbg
        .variables(scopes[0].variables_reference, Some(1), Some(2))
        .unwrap();
    let names: Vec<_> = page.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["p", "bytes"]);

    assert!(h.dbg.variables(10_000, None, None).is_err());
    assert!(h.dbg.scopes(10_000).is_err());
}

#[test]
fn test_pause_while_stopped_is_noop() {
    let h = stopped_at_call();
    h.dbg.pause().unwrap();
    h.assert_quiet();
    assert!(h.dbg.is_stopped());

    h.dbg.resume().unwrap();
    let events = h.wait_terminated();
    assert!(!events.iter().any(|e| matches!(e, Event::Stopped(_))));
}

#[test]
fn test_pause_running_program() {
    let mut h = Harness::new();
    h.launch("loop.json", false, false);
    h.dbg.configuration_done().unwrap();
    assert_eq!(h.next_event(), Event::Continued);
    assert!(h.dbg.stack_trace(None, None).is_err());

    h.dbg.pause().unwrap();
    assert_eq!(h.wait_stop(), StopReason::Pause);
    assert_eq!(h.top_frame().name, "main");

    h.dbg.resume().unwrap();
    assert_eq!(h.next_event(), Event::Continued);
    h.dbg.pause().unwrap();
    assert_eq!(h.wait_stop(), StopReason::Pause);

    h.dbg.resume().unwrap();
    h.dbg.disconnect();
    let events = h.wait_terminated();
    assert!(!events.iter().any(|e| matches!(e, Event::Exited(_))));
    assert!(h.dbg.pause().is_err());
}

#[test]
fn test_disconnect_while_stopped() {
    let mut h = Harness::new();
    h.launch("loop.json", true, false);
    h.dbg.configuration_done().unwrap();
    assert_eq!(h.wait_stop(), StopReason::Pause);

    h.dbg.disconnect();
    let events = h.wait_terminated();
    assert!(!events.iter().any(|e| matches!(e, Event::Exited(_))));
    h.assert_quiet();

    // second disconnect is a no-op
    h.dbg.disconnect();
    h.assert_quiet();
}

#[test]
fn test_disconnect_before_launch() {
    let mut h = Harness::new();
    h.dbg.disconnect();
    h.assert_quiet();
}

#[test]
fn test_crash_keeps_session_alive() {
    let mut h = Harness::new();
    h.launch("crash.json", false, false);
    h.dbg.configuration_done().unwrap();

    let (event, skipped) = h.wait_for(|e| matches!(e, Event::Stopped(_)));
    let Event::Stopped(StopReason::Crash(error)) = event else {
        panic!("crash expected, got {event:?}");
    };
    assert_eq!(error.kind, "RuntimeFault");
    assert_eq!(stdout_of(&skipped), "before\n");

    let frame = h.top_frame();
    assert_eq!(frame.line, 3);
    let info = h.dbg.exception_info().unwrap();
    assert_eq!(info.exception_id, "RuntimeFault");
    assert_eq!(info.description, "boom");
    assert_eq!(info.break_mode, "unhandled");

    let result = h.dbg.evaluate("x", Some(frame.id)).unwrap();
    assert_eq!(result.result, "5");

    // the program stays at the faulting instruction
    h.dbg.resume().unwrap();
    assert!(matches!(h.wait_stop(), StopReason::Crash(_)));
    assert_eq!(h.top_frame().line, 3);

    h.dbg.disconnect();
    h.wait_terminated();
}

#[test]
fn test_step_after_crash_reports_crash() {
    let mut h = Harness::new();
    h.launch("crash.json", false, false);
    h.dbg.configuration_done().unwrap();
    assert!(matches!(h.wait_stop(), StopReason::Crash(_)));

    h.dbg.step_over().unwrap();
    assert!(matches!(h.wait_stop(), StopReason::Crash(_)));
    h.dbg.step_in().unwrap();
    assert!(matches!(h.wait_stop(), StopReason::Crash(_)));
    h.dbg.step_out().unwrap();
    assert!(matches!(h.wait_stop(), StopReason::Crash(_)));
    assert_eq!(h.top_frame().line, 3);

    h.dbg.disconnect();
    h.wait_terminated();
}

#[test]
fn test_evaluate_does_not_touch_session() {
    let h = stopped_at_call();
    let frame = h.top_frame();
    let before = h.dbg.read_memory("m0", None, 256).unwrap();
    assert_eq!(before.data.len(), 256);

    let result = h.dbg.evaluate("x", Some(frame.id)).unwrap();
    assert_eq!(result.result, "1");
    assert_eq!(result.ty.as_deref(), Some("i32"));
    let result = h.dbg.evaluate("42", None).unwrap();
    assert_eq!(result.result, "42");

    let result = h.dbg.evaluate("nope", Some(frame.id)).unwrap();
    assert_eq!(result.result, "");
    let Event::Output(output) = h.next_event() else {
        panic!("error output expected");
    };
    assert_eq!(output.category, OutputCategory::Stderr);
    assert!(output.output.contains("unknown identifier `nope`"));

    let after = h.dbg.read_memory("m0", None, 256).unwrap();
    assert_eq!(before, after);
    assert_eq!(h.top_frame(), frame);
}

#[test]
fn test_memory_access_and_disassemble() {
    let h = stopped_at_call();

    let block = h.dbg.read_memory("m244", None, 4).unwrap();
    assert_eq!(block.address, 244);
    assert_eq!(block.data, vec![1, 0, 0, 0]);
    let block = h.dbg.read_memory("m250", None, 100).unwrap();
    assert_eq!(block.data.len(), 6);
    assert!(h.dbg.read_memory("x1", None, 1).is_err());

    let written = h.dbg.write_memory("240", Some(4), &[9, 0, 0, 0]).unwrap();
    assert_eq!(written.bytes_written, 4);
    let written = h.dbg.write_memory("m1000", None, &[1]).unwrap();
    assert_eq!(written.bytes_written, 0);

    let frame = h.top_frame();
    let scopes = h.dbg.scopes(frame.id).unwrap();
    let locals = h
        .dbg
        .variables(scopes[0].variables_reference, None, Some(1))
        .unwrap();
    assert_eq!(locals[0].value, "9");

    let code = h.dbg.disassemble("c4", None, None, 2).unwrap();
    assert_eq!(code[0].address, "4");
    assert_eq!(code[0].instruction, "CALL 8 4");
    assert_eq!(code[1].instruction, "PRINT \"done\\n\"");
    let code = h.dbg.disassemble("0", Some(-2), None, 4).unwrap();
    let addresses: Vec<_> = code.iter().map(|i| i.address.as_str()).collect();
    assert_eq!(addresses, vec!["0", "1"]);
    assert!(h.dbg.disassemble("c10", None, Some(1), 5).unwrap().is_empty());

    // extreme references and counts are clamped instead of overflowing
    let code = h
        .dbg
        .disassemble(&i64::MAX.to_string(), Some(1), Some(1), i64::MAX)
        .unwrap();
    assert!(code.is_empty());
    let code = h
        .dbg
        .disassemble("c0", Some(-(1 << 40)), None, i64::MAX)
        .unwrap();
    assert!(!code.is_empty());
    assert_eq!(code[0].address, "0");
    let block = h
        .dbg
        .read_memory(&i64::MAX.to_string(), Some(i64::MAX), 4)
        .unwrap();
    assert_eq!(block.address, 255);
    assert_eq!(block.data.len(), 1);
    let written = h
        .dbg
        .write_memory(&i64::MIN.to_string(), Some(-1), &[1])
        .unwrap();
    assert_eq!(written.bytes_written, 0);

    let sources = h.dbg.loaded_sources();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name, "main.bc");

    let locations = h.dbg.breakpoint_locations(&main_bc());
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].line, 5);
}

#[test]
fn test_instruction_breakpoints() {
    let mut h = Harness::new();
    let bps = h.dbg.set_instruction_breakpoints(&[InstructionBreakpointRequest {
        instruction_reference: "9".to_string(),
        offset: None,
    }]);
    assert!(!bps[0].verified);

    h.launch("calls.json", false, false);
    let bps = h.dbg.set_instruction_breakpoints(&[
        InstructionBreakpointRequest {
            instruction_reference: "c8".to_string(),
            offset: Some(1),
        },
        InstructionBreakpointRequest {
            instruction_reference: "abc".to_string(),
            offset: None,
        },
        InstructionBreakpointRequest {
            instruction_reference: "100".to_string(),
            offset: None,
        },
    ]);
    assert!(bps[0].verified);
    assert!(!bps[1].verified);
    assert!(!bps[2].verified);

    h.dbg.configuration_done().unwrap();
    assert_eq!(h.wait_stop(), StopReason::Breakpoint { id: bps[0].id });
    let frame = h.top_frame();
    assert_eq!(frame.name, "f");
    assert_eq!(frame.instruction_pointer_reference, "9");
}

#[test]
fn test_launch_diagnostics() {
    let mut h = Harness::new();
    let err = h.dbg.launch(LaunchOptions {
        program: fixture("broken.json"),
        ..Default::default()
    });
    assert!(err.is_err());

    let Event::Output(output) = h.next_event() else {
        panic!("diagnostics output expected");
    };
    assert_eq!(output.category, OutputCategory::Stderr);
    assert!(output.output.contains("out of code"));
    assert_eq!(h.next_event(), Event::Exited(-1));
    assert_eq!(h.next_event(), Event::Terminated);

    h.dbg.configuration_done().unwrap();
    h.assert_quiet();
}

#[test]
fn test_no_debug_ignores_breakpoints_and_reports_crash() {
    let mut h = Harness::new();
    h.dbg.set_breakpoints(&fixture("crash.bc"), &[at_line(2)]);
    h.launch("crash.json", true, true);
    h.dbg.configuration_done().unwrap();

    let events = h.wait_terminated();
    assert!(!events.iter().any(|e| matches!(e, Event::Stopped(_))));
    assert_eq!(stdout_of(&events), "before\n");
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Output(o) if o.category == OutputCategory::Stderr && o.output == "RuntimeFault: boom\n"
    )));
    assert!(events.contains(&Event::Exited(0)));
}

#[test]
fn test_restart() {
    let mut h = Harness::new();
    h.launch("calls.json", true, false);
    h.dbg.configuration_done().unwrap();
    assert_eq!(h.wait_stop(), StopReason::Pause);
    assert_eq!(h.top_frame().line, 1);

    h.dbg.step_over().unwrap();
    assert_eq!(h.wait_stop(), StopReason::StepForward);
    assert_eq!(h.top_frame().line, 2);

    h.dbg.restart().unwrap();
    assert_eq!(h.wait_stop(), StopReason::Pause);
    assert_eq!(h.top_frame().line, 1);

    h.dbg.resume().unwrap();
    let events = h.wait_terminated();
    assert_eq!(stdout_of(&events), "in f\ndone\n");
}
