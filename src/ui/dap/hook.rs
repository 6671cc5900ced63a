use crate::debugger::view::{BreakpointEventReason, Output};
use crate::debugger::{view, EventHook, StopReason};
use crate::ui::dap::transport::{lock_output, SharedOutput};
use crate::weak_error;
use serde_json::{json, Value};

/// Single logical thread of the debugged program.
pub const THREAD_ID: i64 = 1;

/// Translates session events into protocol events.
pub struct DapHook {
    output: SharedOutput,
}

impl DapHook {
    pub fn new(output: SharedOutput) -> DapHook {
        DapHook { output }
    }

    fn send(&self, event: &'static str, body: Option<Value>) {
        let mut output = lock_output(&self.output);
        weak_error!(output.send_event(event, body), "send event:");
    }
}

fn stopped_body(reason: &StopReason) -> Value {
    let mut body = json!({
        "reason": reason.event_reason(),
        "threadId": THREAD_ID,
        "allThreadsStopped": true,
    });
    match reason {
        StopReason::Breakpoint { id } => body["hitBreakpointIds"] = json!([id]),
        StopReason::Crash(error) => {
            body["description"] = json!(error.kind);
            body["text"] = json!(error.message);
        }
        _ => {}
    }
    body
}

impl EventHook for DapHook {
    fn on_stop(&self, reason: &StopReason) {
        self.send("stopped", Some(stopped_body(reason)));
    }

    fn on_continue(&self) {
        self.send(
            "continued",
            Some(json!({"threadId": THREAD_ID, "allThreadsContinued": true})),
        );
    }

    fn on_output(&self, output: Output) {
        if let Some(body) = weak_error!(serde_json::to_value(output)) {
            self.send("output", Some(body));
        }
    }

    fn on_breakpoint(&self, reason: BreakpointEventReason, breakpoint: view::Breakpoint) {
        let reason: &'static str = reason.into();
        if let Some(breakpoint) = weak_error!(serde_json::to_value(breakpoint)) {
            self.send(
                "breakpoint",
                Some(json!({"reason": reason, "breakpoint": breakpoint})),
            );
        }
    }

    fn on_exit(&self, code: i64) {
        self.send("exited", Some(json!({ "exitCode": code })));
    }

    fn on_terminate(&self) {
        self.send("terminated", None);
    }
}
