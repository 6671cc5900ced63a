//! Debug adapter protocol front end.
//!
//! [`DebugSession`] reads requests one at a time from a [`MessageReader`] and serves them
//! through a [`Debugger`]. Events raised by the debugger worker are written concurrently
//! through the same [`ServerOutput`].

pub mod hook;
pub mod protocol;
pub mod transport;

use crate::debugger::breakpoint::InstructionBreakpointRequest;
use crate::debugger::view::{ClientOrigin, Output};
use crate::debugger::{Debugger, EventHook, SessionConfig, SourceBreakpoint};
use crate::ui::config::LaunchArguments;
use crate::ui::dap::hook::{DapHook, THREAD_ID};
use crate::ui::dap::protocol::{
    BreakpointLocationsArguments, DapRequest, DisassembleArguments, EvaluateArguments,
    InitializeArguments, ReadMemoryArguments, ScopesArguments, SetBreakpointsArguments,
    SetInstructionBreakpointsArguments, SourceArgument, StackTraceArguments, VariablesArguments,
    WriteMemoryArguments,
};
use crate::ui::dap::transport::{lock_output, MessageReader, SharedOutput};
use crate::vm::Toolchain;
use anyhow::{anyhow, Context};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

fn source_path(source: &SourceArgument) -> anyhow::Result<PathBuf> {
    source
        .path
        .as_deref()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("source without path"))
}

/// One client connection served until disconnect or end of input.
pub struct DebugSession<T: Toolchain> {
    reader: MessageReader,
    output: SharedOutput,
    debugger: Debugger<T, DapHook>,
}

impl<T: Toolchain> DebugSession<T> {
    pub fn new(
        toolchain: T,
        reader: MessageReader,
        output: SharedOutput,
        config: SessionConfig,
    ) -> Self {
        let hook = DapHook::new(output.clone());
        Self {
            reader,
            output,
            debugger: Debugger::new(toolchain, hook, config),
        }
    }

    fn send_response_raw(
        &self,
        req: &DapRequest,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) -> anyhow::Result<()> {
        lock_output(&self.output).send_response(req, success, message, body)
    }

    fn send_success(&self, req: &DapRequest) -> anyhow::Result<()> {
        self.send_response_raw(req, true, None, None)
    }

    fn send_success_body<B: Serialize>(&self, req: &DapRequest, body: B) -> anyhow::Result<()> {
        let body = serde_json::to_value(body)?;
        self.send_response_raw(req, true, None, Some(body))
    }

    fn send_err(&self, req: &DapRequest, message: impl ToString) -> anyhow::Result<()> {
        self.send_response_raw(req, false, Some(message.to_string()), None)
    }

    fn send_event(&self, name: &'static str) -> anyhow::Result<()> {
        lock_output(&self.output).send_event(name, None)
    }

    fn handle_initialize(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: InitializeArguments = req.arguments()?;
        self.debugger.set_client_origin(ClientOrigin::new(
            args.lines_start_at1,
            args.columns_start_at1,
        ));

        let body = json!({
            "supportsConfigurationDoneRequest": true,
            "supportsTerminateRequest": true,
            "supportsRestartRequest": true,
            "supportsEvaluateForHovers": true,
            "supportsExceptionInfoRequest": true,
            "supportsReadMemoryRequest": true,
            "supportsWriteMemoryRequest": true,
            "supportsDisassembleRequest": true,
            "supportsInstructionBreakpoints": true,
            "supportsBreakpointLocationsRequest": true,
            "supportsLoadedSourcesRequest": true,
            "supportsSteppingGranularity": false,
            "supportsSetVariable": false,
            "supportsStepBack": false,
        });
        self.send_success_body(req, body)?;
        self.send_event("initialized")
    }

    fn handle_launch(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: LaunchArguments = req.arguments()?;
        let (options, config_errors) = args.into_options()?;
        for e in config_errors {
            self.debugger
                .hooks()
                .on_output(Output::error(format!("{e}\n")));
        }

        match self.debugger.launch(options) {
            Ok(()) => self.send_success(req),
            Err(e) => self.send_err(req, format!("launch failed: {}", e.to_string().trim_end())),
        }
    }

    fn handle_configuration_done(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.debugger
            .configuration_done()
            .context("start program")?;
        self.send_success(req)
    }

    fn handle_set_breakpoints(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: SetBreakpointsArguments = req.arguments()?;
        let file = source_path(&args.source)?;
        let requests: Vec<_> = args
            .breakpoints
            .iter()
            .map(|bp| SourceBreakpoint {
                line: bp.line,
                column: bp.column,
            })
            .collect();

        let breakpoints = self.debugger.set_breakpoints(&file, &requests);
        self.send_success_body(req, json!({ "breakpoints": breakpoints }))
    }

    fn handle_set_instruction_breakpoints(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: SetInstructionBreakpointsArguments = req.arguments()?;
        let requests: Vec<_> = args
            .breakpoints
            .into_iter()
            .map(|bp| InstructionBreakpointRequest {
                instruction_reference: bp.instruction_reference,
                offset: bp.offset,
            })
            .collect();

        let breakpoints = self.debugger.set_instruction_breakpoints(&requests);
        self.send_success_body(req, json!({ "breakpoints": breakpoints }))
    }

    fn handle_breakpoint_locations(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: BreakpointLocationsArguments = req.arguments()?;
        let file = source_path(&args.source)?;
        let breakpoints = self.debugger.breakpoint_locations(&file);
        self.send_success_body(req, json!({ "breakpoints": breakpoints }))
    }

    fn handle_threads(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.send_success_body(
            req,
            json!({ "threads": [{ "id": THREAD_ID, "name": "Main Thread" }] }),
        )
    }

    fn handle_stack_trace(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: StackTraceArguments = req.arguments()?;
        let (frames, total) = self.debugger.stack_trace(args.start_frame, args.levels)?;
        self.send_success_body(
            req,
            json!({ "stackFrames": frames, "totalFrames": total }),
        )
    }

    fn handle_scopes(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: ScopesArguments = req.arguments()?;
        let scopes = self.debugger.scopes(args.frame_id)?;
        self.send_success_body(req, json!({ "scopes": scopes }))
    }

    fn handle_variables(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: VariablesArguments = req.arguments()?;
        let variables =
            self.debugger
                .variables(args.variables_reference, args.start, args.count)?;
        self.send_success_body(req, json!({ "variables": variables }))
    }

    fn handle_continue(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.debugger.resume()?;
        self.send_success_body(req, json!({ "allThreadsContinued": true }))
    }

    fn handle_next(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.debugger.step_over()?;
        self.send_success(req)
    }

    fn handle_step_in(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.debugger.step_in()?;
        self.send_success(req)
    }

    fn handle_step_out(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.debugger.step_out()?;
        self.send_success(req)
    }

    fn handle_pause(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.debugger.pause()?;
        self.send_success(req)
    }

    fn handle_evaluate(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: EvaluateArguments = req.arguments()?;
        let result = self.debugger.evaluate(&args.expression, args.frame_id)?;
        self.send_success_body(req, result)
    }

    fn handle_exception_info(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let info = self.debugger.exception_info()?;
        self.send_success_body(req, info)
    }

    fn handle_read_memory(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: ReadMemoryArguments = req.arguments()?;
        let block = self
            .debugger
            .read_memory(&args.memory_reference, args.offset, args.count)?;
        self.send_success_body(
            req,
            json!({
                "address": block.address.to_string(),
                "data": BASE64_STANDARD.encode(&block.data),
            }),
        )
    }

    fn handle_write_memory(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: WriteMemoryArguments = req.arguments()?;
        let data = BASE64_STANDARD
            .decode(args.data.as_bytes())
            .context("writeMemory: invalid base64 data")?;
        let written = self
            .debugger
            .write_memory(&args.memory_reference, args.offset, &data)?;
        self.send_success_body(req, written)
    }

    fn handle_disassemble(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: DisassembleArguments = req.arguments()?;
        let instructions = self.debugger.disassemble(
            &args.memory_reference,
            args.offset,
            args.instruction_offset,
            args.instruction_count,
        )?;
        self.send_success_body(req, json!({ "instructions": instructions }))
    }

    fn handle_loaded_sources(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let sources = self.debugger.loaded_sources();
        self.send_success_body(req, json!({ "sources": sources }))
    }

    fn handle_restart(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.debugger.restart()?;
        self.send_success(req)
    }

    fn handle_disconnect(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.debugger.disconnect();
        self.send_success(req)
    }

    /// Serve a request, returns false once the session should end.
    fn dispatch(&mut self, req: &DapRequest) -> anyhow::Result<bool> {
        match req.command.as_str() {
            "initialize" => self.handle_initialize(req)?,
            "launch" => self.handle_launch(req)?,
            "configurationDone" => self.handle_configuration_done(req)?,
            "setBreakpoints" => self.handle_set_breakpoints(req)?,
            "setInstructionBreakpoints" => self.handle_set_instruction_breakpoints(req)?,
            "breakpointLocations" => self.handle_breakpoint_locations(req)?,
            "threads" => self.handle_threads(req)?,
            "stackTrace" => self.handle_stack_trace(req)?,
            "scopes" => self.handle_scopes(req)?,
            "variables" => self.handle_variables(req)?,
            "continue" => self.handle_continue(req)?,
            "next" => self.handle_next(req)?,
            "stepIn" => self.handle_step_in(req)?,
            "stepOut" => self.handle_step_out(req)?,
            "pause" => self.handle_pause(req)?,
            "evaluate" => self.handle_evaluate(req)?,
            "exceptionInfo" => self.handle_exception_info(req)?,
            "readMemory" => self.handle_read_memory(req)?,
            "writeMemory" => self.handle_write_memory(req)?,
            "disassemble" => self.handle_disassemble(req)?,
            "loadedSources" => self.handle_loaded_sources(req)?,
            "restart" => self.handle_restart(req)?,
            "disconnect" | "terminate" => {
                self.handle_disconnect(req)?;
                return Ok(false);
            }
            other => {
                self.send_err(req, format!("Unsupported DAP command: {other}"))?;
            }
        }
        Ok(true)
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        while let Some(req) = self.reader.read_request()? {
            log::debug!(target: "dap", "{}: {}", req.seq, req.command);
            let cont = match self.dispatch(&req) {
                Ok(cont) => cont,
                Err(e) => {
                    log::debug!(target: "dap", "{} failed: {e:#}", req.command);
                    self.send_err(&req, format!("{e:#}"))?;
                    true
                }
            };
            if !cont {
                return Ok(());
            }
        }

        log::info!(target: "dap", "client closed the connection");
        self.debugger.disconnect();
        Ok(())
    }
}
