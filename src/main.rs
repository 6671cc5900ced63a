//! Debug adapter for programs of the scripted bytecode processor.
//!
//! Speaks the debug adapter protocol over stdio by default, or over TCP with `--listen`.

use anyhow::Context;
use bytecode_dap::debugger::SessionConfig;
use bytecode_dap::ui::dap::{transport, DebugSession};
use bytecode_dap::vm::sim::SimToolchain;
use clap::Parser;
use log::{info, warn};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on, the adapter talks over stdio if not set.
    #[clap(long, env = "BCDAP_LISTEN")]
    listen: Option<String>,

    /// Exit after the first debug session ends (single-client mode).
    #[clap(long)]
    oneshot: bool,

    /// Write adapter logs into this file instead of stderr.
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// Trace protocol traffic (requests, responses and events) into the log.
    #[clap(long)]
    trace_dap: bool,
}

fn serve_tcp(addr: &str, args: &Args) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse().context("Invalid listen address")?;
    let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
    info!(target: "dap", "bc-dap listening on {}", listener.local_addr()?);

    // One client is one debug session, clients are served sequentially.
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "dap", "accept failed: {err:#}");
                continue;
            }
        };
        info!(target: "dap", "DAP client connected: {peer}");

        let (reader, output) = match transport::tcp(stream, args.trace_dap) {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "dap", "failed to init DAP I/O: {err:#}");
                continue;
            }
        };

        let session = DebugSession::new(SimToolchain, reader, output, SessionConfig::default());
        match session.run() {
            Ok(()) => info!(target: "dap", "session with {peer} finished"),
            Err(err) => warn!(target: "dap", "session ended with error: {err:#}"),
        }

        if args.oneshot {
            break;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    bytecode_dap::log::init(args.log_file.as_deref(), args.trace_dap)?;

    match &args.listen {
        Some(addr) => serve_tcp(addr, &args),
        None => {
            let (reader, output) = transport::stdio(args.trace_dap);
            DebugSession::new(SimToolchain, reader, output, SessionConfig::default()).run()
        }
    }
}
