//! Logger setup for the adapter binary.
//!
//! Standard output may carry protocol messages, so logs go either to stderr or to a file.

use anyhow::Context;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::File;
use std::path::Path;

/// Target of protocol traffic records.
pub const DAP_TARGET: &str = "dap";

/// Build a logger configured by `RUST_LOG`.
///
/// # Arguments
///
/// * `log_file`: redirect records into this file (truncated on open)
/// * `trace_dap`: log every framed message at trace level
pub fn builder(log_file: Option<&Path>, trace_dap: bool) -> anyhow::Result<Builder> {
    let mut builder = Builder::from_default_env();
    if trace_dap {
        builder.filter(Some(DAP_TARGET), LevelFilter::Trace);
    }

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            builder.target(Target::Pipe(Box::new(file)));
        }
        None => {
            builder.target(Target::Stderr);
        }
    }
    Ok(builder)
}

pub fn init(log_file: Option<&Path>, trace_dap: bool) -> anyhow::Result<()> {
    builder(log_file, trace_dap)?
        .try_init()
        .context("install logger")
}

#[cfg(test)]
mod test {
    use super::*;
    use log::{Level, Log, Metadata};

    #[test]
    fn test_trace_dap_enables_protocol_records() {
        let logger = builder(None, true).unwrap().build();
        let dap = Metadata::builder()
            .level(Level::Trace)
            .target(DAP_TARGET)
            .build();
        assert!(logger.enabled(&dap));
    }

    #[test]
    fn test_log_file() {
        let path = std::env::temp_dir().join(format!("bcdap-log-{}.txt", std::process::id()));
        let logger = builder(Some(&path), false).unwrap().build();
        drop(logger);
        assert!(path.exists());
        std::fs::remove_file(path).unwrap();
    }
}
