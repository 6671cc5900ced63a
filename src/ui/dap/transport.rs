//! `Content-Length` framing over stdio or TCP.

use crate::ui::dap::protocol::{DapEvent, DapRequest, DapResponse};
use anyhow::anyhow;
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Reading half of a connection.
pub struct MessageReader {
    reader: Box<dyn BufRead + Send>,
    trace: bool,
}

impl MessageReader {
    pub fn new(reader: impl BufRead + Send + 'static, trace: bool) -> Self {
        Self {
            reader: Box::new(reader),
            trace,
        }
    }

    /// Read a single framed message, `None` if the peer closed the connection between messages.
    pub fn read_message(&mut self) -> anyhow::Result<Option<Value>> {
        let mut content_length: Option<usize> = None;
        let mut header_seen = false;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                if header_seen {
                    return Err(anyhow!("connection closed inside a message header"));
                }
                return Ok(None);
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if header_seen {
                    break;
                }
                continue;
            }
            header_seen = true;
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = Some(v.trim().parse()?);
            }
        }

        let len = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        let msg: Value = serde_json::from_slice(&buf)?;
        if self.trace {
            log::trace!(target: "dap", "<- {msg}");
        }
        Ok(Some(msg))
    }

    /// Read the next request, skipping messages of other types.
    pub fn read_request(&mut self) -> anyhow::Result<Option<DapRequest>> {
        while let Some(msg) = self.read_message()? {
            let kind = msg.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind == "request" {
                return Ok(Some(serde_json::from_value(msg)?));
            }
            log::warn!(target: "dap", "skip message of type `{kind}`");
        }
        Ok(None)
    }
}

/// Writing half of a connection, shared between the request loop and event hooks.
pub struct ServerOutput {
    writer: Box<dyn Write + Send>,
    seq: i64,
    trace: bool,
}

impl ServerOutput {
    pub fn new(writer: impl Write + Send + 'static, trace: bool) -> Self {
        Self {
            writer: Box::new(writer),
            seq: 0,
            trace,
        }
    }

    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn write_message<T: Serialize>(&mut self, message: &T) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(message)?;
        if self.trace {
            log::trace!(target: "dap", "-> {}", String::from_utf8_lossy(&payload));
        }
        write!(self.writer, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn send_response(
        &mut self,
        req: &DapRequest,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) -> anyhow::Result<()> {
        let response = DapResponse {
            seq: self.next_seq(),
            r#type: "response",
            request_seq: req.seq,
            success,
            command: req.command.clone(),
            message,
            body,
        };
        self.write_message(&response)
    }

    pub fn send_event(&mut self, event: &'static str, body: Option<Value>) -> anyhow::Result<()> {
        let event = DapEvent {
            seq: self.next_seq(),
            r#type: "event",
            event,
            body,
        };
        self.write_message(&event)
    }
}

pub type SharedOutput = Arc<Mutex<ServerOutput>>;

pub fn lock_output(output: &SharedOutput) -> MutexGuard<'_, ServerOutput> {
    output.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connection over the process standard streams.
pub fn stdio(trace: bool) -> (MessageReader, SharedOutput) {
    let reader = MessageReader::new(BufReader::new(std::io::stdin()), trace);
    let output = ServerOutput::new(std::io::stdout(), trace);
    (reader, Arc::new(Mutex::new(output)))
}

/// Connection over an accepted TCP stream.
pub fn tcp(stream: TcpStream, trace: bool) -> anyhow::Result<(MessageReader, SharedOutput)> {
    stream.set_nodelay(true)?;
    let reader = MessageReader::new(BufReader::new(stream.try_clone()?), trace);
    let output = ServerOutput::new(stream, trace);
    Ok((reader, Arc::new(Mutex::new(output))))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn framed(body: &str) -> String {
        format!("Content-Length: {}\r\n\r\n{body}", body.len())
    }

    #[test]
    fn test_read_messages() {
        let first = r#"{"seq":1,"type":"request","command":"initialize"}"#;
        let second = r#"{"seq":2,"type":"event","event":"x"}"#;
        let third = r#"{"seq":3,"type":"request","command":"threads","arguments":{}}"#;
        let input = format!("{}{}{}", framed(first), framed(second), framed(third));
        let mut reader = MessageReader::new(Cursor::new(input.into_bytes()), false);

        let req = reader.read_request().unwrap().unwrap();
        assert_eq!(req.command, "initialize");
        assert_eq!(req.arguments, Value::Null);
        let req = reader.read_request().unwrap().unwrap();
        assert_eq!(req.command, "threads");
        assert!(reader.read_request().unwrap().is_none());
    }

    #[test]
    fn test_skip_responses_and_untyped_messages() {
        let response = r#"{"seq":1,"type":"response","request_seq":4,"success":true,"command":"runInTerminal"}"#;
        let untyped = r#"{"seq":2}"#;
        let request = r#"{"seq":3,"type":"request","command":"threads"}"#;
        let input = format!("{}{}{}", framed(response), framed(untyped), framed(request));
        let mut reader = MessageReader::new(Cursor::new(input.into_bytes()), false);

        let req = reader.read_request().unwrap().unwrap();
        assert_eq!(req.seq, 3);
        assert_eq!(req.command, "threads");
        assert!(reader.read_request().unwrap().is_none());
    }

    #[test]
    fn test_missing_content_length() {
        let mut reader = MessageReader::new(Cursor::new(b"X-Other: 1\r\n\r\n{}".to_vec()), false);
        assert!(reader.read_message().is_err());
    }

    #[test]
    fn test_write_sequenced_messages() {
        let sink = Sink::default();
        let mut output = ServerOutput::new(sink.clone(), false);
        let req: DapRequest =
            serde_json::from_value(json!({"seq": 7, "type": "request", "command": "threads"}))
                .unwrap();

        output
            .send_response(&req, true, None, Some(json!({"threads": []})))
            .unwrap();
        output.send_event("initialized", None).unwrap();

        let written = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        let mut reader = MessageReader::new(Cursor::new(written.into_bytes()), false);
        let response = reader.read_message().unwrap().unwrap();
        assert_eq!(response["seq"], 1);
        assert_eq!(response["request_seq"], 7);
        assert_eq!(response["body"]["threads"], json!([]));
        let event = reader.read_message().unwrap().unwrap();
        assert_eq!(event["seq"], 2);
        assert_eq!(event["event"], "initialized");
        assert!(event.get("body").is_none());
    }
}
