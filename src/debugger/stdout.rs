//! Coalescing of program output into output events.

use crate::vm::debug_info::{CallTraceItem, DebugInfo, Location};

/// Chunk of program output ready to be sent to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Flushed {
    pub text: String,
    pub location: Option<Location>,
}

/// Output buffered since the last flush together with the call trace it was produced at.
#[derive(Debug, Default)]
pub struct StdoutBuffer {
    text: String,
    /// Common trace of buffered characters, outermost frame first.
    trace: Vec<CallTraceItem>,
    modified_at: u64,
}

fn common_prefix(a: &[CallTraceItem], b: &[CallTraceItem]) -> usize {
    a.iter()
        .zip(b)
        .take_while(|(a, b)| a.base_pointer == b.base_pointer)
        .count()
}

impl StdoutBuffer {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Append a character written at `trace` (outermost frame first).
    pub fn push(
        &mut self,
        c: char,
        trace: &[CallTraceItem],
        time: u64,
        info: &DebugInfo,
    ) -> Vec<Flushed> {
        let mut flushed = vec![];

        if self.text.is_empty() {
            self.trace = trace.to_vec();
        } else {
            let common = common_prefix(&self.trace, trace);
            if common < self.trace.len() {
                self.trace.truncate(common);
                flushed.extend(self.flush(info));
                self.trace = trace.to_vec();
            }
        }

        self.text.push(c);
        self.modified_at = time;
        if c == '\n' {
            flushed.extend(self.flush(info));
        }
        flushed
    }

    /// True if buffered output was not touched for more than `threshold` ticks.
    pub fn is_idle(&self, time: u64, threshold: u64) -> bool {
        !self.text.is_empty() && time.saturating_sub(self.modified_at) > threshold
    }

    /// Take buffered output attributed to the deepest frame with a known source location.
    pub fn flush(&mut self, info: &DebugInfo) -> Option<Flushed> {
        if self.text.is_empty() {
            return None;
        }
        let location = self
            .trace
            .iter()
            .rev()
            .find_map(|item| info.source_location(item.instruction_pointer))
            .map(|l| l.location.clone());

        self.trace.clear();
        Some(Flushed {
            text: std::mem::take(&mut self.text),
            location,
        })
    }
}
