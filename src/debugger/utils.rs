use std::ops::Range;
use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonically increasing id generator, the first id is 1.
#[derive(Debug, Default)]
pub struct UniqueIds {
    last: AtomicI64,
}

impl UniqueIds {
    pub fn next(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Clamp an optional client supplied `start`/`count` window into `0..total`.
pub fn clamp_window(total: usize, start: Option<i64>, count: Option<i64>) -> Range<usize> {
    if total == 0 {
        return 0..0;
    }
    let start = start.unwrap_or(0).clamp(0, total as i64 - 1) as usize;
    let count = match count {
        Some(count) if count > 0 => (count as usize).min(total - start),
        _ => total - start,
    };
    start..start + count
}

/// Parse a memory or instruction reference, an integer with an optional one letter prefix.
pub fn parse_reference(reference: &str, prefix: char) -> Option<i64> {
    let reference = reference.trim();
    reference
        .strip_prefix(prefix)
        .unwrap_or(reference)
        .parse()
        .ok()
}
