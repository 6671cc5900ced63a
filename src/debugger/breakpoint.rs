//! Source and instruction breakpoints.
//!
//! Source breakpoints are resolved against the source-location table of the debug metadata.
//! Breakpoints requested before a program is loaded stay pending until launch.

use crate::debugger::utils::{parse_reference, UniqueIds};
use crate::debugger::view::{self, BreakpointFailure, ClientOrigin};
use crate::vm::debug_info::{DebugInfo, Position, SourceCodeLocation};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

pub const INVALID_LOCATION: &str = "Invalid location";
pub const INVALID_INSTRUCTION_REFERENCE: &str = "Invalid instruction reference";
pub const INSTRUCTION_OUT_OF_RANGE: &str = "Instruction address is out of range";

/// Requested source position, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointRequest {
    pub position: Position,
    /// False if client did not specify a column, the first statement of the line is used then.
    pub has_column: bool,
}

impl BreakpointRequest {
    pub fn new(position: Position, has_column: bool) -> Self {
        Self {
            position,
            has_column,
        }
    }
}

/// Find the source-location entry that best matches a requested position in `file`.
///
/// Priority: an entry starting exactly at the position, the tightest entry containing
/// the position, the entry on the same line with the smallest column not before it.
pub fn resolve<'a>(
    info: &'a DebugInfo,
    file: &'a Path,
    request: &BreakpointRequest,
) -> Option<&'a SourceCodeLocation> {
    let mut position = request.position;
    if !request.has_column {
        position.character = info
            .locations_in(file)
            .filter(|l| l.location.range.start.line == position.line)
            .map(|l| l.location.range.start.character)
            .min()
            .unwrap_or(0);
    }

    let tightest = |candidates: Vec<&'a SourceCodeLocation>| {
        candidates
            .into_iter()
            .min_by_key(|l| (l.instructions.len(), l.instructions.start))
    };

    let exact = info
        .locations_in(file)
        .filter(|l| l.location.range.start == position)
        .collect();
    if let Some(found) = tightest(exact) {
        return Some(found);
    }

    let enclosing = info
        .locations_in(file)
        .filter(|l| l.location.range.contains(position))
        .collect();
    if let Some(found) = tightest(enclosing) {
        return Some(found);
    }

    info.locations_in(file)
        .filter(|l| {
            l.location.range.start.line == position.line
                && l.location.range.start.character >= position.character
        })
        .min_by_key(|l| {
            (
                l.location.range.start.character,
                l.instructions.len(),
                l.instructions.start,
            )
        })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    pub id: i64,
    pub request: BreakpointRequest,
    pub verified: bool,
    pub message: Option<String>,
    pub address: Option<usize>,
    pub location: Option<SourceCodeLocation>,
}

impl Breakpoint {
    fn pending(id: i64, request: BreakpointRequest) -> Self {
        Self {
            id,
            request,
            verified: false,
            message: None,
            address: None,
            location: None,
        }
    }

    fn resolve(mut self, info: &DebugInfo, file: &Path) -> Self {
        match resolve(info, file, &self.request) {
            Some(location) => {
                self.verified = true;
                self.message = None;
                self.address = Some(location.instructions.start);
                self.location = Some(location.clone());
            }
            None => {
                self.verified = false;
                self.message = Some(INVALID_LOCATION.to_string());
                self.address = None;
                self.location = None;
            }
        }
        self
    }

    pub fn to_view(&self, file: &Path, origin: &ClientOrigin) -> view::Breakpoint {
        match &self.location {
            Some(location) if self.verified => view::Breakpoint {
                id: self.id,
                verified: true,
                message: None,
                reason: None,
                source: Some(view::Source::new(&location.location.file)),
                line: None,
                column: None,
                end_line: None,
                end_column: None,
                instruction_reference: self.address.map(|a| a.to_string()),
            }
            .with_range(&location.location.range, origin),
            _ => {
                let reason = if self.message.is_some() {
                    BreakpointFailure::Failed
                } else {
                    BreakpointFailure::Pending
                };
                let mut bp = view::Breakpoint::unverified(self.id, reason, self.message.clone());
                bp.source = Some(view::Source::new(file));
                bp.line = Some(origin.line_to_client(self.request.position.line));
                if self.request.has_column {
                    bp.column = Some(origin.column_to_client(self.request.position.character));
                }
                bp
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstructionBreakpoint {
    pub id: i64,
    pub address: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionBreakpointRequest {
    pub instruction_reference: String,
    pub offset: Option<i64>,
}

/// Breakpoints of a session, grouped per source file.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    pending: IndexMap<PathBuf, Vec<Breakpoint>>,
    verified: IndexMap<PathBuf, Vec<Breakpoint>>,
    invalid: IndexMap<PathBuf, Vec<Breakpoint>>,
    instructions: Vec<InstructionBreakpoint>,
}

impl BreakpointTable {
    fn place(&mut self, file: &Path, bp: Breakpoint) {
        let table = if bp.verified {
            &mut self.verified
        } else if bp.message.is_some() {
            &mut self.invalid
        } else {
            &mut self.pending
        };
        table.entry(file.to_path_buf()).or_default().push(bp);
    }

    /// Replace breakpoints of `file`.
    /// Returns one breakpoint per request, requests resolved to the same instruction share one.
    pub fn set(
        &mut self,
        file: &Path,
        requests: &[BreakpointRequest],
        info: Option<&DebugInfo>,
        ids: &UniqueIds,
    ) -> Vec<Breakpoint> {
        self.pending.shift_remove(file);
        self.verified.shift_remove(file);
        self.invalid.shift_remove(file);

        let mut result = Vec::with_capacity(requests.len());
        for request in requests {
            let Some(info) = info else {
                let bp = Breakpoint::pending(ids.next(), *request);
                self.place(file, bp.clone());
                result.push(bp);
                continue;
            };

            let bp = Breakpoint::pending(ids.next(), *request).resolve(info, file);
            if let Some(existing) = self.verified_at(file, bp.address) {
                result.push(existing);
                continue;
            }
            self.place(file, bp.clone());
            result.push(bp);
        }
        result
    }

    fn verified_at(&self, file: &Path, address: Option<usize>) -> Option<Breakpoint> {
        let address = address?;
        self.verified
            .get(file)?
            .iter()
            .find(|bp| bp.address == Some(address))
            .cloned()
    }

    /// Resolve all pending breakpoints, returns them with their new state.
    pub fn resolve_pending(&mut self, info: &DebugInfo) -> Vec<(PathBuf, Breakpoint)> {
        let pending = std::mem::take(&mut self.pending);
        let mut changed = vec![];

        for (file, breakpoints) in pending {
            for bp in breakpoints {
                let bp = bp.resolve(info, &file);
                if let Some(existing) = self.verified_at(&file, bp.address) {
                    changed.push((file.clone(), existing));
                    continue;
                }
                self.place(&file, bp.clone());
                changed.push((file.clone(), bp));
            }
        }
        changed
    }

    /// Move every source breakpoint back to pending state, used when a new program is loaded.
    pub fn unresolve(&mut self) {
        let verified = std::mem::take(&mut self.verified);
        let invalid = std::mem::take(&mut self.invalid);
        for (file, breakpoints) in verified.into_iter().chain(invalid) {
            for bp in breakpoints {
                let bp = Breakpoint::pending(bp.id, bp.request);
                self.place(&file, bp);
            }
        }
    }

    pub fn clear_instructions(&mut self) {
        self.instructions.clear();
    }

    /// Replace all instruction breakpoints.
    pub fn set_instructions(
        &mut self,
        requests: &[InstructionBreakpointRequest],
        code_len: usize,
        ids: &UniqueIds,
    ) -> Vec<view::Breakpoint> {
        self.instructions.clear();

        requests
            .iter()
            .map(|request| {
                let id = ids.next();
                let reference = request.instruction_reference.clone();

                let failure = |message: &str| {
                    let mut bp = view::Breakpoint::unverified(
                        id,
                        BreakpointFailure::Failed,
                        Some(message.to_string()),
                    );
                    bp.instruction_reference = Some(reference.clone());
                    bp
                };

                let Some(address) = parse_reference(&request.instruction_reference, 'c') else {
                    return failure(INVALID_INSTRUCTION_REFERENCE);
                };
                let address = match address.checked_add(request.offset.unwrap_or(0)) {
                    Some(address) if address >= 0 && (address as u64) < code_len as u64 => address,
                    _ => return failure(INSTRUCTION_OUT_OF_RANGE),
                };

                self.instructions.push(InstructionBreakpoint {
                    id,
                    address: address as usize,
                });
                view::Breakpoint {
                    id,
                    verified: true,
                    message: None,
                    reason: None,
                    source: None,
                    line: None,
                    column: None,
                    end_line: None,
                    end_column: None,
                    instruction_reference: Some(reference),
                }
            })
            .collect()
    }

    /// Id of the first breakpoint placed at `address`.
    pub fn hit(&self, address: usize) -> Option<i64> {
        self.verified
            .values()
            .flatten()
            .find(|bp| bp.address == Some(address))
            .map(|bp| bp.id)
            .or_else(|| {
                self.instructions
                    .iter()
                    .find(|bp| bp.address == address)
                    .map(|bp| bp.id)
            })
    }

    /// Verified breakpoints placed in `file`.
    pub fn verified_in<'a>(&'a self, file: &Path) -> impl Iterator<Item = &'a Breakpoint> + 'a {
        self.verified.get(file).into_iter().flatten()
    }
}
