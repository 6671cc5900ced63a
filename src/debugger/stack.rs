//! Call stack snapshot taken at a stop.

use crate::debugger::utils::UniqueIds;
use crate::debugger::view::{self, ClientOrigin, ScopeHint};
use crate::vm::debug_info::{
    trace_stack, CallTraceItem, FunctionInformation, Location, ScopeInformation,
    SourceCodeLocation, StackElementInformation, StackElementKind,
};
use crate::vm::Processor;
use strum::IntoEnumIterator;
use strum_macros::{EnumIter, IntoStaticStr};

/// Kind of a reported scope, variants are declared in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, EnumIter)]
pub enum ScopeKind {
    Arguments,
    Locals,
    #[strum(serialize = "Return Value")]
    ReturnValue,
    Internals,
}

impl ScopeKind {
    fn of(element: &StackElementInformation) -> Self {
        match element.kind {
            StackElementKind::Parameter => ScopeKind::Arguments,
            StackElementKind::Variable => ScopeKind::Locals,
            StackElementKind::Internal
                if element.identifier == StackElementInformation::RETURN_VALUE =>
            {
                ScopeKind::ReturnValue
            }
            StackElementKind::Internal => ScopeKind::Internals,
        }
    }

    pub fn hint(self) -> Option<ScopeHint> {
        match self {
            ScopeKind::Arguments => Some(ScopeHint::Arguments),
            ScopeKind::Locals => Some(ScopeHint::Locals),
            ScopeKind::ReturnValue => Some(ScopeHint::ReturnValue),
            ScopeKind::Internals => None,
        }
    }
}

/// Part of a lexical scope holding elements of one kind.
#[derive(Debug, Clone)]
pub struct FetchedScope {
    pub id: i64,
    pub kind: ScopeKind,
    pub location: Location,
    /// Descriptors copied from the debug metadata, addresses are resolved at read time.
    pub variables: Vec<StackElementInformation>,
}

impl FetchedScope {
    pub fn to_view(&self, origin: &ClientOrigin) -> view::Scope {
        view::Scope::new(
            self.kind.into(),
            self.kind.hint(),
            self.id,
            self.variables.len(),
            &self.location,
            origin,
        )
    }
}

#[derive(Debug, Clone)]
pub struct FetchedFrame {
    pub id: i64,
    pub raw: CallTraceItem,
    pub function: Option<FunctionInformation>,
    pub location: Option<SourceCodeLocation>,
    pub scopes: Vec<FetchedScope>,
}

impl FetchedFrame {
    pub fn name(&self) -> String {
        self.function
            .as_ref()
            .map(|f| f.identifier.clone())
            .unwrap_or_else(|| format!("<{}>", self.raw.instruction_pointer))
    }

    pub fn to_view(&self, origin: &ClientOrigin) -> view::StackFrame {
        let ip = self.raw.instruction_pointer;
        if let Some(location) = &self.location {
            return view::StackFrame::at(
                self.id,
                self.name(),
                &location.location.file,
                &location.location.range,
                origin,
                ip,
            );
        }

        match &self.function {
            Some(FunctionInformation {
                file: Some(file),
                position,
                ..
            }) => view::StackFrame::at(self.id, self.name(), file, position, origin, ip),
            _ => view::StackFrame::bare(self.id, self.name(), ip),
        }
    }

    pub fn scope(&self, id: i64) -> Option<&FetchedScope> {
        self.scopes.iter().find(|s| s.id == id)
    }
}

fn split_scope(scope: &ScopeInformation, ids: &UniqueIds) -> Vec<FetchedScope> {
    ScopeKind::iter()
        .filter_map(|kind| {
            let variables: Vec<_> = scope
                .stack
                .iter()
                .filter(|e| ScopeKind::of(e) == kind)
                .cloned()
                .collect();
            if variables.is_empty() {
                return None;
            }
            Some(FetchedScope {
                id: ids.next(),
                kind,
                location: scope.location.clone(),
                variables,
            })
        })
        .collect()
}

/// Capture frames of the stopped program, innermost first.
/// Frames whose instruction pointer lies outside of the code are skipped.
pub fn fetch_frames<P: Processor + ?Sized>(processor: &P, ids: &UniqueIds) -> Vec<FetchedFrame> {
    let registers = processor.registers();
    let info = processor.debug_info();

    let live = CallTraceItem::new(registers.base_pointer, registers.instruction_pointer);
    let callers = trace_stack(
        processor.memory(),
        registers.base_pointer,
        &info.stack_offsets,
        info.pointer_size,
    );

    std::iter::once(live)
        .chain(callers)
        .filter(|item| item.instruction_pointer < processor.code_len())
        .map(|raw| {
            let ip = raw.instruction_pointer;
            let id = ids.next();
            let scopes = info
                .scopes_at(ip)
                .into_iter()
                .flat_map(|scope| split_scope(scope, ids))
                .collect();
            FetchedFrame {
                id,
                raw,
                function: info.function_info(ip).cloned(),
                location: info.source_location(ip).cloned(),
                scopes,
            }
        })
        .collect()
}
