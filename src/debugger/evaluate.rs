//! Expression evaluation in a disposable processor.

use crate::debugger::error::Error;
use crate::debugger::stack::FetchedFrame;
use crate::debugger::variable::{render_scalar, UNKNOWN_VALUE};
use crate::debugger::view::EvaluateResult;
use crate::vm::debug_info::StackElementKind;
use crate::vm::types::{BasicType, GeneralType};
use crate::vm::{ExpressionVariable, Processor, Toolchain};

/// Non internal variables visible in `frame`, innermost scope first.
pub fn frame_variables(frame: &FetchedFrame, stack_start: usize) -> Vec<ExpressionVariable> {
    frame
        .scopes
        .iter()
        .flat_map(|scope| scope.variables.iter())
        .filter(|e| e.kind != StackElementKind::Internal)
        .map(|e| ExpressionVariable {
            name: e.identifier.clone(),
            address: e.absolute_address(frame.raw.base_pointer, stack_start),
            ty: e.ty.clone(),
        })
        .collect()
}

/// Compile and run `expression` over a copy of the live processor memory.
///
/// # Arguments
///
/// * `live`: processor of the debugged program, never modified
/// * `variables`: named inputs of the expression
/// * `budget`: maximum number of ticks the expression may take
pub fn evaluate<T: Toolchain>(
    toolchain: &T,
    program: &T::Program,
    live: &T::Processor,
    variables: &[ExpressionVariable],
    expression: &str,
    budget: u64,
) -> Result<EvaluateResult, Error> {
    let statements = toolchain.compile_expression(expression, program, variables)?;
    let [statement] = statements.as_slice() else {
        return Err(Error::Evaluation(format!(
            "Expression should only have one value, {} passed",
            statements.len()
        )));
    };

    let ty = toolchain.statement_type(statement);
    let image = toolchain.generate_expression(statement, program)?;

    let mut vm = toolchain.instantiate(&image, Some(live.memory().to_vec()));
    let live_registers = live.registers();
    {
        let registers = vm.registers_mut();
        registers.stack_pointer = live_registers.stack_pointer;
        registers.base_pointer = live_registers.base_pointer;
    }

    let mut output = String::new();
    vm.run_until_completion(&mut output, budget)
        .map_err(|e| Error::Evaluation(e.to_string()))?;
    if !output.is_empty() {
        log::debug!(target: "debugger", "expression `{expression}` wrote: {output:?}");
    }

    let result = match ty.final_value() {
        GeneralType::Builtin(BasicType::Void) => "void".to_string(),
        GeneralType::Builtin(BasicType::Any) => UNKNOWN_VALUE.to_string(),
        GeneralType::Builtin(basic) => {
            let sp = vm.registers().stack_pointer as i64;
            render_scalar(vm.memory(), sp, *basic)
        }
        _ => ty.to_string(),
    };

    Ok(EvaluateResult {
        result,
        ty: Some(ty.to_string()),
        variables_reference: 0,
    })
}
