//! LET and the lambda helper functions
//!
//! `LAMBDA` itself is syntax: the parser builds the closure and the evaluator invokes it.
//! The helpers here take a lambda value as their last argument and call it through
//! [`EvaluationContext::call_lambda`].

use sheetcalc_core::{CellError, MAX_COLS, MAX_ROWS};

use super::{is_omitted, CalcResult, FunctionCategory, FunctionDescriptor, FunctionRegistry};
use crate::ast::FormulaExpr;
use crate::evaluator::{EvaluationContext, Operand};
use crate::value::{ArrayValue, FormulaValue};

pub(crate) fn register(r: &mut FunctionRegistry) {
    let lambda = |name: &str| FunctionDescriptor::builder(name, FunctionCategory::Lambda);

    r.add(lambda("LET").repeatable(3).lazy(fn_let).help("en", "Names intermediate results for use in a final calculation"));
    r.add(lambda("MAP").repeatable(2).native(fn_map).help("en", "Applies a lambda to each element of one or more arrays"));
    r.add(lambda("REDUCE").args(3, 3).native(fn_reduce).help("en", "Folds an array into an accumulated value"));
    r.add(lambda("SCAN").args(3, 3).native(fn_scan).help("en", "Folds an array, returning every intermediate value"));
    r.add(lambda("BYROW").args(2, 2).native(fn_byrow).help("en", "Applies a lambda to each row of an array"));
    r.add(lambda("BYCOL").args(2, 2).native(fn_bycol).help("en", "Applies a lambda to each column of an array"));
    r.add(lambda("MAKEARRAY").args(3, 3).native(fn_makearray).help("en", "Builds an array by calling a lambda with each row and column number"));
}

/// LET(name1, value1, [name2, value2, ...], calculation)
///
/// Each value can see the names bound before it.
pub fn fn_let(args: &[FormulaExpr], ctx: &EvaluationContext) -> CalcResult {
    if args.len() % 2 == 0 {
        return Err(CellError::Value);
    }
    let (calculation, bindings) = match args.split_last() {
        Some(split) => split,
        None => return Err(CellError::Value),
    };

    ctx.push_scope();
    for pair in bindings.chunks_exact(2) {
        let FormulaExpr::LambdaParameter(name) = &pair[0] else {
            ctx.pop_scope();
            return Err(CellError::Value);
        };
        let operand = ctx.evaluate_arg(&pair[1]);
        ctx.bind(name, operand);
    }
    let result = ctx.evaluate_arg(calculation);
    ctx.pop_scope();
    Ok(ctx.value(&result))
}

/// The lambda in `args[index]`, checked to take `arity` parameters
fn lambda_arg<'o>(
    args: &'o [Operand],
    ctx: &EvaluationContext,
    index: usize,
    arity: usize,
) -> Result<&'o Operand, CellError> {
    let callee = args.get(index).ok_or(CellError::Value)?;
    match ctx.lambda_arity(callee) {
        Some(n) if n == arity => Ok(callee),
        Some(_) => Err(CellError::Value),
        None => Err(callee.error().unwrap_or(CellError::Value)),
    }
}

/// A lambda result stored as one array element; nested arrays are `#CALC!`
fn element(value: FormulaValue) -> FormulaValue {
    match value {
        FormulaValue::Array(arr) if arr.len() == 1 => arr.top_left().clone(),
        FormulaValue::Array(_) => FormulaValue::Error(CellError::Calc),
        other => other,
    }
}

/// MAP(array1, [array2, ...], lambda)
///
/// Arrays of different shapes broadcast; positions missing from an array are `#N/A`.
pub fn fn_map(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let count = args.len() - 1;
    let callee = lambda_arg(args, ctx, count, count)?;
    let arrays = args[..count]
        .iter()
        .map(|a| ctx.array(a))
        .collect::<Result<Vec<_>, _>>()?;
    let (rows, cols) = arrays
        .iter()
        .fold((1, 1), |(r, c), a| (r.max(a.rows()), c.max(a.cols())));

    let result = ArrayValue::from_fn(rows, cols, |r, c| {
        let mut params = Vec::with_capacity(count);
        for arr in &arrays {
            match arr.broadcast_get(r, c) {
                Some(v) => params.push(Operand::Value(v.clone())),
                None => return FormulaValue::Error(CellError::Na),
            }
        }
        element(ctx.call_lambda(callee, params))
    });
    Ok(FormulaValue::Array(result))
}

/// Run the accumulator over every element, calling `visit` with each new value
fn fold(
    args: &[Operand],
    ctx: &EvaluationContext,
    mut visit: impl FnMut(&FormulaValue),
) -> Result<FormulaValue, CellError> {
    let callee = lambda_arg(args, ctx, 2, 2)?;
    let mut acc = if is_omitted(args, 0) {
        FormulaValue::Empty
    } else {
        ctx.value(&args[0])
    };
    let values = ctx.array(&args[1])?;
    for v in values.iter() {
        acc = ctx.call_lambda(callee, vec![Operand::Value(acc), Operand::Value(v.clone())]);
        visit(&acc);
    }
    Ok(acc)
}

/// REDUCE([initial_value], array, lambda(accumulator, value))
pub fn fn_reduce(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    fold(args, ctx, |_| {})
}

/// SCAN([initial_value], array, lambda(accumulator, value))
pub fn fn_scan(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let shape = ctx.array(&args[1])?;
    let mut steps = Vec::with_capacity(shape.len());
    fold(args, ctx, |acc| steps.push(element(acc.clone())))?;
    ArrayValue::new(shape.rows(), shape.cols(), steps)
        .map(FormulaValue::Array)
        .ok_or(CellError::Calc)
}

/// BYROW(array, lambda(row))
pub fn fn_byrow(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let callee = lambda_arg(args, ctx, 1, 1)?;
    let arr = ctx.array(&args[0])?;
    let result = ArrayValue::from_fn(arr.rows(), 1, |r, _| match arr.row(r) {
        Some(row) => element(ctx.call_lambda(callee, vec![Operand::Value(FormulaValue::Array(row))])),
        None => FormulaValue::Error(CellError::Calc),
    });
    Ok(FormulaValue::Array(result))
}

/// BYCOL(array, lambda(column))
pub fn fn_bycol(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let callee = lambda_arg(args, ctx, 1, 1)?;
    let arr = ctx.array(&args[0])?;
    let result = ArrayValue::from_fn(1, arr.cols(), |_, c| match arr.column(c) {
        Some(col) => element(ctx.call_lambda(callee, vec![Operand::Value(FormulaValue::Array(col))])),
        None => FormulaValue::Error(CellError::Calc),
    });
    Ok(FormulaValue::Array(result))
}

/// MAKEARRAY(rows, columns, lambda(row, column)) - Row and column numbers start at 1
pub fn fn_makearray(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let callee = lambda_arg(args, ctx, 2, 2)?;
    let rows = ctx.value(&args[0]).scalar().to_number()?.trunc();
    let cols = ctx.value(&args[1]).scalar().to_number()?.trunc();
    if rows < 1.0 || cols < 1.0 || rows > f64::from(MAX_ROWS) || cols > f64::from(MAX_COLS) {
        return Err(CellError::Value);
    }
    let result = ArrayValue::try_from_fn(rows as usize, cols as usize, |r, c| {
        let params = vec![
            Operand::Value(FormulaValue::Number((r + 1) as f64)),
            Operand::Value(FormulaValue::Number((c + 1) as f64)),
        ];
        element(ctx.call_lambda(callee, params))
    })?;
    Ok(FormulaValue::Array(result))
}
