//! Logical functions
//!
//! `IF`, `IFS`, `IFERROR`, `IFNA` and `SWITCH` are lazy: only the branches they select
//! are evaluated, so `IF(TRUE, 1, 1/0)` never divides by zero.

use std::cmp::Ordering;

use sheetcalc_core::CellError;

use super::{flatten, CalcResult, Flat, FunctionCategory, FunctionDescriptor, FunctionRegistry};
use crate::ast::FormulaExpr;
use crate::evaluator::{EvaluationContext, Operand};
use crate::value::{broadcast_element, compare_scalars, ArrayValue, FormulaValue};

pub(crate) fn register(r: &mut FunctionRegistry) {
    let logical = |name: &str| FunctionDescriptor::builder(name, FunctionCategory::Logical);

    r.add(logical("IF").args(2, 3).lazy(fn_if).help("en", "One of two values depending on a condition").help("de", "Wert abhängig von einer Bedingung"));
    r.add(logical("IFS").repeatable(2).lazy(fn_ifs).help("en", "Value paired with the first true condition"));
    r.add(logical("IFERROR").args(2, 2).lazy(fn_iferror).help("en", "A fallback when the value is an error"));
    r.add(logical("IFNA").args(2, 2).lazy(fn_ifna).help("en", "A fallback when the value is #N/A"));
    r.add(logical("SWITCH").repeatable(3).lazy(fn_switch).help("en", "Result paired with the first matching value"));
    r.add(logical("AND").repeatable(1).native(fn_and).help("en", "TRUE when every argument is true"));
    r.add(logical("OR").repeatable(1).native(fn_or).help("en", "TRUE when any argument is true"));
    r.add(logical("XOR").repeatable(1).native(fn_xor).help("en", "TRUE when an odd number of arguments are true"));
    r.add(logical("NOT").args(1, 1).scalar(fn_not).help("en", "Reverses a logical value"));
    r.add(logical("TRUE").args(0, 0).scalar(fn_true).help("en", "The logical value TRUE"));
    r.add(logical("FALSE").args(0, 0).scalar(fn_false).help("en", "The logical value FALSE"));
}

/// IF(condition, value_if_true, [value_if_false])
///
/// An array condition selects element by element, evaluating both branches once.
pub fn fn_if(args: &[FormulaExpr], ctx: &EvaluationContext) -> CalcResult {
    let condition = ctx.evaluate_value(&args[0]);
    let branch = |index: usize| match args.get(index) {
        Some(expr) => ctx.evaluate_value(expr),
        None => FormulaValue::Boolean(false),
    };

    let FormulaValue::Array(conditions) = &condition else {
        let selected = if condition.to_bool()? { 1 } else { 2 };
        return Ok(branch(selected));
    };

    let then = branch(1);
    let otherwise = branch(2);
    let values = [&condition, &then, &otherwise];
    let (rows, cols) = values.iter().fold((conditions.rows(), conditions.cols()), |(r, c), v| {
        let (vr, vc) = v.dimensions();
        (r.max(vr), c.max(vc))
    });
    let result = ArrayValue::try_from_fn(rows, cols, |r, c| {
        let pick = |v: &FormulaValue| {
            broadcast_element(v, r, c)
                .cloned()
                .unwrap_or(FormulaValue::Error(CellError::Value))
        };
        match pick(&condition).to_bool() {
            Ok(true) => pick(&then),
            Ok(false) => pick(&otherwise),
            Err(e) => FormulaValue::Error(e),
        }
    })?;
    Ok(FormulaValue::Array(result))
}

/// IFS(condition1, value1, [condition2, value2], ...)
pub fn fn_ifs(args: &[FormulaExpr], ctx: &EvaluationContext) -> CalcResult {
    if args.len() % 2 != 0 {
        return Err(CellError::Na);
    }
    for pair in args.chunks(2) {
        if ctx.evaluate_value(&pair[0]).to_bool()? {
            return Ok(ctx.evaluate_value(&pair[1]));
        }
    }
    Err(CellError::Na)
}

/// Replace errors accepted by `catches` with the fallback, element-wise over arrays
fn replace_errors(
    args: &[FormulaExpr],
    ctx: &EvaluationContext,
    catches: impl Fn(CellError) -> bool,
) -> CalcResult {
    let value = ctx.evaluate_value(&args[0]);
    let caught = |v: &FormulaValue| v.get_error().map_or(false, &catches);
    match &value {
        FormulaValue::Array(arr) if arr.iter().any(caught) => {
            let fallback = ctx.evaluate_value(&args[1]);
            let fallback = fallback.scalar();
            Ok(FormulaValue::Array(arr.map(|v| {
                if caught(v) {
                    fallback.clone()
                } else {
                    v.clone()
                }
            })))
        }
        v if caught(v) => Ok(ctx.evaluate_value(&args[1])),
        _ => Ok(value),
    }
}

/// IFERROR(value, value_if_error)
pub fn fn_iferror(args: &[FormulaExpr], ctx: &EvaluationContext) -> CalcResult {
    replace_errors(args, ctx, |_| true)
}

/// IFNA(value, value_if_na)
pub fn fn_ifna(args: &[FormulaExpr], ctx: &EvaluationContext) -> CalcResult {
    replace_errors(args, ctx, |e| e == CellError::Na)
}

/// SWITCH(expression, value1, result1, [value2, result2], ..., [default])
pub fn fn_switch(args: &[FormulaExpr], ctx: &EvaluationContext) -> CalcResult {
    let subject = ctx.evaluate_value(&args[0]);
    if let Some(e) = subject.get_error() {
        return Err(e);
    }
    let cases = &args[1..];
    for pair in cases.chunks_exact(2) {
        let candidate = ctx.evaluate_value(&pair[0]);
        if compare_scalars(&subject, &candidate) == Ok(Ordering::Equal)
            && subject.scalar().type_name() == candidate.scalar().type_name()
        {
            return Ok(ctx.evaluate_value(&pair[1]));
        }
    }
    match cases.chunks_exact(2).remainder() {
        [default] => Ok(ctx.evaluate_value(default)),
        _ => Err(CellError::Na),
    }
}

/// Logical values for AND/OR/XOR
///
/// Text and blanks in references are skipped; text typed directly must read as TRUE or
/// FALSE. No logical values at all is `#VALUE!`.
fn collect_bools(args: &[Operand], ctx: &EvaluationContext) -> Result<Vec<bool>, CellError> {
    let mut out = Vec::new();
    for Flat { value, direct } in flatten(args, ctx) {
        match value {
            FormulaValue::Boolean(b) => out.push(b),
            FormulaValue::Number(n) => out.push(n != 0.0),
            FormulaValue::Error(e) => return Err(e),
            FormulaValue::String(s) if direct => out.push(FormulaValue::String(s).to_bool()?),
            _ => {}
        }
    }
    if out.is_empty() {
        return Err(CellError::Value);
    }
    Ok(out)
}

/// AND(logical1, [logical2], ...)
pub fn fn_and(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let values = collect_bools(args, ctx)?;
    Ok(FormulaValue::Boolean(values.iter().all(|b| *b)))
}

/// OR(logical1, [logical2], ...)
pub fn fn_or(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let values = collect_bools(args, ctx)?;
    Ok(FormulaValue::Boolean(values.iter().any(|b| *b)))
}

/// XOR(logical1, [logical2], ...)
pub fn fn_xor(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let values = collect_bools(args, ctx)?;
    Ok(FormulaValue::Boolean(values.iter().filter(|b| **b).count() % 2 == 1))
}

/// NOT(logical)
pub fn fn_not(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Boolean(!super::boolean(args, 0)?))
}

pub fn fn_true(_args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Boolean(true))
}

pub fn fn_false(_args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Boolean(false))
}
