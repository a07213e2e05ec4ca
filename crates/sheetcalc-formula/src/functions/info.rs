//! Information functions

use sheetcalc_core::CellError;

use super::{number, scalar, CalcResult, FunctionCategory, FunctionDescriptor, FunctionRegistry};
use crate::evaluator::{EvaluationContext, Operand};
use crate::value::FormulaValue;

pub(crate) fn register(r: &mut FunctionRegistry) {
    let info = |name: &str| FunctionDescriptor::builder(name, FunctionCategory::Information);

    r.add(info("ISBLANK").args(1, 1).scalar(fn_isblank).help("en", "Whether a value is empty"));
    r.add(info("ISNUMBER").args(1, 1).scalar(fn_isnumber).help("en", "Whether a value is a number"));
    r.add(info("ISTEXT").args(1, 1).scalar(fn_istext).help("en", "Whether a value is text"));
    r.add(info("ISNONTEXT").args(1, 1).scalar(fn_isnontext).help("en", "Whether a value is anything but text"));
    r.add(info("ISLOGICAL").args(1, 1).scalar(fn_islogical).help("en", "Whether a value is TRUE or FALSE"));
    r.add(info("ISERROR").args(1, 1).scalar(fn_iserror).help("en", "Whether a value is any error"));
    r.add(info("ISERR").args(1, 1).scalar(fn_iserr).help("en", "Whether a value is an error other than #N/A"));
    r.add(info("ISNA").args(1, 1).scalar(fn_isna).help("en", "Whether a value is #N/A"));
    r.add(info("ISEVEN").args(1, 1).scalar(fn_iseven).help("en", "Whether a number is even"));
    r.add(info("ISODD").args(1, 1).scalar(fn_isodd).help("en", "Whether a number is odd"));
    r.add(info("ISREF").args(1, 1).native(fn_isref).help("en", "Whether the argument is a reference"));
    r.add(info("NA").args(0, 0).scalar(fn_na).help("en", "The #N/A error value"));
    r.add(info("ERROR.TYPE").args(1, 1).scalar(fn_error_type).help("en", "Number identifying an error value"));
    r.add(info("N").args(1, 1).scalar(fn_n).help("en", "A value converted to a number"));
    r.add(info("TYPE").args(1, 1).native(fn_type).help("en", "Type code: 1 number, 2 text, 4 logical, 16 error, 64 array"));
}

fn is(args: &[Operand], test: impl Fn(&FormulaValue) -> bool) -> CalcResult {
    Ok(FormulaValue::Boolean(test(scalar(args, 0))))
}

pub fn fn_isblank(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    is(args, FormulaValue::is_empty)
}

pub fn fn_isnumber(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    is(args, |v| matches!(v, FormulaValue::Number(_)))
}

pub fn fn_istext(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    is(args, |v| matches!(v, FormulaValue::String(_)))
}

pub fn fn_isnontext(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    is(args, |v| !matches!(v, FormulaValue::String(_)))
}

pub fn fn_islogical(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    is(args, |v| matches!(v, FormulaValue::Boolean(_)))
}

pub fn fn_iserror(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    is(args, FormulaValue::is_error)
}

pub fn fn_iserr(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    is(args, |v| v.get_error().map_or(false, |e| e != CellError::Na))
}

pub fn fn_isna(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    is(args, |v| v.get_error() == Some(CellError::Na))
}

pub fn fn_iseven(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?.trunc();
    Ok(FormulaValue::Boolean(n % 2.0 == 0.0))
}

pub fn fn_isodd(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?.trunc();
    Ok(FormulaValue::Boolean(n % 2.0 != 0.0))
}

/// ISREF(value) - Sees the unevaluated reference, so `ISREF(A1)` is TRUE even for a blank cell
pub fn fn_isref(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Boolean(matches!(args[0], Operand::Reference(_))))
}

/// NA()
pub fn fn_na(_args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Err(CellError::Na)
}

/// ERROR.TYPE(error_val)
pub fn fn_error_type(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    match scalar(args, 0) {
        FormulaValue::Error(e) => Ok(FormulaValue::Number(f64::from(e.type_code()))),
        _ => Err(CellError::Na),
    }
}

/// N(value)
pub fn fn_n(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    match scalar(args, 0) {
        FormulaValue::Number(n) => Ok(FormulaValue::Number(*n)),
        FormulaValue::Boolean(b) => Ok(FormulaValue::Number(if *b { 1.0 } else { 0.0 })),
        FormulaValue::Error(e) => Err(*e),
        _ => Ok(FormulaValue::Number(0.0)),
    }
}

/// TYPE(value)
pub fn fn_type(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let code = match &args[0] {
        Operand::Lambda(_) => 128.0,
        Operand::Reference(r) if !r.is_single_cell() => 64.0,
        other => match ctx.value(other) {
            FormulaValue::Number(_) | FormulaValue::Empty => 1.0,
            FormulaValue::String(_) => 2.0,
            FormulaValue::Boolean(_) => 4.0,
            FormulaValue::Error(_) => 16.0,
            FormulaValue::Array(_) => 64.0,
        },
    };
    Ok(FormulaValue::Number(code))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{eval, eval_on, num, rows, sheet_with};
    use crate::value::FormulaValue;
    use pretty_assertions::assert_eq;
    use sheetcalc_core::CellError;

    fn yes() -> FormulaValue {
        FormulaValue::Boolean(true)
    }

    fn no() -> FormulaValue {
        FormulaValue::Boolean(false)
    }

    #[test]
    fn test_type_predicates() {
        let s = sheet_with(&[("A1", 1.0.into()), ("A2", "".into())]);
        assert_eq!(eval_on(&s, "=ISBLANK(A3)"), yes());
        assert_eq!(eval_on(&s, "=ISBLANK(A2)"), no());
        assert_eq!(eval_on(&s, "=ISNUMBER(A1)"), yes());
        assert_eq!(eval_on(&s, "=ISTEXT(A2)"), yes());
        assert_eq!(eval("=ISLOGICAL(1=1)"), yes());
        assert_eq!(eval("=ISNONTEXT(1)"), yes());
        assert_eq!(
            rows(eval_on(&s, "=ISNUMBER(A1:A2)")),
            vec![vec![yes()], vec![no()]]
        );
    }

    #[test]
    fn test_error_predicates() {
        assert_eq!(eval("=ISERROR(1/0)"), yes());
        assert_eq!(eval("=ISERR(NA())"), no());
        assert_eq!(eval("=ISNA(NA())"), yes());
        assert_eq!(eval("=ERROR.TYPE(1/0)"), num(2.0));
        assert_eq!(eval("=ERROR.TYPE(#CALC!)"), num(14.0));
        assert_eq!(eval("=ERROR.TYPE(1)"), FormulaValue::Error(CellError::Na));
    }

    #[test]
    fn test_references_and_types() {
        assert_eq!(eval("=ISREF(B7)"), yes());
        assert_eq!(eval("=ISREF(7)"), no());
        assert_eq!(eval("=TYPE(\"a\")"), num(2.0));
        assert_eq!(eval("=TYPE({1,2})"), num(64.0));
        assert_eq!(eval("=TYPE(B7)"), num(1.0));
        assert_eq!(eval("=N(TRUE)"), num(1.0));
        assert_eq!(eval("=N(\"7\")"), num(0.0));
        assert_eq!(eval("=ISEVEN(-2.5)"), yes());
        assert_eq!(eval("=ISODD(3)"), yes());
    }
}
