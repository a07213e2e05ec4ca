//! Math functions

use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use sheetcalc_core::CellError;

use super::criteria::Criteria;
use super::{
    collect_numbers, is_omitted, number, number_or, number_result, CalcResult, FunctionCategory,
    FunctionDescriptor, FunctionRegistry,
};
use crate::evaluator::{EvaluationContext, Operand};
use crate::value::{self, ArrayValue, FormulaValue};

pub(crate) fn register(r: &mut FunctionRegistry) {
    let math = |name: &str| FunctionDescriptor::builder(name, FunctionCategory::Math);

    r.add(math("SUM").repeatable(1).native(fn_sum).help("en", "Adds all numbers in its arguments"));
    r.add(math("PRODUCT").repeatable(1).native(fn_product).help("en", "Multiplies all numbers in its arguments"));
    r.add(math("SUMPRODUCT").repeatable(1).native(fn_sumproduct).help("en", "Sum of the element-wise products of equally sized arrays"));
    r.add(math("SUMIF").args(2, 3).native(fn_sumif).help("en", "Adds the cells that meet a criterion"));
    r.add(math("SUMIFS").repeatable(3).native(fn_sumifs).help("en", "Adds the cells that meet every criterion"));

    r.add(math("ABS").args(1, 1).scalar(fn_abs).help("en", "Absolute value of a number"));
    r.add(math("SIGN").args(1, 1).scalar(fn_sign).help("en", "Sign of a number: 1, 0 or -1"));
    r.add(math("INT").args(1, 1).scalar(fn_int).help("en", "Rounds a number down to an integer"));
    r.add(math("TRUNC").args(1, 2).scalar(fn_trunc).help("en", "Truncates a number to a number of digits"));
    r.add(math("ROUND").args(1, 2).scalar(fn_round).help("en", "Rounds a number to a number of digits, halves away from zero"));
    r.add(math("ROUNDUP").args(1, 2).scalar(fn_roundup).help("en", "Rounds a number away from zero"));
    r.add(math("ROUNDDOWN").args(1, 2).scalar(fn_rounddown).help("en", "Rounds a number toward zero"));
    r.add(math("MOD").args(2, 2).scalar(fn_mod).help("en", "Remainder after division, with the sign of the divisor"));
    r.add(math("POWER").args(2, 2).scalar(fn_power).help("en", "A number raised to a power"));
    r.add(math("SQRT").args(1, 1).scalar(fn_sqrt).help("en", "Positive square root"));
    r.add(math("EXP").args(1, 1).scalar(fn_exp).help("en", "e raised to a power"));
    r.add(math("LN").args(1, 1).scalar(fn_ln).help("en", "Natural logarithm"));
    r.add(math("LOG").args(1, 2).scalar(fn_log).help("en", "Logarithm to a base, 10 by default"));
    r.add(math("LOG10").args(1, 1).scalar(fn_log10).help("en", "Base-10 logarithm"));
    r.add(math("PI").args(0, 0).scalar(fn_pi).help("en", "The constant pi"));
    r.add(math("RAND").args(0, 0).volatile().scalar(fn_rand).help("en", "Random number in [0, 1)"));
    r.add(math("RANDBETWEEN").args(2, 2).volatile().scalar(fn_randbetween).help("en", "Random integer between two bounds"));
    r.add(math("CEILING").args(1, 2).scalar(fn_ceiling).help("en", "Rounds up to a multiple of significance"));
    r.add(math("FLOOR").args(1, 2).scalar(fn_floor).help("en", "Rounds down to a multiple of significance"));
    r.add(math("SIN").args(1, 1).scalar(fn_sin).help("en", "Sine of an angle in radians"));
    r.add(math("COS").args(1, 1).scalar(fn_cos).help("en", "Cosine of an angle in radians"));
    r.add(math("TAN").args(1, 1).scalar(fn_tan).help("en", "Tangent of an angle in radians"));
    r.add(math("ASIN").args(1, 1).scalar(fn_asin).help("en", "Arcsine, in radians"));
    r.add(math("ACOS").args(1, 1).scalar(fn_acos).help("en", "Arccosine, in radians"));
    r.add(math("ATAN").args(1, 1).scalar(fn_atan).help("en", "Arctangent, in radians"));
    r.add(math("ATAN2").args(2, 2).scalar(fn_atan2).help("en", "Arctangent of x and y coordinates"));
    r.add(math("DEGREES").args(1, 1).scalar(fn_degrees).help("en", "Converts radians to degrees"));
    r.add(math("RADIANS").args(1, 1).scalar(fn_radians).help("en", "Converts degrees to radians"));
    r.add(math("EVEN").args(1, 1).scalar(fn_even).help("en", "Rounds away from zero to an even integer"));
    r.add(math("ODD").args(1, 1).scalar(fn_odd).help("en", "Rounds away from zero to an odd integer"));
    r.add(math("FACT").args(1, 1).scalar(fn_fact).help("en", "Factorial of a number"));
}

// === Aggregates ===

/// SUM(number1, [number2], ...)
pub fn fn_sum(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let numbers = collect_numbers(args, ctx)?;
    number_result(numbers.iter().sum())
}

/// PRODUCT(number1, [number2], ...)
pub fn fn_product(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let numbers = collect_numbers(args, ctx)?;
    if numbers.is_empty() {
        return Ok(FormulaValue::Number(0.0));
    }
    number_result(numbers.iter().product())
}

/// SUMPRODUCT(array1, [array2], ...)
///
/// Non-numeric elements count as 0; arrays of different shapes are `#VALUE!`.
pub fn fn_sumproduct(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let arrays = args
        .iter()
        .map(|a| ctx.array(a))
        .collect::<Result<Vec<_>, _>>()?;
    let (rows, cols) = (arrays[0].rows(), arrays[0].cols());
    if arrays.iter().any(|a| a.rows() != rows || a.cols() != cols) {
        return Err(CellError::Value);
    }

    let mut total = 0.0;
    for i in 0..rows * cols {
        let mut product = 1.0;
        for arr in &arrays {
            match arr.get(i / cols, i % cols) {
                Some(FormulaValue::Number(n)) => product *= n,
                Some(FormulaValue::Error(e)) => return Err(*e),
                _ => product = 0.0,
            }
        }
        total += product;
    }
    number_result(total)
}

/// Materialize a criteria range and a companion range of the same shape
///
/// A companion reference is resized from its top-left cell to the criteria range's shape.
pub(crate) fn paired_arrays(
    range: &Operand,
    companion: &Operand,
    ctx: &EvaluationContext,
) -> Result<(ArrayValue, ArrayValue), CellError> {
    let criteria = ctx.array(range)?;
    let values = match companion {
        Operand::Reference(r) => {
            let resized = r.offset(
                ctx.source(),
                0,
                0,
                Some(criteria.rows() as i64),
                Some(criteria.cols() as i64),
            )?;
            resized.to_array_value(ctx.source())?
        }
        other => ctx.array(other)?,
    };
    Ok((criteria, values))
}

/// SUMIF(range, criteria, [sum_range])
pub fn fn_sumif(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let criteria = Criteria::new(&ctx.value(&args[1]));
    let companion = if is_omitted(args, 2) { &args[0] } else { &args[2] };
    let (range, values) = paired_arrays(&args[0], companion, ctx)?;

    let mut total = 0.0;
    for (r, c) in cells(&range) {
        let matched = range.get(r, c).map_or(false, |v| criteria.matches(v));
        if matched {
            match values.get(r, c) {
                Some(FormulaValue::Number(n)) => total += n,
                Some(FormulaValue::Error(e)) => return Err(*e),
                _ => {}
            }
        }
    }
    number_result(total)
}

/// SUMIFS(sum_range, criteria_range1, criteria1, ...)
pub fn fn_sumifs(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let values = ctx.array(&args[0])?;
    let mask = criteria_mask(&args[1..], values.rows(), values.cols(), ctx)?;
    let mut total = 0.0;
    for (i, value) in values.iter().enumerate() {
        if mask[i] {
            match value {
                FormulaValue::Number(n) => total += n,
                FormulaValue::Error(e) => return Err(*e),
                _ => {}
            }
        }
    }
    number_result(total)
}

/// Evaluate (range, criteria) pairs into a row-major match mask of the given shape
pub(crate) fn criteria_mask(
    pairs: &[Operand],
    rows: usize,
    cols: usize,
    ctx: &EvaluationContext,
) -> Result<Vec<bool>, CellError> {
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(CellError::Value);
    }
    let mut mask = vec![true; rows * cols];
    for pair in pairs.chunks(2) {
        let range = ctx.array(&pair[0])?;
        if range.rows() != rows || range.cols() != cols {
            return Err(CellError::Value);
        }
        let criteria = Criteria::new(&ctx.value(&pair[1]));
        for (slot, value) in mask.iter_mut().zip(range.iter()) {
            *slot = *slot && criteria.matches(value);
        }
    }
    Ok(mask)
}

fn cells(arr: &ArrayValue) -> impl Iterator<Item = (usize, usize)> {
    let cols = arr.cols();
    (0..arr.len()).map(move |i| (i / cols, i % cols))
}

// === Rounding ===

fn digits_arg(args: &[Operand], index: usize) -> Result<i32, CellError> {
    let digits = number_or(args, index, 0.0)?;
    Ok(digits.trunc().clamp(-308.0, 308.0) as i32)
}

/// Round `n` to `digits` decimal places (negative digits round left of the point)
///
/// Works on the shortest decimal representation of `n`, so `ROUND(2.675, 2)` is 2.68.
pub(crate) fn round_to(n: f64, digits: i32, strategy: RoundingStrategy) -> Result<f64, CellError> {
    let Ok(d) = n.to_string().parse::<Decimal>() else {
        // Outside the decimal range every digit position of interest is already integral
        return value::finite(n);
    };
    let rounded = if digits >= 0 {
        d.round_dp_with_strategy(digits.min(28) as u32, strategy)
    } else {
        let k = digits.unsigned_abs().min(28);
        let factor = Decimal::from_i128_with_scale(10i128.pow(k), 0);
        d.checked_div(factor)
            .map(|q| q.round_dp_with_strategy(0, strategy))
            .and_then(|q| q.checked_mul(factor))
            .unwrap_or(Decimal::ZERO)
    };
    rounded.to_string().parse::<f64>().map_err(|_| CellError::Num)
}

/// ROUND(number, [num_digits])
pub fn fn_round(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    number_result(round_to(n, digits_arg(args, 1)?, RoundingStrategy::MidpointAwayFromZero)?)
}

/// ROUNDUP(number, [num_digits])
pub fn fn_roundup(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    number_result(round_to(n, digits_arg(args, 1)?, RoundingStrategy::AwayFromZero)?)
}

/// ROUNDDOWN(number, [num_digits])
pub fn fn_rounddown(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    number_result(round_to(n, digits_arg(args, 1)?, RoundingStrategy::ToZero)?)
}

/// TRUNC(number, [num_digits])
pub fn fn_trunc(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    fn_rounddown(args, ctx)
}

/// INT(number)
pub fn fn_int(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    number_result(number(args, 0)?.floor())
}

/// CEILING(number, [significance])
pub fn fn_ceiling(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    let significance = number_or(args, 1, 1.0)?;
    if significance == 0.0 {
        return Ok(FormulaValue::Number(0.0));
    }
    if n > 0.0 && significance < 0.0 {
        return Err(CellError::Num);
    }
    number_result((n / significance).ceil() * significance)
}

/// FLOOR(number, [significance])
pub fn fn_floor(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    let significance = number_or(args, 1, 1.0)?;
    if significance == 0.0 {
        return Err(CellError::Div0);
    }
    if n > 0.0 && significance < 0.0 {
        return Err(CellError::Num);
    }
    number_result((n / significance).floor() * significance)
}

/// EVEN(number)
pub fn fn_even(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    let magnitude = (n.abs() / 2.0).ceil() * 2.0;
    number_result(magnitude.copysign(n))
}

/// ODD(number)
pub fn fn_odd(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    let mut magnitude = n.abs().ceil();
    if magnitude % 2.0 == 0.0 {
        magnitude += 1.0;
    }
    number_result(if n < 0.0 { -magnitude } else { magnitude })
}

// === Arithmetic ===

/// ABS(number)
pub fn fn_abs(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Number(number(args, 0)?.abs()))
}

/// SIGN(number)
pub fn fn_sign(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    let sign = if n > 0.0 {
        1.0
    } else if n < 0.0 {
        -1.0
    } else {
        0.0
    };
    Ok(FormulaValue::Number(sign))
}

/// MOD(number, divisor)
pub fn fn_mod(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    let d = number(args, 1)?;
    if d == 0.0 {
        return Err(CellError::Div0);
    }
    number_result(n - d * (n / d).floor())
}

/// POWER(number, power)
pub fn fn_power(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let base = number(args, 0)?;
    let exponent = number(args, 1)?;
    value::power(base, exponent).map(FormulaValue::Number)
}

/// SQRT(number)
pub fn fn_sqrt(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    if n < 0.0 {
        return Err(CellError::Num);
    }
    Ok(FormulaValue::Number(n.sqrt()))
}

/// EXP(number)
pub fn fn_exp(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    number_result(number(args, 0)?.exp())
}

/// LN(number)
pub fn fn_ln(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    if n <= 0.0 {
        return Err(CellError::Num);
    }
    Ok(FormulaValue::Number(n.ln()))
}

/// LOG(number, [base])
pub fn fn_log(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    let base = number_or(args, 1, 10.0)?;
    if n <= 0.0 || base <= 0.0 {
        return Err(CellError::Num);
    }
    if base == 1.0 {
        return Err(CellError::Div0);
    }
    number_result(n.ln() / base.ln())
}

/// LOG10(number)
pub fn fn_log10(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    if n <= 0.0 {
        return Err(CellError::Num);
    }
    Ok(FormulaValue::Number(n.log10()))
}

/// FACT(number)
pub fn fn_fact(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?.trunc();
    if n < 0.0 {
        return Err(CellError::Num);
    }
    if n > 170.0 {
        return Err(CellError::Num);
    }
    let product = (1..=n as u32).fold(1.0_f64, |acc, k| acc * f64::from(k));
    Ok(FormulaValue::Number(product))
}

/// PI()
pub fn fn_pi(_args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Number(std::f64::consts::PI))
}

// === Random ===

/// RAND()
pub fn fn_rand(_args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Number(rand::thread_rng().gen::<f64>()))
}

/// RANDBETWEEN(bottom, top)
pub fn fn_randbetween(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let bottom = number(args, 0)?.ceil();
    let top = number(args, 1)?.floor();
    if bottom > top {
        return Err(CellError::Num);
    }
    let value = rand::thread_rng().gen_range(bottom as i64..=top as i64);
    Ok(FormulaValue::Number(value as f64))
}

// === Trigonometry ===

/// SIN(number)
pub fn fn_sin(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Number(number(args, 0)?.sin()))
}

/// COS(number)
pub fn fn_cos(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Number(number(args, 0)?.cos()))
}

/// TAN(number)
pub fn fn_tan(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    number_result(number(args, 0)?.tan())
}

/// ASIN(number)
pub fn fn_asin(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    if !(-1.0..=1.0).contains(&n) {
        return Err(CellError::Num);
    }
    Ok(FormulaValue::Number(n.asin()))
}

/// ACOS(number)
pub fn fn_acos(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let n = number(args, 0)?;
    if !(-1.0..=1.0).contains(&n) {
        return Err(CellError::Num);
    }
    Ok(FormulaValue::Number(n.acos()))
}

/// ATAN(number)
pub fn fn_atan(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Number(number(args, 0)?.atan()))
}

/// ATAN2(x_num, y_num)
pub fn fn_atan2(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    let x = number(args, 0)?;
    let y = number(args, 1)?;
    if x == 0.0 && y == 0.0 {
        return Err(CellError::Div0);
    }
    Ok(FormulaValue::Number(y.atan2(x)))
}

/// DEGREES(angle)
pub fn fn_degrees(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Number(number(args, 0)?.to_degrees()))
}

/// RADIANS(angle)
pub fn fn_radians(args: &[Operand], _ctx: &EvaluationContext) -> CalcResult {
    Ok(FormulaValue::Number(number(args, 0)?.to_radians()))
}
