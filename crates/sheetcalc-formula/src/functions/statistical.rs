//! Statistical functions

use sheetcalc_core::CellError;

use super::criteria::Criteria;
use super::math::{criteria_mask, paired_arrays};
use super::{
    collect_numbers, collect_numbers_a, flatten, is_omitted, number_result, CalcResult, Flat,
    FunctionCategory, FunctionDescriptor, FunctionRegistry,
};
use crate::evaluator::{EvaluationContext, Operand};
use crate::value::{parse_number_text, FormulaValue};

pub(crate) fn register(r: &mut FunctionRegistry) {
    let stat = |name: &str| FunctionDescriptor::builder(name, FunctionCategory::Statistical);

    r.add(stat("AVERAGE").repeatable(1).native(fn_average).help("en", "Arithmetic mean of its arguments"));
    r.add(stat("AVERAGEA").repeatable(1).native(fn_averagea).help("en", "Mean counting text as 0 and booleans as 0 or 1"));
    r.add(stat("AVERAGEIF").args(2, 3).native(fn_averageif).help("en", "Mean of the cells that meet a criterion"));
    r.add(stat("AVERAGEIFS").repeatable(3).native(fn_averageifs).help("en", "Mean of the cells that meet every criterion"));
    r.add(stat("COUNT").repeatable(1).native(fn_count).help("en", "Counts the numbers in its arguments"));
    r.add(stat("COUNTA").repeatable(1).native(fn_counta).help("en", "Counts non-empty values"));
    r.add(stat("COUNTBLANK").args(1, 1).native(fn_countblank).help("en", "Counts empty cells in a range"));
    r.add(stat("COUNTIF").args(2, 2).native(fn_countif).help("en", "Counts the cells that meet a criterion"));
    r.add(stat("COUNTIFS").repeatable(2).native(fn_countifs).help("en", "Counts the cells that meet every criterion"));
    r.add(stat("MIN").repeatable(1).native(fn_min).help("en", "Smallest number, 0 when there are none"));
    r.add(stat("MAX").repeatable(1).native(fn_max).help("en", "Largest number, 0 when there are none"));
    r.add(stat("MEDIAN").repeatable(1).native(fn_median).help("en", "Median of the numbers"));
    r.add(stat("LARGE").args(2, 2).native(fn_large).help("en", "k-th largest number"));
    r.add(stat("SMALL").args(2, 2).native(fn_small).help("en", "k-th smallest number"));
    r.add(stat("STDEV").repeatable(1).native(fn_stdev).help("en", "Sample standard deviation"));
    r.add(stat("STDEV.P").repeatable(1).native(fn_stdev_p).help("en", "Population standard deviation"));
    r.add(stat("VAR").repeatable(1).native(fn_var).help("en", "Sample variance"));
    r.add(stat("VAR.P").repeatable(1).native(fn_var_p).help("en", "Population variance"));
}

fn mean(numbers: &[f64]) -> CalcResult {
    if numbers.is_empty() {
        return Err(CellError::Div0);
    }
    number_result(numbers.iter().sum::<f64>() / numbers.len() as f64)
}

/// AVERAGE(number1, [number2], ...)
pub fn fn_average(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    mean(&collect_numbers(args, ctx)?)
}

/// AVERAGEA(value1, [value2], ...)
pub fn fn_averagea(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    mean(&collect_numbers_a(args, ctx)?)
}

/// AVERAGEIF(range, criteria, [average_range])
pub fn fn_averageif(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let criteria = Criteria::new(&ctx.value(&args[1]));
    let companion = if is_omitted(args, 2) { &args[0] } else { &args[2] };
    let (range, values) = paired_arrays(&args[0], companion, ctx)?;

    let mut numbers = Vec::new();
    for (candidate, value) in range.iter().zip(values.iter()) {
        if criteria.matches(candidate) {
            match value {
                FormulaValue::Number(n) => numbers.push(*n),
                FormulaValue::Error(e) => return Err(*e),
                _ => {}
            }
        }
    }
    mean(&numbers)
}

/// AVERAGEIFS(average_range, criteria_range1, criteria1, ...)
pub fn fn_averageifs(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let values = ctx.array(&args[0])?;
    let mask = criteria_mask(&args[1..], values.rows(), values.cols(), ctx)?;
    let mut numbers = Vec::new();
    for (value, matched) in values.iter().zip(mask) {
        if matched {
            match value {
                FormulaValue::Number(n) => numbers.push(*n),
                FormulaValue::Error(e) => return Err(*e),
                _ => {}
            }
        }
    }
    mean(&numbers)
}

/// COUNT(value1, [value2], ...) - Counts numbers; errors are skipped, never returned
pub fn fn_count(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let count = flatten(args, ctx)
        .into_iter()
        .filter(|Flat { value, direct }| match value {
            FormulaValue::Number(_) => true,
            FormulaValue::Boolean(_) => *direct,
            FormulaValue::String(s) => *direct && parse_number_text(s).is_some(),
            _ => false,
        })
        .count();
    Ok(FormulaValue::Number(count as f64))
}

/// COUNTA(value1, [value2], ...) - Counts anything that is not blank, errors included
pub fn fn_counta(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let count = flatten(args, ctx)
        .into_iter()
        .filter(|f| !f.value.is_empty())
        .count();
    Ok(FormulaValue::Number(count as f64))
}

/// COUNTBLANK(range) - Empty cells and empty strings
pub fn fn_countblank(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let is_blank = |v: &FormulaValue| match v {
        FormulaValue::Empty => true,
        FormulaValue::String(s) => s.is_empty(),
        _ => false,
    };
    let count = match &args[0] {
        // Cells past the used extent are never read; they are all blank
        Operand::Reference(r) => {
            let values = r.values(ctx.source());
            let filled = values.iter().filter(|v| !is_blank(v)).count() as u64;
            r.cell_count() - filled
        }
        other => ctx.array(other)?.iter().filter(|v| is_blank(v)).count() as u64,
    };
    Ok(FormulaValue::Number(count as f64))
}

/// COUNTIF(range, criteria)
pub fn fn_countif(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let range = ctx.array(&args[0])?;
    let criteria = Criteria::new(&ctx.value(&args[1]));
    let count = range.iter().filter(|v| criteria.matches(v)).count();
    Ok(FormulaValue::Number(count as f64))
}

/// COUNTIFS(criteria_range1, criteria1, ...)
pub fn fn_countifs(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let first = ctx.array(&args[0])?;
    let mask = criteria_mask(args, first.rows(), first.cols(), ctx)?;
    let count = mask.into_iter().filter(|m| *m).count();
    Ok(FormulaValue::Number(count as f64))
}

/// MIN(number1, [number2], ...)
pub fn fn_min(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let numbers = collect_numbers(args, ctx)?;
    let min = numbers.into_iter().reduce(f64::min).unwrap_or(0.0);
    Ok(FormulaValue::Number(min))
}

/// MAX(number1, [number2], ...)
pub fn fn_max(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let numbers = collect_numbers(args, ctx)?;
    let max = numbers.into_iter().reduce(f64::max).unwrap_or(0.0);
    Ok(FormulaValue::Number(max))
}

fn sorted(mut numbers: Vec<f64>) -> Vec<f64> {
    numbers.sort_by(f64::total_cmp);
    numbers
}

/// MEDIAN(number1, [number2], ...)
pub fn fn_median(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let numbers = sorted(collect_numbers(args, ctx)?);
    let n = numbers.len();
    if n == 0 {
        return Err(CellError::Num);
    }
    let median = if n % 2 == 1 {
        numbers[n / 2]
    } else {
        (numbers[n / 2 - 1] + numbers[n / 2]) / 2.0
    };
    number_result(median)
}

/// k-th value of the sorted numbers in the first argument, 1-based
fn kth(args: &[Operand], ctx: &EvaluationContext, largest: bool) -> CalcResult {
    let numbers = sorted(collect_numbers(&args[..1], ctx)?);
    let k = ctx.value(&args[1]).scalar().to_number()?.ceil();
    if k < 1.0 || k > numbers.len() as f64 {
        return Err(CellError::Num);
    }
    let k = k as usize;
    let index = if largest { numbers.len() - k } else { k - 1 };
    Ok(FormulaValue::Number(numbers[index]))
}

/// LARGE(array, k)
pub fn fn_large(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    kth(args, ctx, true)
}

/// SMALL(array, k)
pub fn fn_small(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    kth(args, ctx, false)
}

/// Sum of squared deviations divided by `n - ddof`
fn variance(numbers: &[f64], ddof: usize) -> Result<f64, CellError> {
    let n = numbers.len();
    if n <= ddof {
        return Err(CellError::Div0);
    }
    let mean = numbers.iter().sum::<f64>() / n as f64;
    let squares: f64 = numbers.iter().map(|x| (x - mean).powi(2)).sum();
    Ok(squares / (n - ddof) as f64)
}

/// VAR(number1, [number2], ...)
pub fn fn_var(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    number_result(variance(&collect_numbers(args, ctx)?, 1)?)
}

/// VAR.P(number1, [number2], ...)
pub fn fn_var_p(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    number_result(variance(&collect_numbers(args, ctx)?, 0)?)
}

/// STDEV(number1, [number2], ...)
pub fn fn_stdev(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    number_result(variance(&collect_numbers(args, ctx)?, 1)?.sqrt())
}

/// STDEV.P(number1, [number2], ...)
pub fn fn_stdev_p(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    number_result(variance(&collect_numbers(args, ctx)?, 0)?.sqrt())
}
