//! Lookup and reference functions

use std::cmp::Ordering;

use sheetcalc_core::{CellError, MAX_COLS, MAX_ROWS};

use super::criteria::wildcard_matcher;
use super::{is_omitted, CalcResult, FunctionCategory, FunctionDescriptor, FunctionRegistry};
use crate::ast::FormulaExpr;
use crate::evaluator::{EvaluationContext, Operand};
use crate::reference::Reference;
use crate::value::{ArrayValue, FormulaValue};

pub(crate) fn register(r: &mut FunctionRegistry) {
    let lookup = |name: &str| FunctionDescriptor::builder(name, FunctionCategory::Lookup);

    r.add(lookup("INDEX").args(2, 4).native(fn_index).help("en", "Value at a row and column of a range or array"));
    r.add(lookup("MATCH").args(2, 3).native(fn_match).help("en", "Position of a value in a row or column"));
    r.add(lookup("VLOOKUP").args(3, 4).native(fn_vlookup).help("en", "Looks down the first column and returns a value from the same row"));
    r.add(lookup("HLOOKUP").args(3, 4).native(fn_hlookup).help("en", "Looks along the first row and returns a value from the same column"));
    r.add(lookup("XLOOKUP").args(3, 6).native(fn_xlookup).help("en", "Looks up a value and returns the matching item of another array"));
    r.add(lookup("CHOOSE").repeatable(2).lazy(fn_choose).help("en", "Picks one of its arguments by index"));
    r.add(lookup("ROW").args(0, 1).native(fn_row).help("en", "Row number of a reference"));
    r.add(lookup("ROWS").args(1, 1).native(fn_rows).help("en", "Number of rows in a reference or array"));
    r.add(lookup("COLUMN").args(0, 1).native(fn_column).help("en", "Column number of a reference"));
    r.add(lookup("COLUMNS").args(1, 1).native(fn_columns).help("en", "Number of columns in a reference or array"));
    r.add(lookup("SEQUENCE").args(1, 4).native(fn_sequence).help("en", "Array of sequential numbers"));
    r.add(lookup("TRANSPOSE").args(1, 1).native(fn_transpose).help("en", "Swaps the rows and columns of an array"));
    r.add(lookup("OFFSET").args(3, 5).volatile().native(fn_offset).help("en", "Reference shifted and resized from a starting reference"));
}

// === Matching ===

/// How a lookup value is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchMode {
    /// Equal values; text case-insensitive
    Exact,
    /// Like `Exact`, with `*` and `?` wildcards in text lookup values
    Wildcard,
    /// Exact, or else the largest value below the lookup value
    NextSmaller,
    /// Exact, or else the smallest value above the lookup value
    NextLarger,
}

/// Order of two values of the same type; `None` across types
fn same_type_cmp(a: &FormulaValue, b: &FormulaValue) -> Option<Ordering> {
    match (a, b) {
        (FormulaValue::Number(x), FormulaValue::Number(y)) => x.partial_cmp(y),
        (FormulaValue::String(x), FormulaValue::String(y)) => {
            Some(x.to_lowercase().cmp(&y.to_lowercase()))
        }
        (FormulaValue::Boolean(x), FormulaValue::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Position of `lookup` in `values`, scanning backwards when `reverse` is set
fn find_position(
    values: &[FormulaValue],
    lookup: &FormulaValue,
    mode: MatchMode,
    reverse: bool,
) -> Option<usize> {
    let order: Box<dyn Iterator<Item = usize>> = if reverse {
        Box::new((0..values.len()).rev())
    } else {
        Box::new(0..values.len())
    };

    let pattern = match (mode, lookup) {
        (MatchMode::Wildcard, FormulaValue::String(s)) => wildcard_matcher(s),
        _ => None,
    };
    if let Some(re) = pattern {
        return order
            .into_iter()
            .find(|&i| matches!(&values[i], FormulaValue::String(s) if re.is_match(&s.to_lowercase())));
    }

    let mut best: Option<usize> = None;
    for i in order {
        let Some(ordering) = same_type_cmp(&values[i], lookup) else {
            continue;
        };
        if ordering == Ordering::Equal {
            return Some(i);
        }
        let wanted = match mode {
            MatchMode::NextSmaller => Ordering::Less,
            MatchMode::NextLarger => Ordering::Greater,
            MatchMode::Exact | MatchMode::Wildcard => continue,
        };
        if ordering != wanted {
            continue;
        }
        let better = match best {
            None => true,
            // Closer to the lookup value wins; the first one found keeps ties
            Some(b) => same_type_cmp(&values[i], &values[b]) == Some(wanted.reverse()),
        };
        if better {
            best = Some(i);
        }
    }
    best
}

/// Approximate match over sorted data: the last value not past `lookup` before the first
/// value that is
fn sorted_position(values: &[FormulaValue], lookup: &FormulaValue, descending: bool) -> Option<usize> {
    let mut candidate = None;
    for (i, value) in values.iter().enumerate() {
        let Some(ordering) = same_type_cmp(value, lookup) else {
            continue;
        };
        let passed = if descending {
            ordering == Ordering::Less
        } else {
            ordering == Ordering::Greater
        };
        if passed {
            break;
        }
        candidate = Some(i);
    }
    candidate
}

/// Elements of a one-row or one-column array
fn vector(arr: &ArrayValue) -> Option<&[FormulaValue]> {
    (arr.rows() == 1 || arr.cols() == 1).then(|| arr.values())
}

/// A 1×1 array collapses to its element
fn collapse(arr: ArrayValue) -> FormulaValue {
    if arr.len() == 1 {
        arr.top_left().clone()
    } else {
        FormulaValue::Array(arr)
    }
}

/// Numeric argument read through references, or `default` when omitted
fn number_arg(args: &[Operand], ctx: &EvaluationContext, index: usize, default: f64) -> Result<f64, CellError> {
    if is_omitted(args, index) {
        return Ok(default);
    }
    ctx.value(&args[index]).scalar().to_number()
}

fn lookup_value(ctx: &EvaluationContext, operand: &Operand) -> Result<FormulaValue, CellError> {
    let value = ctx.value(operand).scalar().clone();
    match value {
        FormulaValue::Error(e) => Err(e),
        other => Ok(other),
    }
}

// === Functions ===

/// INDEX(array, row_num, [column_num], [area_num])
///
/// A row or column of 0 selects the whole column or row. On a one-row array a lone index
/// counts along the row.
pub fn fn_index(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    match &args[0] {
        Operand::Reference(reference) => {
            let area_num = number_arg(args, ctx, 3, 1.0)?.trunc();
            if area_num < 1.0 || area_num > reference.areas().len() as f64 {
                return Err(CellError::Ref);
            }
            let area = reference.areas()[area_num as usize - 1];
            let area = Reference::new(reference.sheet(), area.kind, area.range);
            let (rows, cols) = (area.rows() as usize, area.cols() as usize);
            let (row, col) = index_position(args, ctx, rows, cols)?;
            let picked = area.offset(
                ctx.source(),
                row.unwrap_or(0) as i64,
                col.unwrap_or(0) as i64,
                Some(if row.is_some() { 1 } else { rows as i64 }),
                Some(if col.is_some() { 1 } else { cols as i64 }),
            )?;
            Ok(picked.to_value(ctx.source()))
        }
        other => {
            let arr = ctx.array(other)?;
            let (row, col) = index_position(args, ctx, arr.rows(), arr.cols())?;
            match (row, col) {
                (Some(r), Some(c)) => arr.get(r, c).cloned().ok_or(CellError::Ref),
                (Some(r), None) => arr.row(r).map(collapse).ok_or(CellError::Ref),
                (None, Some(c)) => arr.column(c).map(collapse).ok_or(CellError::Ref),
                (None, None) => Ok(collapse(arr)),
            }
        }
    }
}

/// Zero-based (row, col) selected by INDEX arguments; `None` selects the whole dimension
fn index_position(
    args: &[Operand],
    ctx: &EvaluationContext,
    rows: usize,
    cols: usize,
) -> Result<(Option<usize>, Option<usize>), CellError> {
    let mut row = number_arg(args, ctx, 1, 0.0)?.trunc();
    let mut col = number_arg(args, ctx, 2, 0.0)?.trunc();
    if args.len() < 3 && rows == 1 && cols > 1 {
        col = row;
        row = 0.0;
    }
    if row < 0.0 || col < 0.0 {
        return Err(CellError::Value);
    }
    if row > rows as f64 || col > cols as f64 {
        return Err(CellError::Ref);
    }
    let pick = |n: f64| (n >= 1.0).then(|| n as usize - 1);
    Ok((pick(row), pick(col)))
}

/// MATCH(lookup_value, lookup_array, [match_type])
pub fn fn_match(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let lookup = lookup_value(ctx, &args[0])?;
    let arr = ctx.array(&args[1])?;
    let values = vector(&arr).ok_or(CellError::Na)?;
    let match_type = number_arg(args, ctx, 2, 1.0)?;

    let position = if match_type == 0.0 {
        find_position(values, &lookup, MatchMode::Wildcard, false)
    } else {
        sorted_position(values, &lookup, match_type < 0.0)
    };
    position
        .map(|i| FormulaValue::Number((i + 1) as f64))
        .ok_or(CellError::Na)
}

/// Shared body of VLOOKUP and HLOOKUP, on a table oriented so that lookups run down rows
fn table_lookup(args: &[Operand], ctx: &EvaluationContext, table: ArrayValue) -> CalcResult {
    let lookup = lookup_value(ctx, &args[0])?;
    let index = ctx.value(&args[2]).scalar().to_number()?.trunc();
    let approximate = if is_omitted(args, 3) {
        true
    } else {
        ctx.value(&args[3]).scalar().to_bool()?
    };
    if index < 1.0 {
        return Err(CellError::Value);
    }
    if index > table.cols() as f64 {
        return Err(CellError::Ref);
    }
    let keys = table.column(0).ok_or(CellError::Na)?;
    let position = if approximate {
        sorted_position(keys.values(), &lookup, false)
    } else {
        find_position(keys.values(), &lookup, MatchMode::Wildcard, false)
    };
    let row = position.ok_or(CellError::Na)?;
    table
        .get(row, index as usize - 1)
        .cloned()
        .ok_or(CellError::Ref)
}

/// VLOOKUP(lookup_value, table_array, col_index_num, [range_lookup])
pub fn fn_vlookup(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let table = ctx.array(&args[1])?;
    table_lookup(args, ctx, table)
}

/// HLOOKUP(lookup_value, table_array, row_index_num, [range_lookup])
pub fn fn_hlookup(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let table = ctx.array(&args[1])?.transpose();
    table_lookup(args, ctx, table)
}

/// XLOOKUP(lookup_value, lookup_array, return_array, [if_not_found], [match_mode], [search_mode])
///
/// Match modes: 0 exact, -1 exact or next smaller, 1 exact or next larger, 2 wildcard.
/// Search modes: 1 first to last, -1 last to first; the binary modes 2 and -2 search
/// the same way.
pub fn fn_xlookup(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let lookup = lookup_value(ctx, &args[0])?;
    let keys = ctx.array(&args[1])?;
    let returns = ctx.array(&args[2])?;
    let values = vector(&keys).ok_or(CellError::Value)?;

    let mode = match number_arg(args, ctx, 4, 0.0)?.trunc() as i64 {
        0 => MatchMode::Exact,
        -1 => MatchMode::NextSmaller,
        1 => MatchMode::NextLarger,
        2 => MatchMode::Wildcard,
        _ => return Err(CellError::Value),
    };
    let reverse = match number_arg(args, ctx, 5, 1.0)?.trunc() as i64 {
        1 | 2 => false,
        -1 | -2 => true,
        _ => return Err(CellError::Value),
    };

    let Some(i) = find_position(values, &lookup, mode, reverse) else {
        return if is_omitted(args, 3) {
            Err(CellError::Na)
        } else {
            Ok(ctx.value(&args[3]))
        };
    };

    let vertical = keys.cols() == 1 && keys.rows() == values.len();
    let picked = if vertical && returns.rows() == values.len() {
        returns.row(i)
    } else if returns.cols() == values.len() {
        returns.column(i)
    } else {
        None
    };
    picked.map(collapse).ok_or(CellError::Value)
}

/// CHOOSE(index_num, value1, [value2], ...) - Evaluates only the chosen value
pub fn fn_choose(args: &[FormulaExpr], ctx: &EvaluationContext) -> CalcResult {
    let index = ctx.evaluate_value(&args[0]).scalar().to_number()?.trunc();
    if index < 1.0 || index >= args.len() as f64 {
        return Err(CellError::Value);
    }
    Ok(ctx.evaluate_value(&args[index as usize]))
}

/// Row or column numbers covered by a reference, as a vertical or horizontal array
fn positions(start: u32, count: u32, vertical: bool) -> FormulaValue {
    let numbers: Vec<FormulaValue> = (start..start + count)
        .map(|n| FormulaValue::Number(f64::from(n) + 1.0))
        .collect();
    if numbers.len() == 1 {
        return numbers.into_iter().next().unwrap_or_default();
    }
    let (rows, cols) = if vertical {
        (numbers.len(), 1)
    } else {
        (1, numbers.len())
    };
    ArrayValue::new(rows, cols, numbers).map_or(FormulaValue::Error(CellError::Calc), FormulaValue::Array)
}

/// ROW([reference])
pub fn fn_row(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    if is_omitted(args, 0) {
        return Ok(FormulaValue::Number(f64::from(ctx.location().row) + 1.0));
    }
    match &args[0] {
        Operand::Reference(r) => Ok(positions(r.area().range.start.row, r.rows(), true)),
        Operand::Value(FormulaValue::Error(e)) => Err(*e),
        _ => Err(CellError::Value),
    }
}

/// COLUMN([reference])
pub fn fn_column(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    if is_omitted(args, 0) {
        return Ok(FormulaValue::Number(f64::from(ctx.location().col) + 1.0));
    }
    match &args[0] {
        Operand::Reference(r) => Ok(positions(
            u32::from(r.area().range.start.col),
            u32::from(r.cols()),
            false,
        )),
        Operand::Value(FormulaValue::Error(e)) => Err(*e),
        _ => Err(CellError::Value),
    }
}

/// ROWS(array)
pub fn fn_rows(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let rows = match &args[0] {
        Operand::Reference(r) if r.is_multi_area() => return Err(CellError::Ref),
        Operand::Reference(r) => r.rows() as usize,
        other => ctx.array(other)?.rows(),
    };
    Ok(FormulaValue::Number(rows as f64))
}

/// COLUMNS(array)
pub fn fn_columns(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let cols = match &args[0] {
        Operand::Reference(r) if r.is_multi_area() => return Err(CellError::Ref),
        Operand::Reference(r) => r.cols() as usize,
        other => ctx.array(other)?.cols(),
    };
    Ok(FormulaValue::Number(cols as f64))
}

/// SEQUENCE(rows, [columns], [start], [step])
///
/// Each dimension is limited by the sheet size and the element count by
/// [`MAX_ARRAY_CELLS`](crate::value::MAX_ARRAY_CELLS); larger requests are `#NUM!`.
pub fn fn_sequence(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let rows = number_arg(args, ctx, 0, 1.0)?.trunc();
    let cols = number_arg(args, ctx, 1, 1.0)?.trunc();
    let start = number_arg(args, ctx, 2, 1.0)?;
    let step = number_arg(args, ctx, 3, 1.0)?;
    if rows < 1.0 || cols < 1.0 {
        return Err(CellError::Calc);
    }
    if rows > f64::from(MAX_ROWS) || cols > f64::from(MAX_COLS) {
        return Err(CellError::Value);
    }
    let (rows, cols) = (rows as usize, cols as usize);
    let result = ArrayValue::try_from_fn(rows, cols, |r, c| {
        FormulaValue::Number(start + step * (r * cols + c) as f64)
    })?;
    Ok(collapse(result))
}

/// TRANSPOSE(array)
pub fn fn_transpose(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    Ok(collapse(ctx.array(&args[0])?.transpose()))
}

/// OFFSET(reference, rows, cols, [height], [width])
pub fn fn_offset(args: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let Operand::Reference(base) = &args[0] else {
        return Err(args[0].error().unwrap_or(CellError::Value));
    };
    let int_arg = |i: usize| -> Result<Option<i64>, CellError> {
        if is_omitted(args, i) {
            return Ok(None);
        }
        let n = ctx.value(&args[i]).scalar().to_number()?.trunc();
        if n.abs() > f64::from(MAX_ROWS) {
            return Err(CellError::Ref);
        }
        Ok(Some(n as i64))
    };
    let rows = int_arg(1)?.unwrap_or(0);
    let cols = int_arg(2)?.unwrap_or(0);
    let moved = base.offset(ctx.source(), rows, cols, int_arg(3)?, int_arg(4)?)?;
    Ok(moved.to_value(ctx.source()))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{eval, eval_on, num, rows, sheet_with, text};
    use crate::value::FormulaValue;
    use pretty_assertions::assert_eq;
    use sheetcalc_core::{CellError, Snapshot};

    fn table() -> Snapshot {
        sheet_with(&[
            ("A1", 1.0.into()),
            ("A2", 3.0.into()),
            ("A3", 5.0.into()),
            ("B1", "one".into()),
            ("B2", "three".into()),
            ("B3", "five".into()),
            ("C1", "apple".into()),
            ("C2", "Banana".into()),
            ("C3", "cherry".into()),
        ])
    }

    #[test]
    fn test_index() {
        let s = table();
        assert_eq!(eval_on(&s, "=INDEX(A1:B3, 2, 2)"), text("three"));
        assert_eq!(eval_on(&s, "=INDEX(A1:B3, 4, 1)"), FormulaValue::Error(CellError::Ref));
        assert_eq!(rows(eval_on(&s, "=INDEX(A1:B3, 0, 1)")), vec![vec![num(1.0)], vec![num(3.0)], vec![num(5.0)]]);
        assert_eq!(eval_on(&s, "=INDEX((A1:A3, C1:C3), 3, 1, 2)"), text("cherry"));
        assert_eq!(eval("=INDEX({10,20,30}, 2)"), num(20.0));
        assert_eq!(rows(eval("=INDEX({1,2;3,4}, 2, 0)")), vec![vec![num(3.0), num(4.0)]]);
    }

    #[test]
    fn test_match() {
        let s = table();
        assert_eq!(eval_on(&s, "=MATCH(3, A1:A3, 0)"), num(2.0));
        assert_eq!(eval_on(&s, "=MATCH(4, A1:A3)"), num(2.0));
        assert_eq!(eval_on(&s, "=MATCH(0, A1:A3)"), FormulaValue::Error(CellError::Na));
        assert_eq!(eval_on(&s, "=MATCH(\"b*\", C1:C3, 0)"), num(2.0));
        assert_eq!(eval("=MATCH(4, {9,7,5,3}, -1)"), num(3.0));
        assert_eq!(eval_on(&s, "=MATCH(1, A1:B3, 0)"), FormulaValue::Error(CellError::Na));
    }

    #[test]
    fn test_vlookup_hlookup() {
        let s = table();
        assert_eq!(eval_on(&s, "=VLOOKUP(3, A1:B3, 2, FALSE)"), text("three"));
        assert_eq!(eval_on(&s, "=VLOOKUP(4, A1:B3, 2)"), text("three"));
        assert_eq!(eval_on(&s, "=VLOOKUP(4, A1:B3, 2, FALSE)"), FormulaValue::Error(CellError::Na));
        assert_eq!(eval_on(&s, "=VLOOKUP(3, A1:B3, 3, FALSE)"), FormulaValue::Error(CellError::Ref));
        assert_eq!(eval_on(&s, "=VLOOKUP(3, A1:B3, 0, FALSE)"), FormulaValue::Error(CellError::Value));
        assert_eq!(eval("=HLOOKUP(\"b\", {\"a\",\"b\";1,2}, 2, FALSE)"), num(2.0));
    }

    #[test]
    fn test_xlookup() {
        let s = table();
        assert_eq!(eval_on(&s, "=XLOOKUP(5, A1:A3, B1:B3)"), text("five"));
        assert_eq!(eval_on(&s, "=XLOOKUP(4, A1:A3, B1:B3)"), FormulaValue::Error(CellError::Na));
        assert_eq!(eval_on(&s, "=XLOOKUP(4, A1:A3, B1:B3, \"none\")"), text("none"));
        assert_eq!(eval_on(&s, "=XLOOKUP(4, A1:A3, B1:B3, , -1)"), text("three"));
        assert_eq!(eval_on(&s, "=XLOOKUP(4, A1:A3, B1:B3, , 1)"), text("five"));
        assert_eq!(eval_on(&s, "=XLOOKUP(\"ch*\", C1:C3, A1:A3, , 2)"), num(5.0));
        assert_eq!(rows(eval_on(&s, "=XLOOKUP(3, A1:A3, A1:C3)")), vec![vec![num(3.0), text("three"), text("Banana")]]);
        assert_eq!(eval("=XLOOKUP(1, {1,2,1}, {\"a\",\"b\",\"c\"}, , 0, -1)"), text("c"));
    }

    #[test]
    fn test_choose_is_lazy() {
        assert_eq!(eval("=CHOOSE(2, 1/0, \"b\", NOSUCH())"), text("b"));
        assert_eq!(eval("=CHOOSE(4, 1, 2, 3)"), FormulaValue::Error(CellError::Value));
    }

    #[test]
    fn test_positions_and_shapes() {
        assert_eq!(eval("=ROW()"), num(100.0));
        assert_eq!(eval("=COLUMN()"), num(26.0));
        assert_eq!(eval("=ROW(C5)"), num(5.0));
        assert_eq!(rows(eval("=COLUMN(B1:D1)")), vec![vec![num(2.0), num(3.0), num(4.0)]]);
        assert_eq!(eval("=ROWS(A1:C7)"), num(7.0));
        assert_eq!(eval("=COLUMNS({1,2,3;4,5,6})"), num(3.0));
        assert_eq!(eval("=ROWS(1)"), num(1.0));
    }

    #[test]
    fn test_sequence_and_transpose() {
        assert_eq!(
            rows(eval("=SEQUENCE(2, 3, 10, 5)")),
            vec![vec![num(10.0), num(15.0), num(20.0)], vec![num(25.0), num(30.0), num(35.0)]]
        );
        assert_eq!(eval("=SEQUENCE(0)"), FormulaValue::Error(CellError::Calc));
        assert_eq!(eval("=SEQUENCE(1048577)"), FormulaValue::Error(CellError::Value));
        assert_eq!(eval("=SEQUENCE(1048576, 16384)"), FormulaValue::Error(CellError::Num));
        assert_eq!(
            eval("=SEQUENCE(1, 16384) + SEQUENCE(1048576)"),
            FormulaValue::Error(CellError::Num)
        );
        assert_eq!(rows(eval("=TRANSPOSE({1,2})")), vec![vec![num(1.0)], vec![num(2.0)]]);
    }

    #[test]
    fn test_offset() {
        let s = table();
        assert_eq!(eval_on(&s, "=OFFSET(A1, 1, 1)"), text("three"));
        assert_eq!(eval_on(&s, "=SUM(OFFSET(A1, 0, 0, 3, 1))"), num(9.0));
        assert_eq!(eval_on(&s, "=OFFSET(A1, -1, 0)"), FormulaValue::Error(CellError::Ref));
        assert_eq!(eval_on(&s, "=OFFSET(1, 0, 0)"), FormulaValue::Error(CellError::Value));
    }
}
