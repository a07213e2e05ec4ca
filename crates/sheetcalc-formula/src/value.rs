//! Runtime values produced by formula evaluation
//!
//! A [`FormulaValue`] is either a scalar (number, string, boolean, error, empty) or an
//! [`ArrayValue`] grid. Operators are defined on scalars and lifted element-wise over
//! arrays with broadcasting: a dimension of length 1 stretches to match the other operand,
//! and positions that exist in neither shape become `#VALUE!` in the result.
//!
//! Errors never abort an operation on an array. They are produced per element and
//! propagate through every later operation they take part in.

use std::cmp::Ordering;
use std::fmt;

use lazy_regex::regex_is_match;
use sheetcalc_core::{CellError, CellValue};

use crate::ast::{BinaryOperator, UnaryOperator};

/// A value produced during evaluation
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FormulaValue {
    Number(f64),
    String(String),
    Boolean(bool),
    Error(CellError),
    Array(ArrayValue),
    #[default]
    Empty,
}

impl FormulaValue {
    /// Loose numeric view used by functions that skip non-numbers
    ///
    /// Booleans read as 0/1, empty as 0 and numeric text is parsed.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FormulaValue::Number(n) => Some(*n),
            FormulaValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            FormulaValue::Empty => Some(0.0),
            FormulaValue::String(s) => parse_number_text(s),
            FormulaValue::Error(_) => None,
            FormulaValue::Array(arr) => arr.top_left().as_number(),
        }
    }

    /// Arithmetic coercion: errors propagate, non-numeric text is `#VALUE!`
    pub fn to_number(&self) -> Result<f64, CellError> {
        match self {
            FormulaValue::Error(e) => Err(*e),
            FormulaValue::Array(arr) => arr.top_left().to_number(),
            other => other.as_number().ok_or(CellError::Value),
        }
    }

    /// Loose boolean view: numbers are true when non-zero, text must be TRUE/FALSE
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FormulaValue::Boolean(b) => Some(*b),
            FormulaValue::Number(n) => Some(*n != 0.0),
            FormulaValue::Empty => Some(false),
            FormulaValue::String(s) => {
                if s.eq_ignore_ascii_case("TRUE") {
                    Some(true)
                } else if s.eq_ignore_ascii_case("FALSE") {
                    Some(false)
                } else {
                    None
                }
            }
            FormulaValue::Error(_) => None,
            FormulaValue::Array(arr) => arr.top_left().as_bool(),
        }
    }

    /// Logical coercion: errors propagate, other failures are `#VALUE!`
    pub fn to_bool(&self) -> Result<bool, CellError> {
        match self {
            FormulaValue::Error(e) => Err(*e),
            FormulaValue::Array(arr) => arr.top_left().to_bool(),
            other => other.as_bool().ok_or(CellError::Value),
        }
    }

    /// Display text of a scalar (errors render as their code)
    pub fn as_string(&self) -> String {
        match self {
            FormulaValue::Number(n) => number_to_string(*n),
            FormulaValue::String(s) => s.clone(),
            FormulaValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            FormulaValue::Error(e) => e.as_str().to_string(),
            FormulaValue::Array(arr) => arr.top_left().as_string(),
            FormulaValue::Empty => String::new(),
        }
    }

    /// Text coercion for `&` and text functions: errors propagate
    pub fn to_text(&self) -> Result<String, CellError> {
        match self {
            FormulaValue::Error(e) => Err(*e),
            FormulaValue::Array(arr) => arr.top_left().to_text(),
            other => Ok(other.as_string()),
        }
    }

    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        matches!(self, FormulaValue::Error(_))
    }

    /// Get the error if this is one
    pub fn get_error(&self) -> Option<CellError> {
        match self {
            FormulaValue::Error(e) => Some(*e),
            _ => None,
        }
    }

    /// Check if this is an array
    pub fn is_array(&self) -> bool {
        matches!(self, FormulaValue::Array(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FormulaValue::Empty)
    }

    /// Top-left element of an array, the value itself otherwise
    pub fn scalar(&self) -> &FormulaValue {
        match self {
            FormulaValue::Array(arr) => arr.top_left(),
            other => other,
        }
    }

    /// Convert into an array (scalars become 1×1)
    pub fn into_array(self) -> ArrayValue {
        match self {
            FormulaValue::Array(arr) => arr,
            other => ArrayValue::filled(1, 1, other),
        }
    }

    /// Dimensions as (rows, cols); scalars are 1×1
    pub fn dimensions(&self) -> (usize, usize) {
        match self {
            FormulaValue::Array(arr) => (arr.rows(), arr.cols()),
            _ => (1, 1),
        }
    }

    /// Type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            FormulaValue::Number(_) => "number",
            FormulaValue::String(_) => "string",
            FormulaValue::Boolean(_) => "boolean",
            FormulaValue::Error(_) => "error",
            FormulaValue::Array(_) => "array",
            FormulaValue::Empty => "empty",
        }
    }

    /// Convert to a storable cell value; arrays collapse to their top-left element
    pub fn to_cell_value(&self) -> CellValue {
        match self {
            FormulaValue::Number(n) => CellValue::Number(*n),
            FormulaValue::String(s) => CellValue::from(s.as_str()),
            FormulaValue::Boolean(b) => CellValue::Boolean(*b),
            FormulaValue::Error(e) => CellValue::Error(*e),
            FormulaValue::Array(arr) => arr.top_left().to_cell_value(),
            FormulaValue::Empty => CellValue::Empty,
        }
    }
}

impl From<&CellValue> for FormulaValue {
    fn from(value: &CellValue) -> Self {
        match value {
            CellValue::Empty => FormulaValue::Empty,
            CellValue::Boolean(b) => FormulaValue::Boolean(*b),
            CellValue::Number(n) => FormulaValue::Number(*n),
            CellValue::String(s) => FormulaValue::String(s.as_str().to_string()),
            CellValue::Error(e) => FormulaValue::Error(*e),
        }
    }
}

impl From<CellValue> for FormulaValue {
    fn from(value: CellValue) -> Self {
        FormulaValue::from(&value)
    }
}

impl From<FormulaValue> for CellValue {
    fn from(value: FormulaValue) -> Self {
        value.to_cell_value()
    }
}

impl From<f64> for FormulaValue {
    fn from(n: f64) -> Self {
        FormulaValue::Number(n)
    }
}

impl From<bool> for FormulaValue {
    fn from(b: bool) -> Self {
        FormulaValue::Boolean(b)
    }
}

impl From<&str> for FormulaValue {
    fn from(s: &str) -> Self {
        FormulaValue::String(s.to_string())
    }
}

impl From<String> for FormulaValue {
    fn from(s: String) -> Self {
        FormulaValue::String(s)
    }
}

impl From<CellError> for FormulaValue {
    fn from(e: CellError) -> Self {
        FormulaValue::Error(e)
    }
}

impl From<ArrayValue> for FormulaValue {
    fn from(arr: ArrayValue) -> Self {
        FormulaValue::Array(arr)
    }
}

impl fmt::Display for FormulaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaValue::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            FormulaValue::Array(arr) => write!(f, "{}", arr),
            other => f.write_str(&other.as_string()),
        }
    }
}

// === Arrays ===

/// Most elements a formula may build in one array; larger results are `#NUM!`
pub const MAX_ARRAY_CELLS: usize = 1 << 24;

/// A rectangular grid of values, stored row-major
///
/// Arrays always have at least one row and one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    rows: usize,
    cols: usize,
    data: Vec<FormulaValue>,
}

impl ArrayValue {
    /// Build from row-major data; returns `None` if the length does not match
    pub fn new(rows: usize, cols: usize, data: Vec<FormulaValue>) -> Option<Self> {
        if rows == 0 || cols == 0 || data.len() != rows * cols {
            return None;
        }
        Some(Self { rows, cols, data })
    }

    /// Build from nested rows, padding short rows with `#N/A`
    ///
    /// An empty input yields a 1×1 `#CALC!` array.
    pub fn from_rows(rows: Vec<Vec<FormulaValue>>) -> Self {
        let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
        if rows.is_empty() || cols == 0 {
            return Self::filled(1, 1, FormulaValue::Error(CellError::Calc));
        }
        let row_count = rows.len();
        let mut data = Vec::with_capacity(row_count * cols);
        for mut row in rows {
            let missing = cols - row.len();
            data.append(&mut row);
            data.extend(std::iter::repeat(FormulaValue::Error(CellError::Na)).take(missing));
        }
        Self {
            rows: row_count,
            cols,
            data,
        }
    }

    /// An array with every element set to `value`
    pub fn filled(rows: usize, cols: usize, value: FormulaValue) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// An array built element by element from (row, col)
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> FormulaValue) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    /// Like [`from_fn`](Self::from_fn), but `#NUM!` past [`MAX_ARRAY_CELLS`]
    pub fn try_from_fn(
        rows: usize,
        cols: usize,
        f: impl FnMut(usize, usize) -> FormulaValue,
    ) -> Result<Self, CellError> {
        match rows.max(1).checked_mul(cols.max(1)) {
            Some(n) if n <= MAX_ARRAY_CELLS => Ok(Self::from_fn(rows, cols, f)),
            _ => Err(CellError::Num),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false; arrays hold at least one element
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Option<&FormulaValue> {
        if row < self.rows && col < self.cols {
            self.data.get(row * self.cols + col)
        } else {
            None
        }
    }

    pub fn top_left(&self) -> &FormulaValue {
        &self.data[0]
    }

    /// Iterate over elements in row-major order
    pub fn iter(&self) -> std::slice::Iter<'_, FormulaValue> {
        self.data.iter()
    }

    /// Elements in row-major order
    pub fn values(&self) -> &[FormulaValue] {
        &self.data
    }

    /// Consume into row-major elements
    pub fn into_values(self) -> Vec<FormulaValue> {
        self.data
    }

    /// Apply `f` to every element
    pub fn map(&self, mut f: impl FnMut(&FormulaValue) -> FormulaValue) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(&mut f).collect(),
        }
    }

    /// Swap rows and columns
    pub fn transpose(&self) -> Self {
        Self::from_fn(self.cols, self.rows, |r, c| self.data[c * self.cols + r].clone())
    }

    /// One row as a 1×cols array
    pub fn row(&self, row: usize) -> Option<Self> {
        (row < self.rows).then(|| Self::from_fn(1, self.cols, |_, c| self.data[row * self.cols + c].clone()))
    }

    /// One column as a rows×1 array
    pub fn column(&self, col: usize) -> Option<Self> {
        (col < self.cols).then(|| Self::from_fn(self.rows, 1, |r, _| self.data[r * self.cols + col].clone()))
    }

    /// Nested rows
    pub fn to_rows(&self) -> Vec<Vec<FormulaValue>> {
        self.data.chunks(self.cols).map(<[FormulaValue]>::to_vec).collect()
    }

    /// Element used when broadcasting this array to (row, col)
    ///
    /// A dimension of length 1 repeats; an index past a longer dimension has no element.
    pub fn broadcast_get(&self, row: usize, col: usize) -> Option<&FormulaValue> {
        let r = if self.rows == 1 { 0 } else { row };
        let c = if self.cols == 1 { 0 } else { col };
        self.get(r, c)
    }
}

impl fmt::Display for ArrayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (r, row) in self.data.chunks(self.cols).enumerate() {
            if r > 0 {
                f.write_str(";")?;
            }
            for (c, value) in row.iter().enumerate() {
                if c > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}", value)?;
            }
        }
        f.write_str("}")
    }
}

// === Operators ===

/// Apply a unary operator, element-wise over arrays
pub fn unary_op(op: UnaryOperator, value: &FormulaValue) -> FormulaValue {
    match value {
        FormulaValue::Array(arr) => FormulaValue::Array(arr.map(|v| unary_op(op, v))),
        scalar => {
            let result = scalar.to_number().map(|n| match op {
                UnaryOperator::Negate => -n,
                UnaryOperator::Percent => n / 100.0,
            });
            into_value(result.map(FormulaValue::Number))
        }
    }
}

/// Apply a binary value operator, broadcasting over arrays
///
/// Reference operators (`:`, `,`, ` `) are not value operations and yield `#VALUE!`.
pub fn binary_op(op: BinaryOperator, left: &FormulaValue, right: &FormulaValue) -> FormulaValue {
    broadcast(left, right, |l, r| scalar_binary_op(op, l, r))
}

/// Compare two values with a comparison operator, broadcasting over arrays
pub fn compare(left: &FormulaValue, right: &FormulaValue, op: BinaryOperator) -> FormulaValue {
    if op.is_comparison() {
        binary_op(op, left, right)
    } else {
        FormulaValue::Error(CellError::Value)
    }
}

/// Combine two values element-wise with broadcasting
///
/// If neither side is an array, `f` is applied once. Otherwise the result takes the
/// larger extent of each dimension, or is `#NUM!` when that exceeds [`MAX_ARRAY_CELLS`].
pub fn broadcast(
    left: &FormulaValue,
    right: &FormulaValue,
    mut f: impl FnMut(&FormulaValue, &FormulaValue) -> FormulaValue,
) -> FormulaValue {
    match (left, right) {
        (FormulaValue::Array(_), _) | (_, FormulaValue::Array(_)) => {
            let (lr, lc) = left.dimensions();
            let (rr, rc) = right.dimensions();
            let rows = lr.max(rr);
            let cols = lc.max(rc);
            let result = ArrayValue::try_from_fn(rows, cols, |r, c| {
                match (broadcast_element(left, r, c), broadcast_element(right, r, c)) {
                    (Some(l), Some(rv)) => f(l, rv),
                    _ => FormulaValue::Error(CellError::Value),
                }
            });
            match result {
                Ok(arr) => FormulaValue::Array(arr),
                Err(e) => FormulaValue::Error(e),
            }
        }
        (l, r) => f(l, r),
    }
}

pub(crate) fn broadcast_element(value: &FormulaValue, row: usize, col: usize) -> Option<&FormulaValue> {
    match value {
        FormulaValue::Array(arr) => arr.broadcast_get(row, col),
        scalar => Some(scalar),
    }
}

fn scalar_binary_op(op: BinaryOperator, left: &FormulaValue, right: &FormulaValue) -> FormulaValue {
    match op {
        BinaryOperator::Add
        | BinaryOperator::Subtract
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Power => into_value(arithmetic(op, left, right)),
        BinaryOperator::Concat => {
            let joined = left
                .to_text()
                .and_then(|l| right.to_text().map(|r| l + &r));
            into_value(joined.map(FormulaValue::String))
        }
        BinaryOperator::Equal
        | BinaryOperator::NotEqual
        | BinaryOperator::LessThan
        | BinaryOperator::LessEqual
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterEqual => match compare_scalars(left, right) {
            Ok(ordering) => FormulaValue::Boolean(match op {
                BinaryOperator::Equal => ordering == Ordering::Equal,
                BinaryOperator::NotEqual => ordering != Ordering::Equal,
                BinaryOperator::LessThan => ordering == Ordering::Less,
                BinaryOperator::LessEqual => ordering != Ordering::Greater,
                BinaryOperator::GreaterThan => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }),
            Err(e) => FormulaValue::Error(e),
        },
        BinaryOperator::Range | BinaryOperator::Union | BinaryOperator::Intersect => {
            FormulaValue::Error(CellError::Value)
        }
    }
}

fn arithmetic(op: BinaryOperator, left: &FormulaValue, right: &FormulaValue) -> Result<FormulaValue, CellError> {
    // Both sides are coerced before either error is returned; the left one wins
    let l = left.to_number();
    let r = right.to_number();
    let (l, r) = (l?, r?);
    let result = match op {
        BinaryOperator::Add => l + r,
        BinaryOperator::Subtract => l - r,
        BinaryOperator::Multiply => l * r,
        BinaryOperator::Divide => {
            if r == 0.0 {
                return Err(CellError::Div0);
            }
            l / r
        }
        BinaryOperator::Power => power(l, r)?,
        _ => return Err(CellError::Value),
    };
    finite(result).map(FormulaValue::Number)
}

/// `base ^ exponent` with spreadsheet error rules
pub fn power(base: f64, exponent: f64) -> Result<f64, CellError> {
    if base == 0.0 {
        if exponent == 0.0 {
            return Err(CellError::Num);
        }
        if exponent < 0.0 {
            return Err(CellError::Div0);
        }
    }
    if base < 0.0 && exponent.fract() != 0.0 {
        return Err(CellError::Num);
    }
    finite(base.powf(exponent))
}

/// Reject NaN and infinities as `#NUM!`
pub fn finite(n: f64) -> Result<f64, CellError> {
    if n.is_finite() {
        Ok(n)
    } else {
        Err(CellError::Num)
    }
}

/// Order two scalars for comparison operators
///
/// Errors propagate, left first. Empty takes the type of the other side. Numbers compare
/// numerically, strings case-insensitively, and booleans against numbers as 0/1. Other
/// mismatches fall back to the type order number < string < boolean.
pub fn compare_scalars(left: &FormulaValue, right: &FormulaValue) -> Result<Ordering, CellError> {
    use FormulaValue as V;

    if let Some(e) = left.get_error() {
        return Err(e);
    }
    if let Some(e) = right.get_error() {
        return Err(e);
    }

    let left = left.scalar();
    let right = right.scalar();
    Ok(match (left, right) {
        (V::Empty, V::Empty) => Ordering::Equal,
        (V::Empty, other) => compare_scalars(&blank_like(other), other)?,
        (other, V::Empty) => compare_scalars(other, &blank_like(other))?,
        (V::Number(l), V::Number(r)) => l.partial_cmp(r).unwrap_or(Ordering::Equal),
        (V::String(l), V::String(r)) => l.to_lowercase().cmp(&r.to_lowercase()),
        (V::Boolean(l), V::Boolean(r)) => l.cmp(r),
        (V::Boolean(b), V::Number(n)) => bool_number(*b).partial_cmp(n).unwrap_or(Ordering::Equal),
        (V::Number(n), V::Boolean(b)) => n.partial_cmp(&bool_number(*b)).unwrap_or(Ordering::Equal),
        (l, r) => type_rank(l).cmp(&type_rank(r)),
    })
}

fn blank_like(value: &FormulaValue) -> FormulaValue {
    match value {
        FormulaValue::Number(_) => FormulaValue::Number(0.0),
        FormulaValue::String(_) => FormulaValue::String(String::new()),
        FormulaValue::Boolean(_) => FormulaValue::Boolean(false),
        _ => FormulaValue::Empty,
    }
}

fn bool_number(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn type_rank(value: &FormulaValue) -> u8 {
    match value {
        FormulaValue::Empty | FormulaValue::Number(_) => 0,
        FormulaValue::String(_) => 1,
        FormulaValue::Boolean(_) => 2,
        _ => 3,
    }
}

fn into_value(result: Result<FormulaValue, CellError>) -> FormulaValue {
    result.unwrap_or_else(FormulaValue::Error)
}

// === Text conversion ===

/// Parse text the way arithmetic coerces it: trimmed decimal or scientific, optional `%`
pub fn parse_number_text(text: &str) -> Option<f64> {
    let text = text.trim();
    if !regex_is_match!(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?%?$", text) {
        return None;
    }
    let (digits, scale) = match text.strip_suffix('%') {
        Some(rest) => (rest, 100.0),
        None => (text, 1.0),
    };
    digits
        .parse::<f64>()
        .ok()
        .map(|n| n / scale)
        .filter(|n| n.is_finite())
}

/// Render a number in general format: up to 15 significant digits, scientific outside
/// the range 1e-9..1e15
pub fn number_to_string(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    if !n.is_finite() {
        return CellError::Num.as_str().to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }

    // Round to 15 significant digits before choosing a layout
    let rounded: f64 = format!("{:.14e}", n).parse().unwrap_or(n);
    let magnitude = rounded.abs();
    if (1e-9..1e15).contains(&magnitude) {
        return format!("{}", rounded);
    }

    let scientific = format!("{:e}", rounded);
    match scientific.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}E{}{:02}", mantissa, sign, exponent.abs())
        }
        None => scientific,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn num(n: f64) -> FormulaValue {
        FormulaValue::Number(n)
    }

    fn text(s: &str) -> FormulaValue {
        FormulaValue::String(s.to_string())
    }

    fn array(rows: Vec<Vec<f64>>) -> FormulaValue {
        FormulaValue::Array(ArrayValue::from_rows(
            rows.into_iter()
                .map(|r| r.into_iter().map(FormulaValue::Number).collect())
                .collect(),
        ))
    }

    #[test]
    fn test_arithmetic_coercion() {
        assert_eq!(binary_op(BinaryOperator::Add, &num(1.0), &text(" 2 ")), num(3.0));
        assert_eq!(binary_op(BinaryOperator::Add, &FormulaValue::Boolean(true), &FormulaValue::Empty), num(1.0));
        assert_eq!(binary_op(BinaryOperator::Multiply, &text("50%"), &num(4.0)), num(2.0));
        assert_eq!(
            binary_op(BinaryOperator::Add, &num(1.0), &text("abc")),
            FormulaValue::Error(CellError::Value)
        );
    }

    #[test]
    fn test_division_and_power_errors() {
        assert_eq!(
            binary_op(BinaryOperator::Divide, &num(1.0), &num(0.0)),
            FormulaValue::Error(CellError::Div0)
        );
        assert_eq!(
            binary_op(BinaryOperator::Divide, &num(1.0), &FormulaValue::Empty),
            FormulaValue::Error(CellError::Div0)
        );
        assert_eq!(power(0.0, 0.0), Err(CellError::Num));
        assert_eq!(power(0.0, -1.0), Err(CellError::Div0));
        assert_eq!(power(-8.0, 0.5), Err(CellError::Num));
        assert_eq!(power(-2.0, 3.0), Ok(-8.0));
        assert_eq!(power(10.0, 400.0), Err(CellError::Num));
    }

    #[test]
    fn test_left_error_wins() {
        let l = FormulaValue::Error(CellError::Ref);
        let r = FormulaValue::Error(CellError::Div0);
        assert_eq!(binary_op(BinaryOperator::Add, &l, &r), FormulaValue::Error(CellError::Ref));
        assert_eq!(binary_op(BinaryOperator::Add, &text("x"), &r), FormulaValue::Error(CellError::Value));
        assert_eq!(compare(&r, &l, BinaryOperator::Equal), FormulaValue::Error(CellError::Div0));
    }

    #[test]
    fn test_compare_rules() {
        let t = FormulaValue::Boolean(true);
        assert_eq!(compare(&text("abc"), &text("ABC"), BinaryOperator::Equal), t);
        assert_eq!(compare(&text("a"), &text("B"), BinaryOperator::LessThan), t);
        assert_eq!(compare(&FormulaValue::Boolean(true), &num(1.0), BinaryOperator::Equal), t);
        assert_eq!(compare(&num(1e9), &text("a"), BinaryOperator::LessThan), t);
        assert_eq!(compare(&text("zzz"), &FormulaValue::Boolean(false), BinaryOperator::LessThan), t);
        assert_eq!(compare(&FormulaValue::Empty, &num(0.0), BinaryOperator::Equal), t);
        assert_eq!(compare(&FormulaValue::Empty, &text(""), BinaryOperator::Equal), t);
        assert_eq!(compare(&num(2.0), &num(1.0), BinaryOperator::GreaterEqual), t);
        assert_eq!(compare(&num(2.0), &num(1.0), BinaryOperator::Add), FormulaValue::Error(CellError::Value));
    }

    #[test]
    fn test_broadcast_scalar_and_vectors() {
        let a = array(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(
            binary_op(BinaryOperator::Multiply, &a, &num(10.0)),
            array(vec![vec![10.0, 20.0], vec![30.0, 40.0]])
        );

        let col = array(vec![vec![1.0], vec![2.0]]);
        let row = array(vec![vec![10.0, 20.0, 30.0]]);
        assert_eq!(
            binary_op(BinaryOperator::Add, &col, &row),
            array(vec![vec![11.0, 21.0, 31.0], vec![12.0, 22.0, 32.0]])
        );
    }

    #[test]
    fn test_broadcast_mismatch_is_per_element() {
        let a = array(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = array(vec![vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 1.0]]);
        let result = binary_op(BinaryOperator::Add, &a, &b);
        let FormulaValue::Array(result) = result else {
            panic!("expected array");
        };
        assert_eq!((result.rows(), result.cols()), (3, 3));
        assert_eq!(result.get(1, 1), Some(&num(5.0)));
        assert_eq!(result.get(2, 0), Some(&FormulaValue::Error(CellError::Value)));
        assert_eq!(result.get(0, 2), Some(&FormulaValue::Error(CellError::Value)));
    }

    #[test]
    fn test_unary_over_array() {
        let a = array(vec![vec![50.0, -1.0]]);
        assert_eq!(unary_op(UnaryOperator::Percent, &a), array(vec![vec![0.5, -0.01]]));
        assert_eq!(unary_op(UnaryOperator::Negate, &text("x")), FormulaValue::Error(CellError::Value));
    }

    #[test]
    fn test_concat() {
        assert_eq!(
            binary_op(BinaryOperator::Concat, &text("a"), &num(1.5)),
            text("a1.5")
        );
        assert_eq!(
            binary_op(BinaryOperator::Concat, &FormulaValue::Boolean(true), &FormulaValue::Empty),
            text("TRUE")
        );
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-3.5), "-3.5");
        assert_eq!(number_to_string(0.1 + 0.2), "0.3");
        assert_eq!(number_to_string(1e20), "1E+20");
        assert_eq!(number_to_string(1.5e-12), "1.5E-12");
    }

    #[test]
    fn test_parse_number_text() {
        assert_eq!(parse_number_text("1e3"), Some(1000.0));
        assert_eq!(parse_number_text(".5"), Some(0.5));
        assert_eq!(parse_number_text("12%"), Some(0.12));
        assert_eq!(parse_number_text("inf"), None);
        assert_eq!(parse_number_text(""), None);
        assert_eq!(parse_number_text("1,000"), None);
    }

    #[test]
    fn test_array_shape_helpers() {
        let ragged = ArrayValue::from_rows(vec![vec![num(1.0), num(2.0)], vec![num(3.0)]]);
        assert_eq!(ragged.get(1, 1), Some(&FormulaValue::Error(CellError::Na)));
        let t = ragged.transpose();
        assert_eq!((t.rows(), t.cols()), (2, 2));
        assert_eq!(t.get(0, 1), Some(&num(3.0)));
        assert_eq!(ragged.column(0).map(|c| c.to_rows()), Some(vec![vec![num(1.0)], vec![num(3.0)]]));
        assert!(ArrayValue::new(2, 2, vec![num(1.0)]).is_none());
    }

    #[test]
    fn test_cell_value_conversion() {
        assert_eq!(FormulaValue::from(CellValue::from("x")), text("x"));
        let arr = array(vec![vec![7.0, 8.0]]);
        assert_eq!(arr.to_cell_value(), CellValue::Number(7.0));
    }
}
