//! End-to-end formula scenarios: text through lexer, parser and evaluator
//!
//! Each test feeds formula text in and checks the displayed result.

use pretty_assertions::assert_eq;
use sheetcalc_core::{CellError, CellLocation, CellValue, Snapshot, Workbook};
use sheetcalc_formula::{
    evaluate_formula, parse_formula, tokenize, BinaryOperator, EvaluationContext, FixedClock,
    FormulaExpr, FormulaValue, FunctionCategory, FunctionDescriptor, FunctionRegistry,
};

fn snapshot(cells: &[(&str, CellValue)]) -> Snapshot {
    let mut book = Workbook::new("book1");
    let ws = book.worksheet_mut(0).unwrap();
    for (address, value) in cells {
        ws.set_value(address, value.clone()).unwrap();
    }
    let mut snapshot = Snapshot::new();
    snapshot.add_unit(book).unwrap();
    snapshot
}

fn eval(snapshot: &Snapshot, formula: &str) -> FormulaValue {
    let ctx = EvaluationContext::new(snapshot, FunctionRegistry::builtin(), CellLocation::new(0, 0, 50, 5));
    evaluate_formula(formula, &ctx).unwrap()
}

#[test]
fn test_lexing_and_precedence() {
    let tokens: Vec<String> = tokenize("=A1+B1*2")
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(tokens, vec!["REF(A1)", "OP(+)", "REF(B1)", "OP(*)", "NUM(2)"]);

    let FormulaExpr::BinaryOp { op, right, .. } = parse_formula("=A1+B1*2").unwrap() else {
        panic!("expected a binary operation");
    };
    assert_eq!(op, BinaryOperator::Add);
    assert!(matches!(
        *right,
        FormulaExpr::BinaryOp {
            op: BinaryOperator::Multiply,
            ..
        }
    ));
}

#[test]
fn test_division_by_zero_displays_exactly() {
    let value = eval(&Snapshot::new(), "=1/0");
    assert_eq!(value, FormulaValue::Error(CellError::Div0));
    assert_eq!(value.to_string(), "#DIV/0!");
}

#[test]
fn test_error_vocabulary_is_bit_exact() {
    let expected = [
        (CellError::Null, "#NULL!"),
        (CellError::Div0, "#DIV/0!"),
        (CellError::Value, "#VALUE!"),
        (CellError::Ref, "#REF!"),
        (CellError::Name, "#NAME?"),
        (CellError::Num, "#NUM!"),
        (CellError::Na, "#N/A"),
        (CellError::Circle, "#CIRCLE!"),
        (CellError::Spill, "#SPILL!"),
        (CellError::Calc, "#CALC!"),
    ];
    for (error, text) in expected {
        assert_eq!(error.to_string(), text);
        assert_eq!(CellError::parse(text), Some(error));
    }
}

#[test]
fn test_sum_ignores_text_in_ranges() {
    let mut cells: Vec<(String, CellValue)> = (1..=20)
        .map(|row| (format!("A{}", row), CellValue::Number(f64::from(row))))
        .collect();
    cells[6].1 = CellValue::string("test");
    let cells: Vec<(&str, CellValue)> = cells.iter().map(|(a, v)| (a.as_str(), v.clone())).collect();
    let data = snapshot(&cells);

    assert_eq!(eval(&data, "=SUM(A1:A20)"), FormulaValue::Number(203.0));
    assert_eq!(eval(&data, "=COUNT(A1:A20)"), FormulaValue::Number(19.0));
    assert_eq!(eval(&data, "=COUNTA(A1:A20)"), FormulaValue::Number(20.0));
    // Typed directly, non-numeric text is an error
    assert_eq!(eval(&data, "=SUM(1, \"test\")"), FormulaValue::Error(CellError::Value));
    // Arithmetic on the text cell is an error as well
    assert_eq!(eval(&data, "=A7+1"), FormulaValue::Error(CellError::Value));
}

#[test]
fn test_today_with_fixed_clock() {
    let clock = FixedClock::on_date(2020, 1, 1).unwrap();
    let empty = snapshot(&[]);
    let ctx = EvaluationContext::new(&empty, FunctionRegistry::builtin(), CellLocation::new(0, 0, 0, 0))
        .with_clock(&clock);
    assert_eq!(evaluate_formula("=TODAY()", &ctx).unwrap(), FormulaValue::Number(43831.0));
    assert_eq!(evaluate_formula("=YEAR(TODAY())", &ctx).unwrap(), FormulaValue::Number(2020.0));
}

#[test]
fn test_errors_propagate_through_arrays() {
    let data = snapshot(&[("A1", 1.0.into()), ("A2", CellError::Na.into()), ("A3", 3.0.into())]);
    let FormulaValue::Array(arr) = eval(&data, "=A1:A3*10") else {
        panic!("expected an array");
    };
    assert_eq!(
        arr.to_rows(),
        vec![
            vec![FormulaValue::Number(10.0)],
            vec![FormulaValue::Error(CellError::Na)],
            vec![FormulaValue::Number(30.0)],
        ]
    );
    assert_eq!(eval(&data, "=SUM(A1:A3)"), FormulaValue::Error(CellError::Na));
    assert_eq!(eval(&data, "=SUM(IFERROR(A1:A3, 0))"), FormulaValue::Number(4.0));
}

#[test]
fn test_registered_function_applies_to_later_formulas() {
    let data = snapshot(&[("A1", 21.0.into())]);
    let mut registry = FunctionRegistry::new();
    let ctx = EvaluationContext::new(&data, &registry, CellLocation::new(0, 0, 5, 5));
    assert_eq!(
        evaluate_formula("=DOUBLE(A1)", &ctx).unwrap(),
        FormulaValue::Error(CellError::Name)
    );
    drop(ctx);

    let double = FunctionDescriptor::builder("DOUBLE", FunctionCategory::User)
        .args(1, 1)
        .scalar(|args, ctx| Ok(FormulaValue::Number(ctx.value(&args[0]).scalar().to_number()? * 2.0)))
        .help("en", "Doubles a number")
        .build()
        .unwrap();
    registry.register(double);
    let ctx = EvaluationContext::new(&data, &registry, CellLocation::new(0, 0, 5, 5));
    assert_eq!(evaluate_formula("=DOUBLE(A1)", &ctx).unwrap(), FormulaValue::Number(42.0));
    assert_eq!(evaluate_formula("=DOUBLE()", &ctx).unwrap(), FormulaValue::Error(CellError::Na));
}

#[test]
fn test_parse_errors_are_reported() {
    assert!(parse_formula("=(1+2").is_err());
    assert!(parse_formula("=1+").is_err());
    assert!(tokenize("=\"open").is_err());
    assert!(tokenize("={1,2").is_err());
}
