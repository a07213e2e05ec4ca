// Property-based tests for the formula language and dependency tracker.
// Soak: PROPTEST_CASES=10000 cargo test --release -p sheetcalc-formula

use proptest::prelude::*;
use sheetcalc_core::{CellError, CellLocation};
use sheetcalc_formula::value::{binary_op, compare};
use sheetcalc_formula::{
    parse_formula, tokenize, ArrayValue, BinaryOperator, DependencyGraph, FormulaValue, Precedent,
};

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Formula text from a small grammar: literals, references, operators and calls
fn arb_formula() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (0u32..1000).prop_map(|n| n.to_string()),
        (0u32..100, 0u32..100).prop_map(|(a, b)| format!("{}.{}", a, b)),
        "[A-Z]{1,2}[1-9][0-9]{0,2}",
        "[A-C][1-9]:[D-F][1-9]{1,2}",
        "\"[a-z ]{0,6}\"",
        Just("TRUE".to_string()),
        Just("#N/A".to_string()),
    ];
    let expr = leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (inner.clone(), prop::sample::select(vec!["+", "-", "*", "/", "^", "&", "=", "<>", "<="]), inner.clone())
                .prop_map(|(l, op, r)| format!("{}{}{}", l, op, r)),
            inner.clone().prop_map(|e| format!("({})", e)),
            inner.clone().prop_map(|e| format!("-{}", e)),
            (prop::sample::select(vec!["SUM", "IF", "MAX", "CONCAT"]), prop::collection::vec(inner, 1..4))
                .prop_map(|(f, args)| format!("{}({})", f, args.join(","))),
        ]
    });
    expr.prop_map(|e| format!("={}", e))
}

fn arb_number() -> impl Strategy<Value = f64> {
    prop_oneof![
        3 => -1.0e6..1.0e6f64,
        1 => (-100i32..100).prop_map(f64::from),
    ]
}

/// Mostly numbers, sometimes an error
fn arb_element() -> impl Strategy<Value = FormulaValue> {
    prop_oneof![
        6 => arb_number().prop_map(FormulaValue::Number),
        1 => Just(FormulaValue::Error(CellError::Na)),
        1 => Just(FormulaValue::Error(CellError::Div0)),
    ]
}

/// Two arrays of the same shape
fn arb_array_pair() -> impl Strategy<Value = (ArrayValue, ArrayValue)> {
    (1usize..5, 1usize..5).prop_flat_map(|(rows, cols)| {
        let cells = || prop::collection::vec(arb_element(), rows * cols);
        (cells(), cells()).prop_map(move |(a, b)| {
            (
                ArrayValue::new(rows, cols, a).expect("shape matches"),
                ArrayValue::new(rows, cols, b).expect("shape matches"),
            )
        })
    })
}

fn cell(row: u32) -> CellLocation {
    CellLocation::new(0, 0, row, 0)
}

/// Formula rows, each reading some earlier rows
fn arb_acyclic_graph() -> impl Strategy<Value = Vec<(u32, Vec<u32>)>> {
    (2u32..30).prop_flat_map(|n| {
        (1..n)
            .map(|row| prop::collection::vec(0..row, 0..3).prop_map(move |reads| (row, reads)))
            .collect::<Vec<_>>()
    })
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config())]

    #[test]
    fn parsing_is_deterministic(text in arb_formula()) {
        let first = parse_formula(&text);
        let second = parse_formula(&text);
        prop_assert_eq!(&first, &second);
        prop_assert!(first.is_ok(), "{} failed to parse: {:?}", text, first);
        prop_assert_eq!(tokenize(&text).ok(), tokenize(&text).ok());
    }

    #[test]
    fn numeric_equality_matches_values(a in arb_number(), b in arb_number()) {
        let (x, y) = (FormulaValue::Number(a), FormulaValue::Number(b));
        prop_assert_eq!(compare(&x, &x, BinaryOperator::Equal), FormulaValue::Boolean(true));
        prop_assert_eq!(
            compare(&x, &y, BinaryOperator::Equal),
            compare(&y, &x, BinaryOperator::Equal)
        );
        prop_assert_eq!(compare(&x, &y, BinaryOperator::Equal), FormulaValue::Boolean(a == b));
    }

    #[test]
    fn array_arithmetic_is_element_wise((a, b) in arb_array_pair()) {
        for op in [BinaryOperator::Add, BinaryOperator::Multiply] {
            let ab = binary_op(op, &FormulaValue::Array(a.clone()), &FormulaValue::Array(b.clone()));
            let ba = binary_op(op, &FormulaValue::Array(b.clone()), &FormulaValue::Array(a.clone()));
            let FormulaValue::Array(result) = &ab else {
                return Err(TestCaseError::fail("expected an array result"));
            };
            prop_assert_eq!((result.rows(), result.cols()), (a.rows(), a.cols()));

            for ((x, y), z) in a.iter().zip(b.iter()).zip(result.iter()) {
                if x.is_error() || y.is_error() {
                    prop_assert!(z.is_error());
                } else {
                    prop_assert_eq!(z, &binary_op(op, x, y));
                }
            }
            // Commutative wherever no error is involved
            let FormulaValue::Array(swapped) = &ba else {
                return Err(TestCaseError::fail("expected an array result"));
            };
            for (z, w) in result.iter().zip(swapped.iter()) {
                if !z.is_error() {
                    prop_assert_eq!(z, w);
                }
            }
        }
    }

    #[test]
    fn dirty_set_is_idempotent(graph in arb_acyclic_graph(), touched in 0u32..30) {
        let mut deps = DependencyGraph::new();
        for (row, reads) in &graph {
            deps.set_formula(cell(*row), reads.iter().map(|r| Precedent::cell(cell(*r))).collect(), false);
        }
        prop_assert_eq!(deps.take_dirty().len(), graph.len());
        prop_assert!(deps.take_dirty().is_empty());

        deps.mark_changed(cell(touched));
        let _ = deps.take_dirty();
        prop_assert!(deps.take_dirty().is_empty());
    }

    #[test]
    fn order_puts_precedents_first(graph in arb_acyclic_graph()) {
        let mut deps = DependencyGraph::new();
        for (row, reads) in &graph {
            deps.set_formula(cell(*row), reads.iter().map(|r| Precedent::cell(cell(*r))).collect(), false);
        }
        let order = deps.take_dirty();
        prop_assert!(order.circular.is_empty());
        let position = |row: u32| order.order.iter().position(|c| *c == cell(row));
        for (row, reads) in &graph {
            for read in reads {
                // Row 0 never holds a formula
                if let (Some(p), Some(d)) = (position(*read), position(*row)) {
                    prop_assert!(p < d, "row {} evaluated after its reader {}", read, row);
                }
            }
        }
    }
}
