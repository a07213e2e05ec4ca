//! # sheetcalc-formula
//!
//! Formula language for sheetcalc.
//!
//! This crate provides:
//! - Lexing and parsing (text → tokens → AST)
//! - The value and reference object models, with array broadcasting
//! - Evaluation (AST → value) with lazy functions and `LAMBDA`/`LET`
//! - The function registry and built-in library
//! - Dependency tracking: dirty propagation and topological ordering
//!
//! ## Example
//!
//! ```rust
//! use sheetcalc_core::{CellLocation, Snapshot, Workbook};
//! use sheetcalc_formula::{evaluate_formula, EvaluationContext, FormulaValue, FunctionRegistry};
//!
//! let mut book = Workbook::new("book1");
//! book.worksheet_mut(0).unwrap().set_value("A1", 20.0).unwrap();
//! let mut snapshot = Snapshot::new();
//! snapshot.add_unit(book).unwrap();
//!
//! let registry = FunctionRegistry::builtin();
//! let ctx = EvaluationContext::new(&snapshot, registry, CellLocation::new(0, 0, 0, 1));
//! let value = evaluate_formula("=A1*2+SUM(1,1)", &ctx).unwrap();
//! assert_eq!(value, FormulaValue::Number(42.0));
//! ```

pub mod ast;
pub mod clock;
pub mod dependency;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod lambda;
pub mod lexer;
pub mod parser;
pub mod reference;
pub mod token;
pub mod value;

pub use ast::{BinaryOperator, FormulaExpr, RefKind, ReferenceExpr, UnaryOperator};
pub use clock::{Clock, FixedClock, SystemClock};
pub use dependency::{DependencyGraph, DirtySet, Precedent, RecalcOrder};
pub use error::{FormulaError, FormulaResult};
pub use evaluator::{evaluate, evaluate_formula, evaluate_operand, EvaluationContext, Operand};
pub use functions::{
    CalcResult, FunctionBuilder, FunctionCategory, FunctionDescriptor, FunctionMode,
    FunctionRegistry,
};
pub use lambda::{LambdaId, LambdaRuntime};
pub use lexer::tokenize;
pub use parser::{parse_formula, parse_reference};
pub use reference::Reference;
pub use token::{Token, TokenKind};
pub use value::{ArrayValue, FormulaValue, MAX_ARRAY_CELLS};

#[cfg(test)]
pub(crate) mod test_support {
    use sheetcalc_core::{CellLocation, CellValue, Snapshot, Workbook};

    use crate::clock::FixedClock;
    use crate::evaluator::{evaluate_formula, EvaluationContext};
    use crate::functions::FunctionRegistry;
    use crate::value::FormulaValue;

    /// One unit with a single sheet holding the given values
    pub fn sheet_with(cells: &[(&str, CellValue)]) -> Snapshot {
        let mut book = Workbook::new("book1");
        let ws = book.worksheet_mut(0).unwrap();
        for (address, value) in cells {
            ws.set_value(address, value.clone()).unwrap();
        }
        let mut snapshot = Snapshot::new();
        snapshot.add_unit(book).unwrap();
        snapshot
    }

    /// Evaluate in cell Z100 of the snapshot's first sheet, clock fixed at 2020-01-01
    pub fn eval_on(snapshot: &Snapshot, formula: &str) -> FormulaValue {
        let clock = FixedClock::on_date(2020, 1, 1).unwrap();
        let ctx = EvaluationContext::new(
            snapshot,
            FunctionRegistry::builtin(),
            CellLocation::new(0, 0, 99, 25),
        )
        .with_clock(&clock);
        evaluate_formula(formula, &ctx).unwrap()
    }

    pub fn eval(formula: &str) -> FormulaValue {
        eval_on(&sheet_with(&[]), formula)
    }

    pub fn num(n: f64) -> FormulaValue {
        FormulaValue::Number(n)
    }

    pub fn text(s: &str) -> FormulaValue {
        FormulaValue::String(s.to_string())
    }

    /// Rows of an array result
    pub fn rows(value: FormulaValue) -> Vec<Vec<FormulaValue>> {
        match value {
            FormulaValue::Array(arr) => arr.to_rows(),
            other => panic!("expected array, got {:?}", other),
        }
    }
}
