//! Formula Abstract Syntax Tree types

use sheetcalc_core::{CellError, CellRange};

/// Formula expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaExpr {
    // === Literals ===
    /// Numeric literal
    Number(f64),
    /// String literal (quotes removed, `""` unescaped)
    String(String),
    /// Boolean literal
    Boolean(bool),
    /// Error literal
    Error(CellError),
    /// Omitted argument, as in `IF(A1,,1)`
    Missing,

    // === References ===
    /// Cell, range, row or column reference
    Reference(ReferenceExpr),
    /// Defined name
    Name(String),

    // === Operators ===
    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },
    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        operand: Box<FormulaExpr>,
    },

    // === Calls ===
    /// Function call by name
    Function { name: String, args: Vec<FormulaExpr> },
    /// `LAMBDA(params..., body)`
    Lambda {
        params: Vec<String>,
        body: Box<FormulaExpr>,
    },
    /// A name bound by an enclosing `LET` or `LAMBDA`
    LambdaParameter(String),
    /// Call of a lambda value: `LAMBDA(x, x+1)(2)` or `f(2)` with `f` bound
    Invoke {
        callee: Box<FormulaExpr>,
        args: Vec<FormulaExpr>,
    },

    // === Array ===
    /// Array constant, outer Vec is rows
    Array(Vec<Vec<FormulaExpr>>),
}

impl FormulaExpr {
    /// Visit this node and every descendant, parents first
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a FormulaExpr)) {
        visit(self);
        match self {
            FormulaExpr::BinaryOp { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            FormulaExpr::UnaryOp { operand, .. } => operand.walk(visit),
            FormulaExpr::Function { args, .. } => args.iter().for_each(|a| a.walk(visit)),
            FormulaExpr::Lambda { body, .. } => body.walk(visit),
            FormulaExpr::Invoke { callee, args } => {
                callee.walk(visit);
                args.iter().for_each(|a| a.walk(visit));
            }
            FormulaExpr::Array(rows) => rows.iter().flatten().for_each(|e| e.walk(visit)),
            FormulaExpr::Number(_)
            | FormulaExpr::String(_)
            | FormulaExpr::Boolean(_)
            | FormulaExpr::Error(_)
            | FormulaExpr::Missing
            | FormulaExpr::Reference(_)
            | FormulaExpr::Name(_)
            | FormulaExpr::LambdaParameter(_) => {}
        }
    }
}

/// What a reference literal names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// A single cell
    Cell,
    /// A rectangular block of cells
    Range,
    /// Whole rows (`2:5`)
    Row,
    /// Whole columns (`A:C`)
    Column,
}

/// A reference literal with optional unit and sheet qualifiers
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceExpr {
    /// Unit id from a `[Book]` prefix
    pub unit: Option<String>,
    /// Sheet name from a `Sheet!` prefix
    pub sheet: Option<String>,
    pub kind: RefKind,
    /// The area; rows and columns span the full grid for `Row`/`Column`
    pub range: CellRange,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,

    // Text
    Concat,

    // Reference
    Range,
    Union,
    Intersect,
}

impl BinaryOperator {
    /// Whether the operator is one of the six comparisons
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::LessThan
                | BinaryOperator::LessEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterEqual
        )
    }

    /// Whether the operator combines references rather than values
    pub fn is_reference_operator(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Range | BinaryOperator::Union | BinaryOperator::Intersect
        )
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Negate,
    Percent,
}
