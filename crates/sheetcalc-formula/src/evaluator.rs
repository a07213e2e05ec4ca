//! Formula evaluator
//!
//! Walks a [`FormulaExpr`] against a [`CellSource`]. Every node produces an [`Operand`]:
//! a value, an unmaterialized [`Reference`], or a lambda closure. Spreadsheet errors are
//! ordinary values and flow upward like any other result; the only Rust-level failures
//! are internal ones such as exceeding the recursion limit.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use sheetcalc_core::{CellError, CellLocation, CellSource, SheetKey};

use crate::ast::{BinaryOperator, FormulaExpr};
use crate::clock::{Clock, SystemClock};
use crate::error::{FormulaError, FormulaResult};
use crate::functions::{CalcResult, EagerFn, FunctionRegistry, Implementation};
use crate::lambda::{LambdaId, LambdaRuntime};
use crate::parser::parse_formula;
use crate::reference::Reference;
use crate::value::{self, ArrayValue, FormulaValue};

/// Default nesting limit for one evaluation
pub const DEFAULT_MAX_DEPTH: usize = 256;

static SYSTEM_CLOCK: SystemClock = SystemClock;

/// An evaluated argument: a value, a reference or a lambda
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(FormulaValue),
    Reference(Reference),
    Lambda(LambdaId),
}

impl Operand {
    /// Dereference to a value; lambdas are `#CALC!`
    pub fn to_value(&self, source: &dyn CellSource) -> FormulaValue {
        match self {
            Operand::Value(v) => v.clone(),
            Operand::Reference(r) => r.to_value(source),
            Operand::Lambda(_) => FormulaValue::Error(CellError::Calc),
        }
    }

    /// Dereference to an array; scalars are 1×1 and an error value is returned as `Err`
    pub fn to_array(&self, source: &dyn CellSource) -> Result<ArrayValue, CellError> {
        match self {
            Operand::Value(FormulaValue::Error(e)) => Err(*e),
            Operand::Value(v) => Ok(v.clone().into_array()),
            Operand::Reference(r) => r.to_array_value(source),
            Operand::Lambda(_) => Err(CellError::Calc),
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Operand::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn lambda_id(&self) -> Option<LambdaId> {
        match self {
            Operand::Lambda(id) => Some(*id),
            _ => None,
        }
    }

    /// The error carried by an error value
    pub fn error(&self) -> Option<CellError> {
        match self {
            Operand::Value(v) => v.get_error(),
            _ => None,
        }
    }
}

impl From<FormulaValue> for Operand {
    fn from(value: FormulaValue) -> Self {
        Operand::Value(value)
    }
}

impl From<CellError> for Operand {
    fn from(error: CellError) -> Self {
        Operand::Value(FormulaValue::Error(error))
    }
}

/// Everything one formula evaluation needs
///
/// A context belongs to a single cell evaluation. It owns the lambda runtime for that
/// evaluation, so closures and bindings never outlive it.
pub struct EvaluationContext<'a> {
    source: &'a dyn CellSource,
    registry: &'a FunctionRegistry,
    clock: &'a dyn Clock,
    location: CellLocation,
    max_depth: usize,
    depth: Cell<usize>,
    lambdas: RefCell<LambdaRuntime>,
    fault: RefCell<Option<FormulaError>>,
}

impl<'a> EvaluationContext<'a> {
    /// Context for the formula at `location`, using the system clock
    pub fn new(
        source: &'a dyn CellSource,
        registry: &'a FunctionRegistry,
        location: CellLocation,
    ) -> Self {
        Self {
            source,
            registry,
            clock: &SYSTEM_CLOCK,
            location,
            max_depth: DEFAULT_MAX_DEPTH,
            depth: Cell::new(0),
            lambdas: RefCell::new(LambdaRuntime::new()),
            fault: RefCell::new(None),
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn source(&self) -> &'a dyn CellSource {
        self.source
    }

    pub fn registry(&self) -> &'a FunctionRegistry {
        self.registry
    }

    /// Cell holding the formula
    pub fn location(&self) -> CellLocation {
        self.location
    }

    pub fn sheet(&self) -> SheetKey {
        self.location.sheet_key()
    }

    /// Whether the formula's unit uses the 1904 date system
    pub fn date_1904(&self) -> bool {
        self.source.date_1904(self.location.unit)
    }

    pub fn now(&self) -> chrono::NaiveDateTime {
        self.clock.now()
    }

    // === Helpers for function implementations ===

    /// Dereference an operand against this context's source
    pub fn value(&self, operand: &Operand) -> FormulaValue {
        operand.to_value(self.source)
    }

    /// Materialize an operand as an array
    pub fn array(&self, operand: &Operand) -> Result<ArrayValue, CellError> {
        operand.to_array(self.source)
    }

    /// Evaluate an argument expression for a lazily-evaluated function
    ///
    /// Internal failures are recorded and reported after the function returns; the
    /// function itself sees `#CALC!`.
    pub fn evaluate_arg(&self, expr: &FormulaExpr) -> Operand {
        let result = evaluate_operand(expr, self);
        self.absorb(result)
    }

    /// Evaluate an argument expression and dereference it
    pub fn evaluate_value(&self, expr: &FormulaExpr) -> FormulaValue {
        let operand = self.evaluate_arg(expr);
        self.value(&operand)
    }

    /// Call a lambda operand; non-lambdas and arity mismatches are `#VALUE!`
    pub fn call_lambda(&self, callee: &Operand, args: Vec<Operand>) -> FormulaValue {
        let Some(id) = callee.lambda_id() else {
            return match callee.error() {
                Some(e) => FormulaValue::Error(e),
                None => FormulaValue::Error(CellError::Value),
            };
        };
        let result = self.invoke(id, args);
        let operand = self.absorb(result);
        self.value(&operand)
    }

    /// Parameter count of a lambda operand
    pub fn lambda_arity(&self, callee: &Operand) -> Option<usize> {
        self.lambdas.borrow().arity(callee.lambda_id()?)
    }

    /// Open a binding scope (`LET`)
    pub fn push_scope(&self) {
        self.lambdas.borrow_mut().push_frame();
    }

    /// Bind a name in the innermost scope
    pub fn bind(&self, name: &str, operand: Operand) {
        self.lambdas.borrow_mut().bind(name, operand);
    }

    pub fn pop_scope(&self) {
        self.lambdas.borrow_mut().pop_frame();
    }

    fn absorb(&self, result: FormulaResult<Operand>) -> Operand {
        match result {
            Ok(operand) => operand,
            Err(err) => {
                self.fault.borrow_mut().get_or_insert(err);
                Operand::from(CellError::Calc)
            }
        }
    }

    fn take_fault(&self) -> Option<FormulaError> {
        self.fault.borrow_mut().take()
    }

    fn invoke(&self, id: LambdaId, args: Vec<Operand>) -> FormulaResult<Operand> {
        let body = match self.lambdas.borrow().closure(id) {
            Some(closure) => Rc::clone(&closure.body),
            None => return Ok(Operand::from(CellError::Value)),
        };
        let Some(saved) = self.lambdas.borrow_mut().enter(id, args) else {
            return Ok(Operand::from(CellError::Value));
        };
        let result = evaluate_operand(&body, self);
        self.lambdas.borrow_mut().leave(saved);
        result
    }

    fn enter(&self) -> FormulaResult<DepthGuard<'_>> {
        let depth = self.depth.get() + 1;
        if depth > self.max_depth {
            return Err(FormulaError::Evaluation(format!(
                "formula nesting exceeds {} levels",
                self.max_depth
            )));
        }
        self.depth.set(depth);
        Ok(DepthGuard(&self.depth))
    }
}

struct DepthGuard<'c>(&'c Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Evaluate a formula to a value
///
/// References are dereferenced; a lambda left uncalled is `#CALC!`.
pub fn evaluate(expr: &FormulaExpr, ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let operand = evaluate_operand(expr, ctx)?;
    Ok(ctx.value(&operand))
}

/// Parse and evaluate formula text
pub fn evaluate_formula(formula: &str, ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let expr = parse_formula(formula)?;
    evaluate(&expr, ctx)
}

/// Evaluate an expression without dereferencing references
pub fn evaluate_operand(expr: &FormulaExpr, ctx: &EvaluationContext) -> FormulaResult<Operand> {
    let _guard = ctx.enter()?;

    match expr {
        // === Literals ===
        FormulaExpr::Number(n) => Ok(Operand::from(FormulaValue::Number(*n))),
        FormulaExpr::String(s) => Ok(Operand::from(FormulaValue::String(s.clone()))),
        FormulaExpr::Boolean(b) => Ok(Operand::from(FormulaValue::Boolean(*b))),
        FormulaExpr::Error(e) => Ok(Operand::from(*e)),
        FormulaExpr::Missing => Ok(Operand::from(FormulaValue::Empty)),

        // === References ===
        FormulaExpr::Reference(reference) => {
            Ok(match Reference::resolve(reference, ctx.source, ctx.sheet()) {
                Ok(r) => Operand::Reference(r),
                Err(e) => Operand::from(e),
            })
        }
        FormulaExpr::Name(name) => evaluate_name(name, ctx),

        // === Operators ===
        FormulaExpr::BinaryOp { op, left, right } if op.is_reference_operator() => {
            evaluate_reference_op(*op, left, right, ctx)
        }
        FormulaExpr::BinaryOp { op, left, right } => {
            // Both sides are evaluated even when the left one is already an error
            let l = evaluate(left, ctx)?;
            let r = evaluate(right, ctx)?;
            Ok(Operand::from(value::binary_op(*op, &l, &r)))
        }
        FormulaExpr::UnaryOp { op, operand } => {
            let v = evaluate(operand, ctx)?;
            Ok(Operand::from(value::unary_op(*op, &v)))
        }

        // === Calls ===
        FormulaExpr::Function { name, args } => evaluate_function(name, args, ctx),
        FormulaExpr::Lambda { params, body } => {
            let params: Rc<[String]> = params.iter().cloned().collect();
            let id = ctx
                .lambdas
                .borrow_mut()
                .define(params, Rc::new((**body).clone()));
            Ok(Operand::Lambda(id))
        }
        FormulaExpr::LambdaParameter(name) => {
            let bound = ctx.lambdas.borrow().lookup(name).cloned();
            Ok(bound.unwrap_or_else(|| Operand::from(CellError::Name)))
        }
        FormulaExpr::Invoke { callee, args } => {
            let callee = evaluate_operand(callee, ctx)?;
            let args = args
                .iter()
                .map(|a| evaluate_operand(a, ctx))
                .collect::<FormulaResult<Vec<_>>>()?;
            match callee {
                Operand::Lambda(id) => ctx.invoke(id, args),
                Operand::Value(FormulaValue::Error(e)) => Ok(Operand::from(e)),
                _ => Ok(Operand::from(CellError::Value)),
            }
        }

        // === Arrays ===
        FormulaExpr::Array(rows) => {
            let mut values = Vec::with_capacity(rows.len());
            for row in rows {
                let mut out = Vec::with_capacity(row.len());
                for element in row {
                    out.push(evaluate(element, ctx)?);
                }
                values.push(out);
            }
            Ok(Operand::from(FormulaValue::Array(ArrayValue::from_rows(values))))
        }
    }
}

fn evaluate_name(name: &str, ctx: &EvaluationContext) -> FormulaResult<Operand> {
    let Some(refers_to) = ctx.source.defined_name(ctx.sheet(), name) else {
        return Ok(Operand::from(CellError::Name));
    };
    match parse_formula(refers_to) {
        Ok(expr) => evaluate_operand(&expr, ctx),
        Err(err) => {
            log::warn!("defined name {} does not parse: {}", name, err);
            Ok(Operand::from(CellError::Name))
        }
    }
}

fn evaluate_reference_op(
    op: BinaryOperator,
    left: &FormulaExpr,
    right: &FormulaExpr,
    ctx: &EvaluationContext,
) -> FormulaResult<Operand> {
    let l = evaluate_operand(left, ctx)?;
    let r = evaluate_operand(right, ctx)?;
    let (a, b) = match (&l, &r) {
        (Operand::Reference(a), Operand::Reference(b)) => (a, b),
        _ => {
            let error = l.error().or_else(|| r.error()).unwrap_or(CellError::Value);
            return Ok(Operand::from(error));
        }
    };
    let combined = match op {
        BinaryOperator::Range => a.union_by(b),
        BinaryOperator::Union => a.union(b),
        _ => a.intersect(b),
    };
    Ok(combined.map_or_else(Operand::from, Operand::Reference))
}

fn evaluate_function(
    name: &str,
    args: &[FormulaExpr],
    ctx: &EvaluationContext,
) -> FormulaResult<Operand> {
    let Some(func) = ctx.registry.get(name) else {
        return Ok(Operand::from(CellError::Name));
    };
    if !func.accepts(args.len()) {
        return Ok(Operand::from(CellError::Na));
    }

    let result = match func.implementation() {
        Implementation::Lazy(f) => f(args, ctx),
        Implementation::Native(f) => {
            let operands = evaluate_args(args, ctx)?;
            f(&operands, ctx)
        }
        Implementation::Scalar(f) => {
            let operands = evaluate_args(args, ctx)?;
            lift_scalar(f.as_ref(), &operands, ctx)
        }
    };
    if let Some(fault) = ctx.take_fault() {
        return Err(fault);
    }
    Ok(Operand::from(result.unwrap_or_else(FormulaValue::Error)))
}

fn evaluate_args(args: &[FormulaExpr], ctx: &EvaluationContext) -> FormulaResult<Vec<Operand>> {
    args.iter().map(|a| evaluate_operand(a, ctx)).collect()
}

/// Call a scalar function once, or once per element when any argument is an array
fn lift_scalar(f: &EagerFn, operands: &[Operand], ctx: &EvaluationContext) -> CalcResult {
    let values: Vec<FormulaValue> = operands.iter().map(|o| ctx.value(o)).collect();
    if !values.iter().any(FormulaValue::is_array) {
        let scalars: Vec<Operand> = values.into_iter().map(Operand::Value).collect();
        return f(&scalars, ctx);
    }

    let (rows, cols) = values.iter().fold((1, 1), |(r, c), v| {
        let (vr, vc) = v.dimensions();
        (r.max(vr), c.max(vc))
    });
    let result = ArrayValue::try_from_fn(rows, cols, |r, c| {
        let mut scalars = Vec::with_capacity(values.len());
        for v in &values {
            let element = match v {
                FormulaValue::Array(arr) => arr.broadcast_get(r, c),
                scalar => Some(scalar),
            };
            match element {
                Some(e) => scalars.push(Operand::Value(e.clone())),
                None => return FormulaValue::Error(CellError::Value),
            }
        }
        match f(&scalars, ctx) {
            Ok(FormulaValue::Array(arr)) => arr.top_left().clone(),
            Ok(v) => v,
            Err(e) => FormulaValue::Error(e),
        }
    })?;
    Ok(FormulaValue::Array(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use pretty_assertions::assert_eq;
    use sheetcalc_core::{NamedRange, Snapshot, Workbook};

    fn snapshot() -> Snapshot {
        let mut book = Workbook::new("book1");
        let ws = book.worksheet_mut(0).unwrap();
        ws.set_value("A1", 1.0).unwrap();
        ws.set_value("A2", 2.0).unwrap();
        ws.set_value("A3", 3.0).unwrap();
        ws.set_value("B1", "test").unwrap();
        book.define_name(NamedRange::workbook_scope("Data", "=Sheet1!$A$1:$A$3"))
            .unwrap();
        book.define_name(NamedRange::workbook_scope("Loop", "=Loop+1"))
            .unwrap();
        let mut snapshot = Snapshot::new();
        snapshot.add_unit(book).unwrap();
        snapshot
    }

    fn eval_in(snapshot: &Snapshot, formula: &str) -> FormulaResult<FormulaValue> {
        let registry = FunctionRegistry::builtin();
        let ctx = EvaluationContext::new(snapshot, registry, CellLocation::new(0, 0, 9, 9));
        evaluate_formula(formula, &ctx)
    }

    fn eval(formula: &str) -> FormulaValue {
        eval_in(&snapshot(), formula).unwrap()
    }

    fn num(n: f64) -> FormulaValue {
        FormulaValue::Number(n)
    }

    fn err(e: CellError) -> FormulaValue {
        FormulaValue::Error(e)
    }

    #[test]
    fn test_evaluate_arithmetic() {
        assert_eq!(eval("=1+2*3"), num(7.0));
        assert_eq!(eval("=(1+2)*3"), num(9.0));
        assert_eq!(eval("=2^3^2"), num(512.0));
        assert_eq!(eval("=-2^2"), num(4.0));
        assert_eq!(eval("=50%"), num(0.5));
        assert_eq!(eval("=1/0"), err(CellError::Div0));
        assert_eq!(eval("=\"a\"&1"), FormulaValue::String("a1".into()));
    }

    #[test]
    fn test_evaluate_references() {
        assert_eq!(eval("=A1+A2"), num(3.0));
        assert_eq!(eval("=B1+1"), err(CellError::Value));
        assert_eq!(eval("=Z99"), FormulaValue::Empty);
        assert_eq!(eval("=Nope!A1"), err(CellError::Ref));
        assert_eq!(eval("=SUM(A1:A2 A2:A3)"), num(2.0));
        assert_eq!(eval("=SUM((A1,A3))"), num(4.0));
        assert_eq!(eval("=A1:A2 B1:B2"), err(CellError::Null));
    }

    #[test]
    fn test_array_results() {
        let FormulaValue::Array(arr) = eval("=A1:A3*2") else {
            panic!("expected array");
        };
        assert_eq!(arr.to_rows(), vec![vec![num(2.0)], vec![num(4.0)], vec![num(6.0)]]);
        assert_eq!(eval("=SUM({1,2;3,4}*{10;100})"), num(730.0));
    }

    #[test]
    fn test_names() {
        assert_eq!(eval("=SUM(Data)"), num(6.0));
        assert_eq!(eval("=SUM(data*2)"), num(12.0));
        assert_eq!(eval("=Undefined"), err(CellError::Name));
    }

    #[test]
    fn test_recursive_name_hits_depth_limit() {
        let result = eval_in(&snapshot(), "=Loop");
        assert!(matches!(result, Err(FormulaError::Evaluation(_))));
    }

    #[test]
    fn test_unknown_function_and_arity() {
        assert_eq!(eval("=NOSUCHFUNC(1)"), err(CellError::Name));
        assert_eq!(eval("=ABS()"), err(CellError::Na));
        assert_eq!(eval("=ABS(1,2)"), err(CellError::Na));
        assert_eq!(eval("=abs(-3)"), num(3.0));
    }

    #[test]
    fn test_scalar_functions_lift_over_arrays() {
        let FormulaValue::Array(arr) = eval("=ABS({-1,2,-3})") else {
            panic!("expected array");
        };
        assert_eq!(arr.to_rows(), vec![vec![num(1.0), num(2.0), num(3.0)]]);
    }

    #[test]
    fn test_if_short_circuits() {
        assert_eq!(eval("=IF(TRUE,1,1/0)"), num(1.0));
        assert_eq!(eval("=IF(FALSE,NOSUCH(),2)"), num(2.0));
        assert_eq!(eval("=IF(1/0,1,2)"), err(CellError::Div0));
    }

    #[test]
    fn test_lambda_and_let() {
        assert_eq!(eval("=LAMBDA(x, x*2)(21)"), num(42.0));
        assert_eq!(eval("=LET(a, 2, b, a*3, a+b)"), num(8.0));
        assert_eq!(eval("=LET(f, LAMBDA(v, v+A1), f(10))"), num(11.0));
        assert_eq!(eval("=LAMBDA(x, x)"), err(CellError::Calc));
        assert_eq!(eval("=LAMBDA(x, y, x)(1)"), err(CellError::Value));
        assert_eq!(eval("=LET(r, A1:A3, SUM(r))"), num(6.0));
    }

    #[test]
    fn test_today_with_fixed_clock() {
        let snapshot = snapshot();
        let clock = FixedClock::on_date(2020, 1, 1).unwrap();
        let ctx = EvaluationContext::new(&snapshot, FunctionRegistry::builtin(), CellLocation::new(0, 0, 0, 5))
            .with_clock(&clock);
        assert_eq!(evaluate_formula("=TODAY()", &ctx).unwrap(), num(43831.0));
    }
}
