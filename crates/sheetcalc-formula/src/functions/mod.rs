//! Function library
//!
//! Every function is described by a [`FunctionDescriptor`]: its name, category, arity,
//! volatility, calling mode and locale-keyed help text. Built-ins are registered once into
//! a shared registry; hosts clone it and register their own functions on top.
//!
//! Calling modes:
//! - [`FunctionMode::Scalar`]: arguments arrive as scalar values. If any argument is an
//!   array the function is called once per element with broadcasting.
//! - [`FunctionMode::Native`]: arguments arrive as evaluated [`Operand`]s, references
//!   unmaterialized, so the function can iterate ranges itself.
//! - [`FunctionMode::Lazy`]: arguments arrive as expressions and the function evaluates
//!   only the ones it needs (`IF`, `IFERROR`, `LET`, ...).

pub mod criteria;
pub mod date;
pub mod higher_order;
pub mod info;
pub mod logical;
pub mod lookup;
pub mod math;
pub mod statistical;
pub mod text;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use once_cell::sync::Lazy;
use sheetcalc_core::CellError;

use crate::ast::FormulaExpr;
use crate::error::{FormulaError, FormulaResult};
use crate::evaluator::{EvaluationContext, Operand};
use crate::value::FormulaValue;

/// Result of a function call; `Err` is an error value, not a failure
pub type CalcResult = Result<FormulaValue, CellError>;

/// Signature of scalar and native implementations
pub type EagerFn = dyn Fn(&[Operand], &EvaluationContext<'_>) -> CalcResult + Send + Sync;

/// Signature of lazy implementations
pub type LazyFn = dyn Fn(&[FormulaExpr], &EvaluationContext<'_>) -> CalcResult + Send + Sync;

/// Function category, used for grouping in catalogues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionCategory {
    Math,
    Statistical,
    Logical,
    Text,
    Information,
    Date,
    Lookup,
    Lambda,
    /// Contributed by the host
    User,
}

impl FunctionCategory {
    pub const ALL: [FunctionCategory; 9] = [
        FunctionCategory::Math,
        FunctionCategory::Statistical,
        FunctionCategory::Logical,
        FunctionCategory::Text,
        FunctionCategory::Information,
        FunctionCategory::Date,
        FunctionCategory::Lookup,
        FunctionCategory::Lambda,
        FunctionCategory::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionCategory::Math => "math",
            FunctionCategory::Statistical => "statistical",
            FunctionCategory::Logical => "logical",
            FunctionCategory::Text => "text",
            FunctionCategory::Information => "information",
            FunctionCategory::Date => "date",
            FunctionCategory::Lookup => "lookup",
            FunctionCategory::Lambda => "lambda",
            FunctionCategory::User => "user",
        }
    }

    /// Parse a category name (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for FunctionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How arguments are passed to an implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionMode {
    Scalar,
    Native,
    Lazy,
}

/// A bound implementation
#[derive(Clone)]
pub enum Implementation {
    Scalar(Arc<EagerFn>),
    Native(Arc<EagerFn>),
    Lazy(Arc<LazyFn>),
}

impl Implementation {
    pub fn mode(&self) -> FunctionMode {
        match self {
            Implementation::Scalar(_) => FunctionMode::Scalar,
            Implementation::Native(_) => FunctionMode::Native,
            Implementation::Lazy(_) => FunctionMode::Lazy,
        }
    }
}

/// Everything the registry knows about one function
#[derive(Clone)]
pub struct FunctionDescriptor {
    name: String,
    category: FunctionCategory,
    min_args: usize,
    max_args: Option<usize>,
    volatile: bool,
    implementation: Implementation,
    help: BTreeMap<String, String>,
}

impl FunctionDescriptor {
    /// Start describing a function
    pub fn builder(name: impl Into<String>, category: FunctionCategory) -> FunctionBuilder {
        FunctionBuilder {
            name: name.into(),
            category,
            min_args: 0,
            max_args: Some(0),
            volatile: false,
            implementation: None,
            help: BTreeMap::new(),
        }
    }

    /// Upper-case name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> FunctionCategory {
        self.category
    }

    pub fn min_args(&self) -> usize {
        self.min_args
    }

    /// `None` when the last parameter repeats without limit
    pub fn max_args(&self) -> Option<usize> {
        self.max_args
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile
    }

    pub fn mode(&self) -> FunctionMode {
        self.implementation.mode()
    }

    pub fn implementation(&self) -> &Implementation {
        &self.implementation
    }

    /// Whether `count` arguments satisfy the declared arity
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }

    /// Help text for a locale
    ///
    /// Falls back from `de-CH` to `de`, then to `en`.
    pub fn help(&self, locale: &str) -> Option<&str> {
        let locale = locale.to_ascii_lowercase();
        let language = locale.split(['-', '_']).next().unwrap_or_default();
        self.help
            .get(&locale)
            .or_else(|| self.help.get(language))
            .or_else(|| self.help.get("en"))
            .map(String::as_str)
    }

    /// Locales with help text
    pub fn help_locales(&self) -> impl Iterator<Item = &str> {
        self.help.keys().map(String::as_str)
    }

    /// Arity as shown in catalogues: `1`, `1..3`, `1..`
    pub fn arity_label(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{}..{}", self.min_args, max),
            None => format!("{}..", self.min_args),
        }
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("volatile", &self.volatile)
            .field("mode", &self.mode())
            .finish()
    }
}

/// Builder for [`FunctionDescriptor`]
pub struct FunctionBuilder {
    name: String,
    category: FunctionCategory,
    min_args: usize,
    max_args: Option<usize>,
    volatile: bool,
    implementation: Option<Implementation>,
    help: BTreeMap<String, String>,
}

impl FunctionBuilder {
    /// Fixed argument range
    pub fn args(mut self, min: usize, max: usize) -> Self {
        self.min_args = min;
        self.max_args = Some(max);
        self
    }

    /// At least `min` arguments, the last one repeating
    pub fn repeatable(mut self, min: usize) -> Self {
        self.min_args = min;
        self.max_args = None;
        self
    }

    /// Re-evaluate on every recalculation pass
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    pub fn scalar<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Operand], &EvaluationContext<'_>) -> CalcResult + Send + Sync + 'static,
    {
        self.implementation = Some(Implementation::Scalar(Arc::new(f)));
        self
    }

    pub fn native<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Operand], &EvaluationContext<'_>) -> CalcResult + Send + Sync + 'static,
    {
        self.implementation = Some(Implementation::Native(Arc::new(f)));
        self
    }

    pub fn lazy<F>(mut self, f: F) -> Self
    where
        F: Fn(&[FormulaExpr], &EvaluationContext<'_>) -> CalcResult + Send + Sync + 'static,
    {
        self.implementation = Some(Implementation::Lazy(Arc::new(f)));
        self
    }

    /// Help text for a locale such as `en` or `de-CH`
    pub fn help(mut self, locale: &str, text: impl Into<String>) -> Self {
        self.help.insert(locale.to_ascii_lowercase(), text.into());
        self
    }

    /// Validate and finish
    pub fn build(self) -> FormulaResult<FunctionDescriptor> {
        let name = self.name.trim().to_uppercase();
        if name.is_empty() {
            return Err(FormulaError::Registration(
                "function name cannot be empty".into(),
            ));
        }
        if !name.starts_with(|c: char| c.is_alphabetic() || c == '_')
            || !name.chars().all(|c| c.is_alphanumeric() || c == '.' || c == '_')
        {
            return Err(FormulaError::Registration(format!(
                "invalid function name '{}'",
                name
            )));
        }
        if let Some(max) = self.max_args {
            if self.min_args > max {
                return Err(FormulaError::Registration(format!(
                    "{}: minimum of {} arguments exceeds maximum of {}",
                    name, self.min_args, max
                )));
            }
        }
        let Some(implementation) = self.implementation else {
            return Err(FormulaError::Registration(format!(
                "{}: no implementation bound",
                name
            )));
        };
        Ok(FunctionDescriptor {
            name,
            category: self.category,
            min_args: self.min_args,
            max_args: self.max_args,
            volatile: self.volatile,
            implementation,
            help: self.help,
        })
    }
}

static BUILTINS: Lazy<FunctionRegistry> = Lazy::new(|| {
    let mut registry = FunctionRegistry::empty();
    math::register(&mut registry);
    statistical::register(&mut registry);
    logical::register(&mut registry);
    text::register(&mut registry);
    info::register(&mut registry);
    date::register(&mut registry);
    lookup::register(&mut registry);
    higher_order::register(&mut registry);
    log::debug!("registered {} built-in functions", registry.len());
    registry
});

/// Function lookup table, keyed by upper-case name
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: AHashMap<String, Arc<FunctionDescriptor>>,
}

impl FunctionRegistry {
    /// A registry holding every built-in function
    pub fn new() -> Self {
        Self::builtin().clone()
    }

    /// A registry with no functions
    pub fn empty() -> Self {
        Self::default()
    }

    /// The shared built-in registry
    pub fn builtin() -> &'static FunctionRegistry {
        &BUILTINS
    }

    /// Add or replace a function, returning the one it replaced
    pub fn register(&mut self, descriptor: FunctionDescriptor) -> Option<Arc<FunctionDescriptor>> {
        let previous = self
            .functions
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        if let Some(previous) = &previous {
            log::debug!("function {} replaced", previous.name);
        }
        previous
    }

    /// Look up a function by name (case-insensitive, `_xlfn.` prefix ignored)
    pub fn get(&self, name: &str) -> Option<&Arc<FunctionDescriptor>> {
        let upper = name.to_uppercase();
        let key = upper.strip_prefix("_XLFN.").unwrap_or(&upper);
        self.functions.get(key)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether a function is registered and volatile
    pub fn is_volatile(&self, name: &str) -> bool {
        self.get(name).map_or(false, |f| f.is_volatile())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Every descriptor, sorted by name
    pub fn descriptors(&self) -> Vec<&Arc<FunctionDescriptor>> {
        let mut all: Vec<_> = self.functions.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    fn add(&mut self, builder: FunctionBuilder) {
        match builder.build() {
            Ok(descriptor) => {
                self.register(descriptor);
            }
            Err(err) => log::error!("built-in function rejected: {}", err),
        }
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.len())
            .finish()
    }
}

// === Argument helpers ===

static EMPTY: FormulaValue = FormulaValue::Empty;

/// Scalar argument `index` (scalar mode), `Empty` when omitted
pub(crate) fn scalar(args: &[Operand], index: usize) -> &FormulaValue {
    match args.get(index) {
        Some(Operand::Value(v)) => v,
        _ => &EMPTY,
    }
}

/// Whether argument `index` was omitted or left blank
pub(crate) fn is_omitted(args: &[Operand], index: usize) -> bool {
    matches!(args.get(index), None | Some(Operand::Value(FormulaValue::Empty)))
}

pub(crate) fn number(args: &[Operand], index: usize) -> Result<f64, CellError> {
    scalar(args, index).to_number()
}

/// Number argument, or `default` when omitted
pub(crate) fn number_or(args: &[Operand], index: usize, default: f64) -> Result<f64, CellError> {
    if is_omitted(args, index) {
        Ok(default)
    } else {
        number(args, index)
    }
}

pub(crate) fn text(args: &[Operand], index: usize) -> Result<String, CellError> {
    scalar(args, index).to_text()
}

pub(crate) fn boolean(args: &[Operand], index: usize) -> Result<bool, CellError> {
    scalar(args, index).to_bool()
}

/// One value seen while flattening aggregate arguments
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Flat {
    pub value: FormulaValue,
    /// Typed directly as an argument, not read from a reference or array
    pub direct: bool,
}

/// Flatten arguments into individual values, reading references through the context
pub(crate) fn flatten(args: &[Operand], ctx: &EvaluationContext) -> Vec<Flat> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Operand::Value(FormulaValue::Array(arr)) => out.extend(arr.iter().map(|v| Flat {
                value: v.clone(),
                direct: false,
            })),
            Operand::Value(v) => out.push(Flat {
                value: v.clone(),
                direct: true,
            }),
            Operand::Reference(r) => out.extend(r.values(ctx.source()).into_iter().map(|value| Flat {
                value,
                direct: false,
            })),
            Operand::Lambda(_) => out.push(Flat {
                value: FormulaValue::Error(CellError::Calc),
                direct: true,
            }),
        }
    }
    out
}

/// Numbers for SUM-style aggregates
///
/// Text and booleans from references or arrays are skipped. Direct arguments are coerced,
/// non-numeric text being `#VALUE!`. Any error value is returned.
pub(crate) fn collect_numbers(args: &[Operand], ctx: &EvaluationContext) -> Result<Vec<f64>, CellError> {
    let mut numbers = Vec::new();
    for Flat { value, direct } in flatten(args, ctx) {
        match value {
            FormulaValue::Number(n) => numbers.push(n),
            FormulaValue::Error(e) => return Err(e),
            FormulaValue::Empty => {}
            other if direct => numbers.push(other.to_number()?),
            _ => {}
        }
    }
    Ok(numbers)
}

/// Numbers for the `A` aggregates: text in references counts as 0, booleans as 0/1
pub(crate) fn collect_numbers_a(args: &[Operand], ctx: &EvaluationContext) -> Result<Vec<f64>, CellError> {
    let mut numbers = Vec::new();
    for Flat { value, direct } in flatten(args, ctx) {
        match value {
            FormulaValue::Number(n) => numbers.push(n),
            FormulaValue::Error(e) => return Err(e),
            FormulaValue::Empty => {}
            FormulaValue::Boolean(b) => numbers.push(if b { 1.0 } else { 0.0 }),
            other if direct => numbers.push(other.to_number()?),
            _ => numbers.push(0.0),
        }
    }
    Ok(numbers)
}

/// Convert an `f64` result to a value, rejecting NaN and infinities
pub(crate) fn number_result(n: f64) -> CalcResult {
    crate::value::finite(n).map(FormulaValue::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &[Operand], _: &EvaluationContext) -> CalcResult {
        Ok(FormulaValue::Empty)
    }

    #[test]
    fn test_builtin_lookup_is_case_insensitive() {
        let registry = FunctionRegistry::builtin();
        assert!(registry.contains("sum"));
        assert!(registry.contains("Sum"));
        assert!(registry.contains("_xlfn.XLOOKUP"));
        assert!(!registry.contains("NOPE"));
        assert!(registry.is_volatile("rand"));
        assert!(!registry.is_volatile("SUM"));
        assert_eq!(registry.get("IF").map(|f| f.mode()), Some(FunctionMode::Lazy));
        assert_eq!(registry.get("SUM").map(|f| f.mode()), Some(FunctionMode::Native));
        assert_eq!(registry.get("ABS").map(|f| f.mode()), Some(FunctionMode::Scalar));
    }

    #[test]
    fn test_every_builtin_has_english_help() {
        for f in FunctionRegistry::builtin().descriptors() {
            assert!(f.help("en").is_some(), "{} has no help", f.name());
        }
    }

    #[test]
    fn test_builder_validation() {
        let empty = FunctionDescriptor::builder("  ", FunctionCategory::User).native(noop).build();
        assert!(matches!(empty, Err(FormulaError::Registration(_))));

        let bad_arity = FunctionDescriptor::builder("F", FunctionCategory::User)
            .args(3, 1)
            .native(noop)
            .build();
        assert!(matches!(bad_arity, Err(FormulaError::Registration(_))));

        let unbound = FunctionDescriptor::builder("F", FunctionCategory::User).build();
        assert!(matches!(unbound, Err(FormulaError::Registration(_))));

        let bad_name = FunctionDescriptor::builder("1F", FunctionCategory::User).native(noop).build();
        assert!(matches!(bad_name, Err(FormulaError::Registration(_))));
    }

    #[test]
    fn test_help_fallback_and_arity() {
        let f = FunctionDescriptor::builder("double", FunctionCategory::User)
            .args(1, 1)
            .scalar(noop)
            .help("en", "Doubles a number")
            .help("de", "Verdoppelt eine Zahl")
            .build()
            .unwrap();
        assert_eq!(f.name(), "DOUBLE");
        assert_eq!(f.help("de-CH"), Some("Verdoppelt eine Zahl"));
        assert_eq!(f.help("fr"), Some("Doubles a number"));
        assert_eq!(f.arity_label(), "1");
        assert!(f.accepts(1));
        assert!(!f.accepts(2));

        let mut registry = FunctionRegistry::empty();
        assert!(registry.register(f.clone()).is_none());
        assert!(registry.register(f).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(FunctionCategory::parse("Lookup"), Some(FunctionCategory::Lookup));
        assert_eq!(FunctionCategory::parse("nope"), None);
    }
}
