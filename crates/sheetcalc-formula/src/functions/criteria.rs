//! Criteria used by SUMIF, COUNTIF, AVERAGEIF and their multi-criteria forms
//!
//! A criterion is either a plain value (`5`, `"apple"`, `TRUE`) or a string starting with
//! a comparison operator (`">=10"`, `"<>done"`). Text matches are case-insensitive and
//! support `*` and `?` wildcards, with `~` escaping a literal wildcard.

use std::cmp::Ordering;

use regex::Regex;
use sheetcalc_core::CellError;

use crate::value::{parse_number_text, FormulaValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

impl Op {
    fn test(self, ordering: Ordering) -> bool {
        match self {
            Op::Equal => ordering == Ordering::Equal,
            Op::NotEqual => ordering != Ordering::Equal,
            Op::LessThan => ordering == Ordering::Less,
            Op::LessEqual => ordering != Ordering::Greater,
            Op::GreaterThan => ordering == Ordering::Greater,
            Op::GreaterEqual => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone)]
enum Target {
    Number(f64),
    Boolean(bool),
    Error(CellError),
    /// Lower-cased text; `pattern` is set when it holds wildcards
    Text { text: String, pattern: Option<Regex> },
    Blank,
}

/// A compiled criterion
#[derive(Debug, Clone)]
pub struct Criteria {
    op: Op,
    target: Target,
}

impl Criteria {
    /// Compile a criterion value
    pub fn new(criteria: &FormulaValue) -> Self {
        match criteria.scalar() {
            FormulaValue::Number(n) => Self::equal(Target::Number(*n)),
            FormulaValue::Boolean(b) => Self::equal(Target::Boolean(*b)),
            FormulaValue::Error(e) => Self::equal(Target::Error(*e)),
            FormulaValue::Empty => Self::equal(Target::Blank),
            FormulaValue::String(s) => Self::parse(s),
            FormulaValue::Array(_) => Self::equal(Target::Blank),
        }
    }

    fn equal(target: Target) -> Self {
        Self {
            op: Op::Equal,
            target,
        }
    }

    fn parse(s: &str) -> Self {
        let (op, rest) = [
            (">=", Op::GreaterEqual),
            ("<=", Op::LessEqual),
            ("<>", Op::NotEqual),
            (">", Op::GreaterThan),
            ("<", Op::LessThan),
            ("=", Op::Equal),
        ]
        .iter()
        .find_map(|(prefix, op)| s.strip_prefix(prefix).map(|rest| (*op, rest)))
        .unwrap_or((Op::Equal, s));

        let target = if rest.is_empty() {
            Target::Blank
        } else if let Some(n) = parse_number_text(rest) {
            Target::Number(n)
        } else if rest.eq_ignore_ascii_case("TRUE") {
            Target::Boolean(true)
        } else if rest.eq_ignore_ascii_case("FALSE") {
            Target::Boolean(false)
        } else if let Some(e) = CellError::parse(rest) {
            Target::Error(e)
        } else {
            let text = rest.to_lowercase();
            let pattern = matches!(op, Op::Equal | Op::NotEqual)
                .then(|| wildcard_regex(&text, true))
                .flatten();
            Target::Text { text, pattern }
        };
        Self { op, target }
    }

    /// Whether a cell value satisfies the criterion
    pub fn matches(&self, value: &FormulaValue) -> bool {
        match &self.target {
            Target::Blank => {
                let blank = match value {
                    FormulaValue::Empty => true,
                    FormulaValue::String(s) => s.is_empty(),
                    _ => false,
                };
                match self.op {
                    Op::NotEqual => !blank,
                    _ => blank,
                }
            }
            Target::Number(target) => match value {
                FormulaValue::Number(n) => self.op.test(n.partial_cmp(target).unwrap_or(Ordering::Equal)),
                _ => self.op == Op::NotEqual,
            },
            Target::Boolean(target) => match value {
                FormulaValue::Boolean(b) => self.op.test(b.cmp(target)),
                _ => self.op == Op::NotEqual,
            },
            Target::Error(target) => match value {
                FormulaValue::Error(e) => self.op.test(e.cmp(target)),
                _ => self.op == Op::NotEqual,
            },
            Target::Text { text, pattern } => match value {
                FormulaValue::String(s) => {
                    let candidate = s.to_lowercase();
                    match pattern {
                        Some(re) => re.is_match(&candidate) == (self.op == Op::Equal),
                        None => self.op.test(candidate.cmp(text)),
                    }
                }
                FormulaValue::Empty if self.op == Op::NotEqual => true,
                _ => self.op == Op::NotEqual,
            },
        }
    }
}

/// Compile `*`/`?` wildcards into a regex; `None` when there are none
fn wildcard_regex(pattern: &str, anchored: bool) -> Option<Regex> {
    if !pattern.contains(['*', '?']) {
        return None;
    }
    let mut re = String::from(if anchored { "(?s)^" } else { "(?s)" });
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '~' => match chars.next() {
                Some(escaped) => re.push_str(&regex::escape(&escaped.to_string())),
                None => re.push('~'),
            },
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    if anchored {
        re.push('$');
    }
    Regex::new(&re).ok()
}

/// Case-insensitive wildcard matcher for lookups, `None` when the pattern has no wildcards
pub(crate) fn wildcard_matcher(pattern: &str) -> Option<Regex> {
    wildcard_regex(&pattern.to_lowercase(), true)
}

/// Unanchored form of [`wildcard_matcher`], for finding a match inside text
pub(crate) fn wildcard_finder(pattern: &str) -> Option<Regex> {
    wildcard_regex(&pattern.to_lowercase(), false)
}
