//! Formula error types
//!
//! These are host-level failures: malformed formula text, bad function registrations and
//! internal misuse. Spreadsheet error *values* such as `#DIV/0!` are not represented here;
//! they flow through evaluation as [`crate::FormulaValue::Error`].

use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Errors raised by the lexer, parser, registry or evaluator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    /// Formula text could not be tokenized
    #[error("Lex error at offset {offset}: {message}")]
    Lex { message: String, offset: usize },

    /// Token stream could not be parsed
    #[error("Parse error at token {position}: expected {expected}, found {found}")]
    Parse {
        /// Index of the offending token (token count for end of input)
        position: usize,
        expected: String,
        found: String,
    },

    /// A function descriptor was rejected by the registry
    #[error("Invalid function registration: {0}")]
    Registration(String),

    /// Evaluation could not proceed (e.g. recursion limit)
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Reference text could not be resolved
    #[error("Invalid reference: {0}")]
    InvalidReference(String),
}

impl FormulaError {
    pub(crate) fn lex(message: impl Into<String>, offset: usize) -> Self {
        FormulaError::Lex {
            message: message.into(),
            offset,
        }
    }

    pub(crate) fn parse(
        position: usize,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        FormulaError::Parse {
            position,
            expected: expected.into(),
            found: found.into(),
        }
    }
}
