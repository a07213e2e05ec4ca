//! Formula tokens

use std::fmt;

/// Token categories produced by the lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Numeric literal (`42`, `1.5e-3`)
    Number,
    /// String literal, text includes the surrounding quotes
    String,
    /// `TRUE` or `FALSE`
    Boolean,
    /// Error literal (`#N/A`)
    Error,
    /// Cell, range, whole-row or whole-column reference, with any sheet/unit prefix
    Reference,
    /// Defined name or lambda parameter
    Name,
    /// Identifier immediately followed by `(`; text excludes the parenthesis
    Function,
    /// Arithmetic, comparison, concatenation, range (`:`) or intersection (` `) operator
    Operator,
    /// `,` or `;`
    Separator,
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
}

/// A lexed token: kind, raw source text and byte offset into the formula
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, offset: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            offset,
        }
    }

    /// Whether this is the operator `op`
    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.text == op
    }

    /// Whether this is the separator `sep`
    pub fn is_separator(&self, sep: &str) -> bool {
        self.kind == TokenKind::Separator && self.text == sep
    }

    /// Whether a value can end at this token (used to spot intersections)
    pub(crate) fn ends_operand(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Reference | TokenKind::Name | TokenKind::CloseParen
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            TokenKind::Number => "NUM",
            TokenKind::String => "STR",
            TokenKind::Boolean => "BOOL",
            TokenKind::Error => "ERR",
            TokenKind::Reference => "REF",
            TokenKind::Name => "NAME",
            TokenKind::Function => "FUNC",
            TokenKind::Operator => "OP",
            TokenKind::Separator => "SEP",
            TokenKind::OpenParen => return f.write_str("("),
            TokenKind::CloseParen => return f.write_str(")"),
            TokenKind::OpenBrace => return f.write_str("{"),
            TokenKind::CloseBrace => return f.write_str("}"),
        };
        write!(f, "{}({})", tag, self.text)
    }
}
