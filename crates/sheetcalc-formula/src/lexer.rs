//! Formula lexer
//!
//! Turns formula text into a flat token stream. References are recognized whole, so
//! `Sheet1!A1:B2` is a single [`TokenKind::Reference`] token. Whitespace is dropped except
//! where it separates two reference operands, in which case it becomes the intersection
//! operator (a single-space [`TokenKind::Operator`] token).

use lazy_regex::regex;

use crate::error::{FormulaError, FormulaResult};
use crate::token::{Token, TokenKind};
use sheetcalc_core::CellError;

/// Tokenize formula text
///
/// A single leading `=` is skipped. Offsets in the returned tokens are byte offsets into
/// `text` as given.
///
/// # Example
/// ```rust
/// use sheetcalc_formula::tokenize;
///
/// let tokens = tokenize("=A1+B1*2").unwrap();
/// let shown: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
/// assert_eq!(shown, ["REF(A1)", "OP(+)", "REF(B1)", "OP(*)", "NUM(2)"]);
/// ```
pub fn tokenize(text: &str) -> FormulaResult<Vec<Token>> {
    Lexer::new(text).run()
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    tokens: Vec<Token>,
    /// Offsets of currently open `{`
    open_braces: Vec<usize>,
    saw_space: bool,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        let start = input
            .char_indices()
            .find(|(_, c)| !c.is_whitespace())
            .map_or(input.len(), |(i, c)| if c == '=' { i + 1 } else { i });
        Self {
            input,
            pos: start,
            tokens: Vec::new(),
            open_braces: Vec::new(),
            saw_space: false,
        }
    }

    fn run(mut self) -> FormulaResult<Vec<Token>> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
                self.saw_space = true;
                continue;
            }

            let start = self.pos;
            match c {
                '"' => self.lex_string()?,
                '#' => self.lex_error_literal()?,
                '{' => {
                    self.open_braces.push(start);
                    self.single(TokenKind::OpenBrace, 1);
                }
                '}' => {
                    self.open_braces.pop();
                    self.single(TokenKind::CloseBrace, 1);
                }
                '(' => self.single(TokenKind::OpenParen, 1),
                ')' => self.single(TokenKind::CloseParen, 1),
                ',' | ';' => self.single(TokenKind::Separator, 1),
                '<' | '>' => {
                    let rest = self.rest();
                    let len = if rest.starts_with("<=") || rest.starts_with(">=") || rest.starts_with("<>") {
                        2
                    } else {
                        1
                    };
                    self.single(TokenKind::Operator, len);
                }
                '+' | '-' | '*' | '/' | '^' | '&' | '=' | '%' | ':' => {
                    self.single(TokenKind::Operator, 1)
                }
                '0'..='9' | '.' => self.lex_number_or_rows()?,
                '$' | '\'' | '[' => self.lex_reference_or_identifier()?,
                c if c.is_alphabetic() || c == '_' || c == '\\' => {
                    self.lex_reference_or_identifier()?
                }
                other => {
                    return Err(FormulaError::lex(
                        format!("unexpected character '{}'", other),
                        start,
                    ))
                }
            }
        }

        if let Some(&offset) = self.open_braces.first() {
            return Err(FormulaError::lex("unterminated array literal", offset));
        }

        log::trace!("tokenized {:?} into {} tokens", self.input, self.tokens.len());
        Ok(self.tokens)
    }

    // === Scanning helpers ===

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn char_after(&self, len: usize) -> Option<char> {
        self.input[self.pos + len..].chars().next()
    }

    fn single(&mut self, kind: TokenKind, len: usize) {
        let text = &self.input[self.pos..self.pos + len];
        self.push(kind, text.to_string(), self.pos);
        self.pos += len;
    }

    fn push(&mut self, kind: TokenKind, text: String, offset: usize) {
        let starts_operand = matches!(
            kind,
            TokenKind::Reference | TokenKind::Name | TokenKind::Function | TokenKind::OpenParen
        );
        if self.saw_space && starts_operand {
            if let Some(prev) = self.tokens.last() {
                if prev.ends_operand() {
                    let at = offset.saturating_sub(1);
                    self.tokens.push(Token::new(TokenKind::Operator, " ", at));
                }
            }
        }
        self.saw_space = false;
        self.tokens.push(Token::new(kind, text, offset));
    }

    // === Token scanners ===

    fn lex_string(&mut self) -> FormulaResult<()> {
        let start = self.pos;
        let bytes = self.input.as_bytes();
        let mut i = start + 1;
        loop {
            match bytes.get(i) {
                None => return Err(FormulaError::lex("unterminated string literal", start)),
                Some(b'"') if bytes.get(i + 1) == Some(&b'"') => i += 2,
                Some(b'"') => {
                    i += 1;
                    break;
                }
                Some(_) => i += 1,
            }
        }
        let text = self.input[start..i].to_string();
        self.push(TokenKind::String, text, start);
        self.pos = i;
        Ok(())
    }

    fn lex_error_literal(&mut self) -> FormulaResult<()> {
        let start = self.pos;
        let rest = self.rest();
        let matched = CellError::ALL
            .iter()
            .map(|e| e.as_str())
            .filter(|s| {
                rest.len() >= s.len()
                    && rest.is_char_boundary(s.len())
                    && rest[..s.len()].eq_ignore_ascii_case(s)
            })
            .max_by_key(|s| s.len())
            .ok_or_else(|| FormulaError::lex("unknown error literal", start))?;
        self.push(TokenKind::Error, matched.to_string(), start);
        self.pos += matched.len();
        Ok(())
    }

    fn lex_number_or_rows(&mut self) -> FormulaResult<()> {
        let start = self.pos;
        if let Some(m) = regex!(r"^\$?[0-9]+:\$?[0-9]+").find(self.rest()) {
            if !is_identifier_char(self.char_after(m.end())) {
                self.push(TokenKind::Reference, m.as_str().to_string(), start);
                self.pos += m.end();
                return Ok(());
            }
        }

        let m = regex!(r"^(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+)?")
            .find(self.rest())
            .ok_or_else(|| FormulaError::lex("malformed number", start))?;
        self.push(TokenKind::Number, m.as_str().to_string(), start);
        self.pos += m.end();
        Ok(())
    }

    fn lex_reference_or_identifier(&mut self) -> FormulaResult<()> {
        let start = self.pos;
        let rest = self.rest();

        if let Some(prefix) = regex!(
            r"^(?:\[[^\]]+\])?(?:'(?:[^']|'')+'|[\p{L}_\\][\p{L}\p{N}_.]*)!"
        )
        .find(rest)
        {
            let len = prefix.end()
                + reference_len(&rest[prefix.end()..]).ok_or_else(|| {
                    FormulaError::lex("expected a reference after sheet name", start + prefix.end())
                })?;
            self.push(TokenKind::Reference, rest[..len].to_string(), start);
            self.pos += len;
            return Ok(());
        }

        match rest.chars().next() {
            Some('\'') => {
                return Err(FormulaError::lex(
                    "quoted sheet name must be followed by '!'",
                    start,
                ))
            }
            Some('[') => return Err(FormulaError::lex("malformed unit reference", start)),
            _ => {}
        }

        if let Some(len) = reference_len(rest) {
            self.push(TokenKind::Reference, rest[..len].to_string(), start);
            self.pos += len;
            return Ok(());
        }

        let m = regex!(r"^[\p{L}_\\][\p{L}\p{N}_.]*")
            .find(rest)
            .ok_or_else(|| FormulaError::lex("expected identifier", start))?;
        let ident = m.as_str();
        let next = self.char_after(m.end());
        let kind = if next == Some('(') {
            TokenKind::Function
        } else if ident.eq_ignore_ascii_case("TRUE") || ident.eq_ignore_ascii_case("FALSE") {
            TokenKind::Boolean
        } else {
            TokenKind::Name
        };
        self.push(kind, ident.to_string(), start);
        self.pos += m.end();
        Ok(())
    }
}

/// Length of a cell, range, whole-column or whole-row reference at the start of `s`
fn reference_len(s: &str) -> Option<usize> {
    let patterns = [
        regex!(r"^\$?[A-Za-z]{1,3}\$?[0-9]+(?::\$?[A-Za-z]{1,3}\$?[0-9]+)?"),
        regex!(r"^\$?[A-Za-z]{1,3}:\$?[A-Za-z]{1,3}"),
        regex!(r"^\$?[0-9]+:\$?[0-9]+"),
    ];
    patterns.iter().find_map(|re| {
        let m = re.find(s)?;
        let next = s[m.end()..].chars().next();
        if is_identifier_char(next) || next == Some('(') {
            None
        } else {
            Some(m.end())
        }
    })
}

fn is_identifier_char(c: Option<char>) -> bool {
    c.map_or(false, |c| c.is_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds_and_text(formula: &str) -> Vec<(TokenKind, String)> {
        tokenize(formula)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    fn shown(formula: &str) -> Vec<String> {
        tokenize(formula)
            .unwrap()
            .iter()
            .map(|t| t.to_string())
            .collect()
    }

    #[test]
    fn test_simple_arithmetic() {
        assert_eq!(
            shown("=A1+B1*2"),
            ["REF(A1)", "OP(+)", "REF(B1)", "OP(*)", "NUM(2)"]
        );
    }

    #[test]
    fn test_offsets_point_into_source() {
        let tokens = tokenize("=SUM(A1, 10)").unwrap();
        let offsets: Vec<usize> = tokens.iter().map(|t| t.offset).collect();
        assert_eq!(offsets, vec![1, 4, 5, 7, 9, 11]);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(shown("=1.5e3"), ["NUM(1.5e3)"]);
        assert_eq!(shown("=.25"), ["NUM(.25)"]);
        assert_eq!(shown("=2E-2"), ["NUM(2E-2)"]);
        assert_eq!(shown("=50%"), ["NUM(50)", "OP(%)"]);
    }

    #[test]
    fn test_strings_with_escaped_quotes() {
        assert_eq!(
            kinds_and_text(r#"="say ""hi""""#),
            vec![(TokenKind::String, r#""say ""hi""""#.to_string())]
        );
    }

    #[test]
    fn test_unterminated_string_reports_offset() {
        assert_eq!(
            tokenize("=1&\"abc"),
            Err(FormulaError::Lex {
                message: "unterminated string literal".into(),
                offset: 3
            })
        );
    }

    #[test]
    fn test_unterminated_array_reports_offset() {
        match tokenize("={1,2;3,4") {
            Err(FormulaError::Lex { offset, .. }) => assert_eq!(offset, 1),
            other => panic!("expected lex error, got {:?}", other),
        }
    }

    #[test]
    fn test_booleans_and_functions() {
        assert_eq!(
            kinds_and_text("=true"),
            vec![(TokenKind::Boolean, "true".to_string())]
        );
        assert_eq!(shown("=TRUE()"), ["FUNC(TRUE)", "(", ")"]);
        assert_eq!(shown("=LOG10(100)"), ["FUNC(LOG10)", "(", "NUM(100)", ")"]);
        assert_eq!(shown("=ERROR.TYPE(A1)"), ["FUNC(ERROR.TYPE)", "(", "REF(A1)", ")"]);
    }

    #[test]
    fn test_reference_forms() {
        assert_eq!(shown("=$A$1"), ["REF($A$1)"]);
        assert_eq!(shown("=Sheet1!A1:B2"), ["REF(Sheet1!A1:B2)"]);
        assert_eq!(shown("='My Sheet'!C3"), ["REF('My Sheet'!C3)"]);
        assert_eq!(shown("='It''s'!C3"), ["REF('It''s'!C3)"]);
        assert_eq!(shown("=[Book2]Sheet1!A1"), ["REF([Book2]Sheet1!A1)"]);
        assert_eq!(shown("=A:C"), ["REF(A:C)"]);
        assert_eq!(shown("=$2:$5"), ["REF($2:$5)"]);
        assert_eq!(shown("=TaxRate"), ["NAME(TaxRate)"]);
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(
            shown("=A1<>B1"),
            ["REF(A1)", "OP(<>)", "REF(B1)"]
        );
        assert_eq!(shown("=1<=2"), ["NUM(1)", "OP(<=)", "NUM(2)"]);
    }

    #[test]
    fn test_array_literal() {
        assert_eq!(
            shown("={1,2;3,4}"),
            ["{", "NUM(1)", "SEP(,)", "NUM(2)", "SEP(;)", "NUM(3)", "SEP(,)", "NUM(4)", "}"]
        );
    }

    #[test]
    fn test_whitespace_between_references_is_intersection() {
        assert_eq!(
            shown("=A1:B2 B1:C3"),
            ["REF(A1:B2)", "OP( )", "REF(B1:C3)"]
        );
        assert_eq!(shown("= 1 + 2 "), ["NUM(1)", "OP(+)", "NUM(2)"]);
        assert_eq!(shown("=SUM( A1 )"), ["FUNC(SUM)", "(", "REF(A1)", ")"]);
    }

    #[test]
    fn test_error_literals() {
        assert_eq!(shown("=#DIV/0!"), ["ERR(#DIV/0!)"]);
        assert_eq!(shown("=#n/a"), ["ERR(#N/A)"]);
        assert!(tokenize("=#BOGUS").is_err());
    }

    #[test]
    fn test_unexpected_character() {
        assert!(matches!(
            tokenize("=1 ~ 2"),
            Err(FormulaError::Lex { offset: 3, .. })
        ));
    }
}
