//! Formula parser
//!
//! A recursive descent parser over the token stream produced by [`crate::lexer`], with
//! the usual spreadsheet operator precedence (lowest to highest):
//!
//! 1. Comparison: `=`, `<>`, `<`, `<=`, `>`, `>=`
//! 2. Concatenation: `&`
//! 3. Addition/Subtraction: `+`, `-`
//! 4. Multiplication/Division: `*`, `/`
//! 5. Exponentiation: `^` (right associative)
//! 6. Unary: prefix `-`/`+`, postfix `%`
//! 7. Reference operators: intersection (space), range (`:`)
//! 8. Primary: literals, references, names, calls, parentheses, array constants
//!
//! Argument counts are not checked here. A call with the wrong number of arguments still
//! parses and evaluates to `#N/A`.

use crate::ast::{BinaryOperator, FormulaExpr, RefKind, ReferenceExpr, UnaryOperator};
use crate::error::{FormulaError, FormulaResult};
use crate::lexer::tokenize;
use crate::token::{Token, TokenKind};
use sheetcalc_core::{CellAddress, CellError, CellRange};

/// Tokenize and parse formula text
///
/// # Example
/// ```rust
/// use sheetcalc_formula::parse_formula;
///
/// let ast = parse_formula("=SUM(A1:A10)").unwrap();
/// let ast = parse_formula("=IF(A1>0,\"Yes\",\"No\")").unwrap();
/// assert!(parse_formula("=(1+2").is_err());
/// ```
pub fn parse_formula(formula: &str) -> FormulaResult<FormulaExpr> {
    let tokens = tokenize(formula)?;
    parse(&tokens)
}

/// Parse a token stream into an AST
pub fn parse(tokens: &[Token]) -> FormulaResult<FormulaExpr> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        scopes: Vec::new(),
    };
    let expr = parser.parse_expression()?;

    if let Some(token) = parser.peek() {
        return Err(FormulaError::parse(
            parser.pos,
            "end of formula",
            token.text.clone(),
        ));
    }

    Ok(expr)
}

/// Parse the text of a single reference token (`'My Sheet'!$A$1:B2`, `[Book]S!A:A`, `3:5`)
pub fn parse_reference(text: &str) -> FormulaResult<ReferenceExpr> {
    let invalid = || FormulaError::InvalidReference(text.to_string());

    let (unit, sheet, body) = match text.rfind('!') {
        Some(bang) => {
            let (unit, sheet) = split_prefix(&text[..bang]).ok_or_else(invalid)?;
            (unit, Some(sheet), &text[bang + 1..])
        }
        None => (None, None, text),
    };

    let (kind, range) = match body.split_once(':') {
        Some((a, b)) if is_column_part(a) && is_column_part(b) => {
            let start = CellAddress::letters_to_column(a.trim_start_matches('$'))
                .map_err(|_| invalid())?;
            let end = CellAddress::letters_to_column(b.trim_start_matches('$'))
                .map_err(|_| invalid())?;
            (RefKind::Column, CellRange::whole_columns(start.min(end), start.max(end)))
        }
        Some((a, b)) if is_row_part(a) && is_row_part(b) => {
            let start = CellAddress::parse_row_number(a.trim_start_matches('$'))
                .map_err(|_| invalid())?;
            let end = CellAddress::parse_row_number(b.trim_start_matches('$'))
                .map_err(|_| invalid())?;
            (RefKind::Row, CellRange::whole_rows(start.min(end), start.max(end)))
        }
        Some(_) => (RefKind::Range, CellRange::parse(body).map_err(|_| invalid())?),
        None => (
            RefKind::Cell,
            CellRange::single(CellAddress::parse(body).map_err(|_| invalid())?),
        ),
    };

    Ok(ReferenceExpr {
        unit,
        sheet,
        kind,
        range,
    })
}

/// Split `[Book]'My Sheet'` into (`Some("Book")`, `"My Sheet"`)
fn split_prefix(prefix: &str) -> Option<(Option<String>, String)> {
    let (unit, sheet) = match prefix.strip_prefix('[') {
        Some(rest) => {
            let (unit, sheet) = rest.split_once(']')?;
            (Some(unit.to_string()), sheet)
        }
        None => (None, prefix),
    };
    let sheet = match sheet.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(quoted) => quoted.replace("''", "'"),
        None => sheet.to_string(),
    };
    if sheet.is_empty() {
        return None;
    }
    Some((unit, sheet))
}

fn is_column_part(s: &str) -> bool {
    let s = s.trim_start_matches('$');
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_row_part(s: &str) -> bool {
    let s = s.trim_start_matches('$');
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// Decode a string token: strip the quotes and collapse `""`
fn unescape_string(raw: &str) -> String {
    let inner = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw);
    inner.replace("\"\"", "\"")
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    /// Names bound by enclosing LET/LAMBDA, upper-cased
    scopes: Vec<Vec<String>>,
}

impl<'t> Parser<'t> {
    // === Token helpers ===

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn found(&self) -> String {
        self.peek()
            .map_or_else(|| "end of input".to_string(), |t| t.text.clone())
    }

    fn error<T>(&self, expected: &str) -> FormulaResult<T> {
        Err(FormulaError::parse(self.pos, expected, self.found()))
    }

    fn next_is(&self, kind: TokenKind) -> bool {
        self.peek().map_or(false, |t| t.kind == kind)
    }

    fn next_is_operator(&self, op: &str) -> bool {
        self.peek().map_or(false, |t| t.is_operator(op))
    }

    fn next_is_separator(&self, sep: &str) -> bool {
        self.peek().map_or(false, |t| t.is_separator(sep))
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> FormulaResult<&'t Token> {
        match self.peek() {
            Some(t) if t.kind == kind => {
                self.pos += 1;
                Ok(t)
            }
            _ => self.error(expected),
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        let upper = name.to_uppercase();
        self.scopes.iter().rev().any(|s| s.contains(&upper))
    }

    // === Expression parsing with precedence ===

    fn parse_expression(&mut self) -> FormulaResult<FormulaExpr> {
        self.parse_comparison()
    }

    fn binary(op: BinaryOperator, left: FormulaExpr, right: FormulaExpr) -> FormulaExpr {
        FormulaExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn parse_comparison(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_concatenation()?;

        loop {
            let op = match self.peek() {
                Some(t) if t.kind == TokenKind::Operator => match t.text.as_str() {
                    "=" => BinaryOperator::Equal,
                    "<>" => BinaryOperator::NotEqual,
                    "<" => BinaryOperator::LessThan,
                    "<=" => BinaryOperator::LessEqual,
                    ">" => BinaryOperator::GreaterThan,
                    ">=" => BinaryOperator::GreaterEqual,
                    _ => break,
                },
                _ => break,
            };
            self.advance();
            let right = self.parse_concatenation()?;
            left = Self::binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_concatenation(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_additive()?;
        while self.next_is_operator("&") {
            self.advance();
            let right = self.parse_additive()?;
            left = Self::binary(BinaryOperator::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.next_is_operator("+") {
                BinaryOperator::Add
            } else if self.next_is_operator("-") {
                BinaryOperator::Subtract
            } else {
                break;
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_exponent()?;
        loop {
            let op = if self.next_is_operator("*") {
                BinaryOperator::Multiply
            } else if self.next_is_operator("/") {
                BinaryOperator::Divide
            } else {
                break;
            };
            self.advance();
            let right = self.parse_exponent()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_exponent(&mut self) -> FormulaResult<FormulaExpr> {
        let left = self.parse_unary()?;

        if self.next_is_operator("^") {
            self.advance();
            let right = self.parse_exponent()?; // Right associative
            return Ok(Self::binary(BinaryOperator::Power, left, right));
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> FormulaResult<FormulaExpr> {
        if self.next_is_operator("-") {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                operand: Box::new(operand),
            });
        }

        if self.next_is_operator("+") {
            self.advance();
            return self.parse_unary();
        }

        let mut expr = self.parse_intersection()?;
        while self.next_is_operator("%") {
            self.advance();
            expr = FormulaExpr::UnaryOp {
                op: UnaryOperator::Percent,
                operand: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn parse_intersection(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_range()?;
        while self.next_is_operator(" ") {
            self.advance();
            let right = self.parse_range()?;
            left = Self::binary(BinaryOperator::Intersect, left, right);
        }
        Ok(left)
    }

    fn parse_range(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_primary()?;
        while self.next_is_operator(":") {
            self.advance();
            let right = self.parse_primary()?;
            left = match (left, right) {
                (FormulaExpr::Reference(a), FormulaExpr::Reference(b)) if can_merge(&a, &b) => {
                    FormulaExpr::Reference(ReferenceExpr {
                        kind: RefKind::Range,
                        range: a.range.bounding(&b.range),
                        unit: a.unit,
                        sheet: a.sheet,
                    })
                }
                (left, right) => Self::binary(BinaryOperator::Range, left, right),
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> FormulaResult<FormulaExpr> {
        let Some(token) = self.peek() else {
            return self.error("expression");
        };

        let expr = match token.kind {
            TokenKind::Number => {
                let n: f64 = token
                    .text
                    .parse()
                    .or_else(|_| self.error("number"))?;
                self.advance();
                FormulaExpr::Number(n)
            }
            TokenKind::String => {
                self.advance();
                FormulaExpr::String(unescape_string(&token.text))
            }
            TokenKind::Boolean => {
                self.advance();
                FormulaExpr::Boolean(token.text.eq_ignore_ascii_case("TRUE"))
            }
            TokenKind::Error => {
                let err = CellError::parse(&token.text).map_or_else(|| self.error("error literal"), Ok)?;
                self.advance();
                FormulaExpr::Error(err)
            }
            TokenKind::Reference => {
                let reference = parse_reference(&token.text)
                    .or_else(|_| self.error("valid reference"))?;
                self.advance();
                FormulaExpr::Reference(reference)
            }
            TokenKind::Name => {
                self.advance();
                if self.is_bound(&token.text) {
                    FormulaExpr::LambdaParameter(token.text.to_uppercase())
                } else {
                    FormulaExpr::Name(token.text.clone())
                }
            }
            TokenKind::Function => {
                self.advance();
                self.expect(TokenKind::OpenParen, "'('")?;
                self.parse_call(&token.text)?
            }
            TokenKind::OpenParen => {
                self.advance();
                let mut expr = self.parse_expression()?;
                while self.next_is_separator(",") {
                    self.advance();
                    let right = self.parse_expression()?;
                    expr = Self::binary(BinaryOperator::Union, expr, right);
                }
                self.expect(TokenKind::CloseParen, "')'")?;
                expr
            }
            TokenKind::OpenBrace => {
                self.advance();
                self.parse_array()?
            }
            _ => return self.error("expression"),
        };

        self.parse_invocations(expr)
    }

    /// `LAMBDA(...)(args)` and `(f)(args)`: an open paren directly after a lambda value
    fn parse_invocations(&mut self, mut expr: FormulaExpr) -> FormulaResult<FormulaExpr> {
        while self.next_is(TokenKind::OpenParen)
            && matches!(
                expr,
                FormulaExpr::Lambda { .. }
                    | FormulaExpr::LambdaParameter(_)
                    | FormulaExpr::Invoke { .. }
            )
        {
            self.advance();
            let args = self.parse_arguments()?;
            expr = FormulaExpr::Invoke {
                callee: Box::new(expr),
                args,
            };
        }
        Ok(expr)
    }

    /// Parse a call after its `(`
    fn parse_call(&mut self, name: &str) -> FormulaResult<FormulaExpr> {
        let upper = name.to_uppercase();
        match upper.as_str() {
            "LAMBDA" => self.parse_lambda(),
            "LET" => self.parse_let(),
            _ if self.is_bound(&upper) => {
                let args = self.parse_arguments()?;
                Ok(FormulaExpr::Invoke {
                    callee: Box::new(FormulaExpr::LambdaParameter(upper)),
                    args,
                })
            }
            _ => {
                let args = self.parse_arguments()?;
                Ok(FormulaExpr::Function { name: upper, args })
            }
        }
    }

    /// Comma separated arguments up to and including `)`; empty slots become `Missing`
    fn parse_arguments(&mut self) -> FormulaResult<Vec<FormulaExpr>> {
        let mut args = Vec::new();
        if self.next_is(TokenKind::CloseParen) {
            self.advance();
            return Ok(args);
        }

        loop {
            if self.next_is_separator(",") || self.next_is(TokenKind::CloseParen) {
                args.push(FormulaExpr::Missing);
            } else {
                args.push(self.parse_expression()?);
            }

            if self.next_is_separator(",") {
                self.advance();
            } else {
                self.expect(TokenKind::CloseParen, "',' or ')'")?;
                return Ok(args);
            }
        }
    }

    /// A parameter name: a `Name` token directly followed by `,`
    fn take_binding_name(&mut self) -> Option<String> {
        match (self.peek(), self.peek_at(1)) {
            (Some(name), Some(sep)) if name.kind == TokenKind::Name && sep.is_separator(",") => {
                self.pos += 2;
                Some(name.text.to_uppercase())
            }
            _ => None,
        }
    }

    fn parse_lambda(&mut self) -> FormulaResult<FormulaExpr> {
        let mut params: Vec<String> = Vec::new();
        while let Some(name) = self.take_binding_name() {
            if params.contains(&name) {
                return Err(FormulaError::parse(
                    self.pos - 2,
                    "distinct parameter names",
                    name,
                ));
            }
            params.push(name);
        }

        if self.next_is(TokenKind::CloseParen) {
            return self.error("lambda body");
        }

        self.scopes.push(params.clone());
        let body = self.parse_expression();
        self.scopes.pop();
        let body = body?;

        self.expect(TokenKind::CloseParen, "')' after lambda body")?;
        Ok(FormulaExpr::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn parse_let(&mut self) -> FormulaResult<FormulaExpr> {
        self.scopes.push(Vec::new());
        let result = self.parse_let_bindings();
        self.scopes.pop();
        result
    }

    fn parse_let_bindings(&mut self) -> FormulaResult<FormulaExpr> {
        let mut args = Vec::new();
        while let Some(name) = self.take_binding_name() {
            let value = self.parse_expression()?;
            if !self.next_is_separator(",") {
                return self.error("',' followed by the LET calculation");
            }
            self.advance();
            if let Some(scope) = self.scopes.last_mut() {
                scope.push(name.clone());
            }
            args.push(FormulaExpr::LambdaParameter(name));
            args.push(value);
        }

        if args.is_empty() {
            return self.error("name binding");
        }

        args.push(self.parse_expression()?);
        self.expect(TokenKind::CloseParen, "')' after LET calculation")?;
        Ok(FormulaExpr::Function {
            name: "LET".to_string(),
            args,
        })
    }

    /// Array constant after its `{`
    fn parse_array(&mut self) -> FormulaResult<FormulaExpr> {
        let mut rows = vec![Vec::new()];

        loop {
            let element = self.parse_array_element()?;
            if let Some(row) = rows.last_mut() {
                row.push(element);
            }

            let Some(token) = self.advance() else {
                return self.error("'}'");
            };
            match (token.kind, token.text.as_str()) {
                (TokenKind::Separator, ",") => {}
                (TokenKind::Separator, ";") => rows.push(Vec::new()),
                (TokenKind::CloseBrace, _) => break,
                _ => {
                    self.pos -= 1;
                    return self.error("',' ';' or '}' in array");
                }
            }
        }

        let width = rows[0].len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(FormulaError::parse(
                self.pos - 1,
                "rows of equal length",
                "ragged array constant",
            ));
        }
        Ok(FormulaExpr::Array(rows))
    }

    fn parse_array_element(&mut self) -> FormulaResult<FormulaExpr> {
        let negate = if self.next_is_operator("-") {
            self.advance();
            true
        } else {
            if self.next_is_operator("+") {
                self.advance();
            }
            false
        };

        let Some(token) = self.peek() else {
            return self.error("array element");
        };
        let element = match token.kind {
            TokenKind::Number => {
                let n: f64 = token.text.parse().or_else(|_| self.error("number"))?;
                FormulaExpr::Number(if negate { -n } else { n })
            }
            TokenKind::String if !negate => FormulaExpr::String(unescape_string(&token.text)),
            TokenKind::Boolean if !negate => {
                FormulaExpr::Boolean(token.text.eq_ignore_ascii_case("TRUE"))
            }
            TokenKind::Error if !negate => match CellError::parse(&token.text) {
                Some(e) => FormulaExpr::Error(e),
                None => return self.error("array element"),
            },
            _ => return self.error("constant array element"),
        };
        self.advance();
        Ok(element)
    }
}

/// Whether `a:b` can be folded into a single range literal
fn can_merge(a: &ReferenceExpr, b: &ReferenceExpr) -> bool {
    let cellish = |k: RefKind| matches!(k, RefKind::Cell | RefKind::Range);
    let same_sheet = match (&a.sheet, &b.sheet) {
        (_, None) => b.unit.is_none(),
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y) && a.unit == b.unit,
        (None, Some(_)) => false,
    };
    cellish(a.kind) && cellish(b.kind) && same_sheet
}
