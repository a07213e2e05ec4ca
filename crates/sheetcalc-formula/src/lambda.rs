//! Lambda closures and binding scopes
//!
//! `LET` and `LAMBDA` bind names to operands. Bindings live in frames on a stack owned by
//! the [`LambdaRuntime`] of one evaluation context. Calling a closure swaps the stack for
//! a fresh one holding only the closure's captured bindings and its parameters, and
//! restores the caller's stack when the call returns, so nothing bound inside a call is
//! visible outside it.

use std::rc::Rc;

use crate::ast::FormulaExpr;
use crate::evaluator::Operand;

/// Identifies a closure within one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LambdaId(usize);

impl LambdaId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A lambda value: parameters, body and the bindings visible where it was created
#[derive(Debug, Clone)]
pub struct LambdaClosure {
    pub params: Rc<[String]>,
    pub body: Rc<FormulaExpr>,
    captured: Vec<(String, Operand)>,
}

type Frame = Vec<(String, Operand)>;

/// Saved caller scope, handed back to [`LambdaRuntime::leave`]
#[derive(Debug)]
#[must_use]
pub struct SavedScope(Vec<Frame>);

/// Closure table and binding stack for one evaluation
#[derive(Debug, Default)]
pub struct LambdaRuntime {
    closures: Vec<LambdaClosure>,
    frames: Vec<Frame>,
}

impl LambdaRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure over the bindings currently in scope
    pub fn define(&mut self, params: Rc<[String]>, body: Rc<FormulaExpr>) -> LambdaId {
        let captured = self.frames.iter().flatten().cloned().collect();
        self.closures.push(LambdaClosure {
            params,
            body,
            captured,
        });
        LambdaId(self.closures.len() - 1)
    }

    pub fn closure(&self, id: LambdaId) -> Option<&LambdaClosure> {
        self.closures.get(id.0)
    }

    /// Number of parameters a closure takes
    pub fn arity(&self, id: LambdaId) -> Option<usize> {
        self.closure(id).map(|c| c.params.len())
    }

    /// Innermost binding of `name`
    pub fn lookup(&self, name: &str) -> Option<&Operand> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(bound, _)| bound.eq_ignore_ascii_case(name))
            .map(|(_, operand)| operand)
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Frame::new());
    }

    /// Bind in the innermost frame, opening one if needed
    pub fn bind(&mut self, name: &str, operand: Operand) {
        if self.frames.is_empty() {
            self.push_frame();
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.push((name.to_ascii_uppercase(), operand));
        }
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Replace the scope with the closure's environment plus its arguments
    ///
    /// Returns `None` for an unknown closure or a wrong argument count.
    pub fn enter(&mut self, id: LambdaId, args: Vec<Operand>) -> Option<SavedScope> {
        let closure = self.closures.get(id.0)?;
        if closure.params.len() != args.len() {
            return None;
        }
        let mut frame = closure.captured.clone();
        frame.extend(closure.params.iter().cloned().zip(args));
        let saved = std::mem::replace(&mut self.frames, vec![frame]);
        Some(SavedScope(saved))
    }

    /// Restore the caller's scope after a call
    pub fn leave(&mut self, saved: SavedScope) {
        self.frames = saved.0;
    }

    /// Number of open frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
