//! Stream node contract and the evaluation driver.

use thiserror::Error;
use tracing::debug;

use crate::codec::format::Handle;
use crate::fiber::{Coord, Value};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlgebraError {
    #[error("fiber {0} has no storage bound")]
    Unbound(String),

    #[error("fiber {0} cannot be rebound during an active evaluation pass")]
    ActivePass(String),
}

/// One element flowing through a stream.
///
/// A node that receives a token of the wrong kind treats it as the end of
/// its input.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Handle(Handle),
    Coord(Coord),
    Value(Value),
    Tuple(Vec<Token>),
}

impl Token {
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Token::Handle(h) => Some(*h),
            _ => None,
        }
    }

    pub fn coord(&self) -> Option<Coord> {
        match self {
            Token::Coord(c) => Some(*c),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<Value> {
        match self {
            Token::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// The `i`-th component of a tuple.
    pub fn component(&self, i: usize) -> Option<Token> {
        match self {
            Token::Tuple(items) => items.get(i).cloned(),
            _ => None,
        }
    }
}

/// A pull-based stream operator.
///
/// `evaluate` returns `None` once the stream is exhausted. Nodes never call
/// back into themselves; between calls a node keeps only its cursor state.
pub trait Node {
    /// Prepare this node and everything upstream of it for a pass.
    /// Repeated calls are harmless.
    fn initialize(&mut self) -> Result<(), AlgebraError>;

    /// Produce the next element, or `None` at the end of the stream.
    fn evaluate(&mut self) -> Option<Token>;

    /// Release the fibers touched by this pass.
    fn finish(&mut self);
}

pub type BoxNode = Box<dyn Node>;

impl<N: Node + ?Sized> Node for Box<N> {
    fn initialize(&mut self) -> Result<(), AlgebraError> {
        (**self).initialize()
    }

    fn evaluate(&mut self) -> Option<Token> {
        (**self).evaluate()
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}

/// Run a graph to completion from its terminal node.
///
/// Returns every element the terminal node produced before the end
/// sentinel.
pub fn evaluate(terminal: &mut dyn Node) -> Result<Vec<Token>, AlgebraError> {
    if let Err(e) = terminal.initialize() {
        terminal.finish();
        return Err(e);
    }

    let mut outputs = Vec::new();
    while let Some(token) = terminal.evaluate() {
        outputs.push(token);
    }
    terminal.finish();

    debug!(steps = outputs.len(), "Evaluation pass complete");
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_accessors() {
        let t = Token::Tuple(vec![Token::Coord(3), Token::Handle(1), Token::Handle(0)]);
        assert_eq!(t.component(0).and_then(|c| c.coord()), Some(3));
        assert_eq!(t.component(2).and_then(|c| c.handle()), Some(0));
        assert_eq!(t.component(3), None);
        assert_eq!(Token::Coord(3).handle(), None);
        assert_eq!(Token::Value(2.5).value(), Some(2.5));
    }
}
