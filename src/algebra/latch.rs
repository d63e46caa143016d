//! FanOut and Split.
//!
//! One upstream stream feeds a fixed number of taps. The number of taps is a
//! const parameter, so a graph can only be wired with exactly the taps that
//! were created. Each tap keeps its own read position; an upstream element
//! stays buffered until every tap has consumed it. Under the usual
//! round-robin pull order the buffer never holds more than one element.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::trace;

use crate::algebra::node::{AlgebraError, BoxNode, Node, Token};

struct Latch<const N: usize> {
    upstream: BoxNode,
    buffer: VecDeque<Token>,
    /// Sequence number of `buffer[0]`.
    base: usize,
    positions: [usize; N],
    exhausted: bool,
    initialized: bool,
    finished: [bool; N],
}

impl<const N: usize> Latch<N> {
    fn new(upstream: BoxNode) -> Self {
        Self {
            upstream,
            buffer: VecDeque::new(),
            base: 0,
            positions: [0; N],
            exhausted: false,
            initialized: false,
            finished: [false; N],
        }
    }

    fn initialize(&mut self) -> Result<(), AlgebraError> {
        if self.initialized {
            return Ok(());
        }
        if let Err(e) = self.upstream.initialize() {
            self.upstream.finish();
            return Err(e);
        }
        self.buffer.clear();
        self.base = 0;
        self.positions = [0; N];
        self.exhausted = false;
        self.finished = [false; N];
        self.initialized = true;
        Ok(())
    }

    fn pull(&mut self, tap: usize) -> Option<Token> {
        let offset = self.positions[tap] - self.base;
        let token = match self.buffer.get(offset) {
            Some(token) => token.clone(),
            None => {
                if self.exhausted {
                    return None;
                }
                match self.upstream.evaluate() {
                    Some(token) => {
                        self.buffer.push_back(token.clone());
                        token
                    }
                    None => {
                        self.exhausted = true;
                        return None;
                    }
                }
            }
        };
        self.positions[tap] += 1;

        let slowest = self.positions.iter().copied().min().unwrap_or(self.base);
        while self.base < slowest {
            self.buffer.pop_front();
            self.base += 1;
        }
        Some(token)
    }

    fn finish(&mut self, tap: usize) {
        self.finished[tap] = true;
        if self.initialized && self.finished.iter().all(|&f| f) {
            self.upstream.finish();
            self.initialized = false;
        }
    }
}

/// One consumer-side stream of a FanOut or Split.
pub struct Tap<const N: usize> {
    latch: Rc<RefCell<Latch<N>>>,
    index: usize,
    split: bool,
}

impl<const N: usize> Node for Tap<N> {
    fn initialize(&mut self) -> Result<(), AlgebraError> {
        self.latch.borrow_mut().initialize()
    }

    fn evaluate(&mut self) -> Option<Token> {
        let token = self.latch.borrow_mut().pull(self.index)?;
        let out = if self.split {
            token.component(self.index)
        } else {
            Some(token)
        };
        trace!(tap = self.index, split = self.split, ?out, "Latch");
        out
    }

    fn finish(&mut self) {
        self.latch.borrow_mut().finish(self.index);
    }
}

fn taps<const N: usize>(upstream: impl Node + 'static, split: bool) -> [Tap<N>; N] {
    let latch = Rc::new(RefCell::new(Latch::<N>::new(Box::new(upstream))));
    std::array::from_fn(|index| Tap {
        latch: Rc::clone(&latch),
        index,
        split,
    })
}

/// Broadcast every element of `stream` to `N` taps.
pub fn fan_out<const N: usize>(stream: impl Node + 'static) -> [Tap<N>; N] {
    taps(stream, false)
}

/// Tap `i` receives component `i` of every tuple produced by `stream`.
/// A non-tuple element, or one with too few components, ends the tap.
pub fn split<const N: usize>(stream: impl Node + 'static) -> [Tap<N>; N] {
    taps(stream, true)
}
