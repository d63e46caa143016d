//! Format-independent, pull-based stream algebra.
//!
//! A graph of [`Node`]s is built over [`FiberRef`]s, storage is bound to
//! the fibers, and [`evaluate`] pulls the terminal node until its stream
//! ends.

pub mod fiber_ref;
pub mod latch;
pub mod node;
pub mod ops;
pub mod programs;

pub use fiber_ref::FiberRef;
pub use latch::{fan_out, split, Tap};
pub use node::{evaluate, AlgebraError, BoxNode, Node, Token};
pub use ops::{
    Compute, CoordsToHandles, HandlesToCoords, HandlesToPayloads, InsertElement, Intersect, Slice,
    UpdatePayload,
};
pub use programs::{intersect_multiply, populate};
