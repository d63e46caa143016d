//! fibertree-sim: sparse-tensor storage formats and traffic simulation.
//!
//! Tensors are trees of fibers, one rank per level. The crate provides
//! three layers:
//!   codec   → per-rank storage formats and the columnar fiber-tree encoding
//!   algebra → format-independent, pull-based stream operators over fibers
//!   model   → bit footprints and trace-driven buffet/cache/LRU traffic

pub mod algebra;
pub mod codec;
pub mod config;
pub mod fiber;
pub mod model;
