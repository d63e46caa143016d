//! Footprint and traffic model.
//!
//! - [`format_spec`]: per-rank bit widths and formats
//! - [`footprint`]: bit footprint queries over a tensor
//! - [`trace`]: access-trace CSV schema and per-rank extraction
//! - [`traffic`]: buffet, stream, cache and LRU traffic simulation

pub mod footprint;
pub mod format_spec;
pub mod trace;
pub mod traffic;

pub use footprint::{Footprint, FootprintError};
pub use format_spec::{FormatSpec, FormatSpecError, RankSpec, RootSpec};
pub use trace::{AccessKind, AccessRecord, AccessTrace, RankTrace, TraceError, TraceKind, TraceSelection};
pub use traffic::{TrafficError, TrafficModel, TrafficPolicy, TrafficReport};
