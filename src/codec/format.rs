//! Storage formats and the per-fiber capability surface.
//!
//! A [`FormatKind`] is the tag chosen once per rank ("U" or "C"). It carries
//! the encoding rules used by the codec and knows how to materialize a leaf
//! fiber into a [`StorageFormat`] object for the algebra engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::coord_list::CoordinateList;
use crate::codec::uncompressed::Uncompressed;
use crate::fiber::{Coord, Fiber, FiberError, Value};

/// Position index into a fiber's backing arrays.
pub type Handle = usize;

/// The representation used for one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatKind {
    /// Implicit positions: every coordinate in the rank's extent is stored.
    #[serde(rename = "U")]
    Uncompressed,
    /// Explicit, sorted coordinate list.
    #[serde(rename = "C")]
    CoordinateList,
}

impl FormatKind {
    /// Short tag used in format specifications.
    pub fn tag(&self) -> &'static str {
        match self {
            FormatKind::Uncompressed => "U",
            FormatKind::CoordinateList => "C",
        }
    }

    /// Whether coordinates are written to the coordinate buffer.
    pub fn explicit_coords(&self) -> bool {
        matches!(self, FormatKind::CoordinateList)
    }

    /// Whether fibers of this rank need occupancy pointers stored in the
    /// payload buffer of the rank above.
    pub fn needs_upper_pointers(&self) -> bool {
        matches!(self, FormatKind::CoordinateList)
    }

    /// Number of occupancy fields a fiber of this rank reports upward.
    pub fn occupancy_fields(&self) -> usize {
        1
    }

    /// Coordinate-encoding rule. `prev` is one past the previously emitted
    /// coordinate of the same fiber (zero at the start of a fiber).
    pub fn encode_coord(&self, _prev: Coord, coord: Coord) -> Option<Coord> {
        match self {
            FormatKind::Uncompressed => None,
            FormatKind::CoordinateList => Some(coord),
        }
    }

    /// Materialize a leaf fiber of extent `extent` into a storage object.
    ///
    /// Storage objects hold scalar payloads only; a fiber with fiber payloads
    /// is rejected with [`FiberError::NotLeaf`].
    pub fn materialize(
        &self,
        fiber: &Fiber,
        extent: usize,
    ) -> Result<Box<dyn StorageFormat>, FiberError> {
        let pairs = fiber
            .iter()
            .map(|(coord, p)| {
                p.as_value()
                    .map(|v| (coord, v))
                    .ok_or(FiberError::NotLeaf { coord })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let storage: Box<dyn StorageFormat> = match self {
            FormatKind::Uncompressed => Box::new(Uncompressed::from_pairs(extent, pairs)),
            FormatKind::CoordinateList => Box::new(CoordinateList::from_pairs(pairs)),
        };
        Ok(storage)
    }

    /// An empty storage object of this kind.
    pub fn empty(&self, extent: usize) -> Box<dyn StorageFormat> {
        match self {
            FormatKind::Uncompressed => Box::new(Uncompressed::new(extent)),
            FormatKind::CoordinateList => Box::new(CoordinateList::default()),
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Handle-indexed access to one leaf fiber, independent of its representation.
///
/// Payloads are scalar values. Upper ranks of a tensor live in the codec
/// image and the footprint model, not behind this trait.
///
/// Every "not found" outcome is `None`: a lookup miss, an out-of-range
/// handle, or the end of a slice.
pub trait StorageFormat: fmt::Debug {
    /// Start a bounded iteration: handles whose coordinate is in
    /// `[base, bound)`, at most `max` of them.
    fn setup_slice(&mut self, base: Coord, bound: Option<Coord>, max: Option<usize>);

    /// Next handle of the current slice.
    fn next_in_slice(&mut self) -> Option<Handle>;

    fn handle_to_coord(&self, handle: Handle) -> Option<Coord>;

    fn handle_to_payload(&self, handle: Handle) -> Option<Value>;

    /// Handle of the smallest stored coordinate `>= coord`.
    fn coord_to_handle(&self, coord: Coord) -> Option<Handle>;

    /// Make room for `coord` (payload left at the default) and return its
    /// handle; an existing coordinate returns its current handle.
    fn insert_element(&mut self, coord: Coord) -> Handle;

    /// Overwrite the payload at `handle`. Invalid handles are ignored.
    fn update_payload(&mut self, handle: Handle, value: Value) -> Handle;

    /// Number of stored elements (handles `0..occupancy()` are valid).
    fn occupancy(&self) -> usize;

    fn format(&self) -> FormatKind;

    /// All stored (coordinate, payload) pairs in handle order.
    fn pairs(&self) -> Vec<(Coord, Value)> {
        (0..self.occupancy())
            .filter_map(|h| Some((self.handle_to_coord(h)?, self.handle_to_payload(h)?)))
            .collect()
    }
}

/// Cursor state shared by the slice implementations.
#[derive(Debug, Clone, Default)]
pub(crate) struct SliceCursor {
    pub next: Handle,
    pub bound: Option<Coord>,
    pub remaining: usize,
}

impl SliceCursor {
    pub fn new(start: Option<Handle>, end: Handle, bound: Option<Coord>, max: Option<usize>) -> Self {
        Self {
            next: start.unwrap_or(end),
            bound,
            remaining: max.unwrap_or(usize::MAX),
        }
    }

    /// Advance over a fiber whose coordinate at `handle` is given by `coord_of`.
    pub fn advance(&mut self, coord_of: impl Fn(Handle) -> Option<Coord>) -> Option<Handle> {
        if self.remaining == 0 {
            return None;
        }
        let coord = coord_of(self.next)?;
        if self.bound.is_some_and(|b| coord >= b) {
            return None;
        }
        let handle = self.next;
        self.next += 1;
        self.remaining -= 1;
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_roundtrip_through_json() {
        let kinds: Vec<FormatKind> = serde_json::from_str(r#"["U","C"]"#).unwrap();
        assert_eq!(
            kinds,
            vec![FormatKind::Uncompressed, FormatKind::CoordinateList]
        );
        assert!(serde_json::from_str::<FormatKind>(r#""Y""#).is_err());
        assert_eq!(FormatKind::CoordinateList.to_string(), "C");
    }

    #[test]
    fn test_encoding_rules() {
        assert_eq!(FormatKind::CoordinateList.encode_coord(0, 5), Some(5));
        assert_eq!(FormatKind::Uncompressed.encode_coord(0, 5), None);
        assert!(FormatKind::CoordinateList.needs_upper_pointers());
        assert!(!FormatKind::Uncompressed.needs_upper_pointers());
    }

    #[test]
    fn test_materialize_is_format_independent() {
        let fiber = Fiber::from_dense(&[1.0, 0.0, 3.0]);
        let u = FormatKind::Uncompressed.materialize(&fiber, 3).unwrap();
        let c = FormatKind::CoordinateList.materialize(&fiber, 3).unwrap();
        assert_eq!(u.pairs(), vec![(0, 1.0), (1, 0.0), (2, 3.0)]);
        assert_eq!(c.pairs(), vec![(0, 1.0), (2, 3.0)]);
        assert_eq!(u.format(), FormatKind::Uncompressed);
    }

    #[test]
    fn test_materialize_rejects_upper_rank_fibers() {
        let matrix = Fiber::from_dense_rows(&[vec![1.0, 0.0], vec![0.0, 2.0]]);
        for kind in [FormatKind::Uncompressed, FormatKind::CoordinateList] {
            assert!(matches!(
                kind.materialize(&matrix, 2),
                Err(FiberError::NotLeaf { coord: 0 })
            ));
        }
    }
}
