//! Implicit-position storage ("U").
//!
//! The handle of coordinate `c` is `c` itself. Every position up to the
//! fiber's extent holds a payload, default-filled where nothing was stored.

use crate::codec::format::{FormatKind, Handle, SliceCursor, StorageFormat};
use crate::fiber::{Coord, Value};

#[derive(Debug, Clone, Default)]
pub struct Uncompressed {
    payloads: Vec<Value>,
    cursor: SliceCursor,
}

impl Uncompressed {
    /// An all-default fiber of the given extent.
    pub fn new(extent: usize) -> Self {
        Self {
            payloads: vec![Value::default(); extent],
            cursor: SliceCursor::default(),
        }
    }

    /// Scatter (coordinate, value) pairs into a dense fiber. Coordinates past
    /// `extent` grow the fiber.
    pub fn from_pairs(extent: usize, pairs: impl IntoIterator<Item = (Coord, Value)>) -> Self {
        let mut fiber = Self::new(extent);
        for (coord, value) in pairs {
            let handle = fiber.insert_element(coord);
            fiber.payloads[handle] = value;
        }
        fiber
    }

    pub fn payloads(&self) -> &[Value] {
        &self.payloads
    }
}

impl StorageFormat for Uncompressed {
    fn setup_slice(&mut self, base: Coord, bound: Option<Coord>, max: Option<usize>) {
        let start = self.coord_to_handle(base);
        self.cursor = SliceCursor::new(start, self.payloads.len(), bound, max);
    }

    fn next_in_slice(&mut self) -> Option<Handle> {
        let len = self.payloads.len();
        self.cursor.advance(|h| (h < len).then_some(h))
    }

    fn handle_to_coord(&self, handle: Handle) -> Option<Coord> {
        (handle < self.payloads.len()).then_some(handle)
    }

    fn handle_to_payload(&self, handle: Handle) -> Option<Value> {
        self.payloads.get(handle).copied()
    }

    fn coord_to_handle(&self, coord: Coord) -> Option<Handle> {
        (coord < self.payloads.len()).then_some(coord)
    }

    fn insert_element(&mut self, coord: Coord) -> Handle {
        if coord >= self.payloads.len() {
            self.payloads.resize(coord + 1, Value::default());
        }
        coord
    }

    fn update_payload(&mut self, handle: Handle, value: Value) -> Handle {
        if let Some(slot) = self.payloads.get_mut(handle) {
            *slot = value;
        }
        handle
    }

    fn occupancy(&self) -> usize {
        self.payloads.len()
    }

    fn format(&self) -> FormatKind {
        FormatKind::Uncompressed
    }
}
