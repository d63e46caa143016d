//! Explicit coordinate-list storage ("C").
//!
//! Coordinates are kept sorted; lookups are binary searches and insertions
//! shift every later handle by one.

use crate::codec::format::{FormatKind, Handle, SliceCursor, StorageFormat};
use crate::fiber::{Coord, Value};

#[derive(Debug, Clone, Default)]
pub struct CoordinateList {
    coords: Vec<Coord>,
    payloads: Vec<Value>,
    cursor: SliceCursor,
}

impl CoordinateList {
    /// Build from (coordinate, value) pairs already sorted by coordinate.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Coord, Value)>) -> Self {
        let (coords, payloads) = pairs.into_iter().unzip();
        Self {
            coords,
            payloads,
            cursor: SliceCursor::default(),
        }
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    pub fn payloads(&self) -> &[Value] {
        &self.payloads
    }
}

impl StorageFormat for CoordinateList {
    fn setup_slice(&mut self, base: Coord, bound: Option<Coord>, max: Option<usize>) {
        let start = self.coord_to_handle(base);
        self.cursor = SliceCursor::new(start, self.coords.len(), bound, max);
    }

    fn next_in_slice(&mut self) -> Option<Handle> {
        let coords = &self.coords;
        self.cursor.advance(|h| coords.get(h).copied())
    }

    fn handle_to_coord(&self, handle: Handle) -> Option<Coord> {
        self.coords.get(handle).copied()
    }

    fn handle_to_payload(&self, handle: Handle) -> Option<Value> {
        self.payloads.get(handle).copied()
    }

    fn coord_to_handle(&self, coord: Coord) -> Option<Handle> {
        if self.coords.last().map_or(true, |&last| coord > last) {
            return None;
        }
        Some(self.coords.partition_point(|&c| c < coord))
    }

    fn insert_element(&mut self, coord: Coord) -> Handle {
        let handle = self.coords.partition_point(|&c| c < coord);
        if self.coords.get(handle) != Some(&coord) {
            self.coords.insert(handle, coord);
            self.payloads.insert(handle, Value::default());
        }
        handle
    }

    fn update_payload(&mut self, handle: Handle, value: Value) -> Handle {
        if let Some(slot) = self.payloads.get_mut(handle) {
            *slot = value;
        }
        handle
    }

    fn occupancy(&self) -> usize {
        self.coords.len()
    }

    fn format(&self) -> FormatKind {
        FormatKind::CoordinateList
    }
}
