//! Bit footprints of a tensor under a format specification.
//!
//! A fiber of rank `r` costs `fhbits + n * (cbits + pbits)` where `n` is
//! the rank's extent for uncompressed ranks and the number of stored
//! elements otherwise. A rank adds its `rhbits` once; the tensor adds the
//! root's `hbits + pbits`, so that
//!
//! ```text
//! get_tensor() == get_root() + get_subtree(&[])
//! ```

use thiserror::Error;
use tracing::debug;

use crate::codec::format::FormatKind;
use crate::fiber::{Coord, Fiber, Payload, Tensor};
use crate::model::format_spec::{FormatSpec, RankSpec, ROOT_KEY};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FootprintError {
    #[error("format spec has no entry for {0}")]
    MissingEntry(String),

    #[error("rank {0} is not a rank of the tensor")]
    UnknownRank(String),

    #[error("no fiber at {0:?}")]
    NoSuchFiber(Vec<Coord>),
}

/// Footprint queries over one tensor and one spec.
#[derive(Debug, Clone, Copy)]
pub struct Footprint<'a> {
    tensor: &'a Tensor,
    spec: &'a FormatSpec,
}

impl<'a> Footprint<'a> {
    /// Every rank named by the spec must be a rank of the tensor.
    pub fn new(tensor: &'a Tensor, spec: &'a FormatSpec) -> Result<Self, FootprintError> {
        if let Some(unknown) = spec
            .rank_names()
            .find(|name| tensor.rank_index(name).is_none())
        {
            return Err(FootprintError::UnknownRank(unknown.to_string()));
        }
        Ok(Self { tensor, spec })
    }

    pub fn tensor(&self) -> &'a Tensor {
        self.tensor
    }

    pub fn spec(&self) -> &'a FormatSpec {
        self.spec
    }

    fn rank_spec(&self, depth: usize) -> Result<&'a RankSpec, FootprintError> {
        let name = &self.tensor.rank_ids()[depth];
        self.spec
            .rank(name)
            .ok_or_else(|| FootprintError::MissingEntry(name.clone()))
    }

    /// The spec entry for a rank, by name.
    pub fn rank_entry(&self, rank: &str) -> Result<&'a RankSpec, FootprintError> {
        let depth = self
            .tensor
            .rank_index(rank)
            .ok_or_else(|| FootprintError::UnknownRank(rank.to_string()))?;
        self.rank_spec(depth)
    }

    fn locate(&self, path: &[Coord]) -> Result<&'a Fiber, FootprintError> {
        if path.len() >= self.tensor.depth() {
            return Err(FootprintError::NoSuchFiber(path.to_vec()));
        }
        self.tensor
            .root()
            .fiber_at(path)
            .ok_or_else(|| FootprintError::NoSuchFiber(path.to_vec()))
    }

    fn fiber_bits(&self, fiber: &Fiber, depth: usize) -> Result<u64, FootprintError> {
        let spec = self.rank_spec(depth)?;
        let count = match spec.format() {
            FormatKind::Uncompressed => self.tensor.shape()[depth],
            FormatKind::CoordinateList => fiber.len(),
        };
        Ok(spec.fhbits() + count as u64 * spec.element_bits())
    }

    fn subtree_bits(&self, fiber: &Fiber, depth: usize) -> Result<u64, FootprintError> {
        let mut bits = self.fiber_bits(fiber, depth)?;
        for (_, payload) in fiber.iter() {
            if let Some(child) = payload.as_fiber() {
                bits += self.subtree_bits(child, depth + 1)?;
            }
        }
        Ok(bits)
    }

    /// Footprint of the single fiber reached by `path` (the root fiber for
    /// an empty path).
    pub fn get_fiber(&self, path: &[Coord]) -> Result<u64, FootprintError> {
        if path.len() < self.tensor.depth() {
            self.rank_spec(path.len())?;
        }
        let fiber = self.locate(path)?;
        self.fiber_bits(fiber, path.len())
    }

    /// Rank header plus every fiber of the rank.
    pub fn get_rank(&self, rank: &str) -> Result<u64, FootprintError> {
        let spec = self.rank_entry(rank)?;
        let depth = self.tensor.rank_index(rank).unwrap_or_default();
        let mut bits = spec.rhbits();
        for (_, fiber) in self.tensor.fibers_at_depth(depth) {
            bits += self.fiber_bits(fiber, depth)?;
        }
        Ok(bits)
    }

    pub fn get_root(&self) -> Result<u64, FootprintError> {
        self.spec
            .root()
            .map(|r| r.bits())
            .ok_or_else(|| FootprintError::MissingEntry(ROOT_KEY.into()))
    }

    /// The fiber at `path` and everything below it. The whole tree (the
    /// empty path) also carries the header of every rank.
    pub fn get_subtree(&self, path: &[Coord]) -> Result<u64, FootprintError> {
        let bits = self.fiber_subtree(path)?;
        if !path.is_empty() {
            return Ok(bits);
        }
        let mut headers = 0;
        for depth in 0..self.tensor.depth() {
            headers += self.rank_spec(depth)?.rhbits();
        }
        Ok(bits + headers)
    }

    /// Fibers at and below `path`, without rank headers.
    fn fiber_subtree(&self, path: &[Coord]) -> Result<u64, FootprintError> {
        if path.len() < self.tensor.depth() {
            self.rank_spec(path.len())?;
        }
        let fiber = self.locate(path)?;
        self.subtree_bits(fiber, path.len())
    }

    /// Root plus every rank.
    pub fn get_tensor(&self) -> Result<u64, FootprintError> {
        let mut bits = self.get_root()?;
        for rank in self.tensor.rank_ids() {
            bits += self.get_rank(rank)?;
        }
        debug!(tensor = self.tensor.name(), bits, "Tensor footprint");
        Ok(bits)
    }

    /// Bits moved when the element at `path` is fetched: the subtree it
    /// points to, or for a leaf element its own coordinate and payload.
    ///
    /// Every coordinate below the extent of an uncompressed rank is stored,
    /// so an element missing from the sparse tree there costs its
    /// default-filled (empty) child fiber.
    pub fn element(&self, path: &[Coord]) -> Result<u64, FootprintError> {
        let depth = self.tensor.depth();
        if path.is_empty() || path.len() > depth {
            return Err(FootprintError::NoSuchFiber(path.to_vec()));
        }
        if path.len() == depth {
            return Ok(self.rank_spec(depth - 1)?.element_bits());
        }
        match self.fiber_subtree(path) {
            Err(FootprintError::NoSuchFiber(missing)) => {
                if self.is_default_filled(path)? {
                    self.empty_fiber_bits(path.len())
                } else {
                    Err(FootprintError::NoSuchFiber(missing))
                }
            }
            found => found,
        }
    }

    /// Whether `path` leaves the sparse tree only through uncompressed
    /// ranks, within their extents.
    fn is_default_filled(&self, path: &[Coord]) -> Result<bool, FootprintError> {
        let mut fiber = self.tensor.root();
        for (depth, &coord) in path.iter().enumerate() {
            match fiber.get(coord).and_then(Payload::as_fiber) {
                Some(child) => fiber = child,
                None => {
                    for (d, &c) in path.iter().enumerate().skip(depth) {
                        let dense = self.rank_spec(d)?.format() == FormatKind::Uncompressed;
                        if !dense || c >= self.tensor.shape()[d] {
                            return Ok(false);
                        }
                    }
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// An empty fiber at `depth`: uncompressed ranks still hold every
    /// position.
    fn empty_fiber_bits(&self, depth: usize) -> Result<u64, FootprintError> {
        let spec = self.rank_spec(depth)?;
        let count = match spec.format() {
            FormatKind::Uncompressed => self.tensor.shape()[depth] as u64,
            FormatKind::CoordinateList => 0,
        };
        Ok(spec.fhbits() + count * spec.element_bits())
    }
}
