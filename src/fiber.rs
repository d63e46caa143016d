//! Fiber-tree data model.
//!
//! A tensor is a tree of fibers: each fiber holds the (coordinate, payload)
//! pairs of one rank, sorted by coordinate. Payloads are scalars at the
//! deepest rank and nested fibers everywhere above it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Index along one rank.
pub type Coord = usize;

/// Scalar stored at the leaves.
pub type Value = f64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FiberError {
    #[error("fiber has {coords} coordinates but {payloads} payloads")]
    LengthMismatch { coords: usize, payloads: usize },

    #[error("coordinates not strictly increasing at position {position} ({prev} then {next})")]
    Unsorted {
        position: usize,
        prev: Coord,
        next: Coord,
    },

    #[error("tensor declares {rank_ids} rank ids but {shape} shape entries")]
    ShapeMismatch { rank_ids: usize, shape: usize },

    #[error("rank {rank}: coordinate {coord} outside shape {extent}")]
    OutOfShape {
        rank: String,
        coord: Coord,
        extent: usize,
    },

    #[error("rank {rank}: expected {expected} payload, found {found}")]
    DepthMismatch {
        rank: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("coordinate {coord} holds a fiber; only leaf fibers can be materialized")]
    NotLeaf { coord: Coord },
}

/// A payload is either a leaf value or the fiber of the next rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Value(Value),
    Fiber(Fiber),
}

impl Payload {
    pub fn as_value(&self) -> Option<Value> {
        match self {
            Payload::Value(v) => Some(*v),
            Payload::Fiber(_) => None,
        }
    }

    pub fn as_fiber(&self) -> Option<&Fiber> {
        match self {
            Payload::Fiber(f) => Some(f),
            Payload::Value(_) => None,
        }
    }

    /// Whether this payload is the default fill value (zero or an empty fiber).
    pub fn is_default(&self) -> bool {
        match self {
            Payload::Value(v) => *v == 0.0,
            Payload::Fiber(f) => f.is_empty(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Payload::Value(_) => "value",
            Payload::Fiber(_) => "fiber",
        }
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::Value(v)
    }
}

impl From<Fiber> for Payload {
    fn from(f: Fiber) -> Self {
        Payload::Fiber(f)
    }
}

#[derive(Deserialize)]
struct FiberParts {
    coords: Vec<Coord>,
    payloads: Vec<Payload>,
}

/// Sorted sequence of (coordinate, payload) pairs for one rank.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "FiberParts")]
pub struct Fiber {
    coords: Vec<Coord>,
    payloads: Vec<Payload>,
}

impl TryFrom<FiberParts> for Fiber {
    type Error = FiberError;

    fn try_from(parts: FiberParts) -> Result<Self, Self::Error> {
        Fiber::new(parts.coords, parts.payloads)
    }
}

impl Fiber {
    /// Build a fiber, checking that coordinates are strictly increasing.
    pub fn new(coords: Vec<Coord>, payloads: Vec<Payload>) -> Result<Self, FiberError> {
        if coords.len() != payloads.len() {
            return Err(FiberError::LengthMismatch {
                coords: coords.len(),
                payloads: payloads.len(),
            });
        }
        for (i, pair) in coords.windows(2).enumerate() {
            if pair[0] >= pair[1] {
                return Err(FiberError::Unsorted {
                    position: i + 1,
                    prev: pair[0],
                    next: pair[1],
                });
            }
        }
        Ok(Self { coords, payloads })
    }

    /// Leaf fiber from explicit coordinates and values.
    pub fn from_values(coords: Vec<Coord>, values: Vec<Value>) -> Result<Self, FiberError> {
        Self::new(coords, values.into_iter().map(Payload::Value).collect())
    }

    /// Leaf fiber from a dense row; zeros are not stored.
    pub fn from_dense(values: &[Value]) -> Self {
        let (coords, payloads) = values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(c, v)| (c, Payload::Value(*v)))
            .unzip();
        Self { coords, payloads }
    }

    /// Two-rank fiber from dense rows; empty rows are not stored.
    pub fn from_dense_rows(rows: &[Vec<Value>]) -> Self {
        let (coords, payloads) = rows
            .iter()
            .enumerate()
            .map(|(c, row)| (c, Fiber::from_dense(row)))
            .filter(|(_, f)| !f.is_empty())
            .map(|(c, f)| (c, Payload::Fiber(f)))
            .unzip();
        Self { coords, payloads }
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Coord, &Payload)> {
        self.coords.iter().copied().zip(self.payloads.iter())
    }

    /// Payload stored at `coord`, if any.
    pub fn get(&self, coord: Coord) -> Option<&Payload> {
        self.coords
            .binary_search(&coord)
            .ok()
            .map(|pos| &self.payloads[pos])
    }

    /// Follow a coordinate path down the tree. The empty path is `self`.
    pub fn fiber_at(&self, path: &[Coord]) -> Option<&Fiber> {
        let mut fiber = self;
        for &coord in path {
            fiber = fiber.get(coord)?.as_fiber()?;
        }
        Some(fiber)
    }

    /// Leaf values as (coordinate, value) pairs; `None` if this is not a leaf fiber.
    pub fn leaf_pairs(&self) -> Option<Vec<(Coord, Value)>> {
        self.iter().map(|(c, p)| p.as_value().map(|v| (c, v))).collect()
    }
}

#[derive(Deserialize)]
struct TensorParts {
    name: String,
    rank_ids: Vec<String>,
    shape: Vec<usize>,
    root: Fiber,
}

/// A named fiber tree with one rank id and extent per level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TensorParts")]
pub struct Tensor {
    name: String,
    rank_ids: Vec<String>,
    shape: Vec<usize>,
    root: Fiber,
}

impl TryFrom<TensorParts> for Tensor {
    type Error = FiberError;

    fn try_from(parts: TensorParts) -> Result<Self, Self::Error> {
        Tensor::new(parts.name, parts.rank_ids, parts.shape, parts.root)
    }
}

impl Tensor {
    /// Build a tensor, checking that the tree depth and extents agree with the ranks.
    pub fn new(
        name: impl Into<String>,
        rank_ids: Vec<String>,
        shape: Vec<usize>,
        root: Fiber,
    ) -> Result<Self, FiberError> {
        if rank_ids.len() != shape.len() {
            return Err(FiberError::ShapeMismatch {
                rank_ids: rank_ids.len(),
                shape: shape.len(),
            });
        }
        let tensor = Self {
            name: name.into(),
            rank_ids,
            shape,
            root,
        };
        tensor.check_fiber(&tensor.root, 0)?;
        Ok(tensor)
    }

    fn check_fiber(&self, fiber: &Fiber, depth: usize) -> Result<(), FiberError> {
        let rank = &self.rank_ids[depth];
        let leaf = depth + 1 == self.rank_ids.len();
        for (coord, payload) in fiber.iter() {
            if coord >= self.shape[depth] {
                return Err(FiberError::OutOfShape {
                    rank: rank.clone(),
                    coord,
                    extent: self.shape[depth],
                });
            }
            match (payload, leaf) {
                (Payload::Value(_), true) => {}
                (Payload::Fiber(child), false) => self.check_fiber(child, depth + 1)?,
                (found, _) => {
                    return Err(FiberError::DepthMismatch {
                        rank: rank.clone(),
                        expected: if leaf { "value" } else { "fiber" },
                        found: found.kind(),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rank_ids(&self) -> &[String] {
        &self.rank_ids
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn root(&self) -> &Fiber {
        &self.root
    }

    pub fn depth(&self) -> usize {
        self.rank_ids.len()
    }

    /// Position of a rank id in the rank order.
    pub fn rank_index(&self, rank: &str) -> Option<usize> {
        self.rank_ids.iter().position(|r| r == rank)
    }

    /// All fibers stored at the given depth, in depth-first order, with their paths.
    pub fn fibers_at_depth(&self, depth: usize) -> Vec<(Vec<Coord>, &Fiber)> {
        let mut out = Vec::new();
        collect_fibers(&self.root, depth, &mut Vec::new(), &mut out);
        out
    }
}

fn collect_fibers<'a>(
    fiber: &'a Fiber,
    depth: usize,
    path: &mut Vec<Coord>,
    out: &mut Vec<(Vec<Coord>, &'a Fiber)>,
) {
    if depth == 0 {
        out.push((path.clone(), fiber));
        return;
    }
    for (coord, payload) in fiber.iter() {
        if let Some(child) = payload.as_fiber() {
            path.push(coord);
            collect_fibers(child, depth - 1, path, out);
            path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> Tensor {
        let root = Fiber::from_dense_rows(&[
            vec![0.0, 2.0, 0.0],
            vec![0.0, 0.0, 0.0],
            vec![7.0, 0.0, 9.0],
        ]);
        Tensor::new("A", vec!["M".into(), "K".into()], vec![3, 3], root).unwrap()
    }

    #[test]
    fn test_rejects_unsorted_coords() {
        let err = Fiber::from_values(vec![1, 4, 4], vec![1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            FiberError::Unsorted {
                position: 2,
                prev: 4,
                next: 4
            }
        );
    }

    #[test]
    fn test_from_dense_drops_zeros() {
        let f = Fiber::from_dense(&[1.0, 0.0, 3.0]);
        assert_eq!(f.coords(), &[0, 2]);
        assert_eq!(f.get(2), Some(&Payload::Value(3.0)));
        assert_eq!(f.get(1), None);
    }

    #[test]
    fn test_fiber_at_path() {
        let t = matrix();
        assert_eq!(t.root().coords(), &[0, 2]);
        let row = t.root().fiber_at(&[2]).unwrap();
        assert_eq!(row.leaf_pairs().unwrap(), vec![(0, 7.0), (2, 9.0)]);
        assert!(t.root().fiber_at(&[1]).is_none());
    }

    #[test]
    fn test_fibers_at_depth() {
        let t = matrix();
        let fibers = t.fibers_at_depth(1);
        let paths: Vec<_> = fibers.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(paths, vec![vec![0], vec![2]]);
    }

    #[test]
    fn test_tensor_checks_depth_and_shape() {
        let leaf = Fiber::from_dense(&[1.0, 2.0]);
        let err = Tensor::new("A", vec!["M".into(), "K".into()], vec![2, 2], leaf.clone())
            .unwrap_err();
        assert!(matches!(err, FiberError::DepthMismatch { .. }));

        let err = Tensor::new("A", vec!["K".into()], vec![1], leaf).unwrap_err();
        assert!(matches!(err, FiberError::OutOfShape { coord: 1, .. }));
    }

    #[test]
    fn test_tensor_json_validates() {
        let json = r#"{"name":"A","rank_ids":["K"],"shape":[4],
                       "root":{"coords":[3,1],"payloads":[1.0,2.0]}}"#;
        assert!(serde_json::from_str::<Tensor>(json).is_err());

        let json = r#"{"name":"A","rank_ids":["K"],"shape":[4],
                       "root":{"coords":[1,3],"payloads":[1.0,2.0]}}"#;
        let t: Tensor = serde_json::from_str(json).unwrap();
        assert_eq!(t.root().coords(), &[1, 3]);
    }
}
