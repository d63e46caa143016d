//! Fiber-tree codec.
//!
//! Encoding walks the tree depth first and appends, for every rank, to two
//! flat buffers: coordinates and payloads. Leaf payloads are values; payload
//! buffers of upper ranks hold the occupancy pointers needed to find each
//! child fiber when the child rank stores explicit coordinates.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::codec::format::FormatKind;
use crate::config::CodecConfig;
use crate::fiber::{Coord, Fiber, FiberError, Payload, Tensor, Value};
use crate::model::format_spec::FormatSpec;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("codec configured for {formats} ranks but tensor {tensor} has {ranks}")]
    RankCountMismatch {
        formats: usize,
        tensor: String,
        ranks: usize,
    },

    #[error("rank {rank}: {buffer} buffer exhausted while decoding")]
    Truncated { rank: String, buffer: &'static str },

    #[error("rank {rank}: expected a {expected} payload word")]
    WrongWord { rank: String, expected: &'static str },

    #[error("decoded tree is malformed: {0}")]
    Fiber(#[from] FiberError),

    #[error("image I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a fiber image (bad magic)")]
    BadMagic,

    #[error("unsupported image version {0}")]
    UnsupportedVersion(u16),

    #[error("image is truncated or corrupt: {0}")]
    Corrupt(String),
}

/// One entry of a rank's payload buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadWord {
    /// Leaf value.
    Value(Value),
    /// Occupancy pointer (one field of one element's occupancy).
    Pointer(u64),
}

/// Buffers for one rank, covering every fiber of that rank in depth-first order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankImage {
    pub coords: Vec<Coord>,
    pub payloads: Vec<PayloadWord>,
}

/// Columnar encoding of a whole tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecImage {
    pub name: String,
    pub rank_ids: Vec<String>,
    pub shape: Vec<usize>,
    pub formats: Vec<FormatKind>,
    /// Whether pointers are running totals (CSR) or per-element counts.
    pub cumulative: bool,
    /// Element count of the root fiber.
    pub root_occupancy: usize,
    pub ranks: Vec<RankImage>,
}

/// Per-field occupancy accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupancy(Vec<u64>);

impl Occupancy {
    pub fn zero(fields: usize) -> Self {
        Self(vec![0; fields])
    }

    /// A child's element count, widened to the shape of the accumulator.
    pub fn of_count(count: usize, fields: usize) -> Self {
        Self(vec![count as u64; fields])
    }

    pub fn fields(&self) -> &[u64] {
        &self.0
    }

    fn add(&mut self, other: &Occupancy) {
        debug_assert_eq!(self.0.len(), other.0.len());
        for (acc, x) in self.0.iter_mut().zip(&other.0) {
            *acc += x;
        }
    }
}

/// Encoder/decoder with one format chosen per rank.
#[derive(Debug, Clone)]
pub struct Codec {
    formats: Vec<FormatKind>,
    config: CodecConfig,
}

impl Codec {
    pub fn new(formats: Vec<FormatKind>, config: CodecConfig) -> Self {
        Self { formats, config }
    }

    /// Formats taken from a format specification; ranks without a format tag
    /// use coordinate lists.
    pub fn from_spec(spec: &FormatSpec, tensor: &Tensor, config: CodecConfig) -> Self {
        let formats = tensor
            .rank_ids()
            .iter()
            .map(|r| spec.format_of(r).unwrap_or(FormatKind::CoordinateList))
            .collect();
        Self::new(formats, config)
    }

    pub fn formats(&self) -> &[FormatKind] {
        &self.formats
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn encode(&self, tensor: &Tensor) -> Result<CodecImage, CodecError> {
        if self.formats.len() != tensor.depth() {
            return Err(CodecError::RankCountMismatch {
                formats: self.formats.len(),
                tensor: tensor.name().to_string(),
                ranks: tensor.depth(),
            });
        }

        let mut encoder = Encoder {
            codec: self,
            shape: tensor.shape(),
            ranks: vec![RankImage::default(); tensor.depth()],
        };
        let (root_occupancy, _) = encoder.encode_fiber(0, Some(tensor.root()));

        for (rank, image) in tensor.rank_ids().iter().zip(&encoder.ranks) {
            debug!(
                tensor = tensor.name(),
                rank = %rank,
                coords = image.coords.len(),
                payloads = image.payloads.len(),
                "Encoded rank"
            );
        }

        Ok(CodecImage {
            name: tensor.name().to_string(),
            rank_ids: tensor.rank_ids().to_vec(),
            shape: tensor.shape().to_vec(),
            formats: self.formats.clone(),
            cumulative: self.config.cumulative_occupancy,
            root_occupancy,
            ranks: encoder.ranks,
        })
    }

    /// Rebuild the tensor. Default-filled elements of uncompressed ranks are
    /// dropped, so a sparse tensor round-trips exactly.
    pub fn decode(image: &CodecImage) -> Result<Tensor, CodecError> {
        let depth = image.rank_ids.len();
        if image.formats.len() != depth || image.shape.len() != depth || image.ranks.len() != depth
        {
            return Err(CodecError::Corrupt(format!(
                "{depth} rank ids but {} formats, {} extents and {} rank buffers",
                image.formats.len(),
                image.shape.len(),
                image.ranks.len()
            )));
        }
        let mut decoder = Decoder {
            image,
            coord_pos: vec![0; depth],
            payload_pos: vec![0; depth],
        };
        let root = if depth == 0 {
            Fiber::default()
        } else {
            let len = match image.formats[0] {
                FormatKind::Uncompressed => image.shape[0],
                FormatKind::CoordinateList => image.root_occupancy,
            };
            decoder.decode_fiber(0, len)?
        };
        Ok(Tensor::new(
            image.name.clone(),
            image.rank_ids.clone(),
            image.shape.clone(),
            root,
        )?)
    }
}

struct Encoder<'a> {
    codec: &'a Codec,
    shape: &'a [usize],
    ranks: Vec<RankImage>,
}

impl Encoder<'_> {
    /// Encode one fiber (`None` stands for an empty fiber) and return its
    /// element count and per-element occupancy list.
    fn encode_fiber(&mut self, depth: usize, fiber: Option<&Fiber>) -> (usize, Vec<Occupancy>) {
        let format = self.codec.formats[depth];
        let leaf = depth + 1 == self.codec.formats.len();
        let fields = if leaf {
            1
        } else {
            self.codec.formats[depth + 1].occupancy_fields()
        };

        let elements: Vec<(Coord, Option<&Payload>)> = match format {
            FormatKind::Uncompressed => (0..self.shape[depth])
                .map(|c| (c, fiber.and_then(|f| f.get(c))))
                .collect(),
            FormatKind::CoordinateList => fiber
                .map(|f| f.iter().map(|(c, p)| (c, Some(p))).collect())
                .unwrap_or_default(),
        };

        let mut occupancy = 0;
        let mut cumulative = Occupancy::zero(fields);
        let mut occ_list = Vec::with_capacity(elements.len());
        let mut prev = 0;

        for (coord, payload) in elements {
            let child = if leaf {
                Occupancy::of_count(1, fields)
            } else {
                let (count, _) = self.encode_fiber(depth + 1, payload.and_then(Payload::as_fiber));
                Occupancy::of_count(count, fields)
            };
            cumulative.add(&child);
            occ_list.push(if self.codec.config.cumulative_occupancy {
                cumulative.clone()
            } else {
                child
            });

            let rank = &mut self.ranks[depth];
            if let Some(encoded) = format.encode_coord(prev, coord) {
                rank.coords.push(encoded);
            }
            if leaf {
                let value = payload.and_then(Payload::as_value).unwrap_or_default();
                rank.payloads.push(PayloadWord::Value(value));
            }

            occupancy += 1;
            prev = coord + 1;
        }

        if !leaf && self.codec.formats[depth + 1].needs_upper_pointers() {
            let rank = &mut self.ranks[depth];
            for occ in &occ_list {
                rank.payloads
                    .extend(occ.fields().iter().map(|&n| PayloadWord::Pointer(n)));
            }
        }

        (occupancy, occ_list)
    }
}

struct Decoder<'a> {
    image: &'a CodecImage,
    coord_pos: Vec<usize>,
    payload_pos: Vec<usize>,
}

impl Decoder<'_> {
    fn rank(&self, depth: usize) -> String {
        self.image.rank_ids[depth].clone()
    }

    fn next_payload(&mut self, depth: usize) -> Result<PayloadWord, CodecError> {
        let word = self.image.ranks[depth]
            .payloads
            .get(self.payload_pos[depth])
            .copied()
            .ok_or_else(|| CodecError::Truncated {
                rank: self.rank(depth),
                buffer: "payload",
            })?;
        self.payload_pos[depth] += 1;
        Ok(word)
    }

    fn next_coords(
        &mut self,
        depth: usize,
        len: usize,
    ) -> Result<Box<dyn Iterator<Item = Coord>>, CodecError> {
        match self.image.formats[depth] {
            FormatKind::Uncompressed => Ok(Box::new(0..len)),
            FormatKind::CoordinateList => {
                let start = self.coord_pos[depth];
                let coords = start
                    .checked_add(len)
                    .and_then(|end| self.image.ranks[depth].coords.get(start..end))
                    .ok_or_else(|| CodecError::Truncated {
                        rank: self.rank(depth),
                        buffer: "coordinate",
                    })?;
                self.coord_pos[depth] += len;
                Ok(Box::new(coords.to_vec().into_iter()))
            }
        }
    }

    /// Child fiber lengths read from the occupancy pointers of a fiber of
    /// `len` elements at `depth`.
    fn child_lengths(&mut self, depth: usize, len: usize) -> Result<Vec<usize>, CodecError> {
        let fields = self.image.formats[depth + 1].occupancy_fields().max(1);
        let left = self.image.ranks[depth]
            .payloads
            .len()
            .saturating_sub(self.payload_pos[depth]);
        let mut lengths = Vec::with_capacity(len.min(left / fields));
        let mut prev = 0u64;
        for _ in 0..len {
            let mut first = None;
            for _ in 0..fields {
                match self.next_payload(depth)? {
                    PayloadWord::Pointer(n) => {
                        first.get_or_insert(n);
                    }
                    PayloadWord::Value(_) => {
                        return Err(CodecError::WrongWord {
                            rank: self.rank(depth),
                            expected: "pointer",
                        })
                    }
                }
            }
            let n = first.unwrap_or_default();
            let count = if self.image.cumulative {
                let count = n.saturating_sub(prev);
                prev = n;
                count
            } else {
                n
            };
            let count = usize::try_from(count).map_err(|_| {
                CodecError::Corrupt(format!(
                    "rank {}: occupancy {count} out of range",
                    self.rank(depth)
                ))
            })?;
            lengths.push(count);
        }
        Ok(lengths)
    }

    fn decode_fiber(&mut self, depth: usize, len: usize) -> Result<Fiber, CodecError> {
        let leaf = depth + 1 == self.image.formats.len();
        let coords = self.next_coords(depth, len)?;

        let mut kept_coords = Vec::new();
        let mut payloads = Vec::new();

        if leaf {
            for coord in coords {
                match self.next_payload(depth)? {
                    PayloadWord::Value(v) => {
                        let payload = Payload::Value(v);
                        if !(self.is_dense(depth) && payload.is_default()) {
                            kept_coords.push(coord);
                            payloads.push(payload);
                        }
                    }
                    PayloadWord::Pointer(_) => {
                        return Err(CodecError::WrongWord {
                            rank: self.rank(depth),
                            expected: "value",
                        })
                    }
                }
            }
        } else if self.image.formats[depth + 1].needs_upper_pointers() {
            let lengths = self.child_lengths(depth, len)?;
            for (coord, child_len) in coords.zip(lengths) {
                self.push_child(depth, coord, child_len, &mut kept_coords, &mut payloads)?;
            }
        } else {
            let extent = self.image.shape[depth + 1];
            for coord in coords {
                self.push_child(depth, coord, extent, &mut kept_coords, &mut payloads)?;
            }
        }

        Ok(Fiber::new(kept_coords, payloads)?)
    }

    /// Decode one child fiber. An empty child is an implicit default under an
    /// uncompressed rank; under a coordinate list it was stored explicitly.
    fn push_child(
        &mut self,
        depth: usize,
        coord: Coord,
        child_len: usize,
        coords: &mut Vec<Coord>,
        payloads: &mut Vec<Payload>,
    ) -> Result<(), CodecError> {
        let child = self.decode_fiber(depth + 1, child_len)?;
        if !(self.is_dense(depth) && child.is_empty()) {
            coords.push(coord);
            payloads.push(Payload::Fiber(child));
        }
        Ok(())
    }

    fn is_dense(&self, depth: usize) -> bool {
        self.image.formats[depth] == FormatKind::Uncompressed
    }
}
