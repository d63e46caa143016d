//! Trace-driven traffic estimates.
//!
//! Every policy walks the uses of one tensor in evaluation order and
//! charges bits per access:
//! - `buffet`: the element's footprint on every access.
//! - `stream`: rank header once, fiber header whenever the traced fiber
//!   changes, element bits on every access.
//! - `cache`: footprint on a miss, nothing on a hit; oldest-inserted
//!   entries are dropped until a new element fits.
//! - `lru`: as `cache`, but the least recently used entry is dropped.

use clap::ValueEnum;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::fiber::Coord;
use crate::model::footprint::{Footprint, FootprintError};
use crate::model::trace::{RankTrace, TraceError};

#[derive(Error, Debug)]
pub enum TrafficError {
    #[error(transparent)]
    Footprint(#[from] FootprintError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("trace covers none of the ranks of tensor {0}")]
    NoSharedRanks(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrafficPolicy {
    #[default]
    Buffet,
    Stream,
    Cache,
    Lru,
}

/// Outcome of one simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrafficReport {
    pub policy: TrafficPolicy,
    pub accesses: u64,
    pub hits: u64,
    pub evictions: u64,
    /// Total bits moved.
    pub bits: u64,
    /// Bits charged per access, in trace order; zero marks a hit.
    pub charges: Vec<u64>,
}

impl TrafficReport {
    fn new(policy: TrafficPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    fn charge(&mut self, bits: u64) {
        self.accesses += 1;
        self.bits += bits;
        self.charges.push(bits);
    }

    fn hit(&mut self) {
        self.hits += 1;
        self.charge(0);
    }
}

/// Bits resident in a fully associative buffer of fixed capacity.
struct Residency {
    entries: LruCache<Vec<Coord>, u64>,
    capacity: u64,
    used: u64,
}

impl Residency {
    fn new(capacity: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            capacity,
            used: 0,
        }
    }

    /// Whether `path` is resident; `touch` refreshes its recency.
    fn lookup(&mut self, path: &[Coord], touch: bool) -> bool {
        if touch {
            self.entries.get(path).is_some()
        } else {
            self.entries.contains(path)
        }
    }

    /// Admit `path`, dropping entries from the cold end until it fits.
    /// Returns the number of entries dropped. Elements larger than the
    /// whole buffer are never admitted.
    fn admit(&mut self, path: Vec<Coord>, bits: u64) -> u64 {
        if bits > self.capacity {
            return 0;
        }
        let mut evicted = 0;
        while self.used + bits > self.capacity {
            match self.entries.pop_lru() {
                Some((_, size)) => {
                    self.used -= size;
                    evicted += 1;
                }
                None => break,
            }
        }
        self.entries.push(path, bits);
        self.used += bits;
        evicted
    }
}

/// Traffic simulation for one tensor under one format spec.
pub struct TrafficModel<'a> {
    footprint: Footprint<'a>,
}

impl<'a> TrafficModel<'a> {
    pub fn new(footprint: Footprint<'a>) -> Self {
        Self { footprint }
    }

    /// Project an extracted trace onto this tensor's ranks.
    pub fn uses(&self, trace: &RankTrace) -> Result<Vec<Vec<Coord>>, TrafficError> {
        let tensor = self.footprint.tensor();
        let uses = trace.uses(tensor.rank_ids());
        if uses.iter().any(|u| u.is_empty()) {
            return Err(TrafficError::NoSharedRanks(tensor.name().to_string()));
        }
        Ok(uses)
    }

    pub fn simulate(
        &self,
        policy: TrafficPolicy,
        uses: &[Vec<Coord>],
        capacity_bits: u64,
    ) -> Result<TrafficReport, TrafficError> {
        let report = match policy {
            TrafficPolicy::Buffet => self.buffet(uses)?,
            TrafficPolicy::Stream => self.stream(uses)?,
            TrafficPolicy::Cache => self.cache(uses, capacity_bits)?,
            TrafficPolicy::Lru => self.lru(uses, capacity_bits)?,
        };
        info!(
            tensor = self.footprint.tensor().name(),
            policy = ?report.policy,
            accesses = report.accesses,
            hits = report.hits,
            evictions = report.evictions,
            bits = report.bits,
            "Traffic simulated"
        );
        Ok(report)
    }

    pub fn buffet(&self, uses: &[Vec<Coord>]) -> Result<TrafficReport, TrafficError> {
        let mut report = TrafficReport::new(TrafficPolicy::Buffet);
        for path in uses {
            report.charge(self.footprint.element(path)?);
        }
        Ok(report)
    }

    pub fn stream(&self, uses: &[Vec<Coord>]) -> Result<TrafficReport, TrafficError> {
        let mut report = TrafficReport::new(TrafficPolicy::Stream);
        let ranks = self.footprint.tensor().rank_ids();
        let mut headers_sent = Vec::new();
        let mut last_fiber: Option<&[Coord]> = None;

        for path in uses {
            let Some(depth) = path.len().checked_sub(1) else {
                continue;
            };
            let spec = self.footprint.rank_entry(&ranks[depth])?;
            let mut bits = spec.element_bits();
            if !headers_sent.contains(&depth) {
                headers_sent.push(depth);
                bits += spec.rhbits();
            }
            let fiber = &path[..depth];
            if last_fiber != Some(fiber) {
                bits += spec.fhbits();
                last_fiber = Some(fiber);
            }
            report.charge(bits);
        }
        Ok(report)
    }

    pub fn cache(&self, uses: &[Vec<Coord>], capacity_bits: u64) -> Result<TrafficReport, TrafficError> {
        self.resident(TrafficPolicy::Cache, uses, capacity_bits, false)
    }

    pub fn lru(&self, uses: &[Vec<Coord>], capacity_bits: u64) -> Result<TrafficReport, TrafficError> {
        self.resident(TrafficPolicy::Lru, uses, capacity_bits, true)
    }

    fn resident(
        &self,
        policy: TrafficPolicy,
        uses: &[Vec<Coord>],
        capacity_bits: u64,
        touch_on_hit: bool,
    ) -> Result<TrafficReport, TrafficError> {
        let mut report = TrafficReport::new(policy);
        let mut buffer = Residency::new(capacity_bits);

        for path in uses {
            if buffer.lookup(path, touch_on_hit) {
                report.hit();
                continue;
            }
            let bits = self.footprint.element(path)?;
            report.evictions += buffer.admit(path.clone(), bits);
            debug!(?path, bits, used = buffer.used, "Miss");
            report.charge(bits);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::{Fiber, Tensor};
    use crate::model::format_spec::FormatSpec;

    /// B[K, N]: K fibers of 3, 5, 1, 5, 3 and 3 elements at k = 0, 1, 2,
    /// 5, 6 and 7.
    fn tensor() -> Tensor {
        let sizes = [(0, 3), (1, 5), (2, 1), (5, 5), (6, 3), (7, 3)];
        let mut rows = vec![vec![0.0; 7]; 8];
        for (k, n) in sizes {
            for v in rows[k].iter_mut().take(n) {
                *v = 1.0;
            }
        }
        Tensor::new(
            "B",
            vec!["K".into(), "N".into()],
            vec![8, 7],
            Fiber::from_dense_rows(&rows),
        )
        .unwrap()
    }

    fn spec() -> FormatSpec {
        FormatSpec::from_json(
            r#"{
                "K": { "format": "U", "rhbits": 32, "pbits": 32 },
                "N": { "format": "C", "cbits": 32, "pbits": 64 }
            }"#,
        )
        .unwrap()
    }

    fn uses() -> Vec<Vec<Coord>> {
        [1, 7, 0, 5, 1, 6, 0, 2, 5, 2, 6, 7, 0, 6]
            .iter()
            .map(|&k| vec![k])
            .collect()
    }

    #[test]
    fn test_buffet_charges_every_access() {
        let (t, s) = (tensor(), spec());
        let model = TrafficModel::new(Footprint::new(&t, &s).unwrap());
        let report = model.buffet(&uses()).unwrap();
        assert_eq!(
            report.bits,
            480 + 288 + 288 + 480 + 480 + 288 + 288 + 96 + 480 + 96 + 288 + 288 + 288 + 288
        );
        assert_eq!(report.hits, 0);
    }

    #[test]
    fn test_cache_drops_oldest_inserted() {
        let (t, s) = (tensor(), spec());
        let model = TrafficModel::new(Footprint::new(&t, &s).unwrap());
        let report = model.cache(&uses(), 1024).unwrap();
        assert_eq!(
            report.charges,
            vec![480, 288, 288, 480, 480, 288, 288, 96, 480, 0, 288, 288, 288, 0]
        );
        assert_eq!(report.hits, 2);
    }

    #[test]
    fn test_lru_drops_least_recent() {
        let (t, s) = (tensor(), spec());
        let model = TrafficModel::new(Footprint::new(&t, &s).unwrap());
        let report = model.lru(&uses(), 1024 + 256).unwrap();
        assert_eq!(
            report.charges,
            vec![480, 288, 288, 480, 480, 288, 288, 96, 480, 0, 0, 288, 288, 0]
        );
    }

    #[test]
    fn test_capacity_extremes() {
        let (t, s) = (tensor(), spec());
        let model = TrafficModel::new(Footprint::new(&t, &s).unwrap());
        let twice = vec![vec![1], vec![1]];

        let roomy = model.cache(&twice, 1 << 20).unwrap();
        assert_eq!(roomy.bits, 480);
        let none = model.cache(&twice, 0).unwrap();
        assert_eq!(none.bits, 960);
        assert_eq!(none.evictions, 0);
    }

    #[test]
    fn test_stream_charges_headers() {
        let t = tensor();
        let spec = FormatSpec::from_json(
            r#"{ "K": {}, "N": { "rhbits": 256, "fhbits": 128, "cbits": 32, "pbits": 64 } }"#,
        )
        .unwrap();
        let model = TrafficModel::new(Footprint::new(&t, &spec).unwrap());
        let uses = vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![0, 2]];
        let report = model.stream(&uses).unwrap();
        assert_eq!(report.bits, 256 + 128 * 3 + 96 * 4);
    }
}
