//! Per-rank format specification.
//!
//! A spec is a JSON object keyed by rank name. The reserved key `root`
//! describes the tensor's root pointer:
//!
//! ```json
//! {
//!   "root": { "hbits": 128, "pbits": 32 },
//!   "M":    { "format": "U", "fhbits": 32, "pbits": 32 },
//!   "K":    { "format": "C", "rhbits": 128, "cbits": 32, "pbits": 64 }
//! }
//! ```
//!
//! Every field is optional; unknown fields, non-integer widths and unknown
//! format tags are rejected.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::format::FormatKind;

pub const ROOT_KEY: &str = "root";

#[derive(Error, Debug)]
pub enum FormatSpecError {
    #[error("I/O error reading format spec: {0}")]
    Io(#[from] std::io::Error),

    #[error("format spec is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid entry {entry:?}: {source}")]
    Invalid {
        entry: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Bit widths and format of one rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RankSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatKind>,
    /// Rank header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhbits: Option<u64>,
    /// Per-fiber header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fhbits: Option<u64>,
    /// Per-element coordinate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cbits: Option<u64>,
    /// Per-element payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pbits: Option<u64>,
}

impl RankSpec {
    /// Format of the rank; coordinate list when unspecified.
    pub fn format(&self) -> FormatKind {
        self.format.unwrap_or(FormatKind::CoordinateList)
    }

    pub fn rhbits(&self) -> u64 {
        self.rhbits.unwrap_or(0)
    }

    pub fn fhbits(&self) -> u64 {
        self.fhbits.unwrap_or(0)
    }

    pub fn cbits(&self) -> u64 {
        self.cbits.unwrap_or(0)
    }

    pub fn pbits(&self) -> u64 {
        self.pbits.unwrap_or(0)
    }

    /// Coordinate plus payload bits of one element.
    pub fn element_bits(&self) -> u64 {
        self.cbits() + self.pbits()
    }
}

/// Root pointer description.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hbits: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pbits: Option<u64>,
}

impl RootSpec {
    pub fn bits(&self) -> u64 {
        self.hbits.unwrap_or(0) + self.pbits.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatSpec {
    root: Option<RootSpec>,
    ranks: BTreeMap<String, RankSpec>,
}

impl FormatSpec {
    pub fn new(root: Option<RootSpec>, ranks: impl IntoIterator<Item = (String, RankSpec)>) -> Self {
        Self {
            root,
            ranks: ranks.into_iter().collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, FormatSpecError> {
        let entries: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)?;
        let mut spec = Self::default();
        for (entry, value) in entries {
            let invalid = |source| FormatSpecError::Invalid {
                entry: entry.clone(),
                source,
            };
            if entry == ROOT_KEY {
                spec.root = Some(serde_json::from_value(value).map_err(invalid)?);
            } else {
                let rank = serde_json::from_value(value).map_err(invalid)?;
                spec.ranks.insert(entry, rank);
            }
        }
        Ok(spec)
    }

    pub fn load(path: &Path) -> Result<Self, FormatSpecError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(root) = &self.root {
            map.insert(ROOT_KEY.to_string(), serde_json::json!(root));
        }
        for (name, rank) in &self.ranks {
            map.insert(name.clone(), serde_json::json!(rank));
        }
        serde_json::Value::Object(map)
    }

    pub fn root(&self) -> Option<&RootSpec> {
        self.root.as_ref()
    }

    pub fn rank(&self, name: &str) -> Option<&RankSpec> {
        self.ranks.get(name)
    }

    /// Names of every rank with an entry.
    pub fn rank_names(&self) -> impl Iterator<Item = &str> {
        self.ranks.keys().map(String::as_str)
    }

    /// The explicitly requested format of a rank, if any.
    pub fn format_of(&self, rank: &str) -> Option<FormatKind> {
        self.ranks.get(rank).and_then(|r| r.format)
    }
}
