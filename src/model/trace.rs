//! Access traces.
//!
//! An [`AccessTrace`] is the CSV log written while an algebra pass runs:
//!
//! ```text
//! M_pos,K_pos,M,K,0_match,1_match
//! ```
//!
//! One `_pos` column per enclosing rank, one coordinate column per traced
//! rank, then per-tensor `{i}_match` (intersection) or `{i}_access`
//! (population) flags. Iteration traces carry no flags.
//!
//! [`AccessTrace::build_trace`] reduces a trace to the coordinate paths of
//! one rank, in evaluation order, for one participating tensor.

use std::io::{Read, Write};
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::fiber::Coord;

const POS_SUFFIX: &str = "_pos";
const MATCH_SUFFIX: &str = "_match";
const ACCESS_SUFFIX: &str = "_access";

type FlagFilter = Box<dyn Fn(&[bool]) -> bool>;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace header {header:?} has no column for rank {rank}")]
    HeaderMismatch { rank: String, header: Vec<String> },

    #[error("malformed trace header {0:?}")]
    BadHeader(Vec<String>),

    #[error("{0} trace needs an explicit tensor index")]
    MissingTensor(TraceKind),

    #[error("tensor {0} does not appear in the trace")]
    UnknownTensor(usize),

    #[error("row {row}: bad value {value:?} in column {column}")]
    BadCell {
        row: usize,
        column: String,
        value: String,
    },

    #[error("record has {found} fields, trace expects {expected}")]
    RecordWidth { expected: usize, found: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    Iterate,
    Intersect,
    Populate,
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceKind::Iterate => write!(f, "iterate"),
            TraceKind::Intersect => write!(f, "intersect"),
            TraceKind::Populate => write!(f, "populate"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    #[default]
    Read,
    Write,
}

/// Which tensor's view of a trace to extract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceSelection {
    /// Required for intersection and population traces.
    pub tensor: Option<usize>,
    /// Population traces only: `Write` selects the steps that write the
    /// destination tensor, i.e. where any other tensor is accessed.
    pub access: AccessKind,
}

impl TraceSelection {
    pub fn tensor(tensor: usize) -> Self {
        Self {
            tensor: Some(tensor),
            access: AccessKind::Read,
        }
    }

    pub fn write(tensor: usize) -> Self {
        Self {
            tensor: Some(tensor),
            access: AccessKind::Write,
        }
    }
}

/// One elementary algebra step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub positions: Vec<usize>,
    pub coords: Vec<Coord>,
    pub flags: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTrace {
    pos_ranks: Vec<String>,
    ranks: Vec<String>,
    kind: TraceKind,
    tensors: Vec<usize>,
    records: Vec<AccessRecord>,
}

impl AccessTrace {
    /// An empty trace. `tensors` lists the flag columns; it must be empty
    /// for iteration traces.
    pub fn new(
        pos_ranks: Vec<String>,
        ranks: Vec<String>,
        kind: TraceKind,
        tensors: Vec<usize>,
    ) -> Self {
        let tensors = if kind == TraceKind::Iterate {
            Vec::new()
        } else {
            tensors
        };
        Self {
            pos_ranks,
            ranks,
            kind,
            tensors,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: AccessRecord) -> Result<(), TraceError> {
        let expected = self.pos_ranks.len() + self.ranks.len() + self.tensors.len();
        let found = record.positions.len() + record.coords.len() + record.flags.len();
        if record.positions.len() != self.pos_ranks.len()
            || record.coords.len() != self.ranks.len()
            || record.flags.len() != self.tensors.len()
        {
            return Err(TraceError::RecordWidth { expected, found });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn kind(&self) -> TraceKind {
        self.kind
    }

    pub fn ranks(&self) -> &[String] {
        &self.ranks
    }

    pub fn tensors(&self) -> &[usize] {
        &self.tensors
    }

    pub fn records(&self) -> &[AccessRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn header(&self) -> Vec<String> {
        let suffix = match self.kind {
            TraceKind::Populate => ACCESS_SUFFIX,
            _ => MATCH_SUFFIX,
        };
        self.pos_ranks
            .iter()
            .map(|r| format!("{r}{POS_SUFFIX}"))
            .chain(self.ranks.iter().cloned())
            .chain(self.tensors.iter().map(|t| format!("{t}{suffix}")))
            .collect()
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TraceError> {
        let mut rdr = csv::ReaderBuilder::new().from_reader(reader);
        let header: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let mut pos_ranks = Vec::new();
        let mut ranks = Vec::new();
        let mut tensors = Vec::new();
        let mut kind = TraceKind::Iterate;
        for column in &header {
            if let Some(rank) = column.strip_suffix(POS_SUFFIX) {
                pos_ranks.push(rank.to_string());
            } else if let Some((tensor, flag_kind)) = parse_flag(column) {
                if kind != TraceKind::Iterate && kind != flag_kind {
                    return Err(TraceError::BadHeader(header.clone()));
                }
                kind = flag_kind;
                tensors.push(tensor);
            } else {
                ranks.push(column.clone());
            }
        }

        let mut trace = Self::new(pos_ranks, ranks, kind, tensors);
        if trace.header() != header {
            return Err(TraceError::BadHeader(header));
        }
        let (n_pos, n_coord) = (trace.pos_ranks.len(), trace.ranks.len());
        for (row, result) in rdr.records().enumerate() {
            let record = result?;
            let mut positions = Vec::with_capacity(n_pos);
            let mut coords = Vec::with_capacity(n_coord);
            let mut flags = Vec::with_capacity(trace.tensors.len());
            for (i, cell) in record.iter().enumerate() {
                let column = header.get(i).map(String::as_str).unwrap_or_default();
                let bad = || TraceError::BadCell {
                    row: row + 1,
                    column: column.to_string(),
                    value: cell.to_string(),
                };
                if i < n_pos + n_coord {
                    let n: usize = cell.trim().parse().map_err(|_| bad())?;
                    if i < n_pos {
                        positions.push(n);
                    } else {
                        coords.push(n);
                    }
                } else {
                    flags.push(parse_bool(cell).ok_or_else(bad)?);
                }
            }
            trace.push(AccessRecord {
                positions,
                coords,
                flags,
            })?;
        }

        debug!(kind = %trace.kind, rows = trace.len(), ranks = ?trace.ranks, "Trace loaded");
        Ok(trace)
    }

    pub fn read_csv(path: &Path) -> Result<Self, TraceError> {
        Self::from_reader(std::fs::File::open(path)?)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), TraceError> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.header())?;
        for record in &self.records {
            let row = record
                .positions
                .iter()
                .chain(record.coords.iter())
                .map(|n| n.to_string())
                .chain(record.flags.iter().map(|&f| if f { "True" } else { "False" }.to_string()));
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), TraceError> {
        self.to_writer(std::fs::File::create(path)?)
    }

    /// Coordinate paths down to `rank`, one per change of position at or
    /// above `rank`, restricted to the steps that touch the selected tensor.
    pub fn build_trace(&self, rank: &str, selection: TraceSelection) -> Result<RankTrace, TraceError> {
        let depth = self
            .ranks
            .iter()
            .position(|r| r == rank)
            .ok_or_else(|| TraceError::HeaderMismatch {
                rank: rank.to_string(),
                header: self.header(),
            })?;

        let filter: Option<FlagFilter> = match self.kind {
            TraceKind::Iterate => None,
            kind => {
                let tensor = selection.tensor.ok_or(TraceError::MissingTensor(kind))?;
                let column = self
                    .tensors
                    .iter()
                    .position(|&t| t == tensor)
                    .ok_or(TraceError::UnknownTensor(tensor))?;
                if kind == TraceKind::Populate && selection.access == AccessKind::Write {
                    Some(Box::new(move |flags: &[bool]| {
                        flags.iter().enumerate().any(|(i, &f)| f && i != column)
                    }) as FlagFilter)
                } else {
                    Some(Box::new(move |flags: &[bool]| flags[column]) as FlagFilter)
                }
            }
        };

        let pos_depth = (depth + 1).min(self.pos_ranks.len());
        let mut paths: Vec<Vec<Coord>> = Vec::new();
        let mut last: Option<(&[usize], &[Coord])> = None;
        for record in &self.records {
            if let Some(keep) = &filter {
                if !keep(&record.flags) {
                    continue;
                }
            }
            let key = (&record.positions[..pos_depth], &record.coords[..=depth]);
            if last == Some(key) {
                continue;
            }
            last = Some(key);
            paths.push(key.1.to_vec());
        }

        debug!(rank, rows = self.len(), selected = paths.len(), "Trace extracted");
        Ok(RankTrace {
            ranks: self.ranks[..=depth].to_vec(),
            paths,
        })
    }
}

fn parse_flag(column: &str) -> Option<(usize, TraceKind)> {
    let (tensor, kind) = if let Some(t) = column.strip_suffix(MATCH_SUFFIX) {
        (t, TraceKind::Intersect)
    } else if let Some(t) = column.strip_suffix(ACCESS_SUFFIX) {
        (t, TraceKind::Populate)
    } else {
        return None;
    };
    tensor.parse().ok().map(|t| (t, kind))
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell.trim() {
        "True" | "true" | "1" => Some(true),
        "False" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Coordinate paths of one rank in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankTrace {
    ranks: Vec<String>,
    paths: Vec<Vec<Coord>>,
}

impl RankTrace {
    pub fn new(ranks: Vec<String>, paths: Vec<Vec<Coord>>) -> Self {
        Self { ranks, paths }
    }

    pub fn ranks(&self) -> &[String] {
        &self.ranks
    }

    pub fn paths(&self) -> &[Vec<Coord>] {
        &self.paths
    }

    /// Paths projected onto a tensor's ranks, in the tensor's rank order.
    /// Projection stops at the first tensor rank the trace does not cover.
    pub fn uses(&self, tensor_ranks: &[String]) -> Vec<Vec<Coord>> {
        let columns: Vec<usize> = tensor_ranks
            .iter()
            .map_while(|r| self.ranks.iter().position(|t| t == r))
            .collect();
        self.paths
            .iter()
            .map(|p| columns.iter().map(|&c| p[c]).collect())
            .collect()
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), TraceError> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.ranks)?;
        for path in &self.paths {
            wtr.write_record(path.iter().map(|c| c.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), TraceError> {
        self.to_writer(std::fs::File::create(path)?)
    }
}
