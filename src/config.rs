//! Runtime configuration for fibertree-sim.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Codec layout choices and the default traffic policy live here; per-tensor
//! bit widths live in format spec files.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::model::trace::AccessKind;
use crate::model::traffic::TrafficPolicy;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fibertree-sim",
    about = "Fiber-tree storage formats and memory-traffic simulation"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "fibertree.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Encode a tensor into per-rank coordinate/payload buffers.
    Encode {
        #[command(flatten)]
        input: TensorArgs,

        /// Where to write the image (binary unless --json).
        #[arg(short, long)]
        output: PathBuf,

        /// Write the image as JSON instead of the binary layout.
        #[arg(long)]
        json: bool,
    },

    /// Decode a binary image back into a tensor (JSON on stdout).
    Decode {
        /// Image written by `encode`.
        image: PathBuf,
    },

    /// Print the footprint of a tensor under a format spec.
    Footprint {
        #[command(flatten)]
        input: TensorArgs,
    },

    /// Replay an access trace and estimate traffic.
    Traffic {
        #[command(flatten)]
        input: TensorArgs,

        /// Access trace (CSV).
        #[arg(long)]
        trace: PathBuf,

        /// Rank whose accesses are charged.
        #[arg(long)]
        rank: String,

        /// Tensor index, for intersection and population traces.
        #[arg(long)]
        tensor_index: Option<usize>,

        /// Read or write view of a population trace.
        #[arg(long, value_enum, default_value_t = AccessKind::Read)]
        access: AccessKind,

        /// Overrides `traffic.policy`.
        #[arg(long, value_enum)]
        policy: Option<TrafficPolicy>,

        /// Overrides `traffic.capacity_bits`.
        #[arg(long)]
        capacity_bits: Option<u64>,

        /// Also write the extracted per-rank trace here.
        #[arg(long)]
        extracted: Option<PathBuf>,
    },
}

/// Tensor and format spec inputs shared by the subcommands.
#[derive(Args, Debug, Clone)]
pub struct TensorArgs {
    /// Tensor (JSON).
    #[arg(short, long)]
    pub tensor: PathBuf,

    /// Format spec (JSON).
    #[arg(short = 's', long)]
    pub format_spec: PathBuf,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Codec layout settings.
    pub codec: CodecConfig,

    /// Traffic simulation defaults.
    pub traffic: TrafficConfig,
}

/// Codec layout settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Upper-rank pointers hold running totals (CSR) rather than
    /// per-element child counts.
    pub cumulative_occupancy: bool,

    /// Apply zstd compression when writing binary images.
    pub compress_image: bool,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            cumulative_occupancy: true,
            compress_image: false,
            zstd_level: 3,
        }
    }
}

/// Traffic simulation defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    pub policy: TrafficPolicy,

    /// Capacity of the simulated cache in bits.
    pub capacity_bits: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            policy: TrafficPolicy::Buffet,
            capacity_bits: 1024,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
