//! fibertree-sim command-line front end.
//!
//! Encodes tensors under a per-rank format spec, reports their bit
//! footprints, and replays access traces through the traffic model.

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use fibertree_sim::codec::image::{decode_image, encode_image};
use fibertree_sim::codec::Codec;
use fibertree_sim::config::{Cli, Command, Config, TensorArgs};
use fibertree_sim::fiber::Tensor;
use fibertree_sim::model::{AccessTrace, Footprint, FormatSpec, TraceSelection, TrafficModel};

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "fibertree_sim=debug"
    } else {
        "fibertree_sim=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("fibertree-sim v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;

    info!(
        cumulative_occupancy = config.codec.cumulative_occupancy,
        compress_image = config.codec.compress_image,
        policy = ?config.traffic.policy,
        capacity_bits = config.traffic.capacity_bits,
        "Configuration loaded"
    );

    match cli.command {
        Command::Encode {
            input,
            output,
            json,
        } => {
            let (tensor, spec) = load_inputs(&input)?;
            let codec = Codec::from_spec(&spec, &tensor, config.codec.clone());
            let image = codec.encode(&tensor)?;
            let data = if json {
                serde_json::to_vec_pretty(&image)?
            } else {
                encode_image(&image, &config.codec)?
            };
            std::fs::write(&output, &data)
                .with_context(|| format!("writing {}", output.display()))?;
            info!(
                tensor = tensor.name(),
                formats = ?codec.formats(),
                bytes = data.len(),
                output = %output.display(),
                "Image written"
            );
        }

        Command::Decode { image } => {
            let data =
                std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let tensor = Codec::decode(&decode_image(&data)?)?;
            println!("{}", serde_json::to_string_pretty(&tensor)?);
        }

        Command::Footprint { input } => {
            let (tensor, spec) = load_inputs(&input)?;
            let footprint = Footprint::new(&tensor, &spec)?;

            let mut ranks = serde_json::Map::new();
            for rank in tensor.rank_ids() {
                ranks.insert(rank.clone(), footprint.get_rank(rank)?.into());
            }
            let report = serde_json::json!({
                "tensor": tensor.name(),
                "root": footprint.get_root()?,
                "ranks": ranks,
                "subtree": footprint.get_subtree(&[])?,
                "total": footprint.get_tensor()?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Traffic {
            input,
            trace,
            rank,
            tensor_index,
            access,
            policy,
            capacity_bits,
            extracted,
        } => {
            let (tensor, spec) = load_inputs(&input)?;
            let footprint = Footprint::new(&tensor, &spec)?;
            let trace = AccessTrace::read_csv(&trace)
                .with_context(|| format!("reading trace {}", trace.display()))?;

            let selection = TraceSelection {
                tensor: tensor_index,
                access,
            };
            let rank_trace = trace.build_trace(&rank, selection)?;
            if let Some(path) = extracted {
                rank_trace.write_csv(&path)?;
            }

            let model = TrafficModel::new(footprint);
            let uses = model.uses(&rank_trace)?;
            let report = model.simulate(
                policy.unwrap_or(config.traffic.policy),
                &uses,
                capacity_bits.unwrap_or(config.traffic.capacity_bits),
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn load_inputs(args: &TensorArgs) -> anyhow::Result<(Tensor, FormatSpec)> {
    Ok((load_tensor(&args.tensor)?, FormatSpec::load(&args.format_spec)?))
}

fn load_tensor(path: &Path) -> anyhow::Result<Tensor> {
    let data =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let tensor: Tensor = serde_json::from_str(&data)?;
    info!(
        tensor = tensor.name(),
        ranks = ?tensor.rank_ids(),
        shape = ?tensor.shape(),
        "Tensor loaded"
    );
    Ok(tensor)
}
