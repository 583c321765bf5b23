//! Find the relevant chunks of an experiment under one strategy and
//! optionally record their ideal ranking.

use anyhow::Context;
use chunkeval::embeddings::EmbedderRegistry;
use chunkeval::{workflow, Config, Store};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "analyze")]
struct Args {
    /// Experiment id.
    #[arg(long)]
    experiment: i64,

    /// Strategy name.
    #[arg(long)]
    strategy: String,

    /// JSON object mapping chunk index to ideal rank, e.g. {"3": 1, "4": 2}.
    #[arg(long)]
    ranks: Option<PathBuf>,
}

fn read_ranks(path: &PathBuf) -> anyhow::Result<HashMap<usize, u32>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let by_key: HashMap<String, u32> =
        serde_json::from_str(&raw).context("Ranks must be a JSON object of index -> rank")?;
    by_key
        .into_iter()
        .map(|(index, rank)| {
            let index = index
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid chunk index '{}'", index))?;
            Ok((index, rank))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.storage.log_level.as_str()),
    )
    .init();
    let store = Store::open(config.db_path()).await?;
    let registry = EmbedderRegistry::from_config(&config.embeddings);

    let experiment = store.load_experiment(args.experiment).await?;
    let strategy = store.load_strategy(&args.strategy).await?;
    let segmentation_id =
        workflow::ensure_segmentation(&store, &registry, &experiment, &strategy).await?;

    let records = match &args.ranks {
        Some(path) => {
            let ranks = read_ranks(path)?;
            workflow::rank(&store, experiment.id, segmentation_id, &ranks).await?
        }
        None => {
            workflow::analyze(&store, experiment.id, segmentation_id)
                .await?
                .records
        }
    };

    println!(
        "Experiment {} / strategy '{}' (segmentation {}): {} relevant chunk(s)\n",
        experiment.id,
        strategy.spec.name,
        segmentation_id,
        records.len()
    );
    println!("{:>6}  {:>16}  {:>5}  {:>6}  {:>7}  {:>7}", "chunk", "span", "rank", "w", "density", "w'");
    for record in &records {
        let rank = record
            .ideal_rank
            .map_or_else(|| "-".to_string(), |r| r.to_string());
        let (w, density, effective) = record.weights.map_or_else(
            || ("-".to_string(), "-".to_string(), "-".to_string()),
            |w| {
                (
                    format!("{:.1}", w.intrinsic_importance),
                    format!("{:.3}", w.relevance_density),
                    format!("{:.3}", w.effective_relevance),
                )
            },
        );
        println!(
            "{:>6}  {:>16}  {:>5}  {:>6}  {:>7}  {:>7}",
            record.chunk.index,
            record.span.to_string(),
            rank,
            w,
            density,
            effective
        );
    }
    Ok(())
}
