//! Run a retrieval simulation for one experiment and strategy and store
//! its scores.

use chunkeval::embeddings::EmbedderRegistry;
use chunkeval::retrieval::EmbeddingRetriever;
use chunkeval::{workflow, Config, Store};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "simulate")]
struct Args {
    /// Experiment id.
    #[arg(long)]
    experiment: i64,

    /// Strategy name.
    #[arg(long)]
    strategy: String,
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
    workflow::analyze(&store, experiment.id, segmentation_id).await?;

    let embedder = registry.get(&config.embeddings.model).await?;
    let retriever = EmbeddingRetriever::new(embedder);
    let simulation = workflow::simulate(
        &store,
        &retriever,
        &experiment,
        segmentation_id,
        &config.retrieval,
    )
    .await?;

    println!("Simulation {}", simulation.id);
    println!("  retriever:  {} ({})", simulation.retriever_name, simulation.embedding_model);
    println!("  retrieved:  {}", simulation.k_retrieved);
    for item in &simulation.retrieved {
        println!("    {:>3}. chunk {:<6} {:.4}", item.rank, item.chunk.index, item.similarity);
    }
    if let Some(scores) = simulation.scores {
        println!("  actual:     {:.4}", scores.actual_gain);
        println!("  ideal:      {:.4}", scores.ideal_gain);
        println!("  normalized: {:.4}", scores.normalized_score);
    }
    Ok(())
}
