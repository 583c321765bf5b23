//! Segment a text file with one strategy and print the chunks.

use anyhow::Context;
use chunkeval::config::EmbeddingsConfig;
use chunkeval::embeddings::EmbedderRegistry;
use chunkeval::segment::{self, StrategySpec};
use chunkeval::Config;
use clap::Parser;
use std::path::PathBuf;

/// Split a document into chunks with a segmentation strategy.
#[derive(Parser, Debug)]
#[command(name = "segment")]
struct Args {
    /// Plain-text document to segment.
    #[arg(long)]
    text: PathBuf,

    /// Strategy JSON: {"name", "method_type", "parameters"}.
    #[arg(long)]
    strategy: PathBuf,

    /// Print chunks as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load();
    let log_level = config
        .as_ref()
        .map_or("info", |c| c.storage.log_level.as_str());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let text = std::fs::read_to_string(&args.text)
        .with_context(|| format!("Failed to read {}", args.text.display()))?;
    let strategy_json = std::fs::read_to_string(&args.strategy)
        .with_context(|| format!("Failed to read {}", args.strategy.display()))?;
    let strategy: StrategySpec =
        serde_json::from_str(&strategy_json).context("Invalid strategy JSON")?;

    // Only semantic strategies need the embeddings section
    let embeddings = match config {
        Ok(config) => config.embeddings,
        Err(e) => {
            log::debug!("No usable config ({}), using default embeddings settings", e);
            EmbeddingsConfig::default()
        }
    };
    let registry = EmbedderRegistry::from_config(&embeddings);

    let segments = segment::segment_strategy(&text, &strategy, &registry).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&segments)?);
        return Ok(());
    }

    println!("{} chunks from strategy '{}'\n", segments.len(), strategy.name);
    for (i, seg) in segments.iter().enumerate() {
        let preview: String = seg.text.chars().take(60).collect();
        let kind = seg.metadata.as_ref().map_or("-", |m| m.kind.as_str());
        println!(
            "{:>4}  [{:>7}, {:>7})  {:<20}  {}",
            i,
            seg.start,
            seg.end,
            kind,
            preview.replace('\n', " ")
        );
    }
    Ok(())
}
