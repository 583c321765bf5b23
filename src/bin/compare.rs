//! Compare chunking strategies pairwise with the Wilcoxon signed-rank test.

use anyhow::Context;
use chunkeval::stats::{self, ScoreMatrix, StrategyScores};
use chunkeval::{workflow, Config, Store};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "compare")]
struct Args {
    /// JSON object of strategy name -> scores aligned by experiment (null for missing).
    #[arg(long, conflicts_with = "from_db")]
    scores: Option<PathBuf>,

    /// Use the latest stored simulation scores.
    #[arg(long)]
    from_db: bool,

    /// Strategy pair as A::B; repeatable.
    #[arg(long = "pair", required = true)]
    pairs: Vec<String>,

    /// Significance level (defaults to statistics.alpha from config).
    #[arg(long)]
    alpha: Option<f64>,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,
}

fn parse_pair(raw: &str) -> anyhow::Result<(String, String)> {
    match raw.split_once("::") {
        Some((a, b)) if !a.trim().is_empty() && !b.trim().is_empty() => {
            Ok((a.trim().to_string(), b.trim().to_string()))
        }
        _ => anyhow::bail!("Invalid pair '{}', expected A::B", raw),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let loaded = Config::load();
    let log_level = loaded
        .as_ref()
        .map_or("info", |c| c.storage.log_level.as_str());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let pairs = args
        .pairs
        .iter()
        .map(|raw| parse_pair(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if args.scores.is_none() && !args.from_db {
        anyhow::bail!("Either --scores FILE or --from-db is required");
    }

    // Config is only required for --from-db
    let config = if args.from_db {
        Some(loaded?)
    } else {
        loaded
            .map_err(|e| log::debug!("No usable config ({}), using statistics defaults", e))
            .ok()
    };
    let statistics = config
        .as_ref()
        .map(|c| c.statistics.clone())
        .unwrap_or_default();
    let alpha = args.alpha.unwrap_or(statistics.alpha);
    if !(alpha > 0.0 && alpha < 1.0) {
        anyhow::bail!("--alpha must be between 0 and 1 (exclusive)");
    }

    let scores: StrategyScores = match (&args.scores, &config) {
        (Some(path), _) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&raw)
                .context("Scores must be a JSON object of name -> [score|null]")?
        }
        (None, Some(config)) => {
            let store = Store::open(config.db_path()).await?;
            let matrix: ScoreMatrix = workflow::score_matrix(&store).await?;
            log::info!("Loaded scores for {} experiment(s)", matrix.experiments.len());
            matrix.scores
        }
        (None, None) => anyhow::bail!("--from-db requires a configuration file"),
    };

    let results = stats::compare(&scores, &pairs, alpha);
    let summaries: std::collections::BTreeMap<_, _> = scores
        .iter()
        .map(|(name, column)| (name.clone(), stats::describe(column, statistics.trim_fraction)))
        .collect();

    if args.json {
        let output = json!({ "alpha": alpha, "comparisons": results, "summaries": summaries });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("=== Strategy summaries ===\n");
    println!("{:<24} {:>5} {:>8} {:>8} {:>8} {:>8}", "strategy", "n", "mean", "std", "median", "trimmed");
    for (name, s) in &summaries {
        println!(
            "{:<24} {:>5} {:>8.4} {:>8.4} {:>8.4} {:>8.4}",
            name, s.count, s.mean, s.std_dev, s.median, s.trimmed_mean
        );
    }

    println!("\n=== Wilcoxon signed-rank (alpha = {}) ===\n", alpha);
    for r in &results {
        println!(
            "{} vs {}: n = {}, W = {:.1}, p = {:.4}{}  (means {:.4} / {:.4})",
            r.strategy_a,
            r.strategy_b,
            r.n_pairs,
            r.statistic,
            r.p_value,
            if r.significant { " *" } else { "" },
            r.mean_a,
            r.mean_b
        );
        if let Some(note) = &r.note {
            println!("    {}", note);
        }
    }
    Ok(())
}
