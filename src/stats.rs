//! Significance Tester and score summaries.
//!
//! Strategies are compared pairwise with the two-sided Wilcoxon signed-rank
//! test on per-experiment normalized scores. Zero differences are discarded
//! before ranking. Small samples without ties use the exact null
//! distribution; everything else uses the normal approximation with tie
//! correction and no continuity correction.
//!
//! # References
//!
//! - Wilcoxon (1945). "Individual comparisons by ranking methods"
//! - Smucker et al. (2007). "A comparison of statistical significance tests for IR evaluation"

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Largest number of non-zero differences tested with the exact distribution.
pub const EXACT_MAX_N: usize = 50;

/// Per-strategy score vectors aligned by experiment position.
pub type StrategyScores = BTreeMap<String, Vec<Option<f64>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PValueMethod {
    Exact,
    Normal,
}

/// Result of a Wilcoxon signed-rank test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WilcoxonResult {
    /// min(W+, W-)
    pub statistic: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Differences left after discarding zeros
    pub n_nonzero: usize,
    pub method: PValueMethod,
}

/// Wilcoxon signed-rank test on paired differences.
///
/// Zero differences are discarded. Returns `None` when no non-zero
/// difference remains, since the test is undefined there.
pub fn wilcoxon_signed_rank(differences: &[f64]) -> Option<WilcoxonResult> {
    let nonzero: Vec<f64> = differences.iter().copied().filter(|d| *d != 0.0).collect();
    let n = nonzero.len();
    if n == 0 {
        return None;
    }
    let zeros_dropped = n < differences.len();

    let (ranks, tie_groups) = average_ranks(&nonzero.iter().map(|d| d.abs()).collect::<Vec<_>>());
    let w_plus: f64 = nonzero
        .iter()
        .zip(&ranks)
        .filter(|(d, _)| **d > 0.0)
        .map(|(_, r)| r)
        .sum();
    let total = (n * (n + 1)) as f64 / 2.0;
    let w_minus = total - w_plus;
    let statistic = w_plus.min(w_minus);

    let has_ties = tie_groups.iter().any(|&t| t > 1);
    if n <= EXACT_MAX_N && !has_ties && !zeros_dropped {
        let p_value = (2.0 * exact_cdf(n, statistic)).min(1.0);
        return Some(WilcoxonResult {
            statistic,
            p_value,
            n_nonzero: n,
            method: PValueMethod::Exact,
        });
    }

    let mean = total / 2.0;
    let tie_correction: f64 = tie_groups
        .iter()
        .map(|&t| {
            let t = t as f64;
            t * t * t - t
        })
        .sum::<f64>()
        / 48.0;
    let variance = (n * (n + 1) * (2 * n + 1)) as f64 / 24.0 - tie_correction;
    let p_value = if variance > 0.0 {
        let z = (statistic - mean) / variance.sqrt();
        (2.0 * normal_cdf(-z.abs())).min(1.0)
    } else {
        1.0
    };

    Some(WilcoxonResult {
        statistic,
        p_value,
        n_nonzero: n,
        method: PValueMethod::Normal,
    })
}

/// 1-based average ranks, plus the size of every group of tied values.
fn average_ranks(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut groups = Vec::new();
    let mut i = 0;
    while i < order.len() {
        let mut j = i + 1;
        while j < order.len() && values[order[j]] == values[order[i]] {
            j += 1;
        }
        // positions i..j share ranks i+1..=j
        let average = (i + 1 + j) as f64 / 2.0;
        for &idx in &order[i..j] {
            ranks[idx] = average;
        }
        groups.push(j - i);
        i = j;
    }
    (ranks, groups)
}

/// P(W+ <= w) under the null hypothesis for `n` untied differences.
fn exact_cdf(n: usize, w: f64) -> f64 {
    let max = n * (n + 1) / 2;
    // probability of each rank sum, built one rank at a time
    let mut dist = vec![0.0f64; max + 1];
    dist[0] = 1.0;
    for rank in 1..=n {
        for sum in (rank..=max).rev() {
            dist[sum] = (dist[sum] + dist[sum - rank]) / 2.0;
        }
        for value in dist.iter_mut().take(rank) {
            *value /= 2.0;
        }
    }
    let bound = w.floor().max(0.0) as usize;
    dist.iter().take(bound.min(max) + 1).sum()
}

/// Normal CDF using error function approximation.
fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / 2.0_f64.sqrt()))
}

/// Error function approximation (Abramowitz and Stegun 7.1.26).
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Outcome of comparing two strategies over the same experiments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyComparisonResult {
    pub strategy_a: String,
    pub strategy_b: String,
    /// Experiments where both strategies have a finite score
    pub n_pairs: usize,
    /// NaN when the test could not be run
    pub statistic: f64,
    /// NaN when the test could not be run
    pub p_value: f64,
    pub significant: bool,
    pub mean_a: f64,
    pub mean_b: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Compare every requested pair of strategies.
///
/// Positions where either score is missing or not finite are dropped. Fewer
/// than two remaining pairs gives a NaN statistic and p-value; identical
/// vectors give statistic 0 and p-value 1. Neither case, nor an unknown
/// strategy name, stops the other pairs from being compared.
pub fn compare(
    scores: &StrategyScores,
    pairs: &[(String, String)],
    alpha: f64,
) -> Vec<StrategyComparisonResult> {
    pairs
        .iter()
        .map(|(a, b)| compare_pair(scores, a, b, alpha))
        .collect()
}

fn add_note(result: &mut StrategyComparisonResult, note: String) {
    result.note = Some(match result.note.take() {
        Some(existing) => format!("{}; {}", existing, note),
        None => note,
    });
}

fn compare_pair(scores: &StrategyScores, a: &str, b: &str, alpha: f64) -> StrategyComparisonResult {
    let mut result = StrategyComparisonResult {
        strategy_a: a.to_string(),
        strategy_b: b.to_string(),
        n_pairs: 0,
        statistic: f64::NAN,
        p_value: f64::NAN,
        significant: false,
        mean_a: f64::NAN,
        mean_b: f64::NAN,
        note: None,
    };

    let (Some(scores_a), Some(scores_b)) = (scores.get(a), scores.get(b)) else {
        let missing = if scores.contains_key(a) { b } else { a };
        log::warn!("Skipping {} vs {}: no scores for '{}'", a, b, missing);
        result.note = Some(format!("no scores for strategy '{}'", missing));
        return result;
    };

    if scores_a.len() != scores_b.len() {
        log::warn!(
            "{} has {} scores but {} has {}; comparing the first {} experiments only",
            a,
            scores_a.len(),
            b,
            scores_b.len(),
            scores_a.len().min(scores_b.len())
        );
        add_note(
            &mut result,
            format!(
                "score vectors differ in length ({} vs {})",
                scores_a.len(),
                scores_b.len()
            ),
        );
    }

    let valid: Vec<(f64, f64)> = scores_a
        .iter()
        .zip(scores_b)
        .filter_map(|pair| match pair {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((*x, *y)),
            _ => None,
        })
        .collect();

    result.n_pairs = valid.len();
    if !valid.is_empty() {
        let n = valid.len() as f64;
        result.mean_a = valid.iter().map(|(x, _)| x).sum::<f64>() / n;
        result.mean_b = valid.iter().map(|(_, y)| y).sum::<f64>() / n;
    }

    if valid.len() < 2 {
        log::warn!(
            "Skipping {} vs {}: {} valid paired observation(s)",
            a,
            b,
            valid.len()
        );
        add_note(&mut result, "fewer than 2 valid paired observations".to_string());
        return result;
    }

    let differences: Vec<f64> = valid.iter().map(|(x, y)| x - y).collect();
    match wilcoxon_signed_rank(&differences) {
        None => {
            result.statistic = 0.0;
            result.p_value = 1.0;
            add_note(&mut result, "all paired differences are zero".to_string());
        }
        Some(test) => {
            result.statistic = test.statistic;
            result.p_value = test.p_value;
            result.significant = test.p_value < alpha;
        }
    }
    log::debug!(
        "{} vs {}: n={}, W={}, p={:.4}",
        a,
        b,
        result.n_pairs,
        result.statistic,
        result.p_value
    );
    result
}

/// Descriptive statistics of one strategy's valid scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1)
    pub std_dev: f64,
    pub median: f64,
    pub trimmed_mean: f64,
}

/// Summarize the finite values of `scores`; statistics that need more data
/// than is available are NaN.
///
/// `trim_fraction` of the values is cut from each end before the trimmed mean.
pub fn describe(scores: &[Option<f64>], trim_fraction: f64) -> ScoreSummary {
    let mut values: Vec<f64> = scores.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();

    let mean_of = |v: &[f64]| {
        if v.is_empty() {
            f64::NAN
        } else {
            v.iter().sum::<f64>() / v.len() as f64
        }
    };
    let mean = mean_of(&values);

    let std_dev = if n < 2 {
        f64::NAN
    } else {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    };

    let median = match n {
        0 => f64::NAN,
        _ if n % 2 == 1 => values[n / 2],
        _ => (values[n / 2 - 1] + values[n / 2]) / 2.0,
    };

    let cut = (n as f64 * trim_fraction.clamp(0.0, 0.5)).floor() as usize;
    let trimmed_mean = if 2 * cut < n {
        mean_of(&values[cut..n - cut])
    } else {
        f64::NAN
    };

    ScoreSummary {
        count: n,
        mean,
        std_dev,
        median,
        trimmed_mean,
    }
}

/// One scored simulation, as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRun {
    pub experiment_id: i64,
    pub strategy: String,
    pub normalized_score: f64,
    pub ran_at: DateTime<Utc>,
}

/// Normalized scores per strategy, aligned on a fixed experiment order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoreMatrix {
    pub experiments: Vec<i64>,
    pub scores: StrategyScores,
}

impl ScoreMatrix {
    /// Keep the most recent run of every (experiment, strategy).
    ///
    /// Cells with no run, or whose latest score is NaN or infinite, are None.
    pub fn from_runs(strategies: &[String], experiments: &[i64], runs: &[ScoreRun]) -> Self {
        let mut latest: HashMap<(i64, &str), &ScoreRun> = HashMap::new();
        for run in runs {
            latest
                .entry((run.experiment_id, run.strategy.as_str()))
                .and_modify(|current| {
                    if run.ran_at > current.ran_at {
                        *current = run;
                    }
                })
                .or_insert(run);
        }

        let scores = strategies
            .iter()
            .map(|strategy| {
                let column = experiments
                    .iter()
                    .map(|experiment| {
                        let run = latest.get(&(*experiment, strategy.as_str()))?;
                        if run.normalized_score.is_finite() {
                            Some(run.normalized_score)
                        } else {
                            log::warn!(
                                "Dropping invalid score {} for experiment {} / '{}'",
                                run.normalized_score,
                                experiment,
                                strategy
                            );
                            None
                        }
                    })
                    .collect();
                (strategy.clone(), column)
            })
            .collect();

        Self {
            experiments: experiments.to_vec(),
            scores,
        }
    }

    pub fn summaries(&self, trim_fraction: f64) -> BTreeMap<String, ScoreSummary> {
        self.scores
            .iter()
            .map(|(name, column)| (name.clone(), describe(column, trim_fraction)))
            .collect()
    }
}
