//! Per-query ranking metrics at a cutoff: P@k, Recall@k, RR and AP@k.

use crate::error::{RankevalError, Result};
use crate::ranking::ScoredDoc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// A ranked document annotated with its relevance for the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub doc_id: String,
    pub score: f32,
    /// 0-based position in the ranking.
    pub rank: usize,
    pub is_relevant: bool,
}

/// Metrics of one query's ranking at a fixed cutoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub precision: f64,
    pub recall: f64,
    pub reciprocal_rank: f64,
    pub average_precision: f64,
}

impl Metrics {
    pub fn get(&self, name: MetricName) -> f64 {
        match name {
            MetricName::Precision => self.precision,
            MetricName::Recall => self.recall,
            MetricName::ReciprocalRank => self.reciprocal_rank,
            MetricName::AveragePrecision => self.average_precision,
        }
    }
}

/// Metric selectable for training and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricName {
    #[serde(rename = "p")]
    Precision,
    #[serde(rename = "r")]
    Recall,
    #[serde(rename = "mrr")]
    ReciprocalRank,
    #[serde(rename = "map")]
    AveragePrecision,
}

impl MetricName {
    /// Short name used in file names and report headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Precision => "p",
            MetricName::Recall => "r",
            MetricName::ReciprocalRank => "mrr",
            MetricName::AveragePrecision => "map",
        }
    }
}

impl FromStr for MetricName {
    type Err = RankevalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "p" | "precision" => Ok(MetricName::Precision),
            "r" | "recall" => Ok(MetricName::Recall),
            "mrr" | "rr" => Ok(MetricName::ReciprocalRank),
            "map" | "ap" => Ok(MetricName::AveragePrecision),
            other => Err(RankevalError::Config(format!(
                "unknown metric '{}' (expected p, r, mrr or map)",
                other
            ))),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order provider output by descending score and tag each document's relevance.
///
/// The sort is stable, so equal scores keep the provider's order. A document
/// returned more than once keeps only its best-scored occurrence.
pub fn annotate_hits(mut ranked: Vec<ScoredDoc>, relevant: &HashSet<String>) -> Vec<Hit> {
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut seen = HashSet::with_capacity(ranked.len());
    ranked
        .into_iter()
        .filter(|doc| seen.insert(doc.doc_id.clone()))
        .enumerate()
        .map(|(rank, doc)| Hit {
            is_relevant: relevant.contains(&doc.doc_id),
            doc_id: doc.doc_id,
            score: doc.score,
            rank,
        })
        .collect()
}

/// Compute P@k, Recall@k, RR and AP@k over the first `cutoff` hits.
///
/// Precision is normalized by `cutoff` even when fewer hits were returned.
/// AP sums precision at every relevant position inside the cutoff and divides
/// by the total number of relevant documents, not by the relevant hits found.
pub fn compute_metrics(hits: &[Hit], relevant: &HashSet<String>, cutoff: usize) -> Result<Metrics> {
    if cutoff == 0 {
        return Err(RankevalError::Config("cutoff must be greater than 0".to_string()));
    }

    let num_relevant = relevant.len();
    let mut true_hits = 0usize;
    let mut reciprocal_rank = 0.0;
    let mut precision_sum = 0.0;

    let mut counted: HashSet<&str> = HashSet::new();

    for (i, hit) in hits.iter().take(cutoff).enumerate() {
        // Relevance comes from `relevant`, not from the hit's tag; a repeated document counts once
        if !relevant.contains(&hit.doc_id) || !counted.insert(hit.doc_id.as_str()) {
            continue;
        }
        true_hits += 1;
        if true_hits == 1 {
            reciprocal_rank = 1.0 / (i + 1) as f64;
        }
        precision_sum += true_hits as f64 / (i + 1) as f64;
    }

    let mut metrics = Metrics {
        reciprocal_rank,
        ..Metrics::default()
    };
    if true_hits > 0 {
        // true_hits > 0 implies num_relevant >= true_hits
        metrics.precision = true_hits as f64 / cutoff as f64;
        metrics.recall = true_hits as f64 / num_relevant as f64;
        metrics.average_precision = precision_sum / num_relevant as f64;
    }

    Ok(metrics)
}
