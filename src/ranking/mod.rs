//! Ranking provider seam: the retrieval engine is external, evaluation only consumes its output.

pub mod run_file;

pub use run_file::{RunDirectory, RunFileProvider};

use crate::error::{RankevalError, Result};
use crate::eval::EvalQuery;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed BM25 length normalization used alongside the tuned k1.
pub const BM25_B: f64 = 0.75;

/// A document returned by a ranking provider with its retrieval score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub doc_id: String,
    pub score: f32,
}

impl ScoredDoc {
    pub fn new(doc_id: impl Into<String>, score: f32) -> Self {
        Self {
            doc_id: doc_id.into(),
            score,
        }
    }
}

/// Trait for ranked-retrieval engines under evaluation
///
/// Implementations must be deterministic for a fixed query and configuration,
/// and safe to query concurrently (read-only).
pub trait RankingProvider: Send + Sync {
    /// Return up to `top_docs` documents for the query, best first
    fn search(&self, query: &EvalQuery, top_docs: usize) -> Result<Vec<ScoredDoc>>;
}

impl<P: RankingProvider + ?Sized> RankingProvider for Box<P> {
    fn search(&self, query: &EvalQuery, top_docs: usize) -> Result<Vec<ScoredDoc>> {
        (**self).search(query, top_docs)
    }
}

impl<P: RankingProvider + ?Sized> RankingProvider for std::sync::Arc<P> {
    fn search(&self, query: &EvalQuery, top_docs: usize) -> Result<Vec<ScoredDoc>> {
        (**self).search(query, top_docs)
    }
}

/// Builds a ranking configuration for one value of the tuned parameter
pub trait RankingProviderFactory {
    type Provider: RankingProvider;

    fn instantiate(&self, param: f64) -> Result<Self::Provider>;
}

impl<F, P> RankingProviderFactory for F
where
    F: Fn(f64) -> Result<P>,
    P: RankingProvider,
{
    type Provider = P;

    fn instantiate(&self, param: f64) -> Result<P> {
        self(param)
    }
}

/// Similarity model whose single scalar parameter is tuned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankingModel {
    /// Language model with Jelinek-Mercer smoothing, tuned on lambda
    #[serde(rename = "jm")]
    JelinekMercer,
    /// BM25 with fixed b, tuned on k1
    #[serde(rename = "bm25")]
    Bm25,
}

impl RankingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingModel::JelinekMercer => "jm",
            RankingModel::Bm25 => "bm25",
        }
    }

    /// Name of the tuned parameter, used in report file names.
    pub fn parameter_name(&self) -> &'static str {
        match self {
            RankingModel::JelinekMercer => "lambda",
            RankingModel::Bm25 => "k1",
        }
    }

    /// Default candidate grid for the grid search.
    ///
    /// jm: 0.01 then 0.1..=1.0 by 0.1; bm25: 0.4..=2.0 by 0.2. Rounded to two decimals.
    pub fn default_candidates(&self) -> Vec<f64> {
        match self {
            RankingModel::JelinekMercer => std::iter::once(0.01)
                .chain((1..=10).map(|i| round2(i as f64 * 0.1)))
                .collect(),
            RankingModel::Bm25 => (0..=8).map(|i| round2(0.4 + i as f64 * 0.2)).collect(),
        }
    }
}

impl FromStr for RankingModel {
    type Err = RankevalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "jm" => Ok(RankingModel::JelinekMercer),
            "bm25" => Ok(RankingModel::Bm25),
            other => Err(RankevalError::Config(format!(
                "unknown ranking model '{}' (expected jm or bm25)",
                other
            ))),
        }
    }
}

impl fmt::Display for RankingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round to two decimals, the precision parameters are reported with.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
