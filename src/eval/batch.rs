//! Batch evaluation: run a ranking provider over a query set and score every query.

use crate::error::{RankevalError, Result};
use crate::eval::metrics::{annotate_hits, compute_metrics, Hit, MetricName, Metrics};
use crate::eval::{EvalQuery, QueryId};
use crate::ranking::{RankingProvider, ScoredDoc};
use crate::relevance::RelevanceStore;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Scored ranking of one query under one provider configuration.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub query_id: QueryId,
    pub query: String,
    /// Ranked by descending score.
    pub hits: Vec<Hit>,
    pub metrics: Metrics,
}

/// Query left out of a batch because the provider failed on it.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedQuery {
    pub query_id: QueryId,
    pub reason: String,
}

/// What to do when the ranking provider fails for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFailurePolicy {
    /// Fail the whole batch on the first provider error.
    #[default]
    Abort,
    /// Record the query as skipped and keep going.
    Skip,
}

/// Arithmetic mean of each metric over a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub query_count: usize,
    pub mean: Metrics,
}

impl AggregateMetrics {
    /// Fails on an empty batch instead of reporting 0 or NaN.
    pub fn from_results(results: &[QueryResult]) -> Result<Self> {
        if results.is_empty() {
            return Err(RankevalError::Config(
                "cannot aggregate metrics over an empty batch".to_string(),
            ));
        }
        let n = results.len() as f64;
        let sum = results.iter().fold(Metrics::default(), |acc, r| Metrics {
            precision: acc.precision + r.metrics.precision,
            recall: acc.recall + r.metrics.recall,
            reciprocal_rank: acc.reciprocal_rank + r.metrics.reciprocal_rank,
            average_precision: acc.average_precision + r.metrics.average_precision,
        });
        Ok(Self {
            query_count: results.len(),
            mean: Metrics {
                precision: sum.precision / n,
                recall: sum.recall / n,
                reciprocal_rank: sum.reciprocal_rank / n,
                average_precision: sum.average_precision / n,
            },
        })
    }
}

/// Outcome of evaluating a query set, ordered by query id.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub cutoff: usize,
    pub results: Vec<QueryResult>,
    pub skipped: Vec<SkippedQuery>,
}

impl BatchReport {
    pub fn aggregate(&self) -> Result<AggregateMetrics> {
        AggregateMetrics::from_results(&self.results)
    }

    /// `(query id, value)` of one metric for every scored query.
    pub fn metric_values(&self, metric: MetricName) -> Vec<(QueryId, f64)> {
        self.results
            .iter()
            .map(|r| (r.query_id, r.metrics.get(metric)))
            .collect()
    }
}

/// Mean of a non-empty series.
pub fn mean(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(RankevalError::Config("cannot average an empty series".to_string()));
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Drives a ranking provider over queries and scores each ranking against the judgments.
#[derive(Debug, Clone)]
pub struct BatchEvaluator<'a> {
    relevance: &'a RelevanceStore,
    cutoff: usize,
    top_docs: usize,
    policy: ProviderFailurePolicy,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> BatchEvaluator<'a> {
    /// The provider is asked for `max(top_docs, cutoff)` documents per query.
    pub fn new(relevance: &'a RelevanceStore, cutoff: usize, top_docs: usize) -> Result<Self> {
        if cutoff == 0 {
            return Err(RankevalError::Config("cutoff must be greater than 0".to_string()));
        }
        Ok(Self {
            relevance,
            cutoff,
            top_docs: top_docs.max(cutoff),
            policy: ProviderFailurePolicy::Abort,
            cancel: None,
        })
    }

    pub fn with_policy(mut self, policy: ProviderFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Flag checked between queries; once set the batch fails with `Cancelled`.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn cutoff(&self) -> usize {
        self.cutoff
    }

    pub fn top_docs(&self) -> usize {
        self.top_docs
    }

    /// Evaluate queries one by one in ascending id order.
    pub fn evaluate<P>(&self, queries: &BTreeMap<QueryId, EvalQuery>, provider: &P) -> Result<BatchReport>
    where
        P: RankingProvider + ?Sized,
    {
        let mut results = Vec::with_capacity(queries.len());
        let mut skipped = Vec::new();

        for (processed, query) in queries.values().enumerate() {
            self.check_cancelled(processed)?;

            let relevant = self.relevance.relevant_docs(query.id)?;
            let ranked = match provider.search(query, self.top_docs) {
                Ok(ranked) => ranked,
                Err(e) => {
                    let err = provider_error(query.id, e);
                    skipped.push(self.on_provider_failure(query.id, err)?);
                    continue;
                }
            };
            let result = self.score(query, ranked, relevant)?;
            log::debug!(
                "Query {}: P@{}={:.4} R@{}={:.4} RR={:.4} AP@{}={:.4}",
                query.id,
                self.cutoff,
                result.metrics.precision,
                self.cutoff,
                result.metrics.recall,
                result.metrics.reciprocal_rank,
                self.cutoff,
                result.metrics.average_precision
            );
            results.push(result);
        }

        log::info!(
            "Evaluated {} queries at cutoff {} ({} skipped)",
            results.len(),
            self.cutoff,
            skipped.len()
        );
        Ok(BatchReport {
            cutoff: self.cutoff,
            results,
            skipped,
        })
    }

    /// Evaluate queries with up to `workers` provider calls in flight on the blocking pool.
    ///
    /// Results are sorted by query id afterwards, so the report does not depend
    /// on completion order.
    pub async fn evaluate_concurrent<P>(
        &self,
        queries: &BTreeMap<QueryId, EvalQuery>,
        provider: Arc<P>,
        workers: usize,
    ) -> Result<BatchReport>
    where
        P: RankingProvider + 'static,
    {
        // Missing judgments are fatal before any provider call
        let mut jobs = Vec::with_capacity(queries.len());
        for query in queries.values() {
            let relevant = self.relevance.relevant_docs(query.id)?.clone();
            jobs.push((query.clone(), relevant));
        }

        let top_docs = self.top_docs;
        let cancel = self.cancel.clone();
        let mut in_flight = stream::iter(jobs)
            .map(|(query, relevant)| {
                let provider = Arc::clone(&provider);
                let cancel = cancel.clone();
                async move {
                    if cancel.as_ref().is_some_and(|c| c.load(Ordering::SeqCst)) {
                        return (query, relevant, None);
                    }
                    let search_query = query.clone();
                    let ranked = tokio::task::spawn_blocking(move || provider.search(&search_query, top_docs))
                        .await
                        .map_err(|e| RankevalError::Provider {
                            query_id: query.id,
                            message: format!("search task failed: {}", e),
                        })
                        .and_then(|r| r);
                    (query, relevant, Some(ranked))
                }
            })
            .buffer_unordered(workers.max(1));

        let mut results = Vec::with_capacity(queries.len());
        let mut skipped = Vec::new();
        let mut completed = 0;

        while let Some((query, relevant, ranked)) = in_flight.next().await {
            let ranked = match ranked {
                Some(ranked) => ranked,
                None => return Err(RankevalError::Cancelled { completed }),
            };
            match ranked {
                Ok(ranked) => results.push(self.score(&query, ranked, &relevant)?),
                Err(e) => {
                    let err = provider_error(query.id, e);
                    skipped.push(self.on_provider_failure(query.id, err)?);
                }
            }
            completed += 1;
        }

        results.sort_by_key(|r| r.query_id);
        skipped.sort_by_key(|s| s.query_id);
        log::info!(
            "Evaluated {} queries at cutoff {} with {} workers ({} skipped)",
            results.len(),
            self.cutoff,
            workers.max(1),
            skipped.len()
        );
        Ok(BatchReport {
            cutoff: self.cutoff,
            results,
            skipped,
        })
    }

    fn score(&self, query: &EvalQuery, ranked: Vec<ScoredDoc>, relevant: &HashSet<String>) -> Result<QueryResult> {
        let hits = annotate_hits(ranked, relevant);
        let metrics = compute_metrics(&hits, relevant, self.cutoff)?;
        Ok(QueryResult {
            query_id: query.id,
            query: query.text.clone(),
            hits,
            metrics,
        })
    }

    fn on_provider_failure(&self, query_id: QueryId, err: RankevalError) -> Result<SkippedQuery> {
        match self.policy {
            ProviderFailurePolicy::Abort => Err(err),
            ProviderFailurePolicy::Skip => {
                log::warn!("Skipping query {}: {}", query_id, err);
                Ok(SkippedQuery {
                    query_id,
                    reason: err.to_string(),
                })
            }
        }
    }

    fn check_cancelled(&self, completed: usize) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(RankevalError::Cancelled { completed }),
            _ => Ok(()),
        }
    }
}

fn provider_error(query_id: QueryId, err: RankevalError) -> RankevalError {
    match err {
        RankevalError::Provider { .. } => err,
        other => RankevalError::Provider {
            query_id,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory provider returning fixed rankings, best first.
    pub(crate) struct FixtureProvider {
        pub rankings: HashMap<QueryId, Vec<&'static str>>,
        pub failing: HashSet<QueryId>,
    }

    impl FixtureProvider {
        pub fn new(rankings: Vec<(QueryId, Vec<&'static str>)>) -> Self {
            Self {
                rankings: rankings.into_iter().collect(),
                failing: HashSet::new(),
            }
        }

        pub fn failing_on(mut self, query_id: QueryId) -> Self {
            self.failing.insert(query_id);
            self
        }
    }

    impl RankingProvider for FixtureProvider {
        fn search(&self, query: &EvalQuery, top_docs: usize) -> Result<Vec<ScoredDoc>> {
            if self.failing.contains(&query.id) {
                return Err(RankevalError::Parse("index unavailable".to_string()));
            }
            let docs = self.rankings.get(&query.id).cloned().unwrap_or_default();
            let n = docs.len();
            Ok(docs
                .into_iter()
                .enumerate()
                .take(top_docs)
                .map(|(i, id)| ScoredDoc::new(id, (n - i) as f32))
                .collect())
        }
    }

    pub(crate) fn queries(ids: &[QueryId]) -> BTreeMap<QueryId, EvalQuery> {
        ids.iter()
            .map(|&id| (id, EvalQuery::new(id, format!("query {}", id))))
            .collect()
    }

    fn scenario() -> (RelevanceStore, FixtureProvider) {
        let relevance = RelevanceStore::from_judgments(vec![
            (1, vec!["d1", "d2"]),
            (2, vec![]),
            (3, vec!["d5"]),
        ]);
        let provider = FixtureProvider::new(vec![
            (1, vec!["d1", "d3", "d2"]),
            (2, vec!["d9", "d8"]),
            (3, vec!["d5", "d6"]),
        ]);
        (relevance, provider)
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "expected {}, got {}", expected, actual);
    }

    #[test]
    fn test_end_to_end_three_queries() {
        let (relevance, provider) = scenario();
        let evaluator = BatchEvaluator::new(&relevance, 2, 2).unwrap();
        let report = evaluator.evaluate(&queries(&[3, 1, 2]), &provider).unwrap();

        let ids: Vec<QueryId> = report.results.iter().map(|r| r.query_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let q1 = report.results[0].metrics;
        assert_close(q1.precision, 0.5);
        assert_close(q1.recall, 0.5);
        assert_close(q1.reciprocal_rank, 1.0);
        assert_close(q1.average_precision, 0.5);

        assert_eq!(report.results[1].metrics, Metrics::default());

        let q3 = report.results[2].metrics;
        assert_close(q3.precision, 0.5);
        assert_close(q3.recall, 1.0);
        assert_close(q3.reciprocal_rank, 1.0);
        assert_close(q3.average_precision, 1.0);

        let aggregate = report.aggregate().unwrap();
        assert_eq!(aggregate.query_count, 3);
        assert_close(aggregate.mean.precision, 1.0 / 3.0);
        assert_close(aggregate.mean.recall, 0.5);
        assert_close(aggregate.mean.reciprocal_rank, 2.0 / 3.0);
        assert_close(aggregate.mean.average_precision, 0.5);
    }

    #[test]
    fn test_requests_at_least_cutoff_documents() {
        let (relevance, _) = scenario();
        let evaluator = BatchEvaluator::new(&relevance, 10, 5).unwrap();
        assert_eq!(evaluator.top_docs(), 10);
        let evaluator = BatchEvaluator::new(&relevance, 10, 50).unwrap();
        assert_eq!(evaluator.top_docs(), 50);
    }

    #[test]
    fn test_hits_keep_full_candidate_list() {
        let (relevance, provider) = scenario();
        let evaluator = BatchEvaluator::new(&relevance, 2, 10).unwrap();
        let report = evaluator.evaluate(&queries(&[1]), &provider).unwrap();
        assert_eq!(report.results[0].hits.len(), 3);
        assert!(report.results[0].hits[2].is_relevant);
    }

    #[test]
    fn test_missing_judgment_is_fatal() {
        let (relevance, provider) = scenario();
        let evaluator = BatchEvaluator::new(&relevance, 2, 2)
            .unwrap()
            .with_policy(ProviderFailurePolicy::Skip);
        let err = evaluator.evaluate(&queries(&[1, 4]), &provider).unwrap_err();
        assert!(matches!(err, RankevalError::MissingJudgment(4)));
    }

    #[test]
    fn test_zero_cutoff_rejected() {
        let (relevance, _) = scenario();
        assert!(BatchEvaluator::new(&relevance, 0, 10).is_err());
    }

    #[test]
    fn test_provider_failure_aborts_by_default() {
        let (relevance, provider) = scenario();
        let provider = provider.failing_on(2);
        let evaluator = BatchEvaluator::new(&relevance, 2, 2).unwrap();
        let err = evaluator.evaluate(&queries(&[1, 2, 3]), &provider).unwrap_err();
        assert!(matches!(err, RankevalError::Provider { query_id: 2, .. }));
    }

    #[test]
    fn test_provider_failure_skipped_is_marked_not_zeroed() {
        let (relevance, provider) = scenario();
        let provider = provider.failing_on(3);
        let evaluator = BatchEvaluator::new(&relevance, 2, 2)
            .unwrap()
            .with_policy(ProviderFailurePolicy::Skip);
        let report = evaluator.evaluate(&queries(&[1, 2, 3]), &provider).unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].query_id, 3);
        assert!(report.skipped[0].reason.contains("index unavailable"));
        assert_eq!(report.aggregate().unwrap().query_count, 2);
    }

    #[test]
    fn test_empty_batch_cannot_be_aggregated() {
        let (relevance, provider) = scenario();
        let evaluator = BatchEvaluator::new(&relevance, 2, 2).unwrap();
        let report = evaluator.evaluate(&BTreeMap::new(), &provider).unwrap();
        assert!(report.aggregate().is_err());
        assert!(mean(&[]).is_err());
    }

    #[test]
    fn test_mean_of_series() {
        assert_close(mean(&[0.5, 0.25, 0.0, 1.0]).unwrap(), 0.4375);
        assert_close(mean(&[0.3]).unwrap(), 0.3);
    }

    #[test]
    fn test_cancelled_batch_discards_results() {
        let (relevance, provider) = scenario();
        let cancel = Arc::new(AtomicBool::new(true));
        let evaluator = BatchEvaluator::new(&relevance, 2, 2)
            .unwrap()
            .with_cancel_flag(Arc::clone(&cancel));
        let err = evaluator.evaluate(&queries(&[1, 2, 3]), &provider).unwrap_err();
        assert!(matches!(err, RankevalError::Cancelled { completed: 0 }));
    }

    #[test]
    fn test_metric_values() {
        let (relevance, provider) = scenario();
        let evaluator = BatchEvaluator::new(&relevance, 2, 2).unwrap();
        let report = evaluator.evaluate(&queries(&[1, 2, 3]), &provider).unwrap();
        assert_eq!(
            report.metric_values(MetricName::Recall),
            vec![(1, 0.5), (2, 0.0), (3, 1.0)]
        );
    }

    #[tokio::test]
    async fn test_concurrent_matches_sequential() {
        let (relevance, provider) = scenario();
        let evaluator = BatchEvaluator::new(&relevance, 2, 2).unwrap();
        let queries = queries(&[1, 2, 3]);
        let sequential = evaluator.evaluate(&queries, &provider).unwrap();
        let concurrent = evaluator
            .evaluate_concurrent(&queries, Arc::new(provider), 3)
            .await
            .unwrap();

        let ids: Vec<QueryId> = concurrent.results.iter().map(|r| r.query_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        for (a, b) in sequential.results.iter().zip(concurrent.results.iter()) {
            assert_eq!(a.metrics, b.metrics);
        }
    }

    /// Answers lower query ids more slowly and records the order searches finish in.
    struct SlowProvider {
        inner: FixtureProvider,
        finished: std::sync::Mutex<Vec<QueryId>>,
    }

    impl RankingProvider for SlowProvider {
        fn search(&self, query: &EvalQuery, top_docs: usize) -> Result<Vec<ScoredDoc>> {
            let delay = 40 * u64::from(4u32.saturating_sub(query.id));
            std::thread::sleep(std::time::Duration::from_millis(delay));
            let ranked = self.inner.search(query, top_docs);
            if let Ok(mut finished) = self.finished.lock() {
                finished.push(query.id);
            }
            ranked
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_results_sorted_despite_completion_order() {
        let (relevance, provider) = scenario();
        let evaluator = BatchEvaluator::new(&relevance, 2, 2).unwrap();
        let queries = queries(&[1, 2, 3]);
        let sequential = evaluator.evaluate(&queries, &provider).unwrap();

        let slow = Arc::new(SlowProvider {
            inner: provider,
            finished: std::sync::Mutex::new(Vec::new()),
        });
        let concurrent = evaluator
            .evaluate_concurrent(&queries, Arc::clone(&slow), 3)
            .await
            .unwrap();

        assert_eq!(*slow.finished.lock().unwrap(), vec![3, 2, 1]);
        let ids: Vec<QueryId> = concurrent.results.iter().map(|r| r.query_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        for (a, b) in sequential.results.iter().zip(concurrent.results.iter()) {
            assert_eq!(a.metrics, b.metrics);
        }
    }

    #[tokio::test]
    async fn test_concurrent_skips_failed_queries() {
        let (relevance, provider) = scenario();
        let evaluator = BatchEvaluator::new(&relevance, 2, 2)
            .unwrap()
            .with_policy(ProviderFailurePolicy::Skip);
        let report = evaluator
            .evaluate_concurrent(&queries(&[1, 2, 3]), Arc::new(provider.failing_on(1)), 2)
            .await
            .unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.skipped[0].query_id, 1);
    }

    #[tokio::test]
    async fn test_concurrent_cancellation() {
        let (relevance, provider) = scenario();
        let evaluator = BatchEvaluator::new(&relevance, 2, 2)
            .unwrap()
            .with_cancel_flag(Arc::new(AtomicBool::new(true)));
        let err = evaluator
            .evaluate_concurrent(&queries(&[1, 2, 3]), Arc::new(provider), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, RankevalError::Cancelled { .. }));
    }
}
