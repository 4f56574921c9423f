//! Grid search over one scalar ranking parameter.
//!
//! Every candidate is evaluated on the training queries at the cutoff depth
//! (the provider is asked for exactly `cutoff` documents). The candidate with
//! the highest mean training metric is then evaluated on the test queries.
//!
//! ## Tie-break
//!
//! Selection is a fold over candidates in declared order that replaces the
//! current best whenever a candidate's mean is greater than *or equal to* it,
//! so on exact ties the last declared candidate wins. The fold runs after the
//! sweep, over the recorded columns, and never depends on evaluation order.

use crate::error::{RankevalError, Result};
use crate::eval::batch::{mean, BatchEvaluator, ProviderFailurePolicy};
use crate::eval::{EvalQuery, MetricName, QueryId, QueryRange};
use crate::ranking::{round2, RankingModel, RankingProviderFactory};
use crate::relevance::RelevanceStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Mean training metric of one candidate parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CandidateScore {
    pub param: f64,
    pub mean: f64,
}

/// Best candidate: the last one whose mean is >= every earlier best.
pub fn select_best(columns: &[CandidateScore]) -> Option<CandidateScore> {
    columns.iter().copied().fold(None, |best, candidate| match best {
        Some(current) if candidate.mean < current.mean => Some(current),
        _ => Some(candidate),
    })
}

/// Metric per (training query, candidate) plus column means and the selection.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingGrid {
    pub metric: MetricName,
    pub cutoff: usize,
    pub candidates: Vec<f64>,
    /// One value per candidate, in candidate order.
    pub rows: BTreeMap<QueryId, Vec<f64>>,
    pub averages: Vec<f64>,
    pub best_param: f64,
    pub best_value: f64,
}

impl TrainingGrid {
    /// `<metric>@<k>,<param>...`, one row per training query, then `avg`.
    pub fn to_csv(&self) -> String {
        let mut out = format!("{}@{}", self.metric, self.cutoff);
        for param in &self.candidates {
            out.push_str(&format!(",{}", round2(*param)));
        }
        out.push('\n');
        for (query_id, values) in &self.rows {
            out.push_str(&query_id.to_string());
            for value in values {
                out.push_str(&format!(",{}", value));
            }
            out.push('\n');
        }
        out.push_str("avg");
        for value in &self.averages {
            out.push_str(&format!(",{}", value));
        }
        out.push('\n');
        out
    }
}

/// Per-query metric on the test queries under the selected parameter.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub param: f64,
    pub metric: MetricName,
    pub cutoff: usize,
    pub rows: Vec<(QueryId, f64)>,
    pub mean: f64,
}

impl TestReport {
    /// `<param>,<metric>`, then `id,value` rows and `avg,<mean>`.
    pub fn to_csv(&self) -> String {
        let mut out = format!("{},{}\n", round2(self.param), self.metric);
        for (query_id, value) in &self.rows {
            out.push_str(&format!("{},{}\n", query_id, value));
        }
        out.push_str(&format!("avg,{}\n", self.mean));
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutcome {
    pub grid: TrainingGrid,
    pub best_param: f64,
    pub test_report: TestReport,
}

/// Tunes a ranking parameter on training queries and validates it on test queries.
#[derive(Debug, Clone)]
pub struct GridSearchTrainer<'a> {
    relevance: &'a RelevanceStore,
    cutoff: usize,
    metric: MetricName,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> GridSearchTrainer<'a> {
    pub fn new(relevance: &'a RelevanceStore, cutoff: usize, metric: MetricName) -> Result<Self> {
        if cutoff == 0 {
            return Err(RankevalError::Config("cutoff must be greater than 0".to_string()));
        }
        Ok(Self {
            relevance,
            cutoff,
            metric,
            cancel: None,
        })
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn train<F>(
        &self,
        training: &BTreeMap<QueryId, EvalQuery>,
        test: &BTreeMap<QueryId, EvalQuery>,
        candidates: &[f64],
        factory: &F,
    ) -> Result<TrainingOutcome>
    where
        F: RankingProviderFactory,
    {
        validate_inputs(training, test, candidates)?;

        let mut rows: BTreeMap<QueryId, Vec<f64>> = training
            .keys()
            .map(|&id| (id, Vec::with_capacity(candidates.len())))
            .collect();
        let mut averages = Vec::with_capacity(candidates.len());

        for &param in candidates {
            let values = self.evaluate_metric(training, param, factory)?;
            for (query_id, value) in &values {
                if let Some(row) = rows.get_mut(query_id) {
                    row.push(*value);
                }
            }
            let column: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
            let average = mean(&column)?;
            log::info!(
                "Candidate {} -> mean {}@{} = {:.4}",
                round2(param),
                self.metric,
                self.cutoff,
                average
            );
            averages.push(average);
        }

        let columns: Vec<CandidateScore> = candidates
            .iter()
            .zip(&averages)
            .map(|(&param, &mean)| CandidateScore { param, mean })
            .collect();
        let best = select_best(&columns)
            .ok_or_else(|| RankevalError::Config("no candidate parameters to select from".to_string()))?;
        log::info!(
            "Selected param {} with mean {}@{} = {:.4}",
            round2(best.param),
            self.metric,
            self.cutoff,
            best.mean
        );

        let test_rows = self.evaluate_metric(test, best.param, factory)?;
        let test_values: Vec<f64> = test_rows.iter().map(|(_, v)| *v).collect();
        let test_mean = mean(&test_values)?;
        log::info!(
            "Test {}@{} with param {}: {:.4} over {} queries",
            self.metric,
            self.cutoff,
            round2(best.param),
            test_mean,
            test_rows.len()
        );

        Ok(TrainingOutcome {
            grid: TrainingGrid {
                metric: self.metric,
                cutoff: self.cutoff,
                candidates: candidates.to_vec(),
                rows,
                averages,
                best_param: best.param,
                best_value: best.mean,
            },
            best_param: best.param,
            test_report: TestReport {
                param: best.param,
                metric: self.metric,
                cutoff: self.cutoff,
                rows: test_rows,
                mean: test_mean,
            },
        })
    }

    /// Evaluate one parameter value at the cutoff depth; provider failures abort.
    fn evaluate_metric<F>(
        &self,
        queries: &BTreeMap<QueryId, EvalQuery>,
        param: f64,
        factory: &F,
    ) -> Result<Vec<(QueryId, f64)>>
    where
        F: RankingProviderFactory,
    {
        let provider = factory.instantiate(param)?;
        let mut evaluator = BatchEvaluator::new(self.relevance, self.cutoff, self.cutoff)?
            .with_policy(ProviderFailurePolicy::Abort);
        if let Some(cancel) = &self.cancel {
            evaluator = evaluator.with_cancel_flag(Arc::clone(cancel));
        }
        let report = evaluator.evaluate(queries, &provider)?;
        Ok(report.metric_values(self.metric))
    }
}

fn validate_inputs(
    training: &BTreeMap<QueryId, EvalQuery>,
    test: &BTreeMap<QueryId, EvalQuery>,
    candidates: &[f64],
) -> Result<()> {
    if candidates.is_empty() {
        return Err(RankevalError::Config("candidate parameter list is empty".to_string()));
    }
    if let Some(bad) = candidates.iter().find(|c| !c.is_finite()) {
        return Err(RankevalError::Config(format!("candidate parameter {} is not finite", bad)));
    }
    if training.is_empty() {
        return Err(RankevalError::Config("training query set is empty".to_string()));
    }
    if test.is_empty() {
        return Err(RankevalError::Config("test query set is empty".to_string()));
    }
    if let Some(shared) = training.keys().find(|id| test.contains_key(id)) {
        return Err(RankevalError::Config(format!(
            "query {} is in both the training and the test set",
            shared
        )));
    }
    Ok(())
}

/// `<prefix>.<model>.training.<a-b>.test.<c-d>.<metric><cut>.training.csv`
pub fn training_file_name(
    prefix: &str,
    model: RankingModel,
    training: QueryRange,
    test: QueryRange,
    metric: MetricName,
    cutoff: usize,
) -> String {
    format!(
        "{}.{}.training.{}.test.{}.{}{}.training.csv",
        prefix, model, training, test, metric, cutoff
    )
}

/// `<prefix>.<model>.training.<a-b>.test.<c-d>.<metric><cut>.test.csv`
pub fn test_file_name(
    prefix: &str,
    model: RankingModel,
    training: QueryRange,
    test: QueryRange,
    metric: MetricName,
    cutoff: usize,
) -> String {
    format!(
        "{}.{}.training.{}.test.{}.{}{}.test.csv",
        prefix, model, training, test, metric, cutoff
    )
}
