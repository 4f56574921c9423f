//! Evaluation framework: queries, per-query metrics (P@K, R@K, RR, AP@K), batch driver and reports.

pub mod batch;
pub mod metrics;
pub mod query;
pub mod report;

pub use batch::{
    mean, AggregateMetrics, BatchEvaluator, BatchReport, ProviderFailurePolicy, QueryResult, SkippedQuery,
};
pub use metrics::{annotate_hits, compute_metrics, Hit, MetricName, Metrics};
pub use query::{load_queries, read_queries, EvalQuery, QueryId, QueryRange};
