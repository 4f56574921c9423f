//! Tabular and text renderings of batch results, plus report file naming.

use crate::error::Result;
use crate::eval::batch::{BatchReport, QueryResult};
use crate::eval::QueryRange;
use crate::ranking::{round2, RankingModel};

/// Default file-name prefix for written reports.
pub const DEFAULT_REPORT_PREFIX: &str = "TREC-COVID";

/// Per-query CSV: `Query,P@k,Recall@k,RR,AP@k`, then one row per query and an `avg` row.
///
/// Skipped queries are written as `<id>,skipped` so they cannot be mistaken for
/// queries that scored zero.
pub fn metrics_csv(report: &BatchReport) -> Result<String> {
    let aggregate = report.aggregate()?;
    let k = report.cutoff;
    let mut out = format!("Query,P@{k},Recall@{k},RR,AP@{k}\n");

    let mut skipped = report.skipped.iter().peekable();
    for result in &report.results {
        while let Some(s) = skipped.next_if(|s| s.query_id < result.query_id) {
            out.push_str(&format!("{},skipped\n", s.query_id));
        }
        let m = result.metrics;
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            result.query_id, m.precision, m.recall, m.reciprocal_rank, m.average_precision
        ));
    }
    for s in skipped {
        out.push_str(&format!("{},skipped\n", s.query_id));
    }

    let m = aggregate.mean;
    out.push_str(&format!(
        "avg,{},{},{},{}\n",
        m.precision, m.recall, m.reciprocal_rank, m.average_precision
    ));
    Ok(out)
}

/// Human-readable listing of each query's top hits and metrics, then the batch means.
pub fn hits_report(report: &BatchReport, top_docs: usize) -> Result<String> {
    let aggregate = report.aggregate()?;
    let k = report.cutoff;
    let mut out = String::new();

    for result in &report.results {
        out.push_str(&query_hits(result, top_docs, k));
    }
    for s in &report.skipped {
        out.push_str(&format!("Query {} skipped: {}\n\n", s.query_id, s.reason));
    }

    let m = aggregate.mean;
    out.push_str(&format!(
        "Total Metrics ({} queries)\nMean P@{k}: {:.4}\tMean Recall@{k}: {:.4}\tMRR: {:.4}\tMAP@{k}: {:.4}\n",
        aggregate.query_count, m.precision, m.recall, m.reciprocal_rank, m.average_precision
    ));
    Ok(out)
}

fn query_hits(result: &QueryResult, top_docs: usize, k: usize) -> String {
    let mut out = format!("Query {}: {}\nTop hits:\n", result.query_id, result.query);
    for hit in result.hits.iter().take(top_docs) {
        let marker = if hit.is_relevant { " (REL)" } else { "" };
        out.push_str(&format!(
            "  Top {}{}: {} score={:.4}\n",
            hit.rank + 1,
            marker,
            hit.doc_id,
            hit.score
        ));
    }
    let m = result.metrics;
    out.push_str(&format!(
        "Metrics: P@{k}: {:.4}\tRecall@{k}: {:.4}\tRR: {:.4}\tAP@{k}: {:.4}\n\n",
        m.precision, m.recall, m.reciprocal_rank, m.average_precision
    ));
    out
}

/// `<prefix>.<model>.<cut>.cut.<pname>.<pvalue>.q<range>.csv`
pub fn metrics_file_name(prefix: &str, model: RankingModel, cutoff: usize, param: f64, range: QueryRange) -> String {
    format!(
        "{}.{}.{}.cut.{}.{}.q{}.csv",
        prefix,
        model,
        cutoff,
        model.parameter_name(),
        round2(param),
        range
    )
}

/// `<prefix>.<model>.<top>.hits.<pname>.<pvalue>.q<range>.txt`
pub fn hits_file_name(prefix: &str, model: RankingModel, top_docs: usize, param: f64, range: QueryRange) -> String {
    format!(
        "{}.{}.{}.hits.{}.{}.q{}.txt",
        prefix,
        model,
        top_docs,
        model.parameter_name(),
        round2(param),
        range
    )
}
