//! Evaluation CLI: score one ranking configuration over a query range and write P@k, Recall@k, RR, AP@k reports.

use anyhow::Context;
use clap::Parser;
use rankeval::{
    eval::{load_queries, report, BatchEvaluator, ProviderFailurePolicy, QueryRange},
    ranking::{RankingModel, RankingProviderFactory, RunDirectory},
    Config, RelevanceStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Evaluate a ranking configuration against the relevance judgments.
#[derive(Parser, Debug)]
#[command(name = "eval")]
struct Args {
    /// Ranking model (jm or bm25); defaults to training.model from the config.
    #[arg(long)]
    model: Option<RankingModel>,

    /// Model parameter (lambda for jm, k1 for bm25).
    #[arg(long)]
    param: f64,

    /// Cutoff k for P@k, Recall@k and AP@k.
    #[arg(long)]
    cut: Option<usize>,

    /// Number of documents requested per query and listed in the hits report.
    #[arg(long)]
    top: Option<usize>,

    /// Queries to evaluate: all, <n> or <n-m>.
    #[arg(long, default_value = "all")]
    queries: QueryRange,

    /// Concurrent provider calls (1 = sequential).
    #[arg(long)]
    workers: Option<usize>,

    /// Skip queries the provider fails on instead of aborting.
    #[arg(long)]
    skip_failed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.data.log_level.as_str()),
    )
    .init();

    let model = args.model.unwrap_or(config.training.model);
    let cutoff = args.cut.unwrap_or(config.evaluation.cutoff);
    let top_docs = args.top.unwrap_or(config.evaluation.top_docs);
    let workers = args.workers.unwrap_or(config.evaluation.workers).max(1);
    let policy = if args.skip_failed {
        ProviderFailurePolicy::Skip
    } else {
        config.evaluation.on_provider_error
    };

    let relevance = RelevanceStore::load(&config.data.qrels)
        .with_context(|| format!("Failed to load judgments from {}", config.data.qrels.display()))?;
    let queries = load_queries(&config.data.queries, args.queries)
        .with_context(|| format!("Failed to load queries from {}", config.data.queries.display()))?;
    if queries.is_empty() {
        anyhow::bail!("No queries in range {} of {}", args.queries, config.data.queries.display());
    }

    let provider = RunDirectory::new(&config.data.runs_dir, model).instantiate(args.param)?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received, stopping after the current query");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    println!(
        "Evaluating {} queries ({} {}={}, cut {}, top {})\n",
        queries.len(),
        model,
        model.parameter_name(),
        args.param,
        cutoff,
        top_docs
    );

    let evaluator = BatchEvaluator::new(&relevance, cutoff, top_docs)?
        .with_policy(policy)
        .with_cancel_flag(cancel);
    let batch = if workers > 1 {
        evaluator
            .evaluate_concurrent(&queries, Arc::new(provider), workers)
            .await?
    } else {
        evaluator.evaluate(&queries, &provider)?
    };

    let hits_text = report::hits_report(&batch, top_docs)?;
    let csv = report::metrics_csv(&batch)?;
    let aggregate = batch.aggregate()?;

    let output_dir = config.output_dir();
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let prefix = &config.data.report_prefix;
    let csv_path = output_dir.join(report::metrics_file_name(prefix, model, cutoff, args.param, args.queries));
    let hits_path = output_dir.join(report::hits_file_name(prefix, model, top_docs, args.param, args.queries));
    std::fs::write(&csv_path, &csv).with_context(|| format!("Failed to write {}", csv_path.display()))?;
    std::fs::write(&hits_path, &hits_text).with_context(|| format!("Failed to write {}", hits_path.display()))?;

    println!("{}", hits_text);
    println!("=== Evaluation Results ===");
    println!("Queries:         {}", aggregate.query_count);
    if !batch.skipped.is_empty() {
        println!("Skipped:         {}", batch.skipped.len());
    }
    println!("Mean P@{}:{:>8.4}", cutoff, aggregate.mean.precision);
    println!("Mean Recall@{}:{:>4.4}", cutoff, aggregate.mean.recall);
    println!("MRR:        {:>8.4}", aggregate.mean.reciprocal_rank);
    println!("MAP@{}:    {:>8.4}", cutoff, aggregate.mean.average_precision);
    println!("\nWrote {} and {}", csv_path.display(), hits_path.display());

    Ok(())
}
