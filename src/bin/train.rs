//! Grid-search CLI: tune a model parameter on a training query range, then score the best value on a test range.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use rankeval::{
    eval::{load_queries, MetricName, QueryRange},
    ranking::{round2, RankingModel, RunDirectory},
    training::{test_file_name, training_file_name, GridSearchTrainer, TrainingOutcome},
    Config, RelevanceStore,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tune a ranking parameter by grid search.
#[derive(Parser, Debug)]
#[command(name = "train")]
struct Args {
    /// Training queries, e.g. 1-20.
    #[arg(long)]
    training: QueryRange,

    /// Test queries, e.g. 21-50.
    #[arg(long)]
    test: QueryRange,

    /// Ranking model (jm or bm25).
    #[arg(long)]
    model: Option<RankingModel>,

    /// Metric to optimise (p, r, mrr or map).
    #[arg(long)]
    metric: Option<MetricName>,

    /// Cutoff k; also the number of documents requested per query.
    #[arg(long)]
    cut: Option<usize>,

    /// Comma-separated candidate values; the model's preset grid when omitted.
    #[arg(long, value_delimiter = ',')]
    candidates: Option<Vec<f64>>,
}

#[derive(Serialize)]
struct TrainingSummary<'a> {
    generated_at: DateTime<Utc>,
    model: RankingModel,
    parameter: &'static str,
    training: String,
    test: String,
    #[serde(flatten)]
    outcome: &'a TrainingOutcome,
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
    let metric = args.metric.unwrap_or(config.training.metric);
    let cutoff = args.cut.unwrap_or(config.evaluation.cutoff);
    let candidates = match args.candidates {
        Some(values) => values.into_iter().map(round2).collect(),
        None if args.model.is_some() && args.model != Some(config.training.model) => {
            model.default_candidates()
        }
        None => config.training.candidates(),
    };

    if args.training.overlaps(&args.test) {
        anyhow::bail!(
            "Training range {} overlaps test range {}",
            args.training,
            args.test
        );
    }

    let relevance = RelevanceStore::load(&config.data.qrels)
        .with_context(|| format!("Failed to load judgments from {}", config.data.qrels.display()))?;
    let training = load_queries(&config.data.queries, args.training)
        .with_context(|| format!("Failed to load queries from {}", config.data.queries.display()))?;
    let test = load_queries(&config.data.queries, args.test)
        .with_context(|| format!("Failed to load queries from {}", config.data.queries.display()))?;

    println!(
        "Grid search: {} {} over {:?} on {} training / {} test queries ({}@{})\n",
        model,
        model.parameter_name(),
        candidates,
        training.len(),
        test.len(),
        metric,
        cutoff
    );

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

    let runs = RunDirectory::new(&config.data.runs_dir, model);
    let outcome = tokio::task::spawn_blocking({
        let candidates = candidates.clone();
        move || -> rankeval::Result<TrainingOutcome> {
            GridSearchTrainer::new(&relevance, cutoff, metric)?
                .with_cancel_flag(cancel)
                .train(&training, &test, &candidates, &runs)
        }
    })
    .await
    .context("Training task panicked")??;

    println!("=== Training ({}@{}) ===", metric, cutoff);
    println!("{:<10} {:>10}", model.parameter_name(), "mean");
    println!("{:-<21}", "");
    for (param, average) in outcome.grid.candidates.iter().zip(&outcome.grid.averages) {
        let marker = if *param == outcome.best_param { " *" } else { "" };
        println!("{:<10} {:>10.4}{}", round2(*param), average, marker);
    }
    println!(
        "\nBest {}: {} (training {}@{} = {:.4})",
        model.parameter_name(),
        round2(outcome.best_param),
        metric,
        cutoff,
        outcome.grid.best_value
    );
    println!(
        "Test {}@{}: {:.4} over {} queries",
        metric,
        cutoff,
        outcome.test_report.mean,
        outcome.test_report.rows.len()
    );

    let output_dir = config.output_dir();
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let prefix = &config.data.report_prefix;
    let training_path = output_dir.join(training_file_name(prefix, model, args.training, args.test, metric, cutoff));
    let test_path = output_dir.join(test_file_name(prefix, model, args.training, args.test, metric, cutoff));
    let summary_path = test_path.with_extension("json");

    std::fs::write(&training_path, outcome.grid.to_csv())
        .with_context(|| format!("Failed to write {}", training_path.display()))?;
    std::fs::write(&test_path, outcome.test_report.to_csv())
        .with_context(|| format!("Failed to write {}", test_path.display()))?;

    let summary = TrainingSummary {
        generated_at: Utc::now(),
        model,
        parameter: model.parameter_name(),
        training: args.training.to_string(),
        test: args.test.to_string(),
        outcome: &outcome,
    };
    let json = serde_json::to_string_pretty(&summary)?;
    std::fs::write(&summary_path, json)
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;

    println!(
        "\nWrote {}, {} and {}",
        training_path.display(),
        test_path.display(),
        summary_path.display()
    );

    Ok(())
}
