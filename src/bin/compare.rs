//! Significance CLI: paired test over two test-report CSVs covering the same queries.

use anyhow::Context;
use clap::Parser;
use rankeval::{
    compare::{align, compare, read_results, TestMethod},
    eval::mean,
    Config,
};
use std::path::PathBuf;

/// Compare two systems' per-query results for a statistically significant difference.
#[derive(Parser, Debug)]
#[command(name = "compare")]
struct Args {
    /// Test to run: t (paired t-test) or wilcoxon.
    #[arg(long)]
    test: Option<TestMethod>,

    /// Significance level.
    #[arg(long)]
    alpha: Option<f64>,

    /// Print the outcome as JSON.
    #[arg(long)]
    json: bool,

    /// Results of the first system.
    results_a: PathBuf,

    /// Results of the second system, same queries in the same order.
    results_b: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // The comparison only needs the two result files; a config supplies defaults when present.
    let config = Config::load().ok();
    let log_level = config
        .as_ref()
        .map(|c| c.data.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", log_level)).init();

    let defaults = config.map(|c| c.compare).unwrap_or_default();
    let method = args.test.unwrap_or(defaults.method);
    let alpha = args.alpha.unwrap_or(defaults.alpha);

    let results_a = read_results(&args.results_a)
        .with_context(|| format!("Failed to read {}", args.results_a.display()))?;
    let results_b = read_results(&args.results_b)
        .with_context(|| format!("Failed to read {}", args.results_b.display()))?;
    log::info!(
        "Loaded {} and {} results",
        results_a.len(),
        results_b.len()
    );

    let (series_a, series_b) = align(&results_a, &results_b)?;
    let outcome = compare(&series_a, &series_b, method, alpha)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let mean_a = mean(&series_a)?;
    let mean_b = mean(&series_b)?;
    println!("{:<40} {:>10}", "System", "mean");
    println!("{:-<51}", "");
    println!("{:<40} {:>10.4}", args.results_a.display(), mean_a);
    println!("{:<40} {:>10.4}", args.results_b.display(), mean_b);
    println!();
    println!("{}", outcome);

    Ok(())
}
