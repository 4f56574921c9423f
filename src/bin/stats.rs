use anyhow::Context;
use rankeval::{
    eval::{load_queries, QueryRange},
    ranking::{RankingModel, RunDirectory},
    Config, RelevanceStore,
};

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[usize], p: f64) -> usize {
    if sorted_values.is_empty() {
        return 0;
    }
    let index = ((sorted_values.len() - 1) as f64 * p).ceil() as usize;
    sorted_values[index.min(sorted_values.len() - 1)]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.data.log_level.as_str()),
    )
    .init();

    let relevance = RelevanceStore::load(&config.data.qrels)
        .with_context(|| format!("Failed to load judgments from {}", config.data.qrels.display()))?;
    let queries = load_queries(&config.data.queries, QueryRange::all())
        .with_context(|| format!("Failed to load queries from {}", config.data.queries.display()))?;

    println!("\n=== Evaluation Data Statistics ===\n");

    let judged = relevance.query_ids();
    let mut per_query: Vec<usize> = judged
        .iter()
        .filter_map(|id| relevance.relevant_docs(*id).ok())
        .map(|docs| docs.len())
        .collect();
    per_query.sort_unstable();
    let without_relevant = per_query.iter().filter(|&&n| n == 0).count();

    println!("Judgments ({}):", config.data.qrels.display());
    println!("{:-<80}", "");
    println!("  Judged queries:              {}", relevance.len());
    println!("  Relevant (query, doc) pairs: {}", relevance.relevant_pair_count());
    println!("  Queries with no relevant:    {}", without_relevant);
    println!(
        "  Relevant per query:          p50 {}  p90 {}  max {}",
        percentile(&per_query, 0.5),
        percentile(&per_query, 0.9),
        per_query.last().copied().unwrap_or(0)
    );

    let unjudged: Vec<_> = queries.keys().filter(|id| !relevance.contains(**id)).collect();
    println!("\nQueries ({}):", config.data.queries.display());
    println!("{:-<80}", "");
    println!("  Total:                       {}", queries.len());
    if let (Some(first), Some(last)) = (queries.keys().next(), queries.keys().next_back()) {
        println!("  Id range:                    {}-{}", first, last);
    }
    println!("  Without judgments:           {}", unjudged.len());
    if !unjudged.is_empty() {
        let preview: Vec<String> = unjudged.iter().take(10).map(|id| id.to_string()).collect();
        println!("    e.g. {}", preview.join(", "));
    }

    println!("\nRun files ({}):", config.data.runs_dir.display());
    println!("{:-<80}", "");
    println!("{:<8} {:<8} {:>6}  {}", "Model", "Param", "Count", "Values");
    for model in [RankingModel::JelinekMercer, RankingModel::Bm25] {
        let params = RunDirectory::new(&config.data.runs_dir, model).available_params();
        let values: Vec<String> = params.iter().map(|p| format!("{:.2}", p)).collect();
        println!(
            "{:<8} {:<8} {:>6}  {}",
            model.as_str(),
            model.parameter_name(),
            params.len(),
            values.join(" ")
        );
        let missing: Vec<String> = model
            .default_candidates()
            .into_iter()
            .filter(|c| !params.iter().any(|p| (p - c).abs() < 1e-9))
            .map(|c| format!("{:.2}", c))
            .collect();
        if !missing.is_empty() {
            println!("{:<17} missing preset values: {}", "", missing.join(" "));
        }
    }
    println!();

    Ok(())
}
