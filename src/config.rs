use crate::compare::TestMethod;
use crate::eval::{MetricName, ProviderFailurePolicy};
use crate::ranking::RankingModel;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub compare: CompareConfig,
}

/// Input and output locations
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Tab-separated relevance judgments (query-id, corpus-id, score) with a header line.
    pub qrels: PathBuf,
    /// JSONL queries (`_id`, `text`, optional `metadata.query`).
    pub queries: PathBuf,
    /// Directory holding `<model>.<param>.run` files.
    pub runs_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_report_prefix")]
    pub report_prefix: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Batch evaluation settings
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_cutoff")]
    pub cutoff: usize,
    #[serde(default = "default_top_docs")]
    pub top_docs: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub on_provider_error: ProviderFailurePolicy,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            cutoff: default_cutoff(),
            top_docs: default_top_docs(),
            workers: default_workers(),
            on_provider_error: ProviderFailurePolicy::default(),
        }
    }
}

/// Grid search settings
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_model")]
    pub model: RankingModel,
    #[serde(default = "default_metric")]
    pub metric: MetricName,
    /// Explicit candidate values; the model's preset grid when absent.
    #[serde(default)]
    pub candidates: Option<Vec<f64>>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            metric: default_metric(),
            candidates: None,
        }
    }
}

impl TrainingConfig {
    pub fn candidates(&self) -> Vec<f64> {
        self.candidates
            .clone()
            .unwrap_or_else(|| self.model.default_candidates())
    }
}

/// Significance test settings
#[derive(Debug, Clone, Deserialize)]
pub struct CompareConfig {
    #[serde(default = "default_method")]
    pub method: TestMethod,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            alpha: default_alpha(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_report_prefix() -> String {
    crate::eval::report::DEFAULT_REPORT_PREFIX.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cutoff() -> usize {
    10
}

fn default_top_docs() -> usize {
    50
}

fn default_workers() -> usize {
    1
}

fn default_model() -> RankingModel {
    RankingModel::Bm25
}

fn default_metric() -> MetricName {
    MetricName::AveragePrecision
}

fn default_method() -> TestMethod {
    TestMethod::PairedT
}

fn default_alpha() -> f64 {
    0.05
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in RANKEVAL_CONFIG environment variable
    /// 2. ./rankeval.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RANKEVAL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("rankeval.toml"));

        Self::from_file(&config_path)
    }

    /// Load and validate a specific configuration file
    pub fn from_file(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.data.qrels.is_file() {
            anyhow::bail!("data.qrels file does not exist: {}", self.data.qrels.display());
        }

        if !self.data.queries.is_file() {
            anyhow::bail!("data.queries file does not exist: {}", self.data.queries.display());
        }

        if !self.data.runs_dir.is_dir() {
            anyhow::bail!(
                "data.runs_dir must be an existing directory: {}",
                self.data.runs_dir.display()
            );
        }

        if self.evaluation.cutoff == 0 {
            anyhow::bail!("evaluation.cutoff must be greater than 0");
        }

        if self.evaluation.top_docs == 0 {
            anyhow::bail!("evaluation.top_docs must be greater than 0");
        }

        if self.evaluation.workers == 0 {
            anyhow::bail!("evaluation.workers must be greater than 0");
        }

        if let Some(candidates) = &self.training.candidates {
            if candidates.is_empty() {
                anyhow::bail!("training.candidates must not be empty when set");
            }
            if candidates.iter().any(|c| !c.is_finite()) {
                anyhow::bail!("training.candidates must be finite numbers");
            }
        }

        if !(self.compare.alpha > 0.0 && self.compare.alpha < 1.0) {
            anyhow::bail!("compare.alpha must be between 0.0 and 1.0 (exclusive)");
        }

        Ok(())
    }

    /// Get the output directory for reports
    pub fn output_dir(&self) -> &Path {
        &self.data.output_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn create_test_config(temp_dir: &TempDir, extra: &str) -> std::path::PathBuf {
        let root = temp_dir.path();
        fs::write(root.join("test.tsv"), "query-id\tcorpus-id\tscore\n1\td1\t1\n").unwrap();
        fs::write(root.join("queries.jsonl"), "{\"_id\": \"1\", \"text\": \"q\"}\n").unwrap();
        fs::create_dir_all(root.join("runs")).unwrap();

        let root_str = root.to_str().unwrap().replace('\\', "\\\\");
        let content = format!(
            r#"
[data]
qrels = "{root}/test.tsv"
queries = "{root}/queries.jsonl"
runs_dir = "{root}/runs"
log_level = "debug"
{extra}
"#,
            root = root_str,
            extra = extra
        );
        let config_path = root.join("rankeval.toml");
        fs::write(&config_path, content).unwrap();
        config_path
    }

    #[test]
    fn test_config_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "");
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.data.log_level, "debug");
        assert_eq!(config.data.report_prefix, "TREC-COVID");
        assert_eq!(config.evaluation.cutoff, 10);
        assert_eq!(config.evaluation.top_docs, 50);
        assert_eq!(config.evaluation.on_provider_error, ProviderFailurePolicy::Abort);
        assert_eq!(config.training.model, RankingModel::Bm25);
        assert_eq!(config.training.candidates(), RankingModel::Bm25.default_candidates());
        assert_eq!(config.compare.method, TestMethod::PairedT);
        assert_eq!(config.compare.alpha, 0.05);
    }

    #[test]
    fn test_config_sections() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(
            &temp_dir,
            r#"
[evaluation]
cutoff = 5
top_docs = 20
workers = 4
on_provider_error = "skip"

[training]
model = "jm"
metric = "mrr"
candidates = [0.2, 0.4]

[compare]
method = "wilcoxon"
alpha = 0.01
"#,
        );
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.evaluation.cutoff, 5);
        assert_eq!(config.evaluation.workers, 4);
        assert_eq!(config.evaluation.on_provider_error, ProviderFailurePolicy::Skip);
        assert_eq!(config.training.model, RankingModel::JelinekMercer);
        assert_eq!(config.training.metric, MetricName::ReciprocalRank);
        assert_eq!(config.training.candidates(), vec![0.2, 0.4]);
        assert_eq!(config.compare.method, TestMethod::Wilcoxon);
    }

    #[test]
    fn test_config_rejects_zero_cutoff() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "[evaluation]\ncutoff = 0\n");
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("cutoff"));
    }

    #[test]
    fn test_config_rejects_empty_candidates() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "[training]\ncandidates = []\n");
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_config_rejects_bad_alpha() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "[compare]\nalpha = 1.0\n");
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_config_missing_runs_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "");
        fs::remove_dir_all(temp_dir.path().join("runs")).unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("runs_dir"));
    }

    #[test]
    fn test_config_load_from_env_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_config(&temp_dir, "");
        let original = std::env::var("RANKEVAL_CONFIG").ok();
        std::env::set_var("RANKEVAL_CONFIG", &path);
        let config = Config::load();
        std::env::remove_var("RANKEVAL_CONFIG");
        if let Some(v) = original {
            std::env::set_var("RANKEVAL_CONFIG", v);
        }
        assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("RANKEVAL_CONFIG").ok();
        std::env::set_var("RANKEVAL_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("RANKEVAL_CONFIG");
        if let Some(v) = original {
            std::env::set_var("RANKEVAL_CONFIG", v);
        }
    }
}
