//! Significance comparison of two systems' per-query metric values.

pub mod stats;

pub use stats::{paired_ttest, wilcoxon_signed_rank, TTestResult, WilcoxonResult};

use crate::error::{RankevalError, Result};
use crate::eval::QueryId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

/// Paired test used to compare two systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestMethod {
    #[serde(rename = "t")]
    PairedT,
    #[serde(rename = "wilcoxon")]
    Wilcoxon,
}

impl FromStr for TestMethod {
    type Err = RankevalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "t" | "paired-t" | "ttest" => Ok(TestMethod::PairedT),
            "wilcoxon" | "wilcoxon-signed-rank" => Ok(TestMethod::Wilcoxon),
            other => Err(RankevalError::Config(format!(
                "unknown test '{}' (expected t or wilcoxon)",
                other
            ))),
        }
    }
}

impl fmt::Display for TestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestMethod::PairedT => f.write_str("paired-t"),
            TestMethod::Wilcoxon => f.write_str("wilcoxon-signed-rank"),
        }
    }
}

/// p-value and verdict of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComparisonOutcome {
    pub method: TestMethod,
    pub p_value: f64,
    /// t for the t-test, z for Wilcoxon.
    pub statistic: f64,
    /// Number of paired observations.
    pub n: usize,
    pub alpha: f64,
    pub significant: bool,
}

impl fmt::Display for ComparisonOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test: {} (n = {}, alpha = {})", self.method, self.n, self.alpha)?;
        writeln!(
            f,
            "Result: {}",
            if self.significant { "significant" } else { "not significant" }
        )?;
        write!(f, "p-value: {}", self.p_value)
    }
}

/// Compare two aligned per-query series; `significant = p < alpha`.
pub fn compare(series_a: &[f64], series_b: &[f64], method: TestMethod, alpha: f64) -> Result<ComparisonOutcome> {
    if series_a.len() != series_b.len() {
        return Err(RankevalError::Config(format!(
            "paired series differ in length ({} vs {})",
            series_a.len(),
            series_b.len()
        )));
    }
    if series_a.is_empty() {
        return Err(RankevalError::Config("paired series are empty".to_string()));
    }
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(RankevalError::Config(format!("alpha must be in (0, 1), got {}", alpha)));
    }
    if series_a.iter().chain(series_b).any(|v| !v.is_finite()) {
        return Err(RankevalError::Config("paired series contain non-finite values".to_string()));
    }

    let (p_value, statistic) = match method {
        TestMethod::PairedT => {
            let result = paired_ttest(series_a, series_b);
            (result.p_value, result.t_statistic)
        }
        TestMethod::Wilcoxon => {
            let result = wilcoxon_signed_rank(series_a, series_b);
            (result.p_value, result.z)
        }
    };
    log::info!("{} over {} pairs: p = {}", method, series_a.len(), p_value);

    Ok(ComparisonOutcome {
        method,
        p_value,
        statistic,
        n: series_a.len(),
        alpha,
        significant: p_value < alpha,
    })
}

/// Read `(query id, value)` rows of a test report CSV.
///
/// The header line is skipped and the trailing `avg` row is dropped.
pub fn read_results(path: &Path) -> Result<Vec<(QueryId, f64)>> {
    let file = std::fs::File::open(path)?;
    results_from_reader(std::io::BufReader::new(file)).map_err(|e| match e {
        RankevalError::Parse(msg) => RankevalError::Parse(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

pub fn results_from_reader<R: BufRead>(reader: R) -> Result<Vec<(QueryId, f64)>> {
    let mut rows = Vec::new();
    for (line_no, line) in reader.lines().enumerate().skip(1) {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split(',').map(str::trim);
        let id = parts.next().unwrap_or_default();
        if id.eq_ignore_ascii_case("avg") {
            continue;
        }
        let value = parts.next().ok_or_else(|| {
            RankevalError::Parse(format!("line {}: expected 'query,value'", line_no + 1))
        })?;
        let id = id
            .parse::<QueryId>()
            .map_err(|_| RankevalError::Parse(format!("line {}: invalid query id '{}'", line_no + 1, id)))?;
        let value = value
            .parse::<f64>()
            .map_err(|_| RankevalError::Parse(format!("line {}: invalid value '{}'", line_no + 1, value)))?;
        rows.push((id, value));
    }
    Ok(rows)
}

/// Check both result sets cover the same queries in the same order and split out the values.
pub fn align(results_a: &[(QueryId, f64)], results_b: &[(QueryId, f64)]) -> Result<(Vec<f64>, Vec<f64>)> {
    if results_a.len() != results_b.len() {
        return Err(RankevalError::Config(format!(
            "result sets differ in size ({} vs {} queries)",
            results_a.len(),
            results_b.len()
        )));
    }
    if let Some(((a, _), (b, _))) = results_a
        .iter()
        .zip(results_b)
        .find(|((a, _), (b, _))| a != b)
    {
        return Err(RankevalError::Config(format!(
            "result sets are not paired: query {} vs query {}",
            a, b
        )));
    }
    Ok((
        results_a.iter().map(|(_, v)| *v).collect(),
        results_b.iter().map(|(_, v)| *v).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_identical_series_not_significant() {
        let x = vec![0.2, 0.4, 0.1, 0.9];
        let outcome = compare(&x, &x, TestMethod::PairedT, 0.05).unwrap();
        assert_eq!(outcome.p_value, 1.0);
        assert!(!outcome.significant);

        let outcome = compare(&x, &x, TestMethod::Wilcoxon, 0.05).unwrap();
        assert_eq!(outcome.p_value, 1.0);
        assert!(!outcome.significant);
    }

    #[test]
    fn test_significant_difference() {
        let a = vec![0.9, 0.92, 0.88, 0.91, 0.89, 0.93, 0.87, 0.90, 0.94, 0.86];
        let b = vec![0.7, 0.73, 0.68, 0.71, 0.69, 0.72, 0.67, 0.70, 0.75, 0.66];
        let outcome = compare(&a, &b, TestMethod::PairedT, 0.05).unwrap();
        assert!(outcome.significant);
        let outcome = compare(&a, &b, TestMethod::Wilcoxon, 0.05).unwrap();
        assert!(outcome.significant);
        assert_eq!(outcome.n, 10);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(compare(&[0.1, 0.2], &[0.1], TestMethod::PairedT, 0.05).is_err());
        assert!(compare(&[], &[], TestMethod::Wilcoxon, 0.05).is_err());
        assert!(compare(&[0.1], &[0.2], TestMethod::PairedT, 1.5).is_err());
        assert!(compare(&[f64::NAN], &[0.2], TestMethod::PairedT, 0.05).is_err());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("t".parse::<TestMethod>().unwrap(), TestMethod::PairedT);
        assert_eq!("paired-t".parse::<TestMethod>().unwrap(), TestMethod::PairedT);
        assert_eq!("Wilcoxon".parse::<TestMethod>().unwrap(), TestMethod::Wilcoxon);
        assert!("anova".parse::<TestMethod>().is_err());
    }

    #[test]
    fn test_read_results_drops_header_and_avg() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.test.csv");
        fs::write(&path, "1.2,map\n21,0.5\n22,0.25\n\navg,0.375\n").unwrap();
        let rows = read_results(&path).unwrap();
        assert_eq!(rows, vec![(21, 0.5), (22, 0.25)]);
    }

    #[test]
    fn test_read_results_rejects_malformed_rows() {
        let err = results_from_reader("0.4,p\n21\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(results_from_reader("0.4,p\nx,0.1\n".as_bytes()).is_err());
    }

    #[test]
    fn test_align_requires_same_queries_in_order() {
        let a = vec![(1, 0.1), (2, 0.2)];
        let b = vec![(1, 0.3), (2, 0.4)];
        let (va, vb) = align(&a, &b).unwrap();
        assert_eq!(va, vec![0.1, 0.2]);
        assert_eq!(vb, vec![0.3, 0.4]);

        assert!(align(&a, &[(2, 0.3), (1, 0.4)]).is_err());
        assert!(align(&a, &[(1, 0.3)]).is_err());
    }

    #[test]
    fn test_outcome_display() {
        let outcome = compare(&[0.1, 0.2, 0.3], &[0.1, 0.2, 0.3], TestMethod::Wilcoxon, 0.05).unwrap();
        let text = outcome.to_string();
        assert!(text.contains("wilcoxon-signed-rank"));
        assert!(text.contains("not significant"));
        assert!(text.contains("p-value: 1"));
    }
}
