//! Replay provider over TREC run files produced by an external retrieval engine.

use super::{round2, RankingModel, RankingProvider, RankingProviderFactory, ScoredDoc};
use crate::error::{RankevalError, Result};
use crate::eval::{EvalQuery, QueryId};
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Rankings read from a run file (`qid Q0 docid rank score tag`).
#[derive(Debug, Clone, Default)]
pub struct RunFileProvider {
    rankings: HashMap<QueryId, Vec<ScoredDoc>>,
}

impl RunFileProvider {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let provider = Self::from_reader(std::io::BufReader::new(file)).map_err(|e| match e {
            RankevalError::Parse(msg) => RankevalError::Parse(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        log::debug!(
            "Loaded run {} with rankings for {} queries",
            path.display(),
            provider.rankings.len()
        );
        Ok(provider)
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut rankings: HashMap<QueryId, Vec<ScoredDoc>> = HashMap::new();
        let mut seen: HashSet<(QueryId, String)> = HashSet::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() < 5 {
                return Err(RankevalError::Parse(format!(
                    "line {}: expected 'qid Q0 docid rank score [tag]'",
                    line_no + 1
                )));
            }
            let query_id = fields[0].parse::<QueryId>().map_err(|_| {
                RankevalError::Parse(format!("line {}: invalid query id '{}'", line_no + 1, fields[0]))
            })?;
            let score = fields[4].parse::<f32>().map_err(|_| {
                RankevalError::Parse(format!("line {}: invalid score '{}'", line_no + 1, fields[4]))
            })?;
            if !seen.insert((query_id, fields[2].to_string())) {
                return Err(RankevalError::Parse(format!(
                    "line {}: document '{}' listed twice for query {}",
                    line_no + 1,
                    fields[2],
                    query_id
                )));
            }
            rankings
                .entry(query_id)
                .or_default()
                .push(ScoredDoc::new(fields[2], score));
        }

        // Stable: equal scores keep file order
        for docs in rankings.values_mut() {
            docs.sort_by(|a, b| b.score.total_cmp(&a.score));
        }

        Ok(Self { rankings })
    }

    pub fn query_count(&self) -> usize {
        self.rankings.len()
    }
}

impl RankingProvider for RunFileProvider {
    fn search(&self, query: &EvalQuery, top_docs: usize) -> Result<Vec<ScoredDoc>> {
        Ok(self
            .rankings
            .get(&query.id)
            .map(|docs| docs.iter().take(top_docs).cloned().collect())
            .unwrap_or_default())
    }
}

/// Directory of run files named `<model>.<param>.run`, one per parameter value.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    root: PathBuf,
    model: RankingModel,
}

impl RunDirectory {
    pub fn new<P: AsRef<Path>>(root: P, model: RankingModel) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            model,
        }
    }

    /// File name expected for a parameter value, e.g. `bm25.1.20.run`.
    pub fn file_name(model: RankingModel, param: f64) -> String {
        format!("{}.{:.2}.run", model.as_str(), round2(param))
    }

    /// Parameter values with a run file anywhere under the root, ascending.
    pub fn available_params(&self) -> Vec<f64> {
        let prefix = format!("{}.", self.model.as_str());
        let mut params: Vec<f64> = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                let value = name.strip_prefix(&prefix)?.strip_suffix(".run")?;
                value.parse::<f64>().ok()
            })
            .collect();
        params.sort_by(f64::total_cmp);
        params.dedup();
        params
    }

    /// Path of the run file for `param`; two files with that name under the root is an error.
    fn locate(&self, param: f64) -> Result<Option<PathBuf>> {
        let wanted = Self::file_name(self.model, param);
        let mut matches = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name().to_str() == Some(wanted.as_str()))
            .map(|e| e.into_path());
        let found = matches.next();
        if let Some(other) = matches.next() {
            return Err(RankevalError::Config(format!(
                "run file {} is ambiguous under {} ({} and {})",
                wanted,
                self.root.display(),
                found.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
                other.display()
            )));
        }
        Ok(found)
    }
}

impl RankingProviderFactory for RunDirectory {
    type Provider = RunFileProvider;

    fn instantiate(&self, param: f64) -> Result<RunFileProvider> {
        let path = self.locate(param)?.ok_or_else(|| {
            RankevalError::Config(format!(
                "no run file {} under {}",
                Self::file_name(self.model, param),
                self.root.display()
            ))
        })?;
        log::info!(
            "Using {} {}={} from {}",
            self.model,
            self.model.parameter_name(),
            round2(param),
            path.display()
        );
        RunFileProvider::load(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const RUN: &str = "1 Q0 d3 2 0.5 bm25\n\
1 Q0 d1 1 0.9 bm25\n\
1 Q0 d2 3 0.5 bm25\n\
\n\
2 Q0 d9 1 1.5 bm25\n";

    #[test]
    fn test_run_sorted_by_score_stable() {
        let provider = RunFileProvider::from_reader(RUN.as_bytes()).unwrap();
        let docs = provider.search(&EvalQuery::new(1, "q"), 10).unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d3", "d2"]);
    }

    #[test]
    fn test_search_truncates_to_top_docs() {
        let provider = RunFileProvider::from_reader(RUN.as_bytes()).unwrap();
        let docs = provider.search(&EvalQuery::new(1, "q"), 2).unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_unknown_query_returns_empty_ranking() {
        let provider = RunFileProvider::from_reader(RUN.as_bytes()).unwrap();
        assert!(provider.search(&EvalQuery::new(7, "q"), 10).unwrap().is_empty());
        assert_eq!(provider.query_count(), 2);
    }

    #[test]
    fn test_malformed_run_line() {
        let err = RunFileProvider::from_reader("1 Q0 d1 1\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(RunFileProvider::from_reader("1 Q0 d1 1 high\n".as_bytes()).is_err());
    }

    #[test]
    fn test_duplicate_document_in_run_rejected() {
        let err = RunFileProvider::from_reader("1 Q0 a 1 2.0 t\n1 Q0 a 2 1.0 t\n".as_bytes()).unwrap_err();
        assert!(matches!(err, RankevalError::Parse(_)));
        assert!(err.to_string().contains("line 2"));

        // The same document under different queries is fine
        let provider = RunFileProvider::from_reader("1 Q0 a 1 2.0 t\n2 Q0 a 1 1.0 t\n".as_bytes()).unwrap();
        assert_eq!(provider.query_count(), 2);
    }

    #[test]
    fn test_run_directory_rejects_ambiguous_files() {
        let temp_dir = TempDir::new().unwrap();
        for dir in ["a", "b"] {
            fs::create_dir_all(temp_dir.path().join(dir)).unwrap();
            fs::write(temp_dir.path().join(dir).join("bm25.1.20.run"), RUN).unwrap();
        }
        let runs = RunDirectory::new(temp_dir.path(), RankingModel::Bm25);
        let err = runs.instantiate(1.2).unwrap_err();
        assert!(matches!(err, RankevalError::Config(_)));
        assert!(err.to_string().contains("ambiguous"));
        assert_eq!(runs.available_params(), vec![1.2]);
    }

    #[test]
    fn test_run_directory_resolves_param_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("bm25")).unwrap();
        fs::write(temp_dir.path().join("bm25/bm25.1.20.run"), RUN).unwrap();
        fs::write(temp_dir.path().join("bm25.0.40.run"), RUN).unwrap();
        fs::write(temp_dir.path().join("jm.0.10.run"), RUN).unwrap();

        let runs = RunDirectory::new(temp_dir.path(), RankingModel::Bm25);
        assert_eq!(runs.available_params(), vec![0.4, 1.2]);

        let provider = runs.instantiate(1.2).unwrap();
        assert_eq!(provider.query_count(), 2);

        let err = runs.instantiate(2.0).unwrap_err();
        assert!(matches!(err, RankevalError::Config(_)));
    }

    #[test]
    fn test_file_name_format() {
        assert_eq!(RunDirectory::file_name(RankingModel::JelinekMercer, 0.1), "jm.0.10.run");
        assert_eq!(RunDirectory::file_name(RankingModel::Bm25, 1.2000001), "bm25.1.20.run");
    }
}
