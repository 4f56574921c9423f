//! Relevance judgments (qrels): query id -> set of relevant document ids.

use crate::error::{RankevalError, Result};
use crate::eval::QueryId;
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;

/// Ground-truth judgments, built once before evaluation and read-only afterwards.
///
/// Graded judgments collapse to binary: any nonzero grade is relevant. A query
/// judged only with grade 0 still has an entry, with an empty set.
#[derive(Debug, Clone, Default)]
pub struct RelevanceStore {
    judgments: HashMap<QueryId, HashSet<String>>,
}

impl RelevanceStore {
    /// Load a tab-separated qrels file (`query-id`, `corpus-id`, `score`) with a header line.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let store = Self::from_reader(std::io::BufReader::new(file)).map_err(|e| match e {
            RankevalError::Parse(msg) => RankevalError::Parse(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        log::info!(
            "Loaded relevance judgments for {} queries ({} relevant pairs) from {}",
            store.len(),
            store.relevant_pair_count(),
            path.display()
        );
        Ok(store)
    }

    /// Parse qrels from a reader. The first line is a header and is skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut judgments: HashMap<QueryId, HashSet<String>> = HashMap::new();

        for (line_no, line) in reader.lines().enumerate().skip(1) {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').map(str::trim).collect();
            if parts.len() < 3 {
                return Err(RankevalError::Parse(format!(
                    "line {}: expected 3 tab-separated columns, found {}",
                    line_no + 1,
                    parts.len()
                )));
            }
            let query_id = parts[0].parse::<QueryId>().map_err(|_| {
                RankevalError::Parse(format!("line {}: invalid query id '{}'", line_no + 1, parts[0]))
            })?;
            let grade = parts[2].parse::<i32>().map_err(|_| {
                RankevalError::Parse(format!("line {}: invalid relevance grade '{}'", line_no + 1, parts[2]))
            })?;

            let relevant = judgments.entry(query_id).or_default();
            if grade != 0 {
                relevant.insert(parts[1].to_string());
            }
        }

        Ok(Self { judgments })
    }

    /// Build a store from in-memory judgments (fixtures, other loaders).
    pub fn from_judgments<I, D>(judgments: I) -> Self
    where
        I: IntoIterator<Item = (QueryId, D)>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            judgments: judgments
                .into_iter()
                .map(|(id, docs)| (id, docs.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// Relevant documents for a query; absence is an error, not an empty set.
    pub fn relevant_docs(&self, query_id: QueryId) -> Result<&HashSet<String>> {
        self.judgments
            .get(&query_id)
            .ok_or(RankevalError::MissingJudgment(query_id))
    }

    pub fn contains(&self, query_id: QueryId) -> bool {
        self.judgments.contains_key(&query_id)
    }

    /// Number of judged queries.
    pub fn len(&self) -> usize {
        self.judgments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judgments.is_empty()
    }

    /// Judged query ids in ascending order.
    pub fn query_ids(&self) -> Vec<QueryId> {
        let mut ids: Vec<QueryId> = self.judgments.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn relevant_pair_count(&self) -> usize {
        self.judgments.values().map(HashSet::len).sum()
    }
}
