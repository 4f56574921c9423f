//! Evaluation queries: ids, inclusive id ranges and the JSONL query source loader.

use crate::error::{RankevalError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

/// Positive integer identifying a query within a run.
pub type QueryId = u32;

/// Single evaluation query as handed to a ranking provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalQuery {
    pub id: QueryId,
    /// Query text passed to the ranking provider.
    pub text: String,
}

impl EvalQuery {
    pub fn new(id: QueryId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// Inclusive range of query ids; `None` bounds mean "all queries".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryRange {
    bounds: Option<(QueryId, QueryId)>,
}

impl QueryRange {
    /// Range accepting every query id.
    pub fn all() -> Self {
        Self { bounds: None }
    }

    /// Inclusive `start..=end` range.
    pub fn new(start: QueryId, end: QueryId) -> Result<Self> {
        if end < start {
            return Err(RankevalError::Config(format!(
                "query range end {} is lower than its start {}",
                end, start
            )));
        }
        Ok(Self {
            bounds: Some((start, end)),
        })
    }

    pub fn contains(&self, id: QueryId) -> bool {
        match self.bounds {
            Some((start, end)) => id >= start && id <= end,
            None => true,
        }
    }

    pub fn bounds(&self) -> Option<(QueryId, QueryId)> {
        self.bounds
    }

    /// True when two bounded ranges share at least one id.
    pub fn overlaps(&self, other: &QueryRange) -> bool {
        match (self.bounds, other.bounds) {
            (Some((a1, a2)), Some((b1, b2))) => a1 <= b2 && b1 <= a2,
            _ => true,
        }
    }
}

impl FromStr for QueryRange {
    type Err = RankevalError;

    /// Accepts `all`, `n` or `n-m`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        let parse_id = |part: &str| {
            part.trim().parse::<QueryId>().map_err(|_| {
                RankevalError::Config(format!("invalid query id '{}' in range '{}'", part, s))
            })
        };
        match s.split_once('-') {
            Some((start, end)) => Self::new(parse_id(start)?, parse_id(end)?),
            None => {
                let id = parse_id(s)?;
                Self::new(id, id)
            }
        }
    }
}

impl fmt::Display for QueryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bounds {
            None => write!(f, "all"),
            Some((start, end)) if start == end => write!(f, "{}", start),
            Some((start, end)) => write!(f, "{}-{}", start, end),
        }
    }
}

/// Load queries from a BEIR-style JSONL file, keeping ids inside `range`.
pub fn load_queries(path: &Path, range: QueryRange) -> Result<BTreeMap<QueryId, EvalQuery>> {
    let file = std::fs::File::open(path)?;
    let queries = read_queries(std::io::BufReader::new(file), range)
        .map_err(|e| match e {
            RankevalError::Parse(msg) => {
                RankevalError::Parse(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
    log::info!(
        "Loaded {} queries (range {}) from {}",
        queries.len(),
        range,
        path.display()
    );
    Ok(queries)
}

/// Parse JSONL queries from any buffered reader.
///
/// Each line is an object with `_id` (string or integer), `text` and an optional
/// `metadata.query`; the latter wins when present.
pub fn read_queries<R: BufRead>(reader: R, range: QueryRange) -> Result<BTreeMap<QueryId, EvalQuery>> {
    let mut queries = BTreeMap::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: JsonValue = serde_json::from_str(&line)
            .map_err(|e| RankevalError::Parse(format!("line {}: {}", line_no + 1, e)))?;

        let id = parse_query_id(value.get("_id"))
            .ok_or_else(|| RankevalError::Parse(format!("line {}: missing or invalid _id", line_no + 1)))?;
        if !range.contains(id) {
            continue;
        }

        let text = value
            .get("metadata")
            .and_then(|m| m.get("query"))
            .and_then(JsonValue::as_str)
            .or_else(|| value.get("text").and_then(JsonValue::as_str))
            .unwrap_or("")
            .trim();
        if text.is_empty() {
            log::warn!("Skipping query {} with empty text", id);
            continue;
        }

        if queries.insert(id, EvalQuery::new(id, text)).is_some() {
            return Err(RankevalError::Parse(format!(
                "line {}: duplicate query id {}",
                line_no + 1,
                id
            )));
        }
    }

    Ok(queries)
}

fn parse_query_id(value: Option<&JsonValue>) -> Option<QueryId> {
    let id = match value? {
        JsonValue::String(s) => s.trim().parse::<QueryId>().ok()?,
        JsonValue::Number(n) => QueryId::try_from(n.as_u64()?).ok()?,
        _ => return None,
    };
    (id > 0).then_some(id)
}
