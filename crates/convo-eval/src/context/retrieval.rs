//! Retrieval-ranked context: top-K fragments by embedding similarity.
//!
//! A [`ContextDatabase`] holds parallel arrays (embedding, date label, source
//! id, fragment text) for one sample at one granularity. Building it is the
//! upstream embedding job's concern; this module loads the persisted file and
//! ranks its rows against a question vector.
//!
//! Vectors are assumed pre-normalized by whoever produced them, so the score
//! is a plain dot product.

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

// ── Mode ───────────────────────────────────────────────────────────

/// Granularity of the fragments in a context database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// One fragment per session summary.
    Summary,
    /// One fragment per dialogue turn.
    Dialog,
    /// One fragment per extracted observation.
    Observation,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Summary => "summary",
            RetrievalMode::Dialog => "dialog",
            RetrievalMode::Observation => "observation",
        }
    }

    /// Component used in the persisted database filename.
    pub fn file_component(&self) -> &'static str {
        match self {
            RetrievalMode::Summary => "session_summary",
            RetrievalMode::Dialog => "dialog",
            RetrievalMode::Observation => "observation",
        }
    }

    /// Separator between rendered fragments. Fine-grained fragments are one
    /// per line; whole summaries get a blank line between them.
    pub fn separator(&self) -> &'static str {
        match self {
            RetrievalMode::Summary => "\n\n",
            RetrievalMode::Dialog | RetrievalMode::Observation => "\n",
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMode {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "summary" => Ok(RetrievalMode::Summary),
            "dialog" => Ok(RetrievalMode::Dialog),
            "observation" => Ok(RetrievalMode::Observation),
            other => Err(EvalError::Config(format!(
                "unknown retrieval mode '{other}' (expected summary, dialog, or observation)"
            ))),
        }
    }
}

/// How fragments are ranked against a question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Retriever {
    /// Dot product against a persisted [`ContextDatabase`].
    #[default]
    Embedding,
    /// BM25 over the dialogue turns; see [`LexicalIndex`](super::LexicalIndex).
    Bm25,
}

impl Retriever {
    pub fn as_str(&self) -> &'static str {
        match self {
            Retriever::Embedding => "embedding",
            Retriever::Bm25 => "bm25",
        }
    }
}

impl fmt::Display for Retriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Retriever {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "embedding" => Ok(Retriever::Embedding),
            "bm25" | "bm25s" => Ok(Retriever::Bm25),
            other => Err(EvalError::Config(format!(
                "unknown retriever '{other}' (expected embedding or bm25)"
            ))),
        }
    }
}

// ── Identifiers ────────────────────────────────────────────────────

/// Source identifier of a fragment. A fragment distilled from several turns
/// carries several ids, either as a list or as one comma-joined string.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum ContextId {
    One(String),
    Many(Vec<String>),
}

impl ContextId {
    /// Append the atomic ids this identifier stands for.
    pub fn flatten_into(&self, out: &mut Vec<String>) {
        match self {
            ContextId::One(id) if id.contains(',') => {
                out.extend(id.split(',').map(|s| s.trim().to_string()));
            }
            ContextId::One(id) => out.push(id.clone()),
            ContextId::Many(ids) => out.extend(ids.iter().cloned()),
        }
    }
}

// ── Database ───────────────────────────────────────────────────────

/// Parallel, index-aligned arrays for one sample.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ContextDatabase {
    pub embeddings: Vec<Vec<f32>>,
    #[serde(rename = "date_time")]
    pub date_times: Vec<String>,
    #[serde(rename = "dia_id")]
    pub ids: Vec<ContextId>,
    #[serde(rename = "context")]
    pub fragments: Vec<String>,
}

/// Fragments chosen for one question.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    /// `"{date}: {fragment}"` entries joined by the mode's separator.
    pub text: String,
    /// Flattened source ids, in rank order.
    pub ids: Vec<String>,
    /// Scores of the selected rows, descending.
    pub scores: Vec<f32>,
}

impl ContextDatabase {
    /// Persisted location: `{emb_dir}/{dataset}_{granularity}_{sample_id}.json`.
    pub fn path_for(
        emb_dir: &Path,
        dataset_prefix: &str,
        mode: RetrievalMode,
        sample_id: &str,
    ) -> PathBuf {
        emb_dir.join(format!(
            "{dataset_prefix}_{}_{sample_id}.json",
            mode.file_component()
        ))
    }

    /// Load and validate a persisted database.
    ///
    /// A missing file is a configuration error: the index must be built
    /// before evaluation starts.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EvalError::Config(format!(
                "context database not found at {}; build embeddings first",
                path.display()
            )));
        }
        let json = std::fs::read_to_string(path)?;
        let db: ContextDatabase = serde_json::from_str(&json)
            .map_err(|e| EvalError::Retrieval(format!("{}: {e}", path.display())))?;
        db.validate()?;
        debug!(
            "Loaded context database {} ({} fragments)",
            path.display(),
            db.len()
        );
        Ok(db)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Check index alignment and a uniform embedding dimension. Returns the
    /// dimension (0 for an empty database).
    pub fn validate(&self) -> Result<usize> {
        let n = self.fragments.len();
        if self.embeddings.len() != n || self.date_times.len() != n || self.ids.len() != n {
            return Err(EvalError::Retrieval(format!(
                "misaligned database: {} embeddings, {} dates, {} ids, {} fragments",
                self.embeddings.len(),
                self.date_times.len(),
                self.ids.len(),
                n
            )));
        }
        let dim = self.embeddings.first().map_or(0, Vec::len);
        if let Some(row) = self.embeddings.iter().position(|e| e.len() != dim) {
            return Err(EvalError::Retrieval(format!(
                "embedding {row} has dimension {}, expected {dim}",
                self.embeddings[row].len()
            )));
        }
        Ok(dim)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Rank every fragment by dot product with `query` and render the top `top_k`.
///
/// Ties keep database order.
pub fn select(
    db: &ContextDatabase,
    query: &[f32],
    top_k: usize,
    mode: RetrievalMode,
) -> Result<RetrievedContext> {
    let dim = db.validate()?;
    if !db.is_empty() && query.len() != dim {
        return Err(EvalError::Retrieval(format!(
            "query has dimension {}, database has {dim}",
            query.len()
        )));
    }

    let scores: Vec<f32> = db.embeddings.iter().map(|e| dot(e, query)).collect();
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(top_k);

    let mut ids = Vec::new();
    let mut entries = Vec::with_capacity(order.len());
    for &idx in &order {
        db.ids[idx].flatten_into(&mut ids);
        entries.push(format!("{}: {}", db.date_times[idx], db.fragments[idx]));
    }

    Ok(RetrievedContext {
        text: entries.join(mode.separator()),
        ids,
        scores: order.iter().map(|&i| scores[i]).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> ContextDatabase {
        ContextDatabase {
            embeddings: vec![
                vec![1.0, 0.0],
                vec![0.0, 1.0],
                vec![0.6, 0.8],
                vec![0.8, 0.6],
                vec![-1.0, 0.0],
            ],
            date_times: (1..=5).map(|i| format!("day {i}")).collect(),
            ids: vec![
                ContextId::One("D1:1".into()),
                ContextId::One("D1:2".into()),
                ContextId::One("D2:1, D2:2".into()),
                ContextId::Many(vec!["D3:1".into(), "D3:4".into()]),
                ContextId::One("D4:1".into()),
            ],
            fragments: (1..=5).map(|i| format!("fact {i}")).collect(),
        }
    }

    #[test]
    fn top_two_in_descending_score_order() {
        let result = select(&database(), &[0.7, 0.7], 2, RetrievalMode::Dialog).unwrap();
        // Rows 2 and 3 both score 0.98; database order breaks the tie.
        assert_eq!(result.text, "day 3: fact 3\nday 4: fact 4");
        assert_eq!(result.ids, vec!["D2:1", "D2:2", "D3:1", "D3:4"]);
        assert_eq!(result.scores.len(), 2);
    }

    #[test]
    fn highest_score_first() {
        let result = select(&database(), &[1.0, 0.0], 3, RetrievalMode::Observation).unwrap();
        assert_eq!(
            result.text,
            "day 1: fact 1\nday 4: fact 4\nday 3: fact 3"
        );
        assert!(result.scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn summary_mode_uses_blank_lines() {
        let result = select(&database(), &[0.0, 1.0], 2, RetrievalMode::Summary).unwrap();
        assert_eq!(result.text, "day 2: fact 2\n\nday 3: fact 3");
    }

    #[test]
    fn top_k_larger_than_database() {
        let result = select(&database(), &[0.0, 1.0], 50, RetrievalMode::Dialog).unwrap();
        assert_eq!(result.scores.len(), 5);
        assert!(result.text.ends_with("day 5: fact 5"));
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let err = select(&database(), &[1.0, 0.0, 0.0], 2, RetrievalMode::Dialog).unwrap_err();
        assert!(matches!(err, EvalError::Retrieval(_)));
    }

    #[test]
    fn misaligned_arrays_fail_validation() {
        let mut db = database();
        db.date_times.pop();
        assert!(matches!(db.validate(), Err(EvalError::Retrieval(_))));
    }

    #[test]
    fn empty_database_selects_nothing() {
        let result = select(&ContextDatabase::default(), &[1.0], 3, RetrievalMode::Dialog).unwrap();
        assert!(result.text.is_empty());
        assert!(result.ids.is_empty());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("dialog".parse::<RetrievalMode>().unwrap(), RetrievalMode::Dialog);
        assert_eq!("Summary".parse::<RetrievalMode>().unwrap(), RetrievalMode::Summary);
        assert!(matches!(
            "paragraph".parse::<RetrievalMode>(),
            Err(EvalError::Config(_))
        ));
    }

    #[test]
    fn retriever_parsing() {
        assert_eq!("bm25".parse::<Retriever>().unwrap(), Retriever::Bm25);
        assert_eq!("BM25s".parse::<Retriever>().unwrap(), Retriever::Bm25);
        assert_eq!("embedding".parse::<Retriever>().unwrap(), Retriever::Embedding);
        assert_eq!(Retriever::default(), Retriever::Embedding);
        assert!(matches!("tfidf".parse::<Retriever>(), Err(EvalError::Config(_))));
    }

    #[test]
    fn load_from_disk_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = ContextDatabase::path_for(dir.path(), "locomo10", RetrievalMode::Summary, "conv-26");
        assert!(path.ends_with("locomo10_session_summary_conv-26.json"));
        assert!(matches!(
            ContextDatabase::load(&path),
            Err(EvalError::Config(_))
        ));

        std::fs::write(&path, serde_json::to_string(&database()).unwrap()).unwrap();
        let db = ContextDatabase::load(&path).unwrap();
        assert_eq!(db.len(), 5);
        assert_eq!(db.ids[3], ContextId::Many(vec!["D3:1".into(), "D3:4".into()]));
    }
}
