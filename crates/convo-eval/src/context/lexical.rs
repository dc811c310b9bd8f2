//! Lexical retrieval: BM25 over the dialogue turns of one conversation.
//!
//! Unlike [`select`](super::select), nothing is precomputed. The index is
//! built from the sample's own turns when the sample starts and queried with
//! each question's raw text.

use super::retrieval::{ContextId, RetrievalMode, RetrievedContext};
use crate::dataset::Conversation;
use bm25::{Language, SearchEngine, SearchEngineBuilder};
use tracing::debug;

/// One indexed turn.
#[derive(Debug, Clone)]
struct Entry {
    date_time: String,
    text: String,
    id: Option<ContextId>,
}

/// BM25 index over every turn of a conversation.
pub struct LexicalIndex {
    /// `None` for a conversation without turns.
    engine: Option<SearchEngine<u32>>,
    entries: Vec<Entry>,
}

impl LexicalIndex {
    pub fn from_conversation(conversation: &Conversation) -> Self {
        let entries: Vec<Entry> = conversation
            .sessions
            .values()
            .flat_map(|session| {
                session.turns.iter().map(|turn| Entry {
                    date_time: session.date_time.clone(),
                    text: turn.render(),
                    id: turn.fragment_id.clone().map(ContextId::One),
                })
            })
            .collect();

        let engine = (!entries.is_empty()).then(|| {
            let corpus: Vec<String> = entries.iter().map(|e| e.text.clone()).collect();
            SearchEngineBuilder::<u32>::with_corpus(Language::English, corpus).build()
        });
        debug!("Built BM25 index over {} turn(s)", entries.len());
        Self { engine, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `top_k` turns for `query`, rendered like dialog-mode fragments.
    ///
    /// Equal scores keep conversation order.
    pub fn search(&self, query: &str, top_k: usize) -> RetrievedContext {
        let Some(engine) = &self.engine else {
            return RetrievedContext::default();
        };
        // Fetch every match so ties can be ordered before truncating.
        let mut hits: Vec<(usize, f32)> = engine
            .search(query, self.entries.len())
            .into_iter()
            .filter_map(|hit| {
                let idx = usize::try_from(hit.document.id).ok()?;
                (idx < self.entries.len()).then_some((idx, hit.score))
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.truncate(top_k);

        let mut ids = Vec::new();
        let mut lines = Vec::with_capacity(hits.len());
        for &(idx, _) in &hits {
            let entry = &self.entries[idx];
            if let Some(id) = &entry.id {
                id.flatten_into(&mut ids);
            }
            lines.push(format!("{}: {}", entry.date_time, entry.text));
        }

        RetrievedContext {
            text: lines.join(RetrievalMode::Dialog.separator()),
            ids,
            scores: hits.iter().map(|&(_, score)| score).collect(),
        }
    }
}
