use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use inkflow_core::error::Result;
use inkflow_core::traits::{CardLookup, ProjectStore};
use inkflow_core::types::VersionSnapshot;

/// Card lookup over a fixed set of cards.
#[derive(Default)]
pub struct InMemoryCards {
    cards: HashMap<String, String>,
}

impl InMemoryCards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_card(mut self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.cards.insert(id.into(), text.into());
        self
    }
}

impl CardLookup for InMemoryCards {
    fn resolve(&self, card_id: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let text = self.cards.get(card_id).cloned();
        Box::pin(async move { Ok(text) })
    }
}

/// Project store kept in memory.
#[derive(Default)]
pub struct MemoryProjectStore {
    versions: Mutex<HashMap<String, Vec<VersionSnapshot>>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history_len(&self, project_id: &str) -> usize {
        self.versions
            .lock()
            .unwrap()
            .get(project_id)
            .map_or(0, Vec::len)
    }
}

impl ProjectStore for MemoryProjectStore {
    fn append_version(
        &self,
        project_id: &str,
        snapshot: &VersionSnapshot,
    ) -> BoxFuture<'_, Result<()>> {
        self.versions
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_default()
            .push(snapshot.clone());
        Box::pin(async { Ok(()) })
    }

    fn history(&self, project_id: &str) -> BoxFuture<'_, Result<Vec<VersionSnapshot>>> {
        let history = self
            .versions
            .lock()
            .unwrap()
            .get(project_id)
            .cloned()
            .unwrap_or_default();
        Box::pin(async move { Ok(history) })
    }

    fn current_content(&self, project_id: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let content = self
            .versions
            .lock()
            .unwrap()
            .get(project_id)
            .and_then(|v| v.last())
            .map(|s| s.content.clone());
        Box::pin(async move { Ok(content) })
    }
}
