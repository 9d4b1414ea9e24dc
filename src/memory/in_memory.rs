//! In-memory store for tests and local development
//!
//! Same contract as the SQLite store, interchangeable by construction.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{response_fingerprint, ConversationEntry, MemoryStore, StoreStats};
use crate::memory::sqlite::DEFAULT_DUPLICATE_WINDOW;

pub struct InMemoryStore {
    threads: RwLock<HashMap<String, Vec<ConversationEntry>>>,
    duplicate_window: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }

    pub fn with_duplicate_window(mut self, window: usize) -> Self {
        self.duplicate_window = window;
        self
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn append(&self, mut entry: ConversationEntry) -> Result<ConversationEntry> {
        let mut threads = self.threads.write().await;
        let entries = threads.entry(entry.thread_id.clone()).or_default();

        if let Some(existing) = entries.iter().find(|e| e.entry_id == entry.entry_id) {
            return Ok(existing.clone());
        }

        let fingerprint = response_fingerprint(&entry.final_answer);
        let mut recent: Vec<&ConversationEntry> = entries.iter().collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.entry_id.cmp(&b.entry_id)));
        entry.duplicate = recent
            .iter()
            .take(self.duplicate_window)
            .any(|e| response_fingerprint(&e.final_answer) == fingerprint);

        entries.push(entry.clone());
        Ok(entry)
    }

    async fn list(&self, thread_id: &str, limit: usize) -> Result<Vec<ConversationEntry>> {
        let threads = self.threads.read().await;
        let mut entries: Vec<ConversationEntry> = threads
            .get(thread_id)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.entry_id.cmp(&b.entry_id)));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn search(
        &self,
        thread_id: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>> {
        let needle = text.to_lowercase();
        let mut matches: Vec<ConversationEntry> = self
            .list(thread_id, usize::MAX)
            .await?
            .into_iter()
            .filter(|e| {
                e.user_query.to_lowercase().contains(&needle)
                    || e.final_answer.to_lowercase().contains(&needle)
            })
            .collect();
        matches.truncate(limit);
        Ok(matches)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<u64> {
        let mut threads = self.threads.write().await;
        Ok(threads
            .remove(thread_id)
            .map(|entries| entries.len() as u64)
            .unwrap_or(0))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let threads = self.threads.read().await;
        let total_entries = threads.values().map(|v| v.len() as u64).sum();
        let last_updated = threads
            .values()
            .flat_map(|v| v.iter().map(|e| e.timestamp))
            .max();
        Ok(StoreStats {
            total_entries,
            thread_count: threads.values().filter(|v| !v.is_empty()).count() as u64,
            last_updated,
        })
    }
}
