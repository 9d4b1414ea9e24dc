//! SQLite-backed memory store
//!
//! One table, runtime-bound queries. The structured attributes of an entry
//! (route decision, role outputs, processing time) ride in a JSON context
//! column; the columns that queries filter or sort on are first-class.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{
    response_fingerprint, timestamp_from_millis, timestamp_to_millis, ConversationEntry,
    MemoryEntry, MemoryStore, StoreStats,
};

/// Entries checked against a new fingerprint, per thread.
pub const DEFAULT_DUPLICATE_WINDOW: usize = 5;

pub struct SqliteMemoryStore {
    pool: SqlitePool,
    duplicate_window: usize,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }

    pub fn with_duplicate_window(mut self, window: usize) -> Self {
        self.duplicate_window = window;
        self
    }

    /// Get access to the underlying pool for direct queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_entries (
                entry_id    TEXT PRIMARY KEY,
                thread_id   TEXT NOT NULL,
                user_query  TEXT NOT NULL,
                response    TEXT NOT NULL,
                context     TEXT NOT NULL,
                timestamp   INTEGER NOT NULL,
                fingerprint TEXT NOT NULL,
                duplicate   INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_thread
             ON conversation_entries (thread_id, timestamp DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_by_id(&self, entry_id: &str) -> Result<Option<ConversationEntry>> {
        let row = sqlx::query(
            "SELECT entry_id, thread_id, user_query, response, context, timestamp
             FROM conversation_entries WHERE entry_id = ?",
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_entry).transpose()
    }

    async fn is_recent_duplicate(&self, thread_id: &str, fingerprint: &str) -> Result<bool> {
        let recent: Vec<String> = sqlx::query_scalar(
            "SELECT fingerprint FROM conversation_entries
             WHERE thread_id = ?
             ORDER BY timestamp DESC, entry_id ASC
             LIMIT ?",
        )
        .bind(thread_id)
        .bind(self.duplicate_window as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(recent.iter().any(|fp| fp == fingerprint))
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn append(&self, mut entry: ConversationEntry) -> Result<ConversationEntry> {
        // Idempotent on entry_id: a duplicate append is silently ignored.
        if let Some(existing) = self.fetch_by_id(&entry.entry_id).await? {
            return Ok(existing);
        }

        let fingerprint = response_fingerprint(&entry.final_answer);
        entry.duplicate = self
            .is_recent_duplicate(&entry.thread_id, &fingerprint)
            .await?;

        let stored = entry.to_memory_entry();
        sqlx::query(
            "INSERT OR IGNORE INTO conversation_entries
             (entry_id, thread_id, user_query, response, context, timestamp, fingerprint, duplicate)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&stored.entry_id)
        .bind(&stored.thread_id)
        .bind(&stored.user_query)
        .bind(&stored.response)
        .bind(stored.context.to_string())
        .bind(timestamp_to_millis(stored.timestamp))
        .bind(&fingerprint)
        .bind(entry.duplicate as i64)
        .execute(&self.pool)
        .await?;

        debug!(entry_id = %entry.entry_id, thread_id = %entry.thread_id,
               duplicate = entry.duplicate, "Persisted conversation entry");
        Ok(entry)
    }

    async fn list(&self, thread_id: &str, limit: usize) -> Result<Vec<ConversationEntry>> {
        let rows = sqlx::query(
            "SELECT entry_id, thread_id, user_query, response, context, timestamp
             FROM conversation_entries
             WHERE thread_id = ?
             ORDER BY timestamp DESC, entry_id ASC
             LIMIT ?",
        )
        .bind(thread_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    async fn search(
        &self,
        thread_id: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>> {
        let needle = format!("%{}%", escape_like(&text.to_lowercase()));
        let rows = sqlx::query(
            r#"
            SELECT entry_id, thread_id, user_query, response, context, timestamp
            FROM conversation_entries
            WHERE thread_id = ?
              AND (LOWER(user_query) LIKE ? ESCAPE '\'
                   OR LOWER(response) LIKE ? ESCAPE '\')
            ORDER BY timestamp DESC, entry_id ASC
            LIMIT ?
            "#,
        )
        .bind(thread_id)
        .bind(&needle)
        .bind(&needle)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM conversation_entries WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            "SELECT COUNT(*), COUNT(DISTINCT thread_id), MAX(timestamp)
             FROM conversation_entries",
        )
        .fetch_one(&self.pool)
        .await?;

        let total_entries: i64 = row.get(0);
        let thread_count: i64 = row.get(1);
        let last_updated: Option<i64> = row.get(2);

        Ok(StoreStats {
            total_entries: total_entries as u64,
            thread_count: thread_count as u64,
            last_updated: last_updated.map(timestamp_from_millis),
        })
    }
}

fn row_to_entry(row: sqlx::sqlite::SqliteRow) -> Result<ConversationEntry> {
    let context: String = row.get("context");
    let entry = MemoryEntry {
        entry_id: row.get("entry_id"),
        thread_id: row.get("thread_id"),
        user_query: row.get("user_query"),
        response: row.get("response"),
        context: serde_json::from_str(&context)?,
        timestamp: timestamp_from_millis(row.get("timestamp")),
    };
    ConversationEntry::from_memory_entry(entry)
}

fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
