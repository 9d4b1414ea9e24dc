//! Conversation memory - entry types, store trait, implementations
//!
//! Memory is an append-only log of conversation entries keyed by thread.
//! Entries are immutable after commit and may only be bulk-deleted by
//! thread. The store also powers follow-up detection: the orchestrator
//! reads a thread's recent entries before classifying each query.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteMemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::classify::{QueryKind, ShortcutTarget};

/// How a query was executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RouteDecision {
    /// Four-specialist fan-out plus a moderator pass.
    FullPipeline,
    /// Single-analyzer follow-up path.
    Shortcut(ShortcutTarget),
}

impl RouteDecision {
    pub fn is_shortcut(&self) -> bool {
        matches!(self, RouteDecision::Shortcut(_))
    }
}

impl std::fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteDecision::FullPipeline => write!(f, "full_pipeline"),
            RouteDecision::Shortcut(target) => write!(f, "shortcut:{target}"),
        }
    }
}

impl FromStr for RouteDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "full_pipeline" {
            return Ok(RouteDecision::FullPipeline);
        }
        match s.strip_prefix("shortcut:") {
            Some(target) => target.parse().map(RouteDecision::Shortcut),
            None => Err(format!("unknown route decision: {s}")),
        }
    }
}

impl From<RouteDecision> for String {
    fn from(value: RouteDecision) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for RouteDecision {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One completed query, as seen by clients and the event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub entry_id: String,
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_query: String,
    pub query_kind: QueryKind,
    pub is_followup: bool,
    pub processing_time_ms: u64,
    /// role -> analysis text; absent roles were not invoked
    #[serde(default)]
    pub specialist_outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderator_output: Option<String>,
    pub final_answer: String,
    pub route_decision: RouteDecision,
    /// Set by the store when the answer repeats a recent one in this thread.
    #[serde(default)]
    pub duplicate: bool,
}

/// Storage shape: the structured attributes ride in a JSON context bag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub thread_id: String,
    pub entry_id: String,
    pub user_query: String,
    pub response: String,
    pub context: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    /// Convert to the storage shape. Lossless together with
    /// [`ConversationEntry::from_memory_entry`].
    pub fn to_memory_entry(&self) -> MemoryEntry {
        MemoryEntry {
            thread_id: self.thread_id.clone(),
            entry_id: self.entry_id.clone(),
            user_query: self.user_query.clone(),
            response: self.final_answer.clone(),
            context: json!({
                "query_kind": self.query_kind,
                "is_followup": self.is_followup,
                "processing_time_ms": self.processing_time_ms,
                "route_decision": self.route_decision.to_string(),
                "specialist_outputs": self.specialist_outputs,
                "moderator_output": self.moderator_output,
                "duplicate": self.duplicate,
            }),
            timestamp: self.timestamp,
        }
    }

    pub fn from_memory_entry(entry: MemoryEntry) -> Result<Self> {
        let ctx = &entry.context;
        let query_kind: QueryKind = serde_json::from_value(
            ctx.get("query_kind").cloned().unwrap_or(json!("general")),
        )?;
        let route_decision: RouteDecision = ctx
            .get("route_decision")
            .and_then(|v| v.as_str())
            .unwrap_or("full_pipeline")
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let specialist_outputs: BTreeMap<String, String> = ctx
            .get("specialist_outputs")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let moderator_output = ctx
            .get("moderator_output")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Self {
            entry_id: entry.entry_id,
            thread_id: entry.thread_id,
            timestamp: entry.timestamp,
            user_query: entry.user_query,
            query_kind,
            is_followup: ctx.get("is_followup").and_then(|v| v.as_bool()).unwrap_or(false),
            processing_time_ms: ctx
                .get("processing_time_ms")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            specialist_outputs,
            moderator_output,
            final_answer: entry.response,
            route_decision,
            duplicate: ctx.get("duplicate").and_then(|v| v.as_bool()).unwrap_or(false),
        })
    }
}

/// Aggregate store counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_entries: u64,
    pub thread_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Persistence seam for conversation memory.
///
/// Implementations must be interchangeable: the engine is written against
/// this trait only. Readers always receive owned copies; returned entries
/// are never mutated in place.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Durably persist one entry. Idempotent on `entry_id`: appending an
    /// id that already exists returns the stored entry unchanged. Applies
    /// the duplicate-window tag before writing.
    async fn append(&self, entry: ConversationEntry) -> Result<ConversationEntry>;

    /// Most-recent-first entries of a thread, up to `limit`.
    async fn list(&self, thread_id: &str, limit: usize) -> Result<Vec<ConversationEntry>>;

    /// Case-insensitive substring match over `user_query` and
    /// `final_answer`. Most recent first; ties broken by `entry_id`.
    async fn search(&self, thread_id: &str, text: &str, limit: usize)
        -> Result<Vec<ConversationEntry>>;

    /// Delete every entry of a thread, returning how many were removed.
    async fn delete_thread(&self, thread_id: &str) -> Result<u64>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Fingerprint of a response for duplicate detection: lowercase, collapse
/// whitespace runs, hash. Exact normalized equality only; fuzzier checks
/// belong to clients.
pub fn response_fingerprint(text: &str) -> String {
    let normalized = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let digest = Sha256::digest(normalized.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Millisecond-precision UTC timestamp codec used by the sqlite store.
pub(crate) fn timestamp_to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::SpecialistRole;

    fn sample_entry() -> ConversationEntry {
        let mut outputs = BTreeMap::new();
        outputs.insert("revenue".to_string(), "charge money".to_string());
        ConversationEntry {
            entry_id: "e-1".into(),
            thread_id: "t-1".into(),
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap(),
            user_query: "pricing?".into(),
            query_kind: QueryKind::Revenue,
            is_followup: true,
            processing_time_ms: 42,
            specialist_outputs: outputs,
            moderator_output: None,
            final_answer: "charge money".into(),
            route_decision: RouteDecision::Shortcut(ShortcutTarget::Role(SpecialistRole::Revenue)),
            duplicate: false,
        }
    }

    #[test]
    fn test_route_decision_round_trip() {
        for s in [
            "full_pipeline",
            "shortcut:revenue",
            "shortcut:ux_ui",
            "shortcut:moderator",
        ] {
            let decision: RouteDecision = s.parse().unwrap();
            assert_eq!(decision.to_string(), s);
        }
        assert!("shortcut:".parse::<RouteDecision>().is_err());
        assert!("pipeline".parse::<RouteDecision>().is_err());
    }

    #[test]
    fn test_route_decision_serde_as_string() {
        let json = serde_json::to_string(&RouteDecision::Shortcut(ShortcutTarget::Moderator)).unwrap();
        assert_eq!(json, "\"shortcut:moderator\"");
        let parsed: RouteDecision = serde_json::from_str("\"full_pipeline\"").unwrap();
        assert_eq!(parsed, RouteDecision::FullPipeline);
    }

    #[test]
    fn test_memory_entry_round_trip() {
        let entry = sample_entry();
        let stored = entry.to_memory_entry();
        assert_eq!(stored.response, entry.final_answer);
        let restored = ConversationEntry::from_memory_entry(stored).unwrap();
        assert_eq!(restored, entry);
    }

    #[test]
    fn test_fingerprint_normalizes_case_and_whitespace() {
        let a = response_fingerprint("Charge   Money\nup front");
        let b = response_fingerprint("charge money up front");
        assert_eq!(a, b);
        let c = response_fingerprint("charge money upfront");
        assert_ne!(a, c);
    }

    #[test]
    fn test_timestamp_codec_round_trip() {
        let ts = Utc.timestamp_millis_opt(1_700_000_123_456).single().unwrap();
        assert_eq!(timestamp_from_millis(timestamp_to_millis(ts)), ts);
    }
}
