//! Deterministic query classifier for specialist routing
//!
//! Maps a query plus its thread history to a routing verdict:
//! - which specialist lens the query calls for (keyword scan, no LLM call)
//! - whether the query is a follow-up (the thread already has entries)
//! - whether a follow-up can shortcut to a single specialist
//!
//! A focus hint from the caller overrides the scan. When several keyword
//! sets match, the fixed tie-break order is revenue > ux_ui > technical >
//! domain.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::RefineError;
use crate::memory::ConversationEntry;

/// The four analyzer roles in the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistRole {
    Domain,
    UxUi,
    Technical,
    Revenue,
}

impl SpecialistRole {
    /// All roles in the fixed panel order (also the moderator-fallback order)
    pub const ALL: [SpecialistRole; 4] = [
        SpecialistRole::Domain,
        SpecialistRole::UxUi,
        SpecialistRole::Technical,
        SpecialistRole::Revenue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialistRole::Domain => "domain",
            SpecialistRole::UxUi => "ux_ui",
            SpecialistRole::Technical => "technical",
            SpecialistRole::Revenue => "revenue",
        }
    }
}

impl std::fmt::Display for SpecialistRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SpecialistRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain" => Ok(SpecialistRole::Domain),
            "ux_ui" => Ok(SpecialistRole::UxUi),
            "technical" => Ok(SpecialistRole::Technical),
            "revenue" => Ok(SpecialistRole::Revenue),
            other => Err(format!("unknown specialist role: {other}")),
        }
    }
}

/// Classifier verdict on what kind of question this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    General,
    Domain,
    UxUi,
    Technical,
    Revenue,
    /// Legacy value carried by old entries; the classifier never emits it.
    Debate,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::General => "general",
            QueryKind::Domain => "domain",
            QueryKind::UxUi => "ux_ui",
            QueryKind::Technical => "technical",
            QueryKind::Revenue => "revenue",
            QueryKind::Debate => "debate",
        }
    }
}

impl From<SpecialistRole> for QueryKind {
    fn from(role: SpecialistRole) -> Self {
        match role {
            SpecialistRole::Domain => QueryKind::Domain,
            SpecialistRole::UxUi => QueryKind::UxUi,
            SpecialistRole::Technical => QueryKind::Technical,
            SpecialistRole::Revenue => QueryKind::Revenue,
        }
    }
}

/// Caller-supplied focus hint; overrides the keyword scan when specific
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusHint {
    General,
    Domain,
    UxUi,
    Technical,
    Revenue,
}

impl FocusHint {
    /// The role this hint pins the query to, if any. `general` pins nothing.
    pub fn role(&self) -> Option<SpecialistRole> {
        match self {
            FocusHint::General => None,
            FocusHint::Domain => Some(SpecialistRole::Domain),
            FocusHint::UxUi => Some(SpecialistRole::UxUi),
            FocusHint::Technical => Some(SpecialistRole::Technical),
            FocusHint::Revenue => Some(SpecialistRole::Revenue),
        }
    }
}

impl FromStr for FocusHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(FocusHint::General),
            "domain" => Ok(FocusHint::Domain),
            "ux_ui" => Ok(FocusHint::UxUi),
            "technical" => Ok(FocusHint::Technical),
            "revenue" => Ok(FocusHint::Revenue),
            other => Err(format!("unknown focus hint: {other}")),
        }
    }
}

/// Shortcut destination for follow-up queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortcutTarget {
    /// A single specialist answers directly.
    Role(SpecialistRole),
    /// No routing signal: one aggregation pass over prior thread state.
    Moderator,
}

impl ShortcutTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortcutTarget::Role(role) => role.as_str(),
            ShortcutTarget::Moderator => "moderator",
        }
    }
}

impl std::fmt::Display for ShortcutTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ShortcutTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "moderator" {
            return Ok(ShortcutTarget::Moderator);
        }
        SpecialistRole::from_str(s).map(ShortcutTarget::Role)
    }
}

/// Full classifier output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub query_kind: QueryKind,
    pub is_followup: bool,
    pub shortcut_target: Option<ShortcutTarget>,
}

// Keyword sets, checked in tie-break order. Single words match whole tokens;
// phrases match as substrings.
const REVENUE_KEYWORDS: &[&str] = &[
    "revenue", "money", "income", "pricing", "monetization", "profit", "earnings",
];
const UX_UI_KEYWORDS: &[&str] = &[
    "ui", "ux", "design", "user experience", "interface", "usability", "accessibility",
];
const TECHNICAL_KEYWORDS: &[&str] = &[
    "technical", "architecture", "code", "database", "api", "infrastructure", "scalability",
];
const DOMAIN_KEYWORDS: &[&str] = &[
    "business", "domain", "market", "industry", "compliance", "regulation",
];

/// Classify a query against its thread history and an optional focus hint.
///
/// Deterministic and purely lexical. Empty or whitespace-only queries are
/// rejected as invalid input before any routing happens.
pub fn classify(
    user_query: &str,
    thread_history: &[ConversationEntry],
    focus_hint: Option<FocusHint>,
) -> Result<Classification, RefineError> {
    if user_query.trim().is_empty() {
        return Err(RefineError::InvalidInput("query must not be empty".into()));
    }

    let is_followup = !thread_history.is_empty();
    let lower = user_query.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let mut target = scan_target(&lower, &tokens);

    // A specific hint wins over whatever the scan found.
    if let Some(role) = focus_hint.and_then(|h| h.role()) {
        target = Some(role);
    }

    let query_kind = target.map(QueryKind::from).unwrap_or(QueryKind::General);

    let shortcut_target = if is_followup {
        Some(
            target
                .map(ShortcutTarget::Role)
                .unwrap_or(ShortcutTarget::Moderator),
        )
    } else {
        None
    };

    Ok(Classification {
        query_kind,
        is_followup,
        shortcut_target,
    })
}

fn scan_target(lower: &str, tokens: &[&str]) -> Option<SpecialistRole> {
    // Order matters: this is the tie-break.
    if matches_any(lower, tokens, REVENUE_KEYWORDS) {
        return Some(SpecialistRole::Revenue);
    }
    if matches_any(lower, tokens, UX_UI_KEYWORDS) {
        return Some(SpecialistRole::UxUi);
    }
    if matches_any(lower, tokens, TECHNICAL_KEYWORDS) {
        return Some(SpecialistRole::Technical);
    }
    if matches_any(lower, tokens, DOMAIN_KEYWORDS) {
        return Some(SpecialistRole::Domain);
    }
    None
}

fn matches_any(lower: &str, tokens: &[&str], keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| {
        if kw.contains(' ') {
            lower.contains(kw)
        } else {
            tokens.contains(kw)
        }
    })
}
