//! Event vocabulary for the refinement stream
//!
//! One record per orchestrator step, serialized with a `type` tag. The
//! transport forwards these verbatim; the batch endpoint folds them into a
//! single response.

use serde::Serialize;

use crate::classify::QueryKind;
use crate::memory::ConversationEntry;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefineEvent {
    /// Classifier verdict, always first.
    Classification {
        query_kind: QueryKind,
        is_followup: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        shortcut_target: Option<String>,
    },

    /// Execution plan, full-pipeline mode only.
    SupervisorPlan {
        specialists: Vec<String>,
        moderated: bool,
    },

    /// A specialist invocation was dispatched.
    SpecialistStart { role: String },

    /// A specialist finished. Emitted in completion order, not role order.
    SpecialistResult { role: String, text: String },

    /// All specialists accounted for; moderation begins.
    ModeratorStart,

    /// Consolidated moderator text.
    ModeratorResult { text: String },

    /// The user-visible answer, before persistence.
    FinalAnswer { text: String },

    /// Terminal: the persisted entry.
    Complete { entry: ConversationEntry },

    /// Terminal: fatal failure.
    Error { kind: String, message: String },

    /// Terminal: caller-induced cancellation. Nothing was persisted.
    Cancelled,
}

impl RefineEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RefineEvent::Complete { .. } | RefineEvent::Error { .. } | RefineEvent::Cancelled
        )
    }
}
