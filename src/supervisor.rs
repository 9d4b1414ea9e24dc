//! Supervisor - classifier verdict to execution plan
//!
//! Stateless: reads the classification, never memory. Shortcut verdicts map
//! to a single-analyzer plan; everything else fans out to the full panel
//! with a moderator pass.

use crate::classify::{Classification, ShortcutTarget, SpecialistRole};

/// What the orchestrator will execute for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// One analyzer invocation, then finalize. No moderator pass.
    Shortcut { target: ShortcutTarget },
    /// All specialists concurrently, barrier, moderator, finalize.
    FullPipeline { specialists: Vec<SpecialistRole> },
}

impl ExecutionPlan {
    /// Wire names of the specialists this plan runs, for the plan event.
    pub fn specialist_names(&self) -> Vec<String> {
        match self {
            ExecutionPlan::Shortcut { target } => vec![target.as_str().to_string()],
            ExecutionPlan::FullPipeline { specialists } => {
                specialists.iter().map(|r| r.as_str().to_string()).collect()
            }
        }
    }

    pub fn is_moderated(&self) -> bool {
        matches!(self, ExecutionPlan::FullPipeline { .. })
    }
}

/// Translate a classification into a plan.
pub fn plan(classification: &Classification) -> ExecutionPlan {
    match classification.shortcut_target {
        Some(target) => ExecutionPlan::Shortcut { target },
        None => ExecutionPlan::FullPipeline {
            specialists: SpecialistRole::ALL.to_vec(),
        },
    }
}
