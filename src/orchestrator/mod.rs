//! Orchestration engine
//!
//! Drives one refinement request through the state machine:
//! classify → plan → (single-analyzer shortcut | concurrent fan-out →
//! moderator barrier) → finalize → commit. Events are narrated over a
//! bounded channel; a slow consumer backpressures the engine. Cancellation
//! and the whole-request deadline suppress the commit entirely.

pub mod events;

pub use events::RefineEvent;

use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analyzer::{Analyzer, AnalyzerRequest};
use crate::classify::{classify, FocusHint, ShortcutTarget, SpecialistRole};
use crate::error::RefineError;
use crate::finalizer::{full_pipeline_entry, shortcut_entry, EntryDraft};
use crate::memory::{ConversationEntry, MemoryStore, StoreStats};
use crate::prompts::{
    build_memory_review_prompt, build_moderator_prompt, build_specialist_prompt, render_history,
    specialist_system_prompt, MODERATOR_SYSTEM_PROMPT,
};
use crate::supervisor::{self, ExecutionPlan};

/// Depth of the event queue between engine and transport. A full queue
/// blocks emission, which paces the engine when the client reads slowly.
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Depth of the fan-out completion channel: one slot per specialist.
const SPECIALIST_SIGNAL_DEPTH: usize = 4;

/// Engine knobs
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Entries of thread history rendered into prompts (K).
    pub history_context_limit: usize,
    /// Per-analyzer-call deadline.
    pub analyzer_timeout: Duration,
    /// Whole-request deadline.
    pub request_timeout: Duration,
    /// Attempts per analyzer call, including the first.
    pub retry_max_attempts: u32,
    /// Base backoff delay; doubles per attempt with ±20% jitter.
    pub retry_base_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            history_context_limit: 10,
            analyzer_timeout: Duration::from_millis(45_000),
            request_timeout: Duration::from_millis(180_000),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(250),
        }
    }
}

/// One refinement request
#[derive(Debug, Clone, Default)]
pub struct RefineRequest {
    pub query: String,
    pub thread_id: Option<String>,
    pub focus_hint: Option<FocusHint>,
}

/// Request lifecycle states. Transitions are one-way; terminal states are
/// `Done`, `Cancelled` (implicit: the stream ends with the matching event)
/// and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Init,
    Classified,
    ShortcutRunning,
    FanoutRunning,
    FanoutComplete,
    Moderating,
    Finalizing,
    Done,
}

fn advance(state: &mut RunState, next: RunState) {
    debug!(from = ?state, to = ?next, "State transition");
    *state = next;
}

/// Cheap to clone: the analyzer and store are shared behind `Arc`.
#[derive(Clone)]
pub struct Orchestrator {
    analyzer: Arc<dyn Analyzer>,
    store: Arc<dyn MemoryStore>,
    settings: EngineSettings,
}

impl Orchestrator {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        store: Arc<dyn MemoryStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            analyzer,
            store,
            settings,
        }
    }

    /// Run one request. Returns a stream that terminates with `complete`,
    /// `error` or `cancelled`; nothing is persisted on the latter two.
    pub fn run(&self, request: RefineRequest, cancel: CancellationToken) -> ReceiverStream<RefineEvent> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let this = self.clone();
        tokio::spawn(async move {
            this.drive(request, cancel, tx).await;
        });
        ReceiverStream::new(rx)
    }

    /// Most-recent-first history of a thread.
    pub async fn history(
        &self,
        thread_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ConversationEntry>> {
        self.store.list(thread_id, limit).await
    }

    /// Substring search within a thread.
    pub async fn search(
        &self,
        thread_id: &str,
        query_text: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ConversationEntry>> {
        self.store.search(thread_id, query_text, limit).await
    }

    /// Delete a thread's entries, returning the count removed.
    pub async fn clear(&self, thread_id: &str) -> anyhow::Result<u64> {
        self.store.delete_thread(thread_id).await
    }

    pub async fn memory_stats(&self) -> anyhow::Result<StoreStats> {
        self.store.stats().await
    }

    async fn drive(
        self,
        request: RefineRequest,
        cancel: CancellationToken,
        tx: mpsc::Sender<RefineEvent>,
    ) {
        let deadline = self.settings.request_timeout;
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(RefineError::Cancelled),
            outcome = timeout(deadline, self.execute(&request, &cancel, &tx)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        // Expired: behave as cancellation, surface as timeout.
                        cancel.cancel();
                        Err(RefineError::Timeout)
                    }
                }
            }
        };

        match result {
            Ok(()) => {}
            Err(RefineError::Cancelled) => {
                info!("Refinement cancelled");
                let _ = tx.send(RefineEvent::Cancelled).await;
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Refinement failed");
                let message = match &e {
                    // Uncategorized faults stay in the logs.
                    RefineError::Internal(_) => "internal error".to_string(),
                    other => other.to_string(),
                };
                let _ = tx
                    .send(RefineEvent::Error {
                        kind: e.kind().to_string(),
                        message,
                    })
                    .await;
            }
        }
    }

    async fn execute(
        &self,
        request: &RefineRequest,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<RefineEvent>,
    ) -> Result<(), RefineError> {
        let started = Instant::now();
        let mut state = RunState::Init;

        let thread_id = request
            .thread_id
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // The only memory read of the request: recent history feeds both
        // follow-up detection and prompt context.
        let history = self
            .store
            .list(&thread_id, self.settings.history_context_limit)
            .await
            .map_err(|e| RefineError::Storage(e.to_string()))?;

        let classification = classify(&request.query, &history, request.focus_hint)?;
        advance(&mut state, RunState::Classified);

        self.emit(
            tx,
            cancel,
            RefineEvent::Classification {
                query_kind: classification.query_kind,
                is_followup: classification.is_followup,
                shortcut_target: classification
                    .shortcut_target
                    .map(|t| t.as_str().to_string()),
            },
        )
        .await?;

        let plan = supervisor::plan(&classification);
        let rendered_history = render_history(&history, self.settings.history_context_limit);

        let entry = match plan {
            ExecutionPlan::Shortcut { target } => {
                advance(&mut state, RunState::ShortcutRunning);
                self.emit(
                    tx,
                    cancel,
                    RefineEvent::SpecialistStart {
                        role: target.as_str().to_string(),
                    },
                )
                .await?;

                let (system, message) = match target {
                    ShortcutTarget::Role(role) => (
                        specialist_system_prompt(role).to_string(),
                        build_specialist_prompt(&request.query, &rendered_history),
                    ),
                    ShortcutTarget::Moderator => (
                        MODERATOR_SYSTEM_PROMPT.to_string(),
                        build_memory_review_prompt(&request.query, &rendered_history),
                    ),
                };

                let text = self
                    .invoke_with_retry(target.as_str(), system, message, cancel)
                    .await?;

                self.emit(
                    tx,
                    cancel,
                    RefineEvent::SpecialistResult {
                        role: target.as_str().to_string(),
                        text: text.clone(),
                    },
                )
                .await?;

                advance(&mut state, RunState::Finalizing);
                shortcut_entry(
                    EntryDraft {
                        thread_id: &thread_id,
                        user_query: &request.query,
                        classification: &classification,
                        processing_time_ms: started.elapsed().as_millis() as u64,
                    },
                    target,
                    text,
                )
            }
            ExecutionPlan::FullPipeline { specialists } => {
                self.emit(
                    tx,
                    cancel,
                    RefineEvent::SupervisorPlan {
                        specialists: plan_names(&specialists),
                        moderated: true,
                    },
                )
                .await?;

                advance(&mut state, RunState::FanoutRunning);
                let outputs = self
                    .fan_out(&specialists, &request.query, &rendered_history, cancel, tx)
                    .await?;
                advance(&mut state, RunState::FanoutComplete);

                if outputs.is_empty() {
                    return Err(RefineError::UpstreamUnavailable(format!(
                        "all {} specialists failed",
                        specialists.len()
                    )));
                }

                advance(&mut state, RunState::Moderating);
                self.emit(tx, cancel, RefineEvent::ModeratorStart).await?;

                let moderator_text = self.moderate(&request.query, &outputs, cancel).await?;

                self.emit(
                    tx,
                    cancel,
                    RefineEvent::ModeratorResult {
                        text: moderator_text.clone(),
                    },
                )
                .await?;

                advance(&mut state, RunState::Finalizing);
                full_pipeline_entry(
                    EntryDraft {
                        thread_id: &thread_id,
                        user_query: &request.query,
                        classification: &classification,
                        processing_time_ms: started.elapsed().as_millis() as u64,
                    },
                    outputs,
                    moderator_text,
                )
            }
        };

        self.commit(entry, tx, cancel).await?;
        advance(&mut state, RunState::Done);
        Ok(())
    }

    /// Run all specialists concurrently and collect their results.
    ///
    /// Results are reported in completion order. The returned map contains
    /// only successes; failed roles are logged and dropped. The function
    /// only returns once every specialist has reported (the moderator
    /// barrier).
    async fn fan_out(
        &self,
        specialists: &[SpecialistRole],
        query: &str,
        rendered_history: &str,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<RefineEvent>,
    ) -> Result<BTreeMap<String, String>, RefineError> {
        for role in specialists {
            self.emit(
                tx,
                cancel,
                RefineEvent::SpecialistStart {
                    role: role.as_str().to_string(),
                },
            )
            .await?;
        }

        let (sig_tx, mut sig_rx) =
            mpsc::channel::<(SpecialistRole, Result<String, RefineError>)>(SPECIALIST_SIGNAL_DEPTH);

        for role in specialists.iter().copied() {
            let this = self.clone();
            let sig_tx = sig_tx.clone();
            let cancel = cancel.clone();
            let system = specialist_system_prompt(role).to_string();
            let message = build_specialist_prompt(query, rendered_history);
            tokio::spawn(async move {
                let result = this
                    .invoke_with_retry(role.as_str(), system, message, &cancel)
                    .await;
                // Receiver gone means the request was abandoned; the result
                // is discarded either way.
                let _ = sig_tx.send((role, result)).await;
            });
        }
        drop(sig_tx);

        let mut outputs = BTreeMap::new();
        while let Some((role, result)) = sig_rx.recv().await {
            match result {
                Ok(text) => {
                    self.emit(
                        tx,
                        cancel,
                        RefineEvent::SpecialistResult {
                            role: role.as_str().to_string(),
                            text: text.clone(),
                        },
                    )
                    .await?;
                    outputs.insert(role.as_str().to_string(), text);
                }
                Err(RefineError::Cancelled) => return Err(RefineError::Cancelled),
                Err(e) => {
                    warn!(role = %role, error = %e, "Specialist unavailable, continuing without it");
                }
            }
        }

        Ok(outputs)
    }

    /// Moderator pass over the successful specialist outputs. A moderator
    /// failure falls back to the first successful specialist in fixed role
    /// order.
    async fn moderate(
        &self,
        query: &str,
        outputs: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<String, RefineError> {
        let message = build_moderator_prompt(query, outputs);
        match self
            .invoke_with_retry("moderator", MODERATOR_SYSTEM_PROMPT.to_string(), message, cancel)
            .await
        {
            Ok(text) => Ok(text),
            Err(RefineError::Cancelled) => Err(RefineError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Moderator failed, falling back to first specialist output");
                SpecialistRole::ALL
                    .iter()
                    .find_map(|role| outputs.get(role.as_str()).cloned())
                    .ok_or(e)
            }
        }
    }

    /// One analyzer call under the retry policy: exponential backoff with
    /// jitter, per-call deadline, cancellation checked between attempts.
    async fn invoke_with_retry(
        &self,
        role: &str,
        system: String,
        message: String,
        cancel: &CancellationToken,
    ) -> Result<String, RefineError> {
        let attempts = self.settings.retry_max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(RefineError::Cancelled);
            }

            let request = AnalyzerRequest {
                role: role.to_string(),
                system: system.clone(),
                message: message.clone(),
            };

            let call = timeout(self.settings.analyzer_timeout, self.analyzer.analyze(request));
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(RefineError::Cancelled),
                outcome = call => outcome,
            };

            match outcome {
                Ok(Ok(response)) if !response.text.trim().is_empty() => {
                    if let Some(usage) = response.usage {
                        debug!(
                            role,
                            input_tokens = usage.input_tokens,
                            output_tokens = usage.output_tokens,
                            "Analyzer call complete"
                        );
                    }
                    return Ok(response.text);
                }
                Ok(Ok(_)) => {
                    last_error = "analyzer returned an empty response".to_string();
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    last_error = format!(
                        "analyzer call exceeded {} ms",
                        self.settings.analyzer_timeout.as_millis()
                    );
                }
            }

            warn!(role, attempt, error = %last_error, "Analyzer attempt failed");

            if attempt < attempts {
                let delay = backoff_delay(self.settings.retry_base_delay, attempt);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RefineError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(RefineError::UpstreamUnavailable(last_error))
    }

    /// Emit the answer, then commit. A storage failure after a successful
    /// pipeline still leaves the answer on the stream; the terminal event
    /// becomes `error{kind=storage}` instead of `complete`.
    async fn commit(
        &self,
        entry: ConversationEntry,
        tx: &mpsc::Sender<RefineEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), RefineError> {
        self.emit(
            tx,
            cancel,
            RefineEvent::FinalAnswer {
                text: entry.final_answer.clone(),
            },
        )
        .await?;

        if cancel.is_cancelled() {
            return Err(RefineError::Cancelled);
        }

        match self.store.append(entry).await {
            Ok(stored) => {
                info!(
                    entry_id = %stored.entry_id,
                    thread_id = %stored.thread_id,
                    route = %stored.route_decision,
                    elapsed_ms = stored.processing_time_ms,
                    "Refinement complete"
                );
                self.emit(tx, cancel, RefineEvent::Complete { entry: stored })
                    .await
            }
            Err(e) => {
                error!(error = %e, "Failed to persist conversation entry");
                Err(RefineError::Storage(e.to_string()))
            }
        }
    }

    /// Send an event, treating a dropped receiver as cancellation.
    async fn emit(
        &self,
        tx: &mpsc::Sender<RefineEvent>,
        cancel: &CancellationToken,
        event: RefineEvent,
    ) -> Result<(), RefineError> {
        if tx.send(event).await.is_err() {
            cancel.cancel();
            return Err(RefineError::Cancelled);
        }
        Ok(())
    }
}

fn plan_names(specialists: &[SpecialistRole]) -> Vec<String> {
    specialists.iter().map(|r| r.as_str().to_string()).collect()
}

/// Backoff for the given attempt (1-indexed): base * 2^(attempt-1), ±20%.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.as_millis() as f64 * f64::from(2u32.saturating_pow(attempt.saturating_sub(1)));
    let jitter = rand::rng().random_range(0.8..=1.2);
    Duration::from_millis((exp * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_bounds() {
        let base = Duration::from_millis(250);
        for _ in 0..50 {
            let first = backoff_delay(base, 1);
            assert!(first >= Duration::from_millis(200) && first <= Duration::from_millis(300));
            let second = backoff_delay(base, 2);
            assert!(second >= Duration::from_millis(400) && second <= Duration::from_millis(600));
            let third = backoff_delay(base, 3);
            assert!(third >= Duration::from_millis(800) && third <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_default_settings_match_contract() {
        let settings = EngineSettings::default();
        assert_eq!(settings.history_context_limit, 10);
        assert_eq!(settings.analyzer_timeout, Duration::from_millis(45_000));
        assert_eq!(settings.request_timeout, Duration::from_millis(180_000));
        assert_eq!(settings.retry_max_attempts, 3);
        assert_eq!(settings.retry_base_delay, Duration::from_millis(250));
    }
}
