// tests/orchestrator_flow_test.rs
// End-to-end engine flows against the mock analyzer and in-memory store.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use prism::classify::QueryKind;
use prism::memory::{ConversationEntry, InMemoryStore, MemoryStore, StoreStats};
use prism::orchestrator::{EngineSettings, Orchestrator, RefineEvent, RefineRequest};
use prism::testing::MockAnalyzer;

fn fast_settings() -> EngineSettings {
    EngineSettings {
        history_context_limit: 10,
        analyzer_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        retry_max_attempts: 3,
        retry_base_delay: Duration::from_millis(2),
    }
}

fn panel_mock() -> MockAnalyzer {
    MockAnalyzer::new()
        .with_reply("domain", "domain view")
        .with_reply("ux_ui", "ux view")
        .with_reply("technical", "tech view")
        .with_reply("revenue", "revenue view")
        .with_reply("moderator", "All lenses agree.\n\nFinal Answer: build it lean.")
}

fn engine(mock: Arc<MockAnalyzer>, store: Arc<InMemoryStore>) -> Orchestrator {
    Orchestrator::new(mock, store, fast_settings())
}

async fn collect(orchestrator: &Orchestrator, request: RefineRequest) -> Vec<RefineEvent> {
    let mut stream = orchestrator.run(request, CancellationToken::new());
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

fn query(text: &str, thread_id: Option<&str>) -> RefineRequest {
    RefineRequest {
        query: text.to_string(),
        thread_id: thread_id.map(String::from),
        focus_hint: None,
    }
}

fn completed_entry(events: &[RefineEvent]) -> ConversationEntry {
    match events.last() {
        Some(RefineEvent::Complete { entry }) => entry.clone(),
        other => panic!("expected terminal complete event, got {other:?}"),
    }
}

#[tokio::test]
async fn full_pipeline_emits_events_in_order() {
    let mock = Arc::new(panel_mock());
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = engine(mock.clone(), store.clone());

    let events = collect(&orchestrator, query("Build a food delivery app", None)).await;
    assert_eq!(events.len(), 14);

    match &events[0] {
        RefineEvent::Classification {
            query_kind,
            is_followup,
            shortcut_target,
        } => {
            assert_eq!(*query_kind, QueryKind::General);
            assert!(!is_followup);
            assert!(shortcut_target.is_none());
        }
        other => panic!("expected classification first, got {other:?}"),
    }

    match &events[1] {
        RefineEvent::SupervisorPlan {
            specialists,
            moderated,
        } => {
            assert_eq!(specialists.len(), 4);
            assert!(moderated);
        }
        other => panic!("expected supervisor_plan, got {other:?}"),
    }

    let starts: BTreeSet<String> = events[2..6]
        .iter()
        .map(|e| match e {
            RefineEvent::SpecialistStart { role } => role.clone(),
            other => panic!("expected specialist_start, got {other:?}"),
        })
        .collect();
    let results: BTreeSet<String> = events[6..10]
        .iter()
        .map(|e| match e {
            RefineEvent::SpecialistResult { role, .. } => role.clone(),
            other => panic!("expected specialist_result, got {other:?}"),
        })
        .collect();
    let all_roles: BTreeSet<String> = ["domain", "ux_ui", "technical", "revenue"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(starts, all_roles);
    assert_eq!(results, all_roles);

    assert!(matches!(events[10], RefineEvent::ModeratorStart));
    match &events[11] {
        RefineEvent::ModeratorResult { text } => assert!(text.contains("Final Answer:")),
        other => panic!("expected moderator_result, got {other:?}"),
    }
    match &events[12] {
        RefineEvent::FinalAnswer { text } => assert_eq!(text, "build it lean."),
        other => panic!("expected final_answer, got {other:?}"),
    }

    let entry = completed_entry(&events);
    assert!(!entry.thread_id.is_empty());
    assert_eq!(entry.specialist_outputs.len(), 4);
    assert!(entry.moderator_output.is_some());
    assert_eq!(entry.route_decision.to_string(), "full_pipeline");
    assert_eq!(entry.final_answer, "build it lean.");

    // Each specialist invoked once, moderator exactly once.
    for role in ["domain", "ux_ui", "technical", "revenue"] {
        assert_eq!(mock.call_count(role), 1);
    }
    assert_eq!(mock.call_count("moderator"), 1);

    let listed = store.list(&entry.thread_id, 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].entry_id, entry.entry_id);
}

#[tokio::test]
async fn followup_with_keyword_shortcuts_to_revenue() {
    let mock = Arc::new(panel_mock());
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = engine(mock.clone(), store.clone());

    let first = collect(&orchestrator, query("Build a food delivery app", None)).await;
    let thread_id = completed_entry(&first).thread_id;

    let events = collect(
        &orchestrator,
        query("What pricing strategy should I use?", Some(&thread_id)),
    )
    .await;
    assert_eq!(events.len(), 5);

    match &events[0] {
        RefineEvent::Classification {
            query_kind,
            is_followup,
            shortcut_target,
        } => {
            assert_eq!(*query_kind, QueryKind::Revenue);
            assert!(is_followup);
            assert_eq!(shortcut_target.as_deref(), Some("revenue"));
        }
        other => panic!("expected classification, got {other:?}"),
    }
    assert!(matches!(
        &events[1],
        RefineEvent::SpecialistStart { role } if role == "revenue"
    ));
    assert!(matches!(
        &events[2],
        RefineEvent::SpecialistResult { role, .. } if role == "revenue"
    ));
    assert!(matches!(&events[3], RefineEvent::FinalAnswer { .. }));

    let entry = completed_entry(&events);
    assert_eq!(entry.route_decision.to_string(), "shortcut:revenue");
    assert_eq!(
        entry.specialist_outputs.keys().collect::<Vec<_>>(),
        vec!["revenue"]
    );
    assert!(entry.moderator_output.is_none());
    assert_eq!(entry.final_answer, "revenue view");
    assert!(entry.is_followup);

    // Only the revenue analyzer ran for the follow-up.
    assert_eq!(mock.call_count("revenue"), 2); // pipeline + shortcut
    assert_eq!(mock.call_count("moderator"), 1); // pipeline only

    let listed = store.list(&thread_id, 10).await.unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn followup_without_signal_aggregates_prior_state() {
    let mock = Arc::new(panel_mock());
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = engine(mock.clone(), store.clone());

    let first = collect(&orchestrator, query("Build a food delivery app", None)).await;
    let thread_id = completed_entry(&first).thread_id;

    let events = collect(
        &orchestrator,
        query("What do you think overall?", Some(&thread_id)),
    )
    .await;
    let entry = completed_entry(&events);
    assert_eq!(entry.route_decision.to_string(), "shortcut:moderator");
    assert_eq!(
        entry.specialist_outputs.keys().collect::<Vec<_>>(),
        vec!["moderator"]
    );
    assert!(entry.moderator_output.is_none());
}

#[tokio::test]
async fn empty_query_is_rejected_without_persistence() {
    let mock = Arc::new(panel_mock());
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = engine(mock.clone(), store.clone());

    let events = collect(&orchestrator, query("   ", None)).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        RefineEvent::Error { kind, .. } => assert_eq!(kind, "invalid_input"),
        other => panic!("expected error event, got {other:?}"),
    }

    let StoreStats { total_entries, .. } = store.stats().await.unwrap();
    assert_eq!(total_entries, 0);
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test]
async fn all_specialists_failing_surfaces_upstream_unavailable() {
    let mock = Arc::new(
        MockAnalyzer::new()
            .failing("domain")
            .failing("ux_ui")
            .failing("technical")
            .failing("revenue"),
    );
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = engine(mock.clone(), store.clone());

    let events = collect(&orchestrator, query("Build a food delivery app", None)).await;
    match events.last() {
        Some(RefineEvent::Error { kind, .. }) => assert_eq!(kind, "upstream_unavailable"),
        other => panic!("expected upstream_unavailable, got {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, RefineEvent::Complete { .. })));

    // Each role retried to exhaustion.
    for role in ["domain", "ux_ui", "technical", "revenue"] {
        assert_eq!(mock.call_count(role), 3);
    }
    assert_eq!(mock.call_count("moderator"), 0);
    assert_eq!(store.stats().await.unwrap().total_entries, 0);
}

#[tokio::test]
async fn transient_failure_is_retried_to_success() {
    let mock = Arc::new(panel_mock().failing_times("revenue", 2));
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = engine(mock.clone(), store.clone());

    let events = collect(&orchestrator, query("Build a food delivery app", None)).await;
    let entry = completed_entry(&events);
    assert_eq!(entry.specialist_outputs.len(), 4);
    assert_eq!(mock.call_count("revenue"), 3);
}

#[tokio::test]
async fn single_specialist_failure_is_recovered() {
    let mock = Arc::new(panel_mock().failing("technical"));
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = engine(mock.clone(), store.clone());

    let events = collect(&orchestrator, query("Build a food delivery app", None)).await;
    let results: Vec<&RefineEvent> = events
        .iter()
        .filter(|e| matches!(e, RefineEvent::SpecialistResult { .. }))
        .collect();
    assert_eq!(results.len(), 3);

    let entry = completed_entry(&events);
    assert_eq!(entry.specialist_outputs.len(), 3);
    assert!(!entry.specialist_outputs.contains_key("technical"));
    assert!(entry.moderator_output.is_some());
}

#[tokio::test]
async fn moderator_failure_falls_back_to_first_specialist() {
    let mock = Arc::new(
        MockAnalyzer::new()
            .with_reply("domain", "domain view")
            .with_reply("ux_ui", "ux view")
            .with_reply("technical", "tech view")
            .with_reply("revenue", "revenue view")
            .failing("moderator"),
    );
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = engine(mock.clone(), store.clone());

    let events = collect(&orchestrator, query("Build a food delivery app", None)).await;
    let entry = completed_entry(&events);
    // Fixed fallback order: domain first.
    assert_eq!(entry.final_answer, "domain view");
    assert_eq!(entry.moderator_output.as_deref(), Some("domain view"));
    assert_eq!(entry.route_decision.to_string(), "full_pipeline");
}

#[tokio::test]
async fn whole_request_deadline_surfaces_timeout() {
    let mock = Arc::new(panel_mock().with_delay(Duration::from_millis(200)));
    let store = Arc::new(InMemoryStore::new());
    let settings = EngineSettings {
        request_timeout: Duration::from_millis(1),
        ..fast_settings()
    };
    let orchestrator = Orchestrator::new(mock.clone(), store.clone(), settings);

    let events = collect(&orchestrator, query("Build a food delivery app", None)).await;
    match events.last() {
        Some(RefineEvent::Error { kind, .. }) => assert_eq!(kind, "timeout"),
        other => panic!("expected timeout error, got {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, RefineEvent::Complete { .. })));
    assert_eq!(store.stats().await.unwrap().total_entries, 0);
}

#[tokio::test]
async fn cancel_after_fanout_persists_nothing() {
    let mock = Arc::new(panel_mock().with_delay(Duration::from_millis(50)));
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = engine(mock.clone(), store.clone());

    let cancel = CancellationToken::new();
    let mut stream = orchestrator.run(query("Build a food delivery app", None), cancel.clone());

    let mut result_count = 0;
    let mut saw_complete = false;
    let mut saw_cancelled = false;
    while let Some(event) = stream.next().await {
        match event {
            RefineEvent::SpecialistResult { .. } => {
                result_count += 1;
                if result_count == 4 {
                    // All specialists done, moderator not yet finished.
                    cancel.cancel();
                }
            }
            RefineEvent::Complete { .. } => saw_complete = true,
            RefineEvent::Cancelled => saw_cancelled = true,
            _ => {}
        }
    }

    assert!(saw_cancelled);
    assert!(!saw_complete);
    assert_eq!(store.stats().await.unwrap().total_entries, 0);
}

#[tokio::test]
async fn concurrent_identical_queries_tag_one_duplicate() {
    // The moderator reply carries no label, so full-pipeline extraction and
    // the moderator-shortcut path produce the same final answer.
    let mock = Arc::new(
        MockAnalyzer::new()
            .with_reply("domain", "domain view")
            .with_reply("ux_ui", "ux view")
            .with_reply("technical", "tech view")
            .with_reply("revenue", "revenue view")
            .with_reply("moderator", "build it lean."),
    );
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = engine(mock.clone(), store.clone());

    let (first, second) = tokio::join!(
        collect(&orchestrator, query("Build a food delivery app", Some("t-dup"))),
        collect(&orchestrator, query("Build a food delivery app", Some("t-dup"))),
    );
    let first_entry = completed_entry(&first);
    let second_entry = completed_entry(&second);
    assert_eq!(first_entry.final_answer, second_entry.final_answer);

    let listed = store.list("t-dup", 10).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed.iter().filter(|e| e.duplicate).count(), 1);
}

#[tokio::test]
async fn storage_failure_still_emits_final_answer() {
    struct FailingStore(InMemoryStore);

    #[async_trait]
    impl MemoryStore for FailingStore {
        async fn append(&self, _entry: ConversationEntry) -> Result<ConversationEntry> {
            anyhow::bail!("disk full")
        }
        async fn list(&self, thread_id: &str, limit: usize) -> Result<Vec<ConversationEntry>> {
            self.0.list(thread_id, limit).await
        }
        async fn search(
            &self,
            thread_id: &str,
            text: &str,
            limit: usize,
        ) -> Result<Vec<ConversationEntry>> {
            self.0.search(thread_id, text, limit).await
        }
        async fn delete_thread(&self, thread_id: &str) -> Result<u64> {
            self.0.delete_thread(thread_id).await
        }
        async fn stats(&self) -> Result<StoreStats> {
            self.0.stats().await
        }
    }

    let mock = Arc::new(panel_mock());
    let store = Arc::new(FailingStore(InMemoryStore::new()));
    let orchestrator = Orchestrator::new(mock, store, fast_settings());

    let events = collect(&orchestrator, query("Build a food delivery app", None)).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, RefineEvent::FinalAnswer { .. })));
    match events.last() {
        Some(RefineEvent::Error { kind, .. }) => assert_eq!(kind, "storage"),
        other => panic!("expected storage error, got {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, RefineEvent::Complete { .. })));
}

#[tokio::test]
async fn focus_hint_forces_role_on_followup() {
    let mock = Arc::new(panel_mock());
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = engine(mock.clone(), store.clone());

    let first = collect(&orchestrator, query("Build a food delivery app", None)).await;
    let thread_id = completed_entry(&first).thread_id;

    let events = collect(
        &orchestrator,
        RefineRequest {
            query: "What pricing strategy should I use?".into(),
            thread_id: Some(thread_id),
            focus_hint: Some(prism::classify::FocusHint::Technical),
        },
    )
    .await;
    let entry = completed_entry(&events);
    assert_eq!(entry.query_kind, QueryKind::Technical);
    assert_eq!(entry.route_decision.to_string(), "shortcut:technical");
}
