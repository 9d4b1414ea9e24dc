//! Prism - multi-perspective requirement refinement engine
//!
//! Takes an ambiguous product-requirement query and refines it through a
//! panel of role-bound analyzers (domain, UX/UI, technical, revenue) plus a
//! moderator pass, streaming incremental events to the caller and committing
//! each completed query to thread-scoped conversation memory. Follow-up
//! queries with a clear routing signal skip the panel and go straight to the
//! most relevant analyzer.

pub mod analyzer;
pub mod api;
pub mod classify;
pub mod config;
pub mod error;
pub mod finalizer;
pub mod memory;
pub mod orchestrator;
pub mod prompts;
pub mod supervisor;
pub mod testing;

pub use analyzer::{Analyzer, AnalyzerRequest, AnalyzerResponse, HttpAnalyzer};
pub use classify::{classify, Classification, FocusHint, QueryKind, ShortcutTarget, SpecialistRole};
pub use config::Config;
pub use error::RefineError;
pub use memory::{ConversationEntry, InMemoryStore, MemoryStore, RouteDecision, SqliteMemoryStore, StoreStats};
pub use orchestrator::{EngineSettings, Orchestrator, RefineEvent, RefineRequest};
