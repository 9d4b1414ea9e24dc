//! Analyzer trait and implementations
//!
//! An analyzer maps a role-bound prompt plus a rendered message to a text
//! analysis. Production uses the HTTP-backed implementation; tests use the
//! scriptable mock in `crate::testing`.

pub mod http;

pub use http::HttpAnalyzer;

use anyhow::Result;
use async_trait::async_trait;

/// Request to an analyzer
#[derive(Debug, Clone)]
pub struct AnalyzerRequest {
    /// Output key this invocation is bound to: a specialist role or
    /// `moderator`. Used for logging and mock routing only.
    pub role: String,
    /// System prompt / instructions
    pub system: String,
    /// The rendered question plus context
    pub message: String,
}

/// Response from an analyzer
#[derive(Debug, Clone)]
pub struct AnalyzerResponse {
    pub text: String,
    pub usage: Option<AnalyzerUsage>,
}

/// Token usage information, when the backend reports it
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzerUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Core analyzer trait
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Implementation name for logging/identification
    fn name(&self) -> &'static str;

    /// Produce an analysis. May fail transiently; the orchestrator owns
    /// retry and deadline policy.
    async fn analyze(&self, request: AnalyzerRequest) -> Result<AnalyzerResponse>;
}
