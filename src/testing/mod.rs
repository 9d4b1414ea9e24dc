//! Test doubles for the analyzer seam
//!
//! A scriptable analyzer with canned per-role responses, failure injection
//! and call counting. Lives in the library (not behind `cfg(test)`) so the
//! integration suites and downstream consumers can use it.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::analyzer::{Analyzer, AnalyzerRequest, AnalyzerResponse};

#[derive(Default)]
pub struct MockAnalyzer {
    replies: HashMap<String, String>,
    always_fail: Vec<String>,
    fail_budget: Mutex<HashMap<String, u32>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned response for a role. Roles without one get a generated reply.
    pub fn with_reply(mut self, role: &str, text: &str) -> Self {
        self.replies.insert(role.to_string(), text.to_string());
        self
    }

    /// Make every call for this role fail.
    pub fn failing(mut self, role: &str) -> Self {
        self.always_fail.push(role.to_string());
        self
    }

    /// Make the first `n` calls for this role fail, then succeed.
    pub fn failing_times(self, role: &str, n: u32) -> Self {
        self.fail_budget
            .lock()
            .expect("mock lock poisoned")
            .insert(role.to_string(), n);
        self
    }

    /// Sleep this long before every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many calls this role has received.
    pub fn call_count(&self, role: &str) -> usize {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .iter()
            .filter(|r| r.as_str() == role)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("mock lock poisoned").len()
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn analyze(&self, request: AnalyzerRequest) -> Result<AnalyzerResponse> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push(request.role.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.always_fail.contains(&request.role) {
            anyhow::bail!("scripted failure for role {}", request.role);
        }

        {
            let mut budget = self.fail_budget.lock().expect("mock lock poisoned");
            if let Some(remaining) = budget.get_mut(&request.role) {
                if *remaining > 0 {
                    *remaining -= 1;
                    anyhow::bail!("scripted transient failure for role {}", request.role);
                }
            }
        }

        let text = self
            .replies
            .get(&request.role)
            .cloned()
            .unwrap_or_else(|| format!("{} analysis of: {}", request.role, request.message));

        Ok(AnalyzerResponse { text, usage: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_canned_reply_and_counting() {
        let mock = MockAnalyzer::new().with_reply("revenue", "charge money");
        let response = mock
            .analyze(AnalyzerRequest {
                role: "revenue".into(),
                system: "s".into(),
                message: "m".into(),
            })
            .await
            .unwrap();
        assert_eq!(response.text, "charge money");
        assert_eq!(mock.call_count("revenue"), 1);
        assert_eq!(mock.call_count("domain"), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust() {
        let mock = MockAnalyzer::new().failing_times("domain", 2);
        for _ in 0..2 {
            assert!(mock
                .analyze(AnalyzerRequest {
                    role: "domain".into(),
                    system: "s".into(),
                    message: "m".into(),
                })
                .await
                .is_err());
        }
        assert!(mock
            .analyze(AnalyzerRequest {
                role: "domain".into(),
                system: "s".into(),
                message: "m".into(),
            })
            .await
            .is_ok());
        assert_eq!(mock.call_count("domain"), 3);
    }
}
