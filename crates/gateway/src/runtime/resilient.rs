//! Resilient orchestrator — wraps one or more [`Orchestrator`] variants in
//! an ordered fallback chain, each behind its own circuit breaker.
//!
//! A result counts as a real failure only when it carries a bare `error`
//! with no `blocked`/`paused` flag set — a safety rejection or an HITL
//! pause is a legitimate outcome, not an orchestrator malfunction, and
//! must not trip the breaker or trigger fallback to the next variant.

use std::sync::Arc;
use std::time::Duration;

use super::circuit::CircuitBreaker;
use super::orchestrator::{Orchestrator, OrchestrationResult};
use conclave_domain::conversation::Conversation;

struct Variant {
    orchestrator: Arc<Orchestrator>,
    breaker: Arc<CircuitBreaker>,
}

/// Drives a call through an ordered list of orchestrator variants, falling
/// back to the next one whenever a variant's breaker is open or the call
/// itself fails outright.
pub struct ResilientOrchestrator {
    variants: Vec<Variant>,
}

impl ResilientOrchestrator {
    /// Wrap a single orchestrator with no fallback.
    pub fn single(orchestrator: Arc<Orchestrator>) -> Self {
        Self::new(vec![("primary".to_string(), orchestrator)])
    }

    /// Wrap an ordered list of (name, orchestrator) variants. Each gets its
    /// own breaker: 3-failure threshold, 60s recovery, 2-success close, 2
    /// half-open trial calls.
    pub fn new(variants: Vec<(String, Arc<Orchestrator>)>) -> Self {
        let variants = variants
            .into_iter()
            .map(|(name, orchestrator)| Variant {
                orchestrator,
                breaker: Arc::new(CircuitBreaker::with_config(
                    format!("orchestrator:{name}"),
                    3,
                    Duration::from_secs(60),
                    2,
                    2,
                )),
            })
            .collect();
        Self { variants }
    }

    pub async fn orchestrate(
        &self,
        conversation: &mut Conversation,
        user_id: &str,
        incoming_message: &str,
    ) -> OrchestrationResult {
        let mut last_failure: Option<OrchestrationResult> = None;

        for variant in &self.variants {
            if variant.breaker.allow().is_err() {
                continue;
            }

            let result = variant
                .orchestrator
                .orchestrate(conversation, user_id, incoming_message)
                .await;

            let is_real_failure = result.error.is_some() && result.blocked.is_none() && result.paused.is_none();
            if is_real_failure {
                variant.breaker.record_failure();
                last_failure = Some(result);
                continue;
            }

            variant.breaker.record_success();
            return result;
        }

        last_failure.unwrap_or_else(|| OrchestrationResult::circuit_open(conversation.turn_count))
    }
}
