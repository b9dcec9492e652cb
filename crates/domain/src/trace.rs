use serde::Serialize;

/// Structured trace events emitted across the conclave workspace.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TurnCompleted {
        conversation_id: String,
        agent_id: String,
        turn_number: u32,
        duration_ms: u64,
        cost_micros: i64,
    },
    CircuitTransition {
        breaker: String,
        from: String,
        to: String,
        reason: String,
    },
    BudgetBreach {
        conversation_id: String,
        budget_micros: i64,
        spent_micros: i64,
    },
    ApprovalCreated {
        approval_id: String,
        conversation_id: String,
        risk_level: String,
        auto_paused: bool,
    },
    ApprovalResolved {
        approval_id: String,
        decision: String,
    },
    ConversationPaused {
        conversation_id: String,
        reason: String,
    },
    ConversationResumed {
        conversation_id: String,
    },
    HealthCheckRecorded {
        agent_id: String,
        healthy: bool,
        latency_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "conclave_event");
    }
}
