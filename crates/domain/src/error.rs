/// Shared error type used across all conclave crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    // ── Resilience layer (C3) ───────────────────────────────────────
    #[error("circuit open for {name}")]
    CircuitOpen { name: String },

    #[error("circuit half-open call cap reached for {name}")]
    CircuitHalfOpenSaturated { name: String },

    // ── Agent registry / speaker selector (C1/C2) ───────────────────
    #[error("failed to load agents from {dir}: {reason}")]
    LoadError { dir: String, reason: String },

    #[error("no eligible agent for this turn")]
    NoEligibleAgent,

    // ── HITL approval store / pause manager (C6/C7) ─────────────────
    #[error("invalid approval transition for {id}: {reason}")]
    InvalidTransition { id: String, reason: String },

    #[error("unknown approval id: {0}")]
    UnknownApproval(String),

    #[error("conversation {0} is already paused")]
    AlreadyPaused(String),

    // ── Orchestrator core (C9) ───────────────────────────────────────
    #[error("safety guardian rejected the request: {0}")]
    SafetyRejected(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
