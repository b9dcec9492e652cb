//! Runtime — the orchestrator and its nine components (C1-C9): agent
//! registry, speaker selector, circuit breaker, health monitor,
//! cost/token tracker, HITL approval store, pause manager, streaming
//! multiplexer, and the orchestrator core that ties them together.

pub mod agent_registry;
pub mod approval;
pub mod cancel;
pub mod circuit;
pub mod health;
pub mod orchestrator;
pub mod pause;
pub mod resilient;
pub mod safety;
pub mod selector;
pub mod stream_mux;
pub mod token_tracker;

pub use orchestrator::{CostBreakdown, Orchestrator, OrchestrationResult, PausedInfo, Routing};
pub use resilient::ResilientOrchestrator;
