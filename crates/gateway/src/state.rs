use std::sync::Arc;

use conclave_domain::config::Config;
use conclave_providers::ProviderRegistry;

use crate::runtime::agent_registry::AgentRegistry;
use crate::runtime::orchestrator::Orchestrator;
use crate::runtime::resilient::ResilientOrchestrator;

/// Shared application state: configuration, the agent roster, registered
/// model clients, and the resilient orchestrator that fronts the turn loop
/// (circuit breakers, health monitor, token tracker, approval store, pause
/// manager) behind an outer per-variant fallback chain.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub agents: Arc<AgentRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub orchestrator: Arc<ResilientOrchestrator>,
}

impl AppState {
    pub fn new(config: Config, agents: AgentRegistry, providers: ProviderRegistry) -> Self {
        let config = Arc::new(config);
        let agents = Arc::new(agents);
        let providers = Arc::new(providers);
        let inner = Arc::new(Orchestrator::with_default_safety(
            config.clone(),
            agents.clone(),
            providers.clone(),
        ));
        let orchestrator = Arc::new(ResilientOrchestrator::single(inner));
        Self {
            config,
            agents,
            providers,
            orchestrator,
        }
    }
}
