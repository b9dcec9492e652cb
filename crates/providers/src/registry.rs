//! Provider registry.
//!
//! Holds the set of registered [`LlmProvider`] instances and the role → model
//! assignments agents are matched against. Construction of concrete adapters
//! (HTTP clients, auth, SDK wiring) lives outside this crate; the registry
//! itself only tracks what's already been built and registered.

use crate::traits::LlmProvider;
use std::collections::HashMap;
use std::sync::Arc;

/// Holds all registered model clients and role assignments.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    roles: HashMap<String, String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own [`LlmProvider::provider_id`].
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let id = provider.provider_id().to_string();
        tracing::info!(provider_id = %id, "registered model provider");
        self.providers.insert(id, provider);
    }

    /// Assign a role (e.g. "planner", "executor") to `provider_id/model_name`.
    pub fn assign_role(&mut self, role: impl Into<String>, model_spec: impl Into<String>) {
        self.roles.insert(role.into(), model_spec.into());
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Get the provider assigned to a given role. The role config stores
    /// "provider_id/model_name"; the provider is looked up by the first
    /// segment.
    pub fn for_role(&self, role: &str) -> Option<Arc<dyn LlmProvider>> {
        let model_spec = self.roles.get(role)?;
        let provider_id = model_spec.split('/').next().unwrap_or(model_spec);
        self.providers.get(provider_id).cloned()
    }

    pub fn model_for_role(&self, role: &str) -> Option<&str> {
        self.roles.get(role).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn LlmProvider>)> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn list_roles(&self) -> HashMap<String, String> {
        self.roles.clone()
    }
}
