//! Agent registry (C1) — loads and holds the roster of agents a
//! conversation can select a speaker from.
//!
//! Agents are defined one-per-file as TOML under a configured directory.
//! Loading is all-or-nothing: a single malformed file fails the whole
//! load rather than silently registering a partial roster.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use conclave_domain::conversation::Agent;
use conclave_domain::error::{Error, Result};

/// Normalize an agent id: lowercase, underscores folded to hyphens. Lookups
/// accept either form; storage always uses the canonical hyphenated form.
pub fn canonical_id(raw: &str) -> String {
    raw.trim().to_lowercase().replace('_', "-")
}

pub struct AgentRegistry {
    agents: HashMap<String, Arc<Agent>>,
}

impl AgentRegistry {
    pub fn empty() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Load every `*.toml` file in `dir` as an [`Agent`]. Fails on the first
    /// unreadable or malformed file — a partially loaded roster would give
    /// the Speaker Selector an incomplete view of who is eligible.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut agents = HashMap::new();

        let entries = std::fs::read_dir(dir).map_err(|e| Error::LoadError {
            dir: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| Error::LoadError {
                dir: dir.display().to_string(),
                reason: e.to_string(),
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }

            let raw = std::fs::read_to_string(&path).map_err(|e| Error::LoadError {
                dir: dir.display().to_string(),
                reason: format!("{}: {e}", path.display()),
            })?;
            let mut agent: Agent = toml::from_str(&raw).map_err(|e| Error::LoadError {
                dir: dir.display().to_string(),
                reason: format!("{}: {e}", path.display()),
            })?;
            agent.id = canonical_id(&agent.id);

            tracing::info!(agent_id = %agent.id, "registered agent");
            agents.insert(agent.id.clone(), Arc::new(agent));
        }

        if agents.is_empty() {
            return Err(Error::LoadError {
                dir: dir.display().to_string(),
                reason: "no agent definitions found".into(),
            });
        }

        Ok(Self { agents })
    }

    /// Look up an agent, accepting either hyphen or underscore form.
    pub fn get(&self, id: &str) -> Option<Arc<Agent>> {
        self.agents.get(&canonical_id(id)).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Agent>> {
        let mut out: Vec<_> = self.agents.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_agent(dir: &Path, filename: &str, toml: &str) {
        let mut f = std::fs::File::create(dir.join(filename)).unwrap();
        f.write_all(toml.as_bytes()).unwrap();
    }

    const SAMPLE: &str = r#"
        id = "Researcher_1"
        display_name = "Researcher"
        system_prompt = "You research things."
        tool_names = []
        capability_tags = []
        expertise_domains = ["research"]
        avg_latency_s = 2.0
        quality = 0.8
        keywords = ["research", "investigate"]
    "#;

    #[test]
    fn loads_all_toml_files_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_agent(dir.path(), "researcher.toml", SAMPLE);
        let registry = AgentRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_accepts_hyphen_and_underscore_forms() {
        let dir = tempfile::tempdir().unwrap();
        write_agent(dir.path(), "researcher.toml", SAMPLE);
        let registry = AgentRegistry::load(dir.path()).unwrap();
        assert!(registry.get("researcher-1").is_some());
        assert!(registry.get("researcher_1").is_some());
        assert!(registry.get("Researcher_1").is_some());
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AgentRegistry::load(dir.path()).is_err());
    }

    #[test]
    fn malformed_file_fails_the_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        write_agent(dir.path(), "good.toml", SAMPLE);
        write_agent(dir.path(), "bad.toml", "not = [valid toml");
        assert!(AgentRegistry::load(dir.path()).is_err());
    }
}
