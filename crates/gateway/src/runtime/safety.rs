//! Safety guardian — the pre-turn content/policy check the orchestrator
//! consults before dispatching a message to a model.
//!
//! The default implementation allows everything; it exists as a seam for a
//! real policy engine (PII detection, jailbreak classifiers, tenant-scoped
//! allow/deny lists) to be plugged in without touching the orchestrator.

#[derive(Debug, Clone, Default)]
pub struct SafetyVerdict {
    pub authorized: bool,
    pub violations: Vec<String>,
}

impl SafetyVerdict {
    pub fn allow() -> Self {
        Self {
            authorized: true,
            violations: vec![],
        }
    }

    pub fn deny(violations: Vec<String>) -> Self {
        Self {
            authorized: false,
            violations,
        }
    }
}

#[async_trait::async_trait]
pub trait SafetyGuardian: Send + Sync {
    async fn validate(&self, message: &str, user_id: &str) -> SafetyVerdict;
}

/// Default-allow guardian used when no policy engine is configured.
pub struct AllowAllGuardian;

#[async_trait::async_trait]
impl SafetyGuardian for AllowAllGuardian {
    async fn validate(&self, _message: &str, _user_id: &str) -> SafetyVerdict {
        SafetyVerdict::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_guardian_always_authorizes() {
        let guardian = AllowAllGuardian;
        let verdict = guardian.validate("anything goes", "u1").await;
        assert!(verdict.authorized);
        assert!(verdict.violations.is_empty());
    }
}
