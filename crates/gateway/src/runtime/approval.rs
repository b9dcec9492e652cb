//! HITL approval store (C6) — gates risky actions behind human review.
//!
//! Risk is assessed from cost, data sensitivity, and action type, and only
//! ever escalates: once a threshold's condition is met the risk level can
//! go up, never back down, within a single assessment. Approval requests
//! move through an append-only audit trail from `pending` to a terminal
//! state (`approved`, `denied`, `timed_out`); no further transitions are
//! accepted once terminal.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use conclave_domain::error::{Error, Result};
use conclave_domain::trace::TraceEvent;

pub use conclave_domain::config::{RiskConfig, RiskLevel, RiskThreshold};

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub require_approval: bool,
    pub auto_pause: bool,
    pub timeout_minutes: Option<u32>,
    pub reasons: Vec<String>,
}

/// Assess the risk of an action. Walks thresholds lowest-to-highest and
/// keeps upgrading — never downgrades once a higher threshold matches.
pub fn assess_risk(
    config: &RiskConfig,
    estimated_cost: f64,
    sensitivities: &[String],
    action_type: &str,
) -> RiskAssessment {
    let mut current = &config.thresholds[0];
    let mut reasons = Vec::new();

    for threshold in &config.thresholds {
        let cost_hit = estimated_cost >= threshold.min_cost;
        let sensitivity_hit = threshold
            .sensitivities
            .iter()
            .any(|s| sensitivities.iter().any(|given| given.eq_ignore_ascii_case(s)));
        let action_hit = threshold.actions.iter().any(|a| a.eq_ignore_ascii_case(action_type));

        if cost_hit || sensitivity_hit || action_hit {
            current = threshold;
            if cost_hit {
                reasons.push(format!("cost {estimated_cost:.2} >= {}", threshold.min_cost));
            }
            if sensitivity_hit {
                reasons.push("matched a sensitive data category".to_string());
            }
            if action_hit {
                reasons.push(format!("action '{action_type}' is flagged"));
            }
        }
    }

    RiskAssessment {
        level: current.level,
        require_approval: current.require_approval,
        auto_pause: current.auto_pause,
        timeout_minutes: current.timeout_minutes,
        reasons,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    TimedOut,
    Cancelled,
}

impl ApprovalStatus {
    fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub status: ApprovalStatus,
    pub actor: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub conversation_id: String,
    pub user_id: String,
    pub description: String,
    pub risk: RiskAssessment,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    /// `None` when the risk tier carries no `timeout_minutes` (e.g. `low`).
    pub expires_at: Option<DateTime<Utc>>,
    pub audit_trail: Vec<AuditEntry>,
}

/// Thread-safe, in-memory HITL approval store with conversation/user/status
/// indices. Persistence is intentionally a separate concern — see
/// [`Persistence`] — so a durable backend can be swapped in without
/// touching the risk/lifecycle logic here.
pub struct ApprovalStore {
    requests: RwLock<HashMap<Uuid, ApprovalRequest>>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(
        &self,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        description: impl Into<String>,
        risk: RiskAssessment,
    ) -> ApprovalRequest {
        let now = Utc::now();
        let expires_at = risk
            .timeout_minutes
            .map(|m| now + chrono::Duration::minutes(m as i64));
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            description: description.into(),
            status: ApprovalStatus::Pending,
            audit_trail: vec![AuditEntry {
                at: now,
                status: ApprovalStatus::Pending,
                actor: None,
                note: None,
            }],
            risk,
            created_at: now,
            expires_at,
        };

        TraceEvent::ApprovalCreated {
            approval_id: request.id.to_string(),
            conversation_id: request.conversation_id.clone(),
            risk_level: format!("{:?}", request.risk.level),
            auto_paused: request.risk.auto_pause,
        }
        .emit();

        self.requests.write().insert(request.id, request.clone());
        request
    }

    fn resolve(
        &self,
        id: Uuid,
        to: ApprovalStatus,
        actor: Option<String>,
        note: Option<String>,
    ) -> Result<ApprovalRequest> {
        let mut requests = self.requests.write();
        let request = requests
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownApproval(id.to_string()))?;

        if request.status.is_terminal() {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                reason: format!("already resolved as {:?}", request.status),
            });
        }

        request.status = to;
        request.audit_trail.push(AuditEntry {
            at: Utc::now(),
            status: to,
            actor,
            note,
        });

        TraceEvent::ApprovalResolved {
            approval_id: id.to_string(),
            decision: format!("{to:?}"),
        }
        .emit();

        Ok(request.clone())
    }

    pub fn approve(&self, id: Uuid, actor: impl Into<String>) -> Result<ApprovalRequest> {
        self.resolve(id, ApprovalStatus::Approved, Some(actor.into()), None)
    }

    pub fn deny(
        &self,
        id: Uuid,
        actor: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<ApprovalRequest> {
        self.resolve(id, ApprovalStatus::Denied, Some(actor.into()), Some(reason.into()))
    }

    pub fn time_out(&self, id: Uuid) -> Result<ApprovalRequest> {
        self.resolve(id, ApprovalStatus::TimedOut, None, None)
    }

    pub fn cancel(&self, id: Uuid, reason: impl Into<String>) -> Result<ApprovalRequest> {
        self.resolve(id, ApprovalStatus::Cancelled, None, Some(reason.into()))
    }

    pub fn get(&self, id: Uuid) -> Option<ApprovalRequest> {
        self.requests.read().get(&id).cloned()
    }

    pub fn pending_for_conversation(&self, conversation_id: &str) -> Vec<ApprovalRequest> {
        self.requests
            .read()
            .values()
            .filter(|r| r.conversation_id == conversation_id && r.status == ApprovalStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn for_user(&self, user_id: &str) -> Vec<ApprovalRequest> {
        self.requests
            .read()
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Transition every still-pending request past its `expires_at` to
    /// `timed_out`. Returns the requests that were transitioned.
    pub fn check_timeouts(&self) -> Vec<ApprovalRequest> {
        let now = Utc::now();
        let expired: Vec<Uuid> = self
            .requests
            .read()
            .values()
            .filter(|r| {
                r.status == ApprovalStatus::Pending
                    && r.expires_at.map(|t| now >= t).unwrap_or(false)
            })
            .map(|r| r.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.time_out(id).ok())
            .collect()
    }

    /// Filter and paginate approvals by status/user/conversation, newest
    /// first.
    pub fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        user: Option<&str>,
        conversation: Option<&str>,
        limit: usize,
    ) -> Vec<ApprovalRequest> {
        let mut matches: Vec<ApprovalRequest> = self
            .requests
            .read()
            .values()
            .filter(|r| status.map(|s| r.status == s).unwrap_or(true))
            .filter(|r| user.map(|u| r.user_id == u).unwrap_or(true))
            .filter(|r| conversation.map(|c| r.conversation_id == c).unwrap_or(true))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(limit);
        matches
    }

    /// Remove terminal requests older than `older_than_days`. Returns the
    /// number removed.
    pub fn cleanup(&self, older_than_days: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        let mut requests = self.requests.write();
        let stale: Vec<Uuid> = requests
            .values()
            .filter(|r| r.status.is_terminal() && r.created_at < cutoff)
            .map(|r| r.id)
            .collect();
        for id in &stale {
            requests.remove(id);
        }
        stale.len()
    }
}

impl Default for ApprovalStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A minimal key/value persistence seam for the approval store. The
/// in-memory `ApprovalStore` above doesn't use this directly; it exists so
/// a durable backend can observe/replay approval state without coupling
/// the risk/lifecycle logic to a specific storage engine.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory [`Persistence`] implementation, the default when no durable
/// backend is configured.
#[derive(Default)]
pub struct InMemoryPersistence {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

#[async_trait::async_trait]
impl Persistence for InMemoryPersistence {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_risk_config() -> RiskConfig {
        RiskConfig::default()
    }

    #[test]
    fn low_cost_action_is_low_risk() {
        let assessment = assess_risk(&default_risk_config(), 1.0, &[], "read");
        assert_eq!(assessment.level, RiskLevel::Low);
        assert!(!assessment.require_approval);
    }

    #[test]
    fn high_cost_requires_approval_and_auto_pauses() {
        let assessment = assess_risk(&default_risk_config(), 1_500.0, &[], "read");
        assert_eq!(assessment.level, RiskLevel::High);
        assert!(assessment.require_approval);
        assert!(assessment.auto_pause);
    }

    #[test]
    fn sensitive_action_escalates_even_at_low_cost() {
        let assessment = assess_risk(
            &default_risk_config(),
            0.0,
            &["financial".to_string()],
            "read",
        );
        assert_eq!(assessment.level, RiskLevel::High);
    }

    #[test]
    fn risk_only_escalates_never_downgrades_within_one_assessment() {
        // A critical-cost, non-sensitive, non-flagged action should land on
        // Critical even though later-checked signals (sensitivity/action)
        // don't independently justify it.
        let assessment = assess_risk(&default_risk_config(), 10_000.0, &[], "read");
        assert_eq!(assessment.level, RiskLevel::Critical);
    }

    #[test]
    fn approve_then_deny_is_rejected() {
        let store = ApprovalStore::new();
        let risk = assess_risk(&default_risk_config(), 2_000.0, &[], "delete");
        let request = store.create("c1", "u1", "delete prod table", risk);

        store.approve(request.id, "reviewer").unwrap();
        let err = store.deny(request.id, "reviewer", "changed my mind").unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn unknown_id_is_an_error() {
        let store = ApprovalStore::new();
        assert!(matches!(
            store.approve(Uuid::new_v4(), "x"),
            Err(Error::UnknownApproval(_))
        ));
    }

    #[test]
    fn pending_for_conversation_excludes_resolved() {
        let store = ApprovalStore::new();
        let risk = assess_risk(&default_risk_config(), 1.0, &[], "read");
        let r1 = store.create("c1", "u1", "a", risk.clone());
        let r2 = store.create("c1", "u1", "b", risk);
        store.approve(r1.id, "reviewer").unwrap();

        let pending = store.pending_for_conversation("c1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, r2.id);
    }

    #[test]
    fn check_timeouts_transitions_only_expired_pending_requests() {
        let store = ApprovalStore::new();
        let mut risk = assess_risk(&default_risk_config(), 2_000.0, &[], "delete");
        risk.timeout_minutes = Some(0);
        let expired = store.create("c1", "u1", "delete prod table", risk.clone());
        risk.timeout_minutes = Some(60);
        let still_fresh = store.create("c1", "u1", "another action", risk);
        std::thread::sleep(std::time::Duration::from_millis(5));

        let timed_out = store.check_timeouts();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].id, expired.id);
        assert_eq!(store.get(expired.id).unwrap().status, ApprovalStatus::TimedOut);
        assert_eq!(store.get(still_fresh.id).unwrap().status, ApprovalStatus::Pending);
    }

    #[test]
    fn cancel_transitions_to_cancelled_and_is_terminal() {
        let store = ApprovalStore::new();
        let risk = assess_risk(&default_risk_config(), 2_000.0, &[], "delete");
        let request = store.create("c1", "u1", "delete prod table", risk);

        let cancelled = store.cancel(request.id, "user changed their mind").unwrap();
        assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
        assert!(store.approve(request.id, "reviewer").is_err());
    }

    #[test]
    fn list_approvals_filters_and_sorts_newest_first() {
        let store = ApprovalStore::new();
        let risk = assess_risk(&default_risk_config(), 1.0, &[], "read");
        let r1 = store.create("c1", "u1", "first", risk.clone());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let r2 = store.create("c1", "u2", "second", risk.clone());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let r3 = store.create("c2", "u1", "third", risk);
        store.approve(r2.id, "reviewer").unwrap();

        let for_u1 = store.list_approvals(None, Some("u1"), None, 10);
        assert_eq!(for_u1.iter().map(|r| r.id).collect::<Vec<_>>(), vec![r3.id, r1.id]);

        let pending_only = store.list_approvals(Some(ApprovalStatus::Pending), None, None, 10);
        assert_eq!(pending_only.len(), 2);

        let for_c1 = store.list_approvals(None, None, Some("c1"), 10);
        assert_eq!(for_c1.len(), 2);
    }

    #[test]
    fn cleanup_removes_only_old_terminal_requests() {
        let store = ApprovalStore::new();
        let risk = assess_risk(&default_risk_config(), 1.0, &[], "read");
        let resolved = store.create("c1", "u1", "old", risk.clone());
        let pending = store.create("c1", "u1", "still open", risk);
        store.approve(resolved.id, "reviewer").unwrap();

        // Nothing is old enough yet.
        assert_eq!(store.cleanup(30), 0);
        assert!(store.get(resolved.id).is_some());

        // A negative cutoff makes everything "older than" it, including
        // requests created moments ago.
        let removed = store.cleanup(-1);
        assert_eq!(removed, 1);
        assert!(store.get(resolved.id).is_none());
        assert!(store.get(pending.id).is_some());
    }

    #[tokio::test]
    async fn in_memory_persistence_roundtrips() {
        let store = InMemoryPersistence::default();
        store.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
