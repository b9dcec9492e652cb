//! Pause manager (C7) — suspends and resumes conversations awaiting human
//! input, and the `with_approval_gate` helper that wires it to C6.
//!
//! A background monitor loop checks every 30s for paused conversations
//! past their timeout and auto-resolves them as timed out. Listeners
//! (on_pause / on_resume / on_timeout / on_cancel) are isolated from each
//! other: one listener panicking or erroring never stops the rest from
//! running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use conclave_domain::error::{Error, Result};
use conclave_domain::trace::TraceEvent;

use super::approval::{ApprovalStore, RiskAssessment};
use super::cancel::CancelToken;

const TIMEOUT_MONITOR_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseCause {
    ApprovalRequired,
    UserRequested,
}

#[derive(Debug, Clone)]
pub struct PausedConversation {
    pub conversation_id: String,
    pub cause: PauseCause,
    pub approval_id: Option<Uuid>,
    pub paused_at: DateTime<Utc>,
    pub timeout_at: Option<DateTime<Utc>>,
}

type Listener = Arc<dyn Fn(&PausedConversation) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    on_pause: Vec<Listener>,
    on_resume: Vec<Listener>,
    on_timeout: Vec<Listener>,
    on_cancel: Vec<Listener>,
}

pub struct PauseManager {
    paused: RwLock<HashMap<String, PausedConversation>>,
    listeners: RwLock<Listeners>,
}

impl PauseManager {
    pub fn new() -> Self {
        Self {
            paused: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Listeners::default()),
        }
    }

    pub fn on_pause(&self, listener: Listener) {
        self.listeners.write().on_pause.push(listener);
    }
    pub fn on_resume(&self, listener: Listener) {
        self.listeners.write().on_resume.push(listener);
    }
    pub fn on_timeout(&self, listener: Listener) {
        self.listeners.write().on_timeout.push(listener);
    }
    pub fn on_cancel(&self, listener: Listener) {
        self.listeners.write().on_cancel.push(listener);
    }

    pub fn pause(
        &self,
        conversation_id: impl Into<String>,
        cause: PauseCause,
        approval_id: Option<Uuid>,
        timeout: Option<Duration>,
    ) -> Result<PausedConversation> {
        let conversation_id = conversation_id.into();
        let mut paused = self.paused.write();
        if paused.contains_key(&conversation_id) {
            return Err(Error::AlreadyPaused(conversation_id));
        }

        let entry = PausedConversation {
            conversation_id: conversation_id.clone(),
            cause,
            approval_id,
            paused_at: Utc::now(),
            timeout_at: timeout.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default()),
        };
        paused.insert(conversation_id.clone(), entry.clone());
        drop(paused);

        TraceEvent::ConversationPaused {
            conversation_id: conversation_id.clone(),
            reason: format!("{cause:?}"),
        }
        .emit();

        self.fire(|l| &l.on_pause, &entry);
        Ok(entry)
    }

    pub fn resume(&self, conversation_id: &str) -> Option<PausedConversation> {
        let entry = self.paused.write().remove(conversation_id)?;
        TraceEvent::ConversationResumed {
            conversation_id: conversation_id.to_string(),
        }
        .emit();
        self.fire(|l| &l.on_resume, &entry);
        Some(entry)
    }

    pub fn cancel(&self, conversation_id: &str) -> Option<PausedConversation> {
        let entry = self.paused.write().remove(conversation_id)?;
        self.fire(|l| &l.on_cancel, &entry);
        Some(entry)
    }

    pub fn is_paused(&self, conversation_id: &str) -> bool {
        self.paused.read().contains_key(conversation_id)
    }

    pub fn get(&self, conversation_id: &str) -> Option<PausedConversation> {
        self.paused.read().get(conversation_id).cloned()
    }

    /// Resolve every paused conversation past its timeout as timed out:
    /// transition its linked approval (if still pending) to `timed_out`
    /// first, then drop the pause and fire `on_timeout`. Returns the ids
    /// that were resolved.
    pub fn sweep_timeouts(&self, approvals: &ApprovalStore) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<PausedConversation> = {
            let paused = self.paused.read();
            paused
                .values()
                .filter(|p| p.timeout_at.map(|t| now >= t).unwrap_or(false))
                .cloned()
                .collect()
        };

        let mut resolved = Vec::new();
        for entry in &expired {
            if let Some(approval_id) = entry.approval_id {
                // Already resolved (e.g. approved moments before expiry) is
                // not an error here — the pause is still stale and must go.
                let _ = approvals.time_out(approval_id);
            }
            if self.paused.write().remove(&entry.conversation_id).is_some() {
                self.fire(|l| &l.on_timeout, entry);
                resolved.push(entry.conversation_id.clone());
            }
        }
        resolved
    }

    /// Run the timeout-sweep loop every 30s until `cancel` fires.
    pub async fn run_timeout_monitor(self: Arc<Self>, approvals: Arc<ApprovalStore>, cancel: CancelToken) {
        let mut ticker = tokio::time::interval(TIMEOUT_MONITOR_INTERVAL);
        loop {
            if cancel.is_cancelled() {
                return;
            }
            ticker.tick().await;
            if cancel.is_cancelled() {
                return;
            }
            self.sweep_timeouts(&approvals);
        }
    }

    fn fire(&self, select: impl Fn(&Listeners) -> &Vec<Listener>, entry: &PausedConversation) {
        let listeners = self.listeners.read();
        for listener in select(&listeners) {
            let listener = listener.clone();
            let entry = entry.clone();
            // Isolate each listener: a panic here must not take down the
            // sweep loop or the other listeners.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&entry)));
            if result.is_err() {
                tracing::error!(conversation_id = %entry.conversation_id, "pause listener panicked");
            }
        }
    }
}

impl Default for PauseManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap an async action with an approval gate: if the risk assessment
/// requires approval, pause the conversation and create the approval
/// request before the action runs. The caller is responsible for actually
/// invoking the gated action once the approval resolves.
pub async fn with_approval_gate(
    pause: &PauseManager,
    approvals: &ApprovalStore,
    conversation_id: &str,
    user_id: &str,
    description: &str,
    risk: RiskAssessment,
) -> Result<Option<Uuid>> {
    if !risk.require_approval {
        return Ok(None);
    }

    let timeout = risk
        .timeout_minutes
        .map(|m| Duration::from_secs(m as u64 * 60));
    let request = approvals.create(conversation_id, user_id, description, risk.clone());

    if risk.auto_pause {
        pause.pause(
            conversation_id,
            PauseCause::ApprovalRequired,
            Some(request.id),
            timeout,
        )?;
    }

    Ok(Some(request.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::approval::ApprovalStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn pause_then_resume_roundtrip() {
        let manager = PauseManager::new();
        manager
            .pause("c1", PauseCause::UserRequested, None, None)
            .unwrap();
        assert!(manager.is_paused("c1"));
        let resumed = manager.resume("c1").unwrap();
        assert_eq!(resumed.conversation_id, "c1");
        assert!(!manager.is_paused("c1"));
    }

    #[test]
    fn double_pause_is_rejected() {
        let manager = PauseManager::new();
        manager
            .pause("c1", PauseCause::UserRequested, None, None)
            .unwrap();
        assert!(matches!(
            manager.pause("c1", PauseCause::UserRequested, None, None),
            Err(Error::AlreadyPaused(_))
        ));
    }

    #[test]
    fn sweep_resolves_expired_pauses() {
        let manager = PauseManager::new();
        let approvals = ApprovalStore::new();
        manager
            .pause(
                "c1",
                PauseCause::ApprovalRequired,
                None,
                Some(Duration::from_secs(0)),
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let expired = manager.sweep_timeouts(&approvals);
        assert_eq!(expired, vec!["c1".to_string()]);
        assert!(!manager.is_paused("c1"));
    }

    #[test]
    fn sweep_transitions_the_linked_approval_to_timed_out() {
        let manager = PauseManager::new();
        let approvals = ApprovalStore::new();
        let risk = RiskAssessment {
            level: conclave_domain::config::RiskLevel::High,
            require_approval: true,
            auto_pause: true,
            timeout_minutes: Some(0),
            reasons: vec!["cost".into()],
        };
        let request = approvals.create("c1", "u1", "delete table", risk);
        manager
            .pause(
                "c1",
                PauseCause::ApprovalRequired,
                Some(request.id),
                Some(Duration::from_secs(0)),
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let expired = manager.sweep_timeouts(&approvals);
        assert_eq!(expired, vec!["c1".to_string()]);
        assert_eq!(approvals.get(request.id).unwrap().status, ApprovalStatus::TimedOut);
    }

    #[test]
    fn listener_panic_does_not_stop_other_listeners() {
        let manager = PauseManager::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        manager.on_pause(Arc::new(|_| panic!("boom")));
        manager.on_pause(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        manager
            .pause("c1", PauseCause::UserRequested, None, None)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_approval_gate_skips_pause_when_not_required() {
        let pause = PauseManager::new();
        let approvals = ApprovalStore::new();
        let risk = RiskAssessment {
            level: conclave_domain::config::RiskLevel::Low,
            require_approval: false,
            auto_pause: false,
            timeout_minutes: None,
            reasons: vec![],
        };
        let result = with_approval_gate(&pause, &approvals, "c1", "u1", "read file", risk)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(!pause.is_paused("c1"));
    }

    #[tokio::test]
    async fn with_approval_gate_pauses_when_required() {
        let pause = PauseManager::new();
        let approvals = ApprovalStore::new();
        let risk = RiskAssessment {
            level: conclave_domain::config::RiskLevel::High,
            require_approval: true,
            auto_pause: true,
            timeout_minutes: Some(60),
            reasons: vec!["cost".into()],
        };
        let result = with_approval_gate(&pause, &approvals, "c1", "u1", "delete table", risk)
            .await
            .unwrap();
        assert!(result.is_some());
        assert!(pause.is_paused("c1"));
    }
}
