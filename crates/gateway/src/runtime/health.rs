//! Health monitor (C4) — periodically probes registered agents and keeps a
//! rolling view of which ones are currently healthy.
//!
//! Each probe is capped at `min(interval / 2, 5s)` so a slow agent can
//! never starve the next poll cycle. The monitor loop is cooperative: it
//! stops as soon as its `CancelToken` is signalled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use conclave_domain::trace::TraceEvent;

use super::cancel::CancelToken;

#[derive(Debug, Clone)]
pub struct AgentHealth {
    pub healthy: bool,
    pub last_checked: Instant,
    pub last_latency_ms: u64,
    pub consecutive_failures: u32,
}

/// A single probe result fed into the monitor.
pub struct ProbeResult {
    pub agent_id: String,
    pub healthy: bool,
    pub latency_ms: u64,
}

pub struct HealthMonitor {
    interval: Duration,
    probe_timeout: Duration,
    state: RwLock<HashMap<String, AgentHealth>>,
}

impl HealthMonitor {
    pub fn new(interval: Duration, probe_timeout_cap: Duration) -> Self {
        let probe_timeout = interval.div_f64(2.0).min(probe_timeout_cap);
        Self {
            interval,
            probe_timeout,
            state: RwLock::new(HashMap::new()),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn record(&self, result: ProbeResult) {
        let mut state = self.state.write();
        let entry = state
            .entry(result.agent_id.clone())
            .or_insert_with(|| AgentHealth {
                healthy: true,
                last_checked: Instant::now(),
                last_latency_ms: 0,
                consecutive_failures: 0,
            });
        entry.last_checked = Instant::now();
        entry.last_latency_ms = result.latency_ms;
        entry.healthy = result.healthy;
        if result.healthy {
            entry.consecutive_failures = 0;
        } else {
            entry.consecutive_failures += 1;
        }

        TraceEvent::HealthCheckRecorded {
            agent_id: result.agent_id,
            healthy: result.healthy,
            latency_ms: result.latency_ms,
        }
        .emit();
    }

    pub fn is_healthy(&self, agent_id: &str) -> bool {
        self.state
            .read()
            .get(agent_id)
            .map(|h| h.healthy)
            .unwrap_or(true)
    }

    pub fn snapshot(&self) -> HashMap<String, AgentHealth> {
        self.state.read().clone()
    }

    /// Run the polling loop, invoking `probe` for each known agent id every
    /// `interval`, until `cancel` is signalled. `probe` must itself respect
    /// `probe_timeout()` — the monitor does not enforce it directly since
    /// the caller owns the actual network/call boundary.
    pub async fn run<F, Fut>(self: Arc<Self>, agent_ids: Vec<String>, cancel: CancelToken, probe: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ProbeResult> + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            if cancel.is_cancelled() {
                return;
            }
            ticker.tick().await;
            if cancel.is_cancelled() {
                return;
            }
            for id in &agent_ids {
                let result = tokio::time::timeout(self.probe_timeout, probe(id.clone())).await;
                let result = result.unwrap_or(ProbeResult {
                    agent_id: id.clone(),
                    healthy: false,
                    latency_ms: self.probe_timeout.as_millis() as u64,
                });
                self.record(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_timeout_is_capped_at_half_interval() {
        let monitor = HealthMonitor::new(Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(monitor.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn probe_timeout_never_exceeds_five_seconds() {
        let monitor = HealthMonitor::new(Duration::from_secs(60), Duration::from_secs(5));
        assert_eq!(monitor.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn unknown_agent_defaults_to_healthy() {
        let monitor = HealthMonitor::new(Duration::from_secs(30), Duration::from_secs(5));
        assert!(monitor.is_healthy("unknown"));
    }

    #[test]
    fn record_marks_agent_unhealthy_and_counts_failures() {
        let monitor = HealthMonitor::new(Duration::from_secs(30), Duration::from_secs(5));
        monitor.record(ProbeResult {
            agent_id: "a1".into(),
            healthy: false,
            latency_ms: 10,
        });
        assert!(!monitor.is_healthy("a1"));
        assert_eq!(monitor.snapshot()["a1"].consecutive_failures, 1);
    }

    #[test]
    fn recovering_resets_failure_count() {
        let monitor = HealthMonitor::new(Duration::from_secs(30), Duration::from_secs(5));
        monitor.record(ProbeResult {
            agent_id: "a1".into(),
            healthy: false,
            latency_ms: 10,
        });
        monitor.record(ProbeResult {
            agent_id: "a1".into(),
            healthy: true,
            latency_ms: 5,
        });
        assert!(monitor.is_healthy("a1"));
        assert_eq!(monitor.snapshot()["a1"].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let monitor = Arc::new(HealthMonitor::new(Duration::from_millis(5), Duration::from_secs(1)));
        let cancel = CancelToken::new();
        cancel.cancel();
        // Should return immediately without looping.
        monitor
            .run(vec!["a1".into()], cancel, |id| async move {
                ProbeResult {
                    agent_id: id,
                    healthy: true,
                    latency_ms: 1,
                }
            })
            .await;
    }
}
