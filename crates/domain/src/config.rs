//! Orchestrator configuration. One sub-config per component, each with its
//! own `#[serde(default)]` and default-fn, the same shape the gateway's
//! config has always used.

use crate::cost::Cost;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub circuit: CircuitBreakerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub tokens: TokenTrackerConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,
    #[serde(default)]
    pub group_chat: GroupChatConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Directory the Agent Registry scans at startup.
    #[serde(default = "d_agents_dir")]
    pub agents_dir: String,
}

fn d_agents_dir() -> String {
    "./agents".into()
}

// ── Circuit breaker (C3) ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "d_recovery_timeout_s")]
    pub recovery_timeout_s: u64,
    #[serde(default = "d_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "d_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d_failure_threshold(),
            recovery_timeout_s: d_recovery_timeout_s(),
            success_threshold: d_success_threshold(),
            half_open_max_calls: d_half_open_max_calls(),
        }
    }
}

fn d_failure_threshold() -> u32 {
    5
}
fn d_recovery_timeout_s() -> u64 {
    60
}
fn d_success_threshold() -> u32 {
    3
}
fn d_half_open_max_calls() -> u32 {
    3
}

// ── Health monitor (C4) ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "d_health_interval_s")]
    pub interval_s: u64,
    #[serde(default = "d_health_probe_timeout_s")]
    pub probe_timeout_s: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_s: d_health_interval_s(),
            probe_timeout_s: d_health_probe_timeout_s(),
        }
    }
}

fn d_health_interval_s() -> u64 {
    30
}
fn d_health_probe_timeout_s() -> u64 {
    5
}

// ── Cost / token tracker (C5) ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTrackerConfig {
    /// Default per-conversation budget; `startConversation` may override it.
    #[serde(default)]
    pub default_budget: Option<f64>,
}

impl Default for TokenTrackerConfig {
    fn default() -> Self {
        Self {
            default_budget: None,
        }
    }
}

impl TokenTrackerConfig {
    pub fn default_budget_cost(&self) -> Option<Cost> {
        self.default_budget.map(Cost::from_dollars)
    }
}

// ── HITL risk thresholds (C6) ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThreshold {
    pub level: RiskLevel,
    pub min_cost: f64,
    #[serde(default)]
    pub sensitivities: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    pub require_approval: bool,
    pub auto_pause: bool,
    /// `None` for thresholds that never require a pause (e.g. `low`).
    pub timeout_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Ordered lowest-severity first.
    pub thresholds: Vec<RiskThreshold>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![
                RiskThreshold {
                    level: RiskLevel::Low,
                    min_cost: 10.0,
                    sensitivities: vec![],
                    actions: vec![],
                    require_approval: false,
                    auto_pause: false,
                    timeout_minutes: None,
                },
                RiskThreshold {
                    level: RiskLevel::Medium,
                    min_cost: 100.0,
                    sensitivities: vec!["pii".into()],
                    actions: vec![],
                    require_approval: false,
                    auto_pause: false,
                    timeout_minutes: Some(120),
                },
                RiskThreshold {
                    level: RiskLevel::High,
                    min_cost: 1_000.0,
                    sensitivities: vec!["pii".into(), "financial".into()],
                    actions: vec!["delete".into(), "modify_production".into()],
                    require_approval: true,
                    auto_pause: true,
                    timeout_minutes: Some(60),
                },
                RiskThreshold {
                    level: RiskLevel::Critical,
                    min_cost: 5_000.0,
                    sensitivities: vec!["pii".into(), "financial".into(), "health".into()],
                    actions: vec![
                        "delete".into(),
                        "modify_production".into(),
                        "access_sensitive".into(),
                    ],
                    require_approval: true,
                    auto_pause: true,
                    timeout_minutes: Some(30),
                },
            ],
        }
    }
}

// ── Streaming multiplexer (C8) ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiplexerConfig {
    #[serde(default = "d_window_size")]
    pub window_size: usize,
    #[serde(default = "d_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default = "d_heartbeat_interval_s")]
    pub heartbeat_interval_s: u64,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            window_size: d_window_size(),
            max_buffer_size: d_max_buffer_size(),
            heartbeat_interval_s: d_heartbeat_interval_s(),
        }
    }
}

fn d_window_size() -> usize {
    10
}
fn d_max_buffer_size() -> usize {
    50
}
fn d_heartbeat_interval_s() -> u64 {
    30
}

// ── Orchestrator core (C9) ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupChatConfig {
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    #[serde(default = "d_single_agent_margin")]
    pub single_agent_margin: f64,
    #[serde(default = "d_model_call_timeout_s")]
    pub model_call_timeout_s: u64,
}

impl Default for GroupChatConfig {
    fn default() -> Self {
        Self {
            max_turns: d_max_turns(),
            single_agent_margin: d_single_agent_margin(),
            model_call_timeout_s: d_model_call_timeout_s(),
        }
    }
}

fn d_max_turns() -> u32 {
    10
}
fn d_single_agent_margin() -> f64 {
    0.15
}
fn d_model_call_timeout_s() -> u64 {
    120
}

// ── Observability ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP gRPC endpoint. `None` disables OTel export; tracing still
    /// flows through the structured JSON subscriber.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "d_service_name")]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
        }
    }
}

fn d_service_name() -> String {
    "conclave".into()
}

// ── Validation ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.circuit.failure_threshold == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "circuit.failure_threshold".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.circuit.success_threshold == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "circuit.success_threshold".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.multiplexer.window_size > self.multiplexer.max_buffer_size {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "multiplexer.window_size".into(),
                message: "must not exceed multiplexer.max_buffer_size".into(),
            });
        }
        if self.group_chat.max_turns == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "group_chat.max_turns".into(),
                message: "must be greater than 0".into(),
            });
        }

        // Risk thresholds must be ordered by non-decreasing severity and cost.
        let mut last_cost = f64::MIN;
        for (i, t) in self.risk.thresholds.iter().enumerate() {
            if t.min_cost < last_cost {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("risk.thresholds[{i}].min_cost"),
                    message: "thresholds must be ordered lowest-severity first".into(),
                });
            }
            last_cost = t.min_cost;
        }

        if self.agents_dir.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "agents_dir".into(),
                message: "must not be empty".into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_breaker_defaults() {
        let cfg = CircuitBreakerConfig::default();
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.recovery_timeout_s, 60);
        assert_eq!(cfg.success_threshold, 3);
        assert_eq!(cfg.half_open_max_calls, 3);
    }

    #[test]
    fn multiplexer_defaults() {
        let cfg = MultiplexerConfig::default();
        assert_eq!(cfg.window_size, 10);
        assert_eq!(cfg.max_buffer_size, 50);
        assert_eq!(cfg.heartbeat_interval_s, 30);
    }

    #[test]
    fn default_risk_table_has_four_tiers() {
        let cfg = RiskConfig::default();
        assert_eq!(cfg.thresholds.len(), 4);
        assert_eq!(cfg.thresholds[2].level, RiskLevel::High);
        assert_eq!(cfg.thresholds[2].min_cost, 1_000.0);
        assert!(cfg.thresholds[2].auto_pause);
        assert_eq!(cfg.thresholds[2].timeout_minutes, Some(60));
    }

    #[test]
    fn valid_config_has_no_errors() {
        let cfg = Config::default();
        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn window_larger_than_buffer_is_error() {
        let mut cfg = Config::default();
        cfg.multiplexer.window_size = 100;
        cfg.multiplexer.max_buffer_size = 50;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.field == "multiplexer.window_size"));
    }

    #[test]
    fn zero_max_turns_is_error() {
        let mut cfg = Config::default();
        cfg.group_chat.max_turns = 0;
        let issues = cfg.validate();
        assert!(issues.iter().any(|e| e.field == "group_chat.max_turns"));
    }

    #[test]
    fn toml_roundtrip_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.agents_dir, "./agents");
        assert_eq!(cfg.circuit.failure_threshold, 5);
    }
}
