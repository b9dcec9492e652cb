//! The conversation-level data model: agents, conversations, the
//! append-only message log, and the per-turn selection context.
//!
//! This is distinct from [`crate::tool::Message`], which is the
//! provider-wire transcript format consumed by a `ModelClient`. A
//! [`ConversationMessage`] here is one entry in a conversation's durable
//! log; the orchestrator projects a window of these into provider-wire
//! messages when it invokes an agent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A loaded, immutable agent handle. Owned by the Agent Registry; every
/// other component holds a non-owning `Arc<Agent>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Normalized id (lowercase, hyphens canonical).
    pub id: String,
    pub display_name: String,
    pub system_prompt: String,
    pub tool_names: Vec<String>,
    pub capability_tags: Vec<String>,
    pub expertise_domains: Vec<String>,
    /// Mean response latency, in seconds.
    pub avg_latency_s: f64,
    /// Rolling historical quality score in [0, 1].
    pub quality: f64,
    /// Affinity per mission phase in [0, 1], keyed by phase name.
    #[serde(default)]
    pub phase_affinity: HashMap<String, f64>,
    /// Highest complexity score this agent is rated to handle well.
    #[serde(default = "default_max_complexity")]
    pub max_complexity: f64,
    /// Free-form keyword set used for keyword_match scoring.
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_max_complexity() -> f64 {
    1.0
}

/// Conversation turn-taking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    Single,
    Group,
}

/// Why a conversation's turn loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    None,
    MarkerSeen,
    MaxTurns,
    Cancelled,
    Paused,
}

/// One agent's (or the user's) contribution to a conversation. Immutable
/// once appended to the conversation's message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Agent id, or the literal `"user"`.
    pub source: String,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Text,
    ToolCall,
    ToolResult,
    Handoff,
}

/// A conversation: identifier, user, opaque context bag, append-only
/// message log, turn count, and termination cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub context: HashMap<String, serde_json::Value>,
    pub messages: Vec<ConversationMessage>,
    pub mode: ConversationMode,
    pub turn_count: u32,
    pub termination_cause: TerminationCause,
}

impl Conversation {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, mode: ConversationMode) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            context: HashMap::new(),
            messages: Vec::new(),
            mode,
            turn_count: 0,
            termination_cause: TerminationCause::None,
        }
    }

    /// Append a message and advance the turn count. Messages are immutable
    /// once appended — this is the only way to grow the log.
    pub fn append(&mut self, message: ConversationMessage) {
        self.messages.push(message);
        self.turn_count += 1;
    }

    pub fn target_agent(&self) -> Option<&str> {
        self.context.get("target_agent").and_then(|v| v.as_str())
    }
}

/// Mission phase detected from conversation content and turn number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionPhase {
    Discovery,
    Analysis,
    Strategy,
    Execution,
    Monitoring,
    Optimization,
}

/// Built fresh every turn; feeds the Speaker Selector.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub last_message: String,
    /// Bounded to the most recent ~10 messages.
    pub recent_messages: Vec<ConversationMessage>,
    pub phase: MissionPhase,
    /// Most recent speaker first, bounded to 5.
    pub previous_speakers: Vec<String>,
    pub turn_number: u32,
    pub complexity: f64,
    pub urgency: f64,
    pub required_expertise: Vec<String>,
    pub needs_collaboration: bool,
}
