//! Orchestrator core (C9) — the top-level conversation turn loop that
//! wires together the agent registry, speaker selector, circuit breakers,
//! health monitor, token tracker, HITL approval store, pause manager, and
//! streaming multiplexer.
//!
//! `orchestrate()` never propagates an error to its caller: every failure
//! mode (no eligible agent, circuit open, safety rejection, provider
//! error) is captured in the returned [`OrchestrationResult`] instead,
//! mirroring `IAgentOrchestrator`'s health()/reset() contract of always
//! returning a usable value. A single call either runs one turn against a
//! directly-resolved agent (`Routing::SingleAgent`) or drives a bounded
//! internal group-chat loop across turns (`Routing::MultiAgent`), handing
//! every chunk of model output to a per-call [`StreamMux`] along the way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;

use conclave_domain::conversation::{
    Conversation, ConversationMessage, MessageKind, SelectionContext, TerminationCause,
};
use conclave_domain::cost::Cost;
use conclave_domain::stream::StreamEvent;
use conclave_domain::tool::Message;
use conclave_domain::trace::TraceEvent;
use conclave_providers::ProviderRegistry;

use super::agent_registry::{canonical_id, AgentRegistry};
use super::approval::{assess_risk, ApprovalStore};
use super::cancel::{CancelMap, CancelToken};
use super::circuit::{CircuitBreaker, CircuitState};
use super::health::HealthMonitor;
use super::pause::{with_approval_gate, PauseCause, PauseManager};
use super::safety::{AllowAllGuardian, SafetyGuardian};
use super::selector::{
    detect_phase, estimate_complexity, estimate_urgency, extract_required_expertise,
    needs_collaboration, SpeakerSelector,
};
use super::stream_mux::StreamMux;
use super::token_tracker::TokenTracker;

use conclave_domain::config::Config;

/// Marker the turn loop watches for in assistant output to end a group
/// conversation early, independent of `max_turns`.
pub const TERMINATION_MARKER: &str = "[[CONVERSATION_COMPLETE]]";

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Resolves once `token` is signalled. Polled rather than notified since
/// `CancelToken` is a plain atomic flag, cheap enough at this interval for
/// the single suspension point (the model call) it guards.
async fn wait_for_cancel(token: &CancelToken) {
    loop {
        if token.is_cancelled() {
            return;
        }
        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
    }
}

pub struct Orchestrator {
    config: Arc<Config>,
    agents: Arc<AgentRegistry>,
    providers: Arc<ProviderRegistry>,
    selector: SpeakerSelector,
    circuits: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    pub health: Arc<HealthMonitor>,
    pub tokens: Arc<TokenTracker>,
    pub approvals: Arc<ApprovalStore>,
    pub pause: Arc<PauseManager>,
    pub cancel_map: Arc<CancelMap>,
    safety: Arc<dyn SafetyGuardian>,
}

/// Outcome of a single model turn, internal to the group-chat loop.
/// `orchestrate()` folds a sequence of these into one [`OrchestrationResult`].
#[derive(Debug, Clone)]
enum TurnOutcome {
    /// A speaker was selected and responded normally.
    Responded {
        agent_id: String,
        content: String,
        cost: Cost,
        termination: TerminationCause,
    },
    /// The conversation is paused awaiting approval; no agent was invoked.
    AwaitingApproval { approval_id: uuid::Uuid },
    /// A pre-existing pause is still in effect.
    StillPaused,
    /// The turn was cancelled (via `cancel_map`) before the model responded.
    Cancelled { agent_id: String },
    /// The safety guardian rejected the inbound message.
    Rejected { violations: Vec<String> },
    /// No agent was eligible to speak (empty registry, or circuit open for
    /// every eligible candidate).
    NoEligibleAgent,
    /// The configured provider returned an error; circuit breaker state for
    /// the agent was updated accordingly.
    ProviderError { agent_id: String, message: String },
}

/// Whether a call was routed to one directly-resolved agent or driven as a
/// bounded group chat across the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    SingleAgent,
    MultiAgent,
}

/// Per-call spend, mirroring the cost/token tracker's own totals but
/// expressed in the units the external contract exposes: plain dollars.
#[derive(Debug, Clone, Serialize)]
pub struct CostBreakdown {
    pub total_cost: f64,
    pub by_agent: HashMap<String, f64>,
}

/// The approval a caller needs to resolve before the conversation can
/// continue.
#[derive(Debug, Clone, Serialize)]
pub struct PausedInfo {
    pub approval_id: uuid::Uuid,
    pub risk_level: String,
}

/// External result of a call to [`Orchestrator::orchestrate`]. Always
/// produced, never an `Err`: every failure mode the turn loop can hit is
/// represented as a field here instead.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub response: String,
    pub agents_used: Vec<String>,
    pub turn_count: u32,
    pub duration_seconds: f64,
    pub cost_breakdown: CostBreakdown,
    pub routing: Routing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<PausedInfo>,
}

impl OrchestrationResult {
    fn empty_cost() -> CostBreakdown {
        CostBreakdown {
            total_cost: 0.0,
            by_agent: HashMap::new(),
        }
    }

    /// The result returned by a [`super::resilient::ResilientOrchestrator`]
    /// when every variant in its fallback chain has its breaker open.
    pub(crate) fn circuit_open(turn_count: u32) -> Self {
        Self {
            response: String::new(),
            agents_used: vec![],
            turn_count,
            duration_seconds: 0.0,
            cost_breakdown: Self::empty_cost(),
            routing: Routing::SingleAgent,
            error: Some("circuit breaker open".to_string()),
            blocked: None,
            circuit_breaker: Some("open".to_string()),
            paused: None,
        }
    }
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        agents: Arc<AgentRegistry>,
        providers: Arc<ProviderRegistry>,
        safety: Arc<dyn SafetyGuardian>,
    ) -> Self {
        Self {
            config,
            agents,
            providers,
            selector: SpeakerSelector::new(),
            circuits: Mutex::new(HashMap::new()),
            health: Arc::new(HealthMonitor::new(
                std::time::Duration::from_secs(30),
                std::time::Duration::from_secs(5),
            )),
            tokens: Arc::new(TokenTracker::new()),
            approvals: Arc::new(ApprovalStore::new()),
            pause: Arc::new(PauseManager::new()),
            cancel_map: Arc::new(CancelMap::new()),
            safety,
        }
    }

    /// Construct with the default [`AllowAllGuardian`].
    pub fn with_default_safety(
        config: Arc<Config>,
        agents: Arc<AgentRegistry>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self::new(config, agents, providers, Arc::new(AllowAllGuardian))
    }

    fn circuit_for(&self, agent_id: &str) -> Arc<CircuitBreaker> {
        let mut circuits = self.circuits.lock();
        circuits
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_config(
                    agent_id.to_string(),
                    self.config.circuit.failure_threshold,
                    std::time::Duration::from_secs(self.config.circuit.recovery_timeout_s),
                    self.config.circuit.success_threshold,
                    self.config.circuit.half_open_max_calls,
                ))
            })
            .clone()
    }

    fn build_selection_context(&self, conversation: &Conversation, last_message: &str) -> SelectionContext {
        let recent: Vec<_> = conversation
            .messages
            .iter()
            .rev()
            .take(10)
            .rev()
            .cloned()
            .collect();
        let previous_speakers: Vec<String> = conversation
            .messages
            .iter()
            .rev()
            .filter(|m| m.source != "user")
            .take(5)
            .map(|m| m.source.clone())
            .collect();
        let required_expertise = extract_required_expertise(last_message);
        let candidates = self.agents.list();
        SelectionContext {
            last_message: last_message.to_string(),
            phase: detect_phase(&recent, conversation.turn_count),
            recent_messages: recent,
            previous_speakers,
            turn_number: conversation.turn_count,
            complexity: estimate_complexity(last_message),
            urgency: estimate_urgency(last_message),
            needs_collaboration: needs_collaboration(&required_expertise, &candidates),
            required_expertise,
        }
    }

    /// Project a conversation's durable message log into provider-wire
    /// messages, prefixed with the speaking agent's system prompt.
    fn build_chat_messages(&self, conversation: &Conversation, agent: &conclave_domain::conversation::Agent) -> Vec<Message> {
        let mut messages = Vec::with_capacity(conversation.messages.len() + 1);
        if !agent.system_prompt.is_empty() {
            messages.push(Message::system(agent.system_prompt.clone()));
        }
        for m in &conversation.messages {
            if m.source == "user" {
                messages.push(Message::user(m.content.clone()));
            } else {
                messages.push(Message::assistant(m.content.clone()));
            }
        }
        messages
    }

    /// Run a single turn: select a speaker (or use `agent_override`), gate
    /// on safety/approval/circuit state, stream the model's response
    /// through `mux`, and append the result to `conversation`.
    ///
    /// `append_user_message` controls whether `last_message` is recorded
    /// as a new user turn: `true` for the first turn of a call (the
    /// caller's actual input), `false` for subsequent turns of an internal
    /// group-chat loop, where `last_message` is the previous agent's own
    /// reply and already lives in the conversation log.
    async fn run_turn(
        &self,
        conversation: &mut Conversation,
        user_id: &str,
        last_message: &str,
        agent_override: Option<&str>,
        append_user_message: bool,
        mux: &StreamMux,
    ) -> TurnOutcome {
        // Step 1: resume check — an existing pause always wins.
        if self.pause.is_paused(&conversation.id) {
            return TurnOutcome::StillPaused;
        }

        // Step 2: safety check and append, only for caller-originated input.
        if append_user_message {
            let verdict = self.safety.validate(last_message, user_id).await;
            if !verdict.authorized {
                return TurnOutcome::Rejected {
                    violations: verdict.violations,
                };
            }
            conversation.append(ConversationMessage {
                source: "user".to_string(),
                kind: MessageKind::Text,
                content: last_message.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }

        // Step 3: build the selection context.
        let ctx = self.build_selection_context(conversation, last_message);
        let candidates = self.agents.list();

        // Step 4: resolve the speaker, either forced (direct routing) or
        // by score, whose circuit is currently closed/half-open.
        let (agent, breaker) = match agent_override {
            Some(target) => {
                let canonical = canonical_id(target);
                match self.agents.get(&canonical) {
                    Some(a) => {
                        let breaker = self.circuit_for(&a.id);
                        if breaker.allow().is_err() {
                            return TurnOutcome::NoEligibleAgent;
                        }
                        (a, breaker)
                    }
                    None => return TurnOutcome::NoEligibleAgent,
                }
            }
            None => {
                let scored = self.selector.score_all(&candidates, &ctx);
                let mut chosen = None;
                for candidate in scored {
                    let breaker = self.circuit_for(&candidate.agent_id);
                    if breaker.allow().is_ok() {
                        chosen = Some((candidate, breaker));
                        break;
                    }
                }
                match chosen {
                    Some((score, breaker)) => match self.agents.get(&score.agent_id) {
                        Some(a) => (a, breaker),
                        None => return TurnOutcome::NoEligibleAgent,
                    },
                    None => return TurnOutcome::NoEligibleAgent,
                }
            }
        };

        // Step 5: risk assessment / HITL gate.
        let estimated_cost = self.tokens.total_cost(&conversation.id).as_dollars();
        let risk = assess_risk(&self.config.risk, estimated_cost, &[], "respond");
        match with_approval_gate(
            &self.pause,
            &self.approvals,
            &conversation.id,
            user_id,
            &format!("{} responding to: {}", agent.id, last_message),
            risk,
        )
        .await
        {
            Ok(Some(approval_id)) if self.pause.is_paused(&conversation.id) => {
                return TurnOutcome::AwaitingApproval { approval_id };
            }
            _ => {}
        }

        // Step 6: invoke the model, streaming the response through `mux`.
        let provider = self.providers.for_role(&agent.id).or_else(|| self.providers.get(&agent.id));
        let provider = match provider {
            Some(p) => p,
            None => {
                breaker.record_failure();
                return TurnOutcome::ProviderError {
                    agent_id: agent.id.clone(),
                    message: "no model client registered for this agent".to_string(),
                };
            }
        };

        let request = conclave_providers::ChatRequest {
            messages: self.build_chat_messages(conversation, &agent),
            ..Default::default()
        };

        let cancel = self.cancel_map.register(&conversation.id);
        let start = std::time::Instant::now();
        let call_timeout = Duration::from_secs(self.config.group_chat.model_call_timeout_s);

        let stream_call = tokio::time::timeout(call_timeout, provider.chat_stream(request));
        let mut stream = tokio::select! {
            biased;
            _ = wait_for_cancel(&cancel) => {
                self.cancel_map.remove(&conversation.id);
                breaker.record_failure();
                conversation.termination_cause = TerminationCause::Cancelled;
                return TurnOutcome::Cancelled { agent_id: agent.id.clone() };
            }
            result = stream_call => match result {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => {
                    self.cancel_map.remove(&conversation.id);
                    breaker.record_failure();
                    return TurnOutcome::ProviderError { agent_id: agent.id.clone(), message: e.to_string() };
                }
                Err(_) => {
                    self.cancel_map.remove(&conversation.id);
                    breaker.record_failure();
                    return TurnOutcome::ProviderError {
                        agent_id: agent.id.clone(),
                        message: "model call timed out".to_string(),
                    };
                }
            },
        };

        let mut content = String::new();
        let mut usage = None;
        let mut stream_failed = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = wait_for_cancel(&cancel) => {
                    self.cancel_map.remove(&conversation.id);
                    breaker.record_failure();
                    conversation.termination_cause = TerminationCause::Cancelled;
                    return TurnOutcome::Cancelled { agent_id: agent.id.clone() };
                }
                item = stream.next() => item,
            };
            match next {
                None => break,
                Some(Ok(StreamEvent::Token { text })) => {
                    content.push_str(&text);
                    mux.text(&agent.id, text).await;
                }
                Some(Ok(StreamEvent::ToolCallStarted { call_id, tool_name })) => {
                    mux.tool_call_started(&agent.id, &call_id, &tool_name).await;
                }
                Some(Ok(StreamEvent::ToolCallFinished { call_id, arguments, .. })) => {
                    mux.tool_call_finished(&agent.id, &call_id, arguments).await;
                }
                Some(Ok(StreamEvent::ToolCallDelta { .. })) => {}
                Some(Ok(StreamEvent::Done { usage: u, .. })) => {
                    usage = u;
                }
                Some(Ok(StreamEvent::Error { message })) => {
                    stream_failed = Some(message);
                    break;
                }
                Some(Err(e)) => {
                    stream_failed = Some(e.to_string());
                    break;
                }
            }
        }
        self.cancel_map.remove(&conversation.id);

        if let Some(message) = stream_failed {
            breaker.record_failure();
            mux.error(message.as_str()).await;
            return TurnOutcome::ProviderError {
                agent_id: agent.id.clone(),
                message,
            };
        }
        breaker.record_success();
        self.health.record(super::health::ProbeResult {
            agent_id: agent.id.clone(),
            healthy: true,
            latency_ms: start.elapsed().as_millis() as u64,
        });

        // Step 7: token/cost accounting.
        let (prompt_tokens, completion_tokens) = match usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => (
                TokenTracker::estimate_tokens(last_message),
                TokenTracker::estimate_tokens(&content),
            ),
        };
        let cost = self.tokens.record_turn(
            &conversation.id,
            conversation.turn_count,
            &agent.id,
            "mock-model",
            prompt_tokens,
            completion_tokens,
        );

        // Step 8: append, check termination, return.
        conversation.append(ConversationMessage {
            source: agent.id.clone(),
            kind: MessageKind::Text,
            content: content.clone(),
            timestamp: chrono::Utc::now(),
        });

        let termination = if content.contains(TERMINATION_MARKER) {
            TerminationCause::MarkerSeen
        } else if conversation.turn_count >= self.config.group_chat.max_turns {
            TerminationCause::MaxTurns
        } else {
            TerminationCause::None
        };
        conversation.termination_cause = termination;

        TraceEvent::TurnCompleted {
            conversation_id: conversation.id.clone(),
            agent_id: agent.id.clone(),
            turn_number: conversation.turn_count,
            duration_ms: start.elapsed().as_millis() as u64,
            cost_micros: cost.as_micros(),
        }
        .emit();

        TurnOutcome::Responded {
            agent_id: agent.id.clone(),
            content,
            cost,
            termination,
        }
    }

    /// Run a full call: resolve routing (direct target, single dominant
    /// candidate, or a scored single-vs-group decision), then either run
    /// one turn or drive a bounded internal group-chat loop, folding the
    /// result into the external [`OrchestrationResult`] contract.
    pub async fn orchestrate(
        &self,
        conversation: &mut Conversation,
        user_id: &str,
        incoming_message: &str,
    ) -> OrchestrationResult {
        let start = std::time::Instant::now();
        self.tokens
            .start_conversation(&conversation.id, self.config.tokens.default_budget_cost());

        let (mux, mut rx) = StreamMux::with_config(
            conversation.id.clone(),
            self.config.multiplexer.window_size,
            self.config.multiplexer.max_buffer_size,
            Duration::from_secs(self.config.multiplexer.heartbeat_interval_s),
        );
        // Nothing outside this call consumes mux events yet; drain them so
        // `StreamMux::send`'s bounded channel never blocks the turn loop.
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        if self.pause.is_paused(&conversation.id) {
            mux.finish("", "still_paused").await;
            return self.still_paused_result(conversation, Routing::SingleAgent, start.elapsed().as_secs_f64());
        }

        let verdict = self.safety.validate(incoming_message, user_id).await;
        if !verdict.authorized {
            let message = verdict.violations.join("; ");
            mux.error(message.as_str()).await;
            return OrchestrationResult {
                response: String::new(),
                agents_used: vec![],
                turn_count: conversation.turn_count,
                duration_seconds: start.elapsed().as_secs_f64(),
                cost_breakdown: OrchestrationResult::empty_cost(),
                routing: Routing::SingleAgent,
                error: Some(message),
                blocked: Some(true),
                circuit_breaker: None,
                paused: None,
            };
        }

        let candidates = self.agents.list();
        let ctx = self.build_selection_context(conversation, incoming_message);
        let target = conversation.target_agent().map(canonical_id);
        let (routing, forced_agent) = match &target {
            Some(id) if self.agents.get(id).is_some() => (Routing::SingleAgent, Some(id.clone())),
            _ if candidates.len() <= 1 => (Routing::SingleAgent, None),
            _ => {
                if self
                    .selector
                    .should_use_single_agent(&candidates, &ctx, self.config.group_chat.single_agent_margin)
                {
                    (Routing::SingleAgent, None)
                } else {
                    (Routing::MultiAgent, None)
                }
            }
        };

        let max_iterations = match routing {
            Routing::SingleAgent => 1,
            Routing::MultiAgent => self.config.group_chat.max_turns,
        };

        let mut agents_used: Vec<String> = Vec::new();
        let mut by_agent_cost: HashMap<String, Cost> = HashMap::new();
        let mut total_cost = Cost::ZERO;
        let mut next_message = incoming_message.to_string();
        let mut terminal: Option<TurnOutcome> = None;

        for i in 0..max_iterations {
            let agent_override = if i == 0 { forced_agent.as_deref() } else { None };
            let append_user = i == 0;
            let turn = self
                .run_turn(conversation, user_id, &next_message, agent_override, append_user, &mux)
                .await;
            match turn {
                TurnOutcome::Responded {
                    agent_id,
                    content,
                    cost,
                    termination,
                } => {
                    if !agents_used.contains(&agent_id) {
                        agents_used.push(agent_id.clone());
                    }
                    *by_agent_cost.entry(agent_id).or_insert(Cost::ZERO) += cost;
                    total_cost += cost;
                    next_message = content;
                    if termination != TerminationCause::None || routing == Routing::SingleAgent {
                        break;
                    }
                }
                other => {
                    terminal = Some(other);
                    break;
                }
            }
        }

        if let Some(outcome) = terminal {
            return self
                .result_from_terminal_outcome(conversation, outcome, routing, start.elapsed().as_secs_f64(), &mux)
                .await;
        }

        mux.finish(next_message.clone(), "completed").await;

        OrchestrationResult {
            response: next_message,
            agents_used,
            turn_count: conversation.turn_count,
            duration_seconds: start.elapsed().as_secs_f64(),
            cost_breakdown: CostBreakdown {
                total_cost: total_cost.as_dollars(),
                by_agent: by_agent_cost.into_iter().map(|(k, v)| (k, v.as_dollars())).collect(),
            },
            routing,
            error: None,
            blocked: None,
            circuit_breaker: None,
            paused: None,
        }
    }

    fn still_paused_result(&self, conversation: &Conversation, routing: Routing, duration_seconds: f64) -> OrchestrationResult {
        let paused = self
            .pause
            .get(&conversation.id)
            .and_then(|p| p.approval_id)
            .and_then(|id| self.approvals.get(id))
            .map(|r| PausedInfo {
                approval_id: r.id,
                risk_level: format!("{:?}", r.risk.level),
            });
        let error = if paused.is_none() {
            Some("conversation is paused".to_string())
        } else {
            None
        };
        OrchestrationResult {
            response: String::new(),
            agents_used: vec![],
            turn_count: conversation.turn_count,
            duration_seconds,
            cost_breakdown: OrchestrationResult::empty_cost(),
            routing,
            error,
            blocked: None,
            circuit_breaker: None,
            paused,
        }
    }

    async fn result_from_terminal_outcome(
        &self,
        conversation: &Conversation,
        outcome: TurnOutcome,
        routing: Routing,
        duration_seconds: f64,
        mux: &StreamMux,
    ) -> OrchestrationResult {
        match outcome {
            TurnOutcome::StillPaused => {
                mux.finish("", "still_paused").await;
                self.still_paused_result(conversation, routing, duration_seconds)
            }
            TurnOutcome::AwaitingApproval { approval_id } => {
                mux.finish("", "awaiting_approval").await;
                let risk_level = self
                    .approvals
                    .get(approval_id)
                    .map(|r| format!("{:?}", r.risk.level))
                    .unwrap_or_default();
                OrchestrationResult {
                    response: String::new(),
                    agents_used: vec![],
                    turn_count: conversation.turn_count,
                    duration_seconds,
                    cost_breakdown: OrchestrationResult::empty_cost(),
                    routing,
                    error: None,
                    blocked: None,
                    circuit_breaker: None,
                    paused: Some(PausedInfo { approval_id, risk_level }),
                }
            }
            TurnOutcome::Rejected { violations } => {
                let message = violations.join("; ");
                mux.error(message.as_str()).await;
                OrchestrationResult {
                    response: String::new(),
                    agents_used: vec![],
                    turn_count: conversation.turn_count,
                    duration_seconds,
                    cost_breakdown: OrchestrationResult::empty_cost(),
                    routing,
                    error: Some(message),
                    blocked: Some(true),
                    circuit_breaker: None,
                    paused: None,
                }
            }
            TurnOutcome::NoEligibleAgent => {
                mux.error("no eligible agent").await;
                let candidates = self.agents.list();
                let all_circuits_open = !candidates.is_empty()
                    && candidates
                        .iter()
                        .all(|a| self.circuit_for(&a.id).state() == CircuitState::Open);
                OrchestrationResult {
                    response: String::new(),
                    agents_used: vec![],
                    turn_count: conversation.turn_count,
                    duration_seconds,
                    cost_breakdown: OrchestrationResult::empty_cost(),
                    routing,
                    error: Some("no eligible agent for this turn".to_string()),
                    blocked: None,
                    circuit_breaker: if all_circuits_open { Some("open".to_string()) } else { None },
                    paused: None,
                }
            }
            TurnOutcome::Cancelled { agent_id } => {
                mux.finish("", "cancelled").await;
                OrchestrationResult {
                    response: String::new(),
                    agents_used: vec![agent_id],
                    turn_count: conversation.turn_count,
                    duration_seconds,
                    cost_breakdown: OrchestrationResult::empty_cost(),
                    routing,
                    error: Some("turn cancelled".to_string()),
                    blocked: None,
                    circuit_breaker: None,
                    paused: None,
                }
            }
            TurnOutcome::ProviderError { agent_id, message } => {
                mux.error(message.as_str()).await;
                OrchestrationResult {
                    response: String::new(),
                    agents_used: vec![agent_id],
                    turn_count: conversation.turn_count,
                    duration_seconds,
                    cost_breakdown: OrchestrationResult::empty_cost(),
                    routing,
                    error: Some(message),
                    blocked: None,
                    circuit_breaker: None,
                    paused: None,
                }
            }
            TurnOutcome::Responded { .. } => {
                unreachable!("Responded is folded by the turn loop, never handed to this branch")
            }
        }
    }

    /// Snapshot overall health: per-agent health plus circuit states.
    pub fn health_summary(&self) -> HashMap<String, bool> {
        let snapshot = self.health.snapshot();
        self.agents
            .list()
            .into_iter()
            .map(|a| {
                let healthy = snapshot.get(&a.id).map(|h| h.healthy).unwrap_or(true);
                (a.id.clone(), healthy)
            })
            .collect()
    }

    /// Reset all per-agent circuit breakers back to a clean slate. Used
    /// after an operator intervention (e.g. a provider outage is resolved).
    pub fn reset(&self) {
        self.circuits.lock().clear();
    }

    /// Cancel an in-flight turn for `conversation_id`, if one is running.
    /// Returns `true` if a running turn was found and signalled.
    pub fn cancel_turn(&self, conversation_id: &str) -> bool {
        self.cancel_map.cancel(conversation_id)
    }
}
