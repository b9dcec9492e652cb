//! Speaker selector (C2) — scores every eligible agent for the next turn
//! and picks the best match.
//!
//! Scoring is a weighted linear combination over six signals, then a set of
//! turn-based adjustments (recency penalty, early/late-turn boosts, urgency
//! boost). Ties are broken by agent id so selection stays deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use conclave_domain::conversation::{
    Agent, ConversationMessage, MissionPhase, SelectionContext,
};

const W_PHASE_RELEVANCE: f64 = 0.25;
const W_EXPERTISE_MATCH: f64 = 0.30;
const W_KEYWORD_MATCH: f64 = 0.20;
const W_COMPLEXITY_FIT: f64 = 0.10;
const W_HISTORICAL_QUALITY: f64 = 0.10;
const W_URGENCY_BONUS: f64 = 0.05;

/// Per-agent, per-turn score with its components broken out for
/// introspection and debugging.
#[derive(Debug, Clone)]
pub struct AgentScore {
    pub agent_id: String,
    pub total: f64,
    pub phase_relevance: f64,
    pub expertise_match: f64,
    pub keyword_match: f64,
    pub complexity_fit: f64,
    pub historical_quality: f64,
    pub urgency_bonus: f64,
    pub recency_penalty: f64,
}

pub struct SpeakerSelector;

impl SpeakerSelector {
    pub fn new() -> Self {
        Self
    }

    /// Score every candidate and return them sorted highest-first. Ties on
    /// total score are broken by agent id, ascending, for determinism.
    pub fn score_all(&self, candidates: &[Arc<Agent>], ctx: &SelectionContext) -> Vec<AgentScore> {
        let mut scored: Vec<AgentScore> = candidates
            .iter()
            .map(|agent| self.score_one(agent, ctx))
            .collect();

        scored.sort_by(|a, b| {
            b.total
                .partial_cmp(&a.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        scored
    }

    /// Pick the single best candidate, or `None` if `candidates` is empty.
    pub fn select(&self, candidates: &[Arc<Agent>], ctx: &SelectionContext) -> Option<AgentScore> {
        self.score_all(candidates, ctx).into_iter().next()
    }

    /// Whether the top-scoring candidate dominates the runner-up by at
    /// least `margin` — the orchestrator's signal that a message can go to
    /// one agent directly instead of opening a full group chat. `false` for
    /// zero or one candidates: with nothing to compare against, routing
    /// falls back to whatever the caller does when there's no clear winner.
    pub fn should_use_single_agent(
        &self,
        candidates: &[Arc<Agent>],
        ctx: &SelectionContext,
        margin: f64,
    ) -> bool {
        match self.score_all(candidates, ctx).as_slice() {
            [top, runner_up, ..] => (top.total - runner_up.total) >= margin,
            _ => false,
        }
    }

    fn score_one(&self, agent: &Agent, ctx: &SelectionContext) -> AgentScore {
        let phase_relevance = agent
            .phase_affinity
            .get(phase_key(ctx.phase))
            .copied()
            .unwrap_or(0.0);

        let expertise_match = expertise_overlap(&agent.expertise_domains, &ctx.required_expertise);
        let keyword_match = keyword_overlap(&agent.keywords, &ctx.last_message);
        let complexity_fit = complexity_fit(agent.max_complexity, ctx.complexity);
        let historical_quality = agent.quality.clamp(0.0, 1.0);
        let urgency_bonus = ctx.urgency.clamp(0.0, 1.0);

        let mut total = phase_relevance * W_PHASE_RELEVANCE
            + expertise_match * W_EXPERTISE_MATCH
            + keyword_match * W_KEYWORD_MATCH
            + complexity_fit * W_COMPLEXITY_FIT
            + historical_quality * W_HISTORICAL_QUALITY
            + urgency_bonus * W_URGENCY_BONUS;

        // Recency penalty: speaking in either of the last 2 turns costs 0.15,
        // tapering to 0.05 for a speaker from 3-5 turns back.
        let recency_penalty = recency_penalty(&agent.id, &ctx.previous_speakers);
        total -= recency_penalty;

        // Early-turn boost: turns 1-2 favor broad generalists (handled by
        // the phase_relevance/expertise weights already dominating); give a
        // small flat nudge to keep the very first speaker decisive.
        if ctx.turn_number <= 2 {
            total += 0.05;
        }
        // Late-turn boost: past turn 8, nudge toward agents who haven't
        // spoken recently to avoid a single agent monopolizing the close.
        if ctx.turn_number > 8 && recency_penalty == 0.0 {
            total += 0.05;
        }
        if ctx.urgency > 0.7 {
            total += 0.1;
        }

        AgentScore {
            agent_id: agent.id.clone(),
            total,
            phase_relevance,
            expertise_match,
            keyword_match,
            complexity_fit,
            historical_quality,
            urgency_bonus,
            recency_penalty,
        }
    }
}

impl Default for SpeakerSelector {
    fn default() -> Self {
        Self::new()
    }
}

fn phase_key(phase: MissionPhase) -> &'static str {
    match phase {
        MissionPhase::Discovery => "discovery",
        MissionPhase::Analysis => "analysis",
        MissionPhase::Strategy => "strategy",
        MissionPhase::Execution => "execution",
        MissionPhase::Monitoring => "monitoring",
        MissionPhase::Optimization => "optimization",
    }
}

fn expertise_overlap(agent_domains: &[String], required: &[String]) -> f64 {
    if required.is_empty() {
        return 0.5;
    }
    let hits = required
        .iter()
        .filter(|r| agent_domains.iter().any(|d| d.eq_ignore_ascii_case(r)))
        .count();
    hits as f64 / required.len() as f64
}

fn keyword_overlap(agent_keywords: &[String], text: &str) -> f64 {
    if agent_keywords.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits = agent_keywords
        .iter()
        .filter(|kw| lower.contains(&kw.to_lowercase()))
        .count();
    (hits as f64 / agent_keywords.len() as f64).min(1.0)
}

fn complexity_fit(max_complexity: f64, required_complexity: f64) -> f64 {
    if max_complexity <= 0.0 {
        return 0.0;
    }
    if required_complexity <= max_complexity {
        1.0 - (max_complexity - required_complexity).abs() * 0.2
    } else {
        (max_complexity / required_complexity).clamp(0.0, 1.0)
    }
    .clamp(0.0, 1.0)
}

fn recency_penalty(agent_id: &str, previous_speakers: &[String]) -> f64 {
    match previous_speakers.iter().position(|s| s == agent_id) {
        Some(0) | Some(1) => 0.15,
        Some(2..=4) => 0.05,
        _ => 0.0,
    }
}

// ── Mission-phase detection ────────────────────────────────────────────

const PHASE_KEYWORDS: &[(MissionPhase, &[&str])] = &[
    (
        MissionPhase::Discovery,
        &["explore", "understand", "gather", "requirements", "discover"],
    ),
    (
        MissionPhase::Analysis,
        &["analyze", "evaluate", "assess", "compare", "investigate"],
    ),
    (
        MissionPhase::Strategy,
        &["plan", "strategy", "approach", "decide", "prioritize"],
    ),
    (
        MissionPhase::Execution,
        &["implement", "build", "execute", "deploy", "write"],
    ),
    (
        MissionPhase::Monitoring,
        &["monitor", "watch", "track", "observe", "alert"],
    ),
    (
        MissionPhase::Optimization,
        &["optimize", "improve", "refine", "tune", "speed up"],
    ),
];

/// Detect the mission phase from recent message content and turn number.
/// Early turns bias toward `Discovery`; later turns with no keyword match
/// bias toward `Execution`.
pub fn detect_phase(recent_messages: &[ConversationMessage], turn_number: u32) -> MissionPhase {
    let joined = recent_messages
        .iter()
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let mut best: Option<(MissionPhase, usize)> = None;
    for (phase, keywords) in PHASE_KEYWORDS {
        let hits = keywords.iter().filter(|kw| joined.contains(*kw)).count();
        if hits > 0 && best.map(|(_, b)| hits > b).unwrap_or(true) {
            best = Some((*phase, hits));
        }
    }

    match best {
        Some((phase, _)) => phase,
        None if turn_number <= 2 => MissionPhase::Discovery,
        None => MissionPhase::Execution,
    }
}

/// Crude complexity estimate in [0, 1] from message length and structural
/// markers (lists, code fences, multiple questions).
pub fn estimate_complexity(text: &str) -> f64 {
    let len_score = (text.len() as f64 / 800.0).min(1.0);
    let structure_hits = ["```", "\n- ", "\n1. ", "?"]
        .iter()
        .filter(|m| text.contains(**m))
        .count();
    (len_score * 0.6 + (structure_hits as f64 / 4.0) * 0.4).clamp(0.0, 1.0)
}

/// Crude urgency estimate in [0, 1] from urgency markers in the text.
pub fn estimate_urgency(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let markers = ["urgent", "asap", "immediately", "critical", "now", "!!"];
    let hits = markers.iter().filter(|m| lower.contains(*m)).count();
    (hits as f64 / 3.0).min(1.0)
}

/// Whether the required-expertise set spans more domains than any single
/// agent in `candidates` covers alone — a signal the orchestrator can use
/// to fan a turn out to more than one agent.
pub fn needs_collaboration(required_expertise: &[String], candidates: &[Arc<Agent>]) -> bool {
    if required_expertise.len() < 2 {
        return false;
    }
    !candidates.iter().any(|a| {
        required_expertise
            .iter()
            .all(|r| a.expertise_domains.iter().any(|d| d.eq_ignore_ascii_case(r)))
    })
}

/// Required expertise domains implied by the text, matched against a fixed
/// set of domain keyword bags.
pub fn extract_required_expertise(text: &str) -> Vec<String> {
    const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
        ("engineering", &["code", "implement", "bug", "refactor", "api"]),
        ("design", &["ux", "ui", "wireframe", "mockup", "layout"]),
        ("data", &["dataset", "metrics", "query", "pipeline", "sql"]),
        ("security", &["vulnerability", "exploit", "auth", "encrypt"]),
        ("product", &["roadmap", "feature", "user story", "backlog"]),
        ("legal", &["contract", "compliance", "liability", "policy"]),
        ("finance", &["budget", "cost", "revenue", "forecast"]),
        ("ops", &["deploy", "incident", "infra", "uptime", "scale"]),
    ];
    let lower = text.to_lowercase();
    DOMAIN_KEYWORDS
        .iter()
        .filter(|(_, kws)| kws.iter().any(|kw| lower.contains(kw)))
        .map(|(domain, _)| domain.to_string())
        .collect()
}
