//! Cost / token tracker (C5) — per-conversation token usage and spend,
//! with budget-breach detection.
//!
//! Pricing is a static per-model table, keyed on the model name returned
//! by the provider; anything not in the table falls back to the `gpt-4`
//! row rather than silently costing nothing. Breach notifications fire
//! exactly once per conversation, the first time cumulative spend crosses
//! the configured budget.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use conclave_domain::cost::Cost;
use conclave_domain::trace::TraceEvent;

/// Dollars per million tokens, (prompt, completion).
struct Pricing {
    prompt_per_million: f64,
    completion_per_million: f64,
}

/// Look up a model's pricing row, falling back to `gpt-4` for anything not
/// in the table rather than silently costing nothing.
fn price_for(model: &str) -> &'static Pricing {
    match model {
        "gpt-4-turbo" => &PRICE_GPT4_TURBO,
        "gpt-3.5-turbo" => &PRICE_GPT35_TURBO,
        "claude-3-opus" => &PRICE_CLAUDE_OPUS,
        "claude-3-sonnet" => &PRICE_CLAUDE_SONNET,
        "claude-3-haiku" => &PRICE_CLAUDE_HAIKU,
        _ => &PRICE_GPT4,
    }
}

static PRICE_GPT4: Pricing = Pricing {
    prompt_per_million: 30.0,
    completion_per_million: 60.0,
};
static PRICE_GPT4_TURBO: Pricing = Pricing {
    prompt_per_million: 10.0,
    completion_per_million: 30.0,
};
static PRICE_GPT35_TURBO: Pricing = Pricing {
    prompt_per_million: 0.5,
    completion_per_million: 1.5,
};
static PRICE_CLAUDE_OPUS: Pricing = Pricing {
    prompt_per_million: 15.0,
    completion_per_million: 75.0,
};
static PRICE_CLAUDE_SONNET: Pricing = Pricing {
    prompt_per_million: 3.0,
    completion_per_million: 15.0,
};
static PRICE_CLAUDE_HAIKU: Pricing = Pricing {
    prompt_per_million: 0.25,
    completion_per_million: 1.25,
};

#[derive(Debug, Clone)]
pub struct TurnTokenUsage {
    pub turn_number: u32,
    pub agent_id: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost: Cost,
}

/// Running total for a single agent within a conversation.
#[derive(Debug, Clone, Default)]
pub struct AgentUsageSummary {
    pub turns: u32,
    pub tokens: u64,
    pub cost: Cost,
}

impl AgentUsageSummary {
    pub fn avg_cost_per_turn(&self) -> Cost {
        self.cost.div_by(self.turns)
    }
}

/// A snapshot or live view of one conversation's token/cost ledger, per
/// spec's `ConversationTokenTimeline`.
#[derive(Debug, Clone)]
pub struct Timeline {
    pub conversation_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub turns: Vec<TurnTokenUsage>,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: Cost,
    pub by_agent: HashMap<String, AgentUsageSummary>,
    pub budget_limit: Option<Cost>,
    pub budget_remaining: Option<Cost>,
    /// Turn number on which cumulative spend first crossed `budget_limit`.
    pub budget_breach_turn: Option<u32>,
    /// The single most expensive turn seen so far, `(turn_number, cost_micros)`.
    pub peak_turn: Option<(u32, i64)>,
}

impl Timeline {
    fn new(conversation_id: &str, budget_limit: Option<Cost>) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            turns: Vec::new(),
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            total_tokens: 0,
            total_cost: Cost::ZERO,
            by_agent: HashMap::new(),
            budget_limit,
            budget_remaining: budget_limit,
            budget_breach_turn: None,
            peak_turn: None,
        }
    }

    pub fn avg_cost_per_turn(&self) -> Cost {
        self.total_cost.div_by(self.turns.len() as u32)
    }
}

/// Result of projecting spend forward by `future_turns` more turns at the
/// conversation's average cost-per-turn.
#[derive(Debug, Clone)]
pub struct BreachSimulation {
    pub current: Cost,
    pub projected: Cost,
    pub will_breach: bool,
    /// How many of `future_turns` it takes to cross the budget, if any.
    pub turns_until_breach: Option<u32>,
}

/// Per-conversation token/cost ledger plus the breach callback fan-out.
pub struct TokenTracker {
    timelines: Mutex<HashMap<String, Timeline>>,
    callbacks: Mutex<Vec<Arc<dyn Fn(&str, u32, Cost, Cost) + Send + Sync>>>,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self {
            timelines: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Idempotent on `conversation_id`: returns the existing timeline if one
    /// is already tracked instead of overwriting its accumulated turns.
    pub fn start_conversation(&self, conversation_id: &str, budget: Option<Cost>) -> Timeline {
        let mut timelines = self.timelines.lock();
        if let Some(existing) = timelines.get(conversation_id) {
            return existing.clone();
        }
        let timeline = Timeline::new(conversation_id, budget);
        timelines.insert(conversation_id.to_string(), timeline.clone());
        timeline
    }

    /// Mark a conversation's timeline as ended. Does not remove it — callers
    /// can still read totals afterward. Returns `None` if the conversation
    /// was never started.
    pub fn end_conversation(&self, conversation_id: &str) -> Option<Timeline> {
        let mut timelines = self.timelines.lock();
        let timeline = timelines.get_mut(conversation_id)?;
        if timeline.ended_at.is_none() {
            timeline.ended_at = Some(Utc::now());
        }
        Some(timeline.clone())
    }

    /// Project spend `future_turns` further out at the conversation's
    /// current average cost-per-turn, without recording anything. Returns
    /// `None` if the conversation has no timeline yet.
    pub fn simulate_breach(&self, conversation_id: &str, future_turns: u32) -> Option<BreachSimulation> {
        let timelines = self.timelines.lock();
        let timeline = timelines.get(conversation_id)?;
        let avg = timeline.avg_cost_per_turn();
        let mut projected = timeline.total_cost;
        for _ in 0..future_turns {
            projected += avg;
        }
        let will_breach = match timeline.budget_limit {
            Some(budget) => projected > budget,
            None => false,
        };
        let turns_until_breach = match (timeline.budget_limit, will_breach) {
            (Some(budget), true) if !avg.is_zero() => {
                let mut running = timeline.total_cost;
                let mut n = 0;
                while running <= budget && n < future_turns {
                    running += avg;
                    n += 1;
                }
                Some(n)
            }
            (Some(_), true) => Some(1),
            _ => None,
        };
        Some(BreachSimulation {
            current: timeline.total_cost,
            projected,
            will_breach,
            turns_until_breach,
        })
    }

    /// Register a callback invoked the first time a conversation's spend
    /// breaches its budget, with the turn number that triggered it. Callback
    /// failures (panics) are isolated per listener and never abort the
    /// others.
    pub fn on_breach(&self, callback: Arc<dyn Fn(&str, u32, Cost, Cost) + Send + Sync>) {
        self.callbacks.lock().push(callback);
    }

    /// Estimate token counts from text length when a provider doesn't
    /// report exact usage: ~4 characters per token, rounded up.
    pub fn estimate_tokens(text: &str) -> u32 {
        ((text.len() as f64 / 4.0).ceil() as u32).max(1)
    }

    pub fn record_turn(
        &self,
        conversation_id: &str,
        turn_number: u32,
        agent_id: &str,
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
    ) -> Cost {
        let pricing = price_for(model);
        let cost = Cost::for_tokens(prompt_tokens, pricing.prompt_per_million)
            + Cost::for_tokens(completion_tokens, pricing.completion_per_million);

        let mut timelines = self.timelines.lock();
        let timeline = timelines
            .entry(conversation_id.to_string())
            .or_insert_with(|| Timeline::new(conversation_id, None));
        timeline.turns.push(TurnTokenUsage {
            turn_number,
            agent_id: agent_id.to_string(),
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
            cost,
        });
        timeline.total_prompt_tokens += prompt_tokens as u64;
        timeline.total_completion_tokens += completion_tokens as u64;
        timeline.total_tokens += (prompt_tokens + completion_tokens) as u64;
        timeline.total_cost += cost;

        let agent_summary = timeline.by_agent.entry(agent_id.to_string()).or_default();
        agent_summary.turns += 1;
        agent_summary.tokens += (prompt_tokens + completion_tokens) as u64;
        agent_summary.cost += cost;

        let is_new_peak = timeline
            .peak_turn
            .map(|(_, peak)| cost.as_micros() > peak)
            .unwrap_or(true);
        if is_new_peak {
            timeline.peak_turn = Some((turn_number, cost.as_micros()));
        }

        if let Some(budget) = timeline.budget_limit {
            timeline.budget_remaining = Some(budget - timeline.total_cost);
        }

        let breach = match timeline.budget_limit {
            Some(budget) if timeline.budget_breach_turn.is_none() && timeline.total_cost > budget => {
                timeline.budget_breach_turn = Some(turn_number);
                Some((budget, timeline.total_cost))
            }
            _ => None,
        };
        drop(timelines);

        if let Some((budget, spent)) = breach {
            TraceEvent::BudgetBreach {
                conversation_id: conversation_id.to_string(),
                budget_micros: budget.as_micros(),
                spent_micros: spent.as_micros(),
            }
            .emit();
            for cb in self.callbacks.lock().iter() {
                cb(conversation_id, turn_number, budget, spent);
            }
        }

        cost
    }

    pub fn total_cost(&self, conversation_id: &str) -> Cost {
        self.timelines
            .lock()
            .get(conversation_id)
            .map(|t| t.total_cost)
            .unwrap_or(Cost::ZERO)
    }

    pub fn turns(&self, conversation_id: &str) -> Vec<TurnTokenUsage> {
        self.timelines
            .lock()
            .get(conversation_id)
            .map(|t| t.turns.clone())
            .unwrap_or_default()
    }

    pub fn has_breached(&self, conversation_id: &str) -> bool {
        self.timelines
            .lock()
            .get(conversation_id)
            .map(|t| t.budget_breach_turn.is_some())
            .unwrap_or(false)
    }

    pub fn timeline(&self, conversation_id: &str) -> Option<Timeline> {
        self.timelines.lock().get(conversation_id).cloned()
    }
}

impl Default for TokenTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unknown_model_falls_back_to_gpt4_pricing() {
        let tracker = TokenTracker::new();
        tracker.start_conversation("c1", None);
        let cost = tracker.record_turn("c1", 1, "a1", "some-unlisted-model", 1_000_000, 0);
        assert_eq!(cost, Cost::from_dollars(30.0));
    }

    #[test]
    fn known_model_uses_its_own_pricing() {
        let tracker = TokenTracker::new();
        tracker.start_conversation("c1", None);
        let cost = tracker.record_turn("c1", 1, "a1", "claude-3-haiku", 1_000_000, 1_000_000);
        assert_eq!(cost, Cost::from_dollars(0.25 + 1.25));
    }

    #[test]
    fn breach_fires_exactly_once_with_turn_number() {
        let tracker = TokenTracker::new();
        tracker.start_conversation("c1", Some(Cost::from_dollars(0.01)));
        let fire_count = Arc::new(AtomicUsize::new(0));
        let breach_turn = Arc::new(Mutex::new(0u32));
        let counter = fire_count.clone();
        let turn_slot = breach_turn.clone();
        tracker.on_breach(Arc::new(move |_, turn, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            *turn_slot.lock() = turn;
        }));

        tracker.record_turn("c1", 1, "a1", "claude-3-haiku", 1_000_000, 1_000_000);
        tracker.record_turn("c1", 2, "a1", "claude-3-haiku", 1_000_000, 1_000_000);
        tracker.record_turn("c1", 3, "a1", "claude-3-haiku", 1_000_000, 1_000_000);

        assert_eq!(fire_count.load(Ordering::SeqCst), 1);
        assert!(tracker.has_breached("c1"));
        assert_eq!(*breach_turn.lock(), 3);
        assert_eq!(tracker.timeline("c1").unwrap().budget_breach_turn, Some(3));
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(TokenTracker::estimate_tokens("abcd"), 1);
        assert_eq!(TokenTracker::estimate_tokens("abcde"), 2);
        assert_eq!(TokenTracker::estimate_tokens(""), 1);
    }

    #[test]
    fn total_cost_accumulates_across_turns() {
        let tracker = TokenTracker::new();
        tracker.start_conversation("c1", None);
        tracker.record_turn("c1", 1, "a1", "gpt-3.5-turbo", 1000, 1000);
        tracker.record_turn("c1", 2, "a1", "gpt-3.5-turbo", 1000, 1000);
        let turns = tracker.turns("c1");
        assert_eq!(turns.len(), 2);
        assert_eq!(tracker.total_cost("c1"), turns[0].cost + turns[1].cost);
    }

    #[test]
    fn start_conversation_is_idempotent() {
        let tracker = TokenTracker::new();
        tracker.start_conversation("c1", Some(Cost::from_dollars(1.0)));
        tracker.record_turn("c1", 1, "a1", "gpt-3.5-turbo", 1000, 1000);
        // A second start_conversation call for the same id must not wipe
        // out the turn recorded above.
        tracker.start_conversation("c1", Some(Cost::from_dollars(2.0)));
        assert_eq!(tracker.turns("c1").len(), 1);
        assert_eq!(tracker.timeline("c1").unwrap().budget_limit, Some(Cost::from_dollars(1.0)));
    }

    #[test]
    fn by_agent_tracks_per_agent_totals() {
        let tracker = TokenTracker::new();
        tracker.start_conversation("c1", None);
        tracker.record_turn("c1", 1, "alice", "gpt-3.5-turbo", 1000, 1000);
        tracker.record_turn("c1", 2, "bob", "gpt-3.5-turbo", 1000, 1000);
        tracker.record_turn("c1", 3, "alice", "gpt-3.5-turbo", 1000, 1000);

        let timeline = tracker.timeline("c1").unwrap();
        assert_eq!(timeline.by_agent["alice"].turns, 2);
        assert_eq!(timeline.by_agent["bob"].turns, 1);
    }

    #[test]
    fn peak_turn_tracks_the_most_expensive_turn() {
        let tracker = TokenTracker::new();
        tracker.start_conversation("c1", None);
        tracker.record_turn("c1", 1, "a1", "gpt-3.5-turbo", 100, 100);
        tracker.record_turn("c1", 2, "a1", "claude-3-opus", 1_000_000, 1_000_000);
        tracker.record_turn("c1", 3, "a1", "gpt-3.5-turbo", 100, 100);

        let timeline = tracker.timeline("c1").unwrap();
        assert_eq!(timeline.peak_turn.unwrap().0, 2);
    }

    #[test]
    fn simulate_breach_projects_future_spend() {
        let tracker = TokenTracker::new();
        tracker.start_conversation("c1", Some(Cost::from_dollars(2.0)));
        tracker.record_turn("c1", 1, "a1", "claude-3-haiku", 1_000_000, 1_000_000); // $1.50, under budget
        let sim = tracker.simulate_breach("c1", 1).unwrap();
        assert!(sim.will_breach);
        assert_eq!(sim.turns_until_breach, Some(1));
    }

    #[test]
    fn simulate_breach_reports_no_breach_within_window() {
        let tracker = TokenTracker::new();
        tracker.start_conversation("c1", Some(Cost::from_dollars(100.0)));
        tracker.record_turn("c1", 1, "a1", "claude-3-haiku", 1_000_000, 1_000_000);
        let sim = tracker.simulate_breach("c1", 2).unwrap();
        assert!(!sim.will_breach);
        assert_eq!(sim.turns_until_breach, None);
    }

    #[test]
    fn end_conversation_stamps_ended_at_without_clearing_totals() {
        let tracker = TokenTracker::new();
        tracker.start_conversation("c1", None);
        tracker.record_turn("c1", 1, "a1", "gpt-3.5-turbo", 1000, 1000);
        let ended = tracker.end_conversation("c1").unwrap();
        assert!(ended.ended_at.is_some());
        assert_eq!(ended.turns.len(), 1);
    }

    #[test]
    fn end_conversation_on_unknown_id_returns_none() {
        let tracker = TokenTracker::new();
        assert!(tracker.end_conversation("no-such-id").is_none());
    }
}
