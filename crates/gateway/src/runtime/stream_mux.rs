//! Streaming multiplexer (C8) — fans per-agent stream events into a single
//! externally-consumable event sequence with backpressure, heartbeats, and
//! a tool-call/tool-result correlation table.
//!
//! Named `MuxEvent` rather than `StreamEvent` to avoid colliding with
//! [`conclave_domain::stream::StreamEvent`], the lower-level provider-chunk
//! event this component consumes as input. Every session emits exactly one
//! `Final` or `Error` event before its channel closes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

const DEFAULT_WINDOW_SIZE: usize = 10;
const DEFAULT_MAX_BUFFER_SIZE: usize = 50;
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MuxEventKind {
    Text,
    ToolCall,
    ToolResult,
    Handoff,
    Error,
    Status,
    Heartbeat,
    Final,
}

#[derive(Debug, Clone, Serialize)]
pub struct MuxEvent {
    pub chunk_id: u64,
    pub session_id: String,
    pub agent: Option<String>,
    pub kind: MuxEventKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// One entry in the tool-call/tool-result correlation table: tracks a
/// started call until its matching result arrives.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub agent: String,
    pub tool_name: String,
    pub arguments: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The structured payload carried by the one `Final` event a session ever
/// emits.
#[derive(Debug, Clone, Serialize)]
pub struct FinalPayload {
    pub total_events: u64,
    pub final_message: String,
    pub tools_used: Vec<String>,
    pub status: String,
}

/// Backpressure-aware multiplexer for a single conversation's output
/// stream. `window_size` is the number of in-flight, not-yet-acked chunks
/// allowed before an adaptive delay is introduced; `max_buffer_size` is the
/// hard cap before the producer blocks outright.
pub struct StreamMux {
    session_id: String,
    window_size: usize,
    max_buffer_size: usize,
    heartbeat_interval: Duration,
    tx: mpsc::Sender<MuxEvent>,
    next_chunk_id: std::sync::atomic::AtomicU64,
    in_flight: std::sync::atomic::AtomicUsize,
    finished: std::sync::atomic::AtomicBool,
    tool_calls: Mutex<HashMap<String, ToolCallRecord>>,
}

impl StreamMux {
    pub fn new(session_id: impl Into<String>) -> (Arc<Self>, mpsc::Receiver<MuxEvent>) {
        Self::with_config(
            session_id,
            DEFAULT_WINDOW_SIZE,
            DEFAULT_MAX_BUFFER_SIZE,
            DEFAULT_HEARTBEAT_INTERVAL,
        )
    }

    pub fn with_config(
        session_id: impl Into<String>,
        window_size: usize,
        max_buffer_size: usize,
        heartbeat_interval: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<MuxEvent>) {
        let (tx, rx) = mpsc::channel(max_buffer_size);
        let mux = Arc::new(Self {
            session_id: session_id.into(),
            window_size,
            max_buffer_size,
            heartbeat_interval,
            tx,
            next_chunk_id: std::sync::atomic::AtomicU64::new(0),
            in_flight: std::sync::atomic::AtomicUsize::new(0),
            finished: std::sync::atomic::AtomicBool::new(false),
            tool_calls: Mutex::new(HashMap::new()),
        });
        (mux, rx)
    }

    /// Delay to apply before sending the next chunk, based on current
    /// in-flight depth relative to the configured window. Linear ramp from
    /// 0ms at `window_size` in-flight to 100ms at `max_buffer_size`.
    fn adaptive_delay(&self) -> Duration {
        let depth = self.in_flight.load(std::sync::atomic::Ordering::Acquire);
        if depth <= self.window_size {
            return Duration::ZERO;
        }
        let span = (self.max_buffer_size - self.window_size).max(1);
        let over = (depth - self.window_size).min(span);
        Duration::from_millis((over as u64 * 100) / span as u64)
    }

    async fn send(&self, kind: MuxEventKind, agent: Option<String>, content: String, metadata: Option<serde_json::Value>) {
        if self.finished.load(std::sync::atomic::Ordering::Acquire) {
            tracing::warn!(session_id = %self.session_id, "dropping event after stream finished");
            return;
        }

        let delay = self.adaptive_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let chunk_id = self
            .next_chunk_id
            .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
        self.in_flight.fetch_add(1, std::sync::atomic::Ordering::AcqRel);

        let is_terminal = matches!(kind, MuxEventKind::Final | MuxEventKind::Error);
        if is_terminal {
            self.finished.store(true, std::sync::atomic::Ordering::Release);
        }

        let event = MuxEvent {
            chunk_id,
            session_id: self.session_id.clone(),
            agent,
            kind,
            content,
            timestamp: Utc::now(),
            metadata,
        };

        if self.tx.send(event).await.is_err() {
            tracing::warn!(session_id = %self.session_id, "mux receiver dropped");
        }
        self.in_flight.fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
    }

    pub async fn text(&self, agent: &str, text: impl Into<String>) {
        self.send(MuxEventKind::Text, Some(agent.to_string()), text.into(), None)
            .await;
    }

    pub async fn tool_call(&self, agent: &str, description: impl Into<String>) {
        self.send(MuxEventKind::ToolCall, Some(agent.to_string()), description.into(), None)
            .await;
    }

    pub async fn tool_result(&self, agent: &str, result: impl Into<String>) {
        self.send(MuxEventKind::ToolResult, Some(agent.to_string()), result.into(), None)
            .await;
    }

    /// Record a tool call starting in the correlation table and emit the
    /// corresponding `ToolCall` event.
    pub async fn tool_call_started(&self, agent: &str, call_id: &str, tool_name: &str) {
        self.tool_calls.lock().insert(
            call_id.to_string(),
            ToolCallRecord {
                agent: agent.to_string(),
                tool_name: tool_name.to_string(),
                arguments: None,
                started_at: Utc::now(),
                completed_at: None,
            },
        );
        self.tool_call(agent, format!("{tool_name} ({call_id})")).await;
    }

    /// Record a tool call's arguments and completion time in the
    /// correlation table, and emit the corresponding `ToolResult` event.
    /// A `call_id` with no matching `tool_call_started` entry is recorded
    /// under an `"unknown"` tool name rather than dropped.
    pub async fn tool_call_finished(&self, agent: &str, call_id: &str, arguments: serde_json::Value) {
        {
            let mut table = self.tool_calls.lock();
            let record = table.entry(call_id.to_string()).or_insert_with(|| ToolCallRecord {
                agent: agent.to_string(),
                tool_name: "unknown".to_string(),
                arguments: None,
                started_at: Utc::now(),
                completed_at: None,
            });
            record.arguments = Some(arguments.clone());
            record.completed_at = Some(Utc::now());
        }
        self.tool_result(agent, arguments.to_string()).await;
    }

    /// Snapshot the tool-call correlation table built up so far.
    pub fn tool_call_table(&self) -> HashMap<String, ToolCallRecord> {
        self.tool_calls.lock().clone()
    }

    pub async fn handoff(&self, from_agent: &str, to_agent: &str) {
        self.send(
            MuxEventKind::Handoff,
            Some(from_agent.to_string()),
            to_agent.to_string(),
            None,
        )
        .await;
    }

    pub async fn status(&self, content: impl Into<String>) {
        self.send(MuxEventKind::Status, None, content.into(), None).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.send(MuxEventKind::Error, None, message.into(), None).await;
    }

    /// Emit the session's one terminal `Final` event, carrying the
    /// concatenated response text, the tool names used (from the
    /// correlation table), and a caller-supplied status (e.g.
    /// `"completed"`, `"cancelled"`).
    pub async fn finish(&self, final_message: impl Into<String>, status: impl Into<String>) {
        let mut tools_used: Vec<String> = self
            .tool_calls
            .lock()
            .values()
            .map(|r| r.tool_name.clone())
            .collect();
        tools_used.sort();
        tools_used.dedup();

        let final_message = final_message.into();
        // +1 accounts for this Final event itself, which hasn't been
        // assigned a chunk id yet.
        let total_events = self.next_chunk_id.load(std::sync::atomic::Ordering::Acquire) + 1;
        let payload = FinalPayload {
            total_events,
            final_message: final_message.clone(),
            tools_used,
            status: status.into(),
        };
        let metadata = serde_json::to_value(&payload).ok();
        self.send(MuxEventKind::Final, None, final_message, metadata).await;
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Emit periodic heartbeats until the stream finishes. Intended to run
    /// concurrently with the turn loop; exits as soon as a terminal event
    /// has been sent.
    pub async fn run_heartbeat(self: Arc<Self>) {
        let mut last = Instant::now();
        loop {
            if self.finished.load(std::sync::atomic::Ordering::Acquire) {
                return;
            }
            tokio::time::sleep(self.heartbeat_interval).await;
            if self.finished.load(std::sync::atomic::Ordering::Acquire) {
                return;
            }
            let elapsed = last.elapsed();
            last = Instant::now();
            self.send(
                MuxEventKind::Heartbeat,
                None,
                format!("{}ms since last heartbeat", elapsed.as_millis()),
                None,
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_text_then_final() {
        let (mux, mut rx) = StreamMux::new("s1");
        mux.text("agent-a", "hello").await;
        mux.finish("done", "completed").await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.kind, MuxEventKind::Text));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.kind, MuxEventKind::Final));
        assert!(second.metadata.is_some());
        assert!(rx.recv().await.is_none() || rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn events_after_terminal_are_dropped() {
        let (mux, mut rx) = StreamMux::new("s1");
        mux.finish("done", "completed").await;
        mux.text("agent-a", "too late").await;

        let only = rx.recv().await.unwrap();
        assert!(matches!(only.kind, MuxEventKind::Final));
    }

    #[tokio::test]
    async fn chunk_ids_are_monotonic() {
        let (mux, mut rx) = StreamMux::new("s1");
        mux.text("a", "one").await;
        mux.text("a", "two").await;
        mux.finish("done", "completed").await;

        let c0 = rx.recv().await.unwrap().chunk_id;
        let c1 = rx.recv().await.unwrap().chunk_id;
        let c2 = rx.recv().await.unwrap().chunk_id;
        assert!(c0 < c1 && c1 < c2);
    }

    #[test]
    fn adaptive_delay_is_zero_within_window() {
        let (mux, _rx) = StreamMux::with_config("s1", 10, 50, Duration::from_secs(30));
        mux.in_flight.store(5, std::sync::atomic::Ordering::Release);
        assert_eq!(mux.adaptive_delay(), Duration::ZERO);
    }

    #[test]
    fn adaptive_delay_ramps_up_past_window() {
        let (mux, _rx) = StreamMux::with_config("s1", 10, 50, Duration::from_secs(30));
        mux.in_flight.store(50, std::sync::atomic::Ordering::Release);
        assert_eq!(mux.adaptive_delay(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn tool_call_lifecycle_populates_correlation_table() {
        let (mux, mut rx) = StreamMux::new("s1");
        mux.tool_call_started("agent-a", "call-1", "search").await;
        mux.tool_call_finished("agent-a", "call-1", serde_json::json!({"results": 3}))
            .await;

        let table = mux.tool_call_table();
        let record = &table["call-1"];
        assert_eq!(record.tool_name, "search");
        assert!(record.completed_at.is_some());
        assert!(record.arguments.is_some());

        assert!(matches!(rx.recv().await.unwrap().kind, MuxEventKind::ToolCall));
        assert!(matches!(rx.recv().await.unwrap().kind, MuxEventKind::ToolResult));
    }

    #[tokio::test]
    async fn finish_reports_tools_used_and_total_events() {
        let (mux, mut rx) = StreamMux::new("s1");
        mux.text("a", "hi").await;
        mux.tool_call_started("a", "call-1", "search").await;
        mux.tool_call_finished("a", "call-1", serde_json::json!({})).await;
        mux.finish("all done", "completed").await;

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        let payload: FinalPayload = serde_json::from_value(last.unwrap().metadata.unwrap()).unwrap();
        assert_eq!(payload.total_events, 4);
        assert_eq!(payload.tools_used, vec!["search".to_string()]);
        assert_eq!(payload.status, "completed");
    }
}
