//! Best-effort progress events.
//!
//! Every event belongs to one topic: `run.<id>.log` for log lines and
//! `run.<id>.status` for status changes. Subscribers join topics (a `*`
//! segment matches any single segment, so `run.*.status` follows every run)
//! and receive events at most once. Nothing is replayed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::models::{LogEntry, RunResult, RunStatus};

/// Capacity of the underlying broadcast channel. Slow subscribers that fall
/// further behind than this skip the missed events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum RunEvent {
    RunLog {
        run_id: i64,
        entry: LogEntry,
    },
    RunStatus {
        run_id: i64,
        job_id: i64,
        status: RunStatus,
        error: Option<String>,
        result: Option<RunResult>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> i64 {
        match self {
            Self::RunLog { run_id, .. } | Self::RunStatus { run_id, .. } => *run_id,
        }
    }

    pub fn topic(&self) -> String {
        match self {
            Self::RunLog { run_id, .. } => log_topic(*run_id),
            Self::RunStatus { run_id, .. } => status_topic(*run_id),
        }
    }
}

pub fn log_topic(run_id: i64) -> String {
    format!("run.{}.log", run_id)
}

pub fn status_topic(run_id: i64) -> String {
    format!("run.{}.status", run_id)
}

/// Whether `pattern` selects `topic`. Segments are dot-separated and `*`
/// matches exactly one segment.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('.');
    let mut topic_parts = topic.split('.');
    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (None, None) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            _ => return false,
        }
    }
}

/// Fan-out point for run events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe with an initial set of topic patterns.
    pub fn subscribe<I, S>(&self, topics: I) -> Subscription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Subscription {
            rx: self.tx.subscribe(),
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live, filtered view of the event stream.
pub struct Subscription {
    rx: broadcast::Receiver<RunEvent>,
    topics: BTreeSet<String>,
}

impl Subscription {
    pub fn join(&mut self, topic: impl Into<String>) {
        self.topics.insert(topic.into());
    }

    pub fn leave(&mut self, topic: &str) {
        self.topics.remove(topic);
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    fn wants(&self, topic: &str) -> bool {
        self.topics.iter().any(|p| topic_matches(p, topic))
    }

    /// Next event on a joined topic, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.wants(&event.topic()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-buffered event on a joined topic, without waiting.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.wants(&event.topic()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged; events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
