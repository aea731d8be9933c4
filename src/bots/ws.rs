use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use super::api::SharedState;
use super::events::{RunEvent, Subscription};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Comma-separated topic patterns joined on connect
    #[serde(default)]
    pub topics: Option<String>,
}

/// Subscription changes sent by the client as text frames.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Join { topic: String },
    Leave { topic: String },
}

/// An event as delivered to clients, tagged with its topic.
#[derive(Serialize)]
struct EventFrame<'a> {
    topic: String,
    #[serde(flatten)]
    event: &'a RunEvent,
}

pub fn parse_topics(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

pub fn encode_event(event: &RunEvent) -> serde_json::Result<String> {
    serde_json::to_string(&EventFrame {
        topic: event.topic(),
        event,
    })
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let topics = parse_topics(query.topics.as_deref());
    let subscription = state.orchestrator.events().subscribe(topics);
    ws.on_upgrade(move |socket| handle_socket(socket, subscription))
}

async fn handle_socket(socket: WebSocket, subscription: Subscription) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, subscription).await;
}

enum Step {
    Ping,
    Event(Option<RunEvent>),
    Client(Option<Result<Message, axum::Error>>),
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards matching events, applies join/leave requests from the client,
/// and pings periodically. If no Pong arrives within [`PONG_TIMEOUT`] the
/// connection is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: Subscription,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        let step = tokio::select! {
            _ = ping_interval.tick() => Step::Ping,
            event = subscription.recv() => Step::Event(event),
            msg = receiver.next() => Step::Client(msg),
        };

        match step {
            // ── Periodic ping ───────────────────────────────────────
            Step::Ping => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("WebSocket client missed pong; closing");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Event forwarding ────────────────────────────────────
            Step::Event(Some(event)) => match encode_event(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to serialize run event"),
            },
            Step::Event(None) => break,

            // ── Client messages ─────────────────────────────────────
            Step::Client(Some(Ok(Message::Pong(_)))) => {
                last_pong = Instant::now();
                awaiting_pong = false;
            }
            Step::Client(Some(Ok(Message::Text(text)))) => {
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::Join { topic }) => subscription.join(topic),
                    Ok(ClientMessage::Leave { topic }) => subscription.leave(&topic),
                    Err(e) => tracing::debug!(error = %e, "Ignoring malformed client message"),
                }
            }
            Step::Client(Some(Ok(Message::Close(_)))) | Step::Client(None) => break,
            Step::Client(Some(Ok(_))) => {}
            Step::Client(Some(Err(_))) => break,
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

// ── Tests ────────────────────────────────────────────────────────────
