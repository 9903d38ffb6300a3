//! # Progress Channel
//!
//! Push-based stream of sync progress built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **ProgressEvent**: one snapshot of a running session (counters, percent,
//!   current item) or its terminal outcome
//! - **ChannelMessage**: what travels on the wire; progress events plus
//!   `ping`/`pong` heartbeats used for connection liveness
//! - **ProgressChannel**: the sending side shared by every session
//! - **ProgressStream**: one observer, usually bound to a single session id
//!
//! ## Delivery Semantics
//!
//! ```text
//! ┌──────────────┐   emit    ┌─────────────────┐  subscribe(id)  ┌──────────┐
//! │ Sync Manager ├──────────>│ ProgressChannel ├────────────────>│ UI       │
//! └──────────────┘           │   (broadcast)   ├────────────────>│ Log sink │
//!                            └─────────────────┘                 └──────────┘
//! ```
//!
//! - `emit` never waits. With no observer attached the event is dropped.
//! - Every observer gets every message for its session in emission order.
//! - Each observer has a bounded buffer. An observer that falls behind by
//!   more than the buffer loses the oldest messages and is told so through
//!   `RecvError::Lagged`; the sender is never slowed down.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{ProgressChannel, ProgressEvent, ProgressKind};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let channel = ProgressChannel::new(64);
//! let mut stream = channel.subscribe("session-1");
//!
//! channel.emit(ProgressEvent::new("session-1", 0, ProgressKind::Progress));
//!
//! let event = stream.next_event().await.unwrap();
//! assert_eq!(event.sequence, 0);
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, Receiver};

use crate::config::DEFAULT_EVENT_BUFFER_SIZE;

// ============================================================================
// Event Types
// ============================================================================

/// What a [`ProgressEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Incremental update while the session runs
    Progress,
    /// Session finished; errors may be attached if some items failed
    Completed,
    /// Session aborted on a fatal error
    Error,
    /// Session stopped on request
    Cancelled,
}

impl ProgressKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressKind::Progress)
    }
}

/// Running counters carried by every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub processed: u64,
    pub added: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub errors: u64,
}

/// One progress snapshot for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: String,
    /// Strictly increasing per session, starting at 0
    pub sequence: u64,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub kind: ProgressKind,
    /// 0-100
    pub percent: u8,
    pub counters: ProgressCounters,
    /// Label of the item being processed, if any
    pub current_item: Option<String>,
    /// Engine phase, e.g. "streaming" or "orphan_sweep"
    pub phase: String,
    /// Error messages; populated on terminal events
    pub errors: Vec<String>,
}

impl ProgressEvent {
    /// Event stamped with the wall clock. Use [`with_timestamp`](Self::with_timestamp)
    /// to stamp it from another clock.
    pub fn new(session_id: impl Into<String>, sequence: u64, kind: ProgressKind) -> Self {
        Self {
            session_id: session_id.into(),
            sequence,
            timestamp: chrono::Utc::now().timestamp_millis(),
            kind,
            percent: 0,
            counters: ProgressCounters::default(),
            current_item: None,
            phase: String::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = timestamp_ms;
        self
    }

    pub fn with_percent(mut self, percent: u8) -> Self {
        self.percent = percent.min(100);
        self
    }

    pub fn with_counters(mut self, counters: ProgressCounters) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_current_item(mut self, label: impl Into<String>) -> Self {
        self.current_item = Some(label.into());
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// A message on the progress channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChannelMessage {
    Event(ProgressEvent),
    /// Liveness probe sent towards observers
    Ping { session_id: String, nonce: u64 },
    /// Observer answer to a [`ChannelMessage::Ping`]
    Pong { session_id: String, nonce: u64 },
}

impl ChannelMessage {
    pub fn session_id(&self) -> &str {
        match self {
            ChannelMessage::Event(event) => &event.session_id,
            ChannelMessage::Ping { session_id, .. } | ChannelMessage::Pong { session_id, .. } => {
                session_id
            }
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        !matches!(self, ChannelMessage::Event(_))
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Sending side of the progress channel.
///
/// Cheap to clone; all clones feed the same observers.
#[derive(Clone)]
pub struct ProgressChannel {
    sender: broadcast::Sender<ChannelMessage>,
    next_nonce: Arc<AtomicU64>,
}

impl ProgressChannel {
    /// Creates a channel where every observer buffers at most `capacity`
    /// messages.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_nonce: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publishes an event without waiting.
    ///
    /// Returns the number of observers the event was queued for; `0` means it
    /// was dropped because nobody is listening.
    pub fn emit(&self, event: ProgressEvent) -> usize {
        self.send(ChannelMessage::Event(event))
    }

    /// Sends a liveness probe for `session_id` and returns its nonce.
    pub fn ping(&self, session_id: &str) -> u64 {
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        self.send(ChannelMessage::Ping {
            session_id: session_id.to_string(),
            nonce,
        });
        nonce
    }

    /// Answers a ping.
    pub fn pong(&self, session_id: &str, nonce: u64) {
        self.send(ChannelMessage::Pong {
            session_id: session_id.to_string(),
            nonce,
        });
    }

    /// Observes one session. Past messages are not replayed.
    pub fn subscribe(&self, session_id: impl Into<String>) -> ProgressStream {
        ProgressStream {
            receiver: self.sender.subscribe(),
            session_id: Some(session_id.into()),
        }
    }

    /// Observes every session.
    pub fn subscribe_all(&self) -> ProgressStream {
        ProgressStream {
            receiver: self.sender.subscribe(),
            session_id: None,
        }
    }

    /// Number of attached observers across all sessions.
    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn send(&self, message: ChannelMessage) -> usize {
        // Err only means there is no receiver.
        self.sender.send(message).unwrap_or(0)
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for ProgressChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressChannel")
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

// ============================================================================
// Observer
// ============================================================================

/// Receiving side of the progress channel.
pub struct ProgressStream {
    receiver: Receiver<ChannelMessage>,
    session_id: Option<String>,
}

impl ProgressStream {
    /// Session this stream is bound to, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn matches(&self, message: &ChannelMessage) -> bool {
        match &self.session_id {
            Some(id) => message.session_id() == id,
            None => true,
        }
    }

    /// Receives the next message for this stream, heartbeats included.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the observer fell behind by `n`
    /// messages, and `RecvError::Closed` once every sender is gone.
    pub async fn recv(&mut self) -> Result<ChannelMessage, RecvError> {
        loop {
            let message = self.receiver.recv().await?;
            if self.matches(&message) {
                return Ok(message);
            }
        }
    }

    /// Receives the next progress event, skipping heartbeats.
    pub async fn next_event(&mut self) -> Result<ProgressEvent, RecvError> {
        loop {
            if let ChannelMessage::Event(event) = self.recv().await? {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a message without waiting.
    ///
    /// Returns `None` if nothing is currently queued for this stream.
    pub fn try_recv(&mut self) -> Option<Result<ChannelMessage, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    if self.matches(&message) {
                        return Some(Ok(message));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for ProgressStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressStream")
            .field("session_id", &self.session_id)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(session: &str, sequence: u64) -> ProgressEvent {
        ProgressEvent::new(session, sequence, ProgressKind::Progress)
    }

    #[tokio::test]
    async fn test_channel_creation() {
        let channel = ProgressChannel::new(10);
        assert_eq!(channel.observer_count(), 0);
    }

    #[test]
    fn test_explicit_timestamp_overrides_wall_clock() {
        let event = progress("s1", 0).with_timestamp(1_700_000_000_000);
        assert_eq!(event.timestamp, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_emit_without_observers_drops() {
        let channel = ProgressChannel::new(10);
        assert_eq!(channel.emit(progress("s1", 0)), 0);

        // A late observer does not see the dropped event.
        let mut stream = channel.subscribe("s1");
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_multiple_observers_receive_every_event_in_order() {
        let channel = ProgressChannel::new(16);
        let mut ui = channel.subscribe("s1");
        let mut log_sink = channel.subscribe("s1");

        for sequence in 0..5 {
            assert_eq!(channel.emit(progress("s1", sequence)), 2);
        }

        for stream in [&mut ui, &mut log_sink] {
            for expected in 0..5 {
                let event = stream.next_event().await.unwrap();
                assert_eq!(event.sequence, expected);
            }
        }
    }

    #[tokio::test]
    async fn test_stream_filters_by_session() {
        let channel = ProgressChannel::new(16);
        let mut stream = channel.subscribe("s2");

        channel.emit(progress("s1", 0));
        channel.emit(progress("s2", 0));
        channel.emit(progress("s1", 1));

        let event = stream.next_event().await.unwrap();
        assert_eq!(event.session_id, "s2");
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_all_sees_every_session() {
        let channel = ProgressChannel::new(16);
        let mut stream = channel.subscribe_all();

        channel.emit(progress("s1", 0));
        channel.emit(progress("s2", 0));

        assert_eq!(stream.next_event().await.unwrap().session_id, "s1");
        assert_eq!(stream.next_event().await.unwrap().session_id, "s2");
    }

    #[tokio::test]
    async fn test_heartbeats_are_skipped_by_next_event() {
        let channel = ProgressChannel::new(16);
        let mut stream = channel.subscribe("s1");

        let nonce = channel.ping("s1");
        channel.pong("s1", nonce);
        channel.emit(progress("s1", 7));

        let event = stream.next_event().await.unwrap();
        assert_eq!(event.sequence, 7);
    }

    #[tokio::test]
    async fn test_ping_pong_round_trip() {
        let channel = ProgressChannel::new(16);
        let mut stream = channel.subscribe("s1");

        let first = channel.ping("s1");
        let second = channel.ping("s1");
        assert_ne!(first, second);

        match stream.recv().await.unwrap() {
            ChannelMessage::Ping { nonce, .. } => {
                assert_eq!(nonce, first);
                channel.pong("s1", nonce);
            }
            other => panic!("expected ping, got {:?}", other),
        }

        let second_ping = stream.recv().await.unwrap();
        assert!(second_ping.is_heartbeat());
        let pong = stream.recv().await.unwrap();
        assert_eq!(
            pong,
            ChannelMessage::Pong {
                session_id: "s1".to_string(),
                nonce: first
            }
        );
    }

    #[tokio::test]
    async fn test_lagged_observer_does_not_block_sender() {
        let channel = ProgressChannel::new(2);
        let mut stream = channel.subscribe("s1");

        for sequence in 0..5 {
            channel.emit(progress("s1", sequence));
        }

        let result = stream.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));

        // Oldest messages are gone; the newest survive in order.
        let event = stream.next_event().await.unwrap();
        assert_eq!(event.sequence, 3);
    }

    #[test]
    fn test_percent_is_capped() {
        let event = progress("s1", 0).with_percent(250);
        assert_eq!(event.percent, 100);
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(!ProgressKind::Progress.is_terminal());
        assert!(ProgressKind::Completed.is_terminal());
        assert!(ProgressKind::Error.is_terminal());
        assert!(ProgressKind::Cancelled.is_terminal());
    }

    #[test]
    fn test_message_serialization() {
        let event = progress("s1", 3)
            .with_phase("streaming")
            .with_current_item("Heat (1995)");
        let json = serde_json::to_value(ChannelMessage::Event(event)).unwrap();

        assert_eq!(json["type"], "event");
        assert_eq!(json["payload"]["kind"], "progress");
        assert_eq!(json["payload"]["current_item"], "Heat (1995)");

        let ping = serde_json::to_value(ChannelMessage::Ping {
            session_id: "s1".to_string(),
            nonce: 9,
        })
        .unwrap();
        assert_eq!(ping["type"], "ping");
        assert_eq!(ping["payload"]["nonce"], 9);
    }
}
