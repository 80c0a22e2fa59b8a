//! Streaming chat session.
//!
//! [`ChatSession`] owns the turn history and the lifecycle of the single
//! request a session may have in flight:
//!
//! ```text
//! Idle ──submit/regenerate──▶ Sending ──finish/cancel──▶ Idle
//!                               │
//!                               └──────fail──────▶ Error ──submit──▶ Sending
//! ```
//!
//! Requests run on a spawned task ([`ChatStreamService`]); their output comes
//! back as `(StreamMessage, stream_id)` pairs on the receiver returned by
//! [`ChatSession::new`], and is applied with
//! [`ChatSession::handle_stream_message`]. Messages tagged with any id other
//! than the pending request's are dropped, which is what keeps late fragments
//! from a cancelled request out of the transcript.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::chat_stream::{ChatStreamService, StreamMessage, StreamParams, StreamReceiver};
use crate::core::gateway::{GatewayError, ModelGateway};
use crate::core::message::Turn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Sending,
    Error,
}

/// Notifications produced by state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A request was issued.
    Started { thread_id: String, stream_id: u64 },
    /// A fragment was appended to the assistant turn.
    Fragment(String),
    /// The request completed; carries the finalized turn list.
    Finished(Vec<Turn>),
    /// The request failed; partial content stays in place.
    Failed(String),
    /// The request was cancelled; partial content stays in place.
    Cancelled,
}

impl SessionEvent {
    /// True for the events that end a request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Finished(_) | SessionEvent::Failed(_) | SessionEvent::Cancelled
        )
    }
}

struct PendingRequest {
    cancel_token: CancellationToken,
    stream_id: u64,
}

pub struct ChatSession {
    turns: Vec<Turn>,
    system_instruction: String,
    thread_id: Option<String>,
    status: SessionStatus,
    error: Option<GatewayError>,
    pending: Option<PendingRequest>,
    last_stream_id: u64,
    gateway: Arc<dyn ModelGateway>,
    stream_service: ChatStreamService,
}

fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ChatSession {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        system_instruction: impl Into<String>,
    ) -> (Self, StreamReceiver) {
        let (stream_service, rx) = ChatStreamService::new();
        let session = Self {
            turns: Vec::new(),
            system_instruction: system_instruction.into(),
            thread_id: None,
            status: SessionStatus::Idle,
            error: None,
            pending: None,
            last_stream_id: 0,
            gateway,
            stream_service,
        };
        (session, rx)
    }

    pub fn with_turns(mut self, turns: Vec<Turn>) -> Self {
        self.turns = turns;
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_sending(&self) -> bool {
        self.status == SessionStatus::Sending
    }

    pub fn error(&self) -> Option<&GatewayError> {
        self.error.as_ref()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn current_stream_id(&self) -> Option<u64> {
        self.pending.as_ref().map(|pending| pending.stream_id)
    }

    /// Replace the history. Refused while a request is in flight.
    pub fn set_turns(&mut self, turns: Vec<Turn>) -> bool {
        if self.is_sending() {
            return false;
        }
        self.turns = turns;
        true
    }

    /// Append a user turn and an empty assistant turn, then issue a request
    /// for the history up to and including the new user turn. Blank text and
    /// calls made while a request is pending are ignored.
    pub fn submit(&mut self, text: &str) -> Option<SessionEvent> {
        if text.trim().is_empty() || self.is_sending() {
            return None;
        }
        self.turns.push(Turn::user(text));
        Some(self.begin_request())
    }

    /// Drop everything after the most recent user turn and ask again with the
    /// same text. No-op while sending or when there is no user turn.
    pub fn regenerate(&mut self) -> Option<SessionEvent> {
        if self.is_sending() {
            return None;
        }
        let last_user = self.turns.iter().rposition(Turn::is_user)?;
        self.turns.truncate(last_user + 1);
        Some(self.begin_request())
    }

    fn begin_request(&mut self) -> SessionEvent {
        let outbound = self.turns.clone();
        self.turns.push(Turn::assistant(String::new()));

        let thread_id = self.thread_id.get_or_insert_with(new_thread_id).clone();
        self.error = None;
        self.status = SessionStatus::Sending;

        self.last_stream_id = self.last_stream_id.wrapping_add(1);
        let stream_id = self.last_stream_id;
        let cancel_token = CancellationToken::new();
        self.pending = Some(PendingRequest {
            cancel_token: cancel_token.clone(),
            stream_id,
        });

        debug!(stream_id, %thread_id, turns = outbound.len(), "issuing chat request");
        self.stream_service.spawn_stream(StreamParams {
            gateway: Arc::clone(&self.gateway),
            turns: outbound,
            system_instruction: self.system_instruction.clone(),
            cancel_token,
            stream_id,
        });

        SessionEvent::Started {
            thread_id,
            stream_id,
        }
    }

    /// Route a message from the stream service. Messages for any request other
    /// than the pending one are dropped.
    pub fn handle_stream_message(
        &mut self,
        message: StreamMessage,
        stream_id: u64,
    ) -> Option<SessionEvent> {
        if self.current_stream_id() != Some(stream_id) {
            debug!(stream_id, "dropping message for stale stream");
            return None;
        }

        match message {
            StreamMessage::Chunk(fragment) => self
                .consume_fragment(&fragment)
                .then_some(SessionEvent::Fragment(fragment)),
            StreamMessage::Error(error) => self.fail(error),
            StreamMessage::End => self.finish(),
        }
    }

    /// Append a fragment to the assistant turn. Ignored unless a request is
    /// pending.
    pub fn consume_fragment(&mut self, fragment: &str) -> bool {
        if !self.is_sending() {
            return false;
        }
        match self.turns.last_mut() {
            Some(last) if last.is_assistant() => {
                last.content.push_str(fragment);
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self) -> Option<SessionEvent> {
        if !self.is_sending() {
            return None;
        }
        self.pending = None;
        self.status = SessionStatus::Idle;
        Some(SessionEvent::Finished(self.turns.clone()))
    }

    pub fn fail(&mut self, error: GatewayError) -> Option<SessionEvent> {
        if !self.is_sending() {
            return None;
        }
        self.pending = None;
        self.status = SessionStatus::Error;
        let message = error.to_string();
        self.error = Some(error);
        Some(SessionEvent::Failed(message))
    }

    /// Stop the pending request. Content received so far is kept.
    pub fn cancel(&mut self) -> Option<SessionEvent> {
        let pending = self.pending.take()?;
        pending.cancel_token.cancel();
        debug!(stream_id = pending.stream_id, "chat request cancelled");
        self.status = SessionStatus::Idle;
        Some(SessionEvent::Cancelled)
    }

    /// Apply stream messages until the pending request ends. Returns `None`
    /// when nothing is pending or the channel closes.
    pub async fn settle(&mut self, rx: &mut StreamReceiver) -> Option<SessionEvent> {
        self.pending.as_ref()?;
        while let Some((message, stream_id)) = rx.recv().await {
            if let Some(event) = self.handle_stream_message(message, stream_id) {
                if event.is_terminal() {
                    return Some(event);
                }
            }
        }
        None
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel_token.cancel();
        }
    }
}
