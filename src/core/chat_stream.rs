use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use memchr::memchr;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::gateway::{FragmentStream, GatewayError, ModelGateway};
use crate::core::message::Turn;

/// Messages forwarded from a spawned request to its session. Each request
/// ends with exactly one terminal message: `Error` or `End`.
#[derive(Debug)]
pub enum StreamMessage {
    Chunk(String),
    Error(GatewayError),
    End,
}

pub type StreamReceiver = mpsc::UnboundedReceiver<(StreamMessage, u64)>;

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn decode_sse_line(raw: &[u8]) -> Option<Result<String, GatewayError>> {
    let line = match std::str::from_utf8(raw) {
        Ok(s) => s.trim(),
        Err(e) => {
            warn!("Invalid UTF-8 in stream: {e}");
            return Some(Err(GatewayError::Decode(format!(
                "invalid UTF-8 in stream: {e}"
            ))));
        }
    };
    extract_data_payload(line)
        .filter(|payload| !payload.is_empty())
        .map(|payload| Ok(payload.to_owned()))
}

struct SseState<S> {
    bytes: S,
    buffer: Vec<u8>,
    finished: bool,
}

/// Split a byte stream into SSE `data:` payloads. Non-data lines (comments,
/// `event:` fields, blank separators) are skipped. A transport error ends the
/// sequence after being yielded once. A line that is not valid UTF-8 yields
/// [`GatewayError::Decode`].
pub fn sse_payloads<S, B>(bytes: S) -> impl Stream<Item = Result<String, GatewayError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin,
    B: AsRef<[u8]> + Send,
{
    let state = SseState {
        bytes,
        buffer: Vec::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(newline_pos) = memchr(b'\n', &state.buffer) {
                let payload = decode_sse_line(&state.buffer[..newline_pos]);
                state.buffer.drain(..=newline_pos);
                if let Some(payload) = payload {
                    return Some((payload, state));
                }
                continue;
            }

            if state.finished {
                if state.buffer.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut state.buffer);
                if let Some(payload) = decode_sse_line(&rest) {
                    return Some((payload, state));
                }
                continue;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    state.finished = true;
                    state.buffer.clear();
                    return Some((Err(GatewayError::Transport(e)), state));
                }
                None => state.finished = true,
            }
        }
    })
}

/// Stop a fallible stream right after its first error.
pub fn end_after_error<S>(stream: S) -> FragmentStream
where
    S: Stream<Item = Result<String, GatewayError>> + Send + 'static,
{
    let stream = Box::pin(stream);
    Box::pin(futures_util::stream::unfold(
        Some(stream),
        |state| async move {
            let mut stream = state?;
            match stream.next().await {
                Some(Ok(text)) => Some((Ok(text), Some(stream))),
                Some(Err(e)) => Some((Err(e), None)),
                None => None,
            }
        },
    ))
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

/// One-line description of a provider error body.
pub fn summarize_error_body(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value) {
            if !summary.is_empty() {
                return summary;
            }
        }
    }

    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct StreamParams {
    pub gateway: Arc<dyn ModelGateway>,
    pub turns: Vec<Turn>,
    pub system_instruction: String,
    pub cancel_token: tokio_util::sync::CancellationToken,
    pub stream_id: u64,
}

#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, StreamReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx_clone = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                gateway,
                turns,
                system_instruction,
                cancel_token,
                stream_id,
            } = params;

            tokio::select! {
                _ = async {
                    debug!(stream_id, turns = turns.len(), "opening model stream");
                    let mut stream = match gateway.stream(&turns, &system_instruction).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = tx_clone.send((StreamMessage::Error(e), stream_id));
                            return;
                        }
                    };

                    while let Some(item) = stream.next().await {
                        if cancel_token.is_cancelled() {
                            debug!(stream_id, "stream cancelled; dropping remaining fragments");
                            return;
                        }

                        match item {
                            Ok(fragment) => {
                                let _ = tx_clone.send((StreamMessage::Chunk(fragment), stream_id));
                            }
                            Err(e) => {
                                let _ = tx_clone.send((StreamMessage::Error(e), stream_id));
                                return;
                            }
                        }
                    }

                    debug!(stream_id, "model stream ended");
                    let _ = tx_clone.send((StreamMessage::End, stream_id));
                } => {}
                _ = cancel_token.cancelled() => {}
            }
        });
    }
}
