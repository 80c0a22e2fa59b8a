//! Gateway that forwards turns to a running `sifra serve` instance and reads
//! its raw text body back as fragments.

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tracing::debug;

use super::{FragmentStream, GatewayError, ModelGateway};
use crate::api::{ErrorBody, RelayRequest};
use crate::core::chat_stream::{end_after_error, summarize_error_body};
use crate::core::message::Turn;
use crate::server::CHAT_ROUTE;
use crate::utils::url::construct_api_url;

pub struct RelayGateway {
    client: reqwest::Client,
    base_url: String,
    thread_id: Option<String>,
}

impl RelayGateway {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            thread_id: None,
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    async fn open(
        &self,
        turns: &[Turn],
        system_instruction: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let body = RelayRequest {
            messages: turns.to_vec(),
            system_prompt: Some(system_instruction.to_string()),
            thread_id: self.thread_id.clone(),
        };
        let url = construct_api_url(&self.base_url, CHAT_ROUTE);
        debug!(%url, turns = turns.len(), "opening relay request");
        let response = self.client.post(url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or_else(|_| summarize_error_body(&text));
            return Err(GatewayError::Api { status, message });
        }

        Ok(response)
    }
}

/// Reassemble UTF-8 text from arbitrary byte chunks, holding back an
/// incomplete trailing sequence until the next chunk arrives.
#[derive(Default)]
struct Utf8Assembler {
    pending: Vec<u8>,
}

impl Utf8Assembler {
    fn push(&mut self, bytes: &[u8]) -> Result<String, GatewayError> {
        self.pending.extend_from_slice(bytes);
        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(GatewayError::Decode(format!("invalid UTF-8 in body: {e}"))),
        };
        let rest = self.pending.split_off(valid_up_to);
        let complete = std::mem::replace(&mut self.pending, rest);
        String::from_utf8(complete)
            .map_err(|e| GatewayError::Decode(format!("invalid UTF-8 in body: {e}")))
    }

    fn finish(&self) -> Result<(), GatewayError> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Decode("body ended inside a UTF-8 sequence".into()))
        }
    }
}

fn text_fragments<S, B>(bytes: S) -> impl Stream<Item = Result<String, GatewayError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin,
    B: AsRef<[u8]> + Send,
{
    futures_util::stream::unfold(
        (bytes, Utf8Assembler::default(), false),
        |(mut bytes, mut assembler, done)| async move {
            if done {
                return None;
            }
            loop {
                match bytes.next().await {
                    Some(Ok(chunk)) => match assembler.push(chunk.as_ref()) {
                        Ok(text) if text.is_empty() => continue,
                        Ok(text) => return Some((Ok(text), (bytes, assembler, false))),
                        Err(e) => return Some((Err(e), (bytes, assembler, true))),
                    },
                    Some(Err(e)) => {
                        return Some((Err(GatewayError::Transport(e)), (bytes, assembler, true)))
                    }
                    None => {
                        return assembler
                            .finish()
                            .err()
                            .map(|e| (Err(e), (bytes, assembler, true)));
                    }
                }
            }
        },
    )
}

#[async_trait]
impl ModelGateway for RelayGateway {
    async fn stream(
        &self,
        turns: &[Turn],
        system_instruction: &str,
    ) -> Result<FragmentStream, GatewayError> {
        let response = self.open(turns, system_instruction).await?;
        Ok(end_after_error(text_fragments(response.bytes_stream())))
    }

    async fn generate(
        &self,
        turns: &[Turn],
        system_instruction: &str,
    ) -> Result<String, GatewayError> {
        let mut stream = self.stream(turns, system_instruction).await?;
        let mut text = String::new();
        while let Some(fragment) = stream.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn multibyte_characters_split_across_chunks_are_reassembled() {
        let bytes = "héllo".as_bytes();
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> =
            vec![Ok(bytes[..2].to_vec()), Ok(bytes[2..].to_vec())];
        let fragments: Vec<String> = text_fragments(stream::iter(chunks))
            .map(|item| item.expect("valid utf-8"))
            .collect()
            .await;
        assert_eq!(fragments.concat(), "héllo");
        assert_eq!(fragments[0], "h");
    }

    #[tokio::test]
    async fn truncated_sequence_at_end_is_an_error() {
        let bytes = "é".as_bytes();
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![Ok(bytes[..1].to_vec())];
        let items: Vec<_> = text_fragments(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(GatewayError::Decode(_))));
    }

    #[tokio::test]
    async fn relay_posts_turns_and_reads_raw_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "messages": [{"role": "user", "content": "Hello"}],
                "systemPrompt": "be brief",
                "threadId": "thread-1"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-thread-id", "thread-1")
                    .set_body_string("Hello, World!"),
            )
            .mount(&server)
            .await;

        let gateway = RelayGateway::new(reqwest::Client::new(), server.uri())
            .with_thread_id("thread-1");
        let text = gateway
            .generate(&[Turn::user("Hello")], "be brief")
            .await
            .expect("relay succeeds");
        assert_eq!(text, "Hello, World!");
    }

    #[tokio::test]
    async fn relay_error_body_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": "Please set GEMINI_API_KEY in your environment variables."
            })))
            .mount(&server)
            .await;

        let gateway = RelayGateway::new(reqwest::Client::new(), server.uri());
        let err = match gateway.stream(&[Turn::user("Hello")], "").await {
            Ok(_) => panic!("expected relay error"),
            Err(err) => err,
        };
        match err {
            GatewayError::Api { status, message } => {
                assert_eq!(status, 500);
                assert!(message.contains("GEMINI_API_KEY"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
