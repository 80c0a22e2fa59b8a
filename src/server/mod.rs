//! HTTP relay: accepts a turn list and streams the model's answer back as a
//! raw text body.
//!
//! `POST /api/chat` with `{ messages, systemPrompt?, threadId? }` answers with
//! `200 text/plain` whose body is the fragment stream, echoing `threadId` in
//! the `X-Thread-ID` header. Failures detected before the first fragment are
//! reported as `{ "error": "..." }` with a failure status. A failure after the
//! first fragment aborts the body; text already sent stays with the client.

mod error;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tracing::{error, info};

pub use error::ServerError;

use crate::api::RelayRequest;
use crate::core::constants::THREAD_ID_HEADER;
use crate::core::gateway::ModelGateway;

pub const CHAT_ROUTE: &str = "/api/chat";

#[derive(Clone)]
pub struct ServerState {
    gateway: Arc<dyn ModelGateway>,
    default_system_prompt: Arc<str>,
}

impl ServerState {
    pub fn new(gateway: Arc<dyn ModelGateway>, default_system_prompt: impl Into<String>) -> Self {
        Self {
            gateway,
            default_system_prompt: Arc::from(default_system_prompt.into()),
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route(CHAT_ROUTE, post(chat))
        .with_state(state)
}

async fn chat(
    State(state): State<ServerState>,
    payload: Result<Json<RelayRequest>, JsonRejection>,
) -> Result<Response, ServerError> {
    let Json(request) = payload.map_err(|rejection| {
        error!("Rejected chat request: {}", rejection.body_text());
        ServerError::BadRequest(rejection.body_text())
    })?;

    let RelayRequest {
        messages,
        system_prompt,
        thread_id,
    } = request;
    let system_prompt = system_prompt.unwrap_or_else(|| state.default_system_prompt.to_string());

    let mut fragments = state
        .gateway
        .stream(&messages, &system_prompt)
        .await
        .map_err(|err| {
            error!("Chat request failed before streaming: {err}");
            ServerError::from(err)
        })?;

    // The status line goes out with the first fragment, so a failure before
    // it can still be reported as an error response.
    let head = match fragments.next().await {
        Some(Err(err)) => {
            error!("Chat request failed before streaming: {err}");
            return Err(ServerError::from(err));
        }
        first => first,
    };

    let logged = futures_util::stream::iter(head)
        .chain(fragments)
        .inspect(|item| {
            if let Err(err) = item {
                error!("Chat stream interrupted: {err}");
            }
        });

    let thread_header = thread_id
        .as_deref()
        .and_then(|id| HeaderValue::from_str(id).ok())
        .unwrap_or_else(|| HeaderValue::from_static(""));

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            ),
            (header::HeaderName::from_static(THREAD_ID_HEADER), thread_header),
        ],
        Body::from_stream(logged),
    )
        .into_response())
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: ServerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}{}", listener.local_addr()?, CHAT_ROUTE);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gateway::relay::RelayGateway;
    use crate::core::gateway::GatewayError;
    use crate::core::message::Turn;
    use crate::core::session::{ChatSession, SessionEvent};
    use crate::utils::test_utils::StubGateway;

    async fn spawn_app(gateway: &Arc<StubGateway>) -> String {
        let app = router(ServerState::new(gateway.clone(), "default prompt"));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }

    async fn post_chat(base: &str, body: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{base}{CHAT_ROUTE}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("request sent")
    }

    #[tokio::test]
    async fn streams_fragments_and_echoes_thread_id() {
        let gateway = Arc::new(StubGateway::new());
        gateway.push_fragments(&["Hello", ", ", "World!"]);
        let base = spawn_app(&gateway).await;

        let response = post_chat(
            &base,
            r#"{"messages":[{"role":"user","content":"Hello"}],"systemPrompt":"be kind","threadId":"abc"}"#,
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[THREAD_ID_HEADER], "abc");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.text().await.expect("body"), "Hello, World!");

        let calls = gateway.calls();
        assert_eq!(calls[0].turns, vec![Turn::user("Hello")]);
        assert_eq!(calls[0].system_instruction, "be kind");
    }

    #[tokio::test]
    async fn missing_thread_id_and_prompt_fall_back() {
        let gateway = Arc::new(StubGateway::new());
        gateway.push_fragments(&["ok"]);
        let base = spawn_app(&gateway).await;

        let response = post_chat(&base, r#"{"messages":[{"role":"user","content":"Hi"}]}"#).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[THREAD_ID_HEADER], "");
        assert_eq!(gateway.calls()[0].system_instruction, "default prompt");
    }

    #[tokio::test]
    async fn missing_credential_is_a_json_error() {
        let gateway = Arc::new(StubGateway::new());
        gateway.push_refusal(GatewayError::MissingApiKey {
            env_var: "GEMINI_API_KEY".into(),
        });
        let base = spawn_app(&gateway).await;

        let response = post_chat(&base, r#"{"messages":[{"role":"user","content":"Hi"}]}"#).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json().await.expect("json body");
        assert_eq!(
            body["error"],
            "Please set GEMINI_API_KEY in your environment variables."
        );
    }

    #[tokio::test]
    async fn provider_rejection_maps_to_bad_gateway() {
        let gateway = Arc::new(StubGateway::new());
        gateway.push_refusal(GatewayError::Api {
            status: 429,
            message: "quota".into(),
        });
        let base = spawn_app(&gateway).await;

        let response = post_chat(&base, r#"{"messages":[{"role":"user","content":"Hi"}]}"#).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn malformed_body_is_a_json_error() {
        let gateway = Arc::new(StubGateway::new());
        let base = spawn_app(&gateway).await;

        let response = post_chat(&base, "{not json").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.expect("json body");
        assert!(body["error"].is_string());
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn failure_before_first_fragment_is_a_json_error() {
        let gateway = Arc::new(StubGateway::new());
        gateway.push_script(vec![Err(GatewayError::Blocked {
            reason: "prompt blocked: SAFETY".into(),
        })]);
        let base = spawn_app(&gateway).await;

        let response = post_chat(&base, r#"{"messages":[{"role":"user","content":"Hi"}]}"#).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = response.json().await.expect("json body");
        assert_eq!(body["error"], "Response blocked: prompt blocked: SAFETY");
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_sent_text_and_truncates_the_body() {
        let gateway = Arc::new(StubGateway::new());
        let feed = gateway.push_channel();
        let base = spawn_app(&gateway).await;

        feed.send(Ok("Hello".into())).expect("feed open");
        let mut response =
            post_chat(&base, r#"{"messages":[{"role":"user","content":"Hi"}]}"#).await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut received = Vec::new();
        while received != b"Hello" {
            let chunk = response
                .chunk()
                .await
                .expect("first fragment arrives")
                .expect("body still open");
            received.extend_from_slice(&chunk);
        }

        feed.send(Err(GatewayError::Blocked {
            reason: "candidate blocked: SAFETY".into(),
        }))
        .expect("feed open");
        assert!(response.chunk().await.is_err());
    }

    #[tokio::test]
    async fn session_over_relay_keeps_partial_answer_on_failure() {
        let gateway = Arc::new(StubGateway::new());
        let feed = gateway.push_channel();
        let base = spawn_app(&gateway).await;

        let relay = RelayGateway::new(reqwest::Client::new(), base);
        let (mut session, mut rx) = ChatSession::new(Arc::new(relay), "");

        feed.send(Ok("Hello".into())).expect("feed open");
        session.submit("Hi").expect("accepted");
        loop {
            let (message, stream_id) = rx.recv().await.expect("stream message");
            if let Some(event) = session.handle_stream_message(message, stream_id) {
                assert_eq!(event, SessionEvent::Fragment("Hello".into()));
                break;
            }
        }

        feed.send(Err(GatewayError::Blocked {
            reason: "candidate blocked: SAFETY".into(),
        }))
        .expect("feed open");
        let event = session.settle(&mut rx).await.expect("terminal event");

        assert!(matches!(event, SessionEvent::Failed(_)));
        assert_eq!(session.turns(), &[Turn::user("Hi"), Turn::assistant("Hello")]);
    }

    #[tokio::test]
    async fn session_over_relay_round_trip() {
        let gateway = Arc::new(StubGateway::new());
        gateway.push_fragments(&["Hello", " from ", "the relay"]);
        let base = spawn_app(&gateway).await;

        let relay = RelayGateway::new(reqwest::Client::new(), base).with_thread_id("t-1");
        let (mut session, mut rx) = ChatSession::new(Arc::new(relay), "Be kind.");

        session.submit("Hi").expect("accepted");
        session.settle(&mut rx).await.expect("finished");

        assert_eq!(
            session.turns(),
            &[Turn::user("Hi"), Turn::assistant("Hello from the relay")]
        );
        let calls = gateway.calls();
        assert_eq!(calls[0].turns, vec![Turn::user("Hi")]);
        assert_eq!(calls[0].system_instruction, "Be kind.");
    }
}
