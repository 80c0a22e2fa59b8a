//! Gateway for Google's generative-language REST API.

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use super::{prepare_turns, FragmentStream, GatewayError, ModelGateway};
use crate::api::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, SafetySetting,
};
use crate::core::chat_stream::{end_after_error, sse_payloads, summarize_error_body};
use crate::core::config::Config;
use crate::core::constants::{
    API_KEY_HEADER, MAX_OUTPUT_TOKENS, SAFETY_CATEGORIES, SAFETY_THRESHOLD, TEMPERATURE, TOP_K,
    TOP_P,
};
use crate::core::message::Turn;
use crate::utils::url::model_method_url;

pub fn generation_config() -> GenerationConfig {
    GenerationConfig {
        temperature: TEMPERATURE,
        top_k: TOP_K,
        top_p: TOP_P,
        max_output_tokens: MAX_OUTPUT_TOKENS,
    }
}

pub fn safety_settings() -> Vec<SafetySetting> {
    SAFETY_CATEGORIES
        .iter()
        .map(|category| SafetySetting {
            category: (*category).to_string(),
            threshold: SAFETY_THRESHOLD.to_string(),
        })
        .collect()
}

pub struct GeminiGateway {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl GeminiGateway {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            api_key_env: crate::core::constants::DEFAULT_API_KEY_ENV.to_string(),
        }
    }

    /// Build from configuration. A missing key is not an error yet; it is
    /// reported when the first chat is opened.
    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.base_url().to_string(),
            model: config.model().to_string(),
            api_key: config.api_key(),
            api_key_env: config.api_key_env().to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Open a provider-side chat seeded with `history`.
    pub fn start_chat(
        &self,
        history: &[Turn],
        system_instruction: &str,
    ) -> Result<ProviderChat<'_>, GatewayError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GatewayError::MissingApiKey {
                env_var: self.api_key_env.clone(),
            })?;

        let history = history
            .iter()
            .filter_map(|turn| {
                turn.role
                    .to_provider_role()
                    .map(|role| Content::text(Some(role), turn.content.as_str()))
            })
            .collect();

        let system_instruction = (!system_instruction.is_empty())
            .then(|| Content::text(None, system_instruction));

        Ok(ProviderChat {
            gateway: self,
            api_key,
            history,
            system_instruction,
        })
    }
}

/// A provider-side chat: prior turns, the fixed generation and safety
/// configuration, and the system instruction. Each send appends the new user
/// message to the history for that request only.
pub struct ProviderChat<'a> {
    gateway: &'a GeminiGateway,
    api_key: &'a str,
    history: Vec<Content>,
    system_instruction: Option<Content>,
}

impl ProviderChat<'_> {
    pub fn request_for(&self, message: &str) -> GenerateContentRequest {
        let mut contents = self.history.clone();
        contents.push(Content::text(Some("user"), message));
        GenerateContentRequest {
            contents,
            system_instruction: self.system_instruction.clone(),
            generation_config: generation_config(),
            safety_settings: safety_settings(),
        }
    }

    async fn post(
        &self,
        method: &str,
        message: &str,
        sse: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = model_method_url(&self.gateway.base_url, &self.gateway.model, method);
        let mut request = self
            .gateway
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header(API_KEY_HEADER, self.api_key);
        if sse {
            request = request.query(&[("alt", "sse")]);
        }

        debug!(model = %self.gateway.model, method, "sending provider request");
        let response = request.json(&self.request_for(message)).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(GatewayError::Api {
                status,
                message: summarize_error_body(&error_text),
            });
        }

        Ok(response)
    }

    pub async fn send_message_stream(&self, message: &str) -> Result<FragmentStream, GatewayError> {
        let response = self.post("streamGenerateContent", message, true).await?;
        let fragments = sse_payloads(response.bytes_stream())
            .map(|payload| payload.and_then(|payload| decode_chunk(&payload)))
            .filter(|item| {
                let keep = !matches!(item, Ok(text) if text.is_empty());
                async move { keep }
            });
        Ok(end_after_error(fragments))
    }

    pub async fn send_message(&self, message: &str) -> Result<String, GatewayError> {
        let response = self.post("generateContent", message, false).await?;
        let body = response.text().await?;
        decode_chunk(&body)
    }
}

/// Decode one response object into its text. Error objects delivered inside a
/// successful response become [`GatewayError::Api`].
fn decode_chunk(payload: &str) -> Result<String, GatewayError> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|_| GatewayError::Decode(summarize_error_body(payload)))?;

    if let Some(error) = value.get("error") {
        let status = error
            .get("code")
            .and_then(|code| code.as_u64())
            .and_then(|code| u16::try_from(code).ok())
            .unwrap_or(500);
        return Err(GatewayError::Api {
            status,
            message: summarize_error_body(payload),
        });
    }

    let response: GenerateContentResponse = serde_json::from_value(value)
        .map_err(|e| GatewayError::Decode(format!("{e}: {}", summarize_error_body(payload))))?;
    response
        .text()
        .map_err(|reason| GatewayError::Blocked { reason })
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    async fn stream(
        &self,
        turns: &[Turn],
        system_instruction: &str,
    ) -> Result<FragmentStream, GatewayError> {
        let prepared = prepare_turns(turns)?;
        let chat = self.start_chat(&prepared.history, system_instruction)?;
        chat.send_message_stream(&prepared.message).await
    }

    async fn generate(
        &self,
        turns: &[Turn],
        system_instruction: &str,
    ) -> Result<String, GatewayError> {
        let prepared = prepare_turns(turns)?;
        let chat = self.start_chat(&prepared.history, system_instruction)?;
        chat.send_message(&prepared.message).await
    }
}
