//! The streaming contract between a chat session and a model provider.
//!
//! A [`ModelGateway`] turns an ordered list of turns plus a system instruction
//! into either a lazy sequence of text fragments ([`ModelGateway::stream`]) or
//! a single completed answer ([`ModelGateway::generate`]). Gateways are
//! constructed explicitly and handed to the session that uses them.

pub mod gemini;
pub mod relay;

use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::core::message::{conversation_turns, Turn};

/// Finite, single-pass sequence of text fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Open a streaming request. Errors returned here happen before any
    /// fragment is produced; errors yielded by the stream happen mid-flight.
    async fn stream(
        &self,
        turns: &[Turn],
        system_instruction: &str,
    ) -> Result<FragmentStream, GatewayError>;

    /// Await the provider's full answer in one piece.
    async fn generate(&self, turns: &[Turn], system_instruction: &str)
        -> Result<String, GatewayError>;
}

/// Errors surfaced by a gateway.
#[derive(Debug)]
pub enum GatewayError {
    /// No API credential was available for the provider.
    MissingApiKey {
        /// Environment variable that was expected to hold the key.
        env_var: String,
    },

    /// The conversation holds no user turn to send.
    EmptyConversation,

    /// The request could not be sent, or the response body broke off.
    Transport(reqwest::Error),

    /// The provider answered with a non-success status.
    Api { status: u16, message: String },

    /// The provider refused to produce content (safety or prompt block).
    Blocked { reason: String },

    /// A response payload could not be decoded.
    Decode(String),
}

impl GatewayError {
    /// Configuration errors are fatal before any request is made.
    pub fn is_configuration(&self) -> bool {
        matches!(self, GatewayError::MissingApiKey { .. })
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::MissingApiKey { env_var } => {
                write!(f, "Please set {env_var} in your environment variables.")
            }
            GatewayError::EmptyConversation => {
                write!(f, "The conversation has no user message to send.")
            }
            GatewayError::Transport(source) => write!(f, "Request failed: {source}"),
            GatewayError::Api { status, message } => {
                write!(f, "API Error ({status}): {message}")
            }
            GatewayError::Blocked { reason } => write!(f, "Response blocked: {reason}"),
            GatewayError::Decode(detail) => write!(f, "Malformed response: {detail}"),
        }
    }
}

impl StdError for GatewayError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            GatewayError::Transport(source) => Some(source),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(value: reqwest::Error) -> Self {
        GatewayError::Transport(value)
    }
}

/// Turns ready to hand to a provider chat: the context history and the text
/// of the most recent user turn, which is the one actually sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTurns {
    pub history: Vec<Turn>,
    pub message: String,
}

/// Drop system turns, then split at the most recent user turn. Anything after
/// that turn (an unfinished assistant placeholder, for instance) is not sent.
pub fn prepare_turns(turns: &[Turn]) -> Result<PreparedTurns, GatewayError> {
    let mut conversation = conversation_turns(turns);
    let last_user = conversation
        .iter()
        .rposition(Turn::is_user)
        .ok_or(GatewayError::EmptyConversation)?;

    conversation.truncate(last_user + 1);
    let message = conversation
        .pop()
        .map(|turn| turn.content)
        .ok_or(GatewayError::EmptyConversation)?;

    Ok(PreparedTurns {
        history: conversation,
        message,
    })
}
