//! Single-prompt "say" command

use std::error::Error;
use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::core::chat_stream::{ChatStreamService, StreamMessage, StreamParams};
use crate::core::gateway::ModelGateway;
use crate::core::message::Turn;

pub async fn run_say<W: Write>(
    gateway: Arc<dyn ModelGateway>,
    prompt: &str,
    system_instruction: &str,
    no_stream: bool,
    out: &mut W,
) -> Result<(), Box<dyn Error>> {
    if prompt.trim().is_empty() {
        return Err("Usage: sifra say <prompt>".into());
    }
    let turns = vec![Turn::user(prompt)];

    if no_stream {
        let text = gateway
            .generate(&turns, system_instruction)
            .await
            .inspect_err(|err| error!("Request failed: {err}"))?;
        writeln!(out, "{text}")?;
        return Ok(());
    }

    let (stream_service, mut rx) = ChatStreamService::new();
    stream_service.spawn_stream(StreamParams {
        gateway,
        turns,
        system_instruction: system_instruction.to_string(),
        cancel_token: CancellationToken::new(),
        stream_id: 1,
    });

    while let Some((message, _)) = rx.recv().await {
        match message {
            StreamMessage::Chunk(content) => {
                write!(out, "{content}")?;
                out.flush()?;
            }
            StreamMessage::Error(err) => {
                writeln!(out)?;
                error!("Stream failed: {err}");
                return Err(err.into());
            }
            StreamMessage::End => {
                writeln!(out)?;
                break;
            }
        }
    }

    Ok(())
}
