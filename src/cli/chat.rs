//! Line-oriented chat over a [`ChatSession`].

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::core::chat_stream::StreamReceiver;
use crate::core::gateway::ModelGateway;
use crate::core::message::Turn;
use crate::core::session::{ChatSession, SessionEvent};
use crate::utils::logging::TranscriptLog;

const PROMPT: &str = "> ";

pub async fn run_chat(
    gateway: Arc<dyn ModelGateway>,
    system_instruction: &str,
    log: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let transcript = match log {
        Some(path) => {
            let transcript = TranscriptLog::open(path)?;
            eprintln!("Logging enabled to: {}", transcript.path().display());
            Some(transcript)
        }
        None => None,
    };

    let (mut session, mut rx) = ChatSession::new(gateway, system_instruction);

    let (interrupt_tx, mut interrupts) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(()).is_err() {
                break;
            }
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    run_repl(
        &mut session,
        &mut rx,
        stdin,
        &mut interrupts,
        &mut stdout,
        transcript.as_ref(),
    )
    .await
}

/// Drive `session` from input lines until `/quit`, end of input, or an
/// interrupt while idle. An interrupt while an answer is streaming cancels it.
pub async fn run_repl<R, W>(
    session: &mut ChatSession,
    rx: &mut StreamReceiver,
    input: R,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
    out: &mut W,
    transcript: Option<&TranscriptLog>,
) -> Result<(), Box<dyn Error>>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();

    loop {
        if session.is_sending() {
            tokio::select! {
                message = rx.recv() => {
                    let Some((message, stream_id)) = message else {
                        break;
                    };
                    if let Some(event) = session.handle_stream_message(message, stream_id) {
                        render_event(&event, session, out, transcript)?;
                    }
                }
                Some(()) = interrupts.recv() => {
                    if let Some(event) = session.cancel() {
                        render_event(&event, session, out, transcript)?;
                    }
                }
            }
            continue;
        }

        write!(out, "{PROMPT}")?;
        out.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            Some(()) = interrupts.recv() => None,
        };
        let Some(line) = line else {
            writeln!(out)?;
            break;
        };

        match line.trim() {
            "/quit" | "/exit" => break,
            "/regenerate" => match session.regenerate() {
                Some(_) => {
                    if let Some(log) = transcript {
                        log_result(log.rewrite(session.turns()));
                    }
                }
                None => writeln!(out, "Nothing to regenerate yet.")?,
            },
            _ => {
                if session.submit(&line).is_some() {
                    if let Some(log) = transcript {
                        log_result(log.append_turn(&Turn::user(line.as_str())));
                    }
                }
            }
        }
    }

    Ok(())
}

fn render_event<W: Write>(
    event: &SessionEvent,
    session: &ChatSession,
    out: &mut W,
    transcript: Option<&TranscriptLog>,
) -> std::io::Result<()> {
    match event {
        SessionEvent::Started { .. } => {}
        SessionEvent::Fragment(text) => {
            write!(out, "{text}")?;
            out.flush()?;
        }
        SessionEvent::Finished(_) => {
            writeln!(out)?;
            writeln!(out)?;
            log_last_turn(session, transcript);
        }
        SessionEvent::Cancelled => {
            writeln!(out, " [stopped]")?;
            writeln!(out)?;
            log_last_turn(session, transcript);
        }
        SessionEvent::Failed(message) => {
            writeln!(out)?;
            error!("{message}");
            writeln!(out, "Error: {message}")?;
            writeln!(out)?;
            log_last_turn(session, transcript);
        }
    }
    Ok(())
}

fn log_last_turn(session: &ChatSession, transcript: Option<&TranscriptLog>) {
    if let (Some(log), Some(turn)) = (transcript, session.turns().last()) {
        log_result(log.append_turn(turn));
    }
}

fn log_result(result: std::io::Result<()>) {
    if let Err(err) = result {
        warn!("Could not write transcript: {err}");
    }
}
