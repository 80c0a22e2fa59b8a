use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::message::{Role, Turn};

const DEFAULT_FILTER: &str = "sifra=info";

/// Install the global tracing subscriber. Diagnostics go to stderr so they
/// never mix with streamed output on stdout. `RUST_LOG` overrides the filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Plain-text transcript of a chat, appended to as turns complete.
pub struct TranscriptLog {
    file_path: PathBuf,
}

impl TranscriptLog {
    /// Open (or create) the transcript file, failing early when it is not
    /// writable.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let file_path = path.into();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        file.flush()?;
        Ok(Self { file_path })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append one turn. Empty assistant turns are skipped.
    pub fn append_turn(&self, turn: &Turn) -> std::io::Result<()> {
        let Some(text) = render_turn(turn) else {
            return Ok(());
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        write_block(&mut writer, &text)?;
        writer.flush()
    }

    /// Replace the file with the given turns. Used after a regenerate, when
    /// the last logged answer no longer belongs to the conversation.
    pub fn rewrite(&self, turns: &[Turn]) -> std::io::Result<()> {
        let parent = self
            .file_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp_file = NamedTempFile::new_in(parent)?;
        for turn in turns {
            if let Some(text) = render_turn(turn) {
                write_block(&mut temp_file, &text)?;
            }
        }
        temp_file.flush()?;
        temp_file.as_file().sync_all()?;
        temp_file
            .persist(&self.file_path)
            .map_err(|err| err.error)?;
        Ok(())
    }
}

fn render_turn(turn: &Turn) -> Option<String> {
    match turn.role {
        Role::User => Some(format!("You: {}", turn.content)),
        Role::Assistant if !turn.content.is_empty() => Some(turn.content.clone()),
        Role::Assistant => None,
        Role::System => Some(format!("## {}", turn.content)),
    }
}

fn write_block<W: Write>(writer: &mut W, text: &str) -> std::io::Result<()> {
    for line in text.lines() {
        writeln!(writer, "{line}")?;
    }
    writeln!(writer)
}
