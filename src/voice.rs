//! Command input and spoken/text narration.
//!
//! Speech recognition and synthesis engines run outside this process. Commands arrive
//! through a [`CommandSource`]; narration leaves through a [`Narrator`], either to the
//! log or as one line per utterance over a local socket a TTS process listens on.

use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use interprocess::local_socket::LocalSocketStream;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

/// Result of one listen attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Heard {
    Phrase(String),
    /// Nothing usable this time (timeout, unrecognised speech, empty line).
    Silence,
    /// The source is exhausted and will not produce more input.
    Closed,
}

/// A stream of free-text commands.
#[async_trait]
pub trait CommandSource: Send {
    async fn listen(&mut self, prompt: &str) -> Heard;
}

/// Fire-and-forget status output.
pub trait Narrator: Send + Sync {
    fn speak(&self, text: &str);
}

/// Pre-recorded commands; closes when the queue runs out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCommands {
    queue: VecDeque<String>,
}

impl ScriptedCommands {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: commands.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CommandSource for ScriptedCommands {
    async fn listen(&mut self, _prompt: &str) -> Heard {
        match self.queue.pop_front() {
            Some(line) if line.trim().is_empty() => Heard::Silence,
            Some(line) => Heard::Phrase(line),
            None => Heard::Closed,
        }
    }
}

/// Typed commands from standard input, one per line.
pub struct StdinCommands {
    lines: Lines<BufReader<Stdin>>,
    timeout: Option<Duration>,
}

impl StdinCommands {
    /// `timeout` bounds each listen; `None` waits indefinitely.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            timeout,
        }
    }
}

#[async_trait]
impl CommandSource for StdinCommands {
    async fn listen(&mut self, prompt: &str) -> Heard {
        print!("{prompt} ");
        let _ = std::io::stdout().flush();

        let read = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.lines.next_line()).await {
                Ok(read) => read,
                Err(_) => return Heard::Silence,
            },
            None => self.lines.next_line().await,
        };

        match read {
            Ok(Some(line)) if line.trim().is_empty() => Heard::Silence,
            Ok(Some(line)) => Heard::Phrase(line),
            Ok(None) => Heard::Closed,
            Err(err) => {
                warn!(%err, "failed to read command");
                Heard::Closed
            }
        }
    }
}

/// Narration through the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNarrator;

impl Narrator for LogNarrator {
    fn speak(&self, text: &str) {
        info!(target: "narration", "{text}");
    }
}

/// Sends each utterance as a line to a local socket; logs it either way.
#[derive(Debug, Clone)]
pub struct IpcNarrator {
    name: String,
}

impl IpcNarrator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Narrator for IpcNarrator {
    fn speak(&self, text: &str) {
        LogNarrator.speak(text);

        let sent = LocalSocketStream::connect(self.name.as_str())
            .and_then(|mut stream| writeln!(stream, "{text}"));
        if let Err(err) = sent {
            warn!(%err, socket = %self.name, "narration sink unreachable");
        }
    }
}

/// Keeps every utterance; for assertions.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingNarrator {
    pub(crate) spoken: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl Narrator for RecordingNarrator {
    fn speak(&self, text: &str) {
        self.spoken.lock().unwrap().push(text.to_string());
    }
}
