//! Stream pump between the supervisor and the assistant's pipes.
//!
//! Each output stream gets its own reader task that decodes bytes into lines
//! and forwards them over a bounded channel. A single writer feeds stdin.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

use super::{AssistantProcess, SpawnError};
use crate::filter::OutputFilter;

/// Default capacity of each stream's line channel.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

const READ_CHUNK: usize = 8 * 1024;

/// Read-idle period after which a buffered prompt is released.
pub const PROMPT_SETTLE: Duration = Duration::from_millis(50);

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Event emitted by a reader task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEvent {
    Line(String),
    /// End of stream.
    Closed,
    ReadFailed(String),
}

/// Error type for stream pump operations.
#[derive(thiserror::Error, Debug)]
pub enum PumpError {
    #[error("Write to assistant stdin failed: {0}")]
    WriteFailed(#[source] std::io::Error),
}

/// Incremental byte-to-line decoder for one stream.
///
/// Bytes after the last newline stay buffered until more arrive. Interactive
/// prompts are printed without a terminator, so the reader releases a
/// buffered partial line through [`take_prompt`](Self::take_prompt) once the
/// stream has gone quiet and the partial line is itself the prompt.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    prompt: Option<OutputFilter>,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow unterminated lines matching the filter's prompt to be released.
    #[must_use]
    pub fn with_prompt_flush(filter: OutputFilter) -> Self {
        Self {
            buf: Vec::new(),
            prompt: Some(filter),
        }
    }

    /// Feed bytes, returning every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whether the buffered partial line looks like the prompt.
    #[must_use]
    pub fn holds_prompt(&self) -> bool {
        match &self.prompt {
            Some(filter) => {
                !self.buf.is_empty() && filter.is_prompt(&String::from_utf8_lossy(&self.buf))
            }
            None => false,
        }
    }

    /// Release the buffered partial line if it is the prompt.
    pub fn take_prompt(&mut self) -> Option<String> {
        if !self.holds_prompt() {
            return None;
        }
        let partial = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&partial).into_owned())
    }

    /// Flush whatever is left when the stream closes.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    /// Bytes waiting for a line terminator.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}

/// Spawn a reader task draining `reader` into `tx`.
///
/// The task ends at EOF, on a read error, or when the receiver is dropped.
pub fn spawn_reader<R>(
    mut reader: R,
    stream: StreamKind,
    mut decoder: LineDecoder,
    tx: Sender<PumpEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let read = if decoder.holds_prompt() {
                // `read` is cancel safe; a timeout loses no bytes.
                match tokio::time::timeout(PROMPT_SETTLE, reader.read(&mut chunk)).await {
                    Ok(read) => read,
                    Err(_) => {
                        if let Some(line) = decoder.take_prompt() {
                            tracing::trace!(%stream, %line, "Assistant prompt");
                            if tx.send(PumpEvent::Line(line)).await.is_err() {
                                return;
                            }
                        }
                        continue;
                    }
                }
            } else {
                reader.read(&mut chunk).await
            };
            match read {
                Ok(0) => {
                    if let Some(line) = decoder.finish() {
                        let _ = tx.send(PumpEvent::Line(line)).await;
                    }
                    let _ = tx.send(PumpEvent::Closed).await;
                    break;
                }
                Ok(n) => {
                    for line in decoder.push(&chunk[..n]) {
                        tracing::trace!(%stream, %line, "Assistant output");
                        if tx.send(PumpEvent::Line(line)).await.is_err() {
                            tracing::debug!(%stream, "Line receiver dropped");
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%stream, error = %e, "Read from assistant failed");
                    let _ = tx.send(PumpEvent::ReadFailed(e.to_string())).await;
                    break;
                }
            }
        }
        tracing::debug!(%stream, "Reader task exited");
    })
}

/// Line writer over the assistant's stdin.
#[derive(Debug)]
pub struct CommandWriter {
    stdin: ChildStdin,
}

impl CommandWriter {
    #[must_use]
    pub fn new(stdin: ChildStdin) -> Self {
        Self { stdin }
    }

    /// Write `text` followed by a newline and flush.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::WriteFailed` if the pipe is closed.
    pub async fn write_line(&mut self, text: &str) -> Result<(), PumpError> {
        let mut buf = String::with_capacity(text.len() + 1);
        buf.push_str(text);
        buf.push('\n');
        self.stdin
            .write_all(buf.as_bytes())
            .await
            .map_err(PumpError::WriteFailed)?;
        self.stdin.flush().await.map_err(PumpError::WriteFailed)
    }
}

/// The pump attached to one spawned process.
#[derive(Debug)]
pub struct StreamPump {
    pub writer: CommandWriter,
    pub stdout: Receiver<PumpEvent>,
    pub stderr: Receiver<PumpEvent>,
    pub readers: Vec<JoinHandle<()>>,
}

impl StreamPump {
    /// Take the process's pipes and start both readers.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError::MissingPipe` if a pipe was not captured.
    pub fn attach(
        process: &mut AssistantProcess,
        filter: &OutputFilter,
        buffer: usize,
    ) -> Result<Self, SpawnError> {
        let stdin = process.take_stdin().ok_or(SpawnError::MissingPipe("stdin"))?;
        let stdout = process.take_stdout().ok_or(SpawnError::MissingPipe("stdout"))?;
        let stderr = process.take_stderr().ok_or(SpawnError::MissingPipe("stderr"))?;

        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (err_tx, err_rx) = mpsc::channel(buffer);

        let readers = vec![
            spawn_reader(
                stdout,
                StreamKind::Stdout,
                LineDecoder::with_prompt_flush(filter.clone()),
                out_tx,
            ),
            spawn_reader(stderr, StreamKind::Stderr, LineDecoder::new(), err_tx),
        ];

        Ok(Self {
            writer: CommandWriter::new(stdin),
            stdout: out_rx,
            stderr: err_rx,
            readers,
        })
    }
}

/// Bounded ring of the most recent lines of one stream.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
