//! Line-oriented decoder for upstream completion streams

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::assemble::{AssembledResult, Assembler, StreamFragment};
use crate::error::LlmError;
use crate::protocol::StreamChunk;

/// Payload that marks the end of a decoded stream
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// How upstream lines are turned into fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Decode each `data:` frame and fold it into the running result
    Decode,
    /// Forward every line untouched until the upstream closes
    Raw,
}

/// Pulls fragments off one upstream response body
///
/// Not restartable: once the sentinel or end of input is reached every
/// further call yields `None`.
pub struct UpstreamStreamParser<R> {
    reader: R,
    mode: ParseMode,
    buf: Vec<u8>,
    assembler: Assembler,
    finished: bool,
    skipped: usize,
}

impl<R> UpstreamStreamParser<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R, mode: ParseMode) -> Self {
        Self {
            reader,
            mode,
            buf: Vec::with_capacity(1024),
            assembler: Assembler::default(),
            finished: false,
            skipped: 0,
        }
    }

    /// Next fragment, or `None` once the stream has ended
    ///
    /// Read errors end the stream with [`LlmError::Transport`]. Lines that
    /// fail to decode are counted and skipped.
    pub async fn next_fragment(&mut self) -> Result<Option<StreamFragment>, LlmError> {
        while !self.finished {
            self.buf.clear();

            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|e| LlmError::Transport(format!("failed to read upstream stream: {e}")))?;

            if read == 0 {
                self.finished = true;
                break;
            }

            let line = Bytes::copy_from_slice(&self.buf);

            if self.mode == ParseMode::Raw {
                return Ok(Some(StreamFragment::raw(line)));
            }

            if let Some(fragment) = self.decode(line) {
                return Ok(Some(fragment));
            }
        }

        Ok(None)
    }

    fn decode(&mut self, line: Bytes) -> Option<StreamFragment> {
        let Ok(text) = std::str::from_utf8(&line) else {
            self.skip("line is not valid UTF-8");
            return None;
        };

        let payload = strip_frame(text);

        if payload.is_empty() {
            return None;
        }

        if payload == DONE_SENTINEL {
            self.finished = true;
            return None;
        }

        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => {
                self.assembler.fold(&chunk, payload);
                Some(StreamFragment::from_chunk(&chunk, line))
            }
            Err(e) => {
                self.skip(&e.to_string());
                None
            }
        }
    }

    fn skip(&mut self, reason: &str) {
        self.skipped += 1;
        tracing::debug!(reason, skipped = self.skipped, "skipping undecodable upstream line");
    }

    /// Number of lines dropped because they could not be decoded
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Close the fold and return the reassembled reply
    ///
    /// In raw mode nothing is folded, so the result is always empty.
    pub fn finish(self) -> AssembledResult {
        self.assembler.finish()
    }
}

/// Trim the line and drop a leading `data:` marker
fn strip_frame(line: &str) -> &str {
    let trimmed = line.trim();
    trimmed.strip_prefix(DATA_PREFIX).unwrap_or(trimmed).trim()
}
