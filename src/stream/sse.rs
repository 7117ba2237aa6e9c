//! Incremental Server-Sent Events decoder for the assistant stream.
//!
//! Bytes are buffered until a full line is available, so multi-byte UTF-8
//! sequences split across network chunks decode correctly.
//!
//! ```text
//! data: Two
//!
//! data: {"type":"food_log","status":"logged"}
//!
//! event: done
//! data: [DONE]
//! ```

/// One decoded SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

/// What a message means to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal<'a> {
    /// A frame to classify.
    Data(&'a str),
    /// Explicit end of the response.
    Done,
    /// Explicit server-side failure, with its detail.
    Error(&'a str),
}

impl SseMessage {
    pub fn signal(&self) -> Signal<'_> {
        match self.event.as_deref() {
            Some("done") => Signal::Done,
            Some("error") => Signal::Error(&self.data),
            _ if self.data.trim() == "[DONE]" => Signal::Done,
            _ => Signal::Data(&self.data),
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    /// An `event:` line alone still terminates as a message (e.g. `event: done`).
    touched: bool,
}

impl Pending {
    fn take(&mut self) -> Option<SseMessage> {
        if !self.touched {
            return None;
        }
        let pending = std::mem::take(self);
        Some(SseMessage {
            event: pending.event,
            data: pending.data.join("\n"),
            id: pending.id,
        })
    }

    fn line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.take();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                self.data.push(value.to_owned());
                self.touched = true;
            }
            "event" => {
                self.event = Some(value.to_owned());
                self.touched = true;
            }
            "id" => self.id = Some(value.to_owned()),
            _ => {}
        }
        None
    }
}

/// Byte-level decoder. Feed chunks with [`SseDecoder::push`], then call
/// [`SseDecoder::finish`] at end of stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    pending: Pending,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk and return every message it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(message) = self.pending.line(line) {
                messages.push(message);
            }
        }
        messages
    }

    /// Flush a trailing line and message left without a final blank line.
    pub fn finish(&mut self) -> Option<SseMessage> {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(message) = self.pending.line(line) {
                return Some(message);
            }
        }
        self.pending.take()
    }
}
