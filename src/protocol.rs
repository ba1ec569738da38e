//! Chat stream wire protocol
//!
//! The backend answers `GET /chat` with a Server-Sent-Events body: blocks of
//! `event:`/`data:` lines separated by a blank line. Each block is one *raw
//! unit*; each unit decodes to at most one [`ChatRecord`]. Malformed units
//! are skipped by returning `None` so a noisy backend can never kill a
//! stream.

use serde::{Deserialize, Serialize};

/// A knowledge-base article backing part of an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub source_file: String,
}

/// One decoded protocol record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRecord {
    /// Incremental answer fragment, appended in arrival order.
    Token(String),
    /// Consulted sources for the in-flight answer.
    Sources(Vec<SourceRef>),
    /// Complete answer replacing anything streamed so far.
    Answer(String),
    /// Backend-reported failure, rendered verbatim to the user.
    Error(String),
    /// Explicit end-of-stream marker (`event: end`).
    End,
}

/// Decode one raw unit into a record.
///
/// A payload carrying several recognized fields resolves in fixed precedence:
/// `error`, then `answer`, then `sources`, then `token`. Units that are not
/// JSON objects, or objects with no recognized field, yield `None`.
pub fn parse_unit(unit: &str) -> Option<ChatRecord> {
    let mut event_name: Option<&str> = None;
    let mut data = String::new();

    for line in unit.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("data:") {
            // Multiple data lines in one unit join with a newline
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // Comment lines and unknown fields are ignored
    }

    match event_name {
        Some("end") => return Some(ChatRecord::End),
        // The protocol defines no other named events
        Some(name) if name != "message" => return None,
        _ => {}
    }

    if data.is_empty() {
        return None;
    }

    let payload: RecordPayload = serde_json::from_str(&data).ok()?;
    if let Some(message) = payload.error {
        Some(ChatRecord::Error(message))
    } else if let Some(answer) = payload.answer {
        Some(ChatRecord::Answer(answer))
    } else if let Some(sources) = payload.sources {
        Some(ChatRecord::Sources(sources))
    } else if let Some(token) = payload.token {
        Some(ChatRecord::Token(token))
    } else {
        None
    }
}

/// Incremental splitter from transport bytes to raw units.
///
/// Feed arbitrary byte chunks with [`push`](Self::push), then drain complete
/// units with [`next_unit`](Self::next_unit). Chunk boundaries may fall
/// anywhere, including inside a UTF-8 sequence; invalid bytes decode to
/// U+FFFD instead of failing the stream. Call [`finish`](Self::finish) once
/// the transport closes to flush a final unit that lacks its trailing blank
/// line.
#[derive(Debug, Default)]
pub struct UnitSplitter {
    /// Undecoded byte tail (at most one partial UTF-8 sequence).
    raw: Vec<u8>,
    /// Decoded text not yet consumed as complete lines.
    text: String,
    /// Complete lines of the unit currently being assembled.
    lines: Vec<String>,
}

impl UnitSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of transport bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.raw.extend_from_slice(bytes);
        self.decode_raw();
    }

    /// Next complete unit, if the buffered text contains one.
    pub fn next_unit(&mut self) -> Option<String> {
        while let Some(newline) = self.text.find('\n') {
            let mut line: String = self.text.drain(..=newline).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            if line.is_empty() {
                if !self.lines.is_empty() {
                    let unit = self.lines.join("\n");
                    self.lines.clear();
                    return Some(unit);
                }
                // Runs of blank lines between units carry nothing
            } else {
                self.lines.push(line);
            }
        }
        None
    }

    /// Flush the trailing unit after the transport closed.
    ///
    /// Call only after [`next_unit`](Self::next_unit) returns `None`.
    pub fn finish(&mut self) -> Option<String> {
        let mut tail = std::mem::take(&mut self.text);
        if tail.ends_with('\r') {
            tail.pop();
        }
        if !tail.is_empty() {
            self.lines.push(tail);
        }
        if self.lines.is_empty() {
            return None;
        }
        let unit = self.lines.join("\n");
        self.lines.clear();
        Some(unit)
    }

    /// Move decodable bytes from `raw` into `text`, keeping at most one
    /// incomplete UTF-8 sequence buffered.
    fn decode_raw(&mut self) {
        loop {
            if self.raw.is_empty() {
                return;
            }
            match std::str::from_utf8(&self.raw) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.raw.clear();
                    return;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    if let Some(valid) = self
                        .raw
                        .get(..valid_up_to)
                        .and_then(|bytes| std::str::from_utf8(bytes).ok())
                    {
                        self.text.push_str(valid);
                    }
                    match err.error_len() {
                        Some(bad) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.raw.drain(..valid_up_to + bad);
                        }
                        None => {
                            // Incomplete sequence at the tail, wait for more bytes
                            self.raw.drain(..valid_up_to);
                            return;
                        }
                    }
                }
            }
        }
    }
}

// Wire payload types

#[derive(Debug, Deserialize)]
struct RecordPayload {
    error: Option<String>,
    answer: Option<String>,
    sources: Option<Vec<SourceRef>>,
    token: Option<String>,
}
