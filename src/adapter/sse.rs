//! Streaming decoder shared by the bundled adapters (spec.md §4.1, DESIGN
//! NOTES §9): a line-at-a-time reader over the HTTP body. SSE frames are
//! `data: <json>` lines terminated by `data: [DONE]`; Triton frames are
//! one JSON object per line. A single malformed frame is skipped, never
//! aborts the request.

use serde::Deserialize;

/// Accumulates partial lines across chunk boundaries and yields complete,
/// UTF-8-lossy-decoded lines as they close out.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every complete line it closes
    /// (not including the trailing `\n`). Any remaining partial line is
    /// retained for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut lines = Vec::new();
        loop {
            let Some(pos) = self.partial.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line_bytes: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]);
            let trimmed = line.trim_end_matches('\r');
            lines.push(trimmed.to_string());
        }
        lines
    }
}

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A non-empty `choices[0].delta.content` event.
    Token(String),
    /// `data: [DONE]`.
    Done,
}

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one SSE line. Returns `None` for comment/blank lines and for
/// frames whose JSON fails to parse or whose delta content is empty —
/// these are skipped, not treated as a request failure.
pub fn parse_openai_sse_line(line: &str) -> Option<SseFrame> {
    let data = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseFrame::Done);
    }
    let chunk: OpenAiChunk = serde_json::from_str(data).ok()?;
    let content = chunk.choices.first()?.delta.content.clone()?;
    if content.is_empty() {
        return None;
    }
    Some(SseFrame::Token(content))
}

#[derive(Debug, Deserialize, Default)]
struct TritonFrame {
    #[serde(default)]
    text_output: Option<String>,
}

/// Parse one line of Triton's newline-delimited JSON stream, returning
/// the cumulative `text_output` so far (the caller diffs against the
/// previous frame to find the new suffix).
pub fn parse_triton_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let frame: TritonFrame = serde_json::from_str(line).ok()?;
    frame.text_output
}
