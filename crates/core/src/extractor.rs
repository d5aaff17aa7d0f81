//! Code extraction from the generation engine's streamed output.
//!
//! The engine answers with newline-delimited JSON fragments, each carrying an
//! incremental piece of text. [`StreamAccumulator`] concatenates those pieces
//! in delivery order; [`extract_source`] then isolates the first fenced code
//! section of the finished buffer.

use serde::Deserialize;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fence delimiting a code section in generated text.
pub const FENCE: &str = "```";

/// Language tags recognised directly after an opening fence, longest first so
/// that `javascript` wins over `js`.
const LANGUAGE_TAGS: [&str; 6] = ["javascript", "typescript", "nodejs", "node", "js", "ts"];

// ---------------------------------------------------------------------------
// Stream fragments
// ---------------------------------------------------------------------------

/// One line of the engine's NDJSON stream.
///
/// Unknown fields (`model`, `created_at`, timing counters) are ignored.
#[derive(Debug, Deserialize)]
pub struct StreamFragment {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Incrementally assembles the engine's text from raw stream chunks.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere, so bytes are
/// buffered until a newline arrives. Lines that are not valid fragments are
/// skipped with a warning.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pending: Vec<u8>,
    text: String,
    skipped: usize,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk of the response body.
    ///
    /// Fails only when the engine reports an error inside the stream.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<(), CoreError> {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.push_raw_line(&line[..line.len() - 1])?;
        }
        Ok(())
    }

    /// Feed one complete NDJSON line.
    pub fn push_line(&mut self, line: &str) -> Result<(), CoreError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let fragment: StreamFragment = match serde_json::from_str(line) {
            Ok(fragment) => fragment,
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, "Skipping malformed stream fragment");
                return Ok(());
            }
        };

        if let Some(error) = fragment.error {
            return Err(CoreError::GenerationFailed(error));
        }

        self.text.push_str(&fragment.response);
        self.done |= fragment.done;
        Ok(())
    }

    /// Number of lines skipped because they were not valid fragments.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Whether a fragment with `done: true` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Flush any trailing partial line and return the concatenated text.
    pub fn finish(mut self) -> Result<String, CoreError> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.push_raw_line(&rest)?;
        }
        Ok(self.text)
    }

    fn push_raw_line(&mut self, raw: &[u8]) -> Result<(), CoreError> {
        match std::str::from_utf8(raw) {
            Ok(line) => self.push_line(line),
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, "Skipping stream fragment with invalid UTF-8");
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fence extraction
// ---------------------------------------------------------------------------

/// Return the interior of the first fenced code section in `buffer`.
///
/// The opening fence may carry a language tag, either on its own line or
/// glued to the code when the engine streamed them as separate fragments.
/// A missing section, a missing closing fence, or an empty interior is a
/// [`CoreError::MalformedGenerationOutput`].
pub fn extract_source(buffer: &str) -> Result<String, CoreError> {
    let open = buffer.find(FENCE).ok_or_else(|| {
        CoreError::MalformedGenerationOutput("no fenced code section in engine output".into())
    })?;

    let after_open = &buffer[open + FENCE.len()..];
    let body = &after_open[info_string_len(after_open)..];

    let close = body.find(FENCE).ok_or_else(|| {
        CoreError::MalformedGenerationOutput(
            "engine output ended before the closing code fence".into(),
        )
    })?;

    let source = body[..close].trim();
    if source.is_empty() {
        return Err(CoreError::MalformedGenerationOutput(
            "fenced code section is empty".into(),
        ));
    }
    Ok(source.to_string())
}

/// Convenience wrapper: accumulate complete NDJSON lines, then extract.
pub fn extract_from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<String, CoreError> {
    let mut acc = StreamAccumulator::new();
    for line in lines {
        acc.push_line(line)?;
    }
    extract_source(&acc.finish()?)
}

/// Length of the info string following an opening fence.
///
/// A fence line holding only a bare word (`python\n`, `c++\n`) is consumed
/// together with its newline. Anything else on that line is code, so only a
/// known language tag glued to its start is stripped.
fn info_string_len(after_open: &str) -> usize {
    if let Some(nl) = after_open.find('\n') {
        let info = after_open[..nl].trim();
        if info.is_empty() || is_bare_word(info) {
            return nl + 1;
        }
    }

    LANGUAGE_TAGS
        .iter()
        .find(|tag| {
            after_open
                .get(..tag.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(tag))
        })
        .map_or(0, |tag| tag.len())
}

/// Whether `info` looks like a language name rather than a line of code.
fn is_bare_word(info: &str) -> bool {
    info.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '.' | '-' | '#'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
