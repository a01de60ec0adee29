//! Server-sent-event decoding for streamed chat completions.
//!
//! OpenAI-compatible endpoints emit `data: {json}` lines separated by blank
//! lines and finish with `data: [DONE]`. Network chunks do not respect line
//! boundaries, so bytes are buffered until a full line is available.

use std::fmt::Display;

use async_stream::try_stream;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;

use super::litellm::{ApiErrorResponse, FragmentStream};
use crate::error::LlmError;

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Outcome of decoding one SSE line.
#[derive(Debug, PartialEq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

fn decode_line(line: &str) -> Result<SseLine, LlmError> {
    let line = line.trim();
    // comments (": keep-alive"), event names and blank separators carry no content
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    if let Ok(err) = serde_json::from_str::<ApiErrorResponse>(data) {
        return Err(LlmError::Stream(err.error.message));
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| LlmError::ParseError(format!("Invalid stream chunk: {}", e)))?;
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();

    if content.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Fragment(content))
    }
}

/// Turns a raw SSE byte stream into content fragments.
///
/// Ends at `[DONE]` or when the body closes, whichever comes first.
pub fn content_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let stream = try_stream! {
        let mut bytes = Box::pin(bytes);
        // raw bytes: a multi-byte character may straddle two chunks
        let mut buffer: Vec<u8> = Vec::new();
        let mut done = false;

        'body: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| LlmError::Stream(e.to_string()))?;
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                match decode_line(&String::from_utf8_lossy(&line))? {
                    SseLine::Fragment(text) => yield text,
                    SseLine::Done => {
                        done = true;
                        break 'body;
                    }
                    SseLine::Skip => {}
                }
            }
        }

        // a final line without a trailing newline
        if !done {
            if let SseLine::Fragment(text) = decode_line(&String::from_utf8_lossy(&buffer))? {
                yield text;
            }
        }
    };
    stream.boxed()
}
