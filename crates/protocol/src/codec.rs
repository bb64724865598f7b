//! Frame codec.
//!
//! One frame carries one [`StreamEvent`]: `data: <json>\n\n`. `Done` is sent
//! as the sentinel `data: [DONE]\n\n`; the JSON form `{"type":"done"}` is
//! accepted on decode too. Lines starting with `:` are comments and frames
//! made only of comments are skipped. On decode, frames may also be
//! delimited by `\r\n\r\n` or `\r\r`.

use toolrelay_core::error::ProtocolError;
use toolrelay_core::stream::StreamEvent;
use tracing::warn;

pub const DATA_PREFIX: &str = "data: ";
pub const DELIMITER: &str = "\n\n";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Frame delimiters accepted on decode.
const DELIMITERS: [&[u8]; 3] = [b"\r\n\r\n", b"\n\n", b"\r\r"];
const LONGEST_DELIMITER: usize = 4;

/// Encode one event as a complete frame.
pub fn encode_frame(event: &StreamEvent) -> String {
    let body = match event {
        StreamEvent::Done => DONE_SENTINEL.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize stream event");
            r#"{"type":"error","error":"failed to serialize event"}"#.to_string()
        }),
    };
    format!("{DATA_PREFIX}{body}{DELIMITER}")
}

/// Decode the text of one frame (delimiter already removed).
///
/// Returns `Ok(None)` for frames that carry no data (keep-alive comments).
pub fn decode_frame(frame: &str) -> Result<Option<StreamEvent>, ProtocolError> {
    let mut data: Vec<&str> = Vec::new();
    let mut saw_content = false;

    for line in frame.split(['\r', '\n']) {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        saw_content = true;
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if data.is_empty() {
        return if saw_content {
            Err(ProtocolError::MissingPrefix(truncate(frame)))
        } else {
            Ok(None)
        };
    }

    let body = data.join("\n");
    if body.trim() == DONE_SENTINEL {
        return Ok(Some(StreamEvent::Done));
    }

    serde_json::from_str(&body)
        .map(Some)
        .map_err(|e| ProtocolError::InvalidBody(format!("{e}: {}", truncate(&body))))
}

fn truncate(s: &str) -> String {
    const MAX: usize = 120;
    match s.char_indices().nth(MAX) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.to_string(),
    }
}

/// Incremental decoder over a chunked byte stream.
///
/// Bytes are buffered until a full frame is present, so chunks may split a
/// frame anywhere, including inside a multi-byte character. A malformed
/// frame yields one `Err` item and decoding continues with the next frame;
/// it is never turned into a server `Error` event.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; return every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, ProtocolError>> {
        self.buffer.extend_from_slice(chunk);

        let mut decoded = Vec::new();
        while let Some((end, delim_len)) = self.find_delimiter() {
            let frame: Vec<u8> = self.buffer.drain(..end + delim_len).collect();
            self.scanned = 0;
            decoded.extend(Self::decode_bytes(&frame[..end]));
        }
        decoded
    }

    /// Flush at end of stream. A trailing frame without its delimiter is
    /// decoded if it is complete; anything else is an error.
    pub fn finish(&mut self) -> Vec<Result<StreamEvent, ProtocolError>> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if rest.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }
        Self::decode_bytes(&rest).into_iter().collect()
    }

    /// Bytes held waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Earliest complete delimiter as `(frame_end, delimiter_len)`.
    ///
    /// A trailing `\r\n\r` may still grow into `\r\n\r\n`, so a match that
    /// touches the end of the buffer only counts once it cannot be extended.
    fn find_delimiter(&mut self) -> Option<(usize, usize)> {
        let start = self.scanned.saturating_sub(LONGEST_DELIMITER - 1);
        for i in start..self.buffer.len() {
            let rest = &self.buffer[i..];
            if b"\r\n\r\n".starts_with(rest) && rest.len() < LONGEST_DELIMITER && rest.len() > 1 {
                // `\r\n` or `\r\n\r` at the tail: wait for more bytes.
                break;
            }
            if let Some(delim) = DELIMITERS.iter().find(|d| rest.starts_with(d)) {
                return Some((i, delim.len()));
            }
        }
        self.scanned = self.buffer.len();
        None
    }

    fn decode_bytes(frame: &[u8]) -> Option<Result<StreamEvent, ProtocolError>> {
        let result = std::str::from_utf8(frame)
            .map_err(|_| ProtocolError::InvalidUtf8)
            .and_then(decode_frame);
        match result {
            Ok(event) => event.map(Ok),
            Err(e) => {
                warn!(error = %e, "Malformed frame");
                Some(Err(e))
            }
        }
    }
}
