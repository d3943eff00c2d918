use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::models::ProductRecord;

/// One decoded line of the chat response body.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord {
    Text(String),
    Products(Vec<ProductRecord>),
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Value,
}

/// Incremental newline-delimited JSON decoder.
///
/// Bytes after the last `\n` stay buffered until the next chunk completes the
/// line, so records and multi-byte characters may straddle chunk boundaries.
/// Lines that are not JSON, or carry an unrecognized `type`, are dropped and
/// decoding carries on with the next line.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    pending: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamRecord> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|byte| *byte == b'\n') else {
            return Vec::new();
        };

        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        complete
            .split(|byte| *byte == b'\n')
            .filter_map(decode_line)
            .collect()
    }

    /// Flushes a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Vec<StreamRecord> {
        let remainder = std::mem::take(&mut self.pending);
        decode_line(&remainder).into_iter().collect()
    }
}

fn decode_line(line: &[u8]) -> Option<StreamRecord> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(err) => {
            debug!(error = %err, "dropping chat stream line with invalid utf-8");
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }

    let raw = match serde_json::from_str::<RawRecord>(text) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(error = %err, "dropping malformed chat stream line");
            return None;
        }
    };

    match raw.kind.as_str() {
        "text" => match raw.content {
            Value::String(content) => Some(StreamRecord::Text(content)),
            _ => {
                debug!("dropping text record without string content");
                None
            }
        },
        "products" => match raw.content {
            Value::Null => Some(StreamRecord::Products(Vec::new())),
            content => match serde_json::from_value::<Vec<ProductRecord>>(content) {
                Ok(products) => Some(StreamRecord::Products(products)),
                Err(err) => {
                    debug!(error = %err, "dropping products record with invalid payload");
                    None
                }
            },
        },
        other => {
            debug!(record_type = other, "ignoring chat stream record of unknown type");
            None
        }
    }
}

/// Running text and product list of the reply being streamed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyAccumulator {
    pub text: String,
    pub products: Vec<ProductRecord>,
}

impl ReplyAccumulator {
    pub fn apply(&mut self, record: StreamRecord) {
        match record {
            StreamRecord::Text(content) => self.text.push_str(&content),
            StreamRecord::Products(products) => self.products.extend(products),
        }
    }
}
