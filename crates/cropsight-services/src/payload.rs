//! Extraction of the structured result from batch worker stdout.
//!
//! Workers print progress and model-loading chatter before their answer.
//! The answer is the first line whose trimmed text starts with `{`.

use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("no line starting with '{{' in worker output")]
    NoStructuredOutput,
    #[error("structured line failed to decode: {source}")]
    Malformed {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn extract_payload(stdout: &str) -> Result<Map<String, Value>, PayloadError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
        .ok_or(PayloadError::NoStructuredOutput)?;

    serde_json::from_str(line).map_err(|source| PayloadError::Malformed {
        line: line.to_string(),
        source,
    })
}
