//! Typed decoding of raw model output.

use radar_core::{Candidate, Classification, ScoreResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::ReasoningError;

/// Removes a surrounding markdown code fence (with optional language tag).
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, ReasoningError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(ReasoningError::Empty);
    }
    serde_json::from_str(body).map_err(|err| ReasoningError::Unparsable(err.to_string()))
}

pub fn parse_classification(raw: &str) -> Result<Classification, ReasoningError> {
    parse_json(raw)
}

pub fn parse_score(raw: &str) -> Result<ScoreResult, ReasoningError> {
    parse_json(raw)
}

/// The shapes an extraction response comes back in, in decode precedence.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionShape {
    List(Vec<Value>),
    Wrapped(Vec<Value>),
    Single(Value),
    Unrecognized,
}

impl ExtractionShape {
    pub fn of(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::List(items),
            Value::Object(map) => {
                if let Some(Value::Array(items)) = map.get("opportunities") {
                    Self::Wrapped(items.clone())
                } else if map.contains_key("title") {
                    Self::Single(Value::Object(map))
                } else {
                    Self::Unrecognized
                }
            }
            _ => Self::Unrecognized,
        }
    }

    /// Decodes each object element; anything that is not a usable object is dropped.
    pub fn into_candidates(self) -> Vec<Candidate> {
        let items = match self {
            Self::List(items) | Self::Wrapped(items) => items,
            Self::Single(item) => vec![item],
            Self::Unrecognized => return Vec::new(),
        };
        items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|item| match serde_json::from_value::<Candidate>(item) {
                Ok(candidate) => Some(candidate),
                Err(err) => {
                    debug!(error = %err, "dropping undecodable extraction element");
                    None
                }
            })
            .collect()
    }
}

pub fn decode_extraction(raw: &str) -> Result<Vec<Candidate>, ReasoningError> {
    let value: Value = parse_json(raw)?;
    Ok(ExtractionShape::of(value).into_candidates())
}
