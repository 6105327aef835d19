//! Replies read back from `keybase chat api`.

use serde::Deserialize;

use crate::{Error, Result};

/// A decoded reply line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub result: Option<ApiResult>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// The `result` object of a successful reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiResult {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub id: Option<u64>,
}

/// The `error` object of a failed reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

/// How a reply line should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The reply carried a result string.
    Result(String),
    /// The reply carried an explicit error.
    Error(String),
    /// The reply decoded to neither; a protocol anomaly.
    Invalid,
}

impl ApiResponse {
    /// Decode a reply line.
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| Error::json_parse(e, line))
    }

    /// Classify this reply. An error object wins over a result.
    pub fn classify(&self) -> Outcome {
        if let Some(error) = &self.error {
            return Outcome::Error(error.message.clone());
        }
        match self.result.as_ref().and_then(|r| r.message.as_ref()) {
            Some(message) => Outcome::Result(message.clone()),
            None => Outcome::Invalid,
        }
    }
}

/// Classify a raw reply line; undecodable lines are invalid.
pub fn classify_line(line: &str) -> Outcome {
    match ApiResponse::parse(line) {
        Ok(response) => response.classify(),
        Err(e) => {
            tracing::debug!(error = %e, "undecodable reply line");
            Outcome::Invalid
        }
    }
}

/// Check a result string against the literal expected for an operation,
/// ignoring case.
///
/// # Errors
///
/// [`Error::UnexpectedResult`] when the literal does not match.
pub fn expect_result(result: &str, expected: &'static str) -> Result<()> {
    if result.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Error::UnexpectedResult {
            expected,
            actual: result.to_string(),
        })
    }
}
