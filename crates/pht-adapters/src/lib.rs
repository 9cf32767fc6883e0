//! Versioned extractors turning a raw profile page into a [`ProfileSnapshot`].
//!
//! Every extractor follows the same contract: find an embedded-data marker in
//! the raw text, cut the payload span out of it, decode it, then walk a fixed
//! key path. Upstream layout changes get a new extractor version; nothing
//! downstream of the snapshot changes.

use pht_core::ProfileSnapshot;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "pht-adapters";

pub const UNIVERSAL_DATA_V1: &str = "universal-data-v1";
pub const DEFAULT_EXTRACTOR_VERSION: &str = UNIVERSAL_DATA_V1;

/// Coarse failure class, used to pick the message shown to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractFailure {
    /// The page does not carry the embedded payload at all.
    PageNotRecognized,
    /// The payload is there but is not valid structured data.
    PayloadUndecodable,
    /// The payload decoded but the expected objects are missing.
    UnexpectedStructure,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("embedded data marker `{marker}` not found")]
    MarkerNotFound { marker: &'static str },
    #[error("embedded data for `{marker}` has no closing `{closing}`")]
    UnterminatedPayload {
        marker: &'static str,
        closing: &'static str,
    },
    #[error("embedded data is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("key path `{path}` missing from embedded data")]
    MissingPath { path: String },
    #[error("user field `{field}` missing or not a string")]
    MissingField { field: &'static str },
}

impl ExtractError {
    pub fn failure(&self) -> ExtractFailure {
        match self {
            ExtractError::MarkerNotFound { .. } => ExtractFailure::PageNotRecognized,
            ExtractError::UnterminatedPayload { .. } | ExtractError::InvalidPayload(_) => {
                ExtractFailure::PayloadUndecodable
            }
            ExtractError::MissingPath { .. } | ExtractError::MissingField { .. } => {
                ExtractFailure::UnexpectedStructure
            }
        }
    }
}

pub trait ProfileExtractor: Send + Sync {
    fn version(&self) -> &'static str;

    fn extract(&self, page: &str) -> Result<ProfileSnapshot, ExtractError>;
}

/// Returns the span between the end of the tag carrying `marker` and the next
/// `closing` delimiter. Plain text scanning, no markup parsing.
pub fn embedded_span<'a>(
    page: &'a str,
    marker: &'static str,
    closing: &'static str,
) -> Result<&'a str, ExtractError> {
    let marker_at = page
        .find(marker)
        .ok_or(ExtractError::MarkerNotFound { marker })?;
    let after_marker = &page[marker_at + marker.len()..];
    let tag_end = after_marker
        .find('>')
        .ok_or(ExtractError::UnterminatedPayload { marker, closing })?;
    let body = &after_marker[tag_end + 1..];
    let body_end = body
        .find(closing)
        .ok_or(ExtractError::UnterminatedPayload { marker, closing })?;
    Ok(&body[..body_end])
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn json_object_at<'a>(value: &'a JsonValue, path: &[&str]) -> Result<&'a JsonValue, ExtractError> {
    json_at(value, path)
        .filter(|v| v.is_object())
        .ok_or_else(|| ExtractError::MissingPath {
            path: path.join("."),
        })
}

fn user_str(user: &JsonValue, field: &'static str) -> Result<String, ExtractError> {
    user.get(field)
        .and_then(JsonValue::as_str)
        .map(ToString::to_string)
        .ok_or(ExtractError::MissingField { field })
}

/// Reads the `__UNIVERSAL_DATA_FOR_REHYDRATION__` script payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniversalDataExtractor;

impl UniversalDataExtractor {
    pub const MARKER: &'static str = r#"id="__UNIVERSAL_DATA_FOR_REHYDRATION__""#;
    pub const CLOSING: &'static str = "</script>";
    pub const USER_INFO_PATH: [&'static str; 3] =
        ["__DEFAULT_SCOPE__", "webapp.user-detail", "userInfo"];
}

impl ProfileExtractor for UniversalDataExtractor {
    fn version(&self) -> &'static str {
        UNIVERSAL_DATA_V1
    }

    fn extract(&self, page: &str) -> Result<ProfileSnapshot, ExtractError> {
        let span = embedded_span(page, Self::MARKER, Self::CLOSING)?;
        let payload: JsonValue = serde_json::from_str(span.trim())?;

        let user_info = json_object_at(&payload, &Self::USER_INFO_PATH)?;
        let user = json_object_at(user_info, &["user"])?;
        let stats = json_object_at(user_info, &["stats"])?;

        Ok(ProfileSnapshot {
            identity_id: user_str(user, "id")?,
            handle: user_str(user, "uniqueId")?,
            display_name: user_str(user, "nickname")?,
            user: user.clone(),
            stats: stats.clone(),
            extractor_version: self.version().to_string(),
        })
    }
}

pub fn extractor_for_version(version: &str) -> Option<Box<dyn ProfileExtractor>> {
    match version {
        UNIVERSAL_DATA_V1 => Some(Box::new(UniversalDataExtractor)),
        _ => None,
    }
}

pub fn known_extractor_versions() -> &'static [&'static str] {
    &[UNIVERSAL_DATA_V1]
}
