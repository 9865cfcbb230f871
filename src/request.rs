use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{StorageError, StorageResult};

/// Length of a derived request id, per the remote service's convention.
pub const REQUEST_ID_LENGTH: usize = 15;

/// A crawl target submitted by the user.
///
/// `id` is derived and never trusted from the caller except to validate it
/// against the derivation; everything else round-trips verbatim, including
/// unrecognized fields, via `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    #[serde(rename = "uniqueKey")]
    pub unique_key: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(rename = "retryCount", default)]
    pub retry_count: i64,
    #[serde(rename = "handledAt", skip_serializing_if = "Option::is_none", default)]
    pub handled_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Request {
    /// Validates and fills in `id`, failing if the caller supplied one that
    /// disagrees with the one derived from `unique_key`.
    pub fn finalize_id(&mut self) -> StorageResult<()> {
        let derived = derive_request_id(&self.unique_key);
        match &self.id {
            None => self.id = Some(derived),
            Some(supplied) if *supplied == derived => {}
            Some(_) => {
                return Err(StorageError::InvalidArgument(
                    "Request ID does not match its uniqueKey.".to_string(),
                ))
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.url.is_empty() {
            return Err(StorageError::InvalidArgument(
                "Request is missing required field \"url\".".to_string(),
            ));
        }
        if self.unique_key.is_empty() {
            return Err(StorageError::InvalidArgument(
                "Request is missing required field \"uniqueKey\".".to_string(),
            ));
        }
        Ok(())
    }
}

/// `id = first 15 characters of base64(SHA-256(uniqueKey))`, with `+`, `/`,
/// `=` stripped before truncation.
pub fn derive_request_id(unique_key: &str) -> String {
    let digest = Sha256::digest(unique_key.as_bytes());
    let encoded = BASE64.encode(digest);
    let stripped: String = encoded.chars().filter(|c| !matches!(c, '+' | '/' | '=')).collect();
    stripped.chars().take(REQUEST_ID_LENGTH).collect()
}

/// `orderNo` assignment: `NULL` when the request is already handled, else a
/// signed millisecond timestamp (negative ⇒ forefront, positive ⇒ tail).
pub fn compute_order_no(handled_at: Option<DateTime<Utc>>, forefront: bool, now_ms: i64) -> Option<i64> {
    if handled_at.is_some() {
        return None;
    }
    Some(if forefront { -now_ms } else { now_ms })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_stable_ids() {
        let id = derive_request_id("https://example.com/1");
        assert_eq!(id.len(), REQUEST_ID_LENGTH);
        assert_eq!(id, derive_request_id("https://example.com/1"));
        assert_ne!(id, derive_request_id("https://example.com/2"));
    }

    #[test]
    fn derived_ids_never_contain_unsafe_base64_chars() {
        for key in ["a", "https://x/?q=1&y=2", "", "unique-key-with-very-long-content"] {
            let id = derive_request_id(key);
            assert!(id.chars().all(|c| c != '+' && c != '/' && c != '='));
        }
    }

    #[test]
    fn finalize_id_fills_in_when_absent() {
        let mut req = Request {
            id: None,
            url: "https://example.com".to_string(),
            unique_key: "https://example.com".to_string(),
            method: default_method(),
            retry_count: 0,
            handled_at: None,
            extra: Default::default(),
        };
        req.finalize_id().unwrap();
        assert_eq!(req.id, Some(derive_request_id("https://example.com")));
    }

    #[test]
    fn finalize_id_rejects_mismatched_id() {
        let mut req = Request {
            id: Some("not-the-real-id".to_string()),
            url: "https://example.com".to_string(),
            unique_key: "https://example.com".to_string(),
            method: default_method(),
            retry_count: 0,
            handled_at: None,
            extra: Default::default(),
        };
        assert!(req.finalize_id().is_err());
    }

    #[test]
    fn order_no_encodes_handled_and_forefront() {
        assert_eq!(compute_order_no(Some(Utc::now()), false, 1000), None);
        assert_eq!(compute_order_no(None, true, 1000), Some(-1000));
        assert_eq!(compute_order_no(None, false, 1000), Some(1000));
    }
}
