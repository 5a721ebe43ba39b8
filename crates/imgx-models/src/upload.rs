//! Upload credential request and issued target.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default credential lifetime granted by the issuer (seconds).
pub const DEFAULT_CREDENTIAL_LIFETIME_SECS: u64 = 60;

/// Request for a write credential for one file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    #[validate(length(min = 1, message = "file name must not be empty"))]
    pub file_name: String,
    #[validate(range(min = 1, message = "file must not be empty"))]
    pub size_bytes: u64,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            file_name: file_name.into(),
            size_bytes,
        }
    }
}

/// A time-limited write credential for one object.
///
/// Non-empty `form_fields` means a multipart POST upload; otherwise the
/// URL is a presigned PUT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub write_url: String,
    #[serde(default)]
    pub form_fields: BTreeMap<String, String>,
    pub destination_key: String,
    /// When the credential was received
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
    #[serde(default = "default_lifetime")]
    pub expires_in_secs: u64,
}

fn default_lifetime() -> u64 {
    DEFAULT_CREDENTIAL_LIFETIME_SECS
}

impl UploadTarget {
    pub fn new(
        write_url: impl Into<String>,
        form_fields: BTreeMap<String, String>,
        destination_key: impl Into<String>,
        expires_in_secs: u64,
    ) -> Self {
        Self {
            write_url: write_url.into(),
            form_fields,
            destination_key: destination_key.into(),
            issued_at: Utc::now(),
            expires_in_secs,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(self.expires_in_secs as i64)
    }

    /// Whether an upload starting at `now` would use an expired credential.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_form_upload(&self) -> bool {
        !self.form_fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(UploadRequest::new("a.png", 10).validate().is_ok());
        assert!(UploadRequest::new("", 10).validate().is_err());
        assert!(UploadRequest::new("a.png", 0).validate().is_err());
    }

    #[test]
    fn test_target_expiry() {
        let target = UploadTarget::new("https://s3/put", BTreeMap::new(), "k", 60);
        assert!(!target.is_expired(target.issued_at));
        assert!(target.is_expired(target.issued_at + Duration::seconds(60)));
        assert!(!target.is_form_upload());
    }

    #[test]
    fn test_target_deserializes_issuer_payload() {
        let json = r#"{
            "writeUrl": "https://bucket.s3.amazonaws.com",
            "formFields": {"key": "uploads/a.png", "policy": "abc"},
            "destinationKey": "uploads/a.png"
        }"#;
        let target: UploadTarget = serde_json::from_str(json).unwrap();
        assert!(target.is_form_upload());
        assert_eq!(target.expires_in_secs, DEFAULT_CREDENTIAL_LIFETIME_SECS);
        assert_eq!(target.destination_key, "uploads/a.png");
    }
}
