//! Object storage gateway for Cabinet.
//!
//! This module provides the blob side of a file item:
//! - The [`ObjectGateway`] abstraction (put, head, delete, list)
//! - Delegated-access URL signing for direct client uploads/downloads
//! - Multipart session lifecycle (initiate, part URL, complete, abort)
//! - A local filesystem implementation

mod local;
mod presign;

pub use local::LocalObjectStore;
pub use presign::{validate_expiry, SignedOperation, UrlClaims, UrlSigner, MAX_PRESIGN_EXPIRY};

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Highest part number accepted in a multipart upload.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Metadata returned by a head request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Content type recorded at upload.
    pub content_type: String,
    /// Integrity tag of the stored bytes.
    pub etag: String,
    /// When the object was last written.
    pub last_modified: DateTime<Utc>,
}

/// A time-limited URL allowing one storage operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresignedUrl {
    /// The URL to call.
    pub url: String,
    /// HTTP method the URL is valid for.
    pub method: &'static str,
    /// Lifetime in seconds from issue.
    pub expires_in: u64,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
}

/// One uploaded part, as reported back by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: u32,
    /// Opaque integrity tag returned by the part upload.
    pub etag: String,
}

impl CompletedPart {
    /// Create a new completed part.
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

/// Check a part list: non-empty, numbers in range and strictly ascending,
/// non-empty tags.
pub fn validate_parts(parts: &[CompletedPart]) -> Result<()> {
    use crate::CabinetError;

    if parts.is_empty() {
        return Err(CabinetError::InvalidOperation(
            "multipart completion requires at least one part".to_string(),
        ));
    }

    let mut previous = 0;
    for part in parts {
        if part.part_number == 0 || part.part_number > MAX_PART_NUMBER {
            return Err(CabinetError::Validation(format!(
                "part number {} is outside 1..={MAX_PART_NUMBER}",
                part.part_number
            )));
        }
        if part.part_number <= previous {
            return Err(CabinetError::InvalidOperation(format!(
                "part numbers must be strictly ascending (got {} after {previous})",
                part.part_number
            )));
        }
        if part.etag.trim().is_empty() {
            return Err(CabinetError::InvalidOperation(format!(
                "part {} has no etag",
                part.part_number
            )));
        }
        previous = part.part_number;
    }
    Ok(())
}

/// Trait for blob store backends.
///
/// `delete_object` is idempotent: removing an absent key succeeds.
pub trait ObjectGateway: Send + Sync {
    /// Store an object directly.
    fn put_object(
        &self,
        key: &str,
        content: &[u8],
        content_type: &str,
    ) -> impl Future<Output = Result<ObjectMetadata>> + Send;

    /// Look up an object's metadata; None if it does not exist.
    fn head_object(&self, key: &str) -> impl Future<Output = Result<Option<ObjectMetadata>>> + Send;

    /// Release an object.
    fn delete_object(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// List stored objects whose key starts with `prefix`.
    fn list_objects(&self, prefix: &str)
        -> impl Future<Output = Result<Vec<ObjectMetadata>>> + Send;

    /// Issue a URL a client can PUT the object to.
    fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> impl Future<Output = Result<PresignedUrl>> + Send;

    /// Issue a URL a client can GET the object from.
    fn presign_download(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> impl Future<Output = Result<PresignedUrl>> + Send;

    /// Start a multipart session; returns its upload ID.
    fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Issue a URL a client can PUT one part to.
    fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> impl Future<Output = Result<PresignedUrl>> + Send;

    /// Assemble the listed parts into the final object.
    fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> impl Future<Output = Result<ObjectMetadata>> + Send;

    /// Discard a multipart session and its parts.
    fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CabinetError;

    #[test]
    fn test_validate_parts_accepts_ascending() {
        let parts = vec![CompletedPart::new(1, "a"), CompletedPart::new(2, "b")];
        assert!(validate_parts(&parts).is_ok());

        // Gaps are allowed
        let parts = vec![CompletedPart::new(1, "a"), CompletedPart::new(5, "b")];
        assert!(validate_parts(&parts).is_ok());
    }

    #[test]
    fn test_validate_parts_rejects_empty() {
        assert!(matches!(
            validate_parts(&[]),
            Err(CabinetError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_validate_parts_rejects_unordered_or_duplicate() {
        let parts = vec![CompletedPart::new(2, "a"), CompletedPart::new(1, "b")];
        assert!(validate_parts(&parts).is_err());

        let parts = vec![CompletedPart::new(1, "a"), CompletedPart::new(1, "b")];
        assert!(validate_parts(&parts).is_err());
    }

    #[test]
    fn test_validate_parts_rejects_bad_numbers_and_tags() {
        assert!(validate_parts(&[CompletedPart::new(0, "a")]).is_err());
        assert!(validate_parts(&[CompletedPart::new(MAX_PART_NUMBER + 1, "a")]).is_err());
        assert!(validate_parts(&[CompletedPart::new(1, " ")]).is_err());
    }
}
