//! Delegated-access URL signing.
//!
//! A delegated URL has the form `<base>/objects/<key>?token=<jwt>`. The token
//! is an HS256 JWT binding the operation, the key and, for part uploads, the
//! upload session and part number. Whoever holds the URL may perform exactly
//! that operation until the token expires.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::PresignedUrl;
use crate::{CabinetError, Result};

/// Longest lifetime a delegated URL may have (7 days).
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 3600);

/// Check a requested URL lifetime.
pub fn validate_expiry(expires_in: Duration) -> Result<()> {
    if expires_in.as_secs() == 0 || expires_in > MAX_PRESIGN_EXPIRY {
        return Err(CabinetError::Validation(format!(
            "url expiry must be between 1 and {} seconds",
            MAX_PRESIGN_EXPIRY.as_secs()
        )));
    }
    Ok(())
}

/// Operation a delegated URL grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignedOperation {
    /// Upload a whole object.
    Put,
    /// Download an object.
    Get,
    /// Upload one part of a multipart session.
    UploadPart,
}

impl SignedOperation {
    /// HTTP method used with the URL.
    pub fn method(&self) -> &'static str {
        match self {
            SignedOperation::Put | SignedOperation::UploadPart => "PUT",
            SignedOperation::Get => "GET",
        }
    }
}

/// Claims carried by a delegated URL's token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlClaims {
    /// Granted operation.
    pub op: SignedOperation,
    /// Object key.
    pub key: String,
    /// Multipart session (part uploads only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    /// Part number (part uploads only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_number: Option<u32>,
    /// Expected content type (whole-object uploads only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Token ID.
    pub jti: String,
}

impl UrlClaims {
    fn new(op: SignedOperation, key: &str, expires_in: Duration) -> Self {
        let now = Utc::now().timestamp();
        Self {
            op,
            key: key.to_string(),
            upload_id: None,
            part_number: None,
            content_type: None,
            iat: now,
            exp: now + expires_in.as_secs() as i64,
            jti: Uuid::new_v4().to_string(),
        }
    }
}

/// Issues and verifies delegated-access URLs.
#[derive(Clone)]
pub struct UrlSigner {
    base_url: Url,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl UrlSigner {
    /// Create a signer issuing URLs under `base_url`.
    pub fn new(base_url: &str, secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(CabinetError::Config("signing secret must not be empty".to_string()));
        }
        let base_url = Url::parse(base_url)
            .map_err(|e| CabinetError::Config(format!("invalid public url {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CabinetError::Config(format!(
                "public url {base_url} cannot carry a path"
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Ok(Self {
            base_url,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// URL for uploading a whole object.
    pub fn upload_url(&self, key: &str, content_type: &str, expires_in: Duration) -> Result<PresignedUrl> {
        validate_expiry(expires_in)?;
        let mut claims = UrlClaims::new(SignedOperation::Put, key, expires_in);
        claims.content_type = Some(content_type.to_string());
        self.issue(claims, expires_in)
    }

    /// URL for downloading an object.
    pub fn download_url(&self, key: &str, expires_in: Duration) -> Result<PresignedUrl> {
        validate_expiry(expires_in)?;
        self.issue(UrlClaims::new(SignedOperation::Get, key, expires_in), expires_in)
    }

    /// URL for uploading one part of a multipart session.
    pub fn part_url(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> Result<PresignedUrl> {
        validate_expiry(expires_in)?;
        let mut claims = UrlClaims::new(SignedOperation::UploadPart, key, expires_in);
        claims.upload_id = Some(upload_id.to_string());
        claims.part_number = Some(part_number);
        self.issue(claims, expires_in)
    }

    fn issue(&self, claims: UrlClaims, expires_in: Duration) -> Result<PresignedUrl> {
        let token = self.encode_claims(&claims)?;

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CabinetError::Config("public url cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("objects")
            .push(&claims.key);
        {
            let mut query = url.query_pairs_mut();
            if let (Some(upload_id), Some(part_number)) = (&claims.upload_id, claims.part_number) {
                query.append_pair("uploadId", upload_id);
                query.append_pair("partNumber", &part_number.to_string());
            }
            query.append_pair("token", &token);
        }

        let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);
        Ok(PresignedUrl {
            url: url.into(),
            method: claims.op.method(),
            expires_in: expires_in.as_secs(),
            expires_at,
        })
    }

    fn encode_claims(&self, claims: &UrlClaims) -> Result<String> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)?)
    }

    /// Decode and check a token's signature and expiry.
    pub fn verify_token(&self, token: &str) -> Result<UrlClaims> {
        let data = decode::<UrlClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Verify a full delegated URL for the expected operation.
    ///
    /// The token must be valid, grant `expected`, and be bound to the key in
    /// the URL's path.
    pub fn verify_url(&self, url: &str, expected: SignedOperation) -> Result<UrlClaims> {
        let url = Url::parse(url).map_err(|e| CabinetError::Storage(format!("bad url: {e}")))?;

        let token = url
            .query_pairs()
            .find(|(name, _)| name == "token")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| CabinetError::Storage("url carries no token".to_string()))?;
        let claims = self.verify_token(&token)?;

        if claims.op != expected {
            return Err(CabinetError::Storage(format!(
                "url grants {:?}, not {:?}",
                claims.op, expected
            )));
        }

        let path_key = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(|segment| urlencoding::decode(segment).map(|s| s.into_owned()))
            .transpose()
            .map_err(|e| CabinetError::Storage(format!("bad key encoding: {e}")))?;
        if path_key.as_deref() != Some(claims.key.as_str()) {
            return Err(CabinetError::Storage(
                "url path does not match its token".to_string(),
            ));
        }

        Ok(claims)
    }
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}
