//! Local filesystem object store.
//!
//! Objects are named by the SHA-256 of their key and sharded by its first two
//! hex digits, so file names stay short whatever the key:
//! ```text
//! {root}/
//! ├── objects/
//! │   └── 3f/
//! │       ├── 3f9a…e1.blob
//! │       └── 3f9a…e1.json   (ObjectMetadata, carries the key)
//! ├── uploads/
//! │   └── {upload_id}/
//! │       ├── session.json
//! │       └── 00001.part
//! └── tmp/
//! ```
//! Every write lands in `tmp/` first and is renamed into place, and the
//! metadata sidecar is written last, so a head request never sees a partial
//! object.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use super::presign::{SignedOperation, UrlSigner};
use super::{validate_parts, CompletedPart, ObjectGateway, ObjectMetadata, PresignedUrl, MAX_PART_NUMBER};
use crate::{CabinetError, Result};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Hex SHA-256 of a byte slice.
fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Persisted state of a multipart session.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    key: String,
    content_type: String,
    created_at: DateTime<Utc>,
}

/// Object store over a local directory, with signed-URL data plane.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalObjectStore {
    /// Open a store rooted at `root`, creating its directories.
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Result<Self> {
        let root = root.into();
        for dir in ["objects", "uploads", "tmp"] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self { root, signer })
    }

    /// Get the root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the URL signer.
    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    /// Blob and sidecar paths for a key.
    fn object_paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let digest = sha256_hex(key.as_bytes());
        let dir = self.root.join("objects").join(&digest[..2]);
        (
            dir.join(format!("{digest}.blob")),
            dir.join(format!("{digest}.json")),
        )
    }

    fn session_dir(&self, upload_id: &str) -> Result<PathBuf> {
        if upload_id.is_empty()
            || !upload_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(CabinetError::Storage(format!(
                "malformed upload id {upload_id:?}"
            )));
        }
        Ok(self.root.join("uploads").join(upload_id))
    }

    fn part_path(dir: &Path, part_number: u32) -> PathBuf {
        dir.join(format!("{part_number:05}.part"))
    }

    /// Write bytes to `dest` via a staged file in `tmp/`.
    async fn write_atomic(&self, dest: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staged = self.root.join("tmp").join(Uuid::new_v4().to_string());
        fs::write(&staged, content).await?;
        if let Err(e) = fs::rename(&staged, dest).await {
            let _ = fs::remove_file(&staged).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn write_object(
        &self,
        key: &str,
        content: &[u8],
        content_type: &str,
        etag: String,
    ) -> Result<ObjectMetadata> {
        let (blob, sidecar) = self.object_paths(key);
        let metadata = ObjectMetadata {
            key: key.to_string(),
            size: content.len() as u64,
            content_type: content_type.to_string(),
            etag,
            last_modified: Utc::now(),
        };
        let encoded = serde_json::to_vec(&metadata)
            .map_err(|e| CabinetError::Storage(format!("metadata encoding: {e}")))?;

        self.write_atomic(&blob, content).await?;
        self.write_atomic(&sidecar, &encoded).await?;
        debug!("Stored object {} ({} bytes)", key, metadata.size);
        Ok(metadata)
    }

    async fn read_session(&self, key: &str, upload_id: &str) -> Result<(PathBuf, SessionFile)> {
        let dir = self.session_dir(upload_id)?;
        let raw = match fs::read(dir.join("session.json")).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CabinetError::Storage(format!(
                    "unknown upload session {upload_id}"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let session: SessionFile = serde_json::from_slice(&raw)
            .map_err(|e| CabinetError::Storage(format!("corrupt upload session: {e}")))?;
        if session.key != key {
            return Err(CabinetError::Storage(format!(
                "upload session {upload_id} belongs to another key"
            )));
        }
        Ok((dir, session))
    }

    /// Read an object's bytes.
    pub async fn read_object(&self, key: &str) -> Result<Vec<u8>> {
        if self.head_object(key).await?.is_none() {
            return Err(CabinetError::NotFound(format!("object {key}")));
        }
        let (blob, _) = self.object_paths(key);
        Ok(fs::read(blob).await?)
    }

    /// Handle a client PUT against an upload URL.
    pub async fn accept_put(&self, url: &str, content: &[u8]) -> Result<ObjectMetadata> {
        let claims = self.signer.verify_url(url, SignedOperation::Put)?;
        let content_type = claims
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        self.write_object(&claims.key, content, content_type, sha256_hex(content))
            .await
    }

    /// Handle a client PUT against a part URL; returns the part's etag.
    pub async fn accept_part(&self, url: &str, content: &[u8]) -> Result<String> {
        let claims = self.signer.verify_url(url, SignedOperation::UploadPart)?;
        let (upload_id, part_number) = match (claims.upload_id.as_deref(), claims.part_number) {
            (Some(upload_id), Some(part_number)) => (upload_id, part_number),
            _ => {
                return Err(CabinetError::Storage(
                    "part url lacks session binding".to_string(),
                ))
            }
        };
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(CabinetError::Validation(format!(
                "part number {part_number} is outside 1..={MAX_PART_NUMBER}"
            )));
        }

        let (dir, _) = self.read_session(&claims.key, upload_id).await?;
        self.write_atomic(&Self::part_path(&dir, part_number), content)
            .await?;
        Ok(sha256_hex(content))
    }

    /// Handle a client GET against a download URL.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let claims = self.signer.verify_url(url, SignedOperation::Get)?;
        self.read_object(&claims.key).await
    }
}

impl ObjectGateway for LocalObjectStore {
    async fn put_object(&self, key: &str, content: &[u8], content_type: &str) -> Result<ObjectMetadata> {
        self.write_object(key, content, content_type, sha256_hex(content))
            .await
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        let (_, sidecar) = self.object_paths(key);
        match fs::read(&sidecar).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| CabinetError::Storage(format!("corrupt metadata for {key}: {e}"))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let (blob, sidecar) = self.object_paths(key);
        for path in [sidecar, blob] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!("Released object {}", key);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMetadata>> {
        let mut objects = Vec::new();
        let mut shards = fs::read_dir(self.root.join("objects")).await?;

        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let raw = fs::read(&path).await?;
                let metadata: ObjectMetadata = serde_json::from_slice(&raw).map_err(|e| {
                    CabinetError::Storage(format!("corrupt metadata {}: {e}", path.display()))
                })?;
                if metadata.key.starts_with(prefix) {
                    objects.push(metadata);
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn presign_upload(&self, key: &str, content_type: &str, expires_in: Duration) -> Result<PresignedUrl> {
        self.signer.upload_url(key, content_type, expires_in)
    }

    async fn presign_download(&self, key: &str, expires_in: Duration) -> Result<PresignedUrl> {
        self.signer.download_url(key, expires_in)
    }

    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String> {
        let upload_id = Uuid::new_v4().simple().to_string();
        let dir = self.session_dir(&upload_id)?;
        fs::create_dir_all(&dir).await?;

        let session = SessionFile {
            key: key.to_string(),
            content_type: content_type.to_string(),
            created_at: Utc::now(),
        };
        let encoded = serde_json::to_vec(&session)
            .map_err(|e| CabinetError::Storage(format!("session encoding: {e}")))?;
        self.write_atomic(&dir.join("session.json"), &encoded).await?;

        info!("Started multipart upload {} for {}", upload_id, key);
        Ok(upload_id)
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> Result<PresignedUrl> {
        self.read_session(key, upload_id).await?;
        self.signer.part_url(key, upload_id, part_number, expires_in)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<ObjectMetadata> {
        validate_parts(parts)?;
        let (dir, session) = self.read_session(key, upload_id).await?;

        let mut content = Vec::new();
        let mut tags = String::new();
        for part in parts {
            let bytes = match fs::read(Self::part_path(&dir, part.part_number)).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(CabinetError::Storage(format!(
                        "part {} was never uploaded",
                        part.part_number
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            let actual = sha256_hex(&bytes);
            if actual != part.etag.trim_matches('"') {
                return Err(CabinetError::Storage(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            tags.push_str(&actual);
            content.extend_from_slice(&bytes);
        }

        let etag = format!("{}-{}", sha256_hex(tags.as_bytes()), parts.len());
        let metadata = self
            .write_object(key, &content, &session.content_type, etag)
            .await?;
        fs::remove_dir_all(&dir).await?;

        info!(
            "Completed multipart upload {} for {} ({} parts)",
            upload_id,
            key,
            parts.len()
        );
        Ok(metadata)
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let (dir, _) = self.read_session(key, upload_id).await?;
        fs::remove_dir_all(&dir).await?;
        info!("Aborted multipart upload {} for {}", upload_id, key);
        Ok(())
    }
}
