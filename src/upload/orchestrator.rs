//! Upload orchestration.
//!
//! Both upload protocols confirm the object at its storage key before any
//! item referencing that key is created. A client that writes an object and
//! never confirms leaves an orphan; [`UploadOrchestrator::sweep_orphans`]
//! reclaims those once they are older than a grace period.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::multipart::{MultipartSessions, Session, SessionEvent};
use crate::config::UploadConfig;
use crate::item::{validate_name, Item, ItemStore, NewItem, TreeService};
use crate::storage::{validate_parts, CompletedPart, ObjectGateway, PresignedUrl, MAX_PART_NUMBER};
use crate::{CabinetError, Result};

/// Build the storage key for an upload: `<owner>/<millis>-<filename>`.
///
/// The owner is percent-encoded and path separators in the file name are
/// replaced, so the owner prefix is unambiguous.
pub fn generate_storage_key(owner_id: &str, filename: &str, at: DateTime<Utc>) -> String {
    let filename: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!(
        "{}{}-{}",
        owner_prefix(owner_id),
        at.timestamp_millis(),
        filename
    )
}

/// Key prefix under which all of an owner's objects live.
fn owner_prefix(owner_id: &str) -> String {
    format!("{}/", urlencoding::encode(owner_id))
}

/// Owner whose uploads live under `storage_key`, if it has an owner prefix.
fn key_owner(storage_key: &str) -> Option<String> {
    let (prefix, _) = storage_key.split_once('/')?;
    urlencoding::decode(prefix).ok().map(|owner| owner.into_owned())
}

/// MIME type for a file name, defaulting to `application/octet-stream`.
fn guess_mime(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Upload tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSettings {
    /// Lifetime of every delegated URL handed out.
    pub url_expiry: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            url_expiry: Duration::from_secs(3600),
        }
    }
}

impl From<&UploadConfig> for UploadSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            url_expiry: config.url_expiry(),
        }
    }
}

/// Where a client should send a single-shot upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadTicket {
    /// Key the object will be stored under; pass it back when confirming.
    pub storage_key: String,
    /// Signed PUT target for the object bytes.
    pub upload: PresignedUrl,
}

/// Handle for a started multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultipartTicket {
    /// Key the assembled object will be stored under.
    pub storage_key: String,
    /// Gateway identifier of the upload, required for every later call.
    pub upload_id: String,
}

/// Item details supplied when confirming an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Name of the new item.
    pub name: String,
    /// Folder to create it in (None for the root).
    pub parent_id: Option<String>,
    /// MIME type; guessed from the upload when None.
    pub mime_type: Option<String>,
}

impl UploadedFile {
    /// A root file named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_id: None,
            mime_type: None,
        }
    }

    /// Set the parent folder.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the MIME type explicitly.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Outcome of an orphan sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Objects inspected.
    pub scanned: usize,
    /// Unreferenced objects deleted.
    pub removed: usize,
    /// Stale multipart sessions aborted.
    pub expired_sessions: usize,
}

/// Coordinates the object gateway and the tree service for uploads.
pub struct UploadOrchestrator<S, G> {
    tree: Arc<TreeService<S, G>>,
    gateway: Arc<G>,
    sessions: MultipartSessions,
    settings: UploadSettings,
}

impl<S, G> UploadOrchestrator<S, G>
where
    S: ItemStore,
    G: ObjectGateway,
{
    /// Create an orchestrator over a tree service and the gateway it releases
    /// objects through.
    pub fn new(tree: Arc<TreeService<S, G>>, gateway: Arc<G>, settings: UploadSettings) -> Self {
        Self {
            tree,
            gateway,
            sessions: MultipartSessions::new(),
            settings,
        }
    }

    /// Open multipart sessions.
    pub fn sessions(&self) -> &MultipartSessions {
        &self.sessions
    }

    /// Issue a URL for uploading `filename` in one request.
    pub async fn request_upload(
        &self,
        owner_id: &str,
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<UploadTicket> {
        validate_name(filename)?;
        let storage_key = generate_storage_key(owner_id, filename, Utc::now());
        let content_type = content_type.map_or_else(|| guess_mime(filename), str::to_string);

        let upload = self
            .gateway
            .presign_upload(&storage_key, &content_type, self.settings.url_expiry)
            .await?;
        info!("Issued upload URL for {} ({})", storage_key, content_type);

        Ok(UploadTicket {
            storage_key,
            upload,
        })
    }

    /// Confirm a single-shot upload and create its item.
    ///
    /// Confirming a key some item already references yields `Conflict`.
    pub async fn complete_upload(
        &self,
        owner_id: &str,
        storage_key: &str,
        file: UploadedFile,
    ) -> Result<Item> {
        self.check_key_owner(owner_id, storage_key)?;

        let mime_type = file.mime_type.clone().unwrap_or_else(|| guess_mime(&file.name));
        self.create_file(owner_id, storage_key, file, mime_type).await
    }

    /// Start a multipart upload for `filename`.
    pub async fn initiate_multipart(
        &self,
        owner_id: &str,
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<MultipartTicket> {
        validate_name(filename)?;
        let storage_key = generate_storage_key(owner_id, filename, Utc::now());
        let content_type = content_type.map_or_else(|| guess_mime(filename), str::to_string);

        let upload_id = self
            .gateway
            .create_multipart_upload(&storage_key, &content_type)
            .await?;
        self.sessions
            .open(Session::new(owner_id, &storage_key, &upload_id, content_type))
            .await;

        info!("Initiated multipart upload {} for {}", upload_id, storage_key);
        Ok(MultipartTicket {
            storage_key,
            upload_id,
        })
    }

    /// Issue a URL for one part of a multipart upload.
    pub async fn multipart_part_url(
        &self,
        owner_id: &str,
        storage_key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<PresignedUrl> {
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(CabinetError::Validation(format!(
                "part number {part_number} is outside 1..={MAX_PART_NUMBER}"
            )));
        }
        self.sessions
            .check(owner_id, storage_key, upload_id, SessionEvent::IssuePart)
            .await?;

        let url = self
            .gateway
            .presign_upload_part(storage_key, upload_id, part_number, self.settings.url_expiry)
            .await?;
        self.sessions
            .record_part(owner_id, storage_key, upload_id, part_number)
            .await?;
        Ok(url)
    }

    /// Assemble the parts, confirm the object and create its item.
    ///
    /// If the gateway rejects the part list the session stays open and no
    /// item is created.
    pub async fn complete_multipart(
        &self,
        owner_id: &str,
        storage_key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        file: UploadedFile,
    ) -> Result<Item> {
        self.check_key_owner(owner_id, storage_key)?;
        validate_parts(parts)?;

        let session = self
            .sessions
            .take_for_completion(owner_id, storage_key, upload_id, parts)
            .await?;

        if let Err(e) = self
            .gateway
            .complete_multipart_upload(storage_key, upload_id, parts)
            .await
        {
            warn!("Completing upload {} failed: {}", upload_id, e);
            self.sessions.restore(session).await;
            return Err(e);
        }
        info!(
            "Completed multipart upload {} ({} parts)",
            upload_id,
            parts.len()
        );

        let mime_type = file.mime_type.clone().unwrap_or(session.content_type);
        self.create_file(owner_id, storage_key, file, mime_type).await
    }

    /// Discard a multipart upload; no item is created.
    pub async fn abort_multipart(
        &self,
        owner_id: &str,
        storage_key: &str,
        upload_id: &str,
    ) -> Result<()> {
        let session = self
            .sessions
            .take_for_abort(owner_id, storage_key, upload_id)
            .await?;

        if let Err(e) = self
            .gateway
            .abort_multipart_upload(storage_key, upload_id)
            .await
        {
            self.sessions.restore(session).await;
            return Err(e);
        }

        info!("Aborted multipart upload {}", upload_id);
        Ok(())
    }

    /// Issue a download URL for a file item.
    pub async fn download_url(&self, owner_id: &str, item_id: &str) -> Result<PresignedUrl> {
        let item = self.tree.find_one(owner_id, item_id).await?;
        let storage_key = match (&item.storage_key, item.is_file()) {
            (Some(key), true) => key,
            _ => {
                return Err(CabinetError::InvalidOperation(
                    "only stored files can be downloaded".to_string(),
                ))
            }
        };

        self.gateway
            .presign_download(storage_key, self.settings.url_expiry)
            .await
    }

    /// Delete stored objects no item references, once older than `grace`,
    /// and abort multipart sessions started before that.
    ///
    /// Each object is checked and deleted in its owner's mutation scope, so
    /// a confirmation of the same key either lands first and keeps the
    /// object, or runs after and finds it gone.
    pub async fn sweep_orphans(&self, grace: Duration) -> Result<SweepReport> {
        let grace = chrono::Duration::from_std(grace)
            .map_err(|e| CabinetError::Validation(format!("grace period out of range: {e}")))?;
        let cutoff = Utc::now() - grace;
        let mut report = SweepReport::default();

        for object in self.gateway.list_objects("").await? {
            report.scanned += 1;
            if object.last_modified >= cutoff {
                continue;
            }
            let scope_owner = key_owner(&object.key).unwrap_or_else(|| object.key.clone());
            if !self
                .tree
                .release_if_unreferenced(&scope_owner, &object.key)
                .await?
            {
                continue;
            }
            info!("Removed orphaned object {} ({} bytes)", object.key, object.size);
            report.removed += 1;
        }

        for session in self.sessions.expire(cutoff).await {
            match self
                .gateway
                .abort_multipart_upload(&session.storage_key, &session.upload_id)
                .await
            {
                Ok(()) => report.expired_sessions += 1,
                Err(e) => warn!("Failed to abort stale upload {}: {}", session.upload_id, e),
            }
        }

        Ok(report)
    }

    fn check_key_owner(&self, owner_id: &str, storage_key: &str) -> Result<()> {
        if !storage_key.starts_with(&owner_prefix(owner_id)) {
            return Err(CabinetError::InvalidOperation(
                "storage key does not belong to the caller".to_string(),
            ));
        }
        Ok(())
    }

    async fn create_file(
        &self,
        owner_id: &str,
        storage_key: &str,
        file: UploadedFile,
        mime_type: String,
    ) -> Result<Item> {
        let new_item = NewItem::file(file.name).with_parent_opt(file.parent_id);

        match self
            .tree
            .create_from_object(owner_id, new_item, storage_key, mime_type)
            .await
        {
            Ok(item) => {
                info!("Confirmed upload {} as {}", storage_key, item.path);
                Ok(item)
            }
            Err(e) => {
                warn!("No item created for object {}: {}", storage_key, e);
                Err(e)
            }
        }
    }
}
