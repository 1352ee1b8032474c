//! Test helpers for integration tests.
//!
//! Provides a recording object gateway and a fully wired test harness.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use cabinet::storage::{
    CompletedPart, LocalObjectStore, ObjectGateway, ObjectMetadata, PresignedUrl, UrlSigner,
};
use cabinet::upload::{UploadOrchestrator, UploadSettings};
use cabinet::{CabinetError, Database, Result, SqliteItemStore, TreeService};

/// Gateway over a local store that records releases and can be told to fail.
pub struct RecordingGateway {
    inner: LocalObjectStore,
    deletes: Mutex<HashMap<String, usize>>,
    fail_complete: AtomicBool,
}

impl RecordingGateway {
    pub fn new(inner: LocalObjectStore) -> Self {
        Self {
            inner,
            deletes: Mutex::new(HashMap::new()),
            fail_complete: AtomicBool::new(false),
        }
    }

    /// The wrapped store, for data-plane calls.
    pub fn local(&self) -> &LocalObjectStore {
        &self.inner
    }

    /// How many times `key` was released.
    pub fn delete_count(&self, key: &str) -> usize {
        self.deletes.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Total releases across all keys.
    pub fn total_deletes(&self) -> usize {
        self.deletes.lock().unwrap().values().sum()
    }

    /// Make the next multipart completions fail.
    pub fn fail_completions(&self, fail: bool) {
        self.fail_complete.store(fail, Ordering::SeqCst);
    }
}

impl ObjectGateway for RecordingGateway {
    async fn put_object(&self, key: &str, content: &[u8], content_type: &str) -> Result<ObjectMetadata> {
        self.inner.put_object(key, content, content_type).await
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        self.inner.head_object(key).await
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        *self
            .deletes
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert(0) += 1;
        self.inner.delete_object(key).await
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMetadata>> {
        self.inner.list_objects(prefix).await
    }

    async fn presign_upload(&self, key: &str, content_type: &str, expires_in: Duration) -> Result<PresignedUrl> {
        self.inner.presign_upload(key, content_type, expires_in).await
    }

    async fn presign_download(&self, key: &str, expires_in: Duration) -> Result<PresignedUrl> {
        self.inner.presign_download(key, expires_in).await
    }

    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String> {
        self.inner.create_multipart_upload(key, content_type).await
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> Result<PresignedUrl> {
        self.inner
            .presign_upload_part(key, upload_id, part_number, expires_in)
            .await
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<ObjectMetadata> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(CabinetError::Storage("injected completion failure".to_string()));
        }
        self.inner
            .complete_multipart_upload(key, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.inner.abort_multipart_upload(key, upload_id).await
    }
}

pub type TestTree = TreeService<SqliteItemStore, RecordingGateway>;
pub type TestUploads = UploadOrchestrator<SqliteItemStore, RecordingGateway>;

/// Services over an in-memory database and a temporary object store.
pub struct TestHarness {
    pub db: Database,
    pub gateway: Arc<RecordingGateway>,
    pub tree: Arc<TestTree>,
    pub uploads: TestUploads,
    _dir: TempDir,
}

/// Build a fresh harness.
pub async fn setup() -> TestHarness {
    let dir = TempDir::new().unwrap();
    let db = Database::open_in_memory().await.unwrap();

    let signer = UrlSigner::new("http://localhost:8080", "test-secret").unwrap();
    let local = LocalObjectStore::new(dir.path(), signer).unwrap();
    let gateway = Arc::new(RecordingGateway::new(local));

    let tree = Arc::new(TreeService::new(
        SqliteItemStore::new(db.pool().clone()),
        Arc::clone(&gateway),
    ));
    let uploads = UploadOrchestrator::new(
        Arc::clone(&tree),
        Arc::clone(&gateway),
        UploadSettings::default(),
    );

    TestHarness {
        db,
        gateway,
        tree,
        uploads,
        _dir: dir,
    }
}
