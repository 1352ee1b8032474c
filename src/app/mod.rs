//! Application module.
//!
//! Wires the database, object store and services together.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::item::{SqliteItemStore, TreeService};
use crate::storage::{LocalObjectStore, UrlSigner};
use crate::upload::{SweepReport, UploadOrchestrator, UploadSettings};

/// Tree service over the bundled backends.
pub type CabinetTree = TreeService<SqliteItemStore, LocalObjectStore>;

/// Upload orchestrator over the bundled backends.
pub type CabinetUploads = UploadOrchestrator<SqliteItemStore, LocalObjectStore>;

/// A fully wired Cabinet instance.
pub struct Cabinet {
    /// Database connection.
    db: Database,
    /// Object store.
    objects: Arc<LocalObjectStore>,
    /// Item operations.
    tree: Arc<CabinetTree>,
    /// Upload flows.
    uploads: CabinetUploads,
    /// Application configuration.
    config: Arc<Config>,
}

impl Cabinet {
    /// Open the database and object store described by `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;

        let db = if config.database.path == ":memory:" {
            Database::open_in_memory().await?
        } else {
            Database::open(&config.database.path).await?
        };

        let signer = UrlSigner::new(&config.storage.public_url, &config.storage.signing_secret)?;
        let objects = Arc::new(LocalObjectStore::new(&config.storage.root, signer)?);

        let store = SqliteItemStore::new(db.pool().clone());
        let tree = Arc::new(TreeService::new(store, Arc::clone(&objects)));
        let uploads = UploadOrchestrator::new(
            Arc::clone(&tree),
            Arc::clone(&objects),
            UploadSettings::from(&config.upload),
        );

        info!(
            "Cabinet opened (database: {}, storage: {})",
            config.database.path, config.storage.root
        );

        Ok(Self {
            db,
            objects,
            tree,
            uploads,
            config: Arc::new(config.clone()),
        })
    }

    /// Get the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get the object store.
    pub fn objects(&self) -> &Arc<LocalObjectStore> {
        &self.objects
    }

    /// Get the tree service.
    pub fn tree(&self) -> &Arc<CabinetTree> {
        &self.tree
    }

    /// Get the upload orchestrator.
    pub fn uploads(&self) -> &CabinetUploads {
        &self.uploads
    }

    /// Get the configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Run one orphan sweep with the configured grace period.
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.uploads
            .sweep_orphans(self.config.upload.orphan_grace())
            .await
    }
}
