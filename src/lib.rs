//! Cabinet - per-owner file and folder trees over an object store
//!
//! Items form a tree per owner, each carrying a materialized path. File items
//! point at objects in a blob store, uploaded directly by clients through
//! time-limited signed URLs and confirmed before any item references them.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod item;
pub mod logging;
pub mod storage;
pub mod upload;

pub use app::{Cabinet, CabinetTree, CabinetUploads};
pub use config::Config;
pub use db::Database;
pub use error::{CabinetError, Result};
pub use item::{
    FileAttrs, Item, ItemFilter, ItemKind, ItemNode, ItemStore, ItemUpdate, NewItem,
    SqliteItemStore, StorageUsage, TreeService,
};
pub use storage::{
    CompletedPart, LocalObjectStore, ObjectGateway, ObjectMetadata, PresignedUrl, UrlSigner,
};
pub use upload::{
    generate_storage_key, MultipartTicket, SweepReport, UploadOrchestrator, UploadSettings,
    UploadTicket, UploadedFile,
};
