//! Upload flows for Cabinet.
//!
//! This module provides:
//! - Single-shot uploads (request URL, confirm)
//! - Multipart uploads (initiate, part URL, complete, abort)
//! - Download URLs for stored files
//! - A sweep that reclaims objects no item references

mod multipart;
mod orchestrator;

pub use multipart::{MultipartSessions, Session, SessionEvent, SessionState};
pub use orchestrator::{
    generate_storage_key, MultipartTicket, SweepReport, UploadOrchestrator, UploadSettings,
    UploadTicket, UploadedFile,
};
