//! Shared types and utilities for Lumin.
//!
//! Used by the `lumind` daemon and its tests: data records for projects and
//! file trees, the push webhook payload, the error code catalog, `LUMIN_*`
//! environment parsing and logging setup.

pub mod config;
pub mod errors;
pub mod logging;
pub mod types;

pub use errors::{ErrorCategory, ErrorCode, ErrorEntry};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use types::{
    BlobId, CheckConclusion, CheckStatus, FileEntry, FileId, IngestionOutcome, IngestionRecord,
    NewFileRow, NewProject, Project, ProjectId, PushPayload, ROOT_FOLDER_NAME, RepoRef,
};
