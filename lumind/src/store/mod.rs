//! Storage collaborators used by the ingestion pipeline.
//!
//! The pipeline depends only on the narrow traits here:
//! - [`ProjectStore`]: look up a project by repository, flip its index flag
//! - [`FileTreeStore`]: replace a project's file tree atomically
//! - [`BlobStore`]: persist file content, returning an opaque id
//!
//! [`sqlite::SqliteStore`] implements the first two on one SQLite database;
//! [`blob::FsBlobStore`] keeps content-addressed blobs on disk.

pub mod blob;
pub mod sqlite;

use async_trait::async_trait;
use lumin_common::{BlobId, ErrorCode, FileEntry, FileId, NewFileRow, Project, ProjectId, RepoRef};
use thiserror::Error;

pub use blob::FsBlobStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("blob storage error: {0}")]
    Blob(#[from] std::io::Error),

    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("{0}")]
    Rejected(String),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Blob(_) => ErrorCode::StorageBlobWriteFailed,
            Self::Task(_) => ErrorCode::InternalTaskFailed,
            Self::Sqlite(_) | Self::ProjectNotFound(_) | Self::Rejected(_) => {
                ErrorCode::StorageQueryFailed
            }
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Project lookups and updates needed by ingestion.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// The project linked to `repo`, if any. Matching is case-insensitive.
    async fn find_by_repo(&self, repo: &RepoRef) -> Result<Option<Project>, StoreError>;

    async fn set_has_index(&self, id: ProjectId, has_index: bool) -> Result<(), StoreError>;
}

/// Write access to a file tree inside an open transaction.
pub trait TreeWriter {
    /// Delete every entry of the project. Returns the number removed.
    fn delete_project_tree(&mut self, project_id: ProjectId) -> Result<usize, StoreError>;

    /// Insert the project's Root folder.
    fn create_root(&mut self, project_id: ProjectId) -> Result<FileId, StoreError>;

    /// Insert one file under `parent`.
    fn insert_file(
        &mut self,
        project_id: ProjectId,
        parent: FileId,
        row: &NewFileRow,
    ) -> Result<FileId, StoreError>;
}

/// What a successful tree replacement did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeReplacement {
    pub root_id: FileId,
    pub removed: usize,
    pub inserted: usize,
}

/// Replace a project's tree: delete everything, create a fresh Root, attach
/// every row directly to it.
///
/// Must run inside a transaction; any error leaves it to the caller to roll
/// back.
pub fn write_replacement(
    writer: &mut dyn TreeWriter,
    project_id: ProjectId,
    rows: &[NewFileRow],
) -> Result<TreeReplacement, StoreError> {
    let removed = writer.delete_project_tree(project_id)?;
    let root_id = writer.create_root(project_id)?;
    for row in rows {
        writer.insert_file(project_id, root_id, row)?;
    }
    Ok(TreeReplacement {
        root_id,
        removed,
        inserted: rows.len(),
    })
}

/// Atomic file-tree replacement.
#[async_trait]
pub trait FileTreeStore: Send + Sync {
    /// Run [`write_replacement`] in one transaction. On error nothing changes.
    async fn replace_tree(
        &self,
        project_id: ProjectId,
        rows: Vec<NewFileRow>,
    ) -> Result<TreeReplacement, StoreError>;

    /// All entries of a project, ordered by id.
    async fn list_tree(&self, project_id: ProjectId) -> Result<Vec<FileEntry>, StoreError>;
}

/// Out-of-band content storage. There is no delete; blobs orphaned by a
/// rolled-back replacement stay behind.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, bytes: Vec<u8>) -> Result<BlobId, StoreError>;
}
