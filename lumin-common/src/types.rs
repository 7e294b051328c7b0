//! Common types used across Lumin components.

use serde::{Deserialize, Serialize};

/// Numeric identifier of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub i64);

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric identifier of a file-tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub i64);

/// Opaque reference to a content blob returned by the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(pub String);

impl BlobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A deployable static site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub user_id: i64,
    /// Custom subdomain the site is served from.
    pub domain: Option<String>,
    /// Whether the current tree has an `index.html` at its root.
    pub has_index: bool,
    pub github_owner: Option<String>,
    pub github_repo: Option<String>,
}

/// Fields required to create a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub user_id: i64,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub github_owner: Option<String>,
    #[serde(default)]
    pub github_repo: Option<String>,
}

/// Name given to every project's root folder.
pub const ROOT_FOLDER_NAME: &str = "Root";

/// One node of a project's file tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub id: FileId,
    pub name: String,
    pub folder: bool,
    pub project_id: ProjectId,
    /// `None` only for the root folder.
    pub parent_id: Option<FileId>,
    /// Path relative to the project root (files only).
    pub path: Option<String>,
    /// Content reference (files only).
    pub blob_id: Option<BlobId>,
    pub mime_type: Option<String>,
}

impl FileEntry {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none() && self.folder && self.name == ROOT_FOLDER_NAME
    }
}

/// A file row to be inserted under a project's root folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFileRow {
    pub name: String,
    pub path: String,
    pub blob_id: BlobId,
    pub mime_type: String,
}

/// Check run status on the source host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

/// Final conclusion of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
}

/// Identity of a repository on the source host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// The subset of a GitHub `push` webhook payload used for ingestion.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Commit SHA the ref points to after the push.
    pub after: String,
    #[serde(default)]
    pub deleted: bool,
    pub installation: Option<InstallationRef>,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationRef {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryPayload {
    pub name: String,
    pub owner: OwnerPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerPayload {
    pub login: String,
}

const NULL_SHA: &str = "0000000000000000000000000000000000000000";

impl PushPayload {
    pub fn repo(&self) -> RepoRef {
        RepoRef::new(&self.repository.owner.login, &self.repository.name)
    }

    /// Branch name with the `refs/heads/` prefix removed.
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }

    /// True when the push removed the ref instead of moving it.
    pub fn is_deletion(&self) -> bool {
        self.deleted || self.after == NULL_SHA
    }
}

/// How an ingestion run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum IngestionOutcome {
    Succeeded { files: usize, has_index: bool },
    Failed { stage: String, code: String },
}

/// A finished ingestion run, kept in the history ring buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionRecord {
    pub id: u64,
    pub project_id: ProjectId,
    pub repo: RepoRef,
    pub git_ref: String,
    pub commit_sha: String,
    /// RFC3339 timestamps.
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub outcome: IngestionOutcome,
}
