//! Source host integration (GitHub App).
//!
//! The pipeline talks to GitHub only through the [`SourceHost`] trait so the
//! HTTP client can be swapped for a recording mock in tests.

pub mod auth;
pub mod client;

use async_trait::async_trait;
use lumin_common::{CheckConclusion, CheckStatus, ErrorCode, RepoRef};
use serde::Serialize;
use thiserror::Error;

pub use auth::{AppCredentials, InstallationToken, TokenCache};
pub use client::GitHubClient;

/// Installation the webhook was delivered for.
///
/// Access tokens are derived per installation from the App's private key;
/// no long-lived user token is ever used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstallationCredentials {
    pub installation_id: u64,
}

/// Identifier of a check run returned by the host.
pub type CheckRunId = u64;

/// Check-run create/update body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckRunRequest {
    pub name: String,
    pub head_sha: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<CheckConclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,
    pub output: CheckRunOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
}

/// Failure to obtain a repository archive.
///
/// All variants collapse to a single "fetch failed" outcome in the pipeline;
/// the variant only refines the error code.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("ref '{reference}' not found")]
    RefNotFound { reference: String },

    #[error("rate limited by the source host")]
    RateLimited,

    #[error("archive download timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("archive is larger than {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("request failed: {0}")]
    Request(String),
}

impl FetchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Auth(_) => ErrorCode::SourceAuthFailed,
            Self::RefNotFound { .. } => ErrorCode::SourceRefNotFound,
            Self::RateLimited => ErrorCode::SourceRateLimited,
            Self::Timeout(_) => ErrorCode::SourceTimeout,
            Self::TooLarge { .. } => ErrorCode::SourceArchiveTooLarge,
            Self::Request(_) => ErrorCode::SourceRequestFailed,
        }
    }
}

/// Failure of a check-run API call. Only ever logged.
#[derive(Debug, Error)]
pub enum CheckRunError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("check run request failed: {0}")]
    Request(String),
}

impl From<FetchError> for CheckRunError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Auth(msg) => Self::Auth(msg),
            other => Self::Request(other.to_string()),
        }
    }
}

/// Operations the ingestion pipeline needs from the source host.
#[async_trait]
pub trait SourceHost: Send + Sync {
    /// Download a zip snapshot of `repo` at `reference` (commit SHA or branch).
    async fn fetch_archive(
        &self,
        repo: &RepoRef,
        reference: &str,
        credentials: &InstallationCredentials,
    ) -> Result<Vec<u8>, FetchError>;

    /// Create a check run and return its id.
    async fn create_check_run(
        &self,
        repo: &RepoRef,
        request: &CheckRunRequest,
        credentials: &InstallationCredentials,
    ) -> Result<CheckRunId, CheckRunError>;

    /// Update an existing check run.
    async fn update_check_run(
        &self,
        repo: &RepoRef,
        id: CheckRunId,
        request: &CheckRunRequest,
        credentials: &InstallationCredentials,
    ) -> Result<(), CheckRunError>;
}
