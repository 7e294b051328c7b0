//! Webhook orchestration.
//!
//! One inbound delivery moves through
//! `received -> verified -> filtered -> resolved -> in_progress -> fetched ->
//! extracted -> materialized -> completed`. A failure before `in_progress`
//! returns immediately; a failure after it first reports a failed check run
//! (best effort) and then returns the error.

use bytes::Bytes;
use chrono::Utc;
use lumin_common::{
    ErrorCode, IngestionOutcome, IngestionRecord, Project, ProjectId, PushPayload, RepoRef,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::archive::{self, ExtractError};
use crate::config::IngestConfig;
use crate::events::{EventBus, INGESTION_COMPLETED, INGESTION_FAILED, INGESTION_STARTED, IngestionEvent};
use crate::github::{FetchError, InstallationCredentials, SourceHost};
use crate::history::IngestionHistory;
use crate::materialize::TreeMaterializer;
use crate::metrics;
use crate::reporter::{CheckRunTarget, StatusReporter};
use crate::signature::SignatureVerifier;
use crate::store::{BlobStore, FileTreeStore, ProjectStore, StoreError};

/// The only event type that triggers ingestion.
pub const PUSH_EVENT: &str = "push";

/// One inbound webhook request, before any parsing.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    /// `X-GitHub-Event`.
    pub event: Option<String>,
    /// `X-Hub-Signature-256`.
    pub signature: Option<String>,
    /// Raw request body exactly as received.
    pub body: Bytes,
}

/// Why a verified delivery was acknowledged without processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum IgnoreReason {
    UnsupportedEvent { event: String },
    BranchDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionSummary {
    pub ingestion_id: u64,
    pub project_id: ProjectId,
    pub files: usize,
    pub has_index: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ignored(IgnoreReason),
    Processed(IngestionSummary),
}

impl DeliveryOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            Self::Ignored(_) => "ignored",
            Self::Processed(_) => "processed",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    #[error("webhook payload is not a valid push event: {0}")]
    InvalidPayload(String),

    #[error("push event carries no installation id")]
    MissingInstallation,

    #[error("no project is linked to {0}")]
    ProjectNotFound(RepoRef),

    #[error("archive fetch failed: {0}")]
    FetchFailed(#[source] FetchError),

    #[error("archive extraction failed: {0}")]
    ExtractionFailed(#[source] ExtractError),

    #[error("tree materialization failed: {0}")]
    MaterializationFailed(#[source] StoreError),

    #[error("internal error: {0}")]
    Internal(#[source] StoreError),
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SignatureInvalid => ErrorCode::WebhookSignatureInvalid,
            Self::InvalidPayload(_) => ErrorCode::WebhookPayloadInvalid,
            Self::MissingInstallation => ErrorCode::WebhookMissingInstallation,
            Self::ProjectNotFound(_) => ErrorCode::WebhookProjectNotFound,
            Self::FetchFailed(err) => err.code(),
            Self::ExtractionFailed(err) => err.code(),
            Self::MaterializationFailed(err) => match err {
                StoreError::Sqlite(_) => ErrorCode::StorageTransactionFailed,
                other => other.code(),
            },
            Self::Internal(err) => err.code(),
        }
    }

    /// Stage name for failures that happen after `in_progress`.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::FetchFailed(_) => Some("fetch"),
            Self::ExtractionFailed(_) => Some("extract"),
            Self::MaterializationFailed(_) => Some("materialize"),
            _ => None,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            Self::SignatureInvalid | Self::InvalidPayload(_) | Self::MissingInstallation => {
                "rejected"
            }
            Self::ProjectNotFound(_) => "not_found",
            _ => "failed",
        }
    }
}

type LockMap = Arc<Mutex<HashMap<ProjectId, Arc<AsyncMutex<()>>>>>;

/// Per-project mutexes. Tokio's mutex is fair, so waiters run in arrival
/// order. An entry is removed once nobody holds or waits on it.
#[derive(Default)]
struct ProjectLocks {
    locks: LockMap,
}

impl ProjectLocks {
    async fn acquire(&self, id: ProjectId) -> ProjectLockGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(id).or_default())
        };
        ProjectLockGuard {
            id,
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.locks),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct ProjectLockGuard {
    id: ProjectId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for ProjectLockGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Release under the map lock so no new waiter can clone the entry in between.
        self.guard.take();
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

/// Collaborators the pipeline is built from.
pub struct PipelineParts {
    pub verifier: SignatureVerifier,
    pub host: Arc<dyn SourceHost>,
    pub projects: Arc<dyn ProjectStore>,
    pub tree: Arc<dyn FileTreeStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub check_name: String,
    pub ingest: IngestConfig,
}

pub struct IngestionPipeline {
    verifier: SignatureVerifier,
    host: Arc<dyn SourceHost>,
    projects: Arc<dyn ProjectStore>,
    materializer: TreeMaterializer,
    reporter: StatusReporter,
    ingest: IngestConfig,
    history: Arc<IngestionHistory>,
    events: EventBus,
    locks: ProjectLocks,
}

impl IngestionPipeline {
    pub fn new(parts: PipelineParts) -> Self {
        let materializer = TreeMaterializer::new(Arc::clone(&parts.projects), parts.tree, parts.blobs)
            .with_blob_concurrency(parts.ingest.blob_concurrency);
        let reporter = StatusReporter::new(Arc::clone(&parts.host), parts.check_name);
        Self {
            verifier: parts.verifier,
            host: parts.host,
            projects: parts.projects,
            materializer,
            reporter,
            ingest: parts.ingest,
            history: Arc::new(IngestionHistory::default()),
            events: EventBus::default(),
            locks: ProjectLocks::default(),
        }
    }

    pub fn with_history(mut self, history: Arc<IngestionHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn history(&self) -> &Arc<IngestionHistory> {
        &self.history
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Handle one webhook delivery end to end.
    pub async fn handle(&self, delivery: WebhookDelivery) -> Result<DeliveryOutcome, PipelineError> {
        let result = self.run(delivery).await;
        match &result {
            Ok(outcome) => metrics::record_delivery(outcome.metric_label()),
            Err(err) => metrics::record_delivery(err.metric_label()),
        }
        result
    }

    async fn run(&self, delivery: WebhookDelivery) -> Result<DeliveryOutcome, PipelineError> {
        if !self
            .verifier
            .verify(&delivery.body, delivery.signature.as_deref())
        {
            warn!("rejecting webhook with invalid signature");
            return Err(PipelineError::SignatureInvalid);
        }

        let event = delivery.event.unwrap_or_default();
        if event != PUSH_EVENT {
            debug!(event = %event, "ignoring non-push event");
            return Ok(DeliveryOutcome::Ignored(IgnoreReason::UnsupportedEvent {
                event,
            }));
        }

        let payload: PushPayload = serde_json::from_slice(&delivery.body)
            .map_err(|e| PipelineError::InvalidPayload(e.to_string()))?;
        let repo = payload.repo();
        if payload.is_deletion() {
            info!(repo = %repo, git_ref = %payload.git_ref, "ignoring branch deletion");
            return Ok(DeliveryOutcome::Ignored(IgnoreReason::BranchDeleted));
        }
        let credentials = payload
            .installation
            .as_ref()
            .map(|installation| InstallationCredentials {
                installation_id: installation.id,
            })
            .ok_or(PipelineError::MissingInstallation)?;

        let project = self
            .projects
            .find_by_repo(&repo)
            .await
            .map_err(PipelineError::Internal)?
            .ok_or_else(|| PipelineError::ProjectNotFound(repo.clone()))?;

        let _guard = if self.ingest.serialize_per_project {
            Some(self.locks.acquire(project.id).await)
        } else {
            None
        };

        let summary = self
            .run_ingestion(&project, &payload, repo, credentials)
            .await?;
        Ok(DeliveryOutcome::Processed(summary))
    }

    async fn run_ingestion(
        &self,
        project: &Project,
        payload: &PushPayload,
        repo: RepoRef,
        credentials: InstallationCredentials,
    ) -> Result<IngestionSummary, PipelineError> {
        let ingestion_id = self.history.next_id();
        let started_at = Utc::now();
        let clock = Instant::now();
        let sha = payload.after.clone();
        info!(
            ingestion_id,
            project_id = %project.id,
            repo = %repo,
            sha = %sha,
            branch = payload.branch(),
            "ingestion started"
        );

        let mut event = IngestionEvent {
            ingestion_id,
            project_id: project.id,
            repo: repo.clone(),
            commit_sha: sha.clone(),
            files: None,
            has_index: None,
            stage: None,
            code: None,
        };
        self.events.emit(INGESTION_STARTED, &event);
        let in_flight = metrics::InFlightGuard::enter();

        let mut target = CheckRunTarget::new(repo.clone(), sha.clone(), credentials);
        self.reporter.in_progress(&mut target).await;

        let result = self.fetch_and_materialize(project.id, &repo, &sha, &credentials).await;
        drop(in_flight);
        let duration = clock.elapsed();

        let outcome = match &result {
            Ok(materialized) => {
                let details_url = self.ingest.details_url(project.domain.as_deref());
                self.reporter.succeeded(&mut target, details_url).await;
                metrics::record_ingestion_success(materialized.files, duration.as_secs_f64());
                event.files = Some(materialized.files);
                event.has_index = Some(materialized.has_index);
                self.events.emit(INGESTION_COMPLETED, &event);
                info!(
                    ingestion_id,
                    project_id = %project.id,
                    files = materialized.files,
                    has_index = materialized.has_index,
                    duration_ms = duration.as_millis() as u64,
                    "ingestion completed"
                );
                IngestionOutcome::Succeeded {
                    files: materialized.files,
                    has_index: materialized.has_index,
                }
            }
            Err(err) => {
                self.reporter.failed(&mut target).await;
                let stage = err.stage().unwrap_or("unknown");
                metrics::record_ingestion_failure(stage, duration.as_secs_f64());
                event.stage = Some(stage);
                event.code = Some(err.code().code_string());
                self.events.emit(INGESTION_FAILED, &event);
                error!(
                    ingestion_id,
                    project_id = %project.id,
                    stage,
                    code = %err.code().code_string(),
                    error = %err,
                    "ingestion failed"
                );
                IngestionOutcome::Failed {
                    stage: stage.to_string(),
                    code: err.code().code_string(),
                }
            }
        };

        self.history.record(IngestionRecord {
            id: ingestion_id,
            project_id: project.id,
            repo,
            git_ref: payload.git_ref.clone(),
            commit_sha: sha,
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
            duration_ms: duration.as_millis() as u64,
            outcome,
        });

        result.map(|materialized| IngestionSummary {
            ingestion_id,
            project_id: project.id,
            files: materialized.files,
            has_index: materialized.has_index,
        })
    }

    async fn fetch_and_materialize(
        &self,
        project_id: ProjectId,
        repo: &RepoRef,
        sha: &str,
        credentials: &InstallationCredentials,
    ) -> Result<crate::materialize::Materialized, PipelineError> {
        let bytes = self
            .host
            .fetch_archive(repo, sha, credentials)
            .await
            .map_err(PipelineError::FetchFailed)?;
        debug!(project_id = %project_id, size = bytes.len(), "archive fetched");

        let extracted = archive::extract(bytes, self.ingest.max_extracted_bytes)
            .await
            .map_err(PipelineError::ExtractionFailed)?;

        self.materializer
            .materialize(project_id, extracted)
            .await
            .map_err(PipelineError::MaterializationFailed)
    }
}
