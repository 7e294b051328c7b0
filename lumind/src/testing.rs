//! Test fixtures shared by the unit tests.
//!
//! - [`build_zip`] builds an in-memory archive shaped like a GitHub zipball
//! - [`MockSourceHost`] records every source-host call and serves canned
//!   archives

use async_trait::async_trait;
use async_zip::base::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use lumin_common::RepoRef;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::github::{
    CheckRunError, CheckRunId, CheckRunRequest, FetchError, InstallationCredentials, SourceHost,
};

/// Build a zip whose entries all live under `root/`, the way GitHub wraps
/// repository snapshots. `None` content marks a directory entry.
pub async fn build_zip(root: &str, entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
    let mut writer = ZipFileWriter::new(Vec::<u8>::new());

    let root_dir = ZipEntryBuilder::new(format!("{root}/").into(), Compression::Stored);
    writer
        .write_entry_whole(root_dir, &[])
        .await
        .expect("write root entry");

    for (path, content) in entries {
        let name = format!("{root}/{path}");
        match content {
            Some(data) => {
                let entry = ZipEntryBuilder::new(name.into(), Compression::Deflate);
                writer
                    .write_entry_whole(entry, data)
                    .await
                    .expect("write file entry");
            }
            None => {
                let name = if name.ends_with('/') { name } else { format!("{name}/") };
                let entry = ZipEntryBuilder::new(name.into(), Compression::Stored);
                writer
                    .write_entry_whole(entry, &[])
                    .await
                    .expect("write directory entry");
            }
        }
    }

    writer.close().await.expect("finish zip")
}

/// A source-host call seen by [`MockSourceHost`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    FetchArchive {
        repo: RepoRef,
        reference: String,
        installation_id: u64,
    },
    CreateCheckRun {
        repo: RepoRef,
        request: CheckRunRequest,
    },
    UpdateCheckRun {
        repo: RepoRef,
        id: CheckRunId,
        request: CheckRunRequest,
    },
}

/// How the mock answers archive requests.
#[derive(Debug, Clone)]
pub enum ArchiveResponse {
    Bytes(Vec<u8>),
    NotFound,
    Unauthorized,
    /// Serve the bytes after sleeping, like a slow download.
    Delayed(Duration, Vec<u8>),
}

/// Recording [`SourceHost`] double.
#[derive(Debug, Default)]
pub struct MockSourceHost {
    archives: Mutex<HashMap<String, ArchiveResponse>>,
    calls: Mutex<Vec<HostCall>>,
    fail_check_runs: Mutex<bool>,
    next_check_run: AtomicU64,
}

impl MockSourceHost {
    pub fn new() -> Self {
        Self {
            next_check_run: AtomicU64::new(1000),
            ..Self::default()
        }
    }

    /// Serve `response` for archive requests at `reference`.
    pub fn with_archive(self, reference: &str, response: ArchiveResponse) -> Self {
        self.archives
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reference.to_string(), response);
        self
    }

    /// Make every check-run call fail.
    pub fn failing_check_runs(self) -> Self {
        *self.fail_check_runs.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Check-run requests in the order they were sent.
    pub fn check_run_requests(&self) -> Vec<CheckRunRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::CreateCheckRun { request, .. } => Some(request),
                HostCall::UpdateCheckRun { request, .. } => Some(request),
                HostCall::FetchArchive { .. } => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    fn check_runs_fail(&self) -> bool {
        *self.fail_check_runs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SourceHost for MockSourceHost {
    async fn fetch_archive(
        &self,
        repo: &RepoRef,
        reference: &str,
        credentials: &InstallationCredentials,
    ) -> Result<Vec<u8>, FetchError> {
        self.record(HostCall::FetchArchive {
            repo: repo.clone(),
            reference: reference.to_string(),
            installation_id: credentials.installation_id,
        });
        let response = self
            .archives
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(reference)
            .cloned()
            .unwrap_or(ArchiveResponse::NotFound);
        match response {
            ArchiveResponse::Bytes(bytes) => Ok(bytes),
            ArchiveResponse::NotFound => Err(FetchError::RefNotFound {
                reference: reference.to_string(),
            }),
            ArchiveResponse::Unauthorized => Err(FetchError::Auth("bad credentials".into())),
            ArchiveResponse::Delayed(delay, bytes) => {
                tokio::time::sleep(delay).await;
                Ok(bytes)
            }
        }
    }

    async fn create_check_run(
        &self,
        repo: &RepoRef,
        request: &CheckRunRequest,
        _credentials: &InstallationCredentials,
    ) -> Result<CheckRunId, CheckRunError> {
        self.record(HostCall::CreateCheckRun {
            repo: repo.clone(),
            request: request.clone(),
        });
        if self.check_runs_fail() {
            return Err(CheckRunError::Request("check runs disabled".into()));
        }
        Ok(self.next_check_run.fetch_add(1, Ordering::SeqCst))
    }

    async fn update_check_run(
        &self,
        repo: &RepoRef,
        id: CheckRunId,
        request: &CheckRunRequest,
        _credentials: &InstallationCredentials,
    ) -> Result<(), CheckRunError> {
        self.record(HostCall::UpdateCheckRun {
            repo: repo.clone(),
            id,
            request: request.clone(),
        });
        if self.check_runs_fail() {
            return Err(CheckRunError::Request("check runs disabled".into()));
        }
        Ok(())
    }
}
