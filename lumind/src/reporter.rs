//! Best-effort check-run status reporting.
//!
//! The first report of an ingestion creates a check run on the commit; later
//! reports PATCH that same check run. Failures are logged and swallowed so
//! they can never change the outcome of an ingestion.

use lumin_common::{CheckConclusion, CheckStatus, RepoRef};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::github::{
    CheckRunId, CheckRunOutput, CheckRunRequest, InstallationCredentials, SourceHost,
};

/// Check-run name used when none is configured.
pub const DEFAULT_CHECK_NAME: &str = "Lumin Deployment";

/// The commit a series of reports is about.
#[derive(Debug, Clone)]
pub struct CheckRunTarget {
    pub repo: RepoRef,
    pub head_sha: String,
    pub credentials: InstallationCredentials,
    /// Set once the host has accepted the first report.
    pub check_run_id: Option<CheckRunId>,
}

impl CheckRunTarget {
    pub fn new(repo: RepoRef, head_sha: impl Into<String>, credentials: InstallationCredentials) -> Self {
        Self {
            repo,
            head_sha: head_sha.into(),
            credentials,
            check_run_id: None,
        }
    }
}

fn output_for(status: CheckStatus, conclusion: Option<CheckConclusion>) -> CheckRunOutput {
    let (title, summary) = match (status, conclusion) {
        (CheckStatus::Queued, _) => ("Deployment queued", "The deployment is queued."),
        (CheckStatus::InProgress, _) => ("Deployment in progress", "The deployment is in progress."),
        (CheckStatus::Completed, Some(CheckConclusion::Success)) => {
            ("Deployment completed", "The deployment succeeded.")
        }
        (CheckStatus::Completed, _) => ("Deployment completed", "The deployment failed."),
    };
    CheckRunOutput {
        title: title.to_string(),
        summary: summary.to_string(),
    }
}

pub struct StatusReporter {
    host: Arc<dyn SourceHost>,
    check_name: String,
}

impl StatusReporter {
    pub fn new(host: Arc<dyn SourceHost>, check_name: impl Into<String>) -> Self {
        Self {
            host,
            check_name: check_name.into(),
        }
    }

    pub fn check_name(&self) -> &str {
        &self.check_name
    }

    /// Report `status` for the target's commit. Never fails.
    ///
    /// `completed` without a conclusion is reported as `neutral`.
    pub async fn report(
        &self,
        target: &mut CheckRunTarget,
        status: CheckStatus,
        conclusion: Option<CheckConclusion>,
        details_url: Option<String>,
    ) {
        let conclusion = match (status, conclusion) {
            (CheckStatus::Completed, None) => {
                warn!(repo = %target.repo, "completed report without conclusion, using neutral");
                Some(CheckConclusion::Neutral)
            }
            (CheckStatus::Completed, some) => some,
            _ => None,
        };
        let request = CheckRunRequest {
            name: self.check_name.clone(),
            head_sha: target.head_sha.clone(),
            status,
            conclusion,
            details_url,
            output: output_for(status, conclusion),
        };

        match target.check_run_id {
            Some(id) => {
                if let Err(err) = self
                    .host
                    .update_check_run(&target.repo, id, &request, &target.credentials)
                    .await
                {
                    warn!(
                        repo = %target.repo,
                        sha = %target.head_sha,
                        check_run_id = id,
                        error = %err,
                        "failed to update check run"
                    );
                } else {
                    debug!(repo = %target.repo, check_run_id = id, ?status, "check run updated");
                }
            }
            None => match self
                .host
                .create_check_run(&target.repo, &request, &target.credentials)
                .await
            {
                Ok(id) => {
                    debug!(repo = %target.repo, check_run_id = id, ?status, "check run created");
                    target.check_run_id = Some(id);
                }
                Err(err) => warn!(
                    repo = %target.repo,
                    sha = %target.head_sha,
                    error = %err,
                    "failed to create check run"
                ),
            },
        }
    }

    pub async fn in_progress(&self, target: &mut CheckRunTarget) {
        self.report(target, CheckStatus::InProgress, None, None).await;
    }

    pub async fn succeeded(&self, target: &mut CheckRunTarget, details_url: Option<String>) {
        self.report(
            target,
            CheckStatus::Completed,
            Some(CheckConclusion::Success),
            details_url,
        )
        .await;
    }

    pub async fn failed(&self, target: &mut CheckRunTarget) {
        self.report(
            target,
            CheckStatus::Completed,
            Some(CheckConclusion::Failure),
            None,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HostCall, MockSourceHost};

    fn target() -> CheckRunTarget {
        CheckRunTarget::new(
            RepoRef::new("acme", "site"),
            "6113728f27ae82c7b1a177c8d03f9e96e0adf246",
            InstallationCredentials { installation_id: 42 },
        )
    }

    #[tokio::test]
    async fn creates_then_updates_same_check_run() {
        let host = Arc::new(MockSourceHost::new());
        let reporter = StatusReporter::new(host.clone(), DEFAULT_CHECK_NAME);
        let mut target = target();

        reporter.in_progress(&mut target).await;
        let id = target.check_run_id.expect("check run id recorded");
        reporter
            .succeeded(&mut target, Some("https://acme.example.site".into()))
            .await;

        let calls = host.calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            HostCall::CreateCheckRun { request, .. } => {
                assert_eq!(request.status, CheckStatus::InProgress);
                assert_eq!(request.name, DEFAULT_CHECK_NAME);
                assert_eq!(request.conclusion, None);
                assert_eq!(request.output.title, "Deployment in progress");
            }
            other => panic!("unexpected call {other:?}"),
        }
        match &calls[1] {
            HostCall::UpdateCheckRun { id: updated, request, .. } => {
                assert_eq!(*updated, id);
                assert_eq!(request.status, CheckStatus::Completed);
                assert_eq!(request.conclusion, Some(CheckConclusion::Success));
                assert_eq!(request.output.summary, "The deployment succeeded.");
                assert_eq!(
                    request.details_url.as_deref(),
                    Some("https://acme.example.site")
                );
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_report_has_no_details_url() {
        let host = Arc::new(MockSourceHost::new());
        let reporter = StatusReporter::new(host.clone(), DEFAULT_CHECK_NAME);
        let mut target = target();

        reporter.failed(&mut target).await;
        let requests = host.check_run_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].conclusion, Some(CheckConclusion::Failure));
        assert_eq!(requests[0].output.summary, "The deployment failed.");
        assert!(requests[0].details_url.is_none());
    }

    #[tokio::test]
    async fn host_failures_are_swallowed() {
        let host = Arc::new(MockSourceHost::new().failing_check_runs());
        let reporter = StatusReporter::new(host.clone(), "custom");
        let mut target = target();

        reporter.in_progress(&mut target).await;
        assert!(target.check_run_id.is_none());
        // No id was recorded, so the next report tries to create again.
        reporter.failed(&mut target).await;
        assert!(
            host.calls()
                .iter()
                .all(|call| matches!(call, HostCall::CreateCheckRun { .. }))
        );
        assert_eq!(host.calls().len(), 2);
    }

    #[tokio::test]
    async fn completed_without_conclusion_is_neutral() {
        let host = Arc::new(MockSourceHost::new());
        let reporter = StatusReporter::new(host.clone(), DEFAULT_CHECK_NAME);
        let mut target = target();
        reporter
            .report(&mut target, CheckStatus::Completed, None, None)
            .await;
        assert_eq!(
            host.check_run_requests()[0].conclusion,
            Some(CheckConclusion::Neutral)
        );
    }
}
