//! End-to-end webhook tests: a real server, a real GitHub client and a fake
//! GitHub API over HTTP.

use chrono::{Duration as ChronoDuration, Utc};
use lumin_common::{NewProject, Project};
use lumind::config::IngestConfig;
use lumind::github::client::GitHubClientConfig;
use lumind::github::{GitHubClient, InstallationToken};
use lumind::http_api::{self, EVENT_HEADER, HttpState, SIGNATURE_HEADER, WEBHOOK_PATH};
use lumind::signature::SignatureVerifier;
use lumind::store::{FileTreeStore, FsBlobStore, SqliteStore};
use lumind::{IngestionPipeline, PipelineParts};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::common::fixtures::CHECK_RUN_ID;
use crate::common::{FakeGitHub, build_zip, init_test_logging, signed_push};

const SECRET: &str = "integration-secret";
const SHA: &str = "6113728f27ae82c7b1a177c8d03f9e96e0adf246";

struct Daemon {
    url: String,
    github: FakeGitHub,
    store: SqliteStore,
    project: Project,
    http: reqwest::Client,
    _shutdown: oneshot::Sender<()>,
    _dir: tempfile::TempDir,
}

impl Daemon {
    async fn start() -> Self {
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let github = FakeGitHub::start().await;

        let store = SqliteStore::open(&dir.path().join("lumin.db")).unwrap();
        let project = store
            .create_project(&NewProject {
                name: "Acme site".into(),
                user_id: 1,
                domain: Some("acme".into()),
                github_owner: Some("acme".into()),
                github_repo: Some("site".into()),
                ..NewProject::default()
            })
            .unwrap();

        let client = GitHubClient::new(
            GitHubClientConfig {
                api_url: github.url.clone(),
                fetch_timeout: Duration::from_secs(5),
                ..GitHubClientConfig::default()
            },
            None,
        )
        .unwrap();
        client.token_cache().insert(
            42,
            InstallationToken {
                token: "ghs_integration".into(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            },
        );

        let pipeline = IngestionPipeline::new(PipelineParts {
            verifier: SignatureVerifier::new(Some(SECRET.into())),
            host: Arc::new(client),
            projects: Arc::new(store.clone()),
            tree: Arc::new(store.clone()),
            blobs: Arc::new(FsBlobStore::new(dir.path().join("blobs"))),
            check_name: "Lumin Deployment".into(),
            ingest: IngestConfig {
                public_url_template: Some("https://{domain}.lumin.site".into()),
                ..IngestConfig::default()
            },
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel::<()>();
        let state = HttpState::new(Arc::new(pipeline));
        tokio::spawn(async move {
            let _ = http_api::serve_listener(listener, state, async {
                let _ = rx.await;
            })
            .await;
        });

        Self {
            url,
            github,
            store,
            project,
            http: reqwest::Client::new(),
            _shutdown: tx,
            _dir: dir,
        }
    }

    async fn deliver(&self, event: &str, body: String, signature: Option<String>) -> reqwest::Response {
        let mut request = self
            .http
            .post(format!("{}{}", self.url, WEBHOOK_PATH))
            .header(EVENT_HEADER, event)
            .header("content-type", "application/json")
            .body(body);
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        request.send().await.unwrap()
    }
}

async fn site_archive() -> Vec<u8> {
    build_zip(
        "acme-site-6113728",
        &[
            ("index.html", Some(b"<!doctype html><h1>Acme</h1>".as_slice())),
            ("css/", None),
            ("css/site.css", Some(b"h1 { color: red }".as_slice())),
            ("img/", None),
            ("img/logo.svg", Some(b"<svg/>".as_slice())),
        ],
    )
    .await
}

#[tokio::test]
async fn test_push_replaces_tree_and_reports_check_run() {
    let daemon = Daemon::start().await;
    crate::test_log!("TEST START: test_push_replaces_tree_and_reports_check_run");
    daemon.github.serve_archive(SHA, site_archive().await);

    let (body, signature) = signed_push(SECRET, "acme", "site", SHA);
    let response = daemon.deliver("push", body, Some(signature)).await;
    assert_eq!(response.status(), 200);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["status"], "processed");

    // Three files plus the root folder.
    let tree = daemon.store.list_tree(daemon.project.id).await.unwrap();
    assert_eq!(tree.len(), 4);
    assert_eq!(tree.iter().filter(|e| e.is_root()).count(), 1);
    let css = tree.iter().find(|e| e.name == "site.css").unwrap();
    assert_eq!(css.path.as_deref(), Some("css/site.css"));
    assert_eq!(css.mime_type.as_deref(), Some("text/css"));
    assert!(
        daemon
            .store
            .get_project(daemon.project.id)
            .unwrap()
            .unwrap()
            .has_index
    );

    let calls = daemon.github.calls();
    let methods: Vec<_> = calls.iter().map(|c| (c.method, c.path.as_str())).collect();
    assert_eq!(
        methods,
        vec![
            ("POST", "/repos/acme/site/check-runs"),
            ("GET", format!("/repos/acme/site/zipball/{SHA}").as_str()),
            ("PATCH", format!("/repos/acme/site/check-runs/{CHECK_RUN_ID}").as_str()),
        ]
    );
    assert!(
        calls
            .iter()
            .all(|c| c.authorization.as_deref() == Some("token ghs_integration"))
    );

    let bodies = daemon.github.check_run_bodies();
    assert_eq!(bodies[0].1["status"], "in_progress");
    assert_eq!(bodies[0].1["name"], "Lumin Deployment");
    assert_eq!(bodies[0].1["head_sha"], SHA);
    assert_eq!(bodies[1].1["status"], "completed");
    assert_eq!(bodies[1].1["conclusion"], "success");
    assert!(
        bodies[1].1["details_url"]
            .as_str()
            .unwrap()
            .contains("acme")
    );

    crate::test_log!("TEST PASS: test_push_replaces_tree_and_reports_check_run");
}

#[tokio::test]
async fn test_non_push_event_is_ignored_without_fetching() {
    let daemon = Daemon::start().await;
    let body = r#"{"zen":"Keep it logically awesome.","hook_id":1}"#.to_string();
    let signature = lumind::signature::sign(SECRET.as_bytes(), body.as_bytes());

    let response = daemon.deliver("ping", body, Some(signature)).await;
    assert_eq!(response.status(), 200);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ignored");
    assert!(daemon.github.calls().is_empty());
}

#[tokio::test]
async fn test_forged_delivery_is_rejected() {
    let daemon = Daemon::start().await;
    daemon.github.serve_archive(SHA, site_archive().await);
    let (body, _) = signed_push(SECRET, "acme", "site", SHA);
    let (_, forged) = signed_push("another-secret", "acme", "site", SHA);

    let response = daemon.deliver("push", body, Some(forged)).await;
    assert_eq!(response.status(), 401);
    assert!(daemon.github.calls().is_empty());
    assert_eq!(
        daemon.store.list_tree(daemon.project.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_unlinked_repository_is_not_found() {
    let daemon = Daemon::start().await;
    let (body, signature) = signed_push(SECRET, "acme", "blog", SHA);

    let response = daemon.deliver("push", body, Some(signature)).await;
    assert_eq!(response.status(), 404);
    assert!(daemon.github.calls().is_empty());
}

#[tokio::test]
async fn test_missing_ref_reports_failure_and_keeps_tree() {
    let daemon = Daemon::start().await;
    daemon.github.serve_archive(SHA, site_archive().await);
    let (body, signature) = signed_push(SECRET, "acme", "site", SHA);
    assert_eq!(daemon.deliver("push", body, Some(signature)).await.status(), 200);
    let before = daemon.store.list_tree(daemon.project.id).await.unwrap();

    let missing = "ffffffffffffffffffffffffffffffffffffffff";
    let (body, signature) = signed_push(SECRET, "acme", "site", missing);
    let response = daemon.deliver("push", body, Some(signature)).await;
    assert_eq!(response.status(), 500);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["code"], "LUM-E201");

    let after = daemon.store.list_tree(daemon.project.id).await.unwrap();
    assert_eq!(before, after);

    let last = daemon.github.check_run_bodies().pop().unwrap();
    assert_eq!(last.0, "PATCH");
    assert_eq!(last.1["conclusion"], "failure");
    assert!(last.1.get("details_url").is_none());
}

#[tokio::test]
async fn test_ingestion_history_is_served() {
    let daemon = Daemon::start().await;
    daemon.github.serve_archive(SHA, site_archive().await);
    let (body, signature) = signed_push(SECRET, "acme", "site", SHA);
    daemon.deliver("push", body, Some(signature)).await;

    let json: serde_json::Value = daemon
        .http
        .get(format!(
            "{}/api/1v/ingestions?project_id={}",
            daemon.url, daemon.project.id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["ingestions"][0]["commit_sha"], SHA);
    assert_eq!(json["ingestions"][0]["outcome"]["status"], "succeeded");
    assert_eq!(json["ingestions"][0]["outcome"]["files"], 3);
}
