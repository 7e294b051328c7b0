use async_zip::base::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const CHECK_RUN_ID: u64 = 77;

/// A request the fake API received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: &'static str,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct FakeState {
    archives: HashMap<String, Vec<u8>>,
    calls: Vec<RecordedCall>,
}

type Shared = Arc<Mutex<FakeState>>;

/// Minimal GitHub REST API double served over real HTTP.
pub struct FakeGitHub {
    pub url: String,
    state: Shared,
}

impl FakeGitHub {
    pub async fn start() -> Self {
        let state: Shared = Arc::default();
        let router = Router::new()
            .route("/repos/{owner}/{repo}/zipball/{reference}", get(zipball))
            .route("/repos/{owner}/{repo}/check-runs", post(create_check_run))
            .route("/repos/{owner}/{repo}/check-runs/{id}", patch(update_check_run))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn serve_archive(&self, reference: &str, bytes: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .archives
            .insert(reference.to_string(), bytes);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Bodies of check-run create/update calls, in order.
    pub fn check_run_bodies(&self) -> Vec<(&'static str, Value)> {
        self.calls()
            .into_iter()
            .filter(|call| call.path.contains("/check-runs"))
            .filter_map(|call| call.body.map(|body| (call.method, body)))
            .collect()
    }
}

fn record(state: &Shared, method: &'static str, path: String, headers: &HeaderMap, body: Option<Value>) {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.lock().unwrap().calls.push(RecordedCall {
        method,
        path,
        authorization,
        body,
    });
}

async fn zipball(
    State(state): State<Shared>,
    Path((owner, repo, reference)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/repos/{owner}/{repo}/zipball/{reference}");
    record(&state, "GET", path, &headers, None);
    let archive = state.lock().unwrap().archives.get(&reference).cloned();
    match archive {
        Some(bytes) => (StatusCode::OK, bytes).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"}))).into_response(),
    }
}

async fn create_check_run(
    State(state): State<Shared>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let path = format!("/repos/{owner}/{repo}/check-runs");
    record(&state, "POST", path, &headers, Some(body));
    (StatusCode::CREATED, Json(json!({ "id": CHECK_RUN_ID }))).into_response()
}

async fn update_check_run(
    State(state): State<Shared>,
    Path((owner, repo, id)): Path<(String, String, u64)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let path = format!("/repos/{owner}/{repo}/check-runs/{id}");
    record(&state, "PATCH", path, &headers, Some(body));
    Json(json!({ "id": id })).into_response()
}

/// A push payload and its signature.
pub fn signed_push(secret: &str, owner: &str, repo: &str, sha: &str) -> (String, String) {
    let body = json!({
        "ref": "refs/heads/main",
        "before": "0000000000000000000000000000000000000001",
        "after": sha,
        "installation": {"id": 42},
        "repository": {
            "name": repo,
            "full_name": format!("{owner}/{repo}"),
            "owner": {"login": owner},
        },
        "pusher": {"name": "octocat"},
    })
    .to_string();
    let signature = lumind::signature::sign(secret.as_bytes(), body.as_bytes());
    (body, signature)
}

/// A zipball with every entry under `root/`. `None` content marks a
/// directory.
pub async fn build_zip(root: &str, entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
    let mut writer = ZipFileWriter::new(Vec::<u8>::new());
    let root_dir = ZipEntryBuilder::new(format!("{root}/").into(), Compression::Stored);
    writer.write_entry_whole(root_dir, &[]).await.unwrap();

    for (path, content) in entries {
        let (name, data, compression) = match content {
            Some(data) => (format!("{root}/{path}"), *data, Compression::Deflate),
            None => (
                format!("{root}/{}/", path.trim_end_matches('/')),
                &[][..],
                Compression::Stored,
            ),
        };
        let entry = ZipEntryBuilder::new(name.into(), compression);
        writer.write_entry_whole(entry, data).await.unwrap();
    }
    writer.close().await.unwrap()
}
