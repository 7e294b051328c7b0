//! HTTP client for the GitHub REST API.

use async_trait::async_trait;
use chrono::Utc;
use lumin_common::RepoRef;
use reqwest::header::{ACCEPT, HeaderMap};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::auth::{AppCredentials, InstallationToken, TokenCache};
use super::{
    CheckRunError, CheckRunId, CheckRunRequest, FetchError, InstallationCredentials, SourceHost,
};

const API_VERSION: &str = "2022-11-28";
const GITHUB_JSON: &str = "application/vnd.github+json";

/// Client settings.
#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    /// REST API root, e.g. `https://api.github.com`.
    pub api_url: String,
    /// Upper bound on a whole archive download.
    pub fetch_timeout: Duration,
    /// Archives larger than this are rejected.
    pub max_archive_bytes: u64,
    /// Timeout for the small JSON calls (tokens, check runs).
    pub api_timeout: Duration,
}

impl Default for GitHubClientConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            fetch_timeout: Duration::from_secs(30),
            max_archive_bytes: 100 * 1024 * 1024,
            api_timeout: Duration::from_secs(10),
        }
    }
}

/// GitHub App client implementing [`SourceHost`].
#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    config: GitHubClientConfig,
    app: Option<AppCredentials>,
    tokens: Arc<TokenCache>,
}

#[derive(Deserialize)]
struct CheckRunCreated {
    id: CheckRunId,
}

impl GitHubClient {
    /// Build a client. `app` may be `None` only when tokens are seeded into
    /// the cache by the caller.
    pub fn new(config: GitHubClientConfig, app: Option<AppCredentials>) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(concat!("lumind/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            app,
            tokens: Arc::new(TokenCache::new()),
        })
    }

    pub fn token_cache(&self) -> &TokenCache {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn api_request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(ACCEPT, GITHUB_JSON)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Installation access token, from cache or freshly minted.
    pub async fn installation_token(
        &self,
        credentials: &InstallationCredentials,
    ) -> Result<String, FetchError> {
        let id = credentials.installation_id;
        if let Some(token) = self.tokens.get(id, Utc::now()) {
            return Ok(token);
        }

        let app = self
            .app
            .as_ref()
            .ok_or_else(|| FetchError::Auth("GitHub App credentials are not configured".into()))?;
        let jwt = app.app_jwt(Utc::now())?;

        debug!(installation_id = id, app_id = app.app_id(), "requesting installation token");
        let response = self
            .api_request(
                self.http
                    .post(self.url(&format!("/app/installations/{id}/access_tokens"))),
            )
            .bearer_auth(jwt)
            .timeout(self.config.api_timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, self.config.api_timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(FetchError::Auth(format!(
                "installation {id} token exchange returned {status}"
            )));
        }

        let token: InstallationToken = response
            .json()
            .await
            .map_err(|e| FetchError::Auth(format!("invalid token response: {e}")))?;
        let value = token.token.clone();
        self.tokens.insert(id, token);
        Ok(value)
    }

    async fn read_limited(&self, mut response: Response) -> Result<Vec<u8>, FetchError> {
        let limit = self.config.max_archive_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FetchError::TooLarge { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error(e, self.config.fetch_timeout))?
        {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("config", &self.config)
            .field("app", &self.app)
            .finish()
    }
}

/// Map a non-success archive response to a fetch error.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, reference: &str) -> FetchError {
    let rate_limited = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
        StatusCode::FORBIDDEN if rate_limited => FetchError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::Auth(format!("archive request returned {status}"))
        }
        StatusCode::NOT_FOUND => FetchError::RefNotFound {
            reference: reference.to_string(),
        },
        other => FetchError::Request(format!("archive request returned {other}")),
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Request(err.to_string())
    }
}

#[async_trait]
impl SourceHost for GitHubClient {
    async fn fetch_archive(
        &self,
        repo: &RepoRef,
        reference: &str,
        credentials: &InstallationCredentials,
    ) -> Result<Vec<u8>, FetchError> {
        let token = self.installation_token(credentials).await?;
        let url = self.url(&format!(
            "/repos/{}/{}/zipball/{}",
            repo.owner, repo.name, reference
        ));

        debug!(%repo, reference, "downloading repository archive");
        let response = self
            .api_request(self.http.get(url))
            .header("Authorization", format!("token {token}"))
            .timeout(self.config.fetch_timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, self.config.fetch_timeout))?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.tokens.invalidate(credentials.installation_id);
            }
            return Err(classify_status(status, response.headers(), reference));
        }

        let body = self.read_limited(response).await?;
        debug!(%repo, reference, bytes = body.len(), "archive downloaded");
        Ok(body)
    }

    async fn create_check_run(
        &self,
        repo: &RepoRef,
        request: &CheckRunRequest,
        credentials: &InstallationCredentials,
    ) -> Result<CheckRunId, CheckRunError> {
        let token = self.installation_token(credentials).await?;
        let url = self.url(&format!("/repos/{}/{}/check-runs", repo.owner, repo.name));

        let response = self
            .api_request(self.http.post(url))
            .header("Authorization", format!("token {token}"))
            .timeout(self.config.api_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| CheckRunError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%repo, %status, "check run creation rejected");
            return Err(CheckRunError::Request(format!("create returned {status}")));
        }

        let created: CheckRunCreated = response
            .json()
            .await
            .map_err(|e| CheckRunError::Request(format!("invalid check run response: {e}")))?;
        Ok(created.id)
    }

    async fn update_check_run(
        &self,
        repo: &RepoRef,
        id: CheckRunId,
        request: &CheckRunRequest,
        credentials: &InstallationCredentials,
    ) -> Result<(), CheckRunError> {
        let token = self.installation_token(credentials).await?;
        let url = self.url(&format!(
            "/repos/{}/{}/check-runs/{}",
            repo.owner, repo.name, id
        ));

        let response = self
            .api_request(self.http.patch(url))
            .header("Authorization", format!("token {token}"))
            .timeout(self.config.api_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| CheckRunError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CheckRunError::Request(format!("update returned {status}")));
        }
        Ok(())
    }
}
