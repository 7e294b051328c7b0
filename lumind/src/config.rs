//! Daemon configuration.
//!
//! Loaded from a TOML file, then overridden by `LUMIN_*` environment
//! variables. Every env error is collected before loading fails so the
//! operator sees all of them at once.

use directories::ProjectDirs;
use lumin_common::config::{EnvError, EnvParser, expand_home};
use lumin_common::ErrorCode;
use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::github::AppCredentials;
use crate::github::client::GitHubClientConfig;
use crate::reporter::DEFAULT_CHECK_NAME;

pub const CONFIG_FILE_NAME: &str = "lumind.toml";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_MAX_EXTRACTED_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid environment configuration: {}", join_env_errors(.0))]
    Env(Vec<EnvError>),

    #[error("invalid GitHub App configuration: {0}")]
    GitHubApp(String),
}

fn join_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ConfigNotFound,
            Self::Read { .. } => ErrorCode::ConfigReadError,
            Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Env(_) => ErrorCode::ConfigEnvError,
            Self::GitHubApp(_) => ErrorCode::ConfigGitHubApp,
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn data_dir() -> PathBuf {
    ProjectDirs::from("", "", "lumin")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("lumin-data"))
}

/// Default config file location (`<config dir>/lumin/lumind.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "lumin").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// GitHub App settings.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitHubAppConfig {
    pub app_id: Option<u64>,
    /// PEM contents; literal `\n` sequences are accepted.
    pub private_key: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub webhook_secret: Option<String>,
    pub api_url: String,
    pub check_name: String,
}

impl Default for GitHubAppConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            private_key: None,
            private_key_path: None,
            webhook_secret: None,
            api_url: GitHubClientConfig::default().api_url,
            check_name: DEFAULT_CHECK_NAME.to_string(),
        }
    }
}

impl std::fmt::Debug for GitHubAppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |set: bool| if set { "<redacted>" } else { "<unset>" };
        f.debug_struct("GitHubAppConfig")
            .field("app_id", &self.app_id)
            .field("private_key", &redact(self.private_key.is_some()))
            .field("private_key_path", &self.private_key_path)
            .field("webhook_secret", &redact(self.webhook_secret.is_some()))
            .field("api_url", &self.api_url)
            .field("check_name", &self.check_name)
            .finish()
    }
}

impl GitHubAppConfig {
    /// Build App credentials, or `None` when no App is configured.
    pub fn credentials(&self) -> Result<Option<AppCredentials>, ConfigError> {
        let pem = match (&self.private_key, &self.private_key_path) {
            (Some(pem), _) => Some(pem.clone()),
            (None, Some(path)) => Some(std::fs::read_to_string(path).map_err(|e| {
                ConfigError::GitHubApp(format!("cannot read private key {}: {e}", path.display()))
            })?),
            (None, None) => None,
        };
        match (self.app_id, pem) {
            (Some(app_id), Some(pem)) => AppCredentials::from_pem(app_id, &pem)
                .map(Some)
                .map_err(|e| ConfigError::GitHubApp(format!("invalid private key: {e}"))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(ConfigError::GitHubApp(
                "app_id is set but no private key was given".into(),
            )),
            (None, Some(_)) => Err(ConfigError::GitHubApp(
                "a private key is set but app_id is missing".into(),
            )),
        }
    }
}

/// Ingestion tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub fetch_timeout: Duration,
    pub max_archive_bytes: u64,
    /// Upper bound on the summed uncompressed size of all archive entries.
    pub max_extracted_bytes: u64,
    pub blob_concurrency: usize,
    pub serialize_per_project: bool,
    /// Site URL pattern with a `{domain}` placeholder, used as the check
    /// run's details URL.
    pub public_url_template: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            max_extracted_bytes: DEFAULT_MAX_EXTRACTED_BYTES,
            blob_concurrency: crate::materialize::DEFAULT_BLOB_CONCURRENCY,
            serialize_per_project: true,
            public_url_template: None,
        }
    }
}

impl IngestConfig {
    /// Public URL of a site served from `domain`.
    pub fn details_url(&self, domain: Option<&str>) -> Option<String> {
        let template = self.public_url_template.as_deref()?;
        let domain = domain.filter(|d| !d.is_empty())?;
        Some(template.replace("{domain}", domain))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_path: PathBuf,
    pub blob_dir: PathBuf,
    pub history_file: Option<PathBuf>,
    pub history_capacity: usize,
    pub github: GitHubAppConfig,
    pub ingest: IngestConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_path: data.join("lumin.db"),
            blob_dir: data.join("blobs"),
            history_file: None,
            history_capacity: crate::history::DEFAULT_CAPACITY,
            github: GitHubAppConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document.
    pub fn from_toml(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load configuration.
    ///
    /// An explicit path (flag or `LUMIN_CONFIG`) must exist; the platform
    /// default is used only when present. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let mut parser = EnvParser::new();
        let from_env = parser
            .get_optional_string("CONFIG")
            .value
            .map(|p| expand_home(&p));

        let (mut config, used) = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path));
                }
                (Self::read_file(&path)?, Some(path))
            }
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => (Self::read_file(&path)?, Some(path)),
                None => (Self::default(), None),
            },
        };

        config.apply_env(&mut parser);
        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }
        Ok((config, used))
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents, path)
    }

    /// Apply `LUMIN_*` overrides. Errors are left in `parser`.
    pub fn apply_env(&mut self, parser: &mut EnvParser) {
        let listen = parser.get_string("LISTEN_ADDR", DEFAULT_LISTEN_ADDR);
        if listen.is_from_env() {
            match listen.value.parse() {
                Ok(addr) => self.listen_addr = addr,
                Err(_) => parser.push_error(EnvError::InvalidValue {
                    var: parser.var_name("LISTEN_ADDR"),
                    expected: "socket address (host:port)".into(),
                    value: listen.value,
                }),
            }
        }

        if let Some(path) = parser.get_optional_string("DATABASE_PATH").value {
            self.database_path = expand_home(&path);
        }
        if let Some(path) = parser.get_optional_string("BLOB_DIR").value {
            self.blob_dir = expand_home(&path);
        }
        if let Some(path) = parser.get_optional_string("HISTORY_FILE").value {
            self.history_file = Some(expand_home(&path));
        }
        self.history_capacity = parser
            .get_u64_range("HISTORY_CAPACITY", self.history_capacity as u64, 1, 100_000)
            .value as usize;

        let app_id = parser.get_u64_range("GITHUB_APP_ID", 0, 1, u64::MAX);
        if app_id.is_from_env() {
            self.github.app_id = Some(app_id.value);
        }
        if let Some(key) = parser.get_optional_string("GITHUB_PRIVATE_KEY").value {
            self.github.private_key = Some(key);
        }
        if let Some(path) = parser.get_optional_string("GITHUB_PRIVATE_KEY_PATH").value {
            self.github.private_key_path = Some(expand_home(&path));
        }
        if let Some(secret) = parser.get_optional_string("GITHUB_WEBHOOK_SECRET").value {
            self.github.webhook_secret = Some(secret);
        }
        self.github.api_url = parser
            .get_string("GITHUB_API_URL", &self.github.api_url)
            .value;
        self.github.check_name = parser
            .get_string("CHECK_NAME", &self.github.check_name)
            .value;

        if let Some(raw) = parser.get_optional_string("FETCH_TIMEOUT").value {
            match humantime::parse_duration(&raw) {
                Ok(timeout) => self.ingest.fetch_timeout = timeout,
                Err(_) => parser.push_error(EnvError::InvalidValue {
                    var: parser.var_name("FETCH_TIMEOUT"),
                    expected: "duration (e.g. 30s, 2m)".into(),
                    value: raw,
                }),
            }
        }
        self.ingest.max_archive_bytes = parser
            .get_u64_range(
                "MAX_ARCHIVE_BYTES",
                self.ingest.max_archive_bytes,
                1,
                u64::MAX,
            )
            .value;
        self.ingest.max_extracted_bytes = parser
            .get_u64_range(
                "MAX_EXTRACTED_BYTES",
                self.ingest.max_extracted_bytes,
                1,
                u64::MAX,
            )
            .value;
        self.ingest.blob_concurrency = parser
            .get_u64_range("BLOB_CONCURRENCY", self.ingest.blob_concurrency as u64, 1, 1024)
            .value as usize;
        self.ingest.serialize_per_project = parser
            .get_bool("SERIALIZE_PER_PROJECT", self.ingest.serialize_per_project)
            .value;
        if let Some(template) = parser.get_optional_string("PUBLIC_URL_TEMPLATE").value {
            self.ingest.public_url_template = Some(template);
        }
    }

    pub fn client_config(&self) -> GitHubClientConfig {
        GitHubClientConfig {
            api_url: self.github.api_url.trim_end_matches('/').to_string(),
            fetch_timeout: self.ingest.fetch_timeout,
            max_archive_bytes: self.ingest.max_archive_bytes,
            ..GitHubClientConfig::default()
        }
    }
}
