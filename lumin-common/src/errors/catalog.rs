//! Error Catalog for Lumin
//!
//! Every failure the ingestion service can report carries a unique code
//! (LUM-E001 through LUM-E599), a message, and remediation steps. Codes are
//! returned in HTTP error bodies and recorded in the ingestion history so the
//! same failure can be looked up from either place.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                          |
//! |------------|-------------|--------------------------------------|
//! | E001-E099  | Config      | Configuration and setup errors       |
//! | E100-E199  | Webhook     | Inbound delivery errors              |
//! | E200-E299  | SourceHost  | GitHub API and archive download      |
//! | E300-E399  | Archive     | Archive parsing and extraction       |
//! | E400-E499  | Storage     | Relational and blob storage          |
//! | E500-E599  | Internal    | Internal/unexpected errors           |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all Lumin error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Configuration file not found
    ConfigNotFound,
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML syntax
    ConfigParseError,
    /// Environment variable has invalid value
    ConfigEnvError,
    /// GitHub App credentials are missing or unusable
    ConfigGitHubApp,

    // =========================================================================
    // Webhook Errors (E100-E199)
    // =========================================================================
    /// Signature header missing or does not match the payload
    WebhookSignatureInvalid,
    /// Payload is not a valid push event
    WebhookPayloadInvalid,
    /// Payload has no installation id
    WebhookMissingInstallation,
    /// No project is linked to the pushed repository
    WebhookProjectNotFound,

    // =========================================================================
    // Source Host Errors (E200-E299)
    // =========================================================================
    /// Could not authenticate as the GitHub App installation
    SourceAuthFailed,
    /// The requested ref does not exist
    SourceRefNotFound,
    /// The API rejected the request because of rate limiting
    SourceRateLimited,
    /// The archive download did not finish in time
    SourceTimeout,
    /// The archive exceeds the configured size limit
    SourceArchiveTooLarge,
    /// Any other HTTP or transport failure
    SourceRequestFailed,

    // =========================================================================
    // Archive Errors (E300-E399)
    // =========================================================================
    /// The archive could not be parsed
    ArchiveCorrupt,
    /// An entry's content could not be read
    ArchiveEntryUnreadable,
    /// The uncompressed content exceeds the configured limit
    ArchiveTooLarge,

    // =========================================================================
    // Storage Errors (E400-E499)
    // =========================================================================
    /// The relational store rejected the tree replacement
    StorageTransactionFailed,
    /// A blob could not be written
    StorageBlobWriteFailed,
    /// A store operation failed outside of a tree replacement
    StorageQueryFailed,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// A background task panicked or was cancelled
    InternalTaskFailed,
    /// Metrics could not be registered or encoded
    InternalMetricsError,
}

impl ErrorCode {
    /// Returns the numeric code (e.g., 100 for LUM-E100).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigNotFound => 1,
            Self::ConfigReadError => 2,
            Self::ConfigParseError => 3,
            Self::ConfigEnvError => 4,
            Self::ConfigGitHubApp => 5,

            Self::WebhookSignatureInvalid => 100,
            Self::WebhookPayloadInvalid => 101,
            Self::WebhookMissingInstallation => 102,
            Self::WebhookProjectNotFound => 103,

            Self::SourceAuthFailed => 200,
            Self::SourceRefNotFound => 201,
            Self::SourceRateLimited => 202,
            Self::SourceTimeout => 203,
            Self::SourceArchiveTooLarge => 204,
            Self::SourceRequestFailed => 205,

            Self::ArchiveCorrupt => 300,
            Self::ArchiveEntryUnreadable => 301,
            Self::ArchiveTooLarge => 302,

            Self::StorageTransactionFailed => 400,
            Self::StorageBlobWriteFailed => 401,
            Self::StorageQueryFailed => 402,

            Self::InternalTaskFailed => 500,
            Self::InternalMetricsError => 501,
        }
    }

    /// Returns the formatted error code string (e.g., "LUM-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("LUM-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Webhook,
            200..=299 => ErrorCategory::SourceHost,
            300..=399 => ErrorCategory::Archive,
            400..=499 => ErrorCategory::Storage,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigNotFound => "Configuration file not found",
            Self::ConfigReadError => "Failed to read configuration file",
            Self::ConfigParseError => "Configuration file contains invalid TOML syntax",
            Self::ConfigEnvError => "Environment variable has invalid value",
            Self::ConfigGitHubApp => "GitHub App credentials are missing or invalid",

            Self::WebhookSignatureInvalid => "Webhook signature is missing or invalid",
            Self::WebhookPayloadInvalid => "Webhook payload is not a valid push event",
            Self::WebhookMissingInstallation => "Webhook payload has no installation id",
            Self::WebhookProjectNotFound => "No project is linked to this repository",

            Self::SourceAuthFailed => "Could not authenticate as the GitHub App installation",
            Self::SourceRefNotFound => "Requested ref was not found in the repository",
            Self::SourceRateLimited => "GitHub API rate limit exceeded",
            Self::SourceTimeout => "Repository archive download timed out",
            Self::SourceArchiveTooLarge => "Repository archive exceeds the size limit",
            Self::SourceRequestFailed => "Request to the GitHub API failed",

            Self::ArchiveCorrupt => "Repository archive is corrupt or not a zip file",
            Self::ArchiveEntryUnreadable => "An archive entry could not be read",
            Self::ArchiveTooLarge => "Repository archive expands beyond the size limit",

            Self::StorageTransactionFailed => "File tree replacement was rolled back",
            Self::StorageBlobWriteFailed => "File content could not be written to blob storage",
            Self::StorageQueryFailed => "Project store query failed",

            Self::InternalTaskFailed => "Internal task failed",
            Self::InternalMetricsError => "Metrics registry error",
        }
    }

    /// Returns remediation steps for this error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigNotFound => &[
                "Pass --config or set LUMIN_CONFIG",
                "Create lumind.toml in the platform config directory",
            ],
            Self::ConfigReadError => &["Check file permissions on the configuration file"],
            Self::ConfigParseError => &["Validate the TOML syntax of the configuration file"],
            Self::ConfigEnvError => &["Check the LUMIN_* environment variables listed in the log"],
            Self::ConfigGitHubApp => &[
                "Set github.app_id and github.private_key (or private_key_path)",
                "Make sure the private key is the PEM downloaded from the App settings",
            ],

            Self::WebhookSignatureInvalid => &[
                "Check that github.webhook_secret matches the App's webhook secret",
                "Make sure no proxy rewrites the request body",
            ],
            Self::WebhookPayloadInvalid => &["Redeliver the event from the App's advanced settings"],
            Self::WebhookMissingInstallation => {
                &["Send the webhook from a GitHub App installation, not a repository hook"]
            }
            Self::WebhookProjectNotFound => &["Link the repository to a project with `lumind link`"],

            Self::SourceAuthFailed => &[
                "Check the App id and private key",
                "Verify the App is still installed on the repository",
            ],
            Self::SourceRefNotFound => &["Verify the pushed commit still exists"],
            Self::SourceRateLimited => &["Wait for the rate limit window to reset"],
            Self::SourceTimeout => &["Increase ingest.fetch_timeout"],
            Self::SourceArchiveTooLarge => &["Increase ingest.max_archive_bytes or shrink the repository"],
            Self::SourceRequestFailed => &["Check network access to the GitHub API"],

            Self::ArchiveCorrupt | Self::ArchiveEntryUnreadable => {
                &["Push again; GitHub regenerates archives on demand"]
            }
            Self::ArchiveTooLarge => {
                &["Increase ingest.max_extracted_bytes or shrink the repository"]
            }

            Self::StorageTransactionFailed => &[
                "Check database disk space and permissions",
                "The previous file tree was kept",
            ],
            Self::StorageBlobWriteFailed => &["Check blob_dir disk space and permissions"],
            Self::StorageQueryFailed => &["Check that database_path points to a Lumin database"],

            Self::InternalTaskFailed | Self::InternalMetricsError => {
                &["Report the issue with the daemon log attached"]
            }
        }
    }

    /// Returns all error codes.
    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigNotFound,
            Self::ConfigReadError,
            Self::ConfigParseError,
            Self::ConfigEnvError,
            Self::ConfigGitHubApp,
            Self::WebhookSignatureInvalid,
            Self::WebhookPayloadInvalid,
            Self::WebhookMissingInstallation,
            Self::WebhookProjectNotFound,
            Self::SourceAuthFailed,
            Self::SourceRefNotFound,
            Self::SourceRateLimited,
            Self::SourceTimeout,
            Self::SourceArchiveTooLarge,
            Self::SourceRequestFailed,
            Self::ArchiveCorrupt,
            Self::ArchiveEntryUnreadable,
            Self::ArchiveTooLarge,
            Self::StorageTransactionFailed,
            Self::StorageBlobWriteFailed,
            Self::StorageQueryFailed,
            Self::InternalTaskFailed,
            Self::InternalMetricsError,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration and setup errors (E001-E099)
    Config,
    /// Inbound webhook delivery errors (E100-E199)
    Webhook,
    /// GitHub API errors (E200-E299)
    SourceHost,
    /// Archive extraction errors (E300-E399)
    Archive,
    /// Storage errors (E400-E499)
    Storage,
    /// Internal/unexpected errors (E500-E599)
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable name for the category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Webhook => "Webhook",
            Self::SourceHost => "Source host",
            Self::Archive => "Archive",
            Self::Storage => "Storage",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "LUM-E001")
    pub code: String,
    /// Error category
    pub category: ErrorCategory,
    /// Human-readable error message
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("Remediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
