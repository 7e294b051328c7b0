//! Repository archive extraction.
//!
//! GitHub zipballs wrap the whole repository in one synthetic directory named
//! after the repository and ref (`acme-site-6113728/`). Extraction strips that
//! first path segment from every entry and yields the remaining entries with
//! their content. Nothing touches the filesystem; the archive is read from
//! memory.

use async_zip::base::read::mem::ZipFileReader;
use futures::AsyncReadExt;
use lumin_common::ErrorCode;
use std::path::{Component, Path};
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the document that makes a site directly servable.
pub const INDEX_DOCUMENT: &str = "index.html";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("archive could not be parsed: {0}")]
    Corrupt(#[source] async_zip::error::ZipError),

    #[error("failed to read archive entry '{path}': {source}")]
    Entry {
        path: String,
        #[source]
        source: async_zip::error::ZipError,
    },

    #[error("failed to read archive entry '{path}': {reason}")]
    Content { path: String, reason: String },

    #[error("archive expands beyond {limit} bytes")]
    TooLarge { limit: u64 },
}

impl ExtractError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Corrupt(_) => ErrorCode::ArchiveCorrupt,
            Self::Entry { .. } | Self::Content { .. } => ErrorCode::ArchiveEntryUnreadable,
            Self::TooLarge { .. } => ErrorCode::ArchiveTooLarge,
        }
    }
}

/// One entry of the archive after the synthetic root was stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path relative to the repository root, `/`-separated.
    pub relative_path: String,
    pub is_directory: bool,
    /// File content; `None` for directories.
    pub content: Option<Vec<u8>>,
}

impl ArchiveEntry {
    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.relative_path)
    }
}

/// The result of extracting one archive.
#[derive(Debug, Clone, Default)]
pub struct ExtractedArchive {
    pub entries: Vec<ArchiveEntry>,
    /// True when a file resolved to exactly `index.html`.
    pub has_index: bool,
}

impl ExtractedArchive {
    /// File entries only; directories are implied by file paths.
    pub fn files(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter().filter(|entry| !entry.is_directory)
    }

    pub fn file_count(&self) -> usize {
        self.files().count()
    }
}

/// Strip the host's synthetic top-level directory from an entry name.
///
/// Returns `None` when nothing is left, i.e. for the synthetic directory
/// itself. Names without any `/` are returned unchanged.
pub fn strip_synthetic_root(name: &str) -> Option<&str> {
    let stripped = match name.split_once('/') {
        Some((_, rest)) => rest,
        None => name,
    };
    if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    }
}

/// Reject absolute paths and `..` components.
fn is_safe_relative(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// Extract every entry of a zip archive held in memory.
///
/// The summed content of all files may not exceed `max_bytes`. Each entry is
/// read no further than its declared size, and an entry whose content does
/// not match that size is rejected.
///
/// The result is fully determined by `bytes`, so running it again on the same
/// archive yields the same entries.
pub async fn extract(bytes: Vec<u8>, max_bytes: u64) -> Result<ExtractedArchive, ExtractError> {
    let reader = ZipFileReader::new(bytes)
        .await
        .map_err(ExtractError::Corrupt)?;

    let mut extracted = ExtractedArchive::default();
    let total = reader.file().entries().len();
    let mut remaining = max_bytes;

    for index in 0..total {
        let Some(stored) = reader.file().entries().get(index) else {
            break;
        };
        let raw_name = stored
            .filename()
            .as_str()
            .map_err(ExtractError::Corrupt)?
            .to_string();
        let is_directory = stored.dir().map_err(ExtractError::Corrupt)?;

        let Some(relative) = strip_synthetic_root(&raw_name) else {
            continue;
        };
        if !is_safe_relative(relative) {
            warn!(entry = %raw_name, "skipping archive entry with unsafe path");
            continue;
        }
        let relative_path = relative.trim_end_matches('/').to_string();

        if is_directory {
            extracted.entries.push(ArchiveEntry {
                relative_path,
                is_directory: true,
                content: None,
            });
            continue;
        }

        let declared = stored.uncompressed_size();
        if declared > remaining {
            return Err(ExtractError::TooLarge { limit: max_bytes });
        }
        remaining -= declared;

        let entry_reader = reader
            .reader_with_entry(index)
            .await
            .map_err(|source| ExtractError::Entry {
                path: raw_name.clone(),
                source,
            })?;
        let mut content = Vec::new();
        // One byte past the declared size is enough to catch a lying header.
        Box::pin(entry_reader.take(declared + 1))
            .read_to_end(&mut content)
            .await
            .map_err(|e| ExtractError::Content {
                path: raw_name.clone(),
                reason: e.to_string(),
            })?;
        if content.len() as u64 != declared {
            return Err(ExtractError::Content {
                path: raw_name,
                reason: format!("expected {declared} bytes, got {}", content.len()),
            });
        }

        if relative_path == INDEX_DOCUMENT {
            extracted.has_index = true;
        }
        extracted.entries.push(ArchiveEntry {
            relative_path,
            is_directory: false,
            content: Some(content),
        });
    }

    debug!(
        entries = extracted.entries.len(),
        files = extracted.file_count(),
        has_index = extracted.has_index,
        "archive extracted"
    );
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::build_zip;
    use proptest::prelude::*;

    #[test]
    fn strips_first_segment() {
        assert_eq!(strip_synthetic_root("repo-main/src/a.js"), Some("src/a.js"));
        assert_eq!(strip_synthetic_root("repo-main/index.html"), Some("index.html"));
        assert_eq!(strip_synthetic_root("repo-main/docs/"), Some("docs/"));
        assert_eq!(strip_synthetic_root("repo-main/"), None);
        assert_eq!(strip_synthetic_root(""), None);
        assert_eq!(strip_synthetic_root("README"), Some("README"));
    }

    #[test]
    fn unsafe_paths_are_detected() {
        assert!(is_safe_relative("src/a.js"));
        assert!(is_safe_relative("./a.js"));
        assert!(!is_safe_relative("../etc/passwd"));
        assert!(!is_safe_relative("src/../../x"));
        assert!(!is_safe_relative("/abs"));
    }

    #[test]
    fn file_name_is_last_segment() {
        let entry = ArchiveEntry {
            relative_path: "assets/css/site.css".to_string(),
            is_directory: false,
            content: Some(Vec::new()),
        };
        assert_eq!(entry.file_name(), "site.css");
    }

    #[tokio::test]
    async fn extracts_files_and_strips_root() {
        let zip = build_zip(
            "repo-main",
            &[
                ("src/", None),
                ("src/a.js", Some(b"console.log(1)".as_slice())),
                ("index.html", Some(b"<h1>hi</h1>".as_slice())),
            ],
        )
        .await;

        let extracted = extract(zip, u64::MAX).await.unwrap();
        assert!(extracted.has_index);
        assert_eq!(extracted.file_count(), 2);

        let paths: Vec<_> = extracted
            .entries
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["src", "src/a.js", "index.html"]);
        assert!(paths.iter().all(|p| !p.starts_with("repo-main/")));

        let script = extracted
            .files()
            .find(|e| e.relative_path == "src/a.js")
            .unwrap();
        assert_eq!(script.content.as_deref(), Some(b"console.log(1)".as_slice()));
    }

    #[tokio::test]
    async fn nested_index_does_not_count() {
        let zip = build_zip(
            "repo-main",
            &[("docs/index.html", Some(b"<p>docs</p>".as_slice()))],
        )
        .await;
        let extracted = extract(zip, u64::MAX).await.unwrap();
        assert!(!extracted.has_index);
        assert_eq!(extracted.file_count(), 1);
    }

    #[tokio::test]
    async fn extraction_is_repeatable() {
        let zip = build_zip(
            "site-abc123",
            &[
                ("a.txt", Some(b"a".as_slice())),
                ("b/c.txt", Some(b"c".as_slice())),
            ],
        )
        .await;
        let first = extract(zip.clone(), u64::MAX).await.unwrap();
        let second = extract(zip, u64::MAX).await.unwrap();
        assert_eq!(first.entries, second.entries);
    }

    #[tokio::test]
    async fn garbage_is_corrupt() {
        let err = extract(b"definitely not a zip".to_vec(), u64::MAX).await.unwrap_err();
        assert!(matches!(err, ExtractError::Corrupt(_)));
        assert_eq!(err.code(), ErrorCode::ArchiveCorrupt);
    }

    #[tokio::test]
    async fn expanded_size_is_capped() {
        let zip = build_zip(
            "repo-main",
            &[
                ("a.txt", Some([b'a'; 600].as_slice())),
                ("b.txt", Some([b'b'; 600].as_slice())),
            ],
        )
        .await;

        let err = extract(zip.clone(), 1000).await.unwrap_err();
        assert!(matches!(err, ExtractError::TooLarge { limit: 1000 }));
        assert_eq!(err.code(), ErrorCode::ArchiveTooLarge);

        let extracted = extract(zip, 1200).await.unwrap();
        assert_eq!(extracted.file_count(), 2);
    }

    proptest! {
        #[test]
        fn stripped_paths_never_keep_the_root(
            root in "[a-z]{1,8}-[a-z0-9]{1,8}",
            rest in "[a-z]{1,8}(/[a-z]{1,8}){0,3}",
        ) {
            let name = format!("{root}/{rest}");
            let stripped = strip_synthetic_root(&name).unwrap();
            prop_assert_eq!(stripped, rest.as_str());
            let prefix = format!("{root}/");
            prop_assert!(!stripped.starts_with(&prefix));
        }
    }
}
