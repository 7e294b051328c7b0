//! Tree materialization.
//!
//! Turns an extracted archive into the project's file tree: blobs are saved
//! first (concurrently, outside the relational transaction), then the tree is
//! replaced in one transaction, then the project's index flag is updated.

use futures::stream::{self, StreamExt, TryStreamExt};
use lumin_common::{NewFileRow, ProjectId};
use std::sync::Arc;
use tracing::{debug, info};

use crate::archive::ExtractedArchive;
use crate::store::{BlobStore, FileTreeStore, ProjectStore, StoreError};

/// MIME type for files whose extension is unknown.
pub const DEFAULT_MIME_TYPE: &str = "text/plain";

/// Default number of blob writes in flight per materialization.
pub const DEFAULT_BLOB_CONCURRENCY: usize = 16;

/// MIME type inferred from the file name's extension.
pub fn mime_type_for(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

/// What a successful materialization produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Materialized {
    pub files: usize,
    pub has_index: bool,
}

pub struct TreeMaterializer {
    projects: Arc<dyn ProjectStore>,
    tree: Arc<dyn FileTreeStore>,
    blobs: Arc<dyn BlobStore>,
    blob_concurrency: usize,
}

impl TreeMaterializer {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        tree: Arc<dyn FileTreeStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            projects,
            tree,
            blobs,
            blob_concurrency: DEFAULT_BLOB_CONCURRENCY,
        }
    }

    pub fn with_blob_concurrency(mut self, concurrency: usize) -> Self {
        self.blob_concurrency = concurrency.max(1);
        self
    }

    /// Replace the project's tree with the archive's files.
    ///
    /// On error the previous tree is untouched; blobs already written stay
    /// behind unreferenced.
    pub async fn materialize(
        &self,
        project_id: ProjectId,
        archive: ExtractedArchive,
    ) -> Result<Materialized, StoreError> {
        let has_index = archive.has_index;
        let files: Vec<_> = archive
            .entries
            .into_iter()
            .filter(|entry| !entry.is_directory)
            .collect();

        let blobs = Arc::clone(&self.blobs);
        let rows: Vec<NewFileRow> = stream::iter(files)
            .map(|entry| {
                let blobs = Arc::clone(&blobs);
                async move {
                    let name = entry.file_name().to_string();
                    let blob_id = blobs.save(entry.content.unwrap_or_default()).await?;
                    Ok::<_, StoreError>(NewFileRow {
                        mime_type: mime_type_for(&name),
                        name,
                        path: entry.relative_path,
                        blob_id,
                    })
                }
            })
            .buffered(self.blob_concurrency)
            .try_collect()
            .await?;
        debug!(project_id = %project_id, blobs = rows.len(), "blobs saved");

        let replaced = self.tree.replace_tree(project_id, rows).await?;
        self.projects.set_has_index(project_id, has_index).await?;

        info!(
            project_id = %project_id,
            removed = replaced.removed,
            inserted = replaced.inserted,
            has_index,
            "file tree replaced"
        );
        Ok(Materialized {
            files: replaced.inserted,
            has_index,
        })
    }
}
