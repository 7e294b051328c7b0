//! SQLite-backed project and file-tree store.
//!
//! One connection guarded by a mutex; async callers hop onto the blocking
//! pool. Tree replacement runs in a single transaction so a failure at any
//! row leaves the previous tree in place.

use async_trait::async_trait;
use lumin_common::{
    BlobId, FileEntry, FileId, NewFileRow, NewProject, Project, ProjectId, ROOT_FOLDER_NAME,
    RepoRef,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::{
    FileTreeStore, ProjectStore, StoreError, TreeReplacement, TreeWriter, write_replacement,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT    NOT NULL DEFAULT 'Untitled',
    description  TEXT    NOT NULL DEFAULT '',
    user_id      INTEGER NOT NULL,
    domain       TEXT,
    has_index    INTEGER NOT NULL DEFAULT 0,
    github_owner TEXT COLLATE NOCASE,
    github_repo  TEXT COLLATE NOCASE,
    created_at   TEXT    NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at   TEXT    NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE UNIQUE INDEX IF NOT EXISTS projects_github_repo
    ON projects (github_owner, github_repo)
    WHERE github_owner IS NOT NULL AND github_repo IS NOT NULL;

CREATE TABLE IF NOT EXISTS files (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT    NOT NULL,
    folder     INTEGER NOT NULL DEFAULT 0,
    project_id INTEGER NOT NULL REFERENCES projects (id) ON DELETE CASCADE,
    parent_id  INTEGER REFERENCES files (id) ON DELETE CASCADE,
    path       TEXT,
    blob_id    TEXT,
    mime_type  TEXT
);

CREATE INDEX IF NOT EXISTS files_project ON files (project_id);
"#;

const PROJECT_COLUMNS: &str =
    "id, name, description, user_id, domain, has_index, github_owner, github_repo";

const FILE_COLUMNS: &str = "id, name, folder, project_id, parent_id, path, blob_id, mime_type";

/// SQLite store for projects and their file trees.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!("Opened database at {:?}", path);
        Self::init(conn)
    }

    /// Fresh in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a project and its Root folder in one transaction.
    pub fn create_project(&self, project: &NewProject) -> Result<Project, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO projects (name, description, user_id, domain, github_owner, github_repo)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project.name,
                project.description,
                project.user_id,
                project.domain,
                project.github_owner,
                project.github_repo,
            ],
        )?;
        let id = ProjectId(tx.last_insert_rowid());
        SqliteTreeWriter { conn: &tx }.create_root(id)?;
        let created = query_project(&tx, id)?.ok_or(StoreError::ProjectNotFound(id))?;
        tx.commit()?;
        debug!(project_id = %id, "created project");
        Ok(created)
    }

    pub fn get_project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        query_project(&self.lock(), id)
    }

    /// Delete a project; its file tree goes with it.
    pub fn delete_project(&self, id: ProjectId) -> Result<bool, StoreError> {
        let removed = self
            .lock()
            .execute("DELETE FROM projects WHERE id = ?1", params![id.0])?;
        Ok(removed > 0)
    }

    /// Run `f` against a tree writer inside one transaction, committing only
    /// if it returns `Ok`.
    pub fn with_tree_writer<T>(
        &self,
        f: impl FnOnce(&mut dyn TreeWriter) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let result = {
            let mut writer = SqliteTreeWriter { conn: &tx };
            f(&mut writer)?
        };
        tx.commit()?;
        Ok(result)
    }

    fn find_by_repo_blocking(&self, repo: &RepoRef) -> Result<Option<Project>, StoreError> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE github_owner = ?1 AND github_repo = ?2"
        );
        Ok(conn
            .query_row(&sql, params![repo.owner, repo.name], project_from_row)
            .optional()?)
    }

    fn list_tree_blocking(&self, project_id: ProjectId) -> Result<Vec<FileEntry>, StoreError> {
        let conn = self.lock();
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE project_id = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id.0], file_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

fn query_project(conn: &Connection, id: ProjectId) -> Result<Option<Project>, StoreError> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.0], project_from_row)
        .optional()?)
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: ProjectId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        user_id: row.get(3)?,
        domain: row.get(4)?,
        has_index: row.get(5)?,
        github_owner: row.get(6)?,
        github_repo: row.get(7)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileEntry> {
    Ok(FileEntry {
        id: FileId(row.get(0)?),
        name: row.get(1)?,
        folder: row.get(2)?,
        project_id: ProjectId(row.get(3)?),
        parent_id: row.get::<_, Option<i64>>(4)?.map(FileId),
        path: row.get(5)?,
        blob_id: row.get::<_, Option<String>>(6)?.map(BlobId),
        mime_type: row.get(7)?,
    })
}

/// [`TreeWriter`] over an open transaction.
struct SqliteTreeWriter<'a> {
    conn: &'a Connection,
}

impl TreeWriter for SqliteTreeWriter<'_> {
    fn delete_project_tree(&mut self, project_id: ProjectId) -> Result<usize, StoreError> {
        Ok(self
            .conn
            .execute("DELETE FROM files WHERE project_id = ?1", params![project_id.0])?)
    }

    fn create_root(&mut self, project_id: ProjectId) -> Result<FileId, StoreError> {
        self.conn.execute(
            "INSERT INTO files (name, folder, project_id, parent_id) VALUES (?1, 1, ?2, NULL)",
            params![ROOT_FOLDER_NAME, project_id.0],
        )?;
        Ok(FileId(self.conn.last_insert_rowid()))
    }

    fn insert_file(
        &mut self,
        project_id: ProjectId,
        parent: FileId,
        row: &NewFileRow,
    ) -> Result<FileId, StoreError> {
        self.conn.execute(
            "INSERT INTO files (name, folder, project_id, parent_id, path, blob_id, mime_type)
             VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.name,
                project_id.0,
                parent.0,
                row.path,
                row.blob_id.as_str(),
                row.mime_type,
            ],
        )?;
        Ok(FileId(self.conn.last_insert_rowid()))
    }
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn find_by_repo(&self, repo: &RepoRef) -> Result<Option<Project>, StoreError> {
        let store = self.clone();
        let repo = repo.clone();
        tokio::task::spawn_blocking(move || store.find_by_repo_blocking(&repo)).await?
    }

    async fn set_has_index(&self, id: ProjectId, has_index: bool) -> Result<(), StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let updated = store.lock().execute(
                "UPDATE projects SET has_index = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
                params![has_index, id.0],
            )?;
            if updated == 0 {
                return Err(StoreError::ProjectNotFound(id));
            }
            Ok(())
        })
        .await?
    }
}

#[async_trait]
impl FileTreeStore for SqliteStore {
    async fn replace_tree(
        &self,
        project_id: ProjectId,
        rows: Vec<NewFileRow>,
    ) -> Result<TreeReplacement, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_tree_writer(|writer| write_replacement(writer, project_id, &rows))
        })
        .await?
    }

    async fn list_tree(&self, project_id: ProjectId) -> Result<Vec<FileEntry>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.list_tree_blocking(project_id)).await?
    }
}
