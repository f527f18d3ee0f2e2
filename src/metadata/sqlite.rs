//! SQLite-backed record store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::{
    now_timestamp, ArtifactRecord, ProjectRecord, ProjectStatus, RecordStore, UserProfile,
};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

const PROFILE_COLUMNS: &str = "id, email, first_name, last_name, avatar_url, role,
     quota_limit, quota_used, created_at, updated_at";

const PROJECT_COLUMNS: &str = "id, user_id, name, image_ref, status, created_at, updated_at";

const ARTIFACT_COLUMNS: &str = "id, project_id, user_id, html, css, js, preview_url, created_at";

/// Record store backed by a single SQLite database file.
pub struct SqliteRecordStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// Idempotent; safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_profiles (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL DEFAULT '',
                first_name  TEXT,
                last_name   TEXT,
                avatar_url  TEXT,
                role        TEXT NOT NULL DEFAULT 'user',
                quota_limit INTEGER NOT NULL DEFAULT 15 CHECK (quota_limit >= 0),
                quota_used  INTEGER NOT NULL DEFAULT 0 CHECK (quota_used >= 0),
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                name        TEXT NOT NULL,
                image_ref   TEXT,
                status      TEXT NOT NULL DEFAULT 'active'
                            CHECK (status IN ('active', 'processing', 'completed', 'failed')),
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,

                FOREIGN KEY (user_id) REFERENCES user_profiles(id)
            );

            CREATE INDEX IF NOT EXISTS idx_projects_user
                ON projects(user_id, created_at);

            CREATE TABLE IF NOT EXISTS artifacts (
                id          TEXT PRIMARY KEY,
                project_id  TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                html        TEXT NOT NULL DEFAULT '',
                css         TEXT NOT NULL DEFAULT '',
                js          TEXT NOT NULL DEFAULT '',
                preview_url TEXT,
                created_at  TEXT NOT NULL,

                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_artifacts_project
                ON artifacts(project_id, created_at);
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_timestamp()],
            )?;
        }

        Ok(())
    }
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        avatar_url: row.get(4)?,
        role: row.get(5)?,
        quota_limit: row.get(6)?,
        quota_used: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectRecord> {
    let status: String = row.get(4)?;
    let status = status
        .parse::<ProjectStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?;
    Ok(ProjectRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        image_ref: row.get(3)?,
        status,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    Ok(ArtifactRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        html: row.get(3)?,
        css: row.get(4)?,
        js: row.get(5)?,
        preview_url: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl RecordStore for SqliteRecordStore {
    fn get_profile(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<UserProfile>>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    &format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE id = ?1"),
                    params![user_id],
                    profile_from_row,
                )
                .optional()?;
            Ok(result)
        })
    }

    fn insert_profile(
        &self,
        profile: UserProfile,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                &format!(
                    "INSERT INTO user_profiles ({PROFILE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    profile.id,
                    profile.email,
                    profile.first_name,
                    profile.last_name,
                    profile.avatar_url,
                    profile.role,
                    profile.quota_limit,
                    profile.quota_used,
                    profile.created_at,
                    profile.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    fn upsert_profile(
        &self,
        profile: UserProfile,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let updated = conn.execute(
                "UPDATE user_profiles
                 SET email = ?1, first_name = ?2, last_name = ?3, avatar_url = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    profile.email,
                    profile.first_name,
                    profile.last_name,
                    profile.avatar_url,
                    profile.updated_at,
                    profile.id,
                ],
            )?;
            if updated == 1 {
                return Ok(false);
            }
            // The connection lock is held, so no writer can slip in between.
            conn.execute(
                &format!(
                    "INSERT INTO user_profiles ({PROFILE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    profile.id,
                    profile.email,
                    profile.first_name,
                    profile.last_name,
                    profile.avatar_url,
                    profile.role,
                    profile.quota_limit,
                    profile.quota_used,
                    profile.created_at,
                    profile.updated_at,
                ],
            )?;
            Ok(true)
        })
    }

    fn delete_profile(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute("DELETE FROM user_profiles WHERE id = ?1", params![user_id])?;
            Ok(())
        })
    }

    fn set_quota_limit(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let changed = conn.execute(
                "UPDATE user_profiles SET quota_limit = ?1, updated_at = ?2 WHERE id = ?3",
                params![limit, now_timestamp(), user_id],
            )?;
            Ok(changed == 1)
        })
    }

    fn consume_quota(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            // Check and increment in one statement.
            let changed = conn.execute(
                "UPDATE user_profiles
                 SET quota_used = quota_used + 1, updated_at = ?1
                 WHERE id = ?2 AND quota_used < quota_limit",
                params![now_timestamp(), user_id],
            )?;
            Ok(changed == 1)
        })
    }

    fn reset_quotas(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let changed = conn.execute(
                "UPDATE user_profiles SET quota_used = 0, updated_at = ?1",
                params![now_timestamp()],
            )?;
            Ok(changed as u64)
        })
    }

    fn insert_project(
        &self,
        project: ProjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                &format!(
                    "INSERT INTO projects ({PROJECT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    project.id,
                    project.user_id,
                    project.name,
                    project.image_ref,
                    project.status.as_str(),
                    project.created_at,
                    project.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get_project(
        &self,
        project_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ProjectRecord>>> + Send + '_>> {
        let project_id = project_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                    params![project_id],
                    project_from_row,
                )
                .optional()?;
            Ok(result)
        })
    }

    fn list_projects(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ProjectRecord>>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROJECT_COLUMNS} FROM projects
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let projects = stmt
                .query_map(params![user_id], project_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(projects)
        })
    }

    fn update_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        updated_at: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let project_id = project_id.to_string();
        let updated_at = updated_at.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let changed = conn.execute(
                "UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), updated_at, project_id],
            )?;
            if changed == 0 {
                anyhow::bail!("Project not found: {project_id}");
            }
            Ok(())
        })
    }

    fn insert_artifact(
        &self,
        artifact: ArtifactRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let changed = conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO artifacts ({ARTIFACT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    artifact.id,
                    artifact.project_id,
                    artifact.user_id,
                    artifact.html,
                    artifact.css,
                    artifact.js,
                    artifact.preview_url,
                    artifact.created_at,
                ],
            )?;
            Ok(changed == 1)
        })
    }

    fn get_artifact(
        &self,
        artifact_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ArtifactRecord>>> + Send + '_>> {
        let artifact_id = artifact_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    &format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = ?1"),
                    params![artifact_id],
                    artifact_from_row,
                )
                .optional()?;
            Ok(result)
        })
    }

    fn latest_artifact(
        &self,
        project_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ArtifactRecord>>> + Send + '_>> {
        let project_id = project_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    &format!(
                        "SELECT {ARTIFACT_COLUMNS} FROM artifacts
                         WHERE project_id = ?1
                         ORDER BY created_at DESC, rowid DESC
                         LIMIT 1"
                    ),
                    params![project_id],
                    artifact_from_row,
                )
                .optional()?;
            Ok(result)
        })
    }
}
