//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding the append-only
//! interaction history of every generation identity and the record of each
//! pipeline run.
//!
//! **Access rules:**
//! - `scholarflow run`: read-write via [`Storage::open`]
//! - `scholarflow history`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Row, params};
use serde::{Deserialize, Serialize};

use scholarflow_shared::{IdentityKey, Interaction, InteractionRole, Result, RunId, ScholarflowError};

// ---------------------------------------------------------------------------
// Run records
// ---------------------------------------------------------------------------

/// Lifecycle state of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ScholarflowError::Storage(format!(
                "unknown run status '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline run as stored in the `runs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub workflow: String,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub output_path: Option<String>,
    pub error: Option<String>,
}

impl RunRecord {
    /// A freshly started run.
    pub fn start(workflow: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: RunId::new(),
            workflow: workflow.into(),
            query: query.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            output_path: None,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> ScholarflowError {
    ScholarflowError::Storage(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ScholarflowError::Storage(format!("bad timestamp '{raw}': {e}")))
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScholarflowError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ScholarflowError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ScholarflowError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ScholarflowError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Interaction history
    // -----------------------------------------------------------------------

    /// Append one interaction to an identity's log.
    pub async fn append_interaction(
        &self,
        identity: &IdentityKey,
        interaction: &Interaction,
    ) -> Result<()> {
        self.check_writable()?;
        let key = identity.to_string();
        let created_at = interaction.created_at.to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO interaction_history (identity_key, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    key.as_str(),
                    interaction.role.as_str(),
                    interaction.content.as_str(),
                    created_at.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// The most recent `limit` interactions for an identity, oldest first.
    pub async fn recent_interactions(
        &self,
        identity: &IdentityKey,
        limit: usize,
    ) -> Result<Vec<Interaction>> {
        let key = identity.to_string();
        let mut rows = self
            .conn
            .query(
                "SELECT role, content, created_at FROM (
                     SELECT seq, role, content, created_at FROM interaction_history
                     WHERE identity_key = ?1 ORDER BY seq DESC LIMIT ?2
                 ) ORDER BY seq ASC",
                params![key.as_str(), limit as i64],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_interaction(&row)?);
        }
        Ok(results)
    }

    /// Every interaction for an identity, oldest first.
    pub async fn interaction_log(&self, identity: &IdentityKey) -> Result<Vec<Interaction>> {
        let key = identity.to_string();
        let mut rows = self
            .conn
            .query(
                "SELECT role, content, created_at FROM interaction_history
                 WHERE identity_key = ?1 ORDER BY seq ASC",
                params![key.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_interaction(&row)?);
        }
        Ok(results)
    }

    /// Distinct identity keys with their interaction counts, sorted by key.
    pub async fn list_identities(&self) -> Result<Vec<(String, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT identity_key, COUNT(*) FROM interaction_history
                 GROUP BY identity_key ORDER BY identity_key",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push((
                row.get::<String>(0).map_err(storage_err)?,
                row.get::<i64>(1).map_err(storage_err)? as u64,
            ));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Run records
    // -----------------------------------------------------------------------

    /// Record the start of a run.
    pub async fn insert_run(&self, run: &RunRecord) -> Result<()> {
        self.check_writable()?;
        let id = run.id.to_string();
        let started_at = run.started_at.to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, workflow, query, started_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_str(),
                    run.workflow.as_str(),
                    run.query.as_str(),
                    started_at.as_str(),
                    run.status.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark a run finished with its final status.
    pub async fn finish_run(
        &self,
        id: &RunId,
        status: RunStatus,
        output_path: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        let updated = self
            .conn
            .execute(
                "UPDATE runs SET finished_at = ?1, status = ?2, output_path = ?3, error = ?4
                 WHERE id = ?5",
                params![now.as_str(), status.as_str(), output_path, error, id.as_str()],
            )
            .await
            .map_err(storage_err)?;

        if updated == 0 {
            return Err(ScholarflowError::Storage(format!("run {id} not found")));
        }
        Ok(())
    }

    /// Get a run by ID.
    pub async fn get_run(&self, id: &RunId) -> Result<Option<RunRecord>> {
        let id = id.to_string();
        let mut rows = self
            .conn
            .query(
                "SELECT id, workflow, query, started_at, finished_at, status, output_path, error
                 FROM runs WHERE id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, workflow, query, started_at, finished_at, status, output_path, error
                 FROM runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }
}

fn row_to_interaction(row: &Row) -> Result<Interaction> {
    let role: String = row.get(0).map_err(storage_err)?;
    let created_at: String = row.get(2).map_err(storage_err)?;
    Ok(Interaction {
        role: role.parse::<InteractionRole>()?,
        content: row.get(1).map_err(storage_err)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_run(row: &Row) -> Result<RunRecord> {
    let id: String = row.get(0).map_err(storage_err)?;
    let started_at: String = row.get(3).map_err(storage_err)?;
    let finished_at: Option<String> = row.get(4).map_err(storage_err)?;
    let status: String = row.get(5).map_err(storage_err)?;

    Ok(RunRecord {
        id: id.parse().map_err(storage_err)?,
        workflow: row.get(1).map_err(storage_err)?,
        query: row.get(2).map_err(storage_err)?,
        started_at: parse_timestamp(&started_at)?,
        finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
        status: RunStatus::parse(&status)?,
        output_path: row.get(6).map_err(storage_err)?,
        error: row.get(7).map_err(storage_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("sf_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("sf_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn history_is_per_identity_and_windowed() {
        let storage = test_storage().await;
        let planner = IdentityKey::new("user", "planner");
        let researcher = IdentityKey::new("user", "researcher_0");

        for i in 0..5 {
            storage
                .append_interaction(&planner, &Interaction::user(format!("q{i}")))
                .await
                .expect("append");
        }
        storage
            .append_interaction(&researcher, &Interaction::assistant("essay"))
            .await
            .expect("append");

        let recent = storage.recent_interactions(&planner, 3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["q2", "q3", "q4"]);

        let log = storage.interaction_log(&researcher).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].role, InteractionRole::Assistant);

        let identities = storage.list_identities().await.unwrap();
        assert_eq!(
            identities,
            vec![
                ("user:planner".to_string(), 5),
                ("user:researcher_0".to_string(), 1)
            ]
        );
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let storage = test_storage().await;
        let run = RunRecord::start("deep-search", "ML for coordination compounds");
        storage.insert_run(&run).await.expect("insert run");

        let found = storage.get_run(&run.id).await.unwrap().expect("run exists");
        assert_eq!(found.status, RunStatus::Running);
        assert!(found.finished_at.is_none());

        storage
            .finish_run(&run.id, RunStatus::Completed, Some("/tmp/out.md"), None)
            .await
            .expect("finish run");

        let found = storage.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(found.status, RunStatus::Completed);
        assert_eq!(found.output_path.as_deref(), Some("/tmp/out.md"));
        assert!(found.finished_at.is_some());

        let runs = storage.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn finish_unknown_run_fails() {
        let storage = test_storage().await;
        let err = storage
            .finish_run(&RunId::new(), RunStatus::Failed, None, Some("boom"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("sf_test_{}.db", Uuid::now_v7()));
        drop(Storage::open(&tmp).await.expect("create"));

        let ro = Storage::open_readonly(&tmp).await.expect("open readonly");
        let err = ro
            .append_interaction(&IdentityKey::new("user", "planner"), &Interaction::user("x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read-only"));
        assert!(ro.list_identities().await.unwrap().is_empty());
    }
}
