//! SQL migration definitions for the scholarflow database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: interaction_history, runs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Append-only interaction log, one stream per identity key (owner:role)
CREATE TABLE IF NOT EXISTS interaction_history (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_key TEXT NOT NULL,
    role         TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
    content      TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_identity ON interaction_history(identity_key, seq);

-- Pipeline run records
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    workflow    TEXT NOT NULL,
    query       TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    status      TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Run outcome details: output path and error message",
            sql: r#"
ALTER TABLE runs ADD COLUMN output_path TEXT;
ALTER TABLE runs ADD COLUMN error TEXT;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
