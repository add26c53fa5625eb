//! Database schema constants.
//!
//! This module contains all SQL schema definitions for the SQLite job store.
//! Timestamps are stored as integer microseconds since the Unix epoch.

/// SQL schema for creating the jobs table.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id          TEXT    PRIMARY KEY,
    command     TEXT    NOT NULL,
    state       TEXT    NOT NULL DEFAULT 'pending',
    attempts    INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    is_dlq      INTEGER NOT NULL DEFAULT 0,
    CHECK (state IN ('pending', 'processing', 'completed', 'failed', 'dead')),
    CHECK (attempts >= 0 AND attempts <= max_retries),
    CHECK (max_retries >= 1)
)
"#;

/// SQL schema for creating the config key-value table.
pub const CREATE_CONFIG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS config (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

/// Index backing the FIFO claim query.
pub const CREATE_JOBS_CLAIM_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(state, is_dlq, created_at)";

/// Index backing the DLQ listing.
pub const CREATE_JOBS_DLQ_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_dlq ON jobs(is_dlq)";

/// Returns all schema creation statements in order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_JOBS_TABLE,
        CREATE_CONFIG_TABLE,
        CREATE_JOBS_CLAIM_INDEX,
        CREATE_JOBS_DLQ_INDEX,
    ]
}

/// Column list shared by every query that materializes a [`crate::scheduler::Job`].
pub const JOB_COLUMNS: &str =
    "id, command, state, attempts, max_retries, created_at, updated_at, is_dlq";
