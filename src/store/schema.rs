use rusqlite::Connection;

use crate::error::PersistenceError;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_hash TEXT NOT NULL,
    test_slug TEXT NOT NULL UNIQUE,
    current_name TEXT NOT NULL,
    current_description TEXT,
    suite_name TEXT NOT NULL,
    test_file TEXT,
    endpoint TEXT,
    http_method TEXT,
    first_seen_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    deleted_at INTEGER,
    total_runs INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_tests_suite_active ON tests (suite_name, deleted_at);
CREATE INDEX IF NOT EXISTS idx_tests_deleted_at ON tests (deleted_at);

CREATE TABLE IF NOT EXISTS test_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    environment TEXT,
    base_url TEXT,
    total_tests INTEGER NOT NULL DEFAULT 0,
    passed_tests INTEGER NOT NULL DEFAULT 0,
    failed_tests INTEGER NOT NULL DEFAULT 0,
    skipped_tests INTEGER NOT NULL DEFAULT 0,
    todo_tests INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    executed_suites TEXT NOT NULL DEFAULT '[]',
    deleted_test_ids TEXT NOT NULL DEFAULT '[]',
    CHECK (total_tests = passed_tests + failed_tests + skipped_tests + todo_tests)
);

CREATE TABLE IF NOT EXISTS test_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_id INTEGER NOT NULL REFERENCES tests (id),
    prior_name TEXT NOT NULL,
    prior_description TEXT,
    test_hash TEXT NOT NULL,
    changed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_test_history_test_id ON test_history (test_id);

CREATE TABLE IF NOT EXISTS test_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES test_runs (id),
    test_id INTEGER NOT NULL REFERENCES tests (id),
    status TEXT NOT NULL CHECK (status IN ('passed', 'failed', 'skipped', 'todo')),
    duration_ms INTEGER NOT NULL,
    retries INTEGER NOT NULL,
    error_message TEXT,
    error_stack TEXT,
    timed_out INTEGER NOT NULL DEFAULT 0,
    recorded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_test_results_run_id ON test_results (run_id);

CREATE TABLE IF NOT EXISTS inspection_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES test_runs (id),
    test_id INTEGER REFERENCES tests (id),
    kind TEXT NOT NULL CHECK (kind IN ('governance', 'security')),
    rule TEXT NOT NULL,
    category TEXT NOT NULL,
    severity TEXT NOT NULL,
    message TEXT NOT NULL,
    location TEXT,
    remediation TEXT,
    endpoint TEXT NOT NULL,
    http_method TEXT NOT NULL,
    recorded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_inspection_results_run_id ON inspection_results (run_id);
";

pub fn apply_pragmas(conn: &Connection, in_memory: bool) -> Result<(), PersistenceError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    if !in_memory {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    Ok(())
}

/// Create every table and index. Safe to run against an existing database.
pub fn initialize(conn: &mut Connection) -> Result<(), PersistenceError> {
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();
        initialize(&mut conn).unwrap();

        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn run_totals_must_add_up() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO test_runs (started_at, total_tests, passed_tests) VALUES (1, 3, 1)",
            [],
        );
        assert!(bad.is_err());

        conn.execute(
            "INSERT INTO test_runs (started_at, total_tests, passed_tests, todo_tests) VALUES (1, 3, 1, 2)",
            [],
        )
        .unwrap();
    }
}
