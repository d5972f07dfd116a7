//! # Test Identity Repository
//!
//! SQLite-backed identity store. A test's durable identity is its slug; each
//! run observes the slugs it executed, soft-deletes the ones that vanished
//! from suites that actually ran, and resurrects deleted slugs that come back.

pub mod schema;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::{Clock, SystemClock};
use crate::error::{IdentityError, PersistenceError};
use crate::http::HttpMethod;
use crate::inspection::{GovernanceViolation, SecurityFinding};
use crate::runner::{RunSummary, TestRunResult};

pub const DEFAULT_DELETED_LIMIT: usize = 10;

const TEST_COLUMNS: &str = "id, test_hash, test_slug, current_name, current_description, suite_name, test_file, \
                            endpoint, http_method, first_seen_at, last_seen_at, deleted_at, total_runs";

/// What a run knows about a test when it reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestDescriptor {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub suite_name: String,
    pub test_file: Option<String>,
    pub endpoint: Option<String>,
    pub http_method: Option<HttpMethod>,
}

impl From<&TestRunResult> for TestDescriptor {
    fn from(result: &TestRunResult) -> Self {
        Self {
            slug: result.slug.clone(),
            name: result.name.clone(),
            description: result.description.clone(),
            suite_name: result.suite.clone(),
            test_file: result.file.clone(),
            endpoint: result.endpoint.clone(),
            http_method: result.method,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTest {
    pub id: i64,
    pub test_hash: String,
    pub test_slug: String,
    pub current_name: String,
    pub current_description: Option<String>,
    pub suite_name: String,
    pub test_file: Option<String>,
    pub endpoint: Option<String>,
    pub http_method: Option<String>,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub deleted_at: Option<i64>,
    pub total_runs: i64,
}

impl PersistedTest {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            test_hash: row.get(1)?,
            test_slug: row.get(2)?,
            current_name: row.get(3)?,
            current_description: row.get(4)?,
            suite_name: row.get(5)?,
            test_file: row.get(6)?,
            endpoint: row.get(7)?,
            http_method: row.get(8)?,
            first_seen_at: row.get(9)?,
            last_seen_at: row.get(10)?,
            deleted_at: row.get(11)?,
            total_runs: row.get(12)?,
        })
    }
}

/// A name/description the test carried before a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestHistoryEntry {
    pub id: i64,
    pub test_id: i64,
    pub prior_name: String,
    pub prior_description: Option<String>,
    pub test_hash: String,
    pub changed_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationOutcome {
    Created,
    Updated,
    /// The slug had been soft-deleted and is active again.
    Resurrected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTest {
    pub test: PersistedTest,
    pub outcome: ObservationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub environment: Option<String>,
    pub base_url: Option<String>,
    pub total_tests: i64,
    pub passed_tests: i64,
    pub failed_tests: i64,
    pub skipped_tests: i64,
    pub todo_tests: i64,
    pub duration_ms: i64,
    pub executed_suites: Vec<String>,
    pub deleted_test_ids: Vec<i64>,
}

/// SHA-256 over name and description; changes whenever either does.
pub fn test_hash(name: &str, description: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(description.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

pub struct TestRepository {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl TestRepository {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Directory {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        schema::apply_pragmas(&conn, false)?;
        tracing::debug!(target: "apiwarden.store", path = %path.display(), "opened results database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        schema::apply_pragmas(&conn, true)?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, PersistenceError> {
        schema::initialize(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start_run(&self, environment: Option<&str>, base_url: Option<&str>) -> Result<i64, PersistenceError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO test_runs (started_at, environment, base_url) VALUES (?1, ?2, ?3)",
            params![self.clock.now_ms(), environment, base_url],
        )?;
        let run_id = conn.last_insert_rowid();
        tracing::debug!(target: "apiwarden.store", run_id, "run started");
        Ok(run_id)
    }

    pub fn finish_run(&self, run_id: i64, summary: &RunSummary) -> Result<(), PersistenceError> {
        let counts = &summary.counts;
        let updated = self.conn().execute(
            "UPDATE test_runs
             SET finished_at = ?2, total_tests = ?3, passed_tests = ?4, failed_tests = ?5,
                 skipped_tests = ?6, todo_tests = ?7, duration_ms = ?8
             WHERE id = ?1",
            params![
                run_id,
                self.clock.now_ms(),
                to_i64(counts.total),
                to_i64(counts.passed),
                to_i64(counts.failed),
                to_i64(counts.skipped),
                to_i64(counts.todo),
                i64::try_from(summary.duration_ms).unwrap_or(i64::MAX),
            ],
        )?;
        if updated == 0 {
            return Err(PersistenceError::RunNotFound(run_id));
        }
        Ok(())
    }

    pub fn get_run(&self, run_id: i64) -> Result<Option<RunRecord>, PersistenceError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, started_at, finished_at, environment, base_url, total_tests, passed_tests,
                        failed_tests, skipped_tests, todo_tests, duration_ms, executed_suites, deleted_test_ids
                 FROM test_runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        RunRecord {
                            id: row.get(0)?,
                            started_at: row.get(1)?,
                            finished_at: row.get(2)?,
                            environment: row.get(3)?,
                            base_url: row.get(4)?,
                            total_tests: row.get(5)?,
                            passed_tests: row.get(6)?,
                            failed_tests: row.get(7)?,
                            skipped_tests: row.get(8)?,
                            todo_tests: row.get(9)?,
                            duration_ms: row.get(10)?,
                            executed_suites: Vec::new(),
                            deleted_test_ids: Vec::new(),
                        },
                        row.get::<_, String>(11)?,
                        row.get::<_, String>(12)?,
                    ))
                },
            )
            .optional()?;

        let Some((mut record, suites, deleted)) = row else {
            return Ok(None);
        };
        record.executed_suites = decode("executed_suites", &suites)?;
        record.deleted_test_ids = decode("deleted_test_ids", &deleted)?;
        Ok(Some(record))
    }

    /// Record that a test was seen in this run, creating its identity on first
    /// sight. A soft-deleted identity is reactivated before anything else
    /// about it changes.
    pub fn find_or_create_test(&self, descriptor: &TestDescriptor) -> Result<ObservedTest, PersistenceError> {
        if descriptor.slug.trim().is_empty() {
            return Err(IdentityError::MissingSlug {
                name: descriptor.name.clone(),
            }
            .into());
        }

        let now = self.clock.now_ms();
        let hash = test_hash(&descriptor.name, descriptor.description.as_deref());
        let method = descriptor.http_method.map(HttpMethod::as_str);

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let existing = select_by_slug(&tx, &descriptor.slug)?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO tests (test_hash, test_slug, current_name, current_description, suite_name,
                                        test_file, endpoint, http_method, first_seen_at, last_seen_at, total_runs)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, 1)",
                    params![
                        hash,
                        descriptor.slug,
                        descriptor.name,
                        descriptor.description,
                        descriptor.suite_name,
                        descriptor.test_file,
                        descriptor.endpoint,
                        method,
                        now,
                    ],
                )?;
                let test_id = tx.last_insert_rowid();
                insert_history(&tx, test_id, &descriptor.name, descriptor.description.as_deref(), &hash, now)?;
                ObservationOutcome::Created
            }
            Some(stored) => {
                let resurrected = stored.is_deleted();
                if resurrected {
                    tx.execute("UPDATE tests SET deleted_at = NULL WHERE id = ?1", params![stored.id])?;
                }
                if stored.test_hash != hash {
                    insert_history(
                        &tx,
                        stored.id,
                        &stored.current_name,
                        stored.current_description.as_deref(),
                        &stored.test_hash,
                        now,
                    )?;
                }
                tx.execute(
                    "UPDATE tests
                     SET current_name = ?2, current_description = ?3, test_hash = ?4, suite_name = ?5,
                         test_file = ?6, endpoint = ?7, http_method = ?8,
                         total_runs = total_runs + 1, last_seen_at = MAX(last_seen_at, ?9)
                     WHERE id = ?1",
                    params![
                        stored.id,
                        descriptor.name,
                        descriptor.description,
                        hash,
                        descriptor.suite_name,
                        descriptor.test_file,
                        descriptor.endpoint,
                        method,
                        now,
                    ],
                )?;
                if resurrected {
                    ObservationOutcome::Resurrected
                } else {
                    ObservationOutcome::Updated
                }
            }
        };

        let test = select_by_slug(&tx, &descriptor.slug)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;

        tracing::trace!(
            target: "apiwarden.store",
            slug = %test.test_slug,
            ?outcome,
            total_runs = test.total_runs,
            "test observed"
        );
        if outcome == ObservationOutcome::Resurrected {
            tracing::info!(target: "apiwarden.store", slug = %test.test_slug, "deleted test reappeared");
        }

        Ok(ObservedTest { test, outcome })
    }

    /// Soft-delete active tests of the executed suites whose slugs were not
    /// observed in this run. Suites that did not run are never touched.
    /// Returns only rows deleted by this call.
    pub fn mark_deleted_tests(
        &self,
        run_id: i64,
        current_slugs: &[String],
        executed_suites: &[String],
    ) -> Result<Vec<PersistedTest>, PersistenceError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let (started_at, suites_json, deleted_json): (i64, String, String) = tx
            .query_row(
                "SELECT started_at, executed_suites, deleted_test_ids FROM test_runs WHERE id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
            .ok_or(PersistenceError::RunNotFound(run_id))?;

        let current: HashSet<&str> = current_slugs.iter().map(String::as_str).collect();
        let now = self.clock.now_ms();
        let mut deleted = Vec::new();

        {
            let mut candidates = tx.prepare(&format!(
                "SELECT {TEST_COLUMNS} FROM tests
                 WHERE suite_name = ?1 AND deleted_at IS NULL AND last_seen_at < ?2
                 ORDER BY id"
            ))?;
            for suite in executed_suites {
                let rows = candidates.query_map(params![suite, started_at], PersistedTest::from_row)?;
                for row in rows {
                    let test = row?;
                    if !current.contains(test.test_slug.as_str()) {
                        deleted.push(test);
                    }
                }
            }
        }

        for test in &mut deleted {
            tx.execute(
                "UPDATE tests SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                params![test.id, now],
            )?;
            test.deleted_at = Some(now);
        }

        let mut suites: Vec<String> = decode("executed_suites", &suites_json)?;
        for suite in executed_suites {
            if !suites.contains(suite) {
                suites.push(suite.clone());
            }
        }
        let mut deleted_ids: Vec<i64> = decode("deleted_test_ids", &deleted_json)?;
        deleted_ids.extend(deleted.iter().map(|test| test.id));
        deleted_ids.sort_unstable();
        deleted_ids.dedup();

        tx.execute(
            "UPDATE test_runs SET executed_suites = ?2, deleted_test_ids = ?3 WHERE id = ?1",
            params![run_id, encode("executed_suites", &suites)?, encode("deleted_test_ids", &deleted_ids)?],
        )?;
        tx.commit()?;

        if !deleted.is_empty() {
            tracing::info!(
                target: "apiwarden.store",
                run_id,
                deleted = deleted.len(),
                suites = executed_suites.len(),
                "marked tests deleted"
            );
        }
        Ok(deleted)
    }

    /// Most recently deleted tests first.
    pub fn get_deleted_tests(&self, limit: usize) -> Result<Vec<PersistedTest>, PersistenceError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEST_COLUMNS} FROM tests WHERE deleted_at IS NOT NULL
             ORDER BY deleted_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![to_i64(limit)], PersistedTest::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_test_by_slug(&self, slug: &str) -> Result<Option<PersistedTest>, PersistenceError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                &format!("SELECT {TEST_COLUMNS} FROM tests WHERE test_slug = ?1"),
                params![slug],
                PersistedTest::from_row,
            )
            .optional()?)
    }

    /// Prior names and descriptions, oldest first.
    pub fn get_history(&self, test_id: i64) -> Result<Vec<TestHistoryEntry>, PersistenceError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, test_id, prior_name, prior_description, test_hash, changed_at
             FROM test_history WHERE test_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![test_id], |row| {
            Ok(TestHistoryEntry {
                id: row.get(0)?,
                test_id: row.get(1)?,
                prior_name: row.get(2)?,
                prior_description: row.get(3)?,
                test_hash: row.get(4)?,
                changed_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn record_result(&self, run_id: i64, test_id: i64, result: &TestRunResult) -> Result<(), PersistenceError> {
        let error = result.error.as_ref();
        self.conn().execute(
            "INSERT INTO test_results (run_id, test_id, status, duration_ms, retries, error_message,
                                       error_stack, timed_out, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run_id,
                test_id,
                result.status.as_str(),
                i64::try_from(result.duration_ms).unwrap_or(i64::MAX),
                result.retries,
                error.map(|err| err.message.as_str()),
                error.and_then(|err| err.stack.as_deref()),
                error.is_some_and(|err| err.timeout),
                self.clock.now_ms(),
            ],
        )?;
        Ok(())
    }

    pub fn record_violation(
        &self,
        run_id: i64,
        test_id: Option<i64>,
        violation: &GovernanceViolation,
    ) -> Result<(), PersistenceError> {
        self.insert_inspection(
            run_id,
            test_id,
            InspectionRow {
                kind: "governance",
                rule: &violation.rule,
                category: &violation.category,
                severity: violation.severity.as_str(),
                message: &violation.message,
                location: violation.location.as_deref(),
                remediation: violation.remediation.as_deref(),
                endpoint: &violation.endpoint,
                method: violation.method,
            },
        )
    }

    pub fn record_finding(
        &self,
        run_id: i64,
        test_id: Option<i64>,
        finding: &SecurityFinding,
    ) -> Result<(), PersistenceError> {
        self.insert_inspection(
            run_id,
            test_id,
            InspectionRow {
                kind: "security",
                rule: &finding.check,
                category: &finding.category,
                severity: finding.severity.as_str(),
                message: &finding.message,
                location: finding.location.as_deref(),
                remediation: finding.remediation.as_deref(),
                endpoint: &finding.endpoint,
                method: finding.method,
            },
        )
    }

    fn insert_inspection(&self, run_id: i64, test_id: Option<i64>, row: InspectionRow<'_>) -> Result<(), PersistenceError> {
        self.conn().execute(
            "INSERT INTO inspection_results (run_id, test_id, kind, rule, category, severity, message,
                                             location, remediation, endpoint, http_method, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run_id,
                test_id,
                row.kind,
                row.rule,
                row.category,
                row.severity,
                row.message,
                row.location,
                row.remediation,
                row.endpoint,
                row.method.as_str(),
                self.clock.now_ms(),
            ],
        )?;
        Ok(())
    }

    /// `(governance, security)` rows stored for a run.
    pub fn count_inspection_results(&self, run_id: i64) -> Result<(i64, i64), PersistenceError> {
        let conn = self.conn();
        Ok(conn.query_row(
            "SELECT COALESCE(SUM(kind = 'governance'), 0), COALESCE(SUM(kind = 'security'), 0)
             FROM inspection_results WHERE run_id = ?1",
            params![run_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?)
    }

    /// `(governance, security)` rows stored for one test in a run.
    pub fn count_test_inspection_results(&self, run_id: i64, test_id: i64) -> Result<(i64, i64), PersistenceError> {
        let conn = self.conn();
        Ok(conn.query_row(
            "SELECT COALESCE(SUM(kind = 'governance'), 0), COALESCE(SUM(kind = 'security'), 0)
             FROM inspection_results WHERE run_id = ?1 AND test_id = ?2",
            params![run_id, test_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?)
    }
}

struct InspectionRow<'a> {
    kind: &'static str,
    rule: &'a str,
    category: &'a str,
    severity: &'static str,
    message: &'a str,
    location: Option<&'a str>,
    remediation: Option<&'a str>,
    endpoint: &'a str,
    method: HttpMethod,
}

fn select_by_slug(tx: &Transaction<'_>, slug: &str) -> Result<Option<PersistedTest>, PersistenceError> {
    Ok(tx
        .query_row(
            &format!("SELECT {TEST_COLUMNS} FROM tests WHERE test_slug = ?1"),
            params![slug],
            PersistedTest::from_row,
        )
        .optional()?)
}

fn insert_history(
    tx: &Transaction<'_>,
    test_id: i64,
    name: &str,
    description: Option<&str>,
    hash: &str,
    changed_at: i64,
) -> Result<(), PersistenceError> {
    tx.execute(
        "INSERT INTO test_history (test_id, prior_name, prior_description, test_hash, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![test_id, name, description, hash, changed_at],
    )?;
    Ok(())
}

fn encode<T: Serialize>(column: &'static str, value: &T) -> Result<String, PersistenceError> {
    serde_json::to_string(value).map_err(|source| PersistenceError::Encode { column, source })
}

fn decode<T: serde::de::DeserializeOwned>(column: &'static str, raw: &str) -> Result<T, PersistenceError> {
    serde_json::from_str(raw).map_err(|source| PersistenceError::Encode { column, source })
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
