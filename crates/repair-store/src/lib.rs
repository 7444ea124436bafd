//! Durable trace/step/bug-case store (§4.11), backed by an embedded
//! SQLite database opened in WAL mode with a bundled FTS5 virtual
//! table for full-text retrieval.

use std::sync::Mutex;

use chrono::Utc;
use repair_core::error::{RepairError, Result};
use repair_core::trace::{BugCase, BugCaseRevision, Step, StepStatus, Trace, TraceStatus, TriggerType};
use rusqlite::{params, Connection, OptionalExtension};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn map_sqlite_err(context: &str) -> impl Fn(rusqlite::Error) -> RepairError + '_ {
    move |e| RepairError::Other(anyhow::anyhow!("{context}: {e}"))
}

pub struct TraceStore {
    conn: Mutex<Connection>,
}

impl TraceStore {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| RepairError::Other(e.into()))?;
            }
        }
        let conn = Connection::open(path).map_err(map_sqlite_err("opening trace store"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(map_sqlite_err("enabling WAL"))?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_err("opening in-memory store"))?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("trace store mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS traces (
                trace_id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                finished_at INTEGER,
                repo_url TEXT NOT NULL,
                code_host TEXT NOT NULL,
                error_signature TEXT NOT NULL,
                error_excerpt TEXT NOT NULL,
                status TEXT NOT NULL,
                failure_step TEXT,
                failure_message TEXT,
                mr_url TEXT,
                commit_sha TEXT
            );

            CREATE TABLE IF NOT EXISTS steps (
                trace_id TEXT NOT NULL,
                step_name TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER,
                status TEXT NOT NULL,
                message TEXT,
                PRIMARY KEY (trace_id, step_name)
            );

            CREATE TABLE IF NOT EXISTS bug_cases (
                case_id TEXT PRIMARY KEY,
                repo_url TEXT NOT NULL,
                code_host TEXT NOT NULL,
                signature TEXT NOT NULL,
                exception_type TEXT NOT NULL,
                message_key TEXT NOT NULL,
                top_frames TEXT NOT NULL,
                status TEXT NOT NULL,
                quality_score REAL NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(repo_url, signature)
            );

            CREATE TABLE IF NOT EXISTS bug_case_revisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                case_id TEXT NOT NULL,
                trace_id TEXT,
                trigger_type TEXT NOT NULL,
                trigger_text TEXT NOT NULL,
                pr_url TEXT,
                pr_title TEXT,
                pr_body TEXT,
                commit_sha TEXT,
                changed_files_json TEXT,
                diff_text TEXT NOT NULL,
                preflight_ok INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS bug_cases_fts USING fts5(case_id UNINDEXED, text);
            "#,
        )
        .map_err(map_sqlite_err("creating schema"))?;
        self.migrate_columns(&conn)?;
        Ok(())
    }

    /// Inspects column metadata and idempotently adds any column named
    /// in the live schema above but absent from an older on-disk table,
    /// per §4.11's "schema migration... by inspecting column metadata."
    fn migrate_columns(&self, conn: &Connection) -> Result<()> {
        let expected: &[(&str, &str, &str)] = &[
            ("bug_cases", "quality_score", "REAL NOT NULL DEFAULT 0"),
        ];
        for (table, column, ddl) in expected {
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info({table})"))
                .map_err(map_sqlite_err("inspecting table_info"))?;
            let existing: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(1))
                .map_err(map_sqlite_err("reading table_info"))?
                .filter_map(std::result::Result::ok)
                .collect();
            if !existing.iter().any(|c| c == column) {
                conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {ddl}"), [])
                    .map_err(map_sqlite_err("migrating column"))?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn new_trace_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn create_trace(
        &self,
        trace_id: &str,
        repo_url: &str,
        code_host: &str,
        error_signature: &str,
        error_excerpt: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("trace store mutex poisoned");
        let excerpt: String = error_excerpt.chars().take(2000).collect();
        conn.execute(
            "INSERT INTO traces (trace_id, created_at, repo_url, code_host, error_signature, error_excerpt, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'RUNNING')
             ON CONFLICT(trace_id) DO NOTHING",
            params![trace_id, now(), repo_url, code_host, error_signature, excerpt],
        )
        .map_err(map_sqlite_err("creating trace"))?;
        Ok(())
    }

    pub fn finish_trace_ok(&self, trace_id: &str, mr_url: Option<&str>, commit_sha: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().expect("trace store mutex poisoned");
        conn.execute(
            "UPDATE traces SET finished_at = ?1, status = 'DONE', mr_url = ?2, commit_sha = ?3
             WHERE trace_id = ?4 AND status = 'RUNNING'",
            params![now(), mr_url, commit_sha, trace_id],
        )
        .map_err(map_sqlite_err("finishing trace ok"))?;
        Ok(())
    }

    pub fn finish_trace_fail(&self, trace_id: &str, failure_step: &str, failure_message: &str) -> Result<()> {
        let conn = self.conn.lock().expect("trace store mutex poisoned");
        let message: String = failure_message.chars().take(2000).collect();
        conn.execute(
            "UPDATE traces SET finished_at = ?1, status = 'FAILED', failure_step = ?2, failure_message = ?3
             WHERE trace_id = ?4 AND status = 'RUNNING'",
            params![now(), failure_step, message, trace_id],
        )
        .map_err(map_sqlite_err("finishing trace fail"))?;
        Ok(())
    }

    pub fn start_step(&self, trace_id: &str, step_name: &str) -> Result<()> {
        let conn = self.conn.lock().expect("trace store mutex poisoned");
        conn.execute(
            "INSERT INTO steps (trace_id, step_name, started_at, status) VALUES (?1, ?2, ?3, 'RUNNING')
             ON CONFLICT(trace_id, step_name) DO UPDATE SET started_at = excluded.started_at, status = 'RUNNING', finished_at = NULL, message = NULL",
            params![trace_id, step_name, now()],
        )
        .map_err(map_sqlite_err("starting step"))?;
        Ok(())
    }

    pub fn finish_step_ok(&self, trace_id: &str, step_name: &str, message: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().expect("trace store mutex poisoned");
        let message = message.map(|m| m.chars().take(2000).collect::<String>());
        conn.execute(
            "UPDATE steps SET finished_at = ?1, status = 'OK', message = ?2
             WHERE trace_id = ?3 AND step_name = ?4 AND status = 'RUNNING'",
            params![now(), message, trace_id, step_name],
        )
        .map_err(map_sqlite_err("finishing step ok"))?;
        Ok(())
    }

    pub fn finish_step_fail(&self, trace_id: &str, step_name: &str, message: &str) -> Result<()> {
        let conn = self.conn.lock().expect("trace store mutex poisoned");
        let message: String = message.chars().take(2000).collect();
        conn.execute(
            "UPDATE steps SET finished_at = ?1, status = 'FAIL', message = ?2
             WHERE trace_id = ?3 AND step_name = ?4 AND status = 'RUNNING'",
            params![now(), message, trace_id, step_name],
        )
        .map_err(map_sqlite_err("finishing step fail"))?;
        Ok(())
    }

    pub fn get_trace(&self, trace_id: &str) -> Result<Option<(Trace, Vec<Step>)>> {
        let conn = self.conn.lock().expect("trace store mutex poisoned");
        let trace = conn
            .query_row(
                "SELECT trace_id, created_at, finished_at, repo_url, code_host, error_signature,
                        error_excerpt, status, failure_step, failure_message, mr_url, commit_sha
                 FROM traces WHERE trace_id = ?1",
                params![trace_id],
                row_to_trace,
            )
            .optional()
            .map_err(map_sqlite_err("fetching trace"))?;
        let Some(trace) = trace else { return Ok(None) };

        let mut stmt = conn
            .prepare(
                "SELECT trace_id, step_name, started_at, finished_at, status, message
                 FROM steps WHERE trace_id = ?1 ORDER BY started_at ASC",
            )
            .map_err(map_sqlite_err("preparing steps query"))?;
        let steps = stmt
            .query_map(params![trace_id], row_to_step)
            .map_err(map_sqlite_err("querying steps"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_sqlite_err("reading step row"))?;
        Ok(Some((trace, steps)))
    }

    /// Paginated trace listing for `GET /v1/traces`, optionally filtered
    /// by `repo_url` and/or `status`. Honours the same pagination bounds
    /// as `query_bug_cases` (`limit ∈ [1, 200]`, `offset ≥ 0`).
    pub fn list_traces(
        &self,
        repo_url: Option<&str>,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Trace>, i64)> {
        let limit = limit.clamp(1, repair_core::trace::MAX_PAGE_LIMIT);
        let offset = offset.max(0);
        let conn = self.conn.lock().expect("trace store mutex poisoned");

        let mut stmt = conn
            .prepare(
                "SELECT trace_id, created_at, finished_at, repo_url, code_host, error_signature,
                        error_excerpt, status, failure_step, failure_message, mr_url, commit_sha
                 FROM traces
                 WHERE (:repo_url IS NULL OR repo_url = :repo_url)
                   AND (:status IS NULL OR status = :status)
                 ORDER BY created_at DESC LIMIT :limit OFFSET :offset",
            )
            .map_err(map_sqlite_err("preparing traces query"))?;
        let items = stmt
            .query_map(
                rusqlite::named_params! { ":repo_url": repo_url, ":status": status, ":limit": limit, ":offset": offset },
                row_to_trace,
            )
            .map_err(map_sqlite_err("querying traces"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_sqlite_err("reading trace row"))?;

        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM traces
                 WHERE (:repo_url IS NULL OR repo_url = :repo_url)
                   AND (:status IS NULL OR status = :status)",
                rusqlite::named_params! { ":repo_url": repo_url, ":status": status },
                |row| row.get(0),
            )
            .map_err(map_sqlite_err("counting traces"))?;

        Ok((items, total))
    }

    /// Upserts the bug case keyed by `(repo_url, signature)`, appends
    /// an immutable revision row, and refreshes the case's FTS entry
    /// (delete-then-insert), per §4.11.
    #[allow(clippy::too_many_arguments)]
    pub fn record_bug_case_revision(
        &self,
        repo_url: &str,
        code_host: &str,
        signature: &str,
        exception_type: &str,
        message_key: &str,
        top_frames: &str,
        trace_id: Option<&str>,
        trigger_type: TriggerType,
        trigger_text: &str,
        pr_url: Option<&str>,
        pr_title: Option<&str>,
        pr_body: Option<&str>,
        commit_sha: Option<&str>,
        changed_files_json: Option<&str>,
        diff_text: &str,
        preflight_ok: bool,
    ) -> Result<String> {
        let conn = self.conn.lock().expect("trace store mutex poisoned");
        let ts = now();

        let existing: Option<String> = conn
            .query_row(
                "SELECT case_id FROM bug_cases WHERE repo_url = ?1 AND signature = ?2",
                params![repo_url, signature],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sqlite_err("looking up bug case"))?;

        let case_id = match existing {
            Some(case_id) => {
                conn.execute(
                    "UPDATE bug_cases SET exception_type = ?1, message_key = ?2, top_frames = ?3, updated_at = ?4
                     WHERE case_id = ?5",
                    params![exception_type, message_key, top_frames, ts, case_id],
                )
                .map_err(map_sqlite_err("updating bug case"))?;
                case_id
            }
            None => {
                let case_id = uuid::Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO bug_cases (case_id, repo_url, code_host, signature, exception_type, message_key,
                                             top_frames, status, quality_score, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'OPEN', 0, ?8, ?8)",
                    params![case_id, repo_url, code_host, signature, exception_type, message_key, top_frames, ts],
                )
                .map_err(map_sqlite_err("inserting bug case"))?;
                case_id
            }
        };

        let trigger_text_trimmed: String = trigger_text.chars().take(20_000).collect();
        let pr_body_trimmed = pr_body.map(|b| b.chars().take(20_000).collect::<String>());
        let diff_trimmed: String = diff_text.chars().take(200_000).collect();
        let trigger_type_str = match trigger_type {
            TriggerType::Error => "ERROR",
            TriggerType::PrComment => "PR_COMMENT",
        };

        conn.execute(
            "INSERT INTO bug_case_revisions (case_id, trace_id, trigger_type, trigger_text, pr_url, pr_title,
                                              pr_body, commit_sha, changed_files_json, diff_text, preflight_ok, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                case_id,
                trace_id,
                trigger_type_str,
                trigger_text_trimmed,
                pr_url,
                pr_title,
                pr_body_trimmed,
                commit_sha,
                changed_files_json,
                diff_trimmed,
                i64::from(preflight_ok),
                ts,
            ],
        )
        .map_err(map_sqlite_err("inserting bug case revision"))?;

        let fts_text = format!("{exception_type} {message_key} {top_frames}");
        conn.execute("DELETE FROM bug_cases_fts WHERE case_id = ?1", params![case_id])
            .map_err(map_sqlite_err("clearing fts row"))?;
        conn.execute(
            "INSERT INTO bug_cases_fts (case_id, text) VALUES (?1, ?2)",
            params![case_id, fts_text],
        )
        .map_err(map_sqlite_err("refreshing fts row"))?;

        Ok(case_id)
    }

    /// §4.11's exact-signature-first, FTS-fallback retrieval used both
    /// by the task runner (reuse/dedup) and `/v1/debug/retrieval`.
    pub fn search_similar_cases(&self, repo_url: &str, text: &str, limit: i64) -> Result<Vec<BugCase>> {
        let (signature, _, _, _) = repair_core::extract::query_features(text);
        let conn = self.conn.lock().expect("trace store mutex poisoned");

        if !signature.is_empty() {
            let mut stmt = conn
                .prepare(
                    "SELECT case_id, repo_url, code_host, signature, exception_type, message_key, top_frames,
                            status, quality_score, created_at, updated_at
                     FROM bug_cases WHERE repo_url = ?1 AND signature = ?2
                     ORDER BY quality_score DESC, updated_at DESC LIMIT ?3",
                )
                .map_err(map_sqlite_err("preparing exact match query"))?;
            let exact = stmt
                .query_map(params![repo_url, signature, limit], row_to_bug_case)
                .map_err(map_sqlite_err("querying exact matches"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(map_sqlite_err("reading exact match row"))?;
            if !exact.is_empty() {
                return Ok(exact);
            }
        }

        let tokens = repair_core::normalize::tokenize(text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = tokens.join(" OR ");
        let mut stmt = conn
            .prepare(
                "SELECT bc.case_id, bc.repo_url, bc.code_host, bc.signature, bc.exception_type, bc.message_key,
                        bc.top_frames, bc.status, bc.quality_score, bc.created_at, bc.updated_at
                 FROM bug_cases_fts f
                 JOIN bug_cases bc ON bc.case_id = f.case_id
                 WHERE f.text MATCH ?1 AND bc.repo_url = ?2
                 ORDER BY bm25(f) ASC, bc.quality_score DESC, bc.updated_at DESC
                 LIMIT ?3",
            )
            .map_err(map_sqlite_err("preparing fts query"))?;
        let matches = stmt
            .query_map(params![match_expr, repo_url, limit], row_to_bug_case)
            .map_err(map_sqlite_err("querying fts matches"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_sqlite_err("reading fts match row"))?;
        Ok(matches)
    }

    /// §4.11's `query_bug_cases`: signature-exact, then FTS, then
    /// `LIKE`, then a plain recency listing, each returning `(items,
    /// total)` honouring the pagination bounds. The `repo_url` filter
    /// is always expressed as `(:repo_url IS NULL OR repo_url =
    /// :repo_url)` so every branch binds the same fixed parameter set.
    pub fn query_bug_cases(
        &self,
        repo_url: Option<&str>,
        q: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<BugCase>, i64)> {
        let limit = limit.clamp(1, repair_core::trace::MAX_PAGE_LIMIT);
        let offset = offset.max(0);
        let conn = self.conn.lock().expect("trace store mutex poisoned");

        let is_hex_signature =
            q.is_some_and(|q| q.len() == 64 && q.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));

        if let Some(signature) = q.filter(|_| is_hex_signature) {
            let mut stmt = conn
                .prepare(
                    "SELECT case_id, repo_url, code_host, signature, exception_type, message_key, top_frames,
                            status, quality_score, created_at, updated_at
                     FROM bug_cases
                     WHERE signature = :signature AND (:repo_url IS NULL OR repo_url = :repo_url)
                     ORDER BY updated_at DESC LIMIT :limit OFFSET :offset",
                )
                .map_err(map_sqlite_err("preparing signature query"))?;
            let items = stmt
                .query_map(
                    rusqlite::named_params! { ":signature": signature, ":repo_url": repo_url, ":limit": limit, ":offset": offset },
                    row_to_bug_case,
                )
                .map_err(map_sqlite_err("querying signature matches"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(map_sqlite_err("reading signature match row"))?;
            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM bug_cases WHERE signature = :signature AND (:repo_url IS NULL OR repo_url = :repo_url)",
                    rusqlite::named_params! { ":signature": signature, ":repo_url": repo_url },
                    |row| row.get(0),
                )
                .map_err(map_sqlite_err("counting signature matches"))?;
            return Ok((items, total));
        }

        let tokens = q.map(repair_core::normalize::tokenize).unwrap_or_default();
        if !tokens.is_empty() {
            let match_expr = tokens.join(" OR ");
            let mut stmt = conn
                .prepare(
                    "SELECT bc.case_id, bc.repo_url, bc.code_host, bc.signature, bc.exception_type, bc.message_key,
                            bc.top_frames, bc.status, bc.quality_score, bc.created_at, bc.updated_at
                     FROM bug_cases_fts f JOIN bug_cases bc ON bc.case_id = f.case_id
                     WHERE f.text MATCH :match AND (:repo_url IS NULL OR bc.repo_url = :repo_url)
                     ORDER BY bm25(f) ASC LIMIT :limit OFFSET :offset",
                )
                .map_err(map_sqlite_err("preparing fts list query"))?;
            let items = stmt
                .query_map(
                    rusqlite::named_params! { ":match": match_expr, ":repo_url": repo_url, ":limit": limit, ":offset": offset },
                    row_to_bug_case,
                )
                .map_err(map_sqlite_err("querying fts list"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(map_sqlite_err("reading fts list row"))?;
            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM bug_cases_fts f JOIN bug_cases bc ON bc.case_id = f.case_id
                     WHERE f.text MATCH :match AND (:repo_url IS NULL OR bc.repo_url = :repo_url)",
                    rusqlite::named_params! { ":match": match_expr, ":repo_url": repo_url },
                    |row| row.get(0),
                )
                .map_err(map_sqlite_err("counting fts matches"))?;
            return Ok((items, total));
        }

        if let Some(q) = q.filter(|q| !q.trim().is_empty()) {
            let like = format!("%{q}%");
            let mut stmt = conn
                .prepare(
                    "SELECT case_id, repo_url, code_host, signature, exception_type, message_key, top_frames,
                            status, quality_score, created_at, updated_at
                     FROM bug_cases
                     WHERE (exception_type LIKE :like OR message_key LIKE :like OR signature LIKE :like)
                       AND (:repo_url IS NULL OR repo_url = :repo_url)
                     ORDER BY updated_at DESC LIMIT :limit OFFSET :offset",
                )
                .map_err(map_sqlite_err("preparing like query"))?;
            let items = stmt
                .query_map(
                    rusqlite::named_params! { ":like": like, ":repo_url": repo_url, ":limit": limit, ":offset": offset },
                    row_to_bug_case,
                )
                .map_err(map_sqlite_err("querying like matches"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(map_sqlite_err("reading like match row"))?;
            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM bug_cases
                     WHERE (exception_type LIKE :like OR message_key LIKE :like OR signature LIKE :like)
                       AND (:repo_url IS NULL OR repo_url = :repo_url)",
                    rusqlite::named_params! { ":like": like, ":repo_url": repo_url },
                    |row| row.get(0),
                )
                .map_err(map_sqlite_err("counting like matches"))?;
            return Ok((items, total));
        }

        let mut stmt = conn
            .prepare(
                "SELECT case_id, repo_url, code_host, signature, exception_type, message_key, top_frames,
                        status, quality_score, created_at, updated_at
                 FROM bug_cases
                 WHERE (:repo_url IS NULL OR repo_url = :repo_url)
                 ORDER BY updated_at DESC LIMIT :limit OFFSET :offset",
            )
            .map_err(map_sqlite_err("preparing listing query"))?;
        let items = stmt
            .query_map(
                rusqlite::named_params! { ":repo_url": repo_url, ":limit": limit, ":offset": offset },
                row_to_bug_case,
            )
            .map_err(map_sqlite_err("querying listing"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_sqlite_err("reading listing row"))?;
        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM bug_cases WHERE (:repo_url IS NULL OR repo_url = :repo_url)",
                rusqlite::named_params! { ":repo_url": repo_url },
                |row| row.get(0),
            )
            .map_err(map_sqlite_err("counting listing"))?;
        Ok((items, total))
    }

    pub fn get_bug_case(&self, case_id: &str) -> Result<Option<(BugCase, Vec<BugCaseRevision>)>> {
        let conn = self.conn.lock().expect("trace store mutex poisoned");
        let case = conn
            .query_row(
                "SELECT case_id, repo_url, code_host, signature, exception_type, message_key, top_frames,
                        status, quality_score, created_at, updated_at
                 FROM bug_cases WHERE case_id = ?1",
                params![case_id],
                row_to_bug_case,
            )
            .optional()
            .map_err(map_sqlite_err("fetching bug case"))?;
        let Some(case) = case else { return Ok(None) };

        let mut stmt = conn
            .prepare(
                "SELECT case_id, trace_id, trigger_type, trigger_text, pr_url, pr_title, pr_body, commit_sha,
                        changed_files_json, diff_text, preflight_ok, created_at
                 FROM bug_case_revisions WHERE case_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(map_sqlite_err("preparing revisions query"))?;
        let revisions = stmt
            .query_map(params![case_id], row_to_revision)
            .map_err(map_sqlite_err("querying revisions"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_sqlite_err("reading revision row"))?;
        Ok(Some((case, revisions)))
    }
}

fn row_to_trace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trace> {
    let status: String = row.get(7)?;
    Ok(Trace {
        trace_id: row.get(0)?,
        created_at: row.get(1)?,
        finished_at: row.get(2)?,
        repo_url: row.get(3)?,
        code_host: row.get(4)?,
        error_signature: row.get(5)?,
        error_excerpt: row.get(6)?,
        status: match status.as_str() {
            "DONE" => TraceStatus::Done,
            "FAILED" => TraceStatus::Failed,
            _ => TraceStatus::Running,
        },
        failure_step: row.get(8)?,
        failure_message: row.get(9)?,
        mr_url: row.get(10)?,
        commit_sha: row.get(11)?,
    })
}

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<Step> {
    let status: String = row.get(4)?;
    Ok(Step {
        trace_id: row.get(0)?,
        step_name: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        status: match status.as_str() {
            "OK" => StepStatus::Ok,
            "FAIL" => StepStatus::Fail,
            _ => StepStatus::Running,
        },
        message: row.get(5)?,
    })
}

fn row_to_bug_case(row: &rusqlite::Row<'_>) -> rusqlite::Result<BugCase> {
    Ok(BugCase {
        case_id: row.get(0)?,
        repo_url: row.get(1)?,
        code_host: row.get(2)?,
        signature: row.get(3)?,
        exception_type: row.get(4)?,
        message_key: row.get(5)?,
        top_frames: row.get(6)?,
        status: row.get(7)?,
        quality_score: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_revision(row: &rusqlite::Row<'_>) -> rusqlite::Result<BugCaseRevision> {
    let trigger_type: String = row.get(2)?;
    Ok(BugCaseRevision {
        case_id: row.get(0)?,
        trace_id: row.get(1)?,
        trigger_type: if trigger_type == "PR_COMMENT" { TriggerType::PrComment } else { TriggerType::Error },
        trigger_text: row.get(3)?,
        pr_url: row.get(4)?,
        pr_title: row.get(5)?,
        pr_body: row.get(6)?,
        commit_sha: row.get(7)?,
        changed_files_json: row.get(8)?,
        diff_text: row.get(9)?,
        preflight_ok: row.get::<_, i64>(10)? != 0,
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TraceStore {
        TraceStore::open_in_memory().unwrap()
    }

    #[test]
    fn trace_lifecycle_enforces_finished_after_created() {
        let store = store();
        let trace_id = store.new_trace_id();
        store.create_trace(&trace_id, "https://github.com/acme/widgets", "github", "sig1", "boom").unwrap();
        store.start_step(&trace_id, "CREATE_FIX_BRANCH").unwrap();
        store.finish_step_ok(&trace_id, "CREATE_FIX_BRANCH", None).unwrap();
        store.finish_trace_ok(&trace_id, Some("https://github.com/acme/widgets/pull/1"), Some("abc123")).unwrap();

        let (trace, steps) = store.get_trace(&trace_id).unwrap().unwrap();
        assert!(matches!(trace.status, TraceStatus::Done));
        assert!(trace.finished_at.unwrap() >= trace.created_at);
        assert_eq!(steps.len(), 1);
        assert!(steps[0].finished_at.unwrap() >= steps[0].started_at);
    }

    #[test]
    fn finish_step_guard_prevents_resurrecting_a_terminal_step() {
        let store = store();
        let trace_id = store.new_trace_id();
        store.create_trace(&trace_id, "repo", "github", "sig", "boom").unwrap();
        store.start_step(&trace_id, "PREFLIGHT_CHECK").unwrap();
        store.finish_step_ok(&trace_id, "PREFLIGHT_CHECK", None).unwrap();
        // A late failure write must not flip the already-OK step.
        store.finish_step_fail(&trace_id, "PREFLIGHT_CHECK", "too late").unwrap();
        let (_, steps) = store.get_trace(&trace_id).unwrap().unwrap();
        assert!(matches!(steps[0].status, StepStatus::Ok));
    }

    #[test]
    fn record_bug_case_revision_upserts_case_and_appends_revisions() {
        let store = store();
        for _ in 0..2 {
            store
                .record_bug_case_revision(
                    "https://github.com/acme/widgets",
                    "github",
                    "sig-xyz",
                    "ValueError",
                    "invalid literal",
                    "main.py:handler",
                    None,
                    TriggerType::Error,
                    "boom",
                    None,
                    None,
                    None,
                    None,
                    None,
                    "diff",
                    true,
                )
                .unwrap();
        }
        let (case, revisions) = {
            let conn = store.conn.lock().unwrap();
            let case_id: String = conn
                .query_row("SELECT case_id FROM bug_cases WHERE signature = 'sig-xyz'", [], |r| r.get(0))
                .unwrap();
            drop(conn);
            store.get_bug_case(&case_id).unwrap().unwrap()
        };
        assert_eq!(case.signature, "sig-xyz");
        assert_eq!(revisions.len(), 2);
    }

    #[test]
    fn search_similar_cases_finds_exact_signature_match() {
        let store = store();
        let text = "Traceback (most recent call last):\n  File \"main.py\", line 1, in handler\nValueError: invalid literal for int() with base 10: 'xyz'";
        let (signature, exception_type, message_key, frames) = repair_core::extract::query_features(text);
        let top_frames = frames.iter().map(|f| format!("{}:{}", f.file, f.function)).collect::<Vec<_>>().join(" ");
        store
            .record_bug_case_revision(
                "repo", "github", &signature, &exception_type, &message_key,
                &top_frames, None, TriggerType::Error, "boom", None, None, None, None, None, "diff", true,
            )
            .unwrap();
        let hits = store.search_similar_cases("repo", text, 10).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].signature, signature);
    }

    #[test]
    fn query_bug_cases_honors_pagination_bounds() {
        let store = store();
        let (_, total) = store.query_bug_cases(None, None, 500, -5).unwrap();
        assert_eq!(total, 0);
    }
}
