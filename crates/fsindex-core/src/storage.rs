//! SQLite storage for indexed files and scan history.
//!
//! One [`IndexDatabase`] wraps one connection and must stay on the thread that opened
//! it. Mutations go through the connection owned by the writer thread
//! ([`crate::writer::DbWriter`]); queries open their own short-lived read connection.

mod schema;

pub use schema::SCHEMA_VERSION;

use crate::db_healthcheck::DbHealthChecker;
use crate::error::{Error, Result};
use crate::path_utils::descendant_bounds;
use crate::regex_utils::trigram_match_expression;
use crate::score::RelevancyScorer;
use crate::types::{
    FileEvent, FileEventKind, IndexedFile, QueryParams, ScanRecord, ScanStatus, ScanType,
};
use chrono::{DateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, Transaction, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, error};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// The trigram tokenizer cannot match anything shorter.
const TRIGRAM_MIN_LEN: usize = 3;

const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
";

const UPSERT_FILE: &str = "
INSERT INTO indexed_file (path, parent_path, name, last_modified_at, relevancy_score)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT (path) DO UPDATE SET
        last_modified_at = excluded.last_modified_at,
        relevancy_score = excluded.relevancy_score
";

const DELETE_FILE: &str = "DELETE FROM indexed_file WHERE path = ?1";
const DELETE_DESCENDANTS: &str = "DELETE FROM indexed_file WHERE path >= ?1 AND path < ?2";

const SCAN_COLUMNS: &str = "id, entrypoint, type, status, created_at, error";

#[derive(Debug)]
pub struct IndexDatabase {
    conn: Connection,
    path: PathBuf,
}

impl DbHealthChecker for IndexDatabase {
    fn db_path(&self) -> &Path {
        &self.path
    }

    fn count_entries(&self) -> Result<Vec<(&'static str, u64)>> {
        let count = |table: &str| -> Result<u64> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|count| count.max(0) as u64)
                .map_err(Error::DbQuery)
        };

        Ok(vec![
            ("indexed_file", count("indexed_file")?),
            ("scan_history", count("scan_history")?),
        ])
    }
}

impl IndexDatabase {
    /// Opens the database for writing, creating it and applying pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(Error::CreateDir)?;
        }

        let conn = Connection::open(path).map_err(Error::DbOpen)?;
        let mut db = Self {
            conn,
            path: path.to_path_buf(),
        };

        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    /// Opens an existing database for queries. Registers the `REGEXP` function and
    /// never migrates.
    pub fn open_read(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(Error::DbOpen)?;

        let db = Self {
            conn,
            path: path.to_path_buf(),
        };

        db.configure()?;
        db.register_regexp()?;
        Ok(db)
    }

    /// Private database for tests and tools. Fully migrated, with `REGEXP` available.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::DbOpen)?;
        let mut db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };

        db.configure()?;
        db.migrate()?;
        db.register_regexp()?;
        Ok(db)
    }

    fn configure(&self) -> Result<()> {
        self.conn
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(Error::DbOpen)?;
        self.conn.execute_batch(PRAGMAS).map_err(Error::DbOpen)
    }

    fn register_regexp(&self) -> Result<()> {
        type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

        self.conn
            .create_scalar_function(
                "regexp",
                2,
                FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
                |ctx| {
                    let regex: Arc<regex::Regex> =
                        ctx.get_or_create_aux(0, |value| -> std::result::Result<_, BoxError> {
                            // case-folded like the trigram prefilter and token search
                            Ok(regex::RegexBuilder::new(value.as_str()?)
                                .case_insensitive(true)
                                .build()?)
                        })?;

                    let text = ctx
                        .get_raw(1)
                        .as_str()
                        .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;

                    Ok(regex.is_match(text))
                },
            )
            .map_err(Error::DbOpen)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(Error::DbMigrate)
    }

    /// Applies every migration newer than the stored `user_version`, each in its own
    /// transaction.
    pub fn migrate(&mut self) -> Result<()> {
        let current = self.schema_version()?;

        for (index, migration) in schema::MIGRATIONS.iter().enumerate() {
            let version = index as i64 + 1;
            if version <= current {
                continue;
            }

            let tx = self.conn.transaction().map_err(Error::DbStartTxn)?;
            tx.execute_batch(migration).map_err(Error::DbMigrate)?;
            tx.pragma_update(None, "user_version", version)
                .map_err(Error::DbMigrate)?;
            tx.commit().map_err(Error::DbCommit)?;

            debug!(version, "Applied index database migration");
        }

        Ok(())
    }

    /// Applies a batch of file events atomically: either every event lands or the
    /// whole batch is rolled back.
    #[tracing::instrument(skip_all, fields(events = events.len()), level = Level::DEBUG)]
    pub fn index_events(&mut self, events: &[FileEvent]) -> Result<()> {
        let scorer = RelevancyScorer::new();
        let tx = self.conn.transaction().map_err(Error::DbStartTxn)?;

        for event in events {
            let applied = match event.kind {
                FileEventKind::Modify => {
                    let score = scorer.compute_score(&event.path, event.event_time);
                    let file = IndexedFile::new(event.path.clone(), event.event_time, score);
                    upsert_row(&tx, &file)
                }
                FileEventKind::Delete => delete_row(&tx, &event.path),
            };

            if let Err(source) = applied {
                error!(path = ?event.path, kind = ?event.kind, %source, "Failed to index file event, rolling back batch");
                return Err(Error::DbWrite {
                    path: event.path.clone(),
                    source,
                });
            }
        }

        tx.commit().map_err(Error::DbCommit)
    }

    /// Makes every insert of a file called `name` fail, to exercise batch rollback.
    #[cfg(test)]
    pub(crate) fn reject_file_name(&self, name: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TRIGGER reject_{tag} BEFORE INSERT ON indexed_file
                    WHEN NEW.name = '{name}'
                    BEGIN SELECT RAISE(ABORT, 'rejected {name}'); END;",
                tag = name.replace(|c: char| !c.is_ascii_alphanumeric(), "_"),
            ))
            .map_err(Error::DbQuery)
    }

    pub fn upsert_files(&mut self, files: &[IndexedFile]) -> Result<()> {
        let tx = self.conn.transaction().map_err(Error::DbStartTxn)?;

        for file in files {
            upsert_row(&tx, file).map_err(|source| Error::DbWrite {
                path: file.path.clone(),
                source,
            })?;
        }

        tx.commit().map_err(Error::DbCommit)
    }

    /// Removes the given paths together with everything indexed below them.
    pub fn delete_files(&mut self, paths: &[PathBuf]) -> Result<()> {
        let tx = self.conn.transaction().map_err(Error::DbStartTxn)?;

        for path in paths {
            delete_row(&tx, path).map_err(|source| Error::DbWrite {
                path: path.clone(),
                source,
            })?;
        }

        tx.commit().map_err(Error::DbCommit)
    }

    pub fn clear_index(&mut self) -> Result<()> {
        self.conn
            .execute("DELETE FROM indexed_file", [])
            .map_err(|source| Error::DbWrite {
                path: self.path.clone(),
                source,
            })?;
        Ok(())
    }

    /// Ranked search over file names. An empty or non-indexable query yields no
    /// results. Results whose path vanished from disk are skipped.
    #[tracing::instrument(skip(self), level = Level::DEBUG)]
    pub fn search(&self, query: &str, params: &QueryParams) -> Result<Vec<PathBuf>> {
        let limit = params.pagination.limit as i64;
        let offset = params.pagination.offset as i64;

        let paths = if params.use_regex {
            self.search_regex(query, limit, offset)?
        } else {
            let Some(match_expr) = prepare_prefix_query(query) else {
                return Ok(Vec::new());
            };

            let mut stmt = self
                .conn
                .prepare_cached(
                    "SELECT f.path FROM indexed_file f
                        JOIN unicode_idx ON unicode_idx.rowid = f.id
                        WHERE unicode_idx MATCH ?1
                        ORDER BY f.relevancy_score DESC, unicode_idx.rank, f.id
                        LIMIT ?2 OFFSET ?3",
                )
                .map_err(Error::DbQuery)?;

            stmt.query_map(params![match_expr, limit, offset], |row| {
                row.get::<_, String>(0)
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(Error::DbQuery)?
        };

        Ok(paths
            .into_iter()
            .map(PathBuf::from)
            .filter(|path| path.exists())
            .collect())
    }

    fn search_regex(&self, pattern: &str, limit: i64, offset: i64) -> Result<Vec<String>> {
        if pattern.is_empty() {
            return Ok(Vec::new());
        }
        // reject invalid patterns before sqlite sees them
        regex::Regex::new(pattern)?;

        let rows = match trigram_match_expression(pattern, TRIGRAM_MIN_LEN) {
            Some(match_expr) => {
                let mut stmt = self
                    .conn
                    .prepare_cached(
                        "SELECT f.path FROM indexed_file f
                            JOIN tri_idx ON tri_idx.rowid = f.id
                            WHERE tri_idx MATCH ?1 AND f.name REGEXP ?2
                            ORDER BY f.relevancy_score DESC, tri_idx.rank, f.id
                            LIMIT ?3 OFFSET ?4",
                    )
                    .map_err(Error::DbQuery)?;

                stmt.query_map(params![match_expr, pattern, limit, offset], |row| {
                    row.get::<_, String>(0)
                })
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare_cached(
                        "SELECT f.path FROM indexed_file f
                            WHERE f.name REGEXP ?1
                            ORDER BY f.relevancy_score DESC, f.id
                            LIMIT ?2 OFFSET ?3",
                    )
                    .map_err(Error::DbQuery)?;

                stmt.query_map(params![pattern, limit, offset], |row| {
                    row.get::<_, String>(0)
                })
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            }
        };

        rows.map_err(Error::DbQuery)
    }

    /// Paths indexed directly below `parent`.
    pub fn list_children(&self, parent: &Path) -> Result<Vec<PathBuf>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT path FROM indexed_file WHERE parent_path = ?1")
            .map_err(Error::DbQuery)?;

        stmt.query_map([parent.to_string_lossy()], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.map(|r| r.map(PathBuf::from)).collect())
            .map_err(Error::DbQuery)
    }

    pub fn get_file(&self, path: &Path) -> Result<Option<IndexedFile>> {
        self.conn
            .query_row(
                "SELECT path, parent_path, name, last_modified_at, relevancy_score
                    FROM indexed_file WHERE path = ?1",
                [path.to_string_lossy()],
                |row| {
                    Ok(IndexedFile {
                        path: PathBuf::from(row.get::<_, String>(0)?),
                        parent_path: PathBuf::from(row.get::<_, String>(1)?),
                        name: row.get(2)?,
                        last_modified_at: row.get(3)?,
                        relevancy_score: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Error::DbQuery)
    }

    /// Stored modification time of a single indexed path, in unix seconds.
    pub fn indexed_last_modified(&self, path: &Path) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT last_modified_at FROM indexed_file WHERE path = ?1",
                [path.to_string_lossy()],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()
            .map(Option::flatten)
            .map_err(Error::DbQuery)
    }

    /// Most recent modification time stored for `path` or anything below it.
    pub fn max_last_modified(&self, path: &Path) -> Result<Option<i64>> {
        let (lower, upper) = descendant_bounds(path);
        self.conn
            .query_row(
                "SELECT MAX(last_modified_at) FROM indexed_file
                    WHERE path = ?1 OR (path >= ?2 AND path < ?3)",
                params![path.to_string_lossy(), lower, upper],
                |row| row.get::<_, Option<i64>>(0),
            )
            .map_err(Error::DbQuery)
    }

    pub fn count_files(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM indexed_file", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| count.max(0) as u64)
            .map_err(Error::DbQuery)
    }

    pub fn create_scan(&mut self, entrypoint: &Path, scan_type: ScanType) -> Result<ScanRecord> {
        let created_at = Utc::now().timestamp();
        self.conn
            .query_row(
                &format!(
                    "INSERT INTO scan_history (entrypoint, type, status, created_at)
                        VALUES (?1, ?2, ?3, ?4) RETURNING {SCAN_COLUMNS}"
                ),
                params![
                    entrypoint.to_string_lossy(),
                    scan_type.as_i64(),
                    ScanStatus::Pending.as_i64(),
                    created_at
                ],
                map_scan,
            )
            .map_err(Error::DbScanHistory)
    }

    /// Terminal records never change again; updating one is a no-op.
    pub fn update_scan_status(&mut self, id: i64, status: ScanStatus) -> Result<()> {
        self.conn
            .execute(
                "UPDATE scan_history SET status = ?1
                    WHERE id = ?2 AND status IN (?3, ?4)",
                params![
                    status.as_i64(),
                    id,
                    ScanStatus::Pending.as_i64(),
                    ScanStatus::Started.as_i64()
                ],
            )
            .map_err(Error::DbScanHistory)?;
        Ok(())
    }

    pub fn set_scan_error(&mut self, id: i64, status: ScanStatus, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE scan_history SET status = ?1, error = ?2
                    WHERE id = ?3 AND status IN (?4, ?5)",
                params![
                    status.as_i64(),
                    error,
                    id,
                    ScanStatus::Pending.as_i64(),
                    ScanStatus::Started.as_i64()
                ],
            )
            .map_err(Error::DbScanHistory)?;
        Ok(())
    }

    pub fn get_last_scan(&self) -> Result<Option<ScanRecord>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {SCAN_COLUMNS} FROM scan_history ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                [],
                map_scan,
            )
            .optional()
            .map_err(Error::DbQuery)
    }

    pub fn list_scans(&self) -> Result<Vec<ScanRecord>> {
        self.query_scans(&format!("SELECT {SCAN_COLUMNS} FROM scan_history ORDER BY id"), [])
    }

    pub fn list_started_scans(&self) -> Result<Vec<ScanRecord>> {
        self.query_scans(
            &format!("SELECT {SCAN_COLUMNS} FROM scan_history WHERE status = ?1 ORDER BY id"),
            [ScanStatus::Started.as_i64()],
        )
    }

    pub fn last_successful_scan(
        &self,
        entrypoint: &Path,
        scan_type: ScanType,
    ) -> Result<Option<ScanRecord>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {SCAN_COLUMNS} FROM scan_history
                        WHERE entrypoint = ?1 AND type = ?2 AND status = ?3
                        ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![
                    entrypoint.to_string_lossy(),
                    scan_type.as_i64(),
                    ScanStatus::Succeeded.as_i64()
                ],
                map_scan,
            )
            .optional()
            .map_err(Error::DbQuery)
    }

    fn query_scans(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<ScanRecord>> {
        let mut stmt = self.conn.prepare(sql).map_err(Error::DbQuery)?;
        stmt.query_map(params, map_scan)
            .and_then(|rows| rows.collect())
            .map_err(Error::DbQuery)
    }
}

fn upsert_row(tx: &Transaction<'_>, file: &IndexedFile) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare_cached(UPSERT_FILE)?;
    stmt.execute(params![
        file.path.to_string_lossy(),
        file.parent_path.to_string_lossy(),
        file.name,
        file.last_modified_at,
        file.relevancy_score
    ])?;
    Ok(())
}

fn delete_row(tx: &Transaction<'_>, path: &Path) -> rusqlite::Result<()> {
    tx.prepare_cached(DELETE_FILE)?
        .execute([path.to_string_lossy()])?;

    let (lower, upper) = descendant_bounds(path);
    tx.prepare_cached(DELETE_DESCENDANTS)?
        .execute(params![lower, upper])?;
    Ok(())
}

fn map_scan(row: &Row<'_>) -> rusqlite::Result<ScanRecord> {
    let scan_type = row.get::<_, i64>(2)?;
    let status = row.get::<_, i64>(3)?;
    let created_at = row.get::<_, i64>(4)?;

    Ok(ScanRecord {
        id: row.get(0)?,
        entrypoint: PathBuf::from(row.get::<_, String>(1)?),
        scan_type: ScanType::from_i64(scan_type).ok_or(rusqlite::Error::IntegralValueOutOfRange(2, scan_type))?,
        status: ScanStatus::from_i64(status).ok_or(rusqlite::Error::IntegralValueOutOfRange(3, status))?,
        created_at: DateTime::<Utc>::from_timestamp(created_at, 0).unwrap_or_default(),
        error: row.get(5)?,
    })
}

/// Turns free text into an FTS5 expression where every whitespace separated token is
/// a quoted prefix term. Tokens without any letter or digit cannot match the
/// `unicode61` tokenizer and are dropped. Returns `None` when nothing is left.
pub fn prepare_prefix_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(|token| format!("\"{}\"*", token.replace('"', "\"\"")))
        .collect();

    (!terms.is_empty()).then(|| terms.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaginationArgs;
    use std::fs;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"x").unwrap();
        path
    }

    fn modify(path: &Path) -> FileEvent {
        FileEvent::modify(path, Some(SystemTime::now()))
    }

    #[test]
    fn failing_event_rolls_back_the_whole_batch() {
        let tmp = TempDir::new().unwrap();
        let first = touch(tmp.path(), "a/first.txt");
        let bad = touch(tmp.path(), "a/bad.txt");
        let last = touch(tmp.path(), "a/last.txt");

        let mut db = IndexDatabase::open_in_memory().unwrap();
        db.reject_file_name("bad.txt").unwrap();

        let result = db.index_events(&[modify(&first), modify(&bad), modify(&last)]);
        assert!(
            matches!(result, Err(Error::DbWrite { ref path, .. }) if *path == bad),
            "unexpected result: {result:?}"
        );
        assert_eq!(db.count_files().unwrap(), 0, "no row of a failed batch may survive");

        db.index_events(&[modify(&first), modify(&last)]).unwrap();
        assert_eq!(db.count_files().unwrap(), 2);
    }

    #[test]
    fn prefix_query_quotes_and_drops_punctuation() {
        assert_eq!(prepare_prefix_query("  "), None);
        assert_eq!(prepare_prefix_query("*** --"), None);
        assert_eq!(
            prepare_prefix_query("my \"doc\" v2"),
            Some("\"my\"* \"\"\"doc\"\"\"* \"v2\"*".to_string())
        );
    }

    #[test]
    fn migrations_are_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.db");

        let db = IndexDatabase::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
        drop(db);

        let db = IndexDatabase::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn upsert_keeps_a_single_row_per_path() {
        let tmp = TempDir::new().unwrap();
        let file = touch(tmp.path(), "notes.txt");
        let mut db = IndexDatabase::open_in_memory().unwrap();

        let earlier = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let later = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000);
        db.index_events(&[FileEvent::modify(&file, Some(earlier))])
            .unwrap();
        db.index_events(&[FileEvent::modify(&file, Some(later))])
            .unwrap();

        assert_eq!(db.count_files().unwrap(), 1);
        assert_eq!(db.indexed_last_modified(&file).unwrap(), Some(2_000));
    }

    #[test]
    fn deleting_a_directory_removes_descendants() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("project");
        let inside = touch(tmp.path(), "project/src/main.rs");
        let sibling = touch(tmp.path(), "project-old/main.rs");
        let mut db = IndexDatabase::open_in_memory().unwrap();

        db.index_events(&[modify(&dir), modify(&inside), modify(&sibling)])
            .unwrap();
        db.delete_files(&[dir.clone()]).unwrap();

        assert!(db.get_file(&dir).unwrap().is_none());
        assert!(db.get_file(&inside).unwrap().is_none());
        assert!(db.get_file(&sibling).unwrap().is_some());
    }

    #[test]
    fn search_matches_token_prefixes_only() {
        let tmp = TempDir::new().unwrap();
        let main = touch(tmp.path(), "main.rs");
        let maintain = touch(tmp.path(), "maintain.txt");
        let domain = touch(tmp.path(), "domain.txt");
        let mut db = IndexDatabase::open_in_memory().unwrap();
        db.index_events(&[modify(&main), modify(&maintain), modify(&domain)])
            .unwrap();

        let mut results = db.search("main", &QueryParams::default()).unwrap();
        results.sort();
        let mut expected = vec![main, maintain];
        expected.sort();
        assert_eq!(results, expected);
    }

    #[test]
    fn search_skips_vanished_files() {
        let tmp = TempDir::new().unwrap();
        let kept = touch(tmp.path(), "report-final.pdf");
        let gone = touch(tmp.path(), "report-draft.pdf");
        let mut db = IndexDatabase::open_in_memory().unwrap();
        db.index_events(&[modify(&kept), modify(&gone)]).unwrap();
        fs::remove_file(&gone).unwrap();

        let results = db.search("report", &QueryParams::default()).unwrap();
        assert_eq!(results, vec![kept]);
    }

    #[test]
    fn regex_search_filters_by_name() {
        let tmp = TempDir::new().unwrap();
        let a = touch(tmp.path(), "invoice-2024-03.pdf");
        let b = touch(tmp.path(), "invoice-2023-11.pdf");
        let c = touch(tmp.path(), "notes.md");
        let mut db = IndexDatabase::open_in_memory().unwrap();
        db.index_events(&[modify(&a), modify(&b), modify(&c)])
            .unwrap();

        let params = QueryParams {
            use_regex: true,
            ..Default::default()
        };
        assert_eq!(db.search("invoice-2024.*", &params).unwrap(), vec![a.clone()]);
        // no static run long enough for the trigram index
        assert_eq!(db.search("^no.*", &params).unwrap(), vec![c]);
        assert!(matches!(
            db.search("invoice(", &params),
            Err(Error::InvalidRegex(_))
        ));
    }

    #[test]
    fn pagination_applies_limit_and_offset() {
        let tmp = TempDir::new().unwrap();
        let mut db = IndexDatabase::open_in_memory().unwrap();
        let events: Vec<_> = (0..5)
            .map(|i| modify(&touch(tmp.path(), &format!("page{i}.txt"))))
            .collect();
        db.index_events(&events).unwrap();

        let page = |offset, limit| QueryParams {
            pagination: PaginationArgs { offset, limit },
            use_regex: false,
        };
        assert_eq!(db.search("page", &page(0, 2)).unwrap().len(), 2);
        assert_eq!(db.search("page", &page(4, 2)).unwrap().len(), 1);
    }

    #[test]
    fn scan_history_round_trip() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        let root = Path::new("/srv/data");

        let full = db.create_scan(root, ScanType::Full).unwrap();
        assert_eq!(full.status, ScanStatus::Pending);
        db.update_scan_status(full.id, ScanStatus::Started).unwrap();
        assert_eq!(db.list_started_scans().unwrap().len(), 1);

        db.update_scan_status(full.id, ScanStatus::Succeeded)
            .unwrap();
        let incremental = db.create_scan(root, ScanType::Incremental).unwrap();
        db.set_scan_error(incremental.id, ScanStatus::Failed, "disk gone")
            .unwrap();

        assert!(db.list_started_scans().unwrap().is_empty());
        assert_eq!(
            db.last_successful_scan(root, ScanType::Full)
                .unwrap()
                .map(|s| s.id),
            Some(full.id)
        );
        assert!(
            db.last_successful_scan(root, ScanType::Incremental)
                .unwrap()
                .is_none()
        );

        let last = db.get_last_scan().unwrap().unwrap();
        assert_eq!(last.id, incremental.id);
        assert_eq!(last.error.as_deref(), Some("disk gone"));
        assert_eq!(db.list_scans().unwrap().len(), 2);
    }

    #[test]
    fn terminal_scan_status_is_final() {
        let mut db = IndexDatabase::open_in_memory().unwrap();
        let scan = db.create_scan(Path::new("/srv/data"), ScanType::Watch).unwrap();
        db.update_scan_status(scan.id, ScanStatus::Started).unwrap();
        db.update_scan_status(scan.id, ScanStatus::Interrupted).unwrap();

        db.update_scan_status(scan.id, ScanStatus::Succeeded).unwrap();
        db.set_scan_error(scan.id, ScanStatus::Failed, "late failure")
            .unwrap();

        let record = db.get_last_scan().unwrap().unwrap();
        assert!(record.status.is_terminal());
        assert_eq!(record.status, ScanStatus::Interrupted);
        assert_eq!(record.error, None);
    }

    #[test]
    fn upsert_files_writes_precomputed_rows() {
        let tmp = TempDir::new().unwrap();
        let file = touch(tmp.path(), "budget.xlsx");
        let mut db = IndexDatabase::open_in_memory().unwrap();

        db.upsert_files(&[IndexedFile::new(file.clone(), None, 42.0)])
            .unwrap();

        let row = db.get_file(&file).unwrap().unwrap();
        assert_eq!(row.name, "budget.xlsx");
        assert_eq!(row.parent_path, tmp.path());
        assert_eq!(row.relevancy_score, 42.0);
        assert_eq!(db.list_children(tmp.path()).unwrap(), vec![file]);
    }

    #[test]
    fn max_last_modified_covers_subtree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let a = touch(tmp.path(), "root/a.txt");
        let b = touch(tmp.path(), "root/sub/b.txt");
        let outside = touch(tmp.path(), "rootless.txt");
        let at = |secs| Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs));

        let mut db = IndexDatabase::open_in_memory().unwrap();
        db.index_events(&[
            FileEvent::modify(&a, at(100)),
            FileEvent::modify(&b, at(300)),
            FileEvent::modify(&outside, at(900)),
        ])
        .unwrap();

        assert_eq!(db.max_last_modified(&root).unwrap(), Some(300));
        assert_eq!(db.max_last_modified(&tmp.path().join("nothing")).unwrap(), None);
    }
}
