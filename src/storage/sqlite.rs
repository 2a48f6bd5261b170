//! SQLite storage implementation
//!
//! Every operation opens its own connection on the blocking pool, so
//! concurrent workers never share a connection. Batch writes run in one
//! transaction and are retried as a whole.

use crate::config::DatabaseConfig;
use crate::crawler::{CrawlSummary, RetryPolicy};
use crate::listing::{Listing, ListingSource};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ListingStore, LocationReference, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const UPSERT_PROPERTY_SQL: &str = "INSERT INTO property (source, external_id, created_at, modified_at) \
     VALUES (?1, ?2, ?3, ?4) \
     ON CONFLICT (external_id, source) DO UPDATE SET modified_at = excluded.modified_at";

const SELECT_PROPERTY_ID_SQL: &str =
    "SELECT id FROM property WHERE external_id = ?1 AND source = ?2";

// Never overwrite an existing active flag
const INSERT_STATUS_SQL: &str = "INSERT INTO property_status (property_id, active) VALUES (?1, 1) \
     ON CONFLICT (property_id) DO NOTHING";

const UPSERT_SEEN_SQL: &str = "INSERT INTO property_seen (property_id, last_seen_at) VALUES (?1, ?2) \
     ON CONFLICT (property_id) DO UPDATE SET last_seen_at = excluded.last_seen_at";

const LOCATIONS_FOR_STATE_SQL: &str = "SELECT DISTINCT l.location_id \
     FROM location_reference l \
     JOIN postal_region r ON l.postal_code = r.postal_code \
     WHERE r.state = ?1 \
     ORDER BY l.location_id";

/// SQLite-backed listing store
pub struct SqliteListingStore {
    path: PathBuf,
    busy_timeout: Duration,
    retry: RetryPolicy,
}

impl SqliteListingStore {
    /// Opens the store described by the database settings
    pub fn open(config: &DatabaseConfig) -> StorageResult<Self> {
        Self::new(
            Path::new(&config.path),
            config.busy_timeout(),
            RetryPolicy::new(config.max_retries, config.retry_delay()),
        )
    }

    /// Creates the database file if needed and initializes the schema
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `busy_timeout` - How long a connection waits on a locked database
    /// * `retry` - Attempt budget for every database operation
    pub fn new(path: &Path, busy_timeout: Duration, retry: RetryPolicy) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        initialize_schema(&conn)?;

        Ok(Self {
            path: path.to_path_buf(),
            busy_timeout,
            retry,
        })
    }

    fn connect(path: &Path, busy_timeout: Duration) -> StorageResult<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Runs `op` on a fresh connection off the async workers
    async fn with_connection<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;

        tokio::task::spawn_blocking(move || {
            let mut conn = Self::connect(&path, busy_timeout)?;
            op(&mut conn)
        })
        .await
        .map_err(|e| StorageError::Worker(e.to_string()))?
    }

    /// Records the start of a crawl run
    pub async fn start_run(&self, site: ListingSource, config_hash: &str) -> StorageResult<i64> {
        let config_hash = config_hash.to_string();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO crawl_runs (site, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
                params![
                    site.as_str(),
                    Utc::now().to_rfc3339(),
                    config_hash,
                    RunStatus::Running.to_db_string()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Records the outcome of a crawl run
    pub async fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        summary: CrawlSummary,
    ) -> StorageResult<()> {
        self.with_connection(move |conn| {
            let updated = conn.execute(
                "UPDATE crawl_runs SET status = ?1, finished_at = ?2, locations = ?3, \
                 pages_attempted = ?4, pages_failed = ?5, listings_persisted = ?6 WHERE id = ?7",
                params![
                    status.to_db_string(),
                    Utc::now().to_rfc3339(),
                    summary.locations as i64,
                    summary.pages_attempted as i64,
                    summary.pages_failed as i64,
                    summary.listings_persisted as i64,
                    run_id
                ],
            )?;
            if updated == 0 {
                return Err(StorageError::RunNotFound(run_id));
            }
            Ok(())
        })
        .await
    }

    /// Gets a run by ID
    pub async fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.with_connection(move |conn| {
            conn.query_row(
                "SELECT id, site, started_at, finished_at, config_hash, status, \
                 pages_attempted, listings_persisted FROM crawl_runs WHERE id = ?1",
                params![run_id],
                |row| {
                    let status: String = row.get(5)?;
                    let Some(status) = RunStatus::from_db_string(&status) else {
                        return Ok(Err(StorageError::Database(format!(
                            "run {} has unknown status '{}'",
                            run_id, status
                        ))));
                    };
                    Ok(Ok(RunRecord {
                        id: row.get(0)?,
                        site: row.get(1)?,
                        started_at: row.get(2)?,
                        finished_at: row.get(3)?,
                        config_hash: row.get(4)?,
                        status,
                        pages_attempted: row.get::<_, Option<i64>>(6)?.map(|n| n as u64),
                        listings_persisted: row.get::<_, Option<i64>>(7)?.map(|n| n as u64),
                    }))
                },
            )
            .optional()?
            .unwrap_or(Err(StorageError::RunNotFound(run_id)))
        })
        .await
    }
}

/// Collapses a batch to one listing per natural key, last occurrence wins
fn distinct_by_key(listings: &[Listing]) -> Vec<Listing> {
    let mut positions: HashMap<(&str, ListingSource), usize> = HashMap::new();
    let mut distinct: Vec<Listing> = Vec::with_capacity(listings.len());

    for listing in listings {
        match positions.get(&listing.natural_key()) {
            Some(&index) => distinct[index] = listing.clone(),
            None => {
                positions.insert(listing.natural_key(), distinct.len());
                distinct.push(listing.clone());
            }
        }
    }

    distinct
}

fn to_text(timestamp: Option<DateTime<Utc>>) -> Option<String> {
    timestamp.map(|t| t.to_rfc3339())
}

/// Writes one batch in a single transaction
///
/// Any error returns before `commit`, which rolls the transaction back.
fn write_batch(conn: &mut Connection, batch: &[Listing]) -> StorageResult<usize> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    {
        let mut upsert = tx.prepare(UPSERT_PROPERTY_SQL)?;
        for listing in batch {
            upsert.execute(params![
                listing.source().as_str(),
                listing.external_id(),
                to_text(listing.created_at()).unwrap_or_else(|| now.clone()),
                to_text(listing.modified_at()),
            ])?;
        }
    }

    let mut property_ids = Vec::with_capacity(batch.len());
    {
        let mut select = tx.prepare(SELECT_PROPERTY_ID_SQL)?;
        for listing in batch {
            let id: Option<i64> = select
                .query_row(
                    params![listing.external_id(), listing.source().as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            property_ids.extend(id);
        }
    }

    if property_ids.len() != batch.len() {
        return Err(StorageError::BatchMismatch {
            expected: batch.len(),
            resolved: property_ids.len(),
        });
    }

    {
        let mut status = tx.prepare(INSERT_STATUS_SQL)?;
        let mut seen = tx.prepare(UPSERT_SEEN_SQL)?;
        for id in &property_ids {
            status.execute(params![id])?;
            seen.execute(params![id, now])?;
        }
    }

    tx.commit()?;
    Ok(batch.len())
}

#[async_trait]
impl ListingStore for SqliteListingStore {
    async fn persist(&self, listings: &[Listing]) -> StorageResult<usize> {
        if listings.is_empty() {
            tracing::debug!("No listings to persist");
            return Ok(0);
        }

        let batch = Arc::new(distinct_by_key(listings));
        tracing::debug!(
            "Persisting {} listings ({} submitted)",
            batch.len(),
            listings.len()
        );

        self.retry
            .run("Persist listing batch", || {
                let batch = Arc::clone(&batch);
                self.with_connection(move |conn| write_batch(conn, &batch))
            })
            .await
    }
}

#[async_trait]
impl LocationReference for SqliteListingStore {
    async fn location_ids_for_state(&self, state: &str) -> StorageResult<Vec<String>> {
        let label = format!("Location lookup for {}", state);
        self.retry
            .run(&label, || {
                let state = state.to_string();
                self.with_connection(move |conn| {
                    let mut stmt = conn.prepare(LOCATIONS_FOR_STATE_SQL)?;
                    let ids = stmt
                        .query_map(params![state], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(ids)
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> SqliteListingStore {
        SqliteListingStore::new(
            &dir.path().join("listings.db"),
            Duration::from_secs(5),
            RetryPolicy::once(),
        )
        .unwrap()
    }

    fn raw(dir: &TempDir) -> Connection {
        Connection::open(dir.path().join("listings.db")).unwrap()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    fn listing(id: &str) -> Listing {
        Listing::new(id, ListingSource::Immowelt)
    }

    #[tokio::test]
    async fn test_persist_writes_three_rows_per_listing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let written = store
            .persist(&[listing("a"), listing("b"), listing("c")])
            .await
            .unwrap();

        assert_eq!(written, 3);
        let conn = raw(&dir);
        assert_eq!(count(&conn, "property"), 3);
        assert_eq!(count(&conn, "property_status"), 3);
        assert_eq!(count(&conn, "property_seen"), 3);
    }

    #[tokio::test]
    async fn test_persist_empty_batch_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert_eq!(store.persist(&[]).await.unwrap(), 0);
        assert_eq!(count(&raw(&dir), "property"), 0);
    }

    #[tokio::test]
    async fn test_missing_timestamps_default() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let before = Utc::now();

        store.persist(&[listing("a")]).await.unwrap();

        let (created, modified): (String, Option<String>) = raw(&dir)
            .query_row(
                "SELECT created_at, modified_at FROM property WHERE external_id = 'a'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        let created = DateTime::parse_from_rfc3339(&created)
            .unwrap()
            .with_timezone(&Utc);
        assert!(created >= before);
        assert!(modified.is_none());
    }

    #[tokio::test]
    async fn test_persist_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let first = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();

        store
            .persist(&[listing("a")
                .with_created_at(created)
                .with_modified_at(first)])
            .await
            .unwrap();

        // A downstream process deactivates the listing between runs
        raw(&dir)
            .execute("UPDATE property_status SET active = 0", [])
            .unwrap();
        let seen_before: String = raw(&dir)
            .query_row("SELECT last_seen_at FROM property_seen", [], |row| row.get(0))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .persist(&[listing("a")
                .with_created_at(second)
                .with_modified_at(second)])
            .await
            .unwrap();

        let conn = raw(&dir);
        assert_eq!(count(&conn, "property"), 1);
        let (created_at, modified_at): (String, String) = conn
            .query_row("SELECT created_at, modified_at FROM property", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(created_at, created.to_rfc3339());
        assert_eq!(modified_at, second.to_rfc3339());

        let active: i64 = conn
            .query_row("SELECT active FROM property_status", [], |row| row.get(0))
            .unwrap();
        assert_eq!(active, 0);

        let seen_after: String = conn
            .query_row("SELECT last_seen_at FROM property_seen", [], |row| row.get(0))
            .unwrap();
        let parse = |text: &str| DateTime::parse_from_rfc3339(text).unwrap();
        assert!(parse(&seen_after) > parse(&seen_before));
    }

    #[tokio::test]
    async fn test_duplicate_keys_in_batch_collapse() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let written = store
            .persist(&[
                listing("a").with_modified_at(early),
                listing("b"),
                listing("a").with_modified_at(late),
            ])
            .await
            .unwrap();

        assert_eq!(written, 2);
        let modified: String = raw(&dir)
            .query_row(
                "SELECT modified_at FROM property WHERE external_id = 'a'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(modified, late.to_rfc3339());
    }

    #[tokio::test]
    async fn test_same_id_on_different_sources() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .persist(&[
                Listing::new("42", ListingSource::Immowelt),
                Listing::new("42", ListingSource::Immoscout),
            ])
            .await
            .unwrap();

        assert_eq!(count(&raw(&dir), "property"), 2);
    }

    #[tokio::test]
    async fn test_unresolved_ids_fail_whole_batch() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        // Make one of five inserted rows vanish before the read-back
        raw(&dir)
            .execute_batch(
                "CREATE TRIGGER drop_e5 AFTER INSERT ON property WHEN NEW.external_id = 'e5'
                 BEGIN DELETE FROM property WHERE id = NEW.id; END;",
            )
            .unwrap();

        let batch: Vec<_> = ["e1", "e2", "e3", "e4", "e5"]
            .iter()
            .map(|id| listing(id))
            .collect();
        let result = store.persist(&batch).await;

        assert!(matches!(
            result,
            Err(StorageError::BatchMismatch {
                expected: 5,
                resolved: 4
            })
        ));
        let conn = raw(&dir);
        assert_eq!(count(&conn, "property"), 0);
        assert_eq!(count(&conn, "property_status"), 0);
        assert_eq!(count(&conn, "property_seen"), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_is_retried() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("listings.db");
        let store = SqliteListingStore::new(
            &db_path,
            Duration::from_millis(10),
            RetryPolicy::new(3, Duration::from_millis(300)),
        )
        .unwrap();

        // Hold the write lock long enough for the first attempt to fail
        let blocker = std::thread::spawn(move || {
            let mut conn = Connection::open(db_path).unwrap();
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Exclusive)
                .unwrap();
            std::thread::sleep(Duration::from_millis(400));
            tx.rollback().unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let written = store.persist(&[listing("a")]).await.unwrap();

        blocker.join().unwrap();
        assert_eq!(written, 1);
        assert_eq!(count(&raw(&dir), "property"), 1);
    }

    #[tokio::test]
    async fn test_location_ids_for_state() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        raw(&dir)
            .execute_batch(
                "INSERT INTO postal_region (postal_code, state) VALUES
                    ('10115', 'Berlin'), ('10117', 'Berlin'), ('28195', 'Bremen');
                 INSERT INTO location_reference (location_id, postal_code) VALUES
                    ('3331', '10115'), ('3331', '10117'), ('3340', '10117'), ('1', '28195');",
            )
            .unwrap();

        let ids = store.location_ids_for_state("Berlin").await.unwrap();
        assert_eq!(ids, vec!["3331", "3340"]);
        assert!(store
            .location_ids_for_state("Hamburg")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_run_log() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let run_id = store
            .start_run(ListingSource::Kleinanzeigen, "abc123")
            .await
            .unwrap();
        let run = store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.site, "kleinanzeigen");
        assert!(run.finished_at.is_none());

        let summary = CrawlSummary {
            locations: 2,
            pages_attempted: 7,
            pages_failed: 1,
            listings_persisted: 120,
            workers_panicked: 0,
        };
        store
            .finish_run(run_id, RunStatus::Completed, summary)
            .await
            .unwrap();

        let run = store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.config_hash, "abc123");
        assert_eq!(run.pages_attempted, Some(7));
        assert_eq!(run.listings_persisted, Some(120));
        assert!(run.finished_at.is_some());

        assert!(matches!(
            store.get_run(run_id + 1).await,
            Err(StorageError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_run_status_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let run_id = store.start_run(ListingSource::Immowelt, "hash").await.unwrap();

        raw(&dir)
            .execute(
                "UPDATE crawl_runs SET status = 'paused' WHERE id = ?1",
                params![run_id],
            )
            .unwrap();

        let result = store.get_run(run_id).await;
        assert!(matches!(result, Err(StorageError::Database(msg)) if msg.contains("paused")));
    }
}
