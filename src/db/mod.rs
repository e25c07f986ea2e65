//! Database module for identity record persistence.
//!
//! Uses SQLx with SQLite for lightweight, embedded database storage.
//! Provides async operations for:
//! - Record lookups by platform id, content hash, and filename
//! - Inserts and updates (uniqueness enforced by the schema)
//! - Transactional merge and verification updates
//!
//! These are thin query functions; [`crate::store::SqliteStore`] wraps them
//! behind the [`IdentityStore`](crate::store::IdentityStore) trait and
//! classifies constraint violations.
//!
//! # Example
//!
//! ```ignore
//! use media_reconciler::db::{init_db, get_record_by_hash};
//!
//! let pool = init_db("sqlite:media_reconciler.db").await?;
//! let record = get_record_by_hash(&pool, "c0ffee").await?;
//! ```

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::model::IdentityRecord;

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "media_reconciler.db";

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const RECORD_COLUMNS: &str =
    "row_id, id, owner_id, content_hash, local_filename, is_downloaded, mimetype, version, updated_at";

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, switches it to WAL mode
/// with a busy timeout so concurrent writers queue instead of failing,
/// establishes a connection pool with up to 5 connections, and runs all
/// pending migrations.
///
/// # Errors
///
/// Returns an error if:
/// - The URL is invalid
/// - Connection cannot be established
/// - Migration fails
pub async fn init_db(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Get a record by its platform content id.
pub async fn get_record_by_id(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<IdentityRecord>> {
    sqlx::query_as::<_, IdentityRecord>(&format!("SELECT {RECORD_COLUMNS} FROM media WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Get a record by its content fingerprint.
pub async fn get_record_by_hash(
    pool: &SqlitePool,
    content_hash: &str,
) -> sqlx::Result<Option<IdentityRecord>> {
    sqlx::query_as::<_, IdentityRecord>(&format!(
        "SELECT {RECORD_COLUMNS} FROM media WHERE content_hash = ?"
    ))
    .bind(content_hash)
    .fetch_optional(pool)
    .await
}

/// Get the record naming `filename`.
///
/// Filenames are not unique in the schema; a downloaded record is preferred,
/// then the oldest.
pub async fn get_record_by_filename(
    pool: &SqlitePool,
    filename: &str,
) -> sqlx::Result<Option<IdentityRecord>> {
    sqlx::query_as::<_, IdentityRecord>(&format!(
        "SELECT {RECORD_COLUMNS} FROM media WHERE local_filename = ? \
         ORDER BY is_downloaded DESC, row_id ASC LIMIT 1"
    ))
    .bind(filename)
    .fetch_optional(pool)
    .await
}

/// Insert a record and return its new row id.
///
/// `row_id` and `version` on the input are ignored; new rows start at
/// version 0.
pub async fn insert_record(pool: &SqlitePool, record: &IdentityRecord) -> sqlx::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO media (id, owner_id, content_hash, local_filename, is_downloaded, mimetype, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.id)
    .bind(record.owner_id)
    .bind(&record.content_hash)
    .bind(&record.local_filename)
    .bind(record.is_downloaded)
    .bind(&record.mimetype)
    .bind(&record.updated_at)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Overwrite every column of the record with `record.row_id`, provided it is
/// still at `record.version`.
///
/// Returns the number of rows changed: 0 if the record was deleted or
/// written by someone else since it was read.
pub async fn update_record<'e, E>(executor: E, record: &IdentityRecord) -> sqlx::Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(
        "UPDATE media SET id = ?, owner_id = ?, content_hash = ?, local_filename = ?, \
         is_downloaded = ?, mimetype = ?, updated_at = ?, version = version + 1 \
         WHERE row_id = ? AND version = ?",
    )
    .bind(record.id)
    .bind(record.owner_id)
    .bind(&record.content_hash)
    .bind(&record.local_filename)
    .bind(record.is_downloaded)
    .bind(&record.mimetype)
    .bind(now())
    .bind(record.row_id)
    .bind(record.version)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Delete a record by row id.
pub async fn delete_record<'e, E>(executor: E, row_id: i64) -> sqlx::Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query("DELETE FROM media WHERE row_id = ?")
        .bind(row_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Replace `superseded_row_id` with `canonical` in a single transaction.
///
/// The superseded record is deleted first so the canonical record can take
/// over its id without tripping the UNIQUE constraint. Returns `false`, with
/// nothing written, when either record changed since it was read.
pub async fn merge_records(
    pool: &SqlitePool,
    canonical: &IdentityRecord,
    superseded_row_id: i64,
) -> sqlx::Result<bool> {
    let mut tx = pool.begin().await?;
    if delete_record(&mut *tx, superseded_row_id).await? == 0
        || update_record(&mut *tx, canonical).await? == 0
    {
        tx.rollback().await?;
        return Ok(false);
    }
    tx.commit().await?;
    Ok(true)
}

/// Count downloaded records, optionally for one owner.
pub async fn count_downloaded(pool: &SqlitePool, owner_id: Option<i64>) -> sqlx::Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM media WHERE is_downloaded = 1 AND (? IS NULL OR owner_id = ?)",
    )
    .bind(owner_id)
    .bind(owner_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// All downloaded records, optionally for one owner.
pub async fn get_downloaded_records(
    pool: &SqlitePool,
    owner_id: Option<i64>,
) -> sqlx::Result<Vec<IdentityRecord>> {
    sqlx::query_as::<_, IdentityRecord>(&format!(
        "SELECT {RECORD_COLUMNS} FROM media \
         WHERE is_downloaded = 1 AND (? IS NULL OR owner_id = ?) ORDER BY row_id"
    ))
    .bind(owner_id)
    .bind(owner_id)
    .fetch_all(pool)
    .await
}

/// Mark records as not downloaded and forget their hashes, in one
/// transaction. Returns the number of records changed.
pub async fn mark_not_downloaded(pool: &SqlitePool, row_ids: &[i64]) -> sqlx::Result<u64> {
    let mut tx = pool.begin().await?;
    let updated_at = now();
    let mut changed = 0;

    for row_id in row_ids {
        let result = sqlx::query(
            "UPDATE media SET is_downloaded = 0, content_hash = NULL, updated_at = ?, \
             version = version + 1 WHERE row_id = ? AND is_downloaded = 1",
        )
        .bind(&updated_at)
        .bind(row_id)
        .execute(&mut *tx)
        .await?;
        changed += result.rows_affected();
    }

    tx.commit().await?;
    Ok(changed)
}

/// Every record in the store.
pub async fn get_all_records(pool: &SqlitePool) -> sqlx::Result<Vec<IdentityRecord>> {
    sqlx::query_as::<_, IdentityRecord>(&format!(
        "SELECT {RECORD_COLUMNS} FROM media ORDER BY row_id"
    ))
    .fetch_all(pool)
    .await
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
