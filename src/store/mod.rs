//! Identity store: the repository the reconciliation engine reads and
//! writes.
//!
//! [`IdentityStore`] is the seam between the engine and persistence, so
//! tests and alternative backends can substitute their own. Writes are
//! constraint-checked: a uniqueness violation on `id` or `content_hash`
//! surfaces as [`Error::StoreConflict`] and leaves the store unchanged.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use crate::db;
use crate::error::{Error, Result, ResultExt, classify_write_error};
use crate::model::IdentityRecord;

/// Repository of identity records.
///
/// Implement this trait to create mock implementations for testing.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<IdentityRecord>>;

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<IdentityRecord>>;

    async fn find_by_filename(&self, filename: &str) -> Result<Option<IdentityRecord>>;

    /// Persist a new record and return it with its `row_id` assigned.
    ///
    /// Fails with [`Error::StoreConflict`] when another record already holds
    /// the id or hash.
    async fn insert(&self, record: IdentityRecord) -> Result<IdentityRecord>;

    /// Overwrite the record with `record.row_id`.
    ///
    /// The write only applies if the stored record is still the version
    /// `record` was read at. Fails with [`Error::StoreConflict`] on a
    /// uniqueness violation, when another writer got there first, or when a
    /// concurrent merge removed the record.
    async fn update(&self, record: &IdentityRecord) -> Result<()>;

    async fn delete(&self, row_id: i64) -> Result<()>;

    /// Delete `superseded_row_id` and write `canonical`, atomically. Fails
    /// with [`Error::StoreConflict`], writing nothing, if either record
    /// changed since it was read.
    async fn merge(&self, canonical: &IdentityRecord, superseded_row_id: i64) -> Result<()>;

    async fn count_downloaded(&self, owner_id: Option<i64>) -> Result<i64>;

    async fn list_downloaded(&self, owner_id: Option<i64>) -> Result<Vec<IdentityRecord>>;

    /// Clear `is_downloaded` and `content_hash` on the given records in one
    /// transaction. Returns how many changed.
    async fn mark_not_downloaded(&self, row_ids: &[i64]) -> Result<u64>;

    async fn list_all(&self) -> Result<Vec<IdentityRecord>>;
}

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `db_url`.
    pub async fn connect(db_url: &str) -> Result<Self> {
        let pool = db::init_db(db_url)
            .await
            .with_context(format!("opening {db_url}"))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<IdentityRecord>> {
        Ok(db::get_record_by_id(&self.pool, id).await?)
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<IdentityRecord>> {
        Ok(db::get_record_by_hash(&self.pool, content_hash).await?)
    }

    async fn find_by_filename(&self, filename: &str) -> Result<Option<IdentityRecord>> {
        Ok(db::get_record_by_filename(&self.pool, filename).await?)
    }

    async fn insert(&self, mut record: IdentityRecord) -> Result<IdentityRecord> {
        record.row_id = db::insert_record(&self.pool, &record)
            .await
            .map_err(classify_write_error)?;
        record.version = 0;
        Ok(record)
    }

    async fn update(&self, record: &IdentityRecord) -> Result<()> {
        let changed = db::update_record(&self.pool, record)
            .await
            .map_err(classify_write_error)?;
        if changed == 0 {
            return Err(Error::StoreConflict {
                constraint: format!(
                    "media.row_id {} is gone or past version {}",
                    record.row_id, record.version
                ),
            });
        }
        Ok(())
    }

    async fn delete(&self, row_id: i64) -> Result<()> {
        db::delete_record(&self.pool, row_id).await?;
        Ok(())
    }

    async fn merge(&self, canonical: &IdentityRecord, superseded_row_id: i64) -> Result<()> {
        let merged = db::merge_records(&self.pool, canonical, superseded_row_id)
            .await
            .map_err(classify_write_error)?;
        if !merged {
            return Err(Error::StoreConflict {
                constraint: format!(
                    "merge of media.row_id {} into {} raced another writer",
                    superseded_row_id, canonical.row_id
                ),
            });
        }
        Ok(())
    }

    async fn count_downloaded(&self, owner_id: Option<i64>) -> Result<i64> {
        Ok(db::count_downloaded(&self.pool, owner_id).await?)
    }

    async fn list_downloaded(&self, owner_id: Option<i64>) -> Result<Vec<IdentityRecord>> {
        Ok(db::get_downloaded_records(&self.pool, owner_id).await?)
    }

    async fn mark_not_downloaded(&self, row_ids: &[i64]) -> Result<u64> {
        Ok(db::mark_not_downloaded(&self.pool, row_ids).await?)
    }

    async fn list_all(&self) -> Result<Vec<IdentityRecord>> {
        Ok(db::get_all_records(&self.pool).await?)
    }
}
