//! IOC catalog repository
//!
//! Five operations, nothing else visible to the rest of the system. Records
//! are inserted by the ingestion coordinator only and never updated; the
//! `(value, source, version)` key makes re-runs idempotent.

use crate::error::IntelError;
use crate::{Ioc, IocType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Rows returned by a substring scan.
pub const FIND_CONTAINING_CAP: i64 = 100;
/// Rows returned by a time-window scan when the caller passes 0.
pub const DEFAULT_FIND_SINCE_LIMIT: i64 = 10_000;

/// Catalog contract.
#[async_trait]
pub trait IocRepository: Send + Sync {
    /// Persist a batch, dropping rows that collide with an existing
    /// `(value, source, version)` key. Returns the number of rows inserted.
    /// Partial failure surfaces as an error for the whole batch.
    async fn save_batch(&self, iocs: &[Ioc]) -> Result<u64, IntelError>;

    /// At most one record with the given value.
    async fn find_by_value(&self, value: &str) -> Result<Option<Ioc>, IntelError>;

    /// All records with the given value, newest first.
    async fn find_all_by_value(&self, value: &str) -> Result<Vec<Ioc>, IntelError>;

    /// All records with the given value and version, where the empty-string
    /// version acts as a wildcard ("whole package is bad").
    async fn find_by_value_and_version(&self, value: &str, version: &str) -> Result<Vec<Ioc>, IntelError>;

    /// Records whose value contains `needle`, newest first, capped at
    /// [`FIND_CONTAINING_CAP`]. Only used after an exact lookup misses.
    async fn find_containing(&self, needle: &str) -> Result<Vec<Ioc>, IntelError>;

    /// Records ingested at or after `since`, newest first, at most `limit`
    /// (0 means [`DEFAULT_FIND_SINCE_LIMIT`]).
    async fn find_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Ioc>, IntelError>;
}

// =============================================================================
// Postgres
// =============================================================================

/// Postgres-backed catalog.
pub struct PgIocRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct IocRow {
    value: String,
    #[sqlx(rename = "type")]
    ioc_type: String,
    source: String,
    threat_type: String,
    tags: Vec<String>,
    version: String,
    first_seen: DateTime<Utc>,
    date_ingested: DateTime<Utc>,
}

impl From<IocRow> for Ioc {
    fn from(row: IocRow) -> Self {
        Ioc {
            ioc_type: IocType::parse(&row.ioc_type).unwrap_or(IocType::Domain),
            value: row.value,
            source: row.source,
            threat_type: row.threat_type,
            tags: row.tags,
            version: row.version,
            first_seen: row.first_seen,
            date_ingested: row.date_ingested,
        }
    }
}

const SELECT_COLUMNS: &str =
    "value, type, source, threat_type, tags, version, first_seen, date_ingested";

impl PgIocRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IocRepository for PgIocRepository {
    async fn save_batch(&self, iocs: &[Ioc]) -> Result<u64, IntelError> {
        if iocs.is_empty() {
            return Ok(0);
        }

        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "INSERT INTO iocs (value, type, source, threat_type, tags, version, first_seen, date_ingested) ",
        );
        builder.push_values(iocs, |mut b, ioc| {
            b.push_bind(&ioc.value)
                .push_bind(ioc.ioc_type.as_str())
                .push_bind(&ioc.source)
                .push_bind(&ioc.threat_type)
                .push_bind(&ioc.tags)
                .push_bind(&ioc.version)
                .push_bind(ioc.first_seen)
                .push_bind(ioc.date_ingested);
        });
        builder.push(" ON CONFLICT (value, source, version) DO NOTHING");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn find_by_value(&self, value: &str) -> Result<Option<Ioc>, IntelError> {
        let row: Option<IocRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM iocs WHERE value = $1 LIMIT 1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Ioc::from))
    }

    async fn find_all_by_value(&self, value: &str) -> Result<Vec<Ioc>, IntelError> {
        let rows: Vec<IocRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM iocs WHERE value = $1 ORDER BY date_ingested DESC"
        ))
        .bind(value)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Ioc::from).collect())
    }

    async fn find_by_value_and_version(&self, value: &str, version: &str) -> Result<Vec<Ioc>, IntelError> {
        let rows: Vec<IocRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM iocs \
             WHERE value = $1 AND (version = $2 OR version = '') \
             ORDER BY date_ingested DESC"
        ))
        .bind(value)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Ioc::from).collect())
    }

    async fn find_containing(&self, needle: &str) -> Result<Vec<Ioc>, IntelError> {
        let pattern = format!("%{}%", escape_like(needle));
        let rows: Vec<IocRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM iocs \
             WHERE value LIKE $1 ESCAPE '\\' \
             ORDER BY date_ingested DESC LIMIT $2"
        ))
        .bind(pattern)
        .bind(FIND_CONTAINING_CAP)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Ioc::from).collect())
    }

    async fn find_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Ioc>, IntelError> {
        let limit = if limit <= 0 { DEFAULT_FIND_SINCE_LIMIT } else { limit };
        let rows: Vec<IocRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM iocs \
             WHERE date_ingested >= $1 \
             ORDER BY date_ingested DESC LIMIT $2"
        ))
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Ioc::from).collect())
    }
}

/// Escape LIKE metacharacters so the needle matches literally.
fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// =============================================================================
// In-memory
// =============================================================================

/// In-memory catalog over the same contract; backs tests and development
/// runs without a `DATABASE_URL`.
#[derive(Default)]
pub struct MemoryIocRepository {
    rows: dashmap::DashMap<(String, String, String), Ioc>,
}

impl MemoryIocRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn collect_sorted<F>(&self, filter: F) -> Vec<Ioc>
    where
        F: Fn(&Ioc) -> bool,
    {
        let mut rows: Vec<Ioc> = self
            .rows
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| b.date_ingested.cmp(&a.date_ingested));
        rows
    }
}

#[async_trait]
impl IocRepository for MemoryIocRepository {
    async fn save_batch(&self, iocs: &[Ioc]) -> Result<u64, IntelError> {
        let mut inserted = 0;
        for ioc in iocs {
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.rows.entry(ioc.key()) {
                slot.insert(ioc.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn find_by_value(&self, value: &str) -> Result<Option<Ioc>, IntelError> {
        Ok(self
            .rows
            .iter()
            .find(|entry| entry.value().value == value)
            .map(|entry| entry.value().clone()))
    }

    async fn find_all_by_value(&self, value: &str) -> Result<Vec<Ioc>, IntelError> {
        Ok(self.collect_sorted(|ioc| ioc.value == value))
    }

    async fn find_by_value_and_version(&self, value: &str, version: &str) -> Result<Vec<Ioc>, IntelError> {
        Ok(self.collect_sorted(|ioc| {
            ioc.value == value && (ioc.version == version || ioc.version.is_empty())
        }))
    }

    async fn find_containing(&self, needle: &str) -> Result<Vec<Ioc>, IntelError> {
        let mut rows = self.collect_sorted(|ioc| ioc.value.contains(needle));
        rows.truncate(FIND_CONTAINING_CAP as usize);
        Ok(rows)
    }

    async fn find_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Ioc>, IntelError> {
        let limit = if limit <= 0 { DEFAULT_FIND_SINCE_LIMIT } else { limit };
        let mut rows = self.collect_sorted(|ioc| ioc.date_ingested >= since);
        rows.truncate(limit as usize);
        Ok(rows)
    }
}
