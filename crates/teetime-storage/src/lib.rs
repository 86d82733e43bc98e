//! Persistence and HTTP plumbing for the tee-time pipeline.
//!
//! [`TeeTimeStore`] is the seam between ingestion/read paths and storage.
//! [`PgStore`] is the production implementation; [`MemoryStore`] backs tests
//! and dry runs.

pub mod http;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teetime_core::{Course, NewCourse, ScraperRun, TeeTime, TeeTimeListing, TeeTimeSearch};
use thiserror::Error;
use uuid::Uuid;

pub use http::{
    BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher, HttpRequest,
    TokenBucketConfig,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("course {0} not found")]
    CourseNotFound(Uuid),
    #[error("tee time references unknown course {0}")]
    UnknownCourse(Uuid),
    #[error("invalid {column} value in row: {detail}")]
    InvalidRow { column: &'static str, detail: String },
    #[error("write rejected for course {0}")]
    WriteRejected(Uuid),
}

#[async_trait]
pub trait TeeTimeStore: Send + Sync {
    /// Active courses, ordered by name. Input to every ingestion pass.
    async fn active_courses(&self) -> Result<Vec<Course>, StoreError>;

    /// Active courses, optionally restricted to one county (case-insensitive).
    async fn list_courses(&self, county: Option<&str>) -> Result<Vec<Course>, StoreError>;

    /// Distinct counties with at least one active course, sorted.
    async fn counties(&self) -> Result<Vec<String>, StoreError>;

    /// Insert courses whose booking URL is not yet present. Returns the inserted rows.
    async fn seed_courses(&self, courses: &[NewCourse]) -> Result<Vec<Course>, StoreError>;

    async fn set_course_active(&self, id: Uuid, active: bool) -> Result<(), StoreError>;

    /// Insert-or-overwrite keyed on `(course_id, datetime)`. Returns rows written.
    async fn upsert_tee_times(&self, rows: &[TeeTime]) -> Result<u64, StoreError>;

    async fn record_run(&self, run: &ScraperRun) -> Result<(), StoreError>;

    /// Non-expired tee times matching `search`, ordered by datetime ascending.
    async fn search_tee_times(
        &self,
        search: &TeeTimeSearch,
        now: DateTime<Utc>,
    ) -> Result<Vec<TeeTimeListing>, StoreError>;
}

/// Collapse a batch to one row per datetime, keeping the last occurrence.
/// Postgres rejects an upsert that touches the same conflict key twice.
pub fn dedupe_by_datetime(rows: &[TeeTime]) -> Vec<TeeTime> {
    let mut by_key: std::collections::BTreeMap<(Uuid, DateTime<Utc>), TeeTime> =
        std::collections::BTreeMap::new();
    for row in rows {
        by_key.insert((row.course_id, row.datetime), row.clone());
    }
    by_key.into_values().collect()
}
