use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use teetime_core::{
    BookingPlatform, Course, CourseSummary, NewCourse, ScraperRun, TeeTime, TeeTimeListing,
    TeeTimeSearch,
};
use tracing::debug;
use uuid::Uuid;

use crate::{dedupe_by_datetime, StoreError, TeeTimeStore};

const COURSE_COLUMNS: &str =
    "id, name, city, county, holes, booking_url, booking_platform, active";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn small_to_u8(column: &'static str, value: i16) -> Result<u8, StoreError> {
    u8::try_from(value).map_err(|_| StoreError::InvalidRow {
        column,
        detail: value.to_string(),
    })
}

fn course_from_row(row: &PgRow) -> Result<Course, StoreError> {
    let platform: String = row.try_get("booking_platform")?;
    let booking_platform = platform
        .parse::<BookingPlatform>()
        .map_err(|err| StoreError::InvalidRow {
            column: "booking_platform",
            detail: err.to_string(),
        })?;
    let holes: Option<i16> = row.try_get("holes")?;
    Ok(Course {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        city: row.try_get("city")?,
        county: row.try_get("county")?,
        holes: holes.map(|h| small_to_u8("holes", h)).transpose()?,
        booking_url: row.try_get("booking_url")?,
        booking_platform,
        active: row.try_get("active")?,
    })
}

fn listing_from_row(row: &PgRow) -> Result<TeeTimeListing, StoreError> {
    let course_id: Uuid = row.try_get("course_id")?;
    let course_holes: Option<i16> = row.try_get("course_holes")?;
    Ok(TeeTimeListing {
        tee_time: TeeTime {
            course_id,
            datetime: row.try_get("datetime")?,
            holes: small_to_u8("holes", row.try_get("holes")?)?,
            players_available: small_to_u8("players_available", row.try_get("players_available")?)?,
            price: row.try_get("price")?,
            scraped_at: row.try_get("scraped_at")?,
            expires_at: row.try_get("expires_at")?,
        },
        course: CourseSummary {
            id: course_id,
            name: row.try_get("name")?,
            county: row.try_get("county")?,
            booking_url: row.try_get("booking_url")?,
            holes: course_holes.map(|h| small_to_u8("holes", h)).transpose()?,
        },
    })
}

#[async_trait]
impl TeeTimeStore for PgStore {
    async fn active_courses(&self) -> Result<Vec<Course>, StoreError> {
        self.list_courses(None).await
    }

    async fn list_courses(&self, county: Option<&str>) -> Result<Vec<Course>, StoreError> {
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM courses \
              WHERE active AND ($1::text IS NULL OR lower(county) = lower($1)) \
              ORDER BY name"
        );
        let rows = sqlx::query(&sql).bind(county).fetch_all(&self.pool).await?;
        rows.iter().map(course_from_row).collect()
    }

    async fn counties(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT county FROM courses WHERE active ORDER BY county")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("county").map_err(StoreError::from))
            .collect()
    }

    async fn seed_courses(&self, courses: &[NewCourse]) -> Result<Vec<Course>, StoreError> {
        let sql = format!(
            "INSERT INTO courses (name, city, county, holes, booking_url, booking_platform, active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (booking_url) DO NOTHING \
             RETURNING {COURSE_COLUMNS}"
        );
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::new();
        for course in courses {
            let row = sqlx::query(&sql)
                .bind(&course.name)
                .bind(&course.city)
                .bind(&course.county)
                .bind(course.holes.map(i16::from))
                .bind(&course.booking_url)
                .bind(course.booking_platform.as_str())
                .bind(course.active)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(row) = row {
                inserted.push(course_from_row(&row)?);
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn set_course_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE courses SET active = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::CourseNotFound(id));
        }
        Ok(())
    }

    async fn upsert_tee_times(&self, rows: &[TeeTime]) -> Result<u64, StoreError> {
        let rows = dedupe_by_datetime(rows);
        if rows.is_empty() {
            return Ok(0);
        }

        let course_ids: Vec<Uuid> = rows.iter().map(|r| r.course_id).collect();
        let datetimes: Vec<DateTime<Utc>> = rows.iter().map(|r| r.datetime).collect();
        let players: Vec<i16> = rows.iter().map(|r| i16::from(r.players_available)).collect();
        let prices: Vec<Option<f64>> = rows.iter().map(|r| r.price).collect();
        let holes: Vec<i16> = rows.iter().map(|r| i16::from(r.holes)).collect();
        let scraped_at: Vec<DateTime<Utc>> = rows.iter().map(|r| r.scraped_at).collect();
        let expires_at: Vec<DateTime<Utc>> = rows.iter().map(|r| r.expires_at).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO tee_times
                (course_id, datetime, players_available, price, holes, scraped_at, expires_at)
            SELECT * FROM UNNEST(
                $1::uuid[], $2::timestamptz[], $3::int2[], $4::float8[],
                $5::int2[], $6::timestamptz[], $7::timestamptz[]
            )
            ON CONFLICT (course_id, datetime) DO UPDATE SET
                players_available = EXCLUDED.players_available,
                price = EXCLUDED.price,
                holes = EXCLUDED.holes,
                scraped_at = EXCLUDED.scraped_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&course_ids)
        .bind(&datetimes)
        .bind(&players)
        .bind(&prices)
        .bind(&holes)
        .bind(&scraped_at)
        .bind(&expires_at)
        .execute(&self.pool)
        .await?;

        debug!(rows = result.rows_affected(), "upserted tee times");
        Ok(result.rows_affected())
    }

    async fn record_run(&self, run: &ScraperRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scraper_runs
                (course_id, started_at, finished_at, status, tee_times_found, error_msg)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(run.course_id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.status.as_str())
        .bind(i32::try_from(run.tee_times_found).unwrap_or(i32::MAX))
        .bind(&run.error_msg)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn search_tee_times(
        &self,
        search: &TeeTimeSearch,
        now: DateTime<Utc>,
    ) -> Result<Vec<TeeTimeListing>, StoreError> {
        let (start, end) = search.window();
        let rows = sqlx::query(
            r#"
            SELECT t.course_id, t.datetime, t.players_available, t.price::float8 AS price,
                   t.holes, t.scraped_at, t.expires_at,
                   c.name, c.county, c.booking_url, c.holes AS course_holes
              FROM tee_times t
              JOIN courses c ON c.id = t.course_id
             WHERE c.active
               AND t.datetime >= $1 AND t.datetime < $2
               AND t.expires_at > $3
               AND t.players_available >= $4
               AND ($5::float8 IS NULL OR (t.price IS NOT NULL AND t.price <= $5))
               AND ($6::text IS NULL OR lower(c.county) = lower($6))
             ORDER BY t.datetime ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(now)
        .bind(i16::from(search.min_players))
        .bind(search.max_price)
        .bind(search.county.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let mut listings = Vec::with_capacity(rows.len());
        for row in &rows {
            let listing = listing_from_row(row)?;
            // time-of-day is a Mountain wall-clock filter, applied after the query
            if search.matches_time_of_day(listing.tee_time.datetime) {
                listings.push(listing);
            }
        }
        if let Some(limit) = search.limit {
            listings.truncate(limit);
        }
        Ok(listings)
    }
}
