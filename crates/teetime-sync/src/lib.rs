//! Ingestion orchestration: courses x date window -> adapters -> store.

pub mod config;
pub mod registry;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use teetime_adapters::{AdapterContext, AdapterSet, SubCourseCache};
use teetime_core::{mountain, BookingPlatform, Course, RunStatus, ScraperRun, TeeTime};
use teetime_storage::{dedupe_by_datetime, HttpFetcher, MemoryStore, PgStore, TeeTimeStore};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use config::{ConfigError, SyncConfig};
pub use registry::{CourseRegistry, ResolvedCourse, Resolution, UnmatchedCourse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionOptions {
    pub window_days: u32,
    pub course_concurrency: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            window_days: config::DEFAULT_WINDOW_DAYS,
            course_concurrency: config::DEFAULT_COURSE_CONCURRENCY,
        }
    }
}

impl From<&SyncConfig> for IngestionOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            window_days: config.window_days,
            course_concurrency: config.course_concurrency,
        }
    }
}

/// Per-course lifecycle, reported on log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseStage {
    Fetching,
    Aggregating,
    Upserting,
    Done,
    RunLogged,
}

impl CourseStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Aggregating => "aggregating",
            Self::Upserting => "upserting",
            Self::Done => "done",
            Self::RunLogged => "run_logged",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseOutcome {
    pub course_id: Uuid,
    pub key: String,
    pub platform: BookingPlatform,
    pub status: RunStatus,
    pub tee_times_found: usize,
    pub tee_times_upserted: u64,
    pub error: Option<String>,
    pub run_logged: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub window_start: NaiveDate,
    pub window_days: u32,
    pub courses_configured: usize,
    pub courses_resolved: usize,
    pub courses_skipped: usize,
    pub courses_failed: usize,
    pub tee_times_found: usize,
    pub tee_times_upserted: u64,
    pub outcomes: Vec<CourseOutcome>,
}

/// Consecutive Mountain-local dates starting at the local day containing `now`.
pub fn window_dates(now: DateTime<Utc>, window_days: u32) -> Vec<NaiveDate> {
    let today = mountain::local_date(now);
    (0..i64::from(window_days))
        .map(|offset| today + Duration::days(offset))
        .collect()
}

pub struct IngestionPipeline {
    store: Arc<dyn TeeTimeStore>,
    adapters: AdapterSet,
    registry: CourseRegistry,
    options: IngestionOptions,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn TeeTimeStore>,
        adapters: AdapterSet,
        registry: CourseRegistry,
        options: IngestionOptions,
    ) -> Self {
        Self {
            store,
            adapters,
            registry,
            options,
        }
    }

    pub async fn run_once(&self) -> Result<IngestionSummary> {
        self.run_at(Utc::now()).await
    }

    /// One full pass with `now` as the pass time (window start and `scraped_at`).
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<IngestionSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingestion_run", %run_id);
        self.run_inner(run_id, now).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, now: DateTime<Utc>) -> Result<IngestionSummary> {
        let started_at = Utc::now();
        let seeded = self
            .store
            .active_courses()
            .await
            .context("listing active courses")?;

        let resolution = self.registry.resolve(&seeded);
        for unmatched in &resolution.unmatched {
            match &unmatched.near_miss {
                Some(candidate) => warn!(
                    course = %unmatched.key,
                    booking_url = %unmatched.booking_url,
                    did_you_mean = %candidate,
                    "configured course has no active store row; skipping"
                ),
                None => warn!(
                    course = %unmatched.key,
                    booking_url = %unmatched.booking_url,
                    "configured course has no active store row; skipping"
                ),
            }
        }

        let dates = window_dates(now, self.options.window_days);
        let window_start = dates.first().copied().unwrap_or_else(|| mountain::local_date(now));
        info!(
            configured = self.registry.len(),
            resolved = resolution.matched.len(),
            %window_start,
            window_days = self.options.window_days,
            "starting ingestion pass"
        );

        let ctx = AdapterContext { run_id };
        let mut outcomes: Vec<CourseOutcome> = stream::iter(resolution.matched.iter())
            .map(|course| self.ingest_course(&ctx, course, &dates, now))
            .buffer_unordered(self.options.course_concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.key.cmp(&b.key));

        let summary = IngestionSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            window_start,
            window_days: self.options.window_days,
            courses_configured: self.registry.len(),
            courses_resolved: resolution.matched.len(),
            courses_skipped: resolution.unmatched.len(),
            courses_failed: outcomes
                .iter()
                .filter(|o| o.status == RunStatus::Error)
                .count(),
            tee_times_found: outcomes.iter().map(|o| o.tee_times_found).sum(),
            tee_times_upserted: outcomes.iter().map(|o| o.tee_times_upserted).sum(),
            outcomes,
        };
        info!(
            courses_failed = summary.courses_failed,
            tee_times_found = summary.tee_times_found,
            tee_times_upserted = summary.tee_times_upserted,
            "ingestion pass finished"
        );
        Ok(summary)
    }

    async fn ingest_course(
        &self,
        ctx: &AdapterContext,
        course: &ResolvedCourse,
        dates: &[NaiveDate],
        scraped_at: DateTime<Utc>,
    ) -> CourseOutcome {
        let platform = course.config.platform();
        let span = info_span!("course", course = %course.config.key, %platform);
        async move {
            let started_at = Utc::now();

            debug!(stage = CourseStage::Fetching.as_str());
            let mut rows = Vec::new();
            match self.adapters.get(platform) {
                Some(adapter) => {
                    for date in dates {
                        let found = adapter.fetch_availability(ctx, &course.config, *date).await;
                        debug!(%date, found = found.len(), "date fetched");
                        rows.extend(
                            found
                                .into_iter()
                                .map(|candidate| TeeTime::from_candidate(course.id, candidate, scraped_at)),
                        );
                    }
                }
                None => warn!("no adapter registered for platform"),
            }

            debug!(stage = CourseStage::Aggregating.as_str(), raw = rows.len());
            let rows = dedupe_by_datetime(&rows);
            let tee_times_found = rows.len();

            debug!(stage = CourseStage::Upserting.as_str(), rows = tee_times_found);
            let (status, error_msg, tee_times_upserted) =
                match self.store.upsert_tee_times(&rows).await {
                    Ok(written) => (RunStatus::Success, None, written),
                    Err(err) => {
                        error!(error = %err, "tee time upsert failed");
                        (RunStatus::Error, Some(err.to_string()), 0)
                    }
                };
            debug!(stage = CourseStage::Done.as_str(), status = status.as_str());

            let run = ScraperRun {
                course_id: course.id,
                started_at,
                finished_at: Utc::now(),
                status,
                tee_times_found: u32::try_from(tee_times_found).unwrap_or(u32::MAX),
                error_msg: error_msg.clone(),
            };
            let run_logged = match self.store.record_run(&run).await {
                Ok(()) => {
                    debug!(stage = CourseStage::RunLogged.as_str());
                    true
                }
                Err(err) => {
                    error!(error = %err, "failed to record scraper run");
                    false
                }
            };

            info!(status = status.as_str(), found = tee_times_found, "course ingested");
            CourseOutcome {
                course_id: course.id,
                key: course.config.key.clone(),
                platform,
                status,
                tee_times_found,
                tee_times_upserted,
                error: error_msg,
                run_logged,
            }
        }
        .instrument(span)
        .await
    }
}

/// Insert configured courses that are not yet in the store.
pub async fn seed_courses(store: &dyn TeeTimeStore, registry: &CourseRegistry) -> Result<Vec<Course>> {
    let inserted = store
        .seed_courses(&registry.new_courses())
        .await
        .context("seeding courses")?;
    for course in &inserted {
        info!(
            course_id = %course.id,
            name = %course.name,
            active = course.active,
            "seeded course"
        );
    }
    info!(
        configured = registry.len(),
        inserted = inserted.len(),
        "seeding finished"
    );
    Ok(inserted)
}

/// One ingestion pass wired from the environment. `dry_run` uses a seeded
/// in-memory store instead of Postgres.
pub async fn run_ingest_from_env(dry_run: bool, window_days: Option<u32>) -> Result<IngestionSummary> {
    let mut config = SyncConfig::from_env()?;
    if let Some(days) = window_days {
        config.window_days = days;
        config.validate()?;
    }
    let registry = CourseRegistry::load(&config.courses_path)?;

    let store: Arc<dyn TeeTimeStore> = if dry_run {
        let memory = MemoryStore::new();
        seed_courses(&memory, &registry).await?;
        Arc::new(memory)
    } else {
        let database_url = config.require_database_url()?;
        let pg = PgStore::connect(database_url)
            .await
            .context("connecting to database")?;
        Arc::new(pg)
    };

    let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
    // fresh cache: sub-course resolutions never outlive a run
    let adapters = AdapterSet::live(http, SubCourseCache::new());
    IngestionPipeline::new(store, adapters, registry, IngestionOptions::from(&config))
        .run_once()
        .await
}
