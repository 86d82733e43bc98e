//! Booking platform adapters: fetch one course/date and normalize to [`TeeTimeCandidate`]s.

mod chronogolf;
mod foreup;
mod teeitup;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use teetime_core::{is_valid_holes, BookingPlatform, CourseConfig, TeeTimeCandidate};
use teetime_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub use chronogolf::{
    parse_chronogolf_teetimes, parse_club_info, ChronogolfAdapter, ClubInfo, SubCourseCache,
    SubCourseResolution, SubCourseResolver, CHRONOGOLF_BASE_URL,
};
pub use foreup::{parse_foreup_times, ForeUpAdapter, FOREUP_BASE_URL};
pub use teeitup::{parse_teeitup_blocks, TeeItUpAdapter, TEEITUP_BASE_URL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterContext {
    pub run_id: Uuid,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed {platform} payload: {detail}")]
    Malformed {
        platform: BookingPlatform,
        detail: String,
    },
    #[error("course {course} is not a {expected} course")]
    WrongPlatform {
        course: String,
        expected: BookingPlatform,
    },
    #[error("course {course} is missing {what}")]
    MissingIdentifiers { course: String, what: &'static str },
}

impl AdapterError {
    pub(crate) fn malformed(platform: BookingPlatform, detail: impl ToString) -> Self {
        Self::Malformed {
            platform,
            detail: detail.to_string(),
        }
    }
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> BookingPlatform;

    async fn try_fetch(
        &self,
        ctx: &AdapterContext,
        course: &CourseConfig,
        date: NaiveDate,
    ) -> Result<Vec<TeeTimeCandidate>, AdapterError>;

    /// Never fails: any error becomes an empty list and a warning.
    async fn fetch_availability(
        &self,
        ctx: &AdapterContext,
        course: &CourseConfig,
        date: NaiveDate,
    ) -> Vec<TeeTimeCandidate> {
        match self.try_fetch(ctx, course, date).await {
            Ok(mut candidates) => {
                candidates.retain(|c| c.players_available > 0 && is_valid_holes(c.holes));
                candidates
            }
            Err(err) => {
                warn!(
                    run_id = %ctx.run_id,
                    platform = %self.platform(),
                    course = %course.key,
                    %date,
                    error = %err,
                    "availability fetch failed; treating as empty"
                );
                Vec::new()
            }
        }
    }
}

/// Platform -> adapter dispatch table.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<BookingPlatform, Arc<dyn PlatformAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Production adapters sharing one fetcher and a run-scoped sub-course cache.
    pub fn live(http: Arc<HttpFetcher>, cache: SubCourseCache) -> Self {
        Self::new()
            .with(Arc::new(ForeUpAdapter::new(http.clone())))
            .with(Arc::new(ChronogolfAdapter::new(http.clone(), cache)))
            .with(Arc::new(TeeItUpAdapter::new(http)))
    }

    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: BookingPlatform) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<BookingPlatform> {
        let mut platforms: Vec<_> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSet")
            .field("platforms", &self.platforms())
            .finish()
    }
}

/// Accepts a JSON number or numeric string; anything else is `None`.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?.map(|v| v as i64))
}

/// Platforms report a player count; anything outside 1..=255 is not a usable slot.
pub(crate) fn players_from(count: i64) -> Option<u8> {
    u8::try_from(count).ok().filter(|p| *p > 0)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};

    use teetime_core::{CourseConfig, PlatformIds};

    pub fn fixture(relative: &str) -> Vec<u8> {
        let path: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("fixtures")
            .join(relative);
        std::fs::read(&path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
    }

    pub fn course(ids: PlatformIds) -> CourseConfig {
        CourseConfig {
            key: "test-course".into(),
            name: "Test Course".into(),
            city: Some("Salt Lake City".into()),
            county: "salt_lake".into(),
            holes: 18,
            booking_url: "https://example.test/book".into(),
            verified: true,
            ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use teetime_core::PlatformIds;

    struct FixedAdapter(Result<Vec<TeeTimeCandidate>, &'static str>);

    #[async_trait]
    impl PlatformAdapter for FixedAdapter {
        fn platform(&self) -> BookingPlatform {
            BookingPlatform::Foreup
        }

        async fn try_fetch(
            &self,
            _ctx: &AdapterContext,
            _course: &CourseConfig,
            _date: NaiveDate,
        ) -> Result<Vec<TeeTimeCandidate>, AdapterError> {
            self.0
                .clone()
                .map_err(|detail| AdapterError::malformed(BookingPlatform::Foreup, detail))
        }
    }

    fn candidate(players: u8, holes: u8) -> TeeTimeCandidate {
        TeeTimeCandidate {
            datetime: Utc.with_ymd_and_hms(2026, 7, 15, 14, 0, 0).unwrap(),
            holes,
            players_available: players,
            price: None,
        }
    }

    #[tokio::test]
    async fn fetch_availability_absorbs_errors() {
        let adapter = FixedAdapter(Err("expected array"));
        let course = test_support::course(PlatformIds::Foreup { schedule_id: 1 });
        let ctx = AdapterContext { run_id: Uuid::new_v4() };
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        assert!(adapter.fetch_availability(&ctx, &course, date).await.is_empty());
    }

    #[tokio::test]
    async fn fetch_availability_drops_unusable_records() {
        let adapter = FixedAdapter(Ok(vec![candidate(4, 18), candidate(0, 18), candidate(2, 12)]));
        let course = test_support::course(PlatformIds::Foreup { schedule_id: 1 });
        let ctx = AdapterContext { run_id: Uuid::new_v4() };
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let out = adapter.fetch_availability(&ctx, &course, date).await;
        assert_eq!(out, vec![candidate(4, 18)]);
    }

    #[test]
    fn adapter_set_dispatches_by_platform() {
        let set = AdapterSet::new().with(Arc::new(FixedAdapter(Ok(vec![]))));
        assert!(set.get(BookingPlatform::Foreup).is_some());
        assert!(set.get(BookingPlatform::Teeitup).is_none());
        assert_eq!(set.platforms(), vec![BookingPlatform::Foreup]);
    }
}
