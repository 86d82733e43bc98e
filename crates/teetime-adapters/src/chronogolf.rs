use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use teetime_core::{mountain, BookingPlatform, CourseConfig, PlatformIds, TeeTimeCandidate};
use teetime_storage::{HttpFetcher, HttpRequest};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::{lenient_f64, lenient_i64, players_from, AdapterContext, AdapterError, PlatformAdapter};

pub const CHRONOGOLF_BASE_URL: &str = "https://www.chronogolf.com/marketplace/v2";

/// Club record from `clubs/{slug}`; only the booking flag and sub-course ids matter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClubInfo {
    #[serde(default = "booking_enabled_by_default")]
    pub online_booking_enabled: bool,
    #[serde(default)]
    pub courses: Vec<ClubCourse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClubCourse {
    pub id: u64,
}

fn booking_enabled_by_default() -> bool {
    true
}

pub fn parse_club_info(body: &[u8]) -> Result<ClubInfo, AdapterError> {
    serde_json::from_slice(body).map_err(|err| AdapterError::malformed(BookingPlatform::Chronogolf, err))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubCourseResolution {
    Resolved(Vec<u64>),
    BookingDisabled,
    Unavailable(String),
}

impl SubCourseResolution {
    pub fn course_ids(&self) -> &[u64] {
        match self {
            Self::Resolved(ids) => ids,
            _ => &[],
        }
    }
}

impl From<ClubInfo> for SubCourseResolution {
    fn from(info: ClubInfo) -> Self {
        if !info.online_booking_enabled {
            return Self::BookingDisabled;
        }
        let ids: Vec<u64> = info.courses.into_iter().map(|c| c.id).collect();
        if ids.is_empty() {
            Self::Unavailable("club lists no courses".into())
        } else {
            Self::Resolved(ids)
        }
    }
}

/// Slug -> resolution memo, shared by every fetch in one ingestion run.
///
/// Each slug gets its own `OnceCell`, so concurrent callers for the same slug
/// wait on a single lookup while other slugs proceed independently.
#[derive(Debug, Clone, Default)]
pub struct SubCourseCache {
    cells: Arc<Mutex<HashMap<String, Arc<OnceCell<SubCourseResolution>>>>>,
}

impl SubCourseCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn cell(&self, slug: &str) -> Arc<OnceCell<SubCourseResolution>> {
        let mut cells = self.cells.lock().await;
        cells
            .entry(slug.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    pub async fn get_or_resolve<F, Fut>(&self, slug: &str, resolve: F) -> SubCourseResolution
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SubCourseResolution>,
    {
        let cell = self.cell(slug).await;
        cell.get_or_init(resolve).await.clone()
    }

    pub async fn get(&self, slug: &str) -> Option<SubCourseResolution> {
        let cells = self.cells.lock().await;
        cells.get(slug).and_then(|cell| cell.get().cloned())
    }
}

pub struct SubCourseResolver {
    http: Arc<HttpFetcher>,
    base_url: String,
    cache: SubCourseCache,
}

impl SubCourseResolver {
    pub fn new(http: Arc<HttpFetcher>, base_url: impl Into<String>, cache: SubCourseCache) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            cache,
        }
    }

    pub async fn resolve(&self, ctx: &AdapterContext, slug: &str) -> SubCourseResolution {
        self.cache
            .get_or_resolve(slug, || async move { self.lookup(ctx, slug).await })
            .await
    }

    async fn lookup(&self, ctx: &AdapterContext, slug: &str) -> SubCourseResolution {
        let request = HttpRequest::get(format!("{}/clubs/{slug}", self.base_url))
            .header("Accept", "application/json");
        let fetched = self
            .http
            .fetch(ctx.run_id, BookingPlatform::Chronogolf.as_str(), &request)
            .await
            .map_err(AdapterError::from)
            .and_then(|response| parse_club_info(&response.body));

        let resolution = match fetched {
            Ok(info) => SubCourseResolution::from(info),
            Err(err) => SubCourseResolution::Unavailable(err.to_string()),
        };
        match &resolution {
            SubCourseResolution::Resolved(ids) => {
                info!(run_id = %ctx.run_id, slug, course_ids = ?ids, "resolved chronogolf sub-courses")
            }
            SubCourseResolution::BookingDisabled => {
                warn!(run_id = %ctx.run_id, slug, "online booking disabled; club skipped for this run")
            }
            SubCourseResolution::Unavailable(reason) => {
                warn!(run_id = %ctx.run_id, slug, reason = %reason, "sub-course lookup failed; club skipped for this run")
            }
        }
        resolution
    }
}

#[derive(Debug, Deserialize)]
struct ChronogolfSlot {
    start_date: String,
    start_time: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    available_players: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    price_per_player: Option<f64>,
}

/// Map a `teetimes` body, keeping published slots with free players.
pub fn parse_chronogolf_teetimes(
    body: &[u8],
    course_holes: u8,
) -> Result<Vec<TeeTimeCandidate>, AdapterError> {
    let value: JsonValue = serde_json::from_slice(body)
        .map_err(|err| AdapterError::malformed(BookingPlatform::Chronogolf, err))?;
    let Some(items) = value.get("teetimes").and_then(JsonValue::as_array) else {
        return Err(AdapterError::malformed(
            BookingPlatform::Chronogolf,
            "missing teetimes array",
        ));
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let slot: ChronogolfSlot = match serde_json::from_value(item.clone()) {
            Ok(slot) => slot,
            Err(err) => {
                warn!(error = %err, "skipping unreadable chronogolf slot");
                continue;
            }
        };
        if slot.status.as_deref() != Some("published") {
            continue;
        }
        let Some(players_available) = players_from(slot.available_players.unwrap_or(0)) else {
            continue;
        };
        let datetime = match mountain::parse_local_date_and_time(&slot.start_date, &slot.start_time) {
            Ok(datetime) => datetime,
            Err(err) => {
                warn!(error = %err, "skipping chronogolf slot");
                continue;
            }
        };
        out.push(TeeTimeCandidate {
            datetime,
            holes: course_holes,
            players_available,
            price: slot.price_per_player,
        });
    }
    Ok(out)
}

pub struct ChronogolfAdapter {
    http: Arc<HttpFetcher>,
    base_url: String,
    resolver: SubCourseResolver,
}

impl ChronogolfAdapter {
    pub fn new(http: Arc<HttpFetcher>, cache: SubCourseCache) -> Self {
        Self::with_base_url(http, CHRONOGOLF_BASE_URL, cache)
    }

    pub fn with_base_url(
        http: Arc<HttpFetcher>,
        base_url: impl Into<String>,
        cache: SubCourseCache,
    ) -> Self {
        let base_url = base_url.into();
        let resolver = SubCourseResolver::new(http.clone(), base_url.clone(), cache);
        Self {
            http,
            base_url,
            resolver,
        }
    }
}

#[async_trait]
impl PlatformAdapter for ChronogolfAdapter {
    fn platform(&self) -> BookingPlatform {
        BookingPlatform::Chronogolf
    }

    async fn try_fetch(
        &self,
        ctx: &AdapterContext,
        course: &CourseConfig,
        date: NaiveDate,
    ) -> Result<Vec<TeeTimeCandidate>, AdapterError> {
        let PlatformIds::Chronogolf { slug, course_ids } = &course.ids else {
            return Err(AdapterError::WrongPlatform {
                course: course.key.clone(),
                expected: BookingPlatform::Chronogolf,
            });
        };

        let ids = if course_ids.is_empty() {
            let resolution = self.resolver.resolve(ctx, slug).await;
            if resolution.course_ids().is_empty() {
                // already reported once by the resolver
                return Ok(Vec::new());
            }
            resolution.course_ids().to_vec()
        } else {
            course_ids.clone()
        };

        let joined = ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let request = HttpRequest::get(format!("{}/teetimes", self.base_url))
            .query("start_date", date.format("%Y-%m-%d").to_string())
            .query("course_ids", joined)
            .query("holes", course.holes.to_string())
            .query("free_slots", "1")
            .header("Accept", "application/json");

        let response = self
            .http
            .fetch(ctx.run_id, self.platform().as_str(), &request)
            .await?;
        let candidates = parse_chronogolf_teetimes(&response.body, course.holes)?;
        debug!(course = %course.key, %date, found = candidates.len(), "chronogolf slots parsed");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn published_slots_with_players_survive() {
        let candidates = parse_chronogolf_teetimes(&fixture("chronogolf/teetimes.json"), 18).unwrap();
        assert_eq!(
            candidates,
            vec![
                TeeTimeCandidate {
                    datetime: Utc.with_ymd_and_hms(2026, 7, 15, 13, 30, 0).unwrap(),
                    holes: 18,
                    players_available: 4,
                    price: Some(48.0),
                },
                TeeTimeCandidate {
                    datetime: Utc.with_ymd_and_hms(2026, 7, 15, 22, 5, 0).unwrap(),
                    holes: 18,
                    players_available: 2,
                    price: None,
                },
            ]
        );
    }

    #[test]
    fn club_info_maps_to_resolution() {
        let enabled = parse_club_info(&fixture("chronogolf/club.json")).unwrap();
        assert_eq!(
            SubCourseResolution::from(enabled),
            SubCourseResolution::Resolved(vec![1185, 1186])
        );

        let disabled = parse_club_info(&fixture("chronogolf/club_disabled.json")).unwrap();
        assert_eq!(SubCourseResolution::from(disabled), SubCourseResolution::BookingDisabled);

        let empty = parse_club_info(br#"{"online_booking_enabled": true, "courses": []}"#).unwrap();
        assert!(matches!(SubCourseResolution::from(empty), SubCourseResolution::Unavailable(_)));
    }

    #[test]
    fn missing_envelope_is_malformed() {
        assert!(parse_chronogolf_teetimes(br#"{"error": "nope"}"#, 18).is_err());
    }

    #[tokio::test]
    async fn cache_runs_one_lookup_per_slug_under_contention() {
        let cache = SubCourseCache::new();
        let lookups = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let lookups = lookups.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_resolve("mountain-dell-golf-club", || async move {
                        lookups.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        SubCourseResolution::Resolved(vec![1185])
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), SubCourseResolution::Resolved(vec![1185]));
        }
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.get("mountain-dell-golf-club").await,
            Some(SubCourseResolution::Resolved(vec![1185]))
        );
        assert_eq!(cache.get("other-club").await, None);
    }
}
