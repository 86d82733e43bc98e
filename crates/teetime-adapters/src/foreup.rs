use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use teetime_core::{
    is_valid_holes, mountain, BookingPlatform, CourseConfig, PlatformIds, TeeTimeCandidate,
    DEFAULT_PLAYERS_AVAILABLE,
};
use teetime_storage::{HttpFetcher, HttpRequest};
use tracing::{debug, warn};

use crate::{lenient_f64, lenient_i64, players_from, AdapterContext, AdapterError, PlatformAdapter};

pub const FOREUP_BASE_URL: &str = "https://foreupsoftware.com/index.php/api/booking/times";

#[derive(Debug, Deserialize)]
struct ForeUpSlot {
    time: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    teesheet_holes: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    available_spots: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    green_fee: Option<f64>,
}

/// Map a ForeUp `booking/times` body. The platform answers `false` for an
/// unknown schedule id, which is reported as malformed.
pub fn parse_foreup_times(
    body: &[u8],
    course_holes: u8,
) -> Result<Vec<TeeTimeCandidate>, AdapterError> {
    let value: JsonValue = serde_json::from_slice(body)
        .map_err(|err| AdapterError::malformed(BookingPlatform::Foreup, err))?;
    let items = match value {
        JsonValue::Array(items) => items,
        other => {
            return Err(AdapterError::malformed(
                BookingPlatform::Foreup,
                format!("expected slot array, got {other}"),
            ))
        }
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let slot: ForeUpSlot = match serde_json::from_value(item) {
            Ok(slot) => slot,
            Err(err) => {
                warn!(error = %err, "skipping unreadable foreup slot");
                continue;
            }
        };
        let datetime = match mountain::parse_local_datetime(&slot.time) {
            Ok(datetime) => datetime,
            Err(err) => {
                warn!(error = %err, "skipping foreup slot");
                continue;
            }
        };
        let Some(players_available) = players_from(
            slot.available_spots
                .unwrap_or(i64::from(DEFAULT_PLAYERS_AVAILABLE)),
        ) else {
            continue;
        };
        let holes = slot
            .teesheet_holes
            .and_then(|h| u8::try_from(h).ok())
            .filter(|h| is_valid_holes(*h))
            .unwrap_or(course_holes);

        out.push(TeeTimeCandidate {
            datetime,
            holes,
            players_available,
            price: slot.green_fee,
        });
    }
    Ok(out)
}

pub struct ForeUpAdapter {
    http: Arc<HttpFetcher>,
    base_url: String,
}

impl ForeUpAdapter {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self::with_base_url(http, FOREUP_BASE_URL)
    }

    pub fn with_base_url(http: Arc<HttpFetcher>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PlatformAdapter for ForeUpAdapter {
    fn platform(&self) -> BookingPlatform {
        BookingPlatform::Foreup
    }

    async fn try_fetch(
        &self,
        ctx: &AdapterContext,
        course: &CourseConfig,
        date: NaiveDate,
    ) -> Result<Vec<TeeTimeCandidate>, AdapterError> {
        let PlatformIds::Foreup { schedule_id } = &course.ids else {
            return Err(AdapterError::WrongPlatform {
                course: course.key.clone(),
                expected: BookingPlatform::Foreup,
            });
        };

        let request = HttpRequest::get(&self.base_url)
            .query("time", "all")
            .query("date", date.format("%m-%d-%Y").to_string())
            .query("holes", "all")
            .query("players", "4")
            .query("schedule_id", schedule_id.to_string())
            .query("specials_only", "0")
            .query("api_key", "no_limits")
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Accept", "application/json");

        let response = self
            .http
            .fetch(ctx.run_id, self.platform().as_str(), &request)
            .await?;
        let candidates = parse_foreup_times(&response.body, course.holes)?;
        debug!(course = %course.key, %date, found = candidates.len(), "foreup slots parsed");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;
    use chrono::{TimeZone, Utc};

    #[test]
    fn fixture_slots_are_normalized_to_utc() {
        let candidates = parse_foreup_times(&fixture("foreup/times.json"), 18).unwrap();
        assert_eq!(candidates.len(), 3);

        assert_eq!(
            candidates[0],
            TeeTimeCandidate {
                datetime: Utc.with_ymd_and_hms(2026, 7, 15, 14, 0, 0).unwrap(),
                holes: 18,
                players_available: 4,
                price: Some(35.0),
            }
        );
        assert_eq!(candidates[1].holes, 9);
        assert_eq!(candidates[1].players_available, 2);
        assert_eq!(candidates[1].price, Some(22.5));
        // invalid teesheet_holes falls back to the configured value
        assert_eq!(candidates[2].holes, 18);
        assert_eq!(candidates[2].price, None);
    }

    #[test]
    fn false_body_is_malformed() {
        let err = parse_foreup_times(b"false", 18).unwrap_err();
        assert!(matches!(err, AdapterError::Malformed { platform: BookingPlatform::Foreup, .. }));
    }

    #[test]
    fn winter_slot_uses_standard_offset() {
        let body = br#"[{"time":"2026-01-20 09:30","teesheet_holes":18,"available_spots":1,"green_fee":28}]"#;
        let candidates = parse_foreup_times(body, 18).unwrap();
        assert_eq!(candidates[0].datetime, Utc.with_ymd_and_hms(2026, 1, 20, 16, 30, 0).unwrap());
    }
}
