use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use teetime_core::{mountain, BookingPlatform, CourseConfig, PlatformIds, TeeTimeCandidate};
use teetime_storage::{HttpFetcher, HttpRequest};
use tracing::{debug, warn};

use crate::{lenient_f64, players_from, AdapterContext, AdapterError, PlatformAdapter};

pub const TEEITUP_ORIGIN_SUFFIX: &str = "book-v2.teeitup.golf";
pub const TEEITUP_BASE_URL: &str = "https://phx-api-be-east-1b.kenna.io/v2/tee-times";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeeItUpSlot {
    teetime: String,
    #[serde(default)]
    max_players: i64,
    #[serde(default)]
    booked_players: i64,
    #[serde(default)]
    rates: Vec<TeeItUpRate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeeItUpRate {
    #[serde(default, deserialize_with = "lenient_f64")]
    green_fee_walking: Option<f64>,
}

/// `courseId` arrives as either a string or a number.
fn block_course_id(block: &JsonValue) -> Option<String> {
    match block.get("courseId")? {
        JsonValue::String(s) => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Flatten the blocks belonging to `facility_ids`. Timestamps are already UTC.
pub fn parse_teeitup_blocks(
    body: &[u8],
    facility_ids: &[u64],
    course_holes: u8,
) -> Result<Vec<TeeTimeCandidate>, AdapterError> {
    let value: JsonValue = serde_json::from_slice(body)
        .map_err(|err| AdapterError::malformed(BookingPlatform::Teeitup, err))?;
    let Some(blocks) = value.as_array() else {
        return Err(AdapterError::malformed(
            BookingPlatform::Teeitup,
            "expected course block array",
        ));
    };

    let wanted: HashSet<String> = facility_ids.iter().map(u64::to_string).collect();
    let mut out = Vec::new();
    for block in blocks {
        if !block_course_id(block).is_some_and(|id| wanted.contains(&id)) {
            continue;
        }
        let Some(slots) = block.get("teetimes").and_then(JsonValue::as_array) else {
            continue;
        };
        for item in slots {
            let slot: TeeItUpSlot = match serde_json::from_value(item.clone()) {
                Ok(slot) => slot,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable teeitup slot");
                    continue;
                }
            };
            let Some(players_available) = slot
                .max_players
                .checked_sub(slot.booked_players)
                .and_then(players_from)
            else {
                continue;
            };
            let datetime = match mountain::parse_utc_instant(&slot.teetime) {
                Ok(datetime) => datetime,
                Err(err) => {
                    warn!(error = %err, "skipping teeitup slot");
                    continue;
                }
            };
            let price = slot
                .rates
                .first()
                .and_then(|rate| rate.green_fee_walking)
                .map(|cents| cents / 100.0);
            out.push(TeeTimeCandidate {
                datetime,
                holes: course_holes,
                players_available,
                price,
            });
        }
    }
    Ok(out)
}

pub struct TeeItUpAdapter {
    http: Arc<HttpFetcher>,
    base_url: String,
}

impl TeeItUpAdapter {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self::with_base_url(http, TEEITUP_BASE_URL)
    }

    pub fn with_base_url(http: Arc<HttpFetcher>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PlatformAdapter for TeeItUpAdapter {
    fn platform(&self) -> BookingPlatform {
        BookingPlatform::Teeitup
    }

    async fn try_fetch(
        &self,
        ctx: &AdapterContext,
        course: &CourseConfig,
        date: NaiveDate,
    ) -> Result<Vec<TeeTimeCandidate>, AdapterError> {
        let PlatformIds::Teeitup { alias, facility_ids } = &course.ids else {
            return Err(AdapterError::WrongPlatform {
                course: course.key.clone(),
                expected: BookingPlatform::Teeitup,
            });
        };
        if alias.trim().is_empty() {
            return Err(AdapterError::MissingIdentifiers {
                course: course.key.clone(),
                what: "alias",
            });
        }
        if facility_ids.is_empty() {
            return Err(AdapterError::MissingIdentifiers {
                course: course.key.clone(),
                what: "facility ids",
            });
        }

        let request = HttpRequest::get(&self.base_url)
            .query("date", date.format("%Y-%m-%d").to_string())
            .header("x-be-alias", alias.as_str())
            .header("Origin", format!("https://{alias}.{TEEITUP_ORIGIN_SUFFIX}"))
            .header("Accept", "application/json");

        let response = self
            .http
            .fetch(ctx.run_id, self.platform().as_str(), &request)
            .await?;
        let candidates = parse_teeitup_blocks(&response.body, facility_ids, course.holes)?;
        debug!(course = %course.key, %date, found = candidates.len(), "teeitup slots parsed");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{course, fixture};
    use chrono::{TimeZone, Utc};
    use teetime_storage::{HttpClientConfig, HttpFetcher};
    use uuid::Uuid;

    #[test]
    fn only_configured_facilities_with_open_spots_are_kept() {
        let candidates =
            parse_teeitup_blocks(&fixture("teeitup/tee-times.json"), &[17072, 17073], 18).unwrap();
        assert_eq!(
            candidates,
            vec![
                TeeTimeCandidate {
                    datetime: Utc.with_ymd_and_hms(2026, 7, 15, 14, 0, 0).unwrap(),
                    holes: 18,
                    players_available: 3,
                    price: Some(45.0),
                },
                TeeTimeCandidate {
                    datetime: Utc.with_ymd_and_hms(2026, 7, 15, 15, 0, 0).unwrap(),
                    holes: 18,
                    players_available: 2,
                    price: None,
                },
            ]
        );
    }

    #[test]
    fn fully_booked_slot_is_excluded() {
        let body = br#"[{"courseId":"1","teetimes":[{"teetime":"2026-07-15T14:00:00.000Z","maxPlayers":4,"bookedPlayers":4,"rates":[]}]}]"#;
        assert!(parse_teeitup_blocks(body, &[1], 18).unwrap().is_empty());
    }

    #[test]
    fn out_of_range_player_counts_drop_only_that_slot() {
        let body = br#"[{"courseId":1,"teetimes":[
            {"teetime":"2026-07-15T14:00:00.000Z","maxPlayers":4,"bookedPlayers":-9223372036854775808,"rates":[]},
            {"teetime":"2026-07-15T14:10:00.000Z","maxPlayers":-9223372036854775808,"bookedPlayers":1,"rates":[]},
            {"teetime":"2026-07-15T14:20:00.000Z","maxPlayers":4,"bookedPlayers":3,"rates":[]}
        ]}]"#;
        let candidates = parse_teeitup_blocks(body, &[1], 18).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].datetime, Utc.with_ymd_and_hms(2026, 7, 15, 14, 20, 0).unwrap());
        assert_eq!(candidates[0].players_available, 1);
    }

    #[tokio::test]
    async fn missing_facility_ids_yield_empty_availability() {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        // unroutable base url: the request must never be attempted
        let adapter = TeeItUpAdapter::with_base_url(http, "http://127.0.0.1:9");
        let course = course(PlatformIds::Teeitup {
            alias: "aspira-management-company".into(),
            facility_ids: vec![],
        });
        let ctx = AdapterContext { run_id: Uuid::new_v4() };
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();

        let err = adapter.try_fetch(&ctx, &course, date).await.unwrap_err();
        assert!(matches!(err, AdapterError::MissingIdentifiers { what: "facility ids", .. }));
        assert!(adapter.fetch_availability(&ctx, &course, date).await.is_empty());
    }
}
