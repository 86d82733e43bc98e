//! Core domain model for tee-time aggregation.

pub mod mountain;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use mountain::TimeParseError;

/// Minutes after the start of a tee time before the slot is considered stale.
pub const EXPIRY_GRACE_MINUTES: i64 = 60;

/// Players a slot accepts when the platform does not say otherwise.
pub const DEFAULT_PLAYERS_AVAILABLE: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingPlatform {
    Foreup,
    Chronogolf,
    Teeitup,
}

impl BookingPlatform {
    pub const ALL: [BookingPlatform; 3] = [Self::Foreup, Self::Chronogolf, Self::Teeitup];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foreup => "foreup",
            Self::Chronogolf => "chronogolf",
            Self::Teeitup => "teeitup",
        }
    }
}

impl fmt::Display for BookingPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown booking platform {0:?}")]
pub struct UnknownPlatform(pub String);

impl FromStr for BookingPlatform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "foreup" => Ok(Self::Foreup),
            "chronogolf" => Ok(Self::Chronogolf),
            "teeitup" | "kenna" => Ok(Self::Teeitup),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

pub fn is_valid_holes(holes: u8) -> bool {
    matches!(holes, 9 | 18 | 27 | 36)
}

/// Platform-specific identifiers from static course configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum PlatformIds {
    Foreup {
        schedule_id: u64,
    },
    Chronogolf {
        slug: String,
        /// Sub-course ids; resolved from the club endpoint when empty.
        #[serde(default)]
        course_ids: Vec<u64>,
    },
    Teeitup {
        alias: String,
        #[serde(default)]
        facility_ids: Vec<u64>,
    },
}

impl PlatformIds {
    pub fn platform(&self) -> BookingPlatform {
        match self {
            Self::Foreup { .. } => BookingPlatform::Foreup,
            Self::Chronogolf { .. } => BookingPlatform::Chronogolf,
            Self::Teeitup { .. } => BookingPlatform::Teeitup,
        }
    }
}

/// One entry of `courses.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    pub county: String,
    pub holes: u8,
    pub booking_url: String,
    #[serde(default = "default_verified")]
    pub verified: bool,
    #[serde(flatten)]
    pub ids: PlatformIds,
}

fn default_verified() -> bool {
    true
}

impl CourseConfig {
    pub fn platform(&self) -> BookingPlatform {
        self.ids.platform()
    }

    pub fn to_new_course(&self) -> NewCourse {
        NewCourse {
            name: self.name.clone(),
            city: self.city.clone(),
            county: self.county.clone(),
            holes: Some(self.holes),
            booking_url: self.booking_url.clone(),
            booking_platform: self.platform(),
            active: self.verified,
        }
    }
}

/// Durable course row as seeded in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    pub city: Option<String>,
    pub county: String,
    pub holes: Option<u8>,
    pub booking_url: String,
    pub booking_platform: BookingPlatform,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCourse {
    pub name: String,
    pub city: Option<String>,
    pub county: String,
    pub holes: Option<u8>,
    pub booking_url: String,
    pub booking_platform: BookingPlatform,
    pub active: bool,
}

/// Adapter output before it is bound to a durable course id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeeTimeCandidate {
    pub datetime: DateTime<Utc>,
    pub holes: u8,
    pub players_available: u8,
    pub price: Option<f64>,
}

/// Stored availability fact. Unique on `(course_id, datetime)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeeTime {
    pub course_id: Uuid,
    pub datetime: DateTime<Utc>,
    pub holes: u8,
    pub players_available: u8,
    pub price: Option<f64>,
    pub scraped_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TeeTime {
    pub fn from_candidate(course_id: Uuid, candidate: TeeTimeCandidate, scraped_at: DateTime<Utc>) -> Self {
        Self {
            course_id,
            datetime: candidate.datetime,
            holes: candidate.holes,
            players_available: candidate.players_available,
            price: candidate.price,
            scraped_at,
            expires_at: candidate.datetime + Duration::minutes(EXPIRY_GRACE_MINUTES),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Audit row: one per course per ingestion pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperRun {
    pub course_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub tee_times_found: u32,
    pub error_msg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub id: Uuid,
    pub name: String,
    pub county: String,
    pub booking_url: String,
    pub holes: Option<u8>,
}

impl From<&Course> for CourseSummary {
    fn from(course: &Course) -> Self {
        Self {
            id: course.id,
            name: course.name.clone(),
            county: course.county.clone(),
            booking_url: course.booking_url.clone(),
            holes: course.holes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeeTimeListing {
    pub tee_time: TeeTime,
    pub course: CourseSummary,
}

/// Filters of the downstream search contract.
///
/// `date` is a Mountain calendar day and the time-of-day range is compared in
/// Mountain local time, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeeTimeSearch {
    pub date: NaiveDate,
    pub min_players: u8,
    pub county: Option<String>,
    pub max_price: Option<f64>,
    pub time_from: Option<NaiveTime>,
    pub time_to: Option<NaiveTime>,
    pub limit: Option<usize>,
}

impl TeeTimeSearch {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date,
            min_players: 1,
            county: None,
            max_price: None,
            time_from: None,
            time_to: None,
            limit: None,
        }
    }

    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        mountain::day_bounds(self.date)
    }

    pub fn matches_county(&self, county: &str) -> bool {
        self.county
            .as_deref()
            .map_or(true, |wanted| wanted.eq_ignore_ascii_case(county))
    }

    pub fn matches_time_of_day(&self, instant: DateTime<Utc>) -> bool {
        if self.time_from.is_none() && self.time_to.is_none() {
            return true;
        }
        let local = mountain::to_local(instant).time();
        let local = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0).unwrap_or(local);
        if self.time_from.is_some_and(|from| local < from) {
            return false;
        }
        if self.time_to.is_some_and(|to| local > to) {
            return false;
        }
        true
    }

    pub fn matches_price(&self, price: Option<f64>) -> bool {
        match (self.max_price, price) {
            (None, _) => true,
            (Some(max), Some(price)) => price <= max,
            (Some(_), None) => false,
        }
    }

    pub fn matches(&self, listing: &TeeTimeListing, now: DateTime<Utc>) -> bool {
        let (start, end) = self.window();
        let t = &listing.tee_time;
        t.datetime >= start
            && t.datetime < end
            && !t.is_expired(now)
            && t.players_available >= self.min_players
            && self.matches_price(t.price)
            && self.matches_county(&listing.course.county)
            && self.matches_time_of_day(t.datetime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn listing(datetime: DateTime<Utc>, players: u8, price: Option<f64>, county: &str) -> TeeTimeListing {
        let course_id = Uuid::new_v4();
        TeeTimeListing {
            tee_time: TeeTime::from_candidate(
                course_id,
                TeeTimeCandidate {
                    datetime,
                    holes: 18,
                    players_available: players,
                    price,
                },
                datetime - Duration::days(1),
            ),
            course: CourseSummary {
                id: course_id,
                name: "Bonneville".into(),
                county: county.into(),
                booking_url: "https://example.test/bonneville".into(),
                holes: Some(18),
            },
        }
    }

    #[test]
    fn platform_ids_deserialize_from_tagged_yaml() {
        let yaml = r#"
key: mountain-dell-lake
name: Mountain Dell Golf Course (Lake)
county: salt_lake
holes: 18
booking_url: https://www.chronogolf.com/club/mountain-dell-golf-club
platform: chronogolf
slug: mountain-dell-golf-club
"#;
        let config: CourseConfig = serde_yaml::from_str(yaml).expect("parse course");
        assert_eq!(config.platform(), BookingPlatform::Chronogolf);
        assert!(config.verified);
        assert_eq!(
            config.ids,
            PlatformIds::Chronogolf {
                slug: "mountain-dell-golf-club".into(),
                course_ids: vec![]
            }
        );
    }

    #[test]
    fn expiry_is_one_hour_after_start() {
        let start = Utc.with_ymd_and_hms(2026, 7, 15, 14, 0, 0).unwrap();
        let row = listing(start, 4, None, "salt_lake").tee_time;
        assert_eq!(row.expires_at, start + Duration::hours(1));
        assert!(!row.is_expired(start + Duration::minutes(59)));
        assert!(row.is_expired(start + Duration::minutes(60)));
    }

    #[test]
    fn search_filters_by_local_time_of_day_and_price() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let mut search = TeeTimeSearch::for_date(date);
        search.time_from = NaiveTime::from_hms_opt(6, 0, 0);
        search.time_to = NaiveTime::from_hms_opt(12, 0, 0);
        search.max_price = Some(40.0);
        let now = Utc.with_ymd_and_hms(2026, 7, 15, 0, 0, 0).unwrap();

        // 08:00 MDT
        assert!(search.matches(&listing(Utc.with_ymd_and_hms(2026, 7, 15, 14, 0, 0).unwrap(), 2, Some(35.0), "salt_lake"), now));
        // 12:00 MDT is inclusive
        assert!(search.matches(&listing(Utc.with_ymd_and_hms(2026, 7, 15, 18, 0, 0).unwrap(), 2, Some(35.0), "utah"), now));
        // 13:00 MDT
        assert!(!search.matches(&listing(Utc.with_ymd_and_hms(2026, 7, 15, 19, 0, 0).unwrap(), 2, Some(35.0), "utah"), now));
        // unknown price is excluded once a max is set
        assert!(!search.matches(&listing(Utc.with_ymd_and_hms(2026, 7, 15, 14, 0, 0).unwrap(), 2, None, "utah"), now));
    }

    #[test]
    fn search_honours_county_players_and_expiry() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let mut search = TeeTimeSearch::for_date(date);
        search.county = Some("SALT_LAKE".into());
        search.min_players = 3;
        let slot = Utc.with_ymd_and_hms(2026, 7, 15, 15, 0, 0).unwrap();

        assert!(search.matches(&listing(slot, 4, None, "salt_lake"), slot - Duration::hours(2)));
        assert!(!search.matches(&listing(slot, 2, None, "salt_lake"), slot - Duration::hours(2)));
        assert!(!search.matches(&listing(slot, 4, None, "weber"), slot - Duration::hours(2)));
        assert!(!search.matches(&listing(slot, 4, None, "salt_lake"), slot + Duration::hours(2)));
        // 23:30 MDT on the 14th belongs to the previous local day
        let previous_day = Utc.with_ymd_and_hms(2026, 7, 15, 5, 30, 0).unwrap();
        assert!(!search.matches(&listing(previous_day, 4, None, "salt_lake"), previous_day - Duration::hours(2)));
    }

    #[test]
    fn platform_parses_case_insensitively() {
        assert_eq!("ForeUp".parse::<BookingPlatform>().unwrap(), BookingPlatform::Foreup);
        assert_eq!("kenna".parse::<BookingPlatform>().unwrap(), BookingPlatform::Teeitup);
        assert!("ezlinks".parse::<BookingPlatform>().is_err());
    }
}
