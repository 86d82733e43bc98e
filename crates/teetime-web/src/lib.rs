//! JSON read API over the tee-time store.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use teetime_core::{mountain, Course, CourseSummary, TeeTimeListing, TeeTimeSearch};
use teetime_storage::{PgStore, StoreError, TeeTimeStore};
use teetime_sync::SyncConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

const MAX_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn TeeTimeStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn TeeTimeStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Store(err) => {
                error!(error = %err, "store query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Raw query string; every field is parsed by hand so bad input gets a JSON 400.
#[derive(Debug, Default, Deserialize)]
pub struct TeeTimeQuery {
    pub date: Option<String>,
    pub players: Option<String>,
    pub county: Option<String>,
    pub max_price: Option<String>,
    pub time_from: Option<String>,
    pub time_to: Option<String>,
    pub limit: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn bad_request(err: impl std::fmt::Display) -> ApiError {
    ApiError::BadRequest(err.to_string())
}

impl TeeTimeQuery {
    pub fn into_search(self, now: DateTime<Utc>) -> Result<TeeTimeSearch, ApiError> {
        let date = match non_empty(&self.date) {
            Some(raw) => mountain::parse_date(raw).map_err(bad_request)?,
            None => mountain::local_date(now),
        };
        let mut search = TeeTimeSearch::for_date(date);

        if let Some(raw) = non_empty(&self.players) {
            let players: u8 = raw
                .parse()
                .map_err(|_| bad_request(format!("invalid players {raw:?}")))?;
            if !(1..=4).contains(&players) {
                return Err(bad_request("players must be between 1 and 4"));
            }
            search.min_players = players;
        }
        search.county = non_empty(&self.county).map(str::to_string);
        if let Some(raw) = non_empty(&self.max_price) {
            let max: f64 = raw
                .parse()
                .map_err(|_| bad_request(format!("invalid max_price {raw:?}")))?;
            if !max.is_finite() || max < 0.0 {
                return Err(bad_request("max_price must be a non-negative number"));
            }
            search.max_price = Some(max);
        }
        search.time_from = non_empty(&self.time_from)
            .map(mountain::parse_time)
            .transpose()
            .map_err(bad_request)?;
        search.time_to = non_empty(&self.time_to)
            .map(mountain::parse_time)
            .transpose()
            .map_err(bad_request)?;
        if let (Some(from), Some(to)) = (search.time_from, search.time_to) {
            if from > to {
                return Err(bad_request("time_from must not be after time_to"));
            }
        }
        if let Some(raw) = non_empty(&self.limit) {
            let limit: usize = raw
                .parse()
                .map_err(|_| bad_request(format!("invalid limit {raw:?}")))?;
            search.limit = Some(limit.clamp(1, MAX_LIMIT));
        }
        Ok(search)
    }
}

#[derive(Debug, Serialize)]
pub struct TeeTimeView {
    pub course_id: Uuid,
    pub datetime: String,
    /// Mountain wall clock, `HH:MM`.
    pub local_time: String,
    pub holes: u8,
    pub players_available: u8,
    pub price: Option<f64>,
    pub expires_at: String,
    pub course: CourseSummary,
}

impl From<TeeTimeListing> for TeeTimeView {
    fn from(listing: TeeTimeListing) -> Self {
        let t = listing.tee_time;
        Self {
            course_id: t.course_id,
            datetime: mountain::to_iso(&t.datetime),
            local_time: mountain::to_local(t.datetime).format("%H:%M").to_string(),
            holes: t.holes,
            players_available: t.players_available,
            price: t.price,
            expires_at: mountain::to_iso(&t.expires_at),
            course: listing.course,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TeeTimesResponse {
    pub date: String,
    pub count: usize,
    pub tee_times: Vec<TeeTimeView>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CourseQuery {
    pub county: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CoursesResponse {
    pub courses: Vec<Course>,
}

#[derive(Debug, Serialize)]
pub struct CountiesResponse {
    pub counties: Vec<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/tee-times", get(tee_times_handler))
        .route("/courses", get(courses_handler))
        .route("/counties", get(counties_handler))
        .with_state(state)
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env()?;
    let store = PgStore::connect(config.require_database_url()?).await?;
    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "serving read api");
    axum::serve(listener, app(AppState::new(Arc::new(store)))).await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn tee_times_handler(
    State(state): State<AppState>,
    Query(query): Query<TeeTimeQuery>,
) -> Result<Json<TeeTimesResponse>, ApiError> {
    let now = Utc::now();
    let search = query.into_search(now)?;
    let listings = state.store.search_tee_times(&search, now).await?;
    let tee_times: Vec<TeeTimeView> = listings.into_iter().map(TeeTimeView::from).collect();
    Ok(Json(TeeTimesResponse {
        date: search.date.format("%Y-%m-%d").to_string(),
        count: tee_times.len(),
        tee_times,
    }))
}

async fn courses_handler(
    State(state): State<AppState>,
    Query(query): Query<CourseQuery>,
) -> Result<Json<CoursesResponse>, ApiError> {
    let courses = state.store.list_courses(non_empty(&query.county)).await?;
    Ok(Json(CoursesResponse { courses }))
}

async fn counties_handler(State(state): State<AppState>) -> Result<Json<CountiesResponse>, ApiError> {
    let counties = state.store.counties().await?;
    Ok(Json(CountiesResponse { counties }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use chrono::{Duration, NaiveDate, TimeZone};
    use http_body_util::BodyExt;
    use teetime_core::{BookingPlatform, NewCourse, TeeTime, TeeTimeCandidate};
    use teetime_storage::MemoryStore;
    use tower::ServiceExt;

    fn new_course(name: &str, county: &str) -> NewCourse {
        NewCourse {
            name: name.into(),
            city: None,
            county: county.into(),
            holes: Some(18),
            booking_url: format!("https://example.test/{name}"),
            booking_platform: BookingPlatform::Chronogolf,
            active: true,
        }
    }

    fn row(course_id: Uuid, hour: u32, players: u8, price: Option<f64>) -> TeeTime {
        // far enough ahead that nothing has expired
        let datetime = Utc.with_ymd_and_hms(2035, 7, 15, hour, 0, 0).unwrap();
        TeeTime::from_candidate(
            course_id,
            TeeTimeCandidate {
                datetime,
                holes: 18,
                players_available: players,
                price,
            },
            datetime - Duration::days(1),
        )
    }

    async fn test_app() -> Router {
        let store = MemoryStore::new();
        let courses = store
            .seed_courses(&[new_course("bonneville", "salt_lake"), new_course("soldier-hollow", "wasatch")])
            .await
            .unwrap();
        store
            .upsert_tee_times(&[
                // 08:00, 12:00 and 15:00 MDT
                row(courses[0].id, 14, 4, Some(38.0)),
                row(courses[0].id, 18, 2, None),
                row(courses[1].id, 21, 3, Some(55.0)),
            ])
            .await
            .unwrap();
        app(AppState::new(Arc::new(store)))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = get_json(test_app().await, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn tee_times_are_ordered_and_joined_with_course() {
        let (status, body) = get_json(test_app().await, "/tee-times?date=2035-07-15").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);
        let first = &body["tee_times"][0];
        assert_eq!(first["datetime"], "2035-07-15T14:00:00Z");
        assert_eq!(first["local_time"], "08:00");
        assert_eq!(first["course"]["name"], "bonneville");
        assert_eq!(body["tee_times"][2]["course"]["county"], "wasatch");
    }

    #[tokio::test]
    async fn tee_time_filters_combine() {
        let app = test_app().await;
        let (_, by_price) = get_json(app.clone(), "/tee-times?date=2035-07-15&max_price=40").await;
        assert_eq!(by_price["count"], 1);
        assert_eq!(by_price["tee_times"][0]["price"], 38.0);

        let (_, by_window) =
            get_json(app.clone(), "/tee-times?date=2035-07-15&time_from=11:00&time_to=15:00").await;
        assert_eq!(by_window["count"], 2);

        let (_, by_county) = get_json(app.clone(), "/tee-times?date=2035-07-15&county=Wasatch&players=3").await;
        assert_eq!(by_county["count"], 1);

        let (_, limited) = get_json(app, "/tee-times?date=2035-07-15&limit=1").await;
        assert_eq!(limited["count"], 1);
        assert_eq!(limited["tee_times"][0]["local_time"], "08:00");
    }

    #[tokio::test]
    async fn invalid_parameters_return_json_400() {
        let app = test_app().await;
        for uri in [
            "/tee-times?date=07-15-2035",
            "/tee-times?players=9",
            "/tee-times?max_price=cheap",
            "/tee-times?time_from=8am",
            "/tee-times?time_from=15:00&time_to=09:00",
        ] {
            let (status, body) = get_json(app.clone(), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body["error"].is_string(), "{uri}");
        }
    }

    #[tokio::test]
    async fn courses_and_counties_list_active_rows() {
        let app = test_app().await;
        let (_, counties) = get_json(app.clone(), "/counties").await;
        assert_eq!(counties["counties"], json!(["salt_lake", "wasatch"]));

        let (_, courses) = get_json(app, "/courses?county=salt_lake").await;
        let courses = courses["courses"].as_array().unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0]["booking_platform"], "chronogolf");
    }

    #[test]
    fn default_date_is_mountain_today() {
        // 04:00 UTC on the 16th is still the 15th in Utah
        let now = Utc.with_ymd_and_hms(2026, 7, 16, 4, 0, 0).unwrap();
        let search = TeeTimeQuery::default().into_search(now).unwrap();
        assert_eq!(search.date, NaiveDate::from_ymd_opt(2026, 7, 15).unwrap());
        assert_eq!(search.min_players, 1);
    }
}
