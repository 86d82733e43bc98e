use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teetime_core::{
    Course, CourseSummary, NewCourse, ScraperRun, TeeTime, TeeTimeListing, TeeTimeSearch,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{dedupe_by_datetime, StoreError, TeeTimeStore};

#[derive(Debug, Default)]
struct MemoryState {
    courses: Vec<Course>,
    tee_times: BTreeMap<(Uuid, DateTime<Utc>), TeeTime>,
    runs: Vec<ScraperRun>,
    rejected_writes: HashSet<Uuid>,
}

/// In-process store with the same semantics as [`crate::PgStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent tee-time upsert for `course_id` fail.
    pub async fn reject_writes_for(&self, course_id: Uuid) {
        self.state.lock().await.rejected_writes.insert(course_id);
    }

    pub async fn tee_times(&self) -> Vec<TeeTime> {
        self.state.lock().await.tee_times.values().cloned().collect()
    }

    pub async fn runs(&self) -> Vec<ScraperRun> {
        self.state.lock().await.runs.clone()
    }
}

fn sorted_active(courses: &[Course], county: Option<&str>) -> Vec<Course> {
    let mut out: Vec<Course> = courses
        .iter()
        .filter(|c| c.active)
        .filter(|c| county.map_or(true, |wanted| c.county.eq_ignore_ascii_case(wanted)))
        .cloned()
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

#[async_trait]
impl TeeTimeStore for MemoryStore {
    async fn active_courses(&self) -> Result<Vec<Course>, StoreError> {
        Ok(sorted_active(&self.state.lock().await.courses, None))
    }

    async fn list_courses(&self, county: Option<&str>) -> Result<Vec<Course>, StoreError> {
        Ok(sorted_active(&self.state.lock().await.courses, county))
    }

    async fn counties(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        let mut counties: Vec<String> = state
            .courses
            .iter()
            .filter(|c| c.active)
            .map(|c| c.county.clone())
            .collect();
        counties.sort();
        counties.dedup();
        Ok(counties)
    }

    async fn seed_courses(&self, courses: &[NewCourse]) -> Result<Vec<Course>, StoreError> {
        let mut state = self.state.lock().await;
        let mut inserted = Vec::new();
        for new in courses {
            if state.courses.iter().any(|c| c.booking_url == new.booking_url) {
                continue;
            }
            let course = Course {
                id: Uuid::new_v4(),
                name: new.name.clone(),
                city: new.city.clone(),
                county: new.county.clone(),
                holes: new.holes,
                booking_url: new.booking_url.clone(),
                booking_platform: new.booking_platform,
                active: new.active,
            };
            state.courses.push(course.clone());
            inserted.push(course);
        }
        Ok(inserted)
    }

    async fn set_course_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let course = state
            .courses
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::CourseNotFound(id))?;
        course.active = active;
        Ok(())
    }

    async fn upsert_tee_times(&self, rows: &[TeeTime]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let rows = dedupe_by_datetime(rows);
        for row in &rows {
            if state.rejected_writes.contains(&row.course_id) {
                return Err(StoreError::WriteRejected(row.course_id));
            }
            if !state.courses.iter().any(|c| c.id == row.course_id) {
                return Err(StoreError::UnknownCourse(row.course_id));
            }
        }
        for row in &rows {
            state
                .tee_times
                .insert((row.course_id, row.datetime), row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn record_run(&self, run: &ScraperRun) -> Result<(), StoreError> {
        self.state.lock().await.runs.push(run.clone());
        Ok(())
    }

    async fn search_tee_times(
        &self,
        search: &TeeTimeSearch,
        now: DateTime<Utc>,
    ) -> Result<Vec<TeeTimeListing>, StoreError> {
        let state = self.state.lock().await;
        let mut listings: Vec<TeeTimeListing> = state
            .tee_times
            .values()
            .filter_map(|tee_time| {
                let course = state
                    .courses
                    .iter()
                    .find(|c| c.id == tee_time.course_id && c.active)?;
                Some(TeeTimeListing {
                    tee_time: tee_time.clone(),
                    course: CourseSummary::from(course),
                })
            })
            .filter(|listing| search.matches(listing, now))
            .collect();
        listings.sort_by_key(|l| l.tee_time.datetime);
        if let Some(limit) = search.limit {
            listings.truncate(limit);
        }
        Ok(listings)
    }
}
