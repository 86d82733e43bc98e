//! Static course configuration and its mapping onto seeded store rows.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use strsim::jaro_winkler;
use teetime_core::{is_valid_holes, Course, CourseConfig, NewCourse};
use uuid::Uuid;

use crate::config::ConfigError;

/// Seeded URLs at least this similar to an unmatched config URL are offered as a hint.
pub const NEAR_MISS_THRESHOLD: f64 = 0.9;

#[derive(Debug, Deserialize)]
struct CoursesFile {
    courses: Vec<CourseConfig>,
}

#[derive(Debug, Clone)]
pub struct CourseRegistry {
    courses: Vec<CourseConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCourse {
    pub id: Uuid,
    pub config: CourseConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnmatchedCourse {
    pub key: String,
    pub booking_url: String,
    pub near_miss: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub matched: Vec<ResolvedCourse>,
    pub unmatched: Vec<UnmatchedCourse>,
}

impl CourseRegistry {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadCourses {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text, &path.display().to_string())
    }

    pub fn from_yaml_str(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        let file: CoursesFile = serde_yaml::from_str(yaml).map_err(|source| ConfigError::ParseCourses {
            origin: origin.to_string(),
            source,
        })?;
        Self::from_courses(file.courses)
    }

    pub fn from_courses(courses: Vec<CourseConfig>) -> Result<Self, ConfigError> {
        let mut keys = HashSet::new();
        let mut urls = HashSet::new();
        for course in &courses {
            let invalid = |reason: String| ConfigError::InvalidCourse {
                key: course.key.clone(),
                reason,
            };
            if course.key.trim().is_empty() || course.name.trim().is_empty() {
                return Err(invalid("key and name must be non-empty".into()));
            }
            if course.county.trim().is_empty() {
                return Err(invalid("county must be non-empty".into()));
            }
            if !is_valid_holes(course.holes) {
                return Err(invalid(format!("unsupported hole count {}", course.holes)));
            }
            if !keys.insert(course.key.as_str()) {
                return Err(invalid("duplicate key".into()));
            }
            if !urls.insert(course.booking_url.as_str()) {
                return Err(invalid(format!("duplicate booking_url {}", course.booking_url)));
            }
        }
        Ok(Self { courses })
    }

    pub fn courses(&self) -> &[CourseConfig] {
        &self.courses
    }

    pub fn len(&self) -> usize {
        self.courses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }

    /// Rows for the explicit seeding operation.
    pub fn new_courses(&self) -> Vec<NewCourse> {
        self.courses.iter().map(CourseConfig::to_new_course).collect()
    }

    /// Attach durable ids by booking URL. Never creates courses.
    pub fn resolve(&self, seeded: &[Course]) -> Resolution {
        let by_url: HashMap<&str, &Course> = seeded
            .iter()
            .map(|course| (course.booking_url.as_str(), course))
            .collect();

        let mut resolution = Resolution::default();
        for config in &self.courses {
            match by_url.get(config.booking_url.as_str()) {
                Some(course) => resolution.matched.push(ResolvedCourse {
                    id: course.id,
                    config: config.clone(),
                }),
                None => resolution.unmatched.push(UnmatchedCourse {
                    key: config.key.clone(),
                    booking_url: config.booking_url.clone(),
                    near_miss: nearest_url(&config.booking_url, seeded),
                }),
            }
        }
        resolution
    }
}

fn nearest_url(url: &str, seeded: &[Course]) -> Option<String> {
    seeded
        .iter()
        .map(|course| (jaro_winkler(url, &course.booking_url), &course.booking_url))
        .filter(|(score, _)| *score >= NEAR_MISS_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, url)| url.clone())
}
