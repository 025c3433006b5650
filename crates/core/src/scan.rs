//! Extension re-scan requests and overlap detection.
//!
//! A scan is scoped by course (`0` = every course) and by extension family
//! (`raa`, `ec` or `both`). A new request is rejected while a queued scan
//! already covers it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::activity::ExtensionFamily;
use crate::error::CoreError;
use crate::types::DbId;

/// Course id meaning "all courses".
pub const ALL_COURSES: DbId = 0;

/// Which extension families a scan processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionScope {
    Raa,
    Ec,
    Both,
}

impl ExtensionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionScope::Raa => "raa",
            ExtensionScope::Ec => "ec",
            ExtensionScope::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raa" | "sora" => Ok(ExtensionScope::Raa),
            "ec" => Ok(ExtensionScope::Ec),
            "both" | "all" => Ok(ExtensionScope::Both),
            other => Err(CoreError::Validation(format!(
                "Unknown extension type '{other}' (expected raa, ec or both)"
            ))),
        }
    }

    pub fn includes(&self, family: ExtensionFamily) -> bool {
        match self {
            ExtensionScope::Both => true,
            ExtensionScope::Raa => family == ExtensionFamily::Raa,
            ExtensionScope::Ec => family == ExtensionFamily::Ec,
        }
    }

    /// Whether this scope processes at least everything `other` does.
    pub fn covers(&self, other: ExtensionScope) -> bool {
        *self == ExtensionScope::Both || *self == other
    }
}

impl fmt::Display for ExtensionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An administrator-initiated re-scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Course to scan, or [`ALL_COURSES`].
    pub course_id: DbId,
    pub scope: ExtensionScope,
}

impl ScanRequest {
    pub fn new(course_id: DbId, scope: ExtensionScope) -> Result<Self, CoreError> {
        if course_id < 0 {
            return Err(CoreError::Validation(format!(
                "course_id must be 0 (all courses) or a course id, got {course_id}"
            )));
        }
        Ok(Self { course_id, scope })
    }

    pub fn is_all_courses(&self) -> bool {
        self.course_id == ALL_COURSES
    }

    /// Course filter for mapping queries: `None` scans every course.
    pub fn course_filter(&self) -> Option<DbId> {
        (!self.is_all_courses()).then_some(self.course_id)
    }

    /// Whether this (queued) scan already does all the work of `other`:
    /// same or broader course scope AND same or broader family scope.
    pub fn covers(&self, other: &ScanRequest) -> bool {
        let course_covered = self.is_all_courses() || self.course_id == other.course_id;
        course_covered && self.scope.covers(other.scope)
    }
}

/// The first of the `queued` scans that covers `requested`.
pub fn find_covering<'a>(
    queued: &'a [ScanRequest],
    requested: &ScanRequest,
) -> Option<&'a ScanRequest> {
    queued.iter().find(|q| q.covers(requested))
}

/// Rejection for a request covered by the queued scan `existing`.
pub fn covered_by(existing: &ScanRequest) -> CoreError {
    CoreError::Conflict(format!(
        "An extension scan covering course {} ({}) is already queued",
        if existing.is_all_courses() {
            "all".to_string()
        } else {
            existing.course_id.to_string()
        },
        existing.scope
    ))
}
