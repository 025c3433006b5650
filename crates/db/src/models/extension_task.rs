//! Deferred extension task rows (scan, new mapping, enrolments).

use std::fmt;

use gradepush_core::scan::{ExtensionScope, ScanRequest};
use gradepush_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{StatusId, TaskStatus};

/// What a deferred task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Cursor-driven re-scan of extension-enabled mappings.
    Scan,
    /// Apply existing extensions to a freshly created mapping.
    NewMapping,
    /// Apply extensions to users from pending enrolment events.
    Enrolments,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Scan => "scan",
            TaskKind::NewMapping => "new_mapping",
            TaskKind::Enrolments => "enrolments",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scan" => Some(TaskKind::Scan),
            "new_mapping" => Some(TaskKind::NewMapping),
            "enrolments" => Some(TaskKind::Enrolments),
            _ => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row from the `extension_tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExtensionTask {
    pub id: DbId,
    pub task_kind: String,
    /// `0` means every course.
    pub course_id: DbId,
    pub mapping_id: Option<DbId>,
    pub extension_scope: String,
    /// Resume point for scans: mappings with a greater id are still to do.
    pub last_mapping_id: DbId,
    pub status_id: StatusId,
    pub attempts: i32,
    pub claimed_by: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ExtensionTask {
    pub fn kind(&self) -> Option<TaskKind> {
        TaskKind::parse(&self.task_kind)
    }

    pub fn status(&self) -> Option<TaskStatus> {
        TaskStatus::from_id(self.status_id)
    }

    /// The scan request this task represents, if it is a well-formed scan.
    pub fn scan_request(&self) -> Option<ScanRequest> {
        let scope = ExtensionScope::parse(&self.extension_scope).ok()?;
        ScanRequest::new(self.course_id, scope).ok()
    }
}

/// DTO for queueing a task.
#[derive(Debug, Clone)]
pub struct CreateExtensionTask {
    pub task_kind: TaskKind,
    pub course_id: DbId,
    pub mapping_id: Option<DbId>,
    pub extension_scope: ExtensionScope,
}

impl CreateExtensionTask {
    pub fn scan(request: &ScanRequest) -> Self {
        Self {
            task_kind: TaskKind::Scan,
            course_id: request.course_id,
            mapping_id: None,
            extension_scope: request.scope,
        }
    }

    pub fn new_mapping(course_id: DbId, mapping_id: DbId) -> Self {
        Self {
            task_kind: TaskKind::NewMapping,
            course_id,
            mapping_id: Some(mapping_id),
            extension_scope: ExtensionScope::Both,
        }
    }

    pub fn enrolments() -> Self {
        Self {
            task_kind: TaskKind::Enrolments,
            course_id: 0,
            mapping_id: None,
            extension_scope: ExtensionScope::Both,
        }
    }
}

/// Result of queueing a scan under the scan-queue lock.
#[derive(Debug, Clone)]
pub enum ScanQueued {
    Created(ExtensionTask),
    /// A pending or running scan already covers the request.
    Covered(ScanRequest),
}
