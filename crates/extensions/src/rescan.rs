//! Batch paths driven by student-records roster snapshots: a newly created
//! mapping, newly enrolled students and administrator re-scans.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use gradepush_core::activity::ExtensionFamily;
use gradepush_core::normalizer::{normalize_entity, ExtensionUpdate, NormalizedEvent};
use gradepush_core::scan::{ExtensionScope, ScanRequest};
use gradepush_core::types::DbId;
use gradepush_db::models::enrolment_event::EnrolmentEvent;
use gradepush_db::models::mapping::AssessmentMapping;
use serde::Serialize;

use crate::applier::ApplyReport;
use crate::engine::ExtensionEngine;
use crate::error::ExtensionError;
use crate::lms::CourseDirectory;
use crate::records::{StudentRecord, StudentRecordsApi};
use crate::store::ExtensionStore;

// ---------------------------------------------------------------------------
// Configuration and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RescanConfig {
    /// Mappings per full-scan batch.
    pub scan_batch_size: i64,
    /// Enrolment events per run.
    pub enrolment_batch_size: i64,
    /// Runs an enrolment event may stay unresolved before it is dropped.
    pub enrolment_max_attempts: i32,
    /// Seconds an unresolved enrolment event waits before the next run
    /// looks for it again.
    pub enrolment_retry_secs: i64,
    /// Attempts per roster request.
    pub api_attempts: u32,
}

impl Default for RescanConfig {
    fn default() -> Self {
        Self {
            scan_batch_size: 100,
            enrolment_batch_size: 500,
            enrolment_max_attempts: 3,
            enrolment_retry_secs: 3600,
            api_attempts: 3,
        }
    }
}

/// Result of replaying one mapping's roster.
#[derive(Debug, Clone, Default)]
pub struct MappingScan {
    pub report: ApplyReport,
    /// Enrolled LMS users found on the roster.
    pub found_users: HashSet<DbId>,
}

/// One page of a full re-scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanBatch {
    pub processed: usize,
    pub report: ApplyReport,
    /// Id of the last mapping processed, or `None` when the scan is done.
    pub next_cursor: Option<DbId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrolmentRun {
    pub events: usize,
    pub resolved: usize,
    pub retried: usize,
    pub dropped: usize,
    /// Events for courses without extension mappings.
    pub discarded: usize,
    /// Events left untouched because a roster in their course failed.
    pub deferred: usize,
    pub report: ApplyReport,
}

// ---------------------------------------------------------------------------
// Rescanner
// ---------------------------------------------------------------------------

pub struct Rescanner {
    store: Arc<dyn ExtensionStore>,
    directory: Arc<dyn CourseDirectory>,
    records: Arc<dyn StudentRecordsApi>,
    engine: Arc<ExtensionEngine>,
    config: RescanConfig,
}

impl Rescanner {
    pub fn new(
        store: Arc<dyn ExtensionStore>,
        directory: Arc<dyn CourseDirectory>,
        records: Arc<dyn StudentRecordsApi>,
        engine: Arc<ExtensionEngine>,
        config: RescanConfig,
    ) -> Self {
        Self {
            store,
            directory,
            records,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &RescanConfig {
        &self.config
    }

    /// Updates carried by one roster entry that fall inside `scope` and
    /// concern the mapping's component.
    fn student_updates(
        mapping: &AssessmentMapping,
        student: &StudentRecord,
        scope: ExtensionScope,
        report: &mut ApplyReport,
    ) -> Vec<ExtensionUpdate> {
        let mut entities = Vec::new();
        if scope.includes(ExtensionFamily::Raa) {
            entities.extend(student.accommodation.iter());
        }
        if scope.includes(ExtensionFamily::Ec) {
            entities.extend(student.extenuating_circumstances.iter());
        }

        let component = mapping.component();
        let mut updates = Vec::new();
        for entity in entities {
            match normalize_entity(entity) {
                Ok(NormalizedEvent::Update(update)) => {
                    let relevant = match &update {
                        ExtensionUpdate::EcGrant(g) => g.component == component,
                        ExtensionUpdate::Withdrawal(w) => {
                            w.component.as_ref().map_or(true, |c| *c == component)
                        }
                        _ => true,
                    };
                    if relevant && scope.includes(update.family()) {
                        updates.push(update);
                    }
                }
                Ok(NormalizedEvent::Ignored { reason }) => {
                    tracing::debug!(
                        student_code = %student.student_code,
                        mapping_id = mapping.id,
                        reason = %reason,
                        "Roster entry ignored",
                    );
                }
                Err(e) => report.fail(mapping, &ExtensionError::from(e)),
            }
        }
        updates
    }

    /// Replay the fresh roster of one mapping's component onto the mapping.
    ///
    /// With `only_users`, students outside the set are skipped.
    pub async fn process_mapping(
        &self,
        mapping: &AssessmentMapping,
        scope: ExtensionScope,
        only_users: Option<&HashSet<DbId>>,
    ) -> Result<MappingScan, ExtensionError> {
        let roster = self
            .records
            .get_students_for_component(&mapping.component(), true, self.config.api_attempts)
            .await?;
        let tiers = if scope.includes(ExtensionFamily::Raa) {
            self.engine.tiers_for(ExtensionFamily::Raa).await?
        } else {
            Default::default()
        };

        let mut scan = MappingScan::default();
        for student in &roster {
            let user_id = match student.moodle_user_id {
                Some(id) => id,
                None => match self
                    .directory
                    .find_user_by_student_code(&student.student_code)
                    .await?
                {
                    Some(user) => user.id,
                    None => {
                        tracing::debug!(student_code = %student.student_code, "Roster student has no LMS user");
                        continue;
                    }
                },
            };
            if only_users.is_some_and(|only| !only.contains(&user_id)) {
                continue;
            }
            if !self.directory.is_enrolled(mapping.course_id, user_id).await? {
                continue;
            }
            scan.found_users.insert(user_id);

            for update in Self::student_updates(mapping, student, scope, &mut scan.report) {
                match self
                    .engine
                    .apply_to_mapping(mapping, user_id, &update, &tiers)
                    .await
                {
                    Ok(outcome) => scan.report.record(outcome),
                    Err(e) => scan.report.fail(mapping, &e),
                }
            }
        }

        tracing::info!(
            mapping_id = mapping.id,
            course_id = mapping.course_id,
            scope = %scope,
            roster = roster.len(),
            students = scan.found_users.len(),
            applied = scan.report.applied,
            failed = scan.report.failures.len(),
            "Mapping roster processed",
        );
        Ok(scan)
    }

    /// Apply both families for every enrolled student on a new mapping.
    pub async fn process_new_mapping(&self, mapping_id: DbId) -> Result<ApplyReport, ExtensionError> {
        let mapping = self
            .store
            .get_mapping(mapping_id)
            .await?
            .ok_or_else(|| ExtensionError::not_found("assessment_mapping", mapping_id))?;
        if !mapping.accepts_extensions() {
            tracing::info!(mapping_id, "Mapping does not accept extensions; nothing to do");
            return Ok(ApplyReport::default());
        }
        Ok(self
            .process_mapping(&mapping, ExtensionScope::Both, None)
            .await?
            .report)
    }

    /// Resolve a batch of due enrolment events.
    ///
    /// Events of a course where any mapping's roster could not be replayed
    /// are left as they are for the next run.
    pub async fn process_enrolments(&self) -> Result<EnrolmentRun, ExtensionError> {
        let events = self
            .store
            .pending_enrolments(
                self.config.enrolment_batch_size,
                self.config.enrolment_retry_secs,
            )
            .await?;
        let mut run = EnrolmentRun {
            events: events.len(),
            ..Default::default()
        };

        let mut by_course: BTreeMap<DbId, Vec<EnrolmentEvent>> = BTreeMap::new();
        for event in events {
            by_course.entry(event.course_id).or_default().push(event);
        }

        for (course_id, events) in by_course {
            let mappings: Vec<_> = self
                .store
                .mappings_for_courses(&[course_id])
                .await?
                .into_iter()
                .filter(AssessmentMapping::accepts_extensions)
                .collect();

            if mappings.is_empty() {
                let ids: Vec<DbId> = events.iter().map(|e| e.id).collect();
                self.store.delete_enrolments(&ids).await?;
                run.discarded += ids.len();
                tracing::debug!(course_id, events = ids.len(), "No extension mappings in course");
                continue;
            }

            let pending: HashSet<DbId> = events.iter().map(|e| e.user_id).collect();
            let mut found = HashSet::new();
            let mut incomplete = false;
            for mapping in &mappings {
                match self
                    .process_mapping(mapping, ExtensionScope::Both, Some(&pending))
                    .await
                {
                    Ok(scan) => {
                        run.report.merge(scan.report);
                        found.extend(scan.found_users);
                    }
                    Err(e) => {
                        run.report.fail(mapping, &e);
                        incomplete = true;
                    }
                }
            }

            if incomplete {
                tracing::warn!(
                    course_id,
                    events = events.len(),
                    "Course roster incomplete; enrolment events kept for the next run",
                );
                run.deferred += events.len();
                continue;
            }

            let (resolved, unresolved): (Vec<_>, Vec<_>) =
                events.iter().partition(|e| found.contains(&e.user_id));
            let (expired, retry): (Vec<_>, Vec<_>) = unresolved
                .into_iter()
                .partition(|e| e.attempts + 1 >= self.config.enrolment_max_attempts);

            let done: Vec<DbId> = resolved.iter().map(|e| e.id).collect();
            if !done.is_empty() {
                self.store.delete_enrolments(&done).await?;
            }
            if !expired.is_empty() {
                for event in &expired {
                    tracing::warn!(
                        course_id,
                        user_id = event.user_id,
                        attempts = event.attempts + 1,
                        "Enrolled user never appeared on a roster; dropping event",
                    );
                }
                let ids: Vec<DbId> = expired.iter().map(|e| e.id).collect();
                self.store.delete_enrolments(&ids).await?;
            }
            if !retry.is_empty() {
                let ids: Vec<DbId> = retry.iter().map(|e| e.id).collect();
                self.store.bump_enrolment_attempts(&ids).await?;
            }

            run.resolved += done.len();
            run.dropped += expired.len();
            run.retried += retry.len();
        }

        if run.events > 0 {
            tracing::info!(
                events = run.events,
                resolved = run.resolved,
                retried = run.retried,
                dropped = run.dropped,
                discarded = run.discarded,
                deferred = run.deferred,
                "Enrolment events processed",
            );
        }
        Ok(run)
    }

    /// Process the next page of a full re-scan after `cursor`.
    pub async fn scan_batch(
        &self,
        request: &ScanRequest,
        cursor: DbId,
    ) -> Result<ScanBatch, ExtensionError> {
        let limit = self.config.scan_batch_size.max(1);
        let page = self
            .store
            .mapping_page(request.course_filter(), cursor, limit)
            .await?;

        let mut report = ApplyReport::default();
        for mapping in &page {
            match self.process_mapping(mapping, request.scope, None).await {
                Ok(scan) => report.merge(scan.report),
                Err(e) => report.fail(mapping, &e),
            }
        }

        let next_cursor = if (page.len() as i64) < limit {
            None
        } else {
            page.last().map(|m| m.id)
        };
        Ok(ScanBatch {
            processed: page.len(),
            report,
            next_cursor,
        })
    }
}
