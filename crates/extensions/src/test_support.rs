//! In-memory collaborators and a harness wiring them into the engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use gradepush_core::activity::{ActivityType, ComponentRef, ExtensionFamily, OverrideSubject};
use gradepush_core::provision::{ExtensionKind, TierEntry, TierTable};
use gradepush_core::scan::{find_covering, ScanRequest};
use gradepush_core::schedule::{ActivitySchedule, ScheduleOverride};
use gradepush_core::types::{DbId, Timestamp};
use gradepush_db::models::enrolment_event::EnrolmentEvent;
use gradepush_db::models::extension_task::{
    CreateExtensionTask, ExtensionTask, ScanQueued, TaskKind,
};
use gradepush_db::models::mapping::{AssessmentMapping, RegisterMapping};
use gradepush_db::models::override_record::{CreateExtensionOverride, ExtensionOverride};
use gradepush_db::models::processed_message::{ProcessedMessage, RecordMessageOutcome};
use gradepush_db::models::status::{MessageStatus, TaskStatus};

use crate::applier::ExtensionApplier;
use crate::clock::FixedClock;
use crate::engine::ExtensionEngine;
use crate::lms::{
    ActivityOverride, ActivityRegistry, ActivityStore, CourseDirectory, LmsError, LmsGroup,
    LmsUser,
};
use crate::queue::{MessageQueue, QueueError, QueueMessage};
use crate::records::{RecordsApiError, StudentRecord, StudentRecordsApi};
use crate::rescan::{RescanConfig, Rescanner};
use crate::resolver::MappingResolver;
use crate::store::{ExtensionStore, StoreError};
use crate::tasks::TaskRunner;

pub const STUDENT_CODE: &str = "12345678";

const ACTOR: &str = "test-worker";

pub fn at(s: &str) -> Timestamp {
    chrono::DateTime::parse_from_rfc3339(s)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn mapping_row(
    id: DbId,
    course_id: DbId,
    activity_type: &str,
    activity_instance_id: DbId,
    map_code: &str,
    mab_seq: &str,
) -> AssessmentMapping {
    let now = at("2025-01-15T09:00:00Z");
    AssessmentMapping {
        id,
        course_id,
        component_grade_id: id,
        activity_type: activity_type.to_string(),
        activity_instance_id,
        extension_enabled: true,
        deleted_at: None,
        map_code: map_code.to_string(),
        mab_seq: mab_seq.to_string(),
        assessment_type: None,
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    next_id: DbId,
    mappings: Vec<AssessmentMapping>,
    /// Component grade ids by `(map_code, mab_seq)`.
    components: HashMap<(String, String), DbId>,
    overrides: Vec<ExtensionOverride>,
    withdrawals: HashSet<(ExtensionFamily, String)>,
    tiers: Vec<TierEntry>,
    messages: Vec<ProcessedMessage>,
    enrolments: Vec<EnrolmentEvent>,
    tasks: Vec<ExtensionTask>,
    fail_ledger: bool,
    override_insert_failures: u32,
    override_update_failures: u32,
}

impl StoreState {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn ledger(&self) -> Result<(), StoreError> {
        if self.fail_ledger {
            return Err(StoreError::Unavailable("ledger offline".into()));
        }
        Ok(())
    }

    fn push_task(&mut self, input: &CreateExtensionTask) -> ExtensionTask {
        let now = Utc::now();
        let task = ExtensionTask {
            id: self.next_id(),
            task_kind: input.task_kind.as_str().to_string(),
            course_id: input.course_id,
            mapping_id: input.mapping_id,
            extension_scope: input.extension_scope.as_str().to_string(),
            last_mapping_id: 0,
            status_id: TaskStatus::Pending.id(),
            attempts: 0,
            claimed_by: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.tasks.push(task.clone());
        task
    }
}

fn countdown(remaining: &mut u32) -> Result<(), StoreError> {
    if *remaining > 0 {
        *remaining -= 1;
        return Err(StoreError::Unavailable("override ledger offline".into()));
    }
    Ok(())
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn insert_mapping(
        &self,
        course_id: DbId,
        activity_type: &str,
        instance_id: DbId,
        map_code: &str,
        mab_seq: &str,
    ) -> AssessmentMapping {
        let mut state = self.state();
        let id = state.next_id();
        let mapping = mapping_row(id, course_id, activity_type, instance_id, map_code, mab_seq);
        state.mappings.push(mapping.clone());
        mapping
    }

    pub fn set_enabled(&self, id: DbId, enabled: bool) -> AssessmentMapping {
        let mut state = self.state();
        let mapping = state.mappings.iter_mut().find(|m| m.id == id).unwrap();
        mapping.extension_enabled = enabled;
        mapping.clone()
    }

    /// Any mapping, deleted or not.
    pub fn mapping(&self, id: DbId) -> Option<AssessmentMapping> {
        self.state().mappings.iter().find(|m| m.id == id).cloned()
    }

    pub fn remove_mapping(&self, id: DbId) {
        self.state().mappings.retain(|m| m.id != id);
    }

    pub fn active_rows(&self, mapping_id: DbId) -> Vec<ExtensionOverride> {
        self.state()
            .overrides
            .iter()
            .filter(|o| o.mapping_id == mapping_id && o.is_active())
            .cloned()
            .collect()
    }

    pub fn tombstone(&self, family: ExtensionFamily, source_record_id: &str) {
        self.state()
            .withdrawals
            .insert((family, source_record_id.to_string()));
    }

    pub fn add_tier(&self, entry: TierEntry) {
        self.state().tiers.push(entry);
    }

    pub fn message(&self, queue_name: &str, message_id: &str) -> Option<ProcessedMessage> {
        self.state()
            .messages
            .iter()
            .find(|m| m.queue_name == queue_name && m.message_id == message_id)
            .cloned()
    }

    pub fn set_fail_ledger(&self, fail: bool) {
        self.state().fail_ledger = fail;
    }

    /// Fail the next `count` override-ledger inserts.
    pub fn fail_override_inserts(&self, count: u32) {
        self.state().override_insert_failures = count;
    }

    /// Fail the next `count` in-place override-ledger updates.
    pub fn fail_override_updates(&self, count: u32) {
        self.state().override_update_failures = count;
    }

    pub fn seed_enrolment(&self, course_id: DbId, user_id: DbId, attempts: i32) {
        let mut state = self.state();
        let id = state.next_id();
        let now = Utc::now();
        state.enrolments.push(EnrolmentEvent {
            id,
            course_id,
            user_id,
            attempts,
            last_attempt_at: None,
            created_at: now,
            updated_at: now,
        });
    }

    /// Move every enrolment's last attempt `secs` further into the past.
    pub fn age_enrolments(&self, secs: i64) {
        for event in self.state().enrolments.iter_mut() {
            event.last_attempt_at = event.last_attempt_at.map(|t| t - Duration::seconds(secs));
        }
    }

    pub fn enrolments(&self) -> Vec<EnrolmentEvent> {
        self.state().enrolments.clone()
    }

    pub fn tasks(&self) -> Vec<ExtensionTask> {
        self.state().tasks.clone()
    }

    pub fn task(&self, id: DbId) -> Option<ExtensionTask> {
        self.state().tasks.iter().find(|t| t.id == id).cloned()
    }
}

fn is_live(m: &AssessmentMapping) -> bool {
    m.extension_enabled && m.deleted_at.is_none()
}

fn same_subject(row: &ExtensionOverride, subject: OverrideSubject) -> bool {
    row.subject() == Some(subject)
}

#[async_trait]
impl ExtensionStore for MemoryStore {
    async fn get_mapping(&self, id: DbId) -> Result<Option<AssessmentMapping>, StoreError> {
        Ok(self
            .state()
            .mappings
            .iter()
            .find(|m| m.id == id && m.deleted_at.is_none())
            .cloned())
    }

    async fn mappings_for_component(
        &self,
        component: &ComponentRef,
    ) -> Result<Vec<AssessmentMapping>, StoreError> {
        Ok(self
            .state()
            .mappings
            .iter()
            .filter(|m| is_live(m) && m.component() == *component)
            .cloned()
            .collect())
    }

    async fn mappings_for_courses(
        &self,
        course_ids: &[DbId],
    ) -> Result<Vec<AssessmentMapping>, StoreError> {
        Ok(self
            .state()
            .mappings
            .iter()
            .filter(|m| is_live(m) && course_ids.contains(&m.course_id))
            .cloned()
            .collect())
    }

    async fn mapping_page(
        &self,
        course_id: Option<DbId>,
        after_id: DbId,
        limit: i64,
    ) -> Result<Vec<AssessmentMapping>, StoreError> {
        let mut page: Vec<_> = self
            .state()
            .mappings
            .iter()
            .filter(|m| is_live(m) && m.id > after_id)
            .filter(|m| course_id.map_or(true, |c| m.course_id == c))
            .cloned()
            .collect();
        page.sort_by_key(|m| m.id);
        page.truncate(limit as usize);
        Ok(page)
    }

    async fn soft_delete_mapping(&self, id: DbId) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state
            .mappings
            .iter_mut()
            .find(|m| m.id == id && m.deleted_at.is_none())
        {
            Some(m) => {
                m.deleted_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_mapping(&self, input: &RegisterMapping) -> Result<AssessmentMapping, StoreError> {
        let mut state = self.state();
        let component = &input.component;
        let key = (component.map_code.clone(), component.mab_seq.clone());
        let component_grade_id = match state.components.get(&key).copied() {
            Some(id) => id,
            None => {
                let id = state.next_id();
                state.components.insert(key, id);
                id
            }
        };
        for m in state
            .mappings
            .iter_mut()
            .filter(|m| m.component_grade_id == component_grade_id)
        {
            m.assessment_type = component.assessment_type.clone();
        }

        let id = state.next_id();
        let mapping = AssessmentMapping {
            component_grade_id,
            assessment_type: component.assessment_type.clone(),
            extension_enabled: input.extension_enabled.unwrap_or(true),
            ..mapping_row(
                id,
                input.course_id,
                &input.activity_type,
                input.activity_instance_id,
                &component.map_code,
                &component.mab_seq,
            )
        };
        state.mappings.push(mapping.clone());
        Ok(mapping)
    }

    async fn find_active_override(
        &self,
        mapping_id: DbId,
        subject: OverrideSubject,
        family: ExtensionFamily,
    ) -> Result<Option<ExtensionOverride>, StoreError> {
        Ok(self
            .state()
            .overrides
            .iter()
            .find(|o| {
                o.mapping_id == mapping_id
                    && o.is_active()
                    && same_subject(o, subject)
                    && o.extension_type == family.as_str()
            })
            .cloned())
    }

    async fn active_overrides(&self, mapping_id: DbId) -> Result<Vec<ExtensionOverride>, StoreError> {
        Ok(self.active_rows(mapping_id))
    }

    async fn upsert_override(
        &self,
        input: &CreateExtensionOverride,
    ) -> Result<ExtensionOverride, StoreError> {
        let mut state = self.state();
        countdown(&mut state.override_insert_failures)?;
        if let Some(row) = state.overrides.iter_mut().find(|o| {
            o.mapping_id == input.mapping_id
                && o.is_active()
                && same_subject(o, input.subject)
                && o.extension_type == input.extension_type.as_str()
        }) {
            row.override_id = input.override_id.or(row.override_id);
            row.source_record_id = input.source_record_id.clone();
            return Ok(row.clone());
        }

        let id = state.next_id();
        let now = Utc::now();
        let row = ExtensionOverride {
            id,
            mapping_id: input.mapping_id,
            activity_type: input.activity_type.as_str().to_string(),
            activity_instance_id: input.activity_instance_id,
            user_id: input.subject.user_id(),
            group_id: input.subject.group_id(),
            extension_type: input.extension_type.as_str().to_string(),
            override_id: input.override_id,
            backup: input.backup.clone(),
            source_record_id: input.source_record_id.clone(),
            created_by: input.created_by.clone(),
            restored_by: None,
            restored_at: None,
            created_at: now,
            updated_at: now,
        };
        state.overrides.push(row.clone());
        Ok(row)
    }

    async fn update_override(
        &self,
        id: DbId,
        override_id: Option<DbId>,
        source_record_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        countdown(&mut state.override_update_failures)?;
        if let Some(row) = state
            .overrides
            .iter_mut()
            .find(|o| o.id == id && o.is_active())
        {
            row.override_id = override_id;
            row.source_record_id = source_record_id.map(str::to_string);
        }
        Ok(())
    }

    async fn mark_override_restored(&self, id: DbId, restored_by: &str) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state
            .overrides
            .iter_mut()
            .find(|o| o.id == id && o.is_active())
        {
            Some(row) => {
                row.restored_at = Some(Utc::now());
                row.restored_by = Some(restored_by.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_withdrawal(
        &self,
        family: ExtensionFamily,
        source_record_id: &str,
        _student_code: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .state()
            .withdrawals
            .insert((family, source_record_id.to_string())))
    }

    async fn is_withdrawn(
        &self,
        family: ExtensionFamily,
        source_record_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .state()
            .withdrawals
            .contains(&(family, source_record_id.to_string())))
    }

    async fn tier_table(&self) -> Result<TierTable, StoreError> {
        Ok(TierTable::new(self.state().tiers.clone()))
    }

    async fn find_message(
        &self,
        queue_name: &str,
        message_id: &str,
    ) -> Result<Option<ProcessedMessage>, StoreError> {
        self.state().ledger()?;
        Ok(self.message(queue_name, message_id))
    }

    async fn find_message_by_id(&self, id: DbId) -> Result<Option<ProcessedMessage>, StoreError> {
        let state = self.state();
        state.ledger()?;
        Ok(state.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn record_message(
        &self,
        outcome: &RecordMessageOutcome,
    ) -> Result<ProcessedMessage, StoreError> {
        let mut state = self.state();
        state.ledger()?;
        if let Some(row) = state.messages.iter_mut().find(|m| {
            m.queue_name == outcome.queue_name && m.message_id == outcome.message_id
        }) {
            row.status_id = outcome.status.id();
            row.attempts += 1;
            row.payload = outcome.payload.clone();
            row.error_message = outcome.error_message.clone();
            return Ok(row.clone());
        }

        let id = state.next_id();
        let now = Utc::now();
        let row = ProcessedMessage {
            id,
            queue_name: outcome.queue_name.clone(),
            message_id: outcome.message_id.clone(),
            status_id: outcome.status.id(),
            attempts: 1,
            payload: outcome.payload.clone(),
            error_message: outcome.error_message.clone(),
            created_at: now,
            updated_at: now,
        };
        state.messages.push(row.clone());
        Ok(row)
    }

    async fn list_messages(
        &self,
        status: MessageStatus,
        limit: i64,
    ) -> Result<Vec<ProcessedMessage>, StoreError> {
        let state = self.state();
        state.ledger()?;
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| m.status_id == status.id())
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn record_enrolment(&self, course_id: DbId, user_id: DbId) -> Result<bool, StoreError> {
        if self
            .state()
            .enrolments
            .iter()
            .any(|e| e.course_id == course_id && e.user_id == user_id)
        {
            return Ok(false);
        }
        self.seed_enrolment(course_id, user_id, 0);
        Ok(true)
    }

    async fn pending_enrolments(
        &self,
        limit: i64,
        retry_after_secs: i64,
    ) -> Result<Vec<EnrolmentEvent>, StoreError> {
        let due_before = Utc::now() - Duration::seconds(retry_after_secs);
        Ok(self
            .state()
            .enrolments
            .iter()
            .filter(|e| e.last_attempt_at.map_or(true, |t| t <= due_before))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn delete_enrolments(&self, ids: &[DbId]) -> Result<(), StoreError> {
        self.state().enrolments.retain(|e| !ids.contains(&e.id));
        Ok(())
    }

    async fn bump_enrolment_attempts(&self, ids: &[DbId]) -> Result<(), StoreError> {
        for event in self
            .state()
            .enrolments
            .iter_mut()
            .filter(|e| ids.contains(&e.id))
        {
            event.attempts += 1;
            event.last_attempt_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn create_task(&self, input: &CreateExtensionTask) -> Result<ExtensionTask, StoreError> {
        Ok(self.state().push_task(input))
    }

    async fn create_scan_task(&self, request: &ScanRequest) -> Result<ScanQueued, StoreError> {
        let mut state = self.state();
        let queued: Vec<ScanRequest> = state
            .tasks
            .iter()
            .filter(|t| matches!(t.status(), Some(TaskStatus::Pending | TaskStatus::Running)))
            .filter_map(ExtensionTask::scan_request)
            .collect();
        if let Some(existing) = find_covering(&queued, request) {
            return Ok(ScanQueued::Covered(*existing));
        }
        Ok(ScanQueued::Created(
            state.push_task(&CreateExtensionTask::scan(request)),
        ))
    }

    async fn queued_tasks(&self, kind: TaskKind) -> Result<Vec<ExtensionTask>, StoreError> {
        Ok(self
            .state()
            .tasks
            .iter()
            .filter(|t| {
                t.kind() == Some(kind)
                    && matches!(t.status(), Some(TaskStatus::Pending | TaskStatus::Running))
            })
            .cloned()
            .collect())
    }

    async fn claim_task(&self, worker: &str) -> Result<Option<ExtensionTask>, StoreError> {
        let mut state = self.state();
        let Some(task) = state
            .tasks
            .iter_mut()
            .find(|t| t.status() == Some(TaskStatus::Pending))
        else {
            return Ok(None);
        };
        task.status_id = TaskStatus::Running.id();
        task.claimed_by = Some(worker.to_string());
        task.attempts += 1;
        task.started_at.get_or_insert_with(Utc::now);
        Ok(Some(task.clone()))
    }

    async fn requeue_task(&self, id: DbId, last_mapping_id: DbId) -> Result<(), StoreError> {
        if let Some(task) = self.state().tasks.iter_mut().find(|t| t.id == id) {
            task.status_id = TaskStatus::Pending.id();
            task.last_mapping_id = last_mapping_id;
            task.claimed_by = None;
        }
        Ok(())
    }

    async fn complete_task(&self, id: DbId) -> Result<(), StoreError> {
        if let Some(task) = self.state().tasks.iter_mut().find(|t| t.id == id) {
            task.status_id = TaskStatus::Completed.id();
            task.completed_at = Some(Utc::now());
            task.error_message = None;
        }
        Ok(())
    }

    async fn fail_task(&self, id: DbId, error: &str) -> Result<(), StoreError> {
        if let Some(task) = self.state().tasks.iter_mut().find(|t| t.id == id) {
            task.status_id = TaskStatus::Failed.id();
            task.completed_at = Some(Utc::now());
            task.error_message = Some(error.to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Activities
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ActivityState {
    next_id: DbId,
    schedules: HashMap<(ActivityType, DbId), ActivitySchedule>,
    overrides: Vec<(ActivityType, DbId, ActivityOverride)>,
    fail_reads: HashSet<(ActivityType, DbId)>,
    fail_deletes: HashSet<(ActivityType, DbId)>,
    fail_writes: HashSet<(ActivityType, DbId)>,
    calls: usize,
}

/// Schedules and overrides for every activity type, shared by the
/// per-type [`FakeActivityStore`]s.
#[derive(Default)]
pub struct FakeActivities {
    state: Mutex<ActivityState>,
}

impl FakeActivities {
    fn state(&self) -> MutexGuard<'_, ActivityState> {
        self.state.lock().unwrap()
    }

    fn find(&self, kind: ActivityType, instance_id: DbId, subject: OverrideSubject) -> Option<ActivityOverride> {
        self.state()
            .overrides
            .iter()
            .find(|(k, i, o)| *k == kind && *i == instance_id && o.subject == subject)
            .map(|(_, _, o)| o.clone())
    }

    fn upsert(
        &self,
        kind: ActivityType,
        instance_id: DbId,
        subject: OverrideSubject,
        schedule: ScheduleOverride,
    ) -> DbId {
        let mut state = self.state();
        if let Some((_, _, existing)) = state
            .overrides
            .iter_mut()
            .find(|(k, i, o)| *k == kind && *i == instance_id && o.subject == subject)
        {
            existing.schedule = schedule;
            return existing.id;
        }
        state.next_id += 1;
        let id = state.next_id;
        state.overrides.push((
            kind,
            instance_id,
            ActivityOverride {
                id,
                subject,
                schedule,
            },
        ));
        id
    }
}

pub struct FakeActivityStore {
    kind: ActivityType,
    shared: Arc<FakeActivities>,
}

impl FakeActivityStore {
    fn touch(&self) -> MutexGuard<'_, ActivityState> {
        let mut state = self.shared.state();
        state.calls += 1;
        state
    }

    fn check_write(&self, instance_id: DbId) -> Result<(), LmsError> {
        if self.touch().fail_writes.contains(&(self.kind, instance_id)) {
            return Err(LmsError::HttpStatus {
                status: 502,
                path: format!("/activities/{}/{instance_id}/overrides", self.kind),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for FakeActivityStore {
    fn activity_type(&self) -> ActivityType {
        self.kind
    }

    async fn get_current_schedule(&self, instance_id: DbId) -> Result<ActivitySchedule, LmsError> {
        let state = self.touch();
        if state.fail_reads.contains(&(self.kind, instance_id)) {
            return Err(LmsError::HttpStatus {
                status: 503,
                path: format!("/activities/{}/{instance_id}/schedule", self.kind),
            });
        }
        Ok(state
            .schedules
            .get(&(self.kind, instance_id))
            .copied()
            .unwrap_or_default())
    }

    async fn find_override(
        &self,
        instance_id: DbId,
        subject: OverrideSubject,
    ) -> Result<Option<ActivityOverride>, LmsError> {
        drop(self.touch());
        Ok(self.shared.find(self.kind, instance_id, subject))
    }

    async fn write_user_override(
        &self,
        instance_id: DbId,
        user_id: DbId,
        schedule: &ScheduleOverride,
    ) -> Result<DbId, LmsError> {
        self.check_write(instance_id)?;
        Ok(self
            .shared
            .upsert(self.kind, instance_id, OverrideSubject::User(user_id), *schedule))
    }

    async fn write_group_override(
        &self,
        instance_id: DbId,
        group_id: DbId,
        schedule: &ScheduleOverride,
    ) -> Result<DbId, LmsError> {
        self.check_write(instance_id)?;
        Ok(self
            .shared
            .upsert(self.kind, instance_id, OverrideSubject::Group(group_id), *schedule))
    }

    async fn delete_override(&self, instance_id: DbId, override_id: DbId) -> Result<(), LmsError> {
        let mut state = self.touch();
        if state.fail_deletes.contains(&(self.kind, instance_id)) {
            return Err(LmsError::HttpStatus {
                status: 500,
                path: format!("/activities/{}/{instance_id}/overrides/{override_id}", self.kind),
            });
        }
        let before = state.overrides.len();
        let kind = self.kind;
        state
            .overrides
            .retain(|(k, i, o)| !(*k == kind && *i == instance_id && o.id == override_id));
        if state.overrides.len() == before {
            return Err(LmsError::NotFound(format!("override {override_id}")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DirectoryState {
    next_group_id: DbId,
    users: HashMap<DbId, String>,
    enrolments: HashSet<(DbId, DbId)>,
    groups: Vec<LmsGroup>,
    members: HashSet<(DbId, DbId)>,
    calls: usize,
}

#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<DirectoryState>,
}

impl FakeDirectory {
    fn state(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap()
    }

    fn touch(&self) -> MutexGuard<'_, DirectoryState> {
        let mut state = self.state();
        state.calls += 1;
        state
    }
}

#[async_trait]
impl CourseDirectory for FakeDirectory {
    async fn find_user_by_student_code(
        &self,
        student_code: &str,
    ) -> Result<Option<LmsUser>, LmsError> {
        Ok(self
            .touch()
            .users
            .iter()
            .find(|(_, code)| code.as_str() == student_code)
            .map(|(id, code)| LmsUser {
                id: *id,
                student_code: code.clone(),
            }))
    }

    async fn enrolled_course_ids(&self, user_id: DbId) -> Result<Vec<DbId>, LmsError> {
        let mut ids: Vec<DbId> = self
            .touch()
            .enrolments
            .iter()
            .filter(|(_, u)| *u == user_id)
            .map(|(c, _)| *c)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn is_enrolled(&self, course_id: DbId, user_id: DbId) -> Result<bool, LmsError> {
        Ok(self.touch().enrolments.contains(&(course_id, user_id)))
    }

    async fn find_or_create_group(&self, course_id: DbId, name: &str) -> Result<LmsGroup, LmsError> {
        let mut state = self.touch();
        if let Some(group) = state
            .groups
            .iter()
            .find(|g| g.course_id == course_id && g.name == name)
        {
            return Ok(group.clone());
        }
        state.next_group_id += 1;
        let group = LmsGroup {
            id: 900 + state.next_group_id,
            course_id,
            name: name.to_string(),
        };
        state.groups.push(group.clone());
        Ok(group)
    }

    async fn user_groups(&self, course_id: DbId, user_id: DbId) -> Result<Vec<LmsGroup>, LmsError> {
        let state = self.touch();
        Ok(state
            .groups
            .iter()
            .filter(|g| g.course_id == course_id && state.members.contains(&(g.id, user_id)))
            .cloned()
            .collect())
    }

    async fn add_group_member(&self, group_id: DbId, user_id: DbId) -> Result<bool, LmsError> {
        Ok(self.touch().members.insert((group_id, user_id)))
    }

    async fn remove_group_member(&self, group_id: DbId, user_id: DbId) -> Result<bool, LmsError> {
        Ok(self.touch().members.remove(&(group_id, user_id)))
    }

    async fn group_member_count(&self, group_id: DbId) -> Result<usize, LmsError> {
        Ok(self
            .touch()
            .members
            .iter()
            .filter(|(g, _)| *g == group_id)
            .count())
    }
}

// ---------------------------------------------------------------------------
// Student records
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordsState {
    rosters: HashMap<ComponentRef, Vec<StudentRecord>>,
    fail: bool,
    calls: usize,
}

#[derive(Default)]
pub struct FakeRecordsApi {
    state: Mutex<RecordsState>,
}

#[async_trait]
impl StudentRecordsApi for FakeRecordsApi {
    async fn get_students_for_component(
        &self,
        component: &ComponentRef,
        _fresh: bool,
        attempts: u32,
    ) -> Result<Vec<StudentRecord>, RecordsApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.fail {
            return Err(RecordsApiError::Exhausted {
                attempts,
                last_error: "HTTP 503".into(),
            });
        }
        Ok(state.rosters.get(component).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Queue whose receipt handles equal the message ids.
pub struct FakeQueue {
    name: String,
    pending: Mutex<VecDeque<QueueMessage>>,
    deleted: Mutex<Vec<String>>,
    receives: Mutex<usize>,
}

impl FakeQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pending: Mutex::new(VecDeque::new()),
            deleted: Mutex::new(Vec::new()),
            receives: Mutex::new(0),
        }
    }

    pub fn push(&self, message_id: &str, body: &str) {
        self.pending.lock().unwrap().push_back(QueueMessage {
            message_id: message_id.to_string(),
            receipt_handle: message_id.to_string(),
            body: body.to_string(),
        });
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn receive_calls(&self) -> usize {
        *self.receives.lock().unwrap()
    }
}

#[async_trait]
impl MessageQueue for FakeQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, max_messages: i32) -> Result<Vec<QueueMessage>, QueueError> {
        *self.receives.lock().unwrap() += 1;
        let mut pending = self.pending.lock().unwrap();
        let n = (max_messages.max(0) as usize).min(pending.len());
        Ok(pending.drain(..n).collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.deleted.lock().unwrap().push(receipt_handle.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    activities: Arc<FakeActivities>,
    directory: Arc<FakeDirectory>,
    records: Arc<FakeRecordsApi>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
            clock: Arc::new(FixedClock::new(at("2025-02-01T09:00:00Z"))),
            activities: Arc::new(FakeActivities::default()),
            directory: Arc::new(FakeDirectory::default()),
            records: Arc::new(FakeRecordsApi::default()),
        }
    }

    // -- seeding ---------------------------------------------------------

    pub fn add_mapping(
        &self,
        course_id: DbId,
        activity_type: &str,
        instance_id: DbId,
        map_code: &str,
        mab_seq: &str,
    ) -> AssessmentMapping {
        self.store
            .insert_mapping(course_id, activity_type, instance_id, map_code, mab_seq)
    }

    pub fn set_enabled(&self, mapping_id: DbId, enabled: bool) -> AssessmentMapping {
        self.store.set_enabled(mapping_id, enabled)
    }

    pub fn add_user(&self, user_id: DbId, student_code: &str) {
        self.directory
            .state()
            .users
            .insert(user_id, student_code.to_string());
    }

    pub fn enrol(&self, course_id: DbId, user_id: DbId) {
        self.directory.state().enrolments.insert((course_id, user_id));
    }

    pub fn set_schedule(&self, kind: ActivityType, instance_id: DbId, schedule: ActivitySchedule) {
        self.activities
            .state()
            .schedules
            .insert((kind, instance_id), schedule);
    }

    pub fn seed_user_override(
        &self,
        kind: ActivityType,
        instance_id: DbId,
        user_id: DbId,
        schedule: ScheduleOverride,
    ) {
        self.activities
            .upsert(kind, instance_id, OverrideSubject::User(user_id), schedule);
    }

    /// Build a tier table and load the same rows into the store.
    pub fn tiers(&self, rows: &[(&str, &str, &str, f64, Option<f64>)]) -> TierTable {
        let entries: Vec<TierEntry> = rows
            .iter()
            .map(|(assessment_type, tier, kind, value, break_value)| TierEntry {
                assessment_type: assessment_type.to_string(),
                tier: tier.to_string(),
                kind: ExtensionKind::parse(kind).unwrap(),
                value: *value,
                break_value: *break_value,
                enabled: true,
            })
            .collect();
        for entry in &entries {
            self.store.add_tier(entry.clone());
        }
        TierTable::new(entries)
    }

    pub fn set_roster(&self, map_code: &str, mab_seq: &str, students: Vec<StudentRecord>) {
        self.records
            .state
            .lock()
            .unwrap()
            .rosters
            .insert(ComponentRef::new(map_code, mab_seq), students);
    }

    // -- failure injection -----------------------------------------------

    pub fn fail_reads(&self, kind: ActivityType, instance_id: DbId) {
        self.activities.state().fail_reads.insert((kind, instance_id));
    }

    pub fn fail_deletes(&self, kind: ActivityType, instance_id: DbId) {
        self.activities.state().fail_deletes.insert((kind, instance_id));
    }

    pub fn fail_writes(&self, kind: ActivityType, instance_id: DbId) {
        self.activities.state().fail_writes.insert((kind, instance_id));
    }

    pub fn fail_roster(&self) {
        self.records.state.lock().unwrap().fail = true;
    }

    pub fn clear_failures(&self) {
        let mut state = self.activities.state();
        state.fail_reads.clear();
        state.fail_deletes.clear();
        state.fail_writes.clear();
        drop(state);
        self.records.state.lock().unwrap().fail = false;
    }

    // -- inspection ------------------------------------------------------

    pub fn user_override(
        &self,
        kind: ActivityType,
        instance_id: DbId,
        user_id: DbId,
    ) -> Option<ScheduleOverride> {
        self.activities
            .find(kind, instance_id, OverrideSubject::User(user_id))
            .map(|o| o.schedule)
    }

    pub fn group_override(
        &self,
        kind: ActivityType,
        instance_id: DbId,
        group_id: DbId,
    ) -> Option<ScheduleOverride> {
        self.activities
            .find(kind, instance_id, OverrideSubject::Group(group_id))
            .map(|o| o.schedule)
    }

    pub fn override_count(&self, kind: ActivityType, instance_id: DbId) -> usize {
        self.activities
            .state()
            .overrides
            .iter()
            .filter(|(k, i, _)| *k == kind && *i == instance_id)
            .count()
    }

    pub fn group_named(&self, course_id: DbId, name: &str) -> Option<LmsGroup> {
        self.directory
            .state()
            .groups
            .iter()
            .find(|g| g.course_id == course_id && g.name == name)
            .cloned()
    }

    pub fn is_member(&self, group_id: DbId, user_id: DbId) -> bool {
        self.directory.state().members.contains(&(group_id, user_id))
    }

    pub fn activity_calls(&self) -> usize {
        self.activities.state().calls
    }

    pub fn directory_calls(&self) -> usize {
        self.directory.state().calls
    }

    pub fn roster_calls(&self) -> usize {
        self.records.state.lock().unwrap().calls
    }

    // -- wiring ----------------------------------------------------------

    fn registry(&self) -> ActivityRegistry {
        ActivityType::ALL
            .into_iter()
            .fold(ActivityRegistry::new(), |registry, kind| {
                registry.with(Arc::new(FakeActivityStore {
                    kind,
                    shared: self.activities.clone(),
                }))
            })
    }

    pub fn resolver(&self) -> MappingResolver {
        MappingResolver::new(self.store.clone(), self.directory.clone())
    }

    pub fn applier(&self) -> ExtensionApplier {
        ExtensionApplier::new(
            self.store.clone(),
            self.directory.clone(),
            self.registry(),
            self.clock.clone(),
            ACTOR,
        )
    }

    pub fn engine(&self) -> ExtensionEngine {
        ExtensionEngine::new(self.store.clone(), self.resolver(), self.applier())
    }

    pub fn rescanner_with(&self, config: RescanConfig) -> Rescanner {
        Rescanner::new(
            self.store.clone(),
            self.directory.clone(),
            self.records.clone(),
            Arc::new(self.engine()),
            config,
        )
    }

    pub fn rescanner(&self) -> Rescanner {
        self.rescanner_with(RescanConfig::default())
    }

    pub fn task_runner(&self, config: RescanConfig) -> TaskRunner {
        TaskRunner::new(
            self.store.clone(),
            Arc::new(self.rescanner_with(config)),
            ACTOR,
        )
    }
}
