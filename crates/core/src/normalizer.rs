//! Inbound extension event normalization.
//!
//! Queue messages arrive as an SNS-style envelope `{"Message": "<json>"}`
//! whose inner document is `{"entity": {<shape>: {...}}}`. Three shapes are
//! understood:
//!
//! | Entity key                          | Meaning                                 |
//! |-------------------------------------|-----------------------------------------|
//! | `person_sora`                       | accommodation status change             |
//! | `student_assessment`                | accommodation provisions (RAA)          |
//! | `student_extenuating_circumstances` | extenuating-circumstance decision       |
//!
//! Each is converted into one canonical [`ExtensionUpdate`] or classified as
//! ignored. SITS roster snapshots embed the same entity shapes, so
//! [`normalize_entity`] is shared by streaming and snapshot ingestion.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::activity::{ComponentRef, ExtensionFamily};
use crate::provision::{resolve_provisions, ExtensionDirective, ProvisionError, ProvisionRecord};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const SHAPE_PERSON_SORA: &str = "person_sora";
const SHAPE_STUDENT_ASSESSMENT: &str = "student_assessment";
const SHAPE_EC: &str = "student_extenuating_circumstances";

/// Decision types that record an extension outcome.
const EC_EXTENSION_TYPES: &[&str] = &["EXT", "EXTENSION"];

/// Decision types that are not binding yet (e.g. referred to a panel).
const EC_NON_BINDING_TYPES: &[&str] = &["PANEL", "REFERRED", "DEFERRED"];

const PENDING_STATUSES: &[&str] = &["PENDING", "SUBMITTED", "IN_PROGRESS", "AWAITING_DECISION"];
const APPROVED_STATUSES: &[&str] = &["APPROVED", "ACCEPTED", "GRANTED"];
const REVOKED_STATUSES: &[&str] = &["REJECTED", "DECLINED", "WITHDRAWN", "CANCELLED", "EXPIRED"];

// ---------------------------------------------------------------------------
// Canonical types
// ---------------------------------------------------------------------------

/// An accommodation change for one student. Accommodations are
/// student-global: they apply to every eligible mapping the student has.
#[derive(Debug, Clone, PartialEq)]
pub struct AccommodationUpdate {
    pub student_code: String,
    pub source_record_id: String,
    pub accommodation_type: Option<String>,
    pub approval_status: Option<String>,
    pub provision_tier: Option<String>,
    /// `None` means the student is no longer entitled to an extension
    /// (unless the tier table supplies one for an approved record).
    pub directive: Option<ExtensionDirective>,
}

impl AccommodationUpdate {
    /// Whether the record is approved (the tier fallback only applies then).
    pub fn is_approved(&self) -> bool {
        crate::provision::is_approved(self.approval_status.as_deref())
    }
}

/// An approved EC extension for one assessment component.
#[derive(Debug, Clone, PartialEq)]
pub struct EcGrant {
    pub student_code: String,
    pub source_record_id: String,
    pub component: ComponentRef,
    pub status: String,
    pub decision_type: String,
    /// Literal new deadline date; the time of day comes from the activity.
    pub new_deadline: NaiveDate,
}

/// Why a withdrawal was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalReason {
    /// The source record was deleted upstream. Later grants carrying the same
    /// source id must not be re-applied.
    Deleted,
    /// The request was decided against (rejected, withdrawn, ...).
    NotApproved,
}

/// Deletion/withdrawal of either extension family.
#[derive(Debug, Clone, PartialEq)]
pub struct Withdrawal {
    pub family: ExtensionFamily,
    pub student_code: String,
    pub source_record_id: String,
    /// Present for EC withdrawals, which name one component.
    pub component: Option<ComponentRef>,
    pub reason: WithdrawalReason,
}

/// Canonical extension update produced by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionUpdate {
    AccommodationStatusChange(AccommodationUpdate),
    AccommodationProvisions(AccommodationUpdate),
    EcGrant(EcGrant),
    Withdrawal(Withdrawal),
}

impl ExtensionUpdate {
    pub fn family(&self) -> ExtensionFamily {
        match self {
            ExtensionUpdate::AccommodationStatusChange(_)
            | ExtensionUpdate::AccommodationProvisions(_) => ExtensionFamily::Raa,
            ExtensionUpdate::EcGrant(_) => ExtensionFamily::Ec,
            ExtensionUpdate::Withdrawal(w) => w.family,
        }
    }

    pub fn student_code(&self) -> &str {
        match self {
            ExtensionUpdate::AccommodationStatusChange(a)
            | ExtensionUpdate::AccommodationProvisions(a) => &a.student_code,
            ExtensionUpdate::EcGrant(g) => &g.student_code,
            ExtensionUpdate::Withdrawal(w) => &w.student_code,
        }
    }

    pub fn source_record_id(&self) -> &str {
        match self {
            ExtensionUpdate::AccommodationStatusChange(a)
            | ExtensionUpdate::AccommodationProvisions(a) => &a.source_record_id,
            ExtensionUpdate::EcGrant(g) => &g.source_record_id,
            ExtensionUpdate::Withdrawal(w) => &w.source_record_id,
        }
    }
}

/// Result of normalizing one event.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    Update(ExtensionUpdate),
    /// Nothing to do yet; not an error.
    Ignored { reason: String },
}

impl NormalizedEvent {
    fn ignored(reason: impl Into<String>) -> Self {
        NormalizedEvent::Ignored {
            reason: reason.into(),
        }
    }
}

/// Malformed input or business-rule violation.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Malformed JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Unknown event shape (entity keys: {0})")]
    UnknownShape(String),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

fn invalid(field: &str, message: impl Into<String>) -> NormalizeError {
    NormalizeError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Read a scalar as text. Accepts strings, numbers and `{"code": ...}`
/// wrappers; blank strings are treated as absent.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => text(obj.get("code")),
        _ => None,
    }
}

fn require_text(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, NormalizeError> {
    text(obj.get(key)).ok_or_else(|| NormalizeError::MissingField(path.to_string()))
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, NormalizeError> {
    value
        .as_object()
        .ok_or_else(|| invalid(path, "expected a JSON object"))
}

/// `null`, `{}`, `[]` and `""` all mean "present but empty".
fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(o) => o.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

fn parse_date(value: &str, field: &str) -> Result<NaiveDate, NormalizeError> {
    let date_part = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|e| invalid(field, format!("'{value}' is not a YYYY-MM-DD date ({e})")))
}

fn in_list(value: &str, list: &[&str]) -> bool {
    list.iter().any(|v| v.eq_ignore_ascii_case(value))
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What to do with an accommodation record, from its approval status alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccommodationDisposition {
    Apply,
    Revoke,
    Ignore(&'static str),
}

/// Classify an accommodation approval status.
pub fn classify_accommodation(status: Option<&str>) -> Result<AccommodationDisposition, NormalizeError> {
    let Some(status) = status.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(AccommodationDisposition::Ignore("accommodation status not decided"));
    };
    if in_list(status, APPROVED_STATUSES) {
        Ok(AccommodationDisposition::Apply)
    } else if in_list(status, PENDING_STATUSES) {
        Ok(AccommodationDisposition::Ignore("accommodation assessment pending"))
    } else if in_list(status, REVOKED_STATUSES) {
        Ok(AccommodationDisposition::Revoke)
    } else {
        Err(invalid(
            "accessibility_assessment_status",
            format!("unrecognised status '{status}'"),
        ))
    }
}

/// What to do with an EC decision, from its status and decision type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcDisposition {
    Grant,
    Withdraw,
    Ignore(&'static str),
}

/// Classify an EC decision.
pub fn classify_ec(
    status: Option<&str>,
    decision_type: Option<&str>,
) -> Result<EcDisposition, NormalizeError> {
    let Some(status) = status.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(EcDisposition::Ignore("EC decision pending"));
    };
    if in_list(status, PENDING_STATUSES) {
        return Ok(EcDisposition::Ignore("EC decision pending"));
    }
    if in_list(status, REVOKED_STATUSES) {
        return Ok(EcDisposition::Withdraw);
    }
    if !in_list(status, APPROVED_STATUSES) {
        return Err(invalid("status", format!("unrecognised EC status '{status}'")));
    }

    match decision_type.map(str::trim) {
        Some(t) if in_list(t, EC_NON_BINDING_TYPES) => {
            Ok(EcDisposition::Ignore("EC decision is not binding yet"))
        }
        Some(t) if in_list(t, EC_EXTENSION_TYPES) => Ok(EcDisposition::Grant),
        Some(_) => Ok(EcDisposition::Ignore("EC decision is not a deadline extension")),
        None => Err(NormalizeError::MissingField("decision.type".to_string())),
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Unwrap the queue envelope and return the inner event document.
pub fn parse_envelope(body: &str) -> Result<Value, NormalizeError> {
    let envelope: Value = serde_json::from_str(body)?;
    let envelope = as_object(&envelope, "Body")?;
    match envelope.get("Message") {
        Some(Value::String(inner)) => Ok(serde_json::from_str(inner)?),
        Some(inner @ Value::Object(_)) => Ok(inner.clone()),
        Some(_) => Err(invalid("Message", "expected a JSON string or object")),
        None => Err(NormalizeError::MissingField("Message".to_string())),
    }
}

/// Normalize a raw queue message body.
pub fn normalize_message(body: &str) -> Result<NormalizedEvent, NormalizeError> {
    let event = parse_envelope(body)?;
    normalize_event(&event)
}

/// Normalize an inner event document `{"entity": {...}}`.
pub fn normalize_event(event: &Value) -> Result<NormalizedEvent, NormalizeError> {
    let event = as_object(event, "event")?;
    let entity = event
        .get("entity")
        .ok_or_else(|| NormalizeError::MissingField("entity".to_string()))?;
    normalize_entity(entity)
}

/// Normalize an entity object keyed by its shape name.
pub fn normalize_entity(entity: &Value) -> Result<NormalizedEvent, NormalizeError> {
    let entity = as_object(entity, "entity")?;

    if let Some(body) = entity.get(SHAPE_STUDENT_ASSESSMENT) {
        return normalize_student_assessment(as_object(body, SHAPE_STUDENT_ASSESSMENT)?);
    }
    if let Some(body) = entity.get(SHAPE_PERSON_SORA) {
        return normalize_person_sora(as_object(body, SHAPE_PERSON_SORA)?);
    }
    if let Some(body) = entity.get(SHAPE_EC) {
        return normalize_ec(as_object(body, SHAPE_EC)?);
    }

    let keys: Vec<&str> = entity.keys().map(String::as_str).collect();
    Err(NormalizeError::UnknownShape(keys.join(", ")))
}

// ---------------------------------------------------------------------------
// Accommodation shapes
// ---------------------------------------------------------------------------

fn normalize_student_assessment(body: &Map<String, Value>) -> Result<NormalizedEvent, NormalizeError> {
    let path = SHAPE_STUDENT_ASSESSMENT;
    let student_code = require_text(body, "student_code", &format!("{path}.student_code"))?;
    let source_record_id = require_text(body, "assessment_id", &format!("{path}.assessment_id"))?;
    let provisions = body
        .get("student_provisions")
        .ok_or_else(|| NormalizeError::MissingField(format!("{path}.student_provisions")))?;

    if is_empty_container(provisions) {
        return Ok(NormalizedEvent::Update(ExtensionUpdate::Withdrawal(Withdrawal {
            family: ExtensionFamily::Raa,
            student_code,
            source_record_id,
            component: None,
            reason: WithdrawalReason::Deleted,
        })));
    }
    let provisions = as_object(provisions, &format!("{path}.student_provisions"))?;
    let approval_status = text(body.get("accessibility_assessment_status"));

    let record = ProvisionRecord {
        approval_status: approval_status.clone(),
        provision_tier: text(body.get("provision_tier")),
        days: provisions.get("no_dys_ext").cloned(),
        hours: provisions.get("no_hrs_ext").cloned(),
        extra_exam_time: provisions.get("extra_exam_time").cloned(),
        rest_break_time: provisions.get("rest_break_time").cloned(),
    };

    let update = accommodation_update(
        student_code,
        source_record_id,
        text(body.get("accommodation_type")),
        record,
    )?;
    Ok(update.map_or_else(
        |reason| NormalizedEvent::ignored(reason),
        |u| NormalizedEvent::Update(ExtensionUpdate::AccommodationProvisions(u)),
    ))
}

fn normalize_person_sora(body: &Map<String, Value>) -> Result<NormalizedEvent, NormalizeError> {
    let path = SHAPE_PERSON_SORA;
    let person = body
        .get("person")
        .ok_or_else(|| NormalizeError::MissingField(format!("{path}.person")))?;
    let person = as_object(person, &format!("{path}.person"))?;
    let student_code = require_text(person, "student_code", &format!("{path}.person.student_code"))?;
    let source_record_id = require_text(body, "identifier", &format!("{path}.identifier"))?;
    let provisions = body
        .get("provisions")
        .ok_or_else(|| NormalizeError::MissingField(format!("{path}.provisions")))?;

    if is_empty_container(provisions) {
        return Ok(NormalizedEvent::Update(ExtensionUpdate::Withdrawal(Withdrawal {
            family: ExtensionFamily::Raa,
            student_code,
            source_record_id,
            component: None,
            reason: WithdrawalReason::Deleted,
        })));
    }
    let provisions = as_object(provisions, &format!("{path}.provisions"))?;

    let record = ProvisionRecord {
        approval_status: text(body.get("accessibility_assessment_status")),
        provision_tier: text(body.get("provision_tier")),
        days: None,
        hours: None,
        extra_exam_time: provisions.get("extra_duration").cloned(),
        rest_break_time: provisions.get("rest_duration").cloned(),
    };

    let update = accommodation_update(student_code, source_record_id, text(body.get("type")), record)?;
    Ok(update.map_or_else(
        |reason| NormalizedEvent::ignored(reason),
        |u| NormalizedEvent::Update(ExtensionUpdate::AccommodationStatusChange(u)),
    ))
}

/// Shared accommodation path: classify the status, then resolve provisions.
/// `Err(reason)` inside the `Ok` means "ignored".
fn accommodation_update(
    student_code: String,
    source_record_id: String,
    accommodation_type: Option<String>,
    record: ProvisionRecord,
) -> Result<Result<AccommodationUpdate, &'static str>, NormalizeError> {
    let directive = match classify_accommodation(record.approval_status.as_deref())? {
        AccommodationDisposition::Ignore(reason) => return Ok(Err(reason)),
        AccommodationDisposition::Revoke => None,
        AccommodationDisposition::Apply => resolve_provisions(&record)?,
    };

    Ok(Ok(AccommodationUpdate {
        student_code,
        source_record_id,
        accommodation_type,
        approval_status: record.approval_status,
        provision_tier: record.provision_tier,
        directive,
    }))
}

// ---------------------------------------------------------------------------
// EC shape
// ---------------------------------------------------------------------------

fn normalize_ec(body: &Map<String, Value>) -> Result<NormalizedEvent, NormalizeError> {
    let path = SHAPE_EC;
    let student_code = require_text(body, "student_code", &format!("{path}.student_code"))?;
    let source_record_id = require_text(body, "request_id", &format!("{path}.request_id"))?;
    let identifier = require_text(body, "identifier", &format!("{path}.identifier"))?;
    let decision = body
        .get("decision")
        .ok_or_else(|| NormalizeError::MissingField(format!("{path}.decision")))?;

    let component = ComponentRef::parse_identifier(&identifier)
        .map_err(|e| invalid(&format!("{path}.identifier"), e.to_string()))?;

    let withdrawal = |reason| {
        NormalizedEvent::Update(ExtensionUpdate::Withdrawal(Withdrawal {
            family: ExtensionFamily::Ec,
            student_code: student_code.clone(),
            source_record_id: source_record_id.clone(),
            component: Some(component.clone()),
            reason,
        }))
    };

    if is_truthy(body.get("deleted")) || is_empty_container(decision) {
        return Ok(withdrawal(WithdrawalReason::Deleted));
    }
    let decision = as_object(decision, &format!("{path}.decision"))?;

    let status = text(body.get("status"));
    let decision_type = text(decision.get("type"));

    match classify_ec(status.as_deref(), decision_type.as_deref())? {
        EcDisposition::Ignore(reason) => Ok(NormalizedEvent::ignored(reason)),
        EcDisposition::Withdraw => Ok(withdrawal(WithdrawalReason::NotApproved)),
        EcDisposition::Grant => {
            let raw_deadline = require_text(
                decision,
                "new_deadline",
                &format!("{path}.decision.new_deadline"),
            )?;
            let new_deadline = parse_date(&raw_deadline, "decision.new_deadline")?;
            Ok(NormalizedEvent::Update(ExtensionUpdate::EcGrant(EcGrant {
                student_code,
                source_record_id,
                component,
                status: status.unwrap_or_default(),
                decision_type: decision_type.unwrap_or_default(),
                new_deadline,
            })))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn envelope(inner: &Value) -> String {
        json!({ "Message": inner.to_string() }).to_string()
    }

    fn update(event: NormalizedEvent) -> ExtensionUpdate {
        match event {
            NormalizedEvent::Update(u) => u,
            other => panic!("Expected Update, got {other:?}"),
        }
    }

    fn raa_event(provisions: Value, status: &str) -> Value {
        json!({
            "entity": {
                "student_assessment": {
                    "assessment_id": "RAA-0042",
                    "student_code": "12345678",
                    "accommodation_type": "RAA",
                    "accessibility_assessment_status": status,
                    "provision_tier": "TIER2",
                    "student_provisions": provisions
                }
            }
        })
    }

    fn ec_event(status: &str, decision: Value) -> Value {
        json!({
            "entity": {
                "student_extenuating_circumstances": {
                    "request_id": "EC-0001234",
                    "student_code": "12345678",
                    "identifier": "LAWS0024A6UF-001",
                    "status": status,
                    "decision": decision
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Envelope
    // -----------------------------------------------------------------------

    #[test]
    fn envelope_with_string_message() {
        let inner = raa_event(json!({"no_hrs_ext": "2"}), "approved");
        let event = normalize_message(&envelope(&inner)).unwrap();
        assert_matches!(update(event), ExtensionUpdate::AccommodationProvisions(_));
    }

    #[test]
    fn envelope_with_object_message() {
        let inner = raa_event(json!({"no_hrs_ext": "2"}), "approved");
        let body = json!({ "Message": inner }).to_string();
        assert!(normalize_message(&body).is_ok());
    }

    #[test]
    fn envelope_without_message_is_malformed() {
        assert_matches!(
            normalize_message(r#"{"Subject":"x"}"#),
            Err(NormalizeError::MissingField(f)) if f == "Message"
        );
        assert_matches!(normalize_message("not json"), Err(NormalizeError::InvalidJson(_)));
    }

    #[test]
    fn unknown_shape_is_malformed() {
        let inner = json!({"entity": {"module_marks": {}}});
        assert_matches!(normalize_event(&inner), Err(NormalizeError::UnknownShape(k)) if k == "module_marks");
    }

    // -----------------------------------------------------------------------
    // student_assessment (provisions)
    // -----------------------------------------------------------------------

    #[test]
    fn provisions_hours_resolve_to_directive() {
        let event = raa_event(
            json!({"no_dys_ext": "", "no_hrs_ext": "2", "extra_exam_time": "", "rest_break_time": ""}),
            "approved",
        );
        let ExtensionUpdate::AccommodationProvisions(u) = update(normalize_event(&event).unwrap())
        else {
            panic!("expected provisions update");
        };
        assert_eq!(u.student_code, "12345678");
        assert_eq!(u.source_record_id, "RAA-0042");
        assert_eq!(u.provision_tier.as_deref(), Some("TIER2"));
        assert_eq!(u.directive, Some(ExtensionDirective::Hours { hours: 2.0 }));
    }

    #[test]
    fn empty_provisions_is_withdrawal() {
        for empty in [json!({}), json!([]), Value::Null] {
            let event = raa_event(empty, "approved");
            assert_matches!(
                update(normalize_event(&event).unwrap()),
                ExtensionUpdate::Withdrawal(Withdrawal {
                    family: ExtensionFamily::Raa,
                    reason: WithdrawalReason::Deleted,
                    component: None,
                    ..
                })
            );
        }
    }

    #[test]
    fn missing_provisions_container_is_malformed() {
        let event = json!({"entity": {"student_assessment": {
            "assessment_id": "RAA-1", "student_code": "1", "accessibility_assessment_status": "approved"
        }}});
        assert_matches!(
            normalize_event(&event),
            Err(NormalizeError::MissingField(f)) if f == "student_assessment.student_provisions"
        );
    }

    #[test]
    fn missing_student_code_is_malformed() {
        let event = json!({"entity": {"student_assessment": {
            "assessment_id": "RAA-1", "student_provisions": {"no_hrs_ext": "1"}
        }}});
        assert_matches!(
            normalize_event(&event),
            Err(NormalizeError::MissingField(f)) if f == "student_assessment.student_code"
        );
    }

    #[test]
    fn numeric_student_code_is_accepted() {
        let mut event = raa_event(json!({"no_dys_ext": 3}), "approved");
        event["entity"]["student_assessment"]["student_code"] = json!(12345678);
        assert_eq!(update(normalize_event(&event).unwrap()).student_code(), "12345678");
    }

    #[test]
    fn pending_assessment_is_ignored() {
        let event = raa_event(json!({"no_hrs_ext": "2"}), "pending");
        assert_matches!(normalize_event(&event).unwrap(), NormalizedEvent::Ignored { .. });
    }

    #[test]
    fn expired_assessment_revokes() {
        let event = raa_event(json!({"no_hrs_ext": "2"}), "expired");
        let ExtensionUpdate::AccommodationProvisions(u) = update(normalize_event(&event).unwrap())
        else {
            panic!("expected provisions update");
        };
        assert_eq!(u.directive, None);
    }

    #[test]
    fn conflicting_provisions_fail() {
        let event = raa_event(json!({"no_dys_ext": "2", "no_hrs_ext": "2"}), "approved");
        assert_matches!(normalize_event(&event), Err(NormalizeError::Provision(_)));
    }

    #[test]
    fn unknown_accommodation_status_fails() {
        let event = raa_event(json!({"no_dys_ext": "2"}), "maybe");
        assert_matches!(normalize_event(&event), Err(NormalizeError::InvalidValue { .. }));
    }

    // -----------------------------------------------------------------------
    // person_sora (status change)
    // -----------------------------------------------------------------------

    #[test]
    fn person_sora_maps_to_time_per_hour() {
        let event = json!({"entity": {"person_sora": {
            "identifier": "12345678_1",
            "person": {"student_code": "12345678"},
            "type": {"code": "EXAM"},
            "accessibility_assessment_status": {"code": "APPROVED"},
            "provisions": {"extra_duration": "19", "rest_duration": "5"}
        }}});
        let ExtensionUpdate::AccommodationStatusChange(u) = update(normalize_event(&event).unwrap())
        else {
            panic!("expected status change");
        };
        assert_eq!(u.accommodation_type.as_deref(), Some("EXAM"));
        assert_eq!(
            u.directive,
            Some(ExtensionDirective::TimePerHour {
                extra_minutes: 19.0,
                rest_minutes: 5.0
            })
        );
    }

    #[test]
    fn person_sora_without_person_is_malformed() {
        let event = json!({"entity": {"person_sora": {"identifier": "x", "provisions": {}}}});
        assert_matches!(
            normalize_event(&event),
            Err(NormalizeError::MissingField(f)) if f == "person_sora.person"
        );
    }

    #[test]
    fn person_sora_with_empty_provisions_is_withdrawal() {
        let event = json!({"entity": {"person_sora": {
            "identifier": "12345678_1",
            "person": {"student_code": "12345678"},
            "provisions": {}
        }}});
        assert_matches!(
            update(normalize_event(&event).unwrap()),
            ExtensionUpdate::Withdrawal(Withdrawal { family: ExtensionFamily::Raa, .. })
        );
    }

    // -----------------------------------------------------------------------
    // EC
    // -----------------------------------------------------------------------

    #[test]
    fn approved_extension_is_grant() {
        let event = ec_event("APPROVED", json!({"type": "EXT", "new_deadline": "2025-02-27"}));
        let ExtensionUpdate::EcGrant(g) = update(normalize_event(&event).unwrap()) else {
            panic!("expected grant");
        };
        assert_eq!(g.component, ComponentRef::new("LAWS0024A6UF", "001"));
        assert_eq!(g.source_record_id, "EC-0001234");
        assert_eq!(g.new_deadline, NaiveDate::from_ymd_opt(2025, 2, 27).unwrap());
    }

    #[test]
    fn deadline_with_time_suffix_uses_date_part() {
        let event = ec_event(
            "APPROVED",
            json!({"type": "EXT", "new_deadline": "2025-02-27T00:00:00"}),
        );
        assert_matches!(update(normalize_event(&event).unwrap()), ExtensionUpdate::EcGrant(_));
    }

    #[test]
    fn empty_decision_is_deletion() {
        let event = ec_event("APPROVED", json!({}));
        assert_matches!(
            update(normalize_event(&event).unwrap()),
            ExtensionUpdate::Withdrawal(Withdrawal {
                family: ExtensionFamily::Ec,
                reason: WithdrawalReason::Deleted,
                component: Some(_),
                ..
            })
        );
    }

    #[test]
    fn deleted_flag_is_deletion() {
        let mut event = ec_event("APPROVED", json!({"type": "EXT", "new_deadline": "2025-02-27"}));
        event["entity"]["student_extenuating_circumstances"]["deleted"] = json!(true);
        assert_matches!(
            update(normalize_event(&event).unwrap()),
            ExtensionUpdate::Withdrawal(Withdrawal { reason: WithdrawalReason::Deleted, .. })
        );
    }

    #[test]
    fn missing_decision_is_malformed() {
        let event = json!({"entity": {"student_extenuating_circumstances": {
            "request_id": "EC-1", "student_code": "1", "identifier": "LAWS0024A6UF-001", "status": "APPROVED"
        }}});
        assert_matches!(
            normalize_event(&event),
            Err(NormalizeError::MissingField(f)) if f == "student_extenuating_circumstances.decision"
        );
    }

    #[test]
    fn pending_and_panel_decisions_are_ignored() {
        let pending = ec_event("PENDING", json!({"type": "EXT", "new_deadline": "2025-02-27"}));
        assert_matches!(normalize_event(&pending).unwrap(), NormalizedEvent::Ignored { .. });

        let panel = ec_event("APPROVED", json!({"type": "PANEL"}));
        assert_matches!(normalize_event(&panel).unwrap(), NormalizedEvent::Ignored { .. });

        let no_status = ec_event("", json!({"type": "EXT", "new_deadline": "2025-02-27"}));
        assert_matches!(normalize_event(&no_status).unwrap(), NormalizedEvent::Ignored { .. });
    }

    #[test]
    fn rejected_decision_withdraws_without_tombstone() {
        let event = ec_event("REJECTED", json!({"type": "EXT"}));
        assert_matches!(
            update(normalize_event(&event).unwrap()),
            ExtensionUpdate::Withdrawal(Withdrawal { reason: WithdrawalReason::NotApproved, .. })
        );
    }

    #[test]
    fn grant_without_deadline_is_malformed() {
        let event = ec_event("APPROVED", json!({"type": "EXT"}));
        assert_matches!(normalize_event(&event), Err(NormalizeError::MissingField(_)));
    }

    #[test]
    fn bad_identifier_or_date_is_invalid() {
        let mut event = ec_event("APPROVED", json!({"type": "EXT", "new_deadline": "27/02/2025"}));
        assert_matches!(normalize_event(&event), Err(NormalizeError::InvalidValue { .. }));

        event["entity"]["student_extenuating_circumstances"]["identifier"] = json!("LAWS");
        assert_matches!(normalize_event(&event), Err(NormalizeError::InvalidValue { .. }));
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    #[test]
    fn classify_ec_table() {
        assert_eq!(classify_ec(Some("approved"), Some("ext")).unwrap(), EcDisposition::Grant);
        assert_eq!(classify_ec(Some("DECLINED"), None).unwrap(), EcDisposition::Withdraw);
        assert_matches!(classify_ec(None, Some("EXT")).unwrap(), EcDisposition::Ignore(_));
        assert_matches!(classify_ec(Some("APPROVED"), Some("REFERRED")).unwrap(), EcDisposition::Ignore(_));
        assert_matches!(classify_ec(Some("APPROVED"), Some("LATE_SUB")).unwrap(), EcDisposition::Ignore(_));
        assert!(classify_ec(Some("SHRUG"), Some("EXT")).is_err());
    }

    #[test]
    fn classify_accommodation_table() {
        assert_eq!(classify_accommodation(Some("Approved")).unwrap(), AccommodationDisposition::Apply);
        assert_eq!(classify_accommodation(Some("withdrawn")).unwrap(), AccommodationDisposition::Revoke);
        assert_matches!(classify_accommodation(Some("submitted")).unwrap(), AccommodationDisposition::Ignore(_));
        assert_matches!(classify_accommodation(None).unwrap(), AccommodationDisposition::Ignore(_));
    }
}
