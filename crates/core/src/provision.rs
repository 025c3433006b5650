//! Provision record resolution (RAA tier / extra-time fields).
//!
//! Maps a raw accommodation record to an [`ExtensionDirective`]. Exactly one
//! of three extension groups may carry a value:
//!
//! | Group         | Fields                                   | Directive               |
//! |---------------|------------------------------------------|-------------------------|
//! | days          | `days`                                   | [`ExtensionDirective::Days`] |
//! | hours         | `hours`                                  | [`ExtensionDirective::Hours`] |
//! | time-per-hour | `extra_exam_time`, `rest_break_time`     | [`ExtensionDirective::TimePerHour`] |
//!
//! More than one populated group is a data error, never resolved by guessing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Approval status value that makes a provision actionable.
pub const STATUS_APPROVED: &str = "approved";

/// Tier table rows with this assessment type apply to any assessment.
pub const ANY_ASSESSMENT_TYPE: &str = "*";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Raw provision fields as they arrive from SITS. Values are left as JSON
/// scalars because SITS sends numbers, numeric strings and empty strings
/// interchangeably.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRecord {
    pub approval_status: Option<String>,
    pub provision_tier: Option<String>,
    pub days: Option<Value>,
    pub hours: Option<Value>,
    pub extra_exam_time: Option<Value>,
    pub rest_break_time: Option<Value>,
}

/// Extension kind tag, stored in the tier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionKind {
    Days,
    Hours,
    TimePerHour,
}

impl ExtensionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionKind::Days => "days",
            ExtensionKind::Hours => "hours",
            ExtensionKind::TimePerHour => "time_per_hour",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "days" => Some(ExtensionKind::Days),
            "hours" => Some(ExtensionKind::Hours),
            "time_per_hour" => Some(ExtensionKind::TimePerHour),
            _ => None,
        }
    }
}

/// Normalized extension: kind plus magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtensionDirective {
    /// Shift the deadline by this many days.
    Days { days: f64 },
    /// Add this many hours (to the time limit of a timed activity, otherwise
    /// to the deadline).
    Hours { hours: f64 },
    /// Extra exam time and rest break, both in minutes per hour of assessment.
    TimePerHour { extra_minutes: f64, rest_minutes: f64 },
}

impl ExtensionDirective {
    pub fn kind(&self) -> ExtensionKind {
        match self {
            ExtensionDirective::Days { .. } => ExtensionKind::Days,
            ExtensionDirective::Hours { .. } => ExtensionKind::Hours,
            ExtensionDirective::TimePerHour { .. } => ExtensionKind::TimePerHour,
        }
    }

    /// Rounded percentage of extra time for per-hour directives.
    ///
    /// 19 minutes extra plus 5 minutes rest per hour is 40%.
    pub fn percentage(&self) -> Option<i64> {
        match self {
            ExtensionDirective::TimePerHour {
                extra_minutes,
                rest_minutes,
            } => Some(((extra_minutes + rest_minutes) / 60.0 * 100.0).round() as i64),
            _ => None,
        }
    }

    /// Short magnitude label used in group names: `40%`, `2d`, `3h`.
    pub fn label(&self) -> String {
        match self {
            ExtensionDirective::Days { days } => format!("{}d", format_magnitude(*days)),
            ExtensionDirective::Hours { hours } => format!("{}h", format_magnitude(*hours)),
            ExtensionDirective::TimePerHour { .. } => {
                format!("{}%", self.percentage().unwrap_or_default())
            }
        }
    }
}

fn format_magnitude(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Data error raised when a provision record is internally inconsistent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProvisionError {
    #[error("Conflicting provisions: more than one extension type is set ({})", .groups.join(", "))]
    ConflictingProvisions { groups: Vec<&'static str> },
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Interpret a raw JSON scalar as a positive number.
///
/// Numbers and numeric strings greater than zero are present; absent, zero,
/// negative, empty and non-numeric values are all "not set".
pub fn positive_number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n > 0.0).then_some(n)
}

/// Whether an approval status means "approved" (case-insensitive).
pub fn is_approved(status: Option<&str>) -> bool {
    status.is_some_and(|s| s.trim().eq_ignore_ascii_case(STATUS_APPROVED))
}

/// Resolve a provision record to an extension directive.
///
/// Returns `Ok(None)` when the record is not approved or carries no value,
/// and [`ProvisionError::ConflictingProvisions`] when more than one
/// extension group is populated.
pub fn resolve_provisions(
    record: &ProvisionRecord,
) -> Result<Option<ExtensionDirective>, ProvisionError> {
    if !is_approved(record.approval_status.as_deref()) {
        return Ok(None);
    }

    let days = positive_number(record.days.as_ref());
    let hours = positive_number(record.hours.as_ref());
    let extra = positive_number(record.extra_exam_time.as_ref());
    let rest = positive_number(record.rest_break_time.as_ref());

    let mut candidates = Vec::new();
    if let Some(days) = days {
        candidates.push(("days", ExtensionDirective::Days { days }));
    }
    if let Some(hours) = hours {
        candidates.push(("hours", ExtensionDirective::Hours { hours }));
    }
    if extra.is_some() || rest.is_some() {
        candidates.push((
            "time_per_hour",
            ExtensionDirective::TimePerHour {
                extra_minutes: extra.unwrap_or(0.0),
                rest_minutes: rest.unwrap_or(0.0),
            },
        ));
    }

    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.pop().map(|(_, directive)| directive)),
        _ => Err(ProvisionError::ConflictingProvisions {
            groups: candidates.into_iter().map(|(name, _)| name).collect(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tier table
// ---------------------------------------------------------------------------

/// One configured tier row.
#[derive(Debug, Clone, PartialEq)]
pub struct TierEntry {
    pub assessment_type: String,
    pub tier: String,
    pub kind: ExtensionKind,
    pub value: f64,
    /// Rest break minutes per hour; only meaningful for `TimePerHour`.
    pub break_value: Option<f64>,
    pub enabled: bool,
}

impl TierEntry {
    /// The directive this row grants, or `None` for non-positive values.
    pub fn directive(&self) -> Option<ExtensionDirective> {
        let rest = self.break_value.filter(|v| *v > 0.0).unwrap_or(0.0);
        if self.value <= 0.0 && rest <= 0.0 {
            return None;
        }
        Some(match self.kind {
            ExtensionKind::Days => ExtensionDirective::Days { days: self.value },
            ExtensionKind::Hours => ExtensionDirective::Hours { hours: self.value },
            ExtensionKind::TimePerHour => ExtensionDirective::TimePerHour {
                extra_minutes: self.value.max(0.0),
                rest_minutes: rest,
            },
        })
    }
}

/// Read-only tier configuration.
#[derive(Debug, Clone, Default)]
pub struct TierTable {
    entries: Vec<TierEntry>,
}

impl TierTable {
    pub fn new(entries: Vec<TierEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the directive for a tier and assessment type.
    ///
    /// An exact assessment-type match wins over a wildcard row. Disabled rows
    /// are ignored. Tier codes compare case-insensitively.
    pub fn lookup(&self, tier: &str, assessment_type: Option<&str>) -> Option<ExtensionDirective> {
        let tier = tier.trim();
        let matching = |want: &str| {
            self.entries.iter().find(|e| {
                e.enabled
                    && e.tier.eq_ignore_ascii_case(tier)
                    && e.assessment_type.eq_ignore_ascii_case(want)
            })
        };

        assessment_type
            .and_then(matching)
            .or_else(|| matching(ANY_ASSESSMENT_TYPE))
            .and_then(TierEntry::directive)
    }
}

/// Resolve with the tier table as a fallback for approved records that carry
/// no explicit extension values.
pub fn resolve_with_tiers(
    record: &ProvisionRecord,
    tiers: &TierTable,
    assessment_type: Option<&str>,
) -> Result<Option<ExtensionDirective>, ProvisionError> {
    if let Some(directive) = resolve_provisions(record)? {
        return Ok(Some(directive));
    }
    if !is_approved(record.approval_status.as_deref()) {
        return Ok(None);
    }
    Ok(record
        .provision_tier
        .as_deref()
        .and_then(|tier| tiers.lookup(tier, assessment_type)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
