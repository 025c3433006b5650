//! Deadline arithmetic for extension overrides.
//!
//! Everything here is pure: the caller supplies the activity's current
//! schedule (and, for guards, the current time from an injectable clock).

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityType;
use crate::provision::ExtensionDirective;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Prefix of every group created for reasonable-adjustment overrides.
pub const RAA_GROUP_PREFIX: &str = "RAA";

const SECS_PER_MINUTE: f64 = 60.0;
const SECS_PER_HOUR: f64 = 3600.0;
const SECS_PER_DAY: f64 = 86_400.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An activity's default schedule as reported by its activity store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySchedule {
    /// When the activity opens (quiz open, assignment allow-submissions-from).
    pub open: Option<Timestamp>,
    /// When submissions close (due date, quiz close).
    pub close: Option<Timestamp>,
    /// Time limit for timed activities, in seconds.
    pub time_limit_secs: Option<i64>,
}

impl ActivitySchedule {
    /// A timed activity has a positive time limit.
    pub fn is_timed(&self) -> bool {
        self.time_limit_secs.is_some_and(|t| t > 0)
    }

    /// Whether the whole submission window has elapsed at `now`.
    pub fn has_closed(&self, now: Timestamp) -> bool {
        self.close.is_some_and(|close| close <= now)
    }
}

/// The schedule written as a user or group override. `None` fields inherit
/// the activity default. This is also the shape of ledger backups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOverride {
    pub open: Option<Timestamp>,
    pub close: Option<Timestamp>,
    pub time_limit_secs: Option<i64>,
}

/// Why no accommodation override can be planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSkip {
    /// The activity has no close date to extend.
    NoDeadline,
    /// The directive resolves to a zero-length extension.
    NothingToExtend,
    /// The extension pushes the deadline or time limit past what can be
    /// represented; the record is bad data.
    OutOfRange,
}

// ---------------------------------------------------------------------------
// Extenuating circumstances
// ---------------------------------------------------------------------------

/// New EC deadline: the granted calendar date combined with the original
/// deadline's time of day, both read in `tz`.
///
/// Returns `None` only if the local time does not exist on the new date
/// (a DST gap); callers treat that as a data error.
pub fn ec_deadline<Tz: TimeZone>(
    new_date: NaiveDate,
    original_close: Timestamp,
    tz: &Tz,
) -> Option<Timestamp> {
    let time_of_day = original_close.with_timezone(tz).time();
    tz.from_local_datetime(&new_date.and_time(time_of_day))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// EC override built on top of whatever override the subject already had.
pub fn ec_override(new_close: Timestamp, existing: Option<&ScheduleOverride>) -> ScheduleOverride {
    ScheduleOverride {
        close: Some(new_close),
        ..existing.copied().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Accommodations
// ---------------------------------------------------------------------------

/// Whole seconds as a `Duration`, or `None` when the magnitude is beyond
/// what a timestamp can carry.
fn seconds(value: f64) -> Option<Duration> {
    if !value.is_finite() {
        return None;
    }
    Duration::try_seconds(value.round() as i64)
}

fn shift(at: Timestamp, by: Duration) -> Result<Timestamp, PlanSkip> {
    at.checked_add_signed(by).ok_or(PlanSkip::OutOfRange)
}

/// Extend a time limit and push the close date only if the longer attempt no
/// longer fits in the original open/close window.
fn extend_time_limit(
    schedule: &ActivitySchedule,
    close: Timestamp,
    limit_secs: i64,
    extra: Duration,
) -> Result<ScheduleOverride, PlanSkip> {
    let new_limit = limit_secs
        .checked_add(extra.num_seconds())
        .ok_or(PlanSkip::OutOfRange)?;
    let fits = match schedule.open {
        Some(open) => {
            let attempt = Duration::try_seconds(new_limit).ok_or(PlanSkip::OutOfRange)?;
            shift(open, attempt)? <= close
        }
        None => true,
    };
    Ok(ScheduleOverride {
        open: None,
        close: if fits { None } else { Some(shift(close, extra)?) },
        time_limit_secs: Some(new_limit),
    })
}

/// The extension as a positive duration.
fn extension(secs: f64) -> Result<Duration, PlanSkip> {
    let extra = seconds(secs).ok_or(PlanSkip::OutOfRange)?;
    if extra.is_zero() {
        return Err(PlanSkip::NothingToExtend);
    }
    Ok(extra)
}

fn close_only(close: Timestamp, extra: Duration) -> Result<ScheduleOverride, PlanSkip> {
    Ok(ScheduleOverride {
        close: Some(shift(close, extra)?),
        ..Default::default()
    })
}

/// Plan the override for an accommodation directive.
///
/// | Directive     | Timed activity                              | Untimed activity            |
/// |---------------|---------------------------------------------|-----------------------------|
/// | Days          | close + days                                | close + days                |
/// | Hours         | limit + hours, close pushed if it no longer fits | close + hours          |
/// | TimePerHour   | limit + limit × rate, close pushed if needed | close + flat (extra + rest) minutes |
pub fn plan_accommodation(
    schedule: &ActivitySchedule,
    directive: &ExtensionDirective,
) -> Result<ScheduleOverride, PlanSkip> {
    let close = schedule.close.ok_or(PlanSkip::NoDeadline)?;
    let timed_limit = schedule.time_limit_secs.filter(|t| *t > 0);

    match (*directive, timed_limit) {
        (ExtensionDirective::Days { days }, _) => close_only(close, extension(days * SECS_PER_DAY)?),
        (ExtensionDirective::Hours { hours }, Some(limit)) => {
            extend_time_limit(schedule, close, limit, extension(hours * SECS_PER_HOUR)?)
        }
        (ExtensionDirective::Hours { hours }, None) => {
            close_only(close, extension(hours * SECS_PER_HOUR)?)
        }
        (
            ExtensionDirective::TimePerHour {
                extra_minutes,
                rest_minutes,
            },
            limit,
        ) => {
            let minutes_per_hour = extra_minutes + rest_minutes;
            match limit {
                Some(limit) => {
                    let hours = limit as f64 / SECS_PER_HOUR;
                    let extra = extension(hours * minutes_per_hour * SECS_PER_MINUTE)?;
                    extend_time_limit(schedule, close, limit, extra)
                }
                None => close_only(close, extension(minutes_per_hour * SECS_PER_MINUTE)?),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Group naming
// ---------------------------------------------------------------------------

/// Common prefix of all RAA group names for one activity.
pub fn raa_group_prefix(activity_type: ActivityType, instance_id: DbId) -> String {
    format!("{RAA_GROUP_PREFIX}-{}-{instance_id}-", activity_type.as_str())
}

/// Deterministic RAA group name, e.g. `RAA-quiz-42-40%`.
///
/// Students with the same magnitude on the same activity share one group.
pub fn raa_group_name(
    activity_type: ActivityType,
    instance_id: DbId,
    directive: &ExtensionDirective,
) -> String {
    format!(
        "{}{}",
        raa_group_prefix(activity_type, instance_id),
        directive.label()
    )
}

/// Whether `name` is an RAA group belonging to the given activity.
pub fn is_raa_group_for(name: &str, activity_type: ActivityType, instance_id: DbId) -> bool {
    name.starts_with(&raa_group_prefix(activity_type, instance_id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
