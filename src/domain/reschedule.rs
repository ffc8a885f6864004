use crate::domain::models::Task;
use chrono::{DateTime, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RescheduleUnit {
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

impl FromStr for RescheduleUnit {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minute" | "minutes" => Ok(Self::Minutes),
            "hour" | "hours" => Ok(Self::Hours),
            "day" | "days" => Ok(Self::Days),
            "month" | "months" => Ok(Self::Months),
            "year" | "years" => Ok(Self::Years),
            other => Err(format!("unknown reschedule unit '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReschedulePayload {
    Specific { date: NaiveDate },
    Relative { value: i64, unit: RescheduleUnit },
}

/// Applies `payload` to every task whose id is in `ids`, leaving all other
/// fields untouched. Ids that match no task are ignored.
pub fn reschedule<Tz: TimeZone>(
    tasks: &[Task],
    ids: &[String],
    payload: &ReschedulePayload,
    now: &DateTime<Tz>,
) -> Result<Vec<Task>, String> {
    let selected: HashSet<&str> = ids.iter().map(String::as_str).collect();
    tasks
        .iter()
        .filter(|task| selected.contains(task.id.as_str()))
        .map(|task| {
            let due_date = new_due_date(task.due_date, payload, now)?;
            Ok(Task {
                due_date: Some(due_date),
                ..task.clone()
            })
        })
        .collect()
}

pub fn new_due_date<Tz: TimeZone>(
    current: Option<DateTime<Utc>>,
    payload: &ReschedulePayload,
    now: &DateTime<Tz>,
) -> Result<DateTime<Utc>, String> {
    let zone = now.timezone();
    match payload {
        ReschedulePayload::Specific { date } => {
            let midnight = date.and_time(NaiveTime::MIN);
            resolve_local(&zone, midnight)
                .ok_or_else(|| format!("{date} has no local midnight in this time zone"))
        }
        ReschedulePayload::Relative { value, unit } => {
            let base = current.unwrap_or_else(|| now.with_timezone(&Utc));
            let shifted = match unit {
                RescheduleUnit::Minutes => add_fixed(base, Duration::try_minutes(*value)),
                RescheduleUnit::Hours => add_fixed(base, Duration::try_hours(*value)),
                RescheduleUnit::Days => add_fixed(base, Duration::try_days(*value)),
                RescheduleUnit::Months => add_months(&zone, base, *value),
                RescheduleUnit::Years => value
                    .checked_mul(12)
                    .and_then(|months| add_months(&zone, base, months)),
            };
            shifted.ok_or_else(|| format!("shifting by {value} {unit:?} is out of range"))
        }
    }
}

fn add_fixed(base: DateTime<Utc>, offset: Option<Duration>) -> Option<DateTime<Utc>> {
    base.checked_add_signed(offset?)
}

// Month arithmetic runs on the local wall clock; days past the end of the
// target month clamp to its last day.
fn add_months<Tz: TimeZone>(zone: &Tz, base: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let local = base.with_timezone(zone).naive_local();
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    let shifted = if months >= 0 {
        local.checked_add_months(magnitude)?
    } else {
        local.checked_sub_months(magnitude)?
    };
    resolve_local(zone, shifted)
}

// Wall-clock times skipped by a DST jump resolve to the first instant after the gap.
fn resolve_local<Tz: TimeZone>(zone: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(value) => Some(value.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            let after_gap = local.checked_add_signed(Duration::hours(1))?;
            zone.from_local_datetime(&after_gap)
                .earliest()
                .map(|value| value.with_timezone(&Utc))
        }
    }
}
