use crate::domain::models::Task;
use chrono::{DateTime, Duration, Utc};

/// Period of the background evaluation timer; also the width of the window
/// each evaluation looks back over.
pub const EVALUATION_PERIOD_MINUTES: i64 = 5;

pub fn evaluation_period() -> Duration {
    Duration::minutes(EVALUATION_PERIOD_MINUTES)
}

/// `(last_checkpoint, now)` for an evaluation running at `now`.
pub fn evaluation_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - evaluation_period(), now)
}

pub fn reminder_time(task: &Task) -> Option<DateTime<Utc>> {
    let due_date = task.due_date?;
    let (value, unit) = task.reminder()?;
    let offset = Duration::milliseconds(i64::from(value) * unit.millis());
    due_date.checked_sub_signed(offset)
}

/// Tasks whose reminder falls in `(last_checkpoint, now]`.
pub fn due_tasks(
    tasks: &[Task],
    now: DateTime<Utc>,
    last_checkpoint: DateTime<Utc>,
) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| {
            reminder_time(task)
                .map(|reminder_at| last_checkpoint < reminder_at && reminder_at <= now)
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}
