use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Task,
    Note,
    Project,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Note => "note",
            Self::Project => "project",
        }
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "task" => Ok(Self::Task),
            "note" => Ok(Self::Note),
            "project" => Ok(Self::Project),
            other => Err(format!("unknown item type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderUnit {
    Minutes,
    Hours,
    Days,
}

impl ReminderUnit {
    pub fn millis(self) -> i64 {
        match self {
            Self::Minutes => 60 * 1000,
            Self::Hours => 60 * 60 * 1000,
            Self::Days => 24 * 60 * 60 * 1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
        }
    }
}

impl FromStr for ReminderUnit {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "m" | "minute" | "minutes" => Ok(Self::Minutes),
            "h" | "hour" | "hours" => Ok(Self::Hours),
            "d" | "day" | "days" => Ok(Self::Days),
            other => Err(format!("unknown reminder unit '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
}

/// Snapshot of the project a task belongs to; not kept in sync with the project itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_value: Option<u32>,
    #[serde(default)]
    pub reminder_unit: Option<ReminderUnit>,
    #[serde(default)]
    pub project: Option<ProjectRef>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        match (self.reminder_value, self.reminder_unit) {
            (Some(0), Some(_)) => Err("task.reminder_value must be > 0".to_string()),
            (Some(_), None) | (None, Some(_)) => Err(
                "task.reminder_value and task.reminder_unit must be set together".to_string(),
            ),
            _ => Ok(()),
        }
    }

    /// Complete reminder offset, or `None` when either half is missing.
    pub fn reminder(&self) -> Option<(u32, ReminderUnit)> {
        match (self.reminder_value, self.reminder_unit) {
            (Some(value), Some(unit)) if value > 0 => Some((value, unit)),
            _ => None,
        }
    }

    /// Canonical string form of the due date, used as the notification dedup key.
    pub fn due_key(&self) -> Option<String> {
        self.due_date.map(format_due_key)
    }

    /// Creation order derived from the server-assigned numeric id.
    pub fn creation_rank(&self) -> Option<u64> {
        self.id.trim().parse::<u64>().ok()
    }
}

pub fn format_due_key(due_date: DateTime<Utc>) -> String {
    due_date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub notifications_enabled: bool,
    #[serde(default)]
    pub dev_mode_enabled: bool,
    #[serde(default = "default_console_logging")]
    pub console_logging_enabled: bool,
}

fn default_console_logging() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: None,
            username: None,
            password: None,
            notifications_enabled: false,
            dev_mode_enabled: false,
            console_logging_enabled: true,
        }
    }
}

impl Settings {
    pub fn server_url(&self) -> Option<&str> {
        non_blank(self.server_url.as_deref())
    }

    pub fn username(&self) -> Option<&str> {
        non_blank(self.username.as_deref())
    }

    pub fn password(&self) -> Option<&str> {
        non_blank(self.password.as_deref())
    }

    pub fn has_credentials(&self) -> bool {
        self.server_url().is_some() && self.username().is_some() && self.password().is_some()
    }

    pub fn reminders_active(&self) -> bool {
        self.notifications_enabled && self.has_credentials()
    }

    /// `{server_url}/task/{id}` with any trailing slash on the server URL removed.
    pub fn task_url(&self, task_id: &str) -> Option<String> {
        self.server_url()
            .map(|server_url| format!("{}/task/{task_id}", server_url.trim_end_matches('/')))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Last due date a reminder was raised for, per task id. `None` marks a task
/// that was seen but suppressed as stale.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct NotifiedTasks {
    entries: BTreeMap<String, Option<String>>,
}

impl NotifiedTasks {
    pub fn get(&self, task_id: &str) -> Option<&Option<String>> {
        self.entries.get(task_id)
    }

    pub fn already_notified(&self, task: &Task) -> bool {
        match (self.entries.get(&task.id), task.due_key()) {
            (Some(Some(recorded)), Some(current)) => *recorded == current,
            _ => false,
        }
    }

    pub fn record(&mut self, task_id: impl Into<String>, due_key: Option<String>) {
        self.entries.insert(task_id.into(), due_key);
    }

    pub fn retain_known(&mut self, known_ids: &HashSet<&str>) {
        self.entries.retain(|task_id, _| known_ids.contains(task_id.as_str()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddItemPayload {
    pub content: String,
    #[serde(rename = "type")]
    pub item_type: TaskType,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub reminder_value: Option<u32>,
    #[serde(default)]
    pub reminder_unit: Option<ReminderUnit>,
}

impl AddItemPayload {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.content, "item.content")?;
        if self.reminder_value.is_some() != self.reminder_unit.is_some() {
            return Err(
                "item.reminder_value and item.reminder_unit must be set together".to_string(),
            );
        }
        if self.reminder_value.is_some() && self.due_date.is_none() {
            return Err("item.reminder requires item.due_date".to_string());
        }
        Ok(())
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
