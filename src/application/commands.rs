use crate::application::bootstrap::bootstrap_workspace;
use crate::application::dashboard::Dashboard;
use crate::application::worker::{EventChannel, ReminderWorker};
use crate::domain::buckets::{Bucket, TaskView};
use crate::domain::models::{AddItemPayload, ReminderUnit, Settings, Task};
use crate::domain::reschedule::ReschedulePayload;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value_store::SqliteKeyValueStore;
use crate::infrastructure::notifier::NotificationSurface;
use crate::infrastructure::settings_store::{FileSettingsStore, SettingsStore};
use crate::infrastructure::task_service::{
    InMemoryTaskService, ReqwestTaskService, RoutedTaskService, TaskService,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub type CompanionTaskService = RoutedTaskService<ReqwestTaskService, InMemoryTaskService>;
pub type CompanionDashboard<Z> = Dashboard<CompanionTaskService, FileSettingsStore, Z>;
pub type CompanionWorker<N> =
    ReminderWorker<CompanionTaskService, SqliteKeyValueStore, FileSettingsStore, N>;

pub struct AppState {
    workspace_root: PathBuf,
    config_dir: PathBuf,
    database_path: PathBuf,
    task_service: Arc<CompanionTaskService>,
    settings_store: Arc<FileSettingsStore>,
    key_value_store: Arc<SqliteKeyValueStore>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let task_service = RoutedTaskService::new(
            ReqwestTaskService::new(),
            InMemoryTaskService::new(Utc::now()),
        );

        Ok(Self {
            workspace_root: bootstrap.workspace_root,
            settings_store: Arc::new(FileSettingsStore::new(&bootstrap.config_dir)),
            key_value_store: Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path)),
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            task_service: Arc::new(task_service),
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn settings(&self) -> Result<Settings, InfraError> {
        self.settings_store.load()
    }

    pub fn dashboard<Z: TimeZone>(&self, zone: Z) -> Result<CompanionDashboard<Z>, InfraError> {
        Dashboard::new(
            Arc::clone(&self.task_service),
            Arc::clone(&self.settings_store),
            zone,
        )
    }

    pub fn reminder_worker<N: NotificationSurface>(
        &self,
        surface: Arc<N>,
        events: EventChannel,
    ) -> CompanionWorker<N> {
        ReminderWorker::new(
            Arc::clone(&self.task_service),
            Arc::clone(&self.key_value_store),
            Arc::clone(&self.settings_store),
            surface,
            events,
        )
    }
}

/// Field-level changes to a task; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskEdit {
    pub content: Option<String>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub reminder: Option<Option<(u32, ReminderUnit)>>,
}

impl TaskEdit {
    pub fn apply(&self, task: &Task) -> Task {
        let mut updated = task.clone();
        if let Some(content) = &self.content {
            updated.content = content.trim().to_string();
        }
        if let Some(due_date) = self.due_date {
            updated.due_date = due_date;
        }
        if let Some(reminder) = self.reminder {
            updated.reminder_value = reminder.map(|(value, _)| value);
            updated.reminder_unit = reminder.map(|(_, unit)| unit);
        }
        updated
    }
}

/// Settings changes; blank strings clear the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub notifications_enabled: Option<bool>,
    pub dev_mode_enabled: Option<bool>,
    pub console_logging_enabled: Option<bool>,
}

impl SettingsUpdate {
    pub fn apply(&self, settings: &Settings) -> Settings {
        let mut updated = settings.clone();
        if let Some(server_url) = &self.server_url {
            updated.server_url = non_blank(server_url);
        }
        if let Some(username) = &self.username {
            updated.username = non_blank(username);
        }
        if let Some(password) = &self.password {
            updated.password = non_blank(password);
        }
        if let Some(enabled) = self.notifications_enabled {
            updated.notifications_enabled = enabled;
        }
        if let Some(enabled) = self.dev_mode_enabled {
            updated.dev_mode_enabled = enabled;
        }
        if let Some(enabled) = self.console_logging_enabled {
            updated.console_logging_enabled = enabled;
        }
        updated
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub password_set: bool,
    pub notifications_enabled: bool,
    pub dev_mode_enabled: bool,
    pub console_logging_enabled: bool,
    pub reminders_active: bool,
}

impl From<&Settings> for SettingsResponse {
    fn from(settings: &Settings) -> Self {
        Self {
            server_url: settings.server_url().map(ToOwned::to_owned),
            username: settings.username().map(ToOwned::to_owned),
            password_set: settings.password().is_some(),
            notifications_enabled: settings.notifications_enabled,
            dev_mode_enabled: settings.dev_mode_enabled,
            console_logging_enabled: settings.console_logging_enabled,
            reminders_active: settings.reminders_active(),
        }
    }
}

pub async fn list_tasks_impl<Z: TimeZone>(
    state: &AppState,
    zone: Z,
    bucket: Bucket,
    view: &TaskView,
) -> Result<Vec<Task>, InfraError> {
    let mut dashboard = state.dashboard(zone)?;
    dashboard.refresh().await?;
    Ok(dashboard.view(bucket, view))
}

pub async fn add_item_impl(state: &AppState, payload: AddItemPayload) -> Result<(), InfraError> {
    let mut dashboard = state.dashboard(Utc)?;
    dashboard.add_item(&payload).await?;
    info!(content = %payload.content, "add_item completed");
    Ok(())
}

pub async fn edit_task_impl(
    state: &AppState,
    task_id: &str,
    edit: &TaskEdit,
) -> Result<Task, InfraError> {
    let settings = state.settings()?;
    let tasks = state.task_service.fetch_tasks(&settings).await?;
    let current = tasks
        .iter()
        .find(|task| task.id == task_id)
        .ok_or_else(|| InfraError::NotFound(format!("Task not found: {task_id}")))?;

    let mut dashboard = state.dashboard(Utc)?;
    dashboard.edit_task(&edit.apply(current)).await
}

pub async fn delete_task_impl(state: &AppState, task_id: &str) -> Result<(), InfraError> {
    let mut dashboard = state.dashboard(Utc)?;
    dashboard.delete_task(task_id).await
}

pub async fn reschedule_tasks_impl<Z: TimeZone>(
    state: &AppState,
    zone: Z,
    task_ids: &[String],
    payload: &ReschedulePayload,
) -> Result<usize, InfraError> {
    if task_ids.is_empty() {
        return Err(InfraError::InvalidInput(
            "at least one task id is required".to_string(),
        ));
    }
    let mut dashboard = state.dashboard(zone)?;
    dashboard.refresh().await?;
    dashboard.reschedule_tasks(task_ids, payload).await
}

pub fn show_settings_impl(state: &AppState) -> Result<SettingsResponse, InfraError> {
    Ok(SettingsResponse::from(&state.settings()?))
}

pub fn update_settings_impl(
    state: &AppState,
    update: &SettingsUpdate,
) -> Result<SettingsResponse, InfraError> {
    let updated = update.apply(&state.settings()?);
    state.settings_store.save(&updated)?;
    info!("settings updated");
    Ok(SettingsResponse::from(&updated))
}
