use crate::domain::buckets::{bucket, Bucket, Buckets, TaskView};
use crate::domain::models::{AddItemPayload, Project, Settings, Tag, Task};
use crate::domain::reschedule::{reschedule, ReschedulePayload};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::settings_store::SettingsStore;
use crate::infrastructure::task_service::TaskService;
use chrono::{DateTime, TimeZone, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(20);

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardSnapshot {
    pub buckets: Buckets,
    pub projects: Vec<Project>,
    pub tags: Vec<Tag>,
    pub error: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Foreground view of the server's tasks: fetch, bucket, and mutate.
pub struct Dashboard<T, S, Z>
where
    T: TaskService + 'static,
    S: SettingsStore,
    Z: TimeZone,
{
    task_service: Arc<T>,
    settings_store: Arc<S>,
    zone: Z,
    settings: Settings,
    snapshot: DashboardSnapshot,
    now_provider: NowProvider,
}

impl<T, S, Z> Dashboard<T, S, Z>
where
    T: TaskService + 'static,
    S: SettingsStore,
    Z: TimeZone,
{
    pub fn new(task_service: Arc<T>, settings_store: Arc<S>, zone: Z) -> Result<Self, InfraError> {
        let settings = settings_store.load()?;
        Ok(Self {
            task_service,
            settings_store,
            zone,
            settings,
            snapshot: DashboardSnapshot::default(),
            now_provider: Arc::new(Utc::now),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn snapshot(&self) -> &DashboardSnapshot {
        &self.snapshot
    }

    pub fn view(&self, bucket: Bucket, view: &TaskView) -> Vec<Task> {
        view.apply(self.snapshot.buckets.get(bucket))
    }

    pub fn reload_settings(&mut self) -> Result<(), InfraError> {
        self.settings = self.settings_store.load()?;
        Ok(())
    }

    /// Fetches tasks, projects and tags together. Without complete
    /// credentials the snapshot is emptied instead.
    pub async fn refresh(&mut self) -> Result<&DashboardSnapshot, InfraError> {
        if !self.settings.has_credentials() {
            debug!("settings incomplete; dashboard left empty");
            self.snapshot = DashboardSnapshot::default();
            return Ok(&self.snapshot);
        }

        let settings = &self.settings;
        let service = self.task_service.as_ref();
        let fetched = tokio::try_join!(
            service.fetch_tasks(settings),
            service.fetch_projects(settings),
            service.fetch_tags(settings),
        );

        match fetched {
            Ok((tasks, projects, tags)) => {
                let now = (self.now_provider)();
                self.snapshot = DashboardSnapshot {
                    buckets: bucket(&tasks, &now.with_timezone(&self.zone)),
                    projects,
                    tags,
                    error: None,
                    refreshed_at: Some(now),
                };
                debug!(tasks = tasks.len(), "dashboard refreshed");
                Ok(&self.snapshot)
            }
            Err(error) => {
                warn!(%error, "dashboard refresh failed");
                self.snapshot.error = Some(format!("Failed to fetch data: {error}"));
                Err(error)
            }
        }
    }

    pub async fn add_item(&mut self, payload: &AddItemPayload) -> Result<(), InfraError> {
        const ACTION: &str = "add item";
        self.require_server_url(ACTION)?;
        if let Err(message) = payload.validate() {
            return Err(self.fail(ACTION, InfraError::InvalidInput(message)));
        }
        if let Err(error) = self.task_service.add_item(payload, &self.settings).await {
            return Err(self.fail(ACTION, error));
        }
        info!(item_type = payload.item_type.as_str(), "item added");
        self.refresh().await.map(|_| ())
    }

    pub async fn edit_task(&mut self, task: &Task) -> Result<Task, InfraError> {
        const ACTION: &str = "edit task";
        self.require_server_url(ACTION)?;
        if let Err(message) = task.validate() {
            return Err(self.fail(ACTION, InfraError::InvalidInput(message)));
        }
        let updated = match self.task_service.edit_task(task, &self.settings).await {
            Ok(updated) => updated,
            Err(error) => return Err(self.fail(ACTION, error)),
        };
        info!(task_id = %task.id, "task updated");
        self.refresh().await?;
        Ok(updated)
    }

    pub async fn delete_task(&mut self, task_id: &str) -> Result<(), InfraError> {
        const ACTION: &str = "delete task";
        self.require_server_url(ACTION)?;
        if let Err(error) = self.task_service.delete_task(task_id, &self.settings).await {
            return Err(self.fail(ACTION, error));
        }
        info!(task_id, "task deleted");
        self.refresh().await.map(|_| ())
    }

    /// Moves the selected tasks from the current snapshot. Edits run
    /// concurrently and the batch fails if any edit fails.
    pub async fn reschedule_tasks(
        &mut self,
        task_ids: &[String],
        payload: &ReschedulePayload,
    ) -> Result<usize, InfraError> {
        const ACTION: &str = "reschedule tasks";
        self.require_server_url(ACTION)?;

        let now = (self.now_provider)().with_timezone(&self.zone);
        let candidates = self.snapshot.buckets.unique_tasks();
        let updated = match reschedule(&candidates, task_ids, payload, &now) {
            Ok(updated) => updated,
            Err(message) => return Err(self.fail(ACTION, InfraError::InvalidInput(message))),
        };

        let mut edits: JoinSet<Result<Task, InfraError>> = JoinSet::new();
        for task in updated {
            let task_service = Arc::clone(&self.task_service);
            let settings = self.settings.clone();
            edits.spawn(async move { task_service.edit_task(&task, &settings).await });
        }

        let mut edited = 0;
        let mut first_error = None;
        while let Some(joined) = edits.join_next().await {
            let outcome = joined
                .map_err(|error| InfraError::Network(format!("failed to join reschedule edit: {error}")))
                .and_then(|result| result);
            match outcome {
                Ok(_) => edited += 1,
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }
        if let Some(error) = first_error {
            return Err(self.fail(ACTION, error));
        }

        info!(edited, "tasks rescheduled");
        self.refresh().await?;
        Ok(edited)
    }

    /// Refreshes every `period` until `shutdown` resolves, picking up settings
    /// changes made by other processes.
    pub async fn watch<F, Fut>(&mut self, period: Duration, mut on_refresh: F, shutdown: Fut)
    where
        F: FnMut(&DashboardSnapshot),
        Fut: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(error) = self.reload_settings() {
                        warn!(%error, "failed to reload settings");
                    }
                    if let Err(error) = self.refresh().await {
                        warn!(%error, "scheduled refresh failed");
                    }
                    on_refresh(&self.snapshot);
                }
            }
        }
    }

    fn require_server_url(&mut self, action: &str) -> Result<(), InfraError> {
        if self.settings.server_url().is_some() {
            return Ok(());
        }
        let message = format!("Cannot {action}: Server URL is not configured.");
        self.snapshot.error = Some(message.clone());
        Err(InfraError::Configuration(message))
    }

    fn fail(&mut self, action: &str, error: InfraError) -> InfraError {
        warn!(action, %error, "dashboard action failed");
        self.snapshot.error = Some(format!("Failed to {action}: {error}"));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::buckets::SortKey;
    use crate::domain::models::TaskType;
    use crate::domain::reschedule::RescheduleUnit;
    use crate::infrastructure::settings_store::InMemorySettingsStore;
    use crate::infrastructure::task_service::InMemoryTaskService;

    type TestDashboard = Dashboard<InMemoryTaskService, InMemorySettingsStore, Utc>;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        fixed_time("2026-02-16T10:00:00Z")
    }

    fn complete_settings() -> Settings {
        Settings {
            server_url: Some("https://tasks.example.com".to_string()),
            username: Some("me".to_string()),
            password: Some("secret".to_string()),
            dev_mode_enabled: true,
            ..Settings::default()
        }
    }

    fn dashboard(settings: Settings) -> (TestDashboard, Arc<InMemoryTaskService>) {
        let service = Arc::new(InMemoryTaskService::new(now()));
        let store = Arc::new(InMemorySettingsStore::new(settings));
        let dashboard = Dashboard::new(Arc::clone(&service), store, Utc)
            .expect("dashboard")
            .with_now_provider(Arc::new(now));
        (dashboard, service)
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|task| task.id.as_str()).collect()
    }

    #[tokio::test]
    async fn refresh_buckets_fixture_data() {
        let (mut dashboard, _) = dashboard(complete_settings());
        let snapshot = dashboard.refresh().await.expect("refresh");

        assert_eq!(ids(&snapshot.buckets.today), vec!["1", "2"]);
        assert_eq!(ids(&snapshot.buckets.upcoming), vec!["4", "5", "7"]);
        assert_eq!(ids(&snapshot.buckets.inbox), vec!["2", "6"]);
        assert_eq!(snapshot.projects.len(), 3);
        assert_eq!(snapshot.tags.len(), 3);
        assert_eq!(snapshot.refreshed_at, Some(now()));
    }

    #[tokio::test]
    async fn incomplete_credentials_leave_snapshot_empty() {
        let (mut dashboard, _) = dashboard(Settings {
            password: None,
            ..complete_settings()
        });
        let snapshot = dashboard.refresh().await.expect("refresh");
        assert_eq!(*snapshot, DashboardSnapshot::default());
    }

    #[tokio::test]
    async fn clearing_credentials_through_settings_empties_snapshot() {
        let service = Arc::new(InMemoryTaskService::new(now()));
        let store = Arc::new(InMemorySettingsStore::new(complete_settings()));
        let mut dashboard = Dashboard::new(service, Arc::clone(&store), Utc)
            .expect("dashboard")
            .with_now_provider(Arc::new(now));
        dashboard.refresh().await.expect("refresh");
        assert!(!dashboard.snapshot().buckets.today.is_empty());

        store
            .save(&Settings {
                username: None,
                ..complete_settings()
            })
            .expect("save settings");
        dashboard.reload_settings().expect("reload settings");
        dashboard.refresh().await.expect("refresh");

        assert_eq!(*dashboard.snapshot(), DashboardSnapshot::default());
        assert_eq!(dashboard.settings().username, None);
    }

    #[tokio::test]
    async fn view_sorts_and_filters_a_bucket() {
        let (mut dashboard, _) = dashboard(complete_settings());
        dashboard.refresh().await.expect("refresh");

        let view = TaskView::new(SortKey::Content, "");
        assert_eq!(ids(&dashboard.view(Bucket::Upcoming, &view)), vec!["7", "4", "5"]);
        let search = TaskView::new(SortKey::DueDate, "trip");
        assert_eq!(ids(&dashboard.view(Bucket::Upcoming, &search)), vec!["4"]);
    }

    #[tokio::test]
    async fn add_item_refetches() {
        let (mut dashboard, _) = dashboard(complete_settings());
        dashboard.refresh().await.expect("refresh");

        let payload = AddItemPayload {
            content: "Water plants".to_string(),
            item_type: TaskType::Task,
            project_id: None,
            due_date: None,
            reminder_value: None,
            reminder_unit: None,
        };
        dashboard.add_item(&payload).await.expect("add");

        let inbox = &dashboard.snapshot().buckets.inbox;
        assert!(inbox.iter().any(|task| task.content == "Water plants"));
        assert_eq!(dashboard.snapshot().error, None);
    }

    #[tokio::test]
    async fn mutations_need_a_server_url() {
        let (mut dashboard, _) = dashboard(Settings {
            server_url: None,
            ..complete_settings()
        });
        let result = dashboard.delete_task("1").await;

        assert!(matches!(result, Err(InfraError::Configuration(_))));
        assert_eq!(
            dashboard.snapshot().error.as_deref(),
            Some("Cannot delete task: Server URL is not configured.")
        );
    }

    #[tokio::test]
    async fn failed_mutation_reports_prefixed_error() {
        let (mut dashboard, _) = dashboard(complete_settings());
        dashboard.refresh().await.expect("refresh");

        let result = dashboard.delete_task("missing").await;
        assert!(matches!(result, Err(InfraError::NotFound(_))));
        let error = dashboard.snapshot().error.clone().expect("error message");
        assert!(error.starts_with("Failed to delete task: "));
    }

    #[tokio::test]
    async fn edit_and_delete_refetch() {
        let (mut dashboard, service) = dashboard(complete_settings());
        dashboard.refresh().await.expect("refresh");

        let mut task = dashboard.snapshot().buckets.today[0].clone();
        task.content = "Finalize annual report".to_string();
        dashboard.edit_task(&task).await.expect("edit");
        assert_eq!(dashboard.snapshot().buckets.today[0].content, "Finalize annual report");

        dashboard.delete_task("2").await.expect("delete");
        assert_eq!(ids(&dashboard.snapshot().buckets.today), vec!["1"]);
        let remaining = service.fetch_tasks(&complete_settings()).await.expect("fetch");
        assert_eq!(remaining.len(), 6);
    }

    #[tokio::test]
    async fn reschedule_moves_selected_tasks_between_buckets() {
        let (mut dashboard, _) = dashboard(complete_settings());
        dashboard.refresh().await.expect("refresh");

        let payload = ReschedulePayload::Relative {
            value: 1,
            unit: RescheduleUnit::Days,
        };
        let edited = dashboard
            .reschedule_tasks(&["1".to_string(), "2".to_string()], &payload)
            .await
            .expect("reschedule");

        assert_eq!(edited, 2);
        assert!(dashboard.snapshot().buckets.today.is_empty());
        assert_eq!(ids(&dashboard.snapshot().buckets.upcoming), vec!["1", "2", "4", "5", "7"]);
    }

    #[tokio::test]
    async fn reschedule_fails_when_an_edit_fails() {
        let (mut dashboard, service) = dashboard(complete_settings());
        dashboard.refresh().await.expect("refresh");
        service
            .delete_task("2", &complete_settings())
            .await
            .expect("delete behind the dashboard's back");

        let payload = ReschedulePayload::Relative {
            value: 2,
            unit: RescheduleUnit::Hours,
        };
        let result = dashboard
            .reschedule_tasks(&["1".to_string(), "2".to_string()], &payload)
            .await;

        assert!(matches!(result, Err(InfraError::NotFound(_))));
        let error = dashboard.snapshot().error.clone().expect("error message");
        assert!(error.starts_with("Failed to reschedule tasks: "));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_refreshes_until_shutdown() {
        let (mut dashboard, _) = dashboard(complete_settings());
        let mut refreshes = 0;
        dashboard
            .watch(
                REFRESH_INTERVAL,
                |snapshot| {
                    assert!(snapshot.error.is_none());
                    refreshes += 1;
                },
                tokio::time::sleep(REFRESH_INTERVAL * 2 + Duration::from_secs(1)),
            )
            .await;
        assert_eq!(refreshes, 3);
    }
}
