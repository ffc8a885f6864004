use crate::domain::models::{Settings, Task};
use crate::domain::reminder::{due_tasks, evaluation_window};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value_store::KeyValueStore;
use crate::infrastructure::notified_tasks::NotifiedTasksRepository;
use crate::infrastructure::notifier::{NotificationEvent, NotificationSurface};
use crate::infrastructure::settings_store::SettingsStore;
use crate::infrastructure::task_service::TaskService;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const NOTIFICATION_TITLE: &str = "TuDuDi Task Reminder";
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationState {
    Idle,
    Notified,
    Polling,
    Cleared,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub skipped: bool,
    pub due: usize,
    pub notified: Vec<String>,
    pub stale: Vec<String>,
    pub duplicates: usize,
}

impl CycleReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// `"[Project] content (due at HH:MM)"`, with the due time in `zone`.
pub fn reminder_message<Tz>(task: &Task, zone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let due_suffix = task
        .due_date
        .map(|due_date| format!(" (due at {})", due_date.with_timezone(zone).format("%H:%M")))
        .unwrap_or_default();
    match &task.project {
        Some(project) => format!("[{}] {}{due_suffix}", project.name, task.content),
        None => format!("{}{due_suffix}", task.content),
    }
}

/// Checks that the task behind a visible notification still exists with the
/// due date the notification was raised for.
pub async fn verify_notification_current<T, S>(
    task_service: &T,
    settings_store: &S,
    task_id: &str,
    expected_due: Option<DateTime<Utc>>,
) -> Result<(), InfraError>
where
    T: TaskService + ?Sized,
    S: SettingsStore + ?Sized,
{
    let settings = settings_store.load()?;
    if settings.server_url().is_none() {
        return Err(InfraError::Configuration("server url was cleared".to_string()));
    }
    let tasks = task_service.fetch_tasks(&settings).await?;
    match tasks.iter().find(|task| task.id == task_id) {
        Some(task) if task.due_date == expected_due => Ok(()),
        Some(_) => Err(InfraError::StaleState(format!("due date of task {task_id} changed"))),
        None => Err(InfraError::StaleState(format!("task {task_id} no longer exists"))),
    }
}

pub struct NotificationCoordinator<T, K, S, N>
where
    T: TaskService + 'static,
    K: KeyValueStore,
    S: SettingsStore + 'static,
    N: NotificationSurface,
{
    task_service: Arc<T>,
    notified_repository: NotifiedTasksRepository<K>,
    settings_store: Arc<S>,
    surface: Arc<N>,
    events: UnboundedSender<NotificationEvent>,
    pollers: HashMap<String, JoinHandle<()>>,
    states: HashMap<String, NotificationState>,
    poll_interval: Duration,
}

impl<T, K, S, N> NotificationCoordinator<T, K, S, N>
where
    T: TaskService + 'static,
    K: KeyValueStore,
    S: SettingsStore + 'static,
    N: NotificationSurface,
{
    pub fn new(
        task_service: Arc<T>,
        key_value_store: Arc<K>,
        settings_store: Arc<S>,
        surface: Arc<N>,
        events: UnboundedSender<NotificationEvent>,
    ) -> Self {
        Self {
            task_service,
            notified_repository: NotifiedTasksRepository::new(key_value_store),
            settings_store,
            surface,
            events,
            pollers: HashMap::new(),
            states: HashMap::new(),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn state(&self, task_id: &str) -> NotificationState {
        self.states
            .get(task_id)
            .copied()
            .unwrap_or(NotificationState::Idle)
    }

    pub fn active_pollers(&self) -> usize {
        self.pollers.len()
    }

    /// One evaluation tick. Nothing is persisted unless the whole cycle succeeds.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, InfraError> {
        let settings = self.settings_store.load()?;
        if !settings.reminders_active() {
            info!("notifications disabled or settings incomplete; skipping check");
            return Ok(CycleReport::skipped());
        }

        let tasks = self.task_service.fetch_tasks(&settings).await?;
        let (checkpoint, now) = evaluation_window(now);
        let due = due_tasks(&tasks, now, checkpoint);
        let mut notified = self.notified_repository.load()?;
        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };

        for task in &due {
            if notified.already_notified(task) {
                report.duplicates += 1;
                continue;
            }

            let fresh = self.task_service.fetch_tasks(&settings).await?;
            let current = fresh.iter().find(|candidate| candidate.id == task.id);
            if current.map(|candidate| candidate.due_date) != Some(task.due_date) {
                info!(task_id = %task.id, "task is stale; not notifying");
                notified.record(task.id.clone(), current.and_then(Task::due_key));
                report.stale.push(task.id.clone());
                continue;
            }

            self.notify(task)?;
            notified.record(task.id.clone(), task.due_key());
            report.notified.push(task.id.clone());
        }

        let known: HashSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
        notified.retain_known(&known);
        self.states
            .retain(|task_id, _| known.contains(task_id.as_str()) || self.pollers.contains_key(task_id));
        self.notified_repository.save(&notified)?;

        Ok(report)
    }

    pub async fn handle_event(&mut self, event: NotificationEvent) -> Result<(), InfraError> {
        match event {
            NotificationEvent::Clicked(task_id) => {
                let settings = self.settings_store.load()?;
                self.open_task(&settings, &task_id);
            }
            NotificationEvent::Closed(task_id) => self.stop_polling(&task_id),
            NotificationEvent::ClearRequested(task_id) => self.clear(&task_id),
        }
        Ok(())
    }

    /// Cancels every poller; called on shutdown.
    pub fn shutdown(&mut self) {
        for (task_id, handle) in self.pollers.drain() {
            handle.abort();
            debug!(task_id, "poller cancelled on shutdown");
        }
    }

    fn notify(&mut self, task: &Task) -> Result<(), InfraError> {
        let message = reminder_message(task, &Local);
        self.surface.create(&task.id, NOTIFICATION_TITLE, &message)?;
        self.states.insert(task.id.clone(), NotificationState::Notified);
        self.start_polling(task);
        Ok(())
    }

    fn start_polling(&mut self, task: &Task) {
        if let Some(previous) = self.pollers.remove(&task.id) {
            previous.abort();
        }

        let task_service = Arc::clone(&self.task_service);
        let settings_store = Arc::clone(&self.settings_store);
        let events = self.events.clone();
        let task_id = task.id.clone();
        let expected_due = task.due_date;
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!(task_id, "polling notification status");
                let outcome = verify_notification_current(
                    task_service.as_ref(),
                    settings_store.as_ref(),
                    &task_id,
                    expected_due,
                )
                .await;
                if let Err(error) = outcome {
                    info!(task_id, %error, "notification outdated; clearing");
                    if events
                        .send(NotificationEvent::ClearRequested(task_id.clone()))
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });

        self.pollers.insert(task.id.clone(), handle);
        self.states.insert(task.id.clone(), NotificationState::Polling);
    }

    fn open_task(&mut self, settings: &Settings, task_id: &str) {
        let Some(url) = settings.task_url(task_id) else {
            return;
        };
        if let Err(error) = self.surface.open_url(&url) {
            warn!(task_id, %error, "failed to open task url");
        }
        self.clear(task_id);
    }

    fn clear(&mut self, task_id: &str) {
        if let Err(error) = self.surface.clear(task_id) {
            warn!(task_id, %error, "failed to clear notification");
        }
        self.stop_polling(task_id);
    }

    fn stop_polling(&mut self, task_id: &str) {
        if let Some(handle) = self.pollers.remove(task_id) {
            handle.abort();
            info!(task_id, "polling stopped for closed notification");
        }
        if self.states.contains_key(task_id) {
            self.states
                .insert(task_id.to_string(), NotificationState::Cleared);
        }
    }
}

impl<T, K, S, N> Drop for NotificationCoordinator<T, K, S, N>
where
    T: TaskService + 'static,
    K: KeyValueStore,
    S: SettingsStore + 'static,
    N: NotificationSurface,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Project, ProjectRef, ReminderUnit, Tag, TaskType};
    use crate::domain::models::AddItemPayload;
    use crate::infrastructure::key_value_store::InMemoryKeyValueStore;
    use crate::infrastructure::notified_tasks::NOTIFIED_TASKS_KEY;
    use crate::infrastructure::settings_store::InMemorySettingsStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    #[derive(Debug, Default)]
    struct FakeTaskService {
        tasks: Mutex<Vec<Task>>,
        scripted: Mutex<VecDeque<Result<Vec<Task>, String>>>,
        fetch_calls: AtomicUsize,
    }

    impl FakeTaskService {
        fn with_tasks(tasks: Vec<Task>) -> Self {
            Self {
                tasks: Mutex::new(tasks),
                ..Self::default()
            }
        }

        fn set_tasks(&self, tasks: Vec<Task>) {
            *self.tasks.lock().expect("tasks lock") = tasks;
        }

        /// Responses consumed before falling back to the current task list.
        fn script(&self, responses: Vec<Result<Vec<Task>, String>>) {
            *self.scripted.lock().expect("script lock") = responses.into();
        }
    }

    #[async_trait]
    impl TaskService for FakeTaskService {
        async fn fetch_tasks(&self, _settings: &Settings) -> Result<Vec<Task>, InfraError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(response) = self.scripted.lock().expect("script lock").pop_front() {
                return response.map_err(InfraError::Network);
            }
            Ok(self.tasks.lock().expect("tasks lock").clone())
        }

        async fn fetch_projects(&self, _settings: &Settings) -> Result<Vec<Project>, InfraError> {
            Ok(Vec::new())
        }

        async fn fetch_tags(&self, _settings: &Settings) -> Result<Vec<Tag>, InfraError> {
            Ok(Vec::new())
        }

        async fn add_item(&self, _payload: &AddItemPayload, _settings: &Settings) -> Result<(), InfraError> {
            Ok(())
        }

        async fn edit_task(&self, task: &Task, _settings: &Settings) -> Result<Task, InfraError> {
            Ok(task.clone())
        }

        async fn delete_task(&self, _task_id: &str, _settings: &Settings) -> Result<(), InfraError> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct RecordingSurface {
        created: Mutex<Vec<(String, String, String)>>,
        cleared: Mutex<Vec<String>>,
        opened: Mutex<Vec<String>>,
    }

    impl NotificationSurface for RecordingSurface {
        fn create(&self, notification_id: &str, title: &str, body: &str) -> Result<(), InfraError> {
            self.created.lock().expect("created lock").push((
                notification_id.to_string(),
                title.to_string(),
                body.to_string(),
            ));
            Ok(())
        }

        fn clear(&self, notification_id: &str) -> Result<(), InfraError> {
            self.cleared
                .lock()
                .expect("cleared lock")
                .push(notification_id.to_string());
            Ok(())
        }

        fn open_url(&self, url: &str) -> Result<(), InfraError> {
            self.opened.lock().expect("opened lock").push(url.to_string());
            Ok(())
        }
    }

    type TestCoordinator = NotificationCoordinator<
        FakeTaskService,
        InMemoryKeyValueStore,
        InMemorySettingsStore,
        RecordingSurface,
    >;

    struct Harness {
        coordinator: TestCoordinator,
        events: UnboundedReceiver<NotificationEvent>,
        service: Arc<FakeTaskService>,
        store: Arc<InMemoryKeyValueStore>,
        settings: Arc<InMemorySettingsStore>,
        surface: Arc<RecordingSurface>,
    }

    impl Harness {
        fn new(tasks: Vec<Task>) -> Self {
            let service = Arc::new(FakeTaskService::with_tasks(tasks));
            let store = Arc::new(InMemoryKeyValueStore::default());
            let settings = Arc::new(InMemorySettingsStore::new(active_settings()));
            let surface = Arc::new(RecordingSurface::default());
            let (sender, events) = mpsc::unbounded_channel();
            let coordinator = NotificationCoordinator::new(
                Arc::clone(&service),
                Arc::clone(&store),
                Arc::clone(&settings),
                Arc::clone(&surface),
                sender,
            );
            Self {
                coordinator,
                events,
                service,
                store,
                settings,
                surface,
            }
        }

        fn created_ids(&self) -> Vec<String> {
            self.surface
                .created
                .lock()
                .expect("created lock")
                .iter()
                .map(|(id, _, _)| id.clone())
                .collect()
        }

        fn persisted(&self) -> Option<serde_json::Value> {
            self.store.get(NOTIFIED_TASKS_KEY).expect("kv get")
        }
    }

    fn active_settings() -> Settings {
        Settings {
            server_url: Some("https://tasks.example.com/".to_string()),
            username: Some("me".to_string()),
            password: Some("secret".to_string()),
            notifications_enabled: true,
            ..Settings::default()
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        fixed_time("2026-02-16T10:00:00Z")
    }

    /// Task whose 30-minute reminder fires `minutes_ago` before `now()`.
    fn reminder_task(id: &str, minutes_ago: i64) -> Task {
        Task {
            id: id.to_string(),
            content: format!("task {id}"),
            task_type: TaskType::Task,
            due_date: Some(now() + ChronoDuration::minutes(30 - minutes_ago)),
            reminder_value: Some(30),
            reminder_unit: Some(ReminderUnit::Minutes),
            project: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn message_includes_project_and_due_time() {
        let mut task = reminder_task("1", 0);
        task.due_date = Some(fixed_time("2026-02-16T14:05:00Z"));
        assert_eq!(reminder_message(&task, &Utc), "task 1 (due at 14:05)");

        task.project = Some(ProjectRef {
            id: "p1".to_string(),
            name: "Work".to_string(),
        });
        assert_eq!(reminder_message(&task, &Utc), "[Work] task 1 (due at 14:05)");
    }

    #[tokio::test]
    async fn due_task_is_notified_once_and_polled() {
        let mut harness = Harness::new(vec![reminder_task("9", 2), reminder_task("10", 30)]);

        let report = harness.coordinator.run_cycle(now()).await.expect("cycle");
        assert_eq!(report.notified, vec!["9".to_string()]);
        assert_eq!(harness.created_ids(), vec!["9".to_string()]);
        assert_eq!(harness.coordinator.state("9"), NotificationState::Polling);
        assert_eq!(harness.coordinator.state("10"), NotificationState::Idle);
        assert_eq!(harness.coordinator.active_pollers(), 1);

        let created = harness.surface.created.lock().expect("created lock").clone();
        assert_eq!(created[0].1, NOTIFICATION_TITLE);

        let again = harness.coordinator.run_cycle(now()).await.expect("second cycle");
        assert!(again.notified.is_empty());
        assert_eq!(again.duplicates, 1);
        assert_eq!(harness.created_ids().len(), 1);
        assert_eq!(harness.coordinator.active_pollers(), 1);
    }

    #[tokio::test]
    async fn changed_due_date_fires_again() {
        let mut harness = Harness::new(vec![reminder_task("9", 2)]);
        harness.coordinator.run_cycle(now()).await.expect("cycle");

        let later = now() + ChronoDuration::hours(3);
        let mut moved = reminder_task("9", 2);
        moved.due_date = Some(later + ChronoDuration::minutes(28));
        harness.service.set_tasks(vec![moved]);

        let report = harness.coordinator.run_cycle(later).await.expect("cycle");
        assert_eq!(report.notified, vec!["9".to_string()]);
        assert_eq!(harness.created_ids().len(), 2);
        assert_eq!(harness.coordinator.active_pollers(), 1);
    }

    #[tokio::test]
    async fn stale_task_is_recorded_without_notifying() {
        let task = reminder_task("9", 2);
        let mut harness = Harness::new(vec![task.clone()]);
        let mut edited = task.clone();
        edited.due_date = Some(now() + ChronoDuration::days(1));
        harness.service.script(vec![Ok(vec![task]), Ok(vec![edited.clone()])]);

        let report = harness.coordinator.run_cycle(now()).await.expect("cycle");
        assert_eq!(report.stale, vec!["9".to_string()]);
        assert!(harness.created_ids().is_empty());
        assert_eq!(harness.coordinator.active_pollers(), 0);
        assert_eq!(
            harness.persisted(),
            Some(serde_json::json!({ "9": edited.due_key() }))
        );
    }

    #[tokio::test]
    async fn deleted_task_is_recorded_as_suppressed() {
        let task = reminder_task("9", 2);
        let mut harness = Harness::new(vec![task.clone()]);
        harness
            .service
            .script(vec![Ok(vec![task, reminder_task("11", 60)]), Ok(Vec::new())]);

        let report = harness.coordinator.run_cycle(now()).await.expect("cycle");
        assert_eq!(report.stale, vec!["9".to_string()]);
        assert_eq!(harness.persisted(), Some(serde_json::json!({ "9": null })));
    }

    #[tokio::test]
    async fn failed_fetch_aborts_without_persisting() {
        let mut harness = Harness::new(vec![reminder_task("9", 2)]);
        harness.service.script(vec![
            Ok(vec![reminder_task("9", 2)]),
            Err("connection refused".to_string()),
        ]);

        let result = harness.coordinator.run_cycle(now()).await;
        assert!(matches!(result, Err(InfraError::Network(_))));
        assert!(harness.created_ids().is_empty());
        assert_eq!(harness.persisted(), None);
    }

    #[tokio::test]
    async fn incomplete_settings_skip_the_cycle() {
        let mut harness = Harness::new(vec![reminder_task("9", 2)]);
        harness
            .settings
            .save(&Settings {
                notifications_enabled: false,
                ..active_settings()
            })
            .expect("save settings");

        let report = harness.coordinator.run_cycle(now()).await.expect("cycle");
        assert!(report.skipped);
        assert_eq!(harness.service.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cycle_prunes_ids_missing_from_server() {
        let mut harness = Harness::new(vec![reminder_task("9", 2)]);
        harness.coordinator.run_cycle(now()).await.expect("cycle");
        assert!(harness.persisted().expect("persisted").get("9").is_some());

        harness.service.set_tasks(vec![reminder_task("12", 60)]);
        harness.coordinator.run_cycle(now()).await.expect("cycle");
        assert_eq!(harness.persisted(), Some(serde_json::json!({})));
    }

    #[tokio::test]
    async fn click_opens_task_url_and_clears() {
        let mut harness = Harness::new(vec![reminder_task("9", 2)]);
        harness.coordinator.run_cycle(now()).await.expect("cycle");

        harness
            .coordinator
            .handle_event(NotificationEvent::Clicked("9".to_string()))
            .await
            .expect("click");

        assert_eq!(
            *harness.surface.opened.lock().expect("opened lock"),
            vec!["https://tasks.example.com/task/9".to_string()]
        );
        assert_eq!(
            *harness.surface.cleared.lock().expect("cleared lock"),
            vec!["9".to_string()]
        );
        assert_eq!(harness.coordinator.active_pollers(), 0);
        assert_eq!(harness.coordinator.state("9"), NotificationState::Cleared);
    }

    #[tokio::test]
    async fn close_stops_polling() {
        let mut harness = Harness::new(vec![reminder_task("9", 2)]);
        harness.coordinator.run_cycle(now()).await.expect("cycle");

        harness
            .coordinator
            .handle_event(NotificationEvent::Closed("9".to_string()))
            .await
            .expect("close");
        assert_eq!(harness.coordinator.active_pollers(), 0);
        assert!(harness.surface.cleared.lock().expect("cleared lock").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_requests_clear_when_task_changes() {
        let task = reminder_task("9", 2);
        let mut harness = Harness::new(vec![task.clone()]);
        harness.coordinator.run_cycle(now()).await.expect("cycle");

        tokio::time::sleep(POLL_INTERVAL + Duration::from_secs(1)).await;
        assert!(harness.events.try_recv().is_err());

        harness.service.set_tasks(Vec::new());
        tokio::time::sleep(POLL_INTERVAL).await;

        let event = harness.events.recv().await.expect("clear request");
        assert_eq!(event, NotificationEvent::ClearRequested("9".to_string()));

        harness.coordinator.handle_event(event).await.expect("clear");
        assert_eq!(harness.coordinator.active_pollers(), 0);
        assert_eq!(
            *harness.surface.cleared.lock().expect("cleared lock"),
            vec!["9".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn poller_requests_clear_when_server_url_removed() {
        let mut harness = Harness::new(vec![reminder_task("9", 2)]);
        harness.coordinator.run_cycle(now()).await.expect("cycle");

        harness
            .settings
            .save(&Settings {
                server_url: None,
                ..active_settings()
            })
            .expect("save settings");
        tokio::time::sleep(POLL_INTERVAL + Duration::from_secs(1)).await;

        let event = harness.events.recv().await.expect("clear request");
        assert_eq!(event, NotificationEvent::ClearRequested("9".to_string()));
    }

    #[tokio::test]
    async fn verify_reports_stale_due_date() {
        let task = reminder_task("9", 2);
        let service = FakeTaskService::with_tasks(vec![task.clone()]);
        let settings = InMemorySettingsStore::new(active_settings());

        assert!(verify_notification_current(&service, &settings, "9", task.due_date)
            .await
            .is_ok());
        assert!(matches!(
            verify_notification_current(&service, &settings, "9", None).await,
            Err(InfraError::StaleState(_))
        ));
    }
}
