use crate::domain::models::{
    AddItemPayload, Project, ProjectRef, ReminderUnit, Settings, Tag, Task, TaskType,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Mutex;
use tracing::{debug, info};
use url::Url;

const API_PREFIX: [&str; 2] = ["api", "v1"];

#[async_trait]
pub trait TaskService: Send + Sync {
    async fn fetch_tasks(&self, settings: &Settings) -> Result<Vec<Task>, InfraError>;

    async fn fetch_projects(&self, settings: &Settings) -> Result<Vec<Project>, InfraError>;

    async fn fetch_tags(&self, settings: &Settings) -> Result<Vec<Tag>, InfraError>;

    async fn add_item(&self, payload: &AddItemPayload, settings: &Settings) -> Result<(), InfraError>;

    async fn edit_task(&self, task: &Task, settings: &Settings) -> Result<Task, InfraError>;

    async fn delete_task(&self, task_id: &str, settings: &Settings) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTaskService {
    client: Client,
}

struct ApiTarget {
    base: Url,
    username: String,
    password: String,
}

impl ReqwestTaskService {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn target(settings: &Settings) -> Result<ApiTarget, InfraError> {
        let (Some(server_url), Some(username), Some(password)) =
            (settings.server_url(), settings.username(), settings.password())
        else {
            return Err(InfraError::Configuration(
                "API client not configured. Please check your settings.".to_string(),
            ));
        };

        Ok(ApiTarget {
            base: Self::api_base(server_url)?,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// `{server}/api/v1` with `localhost` pinned to the loopback address.
    fn api_base(server_url: &str) -> Result<Url, InfraError> {
        let mut url = Url::parse(server_url.trim()).map_err(|error| {
            InfraError::Configuration(format!("invalid server url '{server_url}': {error}"))
        })?;
        if url.host_str() == Some("localhost") {
            url.set_host(Some("127.0.0.1")).map_err(|error| {
                InfraError::Configuration(format!("invalid server url '{server_url}': {error}"))
            })?;
        }
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::Configuration(format!("server url '{server_url}' cannot be a base"))
            })?;
            segments.pop_if_empty().extend(API_PREFIX);
        }
        Ok(url)
    }

    fn endpoint(base: &Url, path: &[&str]) -> Result<Url, InfraError> {
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::Configuration("api base url cannot be a base".to_string())
            })?;
            segments.extend(path);
        }
        Ok(url)
    }

    fn http_error(status: StatusCode, body: &str) -> InfraError {
        let reason = status.canonical_reason().unwrap_or("unknown status");
        let message = if body.trim().is_empty() {
            format!("HTTP error {}: {reason}", status.as_u16())
        } else {
            format!("HTTP error {}: {reason} - {}", status.as_u16(), body.trim())
        };
        if status == StatusCode::NOT_FOUND {
            InfraError::NotFound(message)
        } else {
            InfraError::Network(message)
        }
    }

    /// Sends the request and returns the body of a successful response.
    async fn send(
        &self,
        settings: &Settings,
        method: Method,
        path: &[&str],
        body: Option<serde_json::Value>,
    ) -> Result<String, InfraError> {
        let target = Self::target(settings)?;
        let url = Self::endpoint(&target.base, path)?;
        debug!(%method, %url, "task server request");

        let mut request = self
            .client
            .request(method.clone(), url)
            .basic_auth(&target.username, Some(&target.password));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|error| {
            InfraError::Network(format!(
                "Failed to connect to the TuDuDi server ({method} /{}): {error}",
                path.join("/")
            ))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading task server response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::http_error(status, &text));
        }
        Ok(text)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        settings: &Settings,
        path: &[&str],
    ) -> Result<T, InfraError> {
        let body = self.send(settings, Method::GET, path, None).await?;
        serde_json::from_str(&body).map_err(|error| {
            InfraError::Network(format!("invalid /{} payload: {error}", path.join("/")))
        })
    }

    fn add_request(payload: &AddItemPayload) -> (&'static str, serde_json::Value) {
        match payload.item_type {
            TaskType::Task => (
                "tasks",
                serde_json::json!({
                    "content": payload.content,
                    "project_id": payload.project_id,
                    "due_date": payload.due_date.map(|date| date.format("%Y-%m-%d").to_string()),
                    "reminder": match (payload.reminder_value, payload.reminder_unit) {
                        (Some(value), Some(unit)) => serde_json::json!({
                            "value": value,
                            "unit": unit.as_str(),
                        }),
                        _ => serde_json::Value::Null,
                    },
                }),
            ),
            TaskType::Note => (
                "notes",
                serde_json::json!({
                    "content": payload.content,
                    "project_id": payload.project_id,
                }),
            ),
            TaskType::Project => ("projects", serde_json::json!({ "name": payload.content })),
        }
    }
}

#[async_trait]
impl TaskService for ReqwestTaskService {
    async fn fetch_tasks(&self, settings: &Settings) -> Result<Vec<Task>, InfraError> {
        self.get_json(settings, &["tasks"]).await
    }

    async fn fetch_projects(&self, settings: &Settings) -> Result<Vec<Project>, InfraError> {
        self.get_json(settings, &["projects"]).await
    }

    async fn fetch_tags(&self, settings: &Settings) -> Result<Vec<Tag>, InfraError> {
        self.get_json(settings, &["tags"]).await
    }

    async fn add_item(&self, payload: &AddItemPayload, settings: &Settings) -> Result<(), InfraError> {
        payload.validate().map_err(InfraError::InvalidInput)?;
        let (collection, body) = Self::add_request(payload);
        info!(item_type = payload.item_type.as_str(), "adding item");
        self.send(settings, Method::POST, &[collection], Some(body))
            .await?;
        Ok(())
    }

    async fn edit_task(&self, task: &Task, settings: &Settings) -> Result<Task, InfraError> {
        info!(task_id = %task.id, "updating task");
        let body = serde_json::to_value(task)?;
        let response = self
            .send(settings, Method::PUT, &["tasks", task.id.as_str()], Some(body))
            .await?;
        if response.trim().is_empty() {
            return Ok(task.clone());
        }
        serde_json::from_str(&response)
            .map_err(|error| InfraError::Network(format!("invalid task update payload: {error}")))
    }

    async fn delete_task(&self, task_id: &str, settings: &Settings) -> Result<(), InfraError> {
        info!(task_id, "deleting task");
        self.send(settings, Method::DELETE, &["tasks", task_id], None)
            .await?;
        Ok(())
    }
}

#[derive(Debug)]
struct FixtureState {
    tasks: Vec<Task>,
    projects: Vec<Project>,
    tags: Vec<Tag>,
    next_id: i64,
}

/// Dev-mode store seeded with demo data relative to its creation time.
#[derive(Debug)]
pub struct InMemoryTaskService {
    state: Mutex<FixtureState>,
}

impl InMemoryTaskService {
    pub fn new(now: DateTime<Utc>) -> Self {
        let tags = vec![fixture_tag("t1", "urgent"), fixture_tag("t2", "quick"), fixture_tag("t3", "research")];
        let work = Some(ProjectRef {
            id: "p1".to_string(),
            name: "Work".to_string(),
        });
        let personal = Some(ProjectRef {
            id: "p2".to_string(),
            name: "Personal".to_string(),
        });
        let tasks = vec![
            fixture_task("1", TaskType::Task, "Finalize quarterly report", Some(now))
                .with_reminder(30, ReminderUnit::Minutes)
                .in_project(work.clone())
                .tagged(&tags[0]),
            fixture_task("2", TaskType::Task, "Buy groceries", Some(now))
                .with_reminder(1, ReminderUnit::Hours)
                .tagged(&tags[1]),
            fixture_task("3", TaskType::Task, "Schedule dentist appointment", None)
                .in_project(personal.clone()),
            fixture_task("4", TaskType::Task, "Plan weekend trip", Some(now + Duration::days(2)))
                .with_reminder(1, ReminderUnit::Days)
                .in_project(personal.clone())
                .tagged(&tags[2]),
            fixture_task("5", TaskType::Task, "Review pull request #123", Some(now + Duration::days(1)))
                .in_project(work),
            fixture_task(
                "6",
                TaskType::Note,
                "Meeting Notes: Q3 Planning\n- Discuss budget allocations\n- Review marketing strategy\n- Set key objectives and deliverables.",
                None,
            )
            .tagged(&tags[0]),
            fixture_task("7", TaskType::Task, "Call mom", Some(now + Duration::days(5)))
                .with_reminder(2, ReminderUnit::Hours)
                .in_project(personal),
        ];
        let projects = vec![
            Project { id: "p1".to_string(), name: "Work".to_string() },
            Project { id: "p2".to_string(), name: "Personal".to_string() },
            Project { id: "p3".to_string(), name: "Home Reno".to_string() },
        ];

        Self::with_fixtures(tasks, projects, tags, now.timestamp_millis())
    }

    pub fn with_fixtures(tasks: Vec<Task>, projects: Vec<Project>, tags: Vec<Tag>, next_id: i64) -> Self {
        Self {
            state: Mutex::new(FixtureState {
                tasks,
                projects,
                tags,
                next_id,
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FixtureState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("fixture store lock poisoned: {error}")))
    }
}

fn fixture_tag(id: &str, name: &str) -> Tag {
    Tag {
        id: id.to_string(),
        name: name.to_string(),
    }
}

fn fixture_task(id: &str, task_type: TaskType, content: &str, due_date: Option<DateTime<Utc>>) -> Task {
    Task {
        id: id.to_string(),
        content: content.to_string(),
        task_type,
        due_date,
        reminder_value: None,
        reminder_unit: None,
        project: None,
        tags: Vec::new(),
    }
}

impl Task {
    fn with_reminder(mut self, value: u32, unit: ReminderUnit) -> Self {
        self.reminder_value = Some(value);
        self.reminder_unit = Some(unit);
        self
    }

    fn in_project(mut self, project: Option<ProjectRef>) -> Self {
        self.project = project;
        self
    }

    fn tagged(mut self, tag: &Tag) -> Self {
        self.tags.push(tag.clone());
        self
    }
}

#[async_trait]
impl TaskService for InMemoryTaskService {
    async fn fetch_tasks(&self, _settings: &Settings) -> Result<Vec<Task>, InfraError> {
        debug!("dev mode: fetching fixture tasks");
        Ok(self.lock()?.tasks.clone())
    }

    async fn fetch_projects(&self, _settings: &Settings) -> Result<Vec<Project>, InfraError> {
        debug!("dev mode: fetching fixture projects");
        Ok(self.lock()?.projects.clone())
    }

    async fn fetch_tags(&self, _settings: &Settings) -> Result<Vec<Tag>, InfraError> {
        debug!("dev mode: fetching fixture tags");
        Ok(self.lock()?.tags.clone())
    }

    async fn add_item(&self, payload: &AddItemPayload, _settings: &Settings) -> Result<(), InfraError> {
        payload.validate().map_err(InfraError::InvalidInput)?;
        info!(item_type = payload.item_type.as_str(), "dev mode: adding fixture item");

        let mut state = self.lock()?;
        let id = state.next_id.to_string();
        state.next_id += 1;

        match payload.item_type {
            TaskType::Task | TaskType::Note => {
                let project = payload.project_id.as_deref().and_then(|project_id| {
                    state
                        .projects
                        .iter()
                        .find(|project| project.id == project_id)
                        .map(|project| ProjectRef {
                            id: project.id.clone(),
                            name: project.name.clone(),
                        })
                });
                let due_date = payload
                    .due_date
                    .map(|date| date.and_time(NaiveTime::MIN).and_utc());
                state.tasks.push(Task {
                    id,
                    content: payload.content.clone(),
                    task_type: payload.item_type,
                    due_date,
                    reminder_value: payload.reminder_value,
                    reminder_unit: payload.reminder_unit,
                    project,
                    tags: Vec::new(),
                });
            }
            TaskType::Project => state.projects.push(Project {
                id,
                name: payload.content.clone(),
            }),
        }
        Ok(())
    }

    async fn edit_task(&self, task: &Task, _settings: &Settings) -> Result<Task, InfraError> {
        info!(task_id = %task.id, "dev mode: updating fixture task");
        let mut state = self.lock()?;
        let existing = state
            .tasks
            .iter_mut()
            .find(|candidate| candidate.id == task.id)
            .ok_or_else(|| InfraError::NotFound(format!("Task not found: {}", task.id)))?;
        *existing = task.clone();
        Ok(task.clone())
    }

    async fn delete_task(&self, task_id: &str, _settings: &Settings) -> Result<(), InfraError> {
        info!(task_id, "dev mode: deleting fixture task");
        let mut state = self.lock()?;
        let index = state
            .tasks
            .iter()
            .position(|candidate| candidate.id == task_id)
            .ok_or_else(|| InfraError::NotFound(format!("Task not found: {task_id}")))?;
        state.tasks.remove(index);
        Ok(())
    }
}

/// Sends each call to the fixture store when dev mode is on, otherwise to the
/// remote server. Every call needs a server URL either way.
pub struct RoutedTaskService<R: TaskService, F: TaskService> {
    remote: R,
    fixtures: F,
}

impl<R: TaskService, F: TaskService> RoutedTaskService<R, F> {
    pub fn new(remote: R, fixtures: F) -> Self {
        Self { remote, fixtures }
    }

    fn route(&self, settings: &Settings) -> Result<&dyn TaskService, InfraError> {
        if settings.server_url().is_none() {
            return Err(InfraError::Configuration("Server URL not set".to_string()));
        }
        if settings.dev_mode_enabled {
            Ok(&self.fixtures)
        } else {
            Ok(&self.remote)
        }
    }
}

#[async_trait]
impl<R: TaskService, F: TaskService> TaskService for RoutedTaskService<R, F> {
    async fn fetch_tasks(&self, settings: &Settings) -> Result<Vec<Task>, InfraError> {
        self.route(settings)?.fetch_tasks(settings).await
    }

    async fn fetch_projects(&self, settings: &Settings) -> Result<Vec<Project>, InfraError> {
        self.route(settings)?.fetch_projects(settings).await
    }

    async fn fetch_tags(&self, settings: &Settings) -> Result<Vec<Tag>, InfraError> {
        self.route(settings)?.fetch_tags(settings).await
    }

    async fn add_item(&self, payload: &AddItemPayload, settings: &Settings) -> Result<(), InfraError> {
        self.route(settings)?.add_item(payload, settings).await
    }

    async fn edit_task(&self, task: &Task, settings: &Settings) -> Result<Task, InfraError> {
        self.route(settings)?.edit_task(task, settings).await
    }

    async fn delete_task(&self, task_id: &str, settings: &Settings) -> Result<(), InfraError> {
        self.route(settings)?.delete_task(task_id, settings).await
    }
}
