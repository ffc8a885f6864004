use crate::infrastructure::error::InfraError;
use notify_rust::Notification;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// User clicked the notification.
    Clicked(String),
    /// Notification went away, by the user or programmatically.
    Closed(String),
    /// A poller found the notification outdated.
    ClearRequested(String),
}

/// Desktop notification capability. Click and close callbacks come back to
/// the worker as events, not through this trait.
pub trait NotificationSurface: Send + Sync {
    fn create(&self, notification_id: &str, title: &str, body: &str) -> Result<(), InfraError>;
    fn clear(&self, notification_id: &str) -> Result<(), InfraError>;
    fn open_url(&self, url: &str) -> Result<(), InfraError>;
}

/// A notification the desktop still shows.
trait ShownHandle: Send {
    /// Server-side id, `0` where the platform does not expose one.
    fn id(&self) -> u32;
    fn close(self);
}

#[cfg(all(unix, not(target_os = "macos")))]
type PlatformHandle = notify_rust::NotificationHandle;

#[cfg(all(unix, not(target_os = "macos")))]
impl ShownHandle for notify_rust::NotificationHandle {
    fn id(&self) -> u32 {
        notify_rust::NotificationHandle::id(self)
    }

    fn close(self) {
        notify_rust::NotificationHandle::close(self);
    }
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
type PlatformHandle = Detached;

/// Placeholder for platforms that cannot address a shown notification.
#[cfg(not(all(unix, not(target_os = "macos"))))]
#[derive(Debug)]
struct Detached;

#[cfg(not(all(unix, not(target_os = "macos"))))]
impl ShownHandle for Detached {
    fn id(&self) -> u32 {
        0
    }

    fn close(self) {
        debug!("platform cannot close a shown notification");
    }
}

/// Shown notifications keyed by task id.
struct ShownNotifications<H> {
    handles: Mutex<HashMap<String, H>>,
}

impl<H: ShownHandle> ShownNotifications<H> {
    fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, H>>, InfraError> {
        self.handles
            .lock()
            .map_err(|error| InfraError::Notification(format!("notification lock poisoned: {error}")))
    }

    /// Server id a new notification for `key` should replace.
    fn replaces(&self, key: &str) -> Result<Option<u32>, InfraError> {
        Ok(self.lock()?.get(key).map(ShownHandle::id).filter(|id| *id != 0))
    }

    fn insert(&self, key: &str, handle: H) -> Result<(), InfraError> {
        self.lock()?.insert(key.to_string(), handle);
        Ok(())
    }

    fn take(&self, key: &str) -> Result<Option<H>, InfraError> {
        Ok(self.lock()?.remove(key))
    }

    /// Forgets `key` once the desktop reports notification `id` gone. A newer
    /// notification under the same key is kept.
    fn release(&self, key: &str, id: u32) -> Result<bool, InfraError> {
        let mut handles = self.lock()?;
        if handles.get(key).map(ShownHandle::id) == Some(id) {
            handles.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

pub struct DesktopNotificationSurface {
    app_name: String,
    shown: Arc<ShownNotifications<PlatformHandle>>,
    events: Option<UnboundedSender<NotificationEvent>>,
}

impl std::fmt::Debug for DesktopNotificationSurface {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DesktopNotificationSurface")
            .field("app_name", &self.app_name)
            .field("forwards_events", &self.events.is_some())
            .finish()
    }
}

impl DesktopNotificationSurface {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            shown: Arc::new(ShownNotifications::new()),
            events: None,
        }
    }

    /// Forwards clicks and dismissals to `events` where the platform reports them.
    pub fn with_events(mut self, events: UnboundedSender<NotificationEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

impl Default for DesktopNotificationSurface {
    fn default() -> Self {
        Self::new("tududi-companion")
    }
}

impl NotificationSurface for DesktopNotificationSurface {
    /// A second notification for the same id replaces the one still shown.
    fn create(&self, notification_id: &str, title: &str, body: &str) -> Result<(), InfraError> {
        let mut notification = Notification::new();
        notification
            .summary(title)
            .body(body)
            .appname(&self.app_name)
            .action("default", "Open task");
        let replaces = self.shown.replaces(notification_id)?;
        let handle = show(&mut notification, replaces)?;
        let id = handle.id();
        self.shown.insert(notification_id, handle)?;

        // A replaced notification keeps its id, and its listener is still waiting.
        if replaces != Some(id) {
            if let Some(events) = &self.events {
                forward_actions(id, notification_id, events.clone(), Arc::clone(&self.shown));
            }
        }
        info!(notification_id, replaced = replaces.is_some(), "notification shown");
        Ok(())
    }

    fn clear(&self, notification_id: &str) -> Result<(), InfraError> {
        if let Some(handle) = self.shown.take(notification_id)? {
            handle.close();
            debug!(notification_id, "notification closed");
        }
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<(), InfraError> {
        open::that(url)?;
        Ok(())
    }
}

fn notification_error(error: notify_rust::error::Error) -> InfraError {
    InfraError::Notification(error.to_string())
}

#[cfg(all(unix, not(target_os = "macos")))]
fn show(notification: &mut Notification, replaces: Option<u32>) -> Result<PlatformHandle, InfraError> {
    if let Some(previous) = replaces {
        notification.id(previous);
    }
    notification.show().map_err(notification_error)
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn show(notification: &mut Notification, _replaces: Option<u32>) -> Result<PlatformHandle, InfraError> {
    notification.show().map(drop).map_err(notification_error)?;
    Ok(Detached)
}

#[cfg(all(unix, not(target_os = "macos")))]
fn forward_actions(
    id: u32,
    notification_id: &str,
    events: UnboundedSender<NotificationEvent>,
    shown: Arc<ShownNotifications<PlatformHandle>>,
) {
    let notification_id = notification_id.to_string();
    std::thread::spawn(move || {
        notify_rust::handle_action(id, |action: &notify_rust::ActionResponse<'_>| {
            let closed = matches!(action, notify_rust::ActionResponse::Closed(_));
            if let Err(error) = shown.release(&notification_id, id) {
                debug!(%error, "failed to release notification");
            }
            let event = if closed {
                NotificationEvent::Closed(notification_id)
            } else {
                NotificationEvent::Clicked(notification_id)
            };
            let _ = events.send(event);
        });
    });
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn forward_actions(
    _id: u32,
    notification_id: &str,
    _events: UnboundedSender<NotificationEvent>,
    _shown: Arc<ShownNotifications<PlatformHandle>>,
) {
    debug!(notification_id, "platform does not report notification actions");
}

/// Headless surface that only records notifications in the log.
#[derive(Debug, Default)]
pub struct LogNotificationSurface;

impl NotificationSurface for LogNotificationSurface {
    fn create(&self, notification_id: &str, title: &str, body: &str) -> Result<(), InfraError> {
        info!(notification_id, title, body, "reminder");
        Ok(())
    }

    fn clear(&self, notification_id: &str) -> Result<(), InfraError> {
        info!(notification_id, "reminder cleared");
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<(), InfraError> {
        info!(url, "open task");
        Ok(())
    }
}
