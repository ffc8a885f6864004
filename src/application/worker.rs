use crate::application::notification_coordinator::{CycleReport, NotificationCoordinator};
use crate::domain::reminder::EVALUATION_PERIOD_MINUTES;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value_store::KeyValueStore;
use crate::infrastructure::logging::LoggingHandle;
use crate::infrastructure::notifier::{NotificationEvent, NotificationSurface};
use crate::infrastructure::settings_store::SettingsStore;
use crate::infrastructure::task_service::TaskService;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const EVALUATION_INTERVAL: Duration = Duration::from_secs(EVALUATION_PERIOD_MINUTES.unsigned_abs() * 60);

pub type EventChannel = (UnboundedSender<NotificationEvent>, UnboundedReceiver<NotificationEvent>);

/// Channel shared by the worker and the notification surface that reports clicks.
pub fn notification_channel() -> EventChannel {
    mpsc::unbounded_channel()
}

/// Background reminder loop. Owns the coordinator; evaluation ticks and
/// notification events are handled one at a time.
pub struct ReminderWorker<T, K, S, N>
where
    T: TaskService + 'static,
    K: KeyValueStore,
    S: SettingsStore + 'static,
    N: NotificationSurface,
{
    coordinator: NotificationCoordinator<T, K, S, N>,
    settings_store: Arc<S>,
    events_tx: UnboundedSender<NotificationEvent>,
    events_rx: UnboundedReceiver<NotificationEvent>,
    logging: Option<LoggingHandle>,
    period: Duration,
}

impl<T, K, S, N> ReminderWorker<T, K, S, N>
where
    T: TaskService + 'static,
    K: KeyValueStore,
    S: SettingsStore + 'static,
    N: NotificationSurface,
{
    /// `events` must be the pair the surface reports clicks and closes on.
    pub fn new(
        task_service: Arc<T>,
        key_value_store: Arc<K>,
        settings_store: Arc<S>,
        surface: Arc<N>,
        events: EventChannel,
    ) -> Self {
        let (events_tx, events_rx) = events;
        let coordinator = NotificationCoordinator::new(
            task_service,
            key_value_store,
            Arc::clone(&settings_store),
            surface,
            events_tx.clone(),
        );
        Self {
            coordinator,
            settings_store,
            events_tx,
            events_rx,
            logging: None,
            period: EVALUATION_INTERVAL,
        }
    }

    pub fn with_logging(mut self, logging: LoggingHandle) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn event_sender(&self) -> UnboundedSender<NotificationEvent> {
        self.events_tx.clone()
    }

    /// Runs the first evaluation immediately, then every period, until
    /// `shutdown` resolves. Pollers are cancelled on the way out.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        info!(period_secs = self.period.as_secs(), "reminder worker started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.tick().await,
                Some(event) = self.events_rx.recv() => {
                    debug!(?event, "notification event");
                    if let Err(error) = self.coordinator.handle_event(event).await {
                        warn!(%error, "failed to handle notification event");
                    }
                }
            }
        }

        self.coordinator.shutdown();
        info!("reminder worker stopped");
    }

    // A failed cycle is logged and the loop keeps running.
    async fn tick(&mut self) {
        if let Err(error) = self.evaluate().await {
            warn!(%error, "reminder check aborted");
        }
    }

    /// One evaluation tick: re-applies the console logging setting, then
    /// runs the reminder cycle.
    pub async fn evaluate(&mut self) -> Result<CycleReport, InfraError> {
        if let Some(logging) = &self.logging {
            match self.settings_store.load() {
                Ok(settings) => {
                    if let Err(error) = logging.apply(&settings) {
                        warn!(%error, "failed to apply logging setting");
                    }
                }
                Err(error) => warn!(%error, "failed to load settings"),
            }
        }

        let report = self.coordinator.run_cycle(Utc::now()).await?;
        if !report.skipped {
            info!(
                due = report.due,
                notified = report.notified.len(),
                stale = report.stale.len(),
                "reminder check finished"
            );
        }
        Ok(report)
    }
}
