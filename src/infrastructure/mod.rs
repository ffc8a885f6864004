pub mod config;
pub mod error;
pub mod key_value_store;
pub mod logging;
pub mod notified_tasks;
pub mod notifier;
pub mod settings_store;
pub mod task_service;
