use crate::domain::models::NotifiedTasks;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value_store::KeyValueStore;
use std::sync::Arc;

pub const NOTIFIED_TASKS_KEY: &str = "notifiedTasks";

/// Loads and saves the reminder dedup map whole.
pub struct NotifiedTasksRepository<K: KeyValueStore> {
    store: Arc<K>,
}

impl<K: KeyValueStore> NotifiedTasksRepository<K> {
    pub fn new(store: Arc<K>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<NotifiedTasks, InfraError> {
        match self.store.get(NOTIFIED_TASKS_KEY)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(NotifiedTasks::default()),
        }
    }

    pub fn save(&self, notified: &NotifiedTasks) -> Result<(), InfraError> {
        let value = serde_json::to_value(notified)?;
        self.store.set(NOTIFIED_TASKS_KEY, &value)
    }
}
