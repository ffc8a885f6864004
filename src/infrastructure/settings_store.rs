use crate::domain::models::Settings;
use crate::infrastructure::config::{load_settings, save_settings};
use crate::infrastructure::error::InfraError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings, InfraError>;
    fn save(&self, settings: &Settings) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    config_dir: PathBuf,
}

impl FileSettingsStore {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<Settings, InfraError> {
        load_settings(&self.config_dir)
    }

    fn save(&self, settings: &Settings) -> Result<(), InfraError> {
        save_settings(&self.config_dir, settings)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    settings: Mutex<Settings>,
}

impl InMemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn load(&self) -> Result<Settings, InfraError> {
        let guard = self
            .settings
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("settings lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn save(&self, settings: &Settings) -> Result<(), InfraError> {
        let mut guard = self
            .settings
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("settings lock poisoned: {error}")))?;
        *guard = settings.clone();
        Ok(())
    }
}
