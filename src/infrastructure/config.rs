use crate::domain::models::Settings;
use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::Path;

pub const SETTINGS_JSON: &str = "settings.json";
const SCHEMA_VERSION: u64 = 1;

fn default_settings_file() -> Result<serde_json::Value, InfraError> {
    with_schema(&Settings::default())
}

fn with_schema(settings: &Settings) -> Result<serde_json::Value, InfraError> {
    let mut value = serde_json::to_value(settings)?;
    let object = value.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig("settings must serialize to an object".to_string())
    })?;
    object.insert("schema".to_string(), serde_json::json!(SCHEMA_VERSION));
    Ok(value)
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(SETTINGS_JSON);
    if !path.exists() {
        write_config(&path, &default_settings_file()?)?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SCHEMA_VERSION {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

// Written next to the target and renamed over it, so readers see either the
// old record or the new one.
fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, format!("{formatted}\n"))?;
    fs::rename(&staging, path)?;
    Ok(())
}

pub fn load_settings(config_dir: &Path) -> Result<Settings, InfraError> {
    let mut value = read_config(&config_dir.join(SETTINGS_JSON))?;
    if let Some(object) = value.as_object_mut() {
        object.remove("schema");
    }
    Ok(serde_json::from_value(value)?)
}

pub fn save_settings(config_dir: &Path, settings: &Settings) -> Result<(), InfraError> {
    write_config(&config_dir.join(SETTINGS_JSON), &with_schema(settings)?)
}
