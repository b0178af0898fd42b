use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const RESOLUTION_JSON: &str = "resolution.json";
pub const DEFAULT_HOST_URL: &str = "http://127.0.0.1:6806";
pub const DEFAULT_VIEWER_BASE_URL: &str = "siyuan://plugins/sy-docs-flow/open-rule";

/// Paging, recursion and rate-limit knobs shared by the resolution pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolutionTuning {
    pub page_size: usize,
    pub max_pages: usize,
    pub max_depth: usize,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub page_delay_ms: u64,
    pub page_failure_backoff_ms: u64,
    pub cache_sweep_hours: i64,
    pub priority_chunk_size: usize,
    pub priority_chunk_delay_ms: u64,
}

impl Default for ResolutionTuning {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 100,
            max_depth: 5,
            batch_size: 30,
            batch_delay_ms: 100,
            page_delay_ms: 200,
            page_failure_backoff_ms: 500,
            cache_sweep_hours: 24,
            priority_chunk_size: 500,
            priority_chunk_delay_ms: 100,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "RiffGroups",
                "hostUrl": DEFAULT_HOST_URL,
                "timezone": null,
                "viewerBaseUrl": DEFAULT_VIEWER_BASE_URL
            }),
        ),
        (
            RESOLUTION_JSON,
            serde_json::json!({
                "schema": 1,
                "pageSize": 100,
                "maxPages": 100,
                "maxDepth": 5,
                "batchSize": 30,
                "batchDelayMs": 100,
                "pageDelayMs": 200,
                "pageFailureBackoffMs": 500,
                "cacheSweepHours": 24,
                "priorityChunkSize": 500,
                "priorityChunkDelayMs": 100
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
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
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_app_string(config_dir: &Path, key: &str) -> Result<Option<String>, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(app
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned))
}

pub fn read_host_url(config_dir: &Path) -> Result<String, InfraError> {
    Ok(read_app_string(config_dir, "hostUrl")?.unwrap_or_else(|| DEFAULT_HOST_URL.to_string()))
}

pub fn read_viewer_base_url(config_dir: &Path) -> Result<String, InfraError> {
    Ok(read_app_string(config_dir, "viewerBaseUrl")?
        .unwrap_or_else(|| DEFAULT_VIEWER_BASE_URL.to_string()))
}

pub fn read_timezone(config_dir: &Path) -> Result<Option<Tz>, InfraError> {
    let Some(name) = read_app_string(config_dir, "timezone")? else {
        return Ok(None);
    };
    name.parse::<Tz>()
        .map(Some)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{name}': {error}")))
}

pub fn read_resolution_tuning(config_dir: &Path) -> Result<ResolutionTuning, InfraError> {
    let resolution = read_config(&config_dir.join(RESOLUTION_JSON))?;
    let tuning: ResolutionTuning = serde_json::from_value(resolution)?;
    if tuning.page_size == 0 || tuning.batch_size == 0 || tuning.priority_chunk_size == 0 {
        return Err(InfraError::InvalidConfig(
            "pageSize, batchSize and priorityChunkSize must be > 0".to_string(),
        ));
    }
    Ok(tuning)
}
