use crate::infrastructure::blob_store::initialize_database;
use crate::infrastructure::config::{ensure_default_configs, read_resolution_tuning, read_timezone};
use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::{Path, PathBuf};

pub const WORKSPACE_ENV: &str = "RIFF_GROUPS_HOME";

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
}

/// `RIFF_GROUPS_HOME` when set and non-blank, otherwise the current directory.
pub fn resolve_workspace_root<F>(lookup: F) -> Result<PathBuf, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(WORKSPACE_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(std::env::current_dir()?),
    }
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join("riff-groups.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    read_resolution_tuning(&config_dir)?;
    read_timezone(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
    })
}
