use crate::application::automation::{AutomationService, PostponeOutcome};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::card_gateway::CardGateway;
use crate::application::card_management::CardManagementService;
use crate::application::group_actions::{ApplyPriorityOutcome, ChunkPacing, GroupActionService};
use crate::application::group_resolution::{GroupResolutionService, ResolutionLimits};
use crate::application::jobs::ScheduledJobs;
use crate::application::query_executor::QueryPacing;
use crate::application::timer::{TimerConfig, TimerOrchestrator, TimerTask};
use crate::application::upward_resolver::ResolverTuning;
use crate::domain::models::{Category, GlobalSettings, Group};
use crate::infrastructure::blob_store::SqliteNamedBlobStore;
use crate::infrastructure::config::{
    ResolutionTuning, read_host_url, read_resolution_tuning, read_timezone, read_viewer_base_url,
};
use crate::infrastructure::credential_store::{HostTokenStore, KeyringHostTokenStore, resolve_host_token};
use crate::infrastructure::deep_link::{SystemUrlOpener, UrlOpener};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::flashcard_addon::HostRiffAddon;
use crate::infrastructure::group_cache::GroupCacheStore;
use crate::infrastructure::group_config::{CategoryGroups, GroupConfigStore, MoveDirection};
use crate::infrastructure::host_client::ReqwestHostClient;
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

type Host = ReqwestHostClient;
type Addon = HostRiffAddon;
type Blobs = SqliteNamedBlobStore;
type AppJobs = ScheduledJobs<Host, Addon, Blobs>;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    config: Arc<GroupConfigStore<Blobs>>,
    resolution: Arc<GroupResolutionService<Host, Blobs>>,
    actions: GroupActionService<Host, Addon, Blobs>,
    jobs: Arc<AppJobs>,
    timers: TimerOrchestrator<AppJobs>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_collaborators(
            workspace_root,
            &KeyringHostTokenStore::default(),
            Arc::new(SystemUrlOpener),
        )
    }

    pub fn with_collaborators(
        workspace_root: PathBuf,
        token_store: &dyn HostTokenStore,
        opener: Arc<dyn UrlOpener>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config_dir = bootstrap.config_dir;
        let tuning = read_resolution_tuning(&config_dir)?;
        let timezone = read_timezone(&config_dir)?;

        let token = match resolve_host_token(|key| std::env::var(key).ok(), token_store) {
            Ok(token) => token,
            Err(error) => {
                tracing::warn!(%error, "host token unavailable; continuing without one");
                None
            }
        };
        let host = Arc::new(ReqwestHostClient::new(&read_host_url(&config_dir)?, token)?);
        let addon = Arc::new(HostRiffAddon::new(host.clone()));

        let blobs = Arc::new(SqliteNamedBlobStore::new(&bootstrap.database_path));
        let config = Arc::new(GroupConfigStore::new(blobs.clone()));
        config.load()?;
        let cache = Arc::new(GroupCacheStore::new(blobs));
        let cached = cache.load()?;
        let settings = config.settings()?;

        let resolution = Arc::new(
            GroupResolutionService::new(host.clone(), cache)
                .with_limits(resolution_limits(&tuning))
                .with_query_pacing(query_pacing(&tuning))
                .with_resolver_tuning(resolver_tuning(&tuning))
                .with_cache_ttl(cache_ttl(&settings)),
        );
        let cards = Arc::new(CardGateway::new(host.clone(), Some(addon)));

        let automation = AutomationService::new(resolution.clone(), config.clone(), cards.clone())
            .with_timezone(timezone);
        let card_management = CardManagementService::new(host, config.clone())
            .with_limits(resolution_limits(&tuning))
            .with_query_pacing(query_pacing(&tuning));
        let jobs = Arc::new(
            ScheduledJobs::new(automation, card_management, resolution.clone(), config.clone())
                .with_sweep_horizon(sweep_horizon(&tuning)),
        );
        let actions = GroupActionService::new(
            resolution.clone(),
            cards,
            opener,
            read_viewer_base_url(&config_dir)?,
        )
        .with_pacing(ChunkPacing {
            chunk_size: tuning.priority_chunk_size,
            chunk_delay: Duration::from_millis(tuning.priority_chunk_delay_ms),
        });

        tracing::info!(
            workspace = %bootstrap.workspace_root.display(),
            groups = config.groups()?.len(),
            cached,
            "app state ready"
        );

        Ok(Self {
            config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            config,
            resolution,
            actions,
            timers: TimerOrchestrator::new(jobs.clone()),
            jobs,
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

fn resolution_limits(tuning: &ResolutionTuning) -> ResolutionLimits {
    ResolutionLimits {
        page_size: tuning.page_size,
        max_pages: tuning.max_pages,
        max_depth: tuning.max_depth,
    }
}

fn query_pacing(tuning: &ResolutionTuning) -> QueryPacing {
    QueryPacing {
        page_delay: Duration::from_millis(tuning.page_delay_ms),
        failure_backoff: Duration::from_millis(tuning.page_failure_backoff_ms),
    }
}

fn resolver_tuning(tuning: &ResolutionTuning) -> ResolverTuning {
    ResolverTuning {
        batch_size: tuning.batch_size,
        batch_delay: Duration::from_millis(tuning.batch_delay_ms),
    }
}

fn cache_ttl(settings: &GlobalSettings) -> chrono::Duration {
    i64::try_from(settings.cache_update_interval)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .unwrap_or(chrono::Duration::MAX)
}

fn sweep_horizon(tuning: &ResolutionTuning) -> chrono::Duration {
    chrono::Duration::try_hours(tuning.cache_sweep_hours).unwrap_or(chrono::Duration::MAX)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApplyPriorityResponse {
    pub status: String,
    pub success_count: usize,
    pub fail_count: usize,
    pub skipped_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheRefreshResponse {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
    pub swept: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutomationCycleResponse {
    pub cards_updated: usize,
    pub failed_groups: Vec<String>,
    pub postponed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AutomationStatusResponse {
    pub running: bool,
    pub tasks: Vec<String>,
}

fn require_group(state: &AppState, group_id: &str) -> Result<Group, InfraError> {
    state
        .config
        .group(group_id)?
        .ok_or_else(|| InfraError::InvalidConfig(format!("unknown group: {group_id}")))
}

fn parse_direction(value: &str) -> Result<MoveDirection, InfraError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "up" => Ok(MoveDirection::Up),
        "down" => Ok(MoveDirection::Down),
        _ => Err(InfraError::InvalidConfig(format!("unsupported move direction: {value}"))),
    }
}

fn task_name(task: TimerTask) -> &'static str {
    match task {
        TimerTask::PriorityScan => "priority_scan",
        TimerTask::CacheRefresh => "cache_refresh",
        TimerTask::CardManagement => "card_management",
    }
}

pub fn list_groups_impl(state: &AppState) -> Result<Vec<Group>, InfraError> {
    state.config.groups()
}

pub fn list_groups_by_category_impl(state: &AppState) -> Result<Vec<CategoryGroups>, InfraError> {
    state.config.grouped_by_category()
}

/// Creates or replaces a group. A changed query invalidates its cached ids.
pub fn save_group_impl(state: &AppState, group: Group) -> Result<Group, InfraError> {
    let previous = state.config.group(&group.id)?;
    state.config.save_group(group.clone())?;
    if previous.is_some_and(|previous| previous.query != group.query) {
        state.resolution.cache().clear(&group.id)?;
    }
    state.log_info("save_group", &format!("saved group_id={}", group.id));
    Ok(group)
}

pub fn delete_group_impl(state: &AppState, group_id: String) -> Result<bool, InfraError> {
    let deleted = state.config.delete_group(&group_id)?;
    if deleted {
        state.resolution.cache().clear(&group_id)?;
        state.log_info("delete_group", &format!("deleted group_id={group_id}"));
    }
    Ok(deleted)
}

pub fn set_group_enabled_impl(state: &AppState, group_id: String, enabled: bool) -> Result<Group, InfraError> {
    state.config.set_group_enabled(&group_id, enabled)?;
    require_group(state, &group_id)
}

pub fn move_group_impl(state: &AppState, group_id: String, direction: String) -> Result<bool, InfraError> {
    let direction = parse_direction(&direction)?;
    state.config.move_group(&group_id, direction)
}

pub fn update_group_category_impl(
    state: &AppState,
    group_id: String,
    category_id: String,
) -> Result<Group, InfraError> {
    state.config.update_group_category(&group_id, &category_id)?;
    require_group(state, &group_id)
}

pub fn new_group_template_impl(state: &AppState, category_id: Option<String>) -> Result<Group, InfraError> {
    state.config.new_group_template(category_id.as_deref())
}

pub fn list_categories_impl(state: &AppState) -> Result<Vec<Category>, InfraError> {
    state.config.categories()
}

pub fn save_category_impl(state: &AppState, category: Category) -> Result<Category, InfraError> {
    state.config.save_category(category.clone())?;
    state.log_info("save_category", &format!("saved category_id={}", category.id));
    Ok(category)
}

/// Deletes the category and every group in it; returns the group count removed.
pub fn delete_category_impl(state: &AppState, category_id: String) -> Result<usize, InfraError> {
    let doomed = state
        .config
        .groups()?
        .into_iter()
        .filter(|group| group.category_id == category_id)
        .map(|group| group.id)
        .collect::<Vec<_>>();
    let removed = state.config.delete_category(&category_id)?;
    for group_id in &doomed {
        state.resolution.cache().clear(group_id)?;
    }
    state.log_info(
        "delete_category",
        &format!("deleted category_id={category_id} groups_removed={removed}"),
    );
    Ok(removed)
}

pub fn new_category_template_impl(state: &AppState) -> Category {
    state.config.new_category_template()
}

pub fn get_settings_impl(state: &AppState) -> Result<GlobalSettings, InfraError> {
    state.config.settings()
}

/// Validates and stores settings, applies the new cache TTL and restarts the
/// timers when automation is running.
pub fn update_settings_impl(state: &AppState, settings: GlobalSettings) -> Result<GlobalSettings, InfraError> {
    state.config.update_settings(settings.clone())?;
    state.resolution.set_cache_ttl(cache_ttl(&settings))?;
    if state.timers.is_running() {
        state.timers.restart(&TimerConfig::from_settings(&settings));
    }
    state.log_info("update_settings", "settings updated");
    Ok(settings)
}

pub async fn apply_group_priority_impl(
    state: &AppState,
    group_id: String,
) -> Result<ApplyPriorityResponse, InfraError> {
    let group = require_group(state, &group_id)?;
    let response = match state.actions.apply_group_priority(&group).await? {
        ApplyPriorityOutcome::NoMatchingBlocks => ApplyPriorityResponse {
            status: "no_matching_blocks".to_string(),
            success_count: 0,
            fail_count: 0,
            skipped_count: 0,
        },
        ApplyPriorityOutcome::NoCards => ApplyPriorityResponse {
            status: "no_cards".to_string(),
            success_count: 0,
            fail_count: 0,
            skipped_count: 0,
        },
        ApplyPriorityOutcome::Applied(report) => ApplyPriorityResponse {
            status: "applied".to_string(),
            success_count: report.success_count,
            fail_count: report.fail_count,
            skipped_count: report.skipped_count,
        },
    };
    state.log_info(
        "apply_group_priority",
        &format!(
            "group_id={group_id} status={} success={} failed={}",
            response.status, response.success_count, response.fail_count
        ),
    );
    Ok(response)
}

pub fn open_group_query_impl(state: &AppState, group_id: String) -> Result<String, InfraError> {
    let group = require_group(state, &group_id)?;
    state.actions.open_group_query(&group)
}

pub async fn open_group_blocks_impl(state: &AppState, group_id: String) -> Result<Option<String>, InfraError> {
    let group = require_group(state, &group_id)?;
    state.actions.open_group_blocks(&group).await
}

pub fn clear_group_cache_impl(state: &AppState, group_id: String) -> Result<(), InfraError> {
    state.resolution.cache().clear(&group_id)
}

pub fn clear_all_cache_impl(state: &AppState) -> Result<(), InfraError> {
    state.resolution.cache().clear_all()?;
    state.log_info("clear_all_cache", "group cache cleared");
    Ok(())
}

pub async fn refresh_all_groups_impl(state: &AppState) -> Result<CacheRefreshResponse, InfraError> {
    let report = state.jobs.refresh_cache().await?;
    Ok(CacheRefreshResponse {
        refreshed: report.refresh.refreshed,
        failed: report.refresh.failed,
        swept: report.swept,
    })
}

/// One priority scan plus postponement, outside the timer schedule.
pub async fn run_automation_cycle_impl(state: &AppState) -> Result<AutomationCycleResponse, InfraError> {
    let cycle = state.jobs.automation().run_cycle().await;
    let scan = cycle.priority_scan?;
    let (postponed, error) = match cycle.postponement {
        Ok(PostponeOutcome::Postponed(count)) => (count, None),
        Ok(_) => (0, None),
        Err(error) => (0, Some(error.to_string())),
    };
    Ok(AutomationCycleResponse {
        cards_updated: scan.cards_updated(),
        failed_groups: scan.failed_groups,
        postponed,
        error,
    })
}

pub fn automation_status_impl(state: &AppState) -> AutomationStatusResponse {
    AutomationStatusResponse {
        running: state.timers.is_running(),
        tasks: state
            .timers
            .running_tasks()
            .into_iter()
            .map(|task| task_name(task).to_string())
            .collect(),
    }
}

/// Starts (or restarts) every timer the current settings enable. Must be
/// called inside a tokio runtime.
pub fn start_automation_impl(state: &AppState) -> Result<AutomationStatusResponse, InfraError> {
    let settings = state.config.settings()?;
    state.timers.start(&TimerConfig::from_settings(&settings));
    let status = automation_status_impl(state);
    state.log_info("start_automation", &format!("tasks={}", status.tasks.join(",")));
    Ok(status)
}

pub fn stop_automation_impl(state: &AppState) -> usize {
    let stopped = state.timers.stop();
    state.log_info("stop_automation", &format!("stopped={stopped}"));
    stopped
}

/// Stops automation and removes both persisted blobs.
pub fn uninstall_impl(state: &AppState) -> Result<(), InfraError> {
    state.timers.stop();
    state.config.forget_persisted()?;
    state.resolution.cache().forget_persisted()?;
    state.log_info("uninstall", "configuration and cache removed");
    Ok(())
}
