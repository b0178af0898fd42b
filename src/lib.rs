pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::resolve_workspace_root;
use application::commands::{AppState, start_automation_impl, stop_automation_impl};
use infrastructure::error::InfraError;

/// Boots the workspace, runs the automation timers until Ctrl-C, then stops them.
pub fn run() -> Result<(), InfraError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let workspace_root = resolve_workspace_root(|key| std::env::var(key).ok())?;
        let state = AppState::new(workspace_root)?;

        let status = start_automation_impl(&state)
            .inspect_err(|error| state.log_error("start_automation", &error.to_string()))?;
        tracing::info!(tasks = ?status.tasks, "riff-groups running; press Ctrl-C to stop");

        tokio::signal::ctrl_c().await?;
        let stopped = stop_automation_impl(&state);
        tracing::info!(stopped, "riff-groups shutting down");
        Ok::<(), InfraError>(())
    })
}
