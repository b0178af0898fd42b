use crate::application::automation::AutomationService;
use crate::application::card_management::CardManagementService;
use crate::application::group_resolution::{GroupResolutionService, RefreshReport};
use crate::application::timer::{TimerJobs, TimerTask};
use crate::infrastructure::blob_store::NamedBlobStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::flashcard_addon::FlashcardAddon;
use crate::infrastructure::group_config::GroupConfigStore;
use crate::infrastructure::host_client::HostApiClient;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheRefreshReport {
    pub refresh: RefreshReport,
    pub swept: usize,
}

/// Bodies run by the timer orchestrator on each tick.
pub struct ScheduledJobs<H, A, S>
where
    H: HostApiClient,
    A: FlashcardAddon,
    S: NamedBlobStore,
{
    automation: AutomationService<H, A, S>,
    card_management: CardManagementService<H, S>,
    resolution: Arc<GroupResolutionService<H, S>>,
    config: Arc<GroupConfigStore<S>>,
    sweep_horizon: Duration,
}

impl<H, A, S> ScheduledJobs<H, A, S>
where
    H: HostApiClient + 'static,
    A: FlashcardAddon,
    S: NamedBlobStore,
{
    pub fn new(
        automation: AutomationService<H, A, S>,
        card_management: CardManagementService<H, S>,
        resolution: Arc<GroupResolutionService<H, S>>,
        config: Arc<GroupConfigStore<S>>,
    ) -> Self {
        Self {
            automation,
            card_management,
            resolution,
            config,
            sweep_horizon: Duration::hours(24),
        }
    }

    pub fn with_sweep_horizon(mut self, horizon: Duration) -> Self {
        self.sweep_horizon = horizon;
        self
    }

    pub fn automation(&self) -> &AutomationService<H, A, S> {
        &self.automation
    }

    /// Force-resolves every enabled group, then drops cache entries older
    /// than the sweep horizon.
    pub async fn refresh_cache(&self) -> Result<CacheRefreshReport, InfraError> {
        let groups = self.config.enabled_groups()?;
        let refresh = self.resolution.refresh_groups(&groups).await;
        let swept = self.resolution.cache().sweep_expired(self.sweep_horizon)?;

        tracing::info!(
            refreshed = refresh.refreshed.len(),
            failed = refresh.failed.len(),
            swept,
            "group cache refreshed"
        );
        Ok(CacheRefreshReport { refresh, swept })
    }
}

#[async_trait]
impl<H, A, S> TimerJobs for ScheduledJobs<H, A, S>
where
    H: HostApiClient + 'static,
    A: FlashcardAddon + 'static,
    S: NamedBlobStore + 'static,
{
    async fn run(&self, task: TimerTask) -> Result<(), InfraError> {
        match task {
            TimerTask::PriorityScan => {
                self.automation.run_cycle().await;
                Ok(())
            }
            TimerTask::CacheRefresh => self.refresh_cache().await.map(|_| ()),
            TimerTask::CardManagement => {
                let report = self.card_management.run_rules().await?;
                if !report.failed_rules.is_empty() {
                    tracing::warn!(failed = report.failed_rules.len(), "some card management rules failed");
                }
                Ok(())
            }
        }
    }
}
