use crate::application::card_gateway::CardGateway;
use crate::application::group_resolution::GroupResolutionService;
use crate::domain::cards::{
    NowProvider, cards_needing_priority, filter_today, is_postponable, system_now, today_stamp,
};
use crate::domain::models::Group;
use crate::infrastructure::blob_store::NamedBlobStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::flashcard_addon::FlashcardAddon;
use crate::infrastructure::group_config::GroupConfigStore;
use crate::infrastructure::host_client::HostApiClient;
use chrono_tz::Tz;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupScanOutcome {
    NoBlocks,
    NoCards,
    NoTodayCards,
    AlreadyAtPriority,
    Unsupported,
    Updated(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityScanReport {
    pub skipped: bool,
    pub groups: Vec<(String, GroupScanOutcome)>,
    pub failed_groups: Vec<String>,
}

impl PriorityScanReport {
    pub fn cards_updated(&self) -> usize {
        self.groups
            .iter()
            .map(|(_, outcome)| match outcome {
                GroupScanOutcome::Updated(count) => *count,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostponeOutcome {
    Disabled,
    NoCards,
    Unsupported,
    Postponed(usize),
}

#[derive(Debug)]
pub struct CycleReport {
    pub priority_scan: Result<PriorityScanReport, InfraError>,
    pub postponement: Result<PostponeOutcome, InfraError>,
}

/// Priority normalization and postponement of cards created today.
pub struct AutomationService<H, A, S>
where
    H: HostApiClient,
    A: FlashcardAddon,
    S: NamedBlobStore,
{
    resolution: Arc<GroupResolutionService<H, S>>,
    config: Arc<GroupConfigStore<S>>,
    cards: Arc<CardGateway<H, A>>,
    timezone: Option<Tz>,
    now_provider: NowProvider,
}

impl<H, A, S> AutomationService<H, A, S>
where
    H: HostApiClient + 'static,
    A: FlashcardAddon,
    S: NamedBlobStore,
{
    pub fn new(
        resolution: Arc<GroupResolutionService<H, S>>,
        config: Arc<GroupConfigStore<S>>,
        cards: Arc<CardGateway<H, A>>,
    ) -> Self {
        Self {
            resolution,
            config,
            cards,
            timezone: None,
            now_provider: system_now(),
        }
    }

    pub fn with_timezone(mut self, timezone: Option<Tz>) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn today(&self) -> String {
        today_stamp((self.now_provider)(), self.timezone)
    }

    /// Runs the priority scan and the postponement side by side; a failure in
    /// one is logged and reported without affecting the other.
    pub async fn run_cycle(&self) -> CycleReport {
        let (priority_scan, postponement) =
            tokio::join!(self.perform_priority_scan(), self.postpone_today_cards());

        match &priority_scan {
            Ok(report) if !report.skipped => tracing::info!(
                updated = report.cards_updated(),
                failed_groups = report.failed_groups.len(),
                "priority scan finished"
            ),
            Ok(_) => {}
            Err(error) => tracing::error!(%error, "priority scan failed"),
        }
        match &postponement {
            Ok(outcome) => tracing::debug!(?outcome, "postponement finished"),
            Err(error) => tracing::error!(%error, "postponement failed"),
        }

        CycleReport {
            priority_scan,
            postponement,
        }
    }

    pub async fn perform_priority_scan(&self) -> Result<PriorityScanReport, InfraError> {
        let settings = self.config.settings()?;
        if !settings.priority_scan_enabled {
            tracing::debug!("priority scan disabled");
            return Ok(PriorityScanReport {
                skipped: true,
                ..PriorityScanReport::default()
            });
        }

        let today = self.today();
        let mut report = PriorityScanReport::default();
        for group in self.config.priority_groups()? {
            match self.scan_group(&group, &today).await {
                Ok(outcome) => {
                    tracing::debug!(group_id = %group.id, ?outcome, "group scanned");
                    report.groups.push((group.id.clone(), outcome));
                }
                Err(error) => {
                    tracing::error!(group_id = %group.id, %error, "group priority scan failed");
                    report.failed_groups.push(group.id.clone());
                }
            }
        }
        Ok(report)
    }

    async fn scan_group(&self, group: &Group, today: &str) -> Result<GroupScanOutcome, InfraError> {
        let block_ids = self.resolution.resolve_group(group, false).await?;
        if block_ids.is_empty() {
            return Ok(GroupScanOutcome::NoBlocks);
        }

        let cards = self.cards.cards_for_blocks(&block_ids).await?;
        if cards.is_empty() {
            return Ok(GroupScanOutcome::NoCards);
        }

        let todays = filter_today(cards, today);
        if todays.is_empty() {
            return Ok(GroupScanOutcome::NoTodayCards);
        }

        let pending = cards_needing_priority(todays, group.priority);
        if pending.is_empty() {
            return Ok(GroupScanOutcome::AlreadyAtPriority);
        }

        if self.cards.set_priority(&pending, group.priority).await? {
            tracing::info!(group_id = %group.id, cards = pending.len(), priority = group.priority,
                "applied group priority to new cards");
            Ok(GroupScanOutcome::Updated(pending.len()))
        } else {
            Ok(GroupScanOutcome::Unsupported)
        }
    }

    pub async fn postpone_today_cards(&self) -> Result<PostponeOutcome, InfraError> {
        let settings = self.config.settings()?;
        if !settings.postpone_enabled || settings.postpone_days <= 0 {
            return Ok(PostponeOutcome::Disabled);
        }
        let days = u32::try_from(settings.postpone_days).map_err(|_| {
            InfraError::InvalidConfig(format!("postpone days out of range: {}", settings.postpone_days))
        })?;

        let Some(all_cards) = self.cards.all_cards_flat().await? else {
            return Ok(PostponeOutcome::Unsupported);
        };
        let today = self.today();
        let postponable = filter_today(all_cards, &today)
            .into_iter()
            .filter(is_postponable)
            .collect::<Vec<_>>();
        if postponable.is_empty() {
            return Ok(PostponeOutcome::NoCards);
        }

        if self.cards.postpone(&postponable, days).await? {
            tracing::info!(cards = postponable.len(), days, "postponed today's cards");
            Ok(PostponeOutcome::Postponed(postponable.len()))
        } else {
            Ok(PostponeOutcome::Unsupported)
        }
    }
}
