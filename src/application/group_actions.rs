use crate::application::card_gateway::CardGateway;
use crate::application::group_resolution::GroupResolutionService;
use crate::domain::models::Group;
use crate::infrastructure::blob_store::NamedBlobStore;
use crate::infrastructure::deep_link::{RuleInput, RuleType, UrlOpener, build_rule_url};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::flashcard_addon::FlashcardAddon;
use crate::infrastructure::host_client::HostApiClient;
use std::sync::Arc;
use tokio::time::{Duration, sleep};

#[derive(Debug, Clone)]
pub struct ChunkPacing {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

impl Default for ChunkPacing {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_delay: Duration::from_millis(100),
        }
    }
}

/// Card counts across all chunks of a bulk update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub success_count: usize,
    pub fail_count: usize,
    pub skipped_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPriorityOutcome {
    NoMatchingBlocks,
    NoCards,
    Applied(BatchReport),
}

/// User-triggered one-shot operations on a single group.
pub struct GroupActionService<H, A, S>
where
    H: HostApiClient,
    A: FlashcardAddon,
    S: NamedBlobStore,
{
    resolution: Arc<GroupResolutionService<H, S>>,
    cards: Arc<CardGateway<H, A>>,
    opener: Arc<dyn UrlOpener>,
    viewer_base_url: String,
    pacing: ChunkPacing,
}

impl<H, A, S> GroupActionService<H, A, S>
where
    H: HostApiClient + 'static,
    A: FlashcardAddon,
    S: NamedBlobStore,
{
    pub fn new(
        resolution: Arc<GroupResolutionService<H, S>>,
        cards: Arc<CardGateway<H, A>>,
        opener: Arc<dyn UrlOpener>,
        viewer_base_url: impl Into<String>,
    ) -> Self {
        Self {
            resolution,
            cards,
            opener,
            viewer_base_url: viewer_base_url.into(),
            pacing: ChunkPacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: ChunkPacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Force-resolves `group` and sets every one of its cards to the group's
    /// priority, chunk by chunk. Chunk failures are counted, not returned.
    pub async fn apply_group_priority(&self, group: &Group) -> Result<ApplyPriorityOutcome, InfraError> {
        let block_ids = self.resolution.resolve_group(group, true).await?;
        if block_ids.is_empty() {
            tracing::info!(group_id = %group.id, "no flashcard blocks match group");
            return Ok(ApplyPriorityOutcome::NoMatchingBlocks);
        }

        let cards = self.cards.cards_for_blocks(&block_ids).await?;
        if cards.is_empty() {
            tracing::info!(group_id = %group.id, blocks = block_ids.len(), "group blocks have no cards");
            return Ok(ApplyPriorityOutcome::NoCards);
        }

        let mut report = BatchReport::default();
        let chunk_size = self.pacing.chunk_size.max(1);
        let chunk_count = cards.len().div_ceil(chunk_size);
        for (index, chunk) in cards.chunks(chunk_size).enumerate() {
            match self.cards.set_priority(chunk, group.priority).await {
                Ok(true) => report.success_count += chunk.len(),
                Ok(false) => report.skipped_count += chunk.len(),
                Err(error) => {
                    tracing::warn!(group_id = %group.id, chunk = index, %error, "priority chunk failed");
                    report.fail_count += chunk.len();
                }
            }
            if index + 1 < chunk_count {
                sleep(self.pacing.chunk_delay).await;
            }
        }

        tracing::info!(
            group_id = %group.id,
            priority = group.priority,
            success = report.success_count,
            failed = report.fail_count,
            skipped = report.skipped_count,
            "group priority applied"
        );
        Ok(ApplyPriorityOutcome::Applied(report))
    }

    pub fn group_query_url(&self, group: &Group) -> Result<String, InfraError> {
        build_rule_url(
            &self.viewer_base_url,
            RuleType::Sql,
            &RuleInput::Text(group.query.clone()),
            Some(&group.name),
        )
    }

    /// Opens the group's raw query in the viewer and returns the link used.
    pub fn open_group_query(&self, group: &Group) -> Result<String, InfraError> {
        let url = self.group_query_url(group)?;
        self.opener.open(&url)?;
        Ok(url)
    }

    /// Opens the group's resolved blocks in the viewer. `None` when the group
    /// resolves to nothing.
    pub async fn open_group_blocks(&self, group: &Group) -> Result<Option<String>, InfraError> {
        let block_ids = self.resolution.resolve_group(group, false).await?;
        if block_ids.is_empty() {
            return Ok(None);
        }
        let url = build_rule_url(
            &self.viewer_base_url,
            RuleType::IdList,
            &RuleInput::Ids(block_ids),
            Some(&group.name),
        )?;
        self.opener.open(&url)?;
        Ok(Some(url))
    }
}
