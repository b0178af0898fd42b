use crate::domain::cards::{NowProvider, system_now};
use crate::domain::models::{CARD_PRIORITY_ATTRIBUTE, RiffCard};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::host_client::{HostApiClient, ReqwestHostClient};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

const SET_BLOCK_ATTRS_ENDPOINT: &str = "api/attr/setBlockAttrs";
const BATCH_SET_DUE_TIME_ENDPOINT: &str = "api/riff/batchSetRiffCardsDueTime";
const DUE_CARDS_ENDPOINT: &str = "api/riff/getRiffDueCards";
const ATTRIBUTE_WRITE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddonOperation {
    CardsByBlockIds,
    BulkSetPriority,
    BulkPostpone,
    AllCardsFlat,
}

impl AddonOperation {
    pub fn name(self) -> &'static str {
        match self {
            Self::CardsByBlockIds => "getCardsByBlockIds",
            Self::BulkSetPriority => "bulkSetPriority",
            Self::BulkPostpone => "bulkPostpone",
            Self::AllCardsFlat => "getAllCardsFlat",
        }
    }
}

/// Capability surface of the spaced-repetition add-on. Implementations may
/// support only part of it; callers check `supports` before each call.
#[async_trait]
pub trait FlashcardAddon: Send + Sync {
    fn supports(&self, operation: AddonOperation) -> bool;

    async fn cards_by_block_ids(
        &self,
        block_ids: &[String],
    ) -> Result<HashMap<String, Vec<RiffCard>>, InfraError>;

    async fn bulk_set_priority(&self, cards: &[RiffCard], priority: i64) -> Result<(), InfraError>;

    async fn bulk_postpone(&self, cards: &[RiffCard], days: u32) -> Result<(), InfraError>;

    async fn all_cards_flat(&self) -> Result<Vec<RiffCard>, InfraError>;
}

/// Add-on capability implemented over the host's own riff and attribute endpoints.
#[derive(Clone)]
pub struct HostRiffAddon {
    client: Arc<ReqwestHostClient>,
    now_provider: NowProvider,
}

#[derive(Debug, serde::Deserialize)]
struct DueCardsPayload {
    #[serde(default)]
    cards: Vec<RiffCard>,
}

impl HostRiffAddon {
    pub fn new(client: Arc<ReqwestHostClient>) -> Self {
        Self {
            client,
            now_provider: system_now(),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }
}

/// Due timestamp `days` after `now`, in the host's `YYYYMMDDHHMMSS` local format.
pub fn due_stamp(now: DateTime<Utc>, days: u32) -> String {
    (now + Duration::days(i64::from(days)))
        .with_timezone(&Local)
        .format("%Y%m%d%H%M%S")
        .to_string()
}

pub fn group_cards_by_block(cards: Vec<RiffCard>) -> HashMap<String, Vec<RiffCard>> {
    let mut grouped: HashMap<String, Vec<RiffCard>> = HashMap::new();
    for card in cards {
        grouped.entry(card.block_id.clone()).or_default().push(card);
    }
    grouped
}

#[async_trait]
impl FlashcardAddon for HostRiffAddon {
    fn supports(&self, _operation: AddonOperation) -> bool {
        true
    }

    async fn cards_by_block_ids(
        &self,
        block_ids: &[String],
    ) -> Result<HashMap<String, Vec<RiffCard>>, InfraError> {
        let cards = self.client.riff_cards_by_block_ids(block_ids).await?;
        Ok(group_cards_by_block(cards))
    }

    async fn bulk_set_priority(&self, cards: &[RiffCard], priority: i64) -> Result<(), InfraError> {
        let mut failures = Vec::new();
        for chunk in cards.chunks(ATTRIBUTE_WRITE_CONCURRENCY) {
            let mut tasks = JoinSet::new();
            for card in chunk {
                let client = self.client.clone();
                let body = serde_json::json!({
                    "id": card.block_id,
                    "attrs": { CARD_PRIORITY_ATTRIBUTE: priority.to_string() }
                });
                tasks.spawn(async move { client.post_api(SET_BLOCK_ATTRS_ENDPOINT, &body).await });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(_)) => {}
                    Ok(Err(error)) => failures.push(error.to_string()),
                    Err(error) => failures.push(format!("attribute write task failed: {error}")),
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(InfraError::HostApi(format!(
                "{} of {} priority writes failed: {}",
                failures.len(),
                cards.len(),
                failures.join("; ")
            )))
        }
    }

    async fn bulk_postpone(&self, cards: &[RiffCard], days: u32) -> Result<(), InfraError> {
        if cards.is_empty() {
            return Ok(());
        }
        let due = due_stamp((self.now_provider)(), days);
        let card_dues = cards
            .iter()
            .map(|card| serde_json::json!({ "id": card.id, "due": due }))
            .collect::<Vec<_>>();
        self.client
            .post_api(
                BATCH_SET_DUE_TIME_ENDPOINT,
                &serde_json::json!({ "cardDues": card_dues }),
            )
            .await?;
        Ok(())
    }

    async fn all_cards_flat(&self) -> Result<Vec<RiffCard>, InfraError> {
        let data = self
            .client
            .post_api(
                DUE_CARDS_ENDPOINT,
                &serde_json::json!({ "deckID": "", "reviewedCards": [] }),
            )
            .await?;
        if data.is_null() {
            return Ok(Vec::new());
        }
        let payload: DueCardsPayload = serde_json::from_value(data)?;
        Ok(payload.cards)
    }
}
