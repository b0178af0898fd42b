use crate::domain::models::RiffCard;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::flashcard_addon::{AddonOperation, FlashcardAddon};
use crate::infrastructure::host_client::HostApiClient;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Card lookups and bulk card updates. The add-on is optional and may expose
/// only some operations; lookups fall back to the host's riff endpoint.
pub struct CardGateway<H, A>
where
    H: HostApiClient,
    A: FlashcardAddon,
{
    host: Arc<H>,
    addon: Option<Arc<A>>,
    reported_missing: Mutex<HashSet<AddonOperation>>,
}

impl<H, A> CardGateway<H, A>
where
    H: HostApiClient,
    A: FlashcardAddon,
{
    pub fn new(host: Arc<H>, addon: Option<Arc<A>>) -> Self {
        Self {
            host,
            addon,
            reported_missing: Mutex::new(HashSet::new()),
        }
    }

    fn addon_for(&self, operation: AddonOperation) -> Option<&A> {
        match self.addon.as_deref() {
            Some(addon) if addon.supports(operation) => Some(addon),
            _ => {
                let first_report = self
                    .reported_missing
                    .lock()
                    .map(|mut reported| reported.insert(operation))
                    .unwrap_or(true);
                if first_report {
                    tracing::info!(operation = operation.name(), "flashcard add-on operation unavailable");
                }
                None
            }
        }
    }

    pub fn supports(&self, operation: AddonOperation) -> bool {
        self.addon
            .as_deref()
            .map(|addon| addon.supports(operation))
            .unwrap_or(false)
    }

    /// Cards attached to `block_ids`, in block order, each card once.
    pub async fn cards_for_blocks(&self, block_ids: &[String]) -> Result<Vec<RiffCard>, InfraError> {
        if block_ids.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(addon) = self.addon_for(AddonOperation::CardsByBlockIds) {
            match addon.cards_by_block_ids(block_ids).await {
                Ok(mut by_block) => {
                    let cards = block_ids
                        .iter()
                        .filter_map(|id| by_block.remove(id))
                        .flatten()
                        .collect();
                    return Ok(dedupe_cards(cards));
                }
                Err(error) => {
                    tracing::warn!(%error, blocks = block_ids.len(), "add-on card lookup failed; using host endpoint");
                }
            }
        }

        let cards = self.host.riff_cards_by_block_ids(block_ids).await?;
        Ok(dedupe_cards(cards))
    }

    /// Returns `Ok(false)` when the add-on cannot set priorities.
    pub async fn set_priority(&self, cards: &[RiffCard], priority: i64) -> Result<bool, InfraError> {
        let Some(addon) = self.addon_for(AddonOperation::BulkSetPriority) else {
            return Ok(false);
        };
        addon.bulk_set_priority(cards, priority).await?;
        Ok(true)
    }

    /// Returns `Ok(false)` when the add-on cannot postpone.
    pub async fn postpone(&self, cards: &[RiffCard], days: u32) -> Result<bool, InfraError> {
        let Some(addon) = self.addon_for(AddonOperation::BulkPostpone) else {
            return Ok(false);
        };
        addon.bulk_postpone(cards, days).await?;
        Ok(true)
    }

    /// Returns `Ok(None)` when the add-on cannot list cards.
    pub async fn all_cards_flat(&self) -> Result<Option<Vec<RiffCard>>, InfraError> {
        match self.addon_for(AddonOperation::AllCardsFlat) {
            Some(addon) => addon.all_cards_flat().await.map(Some),
            None => Ok(None),
        }
    }
}

fn dedupe_cards(cards: Vec<RiffCard>) -> Vec<RiffCard> {
    let mut seen = HashSet::new();
    cards
        .into_iter()
        .filter(|card| !card.id.trim().is_empty() && seen.insert(card.id.clone()))
        .collect()
}
