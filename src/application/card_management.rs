use crate::application::query_executor::{QueryExecutor, QueryPacing, distinct_ids};
use crate::application::group_resolution::ResolutionLimits;
use crate::application::upward_resolver::ELIGIBILITY_MARKER;
use crate::domain::models::{CardManagementAction, CardManagementRule};
use crate::infrastructure::blob_store::NamedBlobStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::group_config::GroupConfigStore;
use crate::infrastructure::host_client::{HostApiClient, HostRow};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub rule: String,
    pub action: CardManagementAction,
    pub blocks_changed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardManagementReport {
    pub applied: Vec<RuleOutcome>,
    pub failed_rules: Vec<String>,
}

fn has_marker(row: &HostRow) -> bool {
    let needle = format!("{ELIGIBILITY_MARKER}=\"");
    row.get("ial")
        .and_then(serde_json::Value::as_str)
        .map(|ial| ial.contains(&needle))
        .unwrap_or(false)
}

/// Keeps deck membership in line with query-defined rules: matching blocks
/// are turned into cards (`addCards`) or stripped of them (`removeCards`).
pub struct CardManagementService<H, S>
where
    H: HostApiClient,
    S: NamedBlobStore,
{
    host: Arc<H>,
    executor: QueryExecutor<H>,
    config: Arc<GroupConfigStore<S>>,
    limits: ResolutionLimits,
}

impl<H, S> CardManagementService<H, S>
where
    H: HostApiClient,
    S: NamedBlobStore,
{
    pub fn new(host: Arc<H>, config: Arc<GroupConfigStore<S>>) -> Self {
        Self {
            executor: QueryExecutor::new(host.clone()),
            host,
            config,
            limits: ResolutionLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ResolutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_query_pacing(mut self, pacing: QueryPacing) -> Self {
        self.executor = self.executor.with_pacing(pacing);
        self
    }

    pub async fn run_rules(&self) -> Result<CardManagementReport, InfraError> {
        let settings = self.config.settings()?;
        let mut report = CardManagementReport::default();
        if !settings.card_management_enabled {
            tracing::debug!("card management disabled");
            return Ok(report);
        }

        for rule in &settings.card_management_rules {
            match self.apply_rule(rule).await {
                Ok(outcome) => report.applied.push(outcome),
                Err(error) => {
                    tracing::error!(rule = %rule.name, %error, "card management rule failed");
                    report.failed_rules.push(rule.name.clone());
                }
            }
        }
        Ok(report)
    }

    pub async fn apply_rule(&self, rule: &CardManagementRule) -> Result<RuleOutcome, InfraError> {
        rule.validate().map_err(InfraError::InvalidConfig)?;
        let rows = self
            .executor
            .run_query(&rule.query, self.limits.page_size, self.limits.max_pages)
            .await?;

        let (carded, uncarded): (Vec<HostRow>, Vec<HostRow>) = rows.into_iter().partition(has_marker);
        let targets = match rule.action {
            CardManagementAction::AddCards => distinct_ids(&uncarded, "id"),
            CardManagementAction::RemoveCards => distinct_ids(&carded, "id"),
        };

        if !targets.is_empty() {
            match rule.action {
                CardManagementAction::AddCards => {
                    self.host.add_riff_cards(&rule.deck_id, &targets).await?
                }
                CardManagementAction::RemoveCards => {
                    self.host.remove_riff_cards(&rule.deck_id, &targets).await?
                }
            }
            tracing::info!(rule = %rule.name, action = ?rule.action, blocks = targets.len(),
                "card management rule applied");
        }

        Ok(RuleOutcome {
            rule: rule.name.clone(),
            action: rule.action,
            blocks_changed: targets.len(),
        })
    }
}
