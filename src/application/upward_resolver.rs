use crate::infrastructure::error::InfraError;
use crate::infrastructure::host_client::{HostApiClient, sql_literal};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{Duration, sleep};

/// Attribute carried by blocks that have been turned into flashcards.
pub const ELIGIBILITY_MARKER: &str = "custom-riff-decks";

#[derive(Debug, Clone)]
pub struct ResolverTuning {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for ResolverTuning {
    fn default() -> Self {
        Self {
            batch_size: 30,
            batch_delay: Duration::from_millis(100),
        }
    }
}

/// Breadth-first walk from a set of blocks towards the root, collecting the
/// nearest block on each path that carries the eligibility marker.
pub struct UpwardAttributeResolver<H>
where
    H: HostApiClient,
{
    host: Arc<H>,
    tuning: ResolverTuning,
}

impl<H> UpwardAttributeResolver<H>
where
    H: HostApiClient + 'static,
{
    pub fn new(host: Arc<H>) -> Self {
        Self {
            host,
            tuning: ResolverTuning::default(),
        }
    }

    pub fn with_tuning(mut self, tuning: ResolverTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub async fn resolve(
        &self,
        starting_ids: &[String],
        max_depth: usize,
    ) -> Result<BTreeSet<String>, InfraError> {
        let batch_size = self.tuning.batch_size.max(1);
        let mut found = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut frontier = starting_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .filter(|id| visited.insert(id.to_string()))
            .map(ToOwned::to_owned)
            .collect::<Vec<_>>();
        let mut depth = 0;

        while !frontier.is_empty() && depth < max_depth {
            let mut unmarked = Vec::new();
            for (batch_index, batch) in frontier.chunks(batch_size).enumerate() {
                if batch_index > 0 {
                    sleep(self.tuning.batch_delay).await;
                }
                match self.check_markers(batch).await {
                    Ok(checked) => {
                        for (id, marked) in checked {
                            if marked {
                                found.insert(id);
                            } else {
                                unmarked.push(id);
                            }
                        }
                    }
                    Err(error) => {
                        tracing::warn!(depth, batch = batch_index, size = batch.len(), %error,
                            "marker check failed; dropping batch");
                    }
                }
            }
            if unmarked.is_empty() {
                break;
            }

            let mut parents = Vec::new();
            for (batch_index, batch) in unmarked.chunks(batch_size).enumerate() {
                if batch_index > 0 {
                    sleep(self.tuning.batch_delay).await;
                }
                match self.parent_ids(batch).await {
                    Ok(batch_parents) => parents.extend(
                        batch_parents
                            .into_iter()
                            .filter(|parent| visited.insert(parent.clone())),
                    ),
                    Err(error) => {
                        tracing::warn!(depth, batch = batch_index, %error,
                            "parent lookup failed; dropping batch");
                    }
                }
            }

            frontier = parents;
            depth += 1;
        }

        if !frontier.is_empty() && depth >= max_depth {
            tracing::debug!(max_depth, pending = frontier.len(), "upward search hit depth limit");
        }
        Ok(found)
    }

    async fn check_markers(&self, batch: &[String]) -> Result<Vec<(String, bool)>, InfraError> {
        let mut tasks = JoinSet::new();
        for id in batch {
            let host = self.host.clone();
            let id = id.clone();
            tasks.spawn(async move {
                let statement = format!(
                    "SELECT 1 FROM attributes WHERE block_id = {} AND name = '{ELIGIBILITY_MARKER}' LIMIT 1",
                    sql_literal(&id)
                );
                let rows = host.query_sql(&statement).await?;
                Ok::<_, InfraError>((id, !rows.is_empty()))
            });
        }

        let mut checked = Vec::with_capacity(batch.len());
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => checked.push(result),
                Ok(Err(error)) => {
                    first_error.get_or_insert(error);
                }
                Err(error) => {
                    first_error.get_or_insert(InfraError::HostApi(format!("marker check task failed: {error}")));
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(checked),
        }
    }

    async fn parent_ids(&self, batch: &[String]) -> Result<Vec<String>, InfraError> {
        let id_list = batch
            .iter()
            .map(|id| sql_literal(id))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "SELECT parent_id FROM blocks WHERE id IN ({id_list}) AND parent_id IS NOT NULL AND parent_id != ''"
        );
        let rows = self.host.query_sql(&statement).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("parent_id").and_then(serde_json::Value::as_str))
            .map(str::trim)
            .filter(|parent| !parent.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }
}
