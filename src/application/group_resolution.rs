use crate::application::query_executor::{QueryExecutor, QueryPacing};
use crate::application::upward_resolver::{ResolverTuning, UpwardAttributeResolver};
use crate::domain::models::Group;
use crate::infrastructure::blob_store::NamedBlobStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::group_cache::GroupCacheStore;
use crate::infrastructure::host_client::HostApiClient;
use chrono::Duration;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct ResolutionLimits {
    pub page_size: usize,
    pub max_pages: usize,
    pub max_depth: usize,
}

impl Default for ResolutionLimits {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 100,
            max_depth: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

/// Group -> eligible block ids, through the cache when it is allowed to answer.
pub struct GroupResolutionService<H, S>
where
    H: HostApiClient,
    S: NamedBlobStore,
{
    executor: QueryExecutor<H>,
    resolver: UpwardAttributeResolver<H>,
    cache: Arc<GroupCacheStore<S>>,
    limits: ResolutionLimits,
    cache_ttl: RwLock<Duration>,
}

impl<H, S> GroupResolutionService<H, S>
where
    H: HostApiClient + 'static,
    S: NamedBlobStore,
{
    pub fn new(host: Arc<H>, cache: Arc<GroupCacheStore<S>>) -> Self {
        Self {
            executor: QueryExecutor::new(host.clone()),
            resolver: UpwardAttributeResolver::new(host),
            cache,
            limits: ResolutionLimits::default(),
            cache_ttl: RwLock::new(Duration::minutes(30)),
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

    pub fn with_resolver_tuning(mut self, tuning: ResolverTuning) -> Self {
        self.resolver = self.resolver.with_tuning(tuning);
        self
    }

    pub fn with_cache_ttl(self, ttl: Duration) -> Self {
        if let Ok(mut current) = self.cache_ttl.write() {
            *current = ttl;
        }
        self
    }

    pub fn cache(&self) -> &Arc<GroupCacheStore<S>> {
        &self.cache
    }

    pub fn cache_ttl(&self) -> Result<Duration, InfraError> {
        self.cache_ttl
            .read()
            .map(|ttl| *ttl)
            .map_err(|error| InfraError::InvalidConfig(format!("cache ttl lock poisoned: {error}")))
    }

    pub fn set_cache_ttl(&self, ttl: Duration) -> Result<(), InfraError> {
        let mut current = self
            .cache_ttl
            .write()
            .map_err(|error| InfraError::InvalidConfig(format!("cache ttl lock poisoned: {error}")))?;
        *current = ttl;
        Ok(())
    }

    /// `force_refresh`, then `prefer_fresh_query`, then a valid cache entry,
    /// then a fresh resolution. Fresh results are always written to the cache.
    pub async fn resolve_group(&self, group: &Group, force_refresh: bool) -> Result<Vec<String>, InfraError> {
        if force_refresh || group.prefer_fresh_query {
            tracing::debug!(group_id = %group.id, force_refresh, "resolving group from query");
            return self.resolve_fresh(group).await;
        }

        if self.cache.is_valid(&group.id, self.cache_ttl()?)? {
            if let Some(entry) = self.cache.get(&group.id)? {
                tracing::debug!(group_id = %group.id, blocks = entry.block_ids.len(), "group served from cache");
                return Ok(entry.block_ids);
            }
        }
        self.resolve_fresh(group).await
    }

    async fn resolve_fresh(&self, group: &Group) -> Result<Vec<String>, InfraError> {
        let matched = self
            .executor
            .run_id_query(&group.query, self.limits.page_size, self.limits.max_pages)
            .await?;
        let eligible = self
            .resolver
            .resolve(&matched, self.limits.max_depth)
            .await?
            .into_iter()
            .collect::<Vec<_>>();

        if let Err(error) = self.cache.put(&group.id, &eligible) {
            tracing::warn!(group_id = %group.id, %error, "failed to persist group cache");
        }
        tracing::info!(
            group_id = %group.id,
            matched = matched.len(),
            eligible = eligible.len(),
            "group resolved"
        );
        Ok(eligible)
    }

    /// Force-resolves each group in turn; one group's failure does not stop the rest.
    pub async fn refresh_groups(&self, groups: &[Group]) -> RefreshReport {
        let mut report = RefreshReport::default();
        for group in groups {
            match self.resolve_group(group, true).await {
                Ok(_) => report.refreshed.push(group.id.clone()),
                Err(error) => {
                    tracing::error!(group_id = %group.id, %error, "group refresh failed");
                    report.failed.push(group.id.clone());
                }
            }
        }
        report
    }
}
