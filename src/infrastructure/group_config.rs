use crate::domain::models::{Category, GlobalSettings, Group, PluginConfig, generate_id};
use crate::infrastructure::blob_store::NamedBlobStore;
use crate::infrastructure::error::InfraError;
use std::sync::{Arc, Mutex, MutexGuard};

pub const CONFIG_BLOB_NAME: &str = "plugin-config.json";
pub const UNCATEGORIZED_ID: &str = "uncategorized";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CategoryGroups {
    pub category: Category,
    pub groups: Vec<Group>,
}

/// Ordered groups, categories and global settings, persisted as one blob.
pub struct GroupConfigStore<S> {
    store: Arc<S>,
    config: Mutex<PluginConfig>,
}

impl<S> GroupConfigStore<S>
where
    S: NamedBlobStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            config: Mutex::new(PluginConfig::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PluginConfig>, InfraError> {
        self.config
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("group config lock poisoned: {error}")))
    }

    fn persist(&self, config: &PluginConfig) -> Result<(), InfraError> {
        self.store
            .save_named(CONFIG_BLOB_NAME, &serde_json::to_value(config)?)
    }

    /// Loads the stored blob (or seeds defaults), migrates groups without a
    /// category and writes the result back.
    pub fn load(&self) -> Result<(), InfraError> {
        let mut loaded = match self.store.load_named(CONFIG_BLOB_NAME)? {
            Some(blob) => decode_config(blob),
            None => PluginConfig::default(),
        };
        migrate_categories(&mut loaded);

        let mut config = self.lock()?;
        *config = loaded;
        self.persist(&config)
    }

    pub fn groups(&self) -> Result<Vec<Group>, InfraError> {
        Ok(self.lock()?.groups.clone())
    }

    pub fn enabled_groups(&self) -> Result<Vec<Group>, InfraError> {
        Ok(self
            .lock()?
            .groups
            .iter()
            .filter(|group| group.enabled)
            .cloned()
            .collect())
    }

    /// Enabled groups that take part in the priority scan.
    pub fn priority_groups(&self) -> Result<Vec<Group>, InfraError> {
        Ok(self
            .enabled_groups()?
            .into_iter()
            .filter(|group| group.priority_participating)
            .collect())
    }

    pub fn group(&self, group_id: &str) -> Result<Option<Group>, InfraError> {
        Ok(self
            .lock()?
            .groups
            .iter()
            .find(|group| group.id == group_id)
            .cloned())
    }

    pub fn save_group(&self, group: Group) -> Result<(), InfraError> {
        group.validate().map_err(InfraError::InvalidConfig)?;
        let mut config = self.lock()?;
        match config.groups.iter_mut().find(|existing| existing.id == group.id) {
            Some(existing) => *existing = group,
            None => config.groups.push(group),
        }
        self.persist(&config)
    }

    pub fn delete_group(&self, group_id: &str) -> Result<bool, InfraError> {
        let mut config = self.lock()?;
        let before = config.groups.len();
        config.groups.retain(|group| group.id != group_id);
        if config.groups.len() == before {
            return Ok(false);
        }
        self.persist(&config)?;
        Ok(true)
    }

    pub fn set_group_enabled(&self, group_id: &str, enabled: bool) -> Result<(), InfraError> {
        self.update_group(group_id, |group| group.enabled = enabled)
    }

    pub fn update_group_category(&self, group_id: &str, category_id: &str) -> Result<(), InfraError> {
        let mut config = self.lock()?;
        if !config
            .group_categories
            .iter()
            .any(|category| category.id == category_id)
        {
            return Err(InfraError::InvalidConfig(format!(
                "unknown category: {category_id}"
            )));
        }
        let group = find_group_mut(&mut config, group_id)?;
        group.category_id = category_id.to_string();
        self.persist(&config)
    }

    /// Swaps a group with its neighbour. Returns false at either end of the list.
    pub fn move_group(&self, group_id: &str, direction: MoveDirection) -> Result<bool, InfraError> {
        let mut config = self.lock()?;
        let index = config
            .groups
            .iter()
            .position(|group| group.id == group_id)
            .ok_or_else(|| InfraError::InvalidConfig(format!("unknown group: {group_id}")))?;
        let target = match direction {
            MoveDirection::Up if index > 0 => index - 1,
            MoveDirection::Down if index + 1 < config.groups.len() => index + 1,
            _ => return Ok(false),
        };
        config.groups.swap(index, target);
        self.persist(&config)?;
        Ok(true)
    }

    fn update_group<F>(&self, group_id: &str, update: F) -> Result<(), InfraError>
    where
        F: FnOnce(&mut Group),
    {
        let mut config = self.lock()?;
        update(find_group_mut(&mut config, group_id)?);
        self.persist(&config)
    }

    pub fn categories(&self) -> Result<Vec<Category>, InfraError> {
        Ok(self.lock()?.group_categories.clone())
    }

    pub fn save_category(&self, category: Category) -> Result<(), InfraError> {
        category.validate().map_err(InfraError::InvalidConfig)?;
        let mut config = self.lock()?;
        match config
            .group_categories
            .iter_mut()
            .find(|existing| existing.id == category.id)
        {
            Some(existing) => *existing = category,
            None => config.group_categories.push(category),
        }
        self.persist(&config)
    }

    /// Deletes a category and every group that references it.
    pub fn delete_category(&self, category_id: &str) -> Result<usize, InfraError> {
        let mut config = self.lock()?;
        let before = config.group_categories.len();
        config
            .group_categories
            .retain(|category| category.id != category_id);
        if config.group_categories.len() == before {
            return Err(InfraError::InvalidConfig(format!(
                "unknown category: {category_id}"
            )));
        }
        let groups_before = config.groups.len();
        config.groups.retain(|group| group.category_id != category_id);
        let removed_groups = groups_before - config.groups.len();
        self.persist(&config)?;
        Ok(removed_groups)
    }

    /// Categories in order with their groups; groups whose category no longer
    /// exists are listed last under an "Uncategorized" bucket.
    pub fn grouped_by_category(&self) -> Result<Vec<CategoryGroups>, InfraError> {
        let config = self.lock()?;
        let mut buckets = config
            .group_categories
            .iter()
            .map(|category| CategoryGroups {
                category: category.clone(),
                groups: Vec::new(),
            })
            .collect::<Vec<_>>();
        let mut orphaned = Vec::new();

        for group in &config.groups {
            match buckets
                .iter_mut()
                .find(|bucket| bucket.category.id == group.category_id)
            {
                Some(bucket) => bucket.groups.push(group.clone()),
                None => orphaned.push(group.clone()),
            }
        }

        if !orphaned.is_empty() {
            buckets.push(CategoryGroups {
                category: Category {
                    id: UNCATEGORIZED_ID.to_string(),
                    name: "Uncategorized".to_string(),
                },
                groups: orphaned,
            });
        }
        Ok(buckets)
    }

    pub fn settings(&self) -> Result<GlobalSettings, InfraError> {
        Ok(self.lock()?.settings.clone())
    }

    pub fn update_settings(&self, settings: GlobalSettings) -> Result<(), InfraError> {
        settings.validate().map_err(InfraError::InvalidConfig)?;
        let mut config = self.lock()?;
        config.settings = settings;
        self.persist(&config)
    }

    pub fn new_group_template(&self, category_id: Option<&str>) -> Result<Group, InfraError> {
        let config = self.lock()?;
        let category_id = category_id
            .map(ToOwned::to_owned)
            .or_else(|| config.group_categories.first().map(|category| category.id.clone()))
            .unwrap_or_default();
        Ok(Group::template(&category_id))
    }

    pub fn new_category_template(&self) -> Category {
        Category::template()
    }

    pub fn clear_groups_and_categories(&self) -> Result<(), InfraError> {
        let mut config = self.lock()?;
        config.groups.clear();
        config.group_categories.clear();
        self.persist(&config)
    }

    pub fn forget_persisted(&self) -> Result<(), InfraError> {
        *self.lock()? = PluginConfig::default();
        self.store.remove_named(CONFIG_BLOB_NAME)
    }
}

fn find_group_mut<'a>(config: &'a mut PluginConfig, group_id: &str) -> Result<&'a mut Group, InfraError> {
    config
        .groups
        .iter_mut()
        .find(|group| group.id == group_id)
        .ok_or_else(|| InfraError::InvalidConfig(format!("unknown group: {group_id}")))
}

/// Decodes a stored blob leniently. Groups missing fields take them from the
/// first default group, an unreadable blob yields the defaults and invalid
/// settings are reset.
fn decode_config(mut blob: serde_json::Value) -> PluginConfig {
    merge_group_defaults(&mut blob);
    let mut config = match serde_json::from_value::<PluginConfig>(blob) {
        Ok(config) => config,
        Err(error) => {
            tracing::warn!(%error, "stored config unreadable; using defaults");
            return PluginConfig::default();
        }
    };
    if let Err(error) = config.settings.validate() {
        tracing::warn!(%error, "stored settings invalid; using default settings");
        config.settings = GlobalSettings::default();
    }
    config
}

fn merge_group_defaults(blob: &mut serde_json::Value) {
    let Some(groups) = blob.get_mut("groups").and_then(|groups| groups.as_array_mut()) else {
        return;
    };
    let Some(mut template) = PluginConfig::default().groups.into_iter().next() else {
        return;
    };
    template.category_id.clear();
    let Ok(serde_json::Value::Object(template)) = serde_json::to_value(template) else {
        return;
    };

    for group in groups.iter_mut() {
        let serde_json::Value::Object(stored) = group else {
            continue;
        };
        let mut merged = template.clone();
        merged.extend(std::mem::take(stored));
        *stored = merged;
    }
}

fn migrate_categories(config: &mut PluginConfig) {
    if !config
        .groups
        .iter()
        .any(|group| group.category_id.trim().is_empty())
    {
        return;
    }
    if config.group_categories.is_empty() {
        config.group_categories.push(Category {
            id: generate_id(),
            name: "Default".to_string(),
        });
    }
    let fallback = config.group_categories[0].id.clone();
    for group in config
        .groups
        .iter_mut()
        .filter(|group| group.category_id.trim().is_empty())
    {
        tracing::info!(group_id = %group.id, category_id = %fallback, "assigning uncategorized group");
        group.category_id = fallback.clone();
    }
}
