use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_CATEGORY_ID: &str = "default";
pub const DEFAULT_DECK_ID: &str = "20230218211946-2kw8jgx";
pub const SUSPENDED_BOOKMARK: &str = "🛑 Suspended Cards";
pub const PRIORITY_STOP_ATTRIBUTE: &str = "custom-card-priority-stop";
pub const CARD_PRIORITY_ATTRIBUTE: &str = "custom-card-priority";

const GENERATED_ID_LENGTH: usize = 13;
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(rename = "sqlQuery")]
    pub query: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_group_priority")]
    pub priority: i64,
    #[serde(rename = "priorityEnabled", default = "default_true")]
    pub priority_participating: bool,
    #[serde(default)]
    pub category_id: String,
    #[serde(rename = "queryFirst", default)]
    pub prefer_fresh_query: bool,
}

impl Group {
    pub fn template(category_id: &str) -> Self {
        Self {
            id: generate_id(),
            name: "New group".to_string(),
            query: "SELECT * FROM blocks WHERE".to_string(),
            enabled: true,
            priority: default_group_priority(),
            priority_participating: true,
            category_id: category_id.to_string(),
            prefer_fresh_query: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "group.id")?;
        validate_non_empty(&self.name, "group.name")?;
        validate_non_empty(&self.query, "group.sql_query")?;
        if !(0..=100).contains(&self.priority) {
            return Err("group.priority must be between 0 and 100".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
}

impl Category {
    pub fn template() -> Self {
        Self {
            id: generate_id(),
            name: "New category".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "category.id")?;
        validate_non_empty(&self.name, "category.name")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CardManagementAction {
    AddCards,
    RemoveCards,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CardManagementRule {
    pub name: String,
    pub query: String,
    #[serde(rename = "deckID", default = "default_deck_id")]
    pub deck_id: String,
    pub action: CardManagementAction,
}

impl CardManagementRule {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "card_management_rule.name")?;
        validate_non_empty(&self.query, "card_management_rule.query")?;
        validate_non_empty(&self.deck_id, "card_management_rule.deck_id")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    pub postpone_enabled: bool,
    pub postpone_days: i64,
    pub priority_scan_enabled: bool,
    pub priority_scan_interval: u64,
    pub cache_update_interval: u64,
    #[serde(rename = "dataBaseCardsManagementEnabled")]
    pub card_management_enabled: bool,
    #[serde(rename = "dataBaseCardsManagementInterval")]
    pub card_management_interval: u64,
    pub card_management_rules: Vec<CardManagementRule>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            postpone_enabled: false,
            postpone_days: 2,
            priority_scan_enabled: false,
            priority_scan_interval: 15,
            cache_update_interval: 30,
            card_management_enabled: false,
            card_management_interval: 15,
            card_management_rules: Vec::new(),
        }
    }
}

impl GlobalSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.priority_scan_enabled && self.priority_scan_interval == 0 {
            return Err("settings.priority_scan_interval must be > 0".to_string());
        }
        if self.cache_update_interval == 0 {
            return Err("settings.cache_update_interval must be > 0".to_string());
        }
        if self.card_management_enabled && self.card_management_interval == 0 {
            return Err("settings.card_management_interval must be > 0".to_string());
        }
        for rule in &self.card_management_rules {
            rule.validate()?;
        }
        Ok(())
    }
}

/// Persisted configuration blob: ordered groups, categories and the flattened
/// global settings record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub group_categories: Vec<Category>,
    #[serde(flatten)]
    pub settings: GlobalSettings,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            groups: vec![
                Group {
                    id: "1".to_string(),
                    name: "Tagged blocks".to_string(),
                    query: "select * from blocks where tag like '%#review#%'".to_string(),
                    enabled: true,
                    priority: 50,
                    priority_participating: true,
                    category_id: DEFAULT_CATEGORY_ID.to_string(),
                    prefer_fresh_query: false,
                },
                Group {
                    id: "2".to_string(),
                    name: "All flashcards".to_string(),
                    query: "SELECT * FROM blocks WHERE id in (SELECT block_id FROM attributes WHERE name = 'custom-riff-decks')".to_string(),
                    enabled: true,
                    priority: 5,
                    priority_participating: false,
                    category_id: DEFAULT_CATEGORY_ID.to_string(),
                    prefer_fresh_query: false,
                },
            ],
            group_categories: vec![Category {
                id: DEFAULT_CATEGORY_ID.to_string(),
                name: "Default".to_string(),
            }],
            settings: GlobalSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub block_ids: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// A spaced-repetition card as reported by the flashcard add-on or the host
/// riff endpoints. The first eight characters of `id` are the creation date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiffCard {
    #[serde(alias = "cardID", alias = "riffCardID")]
    pub id: String,
    #[serde(rename = "blockID", alias = "blockId", default)]
    pub block_id: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub state: i64,
    #[serde(default)]
    pub ial: BTreeMap<String, serde_json::Value>,
}

impl RiffCard {
    /// Explicit priority, falling back to the priority block attribute.
    pub fn current_priority(&self) -> Option<i64> {
        self.priority.or_else(|| {
            self.ial
                .get(CARD_PRIORITY_ATTRIBUTE)
                .and_then(|value| match value {
                    serde_json::Value::Number(number) => number.as_i64(),
                    serde_json::Value::String(text) => text.trim().parse().ok(),
                    _ => None,
                })
        })
    }

    pub fn is_suspended(&self) -> bool {
        let bookmarked = self
            .ial
            .get("bookmark")
            .and_then(serde_json::Value::as_str)
            .map(|bookmark| bookmark == SUSPENDED_BOOKMARK)
            .unwrap_or(false);
        bookmarked || self.ial.contains_key(PRIORITY_STOP_ATTRIBUTE)
    }
}

fn default_true() -> bool {
    true
}

fn default_group_priority() -> i64 {
    50
}

fn default_deck_id() -> String {
    DEFAULT_DECK_ID.to_string()
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_group() -> Group {
        Group {
            id: "grp-1".to_string(),
            name: "Tagged".to_string(),
            query: "SELECT * FROM blocks WHERE tag LIKE '%#x#%'".to_string(),
            enabled: true,
            priority: 40,
            priority_participating: true,
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            prefer_fresh_query: false,
        }
    }

    #[test]
    fn group_validation_rejects_blank_query() {
        let mut group = sample_group();
        group.query = "   ".to_string();
        assert_eq!(
            group.validate(),
            Err("group.sql_query must not be empty".to_string())
        );
    }

    #[test]
    fn group_validation_rejects_out_of_range_priority() {
        let mut group = sample_group();
        group.priority = 101;
        assert!(group.validate().is_err());
        group.priority = 0;
        assert!(group.validate().is_ok());
    }

    #[test]
    fn stored_group_missing_new_fields_gets_defaults() {
        let group: Group = serde_json::from_value(serde_json::json!({
            "id": "legacy",
            "name": "Legacy",
            "sqlQuery": "select * from blocks"
        }))
        .expect("legacy group parses");

        assert!(group.enabled);
        assert!(group.priority_participating);
        assert_eq!(group.priority, 50);
        assert_eq!(group.category_id, "");
        assert!(!group.prefer_fresh_query);
    }

    #[test]
    fn plugin_config_flattens_settings_into_one_record() {
        let value = serde_json::to_value(PluginConfig::default()).expect("serialize");
        assert_eq!(value["postponeDays"], serde_json::json!(2));
        assert_eq!(value["cacheUpdateInterval"], serde_json::json!(30));
        assert_eq!(value["groups"][0]["sqlQuery"].as_str().map(str::is_empty), Some(false));
        assert!(value.get("settings").is_none());
    }

    #[test]
    fn settings_validation_requires_positive_enabled_intervals() {
        let mut settings = GlobalSettings::default();
        assert!(settings.validate().is_ok());

        settings.priority_scan_interval = 0;
        assert!(settings.validate().is_ok());
        settings.priority_scan_enabled = true;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn cache_entry_timestamp_is_stored_as_epoch_millis() {
        let entry = CacheEntry {
            block_ids: vec!["a".to_string()],
            timestamp: DateTime::from_timestamp_millis(1_704_067_200_000).expect("valid millis"),
        };
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["timestamp"], serde_json::json!(1_704_067_200_000_i64));
        assert_eq!(value["blockIds"], serde_json::json!(["a"]));
    }

    #[test]
    fn riff_card_reads_priority_from_attribute_when_missing() {
        let card: RiffCard = serde_json::from_value(serde_json::json!({
            "cardID": "20240101120000-abc",
            "blockID": "blk",
            "ial": { "custom-card-priority": "35" }
        }))
        .expect("card parses");

        assert_eq!(card.id, "20240101120000-abc");
        assert_eq!(card.current_priority(), Some(35));
        assert!(!card.is_suspended());
    }

    #[test]
    fn riff_card_suspension_markers() {
        let bookmarked: RiffCard = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "blockID": "b1",
            "ial": { "bookmark": SUSPENDED_BOOKMARK }
        }))
        .expect("card parses");
        let stopped: RiffCard = serde_json::from_value(serde_json::json!({
            "id": "c2",
            "blockID": "b2",
            "ial": { "custom-card-priority-stop": "" }
        }))
        .expect("card parses");

        assert!(bookmarked.is_suspended());
        assert!(stopped.is_suspended());
    }

    proptest! {
        #[test]
        fn generated_ids_are_short_base36_tokens(_seed in 0u8..32) {
            let id = generate_id();
            prop_assert_eq!(id.len(), GENERATED_ID_LENGTH);
            prop_assert!(id.bytes().all(|byte| ID_ALPHABET.contains(&byte)));
        }
    }
}
