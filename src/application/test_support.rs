use crate::application::query_executor::QueryPacing;
use crate::domain::models::{Group, RiffCard};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::flashcard_addon::{AddonOperation, FlashcardAddon, group_cards_by_block};
use crate::infrastructure::host_client::{HostApiClient, HostRow};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::time::Duration;

pub fn no_delay_pacing() -> QueryPacing {
    QueryPacing {
        page_delay: Duration::ZERO,
        failure_backoff: Duration::ZERO,
    }
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

pub fn card(id: &str, block_id: &str, priority: Option<i64>) -> RiffCard {
    RiffCard {
        id: id.to_string(),
        block_id: block_id.to_string(),
        priority,
        state: 0,
        ial: BTreeMap::new(),
    }
}

pub fn group(id: &str, query: &str, priority: i64) -> Group {
    Group {
        id: id.to_string(),
        name: format!("Group {id}"),
        query: query.to_string(),
        enabled: true,
        priority,
        priority_participating: true,
        category_id: "default".to_string(),
        prefer_fresh_query: false,
    }
}

fn row(column: &str, value: &str) -> HostRow {
    let mut row = HostRow::new();
    row.insert(column.to_string(), serde_json::Value::String(value.to_string()));
    row
}

fn quoted_values(text: &str) -> Vec<String> {
    text.split(',')
        .map(|value| value.trim().trim_matches('\'').to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

/// In-memory document graph answering the statements the services issue.
#[derive(Default)]
pub struct FakeHost {
    parents: Mutex<HashMap<String, String>>,
    markers: Mutex<HashSet<String>>,
    failing_marker_ids: Mutex<HashSet<String>>,
    queries: Mutex<HashMap<String, Vec<HostRow>>>,
    failing_queries: Mutex<HashSet<String>>,
    failing_pages: Mutex<HashSet<(String, usize)>>,
    cards: Mutex<HashMap<String, Vec<RiffCard>>>,
    fail_card_lookup: AtomicBool,
    group_query_calls: AtomicUsize,
    marker_calls: AtomicUsize,
    parent_calls: AtomicUsize,
    card_lookup_calls: AtomicUsize,
    added: Mutex<Vec<(String, Vec<String>)>>,
    removed: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeHost {
    pub fn set_parent(&self, child: &str, parent: &str) {
        self.parents
            .lock()
            .expect("parents lock")
            .insert(child.to_string(), parent.to_string());
    }

    pub fn mark(&self, block_id: &str) {
        self.markers
            .lock()
            .expect("markers lock")
            .insert(block_id.to_string());
    }

    pub fn fail_marker_check(&self, block_id: &str) {
        self.failing_marker_ids
            .lock()
            .expect("failing markers lock")
            .insert(block_id.to_string());
    }

    pub fn set_query_rows(&self, query: &str, ids: &[&str]) {
        self.set_query_json_rows(query, ids.iter().map(|id| row("id", id)).collect());
    }

    pub fn set_query_json_rows(&self, query: &str, rows: Vec<HostRow>) {
        self.queries
            .lock()
            .expect("queries lock")
            .insert(query.to_string(), rows);
    }

    pub fn fail_query(&self, query: &str) {
        self.failing_queries
            .lock()
            .expect("failing queries lock")
            .insert(query.to_string());
    }

    pub fn fail_page(&self, query: &str, page: usize) {
        self.failing_pages
            .lock()
            .expect("failing pages lock")
            .insert((query.to_string(), page));
    }

    pub fn set_cards(&self, block_id: &str, cards: Vec<RiffCard>) {
        self.cards
            .lock()
            .expect("cards lock")
            .insert(block_id.to_string(), cards);
    }

    pub fn fail_card_lookup(&self) {
        self.fail_card_lookup.store(true, Ordering::SeqCst);
    }

    pub fn group_query_calls(&self) -> usize {
        self.group_query_calls.load(Ordering::SeqCst)
    }

    pub fn marker_calls(&self) -> usize {
        self.marker_calls.load(Ordering::SeqCst)
    }

    pub fn parent_calls(&self) -> usize {
        self.parent_calls.load(Ordering::SeqCst)
    }

    pub fn card_lookup_calls(&self) -> usize {
        self.card_lookup_calls.load(Ordering::SeqCst)
    }

    pub fn added(&self) -> Vec<(String, Vec<String>)> {
        self.added.lock().expect("added lock").clone()
    }

    pub fn removed(&self) -> Vec<(String, Vec<String>)> {
        self.removed.lock().expect("removed lock").clone()
    }

    fn answer_marker(&self, statement: &str) -> Result<Vec<HostRow>, InfraError> {
        self.marker_calls.fetch_add(1, Ordering::SeqCst);
        let id = statement.split('\'').nth(1).unwrap_or_default().to_string();
        if self
            .failing_marker_ids
            .lock()
            .expect("failing markers lock")
            .contains(&id)
        {
            return Err(InfraError::HostApi(format!("attribute check failed for {id}")));
        }
        let marked = self.markers.lock().expect("markers lock").contains(&id);
        Ok(if marked { vec![row("1", "1")] } else { Vec::new() })
    }

    fn answer_parents(&self, statement: &str) -> Result<Vec<HostRow>, InfraError> {
        self.parent_calls.fetch_add(1, Ordering::SeqCst);
        let start = statement.find("IN (").map(|index| index + 4).unwrap_or(0);
        let end = statement[start..]
            .find(')')
            .map(|index| start + index)
            .unwrap_or(statement.len());
        let parents = self.parents.lock().expect("parents lock");
        Ok(quoted_values(&statement[start..end])
            .iter()
            .filter_map(|id| parents.get(id))
            .map(|parent| row("parent_id", parent))
            .collect())
    }

    fn answer_group_query(&self, statement: &str) -> Result<Vec<HostRow>, InfraError> {
        self.group_query_calls.fetch_add(1, Ordering::SeqCst);
        let window = Regex::new(r"^(.*) LIMIT (\d+) OFFSET (\d+)$").expect("window regex");
        let (base, limit, offset) = match window.captures(statement) {
            Some(captures) => (
                captures[1].to_string(),
                captures[2].parse::<usize>().expect("limit"),
                captures[3].parse::<usize>().expect("offset"),
            ),
            None => (statement.to_string(), usize::MAX, 0),
        };

        if self
            .failing_queries
            .lock()
            .expect("failing queries lock")
            .contains(&base)
        {
            return Err(InfraError::HostApi(format!("query failed: {base}")));
        }
        let page = if limit == 0 || limit == usize::MAX { 0 } else { offset / limit };
        if self
            .failing_pages
            .lock()
            .expect("failing pages lock")
            .contains(&(base.clone(), page))
        {
            return Err(InfraError::HostApi(format!("page {page} failed: {base}")));
        }

        let queries = self.queries.lock().expect("queries lock");
        Ok(queries
            .get(&base)
            .map(|rows| rows.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl HostApiClient for FakeHost {
    async fn query_sql(&self, statement: &str) -> Result<Vec<HostRow>, InfraError> {
        if statement.starts_with("SELECT 1 FROM attributes") {
            self.answer_marker(statement)
        } else if statement.starts_with("SELECT parent_id FROM blocks") {
            self.answer_parents(statement)
        } else {
            self.answer_group_query(statement)
        }
    }

    async fn riff_cards_by_block_ids(&self, block_ids: &[String]) -> Result<Vec<RiffCard>, InfraError> {
        self.card_lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_card_lookup.load(Ordering::SeqCst) {
            return Err(InfraError::HostApi("card lookup failed".to_string()));
        }
        let cards = self.cards.lock().expect("cards lock");
        Ok(block_ids
            .iter()
            .filter_map(|id| cards.get(id))
            .flatten()
            .cloned()
            .collect())
    }

    async fn add_riff_cards(&self, deck_id: &str, block_ids: &[String]) -> Result<(), InfraError> {
        self.added
            .lock()
            .expect("added lock")
            .push((deck_id.to_string(), block_ids.to_vec()));
        Ok(())
    }

    async fn remove_riff_cards(&self, deck_id: &str, block_ids: &[String]) -> Result<(), InfraError> {
        self.removed
            .lock()
            .expect("removed lock")
            .push((deck_id.to_string(), block_ids.to_vec()));
        Ok(())
    }
}

/// Scriptable add-on: which operations exist, what they return, what was called.
pub struct FakeAddon {
    supported: HashSet<AddonOperation>,
    cards: Mutex<HashMap<String, Vec<RiffCard>>>,
    all_cards: Mutex<Vec<RiffCard>>,
    failing_card_ids: Mutex<HashSet<String>>,
    fail_lookup: AtomicBool,
    fail_all_cards: AtomicBool,
    lookup_calls: AtomicUsize,
    priority_calls: Mutex<Vec<(Vec<String>, i64)>>,
    postpone_calls: Mutex<Vec<(Vec<String>, u32)>>,
}

impl FakeAddon {
    pub fn full() -> Self {
        Self::supporting(&[
            AddonOperation::CardsByBlockIds,
            AddonOperation::BulkSetPriority,
            AddonOperation::BulkPostpone,
            AddonOperation::AllCardsFlat,
        ])
    }

    pub fn supporting(operations: &[AddonOperation]) -> Self {
        Self {
            supported: operations.iter().copied().collect(),
            cards: Mutex::new(HashMap::new()),
            all_cards: Mutex::new(Vec::new()),
            failing_card_ids: Mutex::new(HashSet::new()),
            fail_lookup: AtomicBool::new(false),
            fail_all_cards: AtomicBool::new(false),
            lookup_calls: AtomicUsize::new(0),
            priority_calls: Mutex::new(Vec::new()),
            postpone_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_cards(&self, cards: Vec<RiffCard>) {
        *self.cards.lock().expect("cards lock") = group_cards_by_block(cards);
    }

    pub fn set_all_cards(&self, cards: Vec<RiffCard>) {
        *self.all_cards.lock().expect("all cards lock") = cards;
    }

    pub fn fail_priority_for(&self, card_id: &str) {
        self.failing_card_ids
            .lock()
            .expect("failing cards lock")
            .insert(card_id.to_string());
    }

    pub fn fail_lookup(&self) {
        self.fail_lookup.store(true, Ordering::SeqCst);
    }

    pub fn fail_all_cards(&self) {
        self.fail_all_cards.store(true, Ordering::SeqCst);
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn priority_calls(&self) -> Vec<(Vec<String>, i64)> {
        self.priority_calls.lock().expect("priority calls lock").clone()
    }

    pub fn postpone_calls(&self) -> Vec<(Vec<String>, u32)> {
        self.postpone_calls.lock().expect("postpone calls lock").clone()
    }
}

#[async_trait]
impl FlashcardAddon for FakeAddon {
    fn supports(&self, operation: AddonOperation) -> bool {
        self.supported.contains(&operation)
    }

    async fn cards_by_block_ids(
        &self,
        block_ids: &[String],
    ) -> Result<HashMap<String, Vec<RiffCard>>, InfraError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(InfraError::HostApi("addon lookup failed".to_string()));
        }
        let cards = self.cards.lock().expect("cards lock");
        Ok(block_ids
            .iter()
            .filter_map(|id| cards.get(id).map(|found| (id.clone(), found.clone())))
            .collect())
    }

    async fn bulk_set_priority(&self, cards: &[RiffCard], priority: i64) -> Result<(), InfraError> {
        let card_ids = cards.iter().map(|card| card.id.clone()).collect::<Vec<_>>();
        let failing = self.failing_card_ids.lock().expect("failing cards lock");
        if card_ids.iter().any(|id| failing.contains(id)) {
            return Err(InfraError::HostApi("bulk priority failed".to_string()));
        }
        self.priority_calls
            .lock()
            .expect("priority calls lock")
            .push((card_ids, priority));
        Ok(())
    }

    async fn bulk_postpone(&self, cards: &[RiffCard], days: u32) -> Result<(), InfraError> {
        self.postpone_calls
            .lock()
            .expect("postpone calls lock")
            .push((cards.iter().map(|card| card.id.clone()).collect(), days));
        Ok(())
    }

    async fn all_cards_flat(&self) -> Result<Vec<RiffCard>, InfraError> {
        if self.fail_all_cards.load(Ordering::SeqCst) {
            return Err(InfraError::HostApi("all cards listing failed".to_string()));
        }
        Ok(self.all_cards.lock().expect("all cards lock").clone())
    }
}
