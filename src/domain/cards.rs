use crate::domain::models::RiffCard;
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_now() -> NowProvider {
    Arc::new(Utc::now)
}

/// Calendar date of `now` as `YYYYMMDD`, in `timezone` or the client-local zone.
pub fn today_stamp(now: DateTime<Utc>, timezone: Option<Tz>) -> String {
    match timezone {
        Some(timezone) => now.with_timezone(&timezone).format("%Y%m%d").to_string(),
        None => now.with_timezone(&Local).format("%Y%m%d").to_string(),
    }
}

pub fn is_today_card(card: &RiffCard, today: &str) -> bool {
    card.id.len() >= 8 && card.id.starts_with(today)
}

pub fn filter_today(cards: Vec<RiffCard>, today: &str) -> Vec<RiffCard> {
    cards
        .into_iter()
        .filter(|card| is_today_card(card, today))
        .collect()
}

pub fn is_postponable(card: &RiffCard) -> bool {
    !card.is_suspended()
}

pub fn cards_needing_priority(cards: Vec<RiffCard>, priority: i64) -> Vec<RiffCard> {
    cards
        .into_iter()
        .filter(|card| card.current_priority() != Some(priority))
        .collect()
}
