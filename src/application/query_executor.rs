use crate::infrastructure::error::InfraError;
use crate::infrastructure::host_client::{HostApiClient, HostRow};
use regex::Regex;
use std::sync::Arc;
use tokio::time::{Duration, sleep};

const TRAILING_LIMIT_PATTERN: &str = r"(?i)\blimit\s+\d+(?:\s+offset\s+\d+)?\s*$";

#[derive(Debug, Clone)]
pub struct QueryPacing {
    pub page_delay: Duration,
    pub failure_backoff: Duration,
}

impl Default for QueryPacing {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(200),
            failure_backoff: Duration::from_millis(500),
        }
    }
}

/// Rewrites `query` to fetch one page. A `LIMIT` clause ending the statement
/// (with or without `OFFSET`) is replaced instead of compounded; any other
/// `limit` text is left alone and the window is appended.
pub fn paginate_statement(query: &str, page_size: usize, page: usize) -> Result<String, InfraError> {
    let base = query.trim().trim_end_matches(';').trim_end();
    if base.is_empty() {
        return Err(InfraError::InvalidQuery("query must not be empty".to_string()));
    }
    if page_size == 0 {
        return Err(InfraError::InvalidQuery("page size must be > 0".to_string()));
    }
    let offset = page
        .checked_mul(page_size)
        .ok_or_else(|| InfraError::InvalidQuery(format!("page {page} overflows the offset")))?;
    let window = format!("LIMIT {page_size} OFFSET {offset}");

    let limit_clause = Regex::new(TRAILING_LIMIT_PATTERN)
        .map_err(|error| InfraError::InvalidQuery(format!("limit pattern: {error}")))?;
    match limit_clause.find(base) {
        Some(found) => Ok(format!(
            "{}{}{}",
            &base[..found.start()],
            window,
            &base[found.end()..]
        )),
        None => Ok(format!("{base} {window}")),
    }
}

pub struct QueryExecutor<H>
where
    H: HostApiClient,
{
    host: Arc<H>,
    pacing: QueryPacing,
}

impl<H> QueryExecutor<H>
where
    H: HostApiClient,
{
    pub fn new(host: Arc<H>) -> Self {
        Self {
            host,
            pacing: QueryPacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: QueryPacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Runs `query` page by page. Page failures are logged and skipped; only
    /// malformed input is returned as an error.
    pub async fn run_query(
        &self,
        query: &str,
        page_size: usize,
        max_pages: usize,
    ) -> Result<Vec<HostRow>, InfraError> {
        let mut rows = Vec::new();
        let mut page = 0;

        while page < max_pages {
            let statement = paginate_statement(query, page_size, page)?;
            match self.host.query_sql(&statement).await {
                Ok(page_rows) => {
                    let fetched = page_rows.len();
                    rows.extend(page_rows);
                    if fetched < page_size {
                        break;
                    }
                    page += 1;
                    if page < max_pages {
                        sleep(self.pacing.page_delay).await;
                    }
                }
                Err(error) => {
                    tracing::warn!(page, %error, "query page failed; skipping to next page");
                    page += 1;
                    if page < max_pages {
                        sleep(self.pacing.failure_backoff).await;
                    }
                }
            }
        }

        if page >= max_pages && max_pages > 0 {
            tracing::debug!(max_pages, rows = rows.len(), "query stopped at page limit");
        }
        Ok(rows)
    }

    /// Distinct non-empty `id` column values, in first-seen order.
    pub async fn run_id_query(
        &self,
        query: &str,
        page_size: usize,
        max_pages: usize,
    ) -> Result<Vec<String>, InfraError> {
        let rows = self.run_query(query, page_size, max_pages).await?;
        Ok(distinct_ids(&rows, "id"))
    }
}

pub fn distinct_ids(rows: &[HostRow], column: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(column).and_then(serde_json::Value::as_str))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{FakeHost, no_delay_pacing};

    #[test]
    fn appends_window_when_no_limit_present() {
        assert_eq!(
            paginate_statement("SELECT * FROM blocks;", 100, 2).expect("paginate"),
            "SELECT * FROM blocks LIMIT 100 OFFSET 200"
        );
    }

    #[test]
    fn replaces_existing_limit_case_insensitively() {
        assert_eq!(
            paginate_statement("select * from blocks limit 5", 10, 1).expect("paginate"),
            "select * from blocks LIMIT 10 OFFSET 10"
        );
        assert_eq!(
            paginate_statement("SELECT * FROM blocks Limit 5 Offset 20", 10, 0).expect("paginate"),
            "SELECT * FROM blocks LIMIT 10 OFFSET 0"
        );
    }

    #[test]
    fn only_outer_limit_is_replaced() {
        let query = "SELECT * FROM blocks WHERE id IN (SELECT block_id FROM refs LIMIT 3) LIMIT 7";
        assert_eq!(
            paginate_statement(query, 50, 0).expect("paginate"),
            "SELECT * FROM blocks WHERE id IN (SELECT block_id FROM refs LIMIT 3) LIMIT 50 OFFSET 0"
        );
    }

    #[test]
    fn limit_text_inside_a_literal_is_not_touched() {
        let query = "SELECT * FROM blocks WHERE content LIKE '%limit 5%'";
        assert_eq!(
            paginate_statement(query, 100, 1).expect("paginate"),
            "SELECT * FROM blocks WHERE content LIKE '%limit 5%' LIMIT 100 OFFSET 100"
        );
    }

    #[test]
    fn inner_limit_alone_still_gets_an_outer_window() {
        let query = "SELECT * FROM blocks WHERE id IN (SELECT block_id FROM refs LIMIT 3)";
        assert_eq!(
            paginate_statement(query, 50, 2).expect("paginate"),
            "SELECT * FROM blocks WHERE id IN (SELECT block_id FROM refs LIMIT 3) LIMIT 50 OFFSET 100"
        );
    }

    #[tokio::test]
    async fn query_with_inner_limit_pages_through_outer_window() {
        let query = "SELECT * FROM blocks WHERE id IN (SELECT block_id FROM refs LIMIT 3)";
        let host = Arc::new(FakeHost::default());
        host.set_query_rows(query, &["a", "b", "c"]);
        let executor = QueryExecutor::new(host.clone()).with_pacing(no_delay_pacing());

        let rows = executor.run_query(query, 2, 10).await.expect("rows");

        assert_eq!(rows.len(), 3);
        assert_eq!(host.group_query_calls(), 2);
    }

    #[tokio::test]
    async fn failing_query_yields_no_rows_after_max_pages() {
        let host = Arc::new(FakeHost::default());
        host.set_query_rows("SELECT * FROM blocks", &["a"]);
        host.fail_query("SELECT * FROM blocks");
        let executor = QueryExecutor::new(host.clone()).with_pacing(no_delay_pacing());

        let rows = executor.run_query("SELECT * FROM blocks", 10, 3).await.expect("rows");

        assert!(rows.is_empty());
        assert_eq!(host.group_query_calls(), 3);
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(
            paginate_statement("  ; ", 10, 0),
            Err(InfraError::InvalidQuery(_))
        ));
        assert!(matches!(
            paginate_statement("SELECT 1", 0, 0),
            Err(InfraError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn stops_on_short_page() {
        let host = Arc::new(FakeHost::default());
        host.set_query_rows("SELECT * FROM blocks", &["a", "b", "c", "d", "e"]);
        let executor = QueryExecutor::new(host.clone()).with_pacing(no_delay_pacing());

        let rows = executor.run_query("SELECT * FROM blocks", 2, 10).await.expect("rows");

        assert_eq!(rows.len(), 5);
        assert_eq!(host.group_query_calls(), 3);
    }

    #[tokio::test]
    async fn stops_at_max_pages() {
        let host = Arc::new(FakeHost::default());
        host.set_query_rows("SELECT * FROM blocks", &["a", "b", "c", "d", "e"]);
        let executor = QueryExecutor::new(host.clone()).with_pacing(no_delay_pacing());

        let rows = executor.run_query("SELECT * FROM blocks", 2, 2).await.expect("rows");

        assert_eq!(rows.len(), 4);
        assert_eq!(host.group_query_calls(), 2);
    }

    #[tokio::test]
    async fn failed_page_is_skipped_without_losing_rows() {
        let host = Arc::new(FakeHost::default());
        host.set_query_rows("SELECT * FROM blocks", &["a", "b", "c", "d", "e"]);
        host.fail_page("SELECT * FROM blocks", 1);
        let executor = QueryExecutor::new(host.clone()).with_pacing(no_delay_pacing());

        let ids = executor
            .run_id_query("SELECT * FROM blocks", 2, 10)
            .await
            .expect("ids");

        assert_eq!(ids, vec!["a", "b", "e"]);
    }

    #[tokio::test]
    async fn blank_query_propagates_error() {
        let host = Arc::new(FakeHost::default());
        let executor = QueryExecutor::new(host.clone()).with_pacing(no_delay_pacing());

        assert!(executor.run_query("   ", 10, 10).await.is_err());
        assert_eq!(host.group_query_calls(), 0);
    }

    #[test]
    fn distinct_ids_skip_blank_and_repeated_values() {
        let rows = [
            serde_json::json!({"id": "a"}),
            serde_json::json!({"id": " "}),
            serde_json::json!({"id": "a"}),
            serde_json::json!({"other": "x"}),
            serde_json::json!({"id": "b"}),
        ]
        .into_iter()
        .filter_map(|value| value.as_object().cloned())
        .collect::<Vec<_>>();

        assert_eq!(distinct_ids(&rows, "id"), vec!["a", "b"]);
    }
}
