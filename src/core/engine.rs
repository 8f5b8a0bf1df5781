use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::core::rule::{Offender, RateRule};
use crate::error::BlockdResult;
use crate::search::{build_query, parse_buckets, SearchBackend};

/// Only look backwards up to three days of date partitions. No sense in
/// involving every index in the search.
const MAX_INDEX_DAYS: i64 = 3;

/// Turns a persisted rate rule into an aggregation query and evaluates the
/// returned candidates against the rule's limit.
pub struct RuleEngine {
    backend: Arc<dyn SearchBackend>,
    index_pattern: String,
    top_hits: usize,
}

impl RuleEngine {
    pub fn new(backend: Arc<dyn SearchBackend>, index_pattern: String, top_hits: usize) -> Self {
        Self {
            backend,
            index_pattern,
            top_hits,
        }
    }

    /// Evaluate one rule: every candidate whose metric meets or exceeds the
    /// limit is an offender.
    ///
    /// A transient backend failure degrades to "no offenders this pass" and
    /// is retried on the next scheduler wake-up; it never propagates.
    pub async fn evaluate(&self, rule: &RateRule) -> Vec<Offender> {
        let candidates = match self.find_top_clients(rule).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(rule = rule.id, error = %e, "offender search failed, retrying next pass");
                return Vec::new();
            }
        };

        candidates
            .into_iter()
            .filter(|(_, value)| *value >= rule.limit)
            .map(|(ip, value)| Offender { ip, value })
            .collect()
    }

    /// Find the top clients for a rule's window, ranked by its metric.
    /// Returns `(address, value)` pairs straight from the aggregation.
    pub async fn find_top_clients(&self, rule: &RateRule) -> BlockdResult<Vec<(String, u64)>> {
        let indices = self.recent_indices().await?;
        if indices.is_empty() {
            debug!(pattern = %self.index_pattern, "no recent date partitions found");
            return Ok(Vec::new());
        }

        let body = build_query(rule, self.top_hits);
        let response = self.backend.search(&indices.join(","), &body).await?;
        if response.get("aggregations").is_none() {
            warn!(
                rule = rule.id,
                indices = %indices.join(","),
                "no aggregated data in backend response"
            );
            return Ok(Vec::new());
        }
        Ok(parse_buckets(&response))
    }

    /// Names of the date partitions for the most recent days, keeping only
    /// those the backend actually has.
    async fn recent_indices(&self) -> BlockdResult<Vec<String>> {
        let mut names = Vec::new();
        let mut day = Utc::now();
        for _ in 0..MAX_INDEX_DAYS {
            let name = day.format(&self.index_pattern).to_string();
            if self.backend.index_exists(&name).await? {
                names.push(name);
            }
            day = day - Duration::days(1);
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rule::AggType;
    use crate::error::BlockdError;
    use crate::search::MockSearchBackend;
    use serde_json::json;

    fn rule(limit: u64) -> RateRule {
        RateRule {
            id: 7,
            description: "request flood".into(),
            aggtype: AggType::Requests,
            limit,
            duration: "12h".into(),
            filters: Vec::new(),
        }
    }

    fn engine(backend: MockSearchBackend) -> RuleEngine {
        RuleEngine::new(Arc::new(backend), "loggy-%Y-%m-%d".into(), 100)
    }

    fn response(buckets: serde_json::Value) -> serde_json::Value {
        json!({ "aggregations": { "requests_per_ip": { "buckets": buckets } } })
    }

    #[tokio::test]
    async fn offenders_meet_or_exceed_the_limit() {
        let mut backend = MockSearchBackend::new();
        backend.expect_index_exists().returning(|_| Ok(true));
        backend.expect_search().returning(|_, _| {
            Ok(response(json!([
                { "key": "1.2.3.4", "doc_count": 150 },
                { "key": "5.6.7.8", "doc_count": 100 },
                { "key": "9.9.9.9", "doc_count": 99 }
            ])))
        });

        let offenders = engine(backend).evaluate(&rule(100)).await;
        assert_eq!(offenders.len(), 2);
        assert_eq!(offenders[0], Offender { ip: "1.2.3.4".into(), value: 150 });
        assert_eq!(offenders[1], Offender { ip: "5.6.7.8".into(), value: 100 });
    }

    #[tokio::test]
    async fn transient_backend_failure_degrades_to_no_offenders() {
        let mut backend = MockSearchBackend::new();
        backend.expect_index_exists().returning(|_| Ok(true));
        backend
            .expect_search()
            .returning(|_, _| Err(BlockdError::SearchUnavailable("connect refused".into())));

        assert!(engine(backend).evaluate(&rule(1)).await.is_empty());
    }

    #[tokio::test]
    async fn error_document_without_aggregations_yields_no_candidates() {
        let mut backend = MockSearchBackend::new();
        backend.expect_index_exists().returning(|_| Ok(true));
        // A rejected query comes back as an error document, not aggregations.
        backend.expect_search().returning(|_, _| {
            Ok(json!({ "error": { "type": "parsing_exception" }, "status": 400 }))
        });

        let candidates = engine(backend).find_top_clients(&rule(1)).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn absent_partitions_are_skipped() {
        let mut backend = MockSearchBackend::new();
        // Three distinct day names checked, none present: no query is sent.
        backend.expect_index_exists().times(3).returning(|_| Ok(false));
        backend.expect_search().never();

        let candidates = engine(backend).find_top_clients(&rule(1)).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn surviving_partitions_are_queried_together() {
        let mut backend = MockSearchBackend::new();
        let mut day = 0;
        backend.expect_index_exists().times(3).returning(move |_| {
            day += 1;
            Ok(day != 2) // middle day missing
        });
        backend
            .expect_search()
            .withf(|indices, _| indices.matches(',').count() == 1)
            .returning(|_, _| Ok(response(json!([]))));

        let candidates = engine(backend).find_top_clients(&rule(1)).await.unwrap();
        assert!(candidates.is_empty());
    }
}
