use serde_json::{json, Value};

use crate::core::rule::{AggType, FilterOp, RateRule};

/// Field holding the client address in the indexed documents.
pub const CLIENT_IP_FIELD: &str = "client_ip";
/// Timestamp field used for the evaluation window.
pub const TIMESTAMP_FIELD: &str = "@timestamp";
/// Field summed for byte-volume aggregations.
pub const BYTES_FIELD: &str = "bytes";
/// Name of the per-address terms aggregation in requests and responses.
pub const AGG_NAME: &str = "requests_per_ip";

/// Build the aggregation query body for one rule.
///
/// The window is `now - duration`; each filter clause becomes a must or
/// must_not bool clause; the terms aggregation groups by client address and
/// ranks either by raw hit count or by a summed byte volume.
pub fn build_query(rule: &RateRule, top_hits: usize) -> Value {
    let mut must: Vec<Value> = Vec::new();
    let mut must_not: Vec<Value> = Vec::new();

    for clause in &rule.filters {
        let inner = json!({ clause.field.clone(): clause.value.clone() });
        let term = match clause.op {
            FilterOp::Fuzzy => json!({ "match": inner }),
            FilterOp::Pattern => json!({ "regexp": inner }),
            FilterOp::Exact => json!({ "term": inner }),
        };
        if clause.negate {
            must_not.push(term);
        } else {
            must.push(term);
        }
    }

    let keyword_field = format!("{CLIENT_IP_FIELD}.keyword");
    let aggs = match rule.aggtype {
        AggType::Requests => json!({
            AGG_NAME: {
                "terms": { "field": keyword_field, "size": top_hits }
            }
        }),
        AggType::Bytes => json!({
            AGG_NAME: {
                "terms": {
                    "field": keyword_field,
                    "size": top_hits,
                    "order": { "bytes_sum": "desc" }
                },
                "aggs": {
                    "bytes_sum": { "sum": { "field": BYTES_FIELD } }
                }
            }
        }),
    };

    json!({
        "size": 0,
        "query": {
            "bool": {
                "filter": [
                    { "range": { TIMESTAMP_FIELD: { "gte": format!("now-{}", rule.duration) } } }
                ],
                "must": must,
                "must_not": must_not
            }
        },
        "aggs": aggs
    })
}

/// Extract `(address, count-or-sum)` pairs from a backend response.
///
/// Byte aggregations carry the value in the `bytes_sum` sub-aggregation;
/// request aggregations use the bucket document count. A response without
/// the expected aggregation yields no pairs.
pub fn parse_buckets(response: &Value) -> Vec<(String, u64)> {
    let buckets = match response
        .pointer(&format!("/aggregations/{AGG_NAME}/buckets"))
        .and_then(Value::as_array)
    {
        Some(b) => b,
        None => return Vec::new(),
    };

    let mut pairs = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let key = match bucket.get("key").and_then(Value::as_str) {
            Some(k) => k.to_string(),
            None => continue,
        };
        let value = bucket
            .pointer("/bytes_sum/value")
            .and_then(Value::as_f64)
            .map(|v| v as u64)
            .or_else(|| bucket.get("doc_count").and_then(Value::as_u64));
        if let Some(value) = value {
            pairs.push((key, value));
        }
    }
    pairs
}
