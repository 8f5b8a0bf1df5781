use std::fmt;
use std::str::FromStr;

use crate::db::StoredRule;
use crate::error::{BlockdError, BlockdResult};

/// Metric basis for ranking clients: raw hit count or summed byte volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggType {
    Requests,
    Bytes,
}

impl FromStr for AggType {
    type Err = BlockdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requests" => Ok(AggType::Requests),
            "bytes" => Ok(AggType::Bytes),
            other => Err(BlockdError::Filter(format!(
                "unknown aggregation type: {other} (expected requests or bytes)"
            ))),
        }
    }
}

/// Search filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `=`: fuzzy/analyzed match
    Fuzzy,
    /// `~=`: pattern match
    Pattern,
    /// `==`: exact term match
    Exact,
}

/// One parsed filter clause: `<field> [!]<op> <value>`, one per line.
/// A `!`-prefixed operator excludes instead of requiring a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterClause {
    pub field: String,
    pub op: FilterOp,
    pub negate: bool,
    pub value: String,
}

impl FilterClause {
    /// Parse a single clause line. Unknown operators are rejected here,
    /// before any query is ever sent to the backend.
    pub fn parse(line: &str) -> BlockdResult<Self> {
        let mut parts = line.splitn(3, ' ');
        let (field, op_text, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(f), Some(o), Some(v)) if !f.is_empty() && !v.is_empty() => (f, o, v),
            _ => {
                return Err(BlockdError::Filter(format!(
                    "malformed filter clause (expected '<field> <op> <value>'): {line}"
                )))
            }
        };

        let (negate, op_text) = match op_text.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, op_text),
        };
        let op = match op_text {
            "=" => FilterOp::Fuzzy,
            "~=" => FilterOp::Pattern,
            "==" => FilterOp::Exact,
            other => {
                return Err(BlockdError::Filter(format!(
                    "unknown operator {other} in search filter: {line}"
                )))
            }
        };

        Ok(Self {
            field: field.to_string(),
            op,
            negate,
            value: value.to_string(),
        })
    }
}

impl fmt::Display for FilterClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            FilterOp::Fuzzy => "=",
            FilterOp::Pattern => "~=",
            FilterOp::Exact => "==",
        };
        let bang = if self.negate { "!" } else { "" };
        write!(f, "{} {bang}{op} {}", self.field, self.value)
    }
}

/// A user-defined rate rule, immutable once parsed for an evaluation pass.
#[derive(Debug, Clone)]
pub struct RateRule {
    pub id: i64,
    pub description: String,
    pub aggtype: AggType,
    pub limit: u64,
    /// Relative evaluation window, e.g. `12h`. Validated as `\d+[dhms]`.
    pub duration: String,
    pub filters: Vec<FilterClause>,
}

impl RateRule {
    /// Parse a persisted rule row. Rules are owned by the external
    /// management surface; the core only ever reads them.
    pub fn from_stored(row: &StoredRule) -> BlockdResult<Self> {
        if row.limit <= 0 {
            return Err(BlockdError::Filter(format!(
                "rule #{}: limit must be positive, got {}",
                row.id, row.limit
            )));
        }
        validate_duration(&row.duration)
            .map_err(|e| BlockdError::Filter(format!("rule #{}: {e}", row.id)))?;

        let mut filters = Vec::new();
        for line in row.filters.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            filters.push(FilterClause::parse(line)?);
        }

        Ok(Self {
            id: row.id,
            description: row.description.clone(),
            aggtype: row.aggtype.parse()?,
            limit: row.limit as u64,
            duration: row.duration.clone(),
            filters,
        })
    }
}

/// An address whose aggregated traffic metric was reported by the backend.
/// Transient: lives only within one evaluation pass, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offender {
    pub ip: String,
    pub value: u64,
}

/// Durations are a number followed by a single unit letter: d, h, m or s.
fn validate_duration(duration: &str) -> Result<(), String> {
    let mut chars = duration.chars();
    let valid = match chars.next_back() {
        Some('d' | 'h' | 'm' | 's') => {
            let digits = chars.as_str();
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    };
    if !valid {
        return Err(format!("invalid duration {duration:?} (expected e.g. 12h)"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(aggtype: &str, limit: i64, duration: &str, filters: &str) -> StoredRule {
        StoredRule {
            id: 1,
            description: "too many requests".into(),
            aggtype: aggtype.into(),
            limit,
            duration: duration.into(),
            filters: filters.into(),
        }
    }

    #[test]
    fn parses_filter_clauses() {
        let c = FilterClause::parse("client_ip = 1.2.3.4").unwrap();
        assert_eq!(c.field, "client_ip");
        assert_eq!(c.op, FilterOp::Fuzzy);
        assert!(!c.negate);
        assert_eq!(c.value, "1.2.3.4");

        let c = FilterClause::parse("uri !~= /static/.*").unwrap();
        assert_eq!(c.op, FilterOp::Pattern);
        assert!(c.negate);

        let c = FilterClause::parse("vhost == example.org 443").unwrap();
        assert_eq!(c.op, FilterOp::Exact);
        assert_eq!(c.value, "example.org 443");
    }

    #[test]
    fn rejects_unknown_operator_before_any_query() {
        assert!(matches!(
            FilterClause::parse("client_ip >< 1.2.3.4"),
            Err(BlockdError::Filter(_))
        ));
        assert!(matches!(
            FilterClause::parse("client_ip"),
            Err(BlockdError::Filter(_))
        ));
    }

    #[test]
    fn parses_stored_rule() {
        let rule = RateRule::from_stored(&stored(
            "bytes",
            100,
            "12h",
            "client_ip = 1.2.3.4\n\n!uri = /healthz\n",
        ))
        .unwrap();
        assert_eq!(rule.aggtype, AggType::Bytes);
        assert_eq!(rule.limit, 100);
        assert_eq!(rule.filters.len(), 2);
        assert!(rule.filters[1].negate);
    }

    #[test]
    fn rejects_bad_rule_rows() {
        assert!(RateRule::from_stored(&stored("requests", 0, "12h", "")).is_err());
        assert!(RateRule::from_stored(&stored("packets", 10, "12h", "")).is_err());
        assert!(RateRule::from_stored(&stored("requests", 10, "12", "")).is_err());
        assert!(RateRule::from_stored(&stored("requests", 10, "h", "")).is_err());
        assert!(RateRule::from_stored(&stored("requests", 10, "12x", "")).is_err());
    }

    #[test]
    fn accepts_all_duration_units() {
        for d in ["3d", "12h", "45m", "90s"] {
            assert!(validate_duration(d).is_ok(), "{d} should be valid");
        }
    }
}
