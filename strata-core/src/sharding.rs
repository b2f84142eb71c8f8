//! Time-sharding patterns and shardable table descriptors.
//!
//! A sharded table is a family of physical tables sharing one shape, named
//! `{org_name}_{suffix}` where the suffix is the instant formatted with the
//! table's pattern. An empty pattern means the table is not sharded and the
//! physical name is the org name itself.
//!
//! ```text
//! events + Daily + 2024-03-05T10:00:00Z  ──→  events_20240305
//! events + None  + <any instant>         ──→  events
//! ```

use crate::{StrataError, StrataResult, Timestamp};
use chrono::{Days, Months, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SHARDING PATTERN
// ============================================================================

/// Rollover period of a time-sharded table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ShardingPattern {
    /// Single unsharded table
    #[default]
    None,
    /// One table per hour, suffix `YYYYMMDDHH`
    Hourly,
    /// One table per day, suffix `YYYYMMDD`
    Daily,
    /// One table per calendar month, suffix `YYYYMM`
    Monthly,
    /// One table per calendar year, suffix `YYYY`
    Yearly,
}

impl ShardingPattern {
    /// All patterns, unsharded first.
    pub const ALL: [ShardingPattern; 5] = [
        ShardingPattern::None,
        ShardingPattern::Hourly,
        ShardingPattern::Daily,
        ShardingPattern::Monthly,
        ShardingPattern::Yearly,
    ];

    /// The time-format token for this pattern (empty for `None`).
    pub fn as_token(&self) -> &'static str {
        match self {
            ShardingPattern::None => "",
            ShardingPattern::Hourly => "%Y%m%d%H",
            ShardingPattern::Daily => "%Y%m%d",
            ShardingPattern::Monthly => "%Y%m",
            ShardingPattern::Yearly => "%Y",
        }
    }

    /// Parse a pattern token.
    ///
    /// Accepts the format tokens returned by [`as_token`](Self::as_token) and
    /// the names `hourly`, `daily`, `monthly` and `yearly`. The empty string
    /// is the unsharded pattern; anything else is rejected.
    pub fn from_token(token: &str) -> StrataResult<Self> {
        match token.trim() {
            "" => Ok(ShardingPattern::None),
            "%Y%m%d%H" => Ok(ShardingPattern::Hourly),
            "%Y%m%d" => Ok(ShardingPattern::Daily),
            "%Y%m" => Ok(ShardingPattern::Monthly),
            "%Y" => Ok(ShardingPattern::Yearly),
            other => match other.to_lowercase().as_str() {
                "hourly" => Ok(ShardingPattern::Hourly),
                "daily" => Ok(ShardingPattern::Daily),
                "monthly" => Ok(ShardingPattern::Monthly),
                "yearly" => Ok(ShardingPattern::Yearly),
                _ => Err(StrataError::UnsupportedShardingPattern {
                    pattern: token.to_string(),
                }),
            },
        }
    }

    /// Whether this pattern produces more than one physical table.
    pub fn is_sharded(&self) -> bool {
        !matches!(self, ShardingPattern::None)
    }

    /// Table-name suffix for `at`, or `None` for the unsharded pattern.
    pub fn suffix(&self, at: Timestamp) -> Option<String> {
        if self.is_sharded() {
            Some(at.format(self.as_token()).to_string())
        } else {
            None
        }
    }

    /// The same instant one period later.
    ///
    /// Months and years are calendar arithmetic; a day-of-month that does not
    /// exist in the target month is clamped to its last day. Returns `None`
    /// for the unsharded pattern and on overflow.
    pub fn next_period(&self, at: Timestamp) -> Option<Timestamp> {
        match self {
            ShardingPattern::None => None,
            ShardingPattern::Hourly => at.checked_add_signed(TimeDelta::hours(1)),
            ShardingPattern::Daily => at.checked_add_days(Days::new(1)),
            ShardingPattern::Monthly => at.checked_add_months(Months::new(1)),
            ShardingPattern::Yearly => at.checked_add_months(Months::new(12)),
        }
    }
}

impl fmt::Display for ShardingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl FromStr for ShardingPattern {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s)
    }
}

impl TryFrom<String> for ShardingPattern {
    type Error = StrataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_token(&value)
    }
}

impl From<ShardingPattern> for String {
    fn from(pattern: ShardingPattern) -> Self {
        pattern.as_token().to_string()
    }
}

/// Resolve the physical table name for `org_name` at `at`.
///
/// Pure: same inputs always give the same name.
pub fn resolve_table_name(org_name: &str, pattern: ShardingPattern, at: Timestamp) -> String {
    match pattern.suffix(at) {
        Some(suffix) => format!("{}_{}", org_name, suffix),
        None => org_name.to_string(),
    }
}

// ============================================================================
// TABLE DESCRIPTORS
// ============================================================================

/// Column-definition body used to create one physical shard.
///
/// This is the text between the parentheses of `CREATE TABLE name ( ... )`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableShape(String);

impl TableShape {
    pub fn new(columns: impl Into<String>) -> Self {
        Self(columns.into())
    }

    pub fn columns(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// A table the sharding manager can keep provisioned.
pub trait ShardableTable: Send + Sync {
    /// Base table name, without any period suffix.
    fn org_name(&self) -> &str;

    /// Raw pattern token as configured.
    fn sharding(&self) -> &str;

    /// Shape every physical shard is created with.
    fn shape(&self) -> &TableShape;

    /// Parsed pattern; fails for unsupported tokens.
    fn pattern(&self) -> StrataResult<ShardingPattern> {
        ShardingPattern::from_token(self.sharding())
    }
}

/// Plain descriptor for a shardable table, loadable from config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub org_name: String,
    #[serde(default)]
    pub sharding: String,
    #[serde(default)]
    pub shape: TableShape,
}

impl TableSpec {
    pub fn new(
        org_name: impl Into<String>,
        sharding: impl Into<String>,
        shape: TableShape,
    ) -> Self {
        Self {
            org_name: org_name.into(),
            sharding: sharding.into(),
            shape,
        }
    }

    /// Descriptor with a typed pattern.
    pub fn with_pattern(
        org_name: impl Into<String>,
        pattern: ShardingPattern,
        shape: TableShape,
    ) -> Self {
        Self::new(org_name, pattern.as_token(), shape)
    }
}

impl ShardableTable for TableSpec {
    fn org_name(&self) -> &str {
        &self.org_name
    }

    fn sharding(&self) -> &str {
        &self.sharding
    }

    fn shape(&self) -> &TableShape {
        &self.shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(y: i32, m: u32, d: u32, h: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_token_roundtrip() {
        for pattern in ShardingPattern::ALL {
            let parsed = ShardingPattern::from_token(pattern.as_token()).unwrap();
            assert_eq!(pattern, parsed);
        }
    }

    #[test]
    fn test_named_aliases() {
        assert_eq!(
            ShardingPattern::from_token("Daily").unwrap(),
            ShardingPattern::Daily
        );
        assert_eq!(
            "hourly".parse::<ShardingPattern>().unwrap(),
            ShardingPattern::Hourly
        );
    }

    #[test]
    fn test_unsupported_token() {
        let err = ShardingPattern::from_token("%Y-%W").unwrap_err();
        assert!(matches!(
            err,
            StrataError::UnsupportedShardingPattern { ref pattern } if pattern == "%Y-%W"
        ));
    }

    #[test]
    fn test_resolve_daily() {
        let name = resolve_table_name("events", ShardingPattern::Daily, at(2024, 3, 5, 10));
        assert_eq!(name, "events_20240305");
    }

    #[test]
    fn test_resolve_each_pattern() {
        let t = at(2024, 3, 5, 10);
        assert_eq!(
            resolve_table_name("e", ShardingPattern::Hourly, t),
            "e_2024030510"
        );
        assert_eq!(resolve_table_name("e", ShardingPattern::Monthly, t), "e_202403");
        assert_eq!(resolve_table_name("e", ShardingPattern::Yearly, t), "e_2024");
    }

    #[test]
    fn test_resolve_unsharded_ignores_instant() {
        assert_eq!(
            resolve_table_name("events", ShardingPattern::None, at(1999, 12, 31, 23)),
            "events"
        );
        assert_eq!(
            resolve_table_name("events", ShardingPattern::None, at(2024, 3, 5, 10)),
            "events"
        );
    }

    #[test]
    fn test_next_period() {
        let t = at(2024, 12, 31, 23);
        assert_eq!(ShardingPattern::Hourly.next_period(t), Some(at(2025, 1, 1, 0)));
        assert_eq!(ShardingPattern::Daily.next_period(t), Some(at(2025, 1, 1, 23)));
        assert_eq!(ShardingPattern::Monthly.next_period(t), Some(at(2025, 1, 31, 23)));
        assert_eq!(ShardingPattern::Yearly.next_period(t), Some(at(2025, 12, 31, 23)));
        assert_eq!(ShardingPattern::None.next_period(t), None);
    }

    #[test]
    fn test_next_month_clamps_to_month_end() {
        let next = ShardingPattern::Monthly.next_period(at(2024, 1, 31, 8)).unwrap();
        assert_eq!(next, at(2024, 2, 29, 8));
        assert_eq!(
            resolve_table_name("e", ShardingPattern::Monthly, next),
            "e_202402"
        );
    }

    #[test]
    fn test_table_spec_from_toml_like_json() {
        let spec: TableSpec = serde_json::from_str(
            r#"{"org_name":"events","sharding":"daily","shape":"id BIGINT"}"#,
        )
        .unwrap();
        assert_eq!(spec.pattern().unwrap(), ShardingPattern::Daily);
        assert_eq!(spec.shape().columns(), "id BIGINT");
    }

    #[test]
    fn test_pattern_serde_rejects_unknown() {
        let result: Result<ShardingPattern, _> = serde_json::from_str(r#""weekly""#);
        assert!(result.is_err());
    }
}
