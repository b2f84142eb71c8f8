//! Deterministic cache keys.
//!
//! Every entry lives at `namespace:kind:table:hash`, where `hash` is the
//! CRC-32 of the identifier. All keys of one (kind, table) pair share the
//! scan pattern `namespace:kind:table:*`.

use std::fmt;
use strata_core::{CacheError, StrataResult};

/// Characters that would let one table's keys match another table's pattern.
const RESERVED: &[char] = &[':', '*', '?', '[', ']', '\\'];

/// What a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// A single row looked up by primary key.
    Bean,
    /// The id list returned by a query.
    Sql,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Bean => "bean",
            CacheKind::Sql => "sql",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn check_segment(field: &str, value: &str) -> StrataResult<()> {
    if value.is_empty() || value.contains(RESERVED) {
        return Err(CacheError::InvalidKey {
            reason: format!("{} {:?} is empty or contains a reserved character", field, value),
        }
        .into());
    }
    Ok(())
}

/// A fully derived cache key.
///
/// Only constructible through [`CacheKey::new`], which validates every
/// segment and hashes the identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    rendered: String,
    hash: u32,
}

impl CacheKey {
    pub fn new(namespace: &str, kind: CacheKind, table: &str, identifier: &str) -> StrataResult<Self> {
        check_segment("namespace", namespace)?;
        check_segment("table", table)?;
        let hash = crc32fast::hash(identifier.as_bytes());
        Ok(Self {
            inner: CacheKeyInner {
                rendered: format!("{}:{}:{}:{}", namespace, kind, table, hash),
                hash,
            },
        })
    }

    /// Glob matching every key of `kind` for `table`.
    pub fn pattern(namespace: &str, kind: CacheKind, table: &str) -> StrataResult<String> {
        check_segment("namespace", namespace)?;
        check_segment("table", table)?;
        Ok(format!("{}:{}:{}:*", namespace, kind, table))
    }

    pub fn as_str(&self) -> &str {
        &self.inner.rendered
    }

    pub fn hash(&self) -> u32 {
        self.inner.hash
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.rendered)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

// ============================================================================
// QUERY SIGNATURE
// ============================================================================

/// Collapse whitespace runs outside quoted runs to one space.
///
/// Text between matching `'` or `"` is kept byte for byte. A doubled quote
/// closes and reopens the run, which leaves its contents untouched too.
fn normalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for c in sql.chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => pending_space = true,
            None => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

/// Normalized text of a query plus its bound parameters.
///
/// Whitespace runs outside quoted literals collapse to one space, so queries
/// that differ only in formatting share a cache key. Parameters render as a
/// JSON array of strings, so no parameter value can pass for a separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySignature(String);

impl QuerySignature {
    pub fn new<I, P>(sql: &str, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: fmt::Display,
    {
        let mut rendered = normalize_sql(sql);
        let params: Vec<serde_json::Value> = params
            .into_iter()
            .map(|p| serde_json::Value::String(p.to_string()))
            .collect();
        if !params.is_empty() {
            rendered.push('-');
            rendered.push_str(&serde_json::Value::Array(params).to_string());
        }
        Self(rendered)
    }

    /// A signature for a query without parameters.
    pub fn sql(sql: &str) -> Self {
        Self::new::<_, &str>(sql, [])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let key = CacheKey::new("strata", CacheKind::Bean, "users", "42").unwrap();
        let expected = format!("strata:bean:users:{}", crc32fast::hash(b"42"));
        assert_eq!(key.as_str(), expected);
        assert_eq!(key.hash(), crc32fast::hash(b"42"));
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let bean = CacheKey::new("ns", CacheKind::Bean, "t", "1").unwrap();
        let sql = CacheKey::new("ns", CacheKind::Sql, "t", "1").unwrap();
        assert_ne!(bean, sql);
    }

    #[test]
    fn test_pattern() {
        assert_eq!(
            CacheKey::pattern("ns", CacheKind::Sql, "orders").unwrap(),
            "ns:sql:orders:*"
        );
    }

    #[test]
    fn test_rejects_reserved_segments() {
        assert!(CacheKey::new("ns", CacheKind::Bean, "a:b", "1").is_err());
        assert!(CacheKey::new("ns", CacheKind::Bean, "t*", "1").is_err());
        assert!(CacheKey::new("", CacheKind::Bean, "t", "1").is_err());
        assert!(CacheKey::pattern("ns", CacheKind::Bean, "").is_err());
    }

    #[test]
    fn test_query_signature_normalizes_whitespace() {
        let a = QuerySignature::new("SELECT id\n  FROM users\tWHERE age > ?", [18]);
        let b = QuerySignature::new("SELECT id FROM users WHERE age > ?", [18]);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), r#"SELECT id FROM users WHERE age > ?-["18"]"#);
    }

    #[test]
    fn test_query_signature_param_boundaries() {
        let sql = "SELECT id FROM t WHERE a = ? AND b = ?";
        let a = QuerySignature::new(sql, ["x,y", "z"]);
        let b = QuerySignature::new(sql, ["x", "y,z"]);
        assert_ne!(a, b);

        let quoted = QuerySignature::new(sql, [r#"x","y"#]);
        let split = QuerySignature::new(sql, ["x", "y"]);
        assert_ne!(quoted, split);
    }

    #[test]
    fn test_query_signature_keeps_quoted_whitespace() {
        let wide = QuerySignature::sql("SELECT id FROM t WHERE name = 'a  b'");
        let narrow = QuerySignature::sql("SELECT id FROM t WHERE name = 'a b'");
        assert_ne!(wide, narrow);
        assert_eq!(wide.as_str(), "SELECT id FROM t WHERE name = 'a  b'");

        let ident = QuerySignature::sql("SELECT  \"first   name\"\n FROM t");
        assert_eq!(ident.as_str(), "SELECT \"first   name\" FROM t");

        let escaped = QuerySignature::sql("  SELECT id FROM t WHERE n = 'it''s  x'  ");
        assert_eq!(escaped.as_str(), "SELECT id FROM t WHERE n = 'it''s  x'");
    }

    #[test]
    fn test_query_signature_params_matter() {
        let a = QuerySignature::new("SELECT id FROM t WHERE x = ?", ["a"]);
        let b = QuerySignature::new("SELECT id FROM t WHERE x = ?", ["b"]);
        assert_ne!(a, b);
        assert_eq!(QuerySignature::sql("SELECT 1").as_str(), "SELECT 1");
    }
}
