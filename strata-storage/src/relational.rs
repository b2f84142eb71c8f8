//! Relational table store trait.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use strata_core::{StoreError, StrataError, StrataResult, TableShape};

/// Minimal relational-store surface needed to provision shards.
#[async_trait]
pub trait TableStore: Send + Sync + std::fmt::Debug {
    /// Short backend name for logs and error messages.
    fn backend_name(&self) -> &'static str;

    /// Whether a table with exactly this name exists.
    async fn table_exists(&self, name: &str) -> StrataResult<bool>;

    /// Create the table from its column-definition body.
    ///
    /// Must be idempotent: creating an existing table succeeds.
    async fn create_table(&self, name: &str, shape: &TableShape) -> StrataResult<()>;
}

static IDENTIFIER: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$"));

/// Reject table names that are not plain SQL identifiers.
///
/// Names are interpolated into DDL, so only `[A-Za-z_][A-Za-z0-9_]*` up to
/// 63 bytes (the PostgreSQL limit) is accepted.
pub fn validate_identifier(name: &str) -> StrataResult<()> {
    let re = IDENTIFIER.as_ref().map_err(|e| {
        StrataError::Store(StoreError::InvalidIdentifier {
            name: format!("{} (identifier pattern failed to compile: {})", name, e),
        })
    })?;
    if re.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier {
            name: name.to_string(),
        }
        .into())
    }
}
