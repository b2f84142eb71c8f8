//! Runtime configuration assembled from the environment.

use crate::telemetry::TelemetryConfig;
use strata_core::{ShardingConfig, StrataResult};
use strata_storage::{DbConfig, RedisConfig};

/// Everything the provisioner needs to start.
///
/// Query-cache settings belong to each engine; see
/// [`EngineOptions::from_env`](crate::registry::EngineOptions::from_env).
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub sharding: ShardingConfig,
    pub db: DbConfig,
    pub redis: RedisConfig,
    pub telemetry: TelemetryConfig,
}

impl RuntimeConfig {
    /// Read every section from `STRATA_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            sharding: ShardingConfig::from_env(),
            db: DbConfig::from_env(),
            redis: RedisConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }

    pub fn validate(&self) -> StrataResult<()> {
        self.sharding.validate()?;
        self.db.validate()?;
        self.redis.validate()?;
        self.telemetry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_section_fails() {
        let mut config = RuntimeConfig::default();
        config.sharding.lock_ttl = std::time::Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
