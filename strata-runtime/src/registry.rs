//! Named engines and master/slave engine groups.
//!
//! A [`Registry`] is an explicit object passed to whoever needs it; there
//! is no process-global map.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use strata_core::{CacheConfig, StoreError, StrataError, StrataResult};
use strata_storage::{
    DbConfig, PostgresTableStore, RedisConfig, RedisKeyValueStore, RedisQueryCache, TableStore,
};

fn poisoned(guard: &str) -> StrataError {
    StoreError::Poisoned {
        guard: guard.to_string(),
    }
    .into()
}

// ============================================================================
// ENGINE
// ============================================================================

/// Connection options for one engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineOptions {
    pub name: String,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl EngineOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Options for `name` with every section read from `STRATA_*` variables.
    pub fn from_env(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db: DbConfig::from_env(),
            redis: RedisConfig::from_env(),
            cache: CacheConfig::from_env(),
        }
    }

    pub fn with_db(mut self, db: DbConfig) -> Self {
        self.db = db;
        self
    }

    pub fn with_redis(mut self, redis: RedisConfig) -> Self {
        self.redis = redis;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.name.trim().is_empty() {
            return Err(StrataError::missing("name"));
        }
        self.db.validate()?;
        self.redis.validate()?;
        self.cache.validate()
    }
}

/// A named relational store with an optional query cache.
#[derive(Clone)]
pub struct Engine {
    name: String,
    tables: Arc<dyn TableStore>,
    cache: Option<Arc<RedisQueryCache>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("tables", &self.tables.backend_name())
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl Engine {
    pub fn new(
        name: impl Into<String>,
        tables: Arc<dyn TableStore>,
        cache: Option<Arc<RedisQueryCache>>,
    ) -> StrataResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StrataError::missing("name"));
        }
        Ok(Self {
            name,
            tables,
            cache,
        })
    }

    /// Build the PostgreSQL pool and, when Redis is enabled, the query cache.
    pub async fn connect(options: &EngineOptions) -> StrataResult<Self> {
        options.validate()?;
        let tables: Arc<dyn TableStore> = Arc::new(PostgresTableStore::from_config(&options.db)?);
        let cache = if options.redis.enabled {
            let kv = Arc::new(RedisKeyValueStore::connect(&options.redis).await?);
            Some(Arc::new(RedisQueryCache::new(kv, options.cache.clone())?))
        } else {
            None
        };
        tracing::info!(engine = %options.name, cached = cache.is_some(), "Engine connected");
        Self::new(options.name.clone(), tables, cache)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> &Arc<dyn TableStore> {
        &self.tables
    }

    pub fn cache(&self) -> Option<&Arc<RedisQueryCache>> {
        self.cache.as_ref()
    }
}

// ============================================================================
// ENGINE GROUP
// ============================================================================

/// How a group picks a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPolicy {
    Random,
    #[default]
    RoundRobin,
    WeightedRandom,
    WeightedRoundRobin,
}

impl GroupPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupPolicy::Random => "random",
            GroupPolicy::RoundRobin => "round_robin",
            GroupPolicy::WeightedRandom => "weighted_random",
            GroupPolicy::WeightedRoundRobin => "weighted_round_robin",
        }
    }

    /// Weighted counterpart of this policy.
    pub fn weighted(self) -> Self {
        match self {
            GroupPolicy::Random | GroupPolicy::WeightedRandom => GroupPolicy::WeightedRandom,
            GroupPolicy::RoundRobin | GroupPolicy::WeightedRoundRobin => {
                GroupPolicy::WeightedRoundRobin
            }
        }
    }

    pub fn is_weighted(&self) -> bool {
        matches!(
            self,
            GroupPolicy::WeightedRandom | GroupPolicy::WeightedRoundRobin
        )
    }
}

impl fmt::Display for GroupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupPolicy {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "random" => Ok(GroupPolicy::Random),
            "round_robin" | "roundrobin" => Ok(GroupPolicy::RoundRobin),
            "weighted_random" => Ok(GroupPolicy::WeightedRandom),
            "weighted_round_robin" => Ok(GroupPolicy::WeightedRoundRobin),
            _ => Err(StrataError::invalid("policy", s, "unknown group policy")),
        }
    }
}

/// Options for a master/slave group.
#[derive(Debug, Clone, Default)]
pub struct EngineGroupOptions {
    pub name: String,
    pub master: Option<Arc<Engine>>,
    /// Slaves with their weights. Any weight above zero makes the policy weighted.
    pub slaves: Vec<(Arc<Engine>, u32)>,
    pub policy: GroupPolicy,
}

impl EngineGroupOptions {
    pub fn new(name: impl Into<String>, master: Arc<Engine>) -> Self {
        Self {
            name: name.into(),
            master: Some(master),
            ..Default::default()
        }
    }

    pub fn with_slave(mut self, engine: Arc<Engine>, weight: u32) -> Self {
        self.slaves.push((engine, weight));
        self
    }

    pub fn with_policy(mut self, policy: GroupPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// A master engine plus read slaves chosen by policy.
#[derive(Debug)]
pub struct EngineGroup {
    name: String,
    master: Arc<Engine>,
    slaves: Vec<Arc<Engine>>,
    weights: Vec<u32>,
    policy: GroupPolicy,
    cursor: AtomicUsize,
}

impl EngineGroup {
    pub fn new(options: EngineGroupOptions) -> StrataResult<Self> {
        if options.name.trim().is_empty() {
            return Err(StrataError::missing("name"));
        }
        let master = options.master.ok_or_else(|| StrataError::missing("master"))?;

        let any_weight = options.slaves.iter().any(|(_, w)| *w > 0);
        let policy = if any_weight {
            options.policy.weighted()
        } else if options.policy.is_weighted() {
            return Err(StrataError::invalid(
                "policy",
                options.policy,
                "weighted policy needs at least one slave weight above zero",
            ));
        } else {
            options.policy
        };

        let (slaves, weights) = options.slaves.into_iter().unzip();
        Ok(Self {
            name: options.name,
            master,
            slaves,
            weights,
            policy,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective policy after weight promotion.
    pub fn policy(&self) -> GroupPolicy {
        self.policy
    }

    pub fn master(&self) -> &Arc<Engine> {
        &self.master
    }

    pub fn slaves(&self) -> &[Arc<Engine>] {
        &self.slaves
    }

    /// A slave chosen by the group policy, or the master when there are none.
    pub fn slave(&self) -> &Arc<Engine> {
        if self.slaves.is_empty() {
            return &self.master;
        }
        let idx = match self.policy {
            GroupPolicy::Random => rand::rng().random_range(0..self.slaves.len()),
            GroupPolicy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % self.slaves.len(),
            GroupPolicy::WeightedRandom => {
                let total = self.total_weight();
                self.index_for_weight(rand::rng().random_range(0..total))
            }
            GroupPolicy::WeightedRoundRobin => {
                let total = self.total_weight();
                let step = self.cursor.fetch_add(1, Ordering::Relaxed) as u64 % total;
                self.index_for_weight(step)
            }
        };
        self.slaves.get(idx).unwrap_or(&self.master)
    }

    fn total_weight(&self) -> u64 {
        self.weights.iter().map(|w| u64::from(*w)).sum::<u64>().max(1)
    }

    /// Slave whose cumulative weight band contains `point`.
    fn index_for_weight(&self, point: u64) -> usize {
        let mut acc = 0u64;
        for (idx, w) in self.weights.iter().enumerate() {
            acc += u64::from(*w);
            if point < acc {
                return idx;
            }
        }
        self.weights.len().saturating_sub(1)
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Engines and groups by name.
#[derive(Debug, Default)]
pub struct Registry {
    engines: RwLock<HashMap<String, Arc<Engine>>>,
    groups: RwLock<HashMap<String, Arc<EngineGroup>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an engine.
    pub fn register_engine(&self, engine: Engine) -> StrataResult<Arc<Engine>> {
        if engine.name().trim().is_empty() {
            return Err(StrataError::missing("name"));
        }
        let engine = Arc::new(engine);
        let mut engines = self.engines.write().map_err(|_| poisoned("engines"))?;
        engines.insert(engine.name().to_string(), Arc::clone(&engine));
        Ok(engine)
    }

    pub fn engine(&self, name: &str) -> Option<Arc<Engine>> {
        self.engines.read().ok()?.get(name).cloned()
    }

    /// Build, validate and add a group.
    pub fn register_group(&self, options: EngineGroupOptions) -> StrataResult<Arc<EngineGroup>> {
        let group = Arc::new(EngineGroup::new(options)?);
        let mut groups = self.groups.write().map_err(|_| poisoned("engine groups"))?;
        groups.insert(group.name().to_string(), Arc::clone(&group));
        Ok(group)
    }

    pub fn group(&self, name: &str) -> Option<Arc<EngineGroup>> {
        self.groups.read().ok()?.get(name).cloned()
    }

    /// Registered engine names, sorted.
    pub fn engine_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .engines
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::InMemoryTableStore;

    fn engine(name: &str) -> Arc<Engine> {
        Arc::new(Engine::new(name, Arc::new(InMemoryTableStore::new()), None).unwrap())
    }

    #[test]
    fn test_engine_requires_name() {
        let err = Engine::new("", Arc::new(InMemoryTableStore::new()), None).unwrap_err();
        assert!(err.is_fatal_setup());
        assert!(EngineOptions::new(" ").validate().is_err());
    }

    #[test]
    fn test_engine_options_from_env() {
        let options = EngineOptions::from_env("primary");
        assert_eq!(options.name, "primary");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = Registry::new();
        let e = Engine::new("primary", Arc::new(InMemoryTableStore::new()), None).unwrap();
        registry.register_engine(e).unwrap();
        assert!(registry.engine("primary").is_some());
        assert!(registry.engine("missing").is_none());
        assert_eq!(registry.engine_names(), vec!["primary".to_string()]);
    }

    #[test]
    fn test_group_requires_name_and_master() {
        let opts = EngineGroupOptions {
            name: "g".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            EngineGroup::new(opts),
            Err(StrataError::Config(strata_core::ConfigError::MissingRequired { ref field })) if field == "master"
        ));
        assert!(EngineGroup::new(EngineGroupOptions::new("", engine("m"))).is_err());
    }

    #[test]
    fn test_slave_falls_back_to_master() {
        let group = EngineGroup::new(EngineGroupOptions::new("g", engine("m"))).unwrap();
        assert_eq!(group.slave().name(), "m");
        assert_eq!(group.policy(), GroupPolicy::RoundRobin);
    }

    #[test]
    fn test_round_robin_cycles() {
        let group = EngineGroup::new(
            EngineGroupOptions::new("g", engine("m"))
                .with_slave(engine("s1"), 0)
                .with_slave(engine("s2"), 0),
        )
        .unwrap();
        let picks: Vec<&str> = (0..4).map(|_| group.slave().name()).collect();
        assert_eq!(picks, vec!["s1", "s2", "s1", "s2"]);
    }

    #[test]
    fn test_weights_promote_policy() {
        let group = EngineGroup::new(
            EngineGroupOptions::new("g", engine("m"))
                .with_slave(engine("heavy"), 3)
                .with_slave(engine("light"), 1),
        )
        .unwrap();
        assert_eq!(group.policy(), GroupPolicy::WeightedRoundRobin);

        let picks: Vec<&str> = (0..8).map(|_| group.slave().name()).collect();
        assert_eq!(picks.iter().filter(|n| **n == "heavy").count(), 6);
        assert_eq!(picks.iter().filter(|n| **n == "light").count(), 2);

        let random = EngineGroup::new(
            EngineGroupOptions::new("g", engine("m"))
                .with_slave(engine("only"), 1)
                .with_slave(engine("never"), 0)
                .with_policy(GroupPolicy::Random),
        )
        .unwrap();
        assert_eq!(random.policy(), GroupPolicy::WeightedRandom);
        for _ in 0..20 {
            assert_eq!(random.slave().name(), "only");
        }
    }

    #[test]
    fn test_weighted_policy_without_weights_rejected() {
        let result = EngineGroup::new(
            EngineGroupOptions::new("g", engine("m"))
                .with_slave(engine("s"), 0)
                .with_policy(GroupPolicy::WeightedRandom),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_random_picks_a_slave() {
        let group = EngineGroup::new(
            EngineGroupOptions::new("g", engine("m"))
                .with_slave(engine("s1"), 0)
                .with_slave(engine("s2"), 0)
                .with_policy(GroupPolicy::Random),
        )
        .unwrap();
        for _ in 0..20 {
            assert!(matches!(group.slave().name(), "s1" | "s2"));
        }
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("round-robin".parse::<GroupPolicy>().unwrap(), GroupPolicy::RoundRobin);
        assert_eq!("weighted_random".parse::<GroupPolicy>().unwrap(), GroupPolicy::WeightedRandom);
        assert!("least_conn".parse::<GroupPolicy>().is_err());
    }

    #[test]
    fn test_registry_groups() {
        let registry = Registry::new();
        let master = registry
            .register_engine(Engine::new("m", Arc::new(InMemoryTableStore::new()), None).unwrap())
            .unwrap();
        registry
            .register_group(EngineGroupOptions::new("main", master))
            .unwrap();
        assert_eq!(registry.group("main").unwrap().master().name(), "m");
        assert!(registry.group("other").is_none());
    }
}
