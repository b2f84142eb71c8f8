//! STRATA Storage - Store traits and backends
//!
//! The relational [`TableStore`] and the shared [`KeyValueStore`] are the two
//! external seams. PostgreSQL, Redis and in-memory implementations live here,
//! together with the [`DistributedLock`] and the query cache built on them.

pub mod cache;
pub mod kv;
pub mod lock;
pub mod memory;
pub mod postgres_backend;
pub mod redis_backend;
pub mod relational;

pub use cache::{CacheKey, CacheKind, CacheStats, PayloadCodec, QuerySignature, RedisQueryCache};
pub use kv::{scan_all, KeyValueStore, ScanPage};
pub use lock::{DistributedLock, KvDistributedLock, NoopLock};
pub use memory::{InMemoryKeyValueStore, InMemoryTableStore};
pub use postgres_backend::{DbConfig, PostgresTableStore};
pub use redis_backend::{RedisConfig, RedisKeyValueStore};
pub use relational::{validate_identifier, TableStore};
