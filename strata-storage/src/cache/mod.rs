//! Query cache with deterministic keys and bulk invalidation.
//!
//! ```text
//! namespace:bean:users:1637292821   one row of `users`
//! namespace:sql:users:290311582     id list of one query on `users`
//! namespace:bean:users:*            everything `clear_beans("users")` removes
//! ```

pub mod codec;
pub mod key;
pub mod query_cache;

pub use codec::{BufferPool, PayloadCodec, PooledBuffer};
pub use key::{CacheKey, CacheKind, QuerySignature};
pub use query_cache::{CacheStats, RedisQueryCache};
