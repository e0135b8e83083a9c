//! 查询缓存与持久化快照

pub mod dao;
pub mod models;
pub mod query_cache;
pub mod store;

pub use models::{
    CacheSnapshot, CachedQuery, ClientState, QueryData, QueryKey, QueryKind, QueryState,
    QueryStatus, CACHE_SNAPSHOT_KEY,
};
pub use query_cache::{should_persist_query, QueryCache};
pub use store::CacheStore;
