pub mod cache;
pub mod citations;
pub mod client;
pub mod db;
pub mod error;
pub mod formats;
pub mod merge;
pub mod notes;
pub mod pagination;
pub mod remote;
pub mod serialization;
pub mod sync;
pub mod tags;
pub mod types;
pub mod writes;

#[cfg(test)]
pub(crate) mod testing;

// 重新导出同步相关类型
pub use sync::{EmptySyncListener, LibrarySyncer, SyncListener, SyncResult, TagDataset};
