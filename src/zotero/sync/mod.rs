//! 增量同步模块
//!
//! 每种资源（条目、文件夹、标签）一条同步路径，形状相同：
//! 拉取改动 → 必要时拉取删除 → 合并 → 返回新水位。

pub mod api;
pub mod listener;
pub mod models;
pub mod service;

// 重新导出主要类型和函数
pub use api::LibraryApi;
pub use listener::{EmptySyncListener, SyncListener};
pub use models::{needs_tag_resync, SyncResult, TagDataset};
pub use service::LibrarySyncer;
