//! 同步监听器回调接口

use crate::zotero::types::{LibraryPath, ResourceKind};
use async_trait::async_trait;

/// 同步监听器
///
/// 资源同步完成后通过这里通知观察者，例如 UI 刷新或统计。
#[async_trait]
pub trait SyncListener: Send + Sync {
    /// 某个文库开始同步
    async fn on_sync_start(&self, library: &LibraryPath);

    /// 某个文库同步结束，`success` 为 false 表示至少一种资源失败
    async fn on_sync_finish(&self, library: &LibraryPath, success: bool);

    /// 资源有改动，参数为改动记录的 JSON 数组字符串
    async fn on_update(&self, kind: ResourceKind, library: &LibraryPath, modified_json: String);

    /// 资源同步失败，本地数据保持不变
    async fn on_update_failed(&self, kind: ResourceKind, library: &LibraryPath, error: String);
}

/// 默认空实现（无操作）
pub struct EmptySyncListener;

#[async_trait]
impl SyncListener for EmptySyncListener {
    async fn on_sync_start(&self, _library: &LibraryPath) {}
    async fn on_sync_finish(&self, _library: &LibraryPath, _success: bool) {}
    async fn on_update(&self, _kind: ResourceKind, _library: &LibraryPath, _modified_json: String) {
    }
    async fn on_update_failed(&self, _kind: ResourceKind, _library: &LibraryPath, _error: String) {}
}
