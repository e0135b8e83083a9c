//! 同步结果模型

use crate::zotero::tags::TagIndex;
use crate::zotero::types::{Record, Tag};
use serde::{Deserialize, Serialize};

/// 一次增量同步的结果
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult<T> {
    /// 合并后的完整数据集
    pub data: Vec<T>,
    /// 本次拉取到的改动
    pub modified: Vec<T>,
    /// 本次应用的删除 key
    pub deleted: Vec<String>,
    /// 新的版本水位（改动请求的 `Last-Modified-Version`）
    pub last_updated: u64,
}

/// 标签数据集：原始标签用于下次合并，索引供查询
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagDataset {
    pub tags: Vec<Tag>,
    pub index: TagIndex,
    #[serde(rename = "lastUpdated")]
    pub last_updated: u64,
}

/// 条目同步后是否需要重新同步标签
///
/// 标签是条目的聚合数据：条目有改动，或标签水位落后于条目的新水位时都要重新拉取。
pub fn needs_tag_resync(items: &SyncResult<Record>, tag_watermark: u64) -> bool {
    !items.modified.is_empty() || tag_watermark < items.last_updated
}
