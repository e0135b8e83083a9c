//! 查询缓存数据模型
//!
//! 内存中的查询结果按 `(类型, 作用域)` 存放；持久化时整体序列化为一个 [`ClientState`]。

use crate::zotero::citations::SemanticPaper;
use crate::zotero::sync::TagDataset;
use crate::zotero::types::{Dataset, KeyPermissions, Record, ResourceKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 快照在 `query_cache` 表中的固定 key
pub const CACHE_SNAPSHOT_KEY: &str = "QUERY_CLIENT_STATE";

/// 查询类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Items,
    Collections,
    Tags,
    Permissions,
    Semantic,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Items => "items",
            QueryKind::Collections => "collections",
            QueryKind::Tags => "tags",
            QueryKind::Permissions => "permissions",
            QueryKind::Semantic => "semantic",
        }
    }
}

impl From<ResourceKind> for QueryKind {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Items => QueryKind::Items,
            ResourceKind::Collections => QueryKind::Collections,
            ResourceKind::Tags => QueryKind::Tags,
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 查询状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Loading,
    Success,
    Error,
}

/// 查询的唯一标识；`scope` 为文库路径（如 `users/1111`）、API Key 或 DOI
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    pub kind: QueryKind,
    pub scope: String,
}

impl QueryKey {
    pub fn new(kind: QueryKind, scope: impl Into<String>) -> Self {
        Self {
            kind,
            scope: scope.into(),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.scope)
    }
}

/// 查询结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum QueryData {
    Records(Dataset<Record>),
    Tags(TagDataset),
    Permissions(KeyPermissions),
    Semantic(SemanticPaper),
}

/// 单个查询的状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryState {
    pub status: QueryStatus,
    #[serde(default)]
    pub data: Option<QueryData>,
    #[serde(default)]
    pub error: Option<String>,
    /// 最近一次成功写入的时间（毫秒时间戳）
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    #[serde(rename = "isInvalidated", default)]
    pub is_invalidated: bool,
    /// 正在重新获取；不写入快照
    #[serde(skip)]
    pub is_fetching: bool,
}

/// 持久化时的单个查询
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedQuery {
    pub key: QueryKey,
    pub state: QueryState,
}

/// 整个客户端的查询状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(default)]
    pub queries: Vec<CachedQuery>,
}

impl ClientState {
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// 存储中的快照
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    /// 写入时间（毫秒时间戳）
    pub timestamp: i64,
    pub client_state: ClientState,
}
