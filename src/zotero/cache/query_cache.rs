//! 内存查询缓存
//!
//! 保存每个查询最近一次的状态，负责与持久化快照之间的脱水 / 注水。

use crate::zotero::cache::models::{
    CachedQuery, ClientState, QueryData, QueryKey, QueryKind, QueryState, QueryStatus,
};
use crate::zotero::sync::TagDataset;
use crate::zotero::types::{Dataset, Record};
use std::collections::HashMap;
use tracing::debug;

/// 查询是否需要写入持久化快照
///
/// 只保存成功的条目、文件夹、标签查询；权限和引用查询每次会话重新获取。
pub fn should_persist_query(kind: QueryKind, status: QueryStatus) -> bool {
    status == QueryStatus::Success
        && matches!(
            kind,
            QueryKind::Items | QueryKind::Collections | QueryKind::Tags
        )
}

/// 内存查询缓存
#[derive(Debug, Default)]
pub struct QueryCache {
    queries: HashMap<QueryKey, QueryState>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn get(&self, key: &QueryKey) -> Option<&QueryState> {
        self.queries.get(key)
    }

    /// 成功状态下的数据
    pub fn data(&self, key: &QueryKey) -> Option<&QueryData> {
        self.queries.get(key).and_then(|s| s.data.as_ref())
    }

    /// 条目或文件夹数据集
    pub fn records(&self, key: &QueryKey) -> Option<&Dataset<Record>> {
        match self.data(key) {
            Some(QueryData::Records(dataset)) => Some(dataset),
            _ => None,
        }
    }

    pub fn tags(&self, key: &QueryKey) -> Option<&TagDataset> {
        match self.data(key) {
            Some(QueryData::Tags(dataset)) => Some(dataset),
            _ => None,
        }
    }

    /// 标记为正在获取
    ///
    /// 已有查询保留原状态和数据，只置 `is_fetching`；新查询的状态为 Loading。
    pub fn set_loading(&mut self, key: QueryKey) {
        self.queries
            .entry(key)
            .and_modify(|s| s.is_fetching = true)
            .or_insert(QueryState {
                status: QueryStatus::Loading,
                data: None,
                error: None,
                updated_at: 0,
                is_invalidated: false,
                is_fetching: true,
            });
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.queries.get(key).is_some_and(|s| s.is_fetching)
    }

    pub fn set_success(&mut self, key: QueryKey, data: QueryData) {
        let now = chrono::Utc::now().timestamp_millis();
        debug!("[QueryCache] 写入查询 {}", key);
        self.queries.insert(
            key,
            QueryState {
                status: QueryStatus::Success,
                data: Some(data),
                error: None,
                updated_at: now,
                is_invalidated: false,
                is_fetching: false,
            },
        );
    }

    /// 记录失败，上一次成功的数据保留
    pub fn set_error(&mut self, key: QueryKey, error: impl Into<String>) {
        let error = error.into();
        self.queries
            .entry(key)
            .and_modify(|s| {
                s.status = QueryStatus::Error;
                s.error = Some(error.clone());
                s.is_fetching = false;
            })
            .or_insert(QueryState {
                status: QueryStatus::Error,
                data: None,
                error: Some(error),
                updated_at: 0,
                is_invalidated: false,
                is_fetching: false,
            });
    }

    /// 标记查询失效，返回查询是否存在
    pub fn invalidate(&mut self, key: &QueryKey) -> bool {
        match self.queries.get_mut(key) {
            Some(state) => {
                state.is_invalidated = true;
                debug!("[QueryCache] 查询已失效: {}", key);
                true
            }
            None => false,
        }
    }

    pub fn is_invalidated(&self, key: &QueryKey) -> bool {
        self.queries.get(key).is_some_and(|s| s.is_invalidated)
    }

    pub fn remove(&mut self, key: &QueryKey) -> Option<QueryState> {
        self.queries.remove(key)
    }

    pub fn clear(&mut self) {
        self.queries.clear();
    }

    /// 导出需要持久化的查询，按 key 排序
    pub fn dehydrate(&self) -> ClientState {
        let mut queries: Vec<CachedQuery> = self
            .queries
            .iter()
            .filter(|(key, state)| should_persist_query(key.kind, state.status))
            .map(|(key, state)| CachedQuery {
                key: key.clone(),
                state: QueryState {
                    is_fetching: false,
                    ..state.clone()
                },
            })
            .collect();
        queries.sort_by(|a, b| a.key.cmp(&b.key));
        ClientState { queries }
    }

    /// 从快照恢复；内存中更新的查询不会被旧快照覆盖
    pub fn hydrate(&mut self, state: ClientState) -> usize {
        let mut restored = 0;
        for CachedQuery { key, state } in state.queries {
            let newer_in_memory = self
                .queries
                .get(&key)
                .is_some_and(|current| current.updated_at >= state.updated_at);
            if newer_in_memory {
                continue;
            }
            self.queries.insert(key, state);
            restored += 1;
        }
        debug!("[QueryCache] 从快照恢复 {} 个查询", restored);
        restored
    }
}
