//! 持久化缓存存储
//!
//! 存储不可用（表被删除、连接池关闭等）时每个操作只记录 `error!` 并返回空结果，
//! 不向上层传播错误。

use crate::zotero::cache::dao::{CacheDao, SnapshotRow};
use crate::zotero::cache::models::{CacheSnapshot, ClientState, CACHE_SNAPSHOT_KEY};
use anyhow::{Context, Result};
use sqlx::{Pool, Sqlite};
use tracing::{debug, error, info};

/// 快照存储
#[derive(Clone)]
pub struct CacheStore {
    dao: CacheDao,
    key: String,
}

impl CacheStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self::with_key(db, CACHE_SNAPSHOT_KEY)
    }

    pub fn with_key(db: Pool<Sqlite>, key: impl Into<String>) -> Self {
        Self {
            dao: CacheDao::new(db),
            key: key.into(),
        }
    }

    /// 读取快照；没有快照或存储不可用时返回 None
    pub async fn restore(&self) -> Option<CacheSnapshot> {
        match self.load().await {
            Ok(snapshot) => {
                match &snapshot {
                    Some(s) => info!(
                        "[CacheStore] 📦 恢复快照：{} 个查询，时间戳 {}",
                        s.client_state.queries.len(),
                        s.timestamp
                    ),
                    None => debug!("[CacheStore] 没有可恢复的快照"),
                }
                snapshot
            }
            Err(e) => {
                error!("[CacheStore] restore 失败: {:?}", e);
                None
            }
        }
    }

    /// 写入快照，返回本次写入的时间戳
    pub async fn persist(&self, state: &ClientState) -> Option<i64> {
        match self.save(state).await {
            Ok(timestamp) => {
                info!(
                    "[CacheStore] 💾 快照已写入：{} 个查询，时间戳 {}",
                    state.queries.len(),
                    timestamp
                );
                Some(timestamp)
            }
            Err(e) => {
                error!("[CacheStore] persist 失败: {:?}", e);
                None
            }
        }
    }

    pub async fn remove(&self) {
        if let Err(e) = self.dao.delete_snapshot(&self.key).await {
            error!("[CacheStore] remove 失败: {:?}", e);
        }
    }

    pub async fn is_cached(&self) -> bool {
        self.dao.exists(&self.key).await.unwrap_or_else(|e| {
            error!("[CacheStore] is_cached 失败: {:?}", e);
            false
        })
    }

    /// 快照写入时间（毫秒时间戳）；没有快照时返回 None
    pub async fn age_of(&self) -> Option<i64> {
        self.dao.get_timestamp(&self.key).await.unwrap_or_else(|e| {
            error!("[CacheStore] age_of 失败: {:?}", e);
            None
        })
    }

    /// 删除整个存储，之后所有操作都按存储不可用处理
    pub async fn delete_database(&self) {
        match self.dao.drop_store().await {
            Ok(()) => info!("[CacheStore] 🗑️ 缓存数据库已删除"),
            Err(e) => error!("[CacheStore] delete_database 失败: {:?}", e),
        }
    }

    async fn load(&self) -> Result<Option<CacheSnapshot>> {
        let Some(row) = self.dao.get_snapshot(&self.key).await? else {
            return Ok(None);
        };
        let client_state: ClientState =
            serde_json::from_str(&row.client_state).context("解析缓存快照失败")?;
        Ok(Some(CacheSnapshot {
            timestamp: row.timestamp,
            client_state,
        }))
    }

    async fn save(&self, state: &ClientState) -> Result<i64> {
        let client_state = serde_json::to_string(state).context("序列化缓存快照失败")?;
        let timestamp = chrono::Utc::now().timestamp_millis();
        self.dao
            .save_snapshot(&SnapshotRow {
                key: self.key.clone(),
                timestamp,
                client_state,
            })
            .await?;
        Ok(timestamp)
    }
}
