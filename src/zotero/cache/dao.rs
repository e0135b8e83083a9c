//! 查询缓存数据访问层（DAO）
//!
//! 只负责 `query_cache` 表的读写，序列化与降级策略由 [`CacheStore`](super::store::CacheStore) 处理。

use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

/// `query_cache` 表中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub key: String,
    pub timestamp: i64,
    pub client_state: String,
}

/// 查询缓存 DAO（基于 sqlx）
#[derive(Clone)]
pub struct CacheDao {
    db: Pool<Sqlite>,
}

impl CacheDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    pub async fn get_snapshot(&self, key: &str) -> Result<Option<SnapshotRow>> {
        let row = sqlx::query(
            r#"
            SELECT key, timestamp, client_state
            FROM query_cache
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await
        .context("查询缓存快照失败")?;

        Ok(row.map(|m| SnapshotRow {
            key: m.get("key"),
            timestamp: m.get("timestamp"),
            client_state: m.get("client_state"),
        }))
    }

    /// 只探测是否存在，不读取快照内容
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM query_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await
            .context("探测缓存快照失败")?;
        Ok(row.is_some())
    }

    pub async fn get_timestamp(&self, key: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT timestamp FROM query_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await
            .context("查询缓存时间戳失败")?;
        Ok(row.map(|m| m.get::<i64, _>("timestamp")))
    }

    pub async fn save_snapshot(&self, row: &SnapshotRow) -> Result<()> {
        let sql = r#"
            INSERT INTO query_cache (key, timestamp, client_state)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                timestamp = excluded.timestamp,
                client_state = excluded.client_state
        "#;

        sqlx::query(sql)
            .bind(&row.key)
            .bind(row.timestamp)
            .bind(&row.client_state)
            .execute(&self.db)
            .await
            .context("保存缓存快照失败")?;

        debug!(
            "[CacheDAO] 已保存快照 {}，{} 字节",
            row.key,
            row.client_state.len()
        );
        Ok(())
    }

    pub async fn delete_snapshot(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM query_cache WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await
            .context("删除缓存快照失败")?;
        Ok(())
    }

    /// 删除整张缓存表
    pub async fn drop_store(&self) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS query_cache")
            .execute(&self.db)
            .await
            .context("删除缓存表失败")?;
        info!("[CacheDAO] 缓存表已删除");
        Ok(())
    }
}
