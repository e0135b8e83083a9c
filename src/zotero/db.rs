//! SQLite 数据库工具：统一创建连接池并执行 sqlx 迁移
//!
//! 约定：crate 根目录下存在 `migrations/` 目录，存放所有迁移 SQL 文件。
//! 通过 `sqlx::migrate!()` 自动管理 schema 升级。

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::info;

/// 创建 SQLite 连接池并执行所有未执行的迁移
pub async fn create_sqlite_pool_with_migration(db_url: &str) -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .with_context(|| format!("连接数据库失败: {}", db_url))?;

    // 从 `migrations/` 目录读取迁移并执行
    sqlx::migrate!().run(&pool).await.context("执行数据库迁移失败")?;

    info!("[DB] 数据库已就绪: {}", db_url);
    Ok(pool)
}

/// 创建内存数据库（测试及 `--no-persist` 模式使用）
///
/// 内存库随连接销毁，所以只保留一个永不回收的连接。
pub async fn create_memory_pool() -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .context("创建内存数据库失败")?;

    sqlx::migrate!().run(&pool).await.context("执行数据库迁移失败")?;
    Ok(pool)
}
