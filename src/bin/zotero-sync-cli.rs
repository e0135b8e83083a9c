//! Zotero 同步 CLI
//!
//! 非交互式 CLI：从本地快照恢复 → 同步指定文库 → 写回快照，打印同步摘要。
//! `--interval` 大于 0 时按间隔轮询，直到 `--duration` 到期。

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};
use zotero_sync_core_rust::zotero::types::ResourceKind;
use zotero_sync_core_rust::{
    CitationFormat, ClientConfig, LibraryHandle, LibraryPath, SyncListener, ZoteroSyncClient,
};

/// Zotero 同步 CLI
#[derive(Parser, Debug)]
#[command(name = "zotero-sync-cli")]
#[command(about = "Zotero 文库同步 CLI - 增量同步并缓存到本地 SQLite", long_about = None)]
struct Args {
    /// Zotero API Key
    #[arg(short = 'k', long)]
    api_key: String,

    /// 文库路径，可重复，例如 users/1111 或 groups/2222
    #[arg(short, long = "library", required = true)]
    libraries: Vec<LibraryPath>,

    /// 缓存数据库 URL
    #[arg(long, default_value = "sqlite://zotero_cache.db?mode=rwc")]
    db_url: String,

    /// 不读写本地缓存
    #[arg(long)]
    no_persist: bool,

    /// 启动前清空本地缓存
    #[arg(long)]
    clear_cache: bool,

    /// 轮询间隔（秒），0 表示只同步一次
    #[arg(short, long, default_value = "0")]
    interval: u64,

    /// 运行时长（秒），0 表示持续运行；仅在轮询模式下生效
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 摘要中展示条目使用的引用格式
    #[arg(long, default_value = "citation")]
    format: CitationFormat,

    /// 日志级别（默认: info,zotero_sync_core_rust=debug）
    #[arg(long, default_value = "info,zotero_sync_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .context("无法创建日志文件 debug.log")?;

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
    Ok(())
}

/// 输出所有同步事件
struct CliSyncListener;

#[async_trait]
impl SyncListener for CliSyncListener {
    async fn on_sync_start(&self, library: &LibraryPath) {
        info!("[CLI/Sync] 🔄 {} 同步开始", library);
    }

    async fn on_sync_finish(&self, library: &LibraryPath, success: bool) {
        if success {
            info!("[CLI/Sync] ✅ {} 同步完成", library);
        } else {
            error!("[CLI/Sync] ❌ {} 同步失败", library);
        }
    }

    async fn on_update(&self, kind: ResourceKind, library: &LibraryPath, modified_json: String) {
        info!(
            "[CLI/Sync] 🆕 {} 的 {} 有改动（{} 字节）",
            library,
            kind,
            modified_json.len()
        );
    }

    async fn on_update_failed(&self, kind: ResourceKind, library: &LibraryPath, error: String) {
        error!("[CLI/Sync] ⚠️ {} 的 {} 同步失败: {}", library, kind, error);
    }
}

async fn print_summary(client: &ZoteroSyncClient, format: CitationFormat) {
    for handle in &client.config().libraries {
        let library = handle.path();
        let Some(items) = client.items(library).await else {
            warn!("[CLI] {} 暂无数据", library);
            continue;
        };
        let collections = client.collections(library).await.unwrap_or_default();
        let tags = client.tags(library).await.unwrap_or_default();
        info!(
            "[CLI] 📚 {} - 条目: {}, 文件夹: {}, 标签: {}（{} 个首字母），版本: {}",
            library,
            items.data.len(),
            collections.data.len(),
            tags.tags.len(),
            tags.index.len(),
            items.last_updated
        );
        for record in items.data.iter().take(5) {
            info!("[CLI]   - {}", client.format(format, record));
        }
    }
}

async fn sync_once(client: &ZoteroSyncClient) {
    for (library, result) in client.sync_all().await {
        if let Err(e) = result {
            error!("[CLI] {} 同步失败: {:#}", library, e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level)?;

    info!("[CLI] 🚀 Zotero 同步 CLI");
    info!(
        "[CLI] 📚 文库: {}",
        args.libraries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let libraries = args
        .libraries
        .iter()
        .map(|path| LibraryHandle::new(args.api_key.clone(), path.clone()))
        .collect();
    let mut config = ClientConfig::new(libraries);
    config.db_url = args.db_url.clone();
    config.persist_cache = !args.no_persist;

    let client = ZoteroSyncClient::with_listener(config, Arc::new(CliSyncListener))
        .await
        .context("创建同步客户端失败")?;

    if args.clear_cache {
        client.clear_cache().await;
    } else {
        let restored = client.hydrate_from_cache().await;
        match client.cache_age().await {
            Some(ts) => info!("[CLI] 📦 从快照恢复 {} 个查询（快照时间戳 {}）", restored, ts),
            None => info!("[CLI] 📦 没有本地快照，执行全量同步"),
        }
    }

    match client.fetch_permissions(&args.api_key).await {
        Ok(permissions) => info!(
            "[CLI] 🔐 API Key 属于 {}（userID {}）",
            permissions.username, permissions.user_id
        ),
        Err(e) => warn!("[CLI] 查询 API Key 权限失败: {:#}", e),
    }

    sync_once(&client).await;
    print_summary(&client, args.format).await;

    if args.interval == 0 {
        info!("[CLI] 👋 程序退出");
        return Ok(());
    }

    let deadline = (args.duration > 0).then(|| Instant::now() + Duration::from_secs(args.duration));
    info!("[CLI] ⏰ 每 {} 秒轮询一次，按 Ctrl+C 退出", args.interval);
    loop {
        sleep(Duration::from_secs(args.interval)).await;
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        sync_once(&client).await;
        print_summary(&client, args.format).await;
    }

    info!("[CLI] 👋 程序退出");
    Ok(())
}
