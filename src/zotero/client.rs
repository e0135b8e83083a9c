//! 同步客户端
//!
//! [`ZoteroSyncClient`] 持有一次会话的全部状态：查询缓存、持久化存储、各远端服务的客户端。
//! 生命周期：从快照注水 → 首次全量同步 → 增量同步 → 显式清空或删除数据库。

use crate::zotero::cache::{
    CacheStore, QueryCache, QueryData, QueryKey, QueryKind, QueryStatus,
};
use crate::zotero::citations::{normalize_doi, SemanticApi, SemanticPaper};
use crate::zotero::db::create_sqlite_pool_with_migration;
use crate::zotero::error::ApiError;
use crate::zotero::formats::{CitationFormat, FormatRegistry};
use crate::zotero::remote::{
    HttpTransport, RemoteClient, RemoteService, ReqwestTransport, RetryPolicy,
};
use crate::zotero::sync::{
    needs_tag_resync, EmptySyncListener, LibraryApi, LibrarySyncer, SyncListener, SyncResult,
    TagDataset,
};
use crate::zotero::types::{Dataset, KeyPermissions, LibraryHandle, LibraryPath, Record};
use crate::zotero::writes::{BatchOutcome, BibEntry, WriteGateway};
use anyhow::{Context, Result};
use futures_util::future::join_all;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 需要同步的文库
    pub libraries: Vec<LibraryHandle>,
    /// Zotero Web API 基础地址
    pub api_base_url: String,
    /// Semantic Scholar API 基础地址
    pub semantic_base_url: String,
    /// 本地缓存使用的 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://zotero_cache.db?mode=rwc`
    pub db_url: String,
    /// 是否把查询缓存持久化到数据库
    pub persist_cache: bool,
    /// HTTP 请求超时，None 表示不限制
    pub request_timeout: Option<Duration>,
    pub zotero_retry: RetryPolicy,
    pub semantic_retry: RetryPolicy,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(libraries: Vec<LibraryHandle>) -> Self {
        Self {
            libraries,
            api_base_url: RemoteService::Zotero.default_base_url().to_string(),
            semantic_base_url: RemoteService::SemanticScholar
                .default_base_url()
                .to_string(),
            db_url: "sqlite://zotero_cache.db?mode=rwc".to_string(),
            persist_cache: true,
            request_timeout: Some(Duration::from_secs(30)),
            zotero_retry: RemoteService::Zotero.default_policy(),
            semantic_retry: RemoteService::SemanticScholar.default_policy(),
        }
    }
}

/// 单个文库一次同步的摘要
#[derive(Debug, Clone, PartialEq)]
pub struct LibrarySyncSummary {
    pub library: LibraryPath,
    pub items: usize,
    pub modified_items: usize,
    pub deleted_items: usize,
    pub collections: usize,
    /// 本次没有重新同步标签时为 None
    pub tags: Option<usize>,
    pub last_updated: u64,
}

/// 同步客户端
#[derive(Clone)]
pub struct ZoteroSyncClient {
    config: ClientConfig,
    queries: Arc<RwLock<QueryCache>>,
    store: Option<CacheStore>,
    syncer: Arc<LibrarySyncer>,
    writes: WriteGateway,
    semantic: SemanticApi,
    listener: Arc<dyn SyncListener>,
    formats: FormatRegistry,
}

impl ZoteroSyncClient {
    /// 创建客户端（使用默认空监听器）
    pub async fn new(config: ClientConfig) -> Result<Self> {
        Self::with_listener(config, Arc::new(EmptySyncListener)).await
    }

    /// 创建客户端（带自定义监听器，内部创建 HTTP 客户端和连接池）
    pub async fn with_listener(
        config: ClientConfig,
        listener: Arc<dyn SyncListener>,
    ) -> Result<Self> {
        info!(
            "[Client] 创建同步客户端，文库数: {}, SQLite数据库: {}",
            config.libraries.len(),
            config.db_url
        );
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        let db = if config.persist_cache {
            Some(create_sqlite_pool_with_migration(&config.db_url).await?)
        } else {
            None
        };
        Ok(Self::with_parts(config, transport, db, listener))
    }

    /// 使用外部提供的传输层和连接池创建客户端
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        db: Option<Pool<Sqlite>>,
        listener: Arc<dyn SyncListener>,
    ) -> Self {
        let zotero = RemoteClient::new(
            RemoteService::Zotero,
            config.api_base_url.clone(),
            transport.clone(),
            config.zotero_retry,
        );
        let semantic = RemoteClient::new(
            RemoteService::SemanticScholar,
            config.semantic_base_url.clone(),
            transport,
            config.semantic_retry,
        );
        let api = LibraryApi::new(zotero);

        Self {
            queries: Arc::new(RwLock::new(QueryCache::new())),
            store: db.map(CacheStore::new),
            syncer: Arc::new(LibrarySyncer::with_listener(api.clone(), listener.clone())),
            writes: WriteGateway::new(api),
            semantic: SemanticApi::new(semantic),
            listener,
            formats: FormatRegistry::default(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 替换引用格式实现
    pub fn formats_mut(&mut self) -> &mut FormatRegistry {
        &mut self.formats
    }

    pub fn format(&self, format: CitationFormat, record: &Record) -> String {
        self.formats.format(format, record)
    }

    /// 从持久化快照恢复查询缓存，返回恢复的查询数
    ///
    /// 必须在任何网络请求之前调用。
    pub async fn hydrate_from_cache(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        match store.restore().await {
            Some(snapshot) => self.queries.write().await.hydrate(snapshot.client_state),
            None => 0,
        }
    }

    /// 把当前查询缓存写入快照，返回写入时间戳
    pub async fn persist_cache(&self) -> Option<i64> {
        let store = self.store.as_ref()?;
        let state = self.queries.read().await.dehydrate();
        store.persist(&state).await
    }

    /// 快照写入时间；没有快照或未启用持久化时为 None
    pub async fn cache_age(&self) -> Option<i64> {
        match &self.store {
            Some(store) => store.age_of().await,
            None => None,
        }
    }

    pub async fn items(&self, library: &LibraryPath) -> Option<Dataset<Record>> {
        let key = QueryKey::new(QueryKind::Items, library.to_string());
        self.queries.read().await.records(&key).cloned()
    }

    pub async fn collections(&self, library: &LibraryPath) -> Option<Dataset<Record>> {
        let key = QueryKey::new(QueryKind::Collections, library.to_string());
        self.queries.read().await.records(&key).cloned()
    }

    pub async fn tags(&self, library: &LibraryPath) -> Option<TagDataset> {
        let key = QueryKey::new(QueryKind::Tags, library.to_string());
        self.queries.read().await.tags(&key).cloned()
    }

    pub async fn query_status(&self, key: &QueryKey) -> Option<QueryStatus> {
        self.queries.read().await.get(key).map(|s| s.status)
    }

    /// 同步配置中的所有文库
    pub async fn sync_all(&self) -> Vec<(LibraryPath, Result<LibrarySyncSummary>)> {
        let tasks = self.config.libraries.iter().map(|handle| async move {
            (handle.path().clone(), self.sync_library(handle).await)
        });
        let results = join_all(tasks).await;

        // 各文库的快照是并发写的，全部结束后再写一次完整快照
        if results.iter().any(|(_, r)| r.is_ok()) {
            self.persist_cache().await;
        }
        results
    }

    /// 同步单个文库
    ///
    /// 条目与文件夹并发同步；条目同步之后按 [`needs_tag_resync`] 决定是否同步标签，
    /// 标签查询已失效时总是同步。
    /// 至少一种资源成功时写入快照。
    pub async fn sync_library(&self, handle: &LibraryHandle) -> Result<LibrarySyncSummary> {
        let library = handle.path().clone();
        let scope = library.to_string();
        let items_key = QueryKey::new(QueryKind::Items, scope.clone());
        let collections_key = QueryKey::new(QueryKind::Collections, scope.clone());
        let tags_key = QueryKey::new(QueryKind::Tags, scope);

        self.listener.on_sync_start(&library).await;

        let (items, collections, tags, tags_invalidated) = {
            let mut cache = self.queries.write().await;
            let snapshot = (
                cache.records(&items_key).cloned().unwrap_or_default(),
                cache.records(&collections_key).cloned().unwrap_or_default(),
                cache.tags(&tags_key).cloned().unwrap_or_default(),
                cache.is_invalidated(&tags_key),
            );
            cache.set_loading(items_key.clone());
            cache.set_loading(collections_key.clone());
            snapshot
        };

        let (items_result, collections_result) = tokio::join!(
            self.syncer
                .sync_items(handle, items.last_updated, &items.data),
            self.syncer
                .sync_collections(handle, collections.last_updated, &collections.data),
        );

        let tag_result = match &items_result {
            Ok(result) if tags_invalidated || needs_tag_resync(result, tags.last_updated) => {
                self.queries.write().await.set_loading(tags_key.clone());
                Some(
                    self.syncer
                        .sync_tags(handle, tags.last_updated, &tags.tags)
                        .await,
                )
            }
            Ok(_) => {
                debug!("[Client] {} 条目无改动且标签水位最新，跳过标签同步", library);
                None
            }
            Err(_) => None,
        };

        let mut summary = LibrarySyncSummary {
            library: library.clone(),
            items: items.data.len(),
            modified_items: 0,
            deleted_items: 0,
            collections: collections.data.len(),
            tags: None,
            last_updated: items.last_updated,
        };
        let mut succeeded = 0usize;
        let mut first_error: Option<anyhow::Error> = None;
        {
            let mut cache = self.queries.write().await;

            match items_result {
                Ok(result) => {
                    summary.items = result.data.len();
                    summary.modified_items = result.modified.len();
                    summary.deleted_items = result.deleted.len();
                    summary.last_updated = result.last_updated;
                    cache.set_success(items_key, records_data(result));
                    succeeded += 1;
                }
                Err(e) => {
                    cache.set_error(items_key, format!("{:#}", e));
                    first_error = first_error.or(Some(e));
                }
            }

            match collections_result {
                Ok(result) => {
                    summary.collections = result.data.len();
                    cache.set_success(collections_key, records_data(result));
                    succeeded += 1;
                }
                Err(e) => {
                    cache.set_error(collections_key, format!("{:#}", e));
                    first_error = first_error.or(Some(e));
                }
            }

            match tag_result {
                Some(Ok(dataset)) => {
                    summary.tags = Some(dataset.tags.len());
                    cache.set_success(tags_key, QueryData::Tags(dataset));
                    succeeded += 1;
                }
                Some(Err(e)) => {
                    cache.set_error(tags_key, format!("{:#}", e));
                    first_error = first_error.or(Some(e));
                }
                None => {}
            }
        }

        if succeeded > 0 {
            self.persist_cache().await;
        }

        let success = first_error.is_none();
        self.listener.on_sync_finish(&library, success).await;

        match first_error {
            None => {
                info!(
                    "[Client] ✅ {} 同步完成 - 条目: {}（改动 {}，删除 {}），文件夹: {}，标签: {:?}",
                    library,
                    summary.items,
                    summary.modified_items,
                    summary.deleted_items,
                    summary.collections,
                    summary.tags
                );
                Ok(summary)
            }
            Some(e) => {
                error!("[Client] ❌ {} 同步未完全成功: {:#}", library, e);
                Err(e.context(format!("同步文库 {} 失败", library)))
            }
        }
    }

    /// 查询 API Key 权限（只缓存在内存中）
    pub async fn fetch_permissions(&self, api_key: &str) -> Result<KeyPermissions> {
        let key = QueryKey::new(QueryKind::Permissions, api_key);
        match self.syncer.api().fetch_permissions(api_key).await {
            Ok(permissions) => {
                self.queries
                    .write()
                    .await
                    .set_success(key, QueryData::Permissions(permissions.clone()));
                Ok(permissions)
            }
            Err(e) => {
                self.queries.write().await.set_error(key, format!("{:#}", e));
                Err(e)
            }
        }
    }

    /// 查询 DOI 的引用信息，成功结果在本次会话内复用
    pub async fn lookup_citations(&self, doi: &str) -> Result<SemanticPaper, ApiError> {
        let key = QueryKey::new(QueryKind::Semantic, normalize_doi(doi));
        {
            let cache = self.queries.read().await;
            if let (Some(QueryData::Semantic(paper)), false) =
                (cache.data(&key), cache.is_invalidated(&key))
            {
                debug!("[Client] 引用查询命中缓存: {}", key);
                return Ok(paper.clone());
            }
        }

        match self.semantic.lookup(doi).await {
            Ok(paper) => {
                self.queries
                    .write()
                    .await
                    .set_success(key, QueryData::Semantic(paper.clone()));
                Ok(paper)
            }
            Err(e) => {
                self.queries.write().await.set_error(key, e.to_string());
                Err(e)
            }
        }
    }

    /// 创建条目；有写入成功时让条目查询失效并重新同步该文库
    pub async fn create_items(
        &self,
        handle: &LibraryHandle,
        items: &[serde_json::Value],
    ) -> Vec<BatchOutcome> {
        let outcomes = self.writes.create_items(handle, items).await;
        self.refresh_after_write(handle, &outcomes).await;
        outcomes
    }

    /// 更新条目；有写入成功时让条目查询失效并重新同步该文库
    pub async fn update_items(
        &self,
        handle: &LibraryHandle,
        items: &[serde_json::Value],
    ) -> Vec<BatchOutcome> {
        let outcomes = self.writes.update_items(handle, items).await;
        self.refresh_after_write(handle, &outcomes).await;
        outcomes
    }

    /// 删除标签，版本前提取自本地最新的水位
    pub async fn delete_tags(&self, handle: &LibraryHandle, tags: &[String]) -> Result<u64> {
        let library = handle.path();
        let version = {
            let cache = self.queries.read().await;
            let scope = library.to_string();
            let items = cache
                .records(&QueryKey::new(QueryKind::Items, scope.clone()))
                .map_or(0, |d| d.last_updated);
            let tag_version = cache
                .tags(&QueryKey::new(QueryKind::Tags, scope))
                .map_or(0, |d| d.last_updated);
            items.max(tag_version)
        };

        let deletion = self.writes.delete_tags(handle, tags, version).await;

        // 部分批次失败时，已成功的批次同样改变了服务端
        if deletion.any_succeeded() {
            self.queries
                .write()
                .await
                .invalidate(&QueryKey::new(QueryKind::Tags, library.to_string()));
            if let Err(e) = self.sync_library(handle).await {
                warn!("[Client] 删除标签后重新同步失败: {:#}", e);
            }
        }
        deletion
            .into_result()
            .with_context(|| format!("删除 {} 的标签失败", library))
    }

    pub async fn fetch_bibliography(
        &self,
        handle: &LibraryHandle,
        keys: &[String],
        style: &str,
    ) -> Vec<Result<Vec<BibEntry>, ApiError>> {
        self.writes.fetch_bibliography(handle, keys, style).await
    }

    /// 清空内存查询缓存并删除快照
    pub async fn clear_cache(&self) {
        self.queries.write().await.clear();
        if let Some(store) = &self.store {
            store.remove().await;
        }
        info!("[Client] 🧹 缓存已清空");
    }

    /// 清空内存查询缓存并删除整个缓存数据库
    pub async fn delete_database(&self) {
        self.queries.write().await.clear();
        if let Some(store) = &self.store {
            store.delete_database().await;
        }
    }

    async fn refresh_after_write(&self, handle: &LibraryHandle, outcomes: &[BatchOutcome]) {
        let changed = outcomes
            .iter()
            .any(|o| o.as_ref().is_ok_and(|resp| resp.has_changes()));
        if !changed {
            return;
        }

        let key = QueryKey::new(QueryKind::Items, handle.path().to_string());
        self.queries.write().await.invalidate(&key);
        if let Err(e) = self.sync_library(handle).await {
            warn!("[Client] 写入后重新同步 {} 失败: {:#}", handle.path(), e);
        }
    }
}

fn records_data(result: SyncResult<Record>) -> QueryData {
    QueryData::Records(Dataset {
        data: result.data,
        last_updated: result.last_updated,
    })
}
