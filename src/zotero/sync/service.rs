//! 增量同步服务层
//!
//! 同步函数不修改传入的本地数据：合并在快照副本上完成，失败时调用方的数据原样保留。

use crate::zotero::merge::{merge_update, MergeOptions, Mergeable, Update};
use crate::zotero::sync::api::LibraryApi;
use crate::zotero::sync::listener::{EmptySyncListener, SyncListener};
use crate::zotero::sync::models::{SyncResult, TagDataset};
use crate::zotero::tags::make_tag_list;
use crate::zotero::types::{LibraryHandle, Record, ResourceKind, Tag};
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 文库同步器
pub struct LibrarySyncer {
    api: LibraryApi,
    listener: Arc<dyn SyncListener>,
}

impl LibrarySyncer {
    /// 创建新的同步器（使用默认空监听器）
    pub fn new(api: LibraryApi) -> Self {
        Self::with_listener(api, Arc::new(EmptySyncListener))
    }

    /// 创建新的同步器（带自定义监听器）
    pub fn with_listener(api: LibraryApi, listener: Arc<dyn SyncListener>) -> Self {
        Self { api, listener }
    }

    pub fn api(&self) -> &LibraryApi {
        &self.api
    }

    pub fn listener(&self) -> &Arc<dyn SyncListener> {
        &self.listener
    }

    /// 增量同步条目，合并前提取 citekey
    pub async fn sync_items(
        &self,
        handle: &LibraryHandle,
        since: u64,
        existing: &[Record],
    ) -> Result<SyncResult<Record>> {
        self.sync_resource(
            handle,
            ResourceKind::Items,
            since,
            existing,
            MergeOptions { with_alias: true },
        )
        .await
    }

    /// 增量同步文件夹
    pub async fn sync_collections(
        &self,
        handle: &LibraryHandle,
        since: u64,
        existing: &[Record],
    ) -> Result<SyncResult<Record>> {
        self.sync_resource(
            handle,
            ResourceKind::Collections,
            since,
            existing,
            MergeOptions::default(),
        )
        .await
    }

    /// 增量同步标签并重建索引
    pub async fn sync_tags(
        &self,
        handle: &LibraryHandle,
        since: u64,
        existing: &[Tag],
    ) -> Result<TagDataset> {
        let result = self
            .sync_resource(
                handle,
                ResourceKind::Tags,
                since,
                existing,
                MergeOptions::default(),
            )
            .await?;

        let index = match make_tag_list(result.data.iter().cloned()) {
            Ok(index) => index,
            Err(e) => {
                error!("[TagSync] {} 的标签索引构建失败: {}", handle.path(), e);
                self.listener
                    .on_update_failed(ResourceKind::Tags, handle.path(), e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        debug!(
            "[TagSync] {} 标签索引共 {} 个首字母桶",
            handle.path(),
            index.len()
        );
        Ok(TagDataset {
            tags: result.data,
            index,
            last_updated: result.last_updated,
        })
    }

    /// 单一资源的同步流程，负责通知监听器
    async fn sync_resource<T>(
        &self,
        handle: &LibraryHandle,
        kind: ResourceKind,
        since: u64,
        existing: &[T],
        opts: MergeOptions,
    ) -> Result<SyncResult<T>>
    where
        T: Mergeable + DeserializeOwned + Serialize + Send + Sync,
    {
        info!(
            "[{}Sync] 🔄 开始同步 {}，since={}，本地 {} 条",
            kind,
            handle.path(),
            since,
            existing.len()
        );

        match self.fetch_and_merge(handle, kind, since, existing, opts).await {
            Ok(result) => {
                if !result.modified.is_empty() {
                    match serde_json::to_string(&result.modified) {
                        Ok(json) => self.listener.on_update(kind, handle.path(), json).await,
                        Err(e) => error!("[{}Sync] 序列化改动失败: {}", kind, e),
                    }
                }
                info!(
                    "[{}Sync] ✅ {} 同步完成 - 改动: {}, 删除: {}, 合计: {}, 水位: {} -> {}",
                    kind,
                    handle.path(),
                    result.modified.len(),
                    result.deleted.len(),
                    result.data.len(),
                    since,
                    result.last_updated
                );
                Ok(result)
            }
            Err(e) => {
                error!("[{}Sync] ❌ {} 同步失败: {:?}", kind, handle.path(), e);
                self.listener
                    .on_update_failed(kind, handle.path(), format!("{:#}", e))
                    .await;
                Err(e)
            }
        }
    }

    async fn fetch_and_merge<T>(
        &self,
        handle: &LibraryHandle,
        kind: ResourceKind,
        since: u64,
        existing: &[T],
        opts: MergeOptions,
    ) -> Result<SyncResult<T>>
    where
        T: Mergeable + DeserializeOwned,
    {
        let page = self.api.fetch_modified::<T>(handle, kind, since).await?;
        let last_updated = page.last_modified_version.unwrap_or(since);

        let modified: Vec<T> = if opts.with_alias {
            page.data.into_iter().map(T::apply_alias).collect()
        } else {
            page.data
        };

        // since == 0 时删除流必然为空；没有改动时也不查询
        let deleted = if since > 0 && !modified.is_empty() {
            self.api.fetch_deleted(handle, since).await?.take(kind)
        } else {
            Vec::new()
        };

        // 别名已在上面提取过
        let data = merge_update(
            Update::new(modified.clone(), deleted.clone()),
            existing.to_vec(),
            MergeOptions::default(),
        );

        Ok(SyncResult {
            data,
            modified,
            deleted,
            last_updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zotero::error::ApiError;
    use crate::zotero::testing::{
        init_test_logger, item_json, json_response, zotero_client, MockTransport,
        RecordingListener,
    };
    use crate::zotero::types::LibraryPath;

    fn handle() -> LibraryHandle {
        LibraryHandle::new("KEY", LibraryPath::users(1111))
    }

    fn syncer(transport: Arc<MockTransport>, listener: Arc<RecordingListener>) -> LibrarySyncer {
        LibrarySyncer::with_listener(LibraryApi::new(zotero_client(transport)), listener)
    }

    fn records(keys: &[&str], version: u64) -> Vec<Record> {
        keys.iter()
            .map(|k| serde_json::from_value(item_json(k, version)).unwrap())
            .collect()
    }

    /// 初次同步：150 条、两页；增量同步：3 条改动 + 删除 K7
    fn library_server(fail_second_page: bool) -> MockTransport {
        MockTransport::new(move |req| {
            let since: u64 = req
                .query_value("since")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if req.url.ends_with("/deleted") {
                return Ok(json_response(
                    200,
                    serde_json::json!({ "items": ["K7"], "collections": [], "tags": [], "searches": [] }),
                    &[],
                ));
            }
            if since == 0 {
                let start: u64 = req.query_value("start").unwrap().parse().unwrap();
                if start == 100 && fail_second_page {
                    return Ok(json_response(500, serde_json::json!({}), &[]));
                }
                let end = (start + 100).min(150);
                let items: Vec<_> = (start..end).map(|i| item_json(&format!("K{i}"), 400)).collect();
                return Ok(json_response(
                    200,
                    serde_json::Value::Array(items),
                    &[("Total-Results", "150"), ("Last-Modified-Version", "500")],
                ));
            }
            Ok(json_response(
                200,
                serde_json::json!([item_json("K3", 510), item_json("NEW1", 510), item_json("NEW2", 505)]),
                &[("Total-Results", "3"), ("Last-Modified-Version", "510")],
            ))
        })
    }

    #[tokio::test]
    async fn initial_then_incremental_item_sync() {
        init_test_logger();
        let transport = Arc::new(library_server(false));
        let listener = Arc::new(RecordingListener::default());
        let syncer = syncer(transport.clone(), listener.clone());

        let initial = syncer.sync_items(&handle(), 0, &[]).await.unwrap();
        assert_eq!(initial.data.len(), 150);
        assert_eq!(initial.last_updated, 500);
        assert!(transport.requests_to("/deleted").is_empty());

        let delta = syncer
            .sync_items(&handle(), initial.last_updated, &initial.data)
            .await
            .unwrap();
        // 150 - K7 + NEW1 + NEW2（K3 原位替换）
        assert_eq!(delta.data.len(), 151);
        assert_eq!(delta.last_updated, 510);
        assert_eq!(delta.deleted, vec!["K7"]);
        assert!(delta.data.iter().all(|r| r.server_key() != "K7"));
        let k3 = delta.data.iter().find(|r| r.server_key() == "K3").unwrap();
        assert_eq!(k3.version, 510);
        assert_eq!(transport.requests_to("/deleted").len(), 1);

        let updates = listener.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].0, ResourceKind::Items);
    }

    #[tokio::test]
    async fn no_modifications_skip_the_deletion_feed() {
        let transport = Arc::new(MockTransport::new(|_req| {
            Ok(json_response(
                200,
                serde_json::json!([]),
                &[("Total-Results", "0"), ("Last-Modified-Version", "500")],
            ))
        }));
        let listener = Arc::new(RecordingListener::default());
        let syncer = syncer(transport.clone(), listener.clone());
        let existing = records(&["A", "B"], 400);

        let result = syncer.sync_collections(&handle(), 500, &existing).await.unwrap();
        assert_eq!(result.data, existing);
        assert!(transport.requests_to("/deleted").is_empty());
        assert!(listener.updates().is_empty());
    }

    #[tokio::test]
    async fn failed_page_leaves_dataset_untouched() {
        let transport = Arc::new(library_server(true));
        let listener = Arc::new(RecordingListener::default());
        let syncer = syncer(transport, listener.clone());
        let existing = records(&["OLD1", "OLD2"], 100);
        let before = existing.clone();

        let err = syncer.sync_items(&handle(), 0, &existing).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::Status { status: 500, .. })
        ));
        assert_eq!(existing, before);
        assert_eq!(listener.failures().len(), 1);
        assert_eq!(listener.failures()[0].0, ResourceKind::Items);
    }

    #[tokio::test]
    async fn citekeys_are_extracted_during_item_sync() {
        let transport = Arc::new(MockTransport::new(|_req| {
            let mut item = item_json("ABCD", 3);
            item["data"]["extra"] = "Citation Key: doe2020".into();
            Ok(json_response(
                200,
                serde_json::json!([item]),
                &[("Total-Results", "1"), ("Last-Modified-Version", "3")],
            ))
        }));
        let syncer = syncer(transport, Arc::new(RecordingListener::default()));

        let result = syncer.sync_items(&handle(), 0, &[]).await.unwrap();
        assert_eq!(result.data[0].key, "doe2020");
        assert!(result.data[0].has_citekey);
        assert_eq!(result.data[0].server_key(), "ABCD");
    }

    #[tokio::test]
    async fn tag_sync_merges_and_indexes() {
        let transport = Arc::new(MockTransport::new(|req| {
            if req.url.ends_with("/deleted") {
                return Ok(json_response(
                    200,
                    serde_json::json!({ "items": [], "collections": [], "tags": ["old"], "searches": [] }),
                    &[],
                ));
            }
            Ok(json_response(
                200,
                serde_json::json!([
                    { "tag": "AI", "meta": { "type": 0, "numItems": 3 } },
                    { "tag": "AI", "meta": { "type": 1, "numItems": 1 } }
                ]),
                &[("Total-Results", "2"), ("Last-Modified-Version", "42")],
            ))
        }));
        let syncer = syncer(transport, Arc::new(RecordingListener::default()));
        let existing = vec![Tag::new("old", 0), Tag::new("biology", 0)];

        let tags = syncer.sync_tags(&handle(), 40, &existing).await.unwrap();
        assert_eq!(tags.last_updated, 42);
        assert_eq!(tags.tags.len(), 3);
        assert_eq!(tags.index["a"][0].token, "ai");
        assert_eq!(tags.index["a"][0].zotero.len(), 2);
        assert!(tags.index.contains_key("b"));
        assert!(!tags.index.contains_key("o"));
    }

    #[tokio::test]
    async fn malformed_tag_payload_is_reported() {
        let transport = Arc::new(MockTransport::new(|_req| {
            Ok(json_response(
                200,
                serde_json::json!([{ "tag": "AI", "meta": { "numItems": 3 } }]),
                &[("Total-Results", "1"), ("Last-Modified-Version", "1")],
            ))
        }));
        let listener = Arc::new(RecordingListener::default());
        let syncer = syncer(transport, listener.clone());

        let err = syncer.sync_tags(&handle(), 0, &[]).await.unwrap_err();
        assert!(err
            .downcast_ref::<crate::zotero::error::TagIndexError>()
            .is_some());
        assert_eq!(listener.failures().len(), 1);
    }
}
