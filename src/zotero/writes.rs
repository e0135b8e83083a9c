//! 写入网关
//!
//! 条目的创建与更新、标签删除、参考文献格式化读取。写入按固定大小分批，
//! 每批的结果单独返回，一批失败不影响其他批次。

use crate::zotero::error::ApiError;
use crate::zotero::remote::HttpMethod;
use crate::zotero::serialization::{deserialize_index_map, generate_write_token};
use crate::zotero::sync::LibraryApi;
use crate::zotero::types::LibraryHandle;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// 单次写请求的条目上限
pub const WRITE_BATCH_SIZE: usize = 50;
/// 单次读取参考文献的条目上限
pub const READ_BATCH_SIZE: usize = 100;

/// 写请求中单个对象的失败原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteFailure {
    #[serde(default)]
    pub key: Option<String>,
    pub code: u16,
    #[serde(default)]
    pub message: String,
}

/// `POST {library}/items` 的响应，key 为请求数组中的下标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResponse {
    #[serde(default, deserialize_with = "deserialize_index_map")]
    pub successful: BTreeMap<usize, serde_json::Value>,
    #[serde(default, deserialize_with = "deserialize_index_map")]
    pub success: BTreeMap<usize, String>,
    #[serde(default, deserialize_with = "deserialize_index_map")]
    pub unchanged: BTreeMap<usize, String>,
    #[serde(default, deserialize_with = "deserialize_index_map")]
    pub failed: BTreeMap<usize, WriteFailure>,
}

impl WriteResponse {
    pub fn has_changes(&self) -> bool {
        !self.success.is_empty()
    }
}

/// 单批写入的结果
pub type BatchOutcome = Result<WriteResponse, ApiError>;

/// 标签删除的结果
#[derive(Debug)]
pub struct TagDeletion {
    /// 每批的结果，成功时为该批之后的文库版本；失败的批次总是最后一项
    pub batches: Vec<Result<u64, ApiError>>,
    /// 最后一个成功批次之后的文库版本
    pub version: u64,
}

impl TagDeletion {
    pub fn any_succeeded(&self) -> bool {
        self.batches.iter().any(Result::is_ok)
    }

    /// 全部成功时返回最终版本，否则返回失败批次的错误
    pub fn into_result(self) -> Result<u64, ApiError> {
        match self.batches.into_iter().find_map(Result::err) {
            Some(e) => Err(e),
            None => Ok(self.version),
        }
    }
}

/// 格式化后的参考文献
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibEntry {
    pub key: String,
    #[serde(default)]
    pub bib: String,
    #[serde(default)]
    pub citation: String,
}

/// 写入网关
#[derive(Clone)]
pub struct WriteGateway {
    api: LibraryApi,
}

impl WriteGateway {
    pub fn new(api: LibraryApi) -> Self {
        Self { api }
    }

    /// 创建条目
    pub async fn create_items(
        &self,
        handle: &LibraryHandle,
        items: &[serde_json::Value],
    ) -> Vec<BatchOutcome> {
        self.write_items(handle, items, "create").await
    }

    /// 更新条目，每个对象需带 `key` 和 `version`
    pub async fn update_items(
        &self,
        handle: &LibraryHandle,
        items: &[serde_json::Value],
    ) -> Vec<BatchOutcome> {
        self.write_items(handle, items, "update").await
    }

    async fn write_items(
        &self,
        handle: &LibraryHandle,
        items: &[serde_json::Value],
        action: &str,
    ) -> Vec<BatchOutcome> {
        if items.is_empty() {
            return Vec::new();
        }
        info!(
            "[WriteGateway] ✏️ {} {} 个条目到 {}，共 {} 批",
            action,
            items.len(),
            handle.path(),
            items.len().div_ceil(WRITE_BATCH_SIZE)
        );

        let requests = items.chunks(WRITE_BATCH_SIZE).enumerate().map(|(i, batch)| {
            let request = self
                .api
                .library_request(handle, HttpMethod::Post, "items")
                .header("Zotero-Write-Token", generate_write_token())
                .json_body(serde_json::Value::Array(batch.to_vec()));
            async move {
                let outcome = match self.api.client().execute(request).await {
                    Ok(resp) => resp.json::<WriteResponse>(),
                    Err(e) => Err(e),
                };
                match &outcome {
                    Ok(resp) => {
                        debug!(
                            "[WriteGateway] 第 {} 批完成 - 成功: {}, 未变: {}, 失败: {}",
                            i + 1,
                            resp.success.len(),
                            resp.unchanged.len(),
                            resp.failed.len()
                        );
                        for (index, failure) in &resp.failed {
                            warn!(
                                "[WriteGateway] 第 {} 批第 {} 个对象写入失败: {} {}",
                                i + 1,
                                index,
                                failure.code,
                                failure.message
                            );
                        }
                    }
                    Err(e) => error!("[WriteGateway] 第 {} 批写入失败: {}", i + 1, e),
                }
                outcome
            }
        });

        join_all(requests).await
    }

    /// 删除标签
    ///
    /// 每批都带 `If-Unmodified-Since-Version`；批次顺序执行，下一批使用上一批返回的新版本。
    /// 遇到第一个失败即停止，已成功批次的结果照常返回。
    pub async fn delete_tags(
        &self,
        handle: &LibraryHandle,
        tags: &[String],
        last_version: u64,
    ) -> TagDeletion {
        let mut deletion = TagDeletion {
            batches: Vec::new(),
            version: last_version,
        };
        for (i, batch) in tags.chunks(WRITE_BATCH_SIZE).enumerate() {
            let request = self
                .api
                .library_request(handle, HttpMethod::Delete, "tags")
                .query("tag", batch.join(" || "))
                .header("If-Unmodified-Since-Version", deletion.version);

            match self.api.client().execute(request).await {
                Ok(resp) => {
                    deletion.version = resp
                        .header_u64("Last-Modified-Version")
                        .unwrap_or(deletion.version);
                    debug!(
                        "[WriteGateway] 第 {} 批删除 {} 个标签，文库版本 -> {}",
                        i + 1,
                        batch.len(),
                        deletion.version
                    );
                    deletion.batches.push(Ok(deletion.version));
                }
                Err(e) => {
                    error!(
                        "[WriteGateway] ❌ 第 {} 批标签删除失败（版本 {}）: {}",
                        i + 1,
                        deletion.version,
                        e
                    );
                    deletion.batches.push(Err(e));
                    return deletion;
                }
            }
        }
        info!(
            "[WriteGateway] 🗑️ {} 删除 {} 个标签完成",
            handle.path(),
            tags.len()
        );
        deletion
    }

    /// 读取格式化后的参考文献
    pub async fn fetch_bibliography(
        &self,
        handle: &LibraryHandle,
        keys: &[String],
        style: &str,
    ) -> Vec<Result<Vec<BibEntry>, ApiError>> {
        let requests = keys.chunks(READ_BATCH_SIZE).map(|batch| {
            let request = self
                .api
                .library_request(handle, HttpMethod::Get, "items")
                .query("itemKey", batch.join(","))
                .query("include", "bib,citation")
                .query("style", style);
            async move {
                let resp = self.api.client().execute(request).await?;
                resp.json::<Vec<BibEntry>>()
            }
        });

        let results = join_all(requests).await;
        debug!(
            "[WriteGateway] {} 的参考文献读取完成，{} 批中 {} 批成功",
            handle.path(),
            results.len(),
            results.iter().filter(|r| r.is_ok()).count()
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zotero::testing::{json_response, status_response, zotero_client, MockTransport};
    use crate::zotero::types::LibraryPath;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn handle() -> LibraryHandle {
        LibraryHandle::new("KEY", LibraryPath::users(1))
    }

    fn gateway(transport: Arc<MockTransport>) -> WriteGateway {
        WriteGateway::new(LibraryApi::new(zotero_client(transport)))
    }

    fn items(n: usize) -> Vec<serde_json::Value> {
        (0..n)
            .map(|i| serde_json::json!({ "itemType": "book", "title": format!("Book {i}") }))
            .collect()
    }

    #[tokio::test]
    async fn items_are_written_in_batches_with_distinct_tokens() {
        // 最后一批（20 个）被服务器拒绝
        let transport = Arc::new(MockTransport::new(|req| {
            let len = req.body.as_ref().and_then(|b| b.as_array()).map_or(0, Vec::len);
            if len == 20 {
                return Ok(status_response(400, &[]));
            }
            let success: serde_json::Map<String, serde_json::Value> = (0..len)
                .map(|i| (i.to_string(), serde_json::Value::String(format!("NEW{i}"))))
                .collect();
            Ok(json_response(
                200,
                serde_json::json!({ "successful": {}, "success": success, "unchanged": {}, "failed": {} }),
                &[],
            ))
        }));
        let gateway = gateway(transport.clone());

        let outcomes = gateway.create_items(&handle(), &items(120)).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].as_ref().unwrap().success.len(), 50);
        assert!(outcomes[1].as_ref().unwrap().has_changes());
        assert!(matches!(outcomes[2], Err(ApiError::Status { status: 400, .. })));

        let tokens: HashSet<String> = transport
            .requests()
            .iter()
            .map(|r| r.header_value("Zotero-Write-Token").unwrap().to_string())
            .collect();
        assert_eq!(tokens.len(), 3);
    }

    #[tokio::test]
    async fn empty_write_sends_nothing() {
        let transport = Arc::new(MockTransport::ok_empty());
        let gateway = gateway(transport.clone());

        assert!(gateway.update_items(&handle(), &[]).await.is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn tag_deletion_chains_library_versions() {
        let transport = Arc::new(MockTransport::new(|req| {
            let version: u64 = req
                .header_value("If-Unmodified-Since-Version")
                .unwrap()
                .parse()
                .unwrap();
            let next = (version + 1).to_string();
            Ok(status_response(204, &[("Last-Modified-Version", next.as_str())]))
        }));
        let gateway = gateway(transport.clone());
        let tags: Vec<String> = (0..60).map(|i| format!("tag{i}")).collect();

        let version = gateway.delete_tags(&handle(), &tags, 41).await.into_result().unwrap();
        assert_eq!(version, 43);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].header_value("If-Unmodified-Since-Version"), Some("41"));
        assert_eq!(requests[1].header_value("If-Unmodified-Since-Version"), Some("42"));
        assert!(requests[0].query_value("tag").unwrap().starts_with("tag0 || tag1 || "));
        assert_eq!(requests[1].query_value("tag").unwrap().split(" || ").count(), 10);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let transport = Arc::new(MockTransport::new(|_req| Ok(status_response(412, &[]))));
        let gateway = gateway(transport.clone());

        let deletion = gateway
            .delete_tags(&handle(), &["a".to_string(), "b".to_string()], 7)
            .await;
        assert!(!deletion.any_succeeded());
        let err = deletion.into_result().unwrap_err();
        match err {
            ApiError::VersionConflict {
                url,
                expected_version,
            } => {
                assert_eq!(url, "https://api.zotero.test/users/1/tags");
                assert_eq!(expected_version, Some(7));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn failed_batch_keeps_earlier_successes() {
        let transport = Arc::new(MockTransport::new(|req| {
            match req.header_value("If-Unmodified-Since-Version") {
                Some("100") => Ok(status_response(204, &[("Last-Modified-Version", "101")])),
                _ => Ok(status_response(412, &[])),
            }
        }));
        let gateway = gateway(transport.clone());
        let tags: Vec<String> = (0..60).map(|i| format!("tag{i}")).collect();

        let deletion = gateway.delete_tags(&handle(), &tags, 100).await;
        assert_eq!(transport.request_count(), 2);
        assert_eq!(deletion.batches.len(), 2);
        assert!(matches!(deletion.batches[0], Ok(101)));
        assert!(matches!(
            deletion.batches[1],
            Err(ApiError::VersionConflict { expected_version: Some(101), .. })
        ));
        assert!(deletion.any_succeeded());
        assert_eq!(deletion.version, 101);
        assert!(deletion.into_result().is_err());
    }

    #[tokio::test]
    async fn bibliography_is_read_in_batches_of_one_hundred() {
        let transport = Arc::new(MockTransport::new(|req| {
            let entries: Vec<_> = req
                .query_value("itemKey")
                .unwrap()
                .split(',')
                .map(|k| serde_json::json!({ "key": k, "bib": format!("<div>{k}</div>"), "citation": "(Doe)" }))
                .collect();
            Ok(json_response(200, serde_json::Value::Array(entries), &[]))
        }));
        let gateway = gateway(transport.clone());
        let keys: Vec<String> = (0..150).map(|i| format!("K{i}")).collect();

        let results = gateway.fetch_bibliography(&handle(), &keys, "apa").await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().len(), 100);
        assert_eq!(results[1].as_ref().unwrap().len(), 50);
        for req in transport.requests() {
            assert_eq!(req.query_value("include"), Some("bib,citation"));
            assert_eq!(req.query_value("style"), Some("apa"));
        }
    }
}
