//! 文库 HTTP API 客户端
//!
//! 负责所有读取类请求：按版本增量拉取资源、删除流、API Key 权限

use crate::zotero::pagination::{fetch_paginated, Page};
use crate::zotero::remote::{ApiRequest, HttpMethod, RemoteClient};
use crate::zotero::types::{DeletedKeys, KeyPermissions, LibraryHandle, ResourceKind};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Zotero Web API 版本
pub const ZOTERO_API_VERSION: &str = "3";

/// 文库相关的 HTTP API 客户端
#[derive(Clone)]
pub struct LibraryApi {
    client: RemoteClient,
}

impl LibraryApi {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    /// 构造带认证头的文库请求，`path` 相对于文库根路径
    pub fn library_request(
        &self,
        handle: &LibraryHandle,
        method: HttpMethod,
        path: &str,
    ) -> ApiRequest {
        let url = self.client.url(&format!(
            "{}/{}",
            handle.path(),
            path.trim_start_matches('/')
        ));
        ApiRequest::new(method, url)
            .header("Zotero-API-Version", ZOTERO_API_VERSION)
            .header("Zotero-API-Key", handle.api_key())
    }

    /// 拉取 `since` 之后有改动的资源（自动分页）
    pub async fn fetch_modified<T: DeserializeOwned>(
        &self,
        handle: &LibraryHandle,
        kind: ResourceKind,
        since: u64,
    ) -> Result<Page<T>> {
        info!(
            "[LibraryAPI] 📡 请求 {} 的 {}，since={}",
            handle.path(),
            kind,
            since
        );
        let template = self
            .library_request(handle, HttpMethod::Get, kind.as_str())
            .query("since", since);

        let page = fetch_paginated(&self.client, &template)
            .await
            .with_context(|| format!("拉取 {} 的 {} 失败", handle.path(), kind))?;

        debug!(
            "[LibraryAPI] {} 的 {} 共 {} 条改动，Last-Modified-Version={:?}",
            handle.path(),
            kind,
            page.data.len(),
            page.last_modified_version
        );
        Ok(page)
    }

    /// 拉取 `since` 之后被删除的 key 列表
    pub async fn fetch_deleted(&self, handle: &LibraryHandle, since: u64) -> Result<DeletedKeys> {
        info!(
            "[LibraryAPI] 📡 请求 {} 的删除记录，since={}",
            handle.path(),
            since
        );
        let request = self
            .library_request(handle, HttpMethod::Get, "deleted")
            .query("since", since);

        let resp = self
            .client
            .execute(request)
            .await
            .with_context(|| format!("拉取 {} 的删除记录失败", handle.path()))?;
        let deleted: DeletedKeys = resp.json()?;

        debug!(
            "[LibraryAPI] {} 删除记录 - 条目: {}, 文件夹: {}, 标签: {}",
            handle.path(),
            deleted.items.len(),
            deleted.collections.len(),
            deleted.tags.len()
        );
        Ok(deleted)
    }

    /// 查询 API Key 的权限
    pub async fn fetch_permissions(&self, api_key: &str) -> Result<KeyPermissions> {
        info!("[LibraryAPI] 📡 请求 API Key 权限");
        let request = ApiRequest::get(self.client.url(&format!("keys/{}", api_key)))
            .header("Zotero-API-Version", ZOTERO_API_VERSION);

        let resp = self
            .client
            .execute(request)
            .await
            .context("查询 API Key 权限失败")?;
        Ok(resp.json()?)
    }
}
