//! 分页拉取
//!
//! Zotero 每页最多返回 100 条。先请求第一页拿到 `Total-Results`，
//! 剩余页面并发请求，全部完成后再拼接；任意一页失败则整体失败。

use crate::zotero::error::ApiError;
use crate::zotero::remote::{ApiRequest, RemoteClient};
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

/// 每页条数（服务器上限）
pub const PAGE_SIZE: u64 = 100;

/// 完整的拉取结果
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total_results: u64,
    /// 第一页响应中的 `Last-Modified-Version`
    pub last_modified_version: Option<u64>,
}

/// 拉取 `template` 描述的资源的全部结果
///
/// `template` 已包含 URL、认证头和 `since` 等过滤参数，这里只追加 `start` / `limit`。
pub async fn fetch_paginated<T: DeserializeOwned>(
    client: &RemoteClient,
    template: &ApiRequest,
) -> Result<Page<T>, ApiError> {
    let first = client.execute(page_request(template, 0)).await?;
    let mut data: Vec<T> = first.json()?;
    let fetched = data.len() as u64;
    let total_results = first.header_u64("Total-Results").unwrap_or(fetched);
    let last_modified_version = first.header_u64("Last-Modified-Version");

    debug!(
        "[Pagination] {} 第一页 {} 条，共 {} 条",
        template.url, fetched, total_results
    );

    if total_results > fetched {
        let extra_pages = (total_results - fetched).div_ceil(PAGE_SIZE);
        info!(
            "[Pagination] {} 需要额外并发请求 {} 页",
            template.url, extra_pages
        );

        let requests = (0..extra_pages).map(|i| {
            let req = page_request(template, fetched + i * PAGE_SIZE);
            async move {
                let resp = client.execute(req).await?;
                resp.json::<Vec<T>>()
            }
        });

        // 等待所有页面完成，不提前取消其余请求
        let results = join_all(requests).await;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(page) => data.extend(page),
                Err(e) => {
                    error!(
                        "[Pagination] {} 第 {} 个后续分页失败，整体放弃: {}",
                        template.url,
                        i + 1,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    Ok(Page {
        data,
        total_results,
        last_modified_version,
    })
}

fn page_request(template: &ApiRequest, start: u64) -> ApiRequest {
    template
        .clone()
        .query("start", start)
        .query("limit", PAGE_SIZE)
}
