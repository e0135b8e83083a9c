//! 带重试的 HTTP 客户端
//!
//! 每个远端服务（Zotero 文库 API、Semantic Scholar 引用查询 API）各有一套重试策略。
//! 真正的网络请求通过 [`HttpTransport`] 发出，默认实现基于 reqwest。

use crate::zotero::error::ApiError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        })
    }
}

/// 待发送的请求
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Post, url).json_body(body)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// 查询参数的值（取第一个同名参数）
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// 请求头的值（不区分大小写）
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// 已收到的响应；响应头名统一为小写
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 解析为整数的响应头，如 `Total-Results`、`Last-Modified-Version`
    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.header(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            error!(
                "[Remote] 反序列化失败: {:?}\n原始响应: {}",
                e,
                self.body_text()
            );
            ApiError::Decode(e.to_string())
        })
    }

    /// 服务器要求的等待时间（`Retry-After` 或 Zotero 的 `Backoff`，单位秒）
    fn server_delay(&self) -> Option<Duration> {
        self.header_u64("retry-after")
            .or_else(|| self.backoff())
            .map(Duration::from_secs)
    }

    /// Zotero 在成功响应上也可能带 `Backoff`，要求客户端暂停后续请求
    fn backoff(&self) -> Option<u64> {
        self.header_u64("backoff").filter(|secs| *secs > 0)
    }
}

/// 发送 HTTP 请求的底层通道
///
/// 只有请求本身没有完成时才返回 `Err`；非 2xx 响应以 `Ok` 返回，由 [`RemoteClient`] 分类。
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// 基于 reqwest 的默认实现
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// 创建传输层；`timeout` 为 None 时不设置超时
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::ClientBuilder::new();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("创建 HTTP 客户端失败")?;
        Ok(Self { client })
    }

    /// 使用外部已配置好的 reqwest 客户端
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(format!("读取响应 body 失败: {}", e)))?
            .to_vec();

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// 重试策略：指数退避，优先使用服务器给出的等待时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// 第 `attempt` 次重试前的等待时间（从 0 开始计数）
    pub fn delay_for(&self, attempt: u32, server_delay: Option<Duration>) -> Duration {
        if let Some(delay) = server_delay {
            return delay;
        }
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// 远端服务
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteService {
    Zotero,
    SemanticScholar,
}

impl RemoteService {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteService::Zotero => "zotero",
            RemoteService::SemanticScholar => "semantic",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            RemoteService::Zotero => "https://api.zotero.org",
            RemoteService::SemanticScholar => "https://api.semanticscholar.org",
        }
    }

    pub fn default_policy(&self) -> RetryPolicy {
        match self {
            RemoteService::Zotero => RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(10),
            },
            RemoteService::SemanticScholar => RetryPolicy {
                max_retries: 1,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(5),
            },
        }
    }
}

/// 某个远端服务的客户端
#[derive(Clone)]
pub struct RemoteClient {
    service: RemoteService,
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    /// 服务器要求暂停到的时间点，所有克隆共享
    paused_until: Arc<Mutex<Option<Instant>>>,
}

impl RemoteClient {
    pub fn new(
        service: RemoteService,
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
            policy,
            paused_until: Arc::new(Mutex::new(None)),
        }
    }

    pub fn service(&self) -> RemoteService {
        self.service
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// 距离服务器要求的暂停结束还有多久
    pub fn backoff_remaining(&self) -> Option<Duration> {
        let until = (*self.paused_until.lock().ok()?)?;
        let remaining = until.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }

    fn pause_for(&self, secs: u64) {
        if let Ok(mut until) = self.paused_until.lock() {
            let next = Instant::now() + Duration::from_secs(secs);
            if until.map_or(true, |current| current < next) {
                *until = Some(next);
            }
        }
    }

    /// 拼接完整 URL
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// 发送请求，按策略重试；返回的一定是 2xx 响应
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let name = self.service.name();
        let mut attempt = 0u32;
        loop {
            debug!(
                "[Remote/{}] {} {} (第 {} 次尝试)",
                name,
                request.method,
                request.url,
                attempt + 1
            );

            if let Some(wait) = self.backoff_remaining() {
                warn!("[Remote/{}] 服务器要求暂停，{:?} 后继续", name, wait);
                tokio::time::sleep(wait).await;
            }

            let (err, server_delay) = match self.transport.send(&request).await {
                Ok(resp) if resp.is_success() => {
                    if let Some(secs) = resp.backoff() {
                        debug!("[Remote/{}] 收到 Backoff: {} 秒", name, secs);
                        self.pause_for(secs);
                    }
                    return Ok(resp);
                }
                Ok(resp) => (classify_status(&request, &resp), resp.server_delay()),
                Err(e) => (e, None),
            };

            if !err.is_retryable() || attempt >= self.policy.max_retries {
                error!(
                    "[Remote/{}] {} {} 失败，不再重试: {}",
                    name, request.method, request.url, err
                );
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt, server_delay);
            warn!(
                "[Remote/{}] {} {} 失败: {}，{:?} 后重试",
                name, request.method, request.url, err, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// 将非 2xx 响应归类为 [`ApiError`]
fn classify_status(request: &ApiRequest, response: &ApiResponse) -> ApiError {
    match response.status {
        404 => ApiError::NotFound {
            url: request.url.clone(),
        },
        412 => ApiError::VersionConflict {
            url: request.url.clone(),
            expected_version: request
                .header_value("If-Unmodified-Since-Version")
                .and_then(|v| v.parse().ok()),
        },
        429 => ApiError::RateLimited {
            url: request.url.clone(),
        },
        status => ApiError::Status {
            status,
            body: response.body_text(),
        },
    }
}
