//! 单元测试共用的假传输层和日志初始化

use crate::zotero::error::ApiError;
use crate::zotero::remote::{
    ApiRequest, ApiResponse, HttpTransport, RemoteClient, RemoteService, RetryPolicy,
};
use crate::zotero::sync::SyncListener;
use crate::zotero::types::{LibraryPath, ResourceKind};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

type Responder = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync>;

/// 记录所有请求、按闭包返回响应的传输层
pub(crate) struct MockTransport {
    responder: Responder,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub(crate) fn new(
        responder: impl Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 所有请求都返回 200 空数组
    pub(crate) fn ok_empty() -> Self {
        Self::new(|_req| Ok(json_response(200, serde_json::json!([]), &[])))
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// URL 以 `suffix` 结尾的请求
    pub(crate) fn requests_to(&self, suffix: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.ends_with(suffix))
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        // 让出一次调度，模拟真实的异步 I/O
        tokio::task::yield_now().await;
        (self.responder)(request)
    }
}

pub(crate) fn json_response(
    status: u16,
    body: serde_json::Value,
    headers: &[(&str, &str)],
) -> ApiResponse {
    let mut resp = status_response(status, headers);
    resp.body = serde_json::to_vec(&body).unwrap();
    resp
}

pub(crate) fn status_response(status: u16, headers: &[(&str, &str)]) -> ApiResponse {
    ApiResponse {
        status,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect(),
        body: Vec::new(),
    }
}

/// 不等待、可重试一次的 Zotero 客户端
pub(crate) fn zotero_client(transport: Arc<MockTransport>) -> RemoteClient {
    RemoteClient::new(
        RemoteService::Zotero,
        "https://api.zotero.test",
        transport,
        RetryPolicy {
            max_retries: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
    )
}

/// 生成一个最小的条目 JSON
pub(crate) fn item_json(key: &str, version: u64) -> serde_json::Value {
    serde_json::json!({
        "key": key,
        "version": version,
        "data": { "key": key, "version": version, "itemType": "journalArticle", "title": format!("Title {key}") }
    })
}

/// 记录所有回调的监听器
#[derive(Default)]
pub(crate) struct RecordingListener {
    started: Mutex<Vec<LibraryPath>>,
    finished: Mutex<Vec<(LibraryPath, bool)>>,
    updates: Mutex<Vec<(ResourceKind, LibraryPath, String)>>,
    failures: Mutex<Vec<(ResourceKind, LibraryPath, String)>>,
}

impl RecordingListener {
    pub(crate) fn started(&self) -> Vec<LibraryPath> {
        self.started.lock().unwrap().clone()
    }

    pub(crate) fn finished(&self) -> Vec<(LibraryPath, bool)> {
        self.finished.lock().unwrap().clone()
    }

    pub(crate) fn updates(&self) -> Vec<(ResourceKind, LibraryPath, String)> {
        self.updates.lock().unwrap().clone()
    }

    pub(crate) fn failures(&self) -> Vec<(ResourceKind, LibraryPath, String)> {
        self.failures.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncListener for RecordingListener {
    async fn on_sync_start(&self, library: &LibraryPath) {
        self.started.lock().unwrap().push(library.clone());
    }

    async fn on_sync_finish(&self, library: &LibraryPath, success: bool) {
        self.finished.lock().unwrap().push((library.clone(), success));
    }

    async fn on_update(&self, kind: ResourceKind, library: &LibraryPath, modified_json: String) {
        self.updates
            .lock()
            .unwrap()
            .push((kind, library.clone(), modified_json));
    }

    async fn on_update_failed(&self, kind: ResourceKind, library: &LibraryPath, error: String) {
        self.failures
            .lock()
            .unwrap()
            .push((kind, library.clone(), error));
    }
}

static INIT_LOGGER: Once = Once::new();

pub(crate) fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        // 测试中默认打开当前 crate 和 sqlx 的 debug，关闭底层 HTTP 客户端的 debug 噪音
        let filter_layer = EnvFilter::new(
            "info,zotero_sync_core_rust=debug,sqlx=warn,hyper_util::client=info,reqwest=info",
        );

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}
