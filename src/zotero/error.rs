//! 错误类型
//!
//! 服务层统一使用 `anyhow::Result`；调用方需要区分处理的错误在这里定义，
//! 通过 `anyhow::Error::downcast_ref` 取回。

use thiserror::Error;

/// 远端接口错误
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 请求未能完成（连接失败、超时、读取 body 失败等）
    #[error("请求失败: {0}")]
    Transport(String),

    /// 资源不存在，永久性错误，不重试
    #[error("资源不存在: {url}")]
    NotFound { url: String },

    /// 乐观并发校验失败（HTTP 412），需要重新同步后再写入
    #[error("版本冲突: 本地版本 {expected_version:?} 已过期 ({url})")]
    VersionConflict {
        url: String,
        expected_version: Option<u64>,
    },

    /// 被限流（HTTP 429），重试次数用尽后返回
    #[error("请求被限流: {url}")]
    RateLimited { url: String },

    /// 其他非 2xx 响应
    #[error("HTTP 错误 {status}: {body}")]
    Status { status: u16, body: String },

    /// 响应反序列化失败或缺少必需的响应头
    #[error("解析响应失败: {0}")]
    Decode(String),
}

impl ApiError {
    /// 是否值得自动重试
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::RateLimited { .. } => true,
            ApiError::Status { status, .. } => *status >= 500,
            ApiError::NotFound { .. } | ApiError::VersionConflict { .. } | ApiError::Decode(_) => {
                false
            }
        }
    }
}

/// 标签索引的数据完整性错误，属于编程错误，不做静默修正
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagIndexError {
    #[error("标签缺少 type 字段: {tag:?}")]
    MissingTagType { tag: String },

    #[error("标签 type 取值非法 ({tag_type}): {tag:?}")]
    InvalidTagType { tag: String, tag_type: u8 },

    #[error("标签映射中 {key:?} 的条目为空数组")]
    EmptyEntry { key: String },

    #[error("字典输入中包含空字符串（下标 {index}）")]
    EmptyTagString { index: usize },

    #[error("标签 {tag:?} 不在标签映射中")]
    UnknownTag { tag: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ApiError::Transport("reset".into()).is_retryable());
        assert!(ApiError::RateLimited { url: "u".into() }.is_retryable());
        assert!(ApiError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());

        assert!(!ApiError::Status {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!ApiError::NotFound { url: "u".into() }.is_retryable());
        assert!(!ApiError::VersionConflict {
            url: "u".into(),
            expected_version: Some(3)
        }
        .is_retryable());
    }
}
