//! 文库、条目、标签等公共数据结构
//!
//! 字段命名与 Zotero Web API v3 的 JSON 保持一致，可直接从接口响应反序列化。

use crate::zotero::serialization::deserialize_vec_or_null;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 文库所有者类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Users,
    Groups,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Users => "users",
            OwnerKind::Groups => "groups",
        }
    }
}

/// 文库路径，例如 `users/1111`、`groups/2222`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LibraryPath {
    owner: OwnerKind,
    id: u64,
}

impl LibraryPath {
    pub fn new(owner: OwnerKind, id: u64) -> Self {
        Self { owner, id }
    }

    pub fn users(id: u64) -> Self {
        Self::new(OwnerKind::Users, id)
    }

    pub fn groups(id: u64) -> Self {
        Self::new(OwnerKind::Groups, id)
    }

    pub fn owner(&self) -> OwnerKind {
        self.owner
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for LibraryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner.as_str(), self.id)
    }
}

impl FromStr for LibraryPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (owner, id) = s
            .trim_matches('/')
            .split_once('/')
            .ok_or_else(|| anyhow!("无效的文库路径: {}", s))?;
        let owner = match owner {
            "users" => OwnerKind::Users,
            "groups" => OwnerKind::Groups,
            other => return Err(anyhow!("未知的文库类型 {}（路径: {}）", other, s)),
        };
        let id = id
            .parse::<u64>()
            .map_err(|_| anyhow!("文库 ID 必须为数字: {}", s))?;
        Ok(Self { owner, id })
    }
}

impl TryFrom<String> for LibraryPath {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<LibraryPath> for String {
    fn from(value: LibraryPath) -> Self {
        value.to_string()
    }
}

/// 一个远端文库的访问凭据，构造后不可变
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LibraryHandle {
    api_key: String,
    path: LibraryPath,
}

impl LibraryHandle {
    pub fn new(api_key: impl Into<String>, path: LibraryPath) -> Self {
        Self {
            api_key: api_key.into(),
            path,
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn path(&self) -> &LibraryPath {
        &self.path
    }
}

// 日志中不输出 API Key
impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// 可同步的资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Items,
    Collections,
    Tags,
}

impl ResourceKind {
    /// 资源在 URL 中的路径段
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Items => "items",
            ResourceKind::Collections => "collections",
            ResourceKind::Tags => "tags",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 条目或文件夹（collection）
///
/// `key` 是对外可见的标识：若条目带有 citekey，会被替换为 citekey，
/// 服务器原始 key 保留在 `data.key` 中，见 [`Record::server_key`]。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub version: u64,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(default)]
    pub has_citekey: bool,
}

impl Record {
    /// 服务器分配的 key（合并身份）
    pub fn server_key(&self) -> &str {
        self.data
            .get("key")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.key)
    }

    /// 读取 `data` 中的字符串字段
    pub fn field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(|v| v.as_str())
    }
}

/// 标签元信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMeta {
    /// 0 = 手动标签，1 = 自动标签；缺失视为数据损坏
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tag_type: Option<u8>,
    #[serde(rename = "numItems", default)]
    pub num_items: u64,
}

/// 标签（`/tags` 接口返回的单个元素）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag: String,
    #[serde(default)]
    pub meta: TagMeta,
}

impl Tag {
    pub fn new(tag: impl Into<String>, tag_type: u8) -> Self {
        Self {
            tag: tag.into(),
            meta: TagMeta {
                tag_type: Some(tag_type),
                num_items: 0,
            },
        }
    }

    pub fn with_num_items(mut self, num_items: u64) -> Self {
        self.meta.num_items = num_items;
        self
    }
}

/// `/deleted` 接口响应，只包含 key 列表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedKeys {
    #[serde(default, deserialize_with = "deserialize_vec_or_null")]
    pub items: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_vec_or_null")]
    pub collections: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_vec_or_null")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_vec_or_null")]
    pub searches: Vec<String>,
}

impl DeletedKeys {
    /// 取出某类资源对应的删除列表
    pub fn take(&mut self, kind: ResourceKind) -> Vec<String> {
        match kind {
            ResourceKind::Items => std::mem::take(&mut self.items),
            ResourceKind::Collections => std::mem::take(&mut self.collections),
            ResourceKind::Tags => std::mem::take(&mut self.tags),
        }
    }
}

/// 某个 (文库, 资源) 的本地镜像
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset<T> {
    pub data: Vec<T>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: u64,
}

impl<T> Default for Dataset<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            last_updated: 0,
        }
    }
}

/// API Key 权限（`/keys/{key}` 接口）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPermissions {
    pub key: String,
    #[serde(rename = "userID")]
    pub user_id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub access: serde_json::Value,
}
