//! 合并引擎
//!
//! 将一次增量结果 `{modified, deleted}` 合并进已有数据集。纯函数，
//! 不持有共享状态：调用方按值传入快照，拿回新的数据集。

use crate::zotero::types::{Record, Tag};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// `extra` 字段中 citekey 的标记
static CITEKEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Citation Key: (.+)").expect("citekey 正则无效"));

/// 可参与合并的记录
pub trait Mergeable: Clone {
    /// 合并身份键，同一数据集内必须唯一
    fn merge_key(&self) -> Cow<'_, str>;

    /// 删除流中使用的键，默认与合并身份键相同
    fn deletion_key(&self) -> Cow<'_, str> {
        self.merge_key()
    }

    /// 别名提取，默认不做处理
    fn apply_alias(self) -> Self {
        self
    }
}

impl Mergeable for Record {
    fn merge_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.server_key())
    }

    fn apply_alias(self) -> Self {
        extract_citekey(self)
    }
}

impl Mergeable for Tag {
    // 同名不同类型的标签是两个独立条目
    fn merge_key(&self) -> Cow<'_, str> {
        match self.meta.tag_type {
            Some(t) => Cow::Owned(format!("{}\u{1f}{}", self.tag, t)),
            None => Cow::Owned(format!("{}\u{1f}", self.tag)),
        }
    }

    // 删除流只给出标签名，删除该名字下的所有类型
    fn deletion_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.tag)
    }
}

/// 一次增量更新
#[derive(Debug, Clone, PartialEq)]
pub struct Update<T> {
    pub modified: Vec<T>,
    pub deleted: Vec<String>,
}

impl<T> Update<T> {
    pub fn new(modified: Vec<T>, deleted: Vec<String>) -> Self {
        Self { modified, deleted }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// 合并前先对 modified 做 citekey 别名提取
    pub with_alias: bool,
}

/// 合并增量到已有数据集
///
/// 同一身份键出现多次时，后出现的覆盖先出现的。
pub fn merge_update<T: Mergeable>(
    update: Update<T>,
    mut existing: Vec<T>,
    opts: MergeOptions,
) -> Vec<T> {
    let modified: Vec<T> = if opts.with_alias {
        update.modified.into_iter().map(T::apply_alias).collect()
    } else {
        update.modified
    };

    if !update.deleted.is_empty() {
        let deleted: HashSet<&str> = update.deleted.iter().map(String::as_str).collect();
        existing.retain(|r| !deleted.contains(r.deletion_key().as_ref()));
    }

    if modified.is_empty() {
        return existing;
    }
    if existing.is_empty() {
        return modified;
    }

    let mut positions: HashMap<String, usize> = HashMap::with_capacity(existing.len());
    for (i, r) in existing.iter().enumerate() {
        positions.entry(r.merge_key().into_owned()).or_insert(i);
    }

    for record in modified {
        let key = record.merge_key().into_owned();
        match positions.get(&key) {
            Some(&i) => existing[i] = record,
            None => {
                positions.insert(key, existing.len());
                existing.push(record);
            }
        }
    }
    existing
}

/// 从 `extra` 字段提取 citekey 并替换对外可见的 key
///
/// 已提取过的记录原样返回；服务器 key 始终保留在 `data.key`。
pub fn extract_citekey(mut record: Record) -> Record {
    if record.has_citekey {
        return record;
    }
    let alias = record
        .field("extra")
        .and_then(|extra| CITEKEY_PATTERN.captures(extra))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string());

    if let Some(alias) = alias.filter(|a| !a.is_empty()) {
        if !record.data.contains_key("key") {
            record
                .data
                .insert("key".to_string(), serde_json::Value::String(record.key.clone()));
        }
        record.key = alias;
        record.has_citekey = true;
    }
    record
}

/// 批量提取 citekey
pub fn extract_citekeys(records: Vec<Record>) -> Vec<Record> {
    records.into_iter().map(extract_citekey).collect()
}
