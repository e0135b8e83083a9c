//! 条目引用格式
//!
//! 格式是一个封闭枚举，每个格式对应一个格式化函数；调用方可以替换某个格式的实现。

use crate::zotero::types::Record;
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

static YEAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})\b").expect("年份正则无效"));

/// 内置的引用格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CitationFormat {
    /// 原样输出 key
    Key,
    /// `@key`
    Citekey,
    /// `[[@key]]`
    PageRef,
    /// `#[[@key]]`
    Tag,
    /// `Doe et al. (2020)`
    Citation,
}

impl CitationFormat {
    pub const ALL: [CitationFormat; 5] = [
        CitationFormat::Key,
        CitationFormat::Citekey,
        CitationFormat::PageRef,
        CitationFormat::Tag,
        CitationFormat::Citation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CitationFormat::Key => "key",
            CitationFormat::Citekey => "citekey",
            CitationFormat::PageRef => "pageref",
            CitationFormat::Tag => "tag",
            CitationFormat::Citation => "citation",
        }
    }
}

impl fmt::Display for CitationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CitationFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match CitationFormat::ALL.iter().find(|f| f.as_str() == s) {
            Some(format) => Ok(*format),
            None => bail!("未知的引用格式: {}", s),
        }
    }
}

/// 格式化函数
pub type Formatter = fn(&Record) -> String;

/// 格式注册表
#[derive(Clone)]
pub struct FormatRegistry {
    formatters: HashMap<CitationFormat, Formatter>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        let mut formatters: HashMap<CitationFormat, Formatter> = HashMap::new();
        formatters.insert(CitationFormat::Key, format_key);
        formatters.insert(CitationFormat::Citekey, format_citekey);
        formatters.insert(CitationFormat::PageRef, format_page_ref);
        formatters.insert(CitationFormat::Tag, format_tag);
        formatters.insert(CitationFormat::Citation, format_citation);
        Self { formatters }
    }
}

impl FormatRegistry {
    /// 替换某个格式的实现
    pub fn register(&mut self, format: CitationFormat, formatter: Formatter) {
        self.formatters.insert(format, formatter);
    }

    pub fn format(&self, format: CitationFormat, record: &Record) -> String {
        match self.formatters.get(&format) {
            Some(formatter) => formatter(record),
            None => format_key(record),
        }
    }
}

fn format_key(record: &Record) -> String {
    record.key.clone()
}

fn format_citekey(record: &Record) -> String {
    format!("@{}", record.key)
}

fn format_page_ref(record: &Record) -> String {
    format!("[[@{}]]", record.key)
}

fn format_tag(record: &Record) -> String {
    format!("#[[@{}]]", record.key)
}

fn format_citation(record: &Record) -> String {
    let authors = creator_summary(record);
    let year = publication_year(record);
    match (authors.is_empty(), year) {
        (false, Some(year)) => format!("{} ({})", authors, year),
        (false, None) => authors,
        (true, Some(year)) => format!("{} ({})", record.field("title").unwrap_or(&record.key), year),
        (true, None) => record.field("title").unwrap_or(&record.key).to_string(),
    }
}

/// 作者摘要：`Doe`、`Doe & Smith`、`Doe et al.`
pub fn creator_summary(record: &Record) -> String {
    let names: Vec<&str> = record
        .data
        .get("creators")
        .and_then(|v| v.as_array())
        .map(|creators| {
            creators
                .iter()
                .filter(|c| {
                    c.get("creatorType")
                        .and_then(|t| t.as_str())
                        .map_or(true, |t| t == "author")
                })
                .filter_map(|c| {
                    c.get("lastName")
                        .or_else(|| c.get("name"))
                        .and_then(|n| n.as_str())
                })
                .collect()
        })
        .unwrap_or_default();

    match names.as_slice() {
        [] => String::new(),
        [one] => one.to_string(),
        [first, second] => format!("{} & {}", first, second),
        [first, ..] => format!("{} et al.", first),
    }
}

/// 从 `date` 字段中取出四位年份
pub fn publication_year(record: &Record) -> Option<String> {
    let date = record.field("date")?;
    YEAR_PATTERN
        .captures(date)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
