//! 标签索引
//!
//! 把 `/tags` 返回的原始标签列表整理成按首字母分桶、按 token 归并的索引：
//!
//! 1. [`make_tag_map`]：按标签名聚合，同名不同类型的标签并存；
//! 2. [`make_dictionary`]：按首字符（小写）分桶；
//! 3. [`categorize_zotero_tags`]：桶内把大小写、连字符写法不同的标签归为同一个 token；
//! 4. [`make_tag_list`]：组合以上步骤。

use crate::zotero::error::TagIndexError;
use crate::zotero::types::Tag;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static COMPOUND_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\s-]+-[^\s-]+").expect("复合词正则无效"));

/// 标签映射中的一个槽位
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagMapEntry {
    Single(Tag),
    /// 同名但类型不同的多个标签，元素之间互不重复
    Multiple(Vec<Tag>),
}

impl TagMapEntry {
    pub fn tags(&self) -> &[Tag] {
        match self {
            TagMapEntry::Single(tag) => std::slice::from_ref(tag),
            TagMapEntry::Multiple(tags) => tags,
        }
    }
}

/// 标签名 → 槽位
pub type TagMap = BTreeMap<String, TagMapEntry>;

/// 索引中的一个 token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    pub token: String,
    pub zotero: Vec<Tag>,
}

/// 首字母桶 → 该桶内按 token 升序排列的条目
pub type TagIndex = BTreeMap<String, Vec<TagEntry>>;

fn checked_type(tag: &Tag) -> Result<u8, TagIndexError> {
    match tag.meta.tag_type {
        None => Err(TagIndexError::MissingTagType {
            tag: tag.tag.clone(),
        }),
        Some(t) if t > 1 => Err(TagIndexError::InvalidTagType {
            tag: tag.tag.clone(),
            tag_type: t,
        }),
        Some(t) => Ok(t),
    }
}

/// 两个标签的名字和类型都相同时才视为重复
pub fn are_tags_duplicate(a: &Tag, b: &Tag) -> Result<bool, TagIndexError> {
    let type_a = checked_type(a)?;
    let type_b = checked_type(b)?;
    Ok(type_a == type_b && a.tag == b.tag)
}

/// 把一个标签放进映射
pub fn update_tag_map(map: &mut TagMap, tag: Tag) -> Result<(), TagIndexError> {
    checked_type(&tag)?;

    let Some(entry) = map.get_mut(&tag.tag) else {
        map.insert(tag.tag.clone(), TagMapEntry::Single(tag));
        return Ok(());
    };

    match entry {
        TagMapEntry::Single(existing) => {
            if !are_tags_duplicate(existing, &tag)? {
                let existing = existing.clone();
                *entry = TagMapEntry::Multiple(vec![existing, tag]);
            }
        }
        TagMapEntry::Multiple(list) => {
            if list.is_empty() {
                return Err(TagIndexError::EmptyEntry { key: tag.tag });
            }
            for existing in list.iter() {
                if are_tags_duplicate(existing, &tag)? {
                    return Ok(());
                }
            }
            list.push(tag);
        }
    }
    Ok(())
}

pub fn make_tag_map(tags: impl IntoIterator<Item = Tag>) -> Result<TagMap, TagIndexError> {
    let mut map = TagMap::new();
    for tag in tags {
        update_tag_map(&mut map, tag)?;
    }
    Ok(map)
}

/// 字符串所属的桶：首个 UTF-16 码元的小写形式
///
/// BMP 以外的字符按前导代理项分桶。代理项不能单独成为 `char`，桶名写成转义形式，
/// 例如 😀 落入 `\uD83D`。
pub fn bucket_of(s: &str) -> Option<String> {
    let unit = s.encode_utf16().next()?;
    match char::from_u32(u32::from(unit)) {
        Some(first) => Some(first.to_lowercase().collect()),
        None => Some(format!("\\u{:04X}", unit)),
    }
}

/// 按首字符分桶，桶内保持输入顺序
pub fn make_dictionary<S: AsRef<str>>(
    strings: &[S],
) -> Result<BTreeMap<String, Vec<String>>, TagIndexError> {
    let mut dict: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (index, s) in strings.iter().enumerate() {
        let s = s.as_ref();
        let bucket = bucket_of(s).ok_or(TagIndexError::EmptyTagString { index })?;
        dict.entry(bucket).or_default().push(s.to_string());
    }
    Ok(dict)
}

/// `query` 与 `target` 是否为同一个 token
///
/// 不区分大小写的精确匹配；`query` 是连字符复合词时，去掉连字符或换成空格的写法也算匹配。
pub fn same_token(query: &str, target: &str) -> bool {
    let query = query.to_lowercase();
    let target = target.to_lowercase();
    if query == target {
        return true;
    }
    if COMPOUND_PATTERN.is_match(&query) {
        return query.replace('-', "") == target || query.replace('-', " ") == target;
    }
    false
}

/// 把同一个桶内的标签名归并成 token
///
/// 输入先按降序排列，token 取第一个出现的写法的小写形式；输出按 token 升序。
pub fn categorize_zotero_tags<S: AsRef<str>>(
    tag_strings: &[S],
    tag_map: &TagMap,
) -> Result<Vec<TagEntry>, TagIndexError> {
    let mut sorted: Vec<&str> = tag_strings.iter().map(AsRef::as_ref).collect();
    sorted.sort_by(|a, b| b.cmp(a));

    let mut output: Vec<TagEntry> = Vec::new();
    for elem in sorted {
        let source = tag_map.get(elem).ok_or_else(|| TagIndexError::UnknownTag {
            tag: elem.to_string(),
        })?;
        let tags = source.tags();
        if tags.is_empty() {
            return Err(TagIndexError::EmptyEntry {
                key: elem.to_string(),
            });
        }

        match output.iter_mut().find(|tk| same_token(elem, &tk.token)) {
            Some(tk) => {
                for tag in tags {
                    let mut duplicate = false;
                    for existing in &tk.zotero {
                        if are_tags_duplicate(existing, tag)? {
                            duplicate = true;
                            break;
                        }
                    }
                    if !duplicate {
                        tk.zotero.push(tag.clone());
                    }
                }
            }
            None => output.push(TagEntry {
                token: elem.to_lowercase(),
                zotero: tags.to_vec(),
            }),
        }
    }

    output.sort_by(|a, b| a.token.cmp(&b.token));
    Ok(output)
}

/// 从原始标签列表构建完整索引
pub fn make_tag_list(tags: impl IntoIterator<Item = Tag>) -> Result<TagIndex, TagIndexError> {
    let tag_map = make_tag_map(tags)?;
    let names: Vec<&str> = tag_map.keys().map(String::as_str).collect();
    let dictionary = make_dictionary(&names)?;

    let mut index = TagIndex::new();
    for (bucket, strings) in dictionary {
        index.insert(bucket, categorize_zotero_tags(&strings, &tag_map)?);
    }
    Ok(index)
}
