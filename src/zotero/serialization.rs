use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// 反序列化数组字段，处理 null 值
pub(crate) fn deserialize_vec_or_null<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt = Option::<Vec<T>>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// 反序列化以数组下标为 key 的对象（如 `{"0": ..., "3": ...}`），处理 null 值
///
/// Zotero 写接口的 `successful` / `success` / `unchanged` / `failed`
/// 都是这种形状，key 是字符串形式的下标。
pub(crate) fn deserialize_index_map<'de, D, T>(
    deserializer: D,
) -> Result<BTreeMap<usize, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt = Option::<BTreeMap<String, T>>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    for (k, v) in opt.unwrap_or_default() {
        let index = k
            .parse::<usize>()
            .map_err(|_| serde::de::Error::custom(format!("无效的下标: {}", k)))?;
        out.insert(index, v);
    }
    Ok(out)
}

/// 生成写请求使用的 `Zotero-Write-Token`（32 位十六进制）
pub fn generate_write_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
