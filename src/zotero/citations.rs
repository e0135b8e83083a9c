//! Semantic Scholar 引用查询

use crate::zotero::error::ApiError;
use crate::zotero::remote::{ApiRequest, RemoteClient};
use crate::zotero::serialization::deserialize_vec_or_null;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// 引用或参考文献中的一篇论文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticEntry {
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(rename = "isInfluential", default)]
    pub is_influential: bool,
    #[serde(rename = "paperId", default)]
    pub paper_id: Option<String>,
}

/// `v1/paper/{doi}` 响应中用到的部分
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticPaper {
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_vec_or_null")]
    pub citations: Vec<SemanticEntry>,
    #[serde(default, deserialize_with = "deserialize_vec_or_null")]
    pub references: Vec<SemanticEntry>,
}

impl SemanticPaper {
    /// 有影响力的引用数量
    pub fn influential_citations(&self) -> usize {
        self.citations.iter().filter(|c| c.is_influential).count()
    }
}

/// Semantic Scholar API 客户端
#[derive(Clone)]
pub struct SemanticApi {
    client: RemoteClient,
}

impl SemanticApi {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }

    /// 按 DOI 查询引用与参考文献；DOI 不存在时返回 [`ApiError::NotFound`]
    pub async fn lookup(&self, doi: &str) -> Result<SemanticPaper, ApiError> {
        let doi = normalize_doi(doi);
        info!("[Semantic] 📡 查询 DOI {}", doi);

        let request = ApiRequest::get(self.client.url(&format!("v1/paper/{}", doi)));
        let paper: SemanticPaper = match self.client.execute(request).await {
            Ok(resp) => resp.json()?,
            Err(e @ ApiError::NotFound { .. }) => {
                warn!("[Semantic] DOI {} 不存在", doi);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        debug!(
            "[Semantic] {} - 引用: {}（有影响力 {}），参考文献: {}",
            doi,
            paper.citations.len(),
            paper.influential_citations(),
            paper.references.len()
        );
        Ok(paper)
    }
}

/// 去掉 `https://doi.org/` 之类的前缀，统一小写
pub fn normalize_doi(doi: &str) -> String {
    let trimmed = doi.trim();
    let lower = trimmed.to_lowercase();
    for prefix in ["https://doi.org/", "http://doi.org/", "doi:"] {
        if let Some(rest) = lower.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    lower
}
