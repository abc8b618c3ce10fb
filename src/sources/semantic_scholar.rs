//! Semantic Scholar paper search.
//!
//! Two tumor-aware queries per variant, merged to at most six unique papers.
//! The public tier allows one request per second; the rate-limit middleware
//! paces every call to this host accordingly. Relevance scoring happens
//! later in the literature pipeline, not here.

use std::borrow::Cow;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::OncoTierError;
use crate::normalize::NormalizedVariant;

const S2_BASE: &str = "https://api.semanticscholar.org/graph/v1";
const S2_API: &str = "semanticscholar";
const S2_BASE_ENV: &str = "ONCOTIER_S2_BASE";
const S2_FIELDS: &str = "paperId,title,year,citationCount,tldr,abstract";
const S2_PAGE_LIMIT: usize = 10;
pub(crate) const MAX_PAPERS: usize = 6;

/// A paper before LLM relevance scoring.
#[derive(Debug, Clone)]
pub struct PaperRecord {
    pub paper_id: String,
    pub title: String,
    pub year: Option<i32>,
    pub citations: u64,
    pub tldr: Option<String>,
    pub abstract_text: Option<String>,
}

pub struct SemanticScholarClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new() -> Result<Self, OncoTierError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(S2_BASE, S2_BASE_ENV),
            api_key: std::env::var("S2_API_KEY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }

    #[cfg(test)]
    fn new_for_test(base: String) -> Result<Self, OncoTierError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            api_key: None,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        req: reqwest_middleware::RequestBuilder,
    ) -> Result<T, OncoTierError> {
        let req = match self.api_key.as_deref() {
            Some(key) => req.header("x-api-key", key),
            None => req,
        };
        let resp = req.send().await?;
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, S2_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(OncoTierError::Api {
                api: S2_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        serde_json::from_slice(&bytes).map_err(|source| OncoTierError::ApiJson {
            api: S2_API.to_string(),
            source,
        })
    }

    pub async fn fetch(
        &self,
        variant: &NormalizedVariant,
        tumor_type: Option<&str>,
    ) -> Result<Vec<PaperRecord>, OncoTierError> {
        let subject = format!("{} {}", variant.gene, variant.variant_normalized);
        let queries = [
            match tumor_type {
                Some(tumor) => format!("{subject} {tumor}"),
                None => format!("{subject} cancer"),
            },
            format!("{subject} therapy resistance"),
        ];

        let mut merged: Vec<PaperRecord> = Vec::new();
        for query in &queries {
            if merged.len() >= MAX_PAPERS {
                break;
            }
            let papers = self.search(query).await?;
            for paper in papers {
                if merged.len() >= MAX_PAPERS {
                    break;
                }
                if merged.iter().any(|p| p.paper_id == paper.paper_id) {
                    continue;
                }
                merged.push(paper);
            }
        }

        Ok(merged)
    }

    async fn search(&self, query: &str) -> Result<Vec<PaperRecord>, OncoTierError> {
        let url = self.endpoint("paper/search");
        let limit = S2_PAGE_LIMIT.to_string();
        let resp: SearchResponse = self
            .get_json(self.client.get(&url).query(&[
                ("query", query),
                ("limit", limit.as_str()),
                ("fields", S2_FIELDS),
            ]))
            .await?;

        Ok(resp
            .data
            .into_iter()
            .filter_map(WirePaper::into_record)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<WirePaper>,
}

#[derive(Debug, Deserialize)]
struct WirePaper {
    #[serde(rename = "paperId")]
    paper_id: Option<String>,
    title: Option<String>,
    year: Option<i32>,
    #[serde(rename = "citationCount")]
    citation_count: Option<u64>,
    tldr: Option<WireTldr>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireTldr {
    text: Option<String>,
}

impl WirePaper {
    fn into_record(self) -> Option<PaperRecord> {
        let paper_id = self.paper_id?.trim().to_string();
        if paper_id.is_empty() {
            return None;
        }
        Some(PaperRecord {
            paper_id,
            title: self.title.unwrap_or_default().trim().to_string(),
            year: self.year,
            citations: self.citation_count.unwrap_or(0),
            tldr: self.tldr.and_then(|t| t.text).filter(|t| !t.is_empty()),
            abstract_text: self.abstract_text.filter(|t| !t.is_empty()),
        })
    }
}
