//! CIViC GraphQL client.
//!
//! Pulls accepted evidence items and assertions for one molecular profile
//! (`GENE VARIANT`). Assertions carry the AMP tier/level CIViC curators
//! assigned, which the tier engine consumes directly; evidence items feed
//! the per-drug signal aggregation.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::OncoTierError;
use crate::evidence::{
    CivicAssertionRecord, CivicEvidenceRecord, CivicFragment, CivicSignificance, EvidenceLevel,
    ResponseSignal,
};
use crate::normalize::NormalizedVariant;
use crate::tier::Tier;

const CIVIC_BASE: &str = "https://civicdb.org/api";
const CIVIC_API: &str = "civic";
const CIVIC_BASE_ENV: &str = "ONCOTIER_CIVIC_BASE";

const CIVIC_CONTEXT_QUERY: &str = r#"
query VariantContext($molecularProfileName: String, $first: Int!) {
  evidenceItems(
    molecularProfileName: $molecularProfileName
    status: ACCEPTED
    first: $first
  ) {
    totalCount
    nodes {
      id
      evidenceType
      evidenceLevel
      significance
      disease {
        displayName
      }
      therapies {
        name
      }
      source {
        citation
      }
    }
  }
  assertions(
    molecularProfileName: $molecularProfileName
    status: ACCEPTED
    first: $first
  ) {
    totalCount
    nodes {
      id
      assertionType
      ampLevel
      significance
      disease {
        displayName
      }
      therapies {
        name
      }
      fdaCompanionTest
      nccnGuideline {
        name
      }
    }
  }
}
"#;

pub struct CivicClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

impl CivicClient {
    pub fn new() -> Result<Self, OncoTierError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(CIVIC_BASE, CIVIC_BASE_ENV),
        })
    }

    #[cfg(test)]
    fn new_for_test(base: String) -> Result<Self, OncoTierError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        req: reqwest_middleware::RequestBuilder,
        body: &B,
    ) -> Result<T, OncoTierError> {
        let resp = req.json(body).send().await?;
        let status = resp.status();
        let content_type = resp.headers().get(reqwest::header::CONTENT_TYPE).cloned();
        let bytes = crate::sources::read_limited_body(resp, CIVIC_API).await?;

        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(OncoTierError::Api {
                api: CIVIC_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }

        crate::sources::reject_html_payload(CIVIC_API, content_type.as_ref(), &bytes)?;
        serde_json::from_slice(&bytes).map_err(|source| OncoTierError::ApiJson {
            api: CIVIC_API.to_string(),
            source,
        })
    }

    pub async fn fetch(
        &self,
        variant: &NormalizedVariant,
        limit: usize,
    ) -> Result<CivicFragment, OncoTierError> {
        let profile = format!("{} {}", variant.gene, variant.variant_normalized);
        let first = limit.clamp(1, 25);

        let body = GraphQlRequest {
            query: CIVIC_CONTEXT_QUERY,
            variables: serde_json::json!({
                "molecularProfileName": profile,
                "first": first,
            }),
        };
        let url = self.endpoint("graphql");
        let resp: GraphQlResponse<CivicContextData> =
            self.post_json(self.client.post(&url), &body).await?;

        if let Some(errors) = resp.errors {
            let message = errors
                .into_iter()
                .filter_map(|row| row.message)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>()
                .join("; ");
            if !message.is_empty() {
                return Err(OncoTierError::Api {
                    api: CIVIC_API.to_string(),
                    message,
                });
            }
        }

        let data = resp.data.unwrap_or_default();
        Ok(CivicFragment {
            evidence_items: data
                .evidence_items
                .nodes
                .into_iter()
                .filter_map(WireEvidenceNode::into_record)
                .collect(),
            assertions: data
                .assertions
                .nodes
                .into_iter()
                .filter_map(WireAssertionNode::into_record)
                .collect(),
        })
    }
}

fn parse_significance(raw: &str) -> Option<CivicSignificance> {
    match raw.trim().to_uppercase().as_str() {
        "PREDICTIVE" => Some(CivicSignificance::Predictive),
        "PROGNOSTIC" => Some(CivicSignificance::Prognostic),
        "DIAGNOSTIC" => Some(CivicSignificance::Diagnostic),
        "ONCOGENIC" => Some(CivicSignificance::Oncogenic),
        _ => None,
    }
}

fn parse_response(raw: &str) -> Option<ResponseSignal> {
    let upper = raw.trim().to_uppercase();
    if upper.contains("RESISTANCE") {
        Some(ResponseSignal::Resistant)
    } else if upper.contains("SENSITIVITY") {
        Some(ResponseSignal::Sensitive)
    } else {
        None
    }
}

fn parse_evidence_level(raw: &str) -> Option<EvidenceLevel> {
    match raw.trim().to_uppercase().as_str() {
        "A" => Some(EvidenceLevel::A),
        "B" => Some(EvidenceLevel::B),
        "C" => Some(EvidenceLevel::C),
        // CIViC level E (indirect) has no AMP counterpart; fold into D.
        "D" | "E" => Some(EvidenceLevel::D),
        _ => None,
    }
}

/// `TIER_I_LEVEL_A` -> `(Tier::I, EvidenceLevel::A)`.
fn parse_amp_level(raw: &str) -> Option<(Tier, EvidenceLevel)> {
    let upper = raw.trim().to_uppercase();
    let rest = upper.strip_prefix("TIER_")?;
    let (tier_token, level_token) = rest.split_once("_LEVEL_")?;
    let tier = match tier_token {
        "I" => Tier::I,
        "II" => Tier::II,
        "III" => Tier::III,
        "IV" => Tier::IV,
        _ => return None,
    };
    let level = parse_evidence_level(level_token)?;
    Some((tier, level))
}

fn clean_names(rows: Vec<WireNameNode>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let name = row.name.trim().to_string();
        if name.is_empty() || !seen.insert(name.to_ascii_lowercase()) {
            continue;
        }
        out.push(name);
    }
    out
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CivicContextData {
    #[serde(rename = "evidenceItems", default)]
    evidence_items: WireConnection<WireEvidenceNode>,
    #[serde(default)]
    assertions: WireConnection<WireAssertionNode>,
}

#[derive(Debug, Deserialize)]
struct WireConnection<T> {
    #[serde(default)]
    nodes: Vec<T>,
}

impl<T> Default for WireConnection<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireEvidenceNode {
    #[serde(rename = "evidenceType")]
    evidence_type: Option<String>,
    #[serde(rename = "evidenceLevel")]
    evidence_level: Option<String>,
    significance: Option<String>,
    disease: Option<WireDiseaseNode>,
    #[serde(default)]
    therapies: Vec<WireNameNode>,
    source: Option<WireSourceNode>,
}

impl WireEvidenceNode {
    fn into_record(self) -> Option<CivicEvidenceRecord> {
        let significance = parse_significance(self.evidence_type.as_deref()?)?;
        let level = parse_evidence_level(self.evidence_level.as_deref()?)?;
        Some(CivicEvidenceRecord {
            level,
            significance,
            response: self.significance.as_deref().and_then(parse_response),
            therapies: clean_names(self.therapies),
            disease: self.disease.map(|d| d.display_name),
            citation: self.source.and_then(|s| s.citation),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireAssertionNode {
    #[serde(rename = "assertionType")]
    assertion_type: Option<String>,
    #[serde(rename = "ampLevel")]
    amp_level: Option<String>,
    significance: Option<String>,
    disease: Option<WireDiseaseNode>,
    #[serde(default)]
    therapies: Vec<WireNameNode>,
    #[serde(rename = "fdaCompanionTest")]
    fda_companion_test: Option<bool>,
    #[serde(rename = "nccnGuideline")]
    nccn_guideline: Option<WireNameNode>,
}

impl WireAssertionNode {
    fn into_record(self) -> Option<CivicAssertionRecord> {
        let significance = parse_significance(self.assertion_type.as_deref()?)?;
        let (amp_tier, amp_level) = parse_amp_level(self.amp_level.as_deref()?)?;
        Some(CivicAssertionRecord {
            amp_tier,
            amp_level,
            significance,
            response: self.significance.as_deref().and_then(parse_response),
            therapies: clean_names(self.therapies),
            disease: self.disease.map(|d| d.display_name),
            fda_companion_test: self.fda_companion_test.unwrap_or(false),
            nccn_guideline: self
                .nccn_guideline
                .map(|g| g.name.trim().to_string())
                .filter(|g| !g.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireNameNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireDiseaseNode {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct WireSourceNode {
    citation: Option<String>,
}
