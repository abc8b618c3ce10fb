//! VICC meta-knowledgebase client.
//!
//! One Lucene-style `gene variant` query over the harmonized associations.
//! Resistance entries describing compound mutations (a secondary alteration
//! acquired on top of the queried one) are filtered out so they cannot
//! penalize the queried variant on its own.

use std::borrow::Cow;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::OncoTierError;
use crate::evidence::{EvidenceLevel, ResponseSignal, ViccAssociation, ViccFragment};
use crate::normalize::NormalizedVariant;

const VICC_BASE: &str = "https://search.cancervariants.org/api/v1";
const VICC_API: &str = "vicc";
const VICC_BASE_ENV: &str = "ONCOTIER_VICC_BASE";
const VICC_PAGE_SIZE: usize = 50;

const COMPOUND_MUTATION_MARKERS: &[&str] = &[
    "secondary mutation",
    "secondary alteration",
    "acquired mutation",
    "acquired resistance mutation",
    "harboring",
    "in combination with a",
    "co-occurring mutation",
];

pub struct ViccClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

impl ViccClient {
    pub fn new() -> Result<Self, OncoTierError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(VICC_BASE, VICC_BASE_ENV),
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

    async fn get_json<T: DeserializeOwned>(
        &self,
        req: reqwest_middleware::RequestBuilder,
    ) -> Result<T, OncoTierError> {
        let resp = req.send().await?;
        let status = resp.status();
        let content_type = resp.headers().get(reqwest::header::CONTENT_TYPE).cloned();
        let bytes = crate::sources::read_limited_body(resp, VICC_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(OncoTierError::Api {
                api: VICC_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        crate::sources::reject_html_payload(VICC_API, content_type.as_ref(), &bytes)?;
        serde_json::from_slice(&bytes).map_err(|source| OncoTierError::ApiJson {
            api: VICC_API.to_string(),
            source,
        })
    }

    pub async fn fetch(
        &self,
        variant: &NormalizedVariant,
    ) -> Result<ViccFragment, OncoTierError> {
        let q = format!(
            "{} {}",
            crate::utils::query::escape_lucene_value(&variant.gene),
            crate::utils::query::escape_lucene_value(&variant.variant_normalized)
        );
        let url = self.endpoint("associations");
        let size = VICC_PAGE_SIZE.to_string();
        let resp: ViccResponse = self
            .get_json(
                self.client
                    .get(&url)
                    .query(&[("q", q.as_str()), ("size", size.as_str())]),
            )
            .await?;

        let associations = resp
            .hits
            .into_iter()
            .filter_map(WireAssociationHit::into_association)
            .filter(|assoc| !is_compound_resistance(assoc))
            .map(|assoc| assoc.association)
            .collect();

        Ok(ViccFragment { associations })
    }
}

fn is_compound_resistance(assoc: &ViccAssociationParsed) -> bool {
    if assoc.association.response != ResponseSignal::Resistant {
        return false;
    }
    let description = assoc.description.to_lowercase();
    COMPOUND_MUTATION_MARKERS
        .iter()
        .any(|marker| description.contains(marker))
}

struct ViccAssociationParsed {
    association: ViccAssociation,
    description: String,
}

fn parse_response(raw: &str) -> Option<ResponseSignal> {
    let lowered = raw.trim().to_lowercase();
    if lowered.contains("resist") {
        Some(ResponseSignal::Resistant)
    } else if lowered.contains("sensitiv") || lowered.contains("respons") {
        Some(ResponseSignal::Sensitive)
    } else {
        None
    }
}

fn parse_level(raw: &str) -> Option<EvidenceLevel> {
    match raw.trim().to_uppercase().as_str() {
        "A" => Some(EvidenceLevel::A),
        "B" => Some(EvidenceLevel::B),
        "C" => Some(EvidenceLevel::C),
        "D" => Some(EvidenceLevel::D),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ViccResponse {
    #[serde(default)]
    hits: Vec<WireAssociationHit>,
}

#[derive(Debug, Deserialize)]
struct WireAssociationHit {
    association: Option<WireAssociation>,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAssociation {
    description: Option<String>,
    evidence_level: Option<String>,
    response_type: Option<String>,
    oncokb_level: Option<String>,
    #[serde(default, rename = "environmentalContexts")]
    environmental_contexts: Vec<WireContext>,
    phenotype: Option<WirePhenotype>,
}

#[derive(Debug, Deserialize)]
struct WireContext {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePhenotype {
    description: Option<String>,
}

impl WireAssociationHit {
    fn into_association(self) -> Option<ViccAssociationParsed> {
        let source = self
            .source
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let assoc = self.association?;
        let response = parse_response(assoc.response_type.as_deref()?)?;
        let evidence_level = parse_level(assoc.evidence_level.as_deref()?)?;
        let drug = assoc
            .environmental_contexts
            .into_iter()
            .filter_map(|ctx| ctx.description)
            .map(|d| d.trim().to_string())
            .find(|d| !d.is_empty());

        Some(ViccAssociationParsed {
            association: ViccAssociation {
                drug,
                response,
                evidence_level,
                oncokb_level: assoc
                    .oncokb_level
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty()),
                source,
                tumor: assoc
                    .phenotype
                    .and_then(|p| p.description)
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty()),
            },
            description: assoc.description.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn nv(gene: &str, variant: &str) -> NormalizedVariant {
        crate::normalize::normalize(gene, variant).unwrap()
    }

    #[tokio::test]
    async fn parses_associations_and_filters_compound_resistance() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/associations"))
            .and(query_param("q", "EGFR T790M"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [
                    {
                        "source": "civic",
                        "association": {
                            "description": "T790M confers sensitivity to osimertinib in NSCLC",
                            "evidence_level": "A",
                            "response_type": "sensitivity",
                            "environmentalContexts": [{"description": "Osimertinib"}],
                            "phenotype": {"description": "Non-small cell lung cancer"}
                        }
                    },
                    {
                        "source": "jax",
                        "association": {
                            "description": "Cells harboring T790M and C797S were resistant to osimertinib (secondary mutation)",
                            "evidence_level": "B",
                            "response_type": "resistant",
                            "environmentalContexts": [{"description": "Osimertinib"}]
                        }
                    },
                    {
                        "source": "oncokb",
                        "association": {
                            "description": "T790M resistant to erlotinib",
                            "evidence_level": "B",
                            "oncokb_level": "R1",
                            "response_type": "resistant",
                            "environmentalContexts": [{"description": "Erlotinib"}],
                            "phenotype": {"description": "Lung adenocarcinoma"}
                        }
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ViccClient::new_for_test(server.uri()).unwrap();
        let fragment = client.fetch(&nv("EGFR", "T790M")).await.unwrap();

        assert_eq!(fragment.associations.len(), 2);
        let sensitive = &fragment.associations[0];
        assert_eq!(sensitive.response, ResponseSignal::Sensitive);
        assert_eq!(sensitive.evidence_level, EvidenceLevel::A);
        assert_eq!(sensitive.drug.as_deref(), Some("Osimertinib"));
        assert_eq!(sensitive.source, "civic");

        let resistant = &fragment.associations[1];
        assert_eq!(resistant.response, ResponseSignal::Resistant);
        assert_eq!(resistant.drug.as_deref(), Some("Erlotinib"));
        assert_eq!(resistant.oncokb_level.as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn hits_without_level_or_response_are_skipped() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/associations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [
                    {"source": "civic", "association": {"description": "no level", "response_type": "sensitivity"}},
                    {"source": "civic", "association": {"description": "no response", "evidence_level": "A"}},
                    {"source": "civic"}
                ]
            })))
            .mount(&server)
            .await;

        let client = ViccClient::new_for_test(server.uri()).unwrap();
        let fragment = client.fetch(&nv("BRAF", "V600E")).await.unwrap();
        assert!(fragment.associations.is_empty());
    }
}
