//! openFDA drug-label client.
//!
//! Approval evidence comes from the structured product labels: a full-text
//! `GENE AND VARIANT` search first, then an indications-and-usage fallback
//! on the gene alone. A label that literally names the canonical variant
//! sets `mentions_variant_in_label`, which is what the Tier I branch keys on.

use std::borrow::Cow;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::OncoTierError;
use crate::evidence::{FdaApproval, FdaFragment};
use crate::normalize::NormalizedVariant;
use crate::utils::serde::StringOrVec;

const OPENFDA_BASE: &str = "https://api.fda.gov";
const OPENFDA_API: &str = "openfda";
const OPENFDA_BASE_ENV: &str = "ONCOTIER_OPENFDA_BASE";
const LABEL_LIMIT: usize = 10;

pub struct OpenFdaClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    api_key: Option<String>,
}

impl OpenFdaClient {
    pub fn new() -> Result<Self, OncoTierError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(OPENFDA_BASE, OPENFDA_BASE_ENV),
            api_key: std::env::var("OPENFDA_API_KEY")
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

    async fn get_json_optional<T: DeserializeOwned>(
        &self,
        req: reqwest_middleware::RequestBuilder,
    ) -> Result<Option<T>, OncoTierError> {
        let resp = req.send().await?;
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, OPENFDA_API).await?;

        // openFDA answers an empty result set with 404.
        if status.as_u16() == 404 {
            return Ok(None);
        }

        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(OncoTierError::Api {
                api: OPENFDA_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| OncoTierError::ApiJson {
                api: OPENFDA_API.to_string(),
                source,
            })
    }

    async fn label_search(
        &self,
        query: &str,
    ) -> Result<Option<LabelResponse>, OncoTierError> {
        let url = self.endpoint("drug/label.json");
        let limit = LABEL_LIMIT.to_string();
        let mut req = self
            .client
            .get(&url)
            .query(&[("search", query), ("limit", limit.as_str())]);
        if let Some(key) = self.api_key.as_deref() {
            req = req.query(&[("api_key", key)]);
        }
        self.get_json_optional(req).await
    }

    pub async fn fetch(
        &self,
        variant: &NormalizedVariant,
    ) -> Result<FdaFragment, OncoTierError> {
        let gene = crate::utils::query::escape_lucene_value(&variant.gene);
        let canonical = crate::utils::query::escape_lucene_value(&variant.variant_normalized);

        let full_text = format!("\"{gene}\" AND \"{canonical}\"");
        let mut results = self
            .label_search(&full_text)
            .await?
            .map(|resp| resp.results)
            .unwrap_or_default();

        if results.is_empty() {
            let fallback = format!("indications_and_usage:\"{gene}\"");
            results = self
                .label_search(&fallback)
                .await?
                .map(|resp| resp.results)
                .unwrap_or_default();
        }

        Ok(build_fragment(results, &variant.variant_normalized))
    }
}

fn build_fragment(results: Vec<LabelResult>, canonical: &str) -> FdaFragment {
    let needle = canonical.to_lowercase();
    let hgvs_needle = format!("p.{needle}");
    let mut mentions_variant_in_label = false;
    let mut approvals = Vec::new();

    for label in results {
        let indication_text = label
            .indications_and_usage
            .into_vec()
            .join(" ")
            .trim()
            .to_string();

        let haystack = indication_text.to_lowercase();
        if haystack.contains(&needle) || haystack.contains(&hgvs_needle) {
            mentions_variant_in_label = true;
        }

        let openfda = label.openfda.unwrap_or_default();
        let Some(drug) = openfda
            .generic_name
            .first()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
        else {
            continue;
        };

        approvals.push(FdaApproval {
            drug,
            brand: openfda
                .brand_name
                .first()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            indication_text,
            approval_date: label
                .effective_time
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            marketing_status: openfda
                .product_type
                .first()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        });
    }

    FdaFragment {
        approvals,
        mentions_variant_in_label,
    }
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    #[serde(default)]
    results: Vec<LabelResult>,
}

#[derive(Debug, Deserialize)]
struct LabelResult {
    #[serde(default)]
    indications_and_usage: StringOrVec,
    effective_time: Option<String>,
    openfda: Option<LabelOpenFda>,
}

#[derive(Debug, Default, Deserialize)]
struct LabelOpenFda {
    #[serde(default)]
    brand_name: StringOrVec,
    #[serde(default)]
    generic_name: StringOrVec,
    #[serde(default)]
    product_type: StringOrVec,
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

    fn zelboraf_label() -> serde_json::Value {
        json!({
            "results": [{
                "effective_time": "20200110",
                "indications_and_usage": [
                    "ZELBORAF is indicated for the treatment of patients with unresectable or metastatic melanoma with BRAF V600E mutation as detected by an FDA-approved test."
                ],
                "openfda": {
                    "brand_name": ["ZELBORAF"],
                    "generic_name": ["VEMURAFENIB"],
                    "product_type": ["HUMAN PRESCRIPTION DRUG"]
                }
            }]
        })
    }

    #[tokio::test]
    async fn full_text_hit_sets_variant_mention_flag() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drug/label.json"))
            .and(query_param("search", "\"BRAF\" AND \"V600E\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(zelboraf_label()))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenFdaClient::new_for_test(server.uri()).unwrap();
        let fragment = client.fetch(&nv("BRAF", "V600E")).await.unwrap();

        assert!(fragment.mentions_variant_in_label);
        assert_eq!(fragment.approvals.len(), 1);
        assert_eq!(fragment.approvals[0].drug, "vemurafenib");
        assert_eq!(fragment.approvals[0].brand.as_deref(), Some("ZELBORAF"));
        assert_eq!(
            fragment.approvals[0].approval_date.as_deref(),
            Some("20200110")
        );
    }

    #[tokio::test]
    async fn empty_full_text_falls_back_to_indications_query() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drug/label.json"))
            .and(query_param("search", "\"BRAF\" AND \"G469A\""))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "NOT_FOUND", "message": "No matches found!"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/drug/label.json"))
            .and(query_param("search", "indications_and_usage:\"BRAF\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(zelboraf_label()))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenFdaClient::new_for_test(server.uri()).unwrap();
        let fragment = client.fetch(&nv("BRAF", "G469A")).await.unwrap();

        // Label exists for the gene, but G469A is never named in it.
        assert!(!fragment.mentions_variant_in_label);
        assert_eq!(fragment.approvals.len(), 1);
    }

    #[tokio::test]
    async fn not_found_on_both_queries_is_empty_fragment() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drug/label.json"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "NOT_FOUND", "message": "No matches found!"}
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = OpenFdaClient::new_for_test(server.uri()).unwrap();
        let fragment = client.fetch(&nv("TTN", "A100T")).await.unwrap();
        assert!(fragment.approvals.is_empty());
        assert!(!fragment.mentions_variant_in_label);
    }

    #[tokio::test]
    async fn client_error_surfaces_as_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drug/label.json"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad search"))
            .mount(&server)
            .await;

        let client = OpenFdaClient::new_for_test(server.uri()).unwrap();
        let err = client.fetch(&nv("BRAF", "V600E")).await.unwrap_err();
        assert!(matches!(err, OncoTierError::Api { .. }));
    }
}
