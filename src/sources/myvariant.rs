//! MyVariant.info client: database identifiers, functional scores, and the
//! ClinVar significance string the benign rule keys on.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::OncoTierError;
use crate::evidence::MyVariantFragment;
use crate::normalize::NormalizedVariant;
use crate::sources::is_valid_gene_symbol;
use crate::utils::serde::{FloatOrVec, StringOrVec};

const MYVARIANT_BASE: &str = "https://myvariant.info/v1";
const MYVARIANT_API: &str = "myvariant.info";
const MYVARIANT_BASE_ENV: &str = "ONCOTIER_MYVARIANT_BASE";

const MYVARIANT_FIELDS: &str = concat!(
    "_id,cadd.phred,",
    "clinvar.rcv.clinical_significance,clinvar.variant_id,clinvar.gene.id,",
    "cosmic.cosmic_id,",
    "dbnsfp.hgvsp,dbnsfp.polyphen2.hdiv.pred,dbnsfp.alphamissense.score,",
    "dbsnp.rsid,",
    "gnomad_exome.af.af"
);

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn de_vec_or_single<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value = Option::<OneOrMany<T>>::deserialize(deserializer)?;
    Ok(match value {
        Some(OneOrMany::One(v)) => vec![v],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}

pub struct MyVariantClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

impl MyVariantClient {
    pub fn new() -> Result<Self, OncoTierError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(MYVARIANT_BASE, MYVARIANT_BASE_ENV),
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
        let bytes = crate::sources::read_limited_body(resp, MYVARIANT_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(OncoTierError::Api {
                api: MYVARIANT_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        crate::sources::reject_html_payload(MYVARIANT_API, content_type.as_ref(), &bytes)?;
        serde_json::from_slice(&bytes).map_err(|source| OncoTierError::ApiJson {
            api: MYVARIANT_API.to_string(),
            source,
        })
    }

    /// Queries the variant with the three shapes the index answers for
    /// protein notation, in order: `GENE p.VARIANT`, `GENE:VARIANT`,
    /// `GENE VARIANT`. First shape with a hit wins; no shape hitting is a
    /// present-but-empty answer, not an error.
    pub async fn fetch(
        &self,
        variant: &NormalizedVariant,
    ) -> Result<MyVariantFragment, OncoTierError> {
        if !is_valid_gene_symbol(&variant.gene) {
            return Err(OncoTierError::InvalidArgument(
                "Gene symbol must contain only letters, numbers, '_' or '-'".into(),
            ));
        }

        let gene = crate::utils::query::escape_lucene_value(&variant.gene);
        let canonical = crate::utils::query::escape_lucene_value(&variant.variant_normalized);
        let shapes = [
            format!("{gene} p.{canonical}"),
            format!("{gene}\\:{canonical}"),
            format!("{gene} {canonical}"),
        ];

        for q in &shapes {
            let hits = self.query(q).await?;
            if let Some(hit) = hits.into_iter().next() {
                debug!(gene = %variant.gene, query = %q, "MyVariant query shape matched");
                return Ok(hit.into_fragment());
            }
        }

        Ok(MyVariantFragment::default())
    }

    async fn query(&self, q: &str) -> Result<Vec<MyVariantHit>, OncoTierError> {
        let url = self.endpoint("query");
        let resp: MyVariantQueryResponse = self
            .get_json(self.client.get(&url).query(&[
                ("q", q),
                ("size", "1"),
                ("fields", MYVARIANT_FIELDS),
            ]))
            .await?;
        Ok(resp.hits)
    }
}

#[derive(Debug, Deserialize)]
struct MyVariantQueryResponse {
    #[serde(default)]
    hits: Vec<MyVariantHit>,
}

#[derive(Debug, Deserialize)]
struct MyVariantHit {
    cadd: Option<WireCadd>,
    clinvar: Option<WireClinVar>,
    cosmic: Option<WireCosmic>,
    dbnsfp: Option<WireDbnsfp>,
    dbsnp: Option<WireDbsnp>,
    gnomad_exome: Option<WireGnomadExome>,
}

impl MyVariantHit {
    fn into_fragment(self) -> MyVariantFragment {
        let clinvar_significance = self.clinvar.as_ref().and_then(|cv| {
            cv.rcv
                .iter()
                .filter_map(|rcv| rcv.clinical_significance.as_deref())
                .map(|sig| sig.trim().to_string())
                .find(|sig| !sig.is_empty())
        });

        MyVariantFragment {
            cosmic_ids: self
                .cosmic
                .map(|c| c.cosmic_id.into_vec())
                .unwrap_or_default(),
            dbsnp_rsid: self.dbsnp.and_then(|d| d.rsid),
            clinvar_variant_id: self.clinvar.as_ref().and_then(|cv| cv.variant_id),
            ncbi_gene_id: self
                .clinvar
                .as_ref()
                .and_then(|cv| cv.gene.as_ref())
                .and_then(|g| g.id),
            hgvs_protein: self
                .dbnsfp
                .as_ref()
                .and_then(|d| d.hgvsp.first().map(str::to_string)),
            polyphen2_pred: self.dbnsfp.as_ref().and_then(|d| {
                d.polyphen2
                    .as_ref()
                    .and_then(|p| p.hdiv.as_ref())
                    .and_then(|h| h.pred.as_ref())
                    .and_then(|pred| pred.first().map(str::to_string))
            }),
            cadd_phred: self.cadd.and_then(|c| c.phred),
            gnomad_af: self
                .gnomad_exome
                .and_then(|g| g.af)
                .and_then(|af| af.af),
            alphamissense_score: self.dbnsfp.as_ref().and_then(|d| {
                d.alphamissense
                    .as_ref()
                    .and_then(|am| am.score.as_ref())
                    .and_then(FloatOrVec::first)
            }),
            clinvar_significance,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireCadd {
    phred: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireClinVar {
    variant_id: Option<u64>,
    gene: Option<WireClinVarGene>,
    #[serde(default, deserialize_with = "de_vec_or_single")]
    rcv: Vec<WireClinVarRcv>,
}

#[derive(Debug, Deserialize)]
struct WireClinVarGene {
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireClinVarRcv {
    clinical_significance: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCosmic {
    #[serde(default)]
    cosmic_id: StringOrVec,
}

#[derive(Debug, Deserialize)]
struct WireDbnsfp {
    #[serde(default)]
    hgvsp: StringOrVec,
    polyphen2: Option<WirePolyPhen2>,
    alphamissense: Option<WireAlphaMissense>,
}

#[derive(Debug, Deserialize)]
struct WirePolyPhen2 {
    hdiv: Option<WirePolyPhen2Hdiv>,
}

#[derive(Debug, Deserialize)]
struct WirePolyPhen2Hdiv {
    pred: Option<StringOrVec>,
}

#[derive(Debug, Deserialize)]
struct WireAlphaMissense {
    #[serde(alias = "am_pathogenicity")]
    score: Option<FloatOrVec>,
}

#[derive(Debug, Deserialize)]
struct WireDbsnp {
    rsid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireGnomadExome {
    af: Option<WireGnomadAf>,
}

#[derive(Debug, Deserialize)]
struct WireGnomadAf {
    af: Option<f64>,
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
    async fn falls_through_query_shapes_until_a_hit() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("q", "BRAF p.V600E"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"total": 0, "hits": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("q", "BRAF\\:V600E"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "hits": [{
                    "_id": "chr7:g.140453136A>T",
                    "cadd": {"phred": 32.0},
                    "clinvar": {
                        "variant_id": 13961,
                        "gene": {"id": 673},
                        "rcv": [{"clinical_significance": "Pathogenic"}]
                    },
                    "cosmic": {"cosmic_id": "COSM476"},
                    "dbnsfp": {
                        "hgvsp": ["p.V600E", "p.Val600Glu"],
                        "polyphen2": {"hdiv": {"pred": "D"}},
                        "alphamissense": {"score": 0.974}
                    },
                    "dbsnp": {"rsid": "rs113488022"},
                    "gnomad_exome": {"af": {"af": 0.0000040}}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = MyVariantClient::new_for_test(server.uri()).unwrap();
        let fragment = client.fetch(&nv("BRAF", "V600E")).await.unwrap();

        assert_eq!(fragment.cosmic_ids, vec!["COSM476"]);
        assert_eq!(fragment.dbsnp_rsid.as_deref(), Some("rs113488022"));
        assert_eq!(fragment.clinvar_variant_id, Some(13961));
        assert_eq!(fragment.ncbi_gene_id, Some(673));
        assert_eq!(fragment.hgvs_protein.as_deref(), Some("p.V600E"));
        assert_eq!(fragment.polyphen2_pred.as_deref(), Some("D"));
        assert_eq!(fragment.cadd_phred, Some(32.0));
        assert_eq!(fragment.alphamissense_score, Some(0.974));
        assert_eq!(fragment.clinvar_significance.as_deref(), Some("Pathogenic"));
        assert!(!fragment.is_clinvar_benign());
    }

    #[tokio::test]
    async fn no_hits_on_any_shape_is_present_but_empty() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"total": 0, "hits": []})),
            )
            .expect(3)
            .mount(&server)
            .await;

        let client = MyVariantClient::new_for_test(server.uri()).unwrap();
        let fragment = client.fetch(&nv("KRAS", "G12C")).await.unwrap();
        assert!(fragment.cosmic_ids.is_empty());
        assert!(fragment.clinvar_significance.is_none());
    }

    #[tokio::test]
    async fn server_error_surfaces_as_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad query"))
            .mount(&server)
            .await;

        let client = MyVariantClient::new_for_test(server.uri()).unwrap();
        let err = client.fetch(&nv("BRAF", "V600E")).await.unwrap_err();
        assert!(matches!(err, OncoTierError::Api { .. }));
        assert!(err.to_string().contains("myvariant.info"));
    }
}
