//! ClinicalTrials.gov v2 client.
//!
//! Variant-level query first (`GENE VARIANT`), gene-level fallback when it
//! returns nothing. Each trial is flagged when the variant is literally
//! named in its eligibility criteria, arm descriptions, or intervention
//! names; that flag is what the trial branch of the tier engine reads.
//! Only actively enrolling studies are requested.

use std::borrow::Cow;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::OncoTierError;
use crate::evidence::{TrialRecord, TrialsFragment};
use crate::normalize::NormalizedVariant;

const CTGOV_BASE: &str = "https://clinicaltrials.gov/api/v2";
const CTGOV_API: &str = "clinicaltrials.gov";
const CTGOV_BASE_ENV: &str = "ONCOTIER_CTGOV_BASE";
const CTGOV_PAGE_SIZE: usize = 25;
const ACTIVE_STATUSES: &str = "RECRUITING|NOT_YET_RECRUITING|ACTIVE_NOT_RECRUITING|ENROLLING_BY_INVITATION";

pub struct ClinicalTrialsClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

impl ClinicalTrialsClient {
    pub fn new() -> Result<Self, OncoTierError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(CTGOV_BASE, CTGOV_BASE_ENV),
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
        let bytes = crate::sources::read_limited_body(resp, CTGOV_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(OncoTierError::Api {
                api: CTGOV_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        serde_json::from_slice(&bytes).map_err(|source| OncoTierError::ApiJson {
            api: CTGOV_API.to_string(),
            source,
        })
    }

    async fn search(&self, term: &str, tumor: Option<&str>) -> Result<Vec<WireStudy>, OncoTierError> {
        let url = self.endpoint("studies");
        let page_size = CTGOV_PAGE_SIZE.to_string();
        let mut req = self.client.get(&url).query(&[
            ("query.term", term),
            ("filter.overallStatus", ACTIVE_STATUSES),
            ("pageSize", page_size.as_str()),
        ]);
        if let Some(cond) = tumor {
            req = req.query(&[("query.cond", cond)]);
        }
        let resp: StudiesResponse = self.get_json(req).await?;
        Ok(resp.studies)
    }

    pub async fn fetch(
        &self,
        variant: &NormalizedVariant,
        tumor_type: Option<&str>,
    ) -> Result<TrialsFragment, OncoTierError> {
        let variant_term = format!("{} {}", variant.gene, variant.variant_normalized);
        let mut studies = self.search(&variant_term, tumor_type).await?;
        if studies.is_empty() {
            studies = self.search(&variant.gene, tumor_type).await?;
        }

        let trials = studies
            .into_iter()
            .filter_map(|study| study.into_record(&variant.variant_normalized))
            .collect();
        Ok(TrialsFragment { trials })
    }
}

#[derive(Debug, Deserialize)]
struct StudiesResponse {
    #[serde(default)]
    studies: Vec<WireStudy>,
}

#[derive(Debug, Deserialize)]
struct WireStudy {
    #[serde(rename = "protocolSection")]
    protocol: Option<WireProtocolSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProtocolSection {
    identification_module: Option<WireIdentification>,
    status_module: Option<WireStatus>,
    design_module: Option<WireDesign>,
    arms_interventions_module: Option<WireArms>,
    eligibility_module: Option<WireEligibility>,
    sponsor_collaborators_module: Option<WireSponsors>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIdentification {
    nct_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStatus {
    overall_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDesign {
    #[serde(default)]
    phases: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireArms {
    #[serde(default)]
    interventions: Vec<WireIntervention>,
    #[serde(default)]
    arm_groups: Vec<WireArmGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIntervention {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireArmGroup {
    label: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEligibility {
    eligibility_criteria: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSponsors {
    lead_sponsor: Option<WireSponsor>,
}

#[derive(Debug, Deserialize)]
struct WireSponsor {
    name: Option<String>,
}

impl WireStudy {
    fn into_record(self, canonical: &str) -> Option<TrialRecord> {
        let protocol = self.protocol?;
        let nct_id = protocol
            .identification_module
            .as_ref()
            .and_then(|m| m.nct_id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())?
            .to_string();

        let needle = canonical.to_lowercase();
        let hgvs_needle = format!("p.{needle}");
        let mut haystacks: Vec<String> = Vec::new();
        if let Some(eligibility) = protocol
            .eligibility_module
            .as_ref()
            .and_then(|m| m.eligibility_criteria.as_deref())
        {
            haystacks.push(eligibility.to_lowercase());
        }

        let mut drugs = Vec::new();
        if let Some(arms) = &protocol.arms_interventions_module {
            for intervention in &arms.interventions {
                let Some(name) = intervention.name.as_deref().map(str::trim) else {
                    continue;
                };
                haystacks.push(name.to_lowercase());
                let is_drug = intervention
                    .kind
                    .as_deref()
                    .is_none_or(|kind| kind.eq_ignore_ascii_case("DRUG"));
                if is_drug && !name.is_empty() {
                    drugs.push(name.to_string());
                }
            }
            for arm in &arms.arm_groups {
                if let Some(label) = arm.label.as_deref() {
                    haystacks.push(label.to_lowercase());
                }
                if let Some(description) = arm.description.as_deref() {
                    haystacks.push(description.to_lowercase());
                }
            }
        }

        let variant_explicitly_mentioned = haystacks
            .iter()
            .any(|text| text.contains(&needle) || text.contains(&hgvs_needle));

        Some(TrialRecord {
            nct_id,
            phase: protocol
                .design_module
                .and_then(|m| m.phases.into_iter().next())
                .filter(|p| !p.trim().is_empty()),
            status: protocol
                .status_module
                .and_then(|m| m.overall_status)
                .filter(|s| !s.trim().is_empty()),
            variant_explicitly_mentioned,
            drugs,
            sponsor: protocol
                .sponsor_collaborators_module
                .and_then(|m| m.lead_sponsor)
                .and_then(|s| s.name)
                .filter(|n| !n.trim().is_empty()),
        })
    }
}
