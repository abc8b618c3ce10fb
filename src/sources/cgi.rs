//! Cancer Genome Interpreter biomarker catalog.
//!
//! CGI publishes its curated drug-biomarker associations as one bulk TSV.
//! The catalog is downloaded at most once per TTL window (default 7 days),
//! written under the cache directory with an atomic rename, and guarded by a
//! process-wide single-writer mutex; readers always parse the last complete
//! copy. Variant columns use position wildcards: `V600.` is any V600
//! substitution, `.12.` any amino acid at position 12, `.` any variant of
//! the gene.

use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::OncoTierError;
use crate::evidence::{CgiBiomarker, CgiEvidenceStatus, CgiFragment, ResponseSignal};
use crate::normalize::NormalizedVariant;
use crate::utils::download;

const CGI_CATALOG_BASE: &str =
    "https://www.cancergenomeinterpreter.org/data/biomarkers/cgi_biomarkers_per_variant.tsv";
const CGI_API: &str = "cgi";
const CGI_CATALOG_ENV: &str = "ONCOTIER_CGI_CATALOG_URL";

pub struct CgiClient {
    catalog_url: Cow<'static, str>,
    ttl: Duration,
    retries: u32,
}

impl CgiClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            catalog_url: crate::sources::env_base(CGI_CATALOG_BASE, CGI_CATALOG_ENV),
            ttl: Duration::from_secs(settings.cgi_cache_ttl_days * 24 * 60 * 60),
            retries: settings.retries,
        }
    }

    #[cfg(test)]
    fn new_for_test(catalog_url: String, ttl: Duration) -> Self {
        Self {
            catalog_url: Cow::Owned(catalog_url),
            ttl,
            retries: 0,
        }
    }

    pub async fn fetch(
        &self,
        variant: &NormalizedVariant,
    ) -> Result<CgiFragment, OncoTierError> {
        let catalog = self.catalog_text().await?;
        Ok(parse_catalog(
            &catalog,
            &variant.gene,
            &variant.variant_normalized,
        ))
    }

    async fn catalog_text(&self) -> Result<String, OncoTierError> {
        let path = download::catalog_path(self.catalog_url.as_ref());
        if download::is_fresh(&path, self.ttl).await {
            return Ok(tokio::fs::read_to_string(&path).await?);
        }

        // Single-writer: one downloader at a time; everyone else either
        // finds the fresh copy on re-check or reads the one just written.
        let _guard = download::download_mutex().lock().await;
        if download::is_fresh(&path, self.ttl).await {
            return Ok(tokio::fs::read_to_string(&path).await?);
        }

        match self.download_catalog().await {
            Ok(body) => {
                let written = download::save_atomic(self.catalog_url.as_ref(), &body).await?;
                debug!(path = %written.display(), "CGI catalog refreshed");
                Ok(body)
            }
            Err(err) => {
                // A stale copy beats no copy when the refresh fails.
                if tokio::fs::metadata(&path).await.is_ok() {
                    warn!(error = %err, "CGI catalog refresh failed; using stale copy");
                    return Ok(tokio::fs::read_to_string(&path).await?);
                }
                Err(err)
            }
        }
    }

    async fn download_catalog(&self) -> Result<String, OncoTierError> {
        let client = crate::sources::streaming_client()?;
        let url = self.catalog_url.to_string();
        let resp = crate::sources::send_with_retry(CGI_API, self.retries, || {
            client.get(&url).send()
        })
        .await?;

        let status = resp.status();
        let bytes = crate::sources::read_body_with_limit(
            resp,
            CGI_API,
            crate::sources::CATALOG_MAX_BODY_BYTES,
        )
        .await?;
        if !status.is_success() {
            return Err(OncoTierError::Api {
                api: CGI_API.to_string(),
                message: format!("HTTP {status}: {}", crate::sources::body_excerpt(&bytes)),
            });
        }

        String::from_utf8(bytes).map_err(|_| OncoTierError::Api {
            api: CGI_API.to_string(),
            message: "Catalog is not valid UTF-8".into(),
        })
    }
}

/// `V600E`, `V600.`, `.600.`, `.12.`, `.` — residues with `.` wildcards.
fn pattern_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z.])(\d+)([A-Z*.]*)$").expect("static regex")
    })
}

/// Matches a catalog variant pattern against the canonical short form.
pub(crate) fn variant_pattern_matches(pattern: &str, canonical: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() || pattern == "." {
        return true;
    }
    let canonical_upper = canonical.trim().to_uppercase();
    let pattern_upper = pattern.to_uppercase();
    if pattern_upper == canonical_upper {
        return true;
    }

    let (Some(p), Some(c)) = (
        pattern_re().captures(&pattern_upper),
        pattern_re().captures(&canonical_upper),
    ) else {
        return false;
    };

    if p[2] != c[2] {
        return false;
    }
    let ref_ok = &p[1] == "." || p[1] == c[1];
    let alt_ok = p[3].is_empty() || &p[3] == "." || p[3] == c[3];
    ref_ok && alt_ok
}

fn parse_response(raw: &str) -> Option<ResponseSignal> {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    if lowered.starts_with("no responsive") || lowered.starts_with("resistant") {
        return Some(ResponseSignal::Resistant);
    }
    if lowered.starts_with("responsive") {
        return Some(ResponseSignal::Sensitive);
    }
    None
}

fn parse_evidence_status(raw: &str) -> CgiEvidenceStatus {
    let lowered = raw.trim().to_lowercase();
    if lowered.contains("fda") {
        CgiEvidenceStatus::Fda
    } else if lowered.contains("nccn") || lowered.contains("guideline") {
        CgiEvidenceStatus::Nccn
    } else if lowered.contains("pre-clinical")
        || lowered.contains("preclinical")
        || lowered.contains("case report")
    {
        CgiEvidenceStatus::Preclinical
    } else if lowered.contains("trial") || lowered.contains("clinical") {
        CgiEvidenceStatus::Clinical
    } else {
        CgiEvidenceStatus::Preclinical
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split([';', ','])
        .map(|part| {
            part.trim()
                .trim_matches(['[', ']'])
                .trim()
                .to_string()
        })
        .filter(|part| !part.is_empty())
        .collect()
}

/// Strips the `GENE:` prefix CGI writes in `individual_mutation`.
fn pattern_token(raw: &str, gene: &str) -> String {
    let raw = raw.trim();
    match raw.split_once(':') {
        Some((prefix, rest)) if prefix.eq_ignore_ascii_case(gene) => rest.trim().to_string(),
        _ => raw.to_string(),
    }
}

pub(crate) fn parse_catalog(catalog: &str, gene: &str, canonical: &str) -> CgiFragment {
    let mut lines = catalog.lines();
    let Some(header) = lines.next() else {
        return CgiFragment::default();
    };
    let columns: Vec<&str> = header.split('\t').collect();
    let col = |name: &str| {
        columns
            .iter()
            .position(|c| c.trim().eq_ignore_ascii_case(name))
    };

    let Some(gene_col) = col("Gene") else {
        return CgiFragment::default();
    };
    let mutation_col = col("individual_mutation").or_else(|| col("Alteration"));
    let drug_col = col("Drug");
    let association_col = col("Association");
    let evidence_col = col("Evidence level");
    let tumor_col = col("Primary Tumor type");

    let mut biomarkers = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split('\t').collect();
        let cell = |idx: Option<usize>| idx.and_then(|i| fields.get(i)).map_or("", |v| v.trim());

        if !cell(Some(gene_col)).eq_ignore_ascii_case(gene) {
            continue;
        }

        let pattern = pattern_token(cell(mutation_col), gene);
        if !variant_pattern_matches(&pattern, canonical) {
            continue;
        }

        let Some(response) = parse_response(cell(association_col)) else {
            continue;
        };

        biomarkers.push(CgiBiomarker {
            drugs: split_list(cell(drug_col)),
            response,
            evidence_status: parse_evidence_status(cell(evidence_col)),
            tumor_tokens: split_list(cell(tumor_col)),
            variant_pattern: pattern,
        });
    }

    CgiFragment { biomarkers }
}
