//! Typed per-source evidence fragments.
//!
//! Each upstream client parses its wire format at the boundary and emits one
//! of these strict structs; nothing JSON-shaped crosses into the aggregator
//! or the tier engine. Missing upstream fields stay `None` rather than being
//! defaulted.

use serde::{Deserialize, Serialize};

use crate::tier::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvidenceLevel {
    /// Validated / FDA-recognized.
    A,
    /// Clinical evidence.
    B,
    /// Case series.
    C,
    /// Preclinical.
    D,
}

impl EvidenceLevel {
    pub fn is_high_quality(self) -> bool {
        matches!(self, Self::A | Self::B)
    }

    /// Best = A. `min` on the derived `Ord` gives the better level.
    pub fn better_of(self, other: Self) -> Self {
        self.min(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSignal {
    Sensitive,
    Resistant,
}

// --- MyVariant -------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MyVariantFragment {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cosmic_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dbsnp_rsid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinvar_variant_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ncbi_gene_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hgvs_protein: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polyphen2_pred: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cadd_phred: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gnomad_af: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alphamissense_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinvar_significance: Option<String>,
}

impl MyVariantFragment {
    /// Tier IV trigger: explicit ClinVar benign / likely benign only.
    pub fn is_clinvar_benign(&self) -> bool {
        self.clinvar_significance
            .as_deref()
            .map(|sig| {
                let sig = sig.trim().to_lowercase().replace('_', " ");
                sig == "benign" || sig == "likely benign"
            })
            .unwrap_or(false)
    }
}

// --- FDA -------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FdaApproval {
    pub drug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    pub indication_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marketing_status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FdaFragment {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvals: Vec<FdaApproval>,
    pub mentions_variant_in_label: bool,
}

// --- CGI -------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CgiEvidenceStatus {
    Fda,
    Nccn,
    Clinical,
    Preclinical,
}

impl CgiEvidenceStatus {
    pub fn evidence_level(self) -> EvidenceLevel {
        match self {
            Self::Fda => EvidenceLevel::A,
            Self::Nccn => EvidenceLevel::B,
            Self::Clinical => EvidenceLevel::C,
            Self::Preclinical => EvidenceLevel::D,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CgiBiomarker {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drugs: Vec<String>,
    pub response: ResponseSignal,
    pub evidence_status: CgiEvidenceStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tumor_tokens: Vec<String>,
    pub variant_pattern: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CgiFragment {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub biomarkers: Vec<CgiBiomarker>,
}

// --- VICC ------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViccAssociation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drug: Option<String>,
    pub response: ResponseSignal,
    pub evidence_level: EvidenceLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oncokb_level: Option<String>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tumor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViccFragment {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub associations: Vec<ViccAssociation>,
}

// --- CIViC -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CivicSignificance {
    Predictive,
    Prognostic,
    Diagnostic,
    Oncogenic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CivicEvidenceRecord {
    pub level: EvidenceLevel,
    pub significance: CivicSignificance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSignal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub therapies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disease: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CivicAssertionRecord {
    pub amp_tier: Tier,
    pub amp_level: EvidenceLevel,
    pub significance: CivicSignificance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSignal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub therapies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disease: Option<String>,
    pub fda_companion_test: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nccn_guideline: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CivicFragment {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_items: Vec<CivicEvidenceRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<CivicAssertionRecord>,
}

// --- Literature ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteratureSignal {
    Sensitivity,
    Resistance,
    Prognostic,
    Mixed,
    Irrelevant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPaper {
    pub paper_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub citations: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tldr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    /// LLM relevance score in [0, 1].
    pub score: f64,
    pub signal: LiteratureSignal,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drugs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOrigin {
    /// Driver present at diagnosis.
    Primary,
    /// Acquired under therapy.
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteratureEvidenceTag {
    FdaApproved,
    Phase3,
    EarlyTrials,
    CaseReports,
    Preclinical,
}

impl LiteratureEvidenceTag {
    pub fn evidence_level(self) -> EvidenceLevel {
        match self {
            Self::FdaApproved => EvidenceLevel::A,
            Self::Phase3 => EvidenceLevel::B,
            Self::EarlyTrials | Self::CaseReports => EvidenceLevel::C,
            Self::Preclinical => EvidenceLevel::D,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteratureKnowledge {
    pub mutation_type: MutationOrigin,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resistant_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensitive_to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_level_tag: Option<LiteratureEvidenceTag>,
    pub rationale: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiteratureFragment {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub papers: Vec<ScoredPaper>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<LiteratureKnowledge>,
}

// --- ClinicalTrials --------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub nct_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub variant_explicitly_mentioned: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drugs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sponsor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrialsFragment {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trials: Vec<TrialRecord>,
}
