//! The evidence dossier: one slot per upstream source plus the derived
//! counters the tier engine reads.
//!
//! A missing source is `Absent` and is distinct from present-but-empty; the
//! engine needs "temporarily unavailable" and "no evidence exists" to stay
//! different answers, and confidence is penalized only for the former.

pub mod fragments;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::normalize::NormalizedVariant;
pub use fragments::{
    CgiBiomarker, CgiEvidenceStatus, CgiFragment, CivicAssertionRecord, CivicEvidenceRecord,
    CivicFragment, CivicSignificance, EvidenceLevel, FdaApproval, FdaFragment, LiteratureEvidenceTag,
    LiteratureFragment, LiteratureKnowledge, LiteratureSignal, MutationOrigin, MyVariantFragment,
    ResponseSignal, ScoredPaper, TrialRecord, TrialsFragment, ViccAssociation, ViccFragment,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceSlot<T> {
    Absent { degraded: bool },
    Present { data: T },
}

impl<T> SourceSlot<T> {
    pub fn absent() -> Self {
        Self::Absent { degraded: false }
    }

    pub fn degraded() -> Self {
        Self::Absent { degraded: true }
    }

    pub fn present(data: T) -> Self {
        Self::Present { data }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Present { data } => Some(data),
            Self::Absent { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub d: usize,
}

impl LevelCounts {
    pub fn bump(&mut self, level: EvidenceLevel) {
        match level {
            EvidenceLevel::A => self.a += 1,
            EvidenceLevel::B => self.b += 1,
            EvidenceLevel::C => self.c += 1,
            EvidenceLevel::D => self.d += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.a + self.b + self.c + self.d
    }

    pub fn high_quality(&self) -> usize {
        self.a + self.b
    }

    pub fn low_quality(&self) -> usize {
        self.c + self.d
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DominantSignal {
    NoSignal,
    SensitivityOnly,
    ResistanceOnly,
    SensitivityDominant,
    ResistanceDominant,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetSignal {
    Sensitive,
    Resistant,
    Mixed,
}

/// Per-drug aggregation over every therapeutic signal in the dossier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugCall {
    pub drug: String,
    pub net: NetSignal,
    pub best_level: EvidenceLevel,
    pub sensitivity: usize,
    pub resistance: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceSummary {
    pub sensitivity: LevelCounts,
    pub resistance: LevelCounts,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    pub dominant_signal: DominantSignal,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drug_calls: Vec<DrugCall>,
}

impl Default for DominantSignal {
    fn default() -> Self {
        Self::NoSignal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub variant: NormalizedVariant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tumor_type: Option<String>,
    pub myvariant: SourceSlot<MyVariantFragment>,
    pub fda: SourceSlot<FdaFragment>,
    pub cgi: SourceSlot<CgiFragment>,
    pub vicc: SourceSlot<ViccFragment>,
    pub civic: SourceSlot<CivicFragment>,
    pub literature: SourceSlot<LiteratureFragment>,
    pub trials: SourceSlot<TrialsFragment>,
    /// OncoKB cancer-gene list membership.
    pub cancer_gene: SourceSlot<bool>,
    pub summary: EvidenceSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SignalEntry {
    pub drug: String,
    pub response: ResponseSignal,
    pub level: EvidenceLevel,
}

impl Evidence {
    pub fn new(variant: NormalizedVariant, tumor_type: Option<String>) -> Self {
        Self {
            variant,
            tumor_type,
            myvariant: SourceSlot::absent(),
            fda: SourceSlot::absent(),
            cgi: SourceSlot::absent(),
            vicc: SourceSlot::absent(),
            civic: SourceSlot::absent(),
            literature: SourceSlot::absent(),
            trials: SourceSlot::absent(),
            cancer_gene: SourceSlot::absent(),
            summary: EvidenceSummary::default(),
        }
    }

    pub fn is_cancer_gene(&self) -> bool {
        self.cancer_gene.get().copied().unwrap_or(false)
    }

    /// Sources to penalize in the confidence score: absent or degraded,
    /// never present-but-empty.
    pub fn missing_source_count(&self) -> usize {
        [
            self.myvariant.is_present(),
            self.fda.is_present(),
            self.cgi.is_present(),
            self.vicc.is_present(),
            self.civic.is_present(),
            self.literature.is_present(),
            self.trials.is_present(),
            self.cancer_gene.is_present(),
        ]
        .iter()
        .filter(|present| !**present)
        .count()
    }

    /// Dedup in-fragment collections, then recompute the derived summary.
    /// Called once by the aggregator after all slots are filled.
    pub fn finalize(&mut self) {
        if let SourceSlot::Present { data } = &mut self.trials {
            dedup_by_key(&mut data.trials, |t| t.nct_id.to_uppercase());
        }
        if let SourceSlot::Present { data } = &mut self.literature {
            dedup_by_key(&mut data.papers, |p| p.paper_id.clone());
        }
        if let SourceSlot::Present { data } = &mut self.fda {
            dedup_by_key(&mut data.approvals, |a| a.drug.to_lowercase());
        }
        self.summary = compute_summary(&self.signal_entries());
    }

    /// Every therapeutic signal in the dossier, flattened to
    /// `(drug, response, level)`. Non-predictive CIViC items carry no drug
    /// signal and are skipped here.
    pub(crate) fn signal_entries(&self) -> Vec<SignalEntry> {
        let mut entries = Vec::new();

        if let Some(cgi) = self.cgi.get() {
            for biomarker in &cgi.biomarkers {
                let level = biomarker.evidence_status.evidence_level();
                for drug in &biomarker.drugs {
                    push_entry(&mut entries, drug, biomarker.response, level);
                }
            }
        }

        if let Some(vicc) = self.vicc.get() {
            for assoc in &vicc.associations {
                if let Some(drug) = assoc.drug.as_deref() {
                    push_entry(&mut entries, drug, assoc.response, assoc.evidence_level);
                }
            }
        }

        if let Some(civic) = self.civic.get() {
            for item in &civic.evidence_items {
                if item.significance != CivicSignificance::Predictive {
                    continue;
                }
                let Some(response) = item.response else {
                    continue;
                };
                for drug in &item.therapies {
                    push_entry(&mut entries, drug, response, item.level);
                }
            }
        }

        if let Some(literature) = self.literature.get() {
            if let Some(knowledge) = &literature.knowledge {
                let level = knowledge
                    .evidence_level_tag
                    .map(LiteratureEvidenceTag::evidence_level)
                    .unwrap_or(EvidenceLevel::C);
                for drug in &knowledge.sensitive_to {
                    push_entry(&mut entries, drug, ResponseSignal::Sensitive, level);
                }
                for drug in &knowledge.resistant_to {
                    push_entry(&mut entries, drug, ResponseSignal::Resistant, level);
                }
            }
        }

        entries
    }
}

fn push_entry(
    entries: &mut Vec<SignalEntry>,
    drug: &str,
    response: ResponseSignal,
    level: EvidenceLevel,
) {
    let drug = drug.trim();
    if drug.is_empty() {
        return;
    }
    entries.push(SignalEntry {
        drug: drug.to_string(),
        response,
        level,
    });
}

/// Low-quality minority filter: when one side has A/B evidence and the other
/// side has only C/D with at most two entries, the minority side is noise
/// and is dropped. The >2 cutoff preserves multiply-sourced signals. The
/// filter is idempotent: once a side is empty, nothing further fires.
pub(crate) fn minority_filter(entries: &[SignalEntry]) -> Vec<SignalEntry> {
    let mut sensitivity = LevelCounts::default();
    let mut resistance = LevelCounts::default();
    for entry in entries {
        match entry.response {
            ResponseSignal::Sensitive => sensitivity.bump(entry.level),
            ResponseSignal::Resistant => resistance.bump(entry.level),
        }
    }

    let drop_resistance = sensitivity.high_quality() > 0
        && resistance.high_quality() == 0
        && resistance.low_quality() > 0
        && resistance.low_quality() <= 2;
    let drop_sensitivity = resistance.high_quality() > 0
        && sensitivity.high_quality() == 0
        && sensitivity.low_quality() > 0
        && sensitivity.low_quality() <= 2;

    entries
        .iter()
        .filter(|entry| match entry.response {
            ResponseSignal::Resistant => !drop_resistance,
            ResponseSignal::Sensitive => !drop_sensitivity,
        })
        .cloned()
        .collect()
}

pub(crate) fn compute_summary(raw_entries: &[SignalEntry]) -> EvidenceSummary {
    let entries = minority_filter(raw_entries);

    let mut sensitivity = LevelCounts::default();
    let mut resistance = LevelCounts::default();
    for entry in &entries {
        match entry.response {
            ResponseSignal::Sensitive => sensitivity.bump(entry.level),
            ResponseSignal::Resistant => resistance.bump(entry.level),
        }
    }

    // Group by case-insensitive generic name; keep the first-seen spelling.
    let mut by_drug: BTreeMap<String, (String, usize, usize, EvidenceLevel)> = BTreeMap::new();
    for entry in &entries {
        let key = entry.drug.to_lowercase();
        let slot = by_drug
            .entry(key)
            .or_insert_with(|| (entry.drug.clone(), 0, 0, entry.level));
        match entry.response {
            ResponseSignal::Sensitive => slot.1 += 1,
            ResponseSignal::Resistant => slot.2 += 1,
        }
        slot.3 = slot.3.better_of(entry.level);
    }

    let mut conflicts = Vec::new();
    let mut drug_calls = Vec::new();
    for (_, (drug, sens, res, best_level)) in by_drug {
        if sens > 0 && res > 0 {
            conflicts.push(drug.clone());
        }
        let net = if res == 0 {
            NetSignal::Sensitive
        } else if sens == 0 {
            NetSignal::Resistant
        } else if sens >= res * 3 {
            NetSignal::Sensitive
        } else if res >= sens * 3 {
            NetSignal::Resistant
        } else {
            NetSignal::Mixed
        };
        drug_calls.push(DrugCall {
            drug,
            net,
            best_level,
            sensitivity: sens,
            resistance: res,
        });
    }

    let dominant_signal = dominant_signal(sensitivity.total(), resistance.total());

    EvidenceSummary {
        sensitivity,
        resistance,
        conflicts,
        dominant_signal,
        drug_calls,
    }
}

fn dominant_signal(sens: usize, res: usize) -> DominantSignal {
    match (sens, res) {
        (0, 0) => DominantSignal::NoSignal,
        (_, 0) => DominantSignal::SensitivityOnly,
        (0, _) => DominantSignal::ResistanceOnly,
        (s, r) => {
            let share = s as f64 / (s + r) as f64;
            if share > 0.8 {
                DominantSignal::SensitivityDominant
            } else if share < 0.2 {
                DominantSignal::ResistanceDominant
            } else {
                DominantSignal::Mixed
            }
        }
    }
}

fn dedup_by_key<T, K: Ord>(items: &mut Vec<T>, key: impl Fn(&T) -> K) {
    let mut seen = std::collections::BTreeSet::new();
    items.retain(|item| seen.insert(key(item)));
}
