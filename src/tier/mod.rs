//! The deterministic tier engine.
//!
//! `get_tier_hint` is a pure function from the evidence dossier, the tumor
//! type, and the configuration tables to an AMP/ASCO/CAP tier. The decision
//! procedure is a prioritized cascade of rules held in data; the first rule
//! that fires wins. Nothing downstream (narrator included) can change the
//! outcome.

pub mod tables;

use serde::{Deserialize, Serialize};

use crate::evidence::{
    CgiEvidenceStatus, CivicSignificance, Evidence, EvidenceLevel, LiteratureEvidenceTag,
    ResponseSignal,
};
use crate::tumor::{any_tumor_matches, same_tumor, text_mentions_tumor};
pub use tables::{GeneContext, global_context};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    I,
    II,
    III,
    IV,
}

impl Tier {
    /// I=1 .. IV=4, the scale used for tier distance.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::I => 1,
            Self::II => 2,
            Self::III => 3,
            Self::IV => 4,
        }
    }

    pub fn distance(self, other: Self) -> u8 {
        self.ordinal().abs_diff(other.ordinal())
    }

    pub const ALL: [Tier; 4] = [Tier::I, Tier::II, Tier::III, Tier::IV];

    /// Accepts `I`/`II`/`III`/`IV`, `1`..`4`, and a leading `Tier ` prefix.
    pub fn from_label(raw: &str) -> Option<Self> {
        let cleaned = raw.trim().to_uppercase();
        let cleaned = cleaned.strip_prefix("TIER").unwrap_or(&cleaned).trim();
        match cleaned {
            "I" | "1" => Some(Self::I),
            "II" | "2" => Some(Self::II),
            "III" | "3" => Some(Self::III),
            "IV" | "4" => Some(Self::IV),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::I => "I",
            Self::II => "II",
            Self::III => "III",
            Self::IV => "IV",
        };
        f.write_str(label)
    }
}

/// Internal refinement within a tier; not exposed to end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubLevel {
    A,
    B,
    C,
    D,
}

impl std::fmt::Display for SubLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Benign,
    SubtypeDefining,
    FdaVariantInTumor,
    LiteratureStrong,
    InvestigationalOnly,
    TrialVariantSpecific,
    ResistanceWithAlt,
    ResistanceNoAlt,
    PrognosticStrong,
    PrognosticWeak,
    Offlabel,
    GeneLevel,
    GeneLevelWeak,
    VusInCancerGene,
    NoEvidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierResult {
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sublevel: Option<SubLevel>,
    pub reason_code: ReasonCode,
    pub human_reason: String,
    pub confidence: f64,
}

struct RuleOutcome {
    tier: Tier,
    sublevel: Option<SubLevel>,
    reason: String,
}

type RuleFn = fn(&Evidence, Option<&str>, &GeneContext) -> Option<RuleOutcome>;

/// One branch of the cascade: a predicate plus its outcome.
pub struct TierRule {
    pub reason_code: ReasonCode,
    eval: RuleFn,
}

/// The ordered decision cascade. Investigational-only sits ahead of the
/// trial branch: a pair in that table stays Tier III regardless of open
/// trials.
pub const CASCADE: &[TierRule] = &[
    TierRule {
        reason_code: ReasonCode::Benign,
        eval: rule_benign,
    },
    TierRule {
        reason_code: ReasonCode::SubtypeDefining,
        eval: rule_subtype,
    },
    TierRule {
        reason_code: ReasonCode::FdaVariantInTumor,
        eval: rule_fda_variant_in_tumor,
    },
    TierRule {
        reason_code: ReasonCode::LiteratureStrong,
        eval: rule_literature_strong,
    },
    TierRule {
        reason_code: ReasonCode::InvestigationalOnly,
        eval: rule_investigational_only,
    },
    TierRule {
        reason_code: ReasonCode::TrialVariantSpecific,
        eval: rule_trial_variant_specific,
    },
    TierRule {
        reason_code: ReasonCode::ResistanceWithAlt,
        eval: rule_resistance,
    },
    TierRule {
        reason_code: ReasonCode::PrognosticStrong,
        eval: rule_prognostic,
    },
    TierRule {
        reason_code: ReasonCode::Offlabel,
        eval: rule_offlabel,
    },
    TierRule {
        reason_code: ReasonCode::GeneLevel,
        eval: rule_gene_level,
    },
    TierRule {
        reason_code: ReasonCode::VusInCancerGene,
        eval: rule_vus_in_cancer_gene,
    },
    TierRule {
        reason_code: ReasonCode::NoEvidence,
        eval: rule_no_evidence,
    },
];

/// Pure decision function: same dossier, tumor, and tables always produce
/// the same `(tier, sublevel, reason_code)`.
pub fn get_tier_hint(evidence: &Evidence, tumor: Option<&str>, ctx: &GeneContext) -> TierResult {
    for rule in CASCADE {
        if let Some(outcome) = (rule.eval)(evidence, tumor, ctx) {
            let reason_code = refine_reason_code(rule.reason_code, &outcome);
            let confidence =
                confidence_for(outcome.tier, outcome.sublevel, evidence.missing_source_count());
            return TierResult {
                tier: outcome.tier,
                sublevel: outcome.sublevel,
                reason_code,
                human_reason: outcome.reason,
                confidence,
            };
        }
    }
    unreachable!("cascade terminates with an unconditional default rule")
}

/// A handful of branches split into two reason codes on the same rule.
fn refine_reason_code(code: ReasonCode, outcome: &RuleOutcome) -> ReasonCode {
    match (code, outcome.tier, outcome.sublevel) {
        (ReasonCode::ResistanceWithAlt, Tier::II, _) => ReasonCode::ResistanceNoAlt,
        (ReasonCode::PrognosticStrong, Tier::III, _) => ReasonCode::PrognosticWeak,
        (ReasonCode::GeneLevel, Tier::II, Some(SubLevel::D)) => ReasonCode::GeneLevelWeak,
        _ => code,
    }
}

// --- confidence ------------------------------------------------------------

fn confidence_interval(tier: Tier, sublevel: Option<SubLevel>) -> (f64, f64) {
    match (tier, sublevel) {
        (Tier::I, Some(SubLevel::A)) => (0.90, 1.00),
        (Tier::I, _) => (0.80, 0.90),
        (Tier::II, Some(SubLevel::A)) => (0.75, 0.85),
        (Tier::II, Some(SubLevel::B)) => (0.65, 0.80),
        (Tier::II, Some(SubLevel::C)) => (0.60, 0.75),
        (Tier::II, _) => (0.55, 0.70),
        (Tier::III, Some(SubLevel::B)) => (0.40, 0.50),
        (Tier::III, Some(SubLevel::C)) => (0.35, 0.45),
        (Tier::III, Some(SubLevel::D)) => (0.30, 0.40),
        // III with no sublevel (investigational-only) and III-A share a slot.
        (Tier::III, _) => (0.45, 0.55),
        (Tier::IV, _) => (0.90, 1.00),
    }
}

/// Start at the interval ceiling and pay 0.05 per absent or degraded
/// source, never dropping below the interval floor.
fn confidence_for(tier: Tier, sublevel: Option<SubLevel>, missing_sources: usize) -> f64 {
    let (lo, hi) = confidence_interval(tier, sublevel);
    (hi - 0.05 * missing_sources as f64).max(lo)
}

// --- rule predicates -------------------------------------------------------

fn rule_benign(evidence: &Evidence, _tumor: Option<&str>, _ctx: &GeneContext) -> Option<RuleOutcome> {
    let myvariant = evidence.myvariant.get()?;
    if !myvariant.is_clinvar_benign() {
        return None;
    }
    Some(RuleOutcome {
        tier: Tier::IV,
        sublevel: None,
        reason: format!(
            "ClinVar classifies this variant as {}",
            myvariant.clinvar_significance.as_deref().unwrap_or("benign")
        ),
    })
}

fn rule_subtype(evidence: &Evidence, tumor: Option<&str>, ctx: &GeneContext) -> Option<RuleOutcome> {
    let note = ctx.subtype_note(
        &evidence.variant.gene,
        &evidence.variant.variant_normalized,
        tumor,
    )?;
    Some(RuleOutcome {
        tier: Tier::I,
        sublevel: Some(SubLevel::B),
        reason: format!("Molecular subtype-defining variant: {note}"),
    })
}

fn disease_matches(disease: Option<&str>, tumor: &str) -> bool {
    disease.is_some_and(|d| same_tumor(d, tumor) || text_mentions_tumor(d, tumor))
}

/// FDA label matched to the queried tumor: the label names the variant and
/// some indication text names the tumor (or no tumor was given).
fn fda_label_hit(evidence: &Evidence, tumor: Option<&str>, ctx: &GeneContext) -> bool {
    let Some(fda) = evidence.fda.get() else {
        return false;
    };
    if !fda.mentions_variant_in_label {
        return false;
    }
    let canonical = &evidence.variant.variant_normalized;
    if !ctx.admits_approval(&evidence.variant.gene, canonical, canonical) {
        return false;
    }
    match tumor {
        None => true,
        Some(tumor) => fda
            .approvals
            .iter()
            .any(|a| text_mentions_tumor(&a.indication_text, tumor)),
    }
}

fn civic_level_a_hit(evidence: &Evidence, tumor: Option<&str>, ctx: &GeneContext) -> bool {
    let Some(civic) = evidence.civic.get() else {
        return false;
    };
    let canonical = &evidence.variant.variant_normalized;
    if !ctx.admits_approval(&evidence.variant.gene, canonical, canonical) {
        return false;
    }
    civic.evidence_items.iter().any(|item| {
        item.level == EvidenceLevel::A
            && item.significance == CivicSignificance::Predictive
            && item.response == Some(ResponseSignal::Sensitive)
            && match tumor {
                None => true,
                Some(tumor) => disease_matches(item.disease.as_deref(), tumor),
            }
    })
}

/// Best CGI guideline-status sensitivity hit for this tumor: Some(A) for
/// FDA status, Some(B) for NCCN.
fn cgi_guideline_hit(
    evidence: &Evidence,
    tumor: Option<&str>,
    ctx: &GeneContext,
) -> Option<SubLevel> {
    let cgi = evidence.cgi.get()?;
    let canonical = &evidence.variant.variant_normalized;
    let mut best: Option<SubLevel> = None;
    for biomarker in &cgi.biomarkers {
        if biomarker.response != ResponseSignal::Sensitive {
            continue;
        }
        let sublevel = match biomarker.evidence_status {
            CgiEvidenceStatus::Fda => SubLevel::A,
            CgiEvidenceStatus::Nccn => SubLevel::B,
            _ => continue,
        };
        if !ctx.admits_approval(&evidence.variant.gene, canonical, &biomarker.variant_pattern) {
            continue;
        }
        if let Some(tumor) = tumor
            && !any_tumor_matches(tumor, &biomarker.tumor_tokens)
        {
            continue;
        }
        best = Some(best.map_or(sublevel, |b| b.min(sublevel)));
    }
    best
}

/// Best matching CIViC assertion at AMP Tier I: Some(A) or Some(B).
fn civic_assertion_hit(
    evidence: &Evidence,
    tumor: Option<&str>,
    ctx: &GeneContext,
) -> Option<SubLevel> {
    let civic = evidence.civic.get()?;
    let canonical = &evidence.variant.variant_normalized;
    if !ctx.admits_approval(&evidence.variant.gene, canonical, canonical) {
        return None;
    }
    let mut best: Option<SubLevel> = None;
    for assertion in &civic.assertions {
        if assertion.amp_tier != Tier::I
            || assertion.significance != CivicSignificance::Predictive
            || assertion.response != Some(ResponseSignal::Sensitive)
        {
            continue;
        }
        let sublevel = match assertion.amp_level {
            EvidenceLevel::A => SubLevel::A,
            EvidenceLevel::B => SubLevel::B,
            _ => continue,
        };
        if let Some(tumor) = tumor
            && !disease_matches(assertion.disease.as_deref(), tumor)
        {
            continue;
        }
        best = Some(best.map_or(sublevel, |b| b.min(sublevel)));
    }
    best
}

fn rule_fda_variant_in_tumor(
    evidence: &Evidence,
    tumor: Option<&str>,
    ctx: &GeneContext,
) -> Option<RuleOutcome> {
    let mut best: Option<SubLevel> = None;
    let mut keep_best = |candidate: SubLevel| {
        best = Some(best.map_or(candidate, |b| b.min(candidate)));
    };

    if fda_label_hit(evidence, tumor, ctx) {
        keep_best(SubLevel::A);
    }
    if civic_level_a_hit(evidence, tumor, ctx) {
        keep_best(SubLevel::A);
    }
    if let Some(sublevel) = cgi_guideline_hit(evidence, tumor, ctx) {
        keep_best(sublevel);
    }
    if let Some(sublevel) = civic_assertion_hit(evidence, tumor, ctx) {
        keep_best(sublevel);
    }

    let sublevel = best?;
    Some(RuleOutcome {
        tier: Tier::I,
        sublevel: Some(sublevel),
        reason: match tumor {
            Some(tumor) => format!(
                "FDA-recognized biomarker for {} in {tumor}",
                evidence.variant.variant_normalized
            ),
            None => format!(
                "FDA-recognized biomarker for {}",
                evidence.variant.variant_normalized
            ),
        },
    })
}

fn rule_literature_strong(
    evidence: &Evidence,
    _tumor: Option<&str>,
    _ctx: &GeneContext,
) -> Option<RuleOutcome> {
    let knowledge = evidence.literature.get()?.knowledge.as_ref()?;
    let tag = knowledge.evidence_level_tag?;
    if !matches!(
        tag,
        LiteratureEvidenceTag::FdaApproved | LiteratureEvidenceTag::Phase3
    ) {
        return None;
    }
    if knowledge.sensitive_to.is_empty() {
        return None;
    }
    Some(RuleOutcome {
        tier: Tier::I,
        sublevel: Some(SubLevel::B),
        reason: format!(
            "Published {} evidence of sensitivity to {}",
            match tag {
                LiteratureEvidenceTag::FdaApproved => "FDA-approval-level",
                _ => "phase 3",
            },
            knowledge.sensitive_to.join(", ")
        ),
    })
}

fn rule_investigational_only(
    evidence: &Evidence,
    tumor: Option<&str>,
    ctx: &GeneContext,
) -> Option<RuleOutcome> {
    if !ctx.is_investigational_only(&evidence.variant.gene, tumor) {
        return None;
    }
    Some(RuleOutcome {
        tier: Tier::III,
        sublevel: None,
        reason: format!(
            "{} alterations in this tumor type have no approved targeted therapy; investigational only",
            evidence.variant.gene
        ),
    })
}

fn rule_trial_variant_specific(
    evidence: &Evidence,
    _tumor: Option<&str>,
    _ctx: &GeneContext,
) -> Option<RuleOutcome> {
    let trials = evidence.trials.get()?;
    let trial = trials
        .trials
        .iter()
        .find(|t| t.variant_explicitly_mentioned)?;
    Some(RuleOutcome {
        tier: Tier::II,
        sublevel: Some(SubLevel::D),
        reason: format!(
            "Active clinical trial {} explicitly enrolls this variant",
            trial.nct_id
        ),
    })
}

fn rule_resistance(
    evidence: &Evidence,
    tumor: Option<&str>,
    ctx: &GeneContext,
) -> Option<RuleOutcome> {
    if let Some(entry) = ctx.soc_resistance(
        &evidence.variant.gene,
        &evidence.variant.variant_normalized,
        tumor,
    ) {
        return Some(match entry.fda_alternative {
            Some(alternative) => RuleOutcome {
                tier: Tier::I,
                sublevel: Some(SubLevel::A),
                reason: format!(
                    "Confers resistance to {} with an FDA-approved alternative ({alternative})",
                    entry.resistant_to.join("/")
                ),
            },
            None => RuleOutcome {
                tier: Tier::II,
                sublevel: Some(SubLevel::D),
                reason: format!(
                    "Confers resistance to {} with no approved alternative",
                    entry.resistant_to.join("/")
                ),
            },
        });
    }

    // CGI FDA-status resistance without a configured alternative.
    let cgi = evidence.cgi.get()?;
    let biomarker = cgi.biomarkers.iter().find(|b| {
        b.response == ResponseSignal::Resistant
            && b.evidence_status == CgiEvidenceStatus::Fda
            && match tumor {
                None => true,
                Some(tumor) => any_tumor_matches(tumor, &b.tumor_tokens),
            }
    })?;
    Some(RuleOutcome {
        tier: Tier::II,
        sublevel: Some(SubLevel::D),
        reason: format!(
            "FDA-recognized resistance to {} with no approved alternative",
            biomarker.drugs.join("/")
        ),
    })
}

fn rule_prognostic(
    evidence: &Evidence,
    _tumor: Option<&str>,
    _ctx: &GeneContext,
) -> Option<RuleOutcome> {
    let civic = evidence.civic.get()?;
    let levels = civic
        .evidence_items
        .iter()
        .filter(|item| item.significance == CivicSignificance::Prognostic)
        .map(|item| item.level)
        .chain(
            civic
                .assertions
                .iter()
                .filter(|a| a.significance == CivicSignificance::Prognostic)
                .map(|a| a.amp_level),
        )
        .collect::<Vec<_>>();
    let best = levels.iter().copied().min()?;
    if best.is_high_quality() {
        Some(RuleOutcome {
            tier: Tier::II,
            sublevel: Some(SubLevel::C),
            reason: "Strong prognostic evidence with treatment impact".to_string(),
        })
    } else {
        Some(RuleOutcome {
            tier: Tier::III,
            sublevel: Some(SubLevel::C),
            reason: "Prognostic evidence of limited strength only".to_string(),
        })
    }
}

/// Approval exists for this variant in a different tumor type.
fn rule_offlabel(
    evidence: &Evidence,
    tumor: Option<&str>,
    ctx: &GeneContext,
) -> Option<RuleOutcome> {
    // With no tumor given there is no "different tumor" to speak of.
    let _tumor = tumor?;
    let anywhere = fda_label_hit(evidence, None, ctx)
        || civic_level_a_hit(evidence, None, ctx)
        || cgi_guideline_hit(evidence, None, ctx).is_some()
        || civic_assertion_hit(evidence, None, ctx).is_some();
    if !anywhere {
        return None;
    }
    Some(RuleOutcome {
        tier: Tier::II,
        sublevel: Some(SubLevel::A),
        reason: format!(
            "{} has an approved indication in a different tumor type",
            evidence.variant.variant_normalized
        ),
    })
}

fn evidence_drug_mentions(evidence: &Evidence) -> Vec<String> {
    let mut drugs: Vec<String> = evidence
        .summary
        .drug_calls
        .iter()
        .map(|c| c.drug.to_lowercase())
        .collect();
    if let Some(trials) = evidence.trials.get() {
        drugs.extend(
            trials
                .trials
                .iter()
                .flat_map(|t| t.drugs.iter().map(|d| d.to_lowercase())),
        );
    }
    if let Some(fda) = evidence.fda.get() {
        drugs.extend(fda.approvals.iter().map(|a| a.drug.to_lowercase()));
    }
    drugs
}

fn rule_gene_level(
    evidence: &Evidence,
    _tumor: Option<&str>,
    ctx: &GeneContext,
) -> Option<RuleOutcome> {
    if let Some(civic) = evidence.civic.get() {
        let predictive_levels: Vec<EvidenceLevel> = civic
            .evidence_items
            .iter()
            .filter(|item| {
                item.significance == CivicSignificance::Predictive
                    && item.response == Some(ResponseSignal::Sensitive)
            })
            .map(|item| item.level)
            .collect();
        if predictive_levels.contains(&EvidenceLevel::B) {
            return Some(RuleOutcome {
                tier: Tier::II,
                sublevel: Some(SubLevel::B),
                reason: "Clinical-grade therapeutic evidence at the gene level".to_string(),
            });
        }
        if !predictive_levels.is_empty() {
            return Some(RuleOutcome {
                tier: Tier::II,
                sublevel: Some(SubLevel::D),
                reason: "Preclinical or case-level therapeutic evidence only".to_string(),
            });
        }
    }

    let tsg = ctx.pathway_tsg(&evidence.variant.gene)?;
    let seen = evidence_drug_mentions(evidence);
    let matched = tsg
        .drugs
        .iter()
        .find(|drug| seen.iter().any(|s| s == &drug.to_lowercase()))?;
    Some(RuleOutcome {
        tier: Tier::II,
        sublevel: Some(SubLevel::B),
        reason: format!(
            "Pathway-actionable tumor suppressor ({} pathway, {matched})",
            tsg.pathway
        ),
    })
}

fn rule_vus_in_cancer_gene(
    evidence: &Evidence,
    _tumor: Option<&str>,
    _ctx: &GeneContext,
) -> Option<RuleOutcome> {
    if !evidence.is_cancer_gene() {
        return None;
    }
    Some(RuleOutcome {
        tier: Tier::III,
        sublevel: Some(SubLevel::B),
        reason: format!(
            "Variant of unknown significance in cancer gene {}",
            evidence.variant.gene
        ),
    })
}

fn rule_no_evidence(
    evidence: &Evidence,
    _tumor: Option<&str>,
    _ctx: &GeneContext,
) -> Option<RuleOutcome> {
    Some(RuleOutcome {
        tier: Tier::III,
        sublevel: Some(SubLevel::D),
        reason: format!(
            "No clinical evidence found for {} {}",
            evidence.variant.gene, evidence.variant.variant_normalized
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{
        CgiBiomarker, CgiFragment, CivicAssertionRecord, CivicEvidenceRecord, CivicFragment,
        FdaApproval, FdaFragment, LiteratureFragment, LiteratureKnowledge, MutationOrigin,
        MyVariantFragment, SourceSlot, TrialRecord, TrialsFragment,
    };

    fn evidence(gene: &str, variant: &str, tumor: Option<&str>) -> Evidence {
        let nv = crate::normalize::normalize(gene, variant).unwrap();
        let mut ev = Evidence::new(nv, tumor.map(String::from));
        // Present-but-empty baseline so confidence penalties stay at zero.
        ev.myvariant = SourceSlot::present(MyVariantFragment::default());
        ev.fda = SourceSlot::present(FdaFragment::default());
        ev.cgi = SourceSlot::present(CgiFragment::default());
        ev.vicc = SourceSlot::present(Default::default());
        ev.civic = SourceSlot::present(CivicFragment::default());
        ev.literature = SourceSlot::present(LiteratureFragment::default());
        ev.trials = SourceSlot::present(TrialsFragment::default());
        ev.cancer_gene = SourceSlot::present(false);
        ev
    }

    fn fda_mentioning(indication: &str) -> FdaFragment {
        FdaFragment {
            approvals: vec![FdaApproval {
                drug: "vemurafenib".into(),
                brand: Some("ZELBORAF".into()),
                indication_text: indication.into(),
                approval_date: Some("20200110".into()),
                marketing_status: None,
            }],
            mentions_variant_in_label: true,
        }
    }

    fn run(ev: &mut Evidence, tumor: Option<&str>) -> TierResult {
        ev.finalize();
        get_tier_hint(ev, tumor, &GeneContext::builtin())
    }

    #[test]
    fn engine_is_deterministic() {
        let mut ev = evidence("BRAF", "V600E", Some("Melanoma"));
        ev.fda = SourceSlot::present(fda_mentioning("metastatic melanoma with BRAF V600E"));
        let a = run(&mut ev, Some("Melanoma"));
        let b = run(&mut ev, Some("Melanoma"));
        assert_eq!(a.tier, b.tier);
        assert_eq!(a.sublevel, b.sublevel);
        assert_eq!(a.reason_code, b.reason_code);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn scenario_braf_v600e_melanoma_is_tier_i_a() {
        let mut ev = evidence("BRAF", "V600E", Some("Melanoma"));
        ev.fda = SourceSlot::present(fda_mentioning(
            "treatment of unresectable or metastatic melanoma with BRAF V600E mutation",
        ));
        let result = run(&mut ev, Some("Melanoma"));
        assert_eq!(result.tier, Tier::I);
        assert_eq!(result.sublevel, Some(SubLevel::A));
        assert_eq!(result.reason_code, ReasonCode::FdaVariantInTumor);
        assert!(result.confidence >= 0.90);
    }

    #[test]
    fn scenario_braf_g469a_cannot_claim_v600_label() {
        // The label names V600 only, so the mention flag computed on the
        // canonical G469A form is false and the approval branch cannot fire.
        let mut ev = evidence("BRAF", "G469A", Some("Melanoma"));
        ev.fda = SourceSlot::present(FdaFragment {
            approvals: vec![FdaApproval {
                drug: "vemurafenib".into(),
                brand: Some("ZELBORAF".into()),
                indication_text: "melanoma with BRAF V600E mutation as detected by an FDA-approved test".into(),
                approval_date: None,
                marketing_status: None,
            }],
            mentions_variant_in_label: false,
        });
        // CIViC supplies gene-level C evidence.
        ev.civic = SourceSlot::present(CivicFragment {
            evidence_items: vec![CivicEvidenceRecord {
                level: EvidenceLevel::C,
                significance: CivicSignificance::Predictive,
                response: Some(ResponseSignal::Sensitive),
                therapies: vec!["trametinib".into()],
                disease: Some("Melanoma".into()),
                citation: None,
            }],
            assertions: Vec::new(),
        });
        let result = run(&mut ev, Some("Melanoma"));
        assert_ne!(result.tier, Tier::I);
        assert_eq!(result.tier, Tier::II);
        assert_eq!(result.sublevel, Some(SubLevel::D));
        assert_eq!(result.reason_code, ReasonCode::GeneLevelWeak);
    }

    #[test]
    fn scenario_egfr_t790m_resistance_with_alternative_is_tier_i_a() {
        let mut ev = evidence("EGFR", "T790M", Some("NSCLC"));
        let result = run(&mut ev, Some("NSCLC"));
        assert_eq!(result.tier, Tier::I);
        assert_eq!(result.sublevel, Some(SubLevel::A));
        assert_eq!(result.reason_code, ReasonCode::ResistanceWithAlt);
        assert!(result.human_reason.contains("osimertinib"));
    }

    #[test]
    fn scenario_egfr_c797s_resistance_without_alternative_is_tier_ii_d() {
        let mut ev = evidence("EGFR", "C797S", Some("NSCLC"));
        ev.literature = SourceSlot::present(LiteratureFragment {
            papers: Vec::new(),
            knowledge: Some(LiteratureKnowledge {
                mutation_type: MutationOrigin::Secondary,
                resistant_to: vec!["osimertinib".into()],
                sensitive_to: Vec::new(),
                evidence_level_tag: None,
                rationale: "C797S abolishes covalent binding of third-generation TKIs".into(),
                confidence: 0.8,
            }),
        });
        let result = run(&mut ev, Some("NSCLC"));
        assert_eq!(result.tier, Tier::II);
        assert_eq!(result.sublevel, Some(SubLevel::D));
        assert_eq!(result.reason_code, ReasonCode::ResistanceNoAlt);
    }

    #[test]
    fn scenario_kras_g12d_pancreatic_is_investigational_regardless_of_trials() {
        let mut ev = evidence("KRAS", "G12D", Some("Pancreatic"));
        ev.trials = SourceSlot::present(TrialsFragment {
            trials: vec![TrialRecord {
                nct_id: "NCT05737706".into(),
                phase: Some("PHASE1".into()),
                status: Some("RECRUITING".into()),
                variant_explicitly_mentioned: true,
                drugs: vec!["MRTX1133".into()],
                sponsor: None,
            }],
        });
        let result = run(&mut ev, Some("Pancreatic"));
        assert_eq!(result.tier, Tier::III);
        assert_eq!(result.sublevel, None);
        assert_eq!(result.reason_code, ReasonCode::InvestigationalOnly);
    }

    #[test]
    fn scenario_tp53_r273h_prognostic_b_is_tier_ii_c() {
        let mut ev = evidence("TP53", "R273H", Some("Ovarian"));
        ev.civic = SourceSlot::present(CivicFragment {
            evidence_items: vec![CivicEvidenceRecord {
                level: EvidenceLevel::B,
                significance: CivicSignificance::Prognostic,
                response: None,
                therapies: Vec::new(),
                disease: Some("Ovarian Cancer".into()),
                citation: None,
            }],
            assertions: Vec::new(),
        });
        let result = run(&mut ev, Some("Ovarian"));
        assert_eq!(result.tier, Tier::II);
        assert_eq!(result.sublevel, Some(SubLevel::C));
        assert_eq!(result.reason_code, ReasonCode::PrognosticStrong);
    }

    #[test]
    fn benign_clinvar_always_wins() {
        let mut ev = evidence("BRAF", "V600E", Some("Melanoma"));
        let mut myvariant = MyVariantFragment::default();
        myvariant.clinvar_significance = Some("Likely benign".into());
        ev.myvariant = SourceSlot::present(myvariant);
        // Even with a full FDA label hit on file.
        ev.fda = SourceSlot::present(fda_mentioning("melanoma with BRAF V600E"));
        let result = run(&mut ev, Some("Melanoma"));
        assert_eq!(result.tier, Tier::IV);
        assert_eq!(result.reason_code, ReasonCode::Benign);
        assert!(result.confidence >= 0.90);
    }

    #[test]
    fn subtype_table_hit_is_tier_i_b() {
        let mut ev = evidence("POLE", "P286R", Some("Endometrial Carcinoma"));
        let result = run(&mut ev, Some("Endometrial Carcinoma"));
        assert_eq!(result.tier, Tier::I);
        assert_eq!(result.sublevel, Some(SubLevel::B));
        assert_eq!(result.reason_code, ReasonCode::SubtypeDefining);
    }

    #[test]
    fn literature_strong_evidence_is_tier_i_b() {
        let mut ev = evidence("ERBB2", "A775_G776insYVMA", Some("NSCLC"));
        ev.literature = SourceSlot::present(LiteratureFragment {
            papers: Vec::new(),
            knowledge: Some(LiteratureKnowledge {
                mutation_type: MutationOrigin::Primary,
                resistant_to: Vec::new(),
                sensitive_to: vec!["trastuzumab deruxtecan".into()],
                evidence_level_tag: Some(LiteratureEvidenceTag::Phase3),
                rationale: "Registrational trial in HER2-mutant NSCLC".into(),
                confidence: 0.9,
            }),
        });
        let result = run(&mut ev, Some("NSCLC"));
        assert_eq!(result.tier, Tier::I);
        assert_eq!(result.sublevel, Some(SubLevel::B));
        assert_eq!(result.reason_code, ReasonCode::LiteratureStrong);
    }

    #[test]
    fn variant_specific_trial_is_tier_ii_d() {
        let mut ev = evidence("KRAS", "G12C", Some("NSCLC"));
        ev.trials = SourceSlot::present(TrialsFragment {
            trials: vec![
                TrialRecord {
                    nct_id: "NCT001".into(),
                    phase: Some("PHASE2".into()),
                    status: Some("RECRUITING".into()),
                    variant_explicitly_mentioned: false,
                    drugs: vec!["chemo".into()],
                    sponsor: None,
                },
                TrialRecord {
                    nct_id: "NCT002".into(),
                    phase: Some("PHASE2".into()),
                    status: Some("RECRUITING".into()),
                    variant_explicitly_mentioned: true,
                    drugs: vec!["sotorasib".into()],
                    sponsor: None,
                },
            ],
        });
        let result = run(&mut ev, Some("NSCLC"));
        assert_eq!(result.tier, Tier::II);
        assert_eq!(result.sublevel, Some(SubLevel::D));
        assert_eq!(result.reason_code, ReasonCode::TrialVariantSpecific);
        assert!(result.human_reason.contains("NCT002"));
    }

    #[test]
    fn offlabel_approval_in_other_tumor_is_tier_ii_a() {
        let mut ev = evidence("BRAF", "V600E", Some("Colorectal Cancer"));
        // Label names the variant but only melanoma indications.
        ev.fda = SourceSlot::present(fda_mentioning(
            "metastatic melanoma with BRAF V600E mutation",
        ));
        let result = run(&mut ev, Some("Colorectal Cancer"));
        assert_eq!(result.tier, Tier::II);
        assert_eq!(result.sublevel, Some(SubLevel::A));
        assert_eq!(result.reason_code, ReasonCode::Offlabel);
    }

    #[test]
    fn pathway_tsg_with_matching_drug_is_tier_ii_b() {
        let mut ev = evidence("PTEN", "R130Q", Some("Breast Cancer"));
        ev.trials = SourceSlot::present(TrialsFragment {
            trials: vec![TrialRecord {
                nct_id: "NCT003".into(),
                phase: Some("PHASE2".into()),
                status: Some("RECRUITING".into()),
                variant_explicitly_mentioned: false,
                drugs: vec!["Capivasertib".into()],
                sponsor: None,
            }],
        });
        let result = run(&mut ev, Some("Breast Cancer"));
        assert_eq!(result.tier, Tier::II);
        assert_eq!(result.sublevel, Some(SubLevel::B));
        assert_eq!(result.reason_code, ReasonCode::GeneLevel);
        assert!(result.human_reason.contains("capivasertib"));
    }

    #[test]
    fn empty_evidence_defaults_by_cancer_gene_membership() {
        let mut ev = evidence("TTN", "A100T", None);
        let result = run(&mut ev, None);
        assert_eq!(result.tier, Tier::III);
        assert_eq!(result.sublevel, Some(SubLevel::D));
        assert_eq!(result.reason_code, ReasonCode::NoEvidence);

        let mut ev = evidence("BRAF", "A100T", None);
        ev.cancer_gene = SourceSlot::present(true);
        let result = run(&mut ev, None);
        assert_eq!(result.tier, Tier::III);
        assert_eq!(result.sublevel, Some(SubLevel::B));
        assert_eq!(result.reason_code, ReasonCode::VusInCancerGene);
    }

    #[test]
    fn all_sources_absent_floors_confidence() {
        let nv = crate::normalize::normalize("TTN", "A100T").unwrap();
        let mut ev = Evidence::new(nv, None);
        ev.finalize();
        let result = get_tier_hint(&ev, None, &GeneContext::builtin());
        assert_eq!(result.tier, Tier::III);
        assert_eq!(result.sublevel, Some(SubLevel::D));
        // 8 missing sources: 0.40 - 0.40 floors at 0.30.
        assert_eq!(result.confidence, 0.30);
    }

    #[test]
    fn tier_one_requires_a_grounding_source() {
        // Enumerate the cascade over empty-but-present evidence: no branch
        // may output Tier I without label/assertion/CGI/subtype/literature
        // grounding.
        for (gene, variant, tumor) in [
            ("BRAF", "V600E", Some("Melanoma")),
            ("KRAS", "G12C", Some("NSCLC")),
            ("RET", "M918T", None),
        ] {
            let mut ev = evidence(gene, variant, tumor);
            let result = run(&mut ev, tumor);
            assert_ne!(result.tier, Tier::I, "{gene} {variant}");
        }
    }

    #[test]
    fn confidence_penalty_is_per_missing_source() {
        let mut ev = evidence("BRAF", "V600E", Some("Melanoma"));
        ev.fda = SourceSlot::present(fda_mentioning("melanoma with BRAF V600E"));
        ev.vicc = SourceSlot::absent();
        ev.literature = SourceSlot::degraded();
        let result = run(&mut ev, Some("Melanoma"));
        assert_eq!(result.tier, Tier::I);
        // ceiling 1.00 minus 2 * 0.05
        assert!((result.confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn tier_labels_parse_and_measure_distance() {
        assert_eq!(Tier::from_label("Tier I"), Some(Tier::I));
        assert_eq!(Tier::from_label("iii"), Some(Tier::III));
        assert_eq!(Tier::from_label("4"), Some(Tier::IV));
        assert_eq!(Tier::from_label("V"), None);
        assert_eq!(Tier::I.distance(Tier::IV), 3);
        assert_eq!(Tier::II.distance(Tier::II), 0);
    }

    #[test]
    fn civic_assertion_grounds_tier_i() {
        let mut ev = evidence("BRAF", "V600E", Some("Melanoma"));
        ev.civic = SourceSlot::present(CivicFragment {
            evidence_items: Vec::new(),
            assertions: vec![CivicAssertionRecord {
                amp_tier: Tier::I,
                amp_level: EvidenceLevel::B,
                significance: CivicSignificance::Predictive,
                response: Some(ResponseSignal::Sensitive),
                therapies: vec!["dabrafenib".into()],
                disease: Some("Melanoma".into()),
                fda_companion_test: false,
                nccn_guideline: Some("Melanoma".into()),
            }],
        });
        let result = run(&mut ev, Some("Melanoma"));
        assert_eq!(result.tier, Tier::I);
        assert_eq!(result.sublevel, Some(SubLevel::B));
    }

    #[test]
    fn excluded_variant_cannot_claim_foreign_class_evidence() {
        // A CGI FDA-status V600 biomarker must not lift G469A to Tier I:
        // no class admits both the canonical variant and the V600 token.
        let mut ev = evidence("BRAF", "G469A", Some("Melanoma"));
        ev.cgi = SourceSlot::present(CgiFragment {
            biomarkers: vec![CgiBiomarker {
                drugs: vec!["vemurafenib".into()],
                response: ResponseSignal::Sensitive,
                evidence_status: CgiEvidenceStatus::Fda,
                tumor_tokens: vec!["Melanoma".into()],
                variant_pattern: "V600.".into(),
            }],
        });
        let result = run(&mut ev, Some("Melanoma"));
        assert_ne!(result.tier, Tier::I);
    }

    #[test]
    fn cgi_nccn_guideline_grounds_tier_i_b() {
        let mut ev = evidence("BRAF", "V600K", Some("Melanoma"));
        ev.cgi = SourceSlot::present(CgiFragment {
            biomarkers: vec![CgiBiomarker {
                drugs: vec!["dabrafenib".into(), "trametinib".into()],
                response: ResponseSignal::Sensitive,
                evidence_status: CgiEvidenceStatus::Nccn,
                tumor_tokens: vec!["Melanoma".into()],
                variant_pattern: "V600.".into(),
            }],
        });
        let result = run(&mut ev, Some("Melanoma"));
        assert_eq!(result.tier, Tier::I);
        assert_eq!(result.sublevel, Some(SubLevel::B));
    }
}
