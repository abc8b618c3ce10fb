//! The assessment pipeline: normalize, aggregate, tier, narrate.
//!
//! One [`Assessment`] per request; it exclusively owns its evidence dossier
//! and is never persisted by the core. Only admission errors surface to the
//! caller — every downstream degradation is absorbed into the dossier and
//! reflected in the confidence score.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::aggregate::Aggregator;
use crate::config::Settings;
use crate::error::OncoTierError;
use crate::evidence::{Evidence, NetSignal, SourceSlot};
use crate::llm::{ChatClient, DecisionLog, OpenAiChatClient};
use crate::normalize::NormalizedVariant;
use crate::tier::{GeneContext, ReasonCode, SubLevel, Tier, TierResult, get_tier_hint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Present,
    Absent,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceSourceState {
    pub name: &'static str,
    pub state: SourceState,
}

/// The serialized output record. Field names are stable.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub variant: NormalizedVariant,
    pub tier: Tier,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sublevel_internal: Option<SubLevel>,
    pub reason_code: ReasonCode,
    pub recommended_therapies: Vec<String>,
    pub evidence_sources: Vec<EvidenceSourceState>,
    pub narrative: String,
    pub annotations: BTreeMap<String, String>,
    pub references: Vec<String>,
    #[serde(skip)]
    pub evidence: Evidence,
    #[serde(skip)]
    pub tier_result: TierResult,
}

pub struct Pipeline {
    settings: Settings,
    aggregator: Aggregator,
    chat: Option<Arc<dyn ChatClient>>,
    context: Arc<GeneContext>,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Result<Self, OncoTierError> {
        Self::with_decision_log(settings, Arc::new(DecisionLog::disabled()))
    }

    pub fn with_decision_log(
        settings: Settings,
        log: Arc<DecisionLog>,
    ) -> Result<Self, OncoTierError> {
        let chat: Option<Arc<dyn ChatClient>> = OpenAiChatClient::from_env(log)?
            .map(|client| Arc::new(client) as Arc<dyn ChatClient>);
        Ok(Self {
            aggregator: Aggregator::new(settings.clone(), chat.clone())?,
            chat,
            context: crate::tier::global_context(),
            settings,
        })
    }

    /// Runs the full pipeline for one input triple. Admission errors are
    /// returned before any source client is called.
    pub async fn assess(
        &self,
        gene: &str,
        variant: &str,
        tumor_type: Option<&str>,
    ) -> Result<Assessment, OncoTierError> {
        let normalized = crate::normalize::normalize(gene, variant)?;
        let evidence = self.aggregator.collect(&normalized, tumor_type).await;
        let result = get_tier_hint(&evidence, tumor_type, &self.context);

        let therapies = recommended_therapies(&evidence, &result, &self.context);
        let annotations = build_annotations(&evidence, &self.context);
        let references = collect_references(&evidence);
        let narrative = crate::llm::narrator::write_narrative(
            self.chat.as_deref(),
            &self.settings,
            &result,
            &evidence_summary_text(&evidence),
            annotations
                .get("oncogene_class")
                .map(String::as_str)
                .unwrap_or("none"),
            &therapies,
        )
        .await;

        Ok(Assessment {
            variant: normalized,
            tier: result.tier,
            confidence: result.confidence,
            sublevel_internal: result.sublevel,
            reason_code: result.reason_code,
            recommended_therapies: therapies,
            evidence_sources: source_states(&evidence),
            narrative,
            annotations,
            references,
            evidence,
            tier_result: result,
        })
    }
}

fn source_states(evidence: &Evidence) -> Vec<EvidenceSourceState> {
    fn state<T>(slot: &SourceSlot<T>) -> SourceState {
        match slot {
            SourceSlot::Present { .. } => SourceState::Present,
            SourceSlot::Absent { degraded: true } => SourceState::Degraded,
            SourceSlot::Absent { degraded: false } => SourceState::Absent,
        }
    }
    vec![
        EvidenceSourceState {
            name: "myvariant",
            state: state(&evidence.myvariant),
        },
        EvidenceSourceState {
            name: "fda",
            state: state(&evidence.fda),
        },
        EvidenceSourceState {
            name: "cgi",
            state: state(&evidence.cgi),
        },
        EvidenceSourceState {
            name: "vicc",
            state: state(&evidence.vicc),
        },
        EvidenceSourceState {
            name: "civic",
            state: state(&evidence.civic),
        },
        EvidenceSourceState {
            name: "literature",
            state: state(&evidence.literature),
        },
        EvidenceSourceState {
            name: "clinicaltrials",
            state: state(&evidence.trials),
        },
        EvidenceSourceState {
            name: "oncokb",
            state: state(&evidence.cancer_gene),
        },
    ]
}

/// Net-sensitive drugs ordered by best evidence level, plus the configured
/// alternative when the tier came from actionable resistance.
fn recommended_therapies(
    evidence: &Evidence,
    result: &TierResult,
    ctx: &GeneContext,
) -> Vec<String> {
    if matches!(result.tier, Tier::IV) {
        return Vec::new();
    }

    let mut calls: Vec<_> = evidence
        .summary
        .drug_calls
        .iter()
        .filter(|call| call.net == NetSignal::Sensitive)
        .collect();
    calls.sort_by(|a, b| a.best_level.cmp(&b.best_level).then(a.drug.cmp(&b.drug)));

    let mut out: Vec<String> = Vec::new();
    let mut push_unique = |drug: &str| {
        let drug = drug.trim().to_lowercase();
        if !drug.is_empty() && !out.contains(&drug) {
            out.push(drug);
        }
    };

    if result.reason_code == ReasonCode::ResistanceWithAlt
        && let Some(entry) = ctx.soc_resistance(
            &evidence.variant.gene,
            &evidence.variant.variant_normalized,
            evidence.tumor_type.as_deref(),
        )
        && let Some(alternative) = entry.fda_alternative
    {
        push_unique(alternative);
    }

    for call in calls {
        push_unique(&call.drug);
    }
    out
}

fn build_annotations(evidence: &Evidence, ctx: &GeneContext) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    let gene = &evidence.variant.gene;
    let canonical = &evidence.variant.variant_normalized;

    if let Some(note) = ctx.oncogene_class_note(gene, canonical) {
        annotations.insert("oncogene_class".to_string(), note.to_string());
    }
    if let Some(name) = ctx.variant_class_name(gene, canonical) {
        annotations.insert("variant_class".to_string(), name.to_string());
    }
    if let Some(tsg) = ctx.pathway_tsg(gene) {
        annotations.insert("pathway".to_string(), tsg.pathway.to_string());
    }
    annotations.insert(
        "dominant_signal".to_string(),
        format!("{:?}", evidence.summary.dominant_signal),
    );
    if let Some(knowledge) = evidence.literature.get().and_then(|l| l.knowledge.as_ref()) {
        annotations.insert(
            "mutation_origin".to_string(),
            format!("{:?}", knowledge.mutation_type).to_lowercase(),
        );
    }
    annotations
}

fn collect_references(evidence: &Evidence) -> Vec<String> {
    let mut references = Vec::new();
    if let Some(civic) = evidence.civic.get() {
        references.extend(
            civic
                .evidence_items
                .iter()
                .filter_map(|item| item.citation.clone()),
        );
    }
    if let Some(literature) = evidence.literature.get() {
        references.extend(
            literature
                .papers
                .iter()
                .map(|p| format!("{} ({})", p.title, p.paper_id)),
        );
    }
    if let Some(trials) = evidence.trials.get() {
        references.extend(trials.trials.iter().map(|t| t.nct_id.clone()));
    }
    references.dedup();
    references
}

/// Compact counter block the narrator receives instead of raw fragments.
fn evidence_summary_text(evidence: &Evidence) -> String {
    let summary = &evidence.summary;
    let mut out = format!(
        "Sensitivity signals: {} (A:{} B:{} C:{} D:{})\nResistance signals: {} (A:{} B:{} C:{} D:{})\nDominant signal: {:?}\n",
        summary.sensitivity.total(),
        summary.sensitivity.a,
        summary.sensitivity.b,
        summary.sensitivity.c,
        summary.sensitivity.d,
        summary.resistance.total(),
        summary.resistance.a,
        summary.resistance.b,
        summary.resistance.c,
        summary.resistance.d,
        summary.dominant_signal,
    );
    if !summary.conflicts.is_empty() {
        out.push_str(&format!("Conflicting drugs: {}\n", summary.conflicts.join(", ")));
    }
    for call in &summary.drug_calls {
        out.push_str(&format!(
            "- {}: {:?} (best level {:?}, {} sens / {} res)\n",
            call.drug, call.net, call.best_level, call.sensitivity, call.resistance
        ));
    }
    if let Some(fda) = evidence.fda.get()
        && fda.mentions_variant_in_label
    {
        out.push_str("FDA label names this variant.\n");
    }
    if let Some(trials) = evidence.trials.get() {
        let explicit = trials
            .trials
            .iter()
            .filter(|t| t.variant_explicitly_mentioned)
            .count();
        out.push_str(&format!(
            "Active trials: {} ({} variant-specific)\n",
            trials.trials.len(),
            explicit
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{
        DrugCall, EvidenceLevel, FdaApproval, FdaFragment, MyVariantFragment, TrialRecord,
        TrialsFragment,
    };

    fn evidence_with_calls(calls: Vec<DrugCall>) -> Evidence {
        let nv = crate::normalize::normalize("EGFR", "T790M").unwrap();
        let mut ev = Evidence::new(nv, Some("NSCLC".into()));
        ev.myvariant = SourceSlot::present(MyVariantFragment::default());
        ev.summary.drug_calls = calls;
        ev
    }

    fn result(reason: ReasonCode, tier: Tier) -> TierResult {
        TierResult {
            tier,
            sublevel: Some(SubLevel::A),
            reason_code: reason,
            human_reason: "reason".into(),
            confidence: 0.9,
        }
    }

    #[test]
    fn resistance_alternative_leads_therapy_list() {
        let ev = evidence_with_calls(vec![DrugCall {
            drug: "Erlotinib".into(),
            net: NetSignal::Resistant,
            best_level: EvidenceLevel::A,
            sensitivity: 0,
            resistance: 3,
        }]);
        let therapies = recommended_therapies(
            &ev,
            &result(ReasonCode::ResistanceWithAlt, Tier::I),
            &GeneContext::builtin(),
        );
        assert_eq!(therapies, vec!["osimertinib"]);
    }

    #[test]
    fn sensitive_calls_sorted_by_level_and_deduped() {
        let ev = evidence_with_calls(vec![
            DrugCall {
                drug: "Trametinib".into(),
                net: NetSignal::Sensitive,
                best_level: EvidenceLevel::C,
                sensitivity: 1,
                resistance: 0,
            },
            DrugCall {
                drug: "Osimertinib".into(),
                net: NetSignal::Sensitive,
                best_level: EvidenceLevel::A,
                sensitivity: 2,
                resistance: 0,
            },
            DrugCall {
                drug: "cetuximab".into(),
                net: NetSignal::Mixed,
                best_level: EvidenceLevel::B,
                sensitivity: 1,
                resistance: 1,
            },
        ]);
        let therapies = recommended_therapies(
            &ev,
            &result(ReasonCode::FdaVariantInTumor, Tier::I),
            &GeneContext::builtin(),
        );
        assert_eq!(therapies, vec!["osimertinib", "trametinib"]);
    }

    #[test]
    fn tier_iv_gets_no_therapies() {
        let ev = evidence_with_calls(vec![DrugCall {
            drug: "anything".into(),
            net: NetSignal::Sensitive,
            best_level: EvidenceLevel::A,
            sensitivity: 1,
            resistance: 0,
        }]);
        let therapies = recommended_therapies(
            &ev,
            &result(ReasonCode::Benign, Tier::IV),
            &GeneContext::builtin(),
        );
        assert!(therapies.is_empty());
    }

    #[tokio::test]
    async fn admission_errors_surface_before_any_source_runs() {
        let pipeline = Pipeline::new(Settings::default()).unwrap();
        for raw in ["EML4-ALK fusion", "amplification", "exon 14 skipping"] {
            let err = pipeline.assess("ALK", raw, None).await.unwrap_err();
            assert!(err.is_admission(), "{raw}");
        }
    }

    #[test]
    fn assessment_serializes_with_stable_field_names() {
        let nv = crate::normalize::normalize("BRAF", "V600E").unwrap();
        let mut ev = Evidence::new(nv.clone(), Some("Melanoma".into()));
        ev.fda = SourceSlot::present(FdaFragment {
            approvals: vec![FdaApproval {
                drug: "vemurafenib".into(),
                brand: None,
                indication_text: "melanoma with BRAF V600E".into(),
                approval_date: None,
                marketing_status: None,
            }],
            mentions_variant_in_label: true,
        });
        ev.trials = SourceSlot::present(TrialsFragment {
            trials: vec![TrialRecord {
                nct_id: "NCT01".into(),
                phase: None,
                status: None,
                variant_explicitly_mentioned: true,
                drugs: Vec::new(),
                sponsor: None,
            }],
        });
        ev.finalize();

        let tier_result = result(ReasonCode::FdaVariantInTumor, Tier::I);
        let assessment = Assessment {
            variant: nv,
            tier: tier_result.tier,
            confidence: tier_result.confidence,
            sublevel_internal: tier_result.sublevel,
            reason_code: tier_result.reason_code,
            recommended_therapies: vec!["vemurafenib".into()],
            evidence_sources: source_states(&ev),
            narrative: "Tier I narrative.".into(),
            annotations: build_annotations(&ev, &GeneContext::builtin()),
            references: collect_references(&ev),
            evidence: ev,
            tier_result,
        };

        let value = serde_json::to_value(&assessment).unwrap();
        assert_eq!(value["tier"], "I");
        assert_eq!(value["sublevel_internal"], "A");
        assert_eq!(value["reason_code"], "fda_variant_in_tumor");
        assert_eq!(value["variant"]["gene"], "BRAF");
        assert_eq!(value["recommended_therapies"][0], "vemurafenib");
        assert!(value["evidence_sources"].as_array().unwrap().len() == 8);
        assert!(value.get("evidence").is_none(), "dossier is not serialized");
        assert_eq!(
            value["annotations"]["oncogene_class"]
                .as_str()
                .unwrap()
                .contains("class I"),
            true
        );
        assert_eq!(value["references"][0], "NCT01");
    }
}
