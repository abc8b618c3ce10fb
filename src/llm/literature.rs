//! Literature relevance scoring and knowledge extraction.
//!
//! Two LLM services over the fetched papers: a per-paper relevance score in
//! [0, 1] with a coarse signal label, and one consolidated knowledge block
//! over the kept set. Both return structured JSON; their output is evidence
//! for the engine to weigh, never a tier.

use serde::Deserialize;

use crate::config::Settings;
use crate::error::OncoTierError;
use crate::evidence::{LiteratureKnowledge, LiteratureSignal, ScoredPaper};
use crate::llm::{ChatClient, ChatMessage, ChatRequest, extract_json_object};
use crate::normalize::NormalizedVariant;
use crate::sources::semantic_scholar::PaperRecord;

const SCORER_SYSTEM_PROMPT: &str = "You are a molecular oncology literature triager. \
Given one paper and one somatic variant, score how relevant the paper is to the \
clinical actionability of that exact variant. Respond with JSON only: \
{\"score\": <0..1>, \"signal\": \"sensitivity\"|\"resistance\"|\"prognostic\"|\"mixed\"|\"irrelevant\", \
\"drugs\": [<generic drug names discussed>]}";

const EXTRACTOR_SYSTEM_PROMPT: &str = "You are a molecular oncology curator. Consolidate \
the provided papers about one somatic variant into structured knowledge. Respond with \
JSON only: {\"mutation_type\": \"primary\"|\"secondary\", \"resistant_to\": [..], \
\"sensitive_to\": [..], \"evidence_level_tag\": \"fda_approved\"|\"phase3\"|\"early_trials\"|\
\"case_reports\"|\"preclinical\"|null, \"rationale\": \"<one short paragraph>\", \
\"confidence\": <0..1>}";

#[derive(Debug, Deserialize)]
struct WireScore {
    score: f64,
    signal: Option<String>,
    #[serde(default)]
    drugs: Vec<String>,
}

fn parse_signal(raw: Option<&str>) -> LiteratureSignal {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("sensitivity") => LiteratureSignal::Sensitivity,
        Some("resistance") => LiteratureSignal::Resistance,
        Some("prognostic") => LiteratureSignal::Prognostic,
        Some("mixed") => LiteratureSignal::Mixed,
        _ => LiteratureSignal::Irrelevant,
    }
}

fn paper_context(variant: &NormalizedVariant, tumor: Option<&str>, paper: &PaperRecord) -> String {
    let mut out = format!(
        "Variant: {} {}\nTumor type: {}\n\nTitle: {}\n",
        variant.gene,
        variant.variant_normalized,
        tumor.unwrap_or("unspecified"),
        paper.title,
    );
    if let Some(year) = paper.year {
        out.push_str(&format!("Year: {year}\n"));
    }
    out.push_str(&format!("Citations: {}\n", paper.citations));
    if let Some(tldr) = &paper.tldr {
        out.push_str(&format!("TLDR: {tldr}\n"));
    }
    if let Some(abstract_text) = &paper.abstract_text {
        out.push_str(&format!("Abstract: {abstract_text}\n"));
    }
    out
}

/// Scores one paper. The returned score is clamped to [0, 1].
pub async fn score_paper(
    chat: &dyn ChatClient,
    settings: &Settings,
    variant: &NormalizedVariant,
    tumor: Option<&str>,
    paper: &PaperRecord,
) -> Result<ScoredPaper, OncoTierError> {
    let reply = chat
        .chat(ChatRequest {
            model: settings.model.clone(),
            messages: vec![
                ChatMessage::system(SCORER_SYSTEM_PROMPT),
                ChatMessage::user(paper_context(variant, tumor, paper)),
            ],
            max_tokens: settings.max_tokens_scoring,
            temperature: settings.temperature,
            json_mode: true,
        })
        .await?;

    let value = extract_json_object(&reply)?;
    let wire: WireScore = serde_json::from_value(value).map_err(|source| {
        OncoTierError::ApiJson {
            api: "llm".to_string(),
            source,
        }
    })?;

    Ok(ScoredPaper {
        paper_id: paper.paper_id.clone(),
        title: paper.title.clone(),
        year: paper.year,
        citations: paper.citations,
        tldr: paper.tldr.clone(),
        abstract_text: paper.abstract_text.clone(),
        score: wire.score.clamp(0.0, 1.0),
        signal: parse_signal(wire.signal.as_deref()),
        drugs: wire
            .drugs
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect(),
    })
}

#[derive(Debug, Deserialize)]
struct WireKnowledge {
    mutation_type: Option<String>,
    #[serde(default)]
    resistant_to: Vec<String>,
    #[serde(default)]
    sensitive_to: Vec<String>,
    evidence_level_tag: Option<String>,
    rationale: Option<String>,
    confidence: Option<f64>,
}

/// One consolidated extraction over the kept papers.
pub async fn extract_knowledge(
    chat: &dyn ChatClient,
    settings: &Settings,
    variant: &NormalizedVariant,
    tumor: Option<&str>,
    papers: &[ScoredPaper],
) -> Result<LiteratureKnowledge, OncoTierError> {
    let mut context = format!(
        "Variant: {} {}\nTumor type: {}\nPapers:\n",
        variant.gene,
        variant.variant_normalized,
        tumor.unwrap_or("unspecified"),
    );
    for paper in papers {
        context.push_str(&format!(
            "- [{}] {} ({} citations)\n",
            paper.paper_id, paper.title, paper.citations
        ));
        if let Some(tldr) = &paper.tldr {
            context.push_str(&format!("  {tldr}\n"));
        } else if let Some(abstract_text) = &paper.abstract_text {
            context.push_str(&format!("  {abstract_text}\n"));
        }
    }

    let reply = chat
        .chat(ChatRequest {
            model: settings.model.clone(),
            messages: vec![
                ChatMessage::system(EXTRACTOR_SYSTEM_PROMPT),
                ChatMessage::user(context),
            ],
            max_tokens: settings.max_tokens_extraction,
            temperature: settings.temperature,
            json_mode: true,
        })
        .await?;

    let value = extract_json_object(&reply)?;
    let wire: WireKnowledge = serde_json::from_value(value).map_err(|source| {
        OncoTierError::ApiJson {
            api: "llm".to_string(),
            source,
        }
    })?;

    let mutation_type = match wire.mutation_type.as_deref().map(str::trim) {
        Some(raw) if raw.eq_ignore_ascii_case("secondary") => {
            crate::evidence::MutationOrigin::Secondary
        }
        _ => crate::evidence::MutationOrigin::Primary,
    };

    let evidence_level_tag = wire.evidence_level_tag.as_deref().and_then(|raw| {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "fda_approved" | "fda" => Some(crate::evidence::LiteratureEvidenceTag::FdaApproved),
            "phase3" | "phase_3" => Some(crate::evidence::LiteratureEvidenceTag::Phase3),
            "early_trials" | "phase1" | "phase2" | "phase_1" | "phase_2" => {
                Some(crate::evidence::LiteratureEvidenceTag::EarlyTrials)
            }
            "case_reports" | "case_report" => {
                Some(crate::evidence::LiteratureEvidenceTag::CaseReports)
            }
            "preclinical" | "pre_clinical" => {
                Some(crate::evidence::LiteratureEvidenceTag::Preclinical)
            }
            _ => None,
        }
    });

    Ok(LiteratureKnowledge {
        mutation_type,
        resistant_to: clean_drugs(wire.resistant_to),
        sensitive_to: clean_drugs(wire.sensitive_to),
        evidence_level_tag,
        rationale: wire.rationale.unwrap_or_default().trim().to_string(),
        confidence: wire.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
    })
}

fn clean_drugs(raw: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .filter(|d| seen.insert(d.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedChat {
        replies: Mutex<Vec<String>>,
    }

    impl CannedChat {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatClient for CannedChat {
        async fn chat(&self, _request: ChatRequest) -> Result<String, OncoTierError> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| OncoTierError::LlmUnavailable("no canned reply".into()))
        }
    }

    fn paper(id: &str) -> PaperRecord {
        PaperRecord {
            paper_id: id.to_string(),
            title: format!("Paper {id}"),
            year: Some(2021),
            citations: 10,
            tldr: Some("summary".into()),
            abstract_text: None,
        }
    }

    fn nv() -> NormalizedVariant {
        crate::normalize::normalize("EGFR", "C797S").unwrap()
    }

    #[tokio::test]
    async fn score_paper_parses_structured_reply() {
        let chat = CannedChat::new(vec![
            r#"{"score": 0.92, "signal": "resistance", "drugs": ["Osimertinib", " "]}"#,
        ]);
        let settings = Settings::default();
        let scored = score_paper(&chat, &settings, &nv(), Some("NSCLC"), &paper("p1"))
            .await
            .unwrap();
        assert_eq!(scored.score, 0.92);
        assert_eq!(scored.signal, LiteratureSignal::Resistance);
        assert_eq!(scored.drugs, vec!["Osimertinib"]);
    }

    #[tokio::test]
    async fn score_clamps_out_of_range_values() {
        let chat = CannedChat::new(vec![r#"{"score": 1.7, "signal": "unknown-label"}"#]);
        let settings = Settings::default();
        let scored = score_paper(&chat, &settings, &nv(), None, &paper("p1"))
            .await
            .unwrap();
        assert_eq!(scored.score, 1.0);
        assert_eq!(scored.signal, LiteratureSignal::Irrelevant);
    }

    #[tokio::test]
    async fn extract_knowledge_maps_tags_and_dedups_drugs() {
        let chat = CannedChat::new(vec![
            r#"{"mutation_type": "secondary", "resistant_to": ["osimertinib", "Osimertinib"],
                "sensitive_to": [], "evidence_level_tag": "Phase 3",
                "rationale": "C797S abolishes covalent binding.", "confidence": 0.8}"#,
        ]);
        let settings = Settings::default();
        let scored = vec![score_stub("p1")];
        let knowledge = extract_knowledge(&chat, &settings, &nv(), Some("NSCLC"), &scored)
            .await
            .unwrap();
        assert_eq!(
            knowledge.mutation_type,
            crate::evidence::MutationOrigin::Secondary
        );
        assert_eq!(knowledge.resistant_to, vec!["osimertinib"]);
        assert_eq!(
            knowledge.evidence_level_tag,
            Some(crate::evidence::LiteratureEvidenceTag::Phase3)
        );
        assert_eq!(knowledge.confidence, 0.8);
    }

    fn score_stub(id: &str) -> ScoredPaper {
        ScoredPaper {
            paper_id: id.to_string(),
            title: format!("Paper {id}"),
            year: Some(2021),
            citations: 10,
            tldr: None,
            abstract_text: None,
            score: 0.9,
            signal: LiteratureSignal::Resistance,
            drugs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn chat_failure_propagates() {
        let chat = CannedChat::new(vec![]);
        let settings = Settings::default();
        let err = score_paper(&chat, &settings, &nv(), None, &paper("p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, OncoTierError::LlmUnavailable(_)));
    }
}
