//! Narrative writer.
//!
//! The narrator turns the deterministic tier call and a compact evidence
//! summary into a few sentences of prose. It has no authority over the
//! classification: a reply that names a different tier than the one it was
//! given is discarded and the templated fallback is used instead.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::config::Settings;
use crate::llm::{ChatClient, ChatMessage, ChatRequest};
use crate::tier::{Tier, TierResult};

const NARRATOR_SYSTEM_PROMPT: &str = "You are a molecular tumor board scribe. Write 3-5 \
sentences of clinical prose explaining the provided AMP/ASCO/CAP tier assignment from the \
provided evidence summary. State the tier exactly as given; do not re-classify, hedge the \
tier, or invent evidence. End with the recommended therapies when any are listed.";

fn tier_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\btier\s+(IV|III|II|I|[1-4])\b").expect("static regex"))
}

fn token_to_tier(token: &str) -> Option<Tier> {
    match token.to_uppercase().as_str() {
        "I" | "1" => Some(Tier::I),
        "II" | "2" => Some(Tier::II),
        "III" | "3" => Some(Tier::III),
        "IV" | "4" => Some(Tier::IV),
        _ => None,
    }
}

/// True when the prose names any tier other than `expected`.
pub(crate) fn contradicts_tier(text: &str, expected: Tier) -> bool {
    tier_token_re()
        .captures_iter(text)
        .filter_map(|caps| token_to_tier(&caps[1]))
        .any(|tier| tier != expected)
}

/// Deterministic prose used when the LLM is unavailable or disagrees with
/// the tier it was handed.
pub fn fallback_narrative(result: &TierResult, therapies: &[String]) -> String {
    let mut out = format!(
        "This variant is classified as AMP/ASCO/CAP Tier {}. {}",
        result.tier, result.human_reason
    );
    if !out.ends_with('.') {
        out.push('.');
    }
    if therapies.is_empty() {
        out.push_str(" No variant-directed therapy is recommended from the collected evidence.");
    } else {
        out.push_str(&format!(
            " Evidence-supported therapies: {}.",
            therapies.join(", ")
        ));
    }
    out.push_str(&format!(
        " Classification confidence is {:.2}.",
        result.confidence
    ));
    out
}

/// Writes the narrative, falling back to the template on provider absence,
/// provider failure, or a tier contradiction in the reply.
pub async fn write_narrative(
    chat: Option<&dyn ChatClient>,
    settings: &Settings,
    result: &TierResult,
    evidence_summary: &str,
    gene_context_notes: &str,
    therapies: &[String],
) -> String {
    let Some(chat) = chat else {
        return fallback_narrative(result, therapies);
    };

    let context = format!(
        "Tier: {}\nReason: {}\nRecommended therapies: {}\n\nEvidence summary:\n{}\n\nGene context:\n{}",
        result.tier,
        result.human_reason,
        if therapies.is_empty() {
            "none".to_string()
        } else {
            therapies.join(", ")
        },
        evidence_summary,
        gene_context_notes,
    );

    let reply = chat
        .chat(ChatRequest {
            model: settings.model.clone(),
            messages: vec![
                ChatMessage::system(NARRATOR_SYSTEM_PROMPT),
                ChatMessage::user(context),
            ],
            max_tokens: settings.max_tokens_narrative,
            temperature: settings.temperature,
            json_mode: false,
        })
        .await;

    match reply {
        Ok(text) if contradicts_tier(&text, result.tier) => {
            warn!(
                tier = %result.tier,
                "Narrator prose contradicted the deterministic tier; using fallback"
            );
            fallback_narrative(result, therapies)
        }
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "Narrator unavailable; using fallback");
            fallback_narrative(result, therapies)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OncoTierError;
    use crate::tier::{ReasonCode, SubLevel};

    fn result(tier: Tier) -> TierResult {
        TierResult {
            tier,
            sublevel: Some(SubLevel::A),
            reason_code: ReasonCode::FdaVariantInTumor,
            human_reason: "FDA-approved therapy names this variant in this tumor type".into(),
            confidence: 0.95,
        }
    }

    #[test]
    fn contradiction_detection_matches_roman_and_arabic_tokens() {
        assert!(!contradicts_tier("This is a Tier I variant.", Tier::I));
        assert!(!contradicts_tier("tier 1 actionability", Tier::I));
        assert!(contradicts_tier("We would call this Tier II.", Tier::I));
        assert!(contradicts_tier("Arguably tier 3 at best", Tier::I));
        assert!(!contradicts_tier("No tier token at all", Tier::I));
        // "Tier I" inside "Tier III" must not match as Tier I.
        assert!(!contradicts_tier("Tier III significance", Tier::III));
    }

    #[test]
    fn fallback_lists_therapies_and_confidence() {
        let text = fallback_narrative(
            &result(Tier::I),
            &["vemurafenib".to_string(), "dabrafenib".to_string()],
        );
        assert!(text.contains("Tier I"));
        assert!(text.contains("vemurafenib, dabrafenib"));
        assert!(text.contains("0.95"));
    }

    struct FixedChat(&'static str);

    #[async_trait::async_trait]
    impl ChatClient for FixedChat {
        async fn chat(&self, _request: ChatRequest) -> Result<String, OncoTierError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingChat;

    #[async_trait::async_trait]
    impl ChatClient for FailingChat {
        async fn chat(&self, _request: ChatRequest) -> Result<String, OncoTierError> {
            Err(OncoTierError::LlmUnavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn contradicting_reply_is_replaced_by_fallback() {
        let chat = FixedChat("Despite the input, this is really a Tier III finding.");
        let settings = Settings::default();
        let text = write_narrative(
            Some(&chat),
            &settings,
            &result(Tier::I),
            "summary",
            "notes",
            &[],
        )
        .await;
        assert!(text.contains("Tier I"));
        assert!(!text.contains("Tier III"));
    }

    #[tokio::test]
    async fn agreeing_reply_is_kept() {
        let chat = FixedChat("Tier I assignment is supported by the label evidence.");
        let settings = Settings::default();
        let text = write_narrative(
            Some(&chat),
            &settings,
            &result(Tier::I),
            "summary",
            "notes",
            &[],
        )
        .await;
        assert_eq!(text, "Tier I assignment is supported by the label evidence.");
    }

    #[tokio::test]
    async fn provider_failure_and_absence_fall_back() {
        let settings = Settings::default();
        let from_failure = write_narrative(
            Some(&FailingChat),
            &settings,
            &result(Tier::II),
            "s",
            "n",
            &[],
        )
        .await;
        assert!(from_failure.contains("Tier II"));

        let from_absence =
            write_narrative(None, &settings, &result(Tier::II), "s", "n", &[]).await;
        assert!(from_absence.contains("Tier II"));
    }
}
