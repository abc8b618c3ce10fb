//! Variant normalization and admission.
//!
//! Converts the protein notations seen in clinical reports (`p.V600E`,
//! `Val600Glu`, `v600e`, `E746_A750del`) into one canonical short form and
//! classifies the variant kind. Variant classes outside the supported scope
//! (fusions, amplifications, splice and exon-level events, truncations) are
//! rejected here, before any source client runs.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::OncoTierError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Missense,
    Nonsense,
    Frameshift,
    Insertion,
    Deletion,
    Duplication,
    OtherIndel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedVariant {
    pub gene: String,
    pub variant_original: String,
    pub variant_normalized: String,
    pub variant_kind: VariantKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hgvs_protein: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_aa: Option<char>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_aa: Option<char>,
}

/// Phrases that mark a variant class this pipeline does not admit. Matched
/// on the lowercased input after `p.` stripping.
const REJECT_TOKENS: &[&str] = &[
    "fusion",
    "rearrang",
    " amp",
    "amplification",
    "overexpression",
    "splice",
    "skipping",
    "trunc",
];

const AA3_TO_1: &[(&str, char)] = &[
    ("ala", 'A'),
    ("arg", 'R'),
    ("asn", 'N'),
    ("asp", 'D'),
    ("cys", 'C'),
    ("gln", 'Q'),
    ("glu", 'E'),
    ("gly", 'G'),
    ("his", 'H'),
    ("ile", 'I'),
    ("leu", 'L'),
    ("lys", 'K'),
    ("met", 'M'),
    ("phe", 'F'),
    ("pro", 'P'),
    ("ser", 'S'),
    ("thr", 'T'),
    ("trp", 'W'),
    ("tyr", 'Y'),
    ("val", 'V'),
    ("ter", '*'),
];

fn short_missense_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z])(\d+)([A-Z*])$").expect("static regex"))
}

fn long_missense_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-z]{3})(\d+)([a-z]{3})$").expect("static regex"))
}

fn frameshift_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z])(\d+)FS(\*\d+)?$").expect("static regex"))
}

fn aa3_to_1(token: &str) -> Option<char> {
    AA3_TO_1
        .iter()
        .find(|(three, _)| *three == token)
        .map(|(_, one)| *one)
}

fn strip_protein_prefix(variant: &str) -> &str {
    let trimmed = variant.trim();
    if trimmed.len() >= 2 && trimmed[..2].eq_ignore_ascii_case("p.") {
        trimmed[2..].trim()
    } else {
        trimmed
    }
}

fn rejection_token(lowered: &str) -> Option<&'static str> {
    if let Some(token) = REJECT_TOKENS.iter().find(|token| lowered.contains(*token)) {
        return Some(token);
    }
    // Exon-level deletion phrases ("exon 19 deletion") are structural, unlike
    // residue-level deletions ("E746_A750del").
    if lowered.contains("exon") && lowered.contains("del") {
        return Some("exon deletion");
    }
    None
}

/// Normalizes `(gene, variant)` or rejects the input. Deterministic and
/// idempotent: feeding the canonical form back in reproduces it.
pub fn normalize(gene: &str, variant: &str) -> Result<NormalizedVariant, OncoTierError> {
    let gene = gene.trim().to_uppercase();
    if gene.is_empty() {
        return Err(OncoTierError::InvalidArgument(
            "Gene symbol is required. Example: oncotier classify BRAF V600E".into(),
        ));
    }

    let stripped = strip_protein_prefix(variant);
    if stripped.is_empty() {
        return Err(OncoTierError::InvalidArgument(
            "Variant is required. Example: oncotier classify BRAF V600E".into(),
        ));
    }

    let lowered = stripped.to_lowercase();
    if let Some(token) = rejection_token(&lowered) {
        return Err(OncoTierError::UnsupportedVariantKind {
            gene,
            variant: variant.trim().to_string(),
            token: token.trim().to_string(),
        });
    }

    let upper = stripped.to_uppercase();

    // Short form wins over the three-letter form when both could match.
    if let Some(caps) = short_missense_re().captures(&upper) {
        let ref_aa = caps[1].chars().next().expect("single capture char");
        let position: u32 = caps[2].parse().map_err(|_| invalid_position(&gene, variant))?;
        let alt_aa = caps[3].chars().next().expect("single capture char");
        return Ok(build_substitution(gene, variant, ref_aa, position, alt_aa));
    }

    if let Some(caps) = long_missense_re().captures(&lowered) {
        if let (Some(ref_aa), Some(alt_aa)) = (aa3_to_1(&caps[1]), aa3_to_1(&caps[3])) {
            let position: u32 =
                caps[2].parse().map_err(|_| invalid_position(&gene, variant))?;
            return Ok(build_substitution(gene, variant, ref_aa, position, alt_aa));
        }
    }

    if let Some(caps) = frameshift_re().captures(&upper) {
        let ref_aa = caps[1].chars().next().expect("single capture char");
        let position: u32 = caps[2].parse().map_err(|_| invalid_position(&gene, variant))?;
        let suffix = caps
            .get(3)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        return Ok(NormalizedVariant {
            variant_normalized: format!("{ref_aa}{position}fs{suffix}"),
            gene,
            variant_original: variant.trim().to_string(),
            variant_kind: VariantKind::Frameshift,
            hgvs_protein: None,
            position: Some(position),
            ref_aa: Some(ref_aa),
            alt_aa: None,
        });
    }

    let has_position = lowered.chars().any(|c| c.is_ascii_digit());
    if has_position {
        let kind = if lowered.contains("delins") {
            Some(VariantKind::OtherIndel)
        } else if lowered.contains("del") {
            Some(VariantKind::Deletion)
        } else if lowered.contains("ins") {
            Some(VariantKind::Insertion)
        } else if lowered.contains("dup") {
            Some(VariantKind::Duplication)
        } else {
            None
        };
        if let Some(kind) = kind {
            return Ok(NormalizedVariant {
                variant_normalized: canonical_indel(&upper),
                gene,
                variant_original: variant.trim().to_string(),
                variant_kind: kind,
                hgvs_protein: None,
                position: None,
                ref_aa: None,
                alt_aa: None,
            });
        }
    }

    Err(OncoTierError::UnrecognizedNotation {
        gene,
        variant: variant.trim().to_string(),
    })
}

fn invalid_position(gene: &str, variant: &str) -> OncoTierError {
    OncoTierError::UnrecognizedNotation {
        gene: gene.to_string(),
        variant: variant.trim().to_string(),
    }
}

fn build_substitution(
    gene: String,
    variant: &str,
    ref_aa: char,
    position: u32,
    alt_aa: char,
) -> NormalizedVariant {
    let kind = if alt_aa == '*' {
        VariantKind::Nonsense
    } else {
        VariantKind::Missense
    };
    let canonical = format!("{ref_aa}{position}{alt_aa}");
    NormalizedVariant {
        hgvs_protein: Some(format!("p.{canonical}")),
        variant_normalized: canonical,
        gene,
        variant_original: variant.trim().to_string(),
        variant_kind: kind,
        position: Some(position),
        ref_aa: Some(ref_aa),
        alt_aa: Some(alt_aa),
    }
}

/// Keeps indel canon in the familiar mixed case: residues upper, the
/// `del`/`ins`/`dup` operators lower (`E746_A750DEL` -> `E746_A750del`).
fn canonical_indel(upper: &str) -> String {
    let mut out = upper.to_string();
    for (token_upper, token_lower) in [
        ("DELINS", "delins"),
        ("DEL", "del"),
        ("INS", "ins"),
        ("DUP", "dup"),
    ] {
        if out.contains(token_upper) {
            out = out.replace(token_upper, token_lower);
            break;
        }
    }
    out
}
