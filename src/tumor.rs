//! Centralized tumor-type alias map.
//!
//! Upstream sources spell the same disease many ways (`NSCLC`, `Non-Small
//! Cell Lung Cancer`, `Lung Adenocarcinoma`). All tumor comparisons in the
//! aggregator and tier engine go through [`canonical_tumor`] so each source
//! does not grow its own synonym list.

const ALIASES: &[(&str, &str)] = &[
    // lung
    ("nsclc", "nsclc"),
    ("non-small cell lung cancer", "nsclc"),
    ("non small cell lung cancer", "nsclc"),
    ("non-small cell lung carcinoma", "nsclc"),
    ("lung adenocarcinoma", "nsclc"),
    ("lung squamous cell carcinoma", "nsclc"),
    ("lung cancer", "nsclc"),
    ("lung non-small cell carcinoma", "nsclc"),
    // skin
    ("melanoma", "melanoma"),
    ("cutaneous melanoma", "melanoma"),
    ("skin melanoma", "melanoma"),
    ("malignant melanoma", "melanoma"),
    // colorectal
    ("crc", "colorectal"),
    ("colorectal cancer", "colorectal"),
    ("colorectal carcinoma", "colorectal"),
    ("colorectal adenocarcinoma", "colorectal"),
    ("colon cancer", "colorectal"),
    ("colon adenocarcinoma", "colorectal"),
    ("rectal cancer", "colorectal"),
    // pancreas
    ("pancreatic", "pancreatic"),
    ("pancreatic cancer", "pancreatic"),
    ("pancreatic adenocarcinoma", "pancreatic"),
    ("pancreatic ductal adenocarcinoma", "pancreatic"),
    ("pdac", "pancreatic"),
    ("pancreas", "pancreatic"),
    // breast
    ("breast cancer", "breast"),
    ("breast carcinoma", "breast"),
    ("breast adenocarcinoma", "breast"),
    // gyn
    ("ovarian cancer", "ovarian"),
    ("ovarian carcinoma", "ovarian"),
    ("ovary", "ovarian"),
    ("endometrial cancer", "endometrial"),
    ("endometrial carcinoma", "endometrial"),
    ("endometrium", "endometrial"),
    ("uterine cancer", "endometrial"),
    ("uterine corpus endometrial carcinoma", "endometrial"),
    // gi
    ("gastric cancer", "gastric"),
    ("stomach cancer", "gastric"),
    ("stomach adenocarcinoma", "gastric"),
    ("gist", "gist"),
    ("gastrointestinal stromal tumor", "gist"),
    ("hepatocellular carcinoma", "liver"),
    ("hcc", "liver"),
    ("liver cancer", "liver"),
    ("cholangiocarcinoma", "biliary"),
    ("biliary tract cancer", "biliary"),
    // heme
    ("aml", "aml"),
    ("acute myeloid leukemia", "aml"),
    ("cml", "cml"),
    ("chronic myeloid leukemia", "cml"),
    ("chronic myelogenous leukemia", "cml"),
    // other solid
    ("thyroid cancer", "thyroid"),
    ("thyroid carcinoma", "thyroid"),
    ("papillary thyroid carcinoma", "thyroid"),
    ("anaplastic thyroid carcinoma", "thyroid"),
    ("glioma", "glioma"),
    ("glioblastoma", "glioma"),
    ("glioblastoma multiforme", "glioma"),
    ("low-grade glioma", "glioma"),
    ("bladder cancer", "bladder"),
    ("urothelial carcinoma", "bladder"),
    ("urothelial cancer", "bladder"),
    ("prostate cancer", "prostate"),
    ("prostate adenocarcinoma", "prostate"),
    ("renal cell carcinoma", "renal"),
    ("kidney cancer", "renal"),
    ("head and neck squamous cell carcinoma", "head_and_neck"),
    ("hnscc", "head_and_neck"),
];

fn clean(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapses a free-text tumor type onto its canonical token. Unknown types
/// fall back to their cleaned lowercase spelling so exact matches still work.
pub fn canonical_tumor(raw: &str) -> String {
    let cleaned = clean(raw);
    for (alias, canonical) in ALIASES {
        if cleaned == *alias {
            return (*canonical).to_string();
        }
    }
    cleaned
}

/// True when two free-text tumor spellings resolve to the same canonical
/// token. Empty strings never match anything.
pub fn same_tumor(a: &str, b: &str) -> bool {
    let (a, b) = (canonical_tumor(a), canonical_tumor(b));
    !a.is_empty() && a == b
}

/// True when any token in `candidates` matches `tumor`. Used by the CGI
/// catalog filter, where one biomarker row lists several tumor names.
pub fn any_tumor_matches(tumor: &str, candidates: &[String]) -> bool {
    candidates.iter().any(|candidate| same_tumor(tumor, candidate))
}

/// True when free text (an FDA indication, a disease name) mentions the
/// tumor type under any of its known spellings.
pub fn text_mentions_tumor(text: &str, tumor: &str) -> bool {
    let text = clean(text);
    if text.is_empty() {
        return false;
    }
    let canonical = canonical_tumor(tumor);
    let raw = clean(tumor);
    if (!raw.is_empty() && text.contains(&raw)) || text.contains(&canonical) {
        return true;
    }
    ALIASES
        .iter()
        .filter(|(_, target)| **target == canonical)
        .any(|(alias, _)| text.contains(alias))
}
