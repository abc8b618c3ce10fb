//! Configuration tables driving the tier cascade.
//!
//! All of this is data, not code: variant-class matching rules, molecular
//! subtype-defining variants, investigational-only gene/tumor pairs,
//! pathway-actionable tumor suppressors, standard-of-care resistance
//! entries, and the oncogene mutation-class annotations the narrator gets.
//! Tables are built once per process and shared read-only.

use std::sync::{Arc, OnceLock};

use crate::tumor::same_tumor;

/// One named variant class of a gene: substring `patterns` on the canonical
/// short form, explicit `variants` (`*` admits anything), minus
/// `exclude_variants`.
#[derive(Debug, Clone)]
pub struct VariantClass {
    pub name: &'static str,
    pub patterns: &'static [&'static str],
    pub variants: &'static [&'static str],
    pub exclude_variants: &'static [&'static str],
}

impl VariantClass {
    /// Whether this class admits the given variant token.
    pub fn admits(&self, token: &str) -> bool {
        let token = token.trim().to_uppercase();
        if token.is_empty() {
            return false;
        }
        if self
            .exclude_variants
            .iter()
            .any(|v| v.eq_ignore_ascii_case(&token))
        {
            return false;
        }
        if self.variants.iter().any(|v| *v == "*") {
            return true;
        }
        if self.variants.iter().any(|v| v.eq_ignore_ascii_case(&token)) {
            return true;
        }
        self.patterns
            .iter()
            .any(|p| token.contains(&p.to_uppercase()))
    }
}

#[derive(Debug, Clone)]
pub struct GeneClassRules {
    pub gene: &'static str,
    /// When set, an approval token that matches no class of this gene can
    /// never be claimed (keeps non-V600 BRAF away from V600 approvals).
    pub require_explicit: bool,
    pub classes: &'static [VariantClass],
}

const BRAF_CLASSES: &[VariantClass] = &[
    VariantClass {
        name: "V600",
        patterns: &["V600"],
        variants: &[],
        exclude_variants: &[],
    },
    VariantClass {
        name: "class2_activating",
        patterns: &[],
        variants: &["G469A", "G469V", "G469R", "K601E", "L597Q", "L597V"],
        exclude_variants: &[],
    },
    VariantClass {
        name: "class3_kinase_impaired",
        patterns: &[],
        variants: &["D594G", "D594N", "G466V", "G466E", "N581S"],
        exclude_variants: &[],
    },
];

const EGFR_CLASSES: &[VariantClass] = &[
    VariantClass {
        name: "tki_sensitizing",
        patterns: &["E746", "L747", "A750"],
        variants: &["L858R", "L861Q", "G719A", "G719C", "G719S", "S768I"],
        exclude_variants: &["T790M", "C797S", "R108K"],
    },
    VariantClass {
        name: "t790m",
        patterns: &[],
        variants: &["T790M"],
        exclude_variants: &[],
    },
    VariantClass {
        name: "exon20_insertion",
        patterns: &["769_", "770_", "771_"],
        variants: &[],
        exclude_variants: &[],
    },
];

const KRAS_CLASSES: &[VariantClass] = &[
    VariantClass {
        name: "g12c",
        patterns: &[],
        variants: &["G12C"],
        exclude_variants: &[],
    },
    VariantClass {
        name: "activating",
        patterns: &["G12", "G13", "Q61"],
        variants: &[],
        exclude_variants: &[],
    },
];

const KIT_CLASSES: &[VariantClass] = &[
    VariantClass {
        name: "exon11",
        patterns: &["557", "559", "560", "576"],
        variants: &["*"],
        exclude_variants: &["D816V", "D816H"],
    },
    VariantClass {
        name: "exon17_resistance",
        patterns: &["816", "820", "822", "823"],
        variants: &[],
        exclude_variants: &[],
    },
];

const GENE_CLASS_RULES: &[GeneClassRules] = &[
    GeneClassRules {
        gene: "BRAF",
        require_explicit: true,
        classes: BRAF_CLASSES,
    },
    GeneClassRules {
        gene: "EGFR",
        require_explicit: false,
        classes: EGFR_CLASSES,
    },
    GeneClassRules {
        gene: "KRAS",
        require_explicit: false,
        classes: KRAS_CLASSES,
    },
    GeneClassRules {
        gene: "KIT",
        require_explicit: false,
        classes: KIT_CLASSES,
    },
];

/// Molecular subtype-defining variants: established clinical utility by the
/// variant's presence alone.
pub struct SubtypeDefining {
    pub gene: &'static str,
    pub variant: &'static str,
    pub tumor: &'static str,
    pub note: &'static str,
}

const SUBTYPE_DEFINING: &[SubtypeDefining] = &[
    SubtypeDefining {
        gene: "POLE",
        variant: "P286R",
        tumor: "endometrial",
        note: "POLE-ultramutated endometrial carcinoma subtype",
    },
    SubtypeDefining {
        gene: "POLE",
        variant: "V411L",
        tumor: "endometrial",
        note: "POLE-ultramutated endometrial carcinoma subtype",
    },
    SubtypeDefining {
        gene: "IDH1",
        variant: "R132H",
        tumor: "glioma",
        note: "IDH-mutant glioma subtype",
    },
];

/// Gene/tumor pairs with no approved targeted therapy; forced to Tier III.
const INVESTIGATIONAL_ONLY: &[(&str, &str)] = &[
    ("KRAS", "pancreatic"),
    ("KRAS", "ovarian"),
    ("NRAS", "melanoma"),
];

/// Pathway-actionable tumor suppressors and the drugs their loss exposes.
pub struct PathwayTsg {
    pub gene: &'static str,
    pub pathway: &'static str,
    pub drugs: &'static [&'static str],
}

const PATHWAY_TSGS: &[PathwayTsg] = &[
    PathwayTsg {
        gene: "PTEN",
        pathway: "PI3K/AKT/mTOR",
        drugs: &["alpelisib", "capivasertib", "everolimus"],
    },
    PathwayTsg {
        gene: "VHL",
        pathway: "HIF-2a",
        drugs: &["belzutifan"],
    },
    PathwayTsg {
        gene: "NF1",
        pathway: "MEK",
        drugs: &["selumetinib", "trametinib"],
    },
    PathwayTsg {
        gene: "TSC1",
        pathway: "mTOR",
        drugs: &["everolimus", "sirolimus"],
    },
    PathwayTsg {
        gene: "TSC2",
        pathway: "mTOR",
        drugs: &["everolimus", "sirolimus"],
    },
];

/// Variants that defeat the standard of care of a tumor type. When an
/// FDA-approved alternative exists the resistance is itself actionable.
pub struct SocResistance {
    pub gene: &'static str,
    pub variants: &'static [&'static str],
    pub tumor: &'static str,
    pub resistant_to: &'static [&'static str],
    pub fda_alternative: Option<&'static str>,
}

const SOC_RESISTANCE: &[SocResistance] = &[
    SocResistance {
        gene: "EGFR",
        variants: &["T790M"],
        tumor: "nsclc",
        resistant_to: &["erlotinib", "gefitinib", "afatinib"],
        fda_alternative: Some("osimertinib"),
    },
    SocResistance {
        gene: "EGFR",
        variants: &["C797S"],
        tumor: "nsclc",
        resistant_to: &["osimertinib"],
        fda_alternative: None,
    },
    SocResistance {
        gene: "KIT",
        variants: &["D816V", "D816H"],
        tumor: "gist",
        resistant_to: &["imatinib"],
        fda_alternative: Some("avapritinib"),
    },
];

/// Annotation-only oncogene mutation classes for the narrator.
struct OncogeneClassNote {
    gene: &'static str,
    patterns: &'static [&'static str],
    note: &'static str,
}

const ONCOGENE_CLASS_NOTES: &[OncogeneClassNote] = &[
    OncogeneClassNote {
        gene: "BRAF",
        patterns: &["V600"],
        note: "BRAF class I (V600): RAS-independent monomer signaling",
    },
    OncogeneClassNote {
        gene: "BRAF",
        patterns: &["G469", "K601", "L597"],
        note: "BRAF class II: RAS-independent activating dimer",
    },
    OncogeneClassNote {
        gene: "BRAF",
        patterns: &["D594", "G466", "N581"],
        note: "BRAF class III: kinase-impaired, RAS-dependent",
    },
    OncogeneClassNote {
        gene: "KRAS",
        patterns: &["G12C"],
        note: "KRAS G12C: covalently targetable switch-II pocket",
    },
    OncogeneClassNote {
        gene: "KRAS",
        patterns: &["G12", "G13", "Q61"],
        note: "KRAS activating hotspot without covalent inhibitor",
    },
    OncogeneClassNote {
        gene: "KIT",
        patterns: &["557", "559", "560", "576"],
        note: "KIT exon 11 juxtamembrane mutation (imatinib-sensitive class)",
    },
    OncogeneClassNote {
        gene: "KIT",
        patterns: &["816", "820", "822", "823"],
        note: "KIT exon 17 activation-loop mutation (imatinib-resistant class)",
    },
];

/// The complete, immutable configuration the tier engine reads.
pub struct GeneContext {
    class_rules: &'static [GeneClassRules],
    subtype_defining: &'static [SubtypeDefining],
    investigational_only: &'static [(&'static str, &'static str)],
    pathway_tsgs: &'static [PathwayTsg],
    soc_resistance: &'static [SocResistance],
}

impl GeneContext {
    pub fn builtin() -> Self {
        Self {
            class_rules: GENE_CLASS_RULES,
            subtype_defining: SUBTYPE_DEFINING,
            investigational_only: INVESTIGATIONAL_ONLY,
            pathway_tsgs: PATHWAY_TSGS,
            soc_resistance: SOC_RESISTANCE,
        }
    }

    pub fn class_rules(&self, gene: &str) -> Option<&GeneClassRules> {
        self.class_rules
            .iter()
            .find(|r| r.gene.eq_ignore_ascii_case(gene))
    }

    /// Variant-class admission for an approval: can `canonical` claim
    /// evidence carrying `incoming` as its variant token? Genes without
    /// class rules admit freely; `require_explicit` genes additionally
    /// demand that the incoming token lands in some class.
    pub fn admits_approval(&self, gene: &str, canonical: &str, incoming: &str) -> bool {
        let Some(rules) = self.class_rules(gene) else {
            return true;
        };
        if rules.require_explicit
            && !rules.classes.iter().any(|class| class.admits(incoming))
        {
            return false;
        }
        rules
            .classes
            .iter()
            .any(|class| class.admits(canonical) && class.admits(incoming))
    }

    pub fn subtype_note(
        &self,
        gene: &str,
        canonical: &str,
        tumor: Option<&str>,
    ) -> Option<&'static str> {
        let tumor = tumor?;
        self.subtype_defining
            .iter()
            .find(|entry| {
                entry.gene.eq_ignore_ascii_case(gene)
                    && entry.variant.eq_ignore_ascii_case(canonical)
                    && same_tumor(entry.tumor, tumor)
            })
            .map(|entry| entry.note)
    }

    pub fn is_investigational_only(&self, gene: &str, tumor: Option<&str>) -> bool {
        let Some(tumor) = tumor else {
            return false;
        };
        self.investigational_only
            .iter()
            .any(|(g, t)| g.eq_ignore_ascii_case(gene) && same_tumor(t, tumor))
    }

    pub fn pathway_tsg(&self, gene: &str) -> Option<&PathwayTsg> {
        self.pathway_tsgs
            .iter()
            .find(|entry| entry.gene.eq_ignore_ascii_case(gene))
    }

    pub fn soc_resistance(
        &self,
        gene: &str,
        canonical: &str,
        tumor: Option<&str>,
    ) -> Option<&SocResistance> {
        let tumor = tumor?;
        self.soc_resistance.iter().find(|entry| {
            entry.gene.eq_ignore_ascii_case(gene)
                && same_tumor(entry.tumor, tumor)
                && entry
                    .variants
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(canonical))
        })
    }

    /// Narrator-facing mutation-class annotation; never consulted for the
    /// tier beyond the include/exclude lists above.
    pub fn oncogene_class_note(&self, gene: &str, canonical: &str) -> Option<&'static str> {
        let canonical = canonical.to_uppercase();
        ONCOGENE_CLASS_NOTES
            .iter()
            .find(|entry| {
                entry.gene.eq_ignore_ascii_case(gene)
                    && entry
                        .patterns
                        .iter()
                        .any(|p| canonical.contains(&p.to_uppercase()))
            })
            .map(|entry| entry.note)
    }

    pub fn variant_class_name(&self, gene: &str, canonical: &str) -> Option<&'static str> {
        let rules = self.class_rules(gene)?;
        rules
            .classes
            .iter()
            .find(|class| class.admits(canonical))
            .map(|class| class.name)
    }
}

static GLOBAL_CONTEXT: OnceLock<Arc<GeneContext>> = OnceLock::new();

pub fn global_context() -> Arc<GeneContext> {
    GLOBAL_CONTEXT
        .get_or_init(|| Arc::new(GeneContext::builtin()))
        .clone()
}
