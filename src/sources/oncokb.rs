//! OncoKB cancer-gene list.
//!
//! Only gene-list membership is consumed here: `is_cancer_gene` backs the
//! VUS-in-cancer-gene branch of the tier engine. The bundled list is the
//! OncoKB curated cancer gene set; `ONCOTIER_CANCER_GENE_LIST` can point at
//! a newline-separated file to replace it without rebuilding.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use tracing::warn;

/// OncoKB curated cancer genes (abridged to the recurrently queried set).
const BUILTIN_CANCER_GENES: &[&str] = &[
    "ABL1", "AKT1", "AKT2", "AKT3", "ALK", "APC", "AR", "ARAF", "ARID1A", "ARID1B", "ARID2",
    "ASXL1", "ATM", "ATR", "ATRX", "AXL", "BAP1", "BARD1", "BCL2", "BCL6", "BCOR", "BRAF",
    "BRCA1", "BRCA2", "BRIP1", "BTK", "CBL", "CCND1", "CCND2", "CCND3", "CCNE1", "CDH1",
    "CDK4", "CDK6", "CDK12", "CDKN1B", "CDKN2A", "CDKN2B", "CEBPA", "CHEK1", "CHEK2", "CIC",
    "CREBBP", "CSF1R", "CSF3R", "CTCF", "CTNNB1", "DAXX", "DDR2", "DICER1", "DNMT3A", "EGFR",
    "EP300", "EPCAM", "ERBB2", "ERBB3", "ERBB4", "ERCC2", "ERG", "ESR1", "EZH2", "FANCA",
    "FANCC", "FBXW7", "FGFR1", "FGFR2", "FGFR3", "FGFR4", "FLT3", "FOXL2", "GATA1", "GATA2",
    "GATA3", "GNA11", "GNAQ", "GNAS", "H3F3A", "HNF1A", "HRAS", "IDH1", "IDH2", "IGF1R",
    "IKZF1", "JAK1", "JAK2", "JAK3", "KDM5C", "KDM6A", "KDR", "KEAP1", "KIT", "KMT2A",
    "KMT2C", "KMT2D", "KRAS", "MAP2K1", "MAP2K2", "MAP2K4", "MAP3K1", "MAPK1", "MDM2",
    "MDM4", "MED12", "MEN1", "MET", "MLH1", "MPL", "MSH2", "MSH6", "MTOR", "MYC", "MYCN",
    "MYD88", "NBN", "NF1", "NF2", "NFE2L2", "NOTCH1", "NOTCH2", "NPM1", "NRAS", "NTRK1",
    "NTRK2", "NTRK3", "PALB2", "PAX5", "PBRM1", "PDGFRA", "PDGFRB", "PIK3CA", "PIK3R1",
    "PMS2", "POLD1", "POLE", "PPP2R1A", "PTCH1", "PTEN", "PTPN11", "RAD21", "RAD51",
    "RAD51B", "RAD51C", "RAD51D", "RAF1", "RB1", "RET", "RHOA", "RIT1", "RNF43", "ROS1",
    "RUNX1", "SDHA", "SDHB", "SDHC", "SDHD", "SETD2", "SF3B1", "SMAD2", "SMAD4", "SMARCA4",
    "SMARCB1", "SMO", "SPOP", "SRC", "SRSF2", "STAG2", "STK11", "SUFU", "TERT", "TET2",
    "TP53", "TSC1", "TSC2", "TSHR", "U2AF1", "VHL", "WT1", "XPO1", "ZRSR2",
];

const GENE_LIST_ENV: &str = "ONCOTIER_CANCER_GENE_LIST";

#[derive(Debug)]
pub struct CancerGeneList {
    genes: HashSet<String>,
}

impl CancerGeneList {
    pub fn builtin() -> Self {
        Self {
            genes: BUILTIN_CANCER_GENES
                .iter()
                .map(|g| g.to_string())
                .collect(),
        }
    }

    fn from_file(path: &str) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let genes: HashSet<String> = raw
            .lines()
            .map(|line| line.trim().to_uppercase())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();
        Ok(Self { genes })
    }

    /// Builtin list, or the override file when the env var names one.
    pub fn load() -> Self {
        let Ok(path) = std::env::var(GENE_LIST_ENV) else {
            return Self::builtin();
        };
        let path = path.trim();
        if path.is_empty() {
            return Self::builtin();
        }
        match Self::from_file(path) {
            Ok(list) if !list.genes.is_empty() => list,
            Ok(_) => {
                warn!(path, "Cancer gene list override is empty; using builtin list");
                Self::builtin()
            }
            Err(err) => {
                warn!(path, error = %err, "Failed to read cancer gene list; using builtin list");
                Self::builtin()
            }
        }
    }

    pub fn is_cancer_gene(&self, gene: &str) -> bool {
        self.genes.contains(&gene.trim().to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

static GLOBAL_GENE_LIST: OnceLock<Arc<CancerGeneList>> = OnceLock::new();

/// Loaded once per process, shared read-only.
pub fn global_gene_list() -> Arc<CancerGeneList> {
    GLOBAL_GENE_LIST
        .get_or_init(|| Arc::new(CancerGeneList::load()))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_list_contains_core_drivers() {
        let list = CancerGeneList::builtin();
        for gene in ["BRAF", "EGFR", "KRAS", "TP53", "PTEN", "POLE"] {
            assert!(list.is_cancer_gene(gene), "{gene}");
        }
        assert!(!list.is_cancer_gene("TTN"));
        assert!(!list.is_cancer_gene("GAPDH"));
        assert!(list.len() > 100);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let list = CancerGeneList::builtin();
        assert!(list.is_cancer_gene("braf"));
        assert!(list.is_cancer_gene(" Braf "));
    }
}
