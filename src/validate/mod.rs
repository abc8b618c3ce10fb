//! Gold-standard validation harness.
//!
//! Runs the full pipeline over labeled cases with a concurrency cap,
//! collects `(expected, predicted)` pairs, and reports per-tier
//! precision/recall/F1, overall accuracy, a confusion matrix, and the mean
//! tier distance. Per-case errors are captured into the report, never
//! propagated.

use std::collections::BTreeMap;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use crate::assess::Pipeline;
use crate::error::OncoTierError;
use crate::tier::Tier;

pub const VALIDATION_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCase {
    pub gene: String,
    pub variant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tumor_type: Option<String>,
    pub expected_tier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierMetrics {
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseFailure {
    pub gene: String,
    pub variant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tumor_type: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasePrediction {
    pub gene: String,
    pub variant: String,
    pub expected: Tier,
    pub predicted: Tier,
    pub reason_code: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub schema_version: u32,
    pub generated_at: String,
    pub total_cases: usize,
    pub evaluated_cases: usize,
    pub overall_accuracy: f64,
    pub average_tier_distance: f64,
    pub per_tier: BTreeMap<String, TierMetrics>,
    /// Rows = expected tier I..IV, columns = predicted tier I..IV.
    pub confusion_matrix: [[usize; 4]; 4],
    pub predictions: Vec<CasePrediction>,
    pub failures: Vec<CaseFailure>,
}

impl ValidationReport {
    /// Exit-code contract: 3 when nothing could be evaluated at all.
    pub fn all_failed(&self) -> bool {
        self.total_cases > 0 && self.evaluated_cases == 0
    }
}

/// Reads cases from a JSON array (the gold-standard file format).
pub fn parse_cases(raw: &str) -> Result<Vec<ValidationCase>, OncoTierError> {
    let cases: Vec<ValidationCase> = serde_json::from_str(raw)?;
    if cases.is_empty() {
        return Err(OncoTierError::InvalidArgument(
            "Validation file contains no cases".into(),
        ));
    }
    Ok(cases)
}

/// Runs every case through the pipeline, at most `max_concurrent` at once.
pub async fn run_validation(
    pipeline: &Pipeline,
    cases: Vec<ValidationCase>,
    max_concurrent: usize,
) -> ValidationReport {
    let total = cases.len();
    let outcomes: Vec<Result<CasePrediction, CaseFailure>> = futures::stream::iter(
        cases.into_iter().map(|case| evaluate_case(pipeline, case)),
    )
    .buffer_unordered(max_concurrent.max(1))
    .collect()
    .await;

    let mut predictions = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(prediction) => predictions.push(prediction),
            Err(failure) => failures.push(failure),
        }
    }

    build_report(total, predictions, failures)
}

async fn evaluate_case(
    pipeline: &Pipeline,
    case: ValidationCase,
) -> Result<CasePrediction, CaseFailure> {
    let failure = |error: String| CaseFailure {
        gene: case.gene.clone(),
        variant: case.variant.clone(),
        tumor_type: case.tumor_type.clone(),
        error,
    };

    let Some(expected) = Tier::from_label(&case.expected_tier) else {
        return Err(failure(format!(
            "Unrecognized expected tier '{}'",
            case.expected_tier
        )));
    };

    match pipeline
        .assess(&case.gene, &case.variant, case.tumor_type.as_deref())
        .await
    {
        Ok(assessment) => Ok(CasePrediction {
            gene: case.gene,
            variant: case.variant,
            expected,
            predicted: assessment.tier,
            reason_code: format!("{:?}", assessment.reason_code),
            confidence: assessment.confidence,
        }),
        Err(err) => {
            warn!(gene = %case.gene, variant = %case.variant, error = %err, "Validation case failed");
            Err(failure(err.to_string()))
        }
    }
}

pub(crate) fn build_report(
    total_cases: usize,
    predictions: Vec<CasePrediction>,
    failures: Vec<CaseFailure>,
) -> ValidationReport {
    let evaluated = predictions.len();
    let mut confusion = [[0usize; 4]; 4];
    let mut distance_sum = 0u64;
    let mut correct = 0usize;

    for prediction in &predictions {
        let row = (prediction.expected.ordinal() - 1) as usize;
        let col = (prediction.predicted.ordinal() - 1) as usize;
        confusion[row][col] += 1;
        distance_sum += u64::from(prediction.expected.distance(prediction.predicted));
        if prediction.expected == prediction.predicted {
            correct += 1;
        }
    }

    let mut per_tier = BTreeMap::new();
    for tier in Tier::ALL {
        let idx = (tier.ordinal() - 1) as usize;
        let tp = confusion[idx][idx];
        let fp = (0..4).filter(|&r| r != idx).map(|r| confusion[r][idx]).sum();
        let fn_ = (0..4).filter(|&c| c != idx).map(|c| confusion[idx][c]).sum();
        per_tier.insert(tier.to_string(), tier_metrics(tp, fp, fn_));
    }

    let overall_accuracy = if evaluated > 0 {
        correct as f64 / evaluated as f64
    } else {
        0.0
    };
    let average_tier_distance = if evaluated > 0 {
        distance_sum as f64 / evaluated as f64
    } else {
        0.0
    };

    ValidationReport {
        schema_version: VALIDATION_SCHEMA_VERSION,
        generated_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()),
        total_cases,
        evaluated_cases: evaluated,
        overall_accuracy,
        average_tier_distance,
        per_tier,
        confusion_matrix: confusion,
        predictions,
        failures,
    }
}

fn tier_metrics(tp: usize, fp: usize, fn_: usize) -> TierMetrics {
    let precision = if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    };
    let recall = if tp + fn_ > 0 {
        tp as f64 / (tp + fn_) as f64
    } else {
        0.0
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    TierMetrics {
        tp,
        fp,
        fn_,
        precision,
        recall,
        f1,
    }
}

/// Human-readable rendering for the terminal.
pub fn render_report(report: &ValidationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Validation: {}/{} evaluated, accuracy {:.1}%, mean tier distance {:.2}\n\n",
        report.evaluated_cases,
        report.total_cases,
        report.overall_accuracy * 100.0,
        report.average_tier_distance
    ));
    out.push_str("Tier  TP  FP  FN  Precision  Recall  F1\n");
    for (tier, metrics) in &report.per_tier {
        out.push_str(&format!(
            "{:<5} {:<3} {:<3} {:<3} {:<10.3} {:<7.3} {:.3}\n",
            tier, metrics.tp, metrics.fp, metrics.fn_, metrics.precision, metrics.recall,
            metrics.f1
        ));
    }
    out.push_str("\nConfusion (rows expected, cols predicted; I..IV):\n");
    for (idx, row) in report.confusion_matrix.iter().enumerate() {
        out.push_str(&format!(
            "{:<4} {:>4} {:>4} {:>4} {:>4}\n",
            Tier::ALL[idx],
            row[0],
            row[1],
            row[2],
            row[3]
        ));
    }
    if !report.failures.is_empty() {
        out.push_str(&format!("\nFailures ({}):\n", report.failures.len()));
        for failure in &report.failures {
            out.push_str(&format!(
                "- {} {}: {}\n",
                failure.gene, failure.variant, failure.error
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(expected: Tier, predicted: Tier) -> CasePrediction {
        CasePrediction {
            gene: "BRAF".into(),
            variant: "V600E".into(),
            expected,
            predicted,
            reason_code: "FdaVariantInTumor".into(),
            confidence: 0.9,
        }
    }

    #[test]
    fn metrics_identity_holds() {
        let report = build_report(
            4,
            vec![
                prediction(Tier::I, Tier::I),
                prediction(Tier::I, Tier::II),
                prediction(Tier::II, Tier::II),
                prediction(Tier::III, Tier::I),
            ],
            Vec::new(),
        );

        let tier_i = &report.per_tier["I"];
        assert_eq!(tier_i.tp, 1);
        assert_eq!(tier_i.fp, 1);
        assert_eq!(tier_i.fn_, 1);
        assert!((tier_i.precision - 0.5).abs() < 1e-9);
        assert!((tier_i.recall - 0.5).abs() < 1e-9);
        let expected_f1 =
            2.0 * tier_i.precision * tier_i.recall / (tier_i.precision + tier_i.recall);
        assert!((tier_i.f1 - expected_f1).abs() < 1e-9);

        // accuracy = sum(TP) / N
        let tp_sum: usize = report.per_tier.values().map(|m| m.tp).sum();
        assert!((report.overall_accuracy - tp_sum as f64 / 4.0).abs() < 1e-9);

        // distances: 0 + 1 + 0 + 2 over 4 cases
        assert!((report.average_tier_distance - 0.75).abs() < 1e-9);
    }

    #[test]
    fn zero_precision_recall_yields_zero_f1() {
        let report = build_report(1, vec![prediction(Tier::I, Tier::IV)], Vec::new());
        let tier_ii = &report.per_tier["II"];
        assert_eq!(tier_ii.f1, 0.0);
        assert_eq!(tier_ii.precision, 0.0);
        assert_eq!(tier_ii.recall, 0.0);
    }

    #[test]
    fn confusion_matrix_indexes_expected_row_predicted_col() {
        let report = build_report(1, vec![prediction(Tier::II, Tier::IV)], Vec::new());
        assert_eq!(report.confusion_matrix[1][3], 1);
        assert_eq!(report.confusion_matrix[3][1], 0);
    }

    #[test]
    fn failures_do_not_enter_metrics() {
        let report = build_report(
            2,
            vec![prediction(Tier::I, Tier::I)],
            vec![CaseFailure {
                gene: "ALK".into(),
                variant: "fusion".into(),
                tumor_type: None,
                error: "unsupported".into(),
            }],
        );
        assert_eq!(report.evaluated_cases, 1);
        assert_eq!(report.total_cases, 2);
        assert!((report.overall_accuracy - 1.0).abs() < 1e-9);
        assert!(!report.all_failed());

        let all_failed = build_report(
            1,
            Vec::new(),
            vec![CaseFailure {
                gene: "ALK".into(),
                variant: "fusion".into(),
                tumor_type: None,
                error: "unsupported".into(),
            }],
        );
        assert!(all_failed.all_failed());
    }

    #[test]
    fn parse_cases_accepts_gold_file_shape() {
        let raw = r#"[
            {"gene": "BRAF", "variant": "V600E", "tumor_type": "Melanoma", "expected_tier": "I"},
            {"gene": "TP53", "variant": "R273H", "expected_tier": "Tier II", "notes": "prognostic"}
        ]"#;
        let cases = parse_cases(raw).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].tumor_type.as_deref(), Some("Melanoma"));
        assert_eq!(Tier::from_label(&cases[1].expected_tier), Some(Tier::II));

        assert!(parse_cases("[]").is_err());
        assert!(parse_cases("not json").is_err());
    }

    #[test]
    fn render_report_mentions_headline_numbers() {
        let report = build_report(1, vec![prediction(Tier::I, Tier::I)], Vec::new());
        let text = render_report(&report);
        assert!(text.contains("accuracy 100.0%"));
        assert!(text.contains("Tier  TP"));
    }
}
