//! Command-line surface: `classify` for one triple or a batch file,
//! `validate` for a gold-standard file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Deserialize;

use crate::assess::{Assessment, Pipeline, SourceState};
use crate::config::Settings;
use crate::error::OncoTierError;
use crate::llm::DecisionLog;

#[derive(Debug, Parser)]
#[command(
    name = "oncotier",
    version,
    about = "AMP/ASCO/CAP tier classification for somatic variants"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Classify a single variant, or a batch with --input.
    Classify {
        /// Gene symbol, e.g. BRAF
        gene: Option<String>,
        /// Protein variant, e.g. V600E or p.Val600Glu
        variant: Option<String>,
        /// Tumor type, e.g. Melanoma
        #[arg(short, long)]
        tumor: Option<String>,
        /// JSON file with [{gene, variant, tumor_type?}, ...]
        #[arg(long, conflicts_with_all = ["gene", "variant"])]
        input: Option<PathBuf>,
        /// Emit the assessment as JSON
        #[arg(long)]
        json: bool,
        /// Append LLM request/response records to this JSONL file
        #[arg(long)]
        decision_log: Option<PathBuf>,
        /// Skip the VICC meta-knowledgebase
        #[arg(long)]
        no_vicc: bool,
    },
    /// Evaluate against a gold-standard case file.
    Validate {
        /// JSON file with [{gene, variant, tumor_type?, expected_tier}, ...]
        file: PathBuf,
        /// Maximum concurrent assessments
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Deserialize)]
struct BatchInput {
    gene: String,
    variant: String,
    #[serde(default)]
    tumor_type: Option<String>,
}

/// Exit-code contract: 0 success, 2 input parse error, 3 all assessments
/// failed, 4 configuration error.
pub fn exit_code_for(err: &OncoTierError) -> u8 {
    match err {
        OncoTierError::Config(_) => 4,
        OncoTierError::AllAssessmentsFailed => 3,
        OncoTierError::InvalidArgument(_)
        | OncoTierError::Json(_)
        | OncoTierError::UnsupportedVariantKind { .. }
        | OncoTierError::UnrecognizedNotation { .. } => 2,
        _ => 1,
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<String> {
    Ok(run_command(cli).await?)
}

async fn run_command(cli: Cli) -> Result<String, OncoTierError> {
    match cli.command {
        Commands::Classify {
            gene,
            variant,
            tumor,
            input,
            json,
            decision_log,
            no_vicc,
        } => {
            let mut settings = Settings::from_env()?;
            if no_vicc {
                settings.vicc_enabled = false;
            }
            let log = match decision_log {
                Some(path) => Arc::new(DecisionLog::open(&path).await?),
                None => Arc::new(DecisionLog::disabled()),
            };
            let pipeline = Pipeline::with_decision_log(settings.clone(), log)?;

            match input {
                Some(path) => classify_batch(&pipeline, &settings, &path, json).await,
                None => {
                    let (Some(gene), Some(variant)) = (gene, variant) else {
                        return Err(OncoTierError::InvalidArgument(
                            "Gene and variant are required. Example: oncotier classify BRAF V600E -t Melanoma".into(),
                        ));
                    };
                    let assessment =
                        pipeline.assess(&gene, &variant, tumor.as_deref()).await?;
                    if json {
                        Ok(serde_json::to_string_pretty(&assessment)?)
                    } else {
                        Ok(render_assessment(&assessment))
                    }
                }
            }
        }
        Commands::Validate {
            file,
            max_concurrent,
            json,
        } => {
            let settings = Settings::from_env()?;
            let raw = read_input_file(&file)?;
            let cases = crate::validate::parse_cases(&raw)?;
            let pipeline = Pipeline::new(settings.clone())?;
            let report = crate::validate::run_validation(
                &pipeline,
                cases,
                max_concurrent.unwrap_or(settings.max_concurrent_validation),
            )
            .await;
            if report.all_failed() {
                return Err(OncoTierError::AllAssessmentsFailed);
            }
            if json {
                Ok(serde_json::to_string_pretty(&report)?)
            } else {
                Ok(crate::validate::render_report(&report))
            }
        }
    }
}

/// Unreadable input files are an input error (exit 2), not an IO crash.
fn read_input_file(path: &std::path::Path) -> Result<String, OncoTierError> {
    std::fs::read_to_string(path).map_err(|err| {
        OncoTierError::InvalidArgument(format!("Cannot read {}: {err}", path.display()))
    })
}

async fn classify_batch(
    pipeline: &Pipeline,
    settings: &Settings,
    path: &std::path::Path,
    json: bool,
) -> Result<String, OncoTierError> {
    let raw = read_input_file(path)?;
    let inputs: Vec<BatchInput> = serde_json::from_str(&raw)?;
    if inputs.is_empty() {
        return Err(OncoTierError::InvalidArgument(
            "Batch file contains no inputs".into(),
        ));
    }

    let outcomes: Vec<(BatchInput, Result<Assessment, OncoTierError>)> =
        futures::stream::iter(inputs.into_iter().map(|input| async move {
            let result = pipeline
                .assess(&input.gene, &input.variant, input.tumor_type.as_deref())
                .await;
            (input, result)
        }))
        .buffer_unordered(settings.max_concurrent_validation)
        .collect()
        .await;

    if outcomes.iter().all(|(_, result)| result.is_err()) {
        return Err(OncoTierError::AllAssessmentsFailed);
    }

    if json {
        let entries: Vec<serde_json::Value> = outcomes
            .iter()
            .map(|(input, result)| match result {
                Ok(assessment) => serde_json::to_value(assessment)
                    .unwrap_or_else(|err| serde_json::json!({"error": err.to_string()})),
                Err(err) => serde_json::json!({
                    "gene": input.gene,
                    "variant": input.variant,
                    "error": err.to_string(),
                }),
            })
            .collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    } else {
        let mut out = String::new();
        for (input, result) in &outcomes {
            match result {
                Ok(assessment) => {
                    out.push_str(&render_assessment(assessment));
                    out.push('\n');
                }
                Err(err) => {
                    out.push_str(&format!("{} {}: {err}\n\n", input.gene, input.variant));
                }
            }
        }
        Ok(out)
    }
}

fn render_assessment(assessment: &Assessment) -> String {
    let variant = &assessment.variant;
    let mut out = format!(
        "{} {}{}\n",
        variant.gene,
        variant.variant_normalized,
        assessment
            .evidence
            .tumor_type
            .as_deref()
            .map(|t| format!(" ({t})"))
            .unwrap_or_default()
    );
    out.push_str(&format!(
        "Tier {}{}  confidence {:.2}\n",
        assessment.tier,
        assessment
            .sublevel_internal
            .map(|s| format!("-{s}"))
            .unwrap_or_default(),
        assessment.confidence
    ));
    out.push_str(&format!("Reason: {}\n", assessment.tier_result.human_reason));

    if !assessment.recommended_therapies.is_empty() {
        out.push_str(&format!(
            "Therapies: {}\n",
            assessment.recommended_therapies.join(", ")
        ));
    }

    let degraded: Vec<&str> = assessment
        .evidence_sources
        .iter()
        .filter(|s| s.state == SourceState::Degraded)
        .map(|s| s.name)
        .collect();
    let present: Vec<&str> = assessment
        .evidence_sources
        .iter()
        .filter(|s| s.state == SourceState::Present)
        .map(|s| s.name)
        .collect();
    out.push_str(&format!("Sources: {}\n", present.join(", ")));
    if !degraded.is_empty() {
        out.push_str(&format!("Degraded: {}\n", degraded.join(", ")));
    }

    for (key, value) in &assessment.annotations {
        out.push_str(&format!("  {key}: {value}\n"));
    }

    out.push_str(&format!("\n{}\n", assessment.narrative));
    if !assessment.references.is_empty() {
        out.push_str(&format!("References: {}\n", assessment.references.join("; ")));
    }
    out
}
