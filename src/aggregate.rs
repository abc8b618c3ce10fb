//! Concurrent evidence aggregation.
//!
//! All source clients fan out at once under one per-assessment deadline.
//! A source that errors or runs past the deadline degrades to an absent
//! slot; it never aborts the assessment. The literature sub-pipeline runs
//! its per-paper LLM scoring inside the same deadline, then a single
//! knowledge extraction over the kept papers.

use std::future::Future;
use std::sync::Arc;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::OncoTierError;
use crate::evidence::{Evidence, LiteratureFragment, SourceSlot};
use crate::llm::ChatClient;
use crate::llm::literature::{extract_knowledge, score_paper};
use crate::normalize::NormalizedVariant;
use crate::sources::cgi::CgiClient;
use crate::sources::civic::CivicClient;
use crate::sources::clinicaltrials::ClinicalTrialsClient;
use crate::sources::myvariant::MyVariantClient;
use crate::sources::oncokb::CancerGeneList;
use crate::sources::openfda::OpenFdaClient;
use crate::sources::semantic_scholar::{PaperRecord, SemanticScholarClient};
use crate::sources::vicc::ViccClient;

pub struct Aggregator {
    settings: Settings,
    myvariant: MyVariantClient,
    fda: OpenFdaClient,
    cgi: CgiClient,
    vicc: Option<ViccClient>,
    civic: CivicClient,
    literature: SemanticScholarClient,
    trials: ClinicalTrialsClient,
    genes: Arc<CancerGeneList>,
    chat: Option<Arc<dyn ChatClient>>,
}

/// Resolves one source future into a slot: present on success, degraded on
/// error or deadline cancellation.
async fn slot<T, F>(source: &'static str, cancel: &CancellationToken, fut: F) -> SourceSlot<T>
where
    F: Future<Output = Result<T, OncoTierError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => {
            warn!(source, "Assessment deadline expired before source completed");
            SourceSlot::degraded()
        }
        result = fut => match result {
            Ok(value) => {
                debug!(source, "Source completed");
                SourceSlot::present(value)
            }
            Err(err) => {
                warn!(source, error = %err, "Source degraded");
                SourceSlot::degraded()
            }
        }
    }
}

impl Aggregator {
    pub fn new(
        settings: Settings,
        chat: Option<Arc<dyn ChatClient>>,
    ) -> Result<Self, OncoTierError> {
        let vicc = if settings.vicc_enabled {
            Some(ViccClient::new()?)
        } else {
            None
        };
        Ok(Self {
            myvariant: MyVariantClient::new()?,
            fda: OpenFdaClient::new()?,
            cgi: CgiClient::new(&settings),
            vicc,
            civic: CivicClient::new()?,
            literature: SemanticScholarClient::new()?,
            trials: ClinicalTrialsClient::new()?,
            genes: crate::sources::oncokb::global_gene_list(),
            chat,
            settings,
        })
    }

    pub async fn collect(
        &self,
        variant: &NormalizedVariant,
        tumor_type: Option<&str>,
    ) -> Evidence {
        let deadline = Instant::now() + self.settings.assessment_deadline();
        self.collect_until(variant, tumor_type, deadline).await
    }

    /// Fan-out with an explicit deadline. Sources not finished when it
    /// expires are recorded as degraded; the tier engine runs regardless.
    pub async fn collect_until(
        &self,
        variant: &NormalizedVariant,
        tumor_type: Option<&str>,
        deadline: Instant,
    ) -> Evidence {
        let cancel = CancellationToken::new();
        let watchdog = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                sleep_until(deadline).await;
                cancel.cancel();
            }
        });

        let (myvariant, fda, cgi, vicc, civic, literature, trials) = tokio::join!(
            slot("myvariant", &cancel, self.myvariant.fetch(variant)),
            slot("fda", &cancel, self.fda.fetch(variant)),
            slot("cgi", &cancel, self.cgi.fetch(variant)),
            async {
                match &self.vicc {
                    Some(client) => slot("vicc", &cancel, client.fetch(variant)).await,
                    None => SourceSlot::absent(),
                }
            },
            slot(
                "civic",
                &cancel,
                self.civic.fetch(variant, self.settings.evidence_item_limit),
            ),
            self.literature_slot(variant, tumor_type, &cancel),
            slot("clinicaltrials", &cancel, self.trials.fetch(variant, tumor_type)),
        );
        watchdog.abort();

        let mut evidence = Evidence::new(variant.clone(), tumor_type.map(String::from));
        evidence.myvariant = myvariant;
        evidence.fda = fda;
        evidence.cgi = cgi;
        evidence.vicc = vicc;
        evidence.civic = civic;
        evidence.literature = literature;
        evidence.trials = trials;
        evidence.cancer_gene =
            SourceSlot::present(self.genes.is_cancer_gene(&variant.gene));
        evidence.finalize();
        evidence
    }

    async fn literature_slot(
        &self,
        variant: &NormalizedVariant,
        tumor_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> SourceSlot<LiteratureFragment> {
        // No provider key: the literature pipeline is disabled, not broken.
        let Some(chat) = &self.chat else {
            return SourceSlot::absent();
        };

        let papers = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(source = "literature", "Assessment deadline expired before paper search");
                return SourceSlot::degraded();
            }
            result = self.literature.fetch(variant, tumor_type) => match result {
                Ok(papers) => papers,
                Err(err) => {
                    warn!(source = "literature", error = %err, "Paper search degraded");
                    return SourceSlot::degraded();
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(source = "literature", "Assessment deadline expired during scoring");
                SourceSlot::degraded()
            }
            fragment = run_literature_pipeline(
                chat.as_ref(),
                &self.settings,
                variant,
                tumor_type,
                papers,
            ) => fragment,
        }
    }
}

/// Scores each paper, keeps those at or above the relevance threshold, and
/// runs one knowledge extraction over the kept set. Scorer failures drop
/// individual papers; a fully failed scorer or a failed extractor degrades
/// the whole fragment.
pub(crate) async fn run_literature_pipeline(
    chat: &dyn ChatClient,
    settings: &Settings,
    variant: &NormalizedVariant,
    tumor_type: Option<&str>,
    papers: Vec<PaperRecord>,
) -> SourceSlot<LiteratureFragment> {
    if papers.is_empty() {
        return SourceSlot::present(LiteratureFragment::default());
    }

    let total = papers.len();
    let scored_results = futures::future::join_all(
        papers
            .iter()
            .map(|paper| score_paper(chat, settings, variant, tumor_type, paper)),
    )
    .await;

    let mut kept = Vec::new();
    let mut failures = 0usize;
    for result in scored_results {
        match result {
            Ok(paper) if paper.score >= settings.literature_score_threshold => kept.push(paper),
            Ok(paper) => {
                debug!(
                    paper_id = %paper.paper_id,
                    score = paper.score,
                    "Paper below relevance threshold"
                );
            }
            Err(err) => {
                failures += 1;
                warn!(error = %err, "Paper scoring failed");
            }
        }
    }

    if failures == total {
        return SourceSlot::degraded();
    }
    if kept.is_empty() {
        return SourceSlot::present(LiteratureFragment::default());
    }

    match extract_knowledge(chat, settings, variant, tumor_type, &kept).await {
        Ok(knowledge) => SourceSlot::present(LiteratureFragment {
            papers: kept,
            knowledge: Some(knowledge),
        }),
        Err(err) => {
            warn!(error = %err, "Knowledge extraction failed");
            SourceSlot::degraded()
        }
    }
}
