//! Client-side request pacing.
//!
//! Every upstream gets a lane with a minimum interval between requests.
//! Acquisition is a reservation, not a poll: the caller locks the lane,
//! claims the next free time slot, bumps the lane forward by one interval,
//! and sleeps until its slot comes up. Bursts from concurrent assessments
//! therefore drain in arrival order instead of stampeding an API the
//! moment an interval elapses. Semantic Scholar's public tier allows one
//! request per second and gets the strictest lane; URLs that match no lane
//! are paced per origin at a default interval.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::Extensions;
use reqwest::Url;
use reqwest_middleware::{Middleware, Next};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

pub(crate) struct LaneConfig {
    pub name: &'static str,
    pub prefix: Cow<'static, str>,
    pub min_interval: Duration,
}

/// One paced upstream: its config plus the next instant a request may go
/// out. `None` until the lane has been used once.
struct Lane {
    config: LaneConfig,
    next_free: Mutex<Option<Instant>>,
}

pub(crate) struct RequestPacer {
    /// Held sorted by descending prefix length so the most specific lane
    /// wins a lookup.
    lanes: Vec<Lane>,
    fallback_interval: Duration,
    fallback_slots: Mutex<HashMap<String, Instant>>,
}

fn lane(
    name: &'static str,
    env_var: &'static str,
    default_prefix: &'static str,
    millis: u64,
) -> LaneConfig {
    LaneConfig {
        name,
        prefix: crate::sources::env_base(default_prefix, env_var),
        min_interval: Duration::from_millis(millis),
    }
}

impl RequestPacer {
    fn from_env() -> Self {
        Self::with_lanes(
            vec![
                lane(
                    "semantic-scholar",
                    "ONCOTIER_S2_BASE",
                    "https://api.semanticscholar.org/graph/v1",
                    1000,
                ),
                lane("civic", "ONCOTIER_CIVIC_BASE", "https://civicdb.org/api", 334),
                lane(
                    "clinicaltrials",
                    "ONCOTIER_CTGOV_BASE",
                    "https://clinicaltrials.gov/api/v2",
                    250,
                ),
                lane("openfda", "ONCOTIER_OPENFDA_BASE", "https://api.fda.gov", 250),
                lane(
                    "vicc",
                    "ONCOTIER_VICC_BASE",
                    "https://search.cancervariants.org/api/v1",
                    250,
                ),
                lane(
                    "myvariant",
                    "ONCOTIER_MYVARIANT_BASE",
                    "https://myvariant.info/v1",
                    100,
                ),
            ],
            Duration::from_millis(100),
        )
    }

    fn with_lanes(mut configs: Vec<LaneConfig>, fallback_interval: Duration) -> Self {
        configs.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self {
            lanes: configs
                .into_iter()
                .map(|config| Lane {
                    config,
                    next_free: Mutex::new(None),
                })
                .collect(),
            fallback_interval,
            fallback_slots: Mutex::new(HashMap::new()),
        }
    }

    fn lane_for(&self, url: &Url) -> Option<&Lane> {
        self.lanes
            .iter()
            .find(|lane| url.as_str().starts_with(lane.config.prefix.as_ref()))
    }

    fn origin_key(url: &Url) -> String {
        match url.host_str() {
            Some(host) => format!("{}://{host}", url.scheme()),
            None => url.scheme().to_string(),
        }
    }

    /// Claims the next free slot for this URL's lane, then waits for it.
    pub(crate) async fn acquire(&self, url: &Url) {
        let slot = match self.lane_for(url) {
            Some(lane) => {
                let mut next_free = lane.next_free.lock().await;
                let now = Instant::now();
                let slot = next_free.map_or(now, |at| at.max(now));
                *next_free = Some(slot + lane.config.min_interval);
                trace!(lane = lane.config.name, "request slot reserved");
                slot
            }
            None => {
                let key = Self::origin_key(url);
                let mut slots = self.fallback_slots.lock().await;
                let now = Instant::now();
                let slot = slots.get(&key).map_or(now, |at| (*at).max(now));
                slots.insert(key, slot + self.fallback_interval);
                slot
            }
        };
        sleep_until(slot).await;
    }

    #[cfg(test)]
    fn lane_name_for(&self, raw: &str) -> Option<&'static str> {
        let url = Url::parse(raw).ok()?;
        self.lane_for(&url).map(|lane| lane.config.name)
    }
}

static SHARED_PACER: OnceLock<Arc<RequestPacer>> = OnceLock::new();

pub(crate) fn shared_pacer() -> Arc<RequestPacer> {
    SHARED_PACER
        .get_or_init(|| Arc::new(RequestPacer::from_env()))
        .clone()
}

#[derive(Clone)]
pub(crate) struct PacingMiddleware {
    pacer: Arc<RequestPacer>,
}

impl PacingMiddleware {
    pub(crate) fn new() -> Self {
        Self {
            pacer: shared_pacer(),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for PacingMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.pacer.acquire(req.url()).await;
        next.run(req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_lane(name: &'static str, prefix: &str, millis: u64) -> LaneConfig {
        LaneConfig {
            name,
            prefix: Cow::Owned(prefix.to_string()),
            min_interval: Duration::from_millis(millis),
        }
    }

    #[tokio::test]
    async fn a_burst_drains_one_interval_apart() {
        let pacer = RequestPacer::with_lanes(
            vec![test_lane("papers", "https://api.test/graph", 60)],
            Duration::from_millis(5),
        );
        let url = Url::parse("https://api.test/graph/paper/search").unwrap();

        let started = Instant::now();
        for _ in 0..3 {
            pacer.acquire(&url).await;
        }

        // Three reservations occupy two full intervals end to end.
        assert!(started.elapsed() >= Duration::from_millis(110));
    }

    #[tokio::test]
    async fn lanes_on_one_host_do_not_block_each_other() {
        let pacer = RequestPacer::with_lanes(
            vec![
                test_lane("left", "https://host.test/a", 200),
                test_lane("right", "https://host.test/b", 200),
            ],
            Duration::from_millis(5),
        );

        let started = Instant::now();
        pacer
            .acquire(&Url::parse("https://host.test/a/x").unwrap())
            .await;
        pacer
            .acquire(&Url::parse("https://host.test/b/y").unwrap())
            .await;

        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn unmatched_urls_are_paced_per_origin() {
        let pacer = RequestPacer::with_lanes(Vec::new(), Duration::from_millis(70));

        let started = Instant::now();
        pacer
            .acquire(&Url::parse("https://elsewhere.test/one").unwrap())
            .await;
        pacer
            .acquire(&Url::parse("https://elsewhere.test/two").unwrap())
            .await;
        assert!(started.elapsed() >= Duration::from_millis(55));
    }

    #[tokio::test]
    async fn distinct_origins_get_distinct_fallback_slots() {
        let pacer = RequestPacer::with_lanes(Vec::new(), Duration::from_millis(200));

        let started = Instant::now();
        pacer
            .acquire(&Url::parse("https://one.test/a").unwrap())
            .await;
        pacer
            .acquire(&Url::parse("https://two.test/a").unwrap())
            .await;
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[test]
    fn most_specific_lane_wins_regardless_of_declaration_order() {
        // Declared broadest-first on purpose; construction sorts them.
        let pacer = RequestPacer::with_lanes(
            vec![
                test_lane("broad", "https://api.test", 10),
                test_lane("narrow", "https://api.test/v2", 10),
            ],
            Duration::from_millis(1),
        );

        assert_eq!(
            pacer.lane_name_for("https://api.test/v2/things"),
            Some("narrow")
        );
        assert_eq!(
            pacer.lane_name_for("https://api.test/v1/things"),
            Some("broad")
        );
        assert_eq!(pacer.lane_name_for("https://other.test/v2"), None);
    }
}
