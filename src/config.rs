//! Runtime settings: LLM model parameters, timeouts, retry policy, and the
//! tuning knobs of the evidence pipeline. Every field has a documented default and
//! an `ONCOTIER_*` environment override.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OncoTierError;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f64 = 0.1;
pub const DEFAULT_MAX_TOKENS_NARRATIVE: u32 = 1000;
pub const DEFAULT_MAX_TOKENS_SCORING: u32 = 500;
pub const DEFAULT_MAX_TOKENS_EXTRACTION: u32 = 1500;
pub const DEFAULT_TIMEOUT_SEC: u64 = 60;
pub const DEFAULT_RETRIES: u32 = 3;
pub const RETRY_BASE: Duration = Duration::from_secs(2);
pub const RETRY_CAP: Duration = Duration::from_secs(10);
pub const DEFAULT_CGI_CACHE_TTL_DAYS: u64 = 7;
pub const DEFAULT_LITERATURE_SCORE_THRESHOLD: f64 = 0.6;
pub const DEFAULT_EVIDENCE_ITEM_LIMIT: usize = 15;
pub const DEFAULT_MAX_CONCURRENT_VALIDATION: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens_narrative: u32,
    pub max_tokens_scoring: u32,
    pub max_tokens_extraction: u32,
    pub timeout_sec: u64,
    pub retries: u32,
    pub vicc_enabled: bool,
    pub cgi_cache_ttl_days: u64,
    pub literature_score_threshold: f64,
    pub evidence_item_limit: usize,
    pub max_concurrent_validation: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens_narrative: DEFAULT_MAX_TOKENS_NARRATIVE,
            max_tokens_scoring: DEFAULT_MAX_TOKENS_SCORING,
            max_tokens_extraction: DEFAULT_MAX_TOKENS_EXTRACTION,
            timeout_sec: DEFAULT_TIMEOUT_SEC,
            retries: DEFAULT_RETRIES,
            vicc_enabled: true,
            cgi_cache_ttl_days: DEFAULT_CGI_CACHE_TTL_DAYS,
            literature_score_threshold: DEFAULT_LITERATURE_SCORE_THRESHOLD,
            evidence_item_limit: DEFAULT_EVIDENCE_ITEM_LIMIT,
            max_concurrent_validation: DEFAULT_MAX_CONCURRENT_VALIDATION,
        }
    }
}

fn env_trimmed(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(var: &str) -> Result<Option<T>, OncoTierError> {
    match env_trimmed(var) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| OncoTierError::Config(format!("{var} has invalid value '{raw}'"))),
    }
}

impl Settings {
    /// Defaults overlaid with `ONCOTIER_*` environment variables, then
    /// validated. Configuration errors map to exit code 4 in the CLI.
    pub fn from_env() -> Result<Self, OncoTierError> {
        let mut settings = Self::default();

        if let Some(model) = env_trimmed("ONCOTIER_MODEL") {
            settings.model = model;
        }
        if let Some(v) = env_parsed::<f64>("ONCOTIER_TEMPERATURE")? {
            settings.temperature = v;
        }
        if let Some(v) = env_parsed::<u64>("ONCOTIER_TIMEOUT_SEC")? {
            settings.timeout_sec = v;
        }
        if let Some(v) = env_parsed::<u32>("ONCOTIER_RETRIES")? {
            settings.retries = v;
        }
        if let Some(v) = env_parsed::<bool>("ONCOTIER_VICC_ENABLED")? {
            settings.vicc_enabled = v;
        }
        if let Some(v) = env_parsed::<u64>("ONCOTIER_CGI_CACHE_TTL_DAYS")? {
            settings.cgi_cache_ttl_days = v;
        }
        if let Some(v) = env_parsed::<f64>("ONCOTIER_LITERATURE_SCORE_THRESHOLD")? {
            settings.literature_score_threshold = v;
        }
        if let Some(v) = env_parsed::<usize>("ONCOTIER_EVIDENCE_ITEM_LIMIT")? {
            settings.evidence_item_limit = v;
        }
        if let Some(v) = env_parsed::<usize>("ONCOTIER_MAX_CONCURRENT_VALIDATION")? {
            settings.max_concurrent_validation = v;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), OncoTierError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(OncoTierError::Config(format!(
                "temperature must be between 0 and 1 (got {})",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.literature_score_threshold) {
            return Err(OncoTierError::Config(format!(
                "literature_score_threshold must be between 0 and 1 (got {})",
                self.literature_score_threshold
            )));
        }
        if self.timeout_sec == 0 {
            return Err(OncoTierError::Config("timeout_sec must be > 0".into()));
        }
        if self.evidence_item_limit == 0 {
            return Err(OncoTierError::Config(
                "evidence_item_limit must be > 0".into(),
            ));
        }
        if self.max_concurrent_validation == 0 {
            return Err(OncoTierError::Config(
                "max_concurrent_validation must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn assessment_deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

/// LLM provider credentials. An absent key disables the provider; the
/// pipeline then runs without literature scoring and with templated
/// narratives.
pub fn llm_api_key() -> Option<String> {
    env_trimmed("OPENAI_API_KEY")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.temperature, 0.1);
        assert_eq!(s.max_tokens_narrative, 1000);
        assert_eq!(s.max_tokens_scoring, 500);
        assert_eq!(s.max_tokens_extraction, 1500);
        assert_eq!(s.timeout_sec, 60);
        assert_eq!(s.retries, 3);
        assert!(s.vicc_enabled);
        assert_eq!(s.cgi_cache_ttl_days, 7);
        assert_eq!(s.literature_score_threshold, 0.6);
        assert_eq!(s.evidence_item_limit, 15);
        assert_eq!(s.max_concurrent_validation, 3);
        s.validate().expect("defaults must validate");
    }

    #[test]
    fn validate_rejects_out_of_range_temperature() {
        let mut s = Settings::default();
        s.temperature = 1.5;
        let err = s.validate().expect_err("temperature out of range");
        assert!(matches!(err, OncoTierError::Config(_)));
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut s = Settings::default();
        s.max_concurrent_validation = 0;
        assert!(s.validate().is_err());
    }
}
