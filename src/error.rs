#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum OncoTierError {
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    #[error("API error from {api}: {message}")]
    Api { api: String, message: String },

    #[error("API JSON error from {api}: {source}")]
    ApiJson {
        api: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "Unsupported variant class for {gene} {variant}: '{token}' variants (fusions, amplifications, splice and exon-level events) are not classifiable here"
    )]
    UnsupportedVariantKind {
        gene: String,
        variant: String,
        token: String,
    },

    #[error("Unrecognized variant notation for {gene}: '{variant}'")]
    UnrecognizedNotation { gene: String, variant: String },

    #[error("LLM provider unavailable: {0}")]
    LlmUnavailable(String),

    #[error("All assessments failed")]
    AllAssessmentsFailed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OncoTierError {
    /// Admission errors stop the pipeline before any source client runs.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVariantKind { .. } | Self::UnrecognizedNotation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::OncoTierError;

    #[test]
    fn unsupported_kind_display_names_gene_and_token() {
        let err = OncoTierError::UnsupportedVariantKind {
            gene: "ALK".to_string(),
            variant: "EML4-ALK fusion".to_string(),
            token: "fusion".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("ALK"));
        assert!(msg.contains("fusion"));
        assert!(err.is_admission());
    }

    #[test]
    fn api_error_display_includes_api_name() {
        let err = OncoTierError::Api {
            api: "civic".to_string(),
            message: "HTTP 500".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("civic"));
        assert!(msg.contains("HTTP 500"));
        assert!(!err.is_admission());
    }

    #[test]
    fn unrecognized_notation_is_admission() {
        let err = OncoTierError::UnrecognizedNotation {
            gene: "KRAS".to_string(),
            variant: "???".to_string(),
        };
        assert!(err.is_admission());
    }
}
