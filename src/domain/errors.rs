use thiserror::Error;

/// §7 error taxonomy, threaded through the pipeline as the typed error
/// every public operation ultimately reports.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parsing error for {url}: {cause}")]
    Parsing { url: String, cause: String },

    #[error("cache io error: {0}")]
    Io(String),

    #[error("rate limited")]
    RateLimit,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<crate::infrastructure::cache::CacheError> for PipelineError {
    fn from(err: crate::infrastructure::cache::CacheError) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<crate::infrastructure::http_client::FetchError> for PipelineError {
    fn from(err: crate::infrastructure::http_client::FetchError) -> Self {
        match err {
            crate::infrastructure::http_client::FetchError::Ssrf(e) => {
                PipelineError::Validation(e.to_string())
            }
            other => PipelineError::Network(other.to_string()),
        }
    }
}
