use thiserror::Error;

/// Error taxonomy shared across the pipeline. Each variant corresponds to a
/// recovery strategy named in the error-handling design: transient errors are
/// retried or requeued, protocol errors are recorded on the resource and
/// acked, policy violations are rejected without tearing down the
/// connection, and invariant violations are logged and left to the next
/// scheduler sweep.
#[derive(Error, Debug)]
pub enum CrawlMeshError {
    #[error("store error: {0}")]
    Store(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("http status {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("fetch timed out: {0}")]
    Timeout(String),

    #[error("malformed data: url: {0}")]
    DataUrl(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("policy violation: {0}")]
    Policy(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl CrawlMeshError {
    /// Transient I/O errors should be retried or fed back to the broker as a
    /// nack-requeue; everything else is either recorded on the resource
    /// (protocol) or handled without tearing down the caller (policy,
    /// invariant).
    pub fn is_transient(&self) -> bool {
        matches!(self, CrawlMeshError::Store(_) | CrawlMeshError::Broker(_))
    }
}
