use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("broker connect failed: {0}")]
    Connect(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("rpc call to {method} timed out after {timeout_secs}s")]
    RpcTimeout { method: String, timeout_secs: u64 },
}
