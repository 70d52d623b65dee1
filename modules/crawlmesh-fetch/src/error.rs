use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("http status {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed data: url: {0}")]
    DataUrl(String),

    #[error("response was not valid utf-8: {0}")]
    Encoding(String),
}

impl From<FetchError> for crawlmesh_common::CrawlMeshError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout => crawlmesh_common::CrawlMeshError::Timeout(e.to_string()),
            FetchError::HttpStatus { status, url } => {
                crawlmesh_common::CrawlMeshError::HttpStatus { status, url }
            }
            FetchError::DataUrl(msg) => crawlmesh_common::CrawlMeshError::DataUrl(msg),
            FetchError::Network(_) | FetchError::Encoding(_) => {
                crawlmesh_common::CrawlMeshError::Protocol(e.to_string())
            }
        }
    }
}
