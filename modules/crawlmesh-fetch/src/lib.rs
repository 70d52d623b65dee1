pub mod canonical;
pub mod data_url;
pub mod error;
pub mod fetch;

pub use canonical::canonicalize;
pub use error::FetchError;
pub use fetch::{fetch, ContentKind, Contents, FetchOutcome};
