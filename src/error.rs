use thiserror::Error;

/// Page-fetch failures. The client does not retry; a failed item is simply
/// re-polled on the next scheduled run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Failures while pulling structured data out of a fetched page.
/// `MissingDataBlock` usually means the site layout changed.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("embedded data block not found in page")]
    MissingDataBlock,

    #[error("malformed embedded JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("expected field missing: {0}")]
    MissingField(&'static str),
}
