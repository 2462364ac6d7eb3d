use reqwest::StatusCode;

/// Failure of a single remote call. Always maps a stage to `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
  #[error("invalid url: {0}")]
  Url(#[from] url::ParseError),

  #[error("request to {url} failed: {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("{url} returned {status}")]
  Status { url: String, status: StatusCode },

  #[error("malformed response from {url}: {reason}")]
  Parse { url: String, reason: String },
}
