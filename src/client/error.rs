//! Errors returned by [`InjectqClient`](super::InjectqClient).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection refused, reset mid-request, or an undecodable body.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Problem Details from the server, e.g. 429 when a session backlog is
    /// full or 409 when the inject was cancelled before it settled.
    #[error("api error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// `/livez` or `/readyz` answered with an unexpected status.
    #[error("server unhealthy (status {status})")]
    ServerUnhealthy { status: u16 },

    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}
