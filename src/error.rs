use thiserror::Error;

/// Errors raised by the Graph client, the credential stores and the resolver.
///
/// A missing saved record is not an error: stores report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection refused, DNS failure, body decode failure, etc.
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response from the Graph API.
    #[error("graph api http {status}: {body}")]
    Api { status: u16, body: String },

    /// Saving or deleting the credential record failed.
    #[error("credential store failure: {0}")]
    Persistence(String),

    /// A required credential or request field is empty.
    #[error("{field} missing")]
    Validation { field: &'static str },

    /// Data was requested while no credentials are adopted.
    #[error("not connected: run `meta-ads connect` or set META_ACCESS_TOKEN and META_AD_ACCOUNT_ID")]
    NotConnected,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
