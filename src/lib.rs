//! Meta Marketing API access: credential resolution and a Graph API client
//! for account, campaign, ad set, ad and insights reads.

pub mod auth;
pub mod client;
pub mod error;
pub mod insights;
pub mod resolver;
pub mod source;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use auth::{Credentials, RuntimeConfig, normalize_ad_account_id, redact_token};
pub use client::{DEFAULT_BASE_URL, GraphClient, GraphRequest};
pub use error::{Error, Result};
pub use insights::{DateRange, FilterRule, Level, ReportRequest};
pub use resolver::{ClientOptions, ConnectOutcome, ConnectionState, ConnectionStatus, CredentialResolver};
pub use source::{CredentialSource, Origin};
pub use store::{CredentialStore, FileCredentialStore, FileLocalStorage, HttpCredentialStore, LocalStorage};
