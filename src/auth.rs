use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ACCESS_TOKEN_ENV: &str = "META_ACCESS_TOKEN";
pub const AD_ACCOUNT_ID_ENV: &str = "META_AD_ACCOUNT_ID";

const ACCOUNT_PREFIX: &str = "act_";
const REDACT_KEEP: usize = 20;

/// Access token and ad account pair used for every Graph API call.
///
/// Deserialized records go through `Credentials::new`, so a saved
/// `act_123` comes back as `123`.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", from = "StoredCredentials")]
pub struct Credentials {
    pub access_token: String,
    pub ad_account_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredentials {
    access_token: String,
    ad_account_id: String,
}

impl From<StoredCredentials> for Credentials {
    fn from(stored: StoredCredentials) -> Self {
        Self::new(stored.access_token, stored.ad_account_id)
    }
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, ad_account_id: impl Into<String>) -> Self {
        let access_token = access_token.into();
        let ad_account_id = ad_account_id.into();
        Self {
            access_token: access_token.trim().to_string(),
            ad_account_id: normalize_ad_account_id(&ad_account_id),
        }
    }

    /// Both fields must be non-empty before a client may be built.
    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(Error::Validation { field: "access token" });
        }
        if normalize_ad_account_id(&self.ad_account_id).is_empty() {
            return Err(Error::Validation { field: "ad account id" });
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &redact_token(&self.access_token))
            .field("ad_account_id", &self.ad_account_id)
            .finish()
    }
}

/// Strips a leading `act_` so `act_123` and `123` name the same account.
pub fn normalize_ad_account_id(value: &str) -> String {
    let trimmed = value.trim();
    trimmed
        .strip_prefix(ACCOUNT_PREFIX)
        .unwrap_or(trimmed)
        .to_string()
}

/// Keeps the first few characters of a token for log output.
pub fn redact_token(token: &str) -> String {
    match token.char_indices().nth(REDACT_KEEP) {
        Some((idx, _)) => format!("{}...(redacted)", &token[..idx]),
        None if token.is_empty() => String::new(),
        None => "...(redacted)".to_string(),
    }
}

/// Default credentials taken from the process configuration.
///
/// Captured once at startup; later changes to the environment are not seen.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub access_token: Option<String>,
    pub ad_account_id: Option<String>,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            access_token: env::var(ACCESS_TOKEN_ENV).ok(),
            ad_account_id: env::var(AD_ACCOUNT_ID_ENV).ok(),
        }
    }

    /// Returns a pair only when both values are present and non-empty.
    pub fn credentials(&self) -> Option<Credentials> {
        let token = self.access_token.as_deref()?.trim();
        let account = self.ad_account_id.as_deref()?.trim();
        if token.is_empty() || account.is_empty() {
            return None;
        }
        let credentials = Credentials::new(token, account);
        credentials.validate().ok()?;
        Some(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_account_prefix() {
        assert_eq!(normalize_ad_account_id("act_123"), "123");
        assert_eq!(normalize_ad_account_id("123"), "123");
        assert_eq!(normalize_ad_account_id(" act_987 "), "987");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_ad_account_id("act_555");
        assert_eq!(normalize_ad_account_id(&once), once);
    }

    #[test]
    fn rejects_empty_fields() {
        let err = Credentials::new("", "123").validate().unwrap_err();
        assert!(matches!(err, Error::Validation { field: "access token" }));

        let err = Credentials::new("token", "act_").validate().unwrap_err();
        assert!(matches!(err, Error::Validation { field: "ad account id" }));

        assert!(Credentials::new("token", "act_1").validate().is_ok());
    }

    #[test]
    fn runtime_config_requires_both_values() {
        let config = RuntimeConfig {
            access_token: Some("token".into()),
            ad_account_id: None,
        };
        assert!(config.credentials().is_none());

        let config = RuntimeConfig {
            access_token: Some("  ".into()),
            ad_account_id: Some("act_1".into()),
        };
        assert!(config.credentials().is_none());

        let config = RuntimeConfig {
            access_token: Some("token".into()),
            ad_account_id: Some("act_1".into()),
        };
        assert_eq!(config.credentials(), Some(Credentials::new("token", "1")));
    }

    #[test]
    fn redacts_long_tokens() {
        let token = "EAAB".repeat(10);
        let redacted = redact_token(&token);
        assert!(redacted.starts_with(&token[..20]));
        assert!(redacted.ends_with("...(redacted)"));
        assert!(!redacted.contains(&token));

        assert_eq!(redact_token("short"), "...(redacted)");
        assert_eq!(redact_token(""), "");
    }

    #[test]
    fn debug_output_hides_token() {
        let creds = Credentials::new("A".repeat(40), "1");
        let debug = format!("{creds:?}");
        assert!(!debug.contains(&"A".repeat(40)));
    }

    #[test]
    fn serializes_camel_case() {
        let creds = Credentials::new("tok", "act_9");
        let value = serde_json::to_value(&creds).unwrap();
        assert_eq!(value, serde_json::json!({"accessToken": "tok", "adAccountId": "9"}));
    }

    #[test]
    fn deserialized_records_are_normalized() {
        let creds: Credentials =
            serde_json::from_str(r#"{"accessToken":" T ","adAccountId":"act_9"}"#).unwrap();
        assert_eq!(creds, Credentials::new("T", "9"));
        assert_eq!(creds.ad_account_id, "9");
    }
}
