//! Credential state for the Dropbox app: client identity plus the current
//! OAuth token pair and its expiry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// How far ahead of expiry a token is considered due for refresh.
pub const REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Token material returned by the token endpoint, either from a code
/// exchange or a refresh grant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenSet {
    pub access_token: String,
    /// Empty when the provider did not issue a new refresh token.
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default, deserialize_with = "deserialize_expiry")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expires_at {
            None => true,
            Some(expires_at) => now < expires_at,
        }
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        if self.refresh_token.is_empty() {
            return false;
        }
        match self.expires_at {
            None => false,
            Some(expires_at) => now + Duration::seconds(REFRESH_MARGIN_SECS) > expires_at,
        }
    }

    /// Applies freshly issued tokens. The stored refresh token survives when
    /// the provider sends an empty one.
    pub fn update_tokens(&mut self, tokens: TokenSet) {
        self.access_token = tokens.access_token;
        if !tokens.refresh_token.is_empty() {
            self.refresh_token = tokens.refresh_token;
        }
        self.expires_at = tokens.expires_at;
    }
}

// Older config files carry the zero timestamp (year 1) for "no expiry".
fn deserialize_expiry<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<DateTime<Utc>> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|t| t.timestamp() > 0))
}
