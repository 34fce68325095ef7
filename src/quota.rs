//! Live quota client
//!
//! Passively reads the Claude Code OAuth credential and asks the usage
//! endpoint for authoritative window utilization. The credential is never
//! refreshed or rewritten here; an expired or missing token simply disables
//! the live path for this pass.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

const OAUTH_BASE_URL: &str = "https://api.anthropic.com";
const OAUTH_USAGE_PATH: &str = "/api/oauth/usage";
const OAUTH_BETA_HEADER: &str = "oauth-2025-04-20";

/// Safety buffer subtracted from the token expiry before use.
const TOKEN_EXPIRY_BUFFER_MS: i64 = 60_000;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("credentials file not found at {0:?}")]
    MissingCredentials(PathBuf),
    #[error("no OAuth section in credentials file")]
    MissingOAuth,
    #[error("OAuth token expired")]
    TokenExpired,
    #[error("usage endpoint returned status {0}")]
    BadStatus(reqwest::StatusCode),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Tier/subscription metadata read alongside the token. Used by the
/// reconciler even when the live request itself is skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanMetadata {
    pub tier: String,
    pub subscription_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveWindow {
    pub utilization: f64,
    pub resets_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveExtraSpend {
    pub enabled: bool,
    pub utilization: f64,
    pub used_amount: f64,
    pub limit_amount: f64,
    pub currency: String,
}

/// Standardized view of the usage endpoint response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveQuotaResponse {
    pub session: Option<LiveWindow>,
    pub weekly: Option<LiveWindow>,
    pub model_sub: Option<LiveWindow>,
    pub extra_spend: Option<LiveExtraSpend>,
}

struct CachedToken {
    access_token: String,
    expires_at_ms: Option<i64>,
}

pub struct QuotaClient {
    client: reqwest::Client,
    cached_token: Option<CachedToken>,
}

impl QuotaClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            cached_token: None,
        }
    }

    /// Fetch the live windows, or `None` when live data is unavailable for any
    /// reason (missing/expired credential, transport failure, bad status).
    pub async fn fetch(&mut self, credentials_path: &Path) -> Option<LiveQuotaResponse> {
        match self.try_fetch(credentials_path).await {
            Ok(response) => {
                tracing::debug!("live quota fetch successful");
                Some(response)
            }
            Err(err) => {
                tracing::debug!("live quota unavailable: {}", err);
                None
            }
        }
    }

    async fn try_fetch(&mut self, credentials_path: &Path) -> Result<LiveQuotaResponse, QuotaError> {
        let token = self.resolve_token(credentials_path).await?;

        let response = self
            .client
            .get(format!("{}{}", OAUTH_BASE_URL, OAUTH_USAGE_PATH))
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("anthropic-beta", OAUTH_BETA_HEADER)
            .header("User-Agent", "UsageBar/1.0")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // The external token owner may have refreshed the credential file
            // independently; drop the cache so the next pass re-reads it.
            self.cached_token = None;
            return Err(QuotaError::BadStatus(response.status()));
        }
        if !response.status().is_success() {
            return Err(QuotaError::BadStatus(response.status()));
        }

        let usage: OAuthUsageResponse = response.json().await?;
        Ok(convert_usage_response(usage))
    }

    /// Return a usable bearer token, reusing the in-memory cache until its
    /// expiry. Only ever called within a profile's serialized pass sequence.
    async fn resolve_token(&mut self, credentials_path: &Path) -> Result<String, QuotaError> {
        if let Some(cached) = &self.cached_token {
            if !token_expired(cached.expires_at_ms, Utc::now()) {
                return Ok(cached.access_token.clone());
            }
            self.cached_token = None;
        }

        let oauth = load_credentials(credentials_path).await?;
        if token_expired(oauth.expires_at, Utc::now()) {
            return Err(QuotaError::TokenExpired);
        }

        let token = oauth.access_token.clone();
        self.cached_token = Some(CachedToken {
            access_token: oauth.access_token,
            expires_at_ms: oauth.expires_at,
        });
        Ok(token)
    }
}

impl Default for QuotaClient {
    fn default() -> Self {
        Self::new()
    }
}

fn token_expired(expires_at_ms: Option<i64>, now: DateTime<Utc>) -> bool {
    match expires_at_ms {
        Some(expires_at) => now.timestamp_millis() + TOKEN_EXPIRY_BUFFER_MS >= expires_at,
        None => false,
    }
}

async fn load_credentials(path: &Path) -> Result<OAuthCredentials, QuotaError> {
    if !path.exists() {
        return Err(QuotaError::MissingCredentials(path.to_path_buf()));
    }
    let content = tokio::fs::read_to_string(path).await?;
    let file: CredentialsFile = serde_json::from_str(&content)?;
    file.claude_ai_oauth.ok_or(QuotaError::MissingOAuth)
}

/// Read tier/subscription metadata from the credential file. Soft-fails to
/// empty strings; the reconciler treats those as "unknown plan".
pub fn read_plan_metadata(path: &Path) -> PlanMetadata {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return PlanMetadata::default(),
    };
    let file: CredentialsFile = match serde_json::from_str(&content) {
        Ok(file) => file,
        Err(err) => {
            tracing::debug!("malformed credentials at {:?}: {}", path, err);
            return PlanMetadata::default();
        }
    };
    let Some(oauth) = file.claude_ai_oauth else {
        return PlanMetadata::default();
    };
    PlanMetadata {
        tier: oauth.rate_limit_tier.unwrap_or_default(),
        subscription_type: oauth.subscription_type.unwrap_or_default(),
    }
}

fn convert_usage_response(usage: OAuthUsageResponse) -> LiveQuotaResponse {
    let window = |w: OAuthUsageWindow| LiveWindow {
        utilization: w.utilization.unwrap_or(0.0),
        resets_at: w.resets_at,
    };

    LiveQuotaResponse {
        session: usage.five_hour.map(window),
        weekly: usage.seven_day.map(window),
        model_sub: usage.seven_day_opus.or(usage.seven_day_sonnet).map(window),
        extra_spend: usage.extra_usage.map(|extra| LiveExtraSpend {
            enabled: extra.is_enabled.unwrap_or(false),
            utilization: extra.utilization.unwrap_or(0.0),
            used_amount: extra.used_credits.unwrap_or(0.0),
            limit_amount: extra.monthly_limit.unwrap_or(0.0),
            currency: extra.currency.unwrap_or_else(|| "USD".to_string()),
        }),
    }
}

// ---- Credential / response wire types ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    claude_ai_oauth: Option<OAuthCredentials>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthCredentials {
    access_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    rate_limit_tier: Option<String>,
    #[serde(default)]
    subscription_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct OAuthUsageResponse {
    five_hour: Option<OAuthUsageWindow>,
    seven_day: Option<OAuthUsageWindow>,
    #[serde(default)]
    seven_day_opus: Option<OAuthUsageWindow>,
    #[serde(default)]
    seven_day_sonnet: Option<OAuthUsageWindow>,
    #[serde(default)]
    extra_usage: Option<OAuthExtraUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct OAuthUsageWindow {
    utilization: Option<f64>,
    resets_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct OAuthExtraUsage {
    is_enabled: Option<bool>,
    monthly_limit: Option<f64>,
    used_credits: Option<f64>,
    utilization: Option<f64>,
    currency: Option<String>,
}
