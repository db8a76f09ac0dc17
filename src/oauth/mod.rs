// src/oauth/mod.rs
// OAuth Broker (C3). Stateless other than the DB: per-provider
// start → callback → token-exchange, refresh-on-expiry with a skew
// margin, multi-account support via `(provider, userId, accountEmail)`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::jwt::decode_id_token_claims;
use crate::config::server::{OAuthConfig, OAuthProviderConfig};
use crate::store::models::OAuthToken;
use crate::store::Store;

/// Refresh a token if it expires within this many seconds.
const REFRESH_SKEW_SECS: i64 = 30 * 60;

struct ProviderEndpoints {
    auth_url: &'static str,
    token_url: &'static str,
    scope: &'static str,
}

fn endpoints(provider: &str) -> Option<ProviderEndpoints> {
    match provider {
        "google" => Some(ProviderEndpoints {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
            token_url: "https://oauth2.googleapis.com/token",
            scope: "openid email https://www.googleapis.com/auth/gmail.readonly https://www.googleapis.com/auth/drive.readonly",
        }),
        "github" => Some(ProviderEndpoints {
            auth_url: "https://github.com/login/oauth/authorize",
            token_url: "https://github.com/login/oauth/access_token",
            scope: "read:user user:email",
        }),
        "slack" => Some(ProviderEndpoints {
            auth_url: "https://slack.com/oauth/v2/authorize",
            token_url: "https://slack.com/api/oauth.v2.access",
            scope: "identity.basic,identity.email",
        }),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    id_token: Option<String>,
}

pub struct OAuthBroker {
    store: Store,
    config: OAuthConfig,
    http: reqwest::Client,
    /// `state` → `userId`, bound when `start` is called. In-process only:
    /// surviving a restart mid-flow just means the user redoes the OAuth
    /// dance, which is the provider's own UX anyway.
    pending_states: parking_lot::Mutex<HashMap<String, String>>,
}

impl OAuthBroker {
    pub fn new(store: Store, config: OAuthConfig) -> Self {
        Self {
            store,
            config,
            http: reqwest::Client::new(),
            pending_states: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn provider_config(&self, provider: &str) -> Result<&OAuthProviderConfig> {
        self.config
            .provider(provider)
            .ok_or_else(|| anyhow!("unknown oauth provider: {provider}"))
    }

    pub fn start(&self, user_id: &str, provider: &str) -> Result<String> {
        let provider_cfg = self.provider_config(provider)?;
        if !provider_cfg.is_configured() {
            return Err(anyhow!("missing_oauth_credentials:{provider}"));
        }
        let endpoints = endpoints(provider).ok_or_else(|| anyhow!("unknown oauth provider: {provider}"))?;

        let state = Uuid::new_v4().to_string();
        self.pending_states
            .lock()
            .insert(state.clone(), user_id.to_string());

        let redirect_uri = format!("{}/api/auth/{}/callback", self.config.redirect_base_url, provider);
        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent",
            endpoints.auth_url,
            urlencoding::encode(provider_cfg.client_id.as_deref().unwrap_or_default()),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(endpoints.scope),
            state,
        );

        Ok(auth_url)
    }

    pub async fn callback(&self, provider: &str, code: &str, state: &str) -> Result<String> {
        let user_id = self
            .pending_states
            .lock()
            .remove(state)
            .ok_or_else(|| anyhow!("unknown or expired oauth state"))?;

        let provider_cfg = self.provider_config(provider)?;
        let endpoints = endpoints(provider).ok_or_else(|| anyhow!("unknown oauth provider: {provider}"))?;
        let redirect_uri = format!("{}/api/auth/{}/callback", self.config.redirect_base_url, provider);

        let params = [
            ("client_id", provider_cfg.client_id.clone().unwrap_or_default()),
            ("client_secret", provider_cfg.client_secret.clone().unwrap_or_default()),
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code".to_string()),
        ];

        let response = self
            .http
            .post(endpoints.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .context("oauth token exchange request failed")?;

        let body: TokenExchangeResponse = response
            .error_for_status()
            .context("oauth token exchange returned an error status")?
            .json()
            .await
            .context("oauth token exchange returned an unparseable body")?;

        let account_email = self
            .resolve_account_email(provider, &body)
            .await
            .unwrap_or_default();

        let expiry_date = body
            .expires_in
            .map(|secs| crate::utils::timestamp::get_timestamp() + secs);

        self.store
            .upsert_oauth_token(
                provider,
                &user_id,
                &account_email,
                &body.access_token,
                body.refresh_token.as_deref(),
                expiry_date,
            )
            .await?;

        info!(provider, %account_email, "oauth account connected");
        Ok(account_email)
    }

    async fn resolve_account_email(
        &self,
        provider: &str,
        body: &TokenExchangeResponse,
    ) -> Result<String> {
        if let Some(id_token) = &body.id_token {
            if let Ok(claims) = decode_id_token_claims(id_token) {
                if let Some(email) = claims.email {
                    return Ok(email);
                }
            }
        }

        // Providers that don't hand back an id_token (GitHub, Slack) need
        // an identity-endpoint round trip instead.
        let identity_url = match provider {
            "github" => "https://api.github.com/user/emails",
            "slack" => "https://slack.com/api/users.identity",
            _ => return Err(anyhow!("no identity endpoint for {provider}")),
        };

        let response = self
            .http
            .get(identity_url)
            .header("Authorization", format!("Bearer {}", body.access_token))
            .header("User-Agent", "relay-backend")
            .send()
            .await?;
        let value: Value = response.json().await?;

        match provider {
            "github" => value
                .as_array()
                .and_then(|emails| emails.iter().find(|e| e["primary"] == true))
                .and_then(|e| e["email"].as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| anyhow!("no primary email on github account")),
            "slack" => value["user"]["email"]
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| anyhow!("no email on slack identity")),
            _ => Err(anyhow!("no identity endpoint for {provider}")),
        }
    }

    /// Returns the token for `accountEmail`, or the most recently used
    /// account for this provider when `accountEmail` is absent.
    /// Refreshes in place if the token is within the skew window of
    /// expiring.
    pub async fn get_token(
        &self,
        user_id: &str,
        provider: &str,
        account_email: Option<&str>,
    ) -> Result<OAuthToken> {
        let token = match account_email {
            Some(email) => self.store.get_oauth_token(provider, user_id, email).await?,
            None => self.store.get_any_oauth_token(provider, user_id).await?,
        }
        .ok_or_else(|| anyhow!("oauth_required:{provider}"))?;

        let needs_refresh = token
            .expiry_date
            .map(|exp| exp - crate::utils::timestamp::get_timestamp() < REFRESH_SKEW_SECS)
            .unwrap_or(false);

        if !needs_refresh {
            return Ok(token);
        }

        self.refresh(provider, &token).await
    }

    async fn refresh(&self, provider: &str, token: &OAuthToken) -> Result<OAuthToken> {
        let Some(refresh_token) = &token.refresh_token else {
            warn!(provider, user_id = %token.user_id, "no refresh token on record");
            return Err(anyhow!("oauth_required:{provider}"));
        };

        let provider_cfg = self.provider_config(provider)?;
        let endpoints = endpoints(provider).ok_or_else(|| anyhow!("unknown oauth provider: {provider}"))?;

        let params = [
            ("client_id", provider_cfg.client_id.clone().unwrap_or_default()),
            ("client_secret", provider_cfg.client_secret.clone().unwrap_or_default()),
            ("refresh_token", refresh_token.clone()),
            ("grant_type", "refresh_token".to_string()),
        ];

        let result = self
            .http
            .post(endpoints.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(anyhow::Error::from);

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(provider, error = %e, "oauth refresh failed");
                return Err(anyhow!("oauth_required:{provider}"));
            }
        };

        let body: TokenExchangeResponse = response
            .json()
            .await
            .map_err(|_| anyhow!("oauth_required:{provider}"))?;

        let expiry_date = body
            .expires_in
            .map(|secs| crate::utils::timestamp::get_timestamp() + secs);

        self.store
            .upsert_oauth_token(
                provider,
                &token.user_id,
                &token.account_email,
                &body.access_token,
                body.refresh_token.as_deref().or(token.refresh_token.as_deref()),
                expiry_date,
            )
            .await?;

        self.store
            .get_oauth_token(provider, &token.user_id, &token.account_email)
            .await?
            .ok_or_else(|| anyhow!("token vanished after refresh"))
    }

    pub async fn list_connections(&self, user_id: &str) -> Result<HashMap<String, Vec<String>>> {
        let tokens = self.store.list_oauth_connections(user_id).await?;
        let mut by_provider: HashMap<String, Vec<String>> = HashMap::new();
        for token in tokens {
            by_provider
                .entry(token.provider)
                .or_default()
                .push(token.account_email);
        }
        Ok(by_provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_provider_rejects_start() {
        let store = Store::in_memory().await.unwrap();
        let broker = OAuthBroker::new(store, OAuthConfig::from_env());
        let err = broker.start("user-1", "google").unwrap_err();
        assert!(err.to_string().contains("missing_oauth_credentials"));
    }

    #[tokio::test]
    async fn missing_token_surfaces_oauth_required() {
        let store = Store::in_memory().await.unwrap();
        let broker = OAuthBroker::new(store, OAuthConfig::from_env());
        let err = broker
            .get_token("user-1", "google", Some("u@x.com"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("oauth_required"));
    }
}
