use super::credential::{AccessToken, TokenCredential};
use super::token_cache::{CachedToken, TokenCache};
use crate::common::{ManagementError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Service principal credential using the AAD client credentials flow.
///
/// Tokens are cached per scope set and renewed once they enter the refresh
/// buffer.
#[derive(Clone)]
pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    authority_host: String,
    http_client: reqwest::Client,
    cache: TokenCache,
}

impl fmt::Debug for ClientSecretCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("authority_host", &self.authority_host)
            .finish_non_exhaustive()
    }
}

impl ClientSecretCredential {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            http_client: reqwest::Client::new(),
            cache: TokenCache::new(),
        }
    }

    pub fn with_authority_host(mut self, authority_host: impl Into<String>) -> Self {
        self.authority_host = authority_host.into().trim_end_matches('/').to_string();
        self
    }

    /// Same service principal, authenticating against another tenant
    pub fn for_tenant(&self, tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            cache: TokenCache::new(),
            ..self.clone()
        }
    }

    async fn request_token(&self, scope: &str) -> Result<AccessToken> {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host, self.tenant_id
        );

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];

        let response = self
            .http_client
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                ManagementError::AuthenticationFailed(format!("Failed to request token: {e}"))
            })?;

        if !response.status().is_success() {
            let error_info = response
                .json::<ErrorResponse>()
                .await
                .unwrap_or(ErrorResponse {
                    error: "unknown_error".to_string(),
                    error_description: Some("Failed to parse error response".to_string()),
                });

            let user_friendly_message = match error_info.error.as_str() {
                "invalid_client" => "Invalid client credentials. Check the client id and secret.",
                "unauthorized_client" => {
                    "This application is not authorized for the client credentials flow."
                }
                "invalid_scope" => "The requested scope is not valid for this application.",
                _ => error_info
                    .error_description
                    .as_deref()
                    .unwrap_or(&error_info.error),
            };

            return Err(ManagementError::AuthenticationFailed(format!(
                "Tenant {}: {user_friendly_message}",
                self.tenant_id
            )));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            ManagementError::AuthenticationFailed(format!("Failed to parse token response: {e}"))
        })?;

        Ok(AccessToken {
            token: token_response.access_token,
            token_type: token_response.token_type,
            expires_in: Some(Duration::from_secs(token_response.expires_in)),
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken> {
        let scope = scopes.join(" ");

        if let Some(cached) = self.cache.get_fresh(&scope).await {
            return Ok(AccessToken {
                token: cached.token,
                token_type: cached.token_type,
                expires_in: None,
            });
        }

        log::debug!("Requesting token for tenant {}", self.tenant_id);
        let token = self.request_token(&scope).await?;

        if let Some(expires_in) = token.expires_in {
            self.cache
                .set(
                    scope,
                    CachedToken::new(token.token.clone(), expires_in, token.token_type.clone()),
                )
                .await;
        }

        Ok(token)
    }

    fn tenant_id(&self) -> Option<&str> {
        Some(&self.tenant_id)
    }
}
