use crate::common::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// OAuth scope for Azure Resource Manager
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Access token issued by Azure AD.
#[derive(Clone)]
pub struct AccessToken {
    /// The actual token string
    pub token: String,
    /// The type of token (e.g., "Bearer")
    pub token_type: String,
    /// Lifetime from the moment the token was issued, when the issuer reported one
    pub expires_in: Option<Duration>,
}

impl AccessToken {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_type: "Bearer".to_string(),
            expires_in: None,
        }
    }

    /// `"<type> <token>"` as used in authorization headers
    pub fn header_value(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Source of access tokens for outbound requests.
///
/// Used for the primary `Authorization` header and, one credential per
/// tenant, for cross-tenant auxiliary authorization.
#[async_trait]
pub trait TokenCredential: Send + Sync + fmt::Debug {
    /// Acquire a token valid for `scopes`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagementError::AuthenticationFailed`](crate::common::ManagementError::AuthenticationFailed)
    /// if no token can be obtained.
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken>;

    /// Tenant the credential authenticates against, if known
    fn tenant_id(&self) -> Option<&str> {
        None
    }
}

/// Credential handing out a pre-acquired token
#[derive(Clone)]
pub struct StaticTokenCredential {
    token: AccessToken,
    tenant_id: Option<String>,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::bearer(token),
            tenant_id: None,
        }
    }

    pub fn for_tenant(token: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            token: AccessToken::bearer(token),
            tenant_id: Some(tenant_id.into()),
        }
    }
}

impl fmt::Debug for StaticTokenCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenCredential")
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scopes: &[&str]) -> Result<AccessToken> {
        Ok(self.token.clone())
    }

    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}
