use crate::auth::{MANAGEMENT_SCOPE, TokenCredential};
use crate::common::Result;
use crate::http::{HttpRequest, HttpResponse, Next, Policy};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use std::sync::Arc;

/// Sets `Authorization` from the primary credential on every attempt
#[derive(Debug, Clone)]
pub struct BearerTokenPolicy {
    credential: Arc<dyn TokenCredential>,
    scopes: Vec<String>,
}

impl BearerTokenPolicy {
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            credential,
            scopes: vec![MANAGEMENT_SCOPE.to_string()],
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }
}

#[async_trait]
impl Policy for BearerTokenPolicy {
    async fn send(&self, request: &mut HttpRequest, next: Next<'_>) -> Result<HttpResponse> {
        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        let token = self.credential.get_token(&scopes).await?;
        request.insert_header(AUTHORIZATION, &token.header_value())?;
        next.run(request).await
    }
}
