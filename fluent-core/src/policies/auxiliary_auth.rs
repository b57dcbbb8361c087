use crate::auth::{MANAGEMENT_SCOPE, TokenCredential};
use crate::common::Result;
use crate::http::{HttpRequest, HttpResponse, LINKED_AUTHORIZATION_FAILED, Next, Policy};
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::header::HeaderName;
use std::sync::Arc;

/// Header carrying tokens for tenants other than the primary one
pub const AUXILIARY_AUTHORIZATION_HEADER: &str = "x-ms-authorization-auxiliary";

/// Resends a request with auxiliary tenant tokens after a
/// `LinkedAuthorizationFailed` answer.
///
/// The response body is inspected whatever its status. A request that already
/// carries the auxiliary header is never resent, so the retry happens at most
/// once.
#[derive(Debug, Clone)]
pub struct AuxiliaryAuthenticationPolicy {
    credentials: Vec<Arc<dyn TokenCredential>>,
    scopes: Vec<String>,
}

impl AuxiliaryAuthenticationPolicy {
    pub fn new(credentials: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            credentials,
            scopes: vec![MANAGEMENT_SCOPE.to_string()],
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// `Bearer <t1>;Bearer <t2>;...`, one entry per credential
    async fn auxiliary_header(&self) -> Result<String> {
        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        let tokens = try_join_all(
            self.credentials
                .iter()
                .map(|credential| credential.get_token(&scopes)),
        )
        .await?;

        Ok(tokens
            .iter()
            .map(|token| format!("Bearer {}", token.token))
            .collect::<Vec<_>>()
            .join(";"))
    }
}

#[async_trait]
impl Policy for AuxiliaryAuthenticationPolicy {
    async fn send(&self, request: &mut HttpRequest, next: Next<'_>) -> Result<HttpResponse> {
        let response = next.run(request).await?;
        if self.credentials.is_empty() || request.has_header(AUXILIARY_AUTHORIZATION_HEADER) {
            return Ok(response);
        }

        let linked_failure = response
            .cloud_error()
            .is_some_and(|error| error.has_code(LINKED_AUTHORIZATION_FAILED));
        if !linked_failure {
            return Ok(response);
        }

        log::info!(
            "Linked authorization failed for {}, retrying with {} auxiliary token(s)",
            request.url(),
            self.credentials.len()
        );
        let header = self.auxiliary_header().await?;
        request.insert_header(
            HeaderName::from_static(AUXILIARY_AUTHORIZATION_HEADER),
            &header,
        )?;
        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, StaticTokenCredential};
    use crate::common::ManagementError;
    use crate::http::HttpPipeline;
    use crate::http::testing::MockTransport;
    use reqwest::{Method, StatusCode};

    #[derive(Debug)]
    struct BrokenCredential;

    #[async_trait]
    impl TokenCredential for BrokenCredential {
        async fn get_token(&self, _scopes: &[&str]) -> Result<AccessToken> {
            Err(ManagementError::AuthenticationFailed(
                "tenant unreachable".to_string(),
            ))
        }
    }

    fn linked_failure(status: StatusCode) -> HttpResponse {
        HttpResponse::new(status).with_body(
            r#"{"error":{"code":"LinkedAuthorizationFailed","message":"The client has permission to perform action on scope, however the linked subscription is in another tenant."}}"#,
        )
    }

    fn request() -> HttpRequest {
        HttpRequest::parse(
            Method::PUT,
            "https://management.azure.com/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/peer?api-version=2024-01-01",
        )
        .unwrap()
    }

    fn policy() -> AuxiliaryAuthenticationPolicy {
        AuxiliaryAuthenticationPolicy::new(vec![
            Arc::new(StaticTokenCredential::for_tenant("t1", "tenant-1")),
            Arc::new(StaticTokenCredential::for_tenant("t2", "tenant-2")),
        ])
    }

    #[tokio::test]
    async fn test_attaches_tokens_and_resends_once() {
        let transport = Arc::new(MockTransport::sequence(vec![
            linked_failure(StatusCode::OK),
            HttpResponse::new(StatusCode::OK).with_body("{}"),
        ]));
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(policy())
            .build();

        let response = pipeline.send(&mut request()).await.unwrap();

        assert!(response.is_success());
        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].header(AUXILIARY_AUTHORIZATION_HEADER), None);
        assert_eq!(
            sent[1].header(AUXILIARY_AUTHORIZATION_HEADER),
            Some("Bearer t1;Bearer t2")
        );
    }

    #[tokio::test]
    async fn test_request_with_header_is_not_resent() {
        let transport = Arc::new(MockTransport::sequence(vec![linked_failure(
            StatusCode::FORBIDDEN,
        )]));
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(policy())
            .build();

        let mut request = request()
            .with_header(
                HeaderName::from_static(AUXILIARY_AUTHORIZATION_HEADER),
                "Bearer existing",
            )
            .unwrap();
        let response = pipeline.send(&mut request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_token_failure_propagates() {
        let transport = Arc::new(MockTransport::sequence(vec![linked_failure(
            StatusCode::FORBIDDEN,
        )]));
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(AuxiliaryAuthenticationPolicy::new(vec![Arc::new(
                BrokenCredential,
            )]))
            .build();

        let result = pipeline.send(&mut request()).await;

        assert!(matches!(
            result,
            Err(ManagementError::AuthenticationFailed(_))
        ));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unrelated_and_malformed_bodies_pass_through() {
        let transport = Arc::new(MockTransport::sequence(vec![
            HttpResponse::new(StatusCode::FORBIDDEN)
                .with_body(r#"{"error":{"code":"AuthorizationFailed","message":"no"}}"#),
            HttpResponse::new(StatusCode::OK).with_body("<html>"),
        ]));
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(policy())
            .build();

        let first = pipeline.send(&mut request()).await.unwrap();
        let second = pipeline.send(&mut request()).await.unwrap();

        assert_eq!(first.status(), StatusCode::FORBIDDEN);
        assert_eq!(second.body_text(), "<html>");
        assert_eq!(transport.call_count(), 2);
    }
}
