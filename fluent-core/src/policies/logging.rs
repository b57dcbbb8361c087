use crate::common::Result;
use crate::http::{HttpRequest, HttpResponse, Next, Policy};
use async_trait::async_trait;
use reqwest::header::HeaderName;
use std::time::Instant;

/// Header correlating a request with service-side logs
pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Logs each attempt and stamps a client request id when none is set
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPolicy;

#[async_trait]
impl Policy for LoggingPolicy {
    async fn send(&self, request: &mut HttpRequest, next: Next<'_>) -> Result<HttpResponse> {
        if !request.has_header(CLIENT_REQUEST_ID_HEADER) {
            request.insert_header(
                HeaderName::from_static(CLIENT_REQUEST_ID_HEADER),
                &uuid::Uuid::new_v4().to_string(),
            )?;
        }
        let client_request_id = request
            .header(CLIENT_REQUEST_ID_HEADER)
            .unwrap_or_default()
            .to_string();

        log::debug!(
            "--> {} {} [{client_request_id}]",
            request.method(),
            request.url()
        );
        let started = Instant::now();

        match next.run(request).await {
            Ok(response) => {
                let elapsed = started.elapsed();
                if response.is_success() {
                    log::debug!(
                        "<-- {} {} {} in {elapsed:?}",
                        response.status().as_u16(),
                        request.method(),
                        request.url()
                    );
                } else {
                    log::warn!(
                        "<-- {} {} {} in {elapsed:?} (request id: {})",
                        response.status().as_u16(),
                        request.method(),
                        request.url(),
                        response.request_id().unwrap_or_default()
                    );
                }
                Ok(response)
            }
            Err(error) => {
                log::error!(
                    "<-- {} {} failed after {:?}: {error}",
                    request.method(),
                    request.url(),
                    started.elapsed()
                );
                Err(error)
            }
        }
    }
}
