use crate::common::HttpError;
use crate::http::request::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::time::Duration;

/// The HTTP exchange the pipeline ends in.
///
/// Implementations send exactly one request and buffer the whole response.
/// Non-success statuses are returned as responses, not errors.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// [`HttpClient`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::ClientCreation {
                reason: e.to_string(),
            })?;

        Ok(Self { client, timeout })
    }

    /// Wrap an already configured client
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl HttpClient for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = request.url().to_string();

        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.to_vec());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout {
                    url: url.clone(),
                    seconds: self.timeout.as_secs(),
                }
            } else {
                HttpError::RequestFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| HttpError::RequestFailed {
                url: url.clone(),
                reason: format!("Failed to read response: {e}"),
            })?;

        Ok(HttpResponse::from_parts(status, headers, body.to_vec()))
    }
}
