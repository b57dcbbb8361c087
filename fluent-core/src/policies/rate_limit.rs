use crate::common::{RateLimiter, Result};
use crate::http::{HttpRequest, HttpResponse, Next, Policy};
use async_trait::async_trait;

/// Paces outbound requests with a client-side quota.
///
/// Clones share one quota, so a single policy instance can be placed in
/// several pipelines that talk to the same subscription.
#[derive(Debug, Clone)]
pub struct ClientRateLimitPolicy {
    limiter: RateLimiter,
}

impl ClientRateLimitPolicy {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Policy for ClientRateLimitPolicy {
    async fn send(&self, request: &mut HttpRequest, next: Next<'_>) -> Result<HttpResponse> {
        if self.limiter.check().is_err() {
            log::debug!("Client quota exhausted, waiting before {}", request.url());
            self.limiter.wait_until_ready().await;
        }
        next.run(request).await
    }
}
