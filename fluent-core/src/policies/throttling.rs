use crate::common::Result;
use crate::http::extract;
use crate::http::{HttpRequest, HttpResponse, Next, Policy};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::StatusCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shared back-off window for one throttle key
#[derive(Debug, Default)]
struct ThrottleGate {
    until: Mutex<Option<Instant>>,
    delays_started: AtomicUsize,
}

impl ThrottleGate {
    /// Wait until the key may be retried and return how long that took.
    ///
    /// A caller that finds a window still open joins it. Otherwise it opens a
    /// new one from `delay`, which is only evaluated in that case and is
    /// capped at [`MAX_RETRY_DELAY`](extract::MAX_RETRY_DELAY). The lock is
    /// held only while the window is read or set, never while sleeping.
    async fn wait_out<F>(&self, delay: F) -> Duration
    where
        F: FnOnce() -> Option<Duration>,
    {
        let started = Instant::now();
        let deadline = {
            let mut until = self.until.lock().await;
            match *until {
                Some(deadline) if deadline > started => Some(deadline),
                _ => {
                    let deadline = delay()
                        .map(|delay| delay.min(extract::MAX_RETRY_DELAY))
                        .and_then(|delay| started.checked_add(delay));
                    if deadline.is_some() {
                        self.delays_started.fetch_add(1, Ordering::SeqCst);
                    }
                    *until = deadline;
                    deadline
                }
            }
        };

        if let Some(deadline) = deadline {
            tokio::time::sleep_until(deadline).await;
        }
        started.elapsed()
    }
}

/// Per-key throttle state, shared by every policy built from the same registry.
///
/// Keys are subscription ids, or [`GLOBAL_THROTTLE_KEY`](extract::GLOBAL_THROTTLE_KEY)
/// for requests outside a subscription. Gates are created on first use and
/// kept for the lifetime of the registry.
#[derive(Debug, Clone, Default)]
pub struct ThrottleRegistry {
    gates: Arc<DashMap<String, Arc<ThrottleGate>>>,
}

impl ThrottleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, key: &str) -> Arc<ThrottleGate> {
        Arc::clone(self.gates.entry(key.to_string()).or_default().value())
    }

    /// Number of back-off windows opened for `key`
    pub fn delays_started(&self, key: &str) -> usize {
        self.gates
            .get(key)
            .map_or(0, |gate| gate.delays_started.load(Ordering::SeqCst))
    }

    /// Keys that have been throttled at least once
    pub fn keys(&self) -> Vec<String> {
        self.gates.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Wait out the back-off window for `key`, opening one from `delay` if
    /// none is in flight
    pub async fn wait_out<F>(&self, key: &str, delay: F) -> Duration
    where
        F: FnOnce() -> Option<Duration>,
    {
        self.gate(key).wait_out(delay).await
    }
}

/// Backs off and resends once on HTTP 429.
///
/// Concurrent throttled requests for the same subscription share a single
/// delay instead of each sleeping for its own.
#[derive(Debug, Clone, Default)]
pub struct ThrottlingPolicy {
    registry: ThrottleRegistry,
}

impl ThrottlingPolicy {
    pub fn new(registry: ThrottleRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ThrottleRegistry {
        &self.registry
    }
}

#[async_trait]
impl Policy for ThrottlingPolicy {
    async fn send(&self, request: &mut HttpRequest, next: Next<'_>) -> Result<HttpResponse> {
        let response = next.run(request).await?;
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }

        let key = extract::throttle_key(request.url());
        let waited = self
            .registry
            .wait_out(&key, || {
                let delay =
                    extract::retry_delay(response.headers(), &response.body_text(), Utc::now());
                match delay {
                    Some(delay) => log::warn!(
                        "Throttled on {key}, backing off {:?} ({:?})",
                        delay.delay,
                        delay.source
                    ),
                    None => log::warn!("Throttled on {key} without a usable retry delay"),
                }
                delay.map(|delay| delay.delay)
            })
            .await;

        log::debug!("Resending {} after {waited:?}", request.url());
        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpPipeline;
    use crate::http::testing::MockTransport;
    use reqwest::Method;

    fn request(subscription: &str) -> HttpRequest {
        HttpRequest::parse(
            Method::GET,
            &format!("https://management.azure.com/subscriptions/{subscription}/resourceGroups?api-version=2021-04-01"),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_once_after_header_delay() {
        let transport = Arc::new(MockTransport::sequence(vec![
            HttpResponse::new(StatusCode::TOO_MANY_REQUESTS).with_header("retry-after", "3"),
            HttpResponse::new(StatusCode::OK),
        ]));
        let policy = ThrottlingPolicy::default();
        let registry = policy.registry().clone();
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(policy)
            .build();

        let started = Instant::now();
        let response = pipeline.send(&mut request("sub-a")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(transport.call_count(), 2);
        assert_eq!(registry.delays_started("sub-a"), 1);
    }

    #[tokio::test]
    async fn test_second_429_is_returned() {
        let transport = Arc::new(MockTransport::sequence(vec![HttpResponse::new(
            StatusCode::TOO_MANY_REQUESTS,
        )]));
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(ThrottlingPolicy::default())
            .build();

        let response = pipeline.send(&mut request("sub-a")).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_window_is_joined_not_extended() {
        let registry = ThrottleRegistry::new();
        registry
            .wait_out("sub-a", || Some(Duration::from_secs(2)))
            .await;

        let gate = registry.gate("sub-a");
        *gate.until.lock().await = Some(Instant::now() + Duration::from_secs(1));

        let waited = registry
            .wait_out("sub-a", || panic!("delay must not be computed"))
            .await;

        assert!(waited >= Duration::from_secs(1));
        assert!(waited < Duration::from_secs(2));
        assert_eq!(registry.delays_started("sub-a"), 1);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let registry = ThrottleRegistry::new();
        registry.wait_out("sub-a", || None).await;
        registry.wait_out("global", || None).await;

        let mut keys = registry.keys();
        keys.sort();
        assert_eq!(keys, vec!["global", "sub-a"]);
        assert_eq!(registry.delays_started("sub-a"), 0);
        assert_eq!(registry.delays_started("sub-b"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_delay_is_capped() {
        let registry = ThrottleRegistry::new();

        let waited = registry.wait_out("sub-a", || Some(Duration::MAX)).await;

        assert!(waited >= extract::MAX_RETRY_DELAY);
        assert!(waited < extract::MAX_RETRY_DELAY + Duration::from_secs(1));
        assert_eq!(registry.delays_started("sub-a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_retry_after_header_is_survived() {
        let transport = Arc::new(MockTransport::sequence(vec![
            HttpResponse::new(StatusCode::TOO_MANY_REQUESTS)
                .with_header("retry-after", "9223372036854775807"),
            HttpResponse::new(StatusCode::OK),
        ]));
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(ThrottlingPolicy::default())
            .build();

        let started = Instant::now();
        let response = pipeline.send(&mut request("sub-a")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.call_count(), 2);
        assert!(started.elapsed() >= extract::MAX_RETRY_DELAY);
    }
}
