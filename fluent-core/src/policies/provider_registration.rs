use crate::common::{ManagementError, Result};
use crate::http::extract;
use crate::http::{HttpRequest, HttpResponse, MISSING_SUBSCRIPTION_REGISTRATION, Next, Policy};
use crate::resources::{ProviderDirectory, RegistrationState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Interval between registration state reads
pub const DEFAULT_REGISTRATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Registers a missing resource provider and resends the request.
///
/// When a response carries `MissingSubscriptionRegistration`, the namespace
/// named in the message is registered for the subscription in the request
/// path, the registration state is polled until it leaves the pending states,
/// and the original request is sent exactly once more. Its outcome is returned
/// as-is.
///
/// If the subscription id or namespace cannot be extracted, the original
/// response is returned untouched.
#[derive(Debug, Clone)]
pub struct ProviderRegistrationPolicy {
    directory: Arc<dyn ProviderDirectory>,
    poll_interval: Duration,
}

impl ProviderRegistrationPolicy {
    pub fn new(directory: Arc<dyn ProviderDirectory>) -> Self {
        Self {
            directory,
            poll_interval: DEFAULT_REGISTRATION_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Register `namespace` and wait until its state settles
    async fn register_until_settled(
        &self,
        subscription_id: &str,
        namespace: &str,
    ) -> Result<RegistrationState> {
        let registration_error = |e: ManagementError| ManagementError::ProviderRegistration {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        };

        let mut provider = self
            .directory
            .register(subscription_id, namespace)
            .await
            .map_err(registration_error)?;

        while provider.registration_state.is_pending() {
            log::debug!(
                "Provider {namespace} is {}, polling again in {:?}",
                provider.registration_state,
                self.poll_interval
            );
            tokio::time::sleep(self.poll_interval).await;
            provider = self
                .directory
                .get_by_name(subscription_id, namespace)
                .await
                .map_err(registration_error)?;
        }

        Ok(provider.registration_state)
    }
}

#[async_trait]
impl Policy for ProviderRegistrationPolicy {
    async fn send(&self, request: &mut HttpRequest, next: Next<'_>) -> Result<HttpResponse> {
        let response = next.run(request).await?;
        if response.is_success() {
            return Ok(response);
        }

        let Some(cloud_error) = response.cloud_error() else {
            return Ok(response);
        };
        if !cloud_error.has_code(MISSING_SUBSCRIPTION_REGISTRATION) {
            return Ok(response);
        }

        let Some(subscription_id) = extract::subscription_id(request.url()) else {
            log::warn!(
                "Missing provider registration for {} but no subscription id in the path",
                request.url()
            );
            return Ok(response);
        };
        let Some(namespace) = extract::provider_namespace(&cloud_error.message) else {
            log::warn!(
                "Missing provider registration but no namespace in message: {}",
                cloud_error.message
            );
            return Ok(response);
        };

        log::info!("Registering resource provider {namespace} for subscription {subscription_id}");
        let state = self
            .register_until_settled(&subscription_id, &namespace)
            .await?;
        if !state.is_registered() {
            log::warn!("Provider {namespace} settled in state {state}, resending request anyway");
        }

        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpPipeline;
    use crate::http::testing::MockTransport;
    use crate::resources::Provider;
    use reqwest::{Method, StatusCode};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct ScriptedDirectory {
        states: Mutex<Vec<RegistrationState>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedDirectory {
        fn new(states: Vec<RegistrationState>) -> Self {
            Self {
                states: Mutex::new(states),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn next_provider(&self, namespace: &str) -> Provider {
            let mut states = self.states.lock().unwrap();
            let state = if states.len() > 1 {
                states.remove(0)
            } else {
                states[0].clone()
            };
            Provider {
                id: None,
                namespace: namespace.to_string(),
                registration_state: state,
            }
        }
    }

    #[async_trait]
    impl ProviderDirectory for ScriptedDirectory {
        async fn register(&self, subscription_id: &str, namespace: &str) -> Result<Provider> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("register {subscription_id} {namespace}"));
            Ok(self.next_provider(namespace))
        }

        async fn get_by_name(&self, subscription_id: &str, namespace: &str) -> Result<Provider> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("get {subscription_id} {namespace}"));
            Ok(self.next_provider(namespace))
        }
    }

    fn missing_registration() -> HttpResponse {
        HttpResponse::new(StatusCode::CONFLICT).with_body(
            r#"{"error":{"code":"MissingSubscriptionRegistration","message":"The subscription is not registered to use namespace 'Microsoft.Batch'. See https://aka.ms/rps-not-found."}}"#,
        )
    }

    fn request() -> HttpRequest {
        HttpRequest::parse(
            Method::PUT,
            "https://management.azure.com/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Batch/batchAccounts/a?api-version=2024-07-01",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_registers_polls_and_retries_once() {
        let directory = Arc::new(ScriptedDirectory::new(vec![
            RegistrationState::Registering,
            RegistrationState::Registering,
            RegistrationState::Registered,
        ]));
        let transport = Arc::new(MockTransport::sequence(vec![
            missing_registration(),
            HttpResponse::new(StatusCode::OK).with_body("{}"),
        ]));
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(
                ProviderRegistrationPolicy::new(directory.clone())
                    .with_poll_interval(Duration::from_millis(10)),
            )
            .build();

        let response = pipeline.send(&mut request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.call_count(), 2);
        assert_eq!(
            *directory.calls.lock().unwrap(),
            vec![
                "register sub-1 Microsoft.Batch",
                "get sub-1 Microsoft.Batch",
                "get sub-1 Microsoft.Batch",
            ]
        );
    }

    #[tokio::test]
    async fn test_retried_failure_is_returned_as_is() {
        let directory = Arc::new(ScriptedDirectory::new(vec![RegistrationState::Registered]));
        let transport = Arc::new(MockTransport::sequence(vec![missing_registration()]));
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(ProviderRegistrationPolicy::new(directory))
            .build();

        let response = pipeline.send(&mut request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_terminal_state_still_resends() {
        let directory = Arc::new(ScriptedDirectory::new(vec![RegistrationState::Other(
            "RegistrationFailed".to_string(),
        )]));
        let transport = Arc::new(MockTransport::sequence(vec![
            missing_registration(),
            HttpResponse::new(StatusCode::OK),
        ]));
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(ProviderRegistrationPolicy::new(directory.clone()))
            .build();

        let response = pipeline.send(&mut request()).await.unwrap();
        assert!(response.is_success());
        assert_eq!(directory.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let directory = Arc::new(ScriptedDirectory::new(vec![RegistrationState::Registered]));
        let transport = Arc::new(MockTransport::sequence(vec![
            HttpResponse::new(StatusCode::BAD_REQUEST).with_body("not json"),
        ]));
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(ProviderRegistrationPolicy::new(directory.clone()))
            .build();

        let response = pipeline.send(&mut request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(transport.call_count(), 1);
        assert!(directory.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_namespace_passes_original_response() {
        let directory = Arc::new(ScriptedDirectory::new(vec![RegistrationState::Registered]));
        let transport = Arc::new(MockTransport::sequence(vec![
            HttpResponse::new(StatusCode::CONFLICT).with_body(
                r#"{"error":{"code":"MissingSubscriptionRegistration","message":"not registered"}}"#,
            ),
        ]));
        let pipeline = HttpPipeline::builder(transport.clone())
            .policy(ProviderRegistrationPolicy::new(directory.clone()))
            .build();

        let response = pipeline.send(&mut request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(transport.call_count(), 1);
        assert!(directory.calls.lock().unwrap().is_empty());
    }
}
