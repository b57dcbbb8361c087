//! Client configuration and assembly of the standard management pipeline.

use crate::auth::{ClientSecretCredential, DEFAULT_AUTHORITY_HOST, TokenCredential};
use crate::common::{ManagementError, RateLimiterConfig, Result};
use crate::http::{HttpClient, HttpPipeline, ReqwestTransport};
use crate::policies::{
    AuxiliaryAuthenticationPolicy, BearerTokenPolicy, ClientRateLimitPolicy, LoggingPolicy,
    ProviderRegistrationPolicy, ThrottleRegistry, ThrottlingPolicy,
};
use crate::resources::{ArmProviderDirectory, ProviderDirectory};
use crate::utils::{EnvUtils, EnvVarError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

/// Settings shared by every client built from one configuration.
///
/// Deserializes from any serde format with every field optional:
///
/// ```no_run
/// use fluent_core::config::ClientConfig;
///
/// let config: ClientConfig = serde_json::from_str(r#"{
///     "request_timeout_secs": 30,
///     "rate_limit": { "requests_per_second": 20 },
///     "auxiliary_tenant_ids": ["72f988bf-0000-0000-0000-000000000000"]
/// }"#)?;
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Resource Manager endpoint
    pub endpoint: String,
    /// Azure AD authority used by client secret credentials
    pub authority_host: String,
    pub request_timeout_secs: u64,
    /// Delay between provider registration state reads
    pub registration_poll_interval_secs: u64,
    /// Client-side pacing; disabled when absent
    pub rate_limit: Option<RateLimiterConfig>,
    /// Tenants for which auxiliary tokens are attached on linked authorization failures
    pub auxiliary_tenant_ids: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            request_timeout_secs: 60,
            registration_poll_interval_secs: 5,
            rate_limit: None,
            auxiliary_tenant_ids: Vec::new(),
        }
    }
}

fn env_error(error: EnvVarError) -> ManagementError {
    ManagementError::Configuration(error.to_string())
}

impl ClientConfig {
    /// Defaults overridden by `AZURE_*` environment variables.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `AZURE_RESOURCE_MANAGER_ENDPOINT` | `endpoint` |
    /// | `AZURE_AUTHORITY_HOST` | `authority_host` |
    /// | `AZURE_REQUEST_TIMEOUT_SECS` | `request_timeout_secs` |
    /// | `AZURE_REGISTRATION_POLL_INTERVAL_SECS` | `registration_poll_interval_secs` |
    /// | `AZURE_REQUESTS_PER_SECOND` | `rate_limit` |
    /// | `AZURE_AUXILIARY_TENANT_IDS` | `auxiliary_tenant_ids` (comma separated) |
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(endpoint) = EnvUtils::get_optional_var("AZURE_RESOURCE_MANAGER_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(authority_host) = EnvUtils::get_optional_var("AZURE_AUTHORITY_HOST") {
            config.authority_host = authority_host;
        }
        if let Some(timeout) =
            EnvUtils::get_parsed_var("AZURE_REQUEST_TIMEOUT_SECS").map_err(env_error)?
        {
            config.request_timeout_secs = timeout;
        }
        if let Some(interval) =
            EnvUtils::get_parsed_var("AZURE_REGISTRATION_POLL_INTERVAL_SECS").map_err(env_error)?
        {
            config.registration_poll_interval_secs = interval;
        }
        if let Some(requests_per_second) =
            EnvUtils::get_parsed_var("AZURE_REQUESTS_PER_SECOND").map_err(env_error)?
        {
            config.rate_limit = Some(RateLimiterConfig {
                requests_per_second,
                burst_size: None,
            });
        }
        config.auxiliary_tenant_ids = EnvUtils::get_list_var("AZURE_AUXILIARY_TENANT_IDS");

        config.validate()?;
        Ok(config)
    }

    /// Reject values no client could work with
    pub fn validate(&self) -> Result<()> {
        if !self.endpoint.starts_with("https://") && !self.endpoint.starts_with("http://") {
            return Err(ManagementError::Configuration(format!(
                "endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ManagementError::Configuration(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.build()?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn registration_poll_interval(&self) -> Duration {
        Duration::from_secs(self.registration_poll_interval_secs)
    }

    /// Service principal credential from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`
    /// and `AZURE_CLIENT_SECRET`
    pub fn client_secret_credential_from_env(&self) -> Result<ClientSecretCredential> {
        let tenant_id = EnvUtils::get_validated_var("AZURE_TENANT_ID").map_err(env_error)?;
        let client_id = EnvUtils::get_validated_var("AZURE_CLIENT_ID").map_err(env_error)?;
        let client_secret =
            EnvUtils::get_validated_var("AZURE_CLIENT_SECRET").map_err(env_error)?;

        Ok(ClientSecretCredential::new(tenant_id, client_id, client_secret)
            .with_authority_host(&self.authority_host))
    }
}

/// Assembles the standard policy chain around a transport.
///
/// From outermost to innermost: provider registration, throttling, auxiliary
/// authentication, client rate limit, bearer token, logging. Each retry issued
/// by an outer policy therefore passes through every inner one again.
pub struct ManagementPipelineBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn HttpClient>>,
    credential: Option<Arc<dyn TokenCredential>>,
    auxiliary_credentials: Vec<Arc<dyn TokenCredential>>,
    provider_directory: Option<Arc<dyn ProviderDirectory>>,
    throttle_registry: ThrottleRegistry,
}

impl ManagementPipelineBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            credential: None,
            auxiliary_credentials: Vec::new(),
            provider_directory: None,
            throttle_registry: ThrottleRegistry::new(),
        }
    }

    /// Send through `transport` instead of a reqwest client
    pub fn transport(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Use `credential` as primary and derive one auxiliary credential per
    /// configured auxiliary tenant
    pub fn client_secret(mut self, credential: ClientSecretCredential) -> Self {
        for tenant_id in &self.config.auxiliary_tenant_ids {
            self.auxiliary_credentials
                .push(Arc::new(credential.for_tenant(tenant_id.clone())));
        }
        self.credential = Some(Arc::new(credential));
        self
    }

    pub fn auxiliary_credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.auxiliary_credentials.push(credential);
        self
    }

    /// Directory used for provider registration. Defaults to ARM over an
    /// inner pipeline without the registration policy.
    pub fn provider_directory(mut self, directory: Arc<dyn ProviderDirectory>) -> Self {
        self.provider_directory = Some(directory);
        self
    }

    /// Share throttle state with other pipelines
    pub fn throttle_registry(mut self, registry: ThrottleRegistry) -> Self {
        self.throttle_registry = registry;
        self
    }

    pub fn build(self) -> Result<HttpPipeline> {
        self.config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.request_timeout())?),
        };
        let rate_limit = match &self.config.rate_limit {
            Some(config) => Some(ClientRateLimitPolicy::new(config.build()?)),
            None => None,
        };

        let directory = match self.provider_directory {
            Some(directory) => directory,
            None => {
                let mut inner = HttpPipeline::builder(Arc::clone(&transport))
                    .policy(ThrottlingPolicy::new(self.throttle_registry.clone()));
                if let Some(rate_limit) = &rate_limit {
                    inner = inner.policy(rate_limit.clone());
                }
                if let Some(credential) = &self.credential {
                    inner = inner.policy(BearerTokenPolicy::new(Arc::clone(credential)));
                }
                Arc::new(ArmProviderDirectory::new(
                    inner.policy(LoggingPolicy).build(),
                    &self.config.endpoint,
                ))
            }
        };

        let mut builder = HttpPipeline::builder(transport)
            .policy(
                ProviderRegistrationPolicy::new(directory)
                    .with_poll_interval(self.config.registration_poll_interval()),
            )
            .policy(ThrottlingPolicy::new(self.throttle_registry));
        if !self.auxiliary_credentials.is_empty() {
            builder = builder.policy(AuxiliaryAuthenticationPolicy::new(
                self.auxiliary_credentials,
            ));
        }
        if let Some(rate_limit) = rate_limit {
            builder = builder.policy(rate_limit);
        }
        if let Some(credential) = self.credential {
            builder = builder.policy(BearerTokenPolicy::new(credential));
        }

        let pipeline = builder.policy(LoggingPolicy).build();
        log::debug!(
            "Built management pipeline with {} policies for {}",
            pipeline.policies().len(),
            self.config.endpoint
        );
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenCredential;
    use crate::http::testing::MockTransport;
    use crate::http::{HttpRequest, HttpResponse};
    use reqwest::{Method, StatusCode};

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"request_timeout_secs": 15, "rate_limit": {"requests_per_second": 3}}"#)
                .unwrap();

        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.registration_poll_interval(), Duration::from_secs(5));
        assert_eq!(config.rate_limit.as_ref().map(|r| r.requests_per_second), Some(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = ClientConfig {
            endpoint: "management.azure.com".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ManagementError::Configuration(_))
        ));

        let config = ClientConfig {
            rate_limit: Some(RateLimiterConfig {
                requests_per_second: 0,
                burst_size: None,
            }),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_standard_chain_order() {
        let transport = Arc::new(MockTransport::sequence(vec![HttpResponse::new(
            StatusCode::OK,
        )]));
        let config = ClientConfig {
            rate_limit: Some(RateLimiterConfig::default()),
            ..ClientConfig::default()
        };

        let pipeline = ManagementPipelineBuilder::new(config)
            .transport(transport.clone())
            .credential(Arc::new(StaticTokenCredential::new("primary")))
            .auxiliary_credential(Arc::new(StaticTokenCredential::for_tenant("aux", "t2")))
            .build()
            .unwrap();

        let names: Vec<String> = pipeline
            .policies()
            .iter()
            .map(|policy| format!("{policy:?}"))
            .collect();
        assert_eq!(names.len(), 6);
        assert!(names[0].starts_with("ProviderRegistrationPolicy"));
        assert!(names[1].starts_with("ThrottlingPolicy"));
        assert!(names[2].starts_with("AuxiliaryAuthenticationPolicy"));
        assert!(names[3].starts_with("ClientRateLimitPolicy"));
        assert!(names[4].starts_with("BearerTokenPolicy"));
        assert_eq!(names[5], "LoggingPolicy");

        let mut request =
            HttpRequest::parse(Method::GET, "https://management.azure.com/subscriptions").unwrap();
        pipeline.send(&mut request).await.unwrap();
        let sent = &transport.requests()[0];
        assert_eq!(sent.header("authorization"), Some("Bearer primary"));
        assert!(sent.header("x-ms-client-request-id").is_some());
    }
}
