use crate::common::Result;
use crate::http::{HttpPipeline, HttpRequest};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use std::fmt;

const API_VERSION_PROVIDERS: &str = "2021-04-01";

/// Registration state of a resource provider namespace within a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum RegistrationState {
    Registered,
    Registering,
    #[default]
    NotRegistered,
    Unregistered,
    Unregistering,
    Other(String),
}

impl From<String> for RegistrationState {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "registered" => Self::Registered,
            "registering" => Self::Registering,
            "notregistered" => Self::NotRegistered,
            "unregistered" => Self::Unregistered,
            "unregistering" => Self::Unregistering,
            _ => Self::Other(value),
        }
    }
}

impl RegistrationState {
    /// States in which a freshly requested registration is still in progress
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::Registering | Self::Unregistered | Self::NotRegistered
        )
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered)
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "Registered"),
            Self::Registering => write!(f, "Registering"),
            Self::NotRegistered => write!(f, "NotRegistered"),
            Self::Unregistered => write!(f, "Unregistered"),
            Self::Unregistering => write!(f, "Unregistering"),
            Self::Other(state) => write!(f, "{state}"),
        }
    }
}

/// A resource provider as returned by `Microsoft.Resources/providers`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    #[serde(default)]
    pub id: Option<String>,
    pub namespace: String,
    #[serde(default)]
    pub registration_state: RegistrationState,
}

/// Registration operations on resource provider namespaces.
#[async_trait]
pub trait ProviderDirectory: Send + Sync + fmt::Debug {
    /// Request registration of `namespace` for the subscription
    async fn register(&self, subscription_id: &str, namespace: &str) -> Result<Provider>;

    /// Read the current state of `namespace` for the subscription
    async fn get_by_name(&self, subscription_id: &str, namespace: &str) -> Result<Provider>;
}

/// [`ProviderDirectory`] talking to Azure Resource Manager.
///
/// The pipeline handed in must not contain a provider registration policy,
/// otherwise a failed registration call would try to register itself.
#[derive(Debug, Clone)]
pub struct ArmProviderDirectory {
    pipeline: HttpPipeline,
    endpoint: String,
}

impl ArmProviderDirectory {
    pub fn new(pipeline: HttpPipeline, endpoint: impl Into<String>) -> Self {
        Self {
            pipeline,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn provider_url(&self, subscription_id: &str, namespace: &str, action: Option<&str>) -> String {
        let mut url = format!(
            "{}/subscriptions/{}/providers/{}",
            self.endpoint,
            urlencoding::encode(subscription_id),
            urlencoding::encode(namespace)
        );
        if let Some(action) = action {
            url.push('/');
            url.push_str(action);
        }
        url.push_str("?api-version=");
        url.push_str(API_VERSION_PROVIDERS);
        url
    }

    async fn call(&self, method: Method, url: &str) -> Result<Provider> {
        let mut request = HttpRequest::parse(method, url)?;
        let response = self.pipeline.send(&mut request).await?;
        response.error_for_status()?.json()
    }
}

#[async_trait]
impl ProviderDirectory for ArmProviderDirectory {
    async fn register(&self, subscription_id: &str, namespace: &str) -> Result<Provider> {
        let url = self.provider_url(subscription_id, namespace, Some("register"));
        self.call(Method::POST, &url).await
    }

    async fn get_by_name(&self, subscription_id: &str, namespace: &str) -> Result<Provider> {
        let url = self.provider_url(subscription_id, namespace, None);
        self.call(Method::GET, &url).await
    }
}
