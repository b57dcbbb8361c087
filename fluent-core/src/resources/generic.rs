use crate::common::Result;
use crate::dag::PendingOperation;
use crate::http::{HttpPipeline, HttpRequest, HttpResponse};
use crate::resources::etag::ETagState;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON CRUD on arbitrary ARM resources addressed by resource id.
///
/// Every call goes through the configured pipeline, so throttling, provider
/// registration and auxiliary authentication apply to it transparently.
#[derive(Debug, Clone)]
pub struct GenericResourceClient {
    pipeline: HttpPipeline,
    endpoint: String,
}

impl GenericResourceClient {
    pub fn new(pipeline: HttpPipeline, endpoint: impl Into<String>) -> Self {
        Self {
            pipeline,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn pipeline(&self) -> &HttpPipeline {
        &self.pipeline
    }

    fn resource_url(&self, resource_id: &str, api_version: &str) -> String {
        format!(
            "{}/{}?api-version={}",
            self.endpoint,
            resource_id.trim_start_matches('/'),
            urlencoding::encode(api_version)
        )
    }

    async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        let response = self.pipeline.send(&mut request).await?;
        response.error_for_status()
    }

    /// Read a resource
    pub async fn get<T: DeserializeOwned>(&self, resource_id: &str, api_version: &str) -> Result<T> {
        let request = HttpRequest::parse(Method::GET, &self.resource_url(resource_id, api_version))?;
        self.send(request).await?.json()
    }

    /// Create or replace a resource with `PUT`.
    ///
    /// `current_etag` is the ETag last read for the resource and is only used
    /// when `etag_state` asks for an implicit check on update.
    pub async fn create_or_update<B, T>(
        &self,
        resource_id: &str,
        api_version: &str,
        body: &B,
        etag_state: &ETagState,
        current_etag: Option<&str>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let operation = if current_etag.is_some() {
            PendingOperation::ToBeUpdated
        } else {
            PendingOperation::ToBeCreated
        };

        let mut request =
            HttpRequest::parse(Method::PUT, &self.resource_url(resource_id, api_version))?
                .with_json_body(body)?;
        etag_state.apply_to_request(&mut request, operation, current_etag)?;

        log::debug!("PUT {resource_id} ({operation})");
        self.send(request).await?.json()
    }

    /// Delete a resource. A `204 No Content` for an absent resource counts as success.
    pub async fn delete(&self, resource_id: &str, api_version: &str, etag_state: &ETagState) -> Result<()> {
        let mut request =
            HttpRequest::parse(Method::DELETE, &self.resource_url(resource_id, api_version))?;
        etag_state.apply_to_request(&mut request, PendingOperation::ToBeRemoved, None)?;

        let response = self.send(request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            log::debug!("DELETE {resource_id}: resource did not exist");
        }
        Ok(())
    }
}
