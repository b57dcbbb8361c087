use crate::common::{HttpError, ManagementError, Result};
use crate::http::cloud_error::CloudError;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;

/// Header carrying the ARM request id used for support tickets
pub const REQUEST_ID_HEADER: &str = "x-ms-request-id";

/// An outbound management request.
///
/// Requests are cloned freely by policies that need to resend them, so the
/// body is kept as owned bytes rather than a stream.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Build a request from a textual URL
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| ManagementError::Configuration(format!("Invalid URL '{url}': {e}")))?;
        Ok(Self::new(method, url))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Header value as text; non-ASCII values are treated as absent
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Insert or replace a header
    pub fn insert_header(&mut self, name: HeaderName, value: &str) -> Result<()> {
        let value = HeaderValue::from_str(value).map_err(|e| {
            ManagementError::Configuration(format!("Invalid value for header '{name}': {e}"))
        })?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        self.insert_header(name, value)?;
        Ok(self)
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = Some(body);
    }

    /// Serialize `body` as JSON and set the matching content type
    pub fn with_json_body<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body).map_err(|e| {
            ManagementError::Configuration(format!("Failed to serialize request body: {e}"))
        })?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(bytes);
        Ok(self)
    }
}

/// A fully buffered response. The body can be read any number of times.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn from_parts(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Add a header, skipping pairs that are not valid HTTP header syntax
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => log::warn!("Ignoring invalid response header '{name}'"),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn request_id(&self) -> Option<String> {
        self.header(REQUEST_ID_HEADER).map(ToString::to_string)
    }

    /// The ARM error payload carried by this response, if it has one
    pub fn cloud_error(&self) -> Option<CloudError> {
        CloudError::from_body(&self.body)
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            HttpError::InvalidResponse {
                expected: std::any::type_name::<T>().to_string(),
                actual: format!("unparseable body: {e}"),
            }
            .into()
        })
    }

    /// Turn a response into an error, preferring the ARM error payload
    pub fn into_error(self) -> ManagementError {
        let request_id = self.request_id();
        let status = self.status.as_u16();
        match self.cloud_error() {
            Some(cloud_error) => ManagementError::azure_api_error(
                cloud_error.code,
                status,
                cloud_error.message,
                request_id,
            ),
            None => ManagementError::azure_api_error(
                self.status
                    .canonical_reason()
                    .unwrap_or("UnknownError")
                    .replace(' ', ""),
                status,
                self.body_text().into_owned(),
                request_id,
            ),
        }
    }

    /// `Ok(self)` for 2xx responses, the converted error otherwise
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }
}
