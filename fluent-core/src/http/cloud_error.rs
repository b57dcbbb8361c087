use serde::Deserialize;

/// Error code ARM returns when the subscription has not registered the target namespace
pub const MISSING_SUBSCRIPTION_REGISTRATION: &str = "MissingSubscriptionRegistration";

/// Error code ARM returns when a cross-tenant linked resource needs auxiliary tokens
pub const LINKED_AUTHORIZATION_FAILED: &str = "LinkedAuthorizationFailed";

/// Error payload returned by Azure Resource Manager.
///
/// ARM usually wraps it as `{ "error": { "code": ..., "message": ... } }`,
/// some providers return the bare object.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CloudError {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub details: Vec<CloudError>,
}

#[derive(Debug, Deserialize)]
struct CloudErrorEnvelope {
    error: CloudError,
}

impl CloudError {
    /// Parse an error payload. Bodies that are not an ARM error yield `None`.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice::<CloudErrorEnvelope>(body)
            .map(|envelope| envelope.error)
            .or_else(|_| serde_json::from_slice::<CloudError>(body))
            .ok()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.code == code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_wrapped_error() {
        let body = br#"{"error":{"code":"MissingSubscriptionRegistration","message":"The subscription is not registered to use namespace 'Microsoft.Batch'."}}"#;

        let error = CloudError::from_body(body).unwrap();
        assert!(error.has_code(MISSING_SUBSCRIPTION_REGISTRATION));
        assert!(error.message.contains("Microsoft.Batch"));
    }

    #[test]
    fn test_parses_bare_error() {
        let body = br#"{"code":"LinkedAuthorizationFailed","message":"linked"}"#;

        let error = CloudError::from_body(body).unwrap();
        assert!(error.has_code(LINKED_AUTHORIZATION_FAILED));
    }

    #[test]
    fn test_malformed_body_is_not_an_error_payload() {
        assert!(CloudError::from_body(b"").is_none());
        assert!(CloudError::from_body(b"<html>gateway</html>").is_none());
        assert!(CloudError::from_body(br#"{"value":[]}"#).is_none());
    }
}
