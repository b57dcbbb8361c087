use std::fmt;
use thiserror::Error;

/// Transport-level errors raised while exchanging a request with Azure Resource Manager.
///
/// These errors describe failures of the HTTP exchange itself. A response that
/// arrived with a non-success status is *not* an `HttpError`; it is returned to
/// the policy chain as a regular response so that policies can inspect it.
///
/// # Error Categories
///
/// - [`ClientCreation`] - HTTP client initialization failures
/// - [`RequestFailed`] - Request could not be sent or the body could not be read
/// - [`Timeout`] - Request exceeded the configured timeout
/// - [`InvalidResponse`] - Unexpected response format or content
///
/// # Examples
///
/// ```no_run
/// use fluent_core::common::errors::HttpError;
///
/// fn log_http_error(error: &HttpError) {
///     match error {
///         HttpError::Timeout { url, seconds } => {
///             log::warn!("HTTP request timeout: url={}, duration={}s", url, seconds);
///         }
///         other => log::error!("HTTP error: {}", other),
///     }
/// }
/// ```
///
/// [`ClientCreation`]: HttpError::ClientCreation
/// [`RequestFailed`]: HttpError::RequestFailed
/// [`Timeout`]: HttpError::Timeout
/// [`InvalidResponse`]: HttpError::InvalidResponse
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// HTTP client initialization failed.
    ///
    /// Typically caused by invalid TLS configuration or an unusable proxy setup.
    #[error("HTTP client creation failed: {reason}")]
    ClientCreation { reason: String },

    /// HTTP request execution failed.
    ///
    /// Covers connection failures, DNS errors and body read failures.
    #[error("Request failed: {url} - {reason}")]
    RequestFailed { url: String, reason: String },

    /// HTTP request timed out.
    #[error("Request timeout after {seconds}s: {url}")]
    Timeout { url: String, seconds: u64 },

    /// Received response doesn't match expected format.
    #[error("Invalid response: expected {expected}, got {actual}")]
    InvalidResponse { expected: String, actual: String },
}

/// Crate-wide error type for management-plane operations.
///
/// Policies recover the well-known transient conditions (throttling, missing
/// provider registration, linked authorization) on their own; everything else
/// surfaces through this type unchanged.
#[derive(Debug, Clone, Error)]
pub enum ManagementError {
    /// The HTTP exchange itself failed
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Azure Resource Manager answered with an error payload
    #[error("{}", format_api_error(.code, *.status_code, .message, .request_id))]
    AzureApiError {
        code: String,
        status_code: u16,
        message: String,
        request_id: Option<String>,
    },

    /// A credential could not produce a token
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Registering a resource provider namespace failed
    #[error("Registration of provider '{namespace}' failed: {reason}")]
    ProviderRegistration { namespace: String, reason: String },

    /// An operation was invoked in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Adding the edge `dependent -> dependency` would close a cycle
    #[error("Dependency from '{dependent}' on '{dependency}' would create a cycle")]
    CycleDetected {
        dependent: String,
        dependency: String,
    },

    /// A key was registered twice where uniqueness is required
    #[error("{kind} with name '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    /// A key could not be resolved
    #[error("{kind} with name '{name}' not found")]
    NotFound { kind: String, name: String },

    /// A resource create/update/delete implementation reported a failure
    #[error("Resource operation failed: {0}")]
    ResourceOperation(String),

    /// Configuration is missing or malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// One or more tasks of a batch failed
    #[error(transparent)]
    Composite(#[from] CompositeError),
}

fn format_api_error(
    code: &str,
    status_code: u16,
    message: &str,
    request_id: &Option<String>,
) -> String {
    match request_id {
        Some(req_id) => {
            format!("Azure API error: {code} (HTTP {status_code}) - {message} [Request ID: {req_id}]")
        }
        None => format!("Azure API error: {code} (HTTP {status_code}) - {message}"),
    }
}

impl ManagementError {
    /// Create an Azure API error from an ARM error payload
    pub fn azure_api_error(
        code: impl Into<String>,
        status_code: u16,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Self::AzureApiError {
            code: code.into(),
            status_code,
            message: message.into(),
            request_id,
        }
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Azure error code, if this error came from an ARM error payload
    pub fn azure_error_code(&self) -> Option<&str> {
        match self {
            ManagementError::AzureApiError { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, ManagementError::Composite(_))
    }
}

/// Failure of a single task inside a batch or child collection commit.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    /// Key of the task that failed
    pub key: String,
    /// The error the task produced
    pub error: ManagementError,
}

impl TaskFailure {
    pub fn new(key: impl Into<String>, error: ManagementError) -> Self {
        Self {
            key: key.into(),
            error,
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.error)
    }
}

/// Aggregate of every individual failure of a batch execution.
///
/// Produced once all reachable work has been attempted, so a failing branch
/// never hides failures (or successes) of unrelated branches.
#[derive(Debug, Clone, Default)]
pub struct CompositeError {
    failures: Vec<TaskFailure>,
}

impl CompositeError {
    pub fn new(failures: Vec<TaskFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<TaskFailure> {
        self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Keys of the failed tasks, in the order the failures were observed
    pub fn failed_keys(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.key.as_str()).collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.failures.iter().any(|f| f.key == key)
    }

    pub fn push(&mut self, failure: TaskFailure) {
        self.failures.push(failure);
    }

    pub fn extend(&mut self, failures: impl IntoIterator<Item = TaskFailure>) {
        self.failures.extend(failures);
    }

    /// `Ok(())` when nothing failed, otherwise the composite itself
    pub fn into_result(self) -> Result<(), CompositeError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{} operation(s) failed. Errors: {}",
            self.failures.len(),
            details.join("; ")
        )
    }
}

impl std::error::Error for CompositeError {}

/// Convenience alias used throughout the crate
pub type Result<T, E = ManagementError> = std::result::Result<T, E>;
