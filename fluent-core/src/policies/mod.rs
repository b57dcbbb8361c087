//! Policies recovering the transient conditions Azure Resource Manager
//! signals in-band, plus the authentication, pacing and logging policies
//! every management pipeline carries.
//!
//! See [`ManagementPipelineBuilder`](crate::config::ManagementPipelineBuilder)
//! for the order in which they are assembled.

pub mod auxiliary_auth;
pub mod bearer_token;
pub mod logging;
pub mod provider_registration;
pub mod rate_limit;
pub mod throttling;

pub use auxiliary_auth::{AUXILIARY_AUTHORIZATION_HEADER, AuxiliaryAuthenticationPolicy};
pub use bearer_token::BearerTokenPolicy;
pub use logging::{CLIENT_REQUEST_ID_HEADER, LoggingPolicy};
pub use provider_registration::{DEFAULT_REGISTRATION_POLL_INTERVAL, ProviderRegistrationPolicy};
pub use rate_limit::ClientRateLimitPolicy;
pub use throttling::{ThrottleRegistry, ThrottlingPolicy};
