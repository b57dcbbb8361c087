//! HTTP plumbing shared by every management operation: buffered
//! request/response types, the transport seam, the policy chain, and the
//! parsers used by policies to inspect ARM error payloads.

pub mod cloud_error;
pub mod extract;
pub mod pipeline;
pub mod request;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod transport;

pub use cloud_error::{CloudError, LINKED_AUTHORIZATION_FAILED, MISSING_SUBSCRIPTION_REGISTRATION};
pub use pipeline::{HttpPipeline, HttpPipelineBuilder, Next, Policy};
pub use request::{HttpRequest, HttpResponse};
pub use transport::{HttpClient, ReqwestTransport};
