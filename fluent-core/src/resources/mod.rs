//! Resource-level collaborators of the policy chain: provider registration
//! directory, optimistic concurrency state and a generic JSON resource client.

pub mod etag;
pub mod generic;
pub mod providers;

pub use etag::ETagState;
pub use generic::GenericResourceClient;
pub use providers::{ArmProviderDirectory, Provider, ProviderDirectory, RegistrationState};
