pub mod client_secret;
pub mod credential;
pub mod token_cache;

pub use client_secret::{ClientSecretCredential, DEFAULT_AUTHORITY_HOST};
pub use credential::{AccessToken, MANAGEMENT_SCOPE, StaticTokenCredential, TokenCredential};
pub use token_cache::{CachedToken, TokenCache};
