//! # Utilities
//!
//! Environment variable access used when loading configuration:
//!
//! ```no_run
//! use fluent_core::utils::env::EnvUtils;
//!
//! let tenant_id = EnvUtils::get_validated_var("AZURE_TENANT_ID")?;
//! let auxiliary = EnvUtils::get_list_var("AZURE_AUXILIARY_TENANT_IDS");
//! # Ok::<(), fluent_core::utils::env::EnvVarError>(())
//! ```

pub mod env;

pub use env::{EnvUtils, EnvVarError};
