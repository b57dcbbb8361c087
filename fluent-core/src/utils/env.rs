//! Validated access to environment variables.
//!
//! Values are trimmed, and a variable that is set but blank is treated as an
//! error rather than as an empty string.

use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when accessing environment variables.
#[derive(Debug, Error)]
pub enum EnvVarError {
    /// Environment variable is not set
    #[error("Environment variable '{name}' not found. Please set this variable in your environment.")]
    NotFound { name: String },

    /// Environment variable contains invalid UTF-8 characters
    #[error(
        "Environment variable '{name}' contains invalid UTF-8 characters. Please check the value."
    )]
    InvalidUtf8 { name: String },

    /// Environment variable is set but contains only whitespace or is empty
    #[error("Environment variable '{name}' is empty. Please provide a valid value.")]
    Empty { name: String },

    /// Environment variable could not be parsed into the expected type
    #[error("Environment variable '{name}' has invalid value '{value}': {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// Utility functions for safe environment variable handling.
///
/// # Examples
///
/// ```no_run
/// use fluent_core::utils::EnvUtils;
///
/// if EnvUtils::has_non_empty_var("AZURE_TENANT_ID") {
///     let tenant = EnvUtils::get_validated_var("AZURE_TENANT_ID")?;
///     println!("Tenant: {}", tenant);
/// }
///
/// let timeout: Option<u64> = EnvUtils::get_parsed_var("AZURE_REQUEST_TIMEOUT_SECS")?;
/// # Ok::<(), fluent_core::utils::EnvVarError>(())
/// ```
pub struct EnvUtils;

impl EnvUtils {
    /// Checks if an environment variable exists and has a non-empty value.
    pub fn has_non_empty_var(name: &str) -> bool {
        match std::env::var(name) {
            Ok(value) => !value.trim().is_empty(),
            Err(_) => false,
        }
    }

    /// Gets an environment variable with validation.
    ///
    /// # Errors
    ///
    /// Returns [`EnvVarError`] if:
    /// - The variable is not set ([`EnvVarError::NotFound`])
    /// - The variable is empty or contains only whitespace ([`EnvVarError::Empty`])
    /// - The variable contains invalid UTF-8 ([`EnvVarError::InvalidUtf8`])
    pub fn get_validated_var(name: &str) -> Result<String, EnvVarError> {
        match std::env::var(name) {
            Ok(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    Err(EnvVarError::Empty {
                        name: name.to_string(),
                    })
                } else {
                    Ok(trimmed.to_string())
                }
            }
            Err(std::env::VarError::NotPresent) => Err(EnvVarError::NotFound {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(EnvVarError::InvalidUtf8 {
                name: name.to_string(),
            }),
        }
    }

    /// Gets an optional environment variable; missing, blank or invalid
    /// values all read as `None`.
    pub fn get_optional_var(name: &str) -> Option<String> {
        Self::get_validated_var(name).ok()
    }

    /// Parse an optional variable.
    ///
    /// A missing or blank variable is `Ok(None)`; a value that does not parse
    /// is an error.
    pub fn get_parsed_var<T>(name: &str) -> Result<Option<T>, EnvVarError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(value) = Self::get_optional_var(name) else {
            return Ok(None);
        };
        value
            .parse()
            .map(Some)
            .map_err(|e: T::Err| EnvVarError::Invalid {
                name: name.to_string(),
                value,
                reason: e.to_string(),
            })
    }

    /// Comma-separated list, with blank entries dropped
    pub fn get_list_var(name: &str) -> Vec<String> {
        Self::get_optional_var(name)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
