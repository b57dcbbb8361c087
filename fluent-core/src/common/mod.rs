pub mod errors;
pub mod rate_limiter;

pub use errors::{CompositeError, HttpError, ManagementError, Result, TaskFailure};
pub use rate_limiter::{RateLimitError, RateLimiter, RateLimiterConfig};
