//! Best-effort extraction of routing hints from requests and ARM error text.
//!
//! Every extractor returns `None` when its pattern does not match. Callers
//! treat `None` as "cannot recover here" and pass the original response on.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

/// Throttling key used when a request is not scoped to a subscription
pub const GLOBAL_THROTTLE_KEY: &str = "global";

/// Longest back-off honoured from a throttled response; larger hints are clamped
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

static SUBSCRIPTION_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/subscriptions/([\w-]+)(?:/|$)").expect("subscription id pattern is valid")
});

static QUOTED_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'([^']+)'").expect("quoted token pattern is valid"));

static RETRY_MINUTES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)try again after '(\d+)' minutes").expect("minutes pattern is valid")
});

static RETRY_SECONDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)try again after '(\d+)' seconds").expect("seconds pattern is valid")
});

/// Subscription id from a `/subscriptions/{id}/...` path
pub fn subscription_id(url: &Url) -> Option<String> {
    SUBSCRIPTION_ID
        .captures(url.path())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Key under which throttling state for `url` is tracked
pub fn throttle_key(url: &Url) -> String {
    subscription_id(url).unwrap_or_else(|| GLOBAL_THROTTLE_KEY.to_string())
}

/// Provider namespace named in a `MissingSubscriptionRegistration` message.
///
/// ARM phrases it as `... to use namespace 'Microsoft.Batch'. See ...`; the
/// last quoted token is taken.
pub fn provider_namespace(message: &str) -> Option<String> {
    QUOTED_TOKEN
        .captures_iter(message)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|namespace| !namespace.is_empty())
}

/// Where a retry delay was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDelaySource {
    Header,
    Message,
}

/// Delay requested by a throttled response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDelay {
    pub delay: Duration,
    pub source: RetryDelaySource,
}

/// Compute how long to back off after a 429.
///
/// The `Retry-After` header is read first, as an HTTP-date and then as integer
/// seconds. When it is absent or not positive, the body text is scanned for
/// `try again after 'N' minutes|seconds`. `None` means no delay applies.
/// The delay never exceeds [`MAX_RETRY_DELAY`].
pub fn retry_delay(headers: &HeaderMap, body: &str, now: DateTime<Utc>) -> Option<RetryDelay> {
    let header_seconds = headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| retry_after_header_seconds(value, now));

    if let Some(seconds) = header_seconds.filter(|s| *s > 0) {
        return Some(RetryDelay {
            delay: clamped_delay(seconds),
            source: RetryDelaySource::Header,
        });
    }

    retry_after_message_seconds(body)
        .filter(|s| *s > 0)
        .map(|seconds| RetryDelay {
            delay: clamped_delay(seconds),
            source: RetryDelaySource::Message,
        })
}

/// `Retry-After` value in seconds, accepting both the HTTP-date and delta-seconds forms
pub fn retry_after_header_seconds(value: &str, now: DateTime<Utc>) -> Option<i64> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc).signed_duration_since(now).num_seconds());
    }
    value.parse::<i64>().ok()
}

/// Seconds requested in an ARM throttling message
pub fn retry_after_message_seconds(body: &str) -> Option<i64> {
    if let Some(minutes) = first_number(&RETRY_MINUTES, body) {
        return Some(minutes.saturating_mul(60));
    }
    first_number(&RETRY_SECONDS, body)
}

fn clamped_delay(seconds: i64) -> Duration {
    u64::try_from(seconds)
        .map(Duration::from_secs)
        .unwrap_or_default()
        .min(MAX_RETRY_DELAY)
}

fn first_number(pattern: &Regex, text: &str) -> Option<i64> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
}
