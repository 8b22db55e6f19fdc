//! Rate-limit response headers.
//!
//! The same three headers are rendered for allowed and denied requests so clients can always
//! pace themselves.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::limiter::Decision;
use crate::policy::Policy;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Header values derived from a policy and a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// Unix timestamp of the window reset.
    pub reset: u64,
}

impl RateLimitHeaders {
    pub fn new(policy: &Policy, decision: &Decision) -> Self {
        Self { limit: policy.limit(), remaining: decision.remaining, reset: decision.reset_at }
    }

    /// Insert the headers, replacing any existing values.
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset));
    }

    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(3);
        self.apply(&mut headers);
        headers
    }
}

/// Attach the limit, remaining budget, and reset time for `decision` to `headers`.
pub fn attach_headers(headers: &mut HeaderMap, policy: &Policy, decision: &Decision) {
    RateLimitHeaders::new(policy, decision).apply(headers);
}
