//! Named rate-limit policies bound to call sites.
//!
//! The web layer asks "may this identity do this now?" by policy name and gets
//! a [`Decision`]. Choosing the rejection response is left to the caller.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::limiter::{Policy, RateLimiter};

/// Anonymous IP throttle applied broadly to read endpoints.
pub const READ_POLICY: &str = "read";
/// Per-user throttle for creating posts.
pub const POSTING_POLICY: &str = "posting";
/// Per-user throttle for creating comments.
pub const COMMENTING_POLICY: &str = "commenting";

/// Who is being counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Anonymous caller, keyed by address.
    Ip(IpAddr),
    /// Authenticated caller, keyed by user id.
    User(String),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "ip:{addr}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

impl FromStr for Identity {
    type Err = String;

    /// Parses `ip:<addr>` or `user:<id>`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = value.strip_prefix("ip:") {
            return addr
                .parse()
                .map(Self::Ip)
                .map_err(|err| format!("invalid address `{addr}`: {err}"));
        }
        match value.strip_prefix("user:") {
            Some(id) if !id.is_empty() => Ok(Self::User(id.to_string())),
            _ => Err(format!(
                "expected `ip:<addr>` or `user:<id>`, got `{value}`"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub policy: Arc<str>,
    /// Set on rejection: time until the current window closes.
    pub retry_after: Option<Duration>,
}

impl Decision {
    /// Whole seconds suitable for a `Retry-After` header.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|after| after.as_secs().max(1))
    }
}

/// Policy table plus the limiter that enforces it.
#[derive(Clone)]
pub struct RequestGuard {
    limiter: RateLimiter,
    policies: BTreeMap<Arc<str>, Policy>,
}

impl RequestGuard {
    pub fn new<I, S>(limiter: RateLimiter, policies: I) -> Self
    where
        I: IntoIterator<Item = (S, Policy)>,
        S: Into<Arc<str>>,
    {
        Self {
            limiter,
            policies: policies
                .into_iter()
                .map(|(name, policy)| (name.into(), policy))
                .collect(),
        }
    }

    pub fn policy(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Policies in name order.
    pub fn policies(&self) -> impl Iterator<Item = (&str, &Policy)> {
        self.policies.iter().map(|(name, policy)| (name.as_ref(), policy))
    }

    /// Bind a policy once, at setup, so per-request checks cannot fail.
    pub fn resolve(&self, name: &str) -> Result<GuardedAction, ConfigurationError> {
        let (name, policy) = self
            .policies
            .get_key_value(name)
            .ok_or_else(|| ConfigurationError::unknown_policy(name))?;
        Ok(GuardedAction {
            name: Arc::clone(name),
            policy: *policy,
            limiter: self.limiter.clone(),
        })
    }

    /// Count one request by `identity` against the named policy.
    pub async fn check(
        &self,
        name: &str,
        identity: &Identity,
    ) -> Result<Decision, ConfigurationError> {
        Ok(self.resolve(name)?.check(identity).await)
    }
}

/// A policy already looked up in a [`RequestGuard`].
#[derive(Clone)]
pub struct GuardedAction {
    name: Arc<str>,
    policy: Policy,
    limiter: RateLimiter,
}

impl GuardedAction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub async fn check(&self, identity: &Identity) -> Decision {
        let verdict = self
            .limiter
            .check(&self.name, &identity.to_string(), &self.policy)
            .await;

        Decision {
            allowed: verdict.allowed,
            policy: Arc::clone(&self.name),
            retry_after: (!verdict.allowed).then_some(verdict.resets_in),
        }
    }
}
