//! Cache keys and per-resource freshness and retry policies.

use crate::api::ApiError;

use serde::Serialize;
use std::fmt;
use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);

/// Every guard-related read the cache knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Resource {
    GuardList,
    Guard,
    GuardProfile,
    GuardTypes,
    Assignments,
    History,
    Incidents,
    Tasks,
    Defaults,
}

/// Freshness window and idle eviction window of a cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub stale_time: Duration,
    pub gc_time: Duration,
}

impl Resource {
    pub fn name(self) -> &'static str {
        match self {
            Resource::GuardList => "guards",
            Resource::Guard => "guard",
            Resource::GuardProfile => "guard-profile",
            Resource::GuardTypes => "guard-types",
            Resource::Assignments => "assignments",
            Resource::History => "history",
            Resource::Incidents => "incidents",
            Resource::Tasks => "tasks",
            Resource::Defaults => "defaults",
        }
    }

    pub fn policy(self) -> CachePolicy {
        let (stale, gc) = match self {
            Resource::GuardList => (5, 10),
            Resource::Guard => (5, 15),
            Resource::GuardTypes => (10, 30),
            Resource::GuardProfile | Resource::Assignments | Resource::History => (10, 30),
            Resource::Incidents | Resource::Tasks | Resource::Defaults => (5, 15),
        };
        CachePolicy {
            stale_time: MINUTE * stale,
            gc_time: MINUTE * gc,
        }
    }
}

/// Resource name plus the parameters that identify one query of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub resource: Resource,
    pub params: Vec<String>,
}

impl QueryKey {
    pub fn new<I, S>(resource: Resource, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource,
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.resource.policy()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource.name())?;
        for p in &self.params {
            write!(f, "/{}", p)?;
        }
        Ok(())
    }
}

/// Exponential backoff for failed fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub fn should_retry(&self, attempt: u32, error: &ApiError) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }
}
