//! Dht and lookup settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{LookupKind, DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_REPLACEMENT_CACHE_SIZE};
use crate::Error;

/// Default replication parameter.
pub const DEFAULT_K: usize = 20;
/// Default number of concurrent requests per lookup.
pub const DEFAULT_PARALLELISM: usize = 3;
/// Default wall clock budget of a lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(60);
/// Default request timeout before abandoning an inflight request to a non-responding contact.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Lower bound of the adaptive, round trip time based, request timeout.
pub const DEFAULT_MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Dht Configurations
pub struct Config {
    /// Replication parameter, the size of a lookup result and of a k-bucket.
    ///
    /// Defaults to [DEFAULT_K]
    pub k: usize,
    /// Maximum number of concurrent requests of a node lookup.
    ///
    /// Defaults to [DEFAULT_PARALLELISM]
    pub node_lookup_parallelism: usize,
    /// Maximum number of concurrent requests of a value lookup.
    ///
    /// Defaults to [DEFAULT_PARALLELISM]
    pub value_lookup_parallelism: usize,
    /// Wall clock budget of a node lookup, [Duration::ZERO] disables it.
    ///
    /// Defaults to [DEFAULT_LOOKUP_TIMEOUT]
    pub node_lookup_timeout: Duration,
    /// Wall clock budget of a value lookup, [Duration::ZERO] disables it.
    ///
    /// Defaults to [DEFAULT_LOOKUP_TIMEOUT]
    pub value_lookup_timeout: Duration,
    /// Request timeout for contacts without round trip history.
    ///
    /// The longer this duration is, the longer lookups take until they are deemed "done".
    /// The shorter this duration is, the more responses from busy contacts we miss out on,
    /// which affects the accuracy of lookups trying to find the closest nodes to a target.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Floor of the adaptive request timeout of contacts with round trip history.
    ///
    /// Defaults to [DEFAULT_MIN_REQUEST_TIMEOUT]
    pub min_request_timeout: Duration,
    /// Maximum size of each k-bucket's replacement cache.
    ///
    /// Defaults to [DEFAULT_REPLACEMENT_CACHE_SIZE]
    pub replacement_cache_size: usize,
    /// Failures in a row after which the routing table stops counting failures.
    ///
    /// Defaults to [DEFAULT_MAX_CONSECUTIVE_FAILURES]
    pub max_consecutive_failures: usize,
    /// Whether a contact that responds with no contacts at all still counts
    /// as one of the closest responders.
    ///
    /// Defaults to `true`
    pub accept_empty_responses: bool,
}

impl Config {
    /// Returns an error if these settings can't drive a lookup.
    pub fn validate(&self) -> Result<(), Error> {
        if self.k == 0 {
            return Err(Error::InvalidConfig("k must be greater than zero"));
        }
        if self.node_lookup_parallelism == 0 || self.value_lookup_parallelism == 0 {
            return Err(Error::InvalidConfig(
                "lookup parallelism must be greater than zero",
            ));
        }

        Ok(())
    }

    /// The settings of a single lookup of that kind.
    pub fn lookup_config(&self, kind: LookupKind) -> LookupConfig {
        let (parallelism, timeout) = match kind {
            LookupKind::Node => (self.node_lookup_parallelism, self.node_lookup_timeout),
            LookupKind::Value => (self.value_lookup_parallelism, self.value_lookup_timeout),
        };

        LookupConfig {
            k: self.k,
            parallelism,
            timeout,
            accept_empty_responses: self.accept_empty_responses,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            node_lookup_parallelism: DEFAULT_PARALLELISM,
            value_lookup_parallelism: DEFAULT_PARALLELISM,
            node_lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            value_lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            min_request_timeout: DEFAULT_MIN_REQUEST_TIMEOUT,
            replacement_cache_size: DEFAULT_REPLACEMENT_CACHE_SIZE,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            accept_empty_responses: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Settings of one lookup.
pub struct LookupConfig {
    /// Size of the closest responders set.
    pub k: usize,
    /// Maximum number of concurrent requests, alpha.
    pub parallelism: usize,
    /// Wall clock budget, zero means unlimited.
    pub timeout: Duration,
    pub accept_empty_responses: bool,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Config::default().lookup_config(LookupKind::Node)
    }
}
