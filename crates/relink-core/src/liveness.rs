//! Idle eviction for server-side proxies.
//!
//! Forwarding resources are scarce; a peer that vanishes without a clean
//! disconnect must not pin one forever. Each heartbeat sweeps entries whose
//! last interaction is older than the timeout.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Idle time after which a proxy is evicted
pub const PROXY_TIMEOUT: Duration = Duration::from_secs(10);

/// Last-interaction bookkeeping
#[derive(Debug)]
pub struct LivenessTracker<K> {
    last_seen: HashMap<K, Instant>,
}

impl<K> Default for LivenessTracker<K> {
    fn default() -> Self {
        Self {
            last_seen: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> LivenessTracker<K> {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an interaction
    pub fn touch(&mut self, key: K, now: Instant) {
        self.last_seen.insert(key, now);
    }

    /// Stop tracking a key
    pub fn forget(&mut self, key: &K) {
        self.last_seen.remove(key);
    }

    /// Whether a key is tracked
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.last_seen.contains_key(key)
    }

    /// Number of tracked keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    /// True when nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    /// Remove and return every key idle for longer than `timeout`
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<K> {
        let expired: Vec<K> = self
            .last_seen
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) > timeout)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.last_seen.remove(key);
        }

        expired
    }
}

/// A forwarding resource that must be released explicitly
pub trait Proxy {
    /// Release sockets and tasks held by the proxy
    fn dispose(&mut self);
}

/// Proxies keyed by remote endpoint, with idle eviction
#[derive(Debug)]
pub struct ProxyTable<K, P> {
    proxies: HashMap<K, P>,
    liveness: LivenessTracker<K>,
}

impl<K, P> Default for ProxyTable<K, P> {
    fn default() -> Self {
        Self {
            proxies: HashMap::new(),
            liveness: LivenessTracker::default(),
        }
    }
}

impl<K: Eq + Hash + Clone, P: Proxy> ProxyTable<K, P> {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a proxy, disposing any previous one under the same key
    pub fn insert(&mut self, key: K, proxy: P, now: Instant) {
        if let Some(mut old) = self.proxies.insert(key.clone(), proxy) {
            old.dispose();
        }
        self.liveness.touch(key, now);
    }

    /// Mutable access without touching
    pub fn get_mut(&mut self, key: &K) -> Option<&mut P> {
        self.proxies.get_mut(key)
    }

    /// Whether a proxy exists for `key`
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.proxies.contains_key(key)
    }

    /// Record an interaction; returns false for unknown keys
    pub fn touch(&mut self, key: &K, now: Instant) -> bool {
        if self.proxies.contains_key(key) {
            self.liveness.touch(key.clone(), now);
            true
        } else {
            false
        }
    }

    /// Dispose and remove idle proxies, returning how many were evicted
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> usize {
        let expired = self.liveness.sweep(now, timeout);
        for key in &expired {
            if let Some(mut proxy) = self.proxies.remove(key) {
                proxy.dispose();
            }
        }
        expired.len()
    }

    /// Dispose and remove every proxy, returning how many there were
    pub fn clear(&mut self) -> usize {
        let count = self.proxies.len();
        for (_, mut proxy) in self.proxies.drain() {
            proxy.dispose();
        }
        self.liveness = LivenessTracker::default();
        count
    }

    /// Number of live proxies
    #[must_use]
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// True when no proxy is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
