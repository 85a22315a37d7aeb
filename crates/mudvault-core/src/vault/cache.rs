//! Locator caching.
//!
//! Locators are an HMAC over the object name, keyed by the root IV. For a
//! given root key they never change, so they can be cached for as long as
//! the key store stays unsealed with that key.

use dashmap::DashMap;

/// Thread-safe cache of `object name -> locator`.
///
/// `LocatorCache` uses `DashMap` internally and is shared by every
/// operation on a [`KeyStore`](super::KeyStore). The key store clears it
/// whenever a root key is installed.
#[derive(Debug, Default)]
pub struct LocatorCache {
    locators: DashMap<String, String>,
}

impl LocatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` if the name has not been seen.
    #[inline]
    pub fn get(&self, name: &str) -> Option<String> {
        self.locators.get(name).map(|v| v.clone())
    }

    #[inline]
    pub fn insert(&self, name: &str, locator: String) {
        self.locators.insert(name.to_string(), locator);
    }

    /// Drop every cached locator.
    pub fn clear(&self) {
        self.locators.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            locator_entries: self.locators.len(),
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Number of cached locators
    pub locator_entries: usize,
}
