// src/provider.rs

//! Capabilities the core consumes but does not implement
//!
//! Feed retrieval (network, signatures, XML) and user preference
//! storage live outside the core; the solver and candidate enumerator
//! only see these traits. In-memory implementations ship for tests and
//! embedders that assemble feeds programmatically.

use crate::error::{Error, Result};
use crate::feed::{Feed, InterfaceId, Stability};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Source of parsed feed trees
pub trait FeedProvider: Send + Sync {
    /// Resolve a feed by its ID.
    ///
    /// Fails with `FeedUnavailable` when the feed cannot be produced
    /// (not cached and the network is offline, download failed, ...).
    fn get(&self, id: &InterfaceId) -> Result<Arc<Feed>>;
}

/// User overrides for one interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfacePreferences {
    /// Minimum stability candidates for this interface must have;
    /// overrides the configured floor
    pub stability_policy: Option<Stability>,
    /// Per-implementation stability overrides, keyed by implementation
    /// id. `Preferred` pins an implementation to the front.
    pub user_ratings: BTreeMap<String, Stability>,
    /// Implementation ids the user never wants selected
    pub banned: BTreeSet<String>,
}

/// User overrides for one feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPreferences {
    /// Unix seconds of the last successful refresh, for staleness
    /// reporting
    pub last_checked: Option<u64>,
}

/// Source of user overrides
pub trait PreferencesStore: Send + Sync {
    fn interface_prefs(&self, id: &InterfaceId) -> InterfacePreferences;
    fn feed_prefs(&self, url: &InterfaceId) -> FeedPreferences;
}

/// Feed provider backed by a fixed in-memory map
#[derive(Default)]
pub struct StaticFeedProvider {
    feeds: BTreeMap<InterfaceId, Arc<Feed>>,
}

impl StaticFeedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feed: Feed) {
        self.feeds.insert(feed.url.clone(), Arc::new(feed));
    }

    pub fn with_feed(mut self, feed: Feed) -> Self {
        self.insert(feed);
        self
    }
}

impl FeedProvider for StaticFeedProvider {
    fn get(&self, id: &InterfaceId) -> Result<Arc<Feed>> {
        self.feeds
            .get(id)
            .cloned()
            .ok_or_else(|| Error::FeedUnavailable(id.to_string()))
    }
}

/// Preference store backed by in-memory maps
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    interfaces: BTreeMap<InterfaceId, InterfacePreferences>,
    feeds: BTreeMap<InterfaceId, FeedPreferences>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_interface_prefs(&mut self, id: InterfaceId, prefs: InterfacePreferences) {
        self.interfaces.insert(id, prefs);
    }

    pub fn set_feed_prefs(&mut self, url: InterfaceId, prefs: FeedPreferences) {
        self.feeds.insert(url, prefs);
    }
}

impl PreferencesStore for MemoryPreferences {
    fn interface_prefs(&self, id: &InterfaceId) -> InterfacePreferences {
        self.interfaces.get(id).cloned().unwrap_or_default()
    }

    fn feed_prefs(&self, url: &InterfaceId) -> FeedPreferences {
        self.feeds.get(url).cloned().unwrap_or_default()
    }
}
