// src/candidates.rs

//! Per-interface candidate enumeration and preference ordering
//!
//! For one interface this loads the primary feed plus any feeds it
//! references, flattens groups away, applies user preferences and tags
//! every implementation either suitable or rejected-with-a-reason. The
//! list is sorted by the preference key, which is the solver's only
//! source of preference; sorting is stable, so candidates the key
//! cannot distinguish stay in document order and the whole pipeline is
//! deterministic.

use crate::arch::Architecture;
use crate::config::{Config, NetworkUse};
use crate::error::Result;
use crate::feed::{Implementation, InterfaceId, Stability};
use crate::provider::{FeedProvider, PreferencesStore};
use crate::requirements::Requirements;
use crate::store::Store;
use crate::version::Version;
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Why a candidate cannot be selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    IncompatibleArch {
        required: Architecture,
        found: Architecture,
    },
    StabilityTooLow {
        found: Stability,
        floor: Stability,
    },
    LanguageMismatch,
    UserMasked,
    /// Not in the store, no local path, and downloads are not allowed
    NotCached,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::IncompatibleArch { required, found } => {
                write!(f, "architecture {} does not run on {}", found, required)
            }
            Rejection::StabilityTooLow { found, floor } => {
                write!(f, "stability {} is below the {} floor", found, floor)
            }
            Rejection::LanguageMismatch => write!(f, "no language in common with preferences"),
            Rejection::UserMasked => write!(f, "masked by user preferences"),
            Rejection::NotCached => write!(f, "not cached and downloads are disabled"),
        }
    }
}

/// Preference key; smaller sorts first. Field order is the whole
/// preference policy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    /// Implementations the user pinned come first
    not_user_preferred: bool,
    /// With restricted network use, cached beats uncached
    uncached_penalty: bool,
    stability: Reverse<Stability>,
    version: Reverse<Version>,
    /// Distance from the required CPU; native builds first
    arch_rank: u8,
    /// Index into the language preference list
    language_rank: usize,
}

/// One implementation paired with its source feed and suitability
#[derive(Debug, Clone)]
pub struct Candidate {
    pub implementation: Implementation,
    pub from_feed: InterfaceId,
    pub rejection: Option<Rejection>,
    key: OrderKey,
}

impl Candidate {
    pub fn is_suitable(&self) -> bool {
        self.rejection.is_none()
    }
}

/// The ordered candidates for one interface
#[derive(Debug, Clone)]
pub struct CandidateList {
    pub interface: InterfaceId,
    pub candidates: Vec<Candidate>,
}

impl CandidateList {
    pub fn suitable(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| c.is_suitable())
    }
}

/// The capabilities candidate enumeration draws on
pub struct CandidateEnumerator<'a> {
    pub provider: &'a dyn FeedProvider,
    pub prefs: &'a dyn PreferencesStore,
    pub store: &'a dyn Store,
    pub config: &'a Config,
}

impl<'a> CandidateEnumerator<'a> {
    /// Enumerate and order the candidates for `interface`.
    ///
    /// Fails with `FeedUnavailable` when the primary feed cannot be
    /// loaded; referenced feeds that fail are skipped with a warning.
    pub fn enumerate(
        &self,
        requirements: &Requirements,
        interface: &InterfaceId,
    ) -> Result<CandidateList> {
        let mut candidates = Vec::new();
        let mut visited = BTreeSet::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back((interface.clone(), true));

        while let Some((feed_id, primary)) = queue.pop_front() {
            if !visited.insert(feed_id.clone()) {
                continue;
            }
            let feed = match self.provider.get(&feed_id) {
                Ok(feed) => feed,
                Err(e) if primary => return Err(e),
                Err(e) => {
                    warn!("skipping referenced feed {}: {}", feed_id, e);
                    continue;
                }
            };

            self.check_freshness(&feed_id);

            for reference in &feed.feeds {
                // References declaring a foreign architecture cannot
                // contribute suitable candidates
                if let Some(arch) = &reference.arch {
                    if !requirements.arch.accepts(arch) {
                        continue;
                    }
                }
                queue.push_back((reference.source.clone(), false));
            }

            let iface_prefs = self.prefs.interface_prefs(interface);
            for implementation in feed.simplify()? {
                candidates.push(self.evaluate(
                    requirements,
                    implementation,
                    feed_id.clone(),
                    &iface_prefs,
                ));
            }
        }

        candidates.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(
            "{}: {} candidates, {} suitable",
            interface,
            candidates.len(),
            candidates.iter().filter(|c| c.is_suitable()).count()
        );
        Ok(CandidateList {
            interface: interface.clone(),
            candidates,
        })
    }

    fn check_freshness(&self, feed_id: &InterfaceId) {
        let prefs = self.prefs.feed_prefs(feed_id);
        let Some(last_checked) = prefs.last_checked else {
            return;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if now.saturating_sub(last_checked) > self.config.freshness_secs {
            warn!("feed {} is stale", feed_id);
        }
    }

    fn evaluate(
        &self,
        requirements: &Requirements,
        implementation: Implementation,
        from_feed: InterfaceId,
        prefs: &crate::provider::InterfacePreferences,
    ) -> Candidate {
        let user_rating = prefs.user_ratings.get(&implementation.id).copied();
        let effective_stability = user_rating.unwrap_or(implementation.stability);
        let floor = prefs
            .stability_policy
            .unwrap_or_else(|| self.config.stability_floor());

        let cached = implementation.local_path.is_some()
            || (!implementation.digest.is_empty() && self.store.contains(&implementation.digest));

        let rejection = if prefs.banned.contains(&implementation.id) {
            Some(Rejection::UserMasked)
        } else if !requirements.arch.accepts(&implementation.arch) {
            Some(Rejection::IncompatibleArch {
                required: requirements.arch.clone(),
                found: implementation.arch.clone(),
            })
        } else if effective_stability < floor {
            Some(Rejection::StabilityTooLow {
                found: effective_stability,
                floor,
            })
        } else if !languages_overlap(&requirements.languages, &implementation.languages) {
            Some(Rejection::LanguageMismatch)
        } else if !cached && !(self.config.may_download() && !implementation.retrieval.is_empty()) {
            Some(Rejection::NotCached)
        } else {
            None
        };

        let key = OrderKey {
            not_user_preferred: user_rating != Some(Stability::Preferred),
            uncached_penalty: self.config.network_use != NetworkUse::Full && !cached,
            stability: Reverse(effective_stability),
            version: Reverse(implementation.version.clone()),
            arch_rank: requirements.arch.cpu.rank_for(&implementation.arch.cpu),
            language_rank: language_rank(&requirements.languages, &implementation.languages),
        };

        Candidate {
            implementation,
            from_feed,
            rejection,
            key,
        }
    }
}

/// Primary-subtag comparison: `en-GB` and `en_US` overlap
fn primary_subtag(lang: &str) -> &str {
    lang.split(['-', '_']).next().unwrap_or(lang)
}

fn languages_overlap(wanted: &[String], offered: &[String]) -> bool {
    if wanted.is_empty() || offered.is_empty() {
        return true;
    }
    wanted.iter().any(|w| {
        offered
            .iter()
            .any(|o| primary_subtag(w) == primary_subtag(o))
    })
}

fn language_rank(wanted: &[String], offered: &[String]) -> usize {
    if wanted.is_empty() || offered.is_empty() {
        return 0;
    }
    wanted
        .iter()
        .position(|w| {
            offered
                .iter()
                .any(|o| primary_subtag(w) == primary_subtag(o))
        })
        .unwrap_or(usize::MAX)
}
