// tests/common/mod.rs

//! Shared fixtures for integration tests: small in-memory feed worlds
//! and a solver wired to a throwaway store.

use tempfile::TempDir;
use zeroinst::{
    Architecture, Command, Config, Dependency, Element, Feed, ImplementationElement, InterfaceId,
    MemoryPreferences, Requirements, Result, Selections, SilentHandler, Solver,
    StaticFeedProvider, DirectoryStore,
};

pub fn iface(s: &str) -> InterfaceId {
    s.parse().unwrap()
}

/// A runnable implementation with a local path, so it is always
/// considered cached
pub fn runnable(id: &str, version: &str, arch: &str) -> ImplementationElement {
    let mut element = ImplementationElement::new(id);
    element.version = Some(version.parse().unwrap());
    element.arch = Some(arch.parse().unwrap());
    element.local_path = Some("/opt/impl".into());
    let mut run = Command::new("run");
    run.path = Some("bin/run".to_string());
    element.commands.push(run);
    element
}

/// A library implementation (no command)
pub fn library(id: &str, version: &str) -> ImplementationElement {
    let mut element = ImplementationElement::new(id);
    element.version = Some(version.parse().unwrap());
    element.arch = Some(Architecture::any());
    element.local_path = Some("/opt/impl".into());
    element
}

/// Attach a version-bounded dependency to an implementation element
pub fn depends(element: &mut ImplementationElement, on: &InterfaceId, range: Option<&str>) {
    let mut dep = Dependency::new(on.clone());
    dep.version = range.map(|r| r.parse().unwrap());
    element.dependencies.push(dep);
}

pub fn feed_of(url: &InterfaceId, elements: Vec<ImplementationElement>) -> Feed {
    let mut feed = Feed::new(url.clone(), "fixture");
    for element in elements {
        feed.elements.push(Element::Implementation(element));
    }
    feed
}

/// A complete solver environment over an in-memory feed set
pub struct World {
    pub provider: StaticFeedProvider,
    pub prefs: MemoryPreferences,
    pub config: Config,
    store_dir: TempDir,
}

impl World {
    pub fn new(feeds: Vec<Feed>) -> Self {
        let mut provider = StaticFeedProvider::new();
        for feed in feeds {
            provider.insert(feed);
        }
        World {
            provider,
            prefs: MemoryPreferences::new(),
            config: Config::default(),
            store_dir: TempDir::new().unwrap(),
        }
    }

    pub fn solve(&self, requirements: &Requirements) -> Result<Selections> {
        let store = DirectoryStore::new(self.store_dir.path()).unwrap();
        let handler = SilentHandler::new();
        let solver = Solver {
            provider: &self.provider,
            prefs: &self.prefs,
            store: &store,
            config: &self.config,
            handler: &handler,
        };
        solver.solve(requirements)
    }
}

pub fn version_of(selections: &Selections, interface: &InterfaceId) -> String {
    selections.find(interface).unwrap().version.to_string()
}
