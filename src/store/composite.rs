// src/store/composite.rs

//! Chaining several stores behind one interface
//!
//! Reads scan the sub-stores in order (typically the user's store first,
//! then read-only system stores). Writes go to the first sub-store that
//! accepts them. `remove` removes from every sub-store containing the
//! entry, so a later lookup cannot resurrect a deleted implementation
//! from further down the chain.

use super::{ArchiveSource, Store};
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::manifest::ManifestDigest;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An ordered list of sub-stores acting as one
pub struct CompositeStore {
    stores: Vec<Box<dyn Store>>,
}

impl CompositeStore {
    pub fn new(stores: Vec<Box<dyn Store>>) -> Self {
        CompositeStore { stores }
    }

    pub fn stores(&self) -> &[Box<dyn Store>] {
        &self.stores
    }

    /// Run `op` against the first writable sub-store, falling through
    /// on authorization failures
    fn first_writable<F>(&self, mut op: F) -> Result<()>
    where
        F: FnMut(&dyn Store) -> Result<()>,
    {
        let mut last_refusal = None;
        for store in &self.stores {
            if !store.is_writable() {
                continue;
            }
            match op(store.as_ref()) {
                Err(Error::Unauthorized(reason)) => {
                    debug!("sub-store refused write: {}", reason);
                    last_refusal = Some(reason);
                }
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    debug!("sub-store refused write: {}", e);
                    last_refusal = Some(e.to_string());
                }
                other => return other,
            }
        }
        Err(Error::Unauthorized(
            last_refusal.unwrap_or_else(|| "no writable store".to_string()),
        ))
    }
}

impl Store for CompositeStore {
    fn contains(&self, digest: &ManifestDigest) -> bool {
        self.stores.iter().any(|s| s.contains(digest))
    }

    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        for store in &self.stores {
            if let Ok(path) = store.get_path(digest) {
                return Ok(path);
            }
        }
        Err(Error::NotStored(digest.to_string()))
    }

    fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        let mut union: Vec<ManifestDigest> = Vec::new();
        for store in &self.stores {
            for digest in store.list_all()? {
                if !union.contains(&digest) {
                    union.push(digest);
                }
            }
        }
        union.sort_by_key(|d| d.to_string());
        Ok(union)
    }

    fn add_directory(
        &self,
        source: &Path,
        expected: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<()> {
        self.first_writable(|store| store.add_directory(source, expected, handler))
    }

    fn add_archives(
        &self,
        archives: &[ArchiveSource],
        expected: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<()> {
        self.first_writable(|store| store.add_archives(archives, expected, handler))
    }

    fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        let mut removed_any = false;
        for store in &self.stores {
            match store.remove(digest) {
                Ok(()) => removed_any = true,
                Err(Error::NotStored(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if removed_any {
            Ok(())
        } else {
            Err(Error::NotStored(digest.to_string()))
        }
    }

    fn verify(&self, digest: &ManifestDigest, handler: &dyn Handler) -> Result<()> {
        for store in &self.stores {
            if store.contains(digest) {
                return store.verify(digest, handler);
            }
        }
        Err(Error::NotStored(digest.to_string()))
    }

    fn optimise(&self) -> Result<u64> {
        let mut saved = 0;
        for store in &self.stores {
            if store.is_writable() {
                saved += store.optimise()?;
            }
        }
        Ok(saved)
    }

    fn is_writable(&self) -> bool {
        self.stores.iter().any(|s| s.is_writable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::SilentHandler;
    use crate::manifest::{Algorithm, Manifest};
    use crate::store::DirectoryStore;
    use std::fs;
    use tempfile::TempDir;

    fn sample_digest(dir: &Path) -> ManifestDigest {
        Manifest::of_dir(dir, Algorithm::Sha256)
            .unwrap()
            .as_manifest_digest()
    }

    fn composite_of(roots: &[&Path]) -> CompositeStore {
        let stores = roots
            .iter()
            .map(|r| Box::new(DirectoryStore::new(*r).unwrap()) as Box<dyn Store>)
            .collect();
        CompositeStore::new(stores)
    }

    #[test]
    fn test_reads_scan_in_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();

        let source = TempDir::new().unwrap();
        fs::write(source.path().join("f"), b"content").unwrap();
        let digest = sample_digest(source.path());

        // Entry lives only in the second store
        DirectoryStore::new(second.path())
            .unwrap()
            .add_directory(source.path(), &digest, &SilentHandler::new())
            .unwrap();

        let composite = composite_of(&[first.path(), second.path()]);
        assert!(composite.contains(&digest));
        let path = composite.get_path(&digest).unwrap();
        assert!(path.starts_with(second.path()));
    }

    #[test]
    fn test_writes_go_to_first_store() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let composite = composite_of(&[first.path(), second.path()]);

        let source = TempDir::new().unwrap();
        fs::write(source.path().join("f"), b"content").unwrap();
        let digest = sample_digest(source.path());

        composite
            .add_directory(source.path(), &digest, &SilentHandler::new())
            .unwrap();

        assert!(DirectoryStore::new(first.path()).unwrap().contains(&digest));
        assert!(!DirectoryStore::new(second.path()).unwrap().contains(&digest));
    }

    #[test]
    fn test_list_all_unions_without_duplicates() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();

        let source = TempDir::new().unwrap();
        fs::write(source.path().join("f"), b"content").unwrap();
        let digest = sample_digest(source.path());

        for root in [first.path(), second.path()] {
            DirectoryStore::new(root)
                .unwrap()
                .add_directory(source.path(), &digest, &SilentHandler::new())
                .unwrap();
        }

        let composite = composite_of(&[first.path(), second.path()]);
        assert_eq!(composite.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_removes_everywhere() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();

        let source = TempDir::new().unwrap();
        fs::write(source.path().join("f"), b"content").unwrap();
        let digest = sample_digest(source.path());

        for root in [first.path(), second.path()] {
            DirectoryStore::new(root)
                .unwrap()
                .add_directory(source.path(), &digest, &SilentHandler::new())
                .unwrap();
        }

        let composite = composite_of(&[first.path(), second.path()]);
        composite.remove(&digest).unwrap();
        assert!(!composite.contains(&digest));
        assert!(matches!(
            composite.remove(&digest),
            Err(Error::NotStored(_))
        ));
    }

    #[test]
    fn test_empty_composite_is_unwritable() {
        let composite = CompositeStore::new(Vec::new());
        assert!(!composite.is_writable());

        let source = TempDir::new().unwrap();
        fs::write(source.path().join("f"), b"x").unwrap();
        let digest = sample_digest(source.path());
        assert!(matches!(
            composite.add_directory(source.path(), &digest, &SilentHandler::new()),
            Err(Error::Unauthorized(_))
        ));
    }
}
