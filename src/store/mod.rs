// src/store/mod.rs

//! Content-addressed cache of extracted implementations
//!
//! Each entry is a directory named `algorithm=value`, where re-running
//! the named manifest algorithm over the directory's content reproduces
//! exactly that value. Entries are write-once: a new implementation is
//! staged in a temp directory on the same filesystem, verified against
//! its expected digest, renamed into place and then sealed read-only.
//! A rename collision means another writer published the same digest
//! first; the staged copy is discarded and the operation succeeds.
//!
//! Multiple processes may read concurrently without coordination.
//! `remove` and `optimise` take the store's advisory lock.

pub mod archive;
pub mod composite;
pub mod lock;
mod optimise;

pub use archive::ArchiveSource;
pub use composite::CompositeStore;

use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::manifest::{Algorithm, Manifest, ManifestDigest, MANIFEST_FILE};
use lock::StoreLock;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Cache of implementation directories keyed by manifest digest
pub trait Store: Send + Sync {
    /// True iff at least one algorithm entry of `digest` resolves to a
    /// stored directory
    fn contains(&self, digest: &ManifestDigest) -> bool;

    /// Directory of the first matching entry; `NotStored` if none
    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf>;

    /// Every entry whose directory name parses as `algorithm=value`,
    /// in stable (sorted) order
    fn list_all(&self) -> Result<Vec<ManifestDigest>>;

    /// Atomically adopt a copy of `source` under the name derived from
    /// `expected`
    fn add_directory(
        &self,
        source: &Path,
        expected: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<()>;

    /// Stage a directory by extracting `archives` in order, then adopt
    /// it like `add_directory`
    fn add_archives(
        &self,
        archives: &[ArchiveSource],
        expected: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<()>;

    /// Delete the entry identified by `digest`; `NotStored` if absent
    fn remove(&self, digest: &ManifestDigest) -> Result<()>;

    /// Re-manifest the entry and compare against its name
    fn verify(&self, digest: &ManifestDigest, handler: &dyn Handler) -> Result<()>;

    /// Hardlink-deduplicate identical files across entries; returns
    /// bytes saved
    fn optimise(&self) -> Result<u64>;

    /// Whether `add_directory` can be expected to succeed here
    fn is_writable(&self) -> bool;
}

/// A store rooted at one local directory
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open a store, creating the root directory if missing
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)?;
            debug!("created store root {:?}", root);
        }
        Ok(DirectoryStore { root })
    }

    /// Open an existing store without creating anything; useful for
    /// read-only system stores in a composite
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("store root {:?} does not exist", root),
            )));
        }
        Ok(DirectoryStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The existing entry directory for `digest`, if any, trying the
    /// strongest algorithm first
    fn find_entry(&self, digest: &ManifestDigest) -> Option<PathBuf> {
        for name in digest.store_names() {
            let path = self.root.join(&name);
            if path.is_dir() {
                return Some(path);
            }
        }
        None
    }

    /// Allocate a fresh staging directory inside the store root.
    ///
    /// Staging on the store's own filesystem is what makes the final
    /// rename atomic. A privileged daemon hands this directory to the
    /// calling user for population, then calls [`adopt_staged`] which
    /// re-verifies before publication.
    ///
    /// [`adopt_staged`]: DirectoryStore::adopt_staged
    pub fn begin_staging(&self) -> Result<tempfile::TempDir> {
        let staged = tempfile::Builder::new()
            .prefix(&format!("tmp-{}-", std::process::id()))
            .tempdir_in(&self.root)?;
        Ok(staged)
    }

    /// Verify a populated staging directory against `expected`, then
    /// publish it. Consumes the staging directory either way: on digest
    /// mismatch it is deleted, on rename collision the other writer's
    /// copy wins and this one is discarded.
    pub fn adopt_staged(
        &self,
        staged: tempfile::TempDir,
        expected: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<()> {
        let (algorithm, expected_value) = expected
            .best()
            .ok_or_else(|| Error::InvalidManifest("empty digest set".to_string()))?;
        let expected_value = expected_value.to_string();

        let mut manifest = None;
        handler.run_task("computing manifest", &mut || {
            manifest = Some(Manifest::of_dir(staged.path(), algorithm)?);
            Ok(())
        })?;
        let manifest = manifest.expect("task ran");

        let computed = manifest.digest();
        if computed != expected_value {
            let name = format!("{}={}", algorithm.name(), expected_value);
            warn!("digest mismatch while adding {}: computed {}", name, computed);
            // TempDir drop removes the staged data
            return Err(Error::DigestMismatch {
                expected: name,
                computed: format!("{}={}", algorithm.name(), computed),
            });
        }

        fs::write(staged.path().join(MANIFEST_FILE), manifest.render())?;

        let final_name = format!("{}={}", algorithm.name(), expected_value);
        let final_path = self.root.join(&final_name);
        if final_path.is_dir() {
            debug!("{} already stored, discarding staged copy", final_name);
            return Ok(());
        }

        let staged_path = staged.keep();
        match fs::rename(&staged_path, &final_path) {
            Ok(()) => {}
            Err(e) => {
                // Collision: another process published this digest
                // between our check and our rename
                if final_path.is_dir() {
                    debug!("{} appeared concurrently, discarding staged copy", final_name);
                    fs::remove_dir_all(&staged_path)?;
                    return Ok(());
                }
                fs::remove_dir_all(&staged_path).ok();
                return Err(e.into());
            }
        }

        seal_tree(&final_path)?;
        info!("stored {}", final_name);
        Ok(())
    }
}

impl Store for DirectoryStore {
    fn contains(&self, digest: &ManifestDigest) -> bool {
        self.find_entry(digest).is_some()
    }

    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        self.find_entry(digest)
            .ok_or_else(|| Error::NotStored(digest.to_string()))
    }

    fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Staging directories and other clutter do not parse
            if let Ok(digest) = name.parse::<ManifestDigest>() {
                entries.push(digest);
            }
        }
        entries.sort_by_key(|d| d.to_string());
        Ok(entries)
    }

    fn add_directory(
        &self,
        source: &Path,
        expected: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<()> {
        if self.contains(expected) {
            debug!("{} already stored", expected);
            return Ok(());
        }
        let staged = self.begin_staging()?;
        handler.run_task("copying directory", &mut || {
            copy_tree(source, staged.path())
        })?;
        self.adopt_staged(staged, expected, handler)
    }

    fn add_archives(
        &self,
        archives: &[ArchiveSource],
        expected: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<()> {
        if self.contains(expected) {
            debug!("{} already stored", expected);
            return Ok(());
        }
        let staged = self.begin_staging()?;
        for source in archives {
            handler.run_task("extracting archive", &mut || {
                archive::extract_archive(source, staged.path())
            })?;
        }
        self.adopt_staged(staged, expected, handler)
    }

    fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        let _lock = StoreLock::acquire(&self.root)?;
        let path = self
            .find_entry(digest)
            .ok_or_else(|| Error::NotStored(digest.to_string()))?;
        // Sealed entries are read-only; re-enable writes for deletion
        unseal_tree(&path)?;
        fs::remove_dir_all(&path)?;
        info!("removed {:?}", path.file_name().unwrap_or_default());
        Ok(())
    }

    fn verify(&self, digest: &ManifestDigest, handler: &dyn Handler) -> Result<()> {
        let path = self
            .find_entry(digest)
            .ok_or_else(|| Error::NotStored(digest.to_string()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let stored: ManifestDigest = name.parse()?;
        let (algorithm, expected_value) = stored.best().expect("parsed entry name");
        let expected_value = expected_value.to_string();

        let mut manifest = None;
        handler.run_task("verifying", &mut || {
            manifest = Some(Manifest::of_dir(&path, algorithm)?);
            Ok(())
        })?;
        let manifest = manifest.expect("task ran");

        let computed = manifest.digest();
        if computed != expected_value {
            return Err(Error::DigestMismatch {
                expected: name,
                computed: format!("{}={}", algorithm.name(), computed),
            });
        }

        // The sidecar is advisory; the digest comparison above is
        // authoritative
        let sidecar = path.join(MANIFEST_FILE);
        if sidecar.is_file() && fs::read_to_string(&sidecar)? != manifest.render() {
            warn!("{}: .manifest sidecar does not match content", name);
        }
        Ok(())
    }

    fn optimise(&self) -> Result<u64> {
        let _lock = StoreLock::acquire(&self.root)?;
        optimise::optimise_store(self)
    }

    fn is_writable(&self) -> bool {
        !fs::metadata(&self.root)
            .map(|m| m.permissions().readonly())
            .unwrap_or(true)
    }
}

/// Copy a tree preserving symlinks, permissions and file mtimes.
/// Manifests include mtimes, so a copy that loses them would change the
/// digest.
fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&from)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &to)?;
            #[cfg(not(unix))]
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("cannot copy symlink {:?}", from),
            )));
        } else if file_type.is_dir() {
            fs::create_dir(&to)?;
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
            let mtime = entry.metadata()?.modified()?;
            let dest_file = fs::File::options().write(true).open(&to)?;
            dest_file.set_modified(mtime)?;
        }
    }
    Ok(())
}

/// Make an entry and its contents read-only: files 0444 (0555 when
/// executable), directories 0555.
#[cfg(unix)]
fn seal_tree(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(io_from_walkdir)?;
        if entry.path_is_symlink() {
            continue;
        }
        let metadata = entry.metadata().map_err(io_from_walkdir)?;
        let mode = if metadata.is_dir() {
            0o555
        } else if metadata.permissions().mode() & 0o111 != 0 {
            0o555
        } else {
            0o444
        };
        fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn seal_tree(path: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(io_from_walkdir)?;
        let metadata = entry.metadata().map_err(io_from_walkdir)?;
        if metadata.is_file() {
            let mut perms = metadata.permissions();
            perms.set_readonly(true);
            fs::set_permissions(entry.path(), perms)?;
        }
    }
    Ok(())
}

/// Undo [`seal_tree`] far enough that the tree can be deleted or
/// rewritten
#[cfg(unix)]
pub(crate) fn unseal_tree(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(io_from_walkdir)?;
        if entry.path_is_symlink() {
            continue;
        }
        if entry.metadata().map_err(io_from_walkdir)?.is_dir() {
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o755))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn unseal_tree(path: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(io_from_walkdir)?;
        let metadata = entry.metadata().map_err(io_from_walkdir)?;
        let mut perms = metadata.permissions();
        perms.set_readonly(false);
        fs::set_permissions(entry.path(), perms)?;
    }
    Ok(())
}

fn io_from_walkdir(e: walkdir::Error) -> Error {
    match e.into_io_error() {
        Some(io) => Error::Io(io),
        None => Error::Io(std::io::Error::other("walk error")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::SilentHandler;
    use std::io::Write;
    use tempfile::TempDir;

    fn populate_sample(dir: &Path) {
        let mut f = fs::File::create(dir.join("data.txt")).unwrap();
        f.write_all(b"sample payload").unwrap();
        fs::create_dir(dir.join("bin")).unwrap();
        let mut f = fs::File::create(dir.join("bin/run")).unwrap();
        f.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir.join("bin/run"), fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    fn digest_of(dir: &Path, algorithm: Algorithm) -> ManifestDigest {
        Manifest::of_dir(dir, algorithm)
            .unwrap()
            .as_manifest_digest()
    }

    #[test]
    fn test_add_then_get_roundtrip() {
        let source = TempDir::new().unwrap();
        populate_sample(source.path());
        let digest = digest_of(source.path(), Algorithm::Sha256);

        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path().join("store")).unwrap();
        let handler = SilentHandler::new();

        store
            .add_directory(source.path(), &digest, &handler)
            .unwrap();
        assert!(store.contains(&digest));

        let stored = store.get_path(&digest).unwrap();
        let roundtrip = Manifest::of_dir(&stored, Algorithm::Sha256).unwrap();
        let original = Manifest::of_dir(source.path(), Algorithm::Sha256).unwrap();
        assert_eq!(roundtrip.render(), original.render());
    }

    #[test]
    fn test_add_writes_manifest_sidecar() {
        let source = TempDir::new().unwrap();
        populate_sample(source.path());
        let digest = digest_of(source.path(), Algorithm::Sha256);

        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path()).unwrap();
        store
            .add_directory(source.path(), &digest, &SilentHandler::new())
            .unwrap();

        let sidecar = store.get_path(&digest).unwrap().join(MANIFEST_FILE);
        let stored = fs::read_to_string(sidecar).unwrap();
        let original = Manifest::of_dir(source.path(), Algorithm::Sha256).unwrap();
        assert_eq!(stored, original.render());
    }

    #[test]
    fn test_add_is_idempotent() {
        let source = TempDir::new().unwrap();
        populate_sample(source.path());
        let digest = digest_of(source.path(), Algorithm::Sha256);

        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path()).unwrap();
        let handler = SilentHandler::new();

        store.add_directory(source.path(), &digest, &handler).unwrap();
        store.add_directory(source.path(), &digest, &handler).unwrap();
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_digest_mismatch_leaves_no_entry() {
        let source = TempDir::new().unwrap();
        populate_sample(source.path());

        let lie = ManifestDigest::of(Algorithm::Sha256, "0".repeat(64));
        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path()).unwrap();

        let result = store.add_directory(source.path(), &lie, &SilentHandler::new());
        assert!(matches!(result, Err(Error::DigestMismatch { .. })));

        // No entry and no leftover staging directory contents to adopt
        assert!(store.list_all().unwrap().is_empty());
        assert!(!store.contains(&lie));
    }

    #[test]
    fn test_get_path_missing() {
        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path()).unwrap();
        let digest = ManifestDigest::of(Algorithm::Sha256, "f".repeat(64));
        assert!(matches!(
            store.get_path(&digest),
            Err(Error::NotStored(_))
        ));
    }

    #[test]
    fn test_contains_partial_match() {
        let source = TempDir::new().unwrap();
        populate_sample(source.path());
        let digest = digest_of(source.path(), Algorithm::Sha256);

        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path()).unwrap();
        store
            .add_directory(source.path(), &digest, &SilentHandler::new())
            .unwrap();

        // A digest set with several entries matches if any one is stored
        let mut multi = ManifestDigest::of(Algorithm::Sha1New, "0".repeat(40));
        multi.insert(
            Algorithm::Sha256,
            digest.get(Algorithm::Sha256).unwrap().to_string(),
        );
        assert!(store.contains(&multi));
    }

    #[test]
    fn test_list_all_skips_clutter() {
        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path()).unwrap();
        fs::create_dir(root.path().join("tmp-123-abc")).unwrap();
        fs::write(root.path().join(".lock"), b"").unwrap();

        let source = TempDir::new().unwrap();
        populate_sample(source.path());
        let digest = digest_of(source.path(), Algorithm::Sha256New);
        store
            .add_directory(source.path(), &digest, &SilentHandler::new())
            .unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].partially_matches(&digest));
    }

    #[test]
    fn test_remove() {
        let source = TempDir::new().unwrap();
        populate_sample(source.path());
        let digest = digest_of(source.path(), Algorithm::Sha256);

        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path()).unwrap();
        store
            .add_directory(source.path(), &digest, &SilentHandler::new())
            .unwrap();

        store.remove(&digest).unwrap();
        assert!(!store.contains(&digest));
        assert!(matches!(store.remove(&digest), Err(Error::NotStored(_))));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let source = TempDir::new().unwrap();
        populate_sample(source.path());
        let digest = digest_of(source.path(), Algorithm::Sha256);

        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path()).unwrap();
        let handler = SilentHandler::new();
        store.add_directory(source.path(), &digest, &handler).unwrap();

        store.verify(&digest, &handler).unwrap();

        // Corrupt the entry behind the store's back
        let entry = store.get_path(&digest).unwrap();
        unseal_tree(&entry).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(
                entry.join("data.txt"),
                fs::Permissions::from_mode(0o644),
            )
            .unwrap();
        }
        fs::write(entry.join("data.txt"), b"tampered").unwrap();

        assert!(matches!(
            store.verify(&digest, &handler),
            Err(Error::DigestMismatch { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_entries_are_sealed_read_only() {
        use std::os::unix::fs::PermissionsExt;
        let source = TempDir::new().unwrap();
        populate_sample(source.path());
        let digest = digest_of(source.path(), Algorithm::Sha256);

        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path()).unwrap();
        store
            .add_directory(source.path(), &digest, &SilentHandler::new())
            .unwrap();

        let entry = store.get_path(&digest).unwrap();
        let dir_mode = fs::metadata(&entry).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o555);
        let file_mode = fs::metadata(entry.join("data.txt")).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o444);
        let exec_mode = fs::metadata(entry.join("bin/run")).unwrap().permissions().mode() & 0o777;
        assert_eq!(exec_mode, 0o555);
    }

    #[test]
    fn test_add_archives() {
        let tmp = TempDir::new().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_mtime(1_600_000_000);
        header.set_cksum();
        builder
            .append_data(&mut header, "greeting", &b"hello"[..])
            .unwrap();
        let tar_path = tmp.path().join("impl.tar");
        fs::write(&tar_path, builder.into_inner().unwrap()).unwrap();

        // Learn the digest by extracting once by hand
        let preview = TempDir::new().unwrap();
        archive::extract_archive(&ArchiveSource::new(&tar_path), preview.path()).unwrap();
        let digest = digest_of(preview.path(), Algorithm::Sha256);

        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path()).unwrap();
        store
            .add_archives(
                &[ArchiveSource::new(&tar_path)],
                &digest,
                &SilentHandler::new(),
            )
            .unwrap();

        let entry = store.get_path(&digest).unwrap();
        assert_eq!(fs::read(entry.join("greeting")).unwrap(), b"hello");
    }
}
