// src/store/optimise.rs

//! Hardlink deduplication across store entries
//!
//! Entries are immutable, so two files with identical content, size and
//! executable bit can safely share an inode. The walk groups candidate
//! files by a content key, then swaps duplicates for hardlinks via a
//! temp link and an atomic rename. Entry directories are sealed
//! read-only; each parent is made writable for the swap and resealed
//! afterwards.

use super::{DirectoryStore, Store};
use crate::error::Result;
use crate::manifest::Algorithm;
use std::path::Path;
use tracing::{debug, info};

/// Files smaller than this are not worth an inode's bookkeeping
const MIN_SIZE: u64 = 1;

#[cfg(unix)]
pub fn optimise_store(store: &DirectoryStore) -> Result<u64> {
    use crate::manifest::MANIFEST_FILE;
    use std::collections::HashMap;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    // Manifests record mtimes, and hardlinked files share one inode and
    // therefore one mtime, so the mtime is part of the identity here.
    // Content key -> (canonical path, device, inode)
    let mut seen: HashMap<(String, u64, i64, bool), (std::path::PathBuf, u64, u64)> =
        HashMap::new();
    let mut saved = 0u64;

    for digest in store.list_all()? {
        let entry_root = store.get_path(&digest)?;
        for file in walkdir::WalkDir::new(&entry_root) {
            let file = file.map_err(super::io_from_walkdir)?;
            if !file.file_type().is_file() {
                continue;
            }
            if file.file_name().to_str() == Some(MANIFEST_FILE) {
                continue;
            }
            let metadata = file.metadata().map_err(super::io_from_walkdir)?;
            if metadata.len() < MIN_SIZE {
                continue;
            }

            let executable = metadata.permissions().mode() & 0o111 != 0;
            let hash = hash_file(file.path())?;
            let key = (hash, metadata.len(), metadata.mtime(), executable);

            match seen.get(&key) {
                None => {
                    seen.insert(key, (file.path().to_path_buf(), metadata.dev(), metadata.ino()));
                }
                Some((canonical, dev, ino)) => {
                    if metadata.dev() == *dev && metadata.ino() == *ino {
                        // Already linked from an earlier optimise run
                        continue;
                    }
                    link_over(canonical, file.path())?;
                    saved += metadata.len();
                    debug!("linked {:?} to {:?}", file.path(), canonical);
                }
            }
        }
    }

    if saved > 0 {
        info!("optimise reclaimed {} bytes", saved);
    }
    Ok(saved)
}

#[cfg(not(unix))]
pub fn optimise_store(_store: &DirectoryStore) -> Result<u64> {
    Ok(0)
}

/// Replace `duplicate` with a hardlink to `canonical` without a window
/// where the path is missing
#[cfg(unix)]
fn link_over(canonical: &Path, duplicate: &Path) -> Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let parent = duplicate.parent().expect("store files have parents");
    let parent_mode = fs::metadata(parent)?.permissions().mode() & 0o777;

    fs::set_permissions(parent, fs::Permissions::from_mode(0o755))?;
    let result = (|| -> Result<()> {
        let temp = parent.join(format!(".opt-{}", std::process::id()));
        fs::hard_link(canonical, &temp)?;
        if let Err(e) = fs::rename(&temp, duplicate) {
            fs::remove_file(&temp).ok();
            return Err(e.into());
        }
        Ok(())
    })();
    fs::set_permissions(parent, fs::Permissions::from_mode(parent_mode))?;
    result
}

#[cfg(unix)]
fn hash_file(path: &Path) -> Result<String> {
    use crate::manifest::Hasher;
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Hasher::new(Algorithm::Sha256);
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize())
}
