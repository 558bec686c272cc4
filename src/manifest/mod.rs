// src/manifest/mod.rs

//! Deterministic directory-tree fingerprints
//!
//! A manifest is a canonical text rendering of a directory tree: one line
//! per file, symlink or directory, in depth-first order with the plain
//! entries of each directory listed (sorted) before its subdirectories
//! are descended into. Hashing the rendered text with the manifest's own
//! algorithm yields the tree's digest, which doubles as the directory
//! name inside the implementation store.
//!
//! Line forms:
//!
//! ```text
//! F <hash> <mtime> <size> <name>     regular file
//! X <hash> <mtime> <size> <name>     executable file
//! S <hash> <size> <name>             symlink (hash of the target text)
//! D /<path>                          directory
//! ```
//!
//! Two directories with equal canonical content produce byte-identical
//! manifests and therefore equal digests.

use crate::error::{Error, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::UNIX_EPOCH;

/// Name of the sidecar file a store writes next to a sealed entry.
/// Skipped when present at the top level of a tree being manifested.
pub const MANIFEST_FILE: &str = ".manifest";

/// Digest algorithm for manifests
///
/// Ordered by preference: when a digest carries several algorithm
/// entries, the highest one is used for store lookups first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    /// SHA-1 digest, hex rendering
    Sha1New,
    /// SHA-256 digest, hex rendering
    Sha256,
    /// SHA-256 digest, unpadded base32 rendering
    Sha256New,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Sha1New, Algorithm::Sha256, Algorithm::Sha256New];

    pub const fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha1New => "sha1new",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha256New => "sha256new",
        }
    }

    /// Hash `data` and render per this algorithm's convention
    pub fn hash_bytes(&self, data: &[u8]) -> String {
        let mut hasher = Hasher::new(*self);
        hasher.update(data);
        hasher.finalize()
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha1new" => Ok(Algorithm::Sha1New),
            "sha256" => Ok(Algorithm::Sha256),
            "sha256new" => Ok(Algorithm::Sha256New),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Incremental hasher producing the algorithm's rendered digest string
pub struct Hasher {
    algorithm: Algorithm,
    state: HasherState,
}

enum HasherState {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(algorithm: Algorithm) -> Self {
        let state = match algorithm {
            Algorithm::Sha1New => HasherState::Sha1(Sha1::new()),
            Algorithm::Sha256 | Algorithm::Sha256New => HasherState::Sha256(Sha256::new()),
        };
        Hasher { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha1(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> String {
        match (self.algorithm, self.state) {
            (_, HasherState::Sha1(h)) => format!("{:x}", h.finalize()),
            (Algorithm::Sha256New, HasherState::Sha256(h)) => base32_nopad(&h.finalize()),
            (_, HasherState::Sha256(h)) => format!("{:x}", h.finalize()),
        }
    }
}

/// RFC 4648 base32 without padding; sha256new digests render this way
fn base32_nopad(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut out = String::with_capacity(bytes.len() * 8 / 5 + 1);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;
    for &b in bytes {
        buffer = (buffer << 8) | u64::from(b);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 31) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 31) as usize] as char);
    }
    out
}

/// One line of a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    File {
        executable: bool,
        hash: String,
        mtime: u64,
        size: u64,
        name: String,
    },
    Symlink {
        hash: String,
        size: u64,
        name: String,
    },
    Dir {
        /// Absolute within the tree, `/sub/dir`
        path: String,
    },
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestEntry::File {
                executable,
                hash,
                mtime,
                size,
                name,
            } => {
                let tag = if *executable { 'X' } else { 'F' };
                write!(f, "{} {} {} {} {}", tag, hash, mtime, size, name)
            }
            ManifestEntry::Symlink { hash, size, name } => {
                write!(f, "S {} {} {}", hash, size, name)
            }
            ManifestEntry::Dir { path } => write!(f, "D {}", path),
        }
    }
}

/// The canonical fingerprint of one directory tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    algorithm: Algorithm,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Walk `dir` and build its manifest under `algorithm`.
    ///
    /// Fails with `InvalidManifest` on entries a manifest cannot
    /// describe: special files, names containing newlines, mtimes
    /// before the epoch.
    pub fn of_dir(dir: &Path, algorithm: Algorithm) -> Result<Manifest> {
        let mut entries = Vec::new();
        scan_dir(dir, "", algorithm, true, &mut entries)?;
        Ok(Manifest { algorithm, entries })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// The canonical text form: one line per entry, `\n`-terminated
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    /// Digest of the rendered manifest, in this algorithm's rendering
    pub fn digest(&self) -> String {
        self.algorithm.hash_bytes(self.render().as_bytes())
    }

    /// The digest as a one-entry [`ManifestDigest`]
    pub fn as_manifest_digest(&self) -> ManifestDigest {
        let mut digest = ManifestDigest::new();
        digest.insert(self.algorithm, self.digest());
        digest
    }
}

fn bad(entry: &Path, what: &str) -> Error {
    Error::InvalidManifest(format!("{}: {}", entry.display(), what))
}

fn entry_name(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .ok_or_else(|| bad(path, "nameless entry"))?
        .to_str()
        .ok_or_else(|| bad(path, "name is not valid UTF-8"))?;
    if name.contains('\n') {
        return Err(bad(path, "newline in name"));
    }
    Ok(name.to_string())
}

fn mtime_secs(path: &Path, metadata: &fs::Metadata) -> Result<u64> {
    let modified = metadata.modified()?;
    let duration = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|_| bad(path, "mtime is before the epoch"))?;
    // Sub-second precision is discarded; whole seconds must be present
    Ok(duration.as_secs())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

fn hash_file(path: &Path, algorithm: Algorithm) -> Result<String> {
    use std::io::Read;
    let mut file = fs::File::open(path)?;
    let mut hasher = Hasher::new(algorithm);
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

/// Emit the plain entries of one directory (sorted), then descend into
/// its subdirectories (sorted). `prefix` is the tree-absolute path of
/// `dir` without a leading slash, empty at the root.
fn scan_dir(
    dir: &Path,
    prefix: &str,
    algorithm: Algorithm,
    is_root: bool,
    out: &mut Vec<ManifestEntry>,
) -> Result<()> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        names.push(entry_name(&entry?.path())?);
    }
    names.sort();

    let mut subdirs = Vec::new();
    for name in names {
        if is_root && name == MANIFEST_FILE {
            continue;
        }
        let path = dir.join(&name);
        let metadata = fs::symlink_metadata(&path)?;
        let file_type = metadata.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(&path)?;
            let target = target
                .to_str()
                .ok_or_else(|| bad(&path, "symlink target is not valid UTF-8"))?;
            out.push(ManifestEntry::Symlink {
                hash: algorithm.hash_bytes(target.as_bytes()),
                size: target.len() as u64,
                name,
            });
        } else if file_type.is_dir() {
            subdirs.push(name);
        } else if file_type.is_file() {
            out.push(ManifestEntry::File {
                executable: is_executable(&metadata),
                hash: hash_file(&path, algorithm)?,
                mtime: mtime_secs(&path, &metadata)?,
                size: metadata.len(),
                name,
            });
        } else {
            return Err(bad(&path, "special file cannot be stored"));
        }
    }

    for name in subdirs {
        let sub_prefix = format!("{}/{}", prefix, name);
        out.push(ManifestEntry::Dir {
            path: sub_prefix.clone(),
        });
        scan_dir(&dir.join(&name), &sub_prefix, algorithm, false, out)?;
    }
    Ok(())
}

/// A set of algorithm-tagged digests identifying one implementation
///
/// Feeds may publish several digests for the same tree. Two digest sets
/// refer to the same implementation when they share at least one
/// `algorithm=value` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDigest {
    digests: BTreeMap<Algorithm, String>,
}

impl ManifestDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-entry convenience constructor
    pub fn of(algorithm: Algorithm, value: impl Into<String>) -> Self {
        let mut digest = Self::new();
        digest.insert(algorithm, value);
        digest
    }

    pub fn insert(&mut self, algorithm: Algorithm, value: impl Into<String>) {
        self.digests.insert(algorithm, value.into());
    }

    pub fn get(&self, algorithm: Algorithm) -> Option<&str> {
        self.digests.get(&algorithm).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// The preferred entry: the strongest algorithm present
    pub fn best(&self) -> Option<(Algorithm, &str)> {
        self.digests
            .iter()
            .next_back()
            .map(|(a, v)| (*a, v.as_str()))
    }

    /// Entries as store directory names, strongest algorithm first
    pub fn store_names(&self) -> impl Iterator<Item = String> + '_ {
        self.digests
            .iter()
            .rev()
            .map(|(a, v)| format!("{}={}", a.name(), v))
    }

    /// True when the two sets share at least one algorithm+value pair
    pub fn partially_matches(&self, other: &ManifestDigest) -> bool {
        self.digests
            .iter()
            .any(|(a, v)| other.digests.get(a) == Some(v))
    }
}

impl FromStr for ManifestDigest {
    type Err = Error;

    /// Parse a single `algorithm=value` pair
    fn from_str(s: &str) -> Result<Self> {
        let (algo, value) = s
            .split_once('=')
            .ok_or_else(|| Error::UnsupportedAlgorithm(s.to_string()))?;
        if value.is_empty() {
            return Err(Error::UnsupportedAlgorithm(s.to_string()));
        }
        Ok(ManifestDigest::of(algo.parse::<Algorithm>()?, value))
    }
}

impl fmt::Display for ManifestDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for name in self.store_names() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", name)?;
            first = false;
        }
        Ok(())
    }
}
