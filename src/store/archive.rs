// src/store/archive.rs

//! Archive extraction into a staging directory
//!
//! Retrieval methods describe one or more archives that together
//! populate an implementation directory: each has an optional byte
//! offset (for self-extracting headers), an optional subdirectory of
//! the archive to take, and an optional destination subdirectory.
//! Entry names come from untrusted feeds, so every path is sanitized
//! before it touches the filesystem.
//!
//! Supported archive families: plain tar and gzip-compressed tar.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;

/// One archive of a retrieval method, in extraction order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    pub path: PathBuf,
    /// MIME type; guessed from the file name when absent
    pub mime_type: Option<String>,
    /// Subdirectory of the archive to extract, rest is ignored
    pub extract: Option<String>,
    /// Subdirectory of the implementation to extract into
    pub dest: Option<String>,
    /// Bytes to skip before the archive data starts
    pub start_offset: u64,
}

impl ArchiveSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ArchiveSource {
            path: path.into(),
            mime_type: None,
            extract: None,
            dest: None,
            start_offset: 0,
        }
    }

    fn effective_mime(&self) -> Result<&'static str> {
        if let Some(mime) = &self.mime_type {
            return match mime.as_str() {
                "application/x-tar" => Ok("application/x-tar"),
                "application/x-compressed-tar" => Ok("application/x-compressed-tar"),
                other => Err(Error::Extract(format!("unsupported mime type '{}'", other))),
            };
        }
        let name = self.path.to_string_lossy();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok("application/x-compressed-tar")
        } else if name.ends_with(".tar") {
            Ok("application/x-tar")
        } else {
            Err(Error::Extract(format!(
                "cannot guess archive type of '{}'",
                name
            )))
        }
    }
}

/// Reject entry names that would land outside the extraction root.
/// Leading slashes are stripped; `..` anywhere is refused.
fn sanitize_entry_path(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal(path.display().to_string()));
            }
            Component::Prefix(_) | Component::RootDir => {}
        }
    }
    Ok(normalized)
}

/// Extract one archive into `into`, honouring offset, subdirectory
/// filter and destination.
pub fn extract_archive(source: &ArchiveSource, into: &Path) -> Result<()> {
    let mime = source.effective_mime()?;
    debug!(
        "extracting {:?} ({}) into {:?}",
        source.path, mime, into
    );

    let mut file = File::open(&source.path)?;
    if source.start_offset > 0 {
        file.seek(SeekFrom::Start(source.start_offset))?;
    }

    let reader: Box<dyn Read> = match mime {
        "application/x-compressed-tar" => Box::new(GzDecoder::new(file)),
        _ => Box::new(file),
    };

    let base = match &source.dest {
        Some(dest) => {
            let dest = sanitize_entry_path(Path::new(dest))?;
            let base = into.join(dest);
            fs::create_dir_all(&base)?;
            base
        }
        None => into.to_path_buf(),
    };

    let extract_prefix = match &source.extract {
        Some(sub) => Some(sanitize_entry_path(Path::new(sub))?),
        None => None,
    };

    let mut archive = Archive::new(reader);
    archive.set_preserve_mtime(true);
    archive.set_preserve_permissions(true);

    let mut unpacked = 0usize;
    for entry in archive.entries().map_err(wrap_tar)? {
        let mut entry = entry.map_err(wrap_tar)?;
        let raw = entry.path().map_err(wrap_tar)?.into_owned();
        let mut relative = sanitize_entry_path(&raw)?;

        if let Some(prefix) = &extract_prefix {
            relative = match relative.strip_prefix(prefix) {
                Ok(rest) => rest.to_path_buf(),
                // Outside the requested subdirectory
                Err(_) => continue,
            };
        }
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = base.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&target).map_err(wrap_tar)?;
        unpacked += 1;
    }

    if unpacked == 0 {
        return Err(Error::Extract(format!(
            "archive {:?} produced no entries",
            source.path
        )));
    }
    debug!("unpacked {} entries from {:?}", unpacked, source.path);
    Ok(())
}

fn wrap_tar(e: std::io::Error) -> Error {
    Error::Extract(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_600_000_000);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn build_tar_raw_name(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_600_000_000);
            let name_bytes = name.as_bytes();
            let slot = header.as_old_mut().name.as_mut();
            slot[..name_bytes.len()].copy_from_slice(name_bytes);
            header.set_cksum();
            builder.append(&header, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn write_archive(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert!(sanitize_entry_path(Path::new("../etc/passwd")).is_err());
        assert!(sanitize_entry_path(Path::new("ok/../../escape")).is_err());
        assert_eq!(
            sanitize_entry_path(Path::new("/abs/file")).unwrap(),
            PathBuf::from("abs/file")
        );
        assert_eq!(
            sanitize_entry_path(Path::new("./a/./b")).unwrap(),
            PathBuf::from("a/b")
        );
    }

    #[test]
    fn test_extract_plain_tar() {
        let tmp = TempDir::new().unwrap();
        let tar_bytes = build_tar(&[("hello.txt", b"hi"), ("sub/deep.txt", b"deep")]);
        let archive = write_archive(tmp.path(), "a.tar", &tar_bytes);

        let out = TempDir::new().unwrap();
        extract_archive(&ArchiveSource::new(&archive), out.path()).unwrap();

        assert_eq!(fs::read(out.path().join("hello.txt")).unwrap(), b"hi");
        assert_eq!(fs::read(out.path().join("sub/deep.txt")).unwrap(), b"deep");
    }

    #[test]
    fn test_extract_gzipped_tar() {
        let tmp = TempDir::new().unwrap();
        let tar_bytes = build_tar(&[("file", b"content")]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&tar_bytes).unwrap();
        let archive = write_archive(tmp.path(), "a.tar.gz", &encoder.finish().unwrap());

        let out = TempDir::new().unwrap();
        extract_archive(&ArchiveSource::new(&archive), out.path()).unwrap();
        assert_eq!(fs::read(out.path().join("file")).unwrap(), b"content");
    }

    #[test]
    fn test_extract_subdirectory_only() {
        let tmp = TempDir::new().unwrap();
        let tar_bytes = build_tar(&[
            ("pkg-1.0/bin/tool", b"tool"),
            ("pkg-1.0/doc/readme", b"doc"),
            ("other/skip", b"skip"),
        ]);
        let archive = write_archive(tmp.path(), "a.tar", &tar_bytes);

        let out = TempDir::new().unwrap();
        let mut source = ArchiveSource::new(&archive);
        source.extract = Some("pkg-1.0".to_string());
        extract_archive(&source, out.path()).unwrap();

        assert!(out.path().join("bin/tool").exists());
        assert!(out.path().join("doc/readme").exists());
        assert!(!out.path().join("other").exists());
        assert!(!out.path().join("pkg-1.0").exists());
    }

    #[test]
    fn test_extract_into_dest() {
        let tmp = TempDir::new().unwrap();
        let tar_bytes = build_tar(&[("lib.so", b"elf")]);
        let archive = write_archive(tmp.path(), "a.tar", &tar_bytes);

        let out = TempDir::new().unwrap();
        let mut source = ArchiveSource::new(&archive);
        source.dest = Some("lib".to_string());
        extract_archive(&source, out.path()).unwrap();
        assert!(out.path().join("lib/lib.so").exists());
    }

    #[test]
    fn test_extract_at_offset() {
        let tmp = TempDir::new().unwrap();
        let tar_bytes = build_tar(&[("f", b"x")]);
        let mut padded = vec![0u8; 512];
        padded.extend_from_slice(&tar_bytes);
        let archive = write_archive(tmp.path(), "a.tar", &padded);

        let out = TempDir::new().unwrap();
        let mut source = ArchiveSource::new(&archive);
        source.start_offset = 512;
        extract_archive(&source, out.path()).unwrap();
        assert!(out.path().join("f").exists());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let tmp = TempDir::new().unwrap();
        let archive = write_archive(tmp.path(), "a.zip", b"PK");
        let out = TempDir::new().unwrap();
        let err = extract_archive(&ArchiveSource::new(&archive), out.path());
        assert!(matches!(err, Err(Error::Extract(_))));

        let mut source = ArchiveSource::new(tmp.path().join("b.dat"));
        source.mime_type = Some("application/zip".to_string());
        let err = extract_archive(&source, out.path());
        assert!(matches!(err, Err(Error::Extract(_))));
    }

    #[test]
    fn test_traversal_entry_rejected() {
        let tmp = TempDir::new().unwrap();
        let tar_bytes = build_tar_raw_name(&[("../escape", b"bad")]);
        let archive = write_archive(tmp.path(), "a.tar", &tar_bytes);

        let out = TempDir::new().unwrap();
        let err = extract_archive(&ArchiveSource::new(&archive), out.path());
        assert!(matches!(err, Err(Error::PathTraversal(_))));
    }
}
