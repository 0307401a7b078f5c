//! Filesystem probing
//!
//! The populator never touches the filesystem itself; it asks an [`FsProbe`]
//! for metadata, directory listings and attribute values. [`LocalProbe`] is
//! the std implementation used by the binary.
//!
//! Features:
//! - `lstat` semantics, symlinks are never followed
//! - Streaming content hashes (never loads a full file into memory)
//! - Every requested hash computed in a single read pass

use crate::attributes::{AttrSet, AttrValue, Attribute, FileType};
use crate::entry::Entry;
use sha2::{Digest, Sha256, Sha512};
use std::fs::{self, File, Metadata};
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

/// Buffer size for streaming reads (64KB)
const BUFFER_SIZE: usize = 64 * 1024;

/// Per-path probe failure. Never fatal for a run.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0} vanished during the scan")]
    Vanished(String),

    #[error("{path} changed size while being read (expected {expected} bytes, read {read})")]
    Truncated { path: String, expected: u64, read: u64 },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ProbeError {
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        let shown = path.display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => ProbeError::Vanished(shown),
            io::ErrorKind::PermissionDenied => ProbeError::PermissionDenied(shown),
            _ => ProbeError::Io {
                path: shown,
                source: err,
            },
        }
    }

    /// Whether the failure came from the file changing under the probe
    pub fn is_transient(&self) -> bool {
        matches!(self, ProbeError::Vanished(_) | ProbeError::Truncated { .. })
    }
}

/// What the walk needs to know about a path before deciding on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub file_type: FileType,
    pub dev: u64,
    pub inode: u64,
}

pub trait FsProbe: Sync {
    /// Metadata of `path` itself, not of a symlink target
    fn stat(&self, path: &Path) -> Result<Stat, ProbeError>;

    /// Names of the entries of a directory, sorted
    fn list_dir(&self, path: &Path) -> Result<Vec<String>, ProbeError>;

    /// Fill `entry` with the values of `attrs`. On failure the values
    /// gathered so far stay in `entry`.
    fn probe(&self, path: &Path, attrs: AttrSet, entry: &mut Entry) -> Result<(), ProbeError>;
}

#[derive(Debug, Clone, Default)]
pub struct LocalProbe;

impl LocalProbe {
    pub fn new() -> Self {
        Self
    }
}

impl FsProbe for LocalProbe {
    fn stat(&self, path: &Path) -> Result<Stat, ProbeError> {
        let meta = fs::symlink_metadata(path).map_err(|e| ProbeError::from_io(path, e))?;
        let (dev, inode) = device_and_inode(&meta);
        Ok(Stat {
            file_type: FileType::from_std(meta.file_type()),
            dev,
            inode,
        })
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>, ProbeError> {
        let mut names = Vec::new();
        let walker = WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();
        for item in walker {
            let item = item.map_err(|e| {
                let at = e.path().unwrap_or(path).to_path_buf();
                match e.into_io_error() {
                    Some(io_err) => ProbeError::from_io(&at, io_err),
                    None => ProbeError::Io {
                        path: at.display().to_string(),
                        source: io::Error::new(io::ErrorKind::Other, "filesystem loop"),
                    },
                }
            })?;
            names.push(item.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn probe(&self, path: &Path, attrs: AttrSet, entry: &mut Entry) -> Result<(), ProbeError> {
        let meta = fs::symlink_metadata(path).map_err(|e| ProbeError::from_io(path, e))?;
        let file_type = FileType::from_std(meta.file_type());
        entry.file_type = Some(file_type);
        if attrs.contains(Attribute::FType) {
            entry.set(Attribute::FType, AttrValue::FileType(file_type));
        }

        set_metadata(entry, attrs, &meta);

        if attrs.contains(Attribute::LinkName) && file_type == FileType::Symlink {
            let target = fs::read_link(path).map_err(|e| ProbeError::from_io(path, e))?;
            entry.set(
                Attribute::LinkName,
                AttrValue::Text(target.to_string_lossy().into_owned()),
            );
        }

        let hashes = attrs.hashes().intersection(AttrSet::available());
        if !hashes.is_empty() && file_type == FileType::Regular {
            for (attr, digest) in hash_file(path, hashes, meta.len())? {
                entry.set(attr, AttrValue::Digest(digest));
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn device_and_inode(meta: &Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn device_and_inode(_meta: &Metadata) -> (u64, u64) {
    (0, 0)
}

#[cfg(unix)]
fn set_metadata(entry: &mut Entry, attrs: AttrSet, meta: &Metadata) {
    use std::os::unix::fs::MetadataExt;

    // growing size still needs the size value to compare against
    let wants_size = attrs.contains(Attribute::Size) || attrs.contains(Attribute::SizeGrowing);
    let values = [
        (Attribute::Perm, AttrValue::Mode(meta.mode() & 0o7777)),
        (Attribute::Uid, AttrValue::Number(u64::from(meta.uid()))),
        (Attribute::Gid, AttrValue::Number(u64::from(meta.gid()))),
        (Attribute::Atime, AttrValue::Time(meta.atime())),
        (Attribute::Ctime, AttrValue::Time(meta.ctime())),
        (Attribute::Mtime, AttrValue::Time(meta.mtime())),
        (Attribute::Inode, AttrValue::Number(meta.ino())),
        (Attribute::BlockCount, AttrValue::Number(meta.blocks())),
        (Attribute::LinkCount, AttrValue::Number(meta.nlink())),
        (Attribute::Dev, AttrValue::Number(meta.dev())),
        (Attribute::RDev, AttrValue::Number(meta.rdev())),
    ];
    for (attr, value) in values {
        if attrs.contains(attr) {
            entry.set(attr, value);
        }
    }
    if wants_size {
        entry.set(Attribute::Size, AttrValue::Number(meta.size()));
    }
}

#[cfg(not(unix))]
fn set_metadata(entry: &mut Entry, attrs: AttrSet, meta: &Metadata) {
    if attrs.contains(Attribute::Size) || attrs.contains(Attribute::SizeGrowing) {
        entry.set(Attribute::Size, AttrValue::Number(meta.len()));
    }
    if attrs.contains(Attribute::Perm) {
        let mode = if meta.permissions().readonly() { 0o444 } else { 0o644 };
        entry.set(Attribute::Perm, AttrValue::Mode(mode));
    }
    if attrs.contains(Attribute::Mtime) {
        if let Ok(modified) = meta.modified() {
            let secs = chrono::DateTime::<chrono::Utc>::from(modified).timestamp();
            entry.set(Attribute::Mtime, AttrValue::Time(secs));
        }
    }
}

enum ContentHasher {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl ContentHasher {
    fn for_attr(attr: Attribute) -> Option<Self> {
        match attr {
            Attribute::Sha256 => Some(Self::Sha256(Sha256::new())),
            Attribute::Sha512 => Some(Self::Sha512(Sha512::new())),
            Attribute::Blake3 => Some(Self::Blake3(Box::new(blake3::Hasher::new()))),
            _ => None,
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
            Self::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}

/// Hash the content of `path` with every algorithm in `hashes`. A read
/// length different from `expected` means the file changed mid-read.
fn hash_file(path: &Path, hashes: AttrSet, expected: u64) -> Result<Vec<(Attribute, Vec<u8>)>, ProbeError> {
    let mut hashers: Vec<(Attribute, ContentHasher)> = hashes
        .iter()
        .filter_map(|a| ContentHasher::for_attr(a).map(|h| (a, h)))
        .collect();

    let mut file = File::open(path).map_err(|e| ProbeError::from_io(path, e))?;
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut read = 0u64;
    loop {
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProbeError::from_io(path, e)),
        };
        read += n as u64;
        for (_, hasher) in hashers.iter_mut() {
            hasher.update(&buffer[..n]);
        }
    }

    if read != expected {
        return Err(ProbeError::Truncated {
            path: path.display().to_string(),
            expected,
            read,
        });
    }
    Ok(hashers
        .into_iter()
        .map(|(attr, hasher)| (attr, hasher.finalize()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Origin;

    #[test]
    fn probes_requested_values_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hello.txt");
        fs::write(&file, b"hello world").unwrap();

        let probe = LocalProbe::new();
        let mut entry = Entry::new("/hello.txt", Origin::Filesystem);
        let attrs = AttrSet::of(&[Attribute::Size, Attribute::Sha256, Attribute::Blake3]);
        probe.probe(&file, attrs, &mut entry).unwrap();

        assert_eq!(entry.file_type, Some(FileType::Regular));
        assert_eq!(entry.get(Attribute::Size), Some(&AttrValue::Number(11)));
        assert_eq!(
            entry.get(Attribute::Sha256),
            Some(&AttrValue::Digest(Sha256::digest(b"hello world").to_vec()))
        );
        assert_eq!(
            entry.get(Attribute::Blake3),
            Some(&AttrValue::Digest(blake3::hash(b"hello world").as_bytes().to_vec()))
        );
        assert!(entry.get(Attribute::Mtime).is_none());
        assert!(entry.get(Attribute::FType).is_none());
    }

    #[test]
    fn growing_size_captures_size() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("log");
        fs::write(&file, b"abc").unwrap();
        let mut entry = Entry::new("/log", Origin::Filesystem);
        LocalProbe
            .probe(&file, AttrSet::from(Attribute::SizeGrowing), &mut entry)
            .unwrap();
        assert_eq!(entry.get(Attribute::Size), Some(&AttrValue::Number(3)));
    }

    #[test]
    fn missing_paths_have_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalProbe.stat(&dir.path().join("gone")).unwrap_err();
        assert!(matches!(err, ProbeError::Vanished(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn size_mismatch_is_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"0123456789").unwrap();
        let err = hash_file(&file, AttrSet::from(Attribute::Sha256), 20).unwrap_err();
        assert!(matches!(err, ProbeError::Truncated { read: 10, .. }));
    }

    #[test]
    fn listing_is_sorted_and_shallow() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b/inner"), b"").unwrap();
        fs::write(dir.path().join("a"), b"").unwrap();
        fs::write(dir.path().join("c"), b"").unwrap();
        let names = LocalProbe.list_dir(dir.path()).unwrap();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::write(&target, b"data").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let stat = LocalProbe.stat(&link).unwrap();
        assert_eq!(stat.file_type, FileType::Symlink);

        let mut entry = Entry::new("/link", Origin::Filesystem);
        let attrs = AttrSet::of(&[Attribute::LinkName, Attribute::Sha256, Attribute::FType]);
        LocalProbe.probe(&link, attrs, &mut entry).unwrap();
        assert_eq!(
            entry.get(Attribute::LinkName),
            Some(&AttrValue::Text(target.display().to_string()))
        );
        assert!(entry.get(Attribute::Sha256).is_none());
        assert_eq!(
            entry.get(Attribute::FType),
            Some(&AttrValue::FileType(FileType::Symlink))
        );
    }
}
