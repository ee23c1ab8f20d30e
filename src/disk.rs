//! Abstract interface to the file system.
//!
//! The scanner and the build loop only touch the disk through this trait so
//! tests can substitute an in-memory implementation.

use anyhow::anyhow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::time::UNIX_EPOCH;

/// MTime info gathered for a file.  This also models "file is absent",
/// which orders before every on-disk timestamp.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MTime {
    Missing,
    /// Nanoseconds since the epoch.
    Stamp(i64),
}

pub trait Disk {
    /// Read a file; Ok(None) when the file does not exist.
    fn read_file(&self, path: &str) -> std::io::Result<Option<Vec<u8>>>;
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &str) -> anyhow::Result<MTime>;
    fn write_file(&self, path: &str, contents: &str) -> std::io::Result<()>;
    /// Create every parent directory an output path needs.
    fn make_dirs(&self, path: &str) -> std::io::Result<()>;
    /// Remove a file; Ok(true) when removed, Ok(false) when already absent.
    fn remove_file(&self, path: &str) -> std::io::Result<bool>;
}

fn stamp(meta: &std::fs::Metadata) -> std::io::Result<MTime> {
    let mtime = meta.modified()?;
    let nanos = match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(_) => 0,
    };
    Ok(MTime::Stamp(nanos))
}

#[cfg(windows)]
fn cache_key(name: &str) -> String {
    name.to_lowercase()
}
#[cfg(not(windows))]
fn cache_key(name: &str) -> String {
    name.to_string()
}

/// One directory's worth of cached stat results, or None when listing the
/// directory failed and it must be statted directly for the rest of the run.
type DirCache = Option<HashMap<String, MTime>>;

pub struct RealDisk {
    /// Directory-listing cache for stat(); only populated when enabled.
    /// Intended for case-insensitive filesystems where individual stats
    /// are slow relative to one listing.
    cache: RefCell<Option<HashMap<String, DirCache>>>,
}

impl RealDisk {
    pub fn new() -> Self {
        RealDisk {
            cache: RefCell::new(None),
        }
    }

    /// Enable or disable the stat cache.  Must be called before any stat();
    /// disabling purges all cached entries.
    pub fn allow_stat_cache(&self, allow: bool) {
        let mut cache = self.cache.borrow_mut();
        *cache = if allow { Some(HashMap::new()) } else { None };
    }

    fn stat_cached(&self, path: &str) -> Option<anyhow::Result<MTime>> {
        let mut borrow = self.cache.borrow_mut();
        let cache = borrow.as_mut()?;
        let (dir, base) = match path.rfind('/') {
            Some(i) => (&path[..i], &path[i + 1..]),
            None => (".", path),
        };
        let entry = cache
            .entry(dir.to_string())
            .or_insert_with(|| list_dir(dir));
        match entry {
            Some(files) => Some(Ok(files
                .get(&cache_key(base))
                .copied()
                .unwrap_or(MTime::Missing))),
            // Listing failed earlier; stat this path directly.
            None => None,
        }
    }
}

fn list_dir(dir: &str) -> DirCache {
    let mut files = HashMap::new();
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries {
        let entry = entry.ok()?;
        let meta = entry.metadata().ok()?;
        if meta.is_dir() {
            continue;
        }
        let name = entry.file_name().into_string().ok()?;
        files.insert(cache_key(&name), stamp(&meta).ok()?);
    }
    Some(files)
}

impl Default for RealDisk {
    fn default() -> Self {
        RealDisk::new()
    }
}

impl Disk for RealDisk {
    fn read_file(&self, path: &str) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(path) {
            Ok(b) => Ok(Some(b)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn stat(&self, path: &str) -> anyhow::Result<MTime> {
        if let Some(result) = self.stat_cached(path) {
            return result;
        }
        match std::fs::metadata(path) {
            Ok(meta) => Ok(stamp(&meta)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(MTime::Missing),
            // Statting a file within something that isn't a directory.
            Err(err) if err.kind() == ErrorKind::NotADirectory => Ok(MTime::Missing),
            Err(err) => Err(anyhow!("stat {}: {}", path, err)),
        }
    }

    fn write_file(&self, path: &str, contents: &str) -> std::io::Result<()> {
        std::fs::write(path, contents)
    }

    fn make_dirs(&self, path: &str) -> std::io::Result<()> {
        match std::path::Path::new(path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }

    fn remove_file(&self, path: &str) -> std::io::Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// In-memory file system used by scanner and build tests.
#[cfg(test)]
pub struct MemDisk {
    pub files: RefCell<HashMap<String, (MTime, Vec<u8>)>>,
}

#[cfg(test)]
impl MemDisk {
    pub fn new() -> Self {
        MemDisk {
            files: RefCell::new(HashMap::new()),
        }
    }

    pub fn put(&self, path: &str, mtime: i64, contents: &str) {
        self.files.borrow_mut().insert(
            path.to_string(),
            (MTime::Stamp(mtime), contents.as_bytes().to_vec()),
        );
    }

    pub fn touch(&self, path: &str, mtime: i64) {
        self.put(path, mtime, "");
    }
}

#[cfg(test)]
impl Disk for MemDisk {
    fn read_file(&self, path: &str) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self
            .files
            .borrow()
            .get(path)
            .map(|(_, contents)| contents.clone()))
    }

    fn stat(&self, path: &str) -> anyhow::Result<MTime> {
        Ok(self
            .files
            .borrow()
            .get(path)
            .map(|(mtime, _)| *mtime)
            .unwrap_or(MTime::Missing))
    }

    fn write_file(&self, path: &str, contents: &str) -> std::io::Result<()> {
        self.put(path, 0, contents);
        Ok(())
    }

    fn make_dirs(&self, _path: &str) -> std::io::Result<()> {
        Ok(())
    }

    fn remove_file(&self, path: &str) -> std::io::Result<bool> {
        Ok(self.files.borrow_mut().remove(path).is_some())
    }
}
