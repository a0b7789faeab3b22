use super::{EntryKind, FileMap, VfsEntry, VirtualFs};
use sandnode_util::fs::atomic_write;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Virtual filesystem backed by a host directory.
///
/// Virtual `/` maps to `root`; paths never escape it.
#[derive(Debug, Clone)]
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    /// Map virtual `/` to the host directory `root`.
    ///
    /// # Errors
    /// Returns an error if `root` cannot be canonicalized.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            root: dunce::canonicalize(root)?,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &str) -> PathBuf {
        let virtual_path = sandnode_util::vpath::normalize(path);
        let mut host = self.root.clone();
        for segment in virtual_path.split('/').filter(|s| !s.is_empty()) {
            host.push(segment);
        }
        host
    }

    fn virtual_path(&self, host: &Path) -> Option<String> {
        let rel = host.strip_prefix(&self.root).ok()?;
        let segments: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("/{}", segments.join("/")))
    }
}

impl FileMap for DiskFs {
    fn has(&self, path: &str) -> bool {
        self.host_path(path).is_file()
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        let host = self.host_path(path);
        if !host.is_file() {
            return None;
        }
        fs::read(host).ok()
    }

    fn realpath(&self, path: &str) -> Option<String> {
        let canonical = dunce::canonicalize(self.host_path(path)).ok()?;
        self.virtual_path(&canonical)
    }
}

impl VirtualFs for DiskFs {
    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let host = self.host_path(path);
        match host.parent() {
            Some(parent) if parent.is_dir() => atomic_write(&host, data),
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("parent directory of {path} does not exist"),
            )),
        }
    }

    fn mkdir(&self, path: &str) -> io::Result<()> {
        fs::create_dir(self.host_path(path))
    }

    fn query(&self, predicate: &dyn Fn(&VfsEntry) -> bool) -> Vec<VfsEntry> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let file_type = entry.file_type();
                let kind = if file_type.is_symlink() {
                    EntryKind::Symlink
                } else if file_type.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                Some(VfsEntry {
                    path: self.virtual_path(entry.path())?,
                    kind,
                })
            })
            .filter(|entry| predicate(entry))
            .collect()
    }
}
