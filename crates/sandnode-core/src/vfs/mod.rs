//! Virtual filesystem contracts.
//!
//! The resolver only needs [`FileMap`]; the loader writes fetched files back
//! through [`VirtualFs`]. All paths are absolute, `/`-separated virtual paths.

mod disk;
mod memory;

pub use disk::DiskFs;
pub use memory::MemoryFs;

use sandnode_util::vpath;
use std::io;

/// Read-only file lookup used by path resolution.
pub trait FileMap: Send + Sync {
    /// Whether `path` names an existing regular file, following links.
    fn has(&self, path: &str) -> bool;

    /// File contents, or `None` if `path` is not a readable file.
    fn read(&self, path: &str) -> Option<Vec<u8>>;

    /// Canonical form of `path` with links followed.
    ///
    /// The default reports no canonical form, so paths are used as given.
    fn realpath(&self, path: &str) -> Option<String> {
        let _ = path;
        None
    }
}

/// Kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// One entry reported by [`VirtualFs::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsEntry {
    pub path: String,
    pub kind: EntryKind,
}

/// Writable virtual filesystem.
pub trait VirtualFs: FileMap {
    /// Create or replace a file. The parent directory must exist.
    fn write(&self, path: &str, data: &[u8]) -> io::Result<()>;

    /// Create a directory. Fails with `AlreadyExists` if the path exists.
    fn mkdir(&self, path: &str) -> io::Result<()>;

    /// All entries matching `predicate`, sorted by path.
    fn query(&self, predicate: &dyn Fn(&VfsEntry) -> bool) -> Vec<VfsEntry>;
}

/// Create `path` and any missing ancestors.
///
/// # Errors
/// Returns the first error other than `AlreadyExists`.
pub fn mkdir_p<F: VirtualFs + ?Sized>(fs: &F, path: &str) -> io::Result<()> {
    let path = vpath::normalize(path);
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        match fs.mkdir(&current) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Read a file as text, replacing invalid UTF-8.
pub fn read_text<F: FileMap + ?Sized>(fs: &F, path: &str) -> Option<String> {
    fs.read(path).map(sandnode_util::fs::decode_lossy)
}
