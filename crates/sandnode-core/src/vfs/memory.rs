use super::{EntryKind, FileMap, VfsEntry, VirtualFs};
use sandnode_util::vpath;
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, PoisonError, RwLock};

/// Maximum links followed while canonicalizing one path.
const MAX_LINK_DEPTH: usize = 40;

#[derive(Debug, Clone)]
enum Node {
    File(Arc<[u8]>),
    Dir,
    Link(String),
}

/// In-memory filesystem with files, directories and symbolic links.
#[derive(Debug)]
pub struct MemoryFs {
    entries: RwLock<BTreeMap<String, Node>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("/".to_string(), Node::Dir);
        Self {
            entries: RwLock::new(entries),
        }
    }
}

impl MemoryFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filesystem from `(path, contents)` pairs, creating parents.
    #[must_use]
    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let fs = Self::new();
        for (path, contents) in files {
            fs.insert_file(path, contents.as_bytes());
        }
        fs
    }

    /// Insert a file, creating parent directories as needed.
    pub fn insert_file(&self, path: &str, data: &[u8]) {
        let path = vpath::normalize(path);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut dir = vpath::dirname(&path);
        while dir != "/" && !entries.contains_key(&dir) {
            entries.insert(dir.clone(), Node::Dir);
            dir = vpath::dirname(&dir);
        }
        entries.insert(path, Node::File(Arc::from(data)));
    }

    /// Create a link at `link` pointing at `target`.
    ///
    /// A relative target is taken relative to the link's directory.
    pub fn symlink(&self, target: &str, link: &str) {
        let link = vpath::normalize(link);
        let target = vpath::resolve(&vpath::dirname(&link), target);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(link, Node::Link(target));
    }

    /// Follow links through every component of `path`.
    fn canonicalize(entries: &BTreeMap<String, Node>, path: &str) -> Option<String> {
        let mut pending: Vec<String> = vpath::normalize(path)
            .split('/')
            .filter(|s| !s.is_empty())
            .rev()
            .map(str::to_string)
            .collect();
        let mut current = "/".to_string();
        let mut links = 0;

        while let Some(segment) = pending.pop() {
            let candidate = vpath::join(&current, &segment);
            match entries.get(&candidate) {
                Some(Node::Link(target)) => {
                    links += 1;
                    if links > MAX_LINK_DEPTH {
                        return None;
                    }
                    pending.extend(
                        target
                            .split('/')
                            .filter(|s| !s.is_empty())
                            .rev()
                            .map(str::to_string),
                    );
                    current = "/".to_string();
                }
                Some(_) => current = candidate,
                None => return None,
            }
        }
        Some(current)
    }

    fn lookup(&self, path: &str) -> Option<(String, Node)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let canonical = Self::canonicalize(&entries, path)?;
        let node = entries.get(&canonical)?.clone();
        Some((canonical, node))
    }
}

impl FileMap for MemoryFs {
    fn has(&self, path: &str) -> bool {
        matches!(self.lookup(path), Some((_, Node::File(_))))
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.lookup(path)? {
            (_, Node::File(data)) => Some(data.to_vec()),
            _ => None,
        }
    }

    fn realpath(&self, path: &str) -> Option<String> {
        self.lookup(path).map(|(canonical, _)| canonical)
    }
}

impl VirtualFs for MemoryFs {
    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let path = vpath::normalize(path);
        let parent = vpath::dirname(&path);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let target = match Self::canonicalize(&entries, &parent) {
            Some(dir) if matches!(entries.get(&dir), Some(Node::Dir)) => {
                vpath::join(&dir, vpath::basename(&path))
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("parent directory of {path} does not exist"),
                ))
            }
        };
        if matches!(entries.get(&target), Some(Node::Dir)) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{path} is a directory"),
            ));
        }
        entries.insert(target, Node::File(Arc::from(data)));
        Ok(())
    }

    fn mkdir(&self, path: &str) -> io::Result<()> {
        let path = vpath::normalize(path);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&path) || Self::canonicalize(&entries, &path).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{path} already exists"),
            ));
        }
        let parent = vpath::dirname(&path);
        match Self::canonicalize(&entries, &parent) {
            Some(dir) if matches!(entries.get(&dir), Some(Node::Dir)) => {
                entries.insert(vpath::join(&dir, vpath::basename(&path)), Node::Dir);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("parent directory of {path} does not exist"),
            )),
        }
    }

    fn query(&self, predicate: &dyn Fn(&VfsEntry) -> bool) -> Vec<VfsEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|(path, node)| VfsEntry {
                path: path.clone(),
                kind: match node {
                    Node::File(_) => EntryKind::File,
                    Node::Dir => EntryKind::Directory,
                    Node::Link(_) => EntryKind::Symlink,
                },
            })
            .filter(|entry| predicate(entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::mkdir_p;

    #[test]
    fn test_with_files_creates_parents() {
        let fs = MemoryFs::with_files([("/node_modules/a/index.js", "x")]);
        assert!(fs.has("/node_modules/a/index.js"));
        assert!(!fs.has("/node_modules/a"));
        let dirs = fs.query(&|e| e.kind == EntryKind::Directory);
        let paths: Vec<_> = dirs.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/node_modules", "/node_modules/a"]);
    }

    #[test]
    fn test_write_requires_parent() {
        let fs = MemoryFs::new();
        let err = fs.write("/a/b.js", b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        mkdir_p(&fs, "/a").unwrap();
        fs.write("/a/b.js", b"x").unwrap();
        assert_eq!(fs.read("/a/b.js").unwrap(), b"x");
    }

    #[test]
    fn test_mkdir_existing_fails() {
        let fs = MemoryFs::new();
        fs.mkdir("/a").unwrap();
        let err = fs.mkdir("/a").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        mkdir_p(&fs, "/a/b/c").unwrap();
        assert!(fs.realpath("/a/b/c").is_some());
    }

    #[test]
    fn test_symlink_followed() {
        let fs = MemoryFs::with_files([("/packages/lib/index.js", "x")]);
        mkdir_p(&fs, "/node_modules").unwrap();
        fs.symlink("../packages/lib", "/node_modules/lib");

        assert!(fs.has("/node_modules/lib/index.js"));
        assert_eq!(
            fs.realpath("/node_modules/lib/index.js").as_deref(),
            Some("/packages/lib/index.js")
        );
    }

    #[test]
    fn test_symlink_loop_is_not_found() {
        let fs = MemoryFs::new();
        fs.symlink("/b", "/a");
        fs.symlink("/a", "/b");
        assert!(!fs.has("/a"));
        assert!(fs.realpath("/a").is_none());
    }
}
