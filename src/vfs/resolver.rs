use super::{ArchiveIndex, IndexNode, NodeKind, VirtualPath};
use crate::error::{FsError, Result};

/// Outcome of resolving a path against the index
#[derive(Debug, Clone, Copy)]
pub enum Resolved<'a> {
    Root(&'a IndexNode),
    Directory(&'a IndexNode),
    File(&'a IndexNode),
}

impl<'a> Resolved<'a> {
    pub fn node(&self) -> &'a IndexNode {
        match self {
            Resolved::Root(n) | Resolved::Directory(n) | Resolved::File(n) => n,
        }
    }

    pub fn is_dir(&self) -> bool {
        !matches!(self, Resolved::File(_))
    }
}

/// Resolves filesystem paths to index nodes
pub struct PathResolver<'a> {
    index: &'a ArchiveIndex,
}

impl<'a> PathResolver<'a> {
    pub fn new(index: &'a ArchiveIndex) -> Self {
        PathResolver { index }
    }

    /// Resolve a path such as `/dir/file.txt`
    pub fn resolve(&self, path: &str) -> Result<Resolved<'a>> {
        self.resolve_path(&VirtualPath::parse(path))
            .ok_or_else(|| FsError::not_found(path))
    }

    /// Resolve an already parsed path
    pub fn resolve_path(&self, path: &VirtualPath) -> Option<Resolved<'a>> {
        if path.is_root() {
            return Some(Resolved::Root(self.index.root()));
        }

        let node = self.index.lookup(&path.key())?;
        Some(match node.kind {
            NodeKind::File => Resolved::File(node),
            NodeKind::Directory => Resolved::Directory(node),
        })
    }
}
