use log::debug;
use std::collections::HashMap;

use super::VirtualPath;
use crate::archive::{ArchiveEntry, DosDateTime};

/// Stable identifier of a node; doubles as the inode number at the FUSE boundary
pub type NodeId = u64;

/// Id of the root directory
pub const ROOT_ID: NodeId = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// One file or directory derived from the archive
#[derive(Debug, Clone)]
pub struct IndexNode {
    pub id: NodeId,
    pub parent: NodeId,
    /// Normalized path without a leading slash; empty for the root
    pub path: String,
    /// Last path component; empty for the root
    pub name: String,
    pub kind: NodeKind,
    /// Uncompressed size (0 for directories)
    pub size: u64,
    /// Stored modification time (files only)
    pub modified: Option<DosDateTime>,
    /// Name of the archive entry backing this file
    pub entry_name: Option<String>,
    children: Vec<NodeId>,
}

impl IndexNode {
    fn directory(id: NodeId, parent: NodeId, path: String, name: String) -> Self {
        IndexNode {
            id,
            parent,
            path,
            name,
            kind: NodeKind::Directory,
            size: 0,
            modified: None,
            entry_name: None,
            children: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    fn make_file(&mut self, entry: &ArchiveEntry) {
        self.kind = NodeKind::File;
        self.size = entry.size;
        self.modified = Some(entry.modified);
        self.entry_name = Some(entry.path.clone());
    }
}

/// Immutable tree over an archive's flat entry list.
///
/// Directories that the archive only implies through a longer entry name are
/// materialized as synthetic nodes. When a path is both a file entry and the
/// prefix of other entries, the file wins.
#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    /// Node `id` lives at `nodes[id - 1]`
    nodes: Vec<IndexNode>,
    by_path: HashMap<String, NodeId>,
}

impl ArchiveIndex {
    /// Build the tree, keeping children in the order the entries first mention them
    pub fn build(entries: &[ArchiveEntry]) -> Self {
        let mut index = ArchiveIndex {
            nodes: vec![IndexNode::directory(ROOT_ID, ROOT_ID, String::new(), String::new())],
            by_path: HashMap::new(),
        };
        index.by_path.insert(String::new(), ROOT_ID);

        for entry in entries {
            let path = VirtualPath::parse(&entry.path);
            let segments = path.segments();
            if segments.is_empty() {
                continue;
            }

            let mut parent = ROOT_ID;
            let mut key = String::new();
            for (i, segment) in segments.iter().enumerate() {
                if !key.is_empty() {
                    key.push('/');
                }
                key.push_str(segment);

                let is_file_leaf = i == segments.len() - 1 && !entry.is_dir;
                let id = match index.by_path.get(&key) {
                    Some(&id) => id,
                    None => index.insert_directory(parent, &key, segment),
                };
                if is_file_leaf {
                    index.nodes[(id - 1) as usize].make_file(entry);
                }
                parent = id;
            }
        }

        debug!(
            "built archive index: {} entries, {} nodes",
            entries.len(),
            index.nodes.len()
        );
        index
    }

    fn insert_directory(&mut self, parent: NodeId, path: &str, name: &str) -> NodeId {
        let id = self.nodes.len() as NodeId + 1;
        self.nodes.push(IndexNode::directory(
            id,
            parent,
            path.to_string(),
            name.to_string(),
        ));
        self.nodes[(parent - 1) as usize].children.push(id);
        self.by_path.insert(path.to_string(), id);
        id
    }

    pub fn root(&self) -> &IndexNode {
        &self.nodes[0]
    }

    /// Node by id
    pub fn get(&self, id: NodeId) -> Option<&IndexNode> {
        let slot = id.checked_sub(1)?;
        self.nodes.get(usize::try_from(slot).ok()?)
    }

    /// Node by normalized path (no leading slash; `""` is the root)
    pub fn lookup(&self, path: &str) -> Option<&IndexNode> {
        self.by_path.get(path).and_then(|&id| self.get(id))
    }

    /// Immediate children of a node, in archive order
    pub fn children<'a>(&'a self, node: &'a IndexNode) -> impl Iterator<Item = &'a IndexNode> + 'a {
        node.children.iter().filter_map(|&id| self.get(id))
    }

    /// Number of nodes including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Count of file nodes and their total uncompressed size
    pub fn file_totals(&self) -> (u64, u64) {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::File)
            .fold((0, 0), |(count, bytes), n| (count + 1, bytes + n.size))
    }
}
