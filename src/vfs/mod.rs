pub mod index;
pub mod path;
pub mod resolver;

pub use index::{ArchiveIndex, IndexNode, NodeId, NodeKind, ROOT_ID};
pub use path::VirtualPath;
pub use resolver::{PathResolver, Resolved};
