use thiserror::Error;

/// Failure of a filesystem operation, as seen by the mount boundary.
///
/// Collaborator failures (archive parsing, decompression, remote fetches) are
/// carried as `Io` and surface to the kernel as `EIO`. They are never folded
/// into `NotFound`.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path does not resolve to a node of the required kind
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// A mutating operation was attempted
    #[error("read-only file system")]
    ReadOnly,

    /// The archive or the remote byte source failed underneath us
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl FsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        FsError::NotFound(path.into())
    }

    /// Platform errno for this failure.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::ReadOnly => libc::EROFS,
            FsError::Io(_) => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::not_found("/x").errno(), libc::ENOENT);
        assert_eq!(FsError::ReadOnly.errno(), libc::EROFS);
        assert_eq!(FsError::from(anyhow!("connection reset")).errno(), libc::EIO);
    }

    #[test]
    fn test_io_error_keeps_message() {
        let err = FsError::from(anyhow!("Failed to read ZIP central directory"));
        assert_eq!(err.to_string(), "Failed to read ZIP central directory");
    }
}
