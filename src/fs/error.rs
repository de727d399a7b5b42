//! operator-facing error taxonomy of the volume engine

/// a consistency rule violated by a mounted image
///
/// The rules are checked in this fixed order and the first violation wins,
/// so the codes are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("free-block list disagrees with the inode block ranges")]
    FreeListMismatch,

    #[error("duplicate name inside one directory")]
    DuplicateName,

    #[error("unused inode slot carries stale data, or an in-use slot has no name")]
    DirtyNode,

    #[error("file start block outside the data region")]
    BadFileStart,

    #[error("directory with a nonzero size or start block")]
    BadDirectoryAttributes,

    #[error("inode parent is not the root or an in-use directory")]
    BadParent,
}

impl ConsistencyError {
    /// numeric error class reported to the operator
    pub fn code(&self) -> u8 {
        match self {
            ConsistencyError::FreeListMismatch => 1,
            ConsistencyError::DuplicateName => 2,
            ConsistencyError::DirtyNode => 3,
            ConsistencyError::BadFileStart => 4,
            ConsistencyError::BadDirectoryAttributes => 5,
            ConsistencyError::BadParent => 6,
        }
    }
}

/// everything a volume operation can report to the command loop
///
/// None of these abort the process; the command loop prints the description
/// and moves on to the next command.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("No file system is mounted")]
    NotMounted,

    #[error("Cannot find disk: {0}")]
    DiskNotFound(String),

    #[error("Disk {0} is not a valid 128 KB volume image")]
    InvalidImage(String),

    #[error("File system in {disk} is inconsistent (error code: {})", .source.code())]
    Inconsistent {
        disk: String,
        source: ConsistencyError,
    },

    #[error("{0} is not a valid file or directory name")]
    InvalidName(String),

    #[error("File or directory {0} already exists")]
    NameConflict(String),

    #[error("File or directory {0} does not exist")]
    NotFound(String),

    #[error("{0} is not a file")]
    NotAFile(String),

    #[error("{0} is not a directory")]
    NotADirectory(String),

    #[error("Superblock in disk {disk} is full, cannot create {name}")]
    NodeTableFull { disk: String, name: String },

    #[error("Cannot allocate {size} on {disk}")]
    NoContiguousRun { size: u8, disk: String },

    #[error("{name} does not have block {block}")]
    BlockOutOfRange { name: String, block: u8 },

    #[error("File {name} cannot expand to size {size}")]
    CannotResize { name: String, size: u8 },

    /// marking an occupied block occupied again indicates a bookkeeping bug
    #[error("block {0} is already occupied")]
    DoubleSet(u8),

    /// freeing a free block indicates a bookkeeping bug
    #[error("block {0} is already free")]
    DoubleClear(u8),

    #[error("failed to persist superblock: {0}")]
    Persist(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
