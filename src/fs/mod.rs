//! a single-volume flat filesystem stored in a 128 KiB image file
pub mod engine;
pub mod error;
pub mod inode;
pub mod superblock;
mod directory;
pub use directory::DirectoryMap;
pub use engine::*;
pub use error::*;
pub use inode::*;
pub use superblock::*;

/// size of every block, including the superblock
pub const BLOCK_SIZE: usize = 1024;
/// blocks on the volume; block 0 is the superblock, 1..=127 hold data
pub const NUM_BLOCKS: usize = 128;
/// inode table slots
pub const NUM_NODES: usize = 126;
pub const MAX_NAME_LEN: usize = 5;
/// virtual root directory identifier, never stored in the inode table
pub const ROOT_DIR: u8 = 127;
pub const MIN_BLOCK_NUM: u8 = 1;
pub const MAX_BLOCK_NUM: u8 = 127;
/// total image file size
pub const VOLUME_SIZE: usize = BLOCK_SIZE * NUM_BLOCKS;
