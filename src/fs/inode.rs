use bincode::{Decode, Encode};

use super::{MAX_BLOCK_NUM, MAX_NAME_LEN, MIN_BLOCK_NUM};

/// flag bit shared with a 7-bit payload in the packed on-disk bytes
const FLAG_MASK: u8 = 0x80;
/// the 7 payload bits of a packed byte
const FIELD_MASK: u8 = 0x7f;

/// one entry of the inode table, describing a file or a directory
///
/// The on-disk record packs the in-use flag into the size byte and the
/// directory flag into the parent byte; in memory every field is kept
/// unpacked and the packing only happens in [RawInode].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    name: [u8; MAX_NAME_LEN],
    size: u8,
    start_block: u8,
    parent: u8,
    in_use: bool,
    is_dir: bool,
}

impl Inode {
    /// build an in-use inode
    ///
    /// A size of zero marks a directory: the directory flag is set and the
    /// start block is forced to zero.
    pub fn new(name: &str, size: u8, start_block: u8, parent: u8) -> Self {
        let is_dir = size == 0;
        let mut inode = Inode {
            size,
            start_block: if is_dir { 0 } else { start_block },
            parent,
            in_use: true,
            is_dir,
            ..Inode::default()
        };
        inode.set_name(name);
        inode
    }
}

/// getters and setters
impl Inode {
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_NAME_LEN);
        // a corrupt non-UTF-8 name renders as empty, byte comparisons still work
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn name_bytes(&self) -> [u8; MAX_NAME_LEN] {
        self.name
    }

    /// store up to [MAX_NAME_LEN] bytes, zero padded
    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_NAME_LEN);
        self.name = [0u8; MAX_NAME_LEN];
        self.name[..len].copy_from_slice(&bytes[..len]);
    }

    pub fn used_size(&self) -> u8 {
        self.size
    }

    pub fn set_used_size(&mut self, size: u8) {
        self.size = size;
    }

    pub fn start_block(&self) -> u8 {
        self.start_block
    }

    pub fn set_start_block(&mut self, start_block: u8) {
        self.start_block = start_block;
    }

    pub fn parent(&self) -> u8 {
        self.parent
    }

    pub fn set_parent(&mut self, parent: u8) {
        self.parent = parent;
    }

    pub fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    pub fn set_is_file(&mut self, is_file: bool) {
        self.is_dir = !is_file;
    }

    /// index of the last block assigned to the file
    pub fn end_block(&self) -> u8 {
        self.start_block + self.size - 1
    }
}

/// state predicates
impl Inode {
    pub fn node_in_use(&self) -> bool {
        self.in_use
    }

    pub fn is_directory(&self) -> bool {
        self.is_dir
    }

    /// true only for an in-use node with the directory flag clear;
    /// an unused slot is never reported as a file
    pub fn is_a_file(&self) -> bool {
        self.in_use && !self.is_dir
    }

    /// inclusive membership in `[start_block, start_block + size - 1]`
    ///
    /// A pure range test independent of the flags, so the consistency
    /// checker sees the claims of corrupted slots too. Widened arithmetic:
    /// a corrupt slot may carry a range that overflows u8.
    pub fn block_in_node_range(&self, block: u8) -> bool {
        self.size > 0
            && block as u16 >= self.start_block as u16
            && (block as u16) < self.start_block as u16 + self.size as u16
    }

    /// true if every field is the zero value
    pub fn node_is_clean(&self) -> bool {
        *self == Inode::default()
    }

    pub fn has_name(&self) -> bool {
        self.name != [0u8; MAX_NAME_LEN]
    }

    /// the start block of a file must lie in the data region; a file shrunk
    /// to zero blocks carries start block zero and claims nothing
    pub fn check_start_block(&self) -> bool {
        if self.size == 0 {
            self.start_block == 0
        } else {
            self.start_block >= MIN_BLOCK_NUM
                && self.start_block as u16 + self.size as u16 - 1 <= MAX_BLOCK_NUM as u16
        }
    }

    /// a directory carries neither a size nor a start block
    pub fn check_directory_attributes(&self) -> bool {
        self.size == 0 && self.start_block == 0
    }
}

/// the packed 8-byte on-disk form of an [Inode]
#[derive(Encode, Decode, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawInode {
    name: [u8; MAX_NAME_LEN],
    used_size: u8,
    start_block: u8,
    parent: u8,
}

impl From<Inode> for RawInode {
    fn from(inode: Inode) -> Self {
        RawInode {
            name: inode.name,
            used_size: (inode.in_use as u8) << 7 | (inode.size & FIELD_MASK),
            start_block: inode.start_block,
            parent: (inode.is_dir as u8) << 7 | (inode.parent & FIELD_MASK),
        }
    }
}

impl From<RawInode> for Inode {
    fn from(raw: RawInode) -> Self {
        Inode {
            name: raw.name,
            size: raw.used_size & FIELD_MASK,
            start_block: raw.start_block,
            parent: raw.parent & FIELD_MASK,
            in_use: raw.used_size & FLAG_MASK != 0,
            is_dir: raw.parent & FLAG_MASK != 0,
        }
    }
}
