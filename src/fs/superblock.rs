use bincode::{Decode, Encode};
use bitvec::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use super::inode::RawInode;
use super::{
    ConsistencyError, DirectoryMap, FsError, Inode, MAX_BLOCK_NUM, MAX_NAME_LEN, MIN_BLOCK_NUM,
    NUM_BLOCKS, NUM_NODES, ROOT_DIR,
};

/// per-block occupancy over the whole volume, bit index == block index
///
/// Bit 0 stays clear: block 0 is the superblock itself and never allocated.
pub type FreeBlockList = BitArr!(for NUM_BLOCKS, in u8, Lsb0);

/// the volume metadata block: free-block bitmap plus the full inode table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub(crate) free_block_list: FreeBlockList,
    pub(crate) inodes: [Inode; NUM_NODES],
}

impl Default for SuperBlock {
    fn default() -> Self {
        SuperBlock {
            free_block_list: BitArray::ZERO,
            inodes: [Inode::default(); NUM_NODES],
        }
    }
}

/// construction and slot access
impl SuperBlock {
    /// an empty superblock: bitmap clear, every inode slot unused
    pub fn new() -> Self {
        SuperBlock::default()
    }

    pub fn node(&self, index: u8) -> Inode {
        self.inodes[index as usize]
    }

    pub fn set_node(&mut self, node: Inode, index: u8) {
        self.inodes[index as usize] = node;
    }

    pub fn block_is_used(&self, block: u8) -> bool {
        self.free_block_list[block as usize]
    }
}

/// allocation search
impl SuperBlock {
    /// first inode slot whose in-use flag is clear
    pub fn find_free_node(&self) -> Option<u8> {
        self.inodes
            .iter()
            .position(|node| !node.node_in_use())
            .map(|index| index as u8)
    }

    /// start of the lowest-indexed run of `size` consecutive free blocks
    pub fn find_contig_block(&self, size: u8) -> Option<u8> {
        if size == 0 || size > MAX_BLOCK_NUM {
            return None;
        }
        let size = size as usize;
        (MIN_BLOCK_NUM as usize..=NUM_BLOCKS - size)
            .find(|&start| self.free_block_list[start..start + size].not_any())
            .map(|start| start as u8)
    }

    /// mark an inclusive block range occupied
    ///
    /// Marking an already occupied block is reported, not ignored: it means
    /// the caller's bookkeeping is wrong. The range is checked before any
    /// bit changes.
    pub fn set_block(&mut self, start: u8, end: u8) -> Result<(), FsError> {
        for block in start..=end {
            if self.free_block_list[block as usize] {
                return Err(FsError::DoubleSet(block));
            }
        }
        for block in start..=end {
            self.free_block_list.set(block as usize, true);
        }
        Ok(())
    }

    /// mark an inclusive block range free, rejecting already free blocks
    pub fn clear_block(&mut self, start: u8, end: u8) -> Result<(), FsError> {
        for block in start..=end {
            if !self.free_block_list[block as usize] {
                return Err(FsError::DoubleClear(block));
            }
        }
        for block in start..=end {
            self.free_block_list.set(block as usize, false);
        }
        Ok(())
    }

    /// true if every block strictly after `start` through `end` is free,
    /// used to test in-place growth right behind a file's current end
    pub fn is_free_block(&self, start: u8, end: u8) -> bool {
        (start + 1..=end).all(|block| !self.free_block_list[block as usize])
    }

    /// earliest position a file starting at `old_start` could slide to:
    /// scan backward while blocks are free, stop after the nearest occupied
    /// block (block 0 counts as occupied)
    pub fn find_new_start_block(&self, old_start: u8) -> Option<u8> {
        let mut candidate = old_start;
        while candidate > MIN_BLOCK_NUM && !self.free_block_list[candidate as usize - 1] {
            candidate -= 1;
        }
        (candidate != old_start).then_some(candidate)
    }
}

/// name resolution
impl SuperBlock {
    /// index of the in-use node called `name` inside directory `dir`,
    /// case sensitive
    pub fn node_index(&self, name: &str, dir: u8) -> Option<u8> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
            return None;
        }
        let mut padded = [0u8; MAX_NAME_LEN];
        padded[..bytes.len()].copy_from_slice(bytes);
        self.inodes
            .iter()
            .position(|node| {
                node.node_in_use() && node.parent() == dir && node.name_bytes() == padded
            })
            .map(|index| index as u8)
    }

    /// reject reserved or malformed names and names already taken by
    /// another active entry of `dir`
    pub fn valid_new_name(&self, name: &str, dir: u8) -> Result<(), FsError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN || name == "." || name == ".." {
            return Err(FsError::InvalidName(name.to_string()));
        }
        if self.node_index(name, dir).is_some() {
            return Err(FsError::NameConflict(name.to_string()));
        }
        Ok(())
    }
}

/// deletion
impl SuperBlock {
    /// remove the entry called `name` from `dir`; a directory is removed
    /// bottom-up, every child first
    ///
    /// `map` must have been rebuilt after the last structural mutation.
    pub fn delete_node(&mut self, name: &str, dir: u8, map: &DirectoryMap) -> Result<(), FsError> {
        let index = self
            .node_index(name, dir)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        self.delete_subtree(index, map)
    }

    fn delete_subtree(&mut self, index: u8, map: &DirectoryMap) -> Result<(), FsError> {
        if self.inodes[index as usize].is_a_file() {
            return self.delete_file(index);
        }
        // the parent/child relation is acyclic by invariant, so this
        // recursion terminates
        for &child in map.children(index) {
            self.delete_subtree(child, map)?;
        }
        self.inodes[index as usize] = Inode::default();
        Ok(())
    }

    /// reset a file slot to the canonical empty value, then release its
    /// block range
    pub fn delete_file(&mut self, index: u8) -> Result<(), FsError> {
        let node = self.inodes[index as usize];
        self.inodes[index as usize] = Inode::default();
        if node.used_size() > 0 {
            self.clear_block(node.start_block(), node.end_block())?;
        }
        Ok(())
    }
}

/// derived directory view
impl SuperBlock {
    pub fn build_directory_map(&self) -> DirectoryMap {
        let mut map = DirectoryMap::default();
        for (index, node) in self.inodes.iter().enumerate() {
            if node.node_in_use() {
                map.insert(node.parent(), index as u8);
            }
        }
        map
    }
}

/// mount-time consistency validation
impl SuperBlock {
    /// run the six consistency rules in fixed priority order, stopping at
    /// the first violation
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        if !self.check_free_list() {
            return Err(ConsistencyError::FreeListMismatch);
        }
        if !self.check_unique_names() {
            return Err(ConsistencyError::DuplicateName);
        }
        if !self.check_free_nodes() {
            return Err(ConsistencyError::DirtyNode);
        }
        if !self.check_file_start() {
            return Err(ConsistencyError::BadFileStart);
        }
        if !self.check_directories() {
            return Err(ConsistencyError::BadDirectoryAttributes);
        }
        if !self.check_node_parent() {
            return Err(ConsistencyError::BadParent);
        }
        Ok(())
    }

    /// rule 1: every data block is claimed by exactly one inode range iff
    /// its occupancy bit is set
    fn check_free_list(&self) -> bool {
        for block in MIN_BLOCK_NUM..=MAX_BLOCK_NUM {
            let claims = self
                .inodes
                .iter()
                .filter(|node| node.block_in_node_range(block))
                .count();
            if claims > 1 {
                return false;
            }
            if (claims == 1) != self.free_block_list[block as usize] {
                return false;
            }
        }
        true
    }

    /// rule 2: active child names are unique within each parent
    fn check_unique_names(&self) -> bool {
        let mut seen: BTreeMap<u8, BTreeSet<[u8; MAX_NAME_LEN]>> = BTreeMap::new();
        for node in self.inodes.iter().filter(|node| node.node_in_use()) {
            if !seen.entry(node.parent()).or_default().insert(node.name_bytes()) {
                return false;
            }
        }
        true
    }

    /// rule 3: unused slots are fully zeroed, in-use slots are named
    fn check_free_nodes(&self) -> bool {
        self.inodes.iter().all(|node| {
            if node.node_in_use() {
                node.has_name()
            } else {
                node.node_is_clean()
            }
        })
    }

    /// rule 4: file start blocks lie within the data region
    fn check_file_start(&self) -> bool {
        self.inodes
            .iter()
            .filter(|node| node.is_a_file())
            .all(|node| node.check_start_block())
    }

    /// rule 5: directories carry zero size and zero start block
    fn check_directories(&self) -> bool {
        self.inodes
            .iter()
            .filter(|node| node.node_in_use() && node.is_directory())
            .all(|node| node.check_directory_attributes())
    }

    /// rule 6: every parent reference is the root or an in-use directory
    fn check_node_parent(&self) -> bool {
        self.inodes
            .iter()
            .filter(|node| node.node_in_use())
            .all(|node| {
                let parent = node.parent();
                parent == ROOT_DIR
                    || (usize::from(parent) < NUM_NODES
                        && self.inodes[parent as usize].node_in_use()
                        && self.inodes[parent as usize].is_directory())
            })
    }
}

/// the byte-for-byte on-disk form of block 0: 16 bitmap bytes followed by
/// 126 packed 8-byte inodes, 1024 bytes in total
#[derive(Encode, Decode, Debug, Clone, Copy)]
pub(crate) struct RawSuperBlock {
    free_block_list: [u8; NUM_BLOCKS / 8],
    inodes: [RawInode; NUM_NODES],
}

impl RawSuperBlock {
    pub(crate) fn serialize_into<W>(
        &self,
        w: &mut W,
    ) -> Result<usize, bincode::error::EncodeError>
    where
        W: Write,
    {
        bincode::encode_into_std_write(self, w, bincode::config::legacy())
    }

    pub(crate) fn deserialize_from<R>(r: &mut R) -> Result<Self, bincode::error::DecodeError>
    where
        R: Read,
    {
        bincode::decode_from_std_read(r, bincode::config::legacy())
    }
}

/// the on-disk bitmap packs bits most-significant-first per byte while the
/// in-memory order is least-significant-first; reversing every byte converts
/// between the two and is its own inverse
pub(crate) fn swap_bit_order(mut bytes: [u8; NUM_BLOCKS / 8]) -> [u8; NUM_BLOCKS / 8] {
    for byte in &mut bytes {
        *byte = byte.reverse_bits();
    }
    bytes
}

/// conversion between the in-memory and on-disk representations
impl SuperBlock {
    pub(crate) fn to_raw(&self) -> RawSuperBlock {
        let mut bitmap = [0u8; NUM_BLOCKS / 8];
        bitmap.copy_from_slice(self.free_block_list.as_raw_slice());
        let mut inodes = [RawInode::default(); NUM_NODES];
        for (raw, node) in inodes.iter_mut().zip(self.inodes.iter()) {
            *raw = RawInode::from(*node);
        }
        RawSuperBlock {
            free_block_list: swap_bit_order(bitmap),
            inodes,
        }
    }

    pub(crate) fn from_raw(raw: &RawSuperBlock) -> SuperBlock {
        let mut inodes = [Inode::default(); NUM_NODES];
        for (node, raw_node) in inodes.iter_mut().zip(raw.inodes.iter()) {
            *node = Inode::from(*raw_node);
        }
        SuperBlock {
            free_block_list: BitArray::new(swap_bit_order(raw.free_block_list)),
            inodes,
        }
    }
}
