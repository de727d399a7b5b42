//! what mounting and manipulating a volume looks like in memory

use log::{debug, info};
use memmap2::MmapMut;
use std::fs::OpenOptions;

use super::superblock::RawSuperBlock;
use super::{
    DirectoryMap, FsError, Inode, SuperBlock, BLOCK_SIZE, MAX_BLOCK_NUM, NUM_NODES, ROOT_DIR,
    VOLUME_SIZE,
};
use crate::utils::layout::block_offset;

/// a mounted volume: the staged superblock, the mapped image and the
/// derived directory view
struct MountedVolume {
    disk_name: String,
    image: MmapMut,
    superblock: SuperBlock,
    directory_map: DirectoryMap,
    cwd: u8,
}

/// the volume driver: a state machine over unmounted and mounted
///
/// Only [mount](VolumeEngine::mount) is accepted while unmounted; every
/// other operation fails with [FsError::NotMounted] and no effect. The
/// superblock is persisted back to the image after every mutating
/// operation.
pub struct VolumeEngine {
    volume: Option<MountedVolume>,
    buffer: [u8; BLOCK_SIZE],
}

impl Default for VolumeEngine {
    fn default() -> Self {
        VolumeEngine {
            volume: None,
            buffer: [0u8; BLOCK_SIZE],
        }
    }
}

/// construction and state inspection
impl VolumeEngine {
    pub fn new() -> Self {
        VolumeEngine::default()
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    /// the staging buffer shared by read, write and buffer-load
    pub fn buffer(&self) -> &[u8; BLOCK_SIZE] {
        &self.buffer
    }

    pub fn superblock(&self) -> Option<&SuperBlock> {
        self.volume.as_ref().map(|vol| &vol.superblock)
    }

    pub fn current_directory(&self) -> Option<u8> {
        self.volume.as_ref().map(|vol| vol.cwd)
    }

    fn volume_mut(&mut self) -> Result<&mut MountedVolume, FsError> {
        self.volume.as_mut().ok_or(FsError::NotMounted)
    }
}

/// mounting
impl VolumeEngine {
    /// stage the image's superblock, validate it and transition to mounted
    ///
    /// The working directory resets to the root. On any failure the engine
    /// ends up unmounted, even if another volume was mounted before the
    /// attempt.
    pub fn mount(&mut self, disk_name: &str) -> Result<(), FsError> {
        self.volume = None;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(disk_name)
            .map_err(|_| FsError::DiskNotFound(disk_name.to_string()))?;
        if file.metadata()?.len() != VOLUME_SIZE as u64 {
            return Err(FsError::InvalidImage(disk_name.to_string()));
        }
        // Safety
        // The image file is owned exclusively by this engine for the
        // lifetime of the mount; see the memmap2 documentation on the
        // underlying system call.
        let image = unsafe { MmapMut::map_mut(&file) }?;

        let mut block0 = &image[..BLOCK_SIZE];
        let raw = RawSuperBlock::deserialize_from(&mut block0)
            .map_err(|_| FsError::InvalidImage(disk_name.to_string()))?;
        let superblock = SuperBlock::from_raw(&raw);
        superblock
            .check_consistency()
            .map_err(|source| FsError::Inconsistent {
                disk: disk_name.to_string(),
                source,
            })?;

        let directory_map = superblock.build_directory_map();
        self.volume = Some(MountedVolume {
            disk_name: disk_name.to_string(),
            image,
            superblock,
            directory_map,
            cwd: ROOT_DIR,
        });
        info!("mounted {disk_name}");
        Ok(())
    }
}

/// creating and deleting entries
impl VolumeEngine {
    /// create a file of `size` blocks, or a subdirectory when `size` is 0
    pub fn create(&mut self, name: &str, size: u8) -> Result<(), FsError> {
        let vol = self.volume_mut()?;
        let index = vol
            .superblock
            .find_free_node()
            .ok_or_else(|| FsError::NodeTableFull {
                disk: vol.disk_name.clone(),
                name: name.to_string(),
            })?;
        vol.superblock.valid_new_name(name, vol.cwd)?;
        let start = if size > 0 {
            vol.superblock
                .find_contig_block(size)
                .ok_or_else(|| FsError::NoContiguousRun {
                    size,
                    disk: vol.disk_name.clone(),
                })?
        } else {
            0
        };
        vol.superblock
            .set_node(Inode::new(name, size, start, vol.cwd), index);
        if size > 0 {
            vol.superblock.set_block(start, start + size - 1)?;
        }
        vol.rebuild_directory_map();
        vol.persist()?;
        debug!("create() name={name} size={size} node={index} start={start}");
        Ok(())
    }

    /// delete the named entry of the current directory; a directory takes
    /// its whole subtree with it
    pub fn delete(&mut self, name: &str) -> Result<(), FsError> {
        let vol = self.volume_mut()?;
        let index = vol
            .superblock
            .node_index(name, vol.cwd)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        // vacated data blocks are zeroed on disk before the metadata is
        // released
        vol.zero_subtree_blocks(index);
        let map = vol.directory_map.clone();
        vol.superblock.delete_node(name, vol.cwd, &map)?;
        vol.rebuild_directory_map();
        vol.persist()?;
        debug!("delete() name={name} node={index}");
        Ok(())
    }
}

/// block transfer through the staging buffer
impl VolumeEngine {
    /// copy one block of the named file into the staging buffer
    pub fn read(&mut self, name: &str, block: u8) -> Result<(), FsError> {
        let Self { volume, buffer } = self;
        let vol = volume.as_mut().ok_or(FsError::NotMounted)?;
        let (_, node) = resolve_file(&vol.superblock, name, vol.cwd)?;
        if block >= node.used_size() {
            return Err(FsError::BlockOutOfRange {
                name: name.to_string(),
                block,
            });
        }
        buffer.copy_from_slice(vol.block_slice(node.start_block() + block));
        Ok(())
    }

    /// copy the staging buffer into one block of the named file
    pub fn write(&mut self, name: &str, block: u8) -> Result<(), FsError> {
        let Self { volume, buffer } = self;
        let vol = volume.as_mut().ok_or(FsError::NotMounted)?;
        let (_, node) = resolve_file(&vol.superblock, name, vol.cwd)?;
        if block >= node.used_size() {
            return Err(FsError::BlockOutOfRange {
                name: name.to_string(),
                block,
            });
        }
        vol.block_slice_mut(node.start_block() + block)
            .copy_from_slice(&buffer[..]);
        vol.image.flush()?;
        Ok(())
    }

    /// replace the staging buffer, clearing it first so short inputs leave
    /// no stale tail behind
    pub fn set_buffer(&mut self, bytes: &[u8]) -> Result<(), FsError> {
        if self.volume.is_none() {
            return Err(FsError::NotMounted);
        }
        self.buffer.fill(0);
        let len = bytes.len().min(BLOCK_SIZE);
        self.buffer[..len].copy_from_slice(&bytes[..len]);
        Ok(())
    }
}

/// resizing and defragmentation
impl VolumeEngine {
    /// change a file's block count, relocating it when it cannot grow in
    /// place
    pub fn resize(&mut self, name: &str, new_size: u8) -> Result<(), FsError> {
        let vol = self.volume_mut()?;
        let (index, node) = resolve_file(&vol.superblock, name, vol.cwd)?;
        if new_size > MAX_BLOCK_NUM {
            return Err(FsError::CannotResize {
                name: name.to_string(),
                size: new_size,
            });
        }
        let old_size = node.used_size();
        if new_size == old_size {
            return Ok(());
        }
        if new_size < old_size {
            vol.shrink_file(index, new_size)?;
        } else {
            vol.grow_file(index, name, new_size)?;
        }
        vol.rebuild_directory_map();
        vol.persist()?;
        debug!("resize() name={name} from={old_size} to={new_size}");
        Ok(())
    }

    /// slide every file as far toward the start of the volume as possible,
    /// in ascending start-block order
    pub fn defragment(&mut self) -> Result<(), FsError> {
        let vol = self.volume_mut()?;
        let mut files: Vec<u8> = (0..NUM_NODES as u8)
            .filter(|&index| {
                let node = vol.superblock.node(index);
                node.is_a_file() && node.used_size() > 0
            })
            .collect();
        files.sort_by_key(|&index| vol.superblock.node(index).start_block());
        for index in files {
            vol.slide_file(index)?;
        }
        vol.rebuild_directory_map();
        vol.persist()?;
        info!("defragment() done");
        Ok(())
    }
}

/// directory navigation
impl VolumeEngine {
    /// "." stays put, ".." moves to the parent (a no-op at the root), any
    /// other name must resolve to a subdirectory of the current directory
    pub fn change_directory(&mut self, name: &str) -> Result<(), FsError> {
        let vol = self.volume_mut()?;
        match name {
            "." => Ok(()),
            ".." => {
                if vol.cwd != ROOT_DIR {
                    vol.cwd = vol.superblock.node(vol.cwd).parent();
                }
                Ok(())
            }
            _ => {
                let index = vol
                    .superblock
                    .node_index(name, vol.cwd)
                    .ok_or_else(|| FsError::NotFound(name.to_string()))?;
                if !vol.superblock.node(index).is_directory() {
                    return Err(FsError::NotADirectory(name.to_string()));
                }
                vol.cwd = index;
                Ok(())
            }
        }
    }

    /// the current directory's entries: "." and ".." with their child
    /// counts plus 2, files with their block count, subdirectories with
    /// their child count plus 2
    pub fn list(&self) -> Result<Vec<String>, FsError> {
        let vol = self.volume.as_ref().ok_or(FsError::NotMounted)?;
        let children = vol.directory_map.children(vol.cwd);
        let mut lines = Vec::with_capacity(children.len() + 2);
        lines.push(format_entry(".", children.len() + 2));
        let parent = if vol.cwd == ROOT_DIR {
            ROOT_DIR
        } else {
            vol.superblock.node(vol.cwd).parent()
        };
        lines.push(format_entry("..", vol.directory_map.child_count(parent) + 2));
        for &child in children {
            let node = vol.superblock.node(child);
            if node.is_a_file() {
                lines.push(format_entry(node.name(), node.used_size() as usize));
            } else {
                lines.push(format_entry(
                    node.name(),
                    vol.directory_map.child_count(child) + 2,
                ));
            }
        }
        Ok(lines)
    }
}

fn format_entry(name: &str, count: usize) -> String {
    format!("{name:<5} {count:>3}")
}

fn resolve_file(sb: &SuperBlock, name: &str, cwd: u8) -> Result<(u8, Inode), FsError> {
    let index = sb
        .node_index(name, cwd)
        .ok_or_else(|| FsError::NotFound(name.to_string()))?;
    let node = sb.node(index);
    if !node.is_a_file() {
        return Err(FsError::NotAFile(name.to_string()));
    }
    Ok((index, node))
}

/// raw block access on the mapped image
impl MountedVolume {
    fn block_slice(&self, block: u8) -> &[u8] {
        let offset = block_offset(block);
        &self.image[offset..offset + BLOCK_SIZE]
    }

    fn block_slice_mut(&mut self, block: u8) -> &mut [u8] {
        let offset = block_offset(block);
        &mut self.image[offset..offset + BLOCK_SIZE]
    }

    fn zero_block(&mut self, block: u8) {
        self.block_slice_mut(block).fill(0);
    }

    fn copy_block(&mut self, from: u8, to: u8) {
        let src = block_offset(from);
        self.image.copy_within(src..src + BLOCK_SIZE, block_offset(to));
    }

    fn rebuild_directory_map(&mut self) {
        self.directory_map = self.superblock.build_directory_map();
    }

    /// write the superblock back to block 0, in disk bit order
    fn persist(&mut self) -> Result<(), FsError> {
        let raw = self.superblock.to_raw();
        let mut block0 = &mut self.image[..BLOCK_SIZE];
        raw.serialize_into(&mut block0)?;
        self.image.flush()?;
        Ok(())
    }
}

/// multi-block mutations
impl MountedVolume {
    fn zero_subtree_blocks(&mut self, index: u8) {
        let node = self.superblock.node(index);
        if node.is_a_file() {
            if node.used_size() > 0 {
                for block in node.start_block()..=node.end_block() {
                    self.zero_block(block);
                }
            }
        } else {
            let children = self.directory_map.children(index).to_vec();
            for child in children {
                self.zero_subtree_blocks(child);
            }
        }
    }

    fn shrink_file(&mut self, index: u8, new_size: u8) -> Result<(), FsError> {
        let mut node = self.superblock.node(index);
        let start = node.start_block();
        let old_end = node.end_block();
        let first_freed = start + new_size;
        // zero the vacated tail on disk, then release it
        for block in first_freed..=old_end {
            self.zero_block(block);
        }
        self.superblock.clear_block(first_freed, old_end)?;
        node.set_used_size(new_size);
        if new_size == 0 {
            node.set_start_block(0);
        }
        self.superblock.set_node(node, index);
        Ok(())
    }

    fn grow_file(&mut self, index: u8, name: &str, new_size: u8) -> Result<(), FsError> {
        let mut node = self.superblock.node(index);
        let old_size = node.used_size();

        // a file shrunk to zero blocks has no run to extend, grow by plain
        // allocation
        if old_size == 0 {
            let start = self
                .superblock
                .find_contig_block(new_size)
                .ok_or_else(|| FsError::CannotResize {
                    name: name.to_string(),
                    size: new_size,
                })?;
            self.superblock.set_block(start, start + new_size - 1)?;
            node.set_start_block(start);
            node.set_used_size(new_size);
            self.superblock.set_node(node, index);
            return Ok(());
        }

        let start = node.start_block();
        let old_end = node.end_block();
        let new_end = start as u16 + new_size as u16 - 1;
        if new_end <= MAX_BLOCK_NUM as u16 && self.superblock.is_free_block(old_end, new_end as u8)
        {
            self.superblock.set_block(old_end + 1, new_end as u8)?;
            node.set_used_size(new_size);
            self.superblock.set_node(node, index);
            return Ok(());
        }

        // no room behind the file: relocate it to a fresh run, found while
        // the old range is still marked occupied
        let new_start = self
            .superblock
            .find_contig_block(new_size)
            .ok_or_else(|| FsError::CannotResize {
                name: name.to_string(),
                size: new_size,
            })?;
        self.superblock
            .set_block(new_start, new_start + new_size - 1)?;
        for offset in 0..old_size {
            self.copy_block(start + offset, new_start + offset);
        }
        for block in start..=old_end {
            self.zero_block(block);
        }
        self.superblock.clear_block(start, old_end)?;
        node.set_start_block(new_start);
        node.set_used_size(new_size);
        self.superblock.set_node(node, index);
        Ok(())
    }

    /// move one file to the earliest position it can slide to
    fn slide_file(&mut self, index: u8) -> Result<(), FsError> {
        let mut node = self.superblock.node(index);
        let Some(new_start) = self.superblock.find_new_start_block(node.start_block()) else {
            return Ok(());
        };
        let size = node.used_size();
        let old_start = node.start_block();
        let old_end = node.end_block();
        let new_end = new_start + size - 1;
        for offset in 0..size {
            self.copy_block(old_start + offset, new_start + offset);
        }
        // old positions not covered by the new run are stale now
        for block in (new_end + 1).max(old_start)..=old_end {
            self.zero_block(block);
        }
        self.superblock.clear_block(old_start, old_end)?;
        self.superblock.set_block(new_start, new_end)?;
        node.set_start_block(new_start);
        self.superblock.set_node(node, index);
        debug!("defragment() moved node {index} from {old_start} to {new_start}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{ConsistencyError, NUM_BLOCKS};
    use crate::mkfs::mkfs;
    use std::path::PathBuf;

    fn scratch_image(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        if path.exists() {
            std::fs::remove_file(&path).expect("remove stale test image failed");
        }
        path
    }

    fn mounted_engine(name: &str) -> (VolumeEngine, PathBuf) {
        let path = scratch_image(name);
        mkfs(&path).expect("create test image failed");
        let mut engine = VolumeEngine::new();
        engine.mount(path.to_str().unwrap()).expect("mount failed");
        (engine, path)
    }

    /// write a hand-built superblock (plus zeroed data region) to `path`
    fn write_image(path: &PathBuf, sb: &SuperBlock) {
        let mut bytes = vec![0u8; VOLUME_SIZE];
        sb.to_raw()
            .serialize_into(&mut &mut bytes[..BLOCK_SIZE])
            .unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_mount_missing_disk() {
        let mut engine = VolumeEngine::new();
        let err = engine.mount("/tmp/does-not-exist.img").unwrap_err();
        assert!(matches!(err, FsError::DiskNotFound(_)));
        assert!(!engine.is_mounted());
    }

    #[test]
    fn test_operations_require_mount() {
        let mut engine = VolumeEngine::new();
        assert!(matches!(engine.create("a", 1), Err(FsError::NotMounted)));
        assert!(matches!(engine.delete("a"), Err(FsError::NotMounted)));
        assert!(matches!(engine.read("a", 0), Err(FsError::NotMounted)));
        assert!(matches!(engine.write("a", 0), Err(FsError::NotMounted)));
        assert!(matches!(engine.set_buffer(b"x"), Err(FsError::NotMounted)));
        assert!(matches!(engine.resize("a", 2), Err(FsError::NotMounted)));
        assert!(matches!(engine.defragment(), Err(FsError::NotMounted)));
        assert!(matches!(
            engine.change_directory("a"),
            Err(FsError::NotMounted)
        ));
        assert!(matches!(engine.list(), Err(FsError::NotMounted)));
    }

    #[test]
    fn test_mount_inconsistent_image_leaves_engine_unmounted() {
        let (mut engine, good) = mounted_engine("flatfs_test_inconsistent_good.img");
        assert!(engine.is_mounted());

        let bad = scratch_image("flatfs_test_inconsistent_bad.img");
        let mut sb = SuperBlock::new();
        sb.set_node(Inode::new("c", 0, 0, ROOT_DIR), 0);
        sb.set_node(Inode::new("c", 0, 0, ROOT_DIR), 1);
        write_image(&bad, &sb);

        let err = engine.mount(bad.to_str().unwrap()).unwrap_err();
        match err {
            FsError::Inconsistent { source, .. } => {
                assert_eq!(source, ConsistencyError::DuplicateName);
                assert_eq!(source.code(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        // the failed attempt also dropped the previously mounted volume
        assert!(!engine.is_mounted());

        std::fs::remove_file(good).unwrap();
        std::fs::remove_file(bad).unwrap();
    }

    #[test]
    fn test_create_and_list() {
        let (mut engine, path) = mounted_engine("flatfs_test_create_list.img");
        engine.create("a", 2).unwrap();
        engine.create("d", 0).unwrap();
        let lines = engine.list().unwrap();
        assert_eq!(
            lines,
            vec![
                format!("{:<5} {:>3}", ".", 4),
                format!("{:<5} {:>3}", "..", 4),
                format!("{:<5} {:>3}", "a", 2),
                format!("{:<5} {:>3}", "d", 2),
            ]
        );
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_create_rejects_duplicates_and_reserved_names() {
        let (mut engine, path) = mounted_engine("flatfs_test_create_rejects.img");
        engine.create("a", 1).unwrap();
        assert!(matches!(
            engine.create("a", 2),
            Err(FsError::NameConflict(_))
        ));
        assert!(matches!(engine.create(".", 1), Err(FsError::InvalidName(_))));
        assert!(matches!(
            engine.create("..", 0),
            Err(FsError::InvalidName(_))
        ));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_create_delete_round_trip_restores_state() {
        let (mut engine, path) = mounted_engine("flatfs_test_round_trip.img");
        engine.create("keep", 1).unwrap();
        let before = engine.superblock().unwrap().clone();

        engine.create("tmp", 3).unwrap();
        engine.delete("tmp").unwrap();
        assert_eq!(engine.superblock().unwrap(), &before);

        engine.create("tmp", 3).unwrap();
        assert_eq!(engine.superblock().unwrap().node_index("tmp", ROOT_DIR), Some(1));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_delete_directory_recursively_frees_subtree() {
        let (mut engine, path) = mounted_engine("flatfs_test_delete_dir.img");
        engine.create("d", 0).unwrap();
        engine.change_directory("d").unwrap();
        engine.create("in", 2).unwrap();
        engine.create("sub", 0).unwrap();
        engine.change_directory("..").unwrap();
        let before = engine.superblock().unwrap().clone();

        engine.create("gone", 0).unwrap();
        engine.change_directory("gone").unwrap();
        engine.create("f1", 2).unwrap();
        engine.create("s", 0).unwrap();
        engine.change_directory("s").unwrap();
        engine.create("f2", 1).unwrap();
        engine.change_directory("..").unwrap();
        engine.change_directory("..").unwrap();

        engine.delete("gone").unwrap();
        assert_eq!(engine.superblock().unwrap(), &before);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_write_read_through_staging_buffer() {
        let (mut engine, path) = mounted_engine("flatfs_test_write_read.img");
        engine.create("f", 2).unwrap();
        engine.set_buffer(b"hello").unwrap();
        engine.write("f", 1).unwrap();

        engine.set_buffer(b"other data").unwrap();
        engine.read("f", 1).unwrap();
        assert_eq!(&engine.buffer()[..5], b"hello");
        // the short buffer load cleared everything past the payload
        assert!(engine.buffer()[5..].iter().all(|&b| b == 0));

        engine.read("f", 0).unwrap();
        assert!(engine.buffer().iter().all(|&b| b == 0));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_read_write_failure_modes() {
        let (mut engine, path) = mounted_engine("flatfs_test_rw_failures.img");
        engine.create("f", 2).unwrap();
        engine.create("d", 0).unwrap();
        assert!(matches!(
            engine.read("missing", 0),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(engine.read("d", 0), Err(FsError::NotAFile(_))));
        assert!(matches!(
            engine.read("f", 2),
            Err(FsError::BlockOutOfRange { block: 2, .. })
        ));
        assert!(matches!(
            engine.write("f", 2),
            Err(FsError::BlockOutOfRange { .. })
        ));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_resize_shrink_frees_and_zero_fills_tail() {
        let (mut engine, path) = mounted_engine("flatfs_test_shrink.img");
        engine.create("f", 3).unwrap();
        engine.set_buffer(b"tail").unwrap();
        engine.write("f", 2).unwrap();

        engine.resize("f", 1).unwrap();
        let sb = engine.superblock().unwrap();
        assert!(sb.block_is_used(1));
        assert!(!sb.block_is_used(2));
        assert!(!sb.block_is_used(3));

        // the vacated blocks are zero on disk
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes[2 * BLOCK_SIZE..4 * BLOCK_SIZE].iter().all(|&b| b == 0));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_resize_to_zero_keeps_an_empty_file() {
        let (mut engine, path) = mounted_engine("flatfs_test_resize_zero.img");
        engine.create("f", 2).unwrap();
        engine.resize("f", 0).unwrap();
        let sb = engine.superblock().unwrap();
        let node = sb.node(0);
        assert!(node.is_a_file());
        assert_eq!(node.used_size(), 0);
        assert_eq!(node.start_block(), 0);
        assert_eq!(sb.check_consistency(), Ok(()));

        // and the empty file can grow again
        engine.resize("f", 2).unwrap();
        assert_eq!(engine.superblock().unwrap().node(0).used_size(), 2);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_resize_grows_in_place_when_possible() {
        let (mut engine, path) = mounted_engine("flatfs_test_grow_in_place.img");
        engine.create("f", 2).unwrap();
        engine.resize("f", 4).unwrap();
        let node = engine.superblock().unwrap().node(0);
        assert_eq!(node.start_block(), 1);
        assert_eq!(node.used_size(), 4);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_resize_relocation_preserves_data() {
        let (mut engine, path) = mounted_engine("flatfs_test_relocate.img");
        engine.create("a", 2).unwrap();
        engine.create("b", 1).unwrap();
        engine.set_buffer(b"first").unwrap();
        engine.write("a", 0).unwrap();
        engine.set_buffer(b"second").unwrap();
        engine.write("a", 1).unwrap();

        // b sits right behind a, so growing must relocate
        engine.resize("a", 4).unwrap();
        let sb = engine.superblock().unwrap();
        let node = sb.node(0);
        assert_eq!(node.start_block(), 4);
        assert_eq!(node.used_size(), 4);
        assert_eq!(sb.node(1).start_block(), 3);
        assert_eq!(sb.check_consistency(), Ok(()));

        engine.read("a", 0).unwrap();
        assert_eq!(&engine.buffer()[..5], b"first");
        engine.read("a", 1).unwrap();
        assert_eq!(&engine.buffer()[..6], b"second");

        // the old run was zero-filled and released
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes[BLOCK_SIZE..3 * BLOCK_SIZE].iter().all(|&b| b == 0));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_resize_without_room_fails_without_side_effects() {
        let (mut engine, path) = mounted_engine("flatfs_test_resize_full.img");
        engine.create("a", 100).unwrap();
        engine.create("b", 20).unwrap();
        let before = engine.superblock().unwrap().clone();
        assert!(matches!(
            engine.resize("b", 30),
            Err(FsError::CannotResize { .. })
        ));
        assert_eq!(engine.superblock().unwrap(), &before);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_failed_create_leaves_state_unchanged() {
        let (mut engine, path) = mounted_engine("flatfs_test_failed_create.img");
        engine.create("a", 126).unwrap();
        let before = engine.superblock().unwrap().clone();
        assert!(matches!(
            engine.create("b", 5),
            Err(FsError::NoContiguousRun { size: 5, .. })
        ));
        assert_eq!(engine.superblock().unwrap(), &before);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_defragment_packs_files_in_start_order() {
        let path = scratch_image("flatfs_test_defrag.img");
        // files at starts 10, 5 and 20 with gaps in between
        let mut sb = SuperBlock::new();
        sb.set_node(Inode::new("f10", 2, 10, ROOT_DIR), 0);
        sb.set_node(Inode::new("f5", 3, 5, ROOT_DIR), 1);
        sb.set_node(Inode::new("f20", 1, 20, ROOT_DIR), 2);
        sb.set_block(10, 11).unwrap();
        sb.set_block(5, 7).unwrap();
        sb.set_block(20, 20).unwrap();

        let mut bytes = vec![0u8; VOLUME_SIZE];
        sb.to_raw()
            .serialize_into(&mut &mut bytes[..BLOCK_SIZE])
            .unwrap();
        for (block, marker) in [(10u8, 0xaau8), (11, 0xab), (5, 0x55), (6, 0x56), (7, 0x57), (20, 0x99)]
        {
            bytes[block as usize * BLOCK_SIZE..(block as usize + 1) * BLOCK_SIZE].fill(marker);
        }
        std::fs::write(&path, bytes).unwrap();

        let mut engine = VolumeEngine::new();
        engine.mount(path.to_str().unwrap()).unwrap();
        engine.defragment().unwrap();

        let sb = engine.superblock().unwrap();
        // packed from block 1 up, ordered by original start block
        assert_eq!(sb.node(1).start_block(), 1); // f5, 3 blocks
        assert_eq!(sb.node(0).start_block(), 4); // f10, 2 blocks
        assert_eq!(sb.node(2).start_block(), 6); // f20, 1 block
        assert_eq!(sb.check_consistency(), Ok(()));
        for block in 7..NUM_BLOCKS as u8 {
            assert!(!sb.block_is_used(block));
        }

        // contents moved with the files, vacated blocks are zero
        let bytes = std::fs::read(&path).unwrap();
        let block = |b: usize| &bytes[b * BLOCK_SIZE..(b + 1) * BLOCK_SIZE];
        assert!(block(1).iter().all(|&b| b == 0x55));
        assert!(block(3).iter().all(|&b| b == 0x57));
        assert!(block(4).iter().all(|&b| b == 0xaa));
        assert!(block(5).iter().all(|&b| b == 0xab));
        assert!(block(6).iter().all(|&b| b == 0x99));
        assert!(block(7).iter().all(|&b| b == 0));
        assert!(block(10).iter().all(|&b| b == 0));
        assert!(block(20).iter().all(|&b| b == 0));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_change_directory_edge_cases() {
        let (mut engine, path) = mounted_engine("flatfs_test_cd.img");
        engine.create("d", 0).unwrap();
        engine.create("f", 1).unwrap();

        // "." and ".." at the root are no-ops
        engine.change_directory(".").unwrap();
        engine.change_directory("..").unwrap();
        assert_eq!(engine.current_directory(), Some(ROOT_DIR));

        engine.change_directory("d").unwrap();
        assert_eq!(engine.current_directory(), Some(0));
        engine.change_directory(".").unwrap();
        assert_eq!(engine.current_directory(), Some(0));
        engine.change_directory("..").unwrap();
        assert_eq!(engine.current_directory(), Some(ROOT_DIR));

        assert!(matches!(
            engine.change_directory("f"),
            Err(FsError::NotADirectory(_))
        ));
        assert!(matches!(
            engine.change_directory("nope"),
            Err(FsError::NotFound(_))
        ));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_same_name_in_different_directories() {
        let (mut engine, path) = mounted_engine("flatfs_test_same_name.img");
        engine.create("x", 1).unwrap();
        engine.create("d", 0).unwrap();
        engine.change_directory("d").unwrap();
        engine.create("x", 2).unwrap();
        let sb = engine.superblock().unwrap();
        assert_eq!(sb.check_consistency(), Ok(()));
        assert_eq!(sb.node_index("x", ROOT_DIR), Some(0));
        assert_eq!(sb.node_index("x", 1), Some(2));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_persisted_superblock_uses_disk_bit_order() {
        let (mut engine, path) = mounted_engine("flatfs_test_bit_order.img");
        engine.create("a", 1).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        // block 1 occupies the second-highest bit of disk byte 0
        assert_eq!(bytes[0], 0b0100_0000);

        // and the image still mounts cleanly through the reverse transform
        let mut other = VolumeEngine::new();
        other.mount(path.to_str().unwrap()).unwrap();
        assert!(other.superblock().unwrap().block_is_used(1));
        std::fs::remove_file(path).unwrap();
    }
}
