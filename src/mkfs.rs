//! format a fresh volume image
use crate::fs::{SuperBlock, BLOCK_SIZE, VOLUME_SIZE};
use anyhow::Context;
use memmap2::MmapMut;
use std::{fs::OpenOptions, path::Path};

/// create a new 128 KiB volume image at `image_file_path`
///
/// The superblock starts out empty (bitmap clear, every inode slot unused)
/// and the data region is zero-filled, so the image mounts cleanly. An
/// existing file is never overwritten.
/// # Return
/// an [anyhow::Result] to indicate whether the operation is successful
pub fn mkfs<P>(image_file_path: P) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(image_file_path.as_ref())
        .with_context(|| {
            format!(
                "cannot create image file {}",
                image_file_path.as_ref().display()
            )
        })?;
    // all data blocks are zero via `set_len`
    file.set_len(VOLUME_SIZE as u64)?;

    // Safety
    // The file was just created with read and write permissions and no
    // other user can hold it open yet.
    let mut image = unsafe { MmapMut::map_mut(&file)? };
    let superblock = SuperBlock::new();
    superblock
        .to_raw()
        .serialize_into(&mut &mut image[..BLOCK_SIZE])?;
    image.flush()?;
    Ok(())
}
