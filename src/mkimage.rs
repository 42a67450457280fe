//! Formats a fresh image with this crate's fixed layout.
//!
//! This is not the production formatter the staging/replay engines assume runs ahead of them;
//! it exists so the crate is exercisable end-to-end — by its own tests and by the `mkimage`
//! subcommand — without depending on one. Scaled down from `mkfs::ext2`'s own approach
//! (superblock + bitmaps + inode table + root directory, written in the same block-at-a-time
//! style) to this image's single, fixed layout instead of ext2's group-parameterized one.

use std::fs::File;
use std::io::Write;

use crate::error::Result;
use crate::layout;
use crate::layout::Inode;
use crate::layout::Superblock;
use crate::layout::BLOCK_SIZE;

/// Formats `file` in place as a fresh, empty image: superblock, empty journal, inode/data
/// bitmaps with only the root accounted for, and a root directory inode with one zeroed data
/// block.
pub fn format(file: &mut File) -> Result<()> {
	file.set_len(layout::TOTAL_BLOCKS as u64 * BLOCK_SIZE as u64)?;

	let sb = Superblock::fresh();
	file.write_all_at(&sb.encode(), block_offset(layout::SUPERBLOCK_BLOCK))?;

	let zero_block = [0u8; BLOCK_SIZE];
	for b in layout::JOURNAL_BLOCK..layout::JOURNAL_BLOCK + layout::JOURNAL_BLOCKS {
		file.write_all_at(&zero_block, block_offset(b))?;
	}

	let mut inode_bitmap = [0u8; BLOCK_SIZE];
	layout::set_bit(&mut inode_bitmap, layout::ROOT_INODE);
	file.write_all_at(&inode_bitmap, block_offset(layout::INODE_BITMAP_BLOCK))?;

	let mut data_bitmap = [0u8; BLOCK_SIZE];
	layout::set_bit(&mut data_bitmap, 0); // bit i <-> data block DATA_START + i; root uses bit 0
	file.write_all_at(&data_bitmap, block_offset(layout::DATA_BITMAP_BLOCK))?;

	let mut inode_table_block0 = [0u8; BLOCK_SIZE];
	let root = Inode {
		ty: layout::INODE_TYPE_DIRECTORY,
		links: 2,
		size: 0,
		direct: [layout::DATA_START, 0, 0, 0, 0, 0, 0, 0],
		ctime: now_secs(),
		mtime: now_secs(),
	};
	root.encode_into(&mut inode_table_block0, layout::ROOT_INODE);
	file.write_all_at(&inode_table_block0, block_offset(layout::INODE_TABLE_START))?;
	for b in layout::INODE_TABLE_START + 1..layout::INODE_TABLE_START + layout::INODE_TABLE_BLOCKS {
		file.write_all_at(&zero_block, block_offset(b))?;
	}

	file.write_all_at(&zero_block, block_offset(layout::DATA_START))?;
	for b in layout::DATA_START + 1..layout::TOTAL_BLOCKS {
		file.write_all_at(&zero_block, block_offset(b))?;
	}

	Ok(())
}

fn block_offset(index: u32) -> u64 {
	index as u64 * BLOCK_SIZE as u64
}

fn now_secs() -> u32 {
	use std::time::SystemTime;
	use std::time::UNIX_EPOCH;
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("system clock before Unix epoch")
		.as_secs() as u32
}

/// Positioned whole-buffer write against a bare `File`, needed here because `mkimage` lays out
/// the whole image before there's an [`crate::blockio::Image`] open on it to use instead.
trait WriteAllAt {
	fn write_all_at(&mut self, buf: &[u8], offset: u64) -> std::io::Result<()>;
}

impl WriteAllAt for File {
	fn write_all_at(&mut self, buf: &[u8], offset: u64) -> std::io::Result<()> {
		use std::io::Seek;
		use std::io::SeekFrom;
		self.seek(SeekFrom::Start(offset))?;
		self.write_all(buf)
	}
}
