//! The staging engine: turns a "create file" request into a journaled transaction.
//!
//! Nothing in this module writes to a target block. Every mutation is synthesized in memory and
//! handed to a [`TxnWriter`], which is the only thing that touches the journal region; the image
//! outside the journal region is untouched until [`crate::replay`] runs.

use crate::blockio::Image;
use crate::error::Error;
use crate::error::Result;
use crate::journal;
use crate::journal::JournalHeader;
use crate::layout;
use crate::layout::DirEntry;
use crate::layout::Inode;
use crate::layout::Superblock;
use crate::layout::BLOCK_SIZE;
use crate::layout::NAME_LEN;

/// The outcome of a successful stage: the inode number allocated to the new file.
pub struct Staged {
	pub inode: u32,
}

/// Stages the creation of a regular file named `filename` at the root of the image, appending
/// one committed transaction to the journal.
///
/// Returns [`Error::FilenameTooLong`] if `filename` (as UTF-8 bytes) does not fit with its NUL
/// terminator in a 28-byte directory entry.
pub fn create(image: &mut Image, filename: &str) -> Result<Staged> {
	if filename.len() >= NAME_LEN {
		return Err(Error::FilenameTooLong);
	}

	// 1. Validate superblock.
	let mut sb_block = [0u8; BLOCK_SIZE];
	image.read_block(layout::SUPERBLOCK_BLOCK, &mut sb_block)?;
	let sb = Superblock::decode(&sb_block)?;

	// 2. Load or initialize the journal header, without writing it back yet.
	let mut hdr_buf = [0u8; journal::JOURNAL_HEADER_SIZE];
	image.read_at(journal_offset(&sb), &mut hdr_buf)?;
	let mut header = JournalHeader::decode(&hdr_buf).unwrap_or_else(JournalHeader::fresh);

	// 4. Allocate a free inode. Needed ahead of reserving capacity (step 3 below): whether the
	// root's size bump rides along with the target inode block's own record, or needs a fourth,
	// separate record, depends on which inode gets allocated.
	let mut inode_bitmap = [0u8; BLOCK_SIZE];
	image.read_block(sb.inode_bitmap_block, &mut inode_bitmap)?;
	let free_inode = (1..sb.inode_count)
		.find(|&i| !layout::is_bit_set(&inode_bitmap, i))
		.ok_or(Error::NoFreeInodes)?;

	// 3. Reserve capacity. The root inode's block offset is always 0 (it's inode 0), so the exact
	// record count is known from `free_inode` alone — no need to read the root's directory block
	// for that. Check capacity here, before the (more expensive) lookup of a free directory slot,
	// so a full journal is reported before a full directory would be.
	let root_inode_block_offset = layout::ROOT_INODE / layout::INODES_PER_BLOCK;
	let root_inode_slot = layout::ROOT_INODE % layout::INODES_PER_BLOCK;
	let target_inode_block_offset = free_inode / layout::INODES_PER_BLOCK;
	let target_inode_block = sb.inode_start + target_inode_block_offset;
	let needs_separate_root_record = target_inode_block_offset != root_inode_block_offset;
	let data_records = if needs_separate_root_record {
		4
	} else {
		3
	};
	let required = data_records * journal::DATA_RECORD_SIZE + journal::COMMIT_RECORD_SIZE;
	if header.nbytes_used as usize + required > journal::JOURNAL_CAPACITY {
		return Err(Error::JournalFull);
	}

	// 5. Find a free directory slot in the root's data block.
	let mut inode_table_block0 = [0u8; BLOCK_SIZE];
	image.read_block(sb.inode_start, &mut inode_table_block0)?;
	let root = Inode::decode(&inode_table_block0, root_inode_slot);
	let root_data_block = root.direct[0];
	if root_data_block == 0 {
		return Err(Error::RootHasNoDataBlock);
	}

	let mut root_data = [0u8; BLOCK_SIZE];
	image.read_block(root_data_block, &mut root_data)?;
	let free_slot = (0..layout::DIRENTS_PER_BLOCK)
		.find(|&i| DirEntry::is_free(&root_data, i))
		.ok_or(Error::RootDirectoryFull)?;

	// 6. Compute the new block images in memory.
	let timestamp = now_secs();

	layout::set_bit(&mut inode_bitmap, free_inode);

	let new_root_size = grown_root_size(root.size, free_slot);

	// The block actually holding the target inode's slot; reuse the already-loaded first inode
	// table block when that's the one in play.
	let mut target_inode_block_buf = if target_inode_block == sb.inode_start {
		inode_table_block0
	} else {
		let mut buf = [0u8; BLOCK_SIZE];
		image.read_block(target_inode_block, &mut buf)?;
		buf
	};
	let new_inode = Inode {
		ty: layout::INODE_TYPE_REGULAR,
		links: 1,
		size: 0,
		direct: [0; 8],
		ctime: timestamp,
		mtime: timestamp,
	};
	new_inode.encode_into(&mut target_inode_block_buf, free_inode % layout::INODES_PER_BLOCK);
	if !needs_separate_root_record {
		// The root inode lives in this same block: fold its size bump into this record.
		let mut root = root;
		root.size = new_root_size;
		root.encode_into(&mut target_inode_block_buf, root_inode_slot);
	}

	DirEntry::write_into(&mut root_data, free_slot, free_inode, filename);

	// 7. Append the transaction's records.
	let mut txn = TxnWriter::new(image, &mut header, journal_offset(&sb));
	txn.append_data(sb.inode_bitmap_block, &inode_bitmap)?;
	txn.append_data(target_inode_block, &target_inode_block_buf)?;
	txn.append_data(root_data_block, &root_data)?;
	if needs_separate_root_record {
		let mut root_inode_block_buf = inode_table_block0;
		let mut root = root;
		root.size = new_root_size;
		root.encode_into(&mut root_inode_block_buf, root_inode_slot);
		txn.append_data(sb.inode_start + root_inode_block_offset, &root_inode_block_buf)?;
	}
	txn.append_commit()?;

	// Durability fence: every record byte above must be on disk before the header publishes
	// the transaction as committed.
	image.sync()?;

	// 8. Publish: the header write is the commit barrier.
	image.write_at(journal_offset(&sb), &header.encode())?;
	image.sync()?;

	Ok(Staged {
		inode: free_inode,
	})
}

/// Returns the root directory's size after accounting for a dirent written at `slot`. Monotonic:
/// never shrinks the size across stages.
fn grown_root_size(current: u32, slot: usize) -> u32 {
	let implied = (slot as u32 + 1) * layout::DIRENT_SIZE as u32;
	current.max(implied)
}

fn journal_offset(sb: &Superblock) -> u64 {
	sb.journal_block as u64 * BLOCK_SIZE as u64
}

fn now_secs() -> u32 {
	use std::time::SystemTime;
	use std::time::UNIX_EPOCH;
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("system clock before Unix epoch")
		.as_secs() as u32
}

/// Bundles the file handle, the running journal header, and the append cursor the way a closure
/// would capture them by reference, so appending a record can advance both the cursor and the
/// header's byte count together.
struct TxnWriter<'a> {
	image: &'a mut Image,
	header: &'a mut JournalHeader,
	region_start: u64,
}

impl<'a> TxnWriter<'a> {
	fn new(image: &'a mut Image, header: &'a mut JournalHeader, region_start: u64) -> Self {
		Self {
			image,
			header,
			region_start,
		}
	}

	fn cursor(&self) -> u64 {
		self.region_start + self.header.nbytes_used as u64
	}

	fn append_data(&mut self, target_block: u32, payload: &[u8]) -> Result<()> {
		let record = journal::encode_data_record(target_block, payload);
		self.image.write_at(self.cursor(), &record)?;
		self.header.nbytes_used += record.len() as u32;
		Ok(())
	}

	fn append_commit(&mut self) -> Result<()> {
		let record = journal::encode_commit_record();
		self.image.write_at(self.cursor(), &record)?;
		self.header.nbytes_used += record.len() as u32;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::mkimage;
	use crate::replay;
	use std::io::Seek;
	use tempfile::tempfile;

	fn fresh_image() -> Image {
		let mut f = tempfile().unwrap();
		mkimage::format(&mut f).unwrap();
		f.rewind().unwrap();
		Image::new(f)
	}

	#[test]
	fn single_stage_touches_only_the_journal_region() {
		let mut img = fresh_image();

		let mut before_bitmap = [0u8; BLOCK_SIZE];
		img.read_block(layout::INODE_BITMAP_BLOCK, &mut before_bitmap).unwrap();
		let mut before_table = [0u8; BLOCK_SIZE];
		img.read_block(layout::INODE_TABLE_START, &mut before_table).unwrap();
		let mut before_root_data = [0u8; BLOCK_SIZE];
		img.read_block(layout::DATA_START, &mut before_root_data).unwrap();

		let staged = create(&mut img, "hello").unwrap();
		assert_eq!(staged.inode, 1);

		let mut after_bitmap = [0u8; BLOCK_SIZE];
		img.read_block(layout::INODE_BITMAP_BLOCK, &mut after_bitmap).unwrap();
		let mut after_table = [0u8; BLOCK_SIZE];
		img.read_block(layout::INODE_TABLE_START, &mut after_table).unwrap();
		let mut after_root_data = [0u8; BLOCK_SIZE];
		img.read_block(layout::DATA_START, &mut after_root_data).unwrap();

		assert_eq!(before_bitmap, after_bitmap);
		assert_eq!(before_table, after_table);
		assert_eq!(before_root_data, after_root_data);

		let mut hdr_buf = [0u8; journal::JOURNAL_HEADER_SIZE];
		img.read_at(layout::JOURNAL_BLOCK as u64 * BLOCK_SIZE as u64, &mut hdr_buf).unwrap();
		let hdr = JournalHeader::decode(&hdr_buf).unwrap();
		assert_eq!(hdr.nbytes_used as usize, journal::JOURNAL_HEADER_SIZE + 3 * journal::DATA_RECORD_SIZE + journal::COMMIT_RECORD_SIZE);
	}

	#[test]
	fn name_too_long_is_rejected_before_any_write() {
		let mut img = fresh_image();
		let long_name = "a".repeat(28);
		let err = create(&mut img, &long_name).unwrap_err();
		assert!(matches!(err, Error::FilenameTooLong));
	}

	#[test]
	fn journal_full_after_five_stages() {
		let mut img = fresh_image();
		for i in 0..5 {
			create(&mut img, &format!("f{i}")).unwrap();
		}
		let err = create(&mut img, "overflow").unwrap_err();
		assert!(matches!(err, Error::JournalFull));
	}

	/// The capacity check must run before the (more expensive) directory-slot lookup, using the
	/// exact record count for whichever inode is about to be allocated — not a count computed
	/// only after scanning the directory. Once allocations land in the second inode table block,
	/// each transaction needs a fourth record for the root's size bump, so the journal fills up
	/// after three such stages rather than five.
	#[test]
	fn journal_full_accounts_for_the_fourth_record_before_scanning_the_directory() {
		let mut img = fresh_image();
		// Fill and install the first inode table block so every further allocation lands in the
		// second block, where the root's size bump always needs its own record.
		for i in 0..layout::INODES_PER_BLOCK {
			create(&mut img, &format!("f{i}")).unwrap();
			replay::install(&mut img).unwrap();
		}

		for i in 0..3 {
			create(&mut img, &format!("g{i}")).unwrap();
		}
		let err = create(&mut img, "overflow").unwrap_err();
		assert!(matches!(err, Error::JournalFull));
	}

	#[test]
	fn two_stages_then_install_populate_root_directory() {
		let mut img = fresh_image();
		create(&mut img, "a").unwrap();
		create(&mut img, "b").unwrap();
		let report = replay::install(&mut img).unwrap();
		assert_eq!(report.committed_transactions(), 2);

		let mut root_data = [0u8; BLOCK_SIZE];
		img.read_block(layout::DATA_START, &mut root_data).unwrap();
		assert!(!DirEntry::is_free(&root_data, 0));
		assert!(!DirEntry::is_free(&root_data, 1));
		assert_eq!(DirEntry::decode(&root_data, 0).name_str(), "a");
		assert_eq!(DirEntry::decode(&root_data, 1).name_str(), "b");

		let mut table = [0u8; BLOCK_SIZE];
		img.read_block(layout::INODE_TABLE_START, &mut table).unwrap();
		let root = Inode::decode(&table, layout::ROOT_INODE);
		assert_eq!(root.size, 64);
	}

	/// Once more than [`layout::INODES_PER_BLOCK`] files have been created, a new inode lands in
	/// the second inode table block while the root inode stays in the first: the root's size
	/// bump must travel in its own data record (`needs_separate_root_record`).
	#[test]
	fn root_size_grows_across_inode_table_blocks() {
		let mut img = fresh_image();
		let file_count = layout::INODES_PER_BLOCK as usize + 1;
		for i in 0..file_count {
			create(&mut img, &format!("f{i}")).unwrap();
			let outcome = replay::install(&mut img).unwrap();
			assert_eq!(outcome.committed_transactions(), 1);
		}

		let mut table = [0u8; BLOCK_SIZE];
		img.read_block(layout::INODE_TABLE_START, &mut table).unwrap();
		let root = Inode::decode(&table, layout::ROOT_INODE);
		assert_eq!(root.size, file_count as u32 * layout::DIRENT_SIZE as u32);

		let mut table1 = [0u8; BLOCK_SIZE];
		img.read_block(layout::INODE_TABLE_START + 1, &mut table1).unwrap();
		let last = Inode::decode(&table1, file_count as u32 % layout::INODES_PER_BLOCK);
		assert_eq!(last.ty, layout::INODE_TYPE_REGULAR);

		let mut root_data = [0u8; BLOCK_SIZE];
		img.read_block(layout::DATA_START, &mut root_data).unwrap();
		assert_eq!(DirEntry::decode(&root_data, file_count - 1).name_str(), format!("f{}", file_count - 1));
	}
}
