//! The replay engine: applies every committed transaction in the journal to its target blocks,
//! then truncates the journal.
//!
//! The pending list holds byte ranges into the single in-memory copy of the journal region
//! rather than raw pointers: the buffer outlives the list by construction (it's a local that
//! drops after the scan), so an index is enough and there's nothing unsafe to uphold.

use std::ops::Range;

use crate::blockio::Image;
use crate::error::Error;
use crate::error::Result;
use crate::journal;
use crate::journal::JournalHeader;
use crate::journal::RecordHeader;
use crate::layout;
use crate::layout::Superblock;
use crate::layout::BLOCK_SIZE;

/// The outcome of an `install` invocation.
pub enum Outcome {
	/// The journal region's magic is absent: nothing has ever been staged.
	NotInitialized,
	/// The journal is initialized but holds no records.
	Empty,
	/// At least the scan ran; `committed` transactions were applied.
	Replayed {
		committed: u32,
	},
}

impl Outcome {
	/// The number of transactions applied, 0 for [`Outcome::NotInitialized`] and
	/// [`Outcome::Empty`].
	pub fn committed_transactions(&self) -> u32 {
		match self {
			Self::Replayed {
				committed,
			} => *committed,
			_ => 0,
		}
	}
}

/// Replays every committed transaction in the journal onto the main image, then resets the
/// journal region to empty.
pub fn install(image: &mut Image) -> Result<Outcome> {
	let mut sb_block = [0u8; BLOCK_SIZE];
	image.read_block(layout::SUPERBLOCK_BLOCK, &mut sb_block)?;
	let sb = Superblock::decode(&sb_block)?;
	let journal_offset = sb.journal_block as u64 * BLOCK_SIZE as u64;

	let mut hdr_buf = [0u8; journal::JOURNAL_HEADER_SIZE];
	image.read_at(journal_offset, &mut hdr_buf)?;
	let header = match JournalHeader::decode(&hdr_buf) {
		Some(h) => h,
		None => return Ok(Outcome::NotInitialized),
	};
	if header.nbytes_used as usize == journal::JOURNAL_HEADER_SIZE {
		return Ok(Outcome::Empty);
	}

	let mut region = vec![0u8; journal::JOURNAL_CAPACITY];
	image.read_at(journal_offset, &mut region)?;

	let mut pending: Vec<(u32, Range<usize>)> = Vec::new();
	let mut committed = 0u32;
	let mut cursor = journal::JOURNAL_HEADER_SIZE;
	let limit = header.nbytes_used as usize;

	while cursor < limit {
		if cursor + journal::RECORD_HEADER_SIZE > limit {
			break;
		}
		let rh = RecordHeader::decode(&region[cursor..cursor + journal::RECORD_HEADER_SIZE]);
		let size = rh.size as usize;
		if cursor + size > limit {
			break;
		}

		match rh.ty {
			journal::REC_TYPE_DATA => {
				let body = &region[cursor + journal::RECORD_HEADER_SIZE..cursor + size];
				let view = journal::decode_data_record_body(body);
				let payload_start = cursor + journal::RECORD_HEADER_SIZE + 4;
				pending.push((view.block_no, payload_start..payload_start + BLOCK_SIZE));
			},
			journal::REC_TYPE_COMMIT => {
				for (target_block, range) in pending.drain(..) {
					image.write_block(target_block, &region[range])?;
				}
				committed += 1;
			},
			other => return Err(Error::UnknownRecordType(other)),
		}

		cursor += size;
	}

	// A non-empty pending list here is a dangling, uncommitted tail: discard it (crash-abort
	// semantics), not an error.
	if !pending.is_empty() {
		eprintln!("warning: discarding incomplete transaction at end of journal");
	}

	// Completion barrier: every target-block write above must be durable before the header is
	// reset, otherwise a crash in between would leave an empty journal and a half-updated image
	// with no record of the transaction that was supposed to produce it.
	image.sync()?;

	let reset = JournalHeader::fresh();
	image.write_at(journal_offset, &reset.encode())?;
	image.sync()?;

	Ok(Outcome::Replayed {
		committed,
	})
}
