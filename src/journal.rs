//! Encode/decode of the journal header and the two record variants.
//!
//! Every size here is load-bearing: replay trusts the encoded `size` field of a record header to
//! advance its scan cursor, so the encoded byte count of each variant must exactly match what
//! gets written. Records are serialized byte-by-byte into owned buffers rather than
//! reinterpret-cast from a `#[repr(C, packed)]` struct, since taking a reference to a field of a
//! packed struct is undefined behavior when that field isn't naturally aligned (`block_no` at
//! offset 4 inside a record that starts on an arbitrary journal offset is not).

use crate::layout::read_u16;
use crate::layout::read_u32;
use crate::layout::write_u16;
use crate::layout::write_u32;
use crate::layout::BLOCK_SIZE;

/// The journal header's magic number.
pub const JOURNAL_MAGIC: u32 = 0x4A52_4E4C;

/// Record type: a full post-mutation block image destined for `block_no`.
pub const REC_TYPE_DATA: u16 = 1;
/// Record type: marks the end of a transaction, publishing every DATA record since the last
/// COMMIT (or the start of the region).
pub const REC_TYPE_COMMIT: u16 = 2;

/// On-disk size of the journal header.
pub const JOURNAL_HEADER_SIZE: usize = 8;
/// On-disk size of a record header (type + size).
pub const RECORD_HEADER_SIZE: usize = 4;
/// On-disk size of a data record: record header, target block index, one full block.
pub const DATA_RECORD_SIZE: usize = RECORD_HEADER_SIZE + 4 + BLOCK_SIZE;
/// On-disk size of a commit record: just the record header.
pub const COMMIT_RECORD_SIZE: usize = RECORD_HEADER_SIZE;

/// The usable capacity of the journal region in bytes.
pub const JOURNAL_CAPACITY: usize = crate::layout::JOURNAL_BLOCKS as usize * BLOCK_SIZE;

/// The decoded journal header.
#[derive(Debug, Clone, Copy)]
pub struct JournalHeader {
	pub nbytes_used: u32,
}

impl JournalHeader {
	/// A freshly initialized header: magic present, region otherwise empty.
	pub fn fresh() -> Self {
		Self {
			nbytes_used: JOURNAL_HEADER_SIZE as u32,
		}
	}

	/// Decodes a header from its first [`JOURNAL_HEADER_SIZE`] bytes. Returns `None` if the
	/// magic does not match, i.e. the journal region is in the **Absent** state.
	pub fn decode(buf: &[u8]) -> Option<Self> {
		if read_u32(buf, 0) != JOURNAL_MAGIC {
			return None;
		}
		Some(Self {
			nbytes_used: read_u32(buf, 4),
		})
	}

	/// Encodes the header.
	pub fn encode(&self) -> [u8; JOURNAL_HEADER_SIZE] {
		let mut buf = [0u8; JOURNAL_HEADER_SIZE];
		write_u32(&mut buf, 0, JOURNAL_MAGIC);
		write_u32(&mut buf, 4, self.nbytes_used);
		buf
	}
}

/// A decoded record header.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
	pub ty: u16,
	pub size: u16,
}

impl RecordHeader {
	/// Decodes a record header from its first [`RECORD_HEADER_SIZE`] bytes.
	pub fn decode(buf: &[u8]) -> Self {
		Self {
			ty: read_u16(buf, 0),
			size: read_u16(buf, 2),
		}
	}
}

/// Encodes a data record targeting `block_no` with `payload` as its post-mutation image.
pub fn encode_data_record(block_no: u32, payload: &[u8]) -> Vec<u8> {
	assert_eq!(payload.len(), BLOCK_SIZE);
	let mut buf = vec![0u8; DATA_RECORD_SIZE];
	write_u16(&mut buf, 0, REC_TYPE_DATA);
	write_u16(&mut buf, 2, DATA_RECORD_SIZE as u16);
	write_u32(&mut buf, 4, block_no);
	buf[8..8 + BLOCK_SIZE].copy_from_slice(payload);
	buf
}

/// Encodes a commit record.
pub fn encode_commit_record() -> [u8; COMMIT_RECORD_SIZE] {
	let mut buf = [0u8; COMMIT_RECORD_SIZE];
	write_u16(&mut buf, 0, REC_TYPE_COMMIT);
	write_u16(&mut buf, 2, COMMIT_RECORD_SIZE as u16);
	buf
}

/// A data record's fields as decoded from a buffer, borrowing its payload rather than copying
/// it — the buffer it points into (the whole journal region, read once by replay) must outlive
/// this view.
pub struct DataRecordView<'a> {
	pub block_no: u32,
	pub payload: &'a [u8],
}

/// Decodes the target block index and payload out of a data record whose body (i.e. the bytes
/// immediately following its already-decoded [`RecordHeader`]) starts at `body`.
pub fn decode_data_record_body(body: &[u8]) -> DataRecordView<'_> {
	DataRecordView {
		block_no: read_u32(body, 0),
		payload: &body[4..4 + BLOCK_SIZE],
	}
}
