//! Positioned, unbuffered block I/O over the image file.
//!
//! No component other than this one issues a raw `seek`/`read`/`write` against the image; every
//! other module goes through [`Image::read_block`] and [`Image::write_at`].

use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;

use crate::error::Error;
use crate::error::Result;
use crate::layout::BLOCK_SIZE;

/// A disk image opened for block-level I/O.
pub struct Image {
	file: File,
}

impl Image {
	/// Wraps an already-open file.
	pub fn new(file: File) -> Self {
		Self {
			file,
		}
	}

	/// Reads block `index` into `buf`, which must be exactly [`BLOCK_SIZE`] bytes.
	pub fn read_block(&mut self, index: u32, buf: &mut [u8]) -> Result<()> {
		assert_eq!(buf.len(), BLOCK_SIZE);
		self.file.seek(SeekFrom::Start(index as u64 * BLOCK_SIZE as u64))?;
		self.file.read_exact(buf).map_err(|e| short_or_io(e, "read"))
	}

	/// Reads `buf.len()` bytes starting at byte offset `offset`.
	pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
		self.file.seek(SeekFrom::Start(offset))?;
		self.file.read_exact(buf).map_err(|e| short_or_io(e, "read"))
	}

	/// Writes `bytes` at byte offset `offset`.
	pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
		self.file.seek(SeekFrom::Start(offset))?;
		self.file.write_all(bytes).map_err(|e| short_or_io(e, "write"))
	}

	/// Writes a full block at block index `index`. `bytes` must be exactly [`BLOCK_SIZE`] bytes.
	pub fn write_block(&mut self, index: u32, bytes: &[u8]) -> Result<()> {
		assert_eq!(bytes.len(), BLOCK_SIZE);
		self.write_at(index as u64 * BLOCK_SIZE as u64, bytes)
	}

	/// Forces previously issued writes to durable storage. Used at the staging commit barrier
	/// and the replay completion barrier (see the journaling invariants in the module docs of
	/// [`crate::stage`] and [`crate::replay`]).
	pub fn sync(&mut self) -> Result<()> {
		self.file.sync_data()?;
		Ok(())
	}
}

/// `read_exact`/`write_all` already report `UnexpectedEof`/`WriteZero` for short transfers; this
/// just relabels those as the crate's own error so callers get a consistent diagnostic ("short
/// read"/"short write") instead of a raw libstd message.
fn short_or_io(e: std::io::Error, what: &'static str) -> Error {
	use std::io::ErrorKind;
	match e.kind() {
		ErrorKind::UnexpectedEof | ErrorKind::WriteZero => Error::ShortTransfer {
			what,
		},
		_ => Error::Io(e),
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::Seek;
	use tempfile::tempfile;

	fn blank_image() -> Image {
		let mut f = tempfile().unwrap();
		f.set_len(85 * BLOCK_SIZE as u64).unwrap();
		f.rewind().unwrap();
		Image::new(f)
	}

	#[test]
	fn write_then_read_block() {
		let mut img = blank_image();
		let mut payload = [0u8; BLOCK_SIZE];
		payload[0] = 0xAB;
		payload[BLOCK_SIZE - 1] = 0xCD;
		img.write_block(21, &payload).unwrap();

		let mut buf = [0u8; BLOCK_SIZE];
		img.read_block(21, &mut buf).unwrap();
		assert_eq!(buf, payload);

		// Neighbouring blocks untouched.
		let mut neighbour = [0u8; BLOCK_SIZE];
		img.read_block(20, &mut neighbour).unwrap();
		assert_eq!(neighbour, [0u8; BLOCK_SIZE]);
	}

	#[test]
	fn short_read_past_end_of_file() {
		let mut f = tempfile().unwrap();
		f.set_len(10).unwrap();
		let mut img = Image::new(f);
		let mut buf = [0u8; BLOCK_SIZE];
		let err = img.read_block(0, &mut buf).unwrap_err();
		assert!(matches!(err, Error::ShortTransfer { .. }));
	}
}
