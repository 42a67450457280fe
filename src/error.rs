//! The crate's error type, shared by the staging and replay engines.

use std::fmt;
use std::io;

/// An error produced while staging or replaying a transaction.
#[derive(Debug)]
pub enum Error {
	/// The superblock's magic number does not match.
	InvalidSuperblock,
	/// A journal record carries a type other than DATA or COMMIT.
	UnknownRecordType(u16),
	/// The root inode has no data block allocated.
	RootHasNoDataBlock,
	/// The journal region does not have enough free space left for a new transaction.
	JournalFull,
	/// No inode index is free.
	NoFreeInodes,
	/// The root directory has no free entry left.
	RootDirectoryFull,
	/// The given filename does not fit in a 28-byte directory entry.
	FilenameTooLong,
	/// A positioned read or write returned fewer bytes than requested.
	ShortTransfer {
		/// What the caller was trying to do, for the diagnostic message.
		what: &'static str,
	},
	/// An I/O error bubbled up from the underlying file.
	Io(io::Error),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::InvalidSuperblock => write!(f, "invalid superblock magic"),
			Self::UnknownRecordType(ty) => write!(f, "unknown journal record type `{ty}`"),
			Self::RootHasNoDataBlock => write!(f, "root inode has no data block"),
			Self::JournalFull => write!(f, "journal full"),
			Self::NoFreeInodes => write!(f, "no free inodes"),
			Self::RootDirectoryFull => write!(f, "root directory full"),
			Self::FilenameTooLong => write!(f, "filename too long"),
			Self::ShortTransfer {
				what,
			} => write!(f, "short {what}"),
			Self::Io(e) => write!(f, "{e}"),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Self {
		Self::Io(e)
	}
}

/// Shorthand for a `Result` using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
