use std::io;

use thiserror::Error;

/// The eight TFTP error codes defined by RFC 1350, carried in `ERROR` packets.
///
/// `code > 7` on the wire is accepted by the decoder and mapped to `NotDefined`
/// for forward compatibility (see [`crate::tftp::packet`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
	NotDefined = 0,
	FileNotFound = 1,
	AccessViolation = 2,
	DiskFull = 3,
	IllegalOperation = 4,
	UnknownTid = 5,
	FileExists = 6,
	NoSuchUser = 7,
}

impl ErrorCode {
	/// The fixed English message the reference implementation sends for this code.
	pub fn message(&self) -> &'static str {
		match self {
			Self::NotDefined => "Not defined",
			Self::FileNotFound => "File not found",
			Self::AccessViolation => "Access violation",
			Self::DiskFull => "Disk full or allocation exceeded",
			Self::IllegalOperation => "Illegal TFTP operation",
			Self::UnknownTid => "Unknown transfer ID",
			Self::FileExists => "File already exists",
			Self::NoSuchUser => "No such user",
		}
	}
}

impl From<u16> for ErrorCode {
	fn from(value: u16) -> Self {
		match value {
			0 => Self::NotDefined,
			1 => Self::FileNotFound,
			2 => Self::AccessViolation,
			3 => Self::DiskFull,
			4 => Self::IllegalOperation,
			5 => Self::UnknownTid,
			6 => Self::FileExists,
			7 => Self::NoSuchUser,
			_ => Self::NotDefined,
		}
	}
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} ({})", *self as u16, self.message())
	}
}

/// Decoder rejection reasons for a single frame. Pure, I/O-free.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
	#[error("frame too short for its opcode")]
	UnexpectedEof,
	#[error("opcode not in {{1..5}}")]
	InvalidOpcode,
	#[error("filename or mode missing a NUL terminator")]
	NotNullTerminated,
	#[error("filename or mode contains invalid characters")]
	InvalidCharacters,
	#[error("unsupported transfer mode (only octet is supported)")]
	UnsupportedMode,
}

/// A fatal, session-terminating condition encountered by a `Sender`/`Receiver`.
#[derive(Debug, Error)]
pub enum SessionError {
	#[error("retries exhausted waiting for a reply")]
	Timeout,
	#[error("session was cancelled")]
	Cancelled,
	#[error("malformed packet received: {0}")]
	Malformed(#[from] PacketError),
	#[error("peer reported error {code}: {message}")]
	PeerError { code: ErrorCode, message: String },
	#[error("local I/O failure: {0}")]
	Io(#[from] io::Error),
}

impl SessionError {
	/// The error code this session should emit to its peer, best-effort, on this failure.
	/// `PeerError` and `Timeout`/`Cancelled` are never echoed back (see §7).
	pub fn outgoing_code(&self) -> Option<ErrorCode> {
		match self {
			Self::Malformed(_) => Some(ErrorCode::IllegalOperation),
			Self::Io(_) => Some(ErrorCode::NotDefined),
			Self::Timeout | Self::Cancelled | Self::PeerError { .. } => None,
		}
	}
}

/// Pre-session rejections raised by the server dispatcher before a `Sender`/`Receiver`
/// is ever constructed (§4.6, §7's "mode unsupported / file-not-found / access denied").
#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("malformed request: {0}")]
	MalformedRequest(#[from] PacketError),
	#[error("unsupported opcode for the well-known port")]
	NotARequest,
	#[error("no handler registered for this request kind")]
	NoHandler,
	#[error(transparent)]
	Io(#[from] io::Error),
}

impl DispatchError {
	pub fn wire_code(&self) -> ErrorCode {
		match self {
			Self::MalformedRequest(_) | Self::NotARequest | Self::NoHandler => {
				ErrorCode::IllegalOperation
			}
			Self::Io(_) => ErrorCode::NotDefined,
		}
	}
}
