//! Pure encode/decode of the five TFTP frame shapes (RFC 1350 §5). No I/O.

use crate::tftp::error::{ErrorCode, PacketError};

/// A fixed 512-byte data block; the final block of a transfer may be shorter.
pub const DATA_BLOCK_SIZE: usize = 512;
/// 4-byte header + a full data block; the minimum scratch buffer size a session needs.
pub const MAX_PACKET_SIZE: usize = 4 + DATA_BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
	Rrq = 1,
	Wrq = 2,
	Data = 3,
	Ack = 4,
	Error = 5,
}

impl TryFrom<u16> for Opcode {
	type Error = PacketError;

	fn try_from(value: u16) -> Result<Self, Self::Error> {
		match value {
			1 => Ok(Self::Rrq),
			2 => Ok(Self::Wrq),
			3 => Ok(Self::Data),
			4 => Ok(Self::Ack),
			5 => Ok(Self::Error),
			_ => Err(PacketError::InvalidOpcode),
		}
	}
}

/// The reference implementation supports only `octet`; `netascii`/`mail` are non-goals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Octet,
}

impl Mode {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Octet => "octet",
		}
	}

	/// RFC 1350 mode comparison is case-insensitive.
	pub fn parse(raw: &str) -> Option<Self> {
		if raw.eq_ignore_ascii_case("octet") {
			Some(Self::Octet)
		} else {
			None
		}
	}
}

impl std::fmt::Display for Mode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A decoded TFTP frame. `Rrq`/`Wrq` keep `mode` as the raw wire string; validating it
/// against the supported [`Mode`] set is a session-level concern, not the decoder's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
	Rrq { filename: String, mode: String },
	Wrq { filename: String, mode: String },
	Data { block: u16, payload: Vec<u8> },
	Ack { block: u16 },
	Error { code: ErrorCode, message: String },
}

impl Packet {
	pub fn opcode(&self) -> Opcode {
		match self {
			Self::Rrq { .. } => Opcode::Rrq,
			Self::Wrq { .. } => Opcode::Wrq,
			Self::Data { .. } => Opcode::Data,
			Self::Ack { .. } => Opcode::Ack,
			Self::Error { .. } => Opcode::Error,
		}
	}

	/// Appends this frame's wire bytes to `out`. Never fails: every field a `Packet`
	/// can hold is already wire-representable.
	pub fn encode(&self, out: &mut Vec<u8>) {
		match self {
			Self::Rrq { filename, mode } | Self::Wrq { filename, mode } => {
				out.extend_from_slice(&(self.opcode() as u16).to_be_bytes());
				out.extend_from_slice(filename.as_bytes());
				out.push(0);
				out.extend_from_slice(mode.as_bytes());
				out.push(0);
			}
			Self::Data { block, payload } => {
				out.extend_from_slice(&(Opcode::Data as u16).to_be_bytes());
				out.extend_from_slice(&block.to_be_bytes());
				out.extend_from_slice(payload);
			}
			Self::Ack { block } => {
				out.extend_from_slice(&(Opcode::Ack as u16).to_be_bytes());
				out.extend_from_slice(&block.to_be_bytes());
			}
			Self::Error { code, message } => {
				out.extend_from_slice(&(Opcode::Error as u16).to_be_bytes());
				out.extend_from_slice(&(*code as u16).to_be_bytes());
				out.extend_from_slice(message.as_bytes());
				out.push(0);
			}
		}
	}

	/// Decodes a whole datagram. See §4.1 for the exact failure conditions.
	pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
		if buf.len() < 2 {
			return Err(PacketError::UnexpectedEof);
		}
		let opcode = Opcode::try_from(u16::from_be_bytes([buf[0], buf[1]]))?;

		match opcode {
			Opcode::Rrq | Opcode::Wrq => {
				let (filename_bytes, rest) = split_at_nul(&buf[2..])?;
				let filename = std::str::from_utf8(filename_bytes)
					.map_err(|_| PacketError::InvalidCharacters)?
					.to_string();

				let (mode_bytes, _) = split_at_nul(rest)?;
				if !mode_bytes.is_ascii() {
					return Err(PacketError::InvalidCharacters);
				}
				let mode = std::str::from_utf8(mode_bytes).unwrap().to_string();

				Ok(if opcode == Opcode::Rrq {
					Self::Rrq { filename, mode }
				} else {
					Self::Wrq { filename, mode }
				})
			}
			Opcode::Data => {
				if buf.len() < 4 {
					return Err(PacketError::UnexpectedEof);
				}
				let block = u16::from_be_bytes([buf[2], buf[3]]);
				Ok(Self::Data { block, payload: buf[4..].to_vec() })
			}
			Opcode::Ack => {
				if buf.len() != 4 {
					return Err(PacketError::UnexpectedEof);
				}
				let block = u16::from_be_bytes([buf[2], buf[3]]);
				Ok(Self::Ack { block })
			}
			Opcode::Error => {
				if buf.len() < 4 {
					return Err(PacketError::UnexpectedEof);
				}
				let code = ErrorCode::from(u16::from_be_bytes([buf[2], buf[3]]));
				let (message_bytes, _) = split_at_nul(&buf[4..])?;
				let message = String::from_utf8_lossy(message_bytes).into_owned();
				Ok(Self::Error { code, message })
			}
		}
	}
}

fn split_at_nul(buf: &[u8]) -> Result<(&[u8], &[u8]), PacketError> {
	let pos = buf.iter().position(|b| *b == 0).ok_or(PacketError::NotNullTerminated)?;
	Ok((&buf[..pos], &buf[pos + 1..]))
}
