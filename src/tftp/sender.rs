//! Sender session (§4.3): drives a DATA/ACK transfer from a byte source, block by block,
//! whichever side of the wire is pushing the file — a client after a WRQ handshake, or a
//! server responding to an RRQ.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::tftp::error::{ErrorCode, SessionError};
use crate::tftp::packet::{Packet, DATA_BLOCK_SIZE, MAX_PACKET_SIZE};
use crate::tftp::session::Session;

pub struct Sender {
	session: Session,
	block: u16,
}

impl Sender {
	/// `session`'s peer TID must already be pinned: for a client upload that happens
	/// when the WRQ handshake's `ACK{0}` arrives (§4.5); for a server responding to an
	/// RRQ, the dispatcher pins it from the request datagram's source address (§4.6).
	pub fn new(session: Session) -> Self {
		Self { session, block: 1 }
	}

	pub fn session(&self) -> &Session {
		&self.session
	}

	/// Consumes `source` to completion, transmitting it as DATA blocks, and returns the
	/// total byte count transferred. See §4.3 for the algorithm.
	pub async fn send_from<R: AsyncRead + Unpin>(&mut self, mut source: R) -> Result<u64, SessionError> {
		let result = self.run(&mut source).await;
		if let Err(ref e) = result {
			if let Some(code) = e.outgoing_code() {
				self.session.send_error_to_peer_best_effort(code, &error_message(e, code)).await;
			}
		}
		result
	}

	async fn run<R: AsyncRead + Unpin>(&mut self, source: &mut R) -> Result<u64, SessionError> {
		let mut total: u64 = 0;

		loop {
			let mut payload = vec![0u8; DATA_BLOCK_SIZE];
			let filled = read_up_to(source, &mut payload).await.map_err(SessionError::Io)?;
			payload.truncate(filled);
			total += filled as u64;

			let mut frame = Vec::with_capacity(4 + filled);
			Packet::Data { block: self.block, payload }.encode(&mut frame);

			self.send_retry(&frame, self.block).await?;

			if filled < DATA_BLOCK_SIZE {
				return Ok(total);
			}
			self.block = self.block.wrapping_add(1);
		}
	}

	/// `sendRetry` (§4.3 step 4): transmit `frame`, await `ACK{block}`, retransmitting on
	/// timeout up to the retry policy's attempt bound.
	async fn send_retry(&mut self, frame: &[u8], block: u16) -> Result<(), SessionError> {
		let mut backoff = self.session.retry_policy().start();
		let mut buf = vec![0u8; MAX_PACKET_SIZE];

		'retry: loop {
			self.session.send_to_peer(frame).await.map_err(SessionError::Io)?;

			loop {
				match self.session.recv_from_peer(&mut buf, backoff.timeout()).await? {
					None => {
						if backoff.should_retry() {
							backoff.wait().await;
							continue 'retry;
						}
						return Err(SessionError::Timeout);
					}
					Some((n, _from)) => match Packet::decode(&buf[..n]) {
						Ok(Packet::Ack { block: acked }) if acked == block => {
							self.session.note_acked();
							return Ok(());
						}
						// ACK for a different block is a duplicate of a prior step; ignore,
						// keep waiting, do not retransmit (§4.3 step 4f).
						Ok(Packet::Ack { .. }) => continue,
						Ok(Packet::Error { code, message }) => {
							return Err(SessionError::PeerError { code, message })
						}
						Ok(_) => continue,
						Err(e) => return Err(SessionError::Malformed(e)),
					},
				}
			}
		}
	}
}

async fn read_up_to<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
	let mut filled = 0;
	while filled < buf.len() {
		let n = source.read(&mut buf[filled..]).await?;
		if n == 0 {
			break;
		}
		filled += n;
	}
	Ok(filled)
}

fn error_message(e: &SessionError, code: ErrorCode) -> String {
	match e {
		SessionError::Io(io_err) => io_err.to_string(),
		_ => code.message().to_string(),
	}
}
