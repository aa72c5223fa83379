//! Receiver session (§4.4): drives a DATA/ACK transfer into a byte sink, block by block,
//! whichever side of the wire is pulling the file — a client after an RRQ handshake, or a
//! server receiving an upload via WRQ.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::tftp::error::SessionError;
use crate::tftp::packet::{Packet, DATA_BLOCK_SIZE, MAX_PACKET_SIZE};
use crate::tftp::session::Session;

pub struct Receiver {
	session: Session,
	block: u16,
	/// Block 1's payload, already fetched by the client facade's RRQ handshake (§4.5).
	/// `None` for a server-side WRQ receiver, which must bootstrap with `ACK{0}` itself
	/// (§4.4's "server first step" supplement).
	primed: Option<Vec<u8>>,
}

impl Receiver {
	/// Client/RRQ path: `first_payload` is the DATA{1} buffered while pinning the peer TID.
	pub fn primed(session: Session, first_payload: Vec<u8>) -> Self {
		Self { session, block: 1, primed: Some(first_payload) }
	}

	/// Server/WRQ path: no data buffered yet; `receive_into` will send `ACK{0}` itself.
	pub fn unprimed(session: Session) -> Self {
		Self { session, block: 1, primed: None }
	}

	pub fn session(&self) -> &Session {
		&self.session
	}

	/// Writes the transfer into `sink` to completion and returns the total byte count
	/// received. See §4.4 for the algorithm.
	pub async fn receive_into<W: AsyncWrite + Unpin>(&mut self, mut sink: W) -> Result<u64, SessionError> {
		let result = self.run(&mut sink).await;
		if let Err(ref e) = result {
			if let Some(code) = e.outgoing_code() {
				self.session.send_error_to_peer_best_effort(code, code.message()).await;
			}
		}
		result
	}

	async fn run<W: AsyncWrite + Unpin>(&mut self, sink: &mut W) -> Result<u64, SessionError> {
		let mut total: u64 = 0;

		let mut payload = match self.primed.take() {
			Some(p) => p,
			None => {
				let ack0 = encode_ack(0);
				self.wait_for_data(&ack0, 1).await?
			}
		};

		loop {
			let l = payload.len();
			sink.write_all(&payload).await.map_err(SessionError::Io)?;
			total += l as u64;

			if l < DATA_BLOCK_SIZE {
				let ack = encode_ack(self.block);
				let _ = self.session.send_to_peer(&ack).await;
				return Ok(total);
			}

			let next_block = self.block.wrapping_add(1);
			let ack = encode_ack(self.block);
			payload = self.wait_for_data(&ack, next_block).await?;
			self.block = next_block;
		}
	}

	/// `receiveRetry` (§4.4 step 5): transmit `ack_frame`, await `DATA{expect_block}`,
	/// retransmitting the ack on timeout or on a duplicate (earlier) DATA block.
	async fn wait_for_data(&mut self, ack_frame: &[u8], expect_block: u16) -> Result<Vec<u8>, SessionError> {
		let mut backoff = self.session.retry_policy().start();
		let mut buf = vec![0u8; MAX_PACKET_SIZE];

		'retry: loop {
			self.session.send_to_peer(ack_frame).await.map_err(SessionError::Io)?;

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
						Ok(Packet::Data { block, payload }) if block == expect_block => {
							self.session.note_acked();
							return Ok(payload);
						}
						// An earlier block means our ack was lost and the peer retransmitted;
						// retransmit the ack and keep waiting (§4.4 step 5e).
						Ok(Packet::Data { block, .. }) if is_earlier_block(block, expect_block) => {
							continue 'retry;
						}
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

fn encode_ack(block: u16) -> Vec<u8> {
	let mut buf = Vec::with_capacity(4);
	Packet::Ack { block }.encode(&mut buf);
	buf
}

/// Modular "is this block before `expect`" check (§9's block-number wrap note): treats
/// the 16-bit space as circular and compares the signed half-range delta.
fn is_earlier_block(block: u16, expect: u16) -> bool {
	let delta = expect.wrapping_sub(block);
	delta != 0 && delta < 0x8000
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn earlier_block_detection_handles_wraparound() {
		assert!(is_earlier_block(5, 6));
		assert!(!is_earlier_block(6, 6));
		assert!(!is_earlier_block(7, 6));
		assert!(is_earlier_block(65535, 0));
		assert!(!is_earlier_block(0, 65535));
	}
}
