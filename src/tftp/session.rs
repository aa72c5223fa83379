//! The socket plumbing shared by [`crate::tftp::sender::Sender`] and
//! [`crate::tftp::receiver::Receiver`]: exclusive socket ownership, peer-TID pinning, and
//! cancellation-aware receive-with-deadline (§3 invariants 1–2, §5).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::tftp::error::{ErrorCode, SessionError};
use crate::tftp::packet::Packet;
use crate::tftp::retry::RetryPolicy;

/// One transfer's exclusive hold on a UDP socket, with its peer TID pinned after the
/// first legitimate reply. Neither `Sender` nor `Receiver` ever touches a raw socket
/// directly; both drive their block-numbering state machine on top of this type.
pub struct Session {
	socket: UdpSocket,
	remote_addr: Option<SocketAddr>,
	retry: RetryPolicy,
	cancel: CancellationToken,
	packets_sent: u64,
	packets_acked: u64,
}

impl Session {
	/// Binds a fresh ephemeral-port socket; this becomes the session's own TID.
	pub async fn bind_ephemeral(
		local_ip: IpAddr,
		remote_addr: Option<SocketAddr>,
		retry: RetryPolicy,
		cancel: CancellationToken,
	) -> std::io::Result<Self> {
		let socket = UdpSocket::bind((local_ip, 0)).await?;
		debug!("session bound to {}", socket.local_addr()?);
		Ok(Self { socket, remote_addr, retry, cancel, packets_sent: 0, packets_acked: 0 })
	}

	pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
		self.socket.local_addr()
	}

	pub fn remote_addr(&self) -> Option<SocketAddr> {
		self.remote_addr
	}

	pub fn retry_policy(&self) -> RetryPolicy {
		self.retry
	}

	pub fn packets_sent(&self) -> u64 {
		self.packets_sent
	}

	pub fn packets_acked(&self) -> u64 {
		self.packets_acked
	}

	pub fn note_acked(&mut self) {
		self.packets_acked += 1;
	}

	/// Pins the peer TID. §3 invariant 2: this happens exactly once, at the first reply.
	pub fn pin(&mut self, addr: SocketAddr) {
		if self.remote_addr.is_none() {
			debug!("peer TID pinned to {addr}");
		}
		self.remote_addr = Some(addr);
	}

	/// Sends to an explicit address (used for the very first datagram of a transfer,
	/// before the peer TID is known — e.g. a client's initial RRQ/WRQ to the well-known
	/// port).
	pub async fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> std::io::Result<()> {
		self.socket.send_to(buf, addr).await?;
		self.packets_sent += 1;
		Ok(())
	}

	/// Sends to the pinned peer. Panics if called before the peer TID is known — every
	/// call site pins the peer before entering its steady-state loop.
	pub async fn send_to_peer(&mut self, buf: &[u8]) -> std::io::Result<()> {
		let addr = self.remote_addr.expect("send_to_peer called before peer TID was pinned");
		self.send_to(buf, addr).await
	}

	/// Waits up to `timeout` for one legitimate packet. A datagram from any address
	/// other than the pinned peer draws a courtesy `ERROR{5}` and is otherwise ignored
	/// (§3 invariant 2, §7): this call keeps waiting out the same deadline rather than
	/// returning the stray to its caller.
	///
	/// Returns `Ok(None)` on a bare timeout (caller decides whether to retry), `Ok(Some)`
	/// on a legitimate datagram, `Err` on a non-timeout I/O error or cancellation.
	pub async fn recv_from_peer(
		&mut self,
		buf: &mut [u8],
		timeout: Duration,
	) -> Result<Option<(usize, SocketAddr)>, SessionError> {
		let deadline = Instant::now() + timeout;

		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Ok(None);
			}

			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
				outcome = tokio::time::timeout(remaining, self.socket.recv_from(buf)) => {
					match outcome {
						Err(_elapsed) => return Ok(None),
						Ok(Err(e)) => return Err(SessionError::Io(e)),
						Ok(Ok((n, from))) => {
							match self.remote_addr {
								Some(pinned) if pinned != from => {
									warn!("stray datagram from {from}, expected {pinned}");
									self.send_error_to(from, ErrorCode::UnknownTid).await;
									continue;
								}
								_ => {
									trace!("received {n} bytes from {from}");
									return Ok(Some((n, from)));
								}
							}
						}
					}
				}
			}
		}
	}

	/// Best-effort courtesy error to a stray sender; never fatal to this session.
	pub async fn send_error_to(&self, addr: SocketAddr, code: ErrorCode) {
		let mut buf = Vec::with_capacity(32);
		Packet::Error { code, message: code.message().to_string() }.encode(&mut buf);
		let _ = self.socket.send_to(&buf, addr).await;
	}

	/// Best-effort final error to the pinned peer, sent on any fatal session error
	/// after the socket is open (§4.3, §7). A no-op if the peer was never pinned.
	pub async fn send_error_to_peer_best_effort(&self, code: ErrorCode, message: &str) {
		let Some(addr) = self.remote_addr else { return };
		let mut buf = Vec::with_capacity(4 + message.len() + 1);
		Packet::Error { code, message: message.to_string() }.encode(&mut buf);
		let _ = self.socket.send_to(&buf, addr).await;
	}
}
