//! Client facade (§4.5): resolves a server once, then opens `Sender`/`Receiver` sessions
//! against it by driving the initial RRQ/WRQ handshake.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio_util::sync::CancellationToken;

#[allow(unused)]
use log::{debug, trace};

use crate::tftp::packet::{Mode, Packet, MAX_PACKET_SIZE};
use crate::tftp::{Receiver, RetryPolicy, Sender, Session, SessionError};

/// A resolved server address and the retry policy used for every session it opens.
pub struct Client {
	server_addr: SocketAddr,
	retry: RetryPolicy,
	cancel: CancellationToken,
}

impl Client {
	pub fn new(server_addr: SocketAddr) -> Self {
		Self { server_addr, retry: RetryPolicy::default(), cancel: CancellationToken::new() }
	}

	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	/// Ties this client's sessions to an externally owned cancellation signal (e.g. a
	/// process-wide SIGINT token), instead of one private to this `Client`.
	pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;
		self
	}

	/// Opens an upload: sends `WRQ{filename, octet}`, waits for `ACK{0}`, and returns a
	/// `Sender` whose peer TID is pinned to the responder.
	pub async fn send(&self, filename: &str) -> Result<Sender, SessionError> {
		let mut session = self.open_session().await?;

		let mut wrq = Vec::new();
		Packet::Wrq { filename: filename.to_string(), mode: Mode::Octet.as_str().to_string() }
			.encode(&mut wrq);

		let (from, _) = self
			.handshake(&mut session, &wrq, |pkt| matches!(pkt, Packet::Ack { block: 0 }))
			.await?;
		session.pin(from);

		debug!("WRQ for {filename} acked by {from}");
		Ok(Sender::new(session))
	}

	/// Opens a download: sends `RRQ{filename, octet}`, waits for `DATA{1}`, buffers it,
	/// and returns a `Receiver` whose first streaming step writes that buffered payload.
	pub async fn receive(&self, filename: &str) -> Result<Receiver, SessionError> {
		let mut session = self.open_session().await?;

		let mut rrq = Vec::new();
		Packet::Rrq { filename: filename.to_string(), mode: Mode::Octet.as_str().to_string() }
			.encode(&mut rrq);

		let (from, reply) = self
			.handshake(&mut session, &rrq, |pkt| matches!(pkt, Packet::Data { block: 1, .. }))
			.await?;
		session.pin(from);

		let Packet::Data { payload, .. } = reply else { unreachable!("handshake matched Data{{1,..}}") };
		debug!("RRQ for {filename} answered by {from}, {} bytes buffered", payload.len());
		Ok(Receiver::primed(session, payload))
	}

	async fn open_session(&self) -> Result<Session, SessionError> {
		Session::bind_ephemeral(local_unspecified(self.server_addr), None, self.retry, self.cancel.clone())
			.await
			.map_err(SessionError::Io)
	}

	/// Transmits `request` to the well-known server address and waits (with retries) for
	/// a reply satisfying `accept`. The first address to reply becomes the pinned peer;
	/// this is the client-side half of §4.5's two handshakes.
	async fn handshake(
		&self,
		session: &mut Session,
		request: &[u8],
		mut accept: impl FnMut(&Packet) -> bool,
	) -> Result<(SocketAddr, Packet), SessionError> {
		let mut backoff = self.retry.start();
		let mut buf = vec![0u8; MAX_PACKET_SIZE];

		'retry: loop {
			session.send_to(request, self.server_addr).await.map_err(SessionError::Io)?;

			loop {
				match session.recv_from_peer(&mut buf, backoff.timeout()).await? {
					None => {
						if backoff.should_retry() {
							backoff.wait().await;
							continue 'retry;
						}
						return Err(SessionError::Timeout);
					}
					Some((n, from)) => match Packet::decode(&buf[..n]) {
						Ok(pkt) if accept(&pkt) => return Ok((from, pkt)),
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

fn local_unspecified(server_addr: SocketAddr) -> std::net::IpAddr {
	match server_addr {
		SocketAddr::V4(_) => std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED),
		SocketAddr::V6(_) => std::net::IpAddr::V6(Ipv6Addr::UNSPECIFIED),
	}
}
