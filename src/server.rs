//! Server dispatcher (§4.6): accepts RRQ/WRQ on the well-known socket and spawns an
//! independent per-transfer session on a fresh ephemeral-port socket for each.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use crate::tftp::error::ErrorCode;
use crate::tftp::packet::Mode;
use crate::tftp::{DispatchError, Packet, Receiver, RetryPolicy, Sender, Session};

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// An application-level failure from a read/write handler (§7's "application handler
/// error"). The dispatcher reports `code`/`message` to the peer in a best-effort `ERROR`.
#[derive(Debug)]
pub struct HandlerError {
	pub code: ErrorCode,
	pub message: String,
}

impl HandlerError {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self { code, message: message.into() }
	}
}

impl From<std::io::Error> for HandlerError {
	fn from(e: std::io::Error) -> Self {
		let code = match e.kind() {
			std::io::ErrorKind::NotFound => ErrorCode::FileNotFound,
			std::io::ErrorKind::PermissionDenied => ErrorCode::AccessViolation,
			std::io::ErrorKind::AlreadyExists => ErrorCode::FileExists,
			_ => ErrorCode::NotDefined,
		};
		Self::new(code, e.to_string())
	}
}

/// Serves an RRQ by reading from wherever the implementation chooses (disk, memory, a
/// validator) and pushing the bytes out through `sender`. The core never touches the
/// filesystem itself (§9's "handler callbacks").
pub trait ReadHandler: Send + Sync {
	fn handle<'a>(&'a self, filename: String, sender: &'a mut Sender) -> BoxFuture<'a, Result<(), HandlerError>>;
}

/// Serves a WRQ by writing bytes pulled from `receiver` into wherever the implementation
/// chooses.
pub trait WriteHandler: Send + Sync {
	fn handle<'a>(&'a self, filename: String, receiver: &'a mut Receiver) -> BoxFuture<'a, Result<(), HandlerError>>;
}

/// Binds the well-known (or arbitrary) UDP port and spawns one independent task per
/// accepted RRQ/WRQ. A missing handler for a request kind causes that kind to be
/// rejected outright with `ERROR{4}` (§6's "null handler" rule).
pub struct Server {
	read_handler: Option<Arc<dyn ReadHandler>>,
	write_handler: Option<Arc<dyn WriteHandler>>,
	retry: RetryPolicy,
	cancel: CancellationToken,
	active_sessions: Arc<AtomicU64>,
}

impl Server {
	pub fn new(read_handler: Option<Arc<dyn ReadHandler>>, write_handler: Option<Arc<dyn WriteHandler>>) -> Self {
		Self {
			read_handler,
			write_handler,
			retry: RetryPolicy::default(),
			cancel: CancellationToken::new(),
			active_sessions: Arc::new(AtomicU64::new(0)),
		}
	}

	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	/// Number of sessions currently spawned and running (observational only, §5).
	pub fn active_sessions(&self) -> u64 {
		self.active_sessions.load(Ordering::Relaxed)
	}

	/// Stops the accept loop between reads; in-flight sessions run to their own
	/// completion or timeout (§4.6, §5 — shutdown does not pre-empt sessions).
	pub fn shutdown(&self) {
		self.cancel.cancel();
	}

	/// Runs the accept loop until `shutdown()` is called.
	pub async fn listen_and_serve(&self, addr: SocketAddr) -> Result<(), DispatchError> {
		let socket = UdpSocket::bind(addr).await?;
		let local_ip = socket.local_addr()?.ip();
		info!("tftp server listening on {addr}");

		let mut buf = vec![0u8; 512];
		loop {
			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => {
					warn!("server shutdown requested; accept loop stopping");
					return Ok(());
				}
				result = socket.recv_from(&mut buf) => {
					let (n, client) = match result {
						Ok(v) => v,
						Err(e) => { error!("recv_from failed: {e}"); continue; }
					};
					self.dispatch(&socket, local_ip, client, &buf[..n]).await;
				}
			}
		}
	}

	async fn dispatch(&self, well_known: &UdpSocket, local_ip: std::net::IpAddr, client: SocketAddr, datagram: &[u8]) {
		let packet = match Packet::decode(datagram) {
			Ok(p) => p,
			Err(e) => {
				warn!("malformed request from {client}: {e}");
				reply_error(well_known, client, ErrorCode::IllegalOperation).await;
				return;
			}
		};

		let (is_read, filename, mode) = match packet {
			Packet::Rrq { filename, mode } => (true, filename, mode),
			Packet::Wrq { filename, mode } => (false, filename, mode),
			_ => {
				warn!("non-request opcode from {client} on the well-known port");
				reply_error(well_known, client, ErrorCode::IllegalOperation).await;
				return;
			}
		};

		if Mode::parse(&mode).is_none() {
			warn!("unsupported transfer mode {mode:?} requested by {client}");
			reply_error(well_known, client, ErrorCode::IllegalOperation).await;
			return;
		}

		if is_read {
			let Some(handler) = self.read_handler.clone() else {
				warn!("RRQ from {client} rejected: no read handler registered");
				reply_error(well_known, client, ErrorCode::IllegalOperation).await;
				return;
			};
			info!("RRQ {filename:?} from {client}");
			self.spawn_sender(local_ip, client, filename, handler);
		} else {
			let Some(handler) = self.write_handler.clone() else {
				warn!("WRQ from {client} rejected: no write handler registered");
				reply_error(well_known, client, ErrorCode::IllegalOperation).await;
				return;
			};
			info!("WRQ {filename:?} from {client}");
			self.spawn_receiver(local_ip, client, filename, handler);
		}
	}

	fn spawn_sender(
		&self,
		local_ip: std::net::IpAddr,
		client: SocketAddr,
		filename: String,
		handler: Arc<dyn ReadHandler>,
	) {
		let retry = self.retry;
		let cancel = self.cancel.clone();
		let active = self.active_sessions.clone();

		tokio::spawn(async move {
			active.fetch_add(1, Ordering::Relaxed);
			match Session::bind_ephemeral(local_ip, Some(client), retry, cancel).await {
				Ok(session) => {
					let mut sender = Sender::new(session);
					if let Err(e) = handler.handle(filename, &mut sender).await {
						warn!("read handler error for {client}: {}", e.message);
						sender.session().send_error_to_peer_best_effort(e.code, &e.message).await;
					}
				}
				Err(e) => error!("failed to open session socket for {client}: {e}"),
			}
			active.fetch_sub(1, Ordering::Relaxed);
		});
	}

	fn spawn_receiver(
		&self,
		local_ip: std::net::IpAddr,
		client: SocketAddr,
		filename: String,
		handler: Arc<dyn WriteHandler>,
	) {
		let retry = self.retry;
		let cancel = self.cancel.clone();
		let active = self.active_sessions.clone();

		tokio::spawn(async move {
			active.fetch_add(1, Ordering::Relaxed);
			match Session::bind_ephemeral(local_ip, Some(client), retry, cancel).await {
				Ok(session) => {
					let mut receiver = Receiver::unprimed(session);
					if let Err(e) = handler.handle(filename, &mut receiver).await {
						warn!("write handler error for {client}: {}", e.message);
						receiver.session().send_error_to_peer_best_effort(e.code, &e.message).await;
					}
				}
				Err(e) => error!("failed to open session socket for {client}: {e}"),
			}
			active.fetch_sub(1, Ordering::Relaxed);
		});
	}
}

async fn reply_error(socket: &UdpSocket, to: SocketAddr, code: ErrorCode) {
	let mut buf = Vec::with_capacity(32);
	Packet::Error { code, message: code.message().to_string() }.encode(&mut buf);
	let _ = socket.send_to(&buf, to).await;
}
