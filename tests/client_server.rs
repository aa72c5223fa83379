//! Full-stack round trips through `Server`/`Client` (SPEC_FULL §8 scenarios 5, 7, 8),
//! backed by `tempfile` directories the way a real `tftp put`/`get` would use plain files.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio_util::sync::CancellationToken;

use tftp_core::client::Client;
use tftp_core::server::{BoxFuture, HandlerError, ReadHandler, Server, WriteHandler};
use tftp_core::tftp::{ErrorCode, Receiver, RetryPolicy, Sender};

fn fast_retry() -> RetryPolicy {
	RetryPolicy::new(Duration::from_millis(100), 5)
}

struct DirReadHandler(PathBuf);

impl ReadHandler for DirReadHandler {
	fn handle<'a>(&'a self, filename: String, sender: &'a mut Sender) -> BoxFuture<'a, Result<(), HandlerError>> {
		let path = self.0.join(filename);
		Box::pin(async move {
			let file = File::open(&path).await.map_err(HandlerError::from)?;
			sender.send_from(file).await.map_err(|e| HandlerError::new(ErrorCode::NotDefined, e.to_string()))?;
			Ok(())
		})
	}
}

struct DirWriteHandler(PathBuf);

impl WriteHandler for DirWriteHandler {
	fn handle<'a>(&'a self, filename: String, receiver: &'a mut Receiver) -> BoxFuture<'a, Result<(), HandlerError>> {
		let path = self.0.join(filename);
		Box::pin(async move {
			let file = File::create(&path).await.map_err(HandlerError::from)?;
			receiver.receive_into(file).await.map_err(|e| HandlerError::new(ErrorCode::NotDefined, e.to_string()))?;
			Ok(())
		})
	}
}

async fn spawn_server(
	root: &Path,
	read: bool,
	write: bool,
) -> (SocketAddr, Arc<Server>, CancellationToken) {
	let read_handler = read.then(|| Arc::new(DirReadHandler(root.to_path_buf())) as Arc<dyn ReadHandler>);
	let write_handler = write.then(|| Arc::new(DirWriteHandler(root.to_path_buf())) as Arc<dyn WriteHandler>);

	let server = Arc::new(Server::new(read_handler, write_handler).with_retry_policy(fast_retry()));
	let bind_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));

	// Bind synchronously on a throwaway socket first just to pick a free ephemeral port,
	// then hand the real address to the server's own accept loop.
	let probe = tokio::net::UdpSocket::bind(bind_addr).await.unwrap();
	let addr = probe.local_addr().unwrap();
	drop(probe);

	let cancel = CancellationToken::new();
	let serve_cancel = cancel.clone();
	let server_for_task = server.clone();
	tokio::spawn(async move {
		serve_cancel.cancelled().await;
		server_for_task.shutdown();
	});

	let server_for_loop = server.clone();
	tokio::spawn(async move {
		let _ = server_for_loop.listen_and_serve(addr).await;
	});

	// Give the accept loop a moment to bind before the test starts sending.
	tokio::time::sleep(Duration::from_millis(20)).await;

	(addr, server, cancel)
}

#[tokio::test]
async fn put_then_get_round_trips_bytes_through_the_filesystem() {
	let dir = tempfile::tempdir().unwrap();
	let (addr, _server, cancel) = spawn_server(dir.path(), true, true).await;

	let payload: Vec<u8> = (0..=255u8).cycle().take(2000).collect();

	let client = Client::new(addr).with_retry_policy(fast_retry());
	let mut sender = client.send("roundtrip.bin").await.expect("WRQ handshake failed");
	let sent = sender.send_from(std::io::Cursor::new(payload.clone())).await.expect("upload failed");
	assert_eq!(sent, payload.len() as u64);

	let mut receiver = client.receive("roundtrip.bin").await.expect("RRQ handshake failed");
	let mut sink = Vec::new();
	let received = receiver.receive_into(&mut sink).await.expect("download failed");
	assert_eq!(received, payload.len() as u64);
	assert_eq!(sink, payload);

	cancel.cancel();
}

#[tokio::test]
async fn read_only_server_rejects_a_write_request() {
	let dir = tempfile::tempdir().unwrap();
	let (addr, _server, cancel) = spawn_server(dir.path(), true, false).await;

	let client = Client::new(addr).with_retry_policy(fast_retry());
	let err = client.send("whatever.bin").await.expect_err("write should have been rejected");
	match err {
		tftp_core::tftp::SessionError::PeerError { code, .. } => assert_eq!(code, ErrorCode::IllegalOperation),
		other => panic!("expected a PeerError carrying ERROR{{4}}, got {other:?}"),
	}

	cancel.cancel();
}

#[tokio::test]
async fn downloading_a_missing_file_surfaces_the_handler_error() {
	let dir = tempfile::tempdir().unwrap();
	let (addr, _server, cancel) = spawn_server(dir.path(), true, true).await;

	let client = Client::new(addr).with_retry_policy(fast_retry());
	let err = client.receive("does-not-exist.bin").await.expect_err("missing file should fail");
	match err {
		tftp_core::tftp::SessionError::PeerError { code, .. } => assert_eq!(code, ErrorCode::FileNotFound),
		other => panic!("expected a PeerError carrying ERROR{{1}}, got {other:?}"),
	}

	cancel.cancel();
}
