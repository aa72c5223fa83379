//! Exercises `Sender`/`Receiver` against a bare `tokio::net::UdpSocket` standing in for
//! the peer, covering the retry, duplicate-suppression and stray-TID behaviors of §4.3/§4.4.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use tftp_core::tftp::{Packet, Receiver, RetryPolicy, Sender, Session};

const LOCALHOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

fn fast_retry() -> RetryPolicy {
	RetryPolicy::new(Duration::from_millis(40), 5)
}

async fn peer_socket() -> (UdpSocket, SocketAddr) {
	let sock = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
	let addr = sock.local_addr().unwrap();
	(sock, addr)
}

fn decode(buf: &[u8], n: usize) -> Packet {
	Packet::decode(&buf[..n]).expect("peer received a malformed frame")
}

#[tokio::test]
async fn sender_retransmits_after_a_dropped_ack() {
	let (peer, peer_addr) = peer_socket().await;

	let session = Session::bind_ephemeral(LOCALHOST.into(), Some(peer_addr), fast_retry(), CancellationToken::new())
		.await
		.unwrap();
	let mut sender = Sender::new(session);

	let payload = b"hello, world!".to_vec();
	let source = std::io::Cursor::new(payload.clone());

	let send_task = tokio::spawn(async move { sender.send_from(source).await });

	let mut buf = vec![0u8; 600];
	let (n, from) = peer.recv_from(&mut buf).await.unwrap();
	match decode(&buf, n) {
		Packet::Data { block: 1, payload: p } => assert_eq!(p, payload),
		other => panic!("expected DATA{{1}}, got {other:?}"),
	}
	// Drop the first DATA entirely; the sender's backoff must retransmit it.
	let (n, _) = peer.recv_from(&mut buf).await.unwrap();
	match decode(&buf, n) {
		Packet::Data { block: 1, payload: p } => assert_eq!(p, payload),
		other => panic!("expected retransmitted DATA{{1}}, got {other:?}"),
	}

	let mut ack = Vec::new();
	Packet::Ack { block: 1 }.encode(&mut ack);
	peer.send_to(&ack, from).await.unwrap();

	let total = send_task.await.unwrap().unwrap();
	assert_eq!(total, payload.len() as u64);
}

#[tokio::test]
async fn sender_ignores_an_ack_for_the_wrong_block() {
	let (peer, peer_addr) = peer_socket().await;

	let session = Session::bind_ephemeral(LOCALHOST.into(), Some(peer_addr), fast_retry(), CancellationToken::new())
		.await
		.unwrap();
	let mut sender = Sender::new(session);

	let payload = vec![7u8; 10];
	let source = std::io::Cursor::new(payload.clone());
	let send_task = tokio::spawn(async move { sender.send_from(source).await });

	let mut buf = vec![0u8; 600];
	let (n, from) = peer.recv_from(&mut buf).await.unwrap();
	assert!(matches!(decode(&buf, n), Packet::Data { block: 1, .. }));

	// A stale ACK for a block we never sent should be ignored, not treated as success.
	let mut stale_ack = Vec::new();
	Packet::Ack { block: 99 }.encode(&mut stale_ack);
	peer.send_to(&stale_ack, from).await.unwrap();

	let mut real_ack = Vec::new();
	Packet::Ack { block: 1 }.encode(&mut real_ack);
	peer.send_to(&real_ack, from).await.unwrap();

	let total = send_task.await.unwrap().unwrap();
	assert_eq!(total, payload.len() as u64);
}

#[tokio::test]
async fn receiver_retransmits_ack_for_a_duplicate_data_block() {
	let (peer, peer_addr) = peer_socket().await;

	let session = Session::bind_ephemeral(LOCALHOST.into(), Some(peer_addr), fast_retry(), CancellationToken::new())
		.await
		.unwrap();
	let mut receiver = Receiver::primed(session, b"first block".to_vec());

	let recv_task = tokio::spawn(async move {
		let mut sink_ref = std::io::Cursor::new(Vec::new());
		let n = receiver.receive_into(&mut sink_ref).await.unwrap();
		(n, sink_ref.into_inner())
	});

	let mut buf = vec![0u8; 600];
	let (n, from) = peer.recv_from(&mut buf).await.unwrap();
	assert!(matches!(decode(&buf, n), Packet::Ack { block: 1 }));

	// Retransmit block 1's worth of data as if our first ack never arrived.
	let mut dup = Vec::new();
	Packet::Data { block: 1, payload: b"first block".to_vec() }.encode(&mut dup);
	peer.send_to(&dup, from).await.unwrap();

	// The receiver must answer with another ack for block 1, not advance.
	let (n, _) = peer.recv_from(&mut buf).await.unwrap();
	assert!(matches!(decode(&buf, n), Packet::Ack { block: 1 }));

	let mut last = Vec::new();
	Packet::Data { block: 2, payload: b"tail".to_vec() }.encode(&mut last);
	peer.send_to(&last, from).await.unwrap();

	let (n, _) = peer.recv_from(&mut buf).await.unwrap();
	assert!(matches!(decode(&buf, n), Packet::Ack { block: 2 }));

	let (total, bytes) = recv_task.await.unwrap();
	assert_eq!(total, (b"first block".len() + b"tail".len()) as u64);
	assert_eq!(bytes, b"first blocktail");
}

#[tokio::test]
async fn stray_sender_gets_a_courtesy_unknown_tid_error() {
	let (peer, peer_addr) = peer_socket().await;
	let (stranger, _stranger_addr) = peer_socket().await;

	let session = Session::bind_ephemeral(LOCALHOST.into(), Some(peer_addr), fast_retry(), CancellationToken::new())
		.await
		.unwrap();
	let session_addr = session.local_addr().unwrap();
	let mut sender = Sender::new(session);

	let payload = b"payload".to_vec();
	let source = std::io::Cursor::new(payload.clone());
	let send_task = tokio::spawn(async move { sender.send_from(source).await });

	// An unrelated socket pokes the session before the real peer responds.
	let mut bogus = Vec::new();
	Packet::Ack { block: 1 }.encode(&mut bogus);
	stranger.send_to(&bogus, session_addr).await.unwrap();

	let mut buf = vec![0u8; 600];
	let (n, from) = stranger.recv_from(&mut buf).await.unwrap();
	match decode(&buf, n) {
		Packet::Error { code, .. } => assert_eq!(code, tftp_core::tftp::ErrorCode::UnknownTid),
		other => panic!("expected a courtesy ERROR{{5}}, got {other:?}"),
	}
	let _ = from;

	// The legitimate peer's ack still completes the transfer.
	let (n, from) = peer.recv_from(&mut buf).await.unwrap();
	assert!(matches!(decode(&buf, n), Packet::Data { block: 1, .. }));
	let mut ack = Vec::new();
	Packet::Ack { block: 1 }.encode(&mut ack);
	peer.send_to(&ack, from).await.unwrap();

	let total = send_task.await.unwrap().unwrap();
	assert_eq!(total, payload.len() as u64);
}
