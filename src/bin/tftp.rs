use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use clap::Parser;
use log::{debug, error, info};
use tokio::fs::File;
use tokio_util::sync::CancellationToken;

use tftp_core::cli;
use tftp_core::client::Client;
use tftp_core::server::{HandlerError, ReadHandler, Server, WriteHandler};
use tftp_core::tftp::{Receiver, Sender};

static WORKING_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Shortcut to read the working dir without checking or unwrapping everywhere; it is
/// set once in early `main` and `main` returns before anything else can observe it unset.
fn working_dir<'a>() -> &'a PathBuf {
	WORKING_DIR.get().unwrap()
}

/// Joins `filename` under the working dir, rejecting any path that escapes it.
fn resolve_path(filename: &str) -> std::io::Result<PathBuf> {
	let candidate = Path::new(filename);
	if candidate.is_absolute() || candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
		return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "path escapes server root"));
	}
	Ok(working_dir().join(candidate))
}

struct FileReadHandler;

impl ReadHandler for FileReadHandler {
	fn handle<'a>(
		&'a self,
		filename: String,
		sender: &'a mut Sender,
	) -> tftp_core::server::BoxFuture<'a, Result<(), HandlerError>> {
		Box::pin(async move {
			let path = resolve_path(&filename)?;
			let file = File::open(&path).await?;
			let n = sender.send_from(file).await.map_err(|e| HandlerError::new(
				tftp_core::tftp::ErrorCode::NotDefined,
				e.to_string(),
			))?;
			info!("served {} ({n} bytes) to {:?}", path.display(), sender.session().remote_addr());
			Ok(())
		})
	}
}

struct FileWriteHandler;

impl WriteHandler for FileWriteHandler {
	fn handle<'a>(
		&'a self,
		filename: String,
		receiver: &'a mut Receiver,
	) -> tftp_core::server::BoxFuture<'a, Result<(), HandlerError>> {
		Box::pin(async move {
			let path = resolve_path(&filename)?;
			if path.try_exists()? {
				return Err(HandlerError::new(tftp_core::tftp::ErrorCode::FileExists, "file already exists"));
			}
			let file = File::create(&path).await?;
			let n = receiver.receive_into(file).await.map_err(|e| HandlerError::new(
				tftp_core::tftp::ErrorCode::NotDefined,
				e.to_string(),
			))?;
			info!("received {} ({n} bytes) from {:?}", path.display(), receiver.session().remote_addr());
			Ok(())
		})
	}
}

#[tokio::main]
async fn main() {
	let options = cli::Options::parse();
	cli::init_logger(options.debug);

	let root_dir = match options.root_dir {
		Some(dir) => {
			let expanded = shellexpand::full(&dir.to_string_lossy()).map(|s| PathBuf::from(s.into_owned()));
			expanded.unwrap_or(dir)
		}
		None => match std::env::current_dir() {
			Ok(dir) => dir,
			Err(e) => return error!("cannot access current working dir: {e}"),
		},
	};
	match root_dir.try_exists() {
		Ok(true) => WORKING_DIR.set(root_dir).unwrap_or(()),
		_ => return error!("cannot find/access specified root path"),
	}
	debug!("working dir '{}'", working_dir().display());

	let cancel_token = CancellationToken::new();
	let sigint_token = cancel_token.clone();
	ctrlc::set_handler(move || {
		info!("received SIGINT");
		sigint_token.cancel();
	})
	.unwrap();

	let result = match options.run_mode {
		cli::RunMode::Serve { bind, port } => {
			let listen_addr = SocketAddr::from((bind, port));
			run_server(listen_addr, cancel_token).await
		}
		cli::RunMode::Get { opts } => run_get(opts, cancel_token).await,
		cli::RunMode::Put { opts } => run_put(opts, cancel_token).await,
	};

	if let Err(e) = result {
		error!("{e}");
	}
}

async fn run_server(listen_addr: SocketAddr, cancel: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
	let server = Arc::new(
		Server::new(Some(Arc::new(FileReadHandler)), Some(Arc::new(FileWriteHandler))),
	);

	let shutdown_server = server.clone();
	tokio::spawn(async move {
		cancel.cancelled().await;
		shutdown_server.shutdown();
	});

	server.listen_and_serve(listen_addr).await?;
	Ok(())
}

async fn run_get(opts: cli::ClientActionOpts, cancel: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
	let server_addr = SocketAddr::from((opts.server, opts.port));
	let filename = opts.file.to_string_lossy().into_owned();
	let client = Client::new(server_addr).with_cancellation(cancel);

	let mut receiver = client.receive(&filename).await?;
	let file = File::create(&opts.file).await?;
	let n = receiver.receive_into(file).await?;
	info!("downloaded {n} bytes from {server_addr}");
	Ok(())
}

async fn run_put(opts: cli::ClientActionOpts, cancel: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
	let server_addr = SocketAddr::from((opts.server, opts.port));
	let filename = opts.file.to_string_lossy().into_owned();
	let client = Client::new(server_addr).with_cancellation(cancel);

	let mut sender = client.send(&filename).await?;
	let file = File::open(&opts.file).await?;
	let n = sender.send_from(file).await?;
	info!("uploaded {n} bytes to {server_addr}");
	Ok(())
}
