//! Ambient CLI surface (SPEC_FULL §6): a thin `clap` front end over [`crate::client`] and
//! [`crate::server`]. None of this module is part of the core's programmatic surface.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use clap::{Parser, Subcommand};

use simple_logger::SimpleLogger;

use crate::tftp::consts::TFTP_LISTEN_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Options {
	#[arg(value_enum, short, long,
		default_value_t = DebugLevel::Warn,
		help = "Debug level to determine which messages are printed", global = true
	)]
	pub debug: DebugLevel,

	#[arg(short = 'r', long = "root", global = true, help = "Directory served/written to (defaults to the current directory)")]
	pub root_dir: Option<PathBuf>,

	#[command(subcommand)]
	pub run_mode: RunMode,
}

#[derive(Debug, Clone, ValueEnum, Default)]
pub enum DebugLevel {
	Off = 0,
	Error,

	#[default]
	Warn,
	Info,
	Debug,
	Trace,
}

impl From<DebugLevel> for log::LevelFilter {
	fn from(value: DebugLevel) -> Self {
		match value {
			DebugLevel::Off => Self::Off,
			DebugLevel::Error => Self::Error,
			DebugLevel::Warn => Self::Warn,
			DebugLevel::Info => Self::Info,
			DebugLevel::Debug => Self::Debug,
			DebugLevel::Trace => Self::Trace,
		}
	}
}

#[derive(Subcommand, Debug)]
pub enum RunMode {
	Serve {
		#[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
		bind: IpAddr,

		#[arg(short, long, default_value_t = TFTP_LISTEN_PORT)]
		port: u16,
	},
	Get {
		#[command(flatten)]
		opts: ClientActionOpts,
	},
	Put {
		#[command(flatten)]
		opts: ClientActionOpts,
	},
}

#[derive(Debug, Args)]
pub struct ClientActionOpts {
	pub file: PathBuf,

	#[arg(help = "The remote server to connect to.")]
	pub server: IpAddr,

	#[arg(
		default_value_t = TFTP_LISTEN_PORT,
		help = "(optional) The remote port to connect to."
	)]
	pub port: u16,
}

pub fn init_logger(debug_level: DebugLevel) {
	SimpleLogger::new().with_level(debug_level.into()).env().init().unwrap();
}
