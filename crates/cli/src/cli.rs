use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "portclaim")]
#[command(about = "Claim serial endpoints exclusively across uncoordinated processes")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the claim broker in the foreground
	Broker {
		/// Socket to listen on (default: $XDG_RUNTIME_DIR/portclaim.sock)
		#[arg(long, value_name = "PATH")]
		socket: Option<PathBuf>,

		/// Claim file to mirror grants into (default: ~/.serialport)
		#[arg(long, value_name = "PATH")]
		claim_file: Option<PathBuf>,

		/// Keep claims in memory only
		#[arg(long, conflicts_with = "claim_file")]
		no_mirror: bool,
	},

	/// Print the current claim table as JSON
	Claims {
		#[arg(long, value_name = "PATH")]
		claim_file: Option<PathBuf>,

		/// Ask the broker on this socket instead of reading the file
		#[arg(long, value_name = "PATH", conflicts_with = "claim_file")]
		broker: Option<PathBuf>,
	},

	/// Drop stale entries from the claim file
	Release {
		#[arg(required = true, value_name = "ENDPOINT")]
		paths: Vec<String>,

		#[arg(long, value_name = "PATH")]
		claim_file: Option<PathBuf>,
	},

	/// Print the endpoints visible on this host as JSON
	List {
		/// Only show endpoints whose attribute KEY equals VALUE (repeatable)
		#[arg(long = "signature", value_name = "KEY=VALUE", value_parser = parse_key_val)]
		signature: Vec<(String, String)>,
	},

	/// Acquire a matching endpoint and copy its bytes to stdout
	Attach(AttachArgs),
}

#[derive(Args, Debug, Default)]
pub struct AttachArgs {
	/// Engine options file (camelCase JSON)
	#[arg(long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Required endpoint attribute (repeatable; overrides the file)
	#[arg(long = "signature", value_name = "KEY=VALUE", value_parser = parse_key_val)]
	pub signature: Vec<(String, String)>,

	/// Bytes to read before handing the connection over
	#[arg(long, value_name = "N")]
	pub header: Option<usize>,

	/// Line speed passed to the tty transport
	#[arg(long, value_name = "BAUD")]
	pub baud_rate: Option<u32>,

	/// Delay between discovery ticks in milliseconds
	#[arg(long = "poll-ms", value_name = "MS")]
	pub poll_ms: Option<u64>,

	/// Stay disconnected after the endpoint goes away
	#[arg(long)]
	pub no_reconnect: bool,

	/// Exit after the first connection closes
	#[arg(long)]
	pub once: bool,

	#[arg(long, value_name = "PATH")]
	pub claim_file: Option<PathBuf>,

	/// Arbitrate through the claim broker on this socket
	#[arg(long, value_name = "PATH")]
	pub broker: Option<PathBuf>,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
	let (key, value) = raw
		.split_once('=')
		.ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
	if key.is_empty() {
		return Err(format!("empty attribute name in `{raw}`"));
	}
	Ok((key.to_string(), value.to_string()))
}
