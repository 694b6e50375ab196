mod attach;
mod broker;
mod claims;
mod list;

use anyhow::Result;
use serde_json::Value;

use crate::cli::{Cli, Commands};

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Commands::Broker {
			socket,
			claim_file,
			no_mirror,
		} => broker::run(socket, claim_file, no_mirror).await,
		Commands::Claims { claim_file, broker } => claims::show(claim_file, broker).await,
		Commands::Release { paths, claim_file } => claims::release(paths, claim_file),
		Commands::List { signature } => list::run(signature).await,
		Commands::Attach(args) => attach::run(args).await,
	}
}

fn print_json(value: &Value) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}
