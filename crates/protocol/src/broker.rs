//! Claim broker envelopes.
//!
//! The broker speaks newline-delimited JSON over a local socket. Each client
//! keeps one connection open for its lifetime; claims granted over that
//! connection are released when it closes.

use serde::{Deserialize, Serialize};

use crate::claims::ClaimTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerRequest {
	Ping,
	/// Snapshot of the whole table.
	List,
	/// Compare-and-set claim on behalf of this connection.
	Claim {
		path: String,
	},
	/// Release one path owned by this connection.
	Release {
		path: String,
	},
	/// Release several paths owned by this connection.
	ReleaseAll {
		paths: Vec<String>,
	},
	Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerResponse {
	Pong,
	Claims { table: ClaimTable },
	/// Outcome of a [`BrokerRequest::Claim`]; `granted` is `false` when another client owns `path`.
	Claim { path: String, granted: bool },
	Ok,
	Error { code: String, message: String },
}
