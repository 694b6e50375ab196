//! Error types for the acquisition engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while listing, opening, or claiming endpoints.
#[derive(Debug, Error)]
pub enum Error {
	/// Opening an endpoint failed (busy, vanished, permission denied, ...).
	#[error("Failed to open {path}: {source}")]
	Open {
		path: String,
		#[source]
		source: std::io::Error,
	},

	/// Endpoint enumeration failed.
	#[error("Endpoint listing failed: {0}")]
	Listing(String),

	/// The claim broker answered with an error.
	#[error("Claim broker error {code}: {message}")]
	Broker { code: String, message: String },

	/// No claim broker is listening on the configured socket.
	#[error("Claim broker not running at {0}")]
	BrokerUnavailable(String),

	/// Invalid engine or transport configuration.
	#[error("Invalid configuration: {0}")]
	Config(String),

	/// The connection's event channel closed unexpectedly.
	#[error("Connection closed unexpectedly")]
	ChannelClosed,

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Builds an [`Error::Open`] for `path`.
	pub fn open(path: impl Into<String>, source: std::io::Error) -> Self {
		Error::Open {
			path: path.into(),
			source,
		}
	}

	/// Returns true if the endpoint was held by someone else.
	pub fn is_busy(&self) -> bool {
		match self {
			Error::Open { source, .. } => source.kind() == std::io::ErrorKind::ResourceBusy,
			_ => false,
		}
	}
}
