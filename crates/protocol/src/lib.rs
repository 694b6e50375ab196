//! Data and wire types shared by the portclaim engine and its claim broker.
//!
//! Types in this crate are:
//! - **Pure data**: serialization plus the few pure predicates the engine
//!   needs (signature matching, claim-table membership)
//! - **Stable**: the claim file and broker envelopes are read by other
//!   processes, so their shapes change only deliberately
//!
//! The acquisition engine itself lives in `portclaim`.

pub mod broker;
pub mod claims;
pub mod endpoint;

pub use broker::{BrokerRequest, BrokerResponse};
pub use claims::ClaimTable;
pub use endpoint::{EndpointDescriptor, Signature};
