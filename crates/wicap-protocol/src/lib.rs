//! # wicap-protocol
//!
//! Wire formats spoken by the WiCap HTTP interface.
//!
//! This crate defines the status report, the request query parser and the
//! fixed set of URL paths served by the instrument.

pub mod codec;
pub mod messages;

pub use codec::{encode_status, parse_query, strtol, CodecError};
pub use messages::*;
