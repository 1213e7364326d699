//! Foundation types for the digital object repository (DOR).
//!
//! This crate provides the identifier and token types that every storage
//! and registry crate keys its data on. Every other DOR crate depends on
//! `dor-types`.
//!
//! # Key Types
//!
//! - [`Pid`]: Persistent identifier of a digital object (`namespace:id`)
//! - [`DatastreamToken`]: One version of one datastream of an object
//! - [`Hints`]: Opaque string bag forwarded verbatim to storage backends
//!
//! Tokens are the caller-visible keys. The object token is the PID string
//! itself; a datastream token joins the PID, the datastream id and the
//! version id with [`DATASTREAM_SEPARATOR`], percent-encoding both
//! sub-fields so the separator never appears inside them.

pub mod encoding;
pub mod error;
pub mod hints;
pub mod pid;
pub mod token;

pub use error::TypeError;
pub use hints::Hints;
pub use pid::Pid;
pub use token::{DatastreamToken, DATASTREAM_SEPARATOR};
