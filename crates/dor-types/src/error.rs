use thiserror::Error;

/// Errors produced by identifier and token parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("identifier must not be empty")]
    Empty,

    #[error("invalid pid {pid:?}: {reason}")]
    InvalidPid { pid: String, reason: String },

    #[error("invalid datastream token {token:?}: {reason}")]
    InvalidDatastreamToken { token: String, reason: String },

    #[error("invalid percent-encoding in {input:?}: {reason}")]
    InvalidEncoding { input: String, reason: String },
}
