//! Error types for the broker
//!
//! # Error Recovery Strategies
//!
//! - **`Io`**: Socket or device file error. Retryable kinds
//!   (`WouldBlock`/`Interrupted`) are looped over inside the transport and
//!   never reach this type; anything surfacing here is unrecoverable at the
//!   point it occurred. Motor I/O errors are handled locally with a registry
//!   rescan and do not propagate.
//!
//! - **`Attribute`**: A device attribute file held content that does not
//!   parse (e.g. a non-numeric `position`). Treated like a motor I/O error:
//!   the node rescans and carries on.
//!
//! - **`NameConflict`**: Another node announced the same source name with a
//!   different hash during the quarantine startup phase. The node must exit
//!   non-zero; the name belongs to whoever claimed it first.
//!
//! - **`SendFailed`**: The encoder's send callback reported failure and the
//!   sticky error flag tripped. The node stops; it is supervised externally.
//!
//! - **`Json`**: Only produced while parsing client command lines. The
//!   client reports it as an error event on stdout and keeps running.

use thiserror::Error;

/// Errors that can occur in the broker
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed device attribute: {0}")]
    Attribute(String),

    #[error("source name {0:?} is already claimed by another node")]
    NameConflict(String),

    #[error("send callback reported failure, transmission stopped")]
    SendFailed,
}

pub type Result<T> = std::result::Result<T, Error>;
