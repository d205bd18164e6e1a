//! Error types for the PXE boot helper.
//!
//! Using thiserror for ergonomic error definitions.

use thiserror::Error;

/// Errors that can occur during DHCP packet parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("invalid DHCP magic cookie")]
    InvalidMagicCookie,
}
