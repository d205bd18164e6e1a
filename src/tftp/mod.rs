//! TFTP server module.
//!
//! A read-only TFTP server (RFC 1350 + RFC 2347/2348/2349 options) for
//! serving PXE boot files: a listener on port 69 and one transfer state
//! machine per accepted request.

mod proto;
mod server;
mod transfer;

pub use proto::TftpRequest;
pub use server::TftpServer;
pub use transfer::{translate_filename, TftpTransfer};
