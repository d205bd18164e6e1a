//! pxeserve - Proxy DHCP and TFTP helper for PXE network boot.
//!
//! Runs alongside the site's regular DHCP server: the proxyDHCP
//! responder answers PXE clients with boot parameters (never IP
//! leases), and the read-only TFTP server hands out the boot image.
//!
//! # Architecture
//!
//! - `domain`: DHCP packet model and accessors
//! - `parser`: DHCP wire-format parsing
//! - `proxydhcp`: per-interface UDP/67 responder
//! - `tftp`: UDP/69 listener plus per-transfer state machines
//! - `config`: runtime settings from the command line
//!
//! Everything runs on one cooperative event loop (a current-thread
//! tokio runtime): handlers are non-blocking and run to completion per
//! datagram, and each TFTP transfer is an independent task with its own
//! ephemeral socket.

pub mod config;
pub mod domain;
pub mod error;
pub mod parser;
pub mod proxydhcp;
pub mod tftp;

use anyhow::Result;
use tracing::info;

use config::Config;
use proxydhcp::ProxyDhcpServer;
use tftp::TftpServer;

/// The combined proxyDHCP + TFTP service.
pub struct PxeService {
    config: Config,
}

impl PxeService {
    /// Create the service from a configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run both servers until interrupted.
    ///
    /// A fatal error in either server (a bind failure, most likely)
    /// takes the whole service down. Ctrl-C resolves cleanly: dropping
    /// the server futures closes every socket and abandons in-flight
    /// transfers, which PXE clients recover from by retrying.
    pub async fn run(self) -> Result<()> {
        self.config.warn_if_unusual();

        let responder = ProxyDhcpServer::new(self.config.boot_filename.clone());
        let tftp = TftpServer::new(&self.config.server_root);

        tokio::select! {
            result = responder.run() => result,
            result = tftp.run() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt signal, shutting down");
                Ok(())
            }
        }
    }
}
