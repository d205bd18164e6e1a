//! TFTP request listener.
//!
//! One socket on port 69 accepts read requests and hands each off to a
//! `TftpTransfer` with its own ephemeral socket; the listener itself
//! never sends anything on port 69.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::proto::TftpRequest;
use super::transfer::TftpTransfer;

/// TFTP well-known port
const TFTP_PORT: u16 = 69;

/// TFTP server for serving boot files.
pub struct TftpServer {
    /// Root directory for TFTP files.
    root: PathBuf,
}

impl TftpServer {
    /// Create a new TFTP server serving files under `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Bind port 69 and serve read requests until the task is dropped.
    ///
    /// Live transfers are owned by the listener's task set and reaped
    /// as they reach a terminal state; dropping the future aborts them
    /// all, which is the shutdown behavior PXE clients expect.
    pub async fn run(self) -> Result<()> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, TFTP_PORT))
            .await
            .with_context(|| format!("Failed to bind TFTP socket to port {}", TFTP_PORT))?;

        info!("TFTP server listening on port {}", TFTP_PORT);
        info!("Serving files from: {}", self.root.display());

        let mut transfers: JoinSet<()> = JoinSet::new();
        let mut buf = [0u8; 2048];

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(ok) => ok,
                        Err(e) => {
                            error!("TFTP receive error: {}", e);
                            continue;
                        }
                    };

                    let peer = match from {
                        SocketAddr::V4(v4) => v4,
                        SocketAddr::V6(_) => continue,
                    };

                    let request = match TftpRequest::parse(&buf[..len]) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!("{} (from {})", e, peer);
                            continue;
                        }
                    };

                    debug!("TFTP request from {} for {:?}", peer, request.filename);

                    let root = self.root.clone();
                    transfers.spawn(async move {
                        match TftpTransfer::start(&root, peer, &request).await {
                            Ok(transfer) => {
                                if let Err(e) = transfer.run().await {
                                    error!("TFTP transfer error for {}: {}", peer, e);
                                }
                            }
                            Err(e) => {
                                error!("Transfer failed to start: {:#}", e);
                            }
                        }
                    });
                }
                Some(finished) = transfers.join_next() => {
                    if let Err(e) = finished {
                        error!("TFTP transfer task failed: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_server_root() {
        let server = TftpServer::new("/srv/tftp");
        assert_eq!(server.root, PathBuf::from("/srv/tftp"));
    }
}
