//! Per-transfer TFTP state machine.
//!
//! Each accepted read request gets its own `TftpTransfer` with an
//! ephemeral UDP socket. The transfer is lock-step: one DATA packet
//! outstanding, advanced by the matching ACK, retransmitted on a
//! duplicate ACK or on timer expiry.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::proto::{
    data_packet, error_packet, TftpRequest, DEFAULT_BLOCK_SIZE, ERROR_ACCESS_VIOLATION,
    ERROR_FILE_NOT_FOUND, ERROR_ILLEGAL_OPERATION, ERROR_NOT_DEFINED, MAX_BLOCK_SIZE,
    MIN_BLOCK_SIZE, OPCODE_ACK, OPCODE_ERROR, OPCODE_OACK, OPCODE_RRQ,
};

/// How long to wait for an ACK before resending the last packet.
const RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Consecutive unanswered retransmits before the transfer is abandoned.
const MAX_RETRIES: u32 = 5;

/// One in-flight file read.
pub struct TftpTransfer {
    socket: UdpSocket,
    peer: SocketAddrV4,
    file: File,
    filename: String,
    blksize: u16,
    /// Number of the DATA block currently in `send_buf`, 1-based and
    /// wrapping (block 0xFFFF rolls over to 0, standard TFTP behavior).
    block: u16,
    /// The current DATA packet, kept verbatim for retransmission.
    send_buf: Vec<u8>,
    /// The OACK awaiting its ACK(0); DATA 1 is withheld until then.
    oack: Option<Vec<u8>>,
}

impl TftpTransfer {
    /// Validate a request and perform the opening exchange.
    ///
    /// On success the first server packet (OACK or DATA 1) has been
    /// sent and the transfer is ready for `run`. All client-visible
    /// failures send a typed ERROR packet before returning.
    pub async fn start(
        server_root: &Path,
        peer: SocketAddrV4,
        request: &TftpRequest,
    ) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .context("failed to bind transfer socket")?;

        if request.opcode != OPCODE_RRQ {
            send_error(&socket, peer, ERROR_ILLEGAL_OPERATION, "Unsupported operation").await;
            bail!("opcode {} is not RRQ", request.opcode);
        }

        let Some(path) = translate_filename(server_root, &request.filename) else {
            send_error(&socket, peer, ERROR_FILE_NOT_FOUND, "File not found").await;
            bail!("rejected filename {:?}", request.filename);
        };

        // Canonicalize and re-check containment so a symlink inside the
        // root cannot point the transfer outside it.
        let root = server_root
            .canonicalize()
            .unwrap_or_else(|_| server_root.to_path_buf());
        let path = match path.canonicalize() {
            Ok(resolved) if resolved.starts_with(&root) => resolved,
            Ok(resolved) => {
                send_error(&socket, peer, ERROR_FILE_NOT_FOUND, "File not found").await;
                bail!(
                    "request for {:?} escapes the server root ({})",
                    request.filename,
                    resolved.display()
                );
            }
            Err(_) => {
                send_error(&socket, peer, ERROR_FILE_NOT_FOUND, "File not found").await;
                bail!("file {:?} not found", request.filename);
            }
        };

        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                send_error(&socket, peer, ERROR_FILE_NOT_FOUND, "File not found").await;
                bail!("cannot open {}: {}", path.display(), e);
            }
        };

        let metadata = file.metadata().await?;

        if !metadata.is_file() {
            send_error(&socket, peer, ERROR_FILE_NOT_FOUND, "File not found").await;
            bail!("{} is not a regular file", path.display());
        }

        if !world_readable(&metadata) {
            send_error(&socket, peer, ERROR_ACCESS_VIOLATION, "Permission denied").await;
            bail!("{} is not world readable", path.display());
        }

        debug!("TFTP: file {} opened for {}", path.display(), peer);

        let file_size = metadata.len();

        // Option negotiation (RFC 2347). Unknown options are ignored;
        // recognized names are echoed lowercase.
        let mut blksize = DEFAULT_BLOCK_SIZE;
        let mut oack = OPCODE_OACK.to_be_bytes().to_vec();

        if let Some(value) = request.option("blksize") {
            let wanted = value.parse::<u64>().unwrap_or(0);
            blksize = wanted.clamp(MIN_BLOCK_SIZE as u64, MAX_BLOCK_SIZE as u64) as u16;
            debug!("Setting blksize to {}", blksize);
            oack.extend_from_slice(b"blksize\0");
            oack.extend_from_slice(blksize.to_string().as_bytes());
            oack.push(0);
        }

        if request.option("tsize").is_some() {
            debug!("Response file size={}", file_size);
            oack.extend_from_slice(b"tsize\0");
            oack.extend_from_slice(file_size.to_string().as_bytes());
            oack.push(0);
        }

        let mut transfer = Self {
            socket,
            peer,
            file,
            filename: request.filename.clone(),
            blksize,
            block: 1,
            send_buf: Vec::new(),
            oack: None,
        };

        // Block 1 is read up front either way; with an OACK outstanding
        // it is withheld until the client acknowledges block 0.
        transfer.fill_block().await?;

        if oack.len() > 2 {
            let sent = transfer
                .socket
                .send_to(&oack, peer)
                .await
                .context("failed to send OACK")?;
            if sent != oack.len() {
                bail!("outbound OACK packet truncated");
            }
            transfer.oack = Some(oack);
        } else {
            transfer.send_current().await?;
        }

        Ok(transfer)
    }

    /// Drive the transfer to completion.
    ///
    /// Returns when the final ACK arrives; any wire error, malformed
    /// ACK, or retry exhaustion terminates with an error.
    pub async fn run(mut self) -> Result<()> {
        let mut buf = [0u8; 1024];
        let mut retries = 0u32;

        loop {
            let received = match timeout(RETRANSMIT_TIMEOUT, self.socket.recv_from(&mut buf)).await
            {
                Err(_) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        bail!("transfer timed out after {} retries", MAX_RETRIES);
                    }
                    match &self.oack {
                        Some(oack) => self.send_raw(oack).await?,
                        None => self.send_current().await?,
                    }
                    debug!("Retransmitted after timeout ({}/{})", retries, MAX_RETRIES);
                    continue;
                }
                Ok(result) => result.context("receive error on transfer socket")?,
            };

            let (len, from) = received;
            let from = match from {
                SocketAddr::V4(v4) => v4,
                SocketAddr::V6(_) => continue,
            };

            if from != self.peer {
                debug!("Dropped packet from wrong source {}", from);
                continue;
            }

            if len < 4 {
                self.send_error_to_peer(ERROR_NOT_DEFINED, "Malformed packet").await;
                bail!("malformed packet from {} ({} bytes)", from, len);
            }

            let opcode = u16::from_be_bytes([buf[0], buf[1]]);
            let block = u16::from_be_bytes([buf[2], buf[3]]);

            if opcode == OPCODE_ERROR {
                // The block field carries the error code here
                bail!(
                    "client aborted transfer: error {} ({})",
                    block,
                    String::from_utf8_lossy(&buf[4..len]).trim_end_matches('\0')
                );
            }

            if opcode != OPCODE_ACK {
                self.send_error_to_peer(ERROR_NOT_DEFINED, "Expected ACK").await;
                bail!("unexpected opcode {} from {}", opcode, from);
            }

            retries = 0;

            // An OACK is acknowledged with block 0; only then does the
            // prepared first DATA packet go out.
            if self.oack.is_some() {
                if block == 0 {
                    self.oack = None;
                    self.send_current().await?;
                } else {
                    debug!("Dropped acknowledgement for unexpected block number");
                }
                continue;
            }

            // The previous block's ACK again is a request to retransmit
            if block == self.block.wrapping_sub(1) {
                self.send_current().await?;
                debug!("Retransmitted block {}", self.block);
                continue;
            }

            if block != self.block {
                debug!("Dropped acknowledgement for unexpected block number");
                continue;
            }

            // A short DATA packet was the EOF sentinel; its ACK ends
            // the transfer.
            if self.send_buf.len() < 4 + self.blksize as usize {
                info!("TFTP: transfer of {:?} completed", self.filename);
                return Ok(());
            }

            self.block = self.block.wrapping_add(1);
            self.fill_block().await?;
            self.send_current().await?;
        }
    }

    /// Read the next block from the file into the send buffer.
    async fn fill_block(&mut self) -> Result<()> {
        let mut payload = vec![0u8; self.blksize as usize];
        let mut filled = 0;

        while filled < payload.len() {
            let n = self
                .file
                .read(&mut payload[filled..])
                .await
                .context("file read error")?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        payload.truncate(filled);
        self.send_buf = data_packet(self.block, &payload);
        Ok(())
    }

    /// (Re)send the buffered DATA packet.
    async fn send_current(&self) -> Result<()> {
        self.send_raw(&self.send_buf).await
    }

    async fn send_raw(&self, packet: &[u8]) -> Result<()> {
        let sent = self
            .socket
            .send_to(packet, self.peer)
            .await
            .context("failed to send packet")?;
        if sent != packet.len() {
            bail!("outbound packet truncated");
        }
        Ok(())
    }

    async fn send_error_to_peer(&self, code: u16, message: &str) {
        send_error(&self.socket, self.peer, code, message).await;
    }
}

/// Map a requested TFTP filename onto the server root.
///
/// Backslashes are treated as path separators (PXE clients frequently
/// send DOS-style paths). Any `..` anywhere rejects the name outright,
/// leading one included; absolute and relative names both resolve
/// under the root.
pub fn translate_filename(server_root: &Path, requested: &str) -> Option<PathBuf> {
    let normalized = requested.replace('\\', "/");

    if normalized.contains("..") {
        return None;
    }

    Some(server_root.join(normalized.trim_start_matches('/')))
}

/// Best-effort ERROR packet; failures are logged, the peer will time out.
async fn send_error(socket: &UdpSocket, peer: SocketAddrV4, code: u16, message: &str) {
    let packet = error_packet(code, message);
    if let Err(e) = socket.send_to(&packet, peer).await {
        warn!("Failed to send TFTP error packet to {}: {}", peer, e);
    }
}

#[cfg(unix)]
fn world_readable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o004 != 0
}

#[cfg(not(unix))]
fn world_readable(_metadata: &std::fs::Metadata) -> bool {
    true
}
