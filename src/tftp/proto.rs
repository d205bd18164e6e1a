//! TFTP wire format: opcodes, error codes, request parsing and packet
//! assembly per RFC 1350 with the RFC 2347/2348/2349 option extensions.

use anyhow::{bail, Result};

/// TFTP opcodes
pub const OPCODE_RRQ: u16 = 1; // Read request
pub const OPCODE_WRQ: u16 = 2; // Write request (not supported)
pub const OPCODE_DATA: u16 = 3; // Data packet
pub const OPCODE_ACK: u16 = 4; // Acknowledgment
pub const OPCODE_ERROR: u16 = 5; // Error
pub const OPCODE_OACK: u16 = 6; // Option acknowledgment (RFC 2347)

/// TFTP error codes
pub const ERROR_NOT_DEFINED: u16 = 0;
pub const ERROR_FILE_NOT_FOUND: u16 = 1;
pub const ERROR_ACCESS_VIOLATION: u16 = 2;
pub const ERROR_ILLEGAL_OPERATION: u16 = 4;

/// Default block size per RFC 1350
pub const DEFAULT_BLOCK_SIZE: u16 = 512;

/// Negotiable block size bounds (RFC 2348)
pub const MIN_BLOCK_SIZE: u16 = 8;
pub const MAX_BLOCK_SIZE: u16 = 65464;

/// A parsed TFTP request datagram.
///
/// The payload after the opcode is a run of NUL-terminated ASCII
/// strings: filename, mode, then option name/value pairs.
#[derive(Debug, Clone)]
pub struct TftpRequest {
    pub opcode: u16,
    pub filename: String,
    pub mode: String,
    pub options: Vec<(String, String)>,
}

impl TftpRequest {
    /// Parse a datagram received on the listener port.
    pub fn parse(data: &[u8]) -> Result<Self> {
        // 2-byte opcode + filename + NUL + mode + NUL at minimum
        if data.len() < 6 {
            bail!("invalid TFTP request packet (too small)");
        }

        let opcode = u16::from_be_bytes([data[0], data[1]]);

        // Only NUL-terminated runs count; trailing unterminated bytes
        // are discarded.
        let mut strings = Vec::new();
        let mut start = 2;
        for i in 2..data.len() {
            if data[i] == 0 {
                strings.push(String::from_utf8_lossy(&data[start..i]).into_owned());
                start = i + 1;
            }
        }

        if strings.len() < 2 {
            bail!("invalid TFTP request packet (required filename and mode missing)");
        }

        let filename = strings[0].clone();
        let mode = strings[1].clone();

        let options = strings[2..]
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();

        Ok(Self {
            opcode,
            filename,
            mode,
            options,
        })
    }

    /// Case-insensitive option lookup.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Assemble a DATA packet: opcode, block number, payload.
pub fn data_packet(block: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + payload.len());
    packet.extend_from_slice(&OPCODE_DATA.to_be_bytes());
    packet.extend_from_slice(&block.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Assemble an ERROR packet: opcode, error code, NUL-terminated message.
pub fn error_packet(code: u16, message: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(5 + message.len());
    packet.extend_from_slice(&OPCODE_ERROR.to_be_bytes());
    packet.extend_from_slice(&code.to_be_bytes());
    packet.extend_from_slice(message.as_bytes());
    packet.push(0);
    packet
}
