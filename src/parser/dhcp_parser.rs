//! DHCP packet parser implementation.
//!
//! Parses raw DHCP packets according to RFC 2131.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::domain::{DhcpPacket, DHCP_FIXED_SIZE, DHCP_MAGIC_COOKIE};
use crate::error::ParseError;

/// DHCP option codes with structural meaning.
mod option_codes {
    pub const PAD: u8 = 0;
    pub const END: u8 = 255;
}

/// Parser for DHCP packets.
pub struct DhcpParser;

impl DhcpParser {
    /// Create a new DHCP parser.
    pub fn new() -> Self {
        Self
    }

    /// Parse a DHCP packet from raw bytes.
    ///
    /// The input should be the UDP payload (not including IP/UDP
    /// headers). `source` is the address the datagram arrived from.
    pub fn parse(&self, data: &[u8], source: SocketAddrV4) -> Result<DhcpPacket, ParseError> {
        if data.len() < DHCP_FIXED_SIZE {
            return Err(ParseError::PacketTooShort {
                expected: DHCP_FIXED_SIZE,
                actual: data.len(),
            });
        }

        if data[236..240] != DHCP_MAGIC_COOKIE {
            return Err(ParseError::InvalidMagicCookie);
        }

        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];
        let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let secs = u16::from_be_bytes([data[8], data[9]]);
        let flags = u16::from_be_bytes([data[10], data[11]]);

        let ciaddr = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let yiaddr = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
        let siaddr = Ipv4Addr::new(data[20], data[21], data[22], data[23]);
        let giaddr = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);

        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);

        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        let options = Self::parse_options(&data[DHCP_FIXED_SIZE..]);

        Ok(DhcpPacket {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options,
            source,
        })
    }

    /// Parse the option stream following the magic cookie.
    ///
    /// The scan is lenient: a truncated option terminates it silently.
    /// Duplicate ids keep the last payload seen.
    fn parse_options(data: &[u8]) -> BTreeMap<u8, Vec<u8>> {
        let mut options = BTreeMap::new();
        let mut offset = 0;

        while offset < data.len() {
            let code = data[offset];

            if code == option_codes::PAD {
                offset += 1;
                continue;
            }

            if code == option_codes::END {
                break;
            }

            // Need a length byte
            if offset + 1 >= data.len() {
                break;
            }

            let len = data[offset + 1] as usize;

            if offset + 2 + len > data.len() {
                break;
            }

            options.insert(code, data[offset + 2..offset + 2 + len].to_vec());

            offset += 2 + len;
        }

        options
    }
}

impl Default for DhcpParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_source() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 42), 68)
    }

    fn minimal_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 300];
        packet[0] = 1; // BOOTREQUEST
        packet[1] = 1; // Ethernet
        packet[2] = 6;
        packet[4..8].copy_from_slice(&0x12345678u32.to_be_bytes());
        packet[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        packet[240] = 53;
        packet[241] = 1;
        packet[242] = 1; // DISCOVER
        packet[243] = 255;
        packet
    }

    #[test]
    fn parse_minimal_packet() {
        let parser = DhcpParser::new();
        let packet = minimal_packet();

        let dhcp = parser.parse(&packet, test_source()).unwrap();
        assert_eq!(dhcp.op, 1);
        assert_eq!(dhcp.xid, 0x12345678);
        assert_eq!(dhcp.chaddr[..6], [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(dhcp.options.get(&53), Some(&vec![1]));
        assert_eq!(dhcp.source, test_source());
    }

    #[test]
    fn packet_too_short() {
        let parser = DhcpParser::new();
        let packet = vec![0u8; 100];

        let result = parser.parse(&packet, test_source());
        assert!(matches!(result, Err(ParseError::PacketTooShort { .. })));
    }

    #[test]
    fn bad_magic_cookie() {
        let parser = DhcpParser::new();
        let mut packet = minimal_packet();
        packet[236] = 0;

        let result = parser.parse(&packet, test_source());
        assert!(matches!(result, Err(ParseError::InvalidMagicCookie)));
    }

    #[test]
    fn pad_bytes_are_skipped() {
        let parser = DhcpParser::new();
        let mut packet = minimal_packet();
        // PAD, PAD, option 60, END
        packet[240] = 0;
        packet[241] = 0;
        packet[242] = 60;
        packet[243] = 9;
        packet[244..253].copy_from_slice(b"PXEClient");
        packet[253] = 255;

        let dhcp = parser.parse(&packet, test_source()).unwrap();
        assert_eq!(dhcp.options.get(&60), Some(&b"PXEClient".to_vec()));
    }

    #[test]
    fn truncated_option_stops_scan_silently() {
        let parser = DhcpParser::new();
        let mut packet = minimal_packet();
        packet.truncate(246);
        // Option 60 claims 60 bytes but the packet ends first
        packet[243] = 60;
        packet[244] = 60;
        packet[245] = b'P';

        let dhcp = parser.parse(&packet, test_source()).unwrap();
        // Option 53 before the truncation survives
        assert_eq!(dhcp.options.get(&53), Some(&vec![1]));
        assert_eq!(dhcp.options.get(&60), None);
    }

    #[test]
    fn duplicate_option_last_write_wins() {
        let parser = DhcpParser::new();
        let mut packet = minimal_packet();
        // 53=1 at 240..243, then 53=3, then END
        packet[243] = 53;
        packet[244] = 1;
        packet[245] = 3;
        packet[246] = 255;

        let dhcp = parser.parse(&packet, test_source()).unwrap();
        assert_eq!(dhcp.options.get(&53), Some(&vec![3]));
    }

    #[test]
    fn nothing_after_end_is_read() {
        let parser = DhcpParser::new();
        let mut packet = minimal_packet();
        packet[243] = 255;
        // Garbage after END must be ignored
        packet[244] = 60;
        packet[245] = 9;

        let dhcp = parser.parse(&packet, test_source()).unwrap();
        assert_eq!(dhcp.options.len(), 1);
    }

    #[test]
    fn serialize_parse_round_trip() {
        let parser = DhcpParser::new();
        let packet = minimal_packet();

        let dhcp = parser.parse(&packet, test_source()).unwrap();
        let bytes = dhcp.to_bytes();
        let again = parser.parse(&bytes, test_source()).unwrap();

        assert_eq!(dhcp, again);
    }
}
