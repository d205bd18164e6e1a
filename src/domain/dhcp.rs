//! DHCP packet domain model.
//!
//! These types represent the logical structure of BOOTP/DHCP packets,
//! independent of where the bytes came from.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use macaddr::MacAddr6;

/// DHCP magic cookie: 0x63825363, big-endian on the wire.
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Size of the fixed BOOTP header through the magic cookie.
pub const DHCP_FIXED_SIZE: usize = 240;

/// DHCP message types as defined in RFC 2131.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl DhcpMessageType {
    /// Parse from the DHCP option 53 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }

    /// The option 53 wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
        }
    }
}

impl std::fmt::Display for DhcpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// A parsed BOOTP/DHCP packet.
///
/// The fixed header fields are kept verbatim; `sname` and `file` are raw
/// byte arrays because PXE replies treat them as padded buffers, not
/// strings. Options map option id to payload, last-write-wins on
/// duplicate ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    /// Operation: 1 = BOOTREQUEST, 2 = BOOTREPLY
    pub op: u8,
    /// Hardware type (1 = Ethernet)
    pub htype: u8,
    /// Hardware address length
    pub hlen: u8,
    /// Relay hops
    pub hops: u8,
    /// Transaction ID
    pub xid: u32,
    /// Seconds elapsed
    pub secs: u16,
    /// Flags
    pub flags: u16,
    /// Client IP address (if already known)
    pub ciaddr: Ipv4Addr,
    /// 'Your' IP address (assigned by server)
    pub yiaddr: Ipv4Addr,
    /// Next-server IP address
    pub siaddr: Ipv4Addr,
    /// Relay agent IP address
    pub giaddr: Ipv4Addr,
    /// Client hardware address, full 16-byte field
    pub chaddr: [u8; 16],
    /// Server host name field, raw
    pub sname: [u8; 64],
    /// Boot file name field, raw
    pub file: [u8; 128],
    /// DHCP options, keyed by option id
    pub options: BTreeMap<u8, Vec<u8>>,
    /// Address and port the datagram was received from
    pub source: SocketAddrV4,
}

impl DhcpPacket {
    /// Returns true if this is a client request (BOOTREQUEST).
    pub fn is_request(&self) -> bool {
        self.op == 1
    }

    /// Returns true if option 60 identifies a PXE client.
    ///
    /// Per the Intel PXE spec the vendor class begins with the ASCII
    /// string "PXEClient"; anything after that (arch, UNDI version) is
    /// irrelevant here.
    pub fn is_pxe_request(&self) -> bool {
        self.options
            .get(&60)
            .map(|v| v.len() >= 9 && &v[..9] == b"PXEClient")
            .unwrap_or(false)
    }

    /// Get the DHCP message type from option 53.
    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.options
            .get(&53)
            .and_then(|v| v.first())
            .and_then(|&b| DhcpMessageType::from_u8(b))
    }

    /// First six chaddr bytes as a MAC address (valid for htype=1).
    pub fn client_mac(&self) -> MacAddr6 {
        MacAddr6::new(
            self.chaddr[0],
            self.chaddr[1],
            self.chaddr[2],
            self.chaddr[3],
            self.chaddr[4],
            self.chaddr[5],
        )
    }

    /// Serialize back to wire format: fixed header, magic cookie,
    /// options, END. No trailing pad.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; DHCP_FIXED_SIZE];

        out[0] = self.op;
        out[1] = self.htype;
        out[2] = self.hlen;
        out[3] = self.hops;
        out[4..8].copy_from_slice(&self.xid.to_be_bytes());
        out[8..10].copy_from_slice(&self.secs.to_be_bytes());
        out[10..12].copy_from_slice(&self.flags.to_be_bytes());
        out[12..16].copy_from_slice(&self.ciaddr.octets());
        out[16..20].copy_from_slice(&self.yiaddr.octets());
        out[20..24].copy_from_slice(&self.siaddr.octets());
        out[24..28].copy_from_slice(&self.giaddr.octets());
        out[28..44].copy_from_slice(&self.chaddr);
        out[44..108].copy_from_slice(&self.sname);
        out[108..236].copy_from_slice(&self.file);
        out[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

        for (&id, payload) in &self.options {
            out.push(id);
            out.push(payload.len() as u8);
            out.extend_from_slice(payload);
        }
        out.push(255);

        out
    }

    /// Human-readable per-line description of the packet, emitted at
    /// debug level when tracing a PXE exchange.
    pub fn detail_dump(&self) -> Vec<String> {
        let mut r = Vec::new();

        r.push(if self.op == 1 { "BOOTREQUEST" } else { "BOOTREPLY" }.to_string());
        r.push(format!("Transaction id: 0x{:08X}", self.xid));
        r.push(format!("Hops: {}", self.hops));
        r.push(format!("Seconds since transaction start: {}", self.secs));
        r.push(format!("Flags: {:04x}", self.flags));
        r.push(format!("Client IP address: {}", self.ciaddr));
        r.push(format!("Your IP address: {}", self.yiaddr));
        r.push(format!("Next server: {}", self.siaddr));
        r.push(format!("Relay agent IP: {}", self.giaddr));
        r.push(format!("Client addr: {}", self.client_mac()));
        r.push(format!("Server host name: {}", string_field(&self.sname)));
        r.push(format!("Boot file: {}", string_field(&self.file)));

        for (&id, payload) in &self.options {
            r.push(format!(
                "Option {}, length {}, {}",
                id,
                payload.len(),
                option_name(id)
            ));
        }

        r
    }
}

/// Render a NUL-padded header field as text for display.
fn string_field(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Descriptive names for the option ids that matter to PXE.
pub fn option_name(id: u8) -> String {
    match id {
        43 => "Vendor options".to_string(),
        53 => "Message type".to_string(),
        54 => "Server ID".to_string(),
        55 => "Parameter request list".to_string(),
        57 => "Max message length".to_string(),
        60 => "Class ID".to_string(),
        61 => "Client machine UUID".to_string(),
        93 => "Client system architecture".to_string(),
        94 => "Network interface ID".to_string(),
        97 => "Client machine UUID".to_string(),
        255 => "End of options".to_string(),
        _ => format!("Unknown ({})", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> DhcpPacket {
        let mut options = BTreeMap::new();
        options.insert(53, vec![1]);
        options.insert(60, b"PXEClient:Arch:00000:UNDI:002001".to_vec());

        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

        DhcpPacket {
            op: 1,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0xDEADBEEF,
            secs: 4,
            flags: 0x8000,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options,
            source: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68),
        }
    }

    #[test]
    fn pxe_request_detection() {
        let mut pkt = sample_packet();
        assert!(pkt.is_pxe_request());

        pkt.options.insert(60, b"MSFT 5.0".to_vec());
        assert!(!pkt.is_pxe_request());

        pkt.options.remove(&60);
        assert!(!pkt.is_pxe_request());
    }

    #[test]
    fn pxe_request_requires_full_prefix() {
        let mut pkt = sample_packet();
        // Exactly "PXEClient" with nothing after is still a PXE client
        pkt.options.insert(60, b"PXEClient".to_vec());
        assert!(pkt.is_pxe_request());

        // A truncated prefix is not
        pkt.options.insert(60, b"PXEClien".to_vec());
        assert!(!pkt.is_pxe_request());
    }

    #[test]
    fn message_type_accessor() {
        let mut pkt = sample_packet();
        assert_eq!(pkt.message_type(), Some(DhcpMessageType::Discover));

        pkt.options.insert(53, vec![3]);
        assert_eq!(pkt.message_type(), Some(DhcpMessageType::Request));

        pkt.options.insert(53, vec![]);
        assert_eq!(pkt.message_type(), None);

        pkt.options.remove(&53);
        assert_eq!(pkt.message_type(), None);
    }

    #[test]
    fn client_mac_from_chaddr() {
        let pkt = sample_packet();
        assert_eq!(
            pkt.client_mac(),
            MacAddr6::new(0x00, 0x11, 0x22, 0x33, 0x44, 0x55)
        );
    }

    #[test]
    fn serialized_header_layout() {
        let pkt = sample_packet();
        let bytes = pkt.to_bytes();

        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 1);
        assert_eq!(bytes[2], 6);
        assert_eq!(&bytes[4..8], &0xDEADBEEFu32.to_be_bytes());
        assert_eq!(&bytes[236..240], &DHCP_MAGIC_COOKIE);
        // Options follow the cookie, END terminates
        assert_eq!(*bytes.last().unwrap(), 255);
    }

    #[test]
    fn message_type_round_trip() {
        for v in 1..=8u8 {
            let mt = DhcpMessageType::from_u8(v).unwrap();
            assert_eq!(mt.as_u8(), v);
        }
        assert_eq!(DhcpMessageType::from_u8(0), None);
        assert_eq!(DhcpMessageType::from_u8(9), None);
    }
}
