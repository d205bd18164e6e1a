//! ProxyDHCP server implementation.
//!
//! Listens for PXE boot requests and responds with boot server
//! information. Works alongside the existing DHCP server without
//! providing IP addresses: replies carry boot parameters only and
//! always leave `ciaddr`/`yiaddr` zero.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use pnet::datalink;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::domain::{DhcpMessageType, DhcpPacket, DHCP_FIXED_SIZE, DHCP_MAGIC_COOKIE};
use crate::parser::DhcpParser;

/// DHCP ports
const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;

/// DHCP option codes
const OPTION_DHCP_MESSAGE_TYPE: u8 = 53;
const OPTION_SERVER_IDENTIFIER: u8 = 54;
const OPTION_VENDOR_CLASS_ID: u8 = 60;
const OPTION_TFTP_SERVER_NAME: u8 = 66;
const OPTION_BOOTFILE_NAME: u8 = 67;
const OPTION_VENDOR_SPECIFIC: u8 = 43;
const OPTION_END: u8 = 255;

/// PXE vendor sub-options (nested inside option 43)
const PXE_DISCOVERY_CONTROL: u8 = 6;
const PXE_BOOT_SERVERS: u8 = 8;

/// Discovery control: bit 3 = use bootfile directly (no prompt/menu),
/// bit 1 = disable multicast discovery.
const DISCOVERY_CONTROL: u8 = (1 << 3) | (1 << 1);

/// Minimum BOOTP packet size; replies are padded up to this.
const MIN_REPLY_SIZE: usize = 300;

/// A network interface the responder answers on.
///
/// One UDP/67 socket per interface so offers can be sourced from the
/// address of the interface that saw the request.
struct Interface {
    name: String,
    addr: Ipv4Addr,
    socket: UdpSocket,
}

/// ProxyDHCP server for PXE boot.
pub struct ProxyDhcpServer {
    /// Boot filename advertised in option 67 and the BOOTP file field.
    boot_filename: String,
}

impl ProxyDhcpServer {
    /// Create a new proxyDHCP server.
    pub fn new(boot_filename: impl Into<String>) -> Self {
        Self {
            boot_filename: boot_filename.into(),
        }
    }

    /// Bind every non-loopback IPv4 interface and answer PXE requests
    /// until the task is dropped.
    ///
    /// Fails if no suitable interface exists or none can be bound.
    pub async fn run(self) -> Result<()> {
        let interfaces = Self::bind_interfaces()?;

        let boot_filename = Arc::new(self.boot_filename);
        let mut tasks = JoinSet::new();

        for interface in interfaces {
            let boot_filename = boot_filename.clone();
            tasks.spawn(async move {
                interface_loop(interface, &boot_filename).await;
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("ProxyDHCP interface task failed: {}", e);
            }
        }

        Ok(())
    }

    /// Enumerate usable interfaces and bind a DHCP socket on each.
    fn bind_interfaces() -> Result<Vec<Interface>> {
        let mut interfaces = Vec::new();

        for iface in datalink::interfaces() {
            if iface.is_loopback() {
                continue;
            }

            let Some(addr) = iface.ips.iter().find_map(|ip| match ip.ip() {
                std::net::IpAddr::V4(v4) => Some(v4),
                std::net::IpAddr::V6(_) => None,
            }) else {
                continue;
            };

            match create_dhcp_socket(&iface.name) {
                Ok(socket) => {
                    info!("ProxyDHCP listening on {} ({})", iface.name, addr);
                    interfaces.push(Interface {
                        name: iface.name,
                        addr,
                        socket,
                    });
                }
                Err(e) => {
                    warn!("Skipping interface {}: {}", iface.name, e);
                }
            }
        }

        if interfaces.is_empty() {
            bail!("could not find a suitable network interface");
        }

        Ok(interfaces)
    }
}

/// Receive loop for one interface socket.
async fn interface_loop(interface: Interface, boot_filename: &str) {
    let parser = DhcpParser::new();
    let mut buf = [0u8; 1500];

    loop {
        let (len, from) = match interface.socket.recv_from(&mut buf).await {
            Ok(ok) => ok,
            Err(e) => {
                error!("ProxyDHCP receive error on {}: {}", interface.name, e);
                return;
            }
        };

        let source = match from {
            std::net::SocketAddr::V4(v4) => v4,
            std::net::SocketAddr::V6(_) => continue,
        };

        let packet = match parser.parse(&buf[..len], source) {
            Ok(p) => p,
            Err(e) => {
                warn!("Error decoding DHCP packet from {}: {}", source, e);
                continue;
            }
        };

        let Some((reply, dest)) = respond_to(&packet, interface.addr, boot_filename) else {
            continue;
        };

        // Replies must leave from port 67 or PXE firmware rejects them,
        // so the listener socket doubles as the reply socket.
        match interface.socket.send_to(&reply, dest).await {
            Ok(n) => debug!("Sent {} ({} bytes) to {}", reply_kind(&packet), n, dest),
            Err(e) => error!("Failed to send {}: {}", reply_kind(&packet), e),
        }
    }
}

fn reply_kind(request: &DhcpPacket) -> &'static str {
    match request.message_type() {
        Some(DhcpMessageType::Discover) => "DHCPOFFER",
        Some(DhcpMessageType::Request) => "DHCPACK",
        _ => "reply",
    }
}

/// Classify one inbound packet and build the reply, if any.
///
/// Stateless: everything needed to answer is in the request and the
/// receiving interface's address.
pub fn respond_to(
    packet: &DhcpPacket,
    iface_addr: Ipv4Addr,
    boot_filename: &str,
) -> Option<(Vec<u8>, SocketAddrV4)> {
    if !packet.is_request() {
        debug!("Ignoring BOOTREPLY on server port");
        return None;
    }

    if !packet.is_pxe_request() {
        debug!("Ignoring non PXE packet");
        return None;
    }

    for line in packet.detail_dump() {
        debug!("{}", line);
    }

    match packet.message_type() {
        Some(DhcpMessageType::Discover) => {
            info!(
                "PXE DISCOVER from {} (XID: 0x{:08X})",
                packet.client_mac(),
                packet.xid
            );

            // The client usually has no address yet, so fall back to
            // link broadcast.
            let dest_ip = if packet.source.ip().is_unspecified() {
                Ipv4Addr::BROADCAST
            } else {
                *packet.source.ip()
            };

            Some((
                build_offer(packet, iface_addr, boot_filename),
                SocketAddrV4::new(dest_ip, DHCP_CLIENT_PORT),
            ))
        }
        Some(DhcpMessageType::Request) => {
            info!(
                "PXE REQUEST from {} (XID: 0x{:08X})",
                packet.client_mac(),
                packet.xid
            );

            Some((
                build_ack(packet, iface_addr, boot_filename),
                SocketAddrV4::new(*packet.source.ip(), DHCP_CLIENT_PORT),
            ))
        }
        other => {
            debug!("Ignoring unhandled message type {:?}", other);
            None
        }
    }
}

/// Shared fixed header for OFFER and ACK.
///
/// `ciaddr`/`yiaddr` stay zero: a proxy DHCP server must not assign
/// addresses. `siaddr` points the client at this interface for TFTP.
fn build_reply_header(request: &DhcpPacket, iface_addr: Ipv4Addr) -> Vec<u8> {
    let mut reply = vec![0u8; DHCP_FIXED_SIZE];

    reply[0] = 2; // BOOTREPLY
    reply[1] = 1; // Ethernet
    reply[2] = 6;
    reply[3] = 0;
    reply[4..8].copy_from_slice(&request.xid.to_be_bytes());
    reply[20..24].copy_from_slice(&iface_addr.octets());
    reply[28..44].copy_from_slice(&request.chaddr);
    reply[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

    reply
}

/// Append one option as id, length, payload.
fn push_option(buf: &mut Vec<u8>, id: u8, payload: &[u8]) {
    buf.push(id);
    buf.push(payload.len() as u8);
    buf.extend_from_slice(payload);
}

/// Pad with zeros up to the historical BOOTP minimum.
fn pad_reply(mut reply: Vec<u8>) -> Vec<u8> {
    if reply.len() < MIN_REPLY_SIZE {
        reply.resize(MIN_REPLY_SIZE, 0);
    }
    reply
}

/// Build a DHCPOFFER for a PXE DISCOVER.
pub fn build_offer(request: &DhcpPacket, iface_addr: Ipv4Addr, boot_filename: &str) -> Vec<u8> {
    let mut reply = build_reply_header(request, iface_addr);

    push_option(
        &mut reply,
        OPTION_DHCP_MESSAGE_TYPE,
        &[DhcpMessageType::Offer.as_u8()],
    );
    push_option(&mut reply, OPTION_SERVER_IDENTIFIER, &iface_addr.octets());
    push_option(&mut reply, OPTION_VENDOR_CLASS_ID, b"PXEClient");
    push_option(&mut reply, OPTION_BOOTFILE_NAME, boot_filename.as_bytes());

    // Nested PXE vendor option stream, with its own END
    let mut vendor = Vec::new();
    push_option(&mut vendor, PXE_DISCOVERY_CONTROL, &[DISCOVERY_CONTROL]);

    // Boot server entry: type 0x8000 ("this server"), one address
    let mut boot_server = vec![0x80, 0x00, 1];
    boot_server.extend_from_slice(&iface_addr.octets());
    push_option(&mut vendor, PXE_BOOT_SERVERS, &boot_server);
    vendor.push(OPTION_END);

    push_option(&mut reply, OPTION_VENDOR_SPECIFIC, &vendor);
    reply.push(OPTION_END);

    pad_reply(reply)
}

/// Build a DHCPACK for a PXE REQUEST.
///
/// Besides the option list, the ACK fills the BOOTP `sname` field with
/// the dotted-quad server address and `file` with the boot filename,
/// which some PXE ROMs read in preference to options 66/67.
pub fn build_ack(request: &DhcpPacket, iface_addr: Ipv4Addr, boot_filename: &str) -> Vec<u8> {
    let mut reply = build_reply_header(request, iface_addr);

    let addr_string = iface_addr.to_string();

    // sname, NUL padded with a guaranteed final NUL
    let sname_len = addr_string.len().min(63);
    reply[44..44 + sname_len].copy_from_slice(&addr_string.as_bytes()[..sname_len]);

    // file, NUL padded likewise
    let file_len = boot_filename.len().min(127);
    reply[108..108 + file_len].copy_from_slice(&boot_filename.as_bytes()[..file_len]);

    push_option(
        &mut reply,
        OPTION_DHCP_MESSAGE_TYPE,
        &[DhcpMessageType::Ack.as_u8()],
    );
    push_option(&mut reply, OPTION_VENDOR_CLASS_ID, b"PXEClient");
    push_option(&mut reply, OPTION_SERVER_IDENTIFIER, &iface_addr.octets());
    push_option(&mut reply, OPTION_TFTP_SERVER_NAME, addr_string.as_bytes());
    push_option(&mut reply, OPTION_BOOTFILE_NAME, boot_filename.as_bytes());

    let mut vendor = Vec::new();
    push_option(&mut vendor, PXE_DISCOVERY_CONTROL, &[DISCOVERY_CONTROL]);
    vendor.push(OPTION_END);

    push_option(&mut reply, OPTION_VENDOR_SPECIFIC, &vendor);
    reply.push(OPTION_END);

    pad_reply(reply)
}

/// Create a broadcast-capable UDP socket bound to 0.0.0.0:67.
///
/// Binding INADDR_ANY is required to receive L2 broadcasts; on Linux
/// SO_BINDTODEVICE pins the socket to its interface instead.
fn create_dhcp_socket(iface_name: &str) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("Failed to create socket")?;

    socket.set_reuse_address(true)?;
    // Several interface sockets share port 67; without this only the
    // first bind succeeds.
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;

    bind_to_device(&socket, iface_name)?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT);
    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind to port {}", DHCP_SERVER_PORT))?;

    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into()).context("Failed to register socket with the runtime")
}

#[cfg(target_os = "linux")]
fn bind_to_device(socket: &Socket, iface_name: &str) -> Result<()> {
    use std::os::fd::AsRawFd;

    let result = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            iface_name.as_ptr() as *const libc::c_void,
            iface_name.len() as libc::socklen_t,
        )
    };

    if result != 0 {
        bail!(
            "failed to bind to interface {}: {}",
            iface_name,
            std::io::Error::last_os_error()
        );
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn bind_to_device(_socket: &Socket, _iface_name: &str) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DhcpParser;

    const IFACE: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);

    fn pxe_request(message_type: u8, source: SocketAddrV4) -> DhcpPacket {
        let mut packet = vec![0u8; 300];
        packet[0] = 1;
        packet[1] = 1;
        packet[2] = 6;
        packet[4..8].copy_from_slice(&0xDEADBEEFu32.to_be_bytes());
        packet[28..34].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

        let mut i = 240;
        packet[i] = 53;
        packet[i + 1] = 1;
        packet[i + 2] = message_type;
        i += 3;
        packet[i] = 60;
        packet[i + 1] = 9;
        packet[i + 2..i + 11].copy_from_slice(b"PXEClient");
        i += 11;
        packet[i] = 255;

        DhcpParser::new().parse(&packet, source).unwrap()
    }

    fn option_slice<'a>(reply: &'a [u8], id: u8) -> Option<&'a [u8]> {
        let mut i = 240;
        while i < reply.len() {
            let code = reply[i];
            if code == 0 {
                i += 1;
                continue;
            }
            if code == 255 {
                return None;
            }
            let len = reply[i + 1] as usize;
            if code == id {
                return Some(&reply[i + 2..i + 2 + len]);
            }
            i += 2 + len;
        }
        None
    }

    #[test]
    fn discover_from_unspecified_offers_via_broadcast() {
        let source = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68);
        let request = pxe_request(1, source);

        let (reply, dest) = respond_to(&request, IFACE, "pxeboot.com").unwrap();

        assert_eq!(dest, SocketAddrV4::new(Ipv4Addr::BROADCAST, 68));

        // Fixed header invariants
        assert_eq!(&reply[0..4], &[2, 1, 6, 0]);
        assert_eq!(&reply[4..8], &0xDEADBEEFu32.to_be_bytes());
        assert_eq!(&reply[12..16], &[0, 0, 0, 0]); // ciaddr stays zero
        assert_eq!(&reply[20..24], &[192, 168, 1, 10]); // siaddr
        assert_eq!(&reply[28..34], &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(&reply[236..240], &DHCP_MAGIC_COOKIE);

        assert_eq!(option_slice(&reply, 53), Some(&[2u8][..]));
        assert_eq!(option_slice(&reply, 54), Some(&[192u8, 168, 1, 10][..]));
        assert_eq!(option_slice(&reply, 60), Some(&b"PXEClient"[..]));
        assert_eq!(option_slice(&reply, 67), Some(&b"pxeboot.com"[..]));
        assert_eq!(
            option_slice(&reply, 43),
            Some(
                &[
                    6, 1, 0x0A, // discovery control
                    8, 7, 0x80, 0x00, 1, 192, 168, 1, 10, // boot server list
                    255,
                ][..]
            )
        );
    }

    #[test]
    fn offer_option_order_matches_pxe_expectations() {
        let source = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68);
        let request = pxe_request(1, source);

        let (reply, _) = respond_to(&request, IFACE, "pxeboot.com").unwrap();

        let mut order = Vec::new();
        let mut i = 240;
        while reply[i] != 255 {
            order.push(reply[i]);
            i += 2 + reply[i + 1] as usize;
        }
        assert_eq!(order, vec![53, 54, 60, 67, 43]);
    }

    #[test]
    fn discover_from_known_address_is_unicast() {
        let source = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 42), 68);
        let request = pxe_request(1, source);

        let (_, dest) = respond_to(&request, IFACE, "pxeboot.com").unwrap();
        assert_eq!(dest, SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 42), 68));
    }

    #[test]
    fn request_gets_ack_with_tftp_fields() {
        let source = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 42), 68);
        let request = pxe_request(3, source);

        let (reply, dest) = respond_to(&request, IFACE, "pxeboot.com").unwrap();

        assert_eq!(dest, source);
        assert_eq!(option_slice(&reply, 53), Some(&[5u8][..]));
        assert_eq!(option_slice(&reply, 66), Some(&b"192.168.1.10"[..]));
        assert_eq!(option_slice(&reply, 67), Some(&b"pxeboot.com"[..]));
        assert_eq!(option_slice(&reply, 43), Some(&[6, 1, 0x0A, 255][..]));

        // sname and file are NUL padded copies
        assert_eq!(&reply[44..56], b"192.168.1.10");
        assert_eq!(reply[56], 0);
        assert_eq!(&reply[108..119], b"pxeboot.com");
        assert_eq!(reply[119], 0);
    }

    #[test]
    fn ack_option_order_matches_pxe_expectations() {
        let source = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 42), 68);
        let request = pxe_request(3, source);

        let (reply, _) = respond_to(&request, IFACE, "pxeboot.com").unwrap();

        let mut order = Vec::new();
        let mut i = 240;
        while reply[i] != 255 {
            order.push(reply[i]);
            i += 2 + reply[i + 1] as usize;
        }
        assert_eq!(order, vec![53, 60, 54, 66, 67, 43]);
    }

    #[test]
    fn non_pxe_packet_gets_no_reply() {
        let source = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68);
        let mut request = pxe_request(1, source);
        request.options.remove(&60);

        assert!(respond_to(&request, IFACE, "pxeboot.com").is_none());
    }

    #[test]
    fn unhandled_message_types_get_no_reply() {
        let source = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68);
        for mt in [2u8, 4, 5, 6, 7, 8] {
            let request = pxe_request(mt, source);
            assert!(respond_to(&request, IFACE, "pxeboot.com").is_none());
        }
    }

    #[test]
    fn bootreply_is_ignored() {
        let source = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68);
        let mut request = pxe_request(1, source);
        request.op = 2;

        assert!(respond_to(&request, IFACE, "pxeboot.com").is_none());
    }

    #[test]
    fn replies_are_padded_to_bootp_minimum() {
        let source = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68);
        let request = pxe_request(1, source);

        let (reply, _) = respond_to(&request, IFACE, "pxeboot.com").unwrap();
        assert!(reply.len() >= MIN_REPLY_SIZE);
    }
}
