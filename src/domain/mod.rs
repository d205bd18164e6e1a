//! Domain models for the PXE boot helper.
//!
//! This module contains the core DHCP types that are independent
//! of any socket or server concerns.

mod dhcp;

pub use dhcp::{option_name, DhcpMessageType, DhcpPacket, DHCP_FIXED_SIZE, DHCP_MAGIC_COOKIE};
