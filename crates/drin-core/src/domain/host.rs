//! [`HostRecord`]: one desktop host found on the LAN.

use std::net::IpAddr;

use crate::protocol::messages::DiscoveryResponse;

/// A desktop host that answered a discovery broadcast.
///
/// Two records describe the same host when their addresses are equal; the
/// display name and pairing flag are mutable properties of that host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    /// Name shown to the user.  Never empty: defaults to the address text.
    pub display_name: String,
    /// Address the response came from, used for pairing and events.
    pub address: IpAddr,
    /// Whether this host reported the requesting device as paired.
    pub paired: bool,
}

impl HostRecord {
    /// Builds a record, falling back to the address when `display_name` is
    /// missing or blank.
    pub fn new(display_name: Option<String>, address: IpAddr, paired: bool) -> Self {
        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| address.to_string());
        Self {
            display_name,
            address,
            paired,
        }
    }

    /// Builds a record from a parsed discovery response and its source address.
    pub fn from_response(response: &DiscoveryResponse, address: IpAddr) -> Self {
        Self::new(response.host_name.clone(), address, response.paired)
    }

    /// Identity key used for duplicate detection.
    pub fn key(&self) -> IpAddr {
        self.address
    }

    /// Returns `true` if `other` describes the same host.
    pub fn same_host(&self, other: &HostRecord) -> bool {
        self.key() == other.key()
    }

    /// Returns a copy with the pairing flag replaced.
    pub fn with_paired(&self, paired: bool) -> Self {
        Self {
            paired,
            ..self.clone()
        }
    }
}

impl std::fmt::Display for HostRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.address)
    }
}
