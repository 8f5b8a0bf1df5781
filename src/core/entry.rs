use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use serde::Serialize;

use crate::error::BlockdError;

/// Sentinel expiry meaning the entry never expires.
pub const EXPIRES_NEVER: i64 = -1;

/// Default host scope for entries added without one. `*` means all hosts.
pub const DEFAULT_HOST: &str = "*";

/// Which of the two registries an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Allow,
    Block,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Allow => "allow",
            ListKind::Block => "block",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListKind {
    type Err = BlockdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(ListKind::Allow),
            "block" => Ok(ListKind::Block),
            other => Err(BlockdError::Filter(format!("unknown list type: {other}"))),
        }
    }
}

/// A single allow- or block-list entry.
///
/// Immutable once constructed; a change is a remove followed by an add.
/// The parsed network is computed once at construction and never recomputed.
#[derive(Debug, Clone, Serialize)]
pub struct IpEntry {
    /// Original IP or CIDR text as supplied by the caller.
    pub ip: String,
    /// Parsed network, derived from `ip`. Bare addresses are promoted
    /// to a /32 or /128 host network.
    #[serde(skip)]
    pub network: IpNet,
    /// Why the entry exists.
    pub reason: String,
    /// Host scope the entry applies to. `*` means all hosts.
    pub host: String,
    /// Unix timestamp when the entry was created.
    pub timestamp: i64,
    /// Absolute Unix expiry time, or [`EXPIRES_NEVER`].
    pub expires: i64,
}

impl IpEntry {
    /// Parse and build an entry. Fails with `InvalidAddress` when the text
    /// is neither a CIDR range nor a plain IP address.
    pub fn new(
        ip: &str,
        reason: &str,
        host: &str,
        timestamp: i64,
        expires: i64,
    ) -> Result<Self, BlockdError> {
        let network = parse_network(ip)?;
        Ok(Self {
            ip: ip.to_string(),
            network,
            reason: reason.to_string(),
            host: host.to_string(),
            timestamp,
            expires,
        })
    }

    /// Two entries overlap when one network is a subset of, equal to, or a
    /// superset of the other.
    pub fn overlaps(&self, other: &IpEntry) -> bool {
        self.network.contains(&other.network) || other.network.contains(&self.network)
    }

    /// Whether this entry covers a single address.
    pub fn contains_addr(&self, addr: &IpAddr) -> bool {
        self.network.contains(addr)
    }

    /// Whether the entry has expired as of `now`. Entries with the
    /// never-expires sentinel are never expired.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires != EXPIRES_NEVER && self.expires < now
    }
}

impl fmt::Display for IpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.network)
    }
}

/// Parse an IP or CIDR string into a network.
pub fn parse_network(ip: &str) -> Result<IpNet, BlockdError> {
    if let Ok(net) = ip.parse::<IpNet>() {
        return Ok(net);
    }
    if let Ok(addr) = ip.parse::<IpAddr>() {
        // ipnet rejects only out-of-range prefixes; the full-length
        // prefix for the address family is always valid.
        return Ok(IpNet::new(addr, single_host_prefix(&addr))
            .map_err(|e| BlockdError::InvalidAddress(format!("{ip}: {e}")))?);
    }
    Err(BlockdError::InvalidAddress(ip.to_string()))
}

fn single_host_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ip: &str) -> IpEntry {
        IpEntry::new(ip, "test", DEFAULT_HOST, 0, EXPIRES_NEVER).unwrap()
    }

    #[test]
    fn parses_cidr_and_bare_addresses() {
        assert_eq!(entry("10.0.0.0/8").network.prefix_len(), 8);
        assert_eq!(entry("192.168.1.4").network.prefix_len(), 32);
        assert_eq!(entry("::1").network.prefix_len(), 128);
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(matches!(
            IpEntry::new("not-an-ip", "x", "*", 0, EXPIRES_NEVER),
            Err(BlockdError::InvalidAddress(_))
        ));
        assert!(matches!(
            IpEntry::new("10.0.0.0/99", "x", "*", 0, EXPIRES_NEVER),
            Err(BlockdError::InvalidAddress(_))
        ));
    }

    #[test]
    fn overlap_is_subset_equal_or_superset() {
        let wide = entry("10.0.0.0/8");
        let narrow = entry("10.1.2.0/24");
        let host = entry("10.1.2.3");
        let other = entry("192.168.0.0/16");

        assert!(wide.overlaps(&narrow));
        assert!(narrow.overlaps(&wide));
        assert!(narrow.overlaps(&host));
        assert!(wide.overlaps(&wide.clone()));
        assert!(!wide.overlaps(&other));
    }

    #[test]
    fn overlap_never_crosses_address_families() {
        let v4 = entry("0.0.0.0/0");
        let v6 = entry("::/0");
        assert!(!v4.overlaps(&v6));
    }

    #[test]
    fn expiry_honours_never_sentinel() {
        let mut e = entry("10.0.0.1");
        e.expires = 100;
        assert!(e.is_expired(101));
        assert!(!e.is_expired(99));

        e.expires = EXPIRES_NEVER;
        assert!(!e.is_expired(i64::MAX));
    }
}
