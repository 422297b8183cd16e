//! IPv4 subnet arithmetic for the director network.

use crate::error::{Error, Result};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR form, normalized to its network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Subnet {
    /// Creates a subnet, masking host bits off `addr`.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 30 {
            return Err(Error::Config(format!(
                "subnet prefix /{} leaves no room for gateway and director",
                prefix
            )));
        }
        let network = Ipv4Addr::from(u32::from(addr) & Self::mask_bits(prefix));
        Ok(Self { network, prefix })
    }

    fn mask_bits(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        }
    }

    /// Network address.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Dotted netmask.
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(Self::mask_bits(self.prefix))
    }

    /// Number of usable host addresses (excludes network and broadcast).
    pub fn host_count(&self) -> u32 {
        (1u32 << (32 - self.prefix)) - 2
    }

    /// The `n`th host address (1-based), or `None` past the last host.
    pub fn nth_host(&self, n: u32) -> Option<Ipv4Addr> {
        if n == 0 || n > self.host_count() {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.network) + n))
    }

    /// Conventional gateway: the first host address.
    pub fn gateway(&self) -> Ipv4Addr {
        // prefix <= 30 guarantees at least two hosts
        Ipv4Addr::from(u32::from(self.network) + 1)
    }

    /// Returns true if `addr` lies inside the subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask_bits(self.prefix) == u32::from(self.network)
    }

    /// `gateway/prefix`, the form Incus expects for `ipv4.address`.
    pub fn gateway_cidr(&self) -> String {
        format!("{}/{}", self.gateway(), self.prefix)
    }
}

impl Default for Ipv4Subnet {
    /// `10.245.0.0/16`, the same network as [`crate::constants::DEFAULT_SUBNET`].
    fn default() -> Self {
        Self {
            network: Ipv4Addr::new(10, 245, 0, 0),
            prefix: 16,
        }
    }
}

impl FromStr for Ipv4Subnet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| Error::Config(format!("subnet '{}' is not in CIDR form", s)))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| Error::Config(format!("subnet '{}': {}", s, e)))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| Error::Config(format!("subnet '{}': {}", s, e)))?;
        if prefix > 32 {
            return Err(Error::Config(format!("subnet '{}': prefix exceeds 32", s)));
        }
        Self::new(addr, prefix)
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
