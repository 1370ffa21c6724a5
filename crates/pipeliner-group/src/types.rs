//! Network primitives
//!
//! Small value types used throughout group descriptions:
//! - [`DeviceId`] and [`AppId`] identify the switch and the requesting application
//! - [`NextId`] identifies a next objective and the chain handle stored for it
//! - [`VlanId`], [`PortNumber`], [`MacAddress`], [`MplsLabel`] carry packet framing
//! - [`IpPrefix`] carries the optional multicast hint of broadcast objectives

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Errors raised when building model values from raw input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// VLAN id outside 0..=4095
    #[error("invalid vlan id: {0}")]
    InvalidVlan(u16),

    /// MPLS label wider than 20 bits
    #[error("invalid mpls label: {0}")]
    InvalidMplsLabel(u32),

    /// Unparseable MAC address
    #[error("invalid mac address: {0}")]
    InvalidMac(String),

    /// Unparseable IPv4 prefix
    #[error("invalid ip prefix: {0}")]
    InvalidPrefix(String),
}

/// Switch identifier, e.g. `of:0000000000000001`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create device id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the textual id
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Application identifier attached to every group request
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppId(String);

impl AppId {
    /// Create application id
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the application name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Next objective identifier, unique per device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NextId(u32);

impl NextId {
    /// Create next id
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get raw id
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "next-{}", self.0)
    }
}

/// 802.1Q VLAN id (12 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VlanId(u16);

impl VlanId {
    /// Largest valid VLAN id
    pub const MAX: u16 = 4095;

    /// Create VLAN id
    ///
    /// # Errors
    /// Returns `ModelError::InvalidVlan` if `vid` does not fit in 12 bits
    #[inline]
    pub fn new(vid: u16) -> Result<Self, ModelError> {
        if vid > Self::MAX {
            return Err(ModelError::InvalidVlan(vid));
        }
        Ok(Self(vid))
    }

    /// Get raw VLAN id
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Switch port number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortNumber(u64);

impl PortNumber {
    /// Create port number
    #[inline]
    #[must_use]
    pub const fn new(port: u64) -> Self {
        Self(port)
    }

    /// Get raw port number
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 48-bit Ethernet address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// All-zero address
    pub const ZERO: Self = Self([0; 6]);

    /// Create from octets
    #[inline]
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Get octets
    #[inline]
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| ModelError::InvalidMac(s.to_string()))?;
            *octet =
                u8::from_str_radix(part, 16).map_err(|_| ModelError::InvalidMac(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ModelError::InvalidMac(s.to_string()));
        }
        Ok(Self(octets))
    }
}

/// 20-bit MPLS label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MplsLabel(u32);

impl MplsLabel {
    /// Largest valid label
    pub const MAX: u32 = 0x000f_ffff;

    /// Create MPLS label
    ///
    /// # Errors
    /// Returns `ModelError::InvalidMplsLabel` if `label` exceeds 20 bits
    #[inline]
    pub fn new(label: u32) -> Result<Self, ModelError> {
        if label > Self::MAX {
            return Err(ModelError::InvalidMplsLabel(label));
        }
        Ok(Self(label))
    }

    /// Get raw label
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// IPv4 prefix, used as the multicast destination hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpPrefix {
    addr: Ipv4Addr,
    len: u8,
}

impl IpPrefix {
    /// Create prefix
    ///
    /// # Errors
    /// Returns `ModelError::InvalidPrefix` if `len` exceeds 32
    pub fn new(addr: Ipv4Addr, len: u8) -> Result<Self, ModelError> {
        if len > 32 {
            return Err(ModelError::InvalidPrefix(format!("{addr}/{len}")));
        }
        Ok(Self { addr, len })
    }

    /// Host prefix (/32)
    #[inline]
    #[must_use]
    pub fn host(addr: Ipv4Addr) -> Self {
        Self { addr, len: 32 }
    }

    /// Network address
    #[inline]
    #[must_use]
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// Prefix length
    #[inline]
    #[must_use]
    pub fn len(&self) -> u8 {
        self.len
    }

    /// True when the whole prefix lies in 224.0.0.0/4
    #[inline]
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.len >= 4 && self.addr.is_multicast()
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for IpPrefix {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ModelError::InvalidPrefix(s.to_string());
        match s.split_once('/') {
            Some((addr, len)) => {
                let addr = addr.parse().map_err(|_| invalid())?;
                let len = len.parse().map_err(|_| invalid())?;
                Self::new(addr, len)
            }
            None => s.parse().map(Self::host).map_err(|_| invalid()),
        }
    }
}
