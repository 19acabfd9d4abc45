//! VPN profile data model
//!
//! A profile's identity is the pair `(name, scope)`. The same name may exist
//! once per scope, and those are distinct profiles everywhere in this crate.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Where a VPN profile is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// Per-user phonebook
    User,
    /// System-wide phonebook shared by all users
    AllUsers,
}

impl Scope {
    /// Both scopes, in listing order
    pub const ALL: [Scope; 2] = [Scope::User, Scope::AllUsers];

    /// Build a scope from the "all users" flag used by the OS tooling
    pub fn from_all_users(all_users: bool) -> Self {
        if all_users {
            Scope::AllUsers
        } else {
            Scope::User
        }
    }

    pub fn is_all_users(self) -> bool {
        self == Scope::AllUsers
    }

    /// Short label for tables
    pub fn label(self) -> &'static str {
        match self {
            Scope::User => "User",
            Scope::AllUsers => "System",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::User => write!(f, "User"),
            Scope::AllUsers => write!(f, "AllUsers"),
        }
    }
}

/// VPN tunnel protocol
///
/// Values the OS reports that this crate does not know are kept verbatim in
/// `Other`, so listing never fails on newer OS versions. `Other` is never
/// accepted for create/update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TunnelType {
    #[default]
    Automatic,
    Pptp,
    L2tp,
    Sstp,
    Ikev2,
    Other(String),
}

impl TunnelType {
    /// Tunnel types that may be used when creating or updating a profile
    pub const SUPPORTED: [TunnelType; 5] = [
        TunnelType::Automatic,
        TunnelType::Pptp,
        TunnelType::L2tp,
        TunnelType::Sstp,
        TunnelType::Ikev2,
    ];

    pub fn is_supported(&self) -> bool {
        !matches!(self, TunnelType::Other(_))
    }

    /// Name as accepted by the `-TunnelType` cmdlet parameter
    pub fn as_str(&self) -> &str {
        match self {
            TunnelType::Automatic => "Automatic",
            TunnelType::Pptp => "Pptp",
            TunnelType::L2tp => "L2tp",
            TunnelType::Sstp => "Sstp",
            TunnelType::Ikev2 => "Ikev2",
            TunnelType::Other(raw) => raw,
        }
    }
}

impl FromStr for TunnelType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "automatic" => TunnelType::Automatic,
            "pptp" => TunnelType::Pptp,
            "l2tp" => TunnelType::L2tp,
            "sstp" => TunnelType::Sstp,
            "ikev2" => TunnelType::Ikev2,
            _ => TunnelType::Other(trimmed.to_string()),
        })
    }
}

impl fmt::Display for TunnelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live connection state as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Connecting,
    Disconnecting,
    #[default]
    Unknown,
}

impl ConnectionStatus {
    /// Parse the OS status text. Anything unrecognized is `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "connected" => ConnectionStatus::Connected,
            "disconnected" => ConnectionStatus::Disconnected,
            "connecting" => ConnectionStatus::Connecting,
            "disconnecting" => ConnectionStatus::Disconnecting,
            _ => ConnectionStatus::Unknown,
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Disconnecting => "Disconnecting",
            ConnectionStatus::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// Composite identity of a profile
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileKey {
    pub name: String,
    pub scope: Scope,
}

impl ProfileKey {
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope,
        }
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.scope.label())
    }
}

/// Point-in-time snapshot of one OS VPN profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnProfile {
    pub name: String,
    pub scope: Scope,
    pub server_address: String,
    pub tunnel_type: TunnelType,
    /// Reported only; not settable through this crate
    pub authentication_method: String,
    pub connection_status: ConnectionStatus,
}

impl VpnProfile {
    pub fn key(&self) -> ProfileKey {
        ProfileKey::new(self.name.clone(), self.scope)
    }

    /// Does this profile match a case-insensitive search on name or server?
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&query)
            || self.server_address.to_lowercase().contains(&query)
    }
}

/// Listing order: scope first, then name case-insensitively. Exact name breaks
/// ties so the order is total.
pub fn listing_order(a: &VpnProfile, b: &VpnProfile) -> Ordering {
    a.scope
        .cmp(&b.scope)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Sort profiles into the repository's deterministic listing order
pub fn sort_profiles(profiles: &mut [VpnProfile]) {
    profiles.sort_by(listing_order);
}

/// Search filter used by table views
pub fn filter_profiles<'a>(profiles: &'a [VpnProfile], query: &str) -> Vec<&'a VpnProfile> {
    profiles.iter().filter(|p| p.matches(query)).collect()
}

/// Mutable fields of a profile, as supplied for create/update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub name: String,
    pub server_address: String,
    #[serde(default)]
    pub tunnel_type: TunnelType,
}

impl ProfileSpec {
    pub fn new(name: impl Into<String>, server_address: impl Into<String>, tunnel_type: TunnelType) -> Self {
        Self {
            name: name.into(),
            server_address: server_address.into(),
            tunnel_type,
        }
    }
}
