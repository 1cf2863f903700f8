//! Device role classification.
//!
//! The desktop display runs in a browser on the same machine as the relay, so
//! it reaches the relay over loopback.  The mobile device reaches it over the
//! LAN.  That difference is what classifies a connection:
//!
//! | Source                          | Origin   |
//! |---------------------------------|----------|
//! | `127.0.0.0/8`, `::1`, unknown   | `Local`  |
//! | any other address               | `Remote` |
//!
//! A client may override the address rule with an explicit `device` hint.

use std::net::IpAddr;

/// Whether a connection comes from the desktop host or from another device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Same host as the relay (the desktop display).
    Local,
    /// Another host on the network (the mobile device).
    Remote,
}

impl Origin {
    /// Classifies a connection from its client address and optional hint.
    ///
    /// `client_ip` is `None` when the address could not be determined; such
    /// connections are treated as local, matching the loopback case.
    pub fn classify(client_ip: Option<IpAddr>, hint: Option<&str>) -> Self {
        if let Some(origin) = hint.and_then(Self::from_hint) {
            return origin;
        }
        match client_ip {
            Some(ip) if !is_loopback(ip) => Origin::Remote,
            _ => Origin::Local,
        }
    }

    /// Maps a `device` query value to an origin; unknown values are ignored.
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.to_ascii_lowercase().as_str() {
            "pc" | "desktop" => Some(Origin::Local),
            "mobile" | "phone" => Some(Origin::Remote),
            _ => None,
        }
    }

    pub fn is_remote(self) -> bool {
        self == Origin::Remote
    }

    /// Human label used in log lines.
    pub fn label(self) -> &'static str {
        match self {
            Origin::Local => "PC (local)",
            Origin::Remote => "Mobile (remote)",
        }
    }
}

/// Extracts the client address, preferring the first `X-Forwarded-For` entry.
///
/// Returns `None` only when neither source yields a parseable address.
pub fn client_ip(forwarded_for: Option<&str>, peer: Option<IpAddr>) -> Option<IpAddr> {
    forwarded_for
        .and_then(|xff| xff.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or(peer)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        // `::ffff:127.0.0.1` arrives on dual-stack listeners.
        IpAddr::V6(v6) => v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback()),
    }
}
