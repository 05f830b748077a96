//! IPv4 and IPv6 host addresses as the control protocol renders them.
//!
//! These wrap the standard library address types, adding the textual
//! conventions tor uses: IPv6 addresses appear bracketed when they are
//! part of a `host:port` string, and may carry a `%scope` suffix.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::ParseError;

/// An IPv4 host address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::From, derive_more::Into)]
pub struct HostIpv4(Ipv4Addr);

impl HostIpv4 {
    /// The loopback address, `127.0.0.1`.
    pub const LOCALHOST: HostIpv4 = HostIpv4(Ipv4Addr::LOCALHOST);

    /// The "any" address, `0.0.0.0`.
    pub const ANYHOST: HostIpv4 = HostIpv4(Ipv4Addr::UNSPECIFIED);

    /// Parse `s`, returning `None` on failure.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Return the wrapped [`Ipv4Addr`].
    pub fn addr(&self) -> Ipv4Addr {
        self.0
    }
}

impl FromStr for HostIpv4 {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(HostIpv4)
            .map_err(|_| ParseError::invalid(s, "IPv4 address"))
    }
}

impl fmt::Display for HostIpv4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An IPv6 host address, with an optional `%scope` identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostIpv6 {
    /// The address itself.
    addr: Ipv6Addr,
    /// Scope identifier, without the leading `%`.
    scope: Option<String>,
}

impl HostIpv6 {
    /// The loopback address, `::1`.
    pub const LOCALHOST: HostIpv6 = HostIpv6 {
        addr: Ipv6Addr::LOCALHOST,
        scope: None,
    };

    /// Construct from an [`Ipv6Addr`] with no scope.
    pub fn new(addr: Ipv6Addr) -> Self {
        HostIpv6 { addr, scope: None }
    }

    /// Parse `s`, returning `None` on failure.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Return the wrapped [`Ipv6Addr`].
    pub fn addr(&self) -> Ipv6Addr {
        self.addr
    }

    /// Return the scope identifier, if there is one.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Render in canonical hostname form, bracketed for use in `host:port`.
    pub fn to_host_string(&self) -> String {
        format!("[{}]", self)
    }
}

impl FromStr for HostIpv6 {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(s);
        // Unbalanced brackets are never valid.
        if inner.len() != s.len() && !(s.starts_with('[') && s.ends_with(']')) {
            return Err(ParseError::invalid(s, "IPv6 address"));
        }
        let (addr_part, scope) = match inner.split_once('%') {
            Some((a, sc)) if !sc.is_empty() => (a, Some(sc.to_owned())),
            Some(_) => return Err(ParseError::invalid(s, "IPv6 address")),
            None => (inner, None),
        };
        let addr = addr_part
            .parse::<Ipv6Addr>()
            .map_err(|_| ParseError::invalid(s, "IPv6 address"))?;
        Ok(HostIpv6 { addr, scope })
    }
}

impl fmt::Display for HostIpv6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}%{}", self.addr, scope),
            None => write!(f, "{}", self.addr),
        }
    }
}

impl From<Ipv6Addr> for HostIpv6 {
    fn from(addr: Ipv6Addr) -> Self {
        HostIpv6::new(addr)
    }
}

/// Either kind of IP host address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, derive_more::From)]
#[non_exhaustive]
pub enum HostIp {
    /// An IPv4 address.
    V4(HostIpv4),
    /// An IPv6 address.
    V6(HostIpv6),
}

impl HostIp {
    /// Parse `s` as either address family, returning `None` on failure.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Render in canonical hostname form (IPv6 bracketed).
    pub fn to_host_string(&self) -> String {
        match self {
            HostIp::V4(v4) => v4.to_string(),
            HostIp::V6(v6) => v6.to_host_string(),
        }
    }
}

impl FromStr for HostIp {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(v4) = s.parse::<HostIpv4>() {
            return Ok(HostIp::V4(v4));
        }
        s.parse::<HostIpv6>()
            .map(HostIp::V6)
            .map_err(|_| ParseError::invalid(s, "IP address"))
    }
}

impl fmt::Display for HostIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostIp::V4(v4) => write!(f, "{}", v4),
            HostIp::V6(v6) => write!(f, "{}", v6),
        }
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn v4_ok() {
        let a: HostIpv4 = "127.0.0.1".parse().unwrap();
        assert_eq!(a, HostIpv4::LOCALHOST);
        assert_eq!(a.to_string(), "127.0.0.1");
        assert_eq!("0.0.0.0".parse::<HostIpv4>().unwrap(), HostIpv4::ANYHOST);
    }

    #[test]
    fn v4_bad() {
        assert_matches!("256.0.0.1".parse::<HostIpv4>(), Err(ParseError::Invalid { .. }));
        assert_matches!("::1".parse::<HostIpv4>(), Err(_));
        assert!(HostIpv4::from_str_opt("fred").is_none());
    }

    #[test]
    fn v6_ok() {
        let a: HostIpv6 = "::1".parse().unwrap();
        assert_eq!(a, HostIpv6::LOCALHOST);
        assert_eq!(a.to_string(), "::1");
        assert_eq!(a.to_host_string(), "[::1]");

        let b: HostIpv6 = "[::1]".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn v6_scoped() {
        let a: HostIpv6 = "fe80::1%eth0".parse().unwrap();
        assert_eq!(a.scope(), Some("eth0"));
        assert_eq!(a.to_string(), "fe80::1%eth0");
        assert_eq!(a.to_host_string(), "[fe80::1%eth0]");

        let b: HostIpv6 = "[fe80::1%eth0]".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn v6_bad() {
        assert_matches!("fe80::1%".parse::<HostIpv6>(), Err(_));
        assert_matches!("[::1".parse::<HostIpv6>(), Err(_));
        assert_matches!("127.0.0.1".parse::<HostIpv6>(), Err(_));
    }

    #[test]
    fn either() {
        assert_matches!("127.0.0.1".parse::<HostIp>(), Ok(HostIp::V4(_)));
        assert_matches!("::1".parse::<HostIp>(), Ok(HostIp::V6(_)));
        assert_eq!(
            "::1".parse::<HostIp>().unwrap().to_host_string(),
            "[::1]"
        );
        assert_matches!("onion".parse::<HostIp>(), Err(_));
    }
}
