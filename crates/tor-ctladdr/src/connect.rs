//! Where a control connection should be made.
//!
//! A running tor advertises its control listeners in the control-port
//! file as either `PORT=ip:port` or `UNIX_PORT=/path` lines; this type
//! is the parsed form that the connection layer consumes.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::ParseError;

/// An endpoint a control connection can be opened to.
///
/// ## String representation
///
/// A qualified representation, consisting of a schema ("unix" or "inet"),
/// a single colon, and the address itself: `inet:127.0.0.1:9051`,
/// `inet:[::1]:9051`, `unix:/run/tor/control`.  A bare `net::SocketAddr`
/// string is also accepted when parsing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, derive_more::From)]
#[non_exhaustive]
pub enum ConnectPoint {
    /// A TCP control listener.
    Tcp(SocketAddr),
    /// An AF_UNIX control listener at a path.
    Unix(PathBuf),
}

impl ConnectPoint {
    /// Parse `s`, returning `None` on failure.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Return true if this endpoint can be connected on this host.
    ///
    /// `Unix` endpoints can be represented everywhere but connected only
    /// where AF_UNIX path sockets exist.
    pub fn is_supported(&self) -> bool {
        match self {
            ConnectPoint::Tcp(_) => true,
            ConnectPoint::Unix(_) => cfg!(unix),
        }
    }
}

impl FromStr for ConnectPoint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(|c: char| c.is_ascii_digit() || c == '[') {
            // Looks like a bare inet address; cannot be a qualified form.
            return s
                .parse::<SocketAddr>()
                .map(ConnectPoint::Tcp)
                .map_err(|_| ParseError::invalid(s, "socket address"));
        }
        match s.split_once(':') {
            Some(("unix", path)) if !path.is_empty() => {
                Ok(ConnectPoint::Unix(PathBuf::from(path)))
            }
            Some(("inet", addr)) => addr
                .parse::<SocketAddr>()
                .map(ConnectPoint::Tcp)
                .map_err(|_| ParseError::invalid(s, "socket address")),
            _ => Err(ParseError::invalid(s, "connect point")),
        }
    }
}

impl fmt::Display for ConnectPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectPoint::Tcp(sa) => write!(f, "inet:{}", sa),
            ConnectPoint::Unix(path) => write!(f, "unix:{}", path.display()),
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
    fn tcp_forms() {
        let bare: ConnectPoint = "127.0.0.1:9051".parse().unwrap();
        let qualified: ConnectPoint = "inet:127.0.0.1:9051".parse().unwrap();
        assert_eq!(bare, qualified);
        assert_eq!(qualified.to_string(), "inet:127.0.0.1:9051");

        let v6: ConnectPoint = "[::1]:9051".parse().unwrap();
        assert_eq!(v6.to_string(), "inet:[::1]:9051");
        assert!(v6.is_supported());
    }

    #[test]
    fn unix_forms() {
        let u: ConnectPoint = "unix:/run/tor/control".parse().unwrap();
        assert_matches!(&u, ConnectPoint::Unix(p) if p == &PathBuf::from("/run/tor/control"));
        assert_eq!(u.to_string(), "unix:/run/tor/control");
        assert_eq!(u.is_supported(), cfg!(unix));
    }

    #[test]
    fn parse_errors() {
        assert_matches!("fred".parse::<ConnectPoint>(), Err(_));
        assert_matches!("unix:".parse::<ConnectPoint>(), Err(_));
        assert_matches!("inet:notanaddr".parse::<ConnectPoint>(), Err(_));
        assert_matches!("300.0.0.1:1".parse::<ConnectPoint>(), Err(_));
    }
}
