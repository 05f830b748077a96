//! Port types with the ranges the controller cares about.

use std::fmt;
use std::num::NonZeroU16;
use std::str::FromStr;

use crate::ParseError;

/// Any usable TCP port, `1..=65535`.
///
/// Port `0` is not a `Port`: where tor accepts `0` or `auto` as a port
/// *argument*, the config layer models that separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port(NonZeroU16);

impl Port {
    /// Smallest valid port.
    pub const MIN: u16 = 1;
    /// Largest valid port.
    pub const MAX: u16 = 65535;

    /// Construct from a raw value, if nonzero.
    pub fn new(value: u16) -> Option<Self> {
        NonZeroU16::new(value).map(Port)
    }

    /// Parse `s`, returning `None` on failure.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Return the port number.
    pub fn get(self) -> u16 {
        self.0.get()
    }
}

impl FromStr for Port {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u16 = s
            .parse()
            .map_err(|_| ParseError::invalid(s, "port"))?;
        Port::new(value).ok_or(ParseError::OutOfRange {
            input: s.into(),
            expecting: "port",
            low: Port::MIN,
            high: Port::MAX,
        })
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Port> for u16 {
    fn from(p: Port) -> u16 {
        p.get()
    }
}

/// A non-privileged port usable for proxy listeners, `1024..=65535`.
///
/// This is the range the port prober iterates when it reassigns an
/// unavailable listener, wrapping from [`ProxyPort::MAX`] back to
/// [`ProxyPort::MIN`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyPort(u16);

impl ProxyPort {
    /// Smallest non-privileged port.
    pub const MIN: u16 = 1024;
    /// Largest port.
    pub const MAX: u16 = 65535;

    /// Construct from a raw value, if within range.
    pub fn new(value: u16) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(ProxyPort(value))
    }

    /// Parse `s`, returning `None` on failure.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Return the port number.
    pub fn get(self) -> u16 {
        self.0
    }

    /// Return this port as a general [`Port`].
    pub fn port(self) -> Port {
        // Range excludes zero.
        #[allow(clippy::unwrap_used)]
        Port::new(self.0).unwrap()
    }

    /// Return the next port in the probing order, wrapping at the top of
    /// the range.
    pub fn wrapping_next(self) -> ProxyPort {
        if self.0 == Self::MAX {
            ProxyPort(Self::MIN)
        } else {
            ProxyPort(self.0 + 1)
        }
    }
}

impl FromStr for ProxyPort {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u16 = s
            .parse()
            .map_err(|_| ParseError::invalid(s, "proxy port"))?;
        ProxyPort::new(value).ok_or(ParseError::OutOfRange {
            input: s.into(),
            expecting: "proxy port",
            low: Self::MIN,
            high: Self::MAX,
        })
    }
}

impl fmt::Display for ProxyPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ProxyPort> for u16 {
    fn from(p: ProxyPort) -> u16 {
        p.0
    }
}

/// An iterator over proxy ports in probing order, wrapping at the top of
/// the range and visiting each port at most once.
#[derive(Clone, Debug)]
pub struct PortRange {
    /// Next port to yield.
    next: ProxyPort,
    /// How many more ports to yield.
    remaining: usize,
}

impl PortRange {
    /// Largest permitted probe count.
    pub const LIMIT_MAX: usize = 1000;

    /// Return an iterator yielding `limit` distinct ports starting at
    /// `start`, or `None` if `limit` is outside `1..=1000`.
    pub fn new(start: ProxyPort, limit: usize) -> Option<Self> {
        (1..=Self::LIMIT_MAX)
            .contains(&limit)
            .then_some(PortRange {
                next: start,
                remaining: limit,
            })
    }
}

impl Iterator for PortRange {
    type Item = ProxyPort;

    fn next(&mut self) -> Option<ProxyPort> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next;
        self.next = current.wrapping_next();
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
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
    use std::collections::HashSet;

    #[test]
    fn port_bounds() {
        assert!(Port::new(0).is_none());
        assert_eq!(Port::new(1).unwrap().get(), 1);
        assert_eq!(Port::new(65535).unwrap().get(), 65535);
        assert_matches!("0".parse::<Port>(), Err(ParseError::OutOfRange { .. }));
        assert_matches!("65536".parse::<Port>(), Err(ParseError::Invalid { .. }));
        assert_eq!("9050".parse::<Port>().unwrap().to_string(), "9050");
    }

    #[test]
    fn proxy_port_bounds() {
        assert!(ProxyPort::new(1023).is_none());
        assert!(ProxyPort::new(1024).is_some());
        assert!(ProxyPort::new(65535).is_some());
        assert_matches!(
            "80".parse::<ProxyPort>(),
            Err(ParseError::OutOfRange { low: 1024, .. })
        );
    }

    #[test]
    fn wrapping_successor() {
        let p = ProxyPort::new(65535).unwrap();
        assert_eq!(p.wrapping_next().get(), 1024);
        let q = ProxyPort::new(9050).unwrap();
        assert_eq!(q.wrapping_next().get(), 9051);
    }

    #[test]
    fn range_visits_distinct_ports_and_wraps() {
        // For any start p and limit L in [1,1000], the
        // iterator visits exactly L distinct ports, wrapping MAX -> MIN.
        let start = ProxyPort::new(65530).unwrap();
        let visited: Vec<u16> = PortRange::new(start, 10)
            .unwrap()
            .map(ProxyPort::get)
            .collect();
        assert_eq!(
            visited,
            vec![65530, 65531, 65532, 65533, 65534, 65535, 1024, 1025, 1026, 1027]
        );
        let distinct: HashSet<u16> = visited.into_iter().collect();
        assert_eq!(distinct.len(), 10);
    }

    #[test]
    fn range_limit_bounds() {
        let start = ProxyPort::new(1024).unwrap();
        assert!(PortRange::new(start, 0).is_none());
        assert!(PortRange::new(start, 1001).is_none());
        assert_eq!(PortRange::new(start, 1000).unwrap().count(), 1000);
        assert_eq!(PortRange::new(start, 1).unwrap().count(), 1);
    }
}
