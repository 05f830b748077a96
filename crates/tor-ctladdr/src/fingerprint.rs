//! Relay identity fingerprints.

use std::fmt;
use std::str::FromStr;

use crate::ParseError;

/// A relay identity fingerprint: 20 bytes, written as 40 hex digits.
///
/// Canonical form is upper-case hex with a leading `$`, the way the
/// control protocol names relays; parsing accepts the bare form too.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    /// Construct from raw identity bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Fingerprint(bytes)
    }

    /// Parse `s`, returning `None` on failure.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Return the identity bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix('$').unwrap_or(s);
        if body.len() != 40 {
            return Err(ParseError::invalid(s, "relay fingerprint"));
        }
        let mut bytes = [0_u8; 20];
        hex::decode_to_slice(body, &mut bytes)
            .map_err(|_| ParseError::invalid(s, "relay fingerprint"))?;
        Ok(Fingerprint(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}
