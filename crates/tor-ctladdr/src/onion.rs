//! Version-3 onion service addresses.
//!
//! A v3 address is the base32 encoding of
//! `PUBKEY(32) | CHECKSUM(2) | VERSION(1)`, where
//! `CHECKSUM = SHA3-256(".onion checksum" | PUBKEY | VERSION)[..2]`.
//! See rend-spec-v3 §6 for the derivation.

use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32_NOPAD;
use sha3::{Digest, Sha3_256};

use crate::ParseError;

/// Number of base32 characters in a v3 onion address.
const V3_ADDR_LEN: usize = 56;

/// The version byte for v3 addresses.
const V3_VERSION: u8 = 3;

/// Prefix fed to the checksum hash.
const CHECKSUM_PREFIX: &[u8] = b".onion checksum";

/// A v3 onion service address.
///
/// Canonical form is the 56 lowercase base32 characters without the
/// `.onion` suffix; parsing accepts the suffix and mixed case.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OnionAddrV3 {
    /// The ed25519 public key encoded in the address.
    pubkey: [u8; 32],
}

impl OnionAddrV3 {
    /// Construct an address from a service's ed25519 public key.
    pub fn from_pubkey(pubkey: [u8; 32]) -> Self {
        OnionAddrV3 { pubkey }
    }

    /// Parse `s`, returning `None` on failure.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Return the encoded public key.
    pub fn pubkey(&self) -> &[u8; 32] {
        &self.pubkey
    }

    /// Render with the `.onion` suffix, as used in hostnames.
    pub fn to_onion_string(&self) -> String {
        format!("{}.onion", self)
    }

    /// Compute the two checksum bytes for `pubkey`.
    fn checksum(pubkey: &[u8; 32]) -> [u8; 2] {
        let mut h = Sha3_256::new();
        h.update(CHECKSUM_PREFIX);
        h.update(pubkey);
        h.update([V3_VERSION]);
        let digest = h.finalize();
        [digest[0], digest[1]]
    }
}

impl FromStr for OnionAddrV3 {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_suffix(".onion")
            .or_else(|| s.strip_suffix(".ONION"))
            .unwrap_or(s);
        if body.len() != V3_ADDR_LEN {
            return Err(ParseError::invalid(s, "v3 onion address"));
        }
        let upper = body.to_ascii_uppercase();
        let decoded = BASE32_NOPAD
            .decode(upper.as_bytes())
            .map_err(|_| ParseError::invalid(s, "v3 onion address"))?;
        if decoded.len() != 35 || decoded[34] != V3_VERSION {
            return Err(ParseError::invalid(s, "v3 onion address"));
        }
        let mut pubkey = [0_u8; 32];
        pubkey.copy_from_slice(&decoded[..32]);
        if Self::checksum(&pubkey) != decoded[32..34] {
            return Err(ParseError::invalid(s, "v3 onion address"));
        }
        Ok(OnionAddrV3 { pubkey })
    }
}

impl fmt::Display for OnionAddrV3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = [0_u8; 35];
        bytes[..32].copy_from_slice(&self.pubkey);
        bytes[32..34].copy_from_slice(&Self::checksum(&self.pubkey));
        bytes[34] = V3_VERSION;
        write!(f, "{}", BASE32_NOPAD.encode(&bytes).to_ascii_lowercase())
    }
}

impl fmt::Debug for OnionAddrV3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionAddrV3({})", self)
    }
}
