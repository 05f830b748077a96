//! `ADD_ONION` arguments and results.

use std::fmt;

use tor_ctladdr::{OnionAddrV3, Port};

use crate::err::CmdError;
use crate::reply::Reply;

/// The key argument to `ADD_ONION`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum OnionKey {
    /// Have tor generate a fresh ed25519 key.
    NewV3,
    /// Use an existing ed25519 key, base64-encoded expanded form.
    Ed25519V3(String),
}

impl fmt::Display for OnionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnionKey::NewV3 => write!(f, "NEW:ED25519-V3"),
            OnionKey::Ed25519V3(blob) => write!(f, "ED25519-V3:{}", blob),
        }
    }
}

/// Flags accepted by `ADD_ONION`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum OnionAddFlag {
    /// Do not return the private key in the reply.
    DiscardPk,
    /// Detach the service from this control connection's lifetime.
    Detach,
    /// Allow more than one service with the same target.
    NonAnonymous,
    /// Require client authorization.
    V3Auth,
    /// Limit each rendezvous circuit's streams.
    MaxStreamsCloseCircuit,
}

impl fmt::Display for OnionAddFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OnionAddFlag::DiscardPk => "DiscardPK",
            OnionAddFlag::Detach => "Detach",
            OnionAddFlag::NonAnonymous => "NonAnonymous",
            OnionAddFlag::V3Auth => "V3Auth",
            OnionAddFlag::MaxStreamsCloseCircuit => "MaxStreamsCloseCircuit",
        };
        write!(f, "{}", name)
    }
}

/// The arguments of one `ADD_ONION` command.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct AddOnion {
    /// The service key.
    pub key: OnionKey,
    /// Virtual-port to target mappings; at least one is required.
    pub ports: Vec<(Port, String)>,
    /// Flags.
    pub flags: Vec<OnionAddFlag>,
    /// Per-circuit stream ceiling.
    pub max_streams: Option<u16>,
    /// `x25519` public keys of authorized clients, base64.
    pub client_auth_v3: Vec<String>,
}

impl AddOnion {
    /// Start from a key; add ports before rendering.
    pub fn new(key: OnionKey) -> Self {
        AddOnion {
            key,
            ports: Vec::new(),
            flags: Vec::new(),
            max_streams: None,
            client_auth_v3: Vec::new(),
        }
    }

    /// Map `virt` to `target` (a `host:port` or `unix:` string).
    pub fn port(mut self, virt: Port, target: impl Into<String>) -> Self {
        self.ports.push((virt, target.into()));
        self
    }

    /// Add a flag.
    pub fn flag(mut self, flag: OnionAddFlag) -> Self {
        self.flags.push(flag);
        self
    }
}

/// What `ADD_ONION` returns on success.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct CreatedOnionService {
    /// The service's address.
    pub addr: OnionAddrV3,
    /// The private key, unless `DiscardPK` was set: `ED25519-V3:<blob>`.
    pub key: Option<String>,
}

impl CreatedOnionService {
    /// Interpret an `ADD_ONION` reply.
    pub(crate) fn from_reply(reply: &Reply) -> Result<CreatedOnionService, CmdError> {
        let mut addr = None;
        let mut key = None;
        for (k, v) in reply.kv_pairs() {
            match (k, v) {
                ("ServiceID", Some(v)) => {
                    addr = Some(v.parse::<OnionAddrV3>().map_err(|e| {
                        CmdError::Uninterpretable(format!("bad ServiceID: {e}"))
                    })?);
                }
                ("PrivateKey", Some(v)) => key = Some(v.to_owned()),
                _ => {}
            }
        }
        Ok(CreatedOnionService {
            addr: addr.ok_or_else(|| {
                CmdError::Uninterpretable("ADD_ONION reply without ServiceID".to_owned())
            })?,
            key,
        })
    }
}
