//! The command catalogue: wire rendering and reply interpretation.

use std::fmt;

use tor_ctladdr::{Fingerprint, OnionAddrV3};
use tor_ctlconf::{RenderMode, Setting, TorConfig, TorOption};

use crate::err::{CmdError, ProtocolError};
use crate::event::TorEventKind;
use crate::onion::{AddOnion, CreatedOnionService};
use crate::reply::Reply;
use crate::signal::TorSignal;

/// Credentials for `AUTHENTICATE`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthToken {
    /// No credentials (tor configured with neither cookie nor password).
    None,
    /// The bytes of the cookie file, sent hex-encoded.
    Cookie(Vec<u8>),
    /// A password matching `HashedControlPassword`, sent quoted.
    Password(String),
}

/// A control-protocol command.
///
/// Each variant renders its own wire form and interprets its own reply.
/// The *privileged* commands are the ones that may alter the connection
/// or daemon lifecycle: authentication, ownership changes, and the stop
/// signals.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum TorCmd {
    /// `AUTHENTICATE`.
    Authenticate {
        /// The credentials to present.
        token: AuthToken,
    },
    /// `DROPGUARDS`.
    DropGuards,
    /// `DROPOWNERSHIP`.
    DropOwnership,
    /// `GETCONF`.
    GetConf {
        /// Keywords to query.
        options: Vec<TorOption>,
    },
    /// `GETINFO`.
    GetInfo {
        /// Info keys to query, e.g. `version`.
        keys: Vec<String>,
    },
    /// `HSFETCH`.
    HsFetch {
        /// The service whose descriptor to fetch.
        addr: OnionAddrV3,
        /// Optional directory servers to fetch from.
        servers: Vec<Fingerprint>,
    },
    /// `+LOADCONF` with the config's torrc text as the data block.
    LoadConf {
        /// The configuration to load.
        config: TorConfig,
    },
    /// `ADD_ONION`.
    OnionAdd(AddOnion),
    /// `ONION_CLIENT_AUTH_ADD`.
    OnionClientAuthAdd {
        /// The service the credential is for.
        addr: OnionAddrV3,
        /// The client's x25519 private key, base64.
        key: String,
        /// Optional client nickname.
        client_name: Option<String>,
        /// Store the credential on disk.
        permanent: bool,
    },
    /// `ONION_CLIENT_AUTH_REMOVE`.
    OnionClientAuthRemove {
        /// The service whose credential to remove.
        addr: OnionAddrV3,
    },
    /// `ONION_CLIENT_AUTH_VIEW`.
    OnionClientAuthView {
        /// Restrict to one service, or view all.
        addr: Option<OnionAddrV3>,
    },
    /// `DEL_ONION`.
    OnionDel {
        /// The service to remove.
        addr: OnionAddrV3,
    },
    /// `RESETCONF`.
    ResetConf {
        /// Keywords to reset to their defaults.
        options: Vec<TorOption>,
    },
    /// `SAVECONF`.
    SaveConf {
        /// Overwrite a torrc controlled by `%include`.
        force: bool,
    },
    /// `SETCONF`.
    SetConf {
        /// The settings to apply.
        settings: Vec<Setting>,
    },
    /// `SETEVENTS`.
    SetEvents {
        /// The kinds to subscribe; empty clears all subscriptions.
        kinds: Vec<TorEventKind>,
    },
    /// `SIGNAL`.
    Signal(TorSignal),
    /// `TAKEOWNERSHIP`.
    TakeOwnership,
}

/// The typed success value of a command.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CmdOutput {
    /// Plain success (`250 OK`).
    Ok,
    /// Key/value lines (`GETCONF`, `GETINFO`, `ONION_CLIENT_AUTH_VIEW`).
    KeyValues(Vec<(String, Option<String>)>),
    /// A created onion service (`ADD_ONION`).
    OnionService(CreatedOnionService),
}

impl TorCmd {
    /// The command keyword, used for display and interceptor matching.
    pub fn keyword(&self) -> &'static str {
        match self {
            TorCmd::Authenticate { .. } => "AUTHENTICATE",
            TorCmd::DropGuards => "DROPGUARDS",
            TorCmd::DropOwnership => "DROPOWNERSHIP",
            TorCmd::GetConf { .. } => "GETCONF",
            TorCmd::GetInfo { .. } => "GETINFO",
            TorCmd::HsFetch { .. } => "HSFETCH",
            TorCmd::LoadConf { .. } => "LOADCONF",
            TorCmd::OnionAdd(_) => "ADD_ONION",
            TorCmd::OnionClientAuthAdd { .. } => "ONION_CLIENT_AUTH_ADD",
            TorCmd::OnionClientAuthRemove { .. } => "ONION_CLIENT_AUTH_REMOVE",
            TorCmd::OnionClientAuthView { .. } => "ONION_CLIENT_AUTH_VIEW",
            TorCmd::OnionDel { .. } => "DEL_ONION",
            TorCmd::ResetConf { .. } => "RESETCONF",
            TorCmd::SaveConf { .. } => "SAVECONF",
            TorCmd::SetConf { .. } => "SETCONF",
            TorCmd::SetEvents { .. } => "SETEVENTS",
            TorCmd::Signal(_) => "SIGNAL",
            TorCmd::TakeOwnership => "TAKEOWNERSHIP",
        }
    }

    /// True for commands that may alter connection or daemon lifecycle.
    pub fn is_privileged(&self) -> bool {
        match self {
            TorCmd::Authenticate { .. } | TorCmd::TakeOwnership | TorCmd::DropOwnership => true,
            TorCmd::Signal(sig) => sig.is_stop(),
            _ => false,
        }
    }

    /// True for the stop signals, which cancel everything queued behind
    /// them.
    pub fn is_stop_signal(&self) -> bool {
        matches!(self, TorCmd::Signal(sig) if sig.is_stop())
    }

    /// Render the complete wire form, including terminating CRLF(s).
    pub fn render(&self) -> Result<String, CmdError> {
        let line = match self {
            TorCmd::Authenticate { token } => match token {
                AuthToken::None => "AUTHENTICATE".to_owned(),
                AuthToken::Cookie(bytes) => format!("AUTHENTICATE {}", hex::encode(bytes)),
                AuthToken::Password(pw) => format!("AUTHENTICATE {}", quote(pw)),
            },
            TorCmd::DropGuards => "DROPGUARDS".to_owned(),
            TorCmd::DropOwnership => "DROPOWNERSHIP".to_owned(),
            TorCmd::GetConf { options } => {
                let mut line = "GETCONF".to_owned();
                for opt in options {
                    line.push(' ');
                    line.push_str(opt.name());
                }
                line
            }
            TorCmd::GetInfo { keys } => {
                let mut line = "GETINFO".to_owned();
                for key in keys {
                    line.push(' ');
                    line.push_str(key);
                }
                line
            }
            TorCmd::HsFetch { addr, servers } => {
                let mut line = format!("HSFETCH {}", addr);
                for server in servers {
                    line.push_str(&format!(" SERVER={}", server));
                }
                line
            }
            TorCmd::LoadConf { config } => {
                return Ok(render_loadconf(config));
            }
            TorCmd::OnionAdd(add) => render_add_onion(add)?,
            TorCmd::OnionClientAuthAdd {
                addr,
                key,
                client_name,
                permanent,
            } => {
                let mut line = format!("ONION_CLIENT_AUTH_ADD {} x25519:{}", addr, key);
                if let Some(name) = client_name {
                    line.push_str(&format!(" ClientName={}", name));
                }
                if *permanent {
                    line.push_str(" Flags=Permanent");
                }
                line
            }
            TorCmd::OnionClientAuthRemove { addr } => {
                format!("ONION_CLIENT_AUTH_REMOVE {}", addr)
            }
            TorCmd::OnionClientAuthView { addr } => match addr {
                Some(addr) => format!("ONION_CLIENT_AUTH_VIEW {}", addr),
                None => "ONION_CLIENT_AUTH_VIEW".to_owned(),
            },
            TorCmd::OnionDel { addr } => format!("DEL_ONION {}", addr),
            TorCmd::ResetConf { options } => {
                for opt in options {
                    if opt.is_startup_only() {
                        return Err(tor_ctlconf::ConfigError::StartupOnly { option: *opt }.into());
                    }
                }
                let mut line = "RESETCONF".to_owned();
                for opt in options {
                    line.push(' ');
                    line.push_str(opt.name());
                }
                line
            }
            TorCmd::SaveConf { force } => {
                if *force {
                    "SAVECONF FORCE".to_owned()
                } else {
                    "SAVECONF".to_owned()
                }
            }
            TorCmd::SetConf { settings } => {
                let mut line = "SETCONF".to_owned();
                for setting in settings {
                    setting.check_runtime_settable()?;
                    line.push(' ');
                    line.push_str(&setting.render(RenderMode::ControlWire));
                }
                line
            }
            TorCmd::SetEvents { kinds } => {
                let mut line = "SETEVENTS".to_owned();
                for kind in kinds {
                    line.push(' ');
                    line.push_str(kind.name());
                }
                line
            }
            TorCmd::Signal(sig) => format!("SIGNAL {}", sig),
            TorCmd::TakeOwnership => "TAKEOWNERSHIP".to_owned(),
        };
        Ok(format!("{line}\r\n"))
    }

    /// Interpret `reply` as this command's success value.
    pub fn interpret(&self, reply: Reply) -> Result<CmdOutput, CmdError> {
        let reply = match reply.into_result() {
            Ok(reply) => reply,
            Err(CmdError::Rejected { text, .. }) if matches!(self, TorCmd::Authenticate { .. }) => {
                // Authentication failure is connection-fatal, not a
                // per-command rejection.
                return Err(ProtocolError::AuthenticationRejected(text).into());
            }
            Err(e) => return Err(e),
        };
        match self {
            TorCmd::GetConf { .. }
            | TorCmd::GetInfo { .. }
            | TorCmd::OnionClientAuthView { .. } => Ok(CmdOutput::KeyValues(kv_lines(&reply))),
            TorCmd::OnionAdd(_) => Ok(CmdOutput::OnionService(CreatedOnionService::from_reply(
                &reply,
            )?)),
            _ => Ok(CmdOutput::Ok),
        }
    }
}

impl fmt::Display for TorCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// Collect the informative `key=value` lines of a reply, dropping the
/// plain `OK` terminator of multi-line replies.
fn kv_lines(reply: &Reply) -> Vec<(String, Option<String>)> {
    let lines = reply.lines();
    let informative: &[_] = if lines.len() > 1 {
        &lines[..lines.len() - 1]
    } else if lines[0].payload == "OK" {
        &[]
    } else {
        lines
    };
    informative
        .iter()
        .map(|l| {
            let (k, v) = l.as_kv();
            (k.to_owned(), v.map(str::to_owned))
        })
        .collect()
}

/// Quote a string per the control protocol's QuotedString rules.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Render the `+LOADCONF` multi-line form: command, the torrc text with
/// leading dots doubled, and the terminating dot line.
fn render_loadconf(config: &TorConfig) -> String {
    let mut out = String::from("+LOADCONF\r\n");
    for line in config.render(RenderMode::Torrc).lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str(".\r\n");
    out
}

/// Render an `ADD_ONION` command line.
fn render_add_onion(add: &AddOnion) -> Result<String, CmdError> {
    if add.ports.is_empty() {
        return Err(CmdError::Uninterpretable(
            "ADD_ONION requires at least one Port".to_owned(),
        ));
    }
    let mut line = format!("ADD_ONION {}", add.key);
    if !add.flags.is_empty() {
        let flags: Vec<String> = add.flags.iter().map(ToString::to_string).collect();
        line.push_str(&format!(" Flags={}", flags.join(",")));
    }
    if let Some(max) = add.max_streams {
        line.push_str(&format!(" MaxStreams={}", max));
    }
    for (virt, target) in &add.ports {
        line.push_str(&format!(" Port={},{}", virt, target));
    }
    for client in &add.client_auth_v3 {
        line.push_str(&format!(" ClientAuthV3={}", client));
    }
    Ok(line)
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
    use crate::onion::OnionKey;
    use crate::reply::ReplyLine;
    use crate::status::ReplyStatus;
    use assert_matches::assert_matches;
    use tor_ctladdr::Port;
    use tor_ctlconf::{PortArg, PortBuilder};

    #[test]
    fn authenticate_forms() {
        assert_eq!(
            TorCmd::Authenticate {
                token: AuthToken::None
            }
            .render()
            .unwrap(),
            "AUTHENTICATE\r\n"
        );
        assert_eq!(
            TorCmd::Authenticate {
                token: AuthToken::Cookie(vec![0xde, 0xad])
            }
            .render()
            .unwrap(),
            "AUTHENTICATE dead\r\n"
        );
        assert_eq!(
            TorCmd::Authenticate {
                token: AuthToken::Password("p\"w".into())
            }
            .render()
            .unwrap(),
            "AUTHENTICATE \"p\\\"w\"\r\n"
        );
    }

    #[test]
    fn simple_commands() {
        assert_eq!(TorCmd::TakeOwnership.render().unwrap(), "TAKEOWNERSHIP\r\n");
        assert_eq!(
            TorCmd::Signal(TorSignal::NewNym).render().unwrap(),
            "SIGNAL NEWNYM\r\n"
        );
        assert_eq!(
            TorCmd::SaveConf { force: true }.render().unwrap(),
            "SAVECONF FORCE\r\n"
        );
        assert_eq!(
            TorCmd::GetConf {
                options: vec![TorOption::SocksPort, TorOption::DnsPort]
            }
            .render()
            .unwrap(),
            "GETCONF SocksPort DNSPort\r\n"
        );
        assert_eq!(
            TorCmd::SetEvents {
                kinds: vec![TorEventKind::Notice, TorEventKind::StatusClient]
            }
            .render()
            .unwrap(),
            "SETEVENTS NOTICE STATUS_CLIENT\r\n"
        );
        assert_eq!(TorCmd::SetEvents { kinds: vec![] }.render().unwrap(), "SETEVENTS\r\n");
    }

    #[test]
    fn setconf_renders_control_wire() {
        let setting = PortBuilder::socks(PortArg::Port(Port::new(9055).unwrap()))
            .build()
            .unwrap();
        let cmd = TorCmd::SetConf {
            settings: vec![setting],
        };
        assert_eq!(cmd.render().unwrap(), "SETCONF SocksPort=9055\r\n");
    }

    #[test]
    fn setconf_rejects_startup_only() {
        let setting = PortBuilder::control(PortArg::Auto).build().unwrap();
        let cmd = TorCmd::SetConf {
            settings: vec![setting],
        };
        assert_matches!(
            cmd.render(),
            Err(CmdError::Config(tor_ctlconf::ConfigError::StartupOnly { .. }))
        );
    }

    #[test]
    fn resetconf_rejects_startup_only() {
        let cmd = TorCmd::ResetConf {
            options: vec![TorOption::CookieAuthentication],
        };
        assert_matches!(
            cmd.render(),
            Err(CmdError::Config(tor_ctlconf::ConfigError::StartupOnly { .. }))
        );
        let ok = TorCmd::ResetConf {
            options: vec![TorOption::DnsPort],
        };
        assert_eq!(ok.render().unwrap(), "RESETCONF DNSPort\r\n");
    }

    #[test]
    fn loadconf_framing() {
        let mut b = TorConfig::builder();
        b.put(tor_ctlconf::Setting::with_value(
            TorOption::DisableNetwork,
            "1",
        ));
        let cmd = TorCmd::LoadConf { config: b.build() };
        assert_eq!(
            cmd.render().unwrap(),
            "+LOADCONF\r\nDisableNetwork 1\r\n.\r\n"
        );
    }

    #[test]
    fn add_onion_rendering() {
        let cmd = TorCmd::OnionAdd(
            AddOnion::new(OnionKey::NewV3)
                .port(Port::new(80).unwrap(), "127.0.0.1:8080")
                .flag(crate::onion::OnionAddFlag::DiscardPk),
        );
        assert_eq!(
            cmd.render().unwrap(),
            "ADD_ONION NEW:ED25519-V3 Flags=DiscardPK Port=80,127.0.0.1:8080\r\n"
        );
    }

    #[test]
    fn add_onion_requires_ports() {
        let cmd = TorCmd::OnionAdd(AddOnion::new(OnionKey::NewV3));
        assert_matches!(cmd.render(), Err(CmdError::Uninterpretable(_)));
    }

    #[test]
    fn privileged_partition() {
        assert!(TorCmd::Authenticate {
            token: AuthToken::None
        }
        .is_privileged());
        assert!(TorCmd::TakeOwnership.is_privileged());
        assert!(TorCmd::DropOwnership.is_privileged());
        assert!(TorCmd::Signal(TorSignal::Halt).is_privileged());
        assert!(TorCmd::Signal(TorSignal::Shutdown).is_privileged());
        assert!(!TorCmd::Signal(TorSignal::NewNym).is_privileged());
        assert!(!TorCmd::DropGuards.is_privileged());

        assert!(TorCmd::Signal(TorSignal::Halt).is_stop_signal());
        assert!(!TorCmd::Signal(TorSignal::Dump).is_stop_signal());
    }

    #[test]
    fn interpret_ok() {
        // AUTHENTICATE answered by "250 OK".
        let cmd = TorCmd::Authenticate {
            token: AuthToken::None,
        };
        let reply = Reply::from_lines(vec![ReplyLine::new(ReplyStatus::OK, "OK")]);
        assert_matches!(cmd.interpret(reply), Ok(CmdOutput::Ok));
    }

    #[test]
    fn interpret_auth_failure_is_fatal() {
        let cmd = TorCmd::Authenticate {
            token: AuthToken::None,
        };
        let reply = Reply::from_lines(vec![ReplyLine::new(
            ReplyStatus::BAD_AUTH,
            "Authentication failed",
        )]);
        assert_matches!(
            cmd.interpret(reply),
            Err(CmdError::Protocol(ProtocolError::AuthenticationRejected(_)))
        );
    }

    #[test]
    fn interpret_getinfo_kv() {
        let cmd = TorCmd::GetInfo {
            keys: vec!["version".into()],
        };
        let reply = Reply::from_lines(vec![
            ReplyLine::new(ReplyStatus::OK, "version=0.4.8.9"),
            ReplyLine::new(ReplyStatus::OK, "OK"),
        ]);
        assert_matches!(cmd.interpret(reply), Ok(CmdOutput::KeyValues(kv)) => {
            assert_eq!(kv, vec![("version".to_owned(), Some("0.4.8.9".to_owned()))]);
        });
    }

    #[test]
    fn interpret_rejection() {
        let cmd = TorCmd::DropGuards;
        let reply = Reply::from_lines(vec![ReplyLine::new(
            ReplyStatus::UNRECOGNIZED_CMD,
            "Unrecognized command",
        )]);
        assert_matches!(cmd.interpret(reply), Err(CmdError::Rejected { .. }));
    }
}
