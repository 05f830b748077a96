//! Settings: typed keyword/argument line items and their wire forms.
//!
//! A [`Setting`] is one or more [`LineItem`]s.  Almost every setting is a
//! single line; hidden services are the exception, grouping a
//! `HiddenServiceDir` with one or more `HiddenServicePort`s and the
//! stream-limit options into one unit that is configured atomically.

use std::fmt;
use std::path::{Path, PathBuf};

use tor_ctladdr::{HostIpv4, Port};

use crate::err::ConfigError;
use crate::keyword::TorOption;

/// How a config fragment is being rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum RenderMode {
    /// For a torrc file: `Keyword argument`, newline separated.
    Torrc,
    /// For the control wire (`SETCONF`, `LOADCONF` argv): `Keyword=argument`,
    /// space separated, with quoting and escaping.
    ControlWire,
}

/// Render a filesystem path for `mode`.
///
/// A torrc accepts raw backslashes; the control wire does not, so path
/// separators are doubled there on hosts whose separator is a backslash.
fn render_path(path: &Path, mode: RenderMode) -> String {
    let raw = path.display().to_string();
    match mode {
        RenderMode::Torrc => raw,
        RenderMode::ControlWire => {
            if std::path::MAIN_SEPARATOR == '\\' {
                raw.replace('\\', "\\\\")
            } else {
                raw
            }
        }
    }
}

/// Render a `unix:"<path>"` socket value for `mode`.
fn render_unix_socket(path: &Path, mode: RenderMode) -> String {
    match mode {
        RenderMode::Torrc => format!("unix:\"{}\"", path.display()),
        RenderMode::ControlWire => format!("unix:\\\"{}\\\"", render_path(path, mode)),
    }
}

/// A hidden-service virtual-port mapping target.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum HsTarget {
    /// Forward to a TCP port on a localhost address.
    Tcp(HostIpv4, Port),
    /// Forward to an AF_UNIX path socket.
    Unix(PathBuf),
}

impl HsTarget {
    /// True if this target can be emitted on this host.
    fn is_supported(&self) -> bool {
        match self {
            HsTarget::Tcp(..) => true,
            HsTarget::Unix(_) => cfg!(unix),
        }
    }

    /// Render for `mode`.
    fn render(&self, mode: RenderMode) -> String {
        match self {
            HsTarget::Tcp(host, port) => format!("{}:{}", host, port),
            HsTarget::Unix(path) => render_unix_socket(path, mode),
        }
    }
}

/// The argument half of a line item.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Argument {
    /// An opaque value rendered verbatim.
    Value(String),
    /// A port argument.
    Port(PortArg),
    /// A filesystem path (subject to control-wire escaping).
    Path(PathBuf),
    /// A `HiddenServicePort` mapping: virtual port plus target.
    HsPort {
        /// The port the service is reachable on.
        virt: Port,
        /// Where connections are forwarded.
        target: HsTarget,
    },
}

impl Argument {
    /// Render this argument for `mode`.
    fn render(&self, mode: RenderMode) -> String {
        match self {
            Argument::Value(v) => v.clone(),
            Argument::Port(p) => p.render(mode),
            Argument::Path(p) => render_path(p, mode),
            Argument::HsPort { virt, target } => {
                format!("{} {}", virt, target.render(mode))
            }
        }
    }
}

/// A port argument: what goes after `SocksPort`, `ControlPort`, etc.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum PortArg {
    /// Let tor pick (`auto`).
    Auto,
    /// Listener disabled (`0`).
    Disabled,
    /// A fixed TCP port.
    Port(Port),
    /// An AF_UNIX path socket.
    Unix(PathBuf),
}

impl PortArg {
    /// True if probing this argument for availability is meaningless.
    pub fn is_auto_or_disabled(&self) -> bool {
        matches!(self, PortArg::Auto | PortArg::Disabled)
    }

    /// Render this argument for `mode`.
    pub(crate) fn render(&self, mode: RenderMode) -> String {
        match self {
            PortArg::Auto => "auto".to_owned(),
            PortArg::Disabled => "0".to_owned(),
            PortArg::Port(p) => p.to_string(),
            PortArg::Unix(path) => render_unix_socket(path, mode),
        }
    }
}

/// An isolation flag appended to a proxy port.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum IsolationFlag {
    /// Isolate by client address.
    IsolateClientAddr,
    /// Isolate by SOCKS authentication.
    IsolateSocksAuth,
    /// Isolate by client protocol.
    IsolateClientProtocol,
    /// Isolate by destination port.
    IsolateDestPort,
    /// Isolate by destination address.
    IsolateDestAddr,
    /// Keep-alive variant of SOCKS-auth isolation.
    KeepAliveIsolateSocksAuth,
    /// Assign this listener to a fixed session group.
    SessionGroup(u16),
}

impl fmt::Display for IsolationFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationFlag::IsolateClientAddr => write!(f, "IsolateClientAddr"),
            IsolationFlag::IsolateSocksAuth => write!(f, "IsolateSOCKSAuth"),
            IsolationFlag::IsolateClientProtocol => write!(f, "IsolateClientProtocol"),
            IsolationFlag::IsolateDestPort => write!(f, "IsolateDestPort"),
            IsolationFlag::IsolateDestAddr => write!(f, "IsolateDestAddr"),
            IsolationFlag::KeepAliveIsolateSocksAuth => write!(f, "KeepAliveIsolateSOCKSAuth"),
            IsolationFlag::SessionGroup(g) => write!(f, "SessionGroup={}", g),
        }
    }
}

/// A SOCKS behavior flag; valid on SOCKS listeners only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SocksFlag {
    /// Refuse IPv4 connections.
    NoIPv4Traffic,
    /// Allow IPv6 connections.
    IPv6Traffic,
    /// Prefer IPv6 when both are available.
    PreferIPv6,
    /// Refuse DNS requests.
    NoDNSRequest,
    /// Refuse `.onion` connections.
    NoOnionTraffic,
    /// Allow only `.onion` connections.
    OnionTrafficOnly,
    /// Cache IPv4 DNS answers.
    CacheIPv4DNS,
    /// Cache IPv6 DNS answers.
    CacheIPv6DNS,
    /// Cache both DNS answer families.
    CacheDNS,
    /// Use cached IPv4 answers.
    UseIPv4Cache,
    /// Use cached IPv6 answers.
    UseIPv6Cache,
    /// Use cached answers of both families.
    UseDNSCache,
    /// Prefer IPv6 automap entries.
    PreferIPv6Automap,
    /// Prefer connections with no SOCKS authentication.
    PreferSOCKSNoAuth,
}

impl fmt::Display for SocksFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocksFlag::NoIPv4Traffic => "NoIPv4Traffic",
            SocksFlag::IPv6Traffic => "IPv6Traffic",
            SocksFlag::PreferIPv6 => "PreferIPv6",
            SocksFlag::NoDNSRequest => "NoDNSRequest",
            SocksFlag::NoOnionTraffic => "NoOnionTraffic",
            SocksFlag::OnionTrafficOnly => "OnionTrafficOnly",
            SocksFlag::CacheIPv4DNS => "CacheIPv4DNS",
            SocksFlag::CacheIPv6DNS => "CacheIPv6DNS",
            SocksFlag::CacheDNS => "CacheDNS",
            SocksFlag::UseIPv4Cache => "UseIPv4Cache",
            SocksFlag::UseIPv6Cache => "UseIPv6Cache",
            SocksFlag::UseDNSCache => "UseDNSCache",
            SocksFlag::PreferIPv6Automap => "PreferIPv6Automap",
            SocksFlag::PreferSOCKSNoAuth => "PreferSOCKSNoAuth",
        };
        write!(f, "{}", name)
    }
}

/// One `keyword argument [optionals...]` line.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct LineItem {
    /// The keyword.
    pub option: TorOption,
    /// The argument.
    pub argument: Argument,
    /// Pre-rendered values appended after the argument, space separated
    /// (port flags, hidden-service targets).
    pub optionals: Vec<String>,
}

impl LineItem {
    /// Construct a plain line item with no optionals.
    pub fn new(option: TorOption, argument: Argument) -> Self {
        LineItem {
            option,
            argument,
            optionals: Vec::new(),
        }
    }

    /// Render the value half of this item (argument plus optionals).
    pub(crate) fn render_value(&self, mode: RenderMode) -> String {
        let mut value = self.argument.render(mode);
        for opt in &self.optionals {
            value.push(' ');
            value.push_str(opt);
        }
        value
    }

    /// Render this item for `mode`.
    ///
    /// Torrc form is `Keyword value`; control form is `Keyword=value`,
    /// quoting the value when it contains spaces.
    pub fn render(&self, mode: RenderMode) -> String {
        let value = self.render_value(mode);
        match mode {
            RenderMode::Torrc => format!("{} {}", self.option, value),
            RenderMode::ControlWire => {
                if value.contains(' ') {
                    format!("{}=\"{}\"", self.option, value)
                } else {
                    format!("{}={}", self.option, value)
                }
            }
        }
    }
}

/// A configuration setting: one or more line items configured as a unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Setting {
    /// The line items, in emission order.  Never empty.
    items: Vec<LineItem>,
    /// Whether the generator may rewrite an unavailable port to `auto`.
    reassignable: bool,
}

impl Setting {
    /// Construct a single-line setting.
    pub fn new(option: TorOption, argument: Argument) -> Self {
        Setting {
            items: vec![LineItem::new(option, argument)],
            reassignable: true,
        }
    }

    /// Construct a single-line setting with a verbatim string argument.
    pub fn with_value(option: TorOption, value: impl Into<String>) -> Self {
        Setting::new(option, Argument::Value(value.into()))
    }

    /// Construct a single-line setting with a path argument.
    pub fn with_path(option: TorOption, path: impl Into<PathBuf>) -> Self {
        Setting::new(option, Argument::Path(path.into()))
    }

    /// Construct from pre-built items.  Crate-internal; callers go
    /// through the typed builders.
    pub(crate) fn from_items(items: Vec<LineItem>, reassignable: bool) -> Self {
        debug_assert!(!items.is_empty());
        Setting {
            items,
            reassignable,
        }
    }

    /// The keyword this setting is filed under (its first item's).
    pub fn option(&self) -> TorOption {
        self.items[0].option
    }

    /// The line items.
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    /// True if this is a hidden-service block.
    pub fn is_hidden_service(&self) -> bool {
        self.option().attrs().hidden_service
    }

    /// The leading port argument, if this is a port setting.
    pub fn port_arg(&self) -> Option<&PortArg> {
        match &self.items[0].argument {
            Argument::Port(p) if self.option().attrs().port => Some(p),
            _ => None,
        }
    }

    /// Whether an unavailable port may be rewritten to `auto`.
    pub fn is_reassignable(&self) -> bool {
        self.reassignable
    }

    /// Replace the leading port argument.  Used by the generator for
    /// reassignment; the caller has checked `port_arg()` is `Some`.
    pub(crate) fn set_port_arg(&mut self, arg: PortArg) {
        self.items[0].argument = Argument::Port(arg);
    }

    /// Reject this setting if any of its keywords is startup-only.
    ///
    /// `SETCONF`/`RESETCONF` call this before rendering.
    pub fn check_runtime_settable(&self) -> Result<(), ConfigError> {
        for item in &self.items {
            if item.option.is_startup_only() {
                return Err(ConfigError::StartupOnly {
                    option: item.option,
                });
            }
        }
        Ok(())
    }

    /// Render this setting for `mode`.
    ///
    /// Multi-line settings are newline separated in torrc mode and space
    /// separated (one argument group) in control mode.
    pub fn render(&self, mode: RenderMode) -> String {
        let sep = match mode {
            RenderMode::Torrc => "\n",
            RenderMode::ControlWire => " ",
        };
        self.items
            .iter()
            .map(|item| item.render(mode))
            .collect::<Vec<_>>()
            .join(sep)
    }
}

/// Builder for the proxy and control port settings.
#[derive(Clone, Debug)]
pub struct PortBuilder {
    /// Which port option is being configured.
    option: TorOption,
    /// The port argument.
    arg: PortArg,
    /// Isolation flags, in registration order.
    isolation: Vec<IsolationFlag>,
    /// SOCKS flags, in registration order.
    socks: Vec<SocksFlag>,
    /// Whether the generator may rewrite this to `auto`.
    reassignable: bool,
}

impl PortBuilder {
    /// Start building a port setting for `option` (callers use the
    /// named constructors).
    fn new(option: TorOption, arg: PortArg) -> Self {
        PortBuilder {
            option,
            arg,
            isolation: Vec::new(),
            socks: Vec::new(),
            reassignable: true,
        }
    }

    /// A `SocksPort` setting.
    pub fn socks(arg: PortArg) -> Self {
        Self::new(TorOption::SocksPort, arg)
    }

    /// A `DNSPort` setting.
    pub fn dns(arg: PortArg) -> Self {
        Self::new(TorOption::DnsPort, arg)
    }

    /// An `HTTPTunnelPort` setting.
    pub fn http_tunnel(arg: PortArg) -> Self {
        Self::new(TorOption::HttpTunnelPort, arg)
    }

    /// A `TransPort` setting.
    pub fn trans(arg: PortArg) -> Self {
        Self::new(TorOption::TransPort, arg)
    }

    /// A `ControlPort` setting.
    pub fn control(arg: PortArg) -> Self {
        Self::new(TorOption::ControlPort, arg)
    }

    /// Switch to the non-persistent `__`-prefixed alias of this option.
    pub fn non_persistent(mut self) -> Self {
        self.option = match self.option {
            TorOption::SocksPort => TorOption::UnderscoreSocksPort,
            TorOption::DnsPort => TorOption::UnderscoreDnsPort,
            TorOption::HttpTunnelPort => TorOption::UnderscoreHttpTunnelPort,
            TorOption::TransPort => TorOption::UnderscoreTransPort,
            TorOption::ControlPort => TorOption::UnderscoreControlPort,
            other => other,
        };
        self
    }

    /// Append an isolation flag.
    pub fn isolate(mut self, flag: IsolationFlag) -> Self {
        self.isolation.push(flag);
        self
    }

    /// Append a SOCKS flag.  Only valid on SOCKS ports; enforced at
    /// [`build`](Self::build).
    pub fn socks_flag(mut self, flag: SocksFlag) -> Self {
        self.socks.push(flag);
        self
    }

    /// Forbid the generator from rewriting this port to `auto` when it
    /// probes as unavailable (generation fails instead).
    pub fn fixed(mut self) -> Self {
        self.reassignable = false;
        self
    }

    /// Build the setting, checking which flags this port kind accepts:
    /// SOCKS ports carry isolation and SOCKS flags, the other proxy
    /// ports carry isolation flags only, and the control port carries
    /// none.
    pub fn build(self) -> Result<Setting, ConfigError> {
        let is_socks = matches!(
            self.option,
            TorOption::SocksPort | TorOption::UnderscoreSocksPort
        );
        let is_control = matches!(
            self.option,
            TorOption::ControlPort | TorOption::UnderscoreControlPort
        );
        if !self.socks.is_empty() && !is_socks {
            return Err(ConfigError::invalid_for(
                self.option,
                "SOCKS flags are only valid on a SOCKS port",
            ));
        }
        if !self.isolation.is_empty() && is_control {
            return Err(ConfigError::invalid_for(
                self.option,
                "the control port carries no flags",
            ));
        }
        let mut item = LineItem::new(self.option, Argument::Port(self.arg));
        item.optionals
            .extend(self.isolation.iter().map(ToString::to_string));
        item.optionals
            .extend(self.socks.iter().map(ToString::to_string));
        Ok(Setting::from_items(vec![item], self.reassignable))
    }
}

/// Builder for a hidden-service block.
///
/// Emission order is fixed: `HiddenServiceDir`, each `HiddenServicePort`,
/// `HiddenServiceMaxStreams`, `HiddenServiceMaxStreamsCloseCircuit`.
#[derive(Clone, Debug)]
pub struct HiddenServiceBuilder {
    /// The service's key/hostname directory.
    dir: PathBuf,
    /// Virtual port to target mappings.
    ports: Vec<(Port, HsTarget)>,
    /// `HiddenServiceMaxStreams`; tor's default is 0 (unlimited).
    max_streams: u32,
    /// `HiddenServiceMaxStreamsCloseCircuit`; tor's default is false.
    max_streams_close_circuit: bool,
}

impl HiddenServiceBuilder {
    /// Start a block rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        HiddenServiceBuilder {
            dir: dir.into(),
            ports: Vec::new(),
            max_streams: 0,
            max_streams_close_circuit: false,
        }
    }

    /// Map `virt` to a target.
    pub fn port(mut self, virt: Port, target: HsTarget) -> Self {
        self.ports.push((virt, target));
        self
    }

    /// Set the per-circuit stream ceiling.
    pub fn max_streams(mut self, n: u32) -> Self {
        self.max_streams = n;
        self
    }

    /// Close the circuit when the stream ceiling is exceeded.
    pub fn max_streams_close_circuit(mut self, close: bool) -> Self {
        self.max_streams_close_circuit = close;
        self
    }

    /// Build the block, or `None` when no supported port remains.
    ///
    /// Unix-socket targets are dropped on hosts without AF_UNIX path
    /// sockets; a block whose every port was dropped (or that never had
    /// one) is not appended at all.
    pub fn build(self) -> Option<Setting> {
        let supported: Vec<(Port, HsTarget)> = self
            .ports
            .into_iter()
            .filter(|(_, target)| target.is_supported())
            .collect();
        if supported.is_empty() {
            return None;
        }
        let mut items = Vec::with_capacity(supported.len() + 3);
        items.push(LineItem::new(
            TorOption::HiddenServiceDir,
            Argument::Path(self.dir),
        ));
        for (virt, target) in supported {
            items.push(LineItem::new(
                TorOption::HiddenServicePort,
                Argument::HsPort { virt, target },
            ));
        }
        items.push(LineItem::new(
            TorOption::HiddenServiceMaxStreams,
            Argument::Value(self.max_streams.to_string()),
        ));
        items.push(LineItem::new(
            TorOption::HiddenServiceMaxStreamsCloseCircuit,
            Argument::Value(if self.max_streams_close_circuit {
                "1".to_owned()
            } else {
                "0".to_owned()
            }),
        ));
        Some(Setting::from_items(items, false))
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

    fn port(n: u16) -> Port {
        Port::new(n).unwrap()
    }

    #[test]
    fn plain_rendering() {
        let s = Setting::with_value(TorOption::DisableNetwork, "1");
        assert_eq!(s.render(RenderMode::Torrc), "DisableNetwork 1");
        assert_eq!(s.render(RenderMode::ControlWire), "DisableNetwork=1");
    }

    #[test]
    fn socks_port_with_flags() {
        let s = PortBuilder::socks(PortArg::Port(port(9055)))
            .isolate(IsolationFlag::IsolateClientAddr)
            .socks_flag(SocksFlag::OnionTrafficOnly)
            .build()
            .unwrap();
        assert_eq!(
            s.render(RenderMode::Torrc),
            "SocksPort 9055 IsolateClientAddr OnionTrafficOnly"
        );
        // Values with spaces are quoted on the control wire.
        assert_eq!(
            s.render(RenderMode::ControlWire),
            "SocksPort=\"9055 IsolateClientAddr OnionTrafficOnly\""
        );
    }

    #[test]
    fn dns_port_rejects_socks_flags() {
        let err = PortBuilder::dns(PortArg::Auto)
            .socks_flag(SocksFlag::PreferIPv6)
            .build()
            .unwrap_err();
        assert_matches!(err, ConfigError::InvalidValue { .. });
    }

    #[test]
    fn control_port_rejects_all_flags() {
        let err = PortBuilder::control(PortArg::Auto)
            .isolate(IsolationFlag::IsolateDestPort)
            .build()
            .unwrap_err();
        assert_matches!(err, ConfigError::InvalidValue { .. });
        let ok = PortBuilder::control(PortArg::Auto).build().unwrap();
        assert_eq!(ok.render(RenderMode::Torrc), "ControlPort auto");
    }

    #[test]
    fn non_persistent_alias() {
        let s = PortBuilder::dns(PortArg::Port(port(1080)))
            .non_persistent()
            .build()
            .unwrap();
        assert_eq!(s.option(), TorOption::UnderscoreDnsPort);
        assert_eq!(s.render(RenderMode::Torrc), "__DNSPort 1080");
    }

    #[test]
    fn port_arg_forms() {
        assert_eq!(PortArg::Auto.render(RenderMode::Torrc), "auto");
        assert_eq!(PortArg::Disabled.render(RenderMode::Torrc), "0");
        assert_eq!(
            PortArg::Port(port(9050)).render(RenderMode::ControlWire),
            "9050"
        );
    }

    #[test]
    #[cfg(unix)]
    fn unix_socket_escaping() {
        let arg = PortArg::Unix(PathBuf::from("/run/tor/socks"));
        assert_eq!(arg.render(RenderMode::Torrc), "unix:\"/run/tor/socks\"");
        assert_eq!(
            arg.render(RenderMode::ControlWire),
            "unix:\\\"/run/tor/socks\\\""
        );
    }

    #[test]
    fn startup_only_guard() {
        let s = PortBuilder::control(PortArg::Auto).build().unwrap();
        assert_matches!(
            s.check_runtime_settable(),
            Err(ConfigError::StartupOnly {
                option: TorOption::ControlPort
            })
        );
        let ok = Setting::with_value(TorOption::DisableNetwork, "0");
        assert!(ok.check_runtime_settable().is_ok());
    }

    #[test]
    fn hidden_service_block_order() {
        let s = HiddenServiceBuilder::new("/data/hs1")
            .port(port(443), HsTarget::Tcp(HostIpv4::LOCALHOST, port(8443)))
            .port(port(80), HsTarget::Tcp(HostIpv4::LOCALHOST, port(8080)))
            .max_streams(10)
            .build()
            .unwrap();
        assert!(s.is_hidden_service());
        assert_eq!(
            s.render(RenderMode::Torrc),
            "HiddenServiceDir /data/hs1\n\
             HiddenServicePort 443 127.0.0.1:8443\n\
             HiddenServicePort 80 127.0.0.1:8080\n\
             HiddenServiceMaxStreams 10\n\
             HiddenServiceMaxStreamsCloseCircuit 0"
        );
        assert_eq!(
            s.render(RenderMode::ControlWire),
            "HiddenServiceDir=/data/hs1 \
             HiddenServicePort=\"443 127.0.0.1:8443\" \
             HiddenServicePort=\"80 127.0.0.1:8080\" \
             HiddenServiceMaxStreams=10 \
             HiddenServiceMaxStreamsCloseCircuit=0"
        );
    }

    #[test]
    fn hidden_service_without_ports_is_not_appended() {
        assert!(HiddenServiceBuilder::new("/data/hs1").build().is_none());
    }

    #[test]
    #[cfg(unix)]
    fn hidden_service_unix_target() {
        let s = HiddenServiceBuilder::new("/data/hs2")
            .port(port(80), HsTarget::Unix(PathBuf::from("/run/hs2.sock")))
            .build()
            .unwrap();
        assert_eq!(
            s.render(RenderMode::Torrc),
            "HiddenServiceDir /data/hs2\n\
             HiddenServicePort 80 unix:\"/run/hs2.sock\"\n\
             HiddenServiceMaxStreams 0\n\
             HiddenServiceMaxStreamsCloseCircuit 0"
        );
    }

    #[test]
    fn port_arg_accessors() {
        let mut s = PortBuilder::dns(PortArg::Port(port(1080))).build().unwrap();
        assert_matches!(s.port_arg(), Some(PortArg::Port(p)) if p.get() == 1080);
        assert!(s.is_reassignable());
        s.set_port_arg(PortArg::Auto);
        assert_matches!(s.port_arg(), Some(PortArg::Auto));

        let plain = Setting::with_value(TorOption::DisableNetwork, "1");
        assert!(plain.port_arg().is_none());
    }
}
