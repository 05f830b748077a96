//! The catalogue of recognized tor configuration keywords.
//!
//! Keywords are compared by identity: two settings refer to the same
//! option exactly when their [`TorOption`] values are equal.  Each
//! keyword carries a small set of attributes that drive rendering and
//! generation (whether it goes on the command line, whether its argument
//! is a path, whether it may only be set at process start, ...).

/// Attributes attached to a configuration keyword.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct OptionAttrs {
    /// Passed to `tor` as a `--Keyword value` command-line argument at
    /// startup, rather than via `LOADCONF`.
    pub cmd_line: bool,
    /// Argument is a directory path.
    pub directory: bool,
    /// Argument is a port value (`auto`, `0`, a number, or a unix socket).
    pub port: bool,
    /// Argument may be a `unix:"<path>"` socket.
    pub unix_socket: bool,
    /// Argument is a file path.
    pub file: bool,
    /// Part of a hidden-service block.
    pub hidden_service: bool,
    /// May only be configured at process start; rejected for
    /// `SETCONF`/`RESETCONF`.
    pub startup_only: bool,
    /// Recognized, but deprecated by tor.
    pub deprecated: bool,
}

impl OptionAttrs {
    /// An attribute set with nothing enabled.
    const NONE: OptionAttrs = OptionAttrs {
        cmd_line: false,
        directory: false,
        port: false,
        unix_socket: false,
        file: false,
        hidden_service: false,
        startup_only: false,
        deprecated: false,
    };

    /// Enable `cmd_line`.
    const fn cmd_line(mut self) -> Self {
        self.cmd_line = true;
        self
    }
    /// Enable `directory`.
    const fn directory(mut self) -> Self {
        self.directory = true;
        self
    }
    /// Enable `port`.
    const fn port(mut self) -> Self {
        self.port = true;
        self
    }
    /// Enable `unix_socket`.
    const fn unix_socket(mut self) -> Self {
        self.unix_socket = true;
        self
    }
    /// Enable `file`.
    const fn file(mut self) -> Self {
        self.file = true;
        self
    }
    /// Enable `hidden_service`.
    const fn hidden_service(mut self) -> Self {
        self.hidden_service = true;
        self
    }
    /// Enable `startup_only`.
    const fn startup_only(mut self) -> Self {
        self.startup_only = true;
        self
    }
    /// Enable `deprecated`.
    const fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }
}

/// Declare the [`TorOption`] catalogue.
///
/// Each entry gives the variant, the wire keyword, and the attribute
/// constructors to apply.  The wire keyword is what appears in a torrc
/// and on the control protocol; lookup by name is exact.
macro_rules! decl_options {
    {
        $(
            $(#[$item_meta:meta])*
            $variant:ident = $name:literal $( : $($attr:ident),+ )? ;
        )+
    } => {
        /// A recognized tor configuration keyword.
        ///
        /// The catalogue is closed: tor keywords this crate does not know
        /// about cannot be expressed, which keeps rendering and the
        /// startup-only guard exhaustive.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum TorOption {
            $(
                $(#[$item_meta])*
                $variant,
            )+
        }

        impl TorOption {
            /// Every keyword in the catalogue.
            pub const ALL: &'static [TorOption] = &[ $( TorOption::$variant, )+ ];

            /// The keyword as it appears on the wire and in a torrc.
            pub fn name(self) -> &'static str {
                match self {
                    $( TorOption::$variant => $name, )+
                }
            }

            /// Look a keyword up by its exact wire name.
            pub fn from_name(name: &str) -> Option<TorOption> {
                match name {
                    $( $name => Some(TorOption::$variant), )+
                    _ => None,
                }
            }

            /// The attributes attached to this keyword.
            pub fn attrs(self) -> OptionAttrs {
                match self {
                    $( TorOption::$variant => OptionAttrs::NONE $( $( .$attr() )+ )?, )+
                }
            }
        }
    };
}

impl TorOption {
    /// True if this option may only be configured at process start.
    pub fn is_startup_only(self) -> bool {
        self.attrs().startup_only
    }
}

impl std::fmt::Display for TorOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

decl_options! {
    /// Where tor keeps its state.
    DataDirectory = "DataDirectory": cmd_line, directory;
    /// Where tor keeps cached directory material.
    CacheDirectory = "CacheDirectory": cmd_line, directory;
    /// The control listener.
    ControlPort = "ControlPort": cmd_line, port, unix_socket, startup_only;
    /// Non-persistent alias of `ControlPort`.
    UnderscoreControlPort = "__ControlPort": cmd_line, port, unix_socket, startup_only;
    /// File tor writes its chosen control listener(s) to.
    ControlPortWriteToFile = "ControlPortWriteToFile": cmd_line, file, startup_only;
    /// Whether cookie authentication is enabled.
    CookieAuthentication = "CookieAuthentication": cmd_line, startup_only;
    /// Where the authentication cookie is written.
    CookieAuthFile = "CookieAuthFile": cmd_line, file, startup_only;
    /// S2K-hashed controller password.
    HashedControlPassword = "HashedControlPassword": cmd_line;
    /// Whether tor may touch the network.
    DisableNetwork = "DisableNetwork": cmd_line;
    /// Whether tor forks into the background.
    RunAsDaemon = "RunAsDaemon": cmd_line;
    /// The SOCKS listener.
    SocksPort = "SocksPort": cmd_line, port, unix_socket;
    /// Non-persistent alias of `SocksPort`.
    UnderscoreSocksPort = "__SocksPort": cmd_line, port, unix_socket;
    /// The DNS listener.
    DnsPort = "DNSPort": cmd_line, port;
    /// Non-persistent alias of `DNSPort`.
    UnderscoreDnsPort = "__DNSPort": cmd_line, port;
    /// The HTTP CONNECT tunnel listener.
    HttpTunnelPort = "HTTPTunnelPort": cmd_line, port;
    /// Non-persistent alias of `HTTPTunnelPort`.
    UnderscoreHttpTunnelPort = "__HTTPTunnelPort": cmd_line, port;
    /// The transparent-proxy listener.
    TransPort = "TransPort": cmd_line, port;
    /// Non-persistent alias of `TransPort`.
    UnderscoreTransPort = "__TransPort": cmd_line, port;
    /// IPv4 GeoIP database.
    GeoIpFile = "GeoIPFile": cmd_line, file;
    /// IPv6 GeoIP database.
    GeoIpV6File = "GeoIPv6File": cmd_line, file;
    /// Treat unknown-country addresses as excluded.
    GeoIpExcludeUnknown = "GeoIPExcludeUnknown";
    /// Directory of a hidden service block.
    HiddenServiceDir = "HiddenServiceDir": directory, hidden_service;
    /// A virtual-port to target mapping within a hidden service block.
    HiddenServicePort = "HiddenServicePort": port, unix_socket, hidden_service;
    /// Hidden service descriptor version.
    HiddenServiceVersion = "HiddenServiceVersion": hidden_service;
    /// Per-circuit stream ceiling for a hidden service.
    HiddenServiceMaxStreams = "HiddenServiceMaxStreams": hidden_service;
    /// Whether exceeding the stream ceiling tears down the circuit.
    HiddenServiceMaxStreamsCloseCircuit = "HiddenServiceMaxStreamsCloseCircuit": hidden_service;
    /// Directory of client authorization credentials.
    ClientOnionAuthDir = "ClientOnionAuthDir": directory;
    /// Log destination configuration.
    Log = "Log";
    /// Tag prepended to syslog entries.
    SyslogIdentityTag = "SyslogIdentityTag": cmd_line;
    /// Map `.onion`/`.exit` names to virtual addresses on resolve.
    AutomapHostsOnResolve = "AutomapHostsOnResolve";
    /// Suffixes subject to automapping.
    AutomapHostsSuffixes = "AutomapHostsSuffixes";
    /// Virtual network for automapped IPv4 addresses.
    VirtualAddrNetworkIPv4 = "VirtualAddrNetworkIPv4";
    /// Virtual network for automapped IPv6 addresses.
    VirtualAddrNetworkIPv6 = "VirtualAddrNetworkIPv6";
    /// Leave dormant mode when the controller starts tor.
    DormantCanceledByStartup = "DormantCanceledByStartup": cmd_line;
    /// Inactivity period before tor goes dormant.
    DormantClientTimeout = "DormantClientTimeout";
    /// Whether a fresh data directory starts out dormant.
    DormantOnFirstStartup = "DormantOnFirstStartup";
    /// Whether open-but-idle streams keep tor awake.
    DormantTimeoutDisabledByIdleStreams = "DormantTimeoutDisabledByIdleStreams";
    /// Channel padding.
    ConnectionPadding = "ConnectionPadding";
    /// Reduced channel padding for mobile.
    ReducedConnectionPadding = "ReducedConnectionPadding";
    /// Circuit-level padding machines.
    CircuitPadding = "CircuitPadding";
    /// Reduced circuit padding.
    ReducedCircuitPadding = "ReducedCircuitPadding";
    /// A bridge line.
    Bridge = "Bridge";
    /// Whether to connect via bridges.
    UseBridges = "UseBridges";
    /// Pluggable transport client plugin.
    ClientTransportPlugin = "ClientTransportPlugin";
    /// How long a circuit may carry new streams.
    MaxCircuitDirtiness = "MaxCircuitDirtiness";
    /// How often to consider building a new circuit.
    NewCircuitPeriod = "NewCircuitPeriod";
    /// Allowed directory ports through a firewall.  Deprecated by tor.
    ReachableDirAddresses = "ReachableDirAddresses": deprecated;
    /// PID of the owning controller; tor exits when it does.
    OwningControllerProcess = "__OwningControllerProcess": cmd_line;
    /// Whether SIGHUP reloads the torrc.
    ReloadTorrcOnSighup = "__ReloadTorrcOnSIGHUP";
    /// Disable predictive circuit building.
    DisablePredictedCircuits = "__DisablePredictedCircuits";
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

    #[test]
    fn lookup_round_trip() {
        for opt in TorOption::ALL {
            assert_eq!(TorOption::from_name(opt.name()), Some(*opt));
        }
        assert_eq!(TorOption::from_name("NoSuchOption"), None);
        // Lookup is exact, not case-folded.
        assert_eq!(TorOption::from_name("datadirectory"), None);
    }

    #[test]
    fn startup_only_set() {
        for opt in [
            TorOption::ControlPort,
            TorOption::UnderscoreControlPort,
            TorOption::CookieAuthFile,
            TorOption::CookieAuthentication,
            TorOption::ControlPortWriteToFile,
        ] {
            assert!(opt.is_startup_only(), "{opt} should be startup-only");
        }
        assert!(!TorOption::SocksPort.is_startup_only());
        assert!(!TorOption::DisableNetwork.is_startup_only());
    }

    #[test]
    fn attribute_spot_checks() {
        let dd = TorOption::DataDirectory.attrs();
        assert!(dd.cmd_line && dd.directory && !dd.port);

        let sp = TorOption::SocksPort.attrs();
        assert!(sp.port && sp.unix_socket && sp.cmd_line);

        let hsp = TorOption::HiddenServicePort.attrs();
        assert!(hsp.port && hsp.hidden_service && !hsp.cmd_line);

        assert!(TorOption::ReachableDirAddresses.attrs().deprecated);
    }

    #[test]
    fn underscore_aliases_are_distinct_options() {
        assert_ne!(TorOption::SocksPort, TorOption::UnderscoreSocksPort);
        assert_eq!(TorOption::UnderscoreSocksPort.name(), "__SocksPort");
    }
}
