//! Resolving user configuration into a startable config.
//!
//! The generator owns the controller's side of the bargain: whatever the
//! user configures, the emitted config always has a data directory, a
//! control listener written to a known file, cookie authentication, and
//! the network disabled until the controller enables it.

use std::path::PathBuf;

use tracing::{debug, info};

use tor_ctladdr::{HostIp, HostIpv4, Port};

use crate::config::{TorConfig, TorConfigBuilder};
use crate::err::ConfigError;
use crate::keyword::TorOption;
use crate::prober::PortProbe;
use crate::setting::{PortArg, PortBuilder, Setting};

/// A user configuration callback, applied in registration order.
pub type ConfigCallback = Box<dyn Fn(&mut TorConfigBuilder) + Send + Sync>;

/// Name of the control-port file within the work directory.
const CTRL_PORT_FILE: &str = "ctrl.txt";

/// Name of the cookie file within the work directory.
const COOKIE_AUTH_FILE: &str = "ctrl_auth_cookie";

/// Default SOCKS port when the user configures none.
const DEFAULT_SOCKS_PORT: u16 = 9050;

/// The environment facts generation needs.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ConfigContext {
    /// tor's data directory.
    pub work_dir: PathBuf,
    /// tor's cache directory.
    pub cache_dir: PathBuf,
    /// IPv4 GeoIP database, if the resource loader provides one.
    pub geoip_file: Option<PathBuf>,
    /// IPv6 GeoIP database, if the resource loader provides one.
    pub geoip6_file: Option<PathBuf>,
    /// Skip the GeoIP settings entirely.
    pub omit_geoip: bool,
    /// The controller's PID, passed as `__OwningControllerProcess`.
    pub pid: u32,
    /// Rewrite unavailable fixed ports to `auto` instead of failing.
    pub reassign_unavailable_ports: bool,
}

impl ConfigContext {
    /// Construct a context over `work_dir`/`cache_dir` with defaults.
    pub fn new(work_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        ConfigContext {
            work_dir: work_dir.into(),
            cache_dir: cache_dir.into(),
            geoip_file: None,
            geoip6_file: None,
            omit_geoip: false,
            pid: std::process::id(),
            reassign_unavailable_ports: true,
        }
    }

    /// Path tor is told to write its control listener(s) to.
    pub fn ctrl_port_file(&self) -> PathBuf {
        self.work_dir.join(CTRL_PORT_FILE)
    }

    /// Path tor is told to write the authentication cookie to.
    pub fn cookie_auth_file(&self) -> PathBuf {
        self.work_dir.join(COOKIE_AUTH_FILE)
    }
}

/// What generation produces: the config itself plus everything the
/// process supervisor needs to start and then find tor.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct GeneratedConfig {
    /// The resolved configuration.
    pub config: TorConfig,
    /// Arguments for the `tor` invocation (not including the executable).
    pub argv: Vec<String>,
    /// Where tor will advertise its control listener(s).
    pub ctrl_port_file: PathBuf,
    /// Where tor will write the authentication cookie.
    pub cookie_auth_file: PathBuf,
}

/// Resolve `callbacks` against `ctx` into a startable config.
///
/// Fixed listener ports are probed with `probe`; an unavailable one is
/// rewritten to `auto` when both the context and the setting allow it,
/// and fails generation otherwise.
pub async fn generate(
    ctx: &ConfigContext,
    callbacks: &[ConfigCallback],
    probe: &dyn PortProbe,
) -> Result<GeneratedConfig, ConfigError> {
    let mut b = TorConfig::builder();

    // The controller's own settings come first, so a user callback that
    // insists can override them by keyword.
    b.put(Setting::with_path(
        TorOption::DataDirectory,
        ctx.work_dir.clone(),
    ));
    b.put(Setting::with_path(
        TorOption::CacheDirectory,
        ctx.cache_dir.clone(),
    ));
    b.put(Setting::with_path(
        TorOption::ControlPortWriteToFile,
        ctx.ctrl_port_file(),
    ));
    b.put(Setting::with_value(TorOption::CookieAuthentication, "1"));
    b.put(Setting::with_path(
        TorOption::CookieAuthFile,
        ctx.cookie_auth_file(),
    ));
    b.put(Setting::with_value(TorOption::DisableNetwork, "1"));
    b.put(Setting::with_value(TorOption::RunAsDaemon, "0"));
    b.put(Setting::with_value(
        TorOption::OwningControllerProcess,
        ctx.pid.to_string(),
    ));
    b.put(Setting::with_value(TorOption::DormantCanceledByStartup, "1"));

    if !ctx.omit_geoip {
        if let Some(geoip) = &ctx.geoip_file {
            b.put(Setting::with_path(TorOption::GeoIpFile, geoip.clone()));
        }
        if let Some(geoip6) = &ctx.geoip6_file {
            b.put(Setting::with_path(TorOption::GeoIpV6File, geoip6.clone()));
        }
    }

    for callback in callbacks {
        callback(&mut b);
    }

    if !b.contains(TorOption::SocksPort) && !b.contains(TorOption::UnderscoreSocksPort) {
        debug!("no SocksPort configured; defaulting to {DEFAULT_SOCKS_PORT}");
        b.put(
            PortBuilder::socks(PortArg::Port(
                Port::new(DEFAULT_SOCKS_PORT).expect("default port is nonzero"),
            ))
            .non_persistent()
            .build()?,
        );
    }
    if !b.contains(TorOption::ControlPort) && !b.contains(TorOption::UnderscoreControlPort) {
        b.put(
            PortBuilder::control(PortArg::Auto)
                .non_persistent()
                .build()?,
        );
    }

    let mut config = b.build();
    probe_ports(ctx, &mut config, probe).await?;

    // tor reads everything from argv; the remaining settings are fed
    // over the control connection with LOADCONF after authentication,
    // so a missing torrc must not be fatal.
    let mut argv = vec![
        "--ignore-missing-torrc".to_owned(),
        "-f".to_owned(),
        ctx.work_dir.join("torrc").display().to_string(),
    ];
    argv.extend(config.cmdline_argv());

    Ok(GeneratedConfig {
        config,
        argv,
        ctrl_port_file: ctx.ctrl_port_file(),
        cookie_auth_file: ctx.cookie_auth_file(),
    })
}

/// Probe every fixed listener port, rewriting or failing per policy.
async fn probe_ports(
    ctx: &ConfigContext,
    config: &mut TorConfig,
    probe: &dyn PortProbe,
) -> Result<(), ConfigError> {
    let localhost = HostIp::V4(HostIpv4::LOCALHOST);
    for setting in config.settings_mut() {
        let port = match setting.port_arg() {
            Some(PortArg::Port(p)) => *p,
            // auto, disabled, unix sockets, and non-port settings are
            // not probeable.
            _ => continue,
        };
        if probe.is_available(&localhost, port).await {
            continue;
        }
        if ctx.reassign_unavailable_ports && setting.is_reassignable() {
            info!(
                "{} {} is unavailable; reassigning to auto",
                setting.option(),
                port
            );
            setting.set_port_arg(PortArg::Auto);
        } else {
            return Err(ConfigError::PortUnavailable {
                host: localhost,
                port,
            });
        }
    }
    Ok(())
}
