//! The controller environment: directories, resources, identity.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::err::Error;

/// Paths to the GeoIP databases handed to tor.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct GeoipFiles {
    /// The IPv4 database.
    pub v4: PathBuf,
    /// The IPv6 database.
    pub v6: PathBuf,
}

/// Locates the externally-installed resources the controller needs.
///
/// Installation itself (placing the tor binary and geoip files on
/// disk) is someone else's job; the runtime only asks where they ended
/// up.
pub trait ResourceLoader: Send + Sync {
    /// The tor executable to spawn.
    fn tor_executable(&self) -> Result<PathBuf, Error>;

    /// The geoip databases, when available.  `None` simply omits the
    /// GeoIP settings.
    fn geoip_files(&self) -> Option<GeoipFiles> {
        None
    }
}

/// A [`ResourceLoader`] over explicitly-supplied paths.
#[derive(Clone, Debug)]
pub struct ExplicitResources {
    /// The tor executable.
    tor: PathBuf,
    /// The geoip databases.
    geoip: Option<GeoipFiles>,
}

impl ExplicitResources {
    /// A loader for a tor binary at `tor`, with no geoip files.
    pub fn new(tor: impl Into<PathBuf>) -> Self {
        ExplicitResources {
            tor: tor.into(),
            geoip: None,
        }
    }

    /// Supply geoip databases too.
    pub fn with_geoip(mut self, v4: impl Into<PathBuf>, v6: impl Into<PathBuf>) -> Self {
        self.geoip = Some(GeoipFiles {
            v4: v4.into(),
            v6: v6.into(),
        });
        self
    }
}

impl ResourceLoader for ExplicitResources {
    fn tor_executable(&self) -> Result<PathBuf, Error> {
        if self.tor.as_os_str().is_empty() {
            return Err(Error::Resource {
                detail: "no tor executable configured".to_owned(),
            });
        }
        Ok(self.tor.clone())
    }

    fn geoip_files(&self) -> Option<GeoipFiles> {
        self.geoip.clone()
    }
}

/// One controller instance's environment: where its state lives, how
/// its resources are found, and the identity derived from both.
///
/// The `fid` (file identifier) is a short fingerprint over the work
/// and cache paths; it keys the process-wide instance registry and
/// prefixes every log line so that multi-instance deployments stay
/// attributable.
#[derive(Clone)]
pub struct Environment {
    /// tor's data directory.
    work_dir: PathBuf,
    /// tor's cache directory.
    cache_dir: PathBuf,
    /// Resource locator.
    loader: Arc<dyn ResourceLoader>,
    /// Verbose diagnostics.
    debug: bool,
    /// Skip the GeoIP settings even when the loader has them.
    omit_geoip: bool,
    /// The derived identity.
    fid: String,
}

impl Environment {
    /// Start building an environment over the given directories.
    pub fn builder(
        work_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        loader: Arc<dyn ResourceLoader>,
    ) -> EnvironmentBuilder {
        EnvironmentBuilder {
            work_dir: work_dir.into(),
            cache_dir: cache_dir.into(),
            loader,
            debug: false,
            omit_geoip: false,
        }
    }

    /// tor's data directory.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// tor's cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The resource locator.
    pub fn loader(&self) -> &Arc<dyn ResourceLoader> {
        &self.loader
    }

    /// Whether verbose diagnostics were requested.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Whether the GeoIP settings are suppressed.
    pub fn omit_geoip(&self) -> bool {
        self.omit_geoip
    }

    /// The instance identity.
    pub fn fid(&self) -> &str {
        &self.fid
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("fid", &self.fid)
            .field("work_dir", &self.work_dir)
            .field("cache_dir", &self.cache_dir)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Environment`].
pub struct EnvironmentBuilder {
    /// tor's data directory.
    work_dir: PathBuf,
    /// tor's cache directory.
    cache_dir: PathBuf,
    /// Resource locator.
    loader: Arc<dyn ResourceLoader>,
    /// Verbose diagnostics.
    debug: bool,
    /// Skip GeoIP settings.
    omit_geoip: bool,
}

impl EnvironmentBuilder {
    /// Request verbose diagnostics.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Suppress the GeoIP settings.
    pub fn omit_geoip(mut self, omit: bool) -> Self {
        self.omit_geoip = omit;
        self
    }

    /// Finish the environment, deriving its `fid`.
    pub fn build(self) -> Environment {
        let fid = derive_fid(&self.work_dir, &self.cache_dir);
        Environment {
            work_dir: self.work_dir,
            cache_dir: self.cache_dir,
            loader: self.loader,
            debug: self.debug,
            omit_geoip: self.omit_geoip,
            fid,
        }
    }
}

/// Derive the short identity fingerprint over the environment's paths.
fn derive_fid(work_dir: &Path, cache_dir: &Path) -> String {
    let mut h = Sha256::new();
    h.update(work_dir.display().to_string().as_bytes());
    h.update([0x1f]);
    h.update(cache_dir.display().to_string().as_bytes());
    hex::encode(&h.finalize()[..4])
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

    fn env(work: &str, cache: &str) -> Environment {
        Environment::builder(work, cache, Arc::new(ExplicitResources::new("/usr/bin/tor")))
            .build()
    }

    #[test]
    fn fid_is_stable_and_path_sensitive() {
        let a = env("/data/a", "/cache/a");
        let b = env("/data/a", "/cache/a");
        let c = env("/data/c", "/cache/c");
        assert_eq!(a.fid(), b.fid());
        assert_ne!(a.fid(), c.fid());
        assert_eq!(a.fid().len(), 8);
        assert!(a.fid().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn explicit_resources() {
        let loader = ExplicitResources::new("/opt/tor").with_geoip("/opt/geoip", "/opt/geoip6");
        assert_eq!(loader.tor_executable().unwrap(), PathBuf::from("/opt/tor"));
        let geoip = loader.geoip_files().unwrap();
        assert_eq!(geoip.v4, PathBuf::from("/opt/geoip"));

        let empty = ExplicitResources::new("");
        assert_matches!(empty.tor_executable(), Err(Error::Resource { .. }));
    }

    #[test]
    fn builder_flags() {
        let e = Environment::builder(
            "/w",
            "/c",
            Arc::new(ExplicitResources::new("/usr/bin/tor")),
        )
        .debug(true)
        .omit_geoip(true)
        .build();
        assert!(e.debug());
        assert!(e.omit_geoip());
    }
}
