//! The control-port file tor writes when told
//! `ControlPortWriteToFile`.
//!
//! Format: one listener per line, `PORT=ip:port` for TCP and
//! `UNIX_PORT=/path` for AF_UNIX.  Blank lines and trailing whitespace
//! are tolerated.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tor_ctladdr::ConnectPoint;

use crate::err::ProcError;

/// Parse the file's text into the advertised endpoints, in order.
pub fn parse_ctrl_port_file(text: &str) -> Result<Vec<ConnectPoint>, ProcError> {
    let mut endpoints = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(addr) = line.strip_prefix("PORT=") {
            let addr: SocketAddr = addr.trim().parse().map_err(|_| ProcError::CtrlPortFile {
                detail: format!("unparseable PORT line {line:?}"),
            })?;
            endpoints.push(ConnectPoint::Tcp(addr));
        } else if let Some(path) = line.strip_prefix("UNIX_PORT=") {
            endpoints.push(ConnectPoint::Unix(PathBuf::from(path.trim())));
        } else {
            return Err(ProcError::CtrlPortFile {
                detail: format!("unrecognized line {line:?}"),
            });
        }
    }
    Ok(endpoints)
}

/// Pick the endpoint to connect to: a `UNIX_PORT` whose path exists is
/// preferred; otherwise the first `PORT`.
pub fn choose_endpoint(
    endpoints: &[ConnectPoint],
    path_exists: impl Fn(&Path) -> bool,
) -> Option<ConnectPoint> {
    for ep in endpoints {
        if let ConnectPoint::Unix(path) = ep {
            if ep.is_supported() && path_exists(path) {
                return Some(ep.clone());
            }
        }
    }
    endpoints
        .iter()
        .find(|ep| matches!(ep, ConnectPoint::Tcp(_)))
        .cloned()
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
    fn parses_ports_and_blanks() {
        let eps = parse_ctrl_port_file("PORT=127.0.0.1:9051  \n\nPORT=127.0.0.1:9052\n").unwrap();
        assert_eq!(eps.len(), 2);
        assert_matches!(&eps[0], ConnectPoint::Tcp(a) if a.port() == 9051);
    }

    #[test]
    fn parses_unix_port() {
        let eps = parse_ctrl_port_file("UNIX_PORT=/run/tor/control\n").unwrap();
        assert_matches!(&eps[0], ConnectPoint::Unix(p) if p == &PathBuf::from("/run/tor/control"));
    }

    #[test]
    fn rejects_garbage() {
        assert_matches!(
            parse_ctrl_port_file("FROB=1\n"),
            Err(ProcError::CtrlPortFile { .. })
        );
        assert_matches!(
            parse_ctrl_port_file("PORT=not-an-addr\n"),
            Err(ProcError::CtrlPortFile { .. })
        );
    }

    #[test]
    #[cfg(unix)]
    fn prefers_existing_unix_port() {
        let eps = parse_ctrl_port_file(
            "PORT=127.0.0.1:9051\nUNIX_PORT=/run/tor/control\n",
        )
        .unwrap();
        let chosen = choose_endpoint(&eps, |_| true).unwrap();
        assert_matches!(chosen, ConnectPoint::Unix(_));
        // A missing socket path falls back to the TCP listener.
        let chosen = choose_endpoint(&eps, |_| false).unwrap();
        assert_matches!(chosen, ConnectPoint::Tcp(_));
    }

    #[test]
    fn empty_file_yields_nothing() {
        let eps = parse_ctrl_port_file("\n  \n").unwrap();
        assert!(eps.is_empty());
        assert_eq!(choose_endpoint(&eps, |_| true), None);
    }
}
