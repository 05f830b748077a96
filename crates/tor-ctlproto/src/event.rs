//! Asynchronous events: the `SETEVENTS` catalogue and parsed payloads.

use crate::reply::ReplyLine;

/// Declare the [`TorEventKind`] catalogue with wire-name round trips.
macro_rules! decl_event_kinds {
    {
        $(
            $(#[$item_meta:meta])*
            $variant:ident = $name:literal;
        )+
    } => {
        /// An asynchronous event kind, as named in `SETEVENTS` and in
        /// the first word of a `650` line.  See control-spec §4.1.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum TorEventKind {
            $(
                $(#[$item_meta])*
                $variant,
            )+
        }

        impl TorEventKind {
            /// Every recognized event kind.
            pub const ALL: &'static [TorEventKind] = &[ $( TorEventKind::$variant, )+ ];

            /// The wire name.
            pub fn name(self) -> &'static str {
                match self {
                    $( TorEventKind::$variant => $name, )+
                }
            }

            /// Look up a kind by its exact wire name.
            pub fn from_name(name: &str) -> Option<TorEventKind> {
                match name {
                    $( $name => Some(TorEventKind::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

impl std::fmt::Display for TorEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

decl_event_kinds! {
    /// Circuit status changed.
    Circ = "CIRC";
    /// Stream status changed.
    Stream = "STREAM";
    /// OR connection status changed.
    OrConn = "ORCONN";
    /// Bandwidth used in the last second.
    Bw = "BW";
    /// Debug-severity log message.
    Debug = "DEBUG";
    /// Info-severity log message.
    Info = "INFO";
    /// Notice-severity log message.
    Notice = "NOTICE";
    /// Warn-severity log message.
    Warn = "WARN";
    /// Err-severity log message.
    Err = "ERR";
    /// New descriptors available.
    NewDesc = "NEWDESC";
    /// New address mapping.
    AddrMap = "ADDRMAP";
    /// General status event.
    StatusGeneral = "STATUS_GENERAL";
    /// Client status event (bootstrap lives here).
    StatusClient = "STATUS_CLIENT";
    /// Server status event.
    StatusServer = "STATUS_SERVER";
    /// Guard set changed.
    Guard = "GUARD";
    /// Network status changed.
    Ns = "NS";
    /// New consensus arrived.
    NewConsensus = "NEWCONSENSUS";
    /// Circuit build timeout set.
    BuildTimeoutSet = "BUILDTIMEOUT_SET";
    /// A signal was received.
    Signal = "SIGNAL";
    /// Configuration changed.
    ConfChanged = "CONF_CHANGED";
    /// Minor circuit status change.
    CircMinor = "CIRC_MINOR";
    /// A pluggable transport launched.
    TransportLaunched = "TRANSPORT_LAUNCHED";
    /// Per-connection bandwidth.
    ConnBw = "CONN_BW";
    /// Per-circuit bandwidth.
    CircBw = "CIRC_BW";
    /// Per-circuit cell statistics.
    CellStats = "CELL_STATS";
    /// Hidden service descriptor event.
    HsDesc = "HS_DESC";
    /// Hidden service descriptor content.
    HsDescContent = "HS_DESC_CONTENT";
    /// Network liveness changed.
    NetworkLiveness = "NETWORK_LIVENESS";
}

/// A complete `6xx` frame, minimally parsed.
///
/// The first word of the first line names the event; everything else is
/// kept verbatim for the subscriber to interpret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsyncEvent {
    /// The event keyword (first word of the first payload line).
    keyword: String,
    /// All lines of the frame, in arrival order.
    lines: Vec<ReplyLine>,
}

impl AsyncEvent {
    /// Assemble from the parser's accumulated lines.
    pub(crate) fn from_lines(lines: Vec<ReplyLine>) -> Self {
        debug_assert!(!lines.is_empty());
        let keyword = lines
            .first()
            .map(|l| {
                l.payload
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_owned()
            })
            .unwrap_or_default();
        AsyncEvent { keyword, lines }
    }

    /// The event keyword, e.g. `"NOTICE"` or `"STATUS_CLIENT"`.
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// The recognized kind, if the keyword is in the catalogue.
    pub fn kind(&self) -> Option<TorEventKind> {
        TorEventKind::from_name(&self.keyword)
    }

    /// All lines of the frame.
    pub fn lines(&self) -> &[ReplyLine] {
        &self.lines
    }

    /// The first line's payload with the keyword stripped.
    pub fn content(&self) -> &str {
        let payload = &self.lines[0].payload;
        payload
            .strip_prefix(&self.keyword)
            .map(str::trim_start)
            .unwrap_or(payload)
    }
}

/// A parsed bootstrap progress report.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct Bootstrapped {
    /// Progress percentage, `0..=100`.
    pub progress: u8,
    /// The phase tag, e.g. `conn` or `done`.
    pub tag: String,
    /// The human-readable summary.
    pub summary: String,
}

impl Bootstrapped {
    /// Parse from a log-style notice line, e.g.
    /// `Bootstrapped 50% (loading_descriptors): Loading relay descriptors`.
    pub fn from_notice(content: &str) -> Option<Bootstrapped> {
        let rest = content.trim_start().strip_prefix("Bootstrapped ")?;
        let (pct, rest) = rest.split_once('%')?;
        let progress: u8 = pct.trim().parse().ok()?;
        if progress > 100 {
            return None;
        }
        let rest = rest.trim_start();
        let (tag, summary) = match rest.strip_prefix('(') {
            Some(tagged) => {
                let (tag, after) = tagged.split_once(')')?;
                let summary = after.trim_start_matches(':').trim();
                (tag.to_owned(), summary.to_owned())
            }
            None => (String::new(), rest.trim_start_matches(':').trim().to_owned()),
        };
        Some(Bootstrapped {
            progress,
            tag,
            summary,
        })
    }

    /// Parse from a `STATUS_CLIENT` bootstrap event, e.g.
    /// `NOTICE BOOTSTRAP PROGRESS=50 TAG=loading_descriptors SUMMARY="..."`.
    pub fn from_status_client(content: &str) -> Option<Bootstrapped> {
        let mut words = content.split_whitespace();
        let _severity = words.next()?;
        if words.next()? != "BOOTSTRAP" {
            return None;
        }
        let mut progress = None;
        let mut tag = String::new();
        let mut summary = String::new();
        for word in content.split_whitespace() {
            if let Some(v) = word.strip_prefix("PROGRESS=") {
                progress = v.parse::<u8>().ok().filter(|p| *p <= 100);
            } else if let Some(v) = word.strip_prefix("TAG=") {
                tag = v.to_owned();
            } else if let Some(v) = word.strip_prefix("SUMMARY=") {
                summary = v.trim_matches('"').to_owned();
            }
        }
        Some(Bootstrapped {
            progress: progress?,
            tag,
            summary,
        })
    }
}

/// The outcome of a `SIGNAL NEWNYM`, refined by the notice tor emits
/// when the request was rate limited.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum NewNymStatus {
    /// The new identity took effect.
    Ok,
    /// tor is postponing the request.
    RateLimited {
        /// Seconds until the request takes effect.
        seconds: u32,
    },
}

impl NewNymStatus {
    /// The prefix of the rate-limit notice.
    const RATE_LIMIT_PREFIX: &'static str = "Rate limiting NEWNYM request: delaying by ";

    /// Parse a NOTICE content line into a rate-limit report, if that is
    /// what it is.
    pub fn from_notice(content: &str) -> Option<NewNymStatus> {
        let rest = content.trim().strip_prefix(Self::RATE_LIMIT_PREFIX)?;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        let seconds = digits.parse().ok()?;
        Some(NewNymStatus::RateLimited { seconds })
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
    use crate::status::ReplyStatus;

    #[test]
    fn kind_round_trip() {
        for kind in TorEventKind::ALL {
            assert_eq!(TorEventKind::from_name(kind.name()), Some(*kind));
        }
        assert_eq!(TorEventKind::from_name("NOPE"), None);
    }

    fn event(payload: &str) -> AsyncEvent {
        AsyncEvent::from_lines(vec![ReplyLine::new(ReplyStatus::ASYNC_EVENT, payload)])
    }

    #[test]
    fn keyword_and_content() {
        let ev = event("NOTICE Bootstrapped 5% (conn): Connecting to a relay");
        assert_eq!(ev.keyword(), "NOTICE");
        assert_eq!(ev.kind(), Some(TorEventKind::Notice));
        assert_eq!(ev.content(), "Bootstrapped 5% (conn): Connecting to a relay");
    }

    #[test]
    fn bootstrap_from_notice() {
        let b = Bootstrapped::from_notice("Bootstrapped 5% (conn): Connecting to a relay")
            .unwrap();
        assert_eq!(b.progress, 5);
        assert_eq!(b.tag, "conn");
        assert_eq!(b.summary, "Connecting to a relay");

        let done = Bootstrapped::from_notice("Bootstrapped 100% (done): Done").unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.tag, "done");

        assert!(Bootstrapped::from_notice("Opening Socks listener").is_none());
        assert!(Bootstrapped::from_notice("Bootstrapped 101% (x): y").is_none());
    }

    #[test]
    fn bootstrap_from_status_client() {
        let b = Bootstrapped::from_status_client(
            "NOTICE BOOTSTRAP PROGRESS=50 TAG=loading_descriptors SUMMARY=\"Loading relay descriptors\"",
        )
        .unwrap();
        assert_eq!(b.progress, 50);
        assert_eq!(b.tag, "loading_descriptors");
        assert!(Bootstrapped::from_status_client("NOTICE CIRCUIT_ESTABLISHED").is_none());
    }

    #[test]
    fn newnym_rate_limited() {
        // The literal notice tor emits.
        let s = NewNymStatus::from_notice(
            "Rate limiting NEWNYM request: delaying by 10 second(s)",
        )
        .unwrap();
        assert_eq!(s, NewNymStatus::RateLimited { seconds: 10 });
        assert!(NewNymStatus::from_notice("Bootstrapped 5% (conn): x").is_none());
    }
}
