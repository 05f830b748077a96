//! Parsed reply frames.

use crate::err::CmdError;
use crate::status::ReplyStatus;

/// One parsed reply line: status code plus payload, with the data block
/// attached when the line opened one.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct ReplyLine {
    /// The status code.
    pub status: ReplyStatus,
    /// Everything after the separator.
    pub payload: String,
    /// Lines of the dot-terminated block, for `+` lines.
    pub data: Option<Vec<String>>,
}

impl ReplyLine {
    /// Construct a plain line with no data block.
    pub fn new(status: ReplyStatus, payload: impl Into<String>) -> Self {
        ReplyLine {
            status,
            payload: payload.into(),
            data: None,
        }
    }

    /// Split `key=value` payloads, as `GETCONF`/`GETINFO` replies use.
    ///
    /// A payload with no `=` is a bare key with no value (tor's way of
    /// reporting a default).
    pub fn as_kv(&self) -> (&str, Option<&str>) {
        match self.payload.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (self.payload.as_str(), None),
        }
    }
}

/// A command's complete reply: the ordered, non-empty sequence of lines
/// ending with the final (space-separated) line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// The lines, finishing with the final line.  Never empty.
    lines: Vec<ReplyLine>,
}

impl Reply {
    /// Assemble a reply from its lines.  The parser guarantees
    /// non-emptiness; so must anyone constructing replies by hand.
    pub fn from_lines(lines: Vec<ReplyLine>) -> Self {
        debug_assert!(!lines.is_empty());
        Reply { lines }
    }

    /// All lines, in arrival order.
    pub fn lines(&self) -> &[ReplyLine] {
        &self.lines
    }

    /// The final line.
    pub fn final_line(&self) -> &ReplyLine {
        self.lines.last().expect("a Reply is never empty")
    }

    /// The final line's status.
    pub fn status(&self) -> ReplyStatus {
        self.final_line().status
    }

    /// True if the final status is a `2xx`.
    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }

    /// Convert to a result: a non-success final line becomes
    /// [`CmdError::Rejected`] carrying the final payload.
    pub fn into_result(self) -> Result<Reply, CmdError> {
        if self.is_success() {
            Ok(self)
        } else {
            let last = self.final_line();
            Err(CmdError::Rejected {
                status: last.status,
                text: last.payload.clone(),
            })
        }
    }

    /// Iterate the lines as `key=value` pairs.
    pub fn kv_pairs(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.lines.iter().map(ReplyLine::as_kv)
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

    #[test]
    fn ok_reply() {
        let r = Reply::from_lines(vec![ReplyLine::new(ReplyStatus::OK, "OK")]);
        assert!(r.is_success());
        assert_eq!(r.final_line().payload, "OK");
        assert!(r.into_result().is_ok());
    }

    #[test]
    fn rejected_reply() {
        let r = Reply::from_lines(vec![ReplyLine::new(
            ReplyStatus::BAD_AUTH,
            "Authentication failed",
        )]);
        assert!(!r.is_success());
        assert_matches!(
            r.into_result(),
            Err(CmdError::Rejected { status, text })
                if status == ReplyStatus::BAD_AUTH && text == "Authentication failed"
        );
    }

    #[test]
    fn kv_splitting() {
        let r = Reply::from_lines(vec![
            ReplyLine::new(ReplyStatus::OK, "SocksPort=9050"),
            ReplyLine::new(ReplyStatus::OK, "DNSPort"),
            ReplyLine::new(ReplyStatus::OK, "OK"),
        ]);
        let kv: Vec<_> = r.kv_pairs().collect();
        assert_eq!(kv[0], ("SocksPort", Some("9050")));
        assert_eq!(kv[1], ("DNSPort", None));
    }
}
