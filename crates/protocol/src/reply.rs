//! Reply-line grammar for SMTP-style command/response peers.

use std::fmt;

use thiserror::Error;

/// The reply code signalling that the peer is ready to begin the handshake.
///
/// Only this exact value accepts the upgrade. Other nominally positive codes
/// (for example `250`) are treated as refusals by the orchestrator; the strict
/// single-code check mirrors the behaviour of existing STARTTLS clients.
pub const REPLY_CODE_READY: u16 = 220;

/// Maximum length of a single reply line including the terminating CRLF.
///
/// RFC 5321 §4.5.3.1.5 caps reply lines at 512 octets. Lines beyond the cap
/// indicate a peer that does not speak the expected grammar, so readers reject
/// them instead of buffering without bound.
pub const MAX_REPLY_LINE_LEN: usize = 512;

/// Returns the index one past the first LF in `buf`, if any.
///
/// Line-oriented readers use the helper to locate a complete reply line inside
/// their fill buffer before handing it to [`parse_reply_line`].
#[must_use]
pub fn find_line_boundary(buf: &[u8]) -> Option<usize> {
    memchr::memchr(b'\n', buf).map(|index| index + 1)
}

/// Classification of a reply by its leading digit.
///
/// The grouping follows SMTP's reply-code theory: the first digit alone
/// decides whether the command succeeded, needs more input, or failed
/// transiently or permanently.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplySeverity {
    /// `2xx` — the requested action completed.
    PositiveCompletion,
    /// `3xx` — the peer expects further input before completing the action.
    PositiveIntermediate,
    /// `4xx` — the action failed but may succeed if retried later.
    TransientNegative,
    /// `5xx` — the action failed and retrying without change is pointless.
    PermanentNegative,
}

impl ReplySeverity {
    const fn from_code(code: u16) -> Self {
        match code / 100 {
            2 => Self::PositiveCompletion,
            3 => Self::PositiveIntermediate,
            4 => Self::TransientNegative,
            _ => Self::PermanentNegative,
        }
    }
}

/// Errors that can occur while parsing a reply line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplyParseErrorKind {
    /// The line was shorter than the mandatory three-digit code.
    TooShort,
    /// One of the first three bytes was not an ASCII digit.
    InvalidCodeDigit,
    /// The three-digit code fell outside the `200..=599` range the grammar
    /// defines.
    CodeOutOfRange(u16),
    /// The byte after the code was neither a space, a hyphen, nor the end of
    /// the line.
    InvalidSeparator(u8),
    /// The reply text was not valid UTF-8.
    InvalidText,
    /// A continuation line carried a different code than the first line of
    /// the reply.
    CodeMismatch {
        /// Code announced by the first line of the reply.
        expected: u16,
        /// Code observed on the offending continuation line.
        found: u16,
    },
}

/// Error type returned when a reply line cannot be parsed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub struct ReplyParseError {
    kind: ReplyParseErrorKind,
}

impl ReplyParseError {
    pub(crate) const fn new(kind: ReplyParseErrorKind) -> Self {
        Self { kind }
    }

    /// Returns the classification describing why parsing failed.
    #[must_use]
    pub const fn kind(self) -> ReplyParseErrorKind {
        self.kind
    }
}

impl fmt::Display for ReplyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ReplyParseErrorKind::TooShort => {
                f.write_str("reply line is shorter than the three-digit code")
            }
            ReplyParseErrorKind::InvalidCodeDigit => {
                f.write_str("reply code must consist of three ASCII digits")
            }
            ReplyParseErrorKind::CodeOutOfRange(code) => {
                write!(f, "reply code {code} is outside the range 200-599")
            }
            ReplyParseErrorKind::InvalidSeparator(byte) => write!(
                f,
                "reply code must be followed by space or hyphen, found byte 0x{byte:02x}"
            ),
            ReplyParseErrorKind::InvalidText => f.write_str("reply text is not valid UTF-8"),
            ReplyParseErrorKind::CodeMismatch { expected, found } => write!(
                f,
                "continuation line carries code {found} but the reply started with {expected}"
            ),
        }
    }
}

/// A single parsed reply line borrowing the input buffer.
///
/// Multi-line replies consist of zero or more continuation lines (`220-text`)
/// followed by exactly one final line (`220 text` or bare `220`). The parser
/// only classifies a single line; [`ReplyCollector`] stitches lines into a
/// complete [`Reply`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReplyLine<'a> {
    code: u16,
    continuation: bool,
    text: &'a str,
}

impl<'a> ReplyLine<'a> {
    /// Returns the three-digit reply code.
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// Reports whether this line terminates the reply.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        !self.continuation
    }

    /// Returns the text following the code separator, without the CRLF.
    #[must_use]
    pub const fn text(&self) -> &'a str {
        self.text
    }

    /// Returns the severity class derived from the leading digit.
    #[must_use]
    pub const fn severity(&self) -> ReplySeverity {
        ReplySeverity::from_code(self.code)
    }
}

/// Parses a single reply line of the form `DDD[- ]text` with optional CRLF.
///
/// The trailing `\r\n` (or bare `\n`) is stripped before parsing. A line that
/// ends immediately after the code is treated as final with empty text,
/// matching peers that send bare `354` style replies.
///
/// # Errors
///
/// Returns [`ReplyParseError`] when the line is shorter than three bytes, the
/// code is not three digits in `200..=599`, the separator byte is invalid, or
/// the text is not UTF-8.
pub fn parse_reply_line(line: &[u8]) -> Result<ReplyLine<'_>, ReplyParseError> {
    let line = strip_line_terminator(line);

    if line.len() < 3 {
        return Err(ReplyParseError::new(ReplyParseErrorKind::TooShort));
    }

    let mut code: u16 = 0;
    for &byte in &line[..3] {
        if !byte.is_ascii_digit() {
            return Err(ReplyParseError::new(ReplyParseErrorKind::InvalidCodeDigit));
        }
        code = code * 10 + u16::from(byte - b'0');
    }

    if !(200..=599).contains(&code) {
        return Err(ReplyParseError::new(ReplyParseErrorKind::CodeOutOfRange(
            code,
        )));
    }

    let (continuation, text) = match line.get(3) {
        None => (false, &line[3..]),
        Some(b' ') => (false, &line[4..]),
        Some(b'-') => (true, &line[4..]),
        Some(&byte) => {
            return Err(ReplyParseError::new(ReplyParseErrorKind::InvalidSeparator(
                byte,
            )));
        }
    };

    let text = std::str::from_utf8(text)
        .map_err(|_| ReplyParseError::new(ReplyParseErrorKind::InvalidText))?;

    Ok(ReplyLine {
        code,
        continuation,
        text,
    })
}

fn strip_line_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// A complete reply: the final code plus the joined text of all lines.
///
/// The value is immutable after construction and is consumed exactly once by
/// the upgrade orchestrator, which inspects the code and threads the reply
/// back to the caller inside the upgrade outcome.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    /// Builds a reply directly from its parts.
    ///
    /// Primarily useful in tests; production code obtains replies from
    /// [`ReplyCollector`].
    #[must_use]
    pub const fn new(code: u16, text: String) -> Self {
        Self { code, text }
    }

    /// Returns the three-digit reply code.
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// Returns the reply text; lines of a multi-line reply are joined with `\n`.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the severity class derived from the leading digit.
    #[must_use]
    pub const fn severity(&self) -> ReplySeverity {
        ReplySeverity::from_code(self.code)
    }

    /// Reports whether the code is the exact [`REPLY_CODE_READY`] acceptance
    /// signal.
    #[must_use]
    pub const fn is_service_ready(&self) -> bool {
        self.code == REPLY_CODE_READY
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.text)
        }
    }
}

/// Progress reported by [`ReplyCollector::push_line`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReplyProgress {
    /// The pushed line terminated the reply.
    Complete(Reply),
    /// The pushed line was a continuation; more lines are expected.
    More,
}

/// Accumulates reply lines into a complete [`Reply`].
///
/// The collector enforces that every line of one reply repeats the code of
/// its first line, mirroring the multi-line grammar (`250-a`, `250-b`,
/// `250 c`). Completing a reply resets the collector so it can be reused for
/// the next exchange.
#[derive(Debug, Default)]
pub struct ReplyCollector {
    code: Option<u16>,
    text: String,
}

impl ReplyCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports whether a partially accumulated reply is pending.
    #[must_use]
    pub const fn is_mid_reply(&self) -> bool {
        self.code.is_some()
    }

    /// Parses `line` and folds it into the pending reply.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyParseError`] when the line itself is malformed or when
    /// its code differs from the code announced by the first line.
    pub fn push_line(&mut self, line: &[u8]) -> Result<ReplyProgress, ReplyParseError> {
        let parsed = parse_reply_line(line)?;

        if let Some(expected) = self.code {
            if parsed.code() != expected {
                return Err(ReplyParseError::new(ReplyParseErrorKind::CodeMismatch {
                    expected,
                    found: parsed.code(),
                }));
            }
            self.text.push('\n');
        } else {
            self.code = Some(parsed.code());
        }
        self.text.push_str(parsed.text());

        if parsed.is_final() {
            let code = self.code.take().unwrap_or(parsed.code());
            let text = std::mem::take(&mut self.text);
            Ok(ReplyProgress::Complete(Reply { code, text }))
        } else {
            Ok(ReplyProgress::More)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_final_line_with_text() {
        let line = parse_reply_line(b"220 mx.example.org ready\r\n").expect("line parses");
        assert_eq!(line.code(), 220);
        assert!(line.is_final());
        assert_eq!(line.text(), "mx.example.org ready");
        assert_eq!(line.severity(), ReplySeverity::PositiveCompletion);
    }

    #[test]
    fn parses_continuation_line() {
        let line = parse_reply_line(b"250-STARTTLS\r\n").expect("line parses");
        assert_eq!(line.code(), 250);
        assert!(!line.is_final());
        assert_eq!(line.text(), "STARTTLS");
    }

    #[test]
    fn parses_bare_code_as_final_with_empty_text() {
        let line = parse_reply_line(b"354\r\n").expect("line parses");
        assert!(line.is_final());
        assert_eq!(line.text(), "");
        assert_eq!(line.severity(), ReplySeverity::PositiveIntermediate);
    }

    #[test]
    fn rejects_short_lines() {
        let err = parse_reply_line(b"22\r\n").expect_err("two digits cannot parse");
        assert_eq!(err.kind(), ReplyParseErrorKind::TooShort);
    }

    #[test]
    fn rejects_non_digit_codes() {
        let err = parse_reply_line(b"2x0 nope\r\n").expect_err("letters cannot parse");
        assert_eq!(err.kind(), ReplyParseErrorKind::InvalidCodeDigit);
    }

    #[test]
    fn rejects_codes_outside_the_grammar_range() {
        let err = parse_reply_line(b"120 too early\r\n").expect_err("1xx is not a valid reply");
        assert_eq!(err.kind(), ReplyParseErrorKind::CodeOutOfRange(120));

        let err = parse_reply_line(b"600 too late\r\n").expect_err("6xx is not a valid reply");
        assert_eq!(err.kind(), ReplyParseErrorKind::CodeOutOfRange(600));
    }

    #[test]
    fn rejects_invalid_separator() {
        let err = parse_reply_line(b"220:ready\r\n").expect_err("colon separator is invalid");
        assert_eq!(err.kind(), ReplyParseErrorKind::InvalidSeparator(b':'));
    }

    #[test]
    fn rejects_non_utf8_text() {
        let err = parse_reply_line(b"220 \xff\xfe\r\n").expect_err("invalid UTF-8 text");
        assert_eq!(err.kind(), ReplyParseErrorKind::InvalidText);
    }

    #[test]
    fn error_display_names_the_offending_byte() {
        let err = parse_reply_line(b"220:x\r\n").expect_err("colon separator is invalid");
        assert!(
            err.to_string().contains("0x3a"),
            "display should include the offending byte: {err}"
        );
    }

    #[test]
    fn collector_aggregates_multi_line_reply() {
        let mut collector = ReplyCollector::new();
        assert_eq!(
            collector.push_line(b"250-mx.example.org\r\n").expect("parse"),
            ReplyProgress::More
        );
        assert!(collector.is_mid_reply());
        assert_eq!(
            collector.push_line(b"250-STARTTLS\r\n").expect("parse"),
            ReplyProgress::More
        );
        let progress = collector.push_line(b"250 HELP\r\n").expect("parse");
        let ReplyProgress::Complete(reply) = progress else {
            panic!("final line should complete the reply");
        };
        assert_eq!(reply.code(), 250);
        assert_eq!(reply.text(), "mx.example.org\nSTARTTLS\nHELP");
        assert!(!collector.is_mid_reply());
    }

    #[test]
    fn collector_rejects_code_changes_mid_reply() {
        let mut collector = ReplyCollector::new();
        collector.push_line(b"250-first\r\n").expect("parse");
        let err = collector
            .push_line(b"220 second\r\n")
            .expect_err("code change should fail");
        assert_eq!(
            err.kind(),
            ReplyParseErrorKind::CodeMismatch {
                expected: 250,
                found: 220
            }
        );
    }

    #[test]
    fn collector_resets_after_completion() {
        let mut collector = ReplyCollector::new();
        collector.push_line(b"220 ready\r\n").expect("parse");
        let progress = collector.push_line(b"502 nope\r\n").expect("parse");
        let ReplyProgress::Complete(reply) = progress else {
            panic!("single final line should complete");
        };
        assert_eq!(reply.code(), 502);
        assert_eq!(reply.severity(), ReplySeverity::PermanentNegative);
    }

    #[test]
    fn line_boundary_points_one_past_the_lf() {
        assert_eq!(find_line_boundary(b"220 ok\r\nrest"), Some(8));
        assert_eq!(find_line_boundary(b"no newline"), None);
    }

    proptest! {
        #[test]
        fn valid_final_lines_round_trip(
            code in 200u16..=599,
            text in "[ -~]{0,64}",
        ) {
            let wire = format!("{code} {text}\r\n");
            let line = parse_reply_line(wire.as_bytes()).expect("generated line parses");
            prop_assert_eq!(line.code(), code);
            prop_assert!(line.is_final());
            prop_assert_eq!(line.text(), text.as_str());
        }

        #[test]
        fn continuation_flag_follows_separator(
            code in 200u16..=599,
            text in "[ -~]{0,32}",
            cont in proptest::bool::ANY,
        ) {
            let sep = if cont { '-' } else { ' ' };
            let wire = format!("{code}{sep}{text}\r\n");
            let line = parse_reply_line(wire.as_bytes()).expect("generated line parses");
            prop_assert_eq!(line.is_final(), !cont);
        }

        #[test]
        fn out_of_range_codes_never_parse(code in 0u16..200) {
            let wire = format!("{code:03} text\r\n");
            let err = parse_reply_line(wire.as_bytes()).expect_err("sub-200 codes are invalid");
            prop_assert_eq!(err.kind(), ReplyParseErrorKind::CodeOutOfRange(code));
        }
    }
}
