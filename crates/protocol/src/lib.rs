#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

//! # Overview
//!
//! `oc_starttls_protocol` houses the wire grammar shared by the STARTTLS
//! upgrade flow: the three-digit reply lines produced by SMTP-style
//! command/response peers and the CRLF-terminated command encoding used to
//! request the transport upgrade. The base protocol client owns the session;
//! this crate only provides the parsing and encoding the upgrade orchestrator
//! needs to interpret that client's traffic.
//!
//! # Design
//!
//! The API mirrors the two directions of the exchange: inbound,
//! [`parse_reply_line`] classifies single reply lines by severity digit and
//! [`ReplyCollector`] aggregates multi-line replies into an immutable
//! [`Reply`]; outbound, [`encode_command`] produces CRLF-terminated command
//! lines and [`STARTTLS_COMMAND`] names the canonical upgrade command.
//!
//! Parsing is allocation-free: [`ReplyLine`] borrows the input buffer, and
//! only the aggregated [`Reply`] owns its text.
//!
//! # Invariants
//!
//! - Reply codes are exactly three ASCII digits in `200..=599`; anything else
//!   is a parse error, never a lenient acceptance.
//! - Every line of a multi-line reply must repeat the code of its first line.
//! - Encoded commands never contain embedded CR or LF bytes, so a single
//!   logical command can never smuggle a second line onto the wire.
//!
//! # Errors
//!
//! Parsers return [`ReplyParseError`] carrying a [`ReplyParseErrorKind`]
//! classification; encoding returns [`CommandError`]. Both are plain data and
//! implement [`std::error::Error`], leaving I/O concerns to the transport
//! crate.
//!
//! # Examples
//!
//! Parse the acceptance reply for a `STARTTLS` exchange.
//!
//! ```
//! use oc_starttls_protocol::{REPLY_CODE_READY, parse_reply_line};
//!
//! let line = parse_reply_line(b"220 Ready to start TLS\r\n").expect("valid reply line");
//! assert_eq!(line.code(), REPLY_CODE_READY);
//! assert!(line.is_final());
//! assert_eq!(line.text(), "Ready to start TLS");
//! ```

mod command;
mod reply;

pub use command::{CommandError, STARTTLS_COMMAND, encode_command};
pub use reply::{
    MAX_REPLY_LINE_LEN, REPLY_CODE_READY, Reply, ReplyCollector, ReplyLine, ReplyParseError,
    ReplyParseErrorKind, ReplyProgress, ReplySeverity, find_line_boundary, parse_reply_line,
};
