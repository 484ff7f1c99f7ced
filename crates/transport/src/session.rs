//! The line-oriented session and its swappable transport cell.
//!
//! The session owns exactly one transport at a time through
//! [`TransportCell`], an explicit reference cell that is only ever replaced
//! through two operations: detaching the plaintext stream for the handshake
//! and installing the secured channel afterwards. Nothing else in the crate
//! assigns to it, which is what makes the swap atomic from the protocol's
//! point of view.
//!
//! Reply lines are read through a replay-style buffer: bytes pulled from the
//! transport while hunting for a line terminator are drained before the
//! transport is consulted again, so plaintext consumed ahead of the
//! negotiation reply is never re-delivered or dropped. The buffer must be
//! empty before the raw stream may be detached — any residue would be bytes
//! the peer sent after its reply, and handing them to the handshake engine
//! (or worse, interpreting handshake records as protocol lines) is exactly
//! the interleaving the upgrade must rule out.

use std::collections::TryReserveError;
use std::fmt;
use std::io::{self, Read, Write};

use oc_starttls_protocol::{
    MAX_REPLY_LINE_LEN, Reply, ReplyCollector, ReplyProgress, encode_command, find_line_boundary,
};

use crate::handshake::SecureChannel;

/// Progress of a session through one upgrade attempt and beyond.
///
/// `Plaintext` is the resting state; the intermediate stations are owned by
/// the orchestrator while an attempt is in flight. `Secured` and `Failed`
/// are terminal: a secured session never negotiates again and a failed one
/// must not carry further protocol traffic. A refused negotiation ends the
/// attempt and returns the session to `Plaintext`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// The session speaks the base protocol in the clear.
    Plaintext,
    /// The upgrade command is on the wire; awaiting the peer's reply.
    NegotiationSent,
    /// The peer answered with the ready code; validation comes next.
    NegotiationAccepted,
    /// The handshake engine owns the raw socket.
    Handshaking,
    /// The transport swap completed; all traffic flows through the secured
    /// channel.
    Secured,
    /// The attempt failed past the point of recovery; the session is
    /// unusable.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plaintext => "plaintext",
            Self::NegotiationSent => "negotiation-sent",
            Self::NegotiationAccepted => "negotiation-accepted",
            Self::Handshaking => "handshaking",
            Self::Secured => "secured",
            Self::Failed => "failed",
        })
    }
}

fn map_reserve_error_for_io(err: TryReserveError) -> io::Error {
    io::Error::new(
        io::ErrorKind::OutOfMemory,
        format!("failed to reserve memory for reply buffer: {err}"),
    )
}

/// The transport a session is currently bound to.
enum ActiveTransport<S> {
    /// The original plaintext stream.
    Plain(S),
    /// The secured channel produced by a successful handshake.
    Secured(Box<dyn SecureChannel>),
    /// No transport; transiently while the handshake engine owns the raw
    /// stream, or permanently after close or a failed attempt.
    Detached,
}

/// Explicit owner of a session's active byte stream.
///
/// All reads and writes route through the cell, so swapping its contents
/// atomically redirects the session's traffic. The two mutating operations —
/// detaching the plaintext stream and installing the secured channel — are
/// crate-private: only the upgrade orchestrator drives them, and only in
/// that order.
pub struct TransportCell<S> {
    active: ActiveTransport<S>,
}

impl<S> TransportCell<S> {
    /// Wraps a plaintext stream.
    #[must_use]
    pub const fn new(stream: S) -> Self {
        Self {
            active: ActiveTransport::Plain(stream),
        }
    }

    /// Reports whether the secured channel is installed.
    #[must_use]
    pub const fn is_secured(&self) -> bool {
        matches!(self.active, ActiveTransport::Secured(_))
    }

    /// Reports whether any transport is bound at all.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        !matches!(self.active, ActiveTransport::Detached)
    }

    /// Takes the plaintext stream out of the cell, leaving it detached.
    ///
    /// Fails with [`io::ErrorKind::NotConnected`] when the cell holds no
    /// plaintext stream (already secured, or already detached).
    pub(crate) fn detach_plain(&mut self) -> io::Result<S> {
        match std::mem::replace(&mut self.active, ActiveTransport::Detached) {
            ActiveTransport::Plain(stream) => Ok(stream),
            other => {
                self.active = other;
                Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no plaintext transport to detach",
                ))
            }
        }
    }

    /// Installs the secured channel. Only legal while detached.
    pub(crate) fn install_secured(&mut self, channel: Box<dyn SecureChannel>) -> io::Result<()> {
        if self.is_attached() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a transport is already installed",
            ));
        }
        self.active = ActiveTransport::Secured(channel);
        Ok(())
    }

    /// Closes whichever transport is bound and leaves the cell detached.
    ///
    /// A secured channel is closed through [`SecureChannel::close`], which
    /// owns closing the underlying socket exactly once. A plaintext stream
    /// is simply dropped. Repeated calls are no-ops.
    pub fn close(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.active, ActiveTransport::Detached) {
            ActiveTransport::Plain(stream) => {
                drop(stream);
                Ok(())
            }
            ActiveTransport::Secured(mut channel) => channel.close(),
            ActiveTransport::Detached => Ok(()),
        }
    }

    fn not_connected() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "session transport is detached")
    }
}

impl<S: Read> Read for TransportCell<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.active {
            ActiveTransport::Plain(stream) => stream.read(buf),
            ActiveTransport::Secured(channel) => channel.read(buf),
            ActiveTransport::Detached => Err(Self::not_connected()),
        }
    }
}

impl<S: Write> Write for TransportCell<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.active {
            ActiveTransport::Plain(stream) => stream.write(buf),
            ActiveTransport::Secured(channel) => channel.write(buf),
            ActiveTransport::Detached => Err(Self::not_connected()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.active {
            ActiveTransport::Plain(stream) => stream.flush(),
            ActiveTransport::Secured(channel) => channel.flush(),
            ActiveTransport::Detached => Err(Self::not_connected()),
        }
    }
}

/// Bytes pulled from the transport but not yet delivered to the caller.
#[derive(Default)]
struct ReadBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl ReadBuffer {
    fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn len(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    fn consume(&mut self, amount: usize) {
        self.pos = (self.pos + amount).min(self.data.len());
        if self.is_empty() {
            self.data.clear();
            self.pos = 0;
        }
    }

    fn extend(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.data
            .try_reserve(bytes.len())
            .map_err(map_reserve_error_for_io)?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Copies buffered bytes into `buf`, returning how many were delivered.
    fn copy_into(&mut self, buf: &mut [u8]) -> usize {
        let remaining = self.remaining();
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.consume(count);
        count
    }
}

/// A minimal blocking line-oriented protocol session.
///
/// The session pairs a [`TransportCell`] with a replay-style read buffer and
/// exposes the command/reply primitives the upgrade orchestrator needs. It
/// is deliberately not a full protocol client — greeting, capability
/// discovery, and the rest of the base protocol belong to the caller — but
/// its [`Read`]/[`Write`] implementations make it usable as the underlying
/// stream of one.
///
/// Not safe for concurrent use: the protocol is strictly synchronous
/// request/response and no internal locking is provided. Callers must
/// serialize all access, including the upgrade itself.
pub struct LineSession<S> {
    transport: TransportCell<S>,
    buffer: ReadBuffer,
    collector: ReplyCollector,
    state: SessionState,
}

impl<S: Read + Write> LineSession<S> {
    /// Wraps an established plaintext stream.
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self {
            transport: TransportCell::new(stream),
            buffer: ReadBuffer::default(),
            collector: ReplyCollector::new(),
            state: SessionState::Plaintext,
        }
    }

    /// Returns the session's current upgrade state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) const fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Reports whether traffic currently flows through the secured channel.
    #[must_use]
    pub const fn is_secured(&self) -> bool {
        self.transport.is_secured()
    }

    /// Returns the number of bytes read from the transport but not yet
    /// delivered to the caller.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Sends a single command line and flushes it.
    ///
    /// # Errors
    ///
    /// Command-encoding failures surface as [`io::ErrorKind::InvalidInput`];
    /// transport failures are propagated unchanged.
    pub fn send_command(&mut self, command: &str) -> io::Result<()> {
        let wire = encode_command(command)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        self.transport.write_all(&wire)?;
        self.transport.flush()
    }

    /// Reads exactly one (possibly multi-line) reply.
    ///
    /// Blocks until the final line of the reply arrives. Parse failures
    /// surface as [`io::ErrorKind::InvalidData`]; a connection that closes
    /// mid-reply surfaces as [`io::ErrorKind::UnexpectedEof`].
    pub fn read_reply(&mut self) -> io::Result<Reply> {
        let mut line = Vec::new();
        loop {
            self.read_line_into(&mut line)?;
            let progress = self
                .collector
                .push_line(&line)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            if let ReplyProgress::Complete(reply) = progress {
                return Ok(reply);
            }
        }
    }

    /// Closes the active transport.
    ///
    /// When the session is secured this closes the secure channel, which in
    /// turn closes the underlying socket exactly once. Idempotent.
    pub fn close(&mut self) -> io::Result<()> {
        self.transport.close()
    }

    /// Hands the raw plaintext stream to the caller for the handshake.
    ///
    /// Refuses when buffered plaintext would be stranded: any byte still in
    /// the read buffer arrived after the negotiation reply and must not be
    /// mistaken for handshake data.
    pub(crate) fn detach_plain(&mut self) -> io::Result<S> {
        if !self.buffer.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "buffered plaintext follows the negotiation reply",
            ));
        }
        self.transport.detach_plain()
    }

    pub(crate) fn install_secured(&mut self, channel: Box<dyn SecureChannel>) -> io::Result<()> {
        self.transport.install_secured(channel)
    }

    /// Copies the next complete line (including its LF) into `line`.
    fn read_line_into(&mut self, line: &mut Vec<u8>) -> io::Result<()> {
        line.clear();
        loop {
            if let Some(end) = find_line_boundary(self.buffer.remaining()) {
                if end > MAX_REPLY_LINE_LEN {
                    return Err(reply_line_too_long());
                }
                line.try_reserve(end).map_err(map_reserve_error_for_io)?;
                line.extend_from_slice(&self.buffer.remaining()[..end]);
                self.buffer.consume(end);
                return Ok(());
            }

            if self.buffer.len() > MAX_REPLY_LINE_LEN {
                return Err(reply_line_too_long());
            }

            let mut chunk = [0u8; 256];
            match self.transport.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed while reading reply",
                    ));
                }
                Ok(read) => self.buffer.extend(&chunk[..read])?,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }
}

fn reply_line_too_long() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "reply line exceeds the 512-octet protocol limit",
    )
}

impl<S: Read + Write> Read for LineSession<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Replay buffered bytes first so nothing consumed while scanning for
        // reply lines is dropped or reordered.
        let copied = self.buffer.copy_into(buf);
        if copied > 0 {
            return Ok(copied);
        }

        self.transport.read(buf)
    }
}

impl<S: Read + Write> Write for LineSession<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.transport.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Debug)]
    struct Loopback {
        reader: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Loopback {
        fn new(input: &[u8]) -> Self {
            Self {
                reader: Cursor::new(input.to_vec()),
                written: Vec::new(),
            }
        }
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reader.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Delivers its input one byte per read to exercise partial-line fills.
    struct Trickle {
        input: Vec<u8>,
        pos: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.input.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.input[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sends_command_with_crlf_and_flush() {
        let mut session = LineSession::new(Loopback::new(b""));
        session.send_command("STARTTLS").expect("command sends");
        let stream = session.detach_plain().expect("no buffered bytes");
        assert_eq!(stream.written, b"STARTTLS\r\n");
    }

    #[test]
    fn rejects_commands_with_line_breaks() {
        let mut session = LineSession::new(Loopback::new(b""));
        let err = session
            .send_command("STARTTLS\r\nQUIT")
            .expect_err("injection must be rejected");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn reads_single_line_reply() {
        let mut session = LineSession::new(Loopback::new(b"220 Ready to start TLS\r\n"));
        let reply = session.read_reply().expect("reply parses");
        assert_eq!(reply.code(), 220);
        assert_eq!(reply.text(), "Ready to start TLS");
    }

    #[test]
    fn reads_multi_line_reply_across_partial_fills() {
        let mut session = LineSession::new(Trickle {
            input: b"250-mx.example.org\r\n250-STARTTLS\r\n250 HELP\r\n".to_vec(),
            pos: 0,
        });
        let reply = session.read_reply().expect("reply parses");
        assert_eq!(reply.code(), 250);
        assert_eq!(reply.text(), "mx.example.org\nSTARTTLS\nHELP");
    }

    #[test]
    fn buffered_bytes_are_replayed_exactly_once() {
        let mut session = LineSession::new(Loopback::new(b"220 ok\r\napplication bytes"));
        let reply = session.read_reply().expect("reply parses");
        assert_eq!(reply.code(), 220);
        assert_eq!(session.buffered_len(), "application bytes".len());

        let mut replay = Vec::new();
        session.read_to_end(&mut replay).expect("drain succeeds");
        assert_eq!(replay, b"application bytes");
        assert_eq!(session.buffered_len(), 0);
    }

    #[test]
    fn eof_mid_reply_is_unexpected_eof() {
        let mut session = LineSession::new(Loopback::new(b"220 no terminator"));
        let err = session.read_reply().expect_err("truncated reply fails");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn malformed_reply_is_invalid_data() {
        let mut session = LineSession::new(Loopback::new(b"not a reply\r\n"));
        let err = session.read_reply().expect_err("garbage fails");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_reply_line_is_rejected() {
        let mut wire = vec![b'2', b'2', b'0', b' '];
        wire.resize(600, b'x');
        wire.extend_from_slice(b"\r\n");
        let mut session = LineSession::new(Loopback::new(&wire));
        let err = session.read_reply().expect_err("oversized line fails");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn detach_refuses_while_plaintext_is_buffered() {
        let mut session = LineSession::new(Loopback::new(b"220 ok\r\npipelined"));
        session.read_reply().expect("reply parses");
        let err = session
            .detach_plain()
            .expect_err("buffered plaintext must block the detach");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn cell_refuses_double_detach() {
        let mut cell = TransportCell::new(Loopback::new(b""));
        cell.detach_plain().expect("first detach succeeds");
        let err = cell.detach_plain().expect_err("second detach fails");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn detached_cell_reports_not_connected() {
        let mut cell = TransportCell::new(Loopback::new(b""));
        cell.detach_plain().expect("detach succeeds");
        let err = cell.read(&mut [0u8; 4]).expect_err("read fails");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        let err = cell.write(b"x").expect_err("write fails");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn close_is_idempotent() {
        let mut session = LineSession::new(Loopback::new(b""));
        session.close().expect("first close succeeds");
        session.close().expect("second close is a no-op");
        assert!(!session.is_secured());
    }
}
