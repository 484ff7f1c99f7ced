//! Outbound command encoding for the upgrade exchange.

use thiserror::Error;

/// The in-band command requesting the switch to an encrypted transport.
pub const STARTTLS_COMMAND: &str = "STARTTLS";

/// Errors produced when an outbound command cannot be encoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum CommandError {
    /// The command string was empty.
    #[error("command must not be empty")]
    Empty,
    /// The command string contained a CR or LF byte.
    ///
    /// Allowing either would let a single logical command terminate early and
    /// smuggle a second line onto the plaintext channel.
    #[error("command must not contain CR or LF bytes")]
    EmbeddedLineBreak,
}

/// Encodes a command as a single CRLF-terminated line.
///
/// # Errors
///
/// Returns [`CommandError`] for empty commands or commands containing CR/LF.
///
/// # Examples
///
/// ```
/// use oc_starttls_protocol::{STARTTLS_COMMAND, encode_command};
///
/// let wire = encode_command(STARTTLS_COMMAND).expect("canonical command encodes");
/// assert_eq!(wire, b"STARTTLS\r\n");
/// ```
pub fn encode_command(command: &str) -> Result<Vec<u8>, CommandError> {
    if command.is_empty() {
        return Err(CommandError::Empty);
    }
    if command.bytes().any(|byte| byte == b'\r' || byte == b'\n') {
        return Err(CommandError::EmbeddedLineBreak);
    }

    let mut wire = Vec::with_capacity(command.len() + 2);
    wire.extend_from_slice(command.as_bytes());
    wire.extend_from_slice(b"\r\n");
    Ok(wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_command_with_crlf() {
        assert_eq!(
            encode_command("STARTTLS").expect("encodes"),
            b"STARTTLS\r\n"
        );
    }

    #[test]
    fn rejects_empty_command() {
        assert_eq!(encode_command(""), Err(CommandError::Empty));
    }

    #[test]
    fn rejects_embedded_line_breaks() {
        assert_eq!(
            encode_command("STARTTLS\r\nQUIT"),
            Err(CommandError::EmbeddedLineBreak)
        );
        assert_eq!(
            encode_command("STARTTLS\nQUIT"),
            Err(CommandError::EmbeddedLineBreak)
        );
    }
}
