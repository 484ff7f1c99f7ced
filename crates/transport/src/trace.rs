//! Feature-gated tracing hooks for the upgrade sequence.
//!
//! Every hook has a no-op twin compiled when the `tracing` feature is off,
//! so call sites stay unconditional. Hooks log negotiation milestones and
//! outcomes only; credentials, key material, and fingerprint values never
//! reach a log line.

#[cfg(feature = "tracing")]
use crate::session::SessionState;
#[cfg(feature = "tracing")]
use oc_starttls_protocol::Reply;

#[cfg(feature = "tracing")]
const TRACE_TARGET: &str = "starttls::upgrade";

#[cfg(feature = "tracing")]
pub(crate) fn trace_command_sent(command: &str) {
    tracing::debug!(target: TRACE_TARGET, command, "negotiation command sent");
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn trace_command_sent(_command: &str) {}

#[cfg(feature = "tracing")]
pub(crate) fn trace_reply_received(reply: &Reply) {
    tracing::debug!(
        target: TRACE_TARGET,
        code = reply.code(),
        "negotiation reply received"
    );
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn trace_reply_received(_reply: &oc_starttls_protocol::Reply) {}

#[cfg(feature = "tracing")]
pub(crate) fn trace_refused(code: u16) {
    tracing::debug!(
        target: TRACE_TARGET,
        code,
        "peer refused the upgrade; session continues in plaintext"
    );
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn trace_refused(_code: u16) {}

#[cfg(feature = "tracing")]
pub(crate) fn trace_handshake_started() {
    tracing::debug!(target: TRACE_TARGET, "handshake started on detached transport");
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn trace_handshake_started() {}

#[cfg(feature = "tracing")]
pub(crate) fn trace_secured() {
    tracing::info!(target: TRACE_TARGET, "transport secured; plaintext phase over");
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn trace_secured() {}

#[cfg(feature = "tracing")]
pub(crate) fn trace_failed(state: SessionState, error: &dyn std::fmt::Display) {
    tracing::warn!(
        target: TRACE_TARGET,
        %state,
        %error,
        "upgrade failed; session is unusable"
    );
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn trace_failed(
    _state: crate::session::SessionState,
    _error: &dyn std::fmt::Display,
) {
}
