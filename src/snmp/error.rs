//! Error types for the AgentX codec and session.

use std::io;

use super::pdu::PduType;

/// Errors that can occur during AgentX protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentXError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Truncated buffer, length mismatch or an invalid tag inside a message.
    #[error("Malformed PDU: {0}")]
    MalformedPdu(String),
    #[error("Unsupported AgentX version: {0}")]
    UnsupportedVersion(u8),
    #[error("Unknown PDU type: {0}")]
    UnknownPduType(u8),
    #[error("Unexpected PDU type: {0:?}")]
    UnexpectedPdu(PduType),
    #[error("Master agent returned error: res_error={0}")]
    ResponseError(u16),
    #[error("Invalid AgentX address {0:?}")]
    InvalidAddress(String),
    /// An OID with more sub-identifiers than one AgentX OID can carry.
    #[error("OID of {0} sub-identifiers cannot be encoded")]
    OidTooLong(usize),
}

impl AgentXError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        AgentXError::MalformedPdu(msg.into())
    }

    /// True when the error was raised while parsing the 20-byte header.
    ///
    /// Header-level failures abort the message; payload-level failures can
    /// still be answered with a parseError response.
    pub fn is_header_error(&self) -> bool {
        matches!(
            self,
            AgentXError::UnsupportedVersion(_) | AgentXError::UnknownPduType(_)
        )
    }
}
