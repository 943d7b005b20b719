//! KRPC error codes and decode failures.

use thiserror::Error;

/// The protocol-defined error codes carried in `e` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ErrorCode {
    /// 201: generic error.
    Generic = 201,
    /// 202: server error.
    Server = 202,
    /// 203: protocol error (malformed packet, bad arguments, bad token).
    Protocol = 203,
    /// 204: method unknown.
    MethodUnknown = 204,
}

impl ErrorCode {
    /// Numeric wire value.
    pub const fn code(self) -> i64 {
        self as i64
    }

    /// Classify a wire value.
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            201 => Some(Self::Generic),
            202 => Some(Self::Server),
            203 => Some(Self::Protocol),
            204 => Some(Self::MethodUnknown),
            _ => None,
        }
    }
}

/// Failures while decoding an inbound datagram into a [`crate::krpc::Message`].
///
/// Where the transaction id was already recovered before the failure, it is
/// carried along so the handler can still send a 203 reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KrpcError {
    /// The datagram is not valid bencode at all.
    #[error("not bencode: {0}")]
    Bencode(#[from] dredge_bencode::BencodeError),

    /// A required field is missing or has the wrong kind or width.
    #[error("missing or invalid field `{field}`")]
    InvalidField {
        /// The offending field.
        field: &'static str,
        /// Echoed transaction id, when recoverable.
        tx: Option<Vec<u8>>,
    },

    /// `y` is not one of `q`, `r`, `e`.
    #[error("unknown message type")]
    UnknownType {
        /// Echoed transaction id, when recoverable.
        tx: Option<Vec<u8>>,
    },

    /// A query named a method we do not implement.
    #[error("unknown method `{method}`")]
    UnknownMethod {
        /// The unrecognized method name (lossy UTF-8).
        method: String,
        /// Echoed transaction id.
        tx: Vec<u8>,
    },
}

impl KrpcError {
    /// The transaction id to echo in an error reply, if one was recovered.
    pub fn recoverable_tx(&self) -> Option<&[u8]> {
        match self {
            KrpcError::Bencode(_) => None,
            KrpcError::InvalidField { tx, .. } | KrpcError::UnknownType { tx } => tx.as_deref(),
            KrpcError::UnknownMethod { tx, .. } => Some(tx),
        }
    }
}
