//! Message structures.

use std::fmt;
use std::net::SocketAddr;

use crate::domain::{Contact, InfoHash, NodeId};
use crate::krpc::ErrorCode;

/// A transaction id as it appears on the wire.
///
/// We allocate 2-byte big-endian counters for our own queries, but remote
/// peers may use any short byte string; inbound ids are echoed untouched.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TxId(Vec<u8>);

impl TxId {
    /// Wrap raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Our canonical 2-byte big-endian form.
    pub fn from_u16(tx: u16) -> Self {
        Self(tx.to_be_bytes().to_vec())
    }

    /// Interpret as a 2-byte big-endian counter, if it is one.
    pub fn as_u16(&self) -> Option<u16> {
        let arr: [u8; 2] = self.0.as_slice().try_into().ok()?;
        Some(u16::from_be_bytes(arr))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId(0x{})", hex::encode(&self.0))
    }
}

/// A decoded KRPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `y = q`
    Query {
        /// Transaction id to echo.
        tx: TxId,
        /// The query payload.
        query: Query,
    },
    /// `y = r`
    Response {
        /// Echoed transaction id.
        tx: TxId,
        /// The response payload.
        response: Response,
    },
    /// `y = e`
    Error {
        /// Echoed transaction id.
        tx: TxId,
        /// The error payload.
        error: ErrorBody,
    },
}

/// A query: the sender id plus the method-specific arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Sender's claimed node id.
    pub id: NodeId,
    /// Method and arguments.
    pub body: QueryBody,
}

/// Method-specific query arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryBody {
    /// Liveness check.
    Ping,
    /// Ask for the k closest contacts to `target`.
    FindNode {
        /// The id being searched for.
        target: NodeId,
    },
    /// Ask for peers of `info_hash`, or the closest contacts.
    GetPeers {
        /// The swarm being searched for.
        info_hash: InfoHash,
    },
    /// Register the sender as a peer of `info_hash`.
    AnnouncePeer {
        /// The swarm being announced.
        info_hash: InfoHash,
        /// Advertised peer port; ignored when `implied_port` is set.
        port: u16,
        /// Non-zero on the wire: store the UDP source port instead.
        implied_port: bool,
        /// Write token from an earlier `get_peers` response.
        token: Vec<u8>,
    },
    /// Ask for a sample of known infohashes (BEP-51).
    SampleInfohashes {
        /// Sampling locality hint.
        target: NodeId,
    },
}

impl QueryBody {
    /// The wire method name.
    pub fn method(&self) -> &'static str {
        match self {
            QueryBody::Ping => "ping",
            QueryBody::FindNode { .. } => "find_node",
            QueryBody::GetPeers { .. } => "get_peers",
            QueryBody::AnnouncePeer { .. } => "announce_peer",
            QueryBody::SampleInfohashes { .. } => "sample_infohashes",
        }
    }
}

/// A response payload.
///
/// KRPC responses are not self-describing — which optional fields are
/// present depends on the query method — so this is a bag of optionals
/// around the mandatory responder id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    /// Responder's node id (authoritative for the routing table).
    pub id: NodeId,
    /// Compact IPv4 contacts (`nodes`).
    pub nodes: Vec<Contact>,
    /// Compact IPv6 contacts (`nodes6`).
    pub nodes6: Vec<Contact>,
    /// Compact peer endpoints (`values`).
    pub values: Vec<SocketAddr>,
    /// Announce write token.
    pub token: Option<Vec<u8>>,
    /// Sampled infohashes (BEP-51).
    pub samples: Vec<InfoHash>,
    /// Total infohash count claimed by the sampler (BEP-51 `num`).
    pub num: Option<i64>,
}

impl Response {
    /// A minimal `{id}` response (ping / announce_peer).
    pub fn only_id(id: NodeId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

/// An error payload: `[code, message]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    /// Numeric code, carried verbatim.
    pub code: i64,
    /// Human-readable description.
    pub message: String,
}

impl ErrorBody {
    /// Build from a protocol-defined code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
        }
    }

    /// Classify the code, when it is one of the defined ones.
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}
