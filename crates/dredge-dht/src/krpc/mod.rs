//! The KRPC wire model.
//!
//! KRPC messages are bencoded dictionaries with a transaction id `t`, a
//! type tag `y` (`q`/`r`/`e`), and a method-specific payload. Decoding is
//! a single match on `y`, then on `q` for queries — messages become plain
//! tagged variants with no class hierarchy.

mod codec;
mod compact;
mod error;
mod message;

pub use compact::{
    decode_contacts_v4, decode_contacts_v6, decode_peer, encode_contacts_v4, encode_contacts_v6,
    encode_peer, COMPACT_V4_LEN, COMPACT_V6_LEN, PEER_V4_LEN, PEER_V6_LEN,
};
pub use error::{ErrorCode, KrpcError};
pub use message::{ErrorBody, Message, Query, QueryBody, Response, TxId};
