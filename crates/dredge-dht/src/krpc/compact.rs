//! Compact contact and peer encodings.
//!
//! Contacts pack as `20-byte id || ip || 2-byte BE port`, concatenated
//! without framing: 26 bytes per IPv4 contact, 38 per IPv6. Peer values
//! are bare `ip || port` strings of 6 or 18 bytes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::domain::{Contact, NodeId, ID_LEN};

/// Packed width of one IPv4 contact.
pub const COMPACT_V4_LEN: usize = ID_LEN + 6;
/// Packed width of one IPv6 contact.
pub const COMPACT_V6_LEN: usize = ID_LEN + 18;
/// Packed width of one IPv4 peer value.
pub const PEER_V4_LEN: usize = 6;
/// Packed width of one IPv6 peer value.
pub const PEER_V6_LEN: usize = 18;

/// Pack the IPv4 contacts of `contacts`, skipping other families.
pub fn encode_contacts_v4<'a>(contacts: impl IntoIterator<Item = &'a Contact>) -> Vec<u8> {
    let mut out = Vec::new();
    for contact in contacts {
        if let IpAddr::V4(v4) = contact.addr.ip() {
            out.extend_from_slice(contact.id.as_bytes());
            out.extend_from_slice(&v4.octets());
            out.extend_from_slice(&contact.addr.port().to_be_bytes());
        }
    }
    out
}

/// Pack the IPv6 contacts of `contacts`, skipping other families.
pub fn encode_contacts_v6<'a>(contacts: impl IntoIterator<Item = &'a Contact>) -> Vec<u8> {
    let mut out = Vec::new();
    for contact in contacts {
        if let IpAddr::V6(v6) = contact.addr.ip() {
            out.extend_from_slice(contact.id.as_bytes());
            out.extend_from_slice(&v6.octets());
            out.extend_from_slice(&contact.addr.port().to_be_bytes());
        }
    }
    out
}

/// Unpack a `nodes` blob. `None` unless the length is a whole number of
/// 26-byte records.
pub fn decode_contacts_v4(bytes: &[u8]) -> Option<Vec<Contact>> {
    if bytes.len() % COMPACT_V4_LEN != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(bytes.len() / COMPACT_V4_LEN);
    for chunk in bytes.chunks_exact(COMPACT_V4_LEN) {
        let id = NodeId::from_slice(&chunk[..ID_LEN]).expect("chunk width fixed");
        let octets: [u8; 4] = chunk[ID_LEN..ID_LEN + 4].try_into().expect("chunk width fixed");
        let port = u16::from_be_bytes([chunk[ID_LEN + 4], chunk[ID_LEN + 5]]);
        out.push(Contact::new(
            id,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port),
        ));
    }
    Some(out)
}

/// Unpack a `nodes6` blob. `None` unless the length is a whole number of
/// 38-byte records.
pub fn decode_contacts_v6(bytes: &[u8]) -> Option<Vec<Contact>> {
    if bytes.len() % COMPACT_V6_LEN != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(bytes.len() / COMPACT_V6_LEN);
    for chunk in bytes.chunks_exact(COMPACT_V6_LEN) {
        let id = NodeId::from_slice(&chunk[..ID_LEN]).expect("chunk width fixed");
        let octets: [u8; 16] = chunk[ID_LEN..ID_LEN + 16]
            .try_into()
            .expect("chunk width fixed");
        let port = u16::from_be_bytes([chunk[ID_LEN + 16], chunk[ID_LEN + 17]]);
        out.push(Contact::new(
            id,
            SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port),
        ));
    }
    Some(out)
}

/// Pack one peer endpoint as a `values` entry.
pub fn encode_peer(addr: SocketAddr) -> Vec<u8> {
    let mut out = Vec::with_capacity(PEER_V6_LEN);
    match addr.ip() {
        IpAddr::V4(v4) => out.extend_from_slice(&v4.octets()),
        IpAddr::V6(v6) => out.extend_from_slice(&v6.octets()),
    }
    out.extend_from_slice(&addr.port().to_be_bytes());
    out
}

/// Unpack one `values` entry of 6 or 18 bytes.
pub fn decode_peer(bytes: &[u8]) -> Option<SocketAddr> {
    match bytes.len() {
        PEER_V4_LEN => {
            let octets: [u8; 4] = bytes[..4].try_into().expect("length checked");
            let port = u16::from_be_bytes([bytes[4], bytes[5]]);
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        PEER_V6_LEN => {
            let octets: [u8; 16] = bytes[..16].try_into().expect("length checked");
            let port = u16::from_be_bytes([bytes[16], bytes[17]]);
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => None,
    }
}
