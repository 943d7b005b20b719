//! Bencoded routing-table snapshots.
//!
//! Schema: `{"own_id": <20 bytes>, "nodes": [{"id": <20 bytes>,
//! "ip": <4 or 16 bytes>, "port": <int>, "last_seen": <age ms>}, ...]}`.
//! Timestamps are process-relative, so `last_seen` is persisted as an age
//! at save time. Loading validates the schema strictly and never modifies
//! the file on mismatch.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use dredge_bencode::Value;

use crate::domain::node::Contact;
use crate::domain::routing::RoutingTable;
use crate::domain::{NodeId, SnapshotError};
use crate::ports::Timestamp;

impl RoutingTable {
    /// Serialize the current members to the snapshot document.
    pub fn snapshot(&self, now: Timestamp) -> Vec<u8> {
        let nodes: Vec<Value> = self
            .entries()
            .map(|entry| {
                let ip_bytes: Vec<u8> = match entry.addr.ip() {
                    IpAddr::V4(v4) => v4.octets().to_vec(),
                    IpAddr::V6(v6) => v6.octets().to_vec(),
                };
                Value::dict([
                    (&b"id"[..], Value::bytes(entry.id.as_bytes())),
                    (&b"ip"[..], Value::Bytes(ip_bytes)),
                    (&b"port"[..], Value::Int(i64::from(entry.addr.port()))),
                    (
                        &b"last_seen"[..],
                        Value::Int(now.millis_since(entry.last_seen) as i64),
                    ),
                ])
            })
            .collect();

        let doc = Value::dict([
            (&b"nodes"[..], Value::List(nodes)),
            (&b"own_id"[..], Value::bytes(self.own_id().as_bytes())),
        ]);
        dredge_bencode::encode(&doc)
    }

    /// Write the snapshot atomically next to `path`.
    pub fn save(&self, path: &Path, now: Timestamp) -> Result<(), SnapshotError> {
        let bytes = self.snapshot(now);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Parse a snapshot document into its own id and saved contacts.
    ///
    /// The caller re-inserts the contacts through [`RoutingTable::observe`]
    /// so the usual insertion rules apply.
    pub fn parse_snapshot(bytes: &[u8]) -> Result<(NodeId, Vec<Contact>), SnapshotError> {
        let doc = dredge_bencode::decode(bytes)?;

        let own_id = doc
            .get_bytes(b"own_id")
            .and_then(NodeId::from_slice)
            .ok_or(SnapshotError::Schema("own_id missing or not 20 bytes"))?;

        let nodes = doc
            .get_list(b"nodes")
            .ok_or(SnapshotError::Schema("nodes list missing"))?;

        let mut contacts = Vec::with_capacity(nodes.len());
        for node in nodes {
            let id = node
                .get_bytes(b"id")
                .and_then(NodeId::from_slice)
                .ok_or(SnapshotError::Schema("node id missing or not 20 bytes"))?;
            let ip = match node.get_bytes(b"ip") {
                Some(bytes) if bytes.len() == 4 => {
                    let octets: [u8; 4] = bytes.try_into().expect("length checked");
                    IpAddr::V4(Ipv4Addr::from(octets))
                }
                Some(bytes) if bytes.len() == 16 => {
                    let octets: [u8; 16] = bytes.try_into().expect("length checked");
                    IpAddr::V6(Ipv6Addr::from(octets))
                }
                _ => return Err(SnapshotError::Schema("node ip missing or wrong width")),
            };
            let port = node
                .get_int(b"port")
                .filter(|p| (1..=65535).contains(p))
                .ok_or(SnapshotError::Schema("node port missing or out of range"))?;
            node.get_int(b"last_seen")
                .filter(|age| *age >= 0)
                .ok_or(SnapshotError::Schema("node last_seen missing or negative"))?;

            contacts.push(Contact::new(id, SocketAddr::new(ip, port as u16)));
        }

        Ok((own_id, contacts))
    }

    /// Load a snapshot file. `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<(NodeId, Vec<Contact>)>, SnapshotError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::parse_snapshot(&bytes).map(Some)
    }
}
