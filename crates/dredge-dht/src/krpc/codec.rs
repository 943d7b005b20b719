//! Encoding and decoding between [`Message`] and bencoded bytes.

use dredge_bencode::Value;

use crate::domain::{InfoHash, NodeId};
use crate::krpc::compact;
use crate::krpc::error::KrpcError;
use crate::krpc::message::{ErrorBody, Message, Query, QueryBody, Response, TxId};

impl Message {
    /// Serialize to the wire form.
    pub fn encode(&self) -> Vec<u8> {
        dredge_bencode::encode(&self.to_value())
    }

    /// Parse a datagram. Strict: the bencode must be canonical, the type
    /// tag known, and every required field present with the right width.
    pub fn decode(bytes: &[u8]) -> Result<Message, KrpcError> {
        let doc = dredge_bencode::decode(bytes)?;

        // Pull the transaction id first so later failures can still echo
        // it in an error reply.
        let tx = doc.get_bytes(b"t").map(<[u8]>::to_vec);
        let invalid = |field: &'static str, tx: &Option<Vec<u8>>| KrpcError::InvalidField {
            field,
            tx: tx.clone(),
        };

        let tx_bytes = tx.clone().ok_or(invalid("t", &tx))?;
        let y = doc.get_bytes(b"y").ok_or(invalid("y", &tx))?;

        match y {
            b"q" => {
                let method = doc.get_bytes(b"q").ok_or(invalid("q", &tx))?;
                let args = doc.get(b"a").ok_or(invalid("a", &tx))?;
                let id = args
                    .get_bytes(b"id")
                    .and_then(NodeId::from_slice)
                    .ok_or(invalid("a.id", &tx))?;
                let body = decode_query_body(method, args, &tx, &tx_bytes)?;
                Ok(Message::Query {
                    tx: TxId::new(tx_bytes),
                    query: Query { id, body },
                })
            }
            b"r" => {
                let body = doc.get(b"r").ok_or(invalid("r", &tx))?;
                let response = decode_response(body, &tx)?;
                Ok(Message::Response {
                    tx: TxId::new(tx_bytes),
                    response,
                })
            }
            b"e" => {
                let list = doc.get_list(b"e").ok_or(invalid("e", &tx))?;
                let code = list
                    .first()
                    .and_then(Value::as_int)
                    .ok_or(invalid("e[0]", &tx))?;
                let message = list
                    .get(1)
                    .and_then(Value::as_bytes)
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                Ok(Message::Error {
                    tx: TxId::new(tx_bytes),
                    error: ErrorBody { code, message },
                })
            }
            _ => Err(KrpcError::UnknownType { tx }),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Message::Query { tx, query } => {
                let mut args: Vec<(&[u8], Value)> =
                    vec![(&b"id"[..], Value::bytes(query.id.as_bytes()))];
                match &query.body {
                    QueryBody::Ping => {}
                    QueryBody::FindNode { target } => {
                        args.push((&b"target"[..], Value::bytes(target.as_bytes())));
                    }
                    QueryBody::GetPeers { info_hash } => {
                        args.push((&b"info_hash"[..], Value::bytes(info_hash.as_bytes())));
                    }
                    QueryBody::AnnouncePeer {
                        info_hash,
                        port,
                        implied_port,
                        token,
                    } => {
                        args.push((&b"implied_port"[..], Value::Int(i64::from(*implied_port))));
                        args.push((&b"info_hash"[..], Value::bytes(info_hash.as_bytes())));
                        args.push((&b"port"[..], Value::Int(i64::from(*port))));
                        args.push((&b"token"[..], Value::Bytes(token.clone())));
                    }
                    QueryBody::SampleInfohashes { target } => {
                        args.push((&b"target"[..], Value::bytes(target.as_bytes())));
                    }
                }
                Value::dict([
                    (&b"a"[..], Value::dict(args)),
                    (&b"q"[..], Value::bytes(query.body.method())),
                    (&b"t"[..], Value::Bytes(tx.as_bytes().to_vec())),
                    (&b"y"[..], Value::bytes(b"q")),
                ])
            }
            Message::Response { tx, response } => {
                let mut body: Vec<(&[u8], Value)> =
                    vec![(&b"id"[..], Value::bytes(response.id.as_bytes()))];
                if !response.nodes.is_empty() {
                    body.push((
                        &b"nodes"[..],
                        Value::Bytes(compact::encode_contacts_v4(&response.nodes)),
                    ));
                }
                if !response.nodes6.is_empty() {
                    body.push((
                        &b"nodes6"[..],
                        Value::Bytes(compact::encode_contacts_v6(&response.nodes6)),
                    ));
                }
                if let Some(num) = response.num {
                    body.push((&b"num"[..], Value::Int(num)));
                }
                if !response.samples.is_empty() {
                    let mut blob = Vec::with_capacity(response.samples.len() * 20);
                    for sample in &response.samples {
                        blob.extend_from_slice(sample.as_bytes());
                    }
                    body.push((&b"samples"[..], Value::Bytes(blob)));
                }
                if let Some(token) = &response.token {
                    body.push((&b"token"[..], Value::Bytes(token.clone())));
                }
                if !response.values.is_empty() {
                    let values = response
                        .values
                        .iter()
                        .map(|addr| Value::Bytes(compact::encode_peer(*addr)))
                        .collect();
                    body.push((&b"values"[..], Value::List(values)));
                }
                Value::dict([
                    (&b"r"[..], Value::dict(body)),
                    (&b"t"[..], Value::Bytes(tx.as_bytes().to_vec())),
                    (&b"y"[..], Value::bytes(b"r")),
                ])
            }
            Message::Error { tx, error } => Value::dict([
                (
                    &b"e"[..],
                    Value::List(vec![
                        Value::Int(error.code),
                        Value::bytes(error.message.as_bytes()),
                    ]),
                ),
                (&b"t"[..], Value::Bytes(tx.as_bytes().to_vec())),
                (&b"y"[..], Value::bytes(b"e")),
            ]),
        }
    }
}

fn decode_query_body(
    method: &[u8],
    args: &Value,
    tx: &Option<Vec<u8>>,
    tx_bytes: &[u8],
) -> Result<QueryBody, KrpcError> {
    let invalid = |field: &'static str| KrpcError::InvalidField {
        field,
        tx: tx.clone(),
    };
    match method {
        b"ping" => Ok(QueryBody::Ping),
        b"find_node" => {
            let target = args
                .get_bytes(b"target")
                .and_then(NodeId::from_slice)
                .ok_or(invalid("a.target"))?;
            Ok(QueryBody::FindNode { target })
        }
        b"get_peers" => {
            let info_hash = args
                .get_bytes(b"info_hash")
                .and_then(InfoHash::from_slice)
                .ok_or(invalid("a.info_hash"))?;
            Ok(QueryBody::GetPeers { info_hash })
        }
        b"announce_peer" => {
            let info_hash = args
                .get_bytes(b"info_hash")
                .and_then(InfoHash::from_slice)
                .ok_or(invalid("a.info_hash"))?;
            let implied_port = args.get_int(b"implied_port").unwrap_or(0) != 0;
            let port = match args.get_int(b"port") {
                Some(p) if (0..=65535).contains(&p) => p as u16,
                // Port may be omitted when the source port is implied.
                None if implied_port => 0,
                _ => return Err(invalid("a.port")),
            };
            let token = args
                .get_bytes(b"token")
                .map(<[u8]>::to_vec)
                .ok_or(invalid("a.token"))?;
            Ok(QueryBody::AnnouncePeer {
                info_hash,
                port,
                implied_port,
                token,
            })
        }
        b"sample_infohashes" => {
            let target = args
                .get_bytes(b"target")
                .and_then(NodeId::from_slice)
                .ok_or(invalid("a.target"))?;
            Ok(QueryBody::SampleInfohashes { target })
        }
        _ => Err(KrpcError::UnknownMethod {
            method: String::from_utf8_lossy(method).into_owned(),
            tx: tx_bytes.to_vec(),
        }),
    }
}

fn decode_response(body: &Value, tx: &Option<Vec<u8>>) -> Result<Response, KrpcError> {
    let invalid = |field: &'static str| KrpcError::InvalidField {
        field,
        tx: tx.clone(),
    };

    let id = body
        .get_bytes(b"id")
        .and_then(NodeId::from_slice)
        .ok_or(invalid("r.id"))?;

    let nodes = match body.get_bytes(b"nodes") {
        Some(blob) => compact::decode_contacts_v4(blob).ok_or(invalid("r.nodes"))?,
        None => Vec::new(),
    };
    let nodes6 = match body.get_bytes(b"nodes6") {
        Some(blob) => compact::decode_contacts_v6(blob).ok_or(invalid("r.nodes6"))?,
        None => Vec::new(),
    };

    let values = match body.get_list(b"values") {
        Some(list) => {
            let mut peers = Vec::with_capacity(list.len());
            for entry in list {
                let peer = entry
                    .as_bytes()
                    .and_then(compact::decode_peer)
                    .ok_or(invalid("r.values"))?;
                peers.push(peer);
            }
            peers
        }
        None => Vec::new(),
    };

    let samples = match body.get_bytes(b"samples") {
        Some(blob) if blob.len() % 20 == 0 => blob
            .chunks_exact(20)
            .map(|c| InfoHash::from_slice(c).expect("chunk width fixed"))
            .collect(),
        Some(_) => return Err(invalid("r.samples")),
        None => Vec::new(),
    };

    Ok(Response {
        id,
        nodes,
        nodes6,
        values,
        token: body.get_bytes(b"token").map(<[u8]>::to_vec),
        samples,
        num: body.get_int(b"num"),
    })
}
