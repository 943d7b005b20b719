//! Inbound datagram classification and query handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::domain::{InfoHash, NodeId, Observation};
use crate::krpc::{ErrorBody, ErrorCode, KrpcError, Message, Query, QueryBody, Response, TxId};
use crate::rpc::RpcError;
use crate::service::core::NodeInner;
use crate::service::events::DhtEvent;
use crate::transport::Datagram;

/// Longest `values` list we put in a `get_peers` response; keeps the
/// datagram well under the MTU budget.
const MAX_VALUES_PER_RESPONSE: usize = 64;

/// The I/O dispatch loop: decodes datagrams and routes them to transaction
/// completion or the per-method handlers. Datagrams are processed in
/// arrival order; response sends are spawned so a rate-limited send queue
/// cannot stall dispatch.
pub(crate) async fn io_loop(
    inner: Arc<NodeInner>,
    mut datagrams: mpsc::Receiver<Datagram>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let datagram = tokio::select! {
            d = datagrams.recv() => match d {
                Some(d) => d,
                None => return,
            },
            _ = shutdown.changed() => return,
        };
        handle_datagram(&inner, datagram);
    }
}

fn handle_datagram(inner: &Arc<NodeInner>, datagram: Datagram) {
    let Datagram { payload, from } = datagram;
    eprintln!("DEBUG handle_datagram from={from} len={}", payload.len());
    inner.events.publish(DhtEvent::MessageReceived {
        from,
        bytes: payload.len(),
    });

    match Message::decode(&payload) {
        Ok(Message::Query { tx, query }) => handle_query(inner, from, tx, query),
        Ok(Message::Response { tx, response }) => {
            if response.id.is_zero() {
                debug!(%from, "dropping response with zero sender id");
                return;
            }
            if !inner.rpc.transactions().complete(from, &tx, Ok(response)) {
                trace!(%from, ?tx, "response for unknown transaction dropped");
            }
        }
        Ok(Message::Error { tx, error }) => {
            let remote = RpcError::Remote {
                code: error.code,
                message: error.message,
            };
            if !inner.rpc.transactions().complete(from, &tx, Err(remote)) {
                trace!(%from, ?tx, "error for unknown transaction dropped");
            }
        }
        Err(e) => handle_protocol_error(inner, from, e),
    }
}

fn handle_protocol_error(inner: &Arc<NodeInner>, from: SocketAddr, error: KrpcError) {
    eprintln!("DEBUG handle_protocol_error from={from} error={error:?}");
    // Malformed traffic burns the sender's burst allowance.
    inner.rpc.transport().penalize(from);
    inner.events.publish(DhtEvent::MessageError {
        from,
        detail: error.to_string(),
    });

    let (code, detail) = match &error {
        KrpcError::UnknownMethod { .. } => (ErrorCode::MethodUnknown, "Method Unknown"),
        _ => (ErrorCode::Protocol, "Protocol Error"),
    };
    if let Some(tx) = error.recoverable_tx() {
        let reply = ErrorBody::new(code, detail);
        let tx = TxId::new(tx.to_vec());
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            eprintln!("DEBUG spawned respond_error task");
            match inner.rpc.respond_error(from, tx, reply).await {
                Ok(()) => eprintln!("DEBUG respond_error ok"),
                Err(e) => eprintln!("DEBUG respond_error failed: {e}"),
            }
        });
    } else {
        debug!(%from, error = %error, "undecodable datagram dropped");
    }
}

fn handle_query(inner: &Arc<NodeInner>, from: SocketAddr, tx: TxId, query: Query) {
    // Sender bookkeeping first: every inbound query touches its bucket.
    // A sender claiming our id or the zero sentinel is dropped outright.
    if query.id == inner.id || query.id.is_zero() {
        warn!(%from, id = %query.id, "dropping query with unusable sender id");
        inner.rpc.transport().penalize(from);
        return;
    }
    inner.observe(query.id, from, Observation::IncomingQuery);

    let method = query.body.method();
    let reply = match query.body {
        QueryBody::Ping => Ok(Response::only_id(inner.id)),
        QueryBody::FindNode { target } => Ok(find_node_response(inner, from, &target)),
        QueryBody::GetPeers { info_hash } => Ok(get_peers_response(inner, from, info_hash)),
        QueryBody::AnnouncePeer {
            info_hash,
            port,
            implied_port,
            token,
        } => announce_peer_response(inner, from, info_hash, port, implied_port, &token),
        QueryBody::SampleInfohashes { target } => {
            Ok(sample_infohashes_response(inner, from, &target))
        }
    };

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let outcome = match reply {
            Ok(response) => inner.rpc.respond(from, tx, response).await,
            Err(error) => inner.rpc.respond_error(from, tx, error).await,
        };
        match outcome {
            Ok(()) => inner.events.publish(DhtEvent::MessageSent { to: from, method }),
            Err(e) => trace!(%from, method, error = %e, "could not send reply"),
        }
    });
}

fn find_node_response(
    inner: &Arc<NodeInner>,
    from: SocketAddr,
    target: &NodeId,
) -> Response {
    let now = inner.now();
    let k = inner.config.k;
    let closest = inner
        .routing
        .lock()
        .expect("routing mutex")
        .find_closest(target, k, now);
    let contacts: Vec<_> = closest.iter().map(|e| e.contact()).collect();

    let mut response = Response::only_id(inner.id);
    // Answer in the family the asker speaks.
    if from.is_ipv4() {
        response.nodes = contacts;
    } else {
        response.nodes6 = contacts;
    }
    response
}

fn get_peers_response(
    inner: &Arc<NodeInner>,
    from: SocketAddr,
    info_hash: InfoHash,
) -> Response {
    let now = inner.now();
    let mut response = Response::only_id(inner.id);
    response.token = Some(
        inner
            .tokens
            .lock()
            .expect("token mutex")
            .issue(from)
            .to_vec(),
    );

    let mut peers = inner
        .announces
        .lock()
        .expect("announce mutex")
        .peers_for(&info_hash, now);
    peers.truncate(MAX_VALUES_PER_RESPONSE);

    if peers.is_empty() {
        let target = info_hash.as_node_id();
        let k = inner.config.k;
        let closest = inner
            .routing
            .lock()
            .expect("routing mutex")
            .find_closest(&target, k, now);
        let contacts: Vec<_> = closest.iter().map(|e| e.contact()).collect();
        if from.is_ipv4() {
            response.nodes = contacts;
        } else {
            response.nodes6 = contacts;
        }
    } else {
        response.values = peers;
    }
    response
}

fn announce_peer_response(
    inner: &Arc<NodeInner>,
    from: SocketAddr,
    info_hash: InfoHash,
    port: u16,
    implied_port: bool,
    token: &[u8],
) -> Result<Response, ErrorBody> {
    let valid = inner
        .tokens
        .lock()
        .expect("token mutex")
        .validate(from, token);
    if !valid {
        debug!(%from, %info_hash, "announce with bad token refused");
        return Err(ErrorBody::new(ErrorCode::Protocol, "Bad token"));
    }

    // Non-zero implied_port stores the UDP source port; otherwise the
    // explicit port must be a real one.
    let peer_port = if implied_port { from.port() } else { port };
    if peer_port == 0 {
        return Err(ErrorBody::new(ErrorCode::Protocol, "Invalid port"));
    }

    let peer = SocketAddr::new(from.ip(), peer_port);
    inner
        .announces
        .lock()
        .expect("announce mutex")
        .announce(info_hash, peer, inner.now());
    inner
        .events
        .publish(DhtEvent::PeerAnnounced { info_hash, peer });

    Ok(Response::only_id(inner.id))
}

fn sample_infohashes_response(
    inner: &Arc<NodeInner>,
    from: SocketAddr,
    target: &NodeId,
) -> Response {
    let mut response = find_node_response(inner, from, target);
    let announces = inner.announces.lock().expect("announce mutex");
    response.samples = announces.sample(inner.config.k);
    response.num = Some(announces.swarm_count() as i64);
    response
}
