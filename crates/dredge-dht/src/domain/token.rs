//! Rotating write tokens for `announce_peer`.
//!
//! Tokens are `truncate_4(HMAC_SHA1(secret, endpoint_bytes))` under one of
//! two rolling 16-byte secrets. The current secret rotates into `previous`
//! every five minutes, so a token stays valid for at most two rotation
//! windows (ten minutes) without the manager storing anything per issue.

use std::net::{IpAddr, SocketAddr};

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;

use crate::ports::Timestamp;

/// Issued token width in bytes.
pub const TOKEN_LEN: usize = 4;

/// Secret width in bytes.
const SECRET_LEN: usize = 16;

/// An issued write token.
pub type Token = [u8; TOKEN_LEN];

/// Stateless two-secret token scheme.
#[derive(Debug)]
pub struct TokenManager {
    current: [u8; SECRET_LEN],
    previous: [u8; SECRET_LEN],
    rotated_at: Timestamp,
    rotation_interval_ms: u64,
}

impl TokenManager {
    /// Fresh manager with two random secrets.
    pub fn new(rotation_interval_ms: u64, now: Timestamp) -> Self {
        Self {
            current: random_secret(),
            previous: random_secret(),
            rotated_at: now,
            rotation_interval_ms,
        }
    }

    /// Rotate if the interval has elapsed. Returns whether a rotation
    /// happened.
    pub fn maybe_rotate(&mut self, now: Timestamp) -> bool {
        if now.millis_since(self.rotated_at) < self.rotation_interval_ms {
            return false;
        }
        self.previous = self.current;
        self.current = random_secret();
        self.rotated_at = now;
        true
    }

    /// Issue a token for `endpoint` under the current secret.
    pub fn issue(&self, endpoint: SocketAddr) -> Token {
        derive(&self.current, endpoint)
    }

    /// Whether `token` was issued to `endpoint` under either active secret.
    pub fn validate(&self, endpoint: SocketAddr, token: &[u8]) -> bool {
        token == derive(&self.current, endpoint).as_slice()
            || token == derive(&self.previous, endpoint).as_slice()
    }
}

fn random_secret() -> [u8; SECRET_LEN] {
    let mut secret = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    secret
}

fn derive(secret: &[u8; SECRET_LEN], endpoint: SocketAddr) -> Token {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret).expect("hmac accepts any key length");
    match endpoint.ip() {
        IpAddr::V4(v4) => mac.update(&v4.octets()),
        IpAddr::V6(v6) => mac.update(&v6.octets()),
    }
    mac.update(&endpoint.port().to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let mut token = [0u8; TOKEN_LEN];
    token.copy_from_slice(&digest[..TOKEN_LEN]);
    token
}
