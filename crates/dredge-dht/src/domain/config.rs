//! Node configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::errors::ConfigError;

/// Everything the DHT core reads from configuration.
///
/// Defaults match the Mainline conventions (k = 8, α = 3, port 6881). A
/// config can come from code, or from a TOML file via
/// [`DhtConfig::from_toml_file`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DhtConfig {
    /// UDP bind address.
    pub listen_addr: IpAddr,
    /// UDP bind port.
    pub listen_port: u16,
    /// Bucket capacity and lookup result width.
    pub k: usize,
    /// Lookup parallelism.
    pub alpha: usize,
    /// First-attempt RPC deadline, milliseconds.
    pub rpc_base_timeout_ms: u64,
    /// Additional attempts after the first.
    pub rpc_max_retries: u32,
    /// Backoff cap between attempts, milliseconds.
    pub rpc_max_delay_ms: u64,
    /// Per-transaction wall-clock cap, milliseconds.
    pub rpc_overall_timeout_ms: u64,
    /// Per-lookup wall-clock cap, milliseconds.
    pub lookup_deadline_ms: u64,
    /// Bucket staleness threshold before a refresh lookup, milliseconds.
    pub bucket_refresh_interval_ms: u64,
    /// Maintenance ticker period, milliseconds.
    pub tick_interval_ms: u64,
    /// Write-token secret rotation period, milliseconds.
    pub token_rotation_interval_ms: u64,
    /// Global outbound rate, datagrams per second.
    pub global_rate_ops_per_sec: u32,
    /// Global outbound burst allowance.
    pub global_rate_burst: u32,
    /// Per-endpoint burst allowance within the burst window.
    pub per_endpoint_burst_size: u32,
    /// Per-endpoint burst window, milliseconds.
    pub per_endpoint_burst_window_ms: u64,
    /// Outbound queue high-water mark; sends beyond it are rejected.
    pub max_outbound_queue: usize,
    /// Datagrams larger than this are dropped on receive.
    pub max_datagram_bytes: usize,
    /// Metadata store root directory.
    pub metadata_base_dir: PathBuf,
    /// Metadata store sharding level (1..=4).
    pub sharding_level: u8,
    /// Initial seeds, as `host:port` strings.
    pub bootstrap_endpoints: Vec<String>,
    /// Whether a full bucket pings its oldest questionable member before
    /// parking a candidate in the replacement cache.
    pub probe_on_full_bucket: bool,
    /// Where the routing-table snapshot is kept, if anywhere.
    pub routing_snapshot_path: Option<PathBuf>,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 6881,
            k: 8,
            alpha: 3,
            rpc_base_timeout_ms: 5_000,
            rpc_max_retries: 2,
            rpc_max_delay_ms: 5_000,
            rpc_overall_timeout_ms: 30_000,
            lookup_deadline_ms: 30_000,
            bucket_refresh_interval_ms: 15 * 60 * 1000,
            tick_interval_ms: 60_000,
            token_rotation_interval_ms: 5 * 60 * 1000,
            global_rate_ops_per_sec: 200,
            global_rate_burst: 400,
            per_endpoint_burst_size: 10,
            per_endpoint_burst_window_ms: 1_000,
            max_outbound_queue: 4_096,
            max_datagram_bytes: 1_500,
            metadata_base_dir: PathBuf::from("./metadata"),
            sharding_level: 2,
            bootstrap_endpoints: vec![
                "router.bittorrent.com:6881".to_owned(),
                "dht.transmissionbt.com:6881".to_owned(),
            ],
            probe_on_full_bucket: true,
            routing_snapshot_path: None,
        }
    }
}

impl DhtConfig {
    /// A config with shrunken timers, a loopback ephemeral port, and a
    /// per-process metadata directory, for tests.
    pub fn for_testing() -> Self {
        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_port: 0,
            metadata_base_dir: std::env::temp_dir()
                .join(format!("dredge-meta-{}", std::process::id())),
            rpc_base_timeout_ms: 200,
            rpc_max_delay_ms: 400,
            rpc_overall_timeout_ms: 2_000,
            lookup_deadline_ms: 5_000,
            bucket_refresh_interval_ms: 2_000,
            tick_interval_ms: 250,
            token_rotation_interval_ms: 1_000,
            bootstrap_endpoints: Vec::new(),
            ..Self::default()
        }
    }

    /// Load and validate a TOML config file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: Box::new(source),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k == 0 {
            return Err(ConfigError::Invalid("k must be at least 1"));
        }
        if self.alpha == 0 {
            return Err(ConfigError::Invalid("alpha must be at least 1"));
        }
        if !(1..=4).contains(&self.sharding_level) {
            return Err(ConfigError::Invalid("sharding_level must be in 1..=4"));
        }
        if self.rpc_base_timeout_ms == 0 {
            return Err(ConfigError::Invalid("rpc_base_timeout_ms must be nonzero"));
        }
        if self.max_outbound_queue == 0 {
            return Err(ConfigError::Invalid("max_outbound_queue must be nonzero"));
        }
        if self.global_rate_ops_per_sec == 0 {
            return Err(ConfigError::Invalid(
                "global_rate_ops_per_sec must be nonzero",
            ));
        }
        Ok(())
    }
}
