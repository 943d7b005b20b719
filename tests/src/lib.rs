//! # Dredge Test Suite
//!
//! Unified test crate for flows that span more than one workspace member:
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── crawl.rs        # bootstrap → lookup → announce → harvest
//!     └── persistence.rs  # routing snapshots, metadata store integrity
//! ```
//!
//! ## Running
//!
//! ```bash
//! cargo test -p dredge-tests
//! cargo test -p dredge-tests integration::crawl::
//! ```

pub mod integration;

/// Install a `RUST_LOG`-driven subscriber once per test binary. Call at
/// the top of a test while debugging; a no-op when already set.
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
