//! # Zeta4G Cluster Driver
//!
//! Cluster routing, causal-consistency bookmarks and transaction retry for
//! [Zeta4G](https://github.com/zeta9044/zeta4g) graph database clusters.
//!
//! ## Features
//!
//! - **Routing** - Routing table discovery with per-database caching and
//!   coalesced refreshes
//! - **Server Selection** - Round-robin or least-connections selection of
//!   readers, writers and routers
//! - **Bookmarks** - Causal chaining between transactions, with system
//!   database bookmarks kept apart
//! - **Transaction Functions** - Automatic retry and rediscovery driven by a
//!   closed error classification
//! - **Async/Await** - Built on Tokio
//!
//! The wire protocol is not part of this crate. Connections are opened
//! through a [`Connector`] implementation supplied by the caller.
//!
//! ## Basic Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zeta4g_cluster_driver::{Driver, SessionConfig};
//!
//! let driver = Driver::new("zeta4g://server1:7687,server2:7687", connector)?;
//! driver.verify_connectivity().await?;
//!
//! let session = driver.session(
//!     SessionConfig::builder()
//!         .with_database("adb")
//!         .with_read_access()
//!         .build(),
//! )?;
//! let result = session.run("MATCH (n) RETURN n.name AS name", None).await?;
//! for record in &result.records {
//!     println!("{}", record);
//! }
//! ```
//!
//! ## Transaction Functions
//!
//! ```rust,ignore
//! let created = session.write_transaction(|tx| async move {
//!     tx.run("CREATE (n:Node) RETURN n").await?;
//!     Ok(1)
//! }).await?;
//!
//! // The next session can wait for this write
//! let bookmarks = session.last_bookmarks();
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use std::time::Duration;
//! use zeta4g_cluster_driver::DriverConfig;
//!
//! let config = DriverConfig::builder("zeta4g://localhost:7687?region=west")
//!     .unwrap()
//!     .with_connection_timeout(Duration::from_secs(10))
//!     .with_max_transaction_retry_time(Duration::from_secs(15))
//!     .with_fetch_size(500)
//!     .build();
//!
//! assert_eq!(config.routing_context["region"], "west");
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use zeta4g_cluster_driver::{Classification, DriverError};
//!
//! let err = DriverError::server("Neo.ClientError.Cluster.NotALeader", "No write access");
//! assert_eq!(zeta4g_cluster_driver::classify(&err), Classification::RetryableRediscover);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod driver;

// Re-exports for convenience
pub use driver::{
    classify, AccessMode, AddressResolver, Bookmark, BookmarkManager, Classification,
    ConnectSettings, Connection, Connector, Driver, DriverConfig, DriverConfigBuilder, DriverError,
    DriverMetrics, DriverResult, ProtocolVersion, Query, QueryResult, Record, ResultSummary,
    RetryConfig, RoutingReply, ServerAddress, ServerInfo, Session, SessionConfig,
    SessionConfigBuilder, Transaction, TransactionConfig, TrustStrategy, Value,
};

pub use driver::routing::{RoutingPolicy, RoutingTable, ServerRole};

/// Config alias for convenience
pub type Config = DriverConfig;
