//! # metakv
//!
//! A watchable, transactional key-value client for etcd-class stores, built
//! for configuration and metadata: protobuf-encoded values, compare-and-set
//! transactions, multiplexed change streams, and an on-disk shadow cache
//! that serves last-known values through store outages.
//!
//! ## Features
//! - **Revision-ordered delivery**: subscribers only ever observe strictly
//!   newer values, across both point reads and watch events
//! - **Watch consolidation**: one upstream stream per key or prefix, fanned
//!   out to any number of in-process subscribers
//! - **Outage tolerance**: reads fall back to a crash-safe JSON shadow cache
//! - **Transactions**: version-guarded compare-and-set and multi-op commits
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use metakv::{Options, Store};
//! # use metakv::transport::Transport;
//! # async fn example(transport: Arc<dyn Transport>) -> metakv::Result<()> {
//! let store = Store::new(
//!     transport,
//!     Options::default().with_prefix("/myapp/staging/"),
//! )
//! .await?;
//!
//! let (current, mut updates) = store.watch("config")?;
//! while let Some(value) = updates.next().await {
//!     // value is None when the key was deleted
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod kv;
pub mod metrics;
pub mod transport;
pub mod watch;

mod cache;
mod errors;
mod utils;

pub use config::BackoffPolicy;
pub use config::CacheFileFn;
pub use config::Options;
pub use errors::Error;
pub use errors::Result;
pub use errors::TransportError;
pub use kv::Condition;
pub use kv::Operation;
pub use kv::Store;
pub use kv::TxnResult;
pub use kv::Value;
pub use watch::PrefixSnapshot;
pub use watch::Subscription;

//-----------------------------------------------------------
// Test utils
#[cfg(test)]
#[doc(hidden)]
pub mod test_utils;
