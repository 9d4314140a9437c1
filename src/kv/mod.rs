//! Key-value client surface.
//!
//! [`Store`] is the entry point: reads merge into the shadow cache, writes
//! and compare-and-sets go through store transactions, and watches fan out
//! through per-key broadcasters fed by the watch manager.

mod ops;
mod store;
mod value;

pub use ops::CompareTarget;
pub use ops::CompareType;
pub use ops::Condition;
pub use ops::OpResponse;
pub use ops::Operation;
pub use ops::TxnResult;
pub use store::Store;
pub use value::Value;
