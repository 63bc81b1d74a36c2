//! Asynchronous callbacks, worker pools and reducers
//!
//! This module drives concurrent fan-out to storage shards:
//!
//! - [`Callback`]: single-assignment future (resolved, failed or cancelled)
//! - [`WorkerPool`] / [`ReadWriteThreadPools`]: isolated, bounded thread
//!   pools that run resolver functions and complete callbacks
//! - [`reduce_all`]: exactly-once reduction over a set of callbacks with
//!   cancellation propagating to pending children
//!
//! # Example
//!
//! ```rust
//! use kuba_aggregation::concurrency::{reduce_all, ReadWriteThreadPools};
//!
//! let pools = ReadWriteThreadPools::new(4, 1).unwrap();
//! let shards: Vec<_> = (0..8i64).map(|i| pools.read().resolve(move || Ok(i))).collect();
//! let sum = reduce_all(shards, |values, _failed, _cancelled| Ok(values.iter().sum::<i64>()));
//! assert_eq!(sum.wait().value(), Some(&28));
//! ```

pub mod callback;
pub mod pool;
pub mod reduce;

pub use callback::{Callback, CancelReason, Failure, Outcome};
pub use pool::{ReadWriteThreadPools, WorkerPool};
pub use reduce::{collect_all, reduce_all, Outcomes};
