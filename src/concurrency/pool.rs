//! Named worker pools and the process-wide read/write pool pair
//!
//! Fetches run on the read pool and writes on the write pool, so a burst of
//! expensive reads can never starve ingestion. Each pool has a fixed number
//! of threads and a bounded queue; work submitted beyond the queue capacity
//! is rejected with [`Error::PoolSaturated`] instead of piling up.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐     ┌──────────────────────┐     ┌─────────────┐
//! │ pool.resolve(f)       │────▶│ bounded queue        │────▶│ rayon worker│
//! │ returns Callback now  │     │ (capacity = N tasks) │     │ runs f()    │
//! └───────────────────────┘     └──────────────────────┘     └──────┬──────┘
//!                                                                   │
//!                                            resolve / fail / panic ▼
//!                                                            ┌─────────────┐
//!                                                            │  Callback   │
//!                                                            └─────────────┘
//! ```

use crate::concurrency::callback::Callback;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::metrics::{POOL_QUEUED, POOL_REJECTED};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A named, fixed-size pool of worker threads with a bounded queue
pub struct WorkerPool {
    name: String,
    pool: rayon::ThreadPool,
    queued: Arc<AtomicUsize>,
    capacity: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("threads", &self.threads())
            .field("queued", &self.queued())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl WorkerPool {
    /// Build a pool with `threads` workers and room for `capacity` queued tasks
    pub fn new(name: impl Into<String>, threads: usize, capacity: usize) -> Result<Self> {
        let name = name.into();
        if threads == 0 {
            return Err(Error::configuration(format!(
                "pool {} needs at least one thread",
                name
            )));
        }
        if capacity == 0 {
            return Err(Error::configuration(format!(
                "pool {} needs a queue capacity of at least one",
                name
            )));
        }

        let thread_prefix = name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-{}", thread_prefix, i))
            .build()
            .map_err(|e| Error::configuration(format!("failed to build pool {}: {}", name, e)))?;

        debug!(pool = %name, threads, capacity, "Worker pool started");

        Ok(Self {
            name,
            pool,
            queued: Arc::new(AtomicUsize::new(0)),
            capacity,
        })
    }

    /// Pool name, also used as thread-name prefix and metric label
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Tasks submitted but not yet picked up by a worker
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Maximum number of queued tasks
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run `resolver` on this pool and return a callback for its outcome
    ///
    /// Never blocks the caller. `Ok` resolves the callback, `Err` fails it and
    /// a panic fails it with [`Error::ResolverPanicked`]. If the callback is
    /// already terminal (typically cancelled) when a worker picks the task
    /// up, the resolver is skipped.
    pub fn resolve<T, F>(&self, resolver: F) -> Callback<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let previous = self.queued.fetch_add(1, Ordering::AcqRel);
        if previous >= self.capacity {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            POOL_REJECTED.with_label_values(&[self.name.as_str()]).inc();
            warn!(pool = %self.name, capacity = self.capacity, "Pool saturated, rejecting task");
            return Callback::failed(Error::PoolSaturated {
                pool: self.name.clone(),
                capacity: self.capacity,
            });
        }
        POOL_QUEUED
            .with_label_values(&[self.name.as_str()])
            .set((previous + 1) as f64);

        let callback = Callback::new();
        let handle = callback.clone();
        let queued = Arc::clone(&self.queued);
        let name = self.name.clone();

        self.pool.spawn(move || {
            let remaining = queued.fetch_sub(1, Ordering::AcqRel) - 1;
            POOL_QUEUED.with_label_values(&[name.as_str()]).set(remaining as f64);

            if handle.is_done() {
                debug!(pool = %name, "Callback already terminal, skipping resolver");
                return;
            }

            match panic::catch_unwind(AssertUnwindSafe(resolver)) {
                Ok(Ok(value)) => {
                    handle.resolve(value);
                }
                Ok(Err(e)) => {
                    debug!(pool = %name, error = %e, "Resolver failed");
                    handle.fail(e);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(pool = %name, panic = %message, "Resolver panicked");
                    handle.fail(Error::ResolverPanicked(message));
                }
            }
        });

        callback
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Process-wide pair of isolated read and write pools
///
/// Built once at startup and handed to every scheduling component behind an
/// `Arc`.
///
/// ```rust
/// use kuba_aggregation::concurrency::ReadWriteThreadPools;
///
/// let pools = ReadWriteThreadPools::new(2, 1).unwrap();
/// let value = pools.read().resolve(|| Ok(40 + 2)).wait();
/// assert_eq!(value.value(), Some(&42));
/// ```
#[derive(Debug)]
pub struct ReadWriteThreadPools {
    read: WorkerPool,
    write: WorkerPool,
}

impl ReadWriteThreadPools {
    /// Default queue capacity per pool
    pub const DEFAULT_QUEUE: usize = 10_000;

    /// Build pools with the given thread counts and default queue capacity
    pub fn new(read_threads: usize, write_threads: usize) -> Result<Self> {
        Ok(Self {
            read: WorkerPool::new("read", read_threads, Self::DEFAULT_QUEUE)?,
            write: WorkerPool::new("write", write_threads, Self::DEFAULT_QUEUE)?,
        })
    }

    /// Build pools from configuration
    pub fn from_config(config: &PoolConfig) -> Result<Self> {
        Ok(Self {
            read: WorkerPool::new("read", config.read_threads, config.read_queue)?,
            write: WorkerPool::new("write", config.write_threads, config.write_queue)?,
        })
    }

    /// Pool used for fetches and other reads
    pub fn read(&self) -> &WorkerPool {
        &self.read
    }

    /// Pool used for writes
    pub fn write(&self) -> &WorkerPool {
        &self.write
    }
}
