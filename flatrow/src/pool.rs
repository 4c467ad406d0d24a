//! Builder pool.
//!
//! Building a row allocates only while a builder's buffers are still growing.
//! [`RowBuilderPool`] keeps warmed-up builders on a bounded lock-free free list
//! so that the ingestion path can take one, fill it, build, and hand it back
//! without touching the allocator.
//!
//! Builders are handed out as [`PooledRowBuilder`] guards. Dropping a guard on
//! any path (normal return, `?`, panic unwinding) resets the builder and
//! returns it to the pool. When the free list already holds
//! [`PoolConfig::max_idle`] builders, the returned builder is dropped instead.
//!
//! # Example
//!
//! ```rust
//! use flatrow::{PoolConfig, RowBuilderPool, SimpleFieldType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = RowBuilderPool::new(PoolConfig::default())?;
//!
//! let mut builder = pool.acquire();
//! builder.add_metric_name("requests");
//! builder.add_simple_field("count", SimpleFieldType::DeltaSum, 3.0)?;
//! let encoded = builder.build()?.to_vec();
//! drop(builder);
//!
//! assert!(!encoded.is_empty());
//! assert_eq!(pool.idle(), 1);
//! # Ok(())
//! # }
//! ```

use std::mem;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, LazyLock};

use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::builder::RowBuilder;
use crate::error::{ConfigError, Result};
use crate::writer::DEFAULT_WRITER_CAPACITY;

/// Default number of idle builders kept by a pool.
pub const DEFAULT_MAX_IDLE: usize = 64;

/// Configuration of a [`RowBuilderPool`].
///
/// Missing fields take their default when deserialized.
///
/// ```json
/// { "max_idle": 128, "writer_capacity": 4096 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of idle builders held on the free list.
    pub max_idle: usize,

    /// Output buffer reserved by each newly created builder, in bytes.
    pub writer_capacity: usize,
}

impl PoolConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMaxIdle`] if `max_idle` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_idle == 0 {
            return Err(ConfigError::InvalidMaxIdle {
                max_idle: self.max_idle,
            }
            .into());
        }
        Ok(())
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not valid configuration JSON, or the
    /// [`validate`](Self::validate) error.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
            writer_capacity: DEFAULT_WRITER_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct PoolInner {
    idle: ArrayQueue<RowBuilder>,
    config: PoolConfig,
}

impl PoolInner {
    /// Resets `builder` and puts it back on the free list, or drops it when full.
    fn reclaim(&self, mut builder: RowBuilder) {
        builder.reset();
        if self.idle.push(builder).is_err() {
            trace!(max_idle = self.config.max_idle, "builder pool full, dropping builder");
        }
    }
}

/// Pool of reusable [`RowBuilder`]s.
///
/// Cloning is cheap and yields a handle to the same pool. Any number of
/// threads may acquire and release concurrently.
#[derive(Debug, Clone)]
pub struct RowBuilderPool {
    inner: Arc<PoolInner>,
}

impl RowBuilderPool {
    /// Creates an empty pool.
    ///
    /// # Errors
    ///
    /// Returns the [`PoolConfig::validate`] error if the configuration is invalid.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: PoolConfig) -> Self {
        debug!(
            max_idle = config.max_idle,
            writer_capacity = config.writer_capacity,
            "created row builder pool"
        );
        Self {
            inner: Arc::new(PoolInner {
                idle: ArrayQueue::new(config.max_idle),
                config,
            }),
        }
    }

    /// Takes an empty builder, recycling an idle one when available.
    pub fn acquire(&self) -> PooledRowBuilder {
        let builder = self
            .inner
            .idle
            .pop()
            .unwrap_or_else(|| RowBuilder::with_capacity(self.inner.config.writer_capacity));
        PooledRowBuilder {
            builder,
            pool: Arc::clone(&self.inner),
            detached: false,
        }
    }

    /// Returns a builder to its pool. Equivalent to dropping the guard.
    pub fn release(&self, builder: PooledRowBuilder) {
        drop(builder);
    }

    /// Returns the number of idle builders on the free list.
    pub fn idle(&self) -> usize {
        self.inner.idle.len()
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl Default for RowBuilderPool {
    fn default() -> Self {
        Self::from_valid(PoolConfig::default())
    }
}

/// A [`RowBuilder`] on loan from a [`RowBuilderPool`].
///
/// Dereferences to the builder. Dropping the guard resets the builder and
/// returns it to the pool it came from, which need not be the pool of the
/// thread dropping it.
#[derive(Debug)]
pub struct PooledRowBuilder {
    builder: RowBuilder,
    pool: Arc<PoolInner>,
    detached: bool,
}

impl PooledRowBuilder {
    /// Detaches the builder from its pool. It is not returned when dropped.
    pub fn into_inner(mut self) -> RowBuilder {
        self.detached = true;
        mem::take(&mut self.builder)
    }
}

impl Deref for PooledRowBuilder {
    type Target = RowBuilder;

    fn deref(&self) -> &RowBuilder {
        &self.builder
    }
}

impl DerefMut for PooledRowBuilder {
    fn deref_mut(&mut self) -> &mut RowBuilder {
        &mut self.builder
    }
}

impl Drop for PooledRowBuilder {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        self.pool.reclaim(mem::take(&mut self.builder));
    }
}

static GLOBAL: LazyLock<RowBuilderPool> = LazyLock::new(RowBuilderPool::default);

/// Returns the process-wide pool with the default configuration.
pub fn global() -> &'static RowBuilderPool {
    &GLOBAL
}
