//! Fixed-capacity pool of output buffers.
//!
//! All buffers are allocated eagerly in [`BufferPool::configure`] so steady-state recording
//! never allocates on the frame thread. A checked-out buffer returns to the free list when
//! its [`PooledBuffer`] handle is released or dropped, from whichever thread holds it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;

use super::buffer::{BufferFormat, FrameBuffer, PixelBuffer, PixelFormat};
use crate::models::settings::ExhaustionPolicy;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("all {capacity} pooled buffers are checked out")]
    Exhausted { capacity: usize },

    #[error("pool has not been configured")]
    NotConfigured,

    #[error("invalid pool format: {0}")]
    InvalidFormat(String),

    #[error("pool has been torn down")]
    TornDown,
}

/// Decides what `acquire` returns once every pooled buffer is checked out.
pub trait ExhaustionStrategy: Send + Sync + fmt::Debug {
    /// `Some` hands out a one-off buffer outside the pool, `None` reports `Exhausted`.
    fn on_exhausted(&self, format: BufferFormat) -> Option<FrameBuffer>;
}

/// Never stall the real-time path: allocate a throwaway buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackAllocate;

impl ExhaustionStrategy for FallbackAllocate {
    fn on_exhausted(&self, format: BufferFormat) -> Option<FrameBuffer> {
        Some(FrameBuffer::new(format))
    }
}

/// Keep memory strictly bounded: signal backpressure instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailFast;

impl ExhaustionStrategy for FailFast {
    fn on_exhausted(&self, _format: BufferFormat) -> Option<FrameBuffer> {
        None
    }
}

pub fn strategy_for(policy: ExhaustionPolicy) -> Arc<dyn ExhaustionStrategy> {
    match policy {
        ExhaustionPolicy::FallbackAllocate => Arc::new(FallbackAllocate),
        ExhaustionPolicy::FailFast => Arc::new(FailFast),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub outstanding: usize,
    pub fallback_allocations: u64,
    pub exhaustion_events: u64,
    pub generation: u64,
}

#[derive(Default)]
struct PoolInner {
    format: Option<BufferFormat>,
    capacity: usize,
    generation: u64,
    free: Vec<FrameBuffer>,
    outstanding: usize,
    torn_down: bool,
    in_exhaustion_streak: bool,
    fallback_allocations: u64,
    exhaustion_events: u64,
}

struct PoolShared {
    id: u64,
    inner: Mutex<PoolInner>,
}

impl PoolShared {
    fn give_back(&self, generation: u64, buffer: FrameBuffer) {
        let mut inner = self.inner.lock();
        if inner.torn_down || inner.generation != generation {
            // Stale generation: the buffer's format may no longer match, let it free.
            log::trace!(
                "buffer pool: dropping buffer from generation {generation} (current {})",
                inner.generation
            );
            return;
        }
        debug_assert!(inner.outstanding > 0, "pool outstanding count underflow");
        inner.outstanding = inner.outstanding.saturating_sub(1);
        inner.free.push(buffer);
    }
}

#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
    strategy: Arc<dyn ExhaustionStrategy>,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.shared.id)
            .field("strategy", &self.strategy)
            .field("stats", &self.stats())
            .finish()
    }
}

impl BufferPool {
    /// Unconfigured pool; call [`BufferPool::configure`] once source dimensions are known.
    pub fn new(strategy: Arc<dyn ExhaustionStrategy>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                inner: Mutex::new(PoolInner::default()),
            }),
            strategy,
        }
    }

    pub fn with_policy(policy: ExhaustionPolicy) -> Self {
        Self::new(strategy_for(policy))
    }

    /// Allocates exactly `capacity` buffers. Reconfiguring abandons the previous
    /// generation: its outstanding buffers are freed by their holders instead of returning.
    pub fn configure(
        &self,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        capacity: usize,
    ) -> Result<(), PoolError> {
        let format = BufferFormat::new(width, height, pixel_format);
        if format.is_empty() {
            return Err(PoolError::InvalidFormat(format!(
                "dimensions must be non-zero, got {width}x{height}"
            )));
        }
        if capacity == 0 {
            return Err(PoolError::InvalidFormat(
                "capacity must be at least 1".to_string(),
            ));
        }

        let free: Vec<FrameBuffer> = (0..capacity).map(|_| FrameBuffer::new(format)).collect();

        let mut inner = self.shared.inner.lock();
        inner.generation = inner.generation.saturating_add(1);
        inner.format = Some(format);
        inner.capacity = capacity;
        inner.free = free;
        inner.outstanding = 0;
        inner.torn_down = false;
        inner.in_exhaustion_streak = false;

        log::info!(
            "buffer pool: configured id={} {}x{} {:?} capacity={} generation={}",
            self.shared.id,
            width,
            height,
            pixel_format,
            capacity,
            inner.generation
        );
        Ok(())
    }

    pub fn format(&self) -> Option<BufferFormat> {
        self.shared.inner.lock().format
    }

    pub fn capacity(&self) -> usize {
        self.shared.inner.lock().capacity
    }

    /// Never blocks. Past capacity the exhaustion strategy decides between a one-off
    /// buffer and [`PoolError::Exhausted`].
    pub fn acquire(&self) -> Result<PooledBuffer, PoolError> {
        let (format, capacity) = {
            let mut inner = self.shared.inner.lock();
            if inner.torn_down {
                return Err(PoolError::TornDown);
            }
            let format = inner.format.ok_or(PoolError::NotConfigured)?;

            if let Some(buffer) = inner.free.pop() {
                inner.outstanding += 1;
                inner.in_exhaustion_streak = false;
                debug_assert!(inner.outstanding <= inner.capacity);
                return Ok(PooledBuffer {
                    buffer,
                    origin: Origin::Pool {
                        shared: Arc::downgrade(&self.shared),
                        pool_id: self.shared.id,
                        generation: inner.generation,
                    },
                });
            }

            inner.exhaustion_events = inner.exhaustion_events.saturating_add(1);
            if !inner.in_exhaustion_streak {
                inner.in_exhaustion_streak = true;
                log::warn!(
                    "buffer pool: exhausted id={} capacity={} outstanding={}",
                    self.shared.id,
                    inner.capacity,
                    inner.outstanding
                );
            }
            (format, inner.capacity)
        };

        match self.strategy.on_exhausted(format) {
            Some(buffer) => {
                let mut inner = self.shared.inner.lock();
                inner.fallback_allocations = inner.fallback_allocations.saturating_add(1);
                log::debug!(
                    "buffer pool: one-off allocation #{} ({} bytes)",
                    inner.fallback_allocations,
                    format.byte_len()
                );
                Ok(PooledBuffer {
                    buffer,
                    origin: Origin::Detached,
                })
            }
            None => Err(PoolError::Exhausted { capacity }),
        }
    }

    /// Returns a buffer to its free list. Releasing a buffer that belongs to another pool
    /// is a programming error: asserted in debug builds, ignored in release builds.
    pub fn release(&self, mut buffer: PooledBuffer) {
        if let Origin::Pool { pool_id, .. } = &buffer.origin {
            if *pool_id != self.shared.id {
                log::error!(
                    "buffer pool: release of foreign buffer (owner id={pool_id}, this id={})",
                    self.shared.id
                );
                if cfg!(debug_assertions) {
                    panic!("released a buffer into a pool that does not own it");
                }
                // The owner still gets it back through Drop.
                return;
            }
        }
        buffer.return_to_origin();
    }

    /// Drops the free list. Outstanding buffers are abandoned; their holders free them.
    pub fn teardown(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.torn_down {
            return;
        }
        log::info!(
            "buffer pool: teardown id={} abandoned_outstanding={} fallback_allocations={}",
            self.shared.id,
            inner.outstanding,
            inner.fallback_allocations
        );
        inner.torn_down = true;
        inner.free.clear();
        inner.outstanding = 0;
    }

    pub fn is_torn_down(&self) -> bool {
        self.shared.inner.lock().torn_down
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.shared.inner.lock();
        PoolStats {
            capacity: inner.capacity,
            available: inner.free.len(),
            outstanding: inner.outstanding,
            fallback_allocations: inner.fallback_allocations,
            exhaustion_events: inner.exhaustion_events,
            generation: inner.generation,
        }
    }
}

enum Origin {
    Pool {
        shared: Weak<PoolShared>,
        pool_id: u64,
        generation: u64,
    },
    /// One-off allocation made past capacity.
    Detached,
    /// Already given back.
    Returned,
}

/// Exclusive handle on an output buffer. Dropping it returns the buffer to its pool.
pub struct PooledBuffer {
    buffer: FrameBuffer,
    origin: Origin,
}

impl PooledBuffer {
    /// False for one-off buffers allocated past capacity.
    pub fn is_pooled(&self) -> bool {
        matches!(self.origin, Origin::Pool { .. })
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut FrameBuffer {
        &mut self.buffer
    }

    /// Address of the backing allocation; stable for the buffer's lifetime.
    pub fn storage_id(&self) -> usize {
        self.buffer.data().as_ptr() as usize
    }

    fn return_to_origin(&mut self) {
        let origin = std::mem::replace(&mut self.origin, Origin::Returned);
        if let Origin::Pool {
            shared, generation, ..
        } = origin
        {
            let buffer = std::mem::replace(&mut self.buffer, FrameBuffer::empty());
            // Pool gone: the buffer is simply freed here.
            if let Some(shared) = shared.upgrade() {
                shared.give_back(generation, buffer);
            }
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("format", &self.buffer.format())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

impl PixelBuffer for PooledBuffer {
    fn format(&self) -> BufferFormat {
        self.buffer.format()
    }

    fn data(&self) -> &[u8] {
        self.buffer.data()
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.buffer.data_mut()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.return_to_origin();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn configured(policy: ExhaustionPolicy, capacity: usize) -> BufferPool {
        let pool = BufferPool::with_policy(policy);
        pool.configure(64, 32, PixelFormat::Bgra8, capacity)
            .expect("configure pool");
        pool
    }

    #[test]
    fn preallocates_exactly_capacity_buffers() {
        let pool = configured(ExhaustionPolicy::FailFast, 4);
        let stats = pool.stats();
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.available, 4);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn capacity_acquires_return_distinct_buffers_then_fallback() {
        let pool = configured(ExhaustionPolicy::FallbackAllocate, 3);
        let held: Vec<PooledBuffer> = (0..3).map(|_| pool.acquire().expect("pooled")).collect();
        let distinct: HashSet<usize> = held.iter().map(PooledBuffer::storage_id).collect();
        assert_eq!(distinct.len(), 3);
        assert!(held.iter().all(PooledBuffer::is_pooled));

        let extra = pool.acquire().expect("fallback allocation");
        assert!(!extra.is_pooled());
        assert!(!distinct.contains(&extra.storage_id()));
        assert_eq!(extra.format(), BufferFormat::new(64, 32, PixelFormat::Bgra8));
        assert_eq!(pool.stats().outstanding, 3);
        assert_eq!(pool.stats().fallback_allocations, 1);
    }

    #[test]
    fn fail_fast_policy_reports_exhaustion() {
        let pool = configured(ExhaustionPolicy::FailFast, 3);
        let _held: Vec<PooledBuffer> = (0..3).map(|_| pool.acquire().expect("pooled")).collect();
        let err = pool.acquire().expect_err("pool should be exhausted");
        assert_eq!(err, PoolError::Exhausted { capacity: 3 });
    }

    #[test]
    fn release_and_drop_both_recycle() {
        let pool = configured(ExhaustionPolicy::FailFast, 3);
        let first = pool.acquire().expect("first");
        let id = first.storage_id();
        pool.release(first);
        assert_eq!(pool.stats().available, 3);

        let again = pool.acquire().expect("reacquire");
        assert_eq!(again.storage_id(), id);
        drop(again);
        assert_eq!(pool.stats().available, 3);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn release_from_another_thread_returns_buffer() {
        let pool = configured(ExhaustionPolicy::FailFast, 3);
        let buffer = pool.acquire().expect("acquire");
        let remote = pool.clone();
        std::thread::spawn(move || remote.release(buffer))
            .join()
            .expect("release thread");
        assert_eq!(pool.stats().available, 3);
    }

    #[test]
    fn unconfigured_pool_rejects_acquire() {
        let pool = BufferPool::with_policy(ExhaustionPolicy::FallbackAllocate);
        assert_eq!(pool.acquire().expect_err("unconfigured"), PoolError::NotConfigured);
    }

    #[test]
    fn teardown_abandons_outstanding_buffers() {
        let pool = configured(ExhaustionPolicy::FallbackAllocate, 3);
        let outstanding = pool.acquire().expect("acquire");
        pool.teardown();
        assert!(pool.is_torn_down());
        assert_eq!(pool.acquire().expect_err("torn down"), PoolError::TornDown);
        drop(outstanding);
        assert_eq!(pool.stats().available, 0);
    }

    #[test]
    fn buffers_outliving_the_pool_are_freed_by_holder() {
        let pool = configured(ExhaustionPolicy::FallbackAllocate, 3);
        let outstanding = pool.acquire().expect("acquire");
        drop(pool);
        assert_eq!(outstanding.width(), 64);
        drop(outstanding);
    }

    #[test]
    fn reconfigure_discards_previous_generation() {
        let pool = configured(ExhaustionPolicy::FailFast, 3);
        let old = pool.acquire().expect("acquire");
        pool.configure(128, 64, PixelFormat::Rgba8, 3)
            .expect("reconfigure");
        drop(old);
        let stats = pool.stats();
        assert_eq!(stats.available, 3);
        assert_eq!(stats.generation, 2);
        let fresh = pool.acquire().expect("acquire new generation");
        assert_eq!(fresh.width(), 128);
    }

    #[test]
    fn rejects_empty_format() {
        let pool = BufferPool::with_policy(ExhaustionPolicy::FailFast);
        assert!(matches!(
            pool.configure(0, 10, PixelFormat::Bgra8, 3),
            Err(PoolError::InvalidFormat(_))
        ));
        assert!(matches!(
            pool.configure(10, 10, PixelFormat::Bgra8, 0),
            Err(PoolError::InvalidFormat(_))
        ));
    }
}
