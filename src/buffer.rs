//! Pool of reusable fixed-size receive and send blocks.
//!
//! [`BufferPool::rent`] checks a block out as a [`RentedBuffer`]. The rented
//! block has exactly one owner: it is moved, never cloned or shared, and it
//! goes back to the pool's free list when that owner drops it. Body streams
//! take ownership of the block they were filled from, so the block stays out
//! of the pool for as long as the caller holds the stream.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

// Idle blocks kept beyond this are freed instead of pooled.
const MAX_IDLE_BLOCKS: usize = 64;

struct PoolInner {
    block_size: usize,
    free: Mutex<Vec<Box<[u8]>>>,
    outstanding: AtomicUsize,
}

impl PoolInner {
    fn give_back(&self, block: Box<[u8]>) {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < MAX_IDLE_BLOCKS {
            free.push(block);
        }
        drop(free);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cloneable handle to a pool of fixed-size byte blocks.
///
/// # Examples
///
/// ```
/// use dbwire::BufferPool;
///
/// let pool = BufferPool::new(1024);
/// let block = pool.rent();
/// assert_eq!(block.len(), 1024);
/// assert_eq!(pool.outstanding(), 1);
/// drop(block);
/// assert_eq!(pool.outstanding(), 0);
/// assert_eq!(pool.available(), 1);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("block_size", &self.inner.block_size)
            .field("available", &self.available())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl BufferPool {
    /// Create an empty pool handing out blocks of `block_size` bytes.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                block_size,
                free: Mutex::new(Vec::new()),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Check out one block, reusing an idle one when available.
    ///
    /// Reused blocks are not zeroed; callers only read bytes they filled.
    #[must_use]
    pub fn rent(&self) -> RentedBuffer {
        let reused = self
            .inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let block = reused.unwrap_or_else(|| vec![0_u8; self.inner.block_size].into_boxed_slice());
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        RentedBuffer {
            block,
            pool: Arc::clone(&self.inner),
        }
    }

    #[must_use]
    pub fn block_size(&self) -> usize { self.inner.block_size }

    /// Number of idle blocks waiting in the pool.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of blocks currently checked out.
    #[must_use]
    pub fn outstanding(&self) -> usize { self.inner.outstanding.load(Ordering::Acquire) }
}

/// A block checked out from a [`BufferPool`].
///
/// Dereferences to the whole block. Returned to the pool on drop.
pub struct RentedBuffer {
    block: Box<[u8]>,
    pool: Arc<PoolInner>,
}

impl fmt::Debug for RentedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RentedBuffer")
            .field("len", &self.block.len())
            .finish_non_exhaustive()
    }
}

impl AsRef<[u8]> for RentedBuffer {
    fn as_ref(&self) -> &[u8] { &self.block }
}

impl Deref for RentedBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target { &self.block }
}

impl DerefMut for RentedBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.block }
}

impl Drop for RentedBuffer {
    fn drop(&mut self) {
        let block = std::mem::take(&mut self.block);
        self.pool.give_back(block);
    }
}
