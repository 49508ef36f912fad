//! Process-wide pool of reusable encode buffers.
//!
//! Frame and message assembly borrow a buffer with [`get_buffer`], fill it,
//! and let it return to the pool on drop. A buffer is exclusively held
//! between the two points; callers that need the contents past release must
//! copy them out first, because the buffer may be reissued.

use object_pool::Pool;
use once_cell::sync::Lazy;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Initial capacity of each pooled buffer.
const BUFFER_CAPACITY: usize = 4096;

/// Number of idle buffers the pool retains.
const POOL_CAPACITY: usize = 128;

static POOL: Lazy<BufferPool> = Lazy::new(BufferPool::new);

/// Takes a cleared buffer from the process-wide pool.
pub fn get_buffer() -> PooledBuf {
    POOL.get()
}

/// A pool of growable byte buffers.
#[derive(Clone)]
pub struct BufferPool {
    pool: Arc<Pool<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(Pool::new(POOL_CAPACITY, || {
                Vec::with_capacity(BUFFER_CAPACITY)
            })),
        }
    }

    /// Takes a buffer, cleared of whatever the previous holder left in it.
    pub fn get(&self) -> PooledBuf {
        let mut buf = self
            .pool
            .pull_owned(|| Vec::with_capacity(BUFFER_CAPACITY));
        buf.clear();
        PooledBuf { inner: buf }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer on loan from the pool. Dropping it is the release: the length
/// resets and the allocation goes back for reuse.
pub struct PooledBuf {
    inner: object_pool::ReusableOwned<Vec<u8>>,
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl AsRef<[u8]> for PooledBuf {
    fn as_ref(&self) -> &[u8] {
        self.inner.as_slice()
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.inner.len())
            .field("capacity", &self.inner.capacity())
            .finish()
    }
}
