//! Size-classed pool of reusable byte buffers
//!
//! I/O paths (stream copies, journal reads) borrow scratch buffers from a
//! [`BufferPool`] instead of allocating on every call.
//!
//! # Design
//!
//! - Requests up to [`BASIC_BUFFER_SIZE`] share a small free list of "basic"
//!   buffers; these dominate I/O calls
//! - Larger requests are rounded up to a power-of-two size class, starting at
//!   [`MIN_CLASS_SIZE`] and capped at [`MAX_CLASS_SIZE`]
//! - Requests above the cap are allocated exactly and never retained
//! - Retention is bounded per class and in total bytes, and `trim()` releases
//!   everything retained, so pooling never pins memory under pressure

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;
use serde::Serialize;

/// Size of a basic buffer
pub const BASIC_BUFFER_SIZE: usize = 8192;

/// Smallest size class above the basic buffers
pub const MIN_CLASS_SIZE: usize = BASIC_BUFFER_SIZE * 2;

/// Largest size class retained by the pool (4 MiB)
pub const MAX_CLASS_SIZE: usize = 1 << 22;

/// Number of basic buffers kept for reuse
pub const BASIC_COUNT_LIMIT: usize = 10;

/// Default number of buffers retained per size class
pub const DEFAULT_PER_CLASS_LIMIT: usize = 4;

/// Default upper bound on retained size-class bytes (16 MiB)
pub const DEFAULT_RETAINED_BYTES_LIMIT: usize = 16 << 20;

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferPoolStats {
    /// Basic buffers currently retained
    pub basic_retained: usize,
    /// Size-class buffers currently retained
    pub class_retained: usize,
    /// Bytes held by retained size-class buffers
    pub class_retained_bytes: usize,
}

#[derive(Debug, Default)]
struct ClassLists {
    lists: BTreeMap<usize, Vec<Vec<u8>>>,
    retained_bytes: usize,
}

/// Thread-safe pool of byte buffers
#[derive(Debug)]
pub struct BufferPool {
    /// Free list of basic buffers
    basic: Mutex<Vec<Vec<u8>>>,
    /// Free lists keyed by size class
    classes: Mutex<ClassLists>,
    /// Maximum buffers retained per class
    per_class_limit: usize,
    /// Maximum bytes retained across all classes
    retained_bytes_limit: usize,
}

impl BufferPool {
    /// Create a pool with default retention limits
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_PER_CLASS_LIMIT, DEFAULT_RETAINED_BYTES_LIMIT)
    }

    /// Create a pool with custom retention limits
    pub fn with_limits(per_class_limit: usize, retained_bytes_limit: usize) -> Self {
        Self {
            basic: Mutex::new(Vec::with_capacity(BASIC_COUNT_LIMIT)),
            classes: Mutex::new(ClassLists::default()),
            per_class_limit,
            retained_bytes_limit,
        }
    }

    /// Size class a request of `min_size` bytes is served from.
    ///
    /// Returns `min_size` itself for requests above [`MAX_CLASS_SIZE`].
    pub fn class_size(min_size: usize) -> usize {
        if min_size <= BASIC_BUFFER_SIZE {
            BASIC_BUFFER_SIZE
        } else if min_size <= MIN_CLASS_SIZE {
            MIN_CLASS_SIZE
        } else if min_size > MAX_CLASS_SIZE {
            min_size
        } else {
            min_size.next_power_of_two()
        }
    }

    /// Borrow a buffer of at least `min_size` bytes.
    ///
    /// The returned buffer's `len()` is its full class size; a reused buffer
    /// keeps whatever bytes its previous holder wrote.
    pub fn acquire(&self, min_size: usize) -> Vec<u8> {
        if min_size <= BASIC_BUFFER_SIZE {
            if let Some(buf) = self.basic.lock().pop() {
                return buf;
            }
            return vec![0u8; BASIC_BUFFER_SIZE];
        }

        let size = Self::class_size(min_size);
        if size > MAX_CLASS_SIZE {
            return vec![0u8; size];
        }

        {
            let mut classes = self.classes.lock();
            let found = classes
                .lists
                .range_mut(size..)
                .find_map(|(_, list)| list.pop());
            if let Some(buf) = found {
                classes.retained_bytes -= buf.len();
                return buf;
            }
        }
        vec![0u8; size]
    }

    /// Borrow a buffer that returns itself to the pool on drop
    pub fn acquire_guard(&self, min_size: usize) -> PooledBuffer<'_> {
        PooledBuffer {
            pool: self,
            buf: Some(self.acquire(min_size)),
        }
    }

    /// Return a buffer to the pool.
    ///
    /// Buffers whose length is not a pool size class are dropped, as are
    /// buffers that would push retention past the configured limits.
    pub fn release(&self, buf: Vec<u8>) {
        let len = buf.len();
        if len == BASIC_BUFFER_SIZE {
            let mut basic = self.basic.lock();
            if basic.len() < BASIC_COUNT_LIMIT {
                basic.push(buf);
            }
            return;
        }

        if !(MIN_CLASS_SIZE..=MAX_CLASS_SIZE).contains(&len) || !len.is_power_of_two() {
            return;
        }

        let mut classes = self.classes.lock();
        if classes.retained_bytes + len > self.retained_bytes_limit {
            return;
        }
        let per_class_limit = self.per_class_limit;
        let list = classes.lists.entry(len).or_default();
        if list.len() < per_class_limit {
            list.push(buf);
            classes.retained_bytes += len;
        }
    }

    /// Drop every retained size-class buffer
    pub fn trim(&self) {
        let mut classes = self.classes.lock();
        classes.lists.clear();
        classes.retained_bytes = 0;
    }

    /// Drop everything, basic buffers included
    pub fn clear(&self) {
        self.basic.lock().clear();
        self.trim();
    }

    /// Get pool statistics
    pub fn stats(&self) -> BufferPoolStats {
        let basic_retained = self.basic.lock().len();
        let classes = self.classes.lock();
        BufferPoolStats {
            basic_retained,
            class_retained: classes.lists.values().map(Vec::len).sum(),
            class_retained_bytes: classes.retained_bytes,
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// PooledBuffer
// =============================================================================

/// Buffer borrowed from a [`BufferPool`], released on drop
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<Vec<u8>>,
}

impl PooledBuffer<'_> {
    /// Take ownership of the buffer; it will not return to the pool
    pub fn into_inner(mut self) -> Vec<u8> {
        self.buf.take().unwrap_or_default()
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
