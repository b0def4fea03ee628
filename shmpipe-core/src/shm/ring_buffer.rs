// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Lock-free circular byte ring for cross-process IPC.
//!
//! One producer advances `write_idx`, one consumer advances `read_idx`, both
//! modulo the capacity. One slot always stays empty so that equal indices mean
//! "empty". The two ends may live in unrelated processes, so every index
//! publication is bracketed by a full hardware fence.

use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, AtomicUsize, Ordering};

use crate::error::RingError;
use crate::types::MIN_RING_CAPACITY;

/// Cache line sized wrapper so the two index words never share a line.
#[repr(C, align(64))]
struct CacheLine<T>(T);

/// Index words of one ring as they sit in shared memory.
#[repr(C)]
pub(crate) struct RingHeader {
    write_idx: CacheLine<AtomicUsize>,
    read_idx: CacheLine<AtomicUsize>,
}

/// Bytes occupied by one [`RingHeader`].
pub(crate) const RING_HEADER_SIZE: usize = std::mem::size_of::<RingHeader>();

/// Alignment required for a [`RingHeader`].
pub(crate) const RING_HEADER_ALIGN: usize = std::mem::align_of::<RingHeader>();

impl RingHeader {
    const fn empty() -> Self {
        Self {
            write_idx: CacheLine(AtomicUsize::new(0)),
            read_idx: CacheLine(AtomicUsize::new(0)),
        }
    }
}

/// Free bytes for the given indices.
#[inline(always)]
const fn free_between(read_idx: usize, write_idx: usize, capacity: usize) -> usize {
    (read_idx + capacity - write_idx - 1) % capacity
}

/// Queued bytes for the given indices.
#[inline(always)]
const fn used_between(read_idx: usize, write_idx: usize, capacity: usize) -> usize {
    (write_idx + capacity - read_idx) % capacity
}

/// A fixed-capacity SPSC byte ring living in memory it does not own.
///
/// The ring only hands out role-bound handles: at most one [`Producer`] and one
/// [`Consumer`] exist per exclusive borrow, so the single-writer rule for each
/// index word holds by construction.
pub struct RingBuffer {
    header: NonNull<RingHeader>,
    data: NonNull<u8>,
    capacity: usize,
}

// SAFETY: index words are atomics and the data bytes are only touched through
// a Producer or Consumer, each of which is unique per exclusive borrow.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Initialize an empty ring over `header` and `capacity` bytes at `data`.
    ///
    /// # Safety
    /// `header` must be valid and aligned for a `RingHeader`, `data` must be
    /// valid for `capacity` bytes, and both must outlive the returned ring.
    pub(crate) unsafe fn init(
        header: NonNull<RingHeader>,
        data: NonNull<u8>,
        capacity: usize,
    ) -> Result<Self, RingError> {
        Self::check_capacity(capacity)?;
        header.as_ptr().write(RingHeader::empty());
        fence(Ordering::SeqCst);
        Ok(Self {
            header,
            data,
            capacity,
        })
    }

    /// Bind to a ring another process already initialized.
    ///
    /// # Safety
    /// Same requirements as [`RingBuffer::init`].
    pub(crate) unsafe fn from_raw(
        header: NonNull<RingHeader>,
        data: NonNull<u8>,
        capacity: usize,
    ) -> Result<Self, RingError> {
        Self::check_capacity(capacity)?;
        Ok(Self {
            header,
            data,
            capacity,
        })
    }

    fn check_capacity(capacity: usize) -> Result<(), RingError> {
        if capacity < MIN_RING_CAPACITY {
            return Err(RingError::InvalidCapacity {
                capacity,
                min: MIN_RING_CAPACITY,
            });
        }
        Ok(())
    }

    /// Total capacity in bytes. At most `capacity() - 1` bytes are queued.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes the producer could write right now.
    pub fn free_space(&self) -> usize {
        let (read_idx, write_idx) = self.indices();
        free_between(read_idx, write_idx, self.capacity)
    }

    /// Bytes the consumer could read right now.
    pub fn used_space(&self) -> usize {
        let (read_idx, write_idx) = self.indices();
        used_between(read_idx, write_idx, self.capacity)
    }

    /// Check if the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.used_space() == 0
    }

    /// The writing end.
    pub fn producer(&mut self) -> Producer<'_> {
        Producer::new(self)
    }

    /// The reading end.
    pub fn consumer(&mut self) -> Consumer<'_> {
        Consumer::new(self)
    }

    /// Both ends at once, e.g. for an in-process pipe.
    pub fn split(&mut self) -> (Producer<'_>, Consumer<'_>) {
        let ring: &RingBuffer = self;
        (Producer::new(ring), Consumer::new(ring))
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: header validity is a constructor precondition.
        unsafe { self.header.as_ref() }
    }

    // Indices come from another process; keep them in range.
    #[inline(always)]
    fn load_read_idx(&self) -> usize {
        self.header().read_idx.0.load(Ordering::Relaxed) % self.capacity
    }

    #[inline(always)]
    fn load_write_idx(&self) -> usize {
        self.header().write_idx.0.load(Ordering::Relaxed) % self.capacity
    }

    fn indices(&self) -> (usize, usize) {
        let read_idx = self.load_read_idx();
        let write_idx = self.load_write_idx();
        fence(Ordering::SeqCst);
        (read_idx, write_idx)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (read_idx, write_idx) = self.indices();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("read_idx", &read_idx)
            .field("write_idx", &write_idx)
            .finish()
    }
}

/// Writing end of a [`RingBuffer`]. Only this handle moves `write_idx`.
#[derive(Debug)]
pub struct Producer<'a> {
    ring: &'a RingBuffer,
    _not_clone: PhantomData<*mut ()>,
}

// SAFETY: the handle is unique for its borrow; see RingBuffer.
unsafe impl Send for Producer<'_> {}

impl<'a> Producer<'a> {
    fn new(ring: &'a RingBuffer) -> Self {
        Self {
            ring,
            _not_clone: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    pub fn free_space(&self) -> usize {
        self.ring.free_space()
    }

    pub fn used_space(&self) -> usize {
        self.ring.used_space()
    }

    /// Copy all of `bytes` into the ring and publish them.
    ///
    /// Never writes partially: a request larger than [`Producer::free_space`]
    /// is rejected untouched. Splitting large writes is the caller's job.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), RingError> {
        let ring = self.ring;
        let capacity = ring.capacity;
        let write_idx = ring.load_write_idx();
        let read_idx = ring.load_read_idx();
        // The consumer is done with every byte behind read_idx.
        fence(Ordering::SeqCst);

        let available = free_between(read_idx, write_idx, capacity);
        if bytes.len() > available {
            return Err(RingError::InsufficientSpace {
                requested: bytes.len(),
                available,
            });
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let first = bytes.len().min(capacity - write_idx);
        // SAFETY: write_idx < capacity, first + write_idx <= capacity and the
        // remainder fits at the start because bytes.len() <= free space.
        unsafe {
            let data = ring.data.as_ptr();
            ptr::copy_nonoverlapping(bytes.as_ptr(), data.add(write_idx), first);
            if first < bytes.len() {
                ptr::copy_nonoverlapping(bytes.as_ptr().add(first), data, bytes.len() - first);
            }
        }

        // Payload must be visible before the new index.
        fence(Ordering::SeqCst);
        ring.header()
            .write_idx
            .0
            .store((write_idx + bytes.len()) % capacity, Ordering::Relaxed);
        Ok(())
    }
}

/// Reading end of a [`RingBuffer`]. Only this handle moves `read_idx`.
#[derive(Debug)]
pub struct Consumer<'a> {
    ring: &'a RingBuffer,
    _not_clone: PhantomData<*mut ()>,
}

// SAFETY: the handle is unique for its borrow; see RingBuffer.
unsafe impl Send for Consumer<'_> {}

impl<'a> Consumer<'a> {
    fn new(ring: &'a RingBuffer) -> Self {
        Self {
            ring,
            _not_clone: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    pub fn free_space(&self) -> usize {
        self.ring.free_space()
    }

    pub fn used_space(&self) -> usize {
        self.ring.used_space()
    }

    /// Move up to `buf.len()` queued bytes into `buf`.
    ///
    /// Returns the number of bytes copied, `min(buf.len(), used_space())`.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let ring = self.ring;
        let capacity = ring.capacity;
        let read_idx = ring.load_read_idx();
        let write_idx = ring.load_write_idx();
        // Payload covered by write_idx is visible past this point.
        fence(Ordering::SeqCst);

        let len = buf.len().min(used_between(read_idx, write_idx, capacity));
        if len == 0 {
            return 0;
        }

        let first = len.min(capacity - read_idx);
        // SAFETY: read_idx < capacity and len <= used space, so both copies
        // stay inside the data area and cover published bytes only.
        unsafe {
            let data = ring.data.as_ptr();
            ptr::copy_nonoverlapping(data.add(read_idx), buf.as_mut_ptr(), first);
            if first < len {
                ptr::copy_nonoverlapping(data, buf.as_mut_ptr().add(first), len - first);
            }
        }

        // Done with the bytes before handing them back to the producer.
        fence(Ordering::SeqCst);
        ring.header()
            .read_idx
            .0
            .store((read_idx + len) % capacity, Ordering::Relaxed);
        len
    }

    /// Read up to `max_len` bytes into a fresh vector.
    pub fn read_vec(&mut self, max_len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; max_len.min(self.used_space())];
        let n = self.read(&mut buf);
        buf.truncate(n);
        buf
    }
}

/// Heap-backed ring for in-process pipes, tests and benchmarks.
pub struct LocalRing {
    ring: RingBuffer,
    layout: Layout,
}

impl LocalRing {
    /// Allocate and initialize an empty ring of `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        RingBuffer::check_capacity(capacity)?;
        let layout = Layout::from_size_align(RING_HEADER_SIZE + capacity, RING_HEADER_ALIGN)
            .map_err(|_| RingError::InvalidCapacity {
                capacity,
                min: MIN_RING_CAPACITY,
            })?;

        // SAFETY: layout has a non-zero size.
        let base = unsafe { alloc::alloc_zeroed(layout) };
        let Some(base) = NonNull::new(base) else {
            alloc::handle_alloc_error(layout);
        };

        // SAFETY: base is aligned for RingHeader and spans header + capacity.
        let ring = unsafe {
            let data = NonNull::new_unchecked(base.as_ptr().add(RING_HEADER_SIZE));
            RingBuffer::init(base.cast(), data, capacity)?
        };
        Ok(Self { ring, layout })
    }
}

impl Deref for LocalRing {
    type Target = RingBuffer;

    fn deref(&self) -> &RingBuffer {
        &self.ring
    }
}

impl DerefMut for LocalRing {
    fn deref_mut(&mut self) -> &mut RingBuffer {
        &mut self.ring
    }
}

impl Drop for LocalRing {
    fn drop(&mut self) {
        // SAFETY: allocated in LocalRing::new with this layout.
        unsafe { alloc::dealloc(self.ring.header.as_ptr().cast(), self.layout) };
    }
}

impl std::fmt::Debug for LocalRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.ring.fmt(f)
    }
}
