//! Shared, reference-counted backing buffers and the guards that expose windows of them.
//!
//! A buffer may be referenced by any number of tensors. Each tensor only ever sees the element
//! range `[offset, offset + len)` that its shape covers, so the guards deref to exactly that
//! window. Locks are taken with `try_*` so that an overlapping read/write on the same buffer
//! reports [`TensorError::BufferBusy`] instead of blocking the sense loop.

use std::fmt;
use std::ops::{Deref, DerefMut, Range};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use crate::error::{TensorError, TensorResult};

struct Inner {
    len: usize,
    data: RwLock<Box<[f32]>>,
}

/// Reference-counted `f32` buffer shared between tensor aliases.
#[derive(Clone)]
pub(crate) struct Storage {
    inner: Arc<Inner>,
}

impl Storage {
    pub(crate) fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0.0; len])
    }

    pub(crate) fn from_vec(data: Vec<f32>) -> Self {
        Storage {
            inner: Arc::new(Inner {
                len: data.len(),
                data: RwLock::new(data.into_boxed_slice()),
            }),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len
    }

    pub(crate) fn ptr_eq(a: &Storage, b: &Storage) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Number of live tensor aliases holding this buffer.
    pub(crate) fn alias_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub(crate) fn read(&self, range: Range<usize>) -> TensorResult<ReadGuard<'_>> {
        debug_assert!(range.end <= self.inner.len);
        let guard = match self.inner.data.try_read() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(TensorError::BufferBusy),
            Err(TryLockError::Poisoned(_)) => return Err(TensorError::Poisoned),
        };
        Ok(ReadGuard { guard, range })
    }

    pub(crate) fn write(&self, range: Range<usize>) -> TensorResult<WriteGuard<'_>> {
        debug_assert!(range.end <= self.inner.len);
        let guard = match self.inner.data.try_write() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(TensorError::BufferBusy),
            Err(TryLockError::Poisoned(_)) => return Err(TensorError::Poisoned),
        };
        Ok(WriteGuard { guard, range })
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("len", &self.inner.len)
            .field("aliases", &self.alias_count())
            .finish()
    }
}

/// Shared borrow of a tensor's element window.
pub struct ReadGuard<'a> {
    guard: RwLockReadGuard<'a, Box<[f32]>>,
    range: Range<usize>,
}

impl Deref for ReadGuard<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.guard[self.range.clone()]
    }
}

/// Exclusive borrow of a tensor's element window.
pub struct WriteGuard<'a> {
    guard: RwLockWriteGuard<'a, Box<[f32]>>,
    range: Range<usize>,
}

impl Deref for WriteGuard<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.guard[self.range.clone()]
    }
}

impl DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.guard[self.range.clone()]
    }
}
