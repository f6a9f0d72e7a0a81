//! Fixed-capacity circular byte store for captured PCM.
//!
//! The producer is a capture callback that must never block or fail, so a
//! write that does not fit overwrites the oldest bytes. The consumer reads
//! whole frames only: a read either returns exactly the requested length or
//! fails with [`LiveError::InsufficientData`] and leaves the buffer untouched.

use std::sync::{Mutex, PoisonError};

use crate::error::{LiveError, Result};

const DEFAULT_CAPACITY: usize = 4096;

pub struct RingBuffer {
    inner: Mutex<RingState>,
}

struct RingState {
    data: Box<[u8]>,
    write_pos: usize,
    read_pos: usize,
    len: usize,
}

impl RingBuffer {
    /// Create a buffer holding `capacity` bytes. A zero capacity falls back to 4 KiB.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        Self {
            inner: Mutex::new(RingState {
                data: vec![0u8; capacity].into_boxed_slice(),
                write_pos: 0,
                read_pos: 0,
                len: 0,
            }),
        }
    }

    /// Append bytes, dropping the oldest data on overflow.
    ///
    /// Input longer than the capacity is truncated to its trailing bytes.
    /// Returns the number of bytes actually stored.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut state = self.lock();
        let cap = state.data.len();

        let bytes = if bytes.len() > cap {
            &bytes[bytes.len() - cap..]
        } else {
            bytes
        };
        let n = bytes.len();
        if n == 0 {
            return 0;
        }

        let start = state.write_pos;
        let first = n.min(cap - start);
        state.data[start..start + first].copy_from_slice(&bytes[..first]);
        if first < n {
            state.data[..n - first].copy_from_slice(&bytes[first..]);
        }
        state.write_pos = (start + n) % cap;

        state.len += n;
        if state.len > cap {
            let overwritten = state.len - cap;
            state.read_pos = (state.read_pos + overwritten) % cap;
            state.len = cap;
        }

        n
    }

    /// Fill `buf` completely from the oldest stored bytes.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let wanted = buf.len();
        if wanted == 0 {
            return Ok(0);
        }

        let mut state = self.lock();
        if state.len < wanted {
            return Err(LiveError::InsufficientData {
                requested: wanted,
                available: state.len,
            });
        }

        let cap = state.data.len();
        let start = state.read_pos;
        let first = wanted.min(cap - start);
        buf[..first].copy_from_slice(&state.data[start..start + first]);
        if first < wanted {
            buf[first..].copy_from_slice(&state.data[..wanted - first]);
        }
        state.read_pos = (start + wanted) % cap;
        state.len -= wanted;

        Ok(wanted)
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().data.len()
    }

    /// Drop all stored bytes without reallocating.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.write_pos = 0;
        state.read_pos = 0;
        state.len = 0;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RingState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
