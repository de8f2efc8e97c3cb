use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::error::CompositorError;
use crate::models::media::{BufferRecycleFn, PixelBuffer};

struct PoolState {
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

struct PoolShared {
    state: Mutex<PoolState>,
    returned: Condvar,
}

/// Bounded pool of equally sized output buffers for the compositor.
///
/// At most `capacity` buffers exist at once. Buffers go back to the pool
/// when the `PixelBuffer` wrapping them is dropped, typically right after
/// the combined encoder has written the composed frame. When every buffer
/// is out, `acquire` waits up to the given bound and then reports
/// `ResourceExhausted` instead of allocating more.
pub struct FramePool {
    shared: Arc<PoolShared>,
    capacity: usize,
    buffer_len: usize,
}

impl FramePool {
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    free: Vec::with_capacity(capacity),
                    outstanding: 0,
                }),
                returned: Condvar::new(),
            }),
            capacity: capacity.max(1),
            buffer_len,
        }
    }

    /// Take a zeroed buffer, waiting at most `wait` for one to be returned.
    pub fn acquire(&self, wait: Duration) -> Result<PixelBuffer, CompositorError> {
        let deadline = Instant::now() + wait;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(mut bytes) = state.free.pop() {
                state.outstanding += 1;
                drop(state);
                bytes.fill(0);
                return Ok(self.wrap(bytes));
            }
            if state.outstanding < self.capacity {
                state.outstanding += 1;
                drop(state);
                return Ok(self.wrap(vec![0; self.buffer_len]));
            }
            if self.shared.returned.wait_until(&mut state, deadline).timed_out() && state.free.is_empty() {
                log::debug!(
                    "Frame pool exhausted ({} of {} buffers in use)",
                    state.outstanding,
                    self.capacity
                );
                return Err(CompositorError::ResourceExhausted);
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Buffers currently handed out.
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    fn wrap(&self, bytes: Vec<u8>) -> PixelBuffer {
        let pool: Weak<PoolShared> = Arc::downgrade(&self.shared);
        let buffer_len = self.buffer_len;
        let recycle: BufferRecycleFn = Arc::new(move |bytes: Vec<u8>| {
            let Some(shared) = pool.upgrade() else {
                return;
            };
            let mut state = shared.state.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            if bytes.len() == buffer_len {
                state.free.push(bytes);
            }
            drop(state);
            shared.returned.notify_one();
        });
        PixelBuffer::pooled(bytes, recycle)
    }
}
