//! Fixed-capacity circular buffer of 16-bit signed samples.
//!
//! Readers repeatedly peek the most recent N samples without consuming
//! them, so this hand-rolls retain-and-overwrite semantics over a `Vec<i16>`
//! guarded by a `parking_lot::Mutex` rather than reaching for an SPSC queue
//! that drains on read.

use parking_lot::Mutex;

/// Thread-safe, fixed-capacity ring of the most recently captured samples.
pub struct RingBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    buf: Vec<i16>,
    /// Index in `buf` that the next `append` will write to.
    head: usize,
    /// Number of valid samples currently held, saturating at `capacity`.
    len: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                buf: vec![0; capacity],
                head: 0,
                len: 0,
            }),
        }
    }

    /// Append `samples`, wrapping and overwriting the oldest entries once
    /// `capacity` is exceeded. O(n).
    pub fn append(&self, samples: &[i16]) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        let Inner { buf, head, len } = &mut *inner;
        let cap = buf.len();

        // If the incoming batch alone exceeds capacity, only its tail matters.
        let samples = if samples.len() > cap {
            &samples[samples.len() - cap..]
        } else {
            samples
        };

        for &s in samples {
            buf[*head] = s;
            *head = (*head + 1) % cap;
        }
        *len = (*len + samples.len()).min(cap);
    }

    /// Return a freshly-allocated, chronologically-ordered copy of the most
    /// recent `min(count(), max_samples)` samples. Atomic w.r.t. `append`.
    pub fn snapshot(&self, max_samples: usize) -> Vec<i16> {
        let inner = self.inner.lock();
        let Inner { buf, head, len } = &*inner;
        let cap = buf.len();
        let take = (*len).min(max_samples);
        if take == 0 {
            return Vec::new();
        }

        // The most recent sample is at buf[head - 1] (mod cap); the oldest
        // of the `take` we want is `take` slots before that.
        let start = (*head + cap - take) % cap;
        let mut out = Vec::with_capacity(take);
        if start + take <= cap {
            out.extend_from_slice(&buf[start..start + take]);
        } else {
            let first_part = cap - start;
            out.extend_from_slice(&buf[start..cap]);
            out.extend_from_slice(&buf[..take - first_part]);
        }
        out
    }

    pub fn count(&self) -> usize {
        self.inner.lock().len
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.head = 0;
        inner.len = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_of_empty_buffer_is_empty() {
        let rb = RingBuffer::new(10);
        assert_eq!(rb.snapshot(10), Vec::<i16>::new());
        assert_eq!(rb.count(), 0);
    }

    #[test]
    fn snapshot_returns_recent_suffix_in_order() {
        let rb = RingBuffer::new(5);
        rb.append(&[1, 2, 3]);
        assert_eq!(rb.snapshot(10), vec![1, 2, 3]);
        assert_eq!(rb.count(), 3);
    }

    #[test]
    fn overflow_overwrites_oldest_fifo() {
        let rb = RingBuffer::new(5);
        rb.append(&[1, 2, 3, 4, 5]);
        rb.append(&[6, 7]);
        // 1, 2 were overwritten; remaining chronological order is 3..7
        assert_eq!(rb.snapshot(10), vec![3, 4, 5, 6, 7]);
        assert_eq!(rb.count(), 5);
    }

    #[test]
    fn snapshot_caps_at_requested_size() {
        let rb = RingBuffer::new(10);
        rb.append(&[1, 2, 3, 4, 5]);
        assert_eq!(rb.snapshot(3), vec![3, 4, 5]);
    }

    #[test]
    fn count_never_exceeds_capacity_after_many_appends() {
        let rb = RingBuffer::new(4);
        for chunk in 0..100 {
            rb.append(&[chunk as i16]);
        }
        assert_eq!(rb.count(), 4);
        assert_eq!(rb.snapshot(4), vec![96, 97, 98, 99]);
    }

    #[test]
    fn clear_resets_to_empty() {
        let rb = RingBuffer::new(4);
        rb.append(&[1, 2, 3]);
        rb.clear();
        assert_eq!(rb.count(), 0);
        assert_eq!(rb.snapshot(4), Vec::<i16>::new());
    }

    #[test]
    fn single_batch_larger_than_capacity_keeps_only_tail() {
        let rb = RingBuffer::new(3);
        rb.append(&[1, 2, 3, 4, 5]);
        assert_eq!(rb.snapshot(3), vec![3, 4, 5]);
    }
}
