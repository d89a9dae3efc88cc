//! Byte ring buffers and the frame delimiting protocol
//!
//! Encoded frames travel as `<frame-bytes> 0x7F 0x7F` units inside a raw
//! byte stream. The send side appends frames to a ring and drains it in
//! chunks; the receive side inserts raw chunks and scans for terminators.
//!
//! Both sides share one overflow policy: data that does not fit is dropped
//! as a whole, the content already held is never touched.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::constants::{FRAME_TERMINATOR, SEPARATOR};

/// Fixed-capacity circular byte array.
///
/// Invariant: `len <= capacity`.
pub struct RingBuffer {
    data: Box<[u8]>,
    head: usize,
    len: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Append all of `bytes`, or nothing if they do not fit
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.free() {
            return false;
        }
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        let first = bytes.len().min(cap - tail);
        self.data[tail..tail + first].copy_from_slice(&bytes[..first]);
        self.data[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.len += bytes.len();
        true
    }

    /// Byte at `offset` from the head
    fn at(&self, offset: usize) -> u8 {
        self.data[(self.head + offset) % self.capacity()]
    }

    /// Copy the first `count` held bytes, as two slices when they wrap
    fn copy_front(&self, count: usize) -> BytesMut {
        let cap = self.capacity();
        let mut out = BytesMut::with_capacity(count);
        let first = count.min(cap - self.head);
        out.extend_from_slice(&self.data[self.head..self.head + first]);
        out.extend_from_slice(&self.data[..count - first]);
        out
    }

    fn advance(&mut self, count: usize) {
        let count = count.min(self.len);
        self.head = (self.head + count) % self.capacity();
        self.len -= count;
    }

    /// Remove and return up to `max` bytes from the head
    pub fn pop(&mut self, max: usize) -> Bytes {
        let count = max.min(self.len);
        let out = self.copy_front(count);
        self.advance(count);
        out.freeze()
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// Ring buffer speaking the terminator-delimited frame protocol
pub struct FramingBuffer {
    ring: RingBuffer,
    /// Chunks or frames refused for lack of space
    overflow_count: u64,
    /// Times the held bytes were discarded because no terminator was found
    resync_count: u64,
    /// Zero-length frames skipped
    empty_frames: u64,
}

/// Outcome of scanning the receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scan {
    Frame(Bytes),
    Empty,
    Desync,
    TooShort,
}

impl FramingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            overflow_count: 0,
            resync_count: 0,
            empty_frames: 0,
        }
    }

    /// Send side: append an encoded frame and its terminator.
    ///
    /// Skipped entirely when the frame plus terminator does not fit.
    pub fn append_frame(&mut self, frame: &[u8]) -> bool {
        if frame.len() + FRAME_TERMINATOR.len() > self.ring.free() {
            self.overflow_count += 1;
            return false;
        }
        self.ring.push(frame);
        self.ring.push(&FRAME_TERMINATOR);
        true
    }

    /// Send side: take up to `max` framed bytes for the wire
    pub fn drain(&mut self, max: usize) -> Bytes {
        self.ring.pop(max)
    }

    /// Receive side: append a raw chunk read from the socket.
    ///
    /// The whole chunk is dropped when it does not fit.
    pub fn insert(&mut self, chunk: &[u8]) -> bool {
        if self.ring.push(chunk) {
            true
        } else {
            self.overflow_count += 1;
            false
        }
    }

    /// Receive side: pull the next complete frame, if any.
    ///
    /// `None` means "no frame yet". It is also returned after skipping a
    /// zero-length frame, in which case bytes may still be held and the
    /// caller should try again.
    pub fn extract_frame(&mut self) -> Option<Bytes> {
        match self.scan() {
            Scan::Frame(frame) => Some(frame),
            Scan::Empty => {
                self.empty_frames += 1;
                None
            }
            Scan::Desync => {
                self.resync_count += 1;
                tracing::debug!(
                    discarded = self.ring.len(),
                    "No frame terminator in receive buffer, resynchronizing"
                );
                self.ring.clear();
                None
            }
            Scan::TooShort => None,
        }
    }

    fn scan(&mut self) -> Scan {
        let held = self.ring.len();
        if held < FRAME_TERMINATOR.len() {
            return Scan::TooShort;
        }

        let position = (0..held - 1)
            .find(|&i| self.ring.at(i) == SEPARATOR && self.ring.at(i + 1) == SEPARATOR);

        match position {
            None => Scan::Desync,
            Some(0) => {
                self.ring.advance(FRAME_TERMINATOR.len());
                Scan::Empty
            }
            Some(i) => {
                let frame = self.ring.copy_front(i).freeze();
                self.ring.advance(i + FRAME_TERMINATOR.len());
                Scan::Frame(frame)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Whether enough bytes are held for another extraction attempt
    pub fn may_hold_frame(&self) -> bool {
        self.ring.len() >= FRAME_TERMINATOR.len()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }

    pub fn stats(&self) -> FramingStats {
        FramingStats {
            held: self.ring.len(),
            capacity: self.ring.capacity(),
            overflow_count: self.overflow_count,
            resync_count: self.resync_count,
            empty_frames: self.empty_frames,
        }
    }
}

/// Framing buffer statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramingStats {
    pub held: usize,
    pub capacity: usize,
    pub overflow_count: u64,
    pub resync_count: u64,
    pub empty_frames: u64,
}

/// Thread-safe handle to a framing buffer
pub type SharedFramingBuffer = Arc<Mutex<FramingBuffer>>;

/// Create a new shared framing buffer
pub fn create_shared_buffer(capacity: usize) -> SharedFramingBuffer {
    Arc::new(Mutex::new(FramingBuffer::new(capacity)))
}
