//! Size-classed byte buffer pool.
//!
//! Packet reads and message packing borrow buffers from a process-wide pool
//! instead of allocating per query. A [`PooledBuf`] hands its storage back to
//! the pool when dropped, so every exit path (early `return`, `?`, panic
//! unwinding inside a query task) releases it.
//!
//! # Example
//!
//! ```
//! use ferrous_gate_infrastructure::pool;
//!
//! let mut buf = pool::get_buf(512);
//! assert_eq!(buf.len(), 512);
//! buf[0] = 0xAB;
//! drop(buf); // storage goes back to the 512-byte class
//! ```

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use hickory_proto::ProtoError;
use std::ops::{Deref, DerefMut};
use std::sync::{LazyLock, Mutex};

/// Largest UDP payload a read may ever need.
pub const MAX_PACKET_SIZE: usize = 65535;

const SIZE_CLASSES: [usize; 5] = [512, 2048, 4096, 16384, 65536];

/// Idle buffers retained per size class.
const MAX_IDLE_PER_CLASS: usize = 256;

static POOL: LazyLock<BufferPool> = LazyLock::new(BufferPool::new);

struct SizeClass {
    size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

struct BufferPool {
    classes: Vec<SizeClass>,
}

impl BufferPool {
    fn new() -> Self {
        Self {
            classes: SIZE_CLASSES
                .iter()
                .map(|&size| SizeClass {
                    size,
                    free: Mutex::new(Vec::new()),
                })
                .collect(),
        }
    }

    fn class_for(size: usize) -> Option<usize> {
        SIZE_CLASSES.iter().position(|&class| class >= size)
    }

    fn take(&self, size: usize) -> PooledBuf {
        let Some(class) = Self::class_for(size) else {
            return PooledBuf {
                buf: vec![0; size],
                class: None,
            };
        };

        let reused = self.classes[class]
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();

        let mut buf = reused.unwrap_or_else(|| Vec::with_capacity(self.classes[class].size));
        buf.resize(size, 0);

        PooledBuf {
            buf,
            class: Some(class),
        }
    }

    fn give_back(&self, class: usize, mut buf: Vec<u8>) {
        buf.clear();
        let mut free = self.classes[class]
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if free.len() < MAX_IDLE_PER_CLASS {
            free.push(buf);
        }
    }
}

/// A buffer borrowed from the pool. Dereferences to its filled bytes.
pub struct PooledBuf {
    buf: Vec<u8>,
    class: Option<usize>,
}

impl PooledBuf {
    /// Shorten the visible bytes to `len`.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    fn as_vec_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(class) = self.class {
            POOL.give_back(class, std::mem::take(&mut self.buf));
        }
    }
}

/// Borrow a buffer of exactly `size` bytes.
///
/// Sizes above the largest class are allocated directly and freed on drop.
pub fn get_buf(size: usize) -> PooledBuf {
    POOL.take(size)
}

/// Serialize `message` into a pooled buffer.
pub fn pack_buffer(message: &Message) -> Result<PooledBuf, ProtoError> {
    let mut buf = get_buf(512);
    buf.as_vec_mut().clear();
    {
        let mut encoder = BinEncoder::new(buf.as_vec_mut());
        message.emit(&mut encoder)?;
    }
    Ok(buf)
}

/// Serialize `message` for a stream transport: a big-endian `u16` length
/// followed by the message.
pub fn pack_tcp_buffer(message: &Message) -> Result<PooledBuf, ProtoError> {
    let mut buf = pack_buffer(message)?;
    let body_len = buf.len();
    let prefix = u16::try_from(body_len)
        .map_err(|_| ProtoError::from(format!("message too large for stream: {body_len}")))?;
    buf.as_vec_mut().splice(0..0, prefix.to_be_bytes());
    Ok(buf)
}
