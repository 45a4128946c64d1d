//! Bounded tail capture for process output.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};

/// Tail shared between a capture task and its reader.
pub type SharedTail = Arc<Mutex<TailBuffer>>;

/// Keeps the last `budget` bytes written to it.
#[derive(Debug, Clone)]
pub struct TailBuffer {
    budget: usize,
    buf: VecDeque<u8>,
    total: u64,
}

impl TailBuffer {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            buf: VecDeque::with_capacity(budget.min(64 * 1024)),
            total: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.total += bytes.len() as u64;
        if self.budget == 0 {
            return;
        }
        let keep = if bytes.len() > self.budget {
            &bytes[bytes.len() - self.budget..]
        } else {
            bytes
        };
        let overflow = (self.buf.len() + keep.len()).saturating_sub(self.budget);
        self.buf.drain(..overflow);
        self.buf.extend(keep);
    }

    /// Total bytes ever pushed, including discarded ones.
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn is_truncated(&self) -> bool {
        self.total > self.buf.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Retained bytes as text; a split multi-byte sequence at the cut point
    /// becomes a replacement character.
    pub fn to_string_lossy(&self) -> String {
        let (a, b) = self.buf.as_slices();
        let mut bytes = Vec::with_capacity(a.len() + b.len());
        bytes.extend_from_slice(a);
        bytes.extend_from_slice(b);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn shared(budget: usize) -> SharedTail {
        Arc::new(Mutex::new(Self::new(budget)))
    }
}

/// Read `reader` to EOF into `tail`. Read errors end the capture early rather
/// than failing it; whatever was captured stays in `tail` even if the task
/// running this is aborted.
pub async fn capture<R>(mut reader: R, tail: SharedTail)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut tail) = tail.lock() {
                    tail.push(&chunk[..n]);
                }
            }
        }
    }
}
