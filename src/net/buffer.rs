//! Per-leg outbound buffer with write watermarks.
//!
//! The buffer feeding one leg's socket doubles as the read gate of the other
//! leg: while it holds more than the high watermark, the peer stops reading
//! until the writer drains it below the low watermark.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

pub struct OutboundBuffer {
    chunks: RefCell<VecDeque<Bytes>>,
    pending: Cell<usize>,
    low_watermark: usize,
    high_watermark: usize,
    writable: Cell<bool>,
    closed: Cell<bool>,
    /// Wakes the writer when data arrives or the buffer closes.
    queued: Notify,
    /// Wakes gated readers when the buffer becomes writable again.
    drained: Notify,
}

impl OutboundBuffer {
    pub fn new(low_watermark: usize, high_watermark: usize) -> Self {
        Self {
            chunks: RefCell::new(VecDeque::new()),
            pending: Cell::new(0),
            low_watermark,
            high_watermark,
            writable: Cell::new(true),
            closed: Cell::new(false),
            queued: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Queue bytes for the writer.
    pub fn push(&self, bytes: Bytes) {
        if self.closed.get() || bytes.is_empty() {
            return;
        }
        let pending = self.pending.get() + bytes.len();
        self.pending.set(pending);
        self.chunks.borrow_mut().push_back(bytes);
        if self.writable.get() && pending > self.high_watermark {
            self.writable.set(false);
        }
        self.queued.notify_one();
    }

    /// Bytes queued or being written.
    pub fn pending_bytes(&self) -> usize {
        self.pending.get()
    }

    pub fn is_writable(&self) -> bool {
        self.writable.get()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Resolves once the buffer is below its low watermark, or closed.
    pub async fn wait_writable(&self) {
        loop {
            let drained = self.drained.notified();
            if self.writable.get() || self.closed.get() {
                return;
            }
            drained.await;
        }
    }

    /// Stop accepting data. The writer flushes what is queued, then shuts down.
    pub fn close(&self) {
        self.closed.set(true);
        self.queued.notify_one();
        self.drained.notify_waiters();
    }

    /// Write queued chunks to `writer` until the buffer is closed and empty.
    pub async fn drain_into<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let next = self.chunks.borrow_mut().pop_front();
            match next {
                Some(chunk) => {
                    writer.write_all(&chunk).await?;
                    let pending = self.pending.get() - chunk.len();
                    self.pending.set(pending);
                    if !self.writable.get() && pending < self.low_watermark.max(1) {
                        self.writable.set(true);
                        self.drained.notify_waiters();
                    }
                }
                None if self.closed.get() => {
                    writer.flush().await?;
                    writer.shutdown().await?;
                    return Ok(());
                }
                None => {
                    writer.flush().await?;
                    self.queued.notified().await;
                }
            }
        }
    }
}
