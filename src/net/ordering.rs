//! Client-bound reply ordering.
//!
//! # Responsibilities
//! - Reserve a slot, in request arrival order, for every request the client expects an answer to
//! - Hold replies that are ready early until every earlier slot has been delivered
//! - Gate client reads while held replies exceed the high watermark
//!
//! # Design Decisions
//! - Broker answers fill slots by correlation id; filter answers fill their slot at reservation
//! - A broker answer dropped by the filters releases its slot without writing anything

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::Notify;

use super::buffer::OutboundBuffer;

#[derive(Debug)]
enum Slot {
    /// Forwarded; waiting for the broker.
    Awaiting(i32),
    /// Settled. `None` delivers nothing.
    Ready(Option<Bytes>),
}

pub struct ReplyQueue {
    slots: RefCell<VecDeque<Slot>>,
    held: Cell<usize>,
    high_watermark: usize,
    released: Notify,
}

impl ReplyQueue {
    pub fn new(high_watermark: usize) -> Self {
        Self {
            slots: RefCell::new(VecDeque::new()),
            held: Cell::new(0),
            high_watermark,
            released: Notify::new(),
        }
    }

    /// Reserve a slot for a request forwarded to the broker.
    pub fn expect_broker(&self, correlation_id: i32) {
        self.slots.borrow_mut().push_back(Slot::Awaiting(correlation_id));
    }

    /// Queue a reply produced without the broker, behind every earlier slot.
    pub fn reply_now(&self, reply: Bytes, out: &OutboundBuffer) {
        self.held.set(self.held.get() + reply.len());
        self.slots.borrow_mut().push_back(Slot::Ready(Some(reply)));
        self.release(out);
    }

    /// Settle the slot of a broker answer. `None` when the filters dropped it.
    pub fn broker_replied(&self, correlation_id: i32, reply: Option<Bytes>, out: &OutboundBuffer) {
        let size = reply.as_ref().map_or(0, Bytes::len);
        {
            let mut slots = self.slots.borrow_mut();
            let awaiting = slots
                .iter_mut()
                .find(|slot| matches!(slot, Slot::Awaiting(id) if *id == correlation_id));
            match awaiting {
                Some(slot) => *slot = Slot::Ready(reply),
                None => slots.push_back(Slot::Ready(reply)),
            }
        }
        self.held.set(self.held.get() + size);
        self.release(out);
    }

    /// Move every reply at the head of the queue into `out`.
    fn release(&self, out: &OutboundBuffer) {
        let mut slots = self.slots.borrow_mut();
        while matches!(slots.front(), Some(Slot::Ready(_))) {
            if let Some(Slot::Ready(Some(reply))) = slots.pop_front() {
                self.held.set(self.held.get() - reply.len());
                out.push(reply);
            }
        }
        if self.is_writable() {
            self.released.notify_waiters();
        }
    }

    /// Replies awaiting an earlier slot, in bytes.
    pub fn held_bytes(&self) -> usize {
        self.held.get()
    }

    /// Slots not yet delivered.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    pub fn is_writable(&self) -> bool {
        self.held.get() <= self.high_watermark
    }

    /// Resolves once held replies are back under the high watermark.
    pub async fn wait_writable(&self) {
        loop {
            let released = self.released.notified();
            if self.is_writable() {
                return;
            }
            released.await;
        }
    }
}
