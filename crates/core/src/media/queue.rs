//! Single-producer, many-consumer queue of packetized buffers.
//!
//! Every track owns one [`BufferProducer`]. Each RTP session playing the
//! track holds a [`BufferConsumer`] with its own read position. An element
//! is reclaimed once every live consumer has moved past it; a consumer that
//! goes away gives back its reads so it never pins the queue. With no
//! consumer attached nothing is retained: a late subscriber starts with the
//! next buffer put.
//!
//! [`BufferProducer::reset`] (used on seek) drops everything queued and
//! bumps the queue serial; consumers notice the new serial on their next
//! access and restart at the head.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::PacketizedBuffer;

#[derive(Debug)]
struct Entry {
    buffer: PacketizedBuffer,
    seen: usize,
}

#[derive(Debug, Default)]
struct Shared {
    entries: VecDeque<Entry>,
    /// Absolute position of `entries[0]`.
    head: u64,
    serial: u64,
    consumers: usize,
    finished: bool,
}

impl Shared {
    fn reclaim(&mut self) {
        if self.consumers == 0 {
            let dropped = self.entries.len() as u64;
            self.entries.clear();
            self.head += dropped;
            return;
        }
        while self
            .entries
            .front()
            .is_some_and(|e| e.seen >= self.consumers)
        {
            self.entries.pop_front();
            self.head += 1;
        }
    }
}

/// Write side of a track queue.
#[derive(Debug, Default)]
pub struct BufferProducer {
    shared: Arc<Mutex<Shared>>,
}

impl BufferProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one buffer for every attached consumer.
    pub fn put(&self, buffer: PacketizedBuffer) {
        let mut shared = self.shared.lock();
        shared.entries.push_back(Entry { buffer, seen: 0 });
        shared.reclaim();
    }

    pub fn extend(&self, buffers: impl IntoIterator<Item = PacketizedBuffer>) {
        let mut shared = self.shared.lock();
        shared
            .entries
            .extend(buffers.into_iter().map(|buffer| Entry { buffer, seen: 0 }));
        shared.reclaim();
    }

    /// Attach a new consumer positioned at the current head.
    pub fn subscribe(&self) -> BufferConsumer {
        let mut shared = self.shared.lock();
        shared.consumers += 1;
        BufferConsumer {
            shared: Arc::clone(&self.shared),
            next: shared.head,
            serial: shared.serial,
        }
    }

    /// Drop all queued buffers and restart every consumer at the new head.
    pub fn reset(&self) {
        let mut shared = self.shared.lock();
        let dropped = shared.entries.len() as u64;
        shared.entries.clear();
        shared.head += dropped;
        shared.serial += 1;
        shared.finished = false;
        tracing::debug!(dropped, serial = shared.serial, "buffer queue reset");
    }

    /// Mark that no more buffers will be put until the next reset.
    pub fn finish(&self) {
        self.shared.lock().finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.shared.lock().finished
    }

    /// Buffers currently held.
    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn consumers(&self) -> usize {
        self.shared.lock().consumers
    }
}

/// Read side of a track queue, one per session.
#[derive(Debug)]
pub struct BufferConsumer {
    shared: Arc<Mutex<Shared>>,
    next: u64,
    serial: u64,
}

impl BufferConsumer {
    fn sync(&mut self, shared: &Shared) {
        if self.serial != shared.serial || self.next < shared.head {
            self.serial = shared.serial;
            self.next = shared.head;
        }
    }

    /// The buffer at this consumer's position, if one is queued.
    pub fn current(&mut self) -> Option<PacketizedBuffer> {
        let shared = self.shared.clone();
        let shared = shared.lock();
        self.sync(&shared);
        let idx = (self.next - shared.head) as usize;
        shared.entries.get(idx).map(|e| e.buffer.clone())
    }

    /// Mark the current buffer seen and move on. Returns false when there
    /// was nothing to move past.
    pub fn advance(&mut self) -> bool {
        let shared = self.shared.clone();
        let mut shared = shared.lock();
        self.sync(&shared);
        let idx = (self.next - shared.head) as usize;
        match shared.entries.get_mut(idx) {
            Some(entry) => {
                entry.seen += 1;
                self.next += 1;
                shared.reclaim();
                true
            }
            None => false,
        }
    }

    /// Buffers queued ahead of this consumer.
    pub fn unseen(&mut self) -> usize {
        let shared = self.shared.clone();
        let shared = shared.lock();
        self.sync(&shared);
        shared.entries.len() - (self.next - shared.head) as usize
    }

    /// True once the producer finished and this consumer has read everything.
    pub fn is_drained(&mut self) -> bool {
        let shared = self.shared.clone();
        let shared = shared.lock();
        self.sync(&shared);
        shared.finished && self.next - shared.head == shared.entries.len() as u64
    }
}

impl Drop for BufferConsumer {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        if self.serial == shared.serial {
            let read = self.next.saturating_sub(shared.head) as usize;
            for entry in shared.entries.iter_mut().take(read) {
                entry.seen = entry.seen.saturating_sub(1);
            }
        }
        shared.consumers = shared.consumers.saturating_sub(1);
        shared.reclaim();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(n: u8) -> PacketizedBuffer {
        PacketizedBuffer {
            payload: vec![n].into(),
            pts: n as f64,
            dts: n as f64,
            duration: 1.0,
            marker: true,
        }
    }

    fn tag(b: Option<PacketizedBuffer>) -> Option<u8> {
        b.map(|b| b.payload[0])
    }

    #[test]
    fn consumers_read_independently() {
        let q = BufferProducer::new();
        let mut a = q.subscribe();
        let mut b = q.subscribe();
        q.extend([buf(1), buf(2)]);

        assert_eq!(tag(a.current()), Some(1));
        assert!(a.advance());
        assert_eq!(tag(a.current()), Some(2));
        assert_eq!(tag(b.current()), Some(1));
        assert_eq!(a.unseen(), 1);
        assert_eq!(b.unseen(), 2);
    }

    #[test]
    fn reclaimed_after_all_consumers_pass() {
        let q = BufferProducer::new();
        let mut a = q.subscribe();
        let mut b = q.subscribe();
        q.put(buf(1));
        a.advance();
        assert_eq!(q.len(), 1);
        b.advance();
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn dropped_consumer_does_not_pin_queue() {
        let q = BufferProducer::new();
        let mut a = q.subscribe();
        let b = q.subscribe();
        q.extend([buf(1), buf(2)]);
        a.advance();
        assert_eq!(q.len(), 2);
        drop(b);
        assert_eq!(q.consumers(), 1);
        assert_eq!(q.len(), 1);
        assert_eq!(tag(a.current()), Some(2));
    }

    #[test]
    fn dropped_reader_returns_its_reads() {
        let q = BufferProducer::new();
        let mut a = q.subscribe();
        let mut b = q.subscribe();
        let mut c = q.subscribe();
        q.put(buf(1));
        a.advance();
        b.advance();
        drop(b);
        // a read it, c has not: one seen among two live consumers.
        assert_eq!(q.len(), 1);
        c.advance();
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn reset_restarts_consumers_at_head() {
        let q = BufferProducer::new();
        let mut a = q.subscribe();
        q.extend([buf(1), buf(2), buf(3)]);
        a.advance();
        q.reset();
        assert!(q.is_empty());
        assert_eq!(a.current(), None);
        q.put(buf(9));
        assert_eq!(tag(a.current()), Some(9));
    }

    #[test]
    fn nothing_retained_without_consumers() {
        let q = BufferProducer::new();
        drop(q.subscribe());
        for i in 0..500u32 {
            q.put(buf(i as u8));
        }
        assert_eq!(q.len(), 0);
        q.extend([buf(1), buf(2)]);
        assert!(q.is_empty());

        let mut late = q.subscribe();
        assert_eq!(late.current(), None);
        q.put(buf(7));
        assert_eq!(tag(late.current()), Some(7));
        assert_eq!(late.unseen(), 1);
    }

    #[test]
    fn last_consumer_leaving_empties_queue() {
        let q = BufferProducer::new();
        let a = q.subscribe();
        q.extend([buf(1), buf(2), buf(3)]);
        assert_eq!(q.len(), 3);
        drop(a);
        assert!(q.is_empty());
    }

    #[test]
    fn drained_only_after_finish() {
        let q = BufferProducer::new();
        let mut a = q.subscribe();
        q.put(buf(1));
        q.finish();
        assert!(!a.is_drained());
        a.advance();
        assert!(a.is_drained());
        assert!(!a.advance());
    }
}
