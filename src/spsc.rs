//! Bounded single-producer/single-consumer ring buffer.
//!
//! Every thread boundary in the system is one of these: order server →
//! matching engine, engine → order server, engine → market-data publisher,
//! publisher → snapshot synthesizer, consumer → participant. The split
//! [`Producer`]/[`Consumer`] handles make the one-writer/one-reader contract
//! a type-system fact instead of a comment.
//!
//! Publication uses release/acquire ordering on the two cursors: the
//! producer's release store of the write cursor makes the filled slot visible
//! to the consumer, and the consumer's release store of the read cursor hands
//! the slot back. Capacity is fixed at construction; overflow is a
//! design-time sizing error, so [`Producer::push`] treats a full ring as
//! fatal.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returned by [`Producer::try_push`] when the ring is full; carries the
/// rejected value back to the caller.
pub struct Full<T>(pub T);

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

struct Shared<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Next sequence to write; owned by the producer.
    write: CachePadded<AtomicUsize>,
    /// Next sequence to read; owned by the consumer.
    read: CachePadded<AtomicUsize>,
}

// SAFETY: the producer is the only writer of `write` and of unpublished
// slots; the consumer is the only writer of `read` and only reads slots
// already published by a release store of `write`. The release/acquire pairs
// on the cursors establish the happens-before edges both directions.
unsafe impl<T: Send> Sync for Shared<T> {}
unsafe impl<T: Send> Send for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Relaxed);
        for seq in read..write {
            let slot = &self.buf[seq & self.mask];
            // SAFETY: slots in [read, write) were published and never consumed.
            unsafe { (*slot.get()).assume_init_drop() };
        }
    }
}

/// Write half of an SPSC ring. Not `Clone`: one producer per ring.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

/// Read half of an SPSC ring. Not `Clone`: one consumer per ring.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

/// Creates a ring with `capacity` slots (rounded up to a power of two) and
/// returns its two handles.
pub fn ring<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(capacity > 0, "ring capacity must be non-zero");
    let capacity = capacity.next_power_of_two();
    let buf = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let shared = Arc::new(Shared {
        buf,
        mask: capacity - 1,
        write: CachePadded::new(AtomicUsize::new(0)),
        read: CachePadded::new(AtomicUsize::new(0)),
    });
    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

impl<T> Producer<T> {
    /// Attempts to publish `value`, handing it back if the ring is full.
    pub fn try_push(&mut self, value: T) -> Result<(), Full<T>> {
        let shared = &*self.shared;
        let write = shared.write.load(Ordering::Relaxed);
        let read = shared.read.load(Ordering::Acquire);
        if write - read > shared.mask {
            return Err(Full(value));
        }
        let slot = &shared.buf[write & shared.mask];
        // SAFETY: the slot at `write` is unpublished and not visible to the
        // consumer until the release store below.
        unsafe { (*slot.get()).write(value) };
        shared.write.store(write + 1, Ordering::Release);
        Ok(())
    }

    /// Publishes `value`. A full ring means the capacity constants are wrong
    /// for the deployment and the process aborts.
    #[track_caller]
    pub fn push(&mut self, value: T) {
        if self.try_push(value).is_err() {
            panic!("spsc ring overflow (capacity {})", self.shared.mask + 1);
        }
    }

    /// Number of published but unconsumed elements.
    pub fn len(&self) -> usize {
        let shared = &*self.shared;
        shared.write.load(Ordering::Relaxed) - shared.read.load(Ordering::Acquire)
    }

    /// Whether the ring currently holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count.
    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }
}

impl<T> Consumer<T> {
    /// Takes the next published element, or `None` if the ring is empty.
    pub fn pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let read = shared.read.load(Ordering::Relaxed);
        let write = shared.write.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        let slot = &shared.buf[read & shared.mask];
        // SAFETY: the slot at `read` was published by the producer's release
        // store of `write`, observed by the acquire load above.
        let value = unsafe { (*slot.get()).assume_init_read() };
        shared.read.store(read + 1, Ordering::Release);
        Some(value)
    }

    /// Number of published but unconsumed elements.
    pub fn len(&self) -> usize {
        let shared = &*self.shared;
        shared.write.load(Ordering::Acquire) - shared.read.load(Ordering::Relaxed)
    }

    /// Whether the ring currently holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count.
    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn push_pop_in_order() {
        let (mut tx, mut rx) = ring::<u64>(8);
        for i in 0..5 {
            tx.push(i);
        }
        assert_eq!(tx.len(), 5);
        for i in 0..5 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn try_push_full_returns_value() {
        let (mut tx, mut rx) = ring::<u32>(4);
        for i in 0..4 {
            assert!(tx.try_push(i).is_ok());
        }
        let Full(rejected) = tx.try_push(99).unwrap_err();
        assert_eq!(rejected, 99);
        assert_eq!(rx.pop(), Some(0));
        assert!(tx.try_push(99).is_ok());
    }

    #[test]
    #[should_panic(expected = "spsc ring overflow")]
    fn push_full_is_fatal() {
        let (mut tx, _rx) = ring::<u8>(2);
        tx.push(1);
        tx.push(2);
        tx.push(3);
    }

    #[test]
    fn wraps_around_capacity() {
        let (mut tx, mut rx) = ring::<usize>(4);
        for round in 0..1000 {
            tx.push(round);
            assert_eq!(rx.pop(), Some(round));
        }
    }

    #[test]
    fn cross_thread_fifo() {
        const N: u64 = 100_000;
        let (mut tx, mut rx) = ring::<u64>(1024);
        let producer = thread::spawn(move || {
            for i in 0..N {
                loop {
                    match tx.try_push(i) {
                        Ok(()) => break,
                        Err(Full(_)) => std::hint::spin_loop(),
                    }
                }
            }
        });
        let mut expected = 0;
        while expected < N {
            if let Some(v) = rx.pop() {
                assert_eq!(v, expected);
                expected += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn drops_unconsumed_elements() {
        let flag = Arc::new(AtomicUsize::new(0));
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let (mut tx, rx) = ring::<Counted>(8);
        tx.push(Counted(Arc::clone(&flag)));
        tx.push(Counted(Arc::clone(&flag)));
        drop(tx);
        drop(rx);
        assert_eq!(flag.load(Ordering::SeqCst), 2);
    }
}
