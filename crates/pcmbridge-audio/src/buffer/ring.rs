//! Lock-free sample ring for device output.
//!
//! One producer (the thread writing PCM into a device) and one consumer (the
//! output callback). Any third thread may ask for the ring to be emptied with
//! [`SampleRing::request_clear`]; the consumer applies the request on its next
//! read, so the read position only ever moves on the consumer side.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

/// Single-producer, single-consumer ring of f32 samples.
///
/// Samples are stored as their bit patterns in atomics, so no unsafe code is
/// needed to share the storage between threads.
pub struct SampleRing {
    slots: Box<[AtomicU32]>,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
    clear_pending: AtomicBool,
    clear_target: AtomicUsize,
    /// Power of two.
    capacity: usize,
    mask: usize,
}

impl SampleRing {
    /// Create a ring holding at least `capacity` samples.
    ///
    /// The capacity is rounded up to the next power of 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity).map(|_| AtomicU32::new(0)).collect();

        Self {
            slots,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            clear_pending: AtomicBool::new(false),
            clear_target: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples waiting to be read.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    pub fn free(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Write as many samples as fit. Producer side only.
    ///
    /// Returns the number of samples written.
    pub fn write(&self, samples: &[f32]) -> usize {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Acquire);

        let space = self.capacity - write_pos.wrapping_sub(read_pos);
        let to_write = samples.len().min(space);

        for (i, sample) in samples[..to_write].iter().enumerate() {
            let idx = write_pos.wrapping_add(i) & self.mask;
            self.slots[idx].store(sample.to_bits(), Ordering::Relaxed);
        }

        self.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);

        to_write
    }

    /// Read up to `output.len()` samples. Consumer side only.
    ///
    /// Applies any pending clear first. Returns the number of samples read.
    pub fn read(&self, output: &mut [f32]) -> usize {
        self.settle();

        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let write_pos = self.write_pos.load(Ordering::Acquire);

        let to_read = output.len().min(write_pos.wrapping_sub(read_pos));

        for (i, out) in output[..to_read].iter_mut().enumerate() {
            let idx = read_pos.wrapping_add(i) & self.mask;
            *out = f32::from_bits(self.slots[idx].load(Ordering::Relaxed));
        }

        self.read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);

        to_read
    }

    /// Ask the consumer to drop everything written so far.
    pub fn request_clear(&self) {
        let target = self.write_pos.load(Ordering::Acquire);
        self.clear_target.store(target, Ordering::Release);
        self.clear_pending.store(true, Ordering::Release);
    }

    /// Apply a pending clear without reading. Consumer side only.
    pub fn settle(&self) {
        if !self.clear_pending.swap(false, Ordering::AcqRel) {
            return;
        }
        let target = self.clear_target.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        // Never move backwards past data already consumed.
        if target.wrapping_sub(read) <= self.capacity {
            self.read_pos.store(target, Ordering::Release);
        }
    }
}
