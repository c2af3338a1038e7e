// FrameRingBuffer - lock-free SPSC frame ring with drop-oldest overflow
//
// Bridges the input callback (producer) and the output callback (consumer),
// which run on platform threads the engine does not control.
//
// Positions are monotonically increasing u64 frame counters; the slot for a
// position is `position & mask`. Three counters carry all coordination:
// - write_pos: frames published by the producer (Release on store)
// - claim_pos: end of the frames the producer is writing or has written
// - read_pos:  frames consumed (or skipped) by the consumer
//
// The producer never waits for the consumer. When it laps the reader it simply
// overwrites the oldest slots. The consumer detects that after copying: it
// re-reads claim_pos behind an Acquire fence (seqlock-style validation) and
// discards any prefix whose slots may have been overwritten mid-copy. Both
// paths are wait-free and allocation-free after construction.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use super::sample::Sample;
use super::stream_config::SampleFormat;

/// Lowest jitter multiplier used to size the ring from the callback size
pub const MIN_JITTER_MULTIPLIER: u32 = 2;
/// Highest jitter multiplier used to size the ring from the callback size
pub const MAX_JITTER_MULTIPLIER: u32 = 4;

/// Fixed-capacity interleaved frame ring shared by exactly one producer and
/// one consumer.
///
/// `write` must only be called from one thread at a time and `read` from one
/// thread at a time; the two may run concurrently.
///
/// # Overflow
/// Writing past capacity drops the oldest unread frames. After any sequence of
/// writes the newest `capacity` frames are always readable.
///
/// # Underflow
/// `read` returns fewer frames than requested when less data is available; it
/// never blocks.
pub struct FrameRingBuffer {
    slots: Box<[AtomicU32]>,
    channels: usize,
    capacity: u64,
    mask: u64,
    format: SampleFormat,
    write_pos: AtomicU64,
    claim_pos: AtomicU64,
    read_pos: AtomicU64,
    overrun_frames: AtomicU64,
}

impl FrameRingBuffer {
    /// Create a ring holding `capacity_frames` frames of `channels` samples.
    ///
    /// # Panics
    /// Panics if `capacity_frames` is not a power of two or `channels` is 0.
    pub fn new(capacity_frames: usize, channels: usize, format: SampleFormat) -> Self {
        assert!(
            capacity_frames.is_power_of_two(),
            "capacity_frames must be a power of two (got {})",
            capacity_frames
        );
        assert!(channels > 0, "channels must be greater than 0");

        let slots = (0..capacity_frames * channels)
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            channels,
            capacity: capacity_frames as u64,
            mask: capacity_frames as u64 - 1,
            format,
            write_pos: AtomicU64::new(0),
            claim_pos: AtomicU64::new(0),
            read_pos: AtomicU64::new(0),
            overrun_frames: AtomicU64::new(0),
        }
    }

    /// Capacity in frames for a callback period: the next power of two at or
    /// above `frames_per_callback * multiplier`, multiplier clamped to 2..=4.
    pub fn capacity_for(frames_per_callback: u32, jitter_multiplier: u32) -> usize {
        let multiplier = jitter_multiplier.clamp(MIN_JITTER_MULTIPLIER, MAX_JITTER_MULTIPLIER);
        let frames = (frames_per_callback.max(1) as usize) * multiplier as usize;
        frames.next_power_of_two()
    }

    /// Capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Samples per frame
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Sample format the ring was sized for
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Frames currently readable (bounded by capacity).
    pub fn available(&self) -> usize {
        let written = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        written.saturating_sub(read).min(self.capacity) as usize
    }

    /// Total frames the consumer skipped because the producer lapped it.
    pub fn overrun_frames(&self) -> u64 {
        self.overrun_frames.load(Ordering::Relaxed)
    }

    /// Producer side: append whole frames from interleaved `samples`.
    ///
    /// Trailing samples that do not form a whole frame are ignored. If more
    /// than `capacity` frames are passed only the newest `capacity` are
    /// stored. Returns the number of frames stored.
    pub fn write<S: Sample>(&self, samples: &[S]) -> usize {
        let frames = samples.len() / self.channels;
        if frames == 0 {
            return 0;
        }

        let start = self.write_pos.load(Ordering::Relaxed);
        let end = start + frames as u64;
        let kept = frames.min(self.capacity as usize);
        let first = end - kept as u64;
        let src = &samples[(frames - kept) * self.channels..frames * self.channels];

        // Announce the overwrite before touching any slot.
        self.claim_pos.store(end, Ordering::Relaxed);
        fence(Ordering::Release);

        for (offset, frame) in src.chunks_exact(self.channels).enumerate() {
            let base = self.slot_index(first + offset as u64);
            for (slot, sample) in self.slots[base..base + self.channels].iter().zip(frame) {
                slot.store(sample.to_word(), Ordering::Relaxed);
            }
        }

        self.write_pos.store(end, Ordering::Release);
        kept
    }

    /// Consumer side: copy up to `out.len() / channels` frames into `out`.
    ///
    /// Returns the number of whole frames copied to the front of `out`; the
    /// rest of `out` is left untouched.
    pub fn read<S: Sample>(&self, out: &mut [S]) -> usize {
        let wanted = (out.len() / self.channels) as u64;
        if wanted == 0 {
            return 0;
        }

        let written = self.write_pos.load(Ordering::Acquire);
        let mut start = self.read_pos.load(Ordering::Relaxed);

        let oldest = written.saturating_sub(self.capacity);
        if start < oldest {
            self.overrun_frames
                .fetch_add(oldest - start, Ordering::Relaxed);
            start = oldest;
        }

        let count = (written - start).min(wanted);
        if count == 0 {
            self.read_pos.store(start, Ordering::Release);
            return 0;
        }

        for offset in 0..count {
            let base = self.slot_index(start + offset);
            let dst = offset as usize * self.channels;
            for (channel, slot) in self.slots[base..base + self.channels].iter().enumerate() {
                out[dst + channel] = S::from_word(slot.load(Ordering::Relaxed));
            }
        }

        // Anything the producer claimed while we copied may have torn our copy.
        fence(Ordering::Acquire);
        let claimed = self.claim_pos.load(Ordering::Relaxed);
        let end = start + count;
        let valid_from = claimed.saturating_sub(self.capacity).max(start);

        let delivered = if valid_from > start {
            let torn = (valid_from - start).min(count);
            self.overrun_frames.fetch_add(torn, Ordering::Relaxed);
            let torn = torn as usize * self.channels;
            out.copy_within(torn..count as usize * self.channels, 0);
            count as usize - torn / self.channels
        } else {
            count as usize
        };

        self.read_pos.store(end, Ordering::Release);
        delivered
    }

    #[inline]
    fn slot_index(&self, position: u64) -> usize {
        (position & self.mask) as usize * self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::Arc;
    use std::thread;

    fn mono(capacity: usize) -> FrameRingBuffer {
        FrameRingBuffer::new(capacity, 1, SampleFormat::Float32)
    }

    #[test]
    fn test_capacity_for_sizes_between_two_and_four_callbacks() {
        assert_eq!(FrameRingBuffer::capacity_for(192, 2), 512);
        assert_eq!(FrameRingBuffer::capacity_for(256, 2), 512);
        assert_eq!(FrameRingBuffer::capacity_for(240, 4), 1024);
        // multiplier clamps into 2..=4
        assert_eq!(FrameRingBuffer::capacity_for(128, 1), 256);
        assert_eq!(FrameRingBuffer::capacity_for(128, 16), 512);

        for fpc in [1_u32, 64, 96, 192, 240, 441, 1024] {
            let cap = FrameRingBuffer::capacity_for(fpc, 2) as u32;
            assert!(cap >= fpc * 2 && cap < fpc * 4, "fpc={} cap={}", fpc, cap);
        }
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_rejects_non_power_of_two_capacity() {
        let _ = mono(100);
    }

    #[test]
    fn test_write_then_read_returns_same_frames() {
        let ring = FrameRingBuffer::new(8, 2, SampleFormat::Float32);
        let frames = [0.1_f32, -0.1, 0.2, -0.2, 0.3, -0.3];

        assert_eq!(ring.write(&frames), 3);
        assert_eq!(ring.available(), 3);

        let mut out = [0.0_f32; 6];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, frames);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_partial_frames_are_ignored() {
        let ring = FrameRingBuffer::new(8, 2, SampleFormat::Pcm16);
        assert_eq!(ring.write(&[1_i16, 2, 3]), 1);

        let mut out = [0_i16; 5];
        assert_eq!(ring.read(&mut out), 1);
        assert_eq!(&out[..2], &[1, 2]);
    }

    #[test]
    fn test_read_with_no_data_returns_zero_and_leaves_buffer() {
        let ring = mono(16);
        let mut out = [7.0_f32; 4];
        assert_eq!(ring.read(&mut out), 0);
        assert_eq!(out, [7.0; 4]);
    }

    #[test]
    fn test_read_returns_fewer_frames_than_requested() {
        let ring = mono(16);
        ring.write(&[1.0_f32, 2.0]);

        let mut out = [0.0_f32; 5];
        assert_eq!(ring.read(&mut out), 2);
        assert_eq!(&out[..2], &[1.0, 2.0]);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let ring = mono(4);
        let mut out = [0.0_f32; 3];

        for round in 0..10 {
            let base = round as f32 * 3.0;
            ring.write(&[base, base + 1.0, base + 2.0]);
            assert_eq!(ring.read(&mut out), 3);
            assert_eq!(out, [base, base + 1.0, base + 2.0]);
        }
        assert_eq!(ring.overrun_frames(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest_and_keeps_newest_window() {
        let capacity = 64;
        let extra = 37;
        let ring = mono(capacity);

        // Tag every frame with its sequence number, written in uneven chunks.
        let tags: Vec<f32> = (0..(capacity + extra)).map(|i| i as f32).collect();
        for chunk in tags.chunks(10) {
            ring.write(chunk);
        }

        let mut out = vec![0.0_f32; capacity];
        assert_eq!(ring.read(&mut out), capacity);
        let expected: Vec<f32> = (extra..capacity + extra).map(|i| i as f32).collect();
        assert_eq!(out, expected);
        assert_eq!(ring.overrun_frames(), extra as u64);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_oversized_write_keeps_last_capacity_frames() {
        let ring = mono(8);
        let tags: Vec<f32> = (0..20).map(|i| i as f32).collect();
        assert_eq!(ring.write(&tags), 8);

        let mut out = [0.0_f32; 8];
        assert_eq!(ring.read(&mut out), 8);
        assert_eq!(out, [12.0, 13.0, 14.0, 15.0, 16.0, 17.0, 18.0, 19.0]);
        assert_eq!(ring.overrun_frames(), 12);
    }

    #[test]
    fn test_pcm16_samples_survive_storage() {
        let ring = FrameRingBuffer::new(4, 1, SampleFormat::Pcm16);
        ring.write(&[i16::MIN, -1, 0, i16::MAX]);

        let mut out = [0_i16; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, [i16::MIN, -1, 0, i16::MAX]);
    }

    /// Producer and consumer at randomized rates on separate threads.
    ///
    /// The consumer must observe strictly increasing sequence tags (gaps are
    /// allowed: those are dropped-oldest overruns) and every frame must be
    /// intact across channels.
    #[test]
    fn test_concurrent_spsc_under_fuzzed_rates() {
        const TOTAL: u32 = 200_000;
        let ring = Arc::new(FrameRingBuffer::new(256, 2, SampleFormat::Float32));

        let producer_ring = Arc::clone(&ring);
        let producer = thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let mut scratch = vec![0.0_f32; 2 * 300];
            let mut next = 0_u32;
            while next < TOTAL {
                let frames = rng.gen_range(1..300).min((TOTAL - next) as usize);
                for i in 0..frames {
                    let tag = (next + i as u32) as f32;
                    scratch[2 * i] = tag;
                    scratch[2 * i + 1] = -tag;
                }
                producer_ring.write(&scratch[..frames * 2]);
                next += frames as u32;
                if rng.gen_bool(0.1) {
                    thread::yield_now();
                }
            }
        });

        let mut rng = rand::thread_rng();
        let mut out = vec![0.0_f32; 2 * 300];
        let mut last: Option<f32> = None;
        let mut received = 0_u64;
        loop {
            let frames = rng.gen_range(1..300);
            let got = ring.read(&mut out[..frames * 2]);
            for i in 0..got {
                let tag = out[2 * i];
                assert_eq!(out[2 * i + 1], -tag, "torn frame at tag {}", tag);
                if let Some(prev) = last {
                    assert!(tag > prev, "tags went backwards: {} after {}", tag, prev);
                }
                last = Some(tag);
            }
            received += got as u64;

            if producer.is_finished() && ring.available() == 0 {
                break;
            }
            if rng.gen_bool(0.1) {
                thread::yield_now();
            }
        }
        producer.join().unwrap();

        assert_eq!(last, Some((TOTAL - 1) as f32));
        assert_eq!(received + ring.overrun_frames(), TOTAL as u64);
    }
}
