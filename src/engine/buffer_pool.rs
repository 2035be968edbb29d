// SpectrumPool - lock-free recycling of spectrum buffers across the session boundary
//
// Spectrum frames travel host → worker as owned `Vec<f32>` inside commands.
// Once the worker has processed a frame it hands the vector back through an
// SPSC ring so the host can refill it without allocating.
//
// Buffer flow:
// 1. Host pops an empty buffer from the free queue (`acquire`)
// 2. Host fills it with dB magnitudes and sends it inside `ProcessFrame`
// 3. Worker processes the frame
// 4. Worker pushes the buffer back onto the free queue (`release`)
//
// When the free queue is empty the host allocates a fresh buffer; when it is
// full the worker drops the returned buffer. Neither side ever blocks.

use rtrb::{Consumer, Producer, RingBuffer};

pub const DEFAULT_BUFFER_COUNT: usize = 8;
pub const DEFAULT_BUFFER_BINS: usize = 4096;

/// Spectrum buffer type - dB magnitudes, `fft_size / 2` entries once filled
pub type SpectrumBuffer = Vec<f32>;

/// Host end: takes free buffers
pub struct PoolAcquirer {
    free: Consumer<SpectrumBuffer>,
    capacity: usize,
    bins: usize,
}

/// Worker end: returns processed buffers
pub struct PoolReleaser {
    free: Producer<SpectrumBuffer>,
}

pub struct SpectrumPool;

impl SpectrumPool {
    /// Pre-allocate `buffer_count` buffers with room for `bins` values each
    ///
    /// A zero count is raised to one.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(buffer_count: usize, bins: usize) -> (PoolAcquirer, PoolReleaser) {
        let capacity = buffer_count.max(1);
        let (mut producer, consumer) = RingBuffer::new(capacity);

        // the only up-front allocation
        for _ in 0..capacity {
            if producer.push(Vec::with_capacity(bins)).is_err() {
                break;
            }
        }

        (
            PoolAcquirer {
                free: consumer,
                capacity,
                bins,
            },
            PoolReleaser { free: producer },
        )
    }
}

impl PoolAcquirer {
    /// Take an empty buffer, allocating when the pool is drained
    pub fn acquire(&mut self) -> SpectrumBuffer {
        match self.free.pop() {
            Ok(mut buffer) => {
                buffer.clear();
                buffer
            }
            Err(_) => {
                tracing::debug!("[SpectrumPool] Pool drained, allocating a new buffer");
                Vec::with_capacity(self.bins)
            }
        }
    }

    pub fn available(&self) -> usize {
        self.free.slots()
    }

    /// Share of the pool currently out with the host or worker (0-100)
    pub fn occupancy_percent(&self) -> f32 {
        let in_flight = self.capacity.saturating_sub(self.available());
        in_flight as f32 / self.capacity as f32 * 100.0
    }
}

impl PoolReleaser {
    /// Hand a processed buffer back; returns false if it was dropped
    pub fn release(&mut self, buffer: SpectrumBuffer) -> bool {
        self.free.push(buffer).is_ok()
    }
}
