//! Integer Delay Line
//!
//! Fixed-capacity ring buffer used for lookahead, time shift, band
//! alignment and the latency-matched dry path. Capacity is chosen once at
//! construction; changing the delay afterwards never allocates.

/// Preallocated sample delay
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    delay: usize,
}

impl DelayLine {
    /// Create a delay line able to hold up to `max_delay` samples
    pub fn new(max_delay: usize) -> Self {
        Self {
            buffer: vec![0.0; max_delay + 1],
            write_pos: 0,
            delay: 0,
        }
    }

    /// Largest delay this line can produce
    pub fn max_delay(&self) -> usize {
        self.buffer.len() - 1
    }

    /// Set the delay in samples (clamped to capacity)
    pub fn set_delay(&mut self, delay: usize) {
        self.delay = delay.min(self.max_delay());
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let len = self.buffer.len();
        self.buffer[self.write_pos] = input;
        let read_pos = (self.write_pos + len - self.delay) % len;
        self.write_pos = (self.write_pos + 1) % len;
        self.buffer[read_pos]
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}
