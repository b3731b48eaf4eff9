//! Fixed capacity, interleaved audio FIFO on top of a lock free ring buffer.

use rb::{Consumer, Producer, RbConsumer, RbInspector, RbProducer, SpscRb, RB};

// -------------------------------------------------------------------------------------------------

/// Interleaved sample FIFO which never allocates after construction.
///
/// Pushing into a full FIFO or popping from an empty one is not an error: the returned
/// frame counts tell how much actually got transferred.
pub struct AudioFifo {
    buffer: SpscRb<f32>,
    producer: Producer<f32>,
    consumer: Consumer<f32>,
    channel_count: usize,
    capacity: usize,
}

impl AudioFifo {
    /// Create a new, empty FIFO which can hold up to `capacity` frames.
    pub fn new(capacity: usize, channel_count: usize) -> Self {
        debug_assert!(channel_count > 0, "Invalid channel count");
        let buffer = SpscRb::new(capacity * channel_count);
        let producer = buffer.producer();
        let consumer = buffer.consumer();
        Self {
            buffer,
            producer,
            consumer,
            channel_count,
            capacity,
        }
    }

    /// Channel layout of the FIFO.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Max number of frames the FIFO can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames which currently can be popped.
    pub fn num_stored_frames(&self) -> usize {
        self.buffer.count() / self.channel_count
    }

    /// Number of frames which currently can be pushed.
    pub fn num_free_frames(&self) -> usize {
        self.buffer.slots_free() / self.channel_count
    }

    /// Push the given interleaved frames. Returns the number of frames written.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        debug_assert!(samples.len() % self.channel_count == 0, "Partial frames");
        let mut written = 0;
        while written < samples.len() {
            match self.producer.write(&samples[written..]) {
                Ok(count) if count > 0 => written += count,
                _ => break,
            }
        }
        written / self.channel_count
    }

    /// Push the given number of silent frames. Returns the number of frames written.
    pub fn push_silence(&mut self, frame_count: usize) -> usize {
        const SILENCE: [f32; 256] = [0.0; 256];
        let mut remaining = frame_count * self.channel_count;
        let mut written = 0;
        while remaining > 0 {
            let chunk = remaining.min(SILENCE.len());
            match self.producer.write(&SILENCE[..chunk]) {
                Ok(count) if count > 0 => {
                    written += count;
                    remaining -= count;
                }
                _ => break,
            }
        }
        written / self.channel_count
    }

    /// Pop interleaved frames into the given buffer. Returns the number of frames read.
    pub fn pop(&mut self, output: &mut [f32]) -> usize {
        debug_assert!(output.len() % self.channel_count == 0, "Partial frames");
        let mut read = 0;
        while read < output.len() {
            match self.consumer.read(&mut output[read..]) {
                Ok(count) if count > 0 => read += count,
                _ => break,
            }
        }
        read / self.channel_count
    }

    /// Drop all pending frames.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop() {
        let mut fifo = AudioFifo::new(8, 2);
        assert_eq!(fifo.num_stored_frames(), 0);
        assert_eq!(fifo.push_silence(2), 2);
        assert_eq!(fifo.push(&[1.0, 2.0, 3.0, 4.0]), 2);
        assert_eq!(fifo.num_stored_frames(), 4);

        let mut output = [9.0; 6];
        assert_eq!(fifo.pop(&mut output), 3);
        assert_eq!(output, [0.0, 0.0, 0.0, 0.0, 1.0, 2.0]);
        assert_eq!(fifo.num_stored_frames(), 1);

        fifo.clear();
        assert_eq!(fifo.num_stored_frames(), 0);
        assert_eq!(fifo.pop(&mut output), 0);
    }

    #[test]
    fn overflow_is_truncated() {
        let mut fifo = AudioFifo::new(4, 1);
        assert_eq!(fifo.push(&[1.0; 6]), 4);
        assert_eq!(fifo.num_free_frames(), 0);
    }
}
