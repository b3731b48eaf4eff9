//! Small, allocation free helpers for mono and interleaved sample buffers.

// -------------------------------------------------------------------------------------------------

/// Add the source buffer's samples onto the destination buffer.
#[inline]
pub fn add_buffers(destination: &mut [f32], source: &[f32]) {
    debug_assert_eq!(destination.len(), source.len());
    for (d, s) in destination.iter_mut().zip(source) {
        *d += *s;
    }
}

// -------------------------------------------------------------------------------------------------

/// Apply a linear gain ramp from `start_gain` to `end_gain` to an interleaved buffer.
/// The ramp is applied per frame, so all channels of a frame get the same gain.
pub fn apply_gain_ramp(
    buffer: &mut [f32],
    channel_count: usize,
    start_gain: f32,
    end_gain: f32,
) {
    debug_assert!(channel_count > 0, "Invalid channel count");
    let frame_count = buffer.len() / channel_count;
    if frame_count == 0 {
        return;
    }
    let step = if frame_count > 1 {
        (end_gain - start_gain) / (frame_count - 1) as f32
    } else {
        0.0
    };
    for (index, frame) in buffer.chunks_exact_mut(channel_count).enumerate() {
        let gain = start_gain + step * index as f32;
        for s in frame.iter_mut() {
            *s *= gain;
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Extract a single channel from an interleaved buffer into a mono buffer.
pub fn copy_channel_from_interleaved(
    interleaved: &[f32],
    channel_count: usize,
    channel_index: usize,
    mono: &mut [f32],
) {
    debug_assert!(channel_index < channel_count, "Invalid channel index");
    for (m, frame) in mono.iter_mut().zip(interleaved.chunks_exact(channel_count)) {
        *m = frame[channel_index];
    }
}

/// Downmix all channels of an interleaved buffer into a mono buffer.
pub fn mix_interleaved_to_mono(interleaved: &[f32], channel_count: usize, mono: &mut [f32]) {
    debug_assert!(channel_count > 0, "Invalid channel count");
    let scale = 1.0 / channel_count as f32;
    for (m, frame) in mono.iter_mut().zip(interleaved.chunks_exact(channel_count)) {
        *m = frame.iter().sum::<f32>() * scale;
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_ramp() {
        let mut buffer = vec![1.0; 10];
        apply_gain_ramp(&mut buffer, 2, 0.0, 1.0);
        assert_eq!(buffer[0], 0.0);
        assert_eq!(buffer[1], 0.0);
        assert_eq!(buffer[4], 0.5);
        assert_eq!(buffer[5], 0.5);
        assert_eq!(buffer[8], 1.0);
        assert_eq!(buffer[9], 1.0);

        let mut single = vec![1.0, 1.0];
        apply_gain_ramp(&mut single, 2, 0.25, 1.0);
        assert_eq!(single, vec![0.25, 0.25]);
    }

    #[test]
    fn channel_selection() {
        let interleaved = vec![1.0, 3.0, 2.0, 4.0, 3.0, 5.0];
        let mut mono = vec![0.0; 3];
        copy_channel_from_interleaved(&interleaved, 2, 1, &mut mono);
        assert_eq!(mono, vec![3.0, 4.0, 5.0]);
        mix_interleaved_to_mono(&interleaved, 2, &mut mono);
        assert_eq!(mono, vec![2.0, 3.0, 4.0]);
    }
}
