// -------------------------------------------------------------------------------------------------

/// Finds pitch synchronous grain onsets within an analysis frame.
///
/// Pitched frames place one onset per period at the loudest sample around each expected period
/// boundary. Unpitched frames place onsets on a fixed grid. The returned onset slice is backed
/// by a buffer which gets reused across calls.
#[derive(Debug, Clone)]
pub struct GrainOnsetDetector {
    onsets: Vec<usize>,
}

impl GrainOnsetDetector {
    /// Create a new detector for frames of up to `max_frame_size` samples.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            onsets: Vec::with_capacity(max_frame_size + 1),
        }
    }

    /// Most recently detected onsets.
    pub fn onsets(&self) -> &[usize] {
        &self.onsets
    }

    /// Detect ascending grain onset indices in `frame`, using the given `period` in samples.
    ///
    /// For unpitched frames `period` is the fixed grain rate. Frames shorter than one period
    /// result in no onsets.
    pub fn detect(&mut self, frame: &[f32], period: usize, pitched: bool) -> &[usize] {
        self.onsets.clear();
        if period == 0 || frame.len() < period {
            return &self.onsets;
        }
        if pitched {
            self.detect_pitched(frame, period);
        } else {
            self.detect_unpitched(frame.len(), period);
        }
        &self.onsets
    }

    fn detect_unpitched(&mut self, frame_len: usize, grain_rate: usize) {
        let mut onset = 0;
        while onset < frame_len && self.push_onset(onset) {
            onset += grain_rate;
        }
    }

    fn detect_pitched(&mut self, frame: &[f32], period: usize) {
        let half_period = (period / 2).max(1);

        let mut onset = Self::peak_index(frame, 0, period, 0);
        if !self.push_onset(onset) {
            return;
        }
        loop {
            let expected = onset + period;
            if expected >= frame.len() {
                break;
            }
            // search one period around the expected onset, keeping a half period distance
            let search_start = (expected - half_period).max(onset + half_period);
            let search_end = (expected + half_period).min(frame.len());
            if search_start >= search_end {
                break;
            }
            onset = Self::peak_index(frame, search_start, search_end, expected);
            if !self.push_onset(onset) {
                break;
            }
        }
    }

    /// Index of the first sample with the largest magnitude in `frame[start..end]`, or the
    /// given fallback when the range is silent.
    fn peak_index(frame: &[f32], start: usize, end: usize, fallback: usize) -> usize {
        const SILENCE: f32 = 1.0e-9;
        let mut peak_index = start;
        let mut peak_value = -1.0;
        for (index, sample) in frame[start..end].iter().enumerate() {
            let value = sample.abs();
            if value > peak_value {
                peak_value = value;
                peak_index = start + index;
            }
        }
        if peak_value > SILENCE {
            peak_index
        } else {
            fallback
        }
    }

    fn push_onset(&mut self, onset: usize) -> bool {
        if self.onsets.len() < self.onsets.capacity() {
            self.onsets.push(onset);
            true
        } else {
            false
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    #[test]
    fn pitched_peaks() {
        let mut frame = vec![0.0; 512];
        for position in (30..512).step_by(100) {
            frame[position] = if position % 200 == 30 { 1.0 } else { -0.8 };
        }
        let mut detector = GrainOnsetDetector::new(512);
        let onsets = detector.detect(&frame, 100, true);
        assert_eq!(onsets, &[30, 130, 230, 330, 430]);
    }

    #[test]
    fn pitched_onsets_keep_half_period_distance() {
        // a loud peak right after the first onset must not be picked as the second onset
        let mut frame = vec![0.0; 400];
        frame[10] = 1.0;
        frame[40] = 0.9;
        frame[110] = 0.5;
        let mut detector = GrainOnsetDetector::new(400);
        let onsets = detector.detect(&frame, 100, true).to_vec();
        assert_eq!(onsets[0], 10);
        assert_eq!(onsets[1], 110);
        for pair in onsets.windows(2) {
            assert!(pair[1] - pair[0] >= 50);
        }
    }

    #[test]
    fn unpitched_grid_on_white_noise() {
        let mut rng = SmallRng::seed_from_u64(0x1234);
        let frame = (0..512)
            .map(|_| rng.random_range(-1.0..1.0))
            .collect::<Vec<f32>>();
        let mut detector = GrainOnsetDetector::new(512);
        let onsets = detector.detect(&frame, 64, false);
        assert_eq!(onsets.len(), 8);
        assert_eq!(onsets[0], 0);
        for pair in onsets.windows(2) {
            assert_eq!(pair[1] - pair[0], 64);
        }
    }

    #[test]
    fn short_frames_have_no_onsets() {
        let frame = vec![0.5; 50];
        let mut detector = GrainOnsetDetector::new(512);
        assert!(detector.detect(&frame, 100, true).is_empty());
        assert!(detector.detect(&frame, 64, false).is_empty());
        assert!(detector.detect(&frame, 0, false).is_empty());
    }

    #[test]
    fn onset_buffer_is_reused() {
        let frame = vec![0.1; 256];
        let mut detector = GrainOnsetDetector::new(256);
        let capacity = detector.onsets.capacity();
        detector.detect(&frame, 16, false);
        detector.detect(&frame, 32, true);
        assert_eq!(detector.onsets.capacity(), capacity);
        assert!(!detector.onsets().is_empty());
    }
}
