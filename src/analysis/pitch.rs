use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Monophonic pitch detector, based on the normalized square difference function of the
/// McLeod pitch method.
///
/// The detector evaluates lags up to [`Self::max_period`], so analysis windows should hold at
/// least two max periods of samples. All working buffers are allocated when the Hz range
/// changes, so [`Self::detect_pitch`] is real-time safe.
#[derive(Debug, Clone)]
pub struct PitchDetector {
    sample_rate: u32,
    min_hz: f32,
    max_hz: f32,
    min_period: usize,
    max_period: usize,
    confidence_threshold: f32,
    last_clarity: f32,
    nsdf: Vec<f32>,
    key_maxima: Vec<(usize, f32)>,
}

impl PitchDetector {
    pub const DEFAULT_MIN_HZ: f32 = 80.0;
    pub const DEFAULT_MAX_HZ: f32 = 2400.0;
    pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.8;

    /// Key maxima below this fraction of the highest key maximum are ignored.
    const PEAK_THRESHOLD: f32 = 0.9;
    /// Window energy below this level is treated as silence.
    const SILENCE: f32 = 1.0e-8;

    /// Create a new detector for the given sample rate and Hz range.
    pub fn new(sample_rate: u32, min_hz: f32, max_hz: f32) -> Result<Self, Error> {
        let mut detector = Self {
            sample_rate,
            min_hz: Self::DEFAULT_MIN_HZ,
            max_hz: Self::DEFAULT_MAX_HZ,
            min_period: 0,
            max_period: 0,
            confidence_threshold: Self::DEFAULT_CONFIDENCE_THRESHOLD,
            last_clarity: 0.0,
            nsdf: Vec::new(),
            key_maxima: Vec::new(),
        };
        if sample_rate == 0 {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        detector.set_hz_range(min_hz, max_hz)?;
        Ok(detector)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn min_hz(&self) -> f32 {
        self.min_hz
    }
    pub fn max_hz(&self) -> f32 {
        self.max_hz
    }

    /// Longest detectable period in samples: `ceil(sample_rate / min_hz)`.
    pub fn max_period(&self) -> usize {
        self.max_period
    }

    /// Shortest detectable period in samples: `floor(sample_rate / max_hz)`.
    pub fn min_period(&self) -> usize {
        self.min_period
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Clarity of the most recent detection in range [0, 1].
    pub fn last_clarity(&self) -> f32 {
        self.last_clarity
    }

    /// Set a new detectable frequency range. Reallocates the detector's buffers.
    pub fn set_hz_range(&mut self, min_hz: f32, max_hz: f32) -> Result<(), Error> {
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(min_hz > 0.0 && min_hz < max_hz && max_hz < nyquist) {
            return Err(Error::ParameterError(format!(
                "Invalid pitch detection range: [{min_hz}, {max_hz}] Hz. \
                 Must be 0 < min < max < {nyquist}"
            )));
        }
        self.min_hz = min_hz;
        self.max_hz = max_hz;
        self.max_period = (self.sample_rate as f32 / min_hz).ceil() as usize;
        self.min_period = ((self.sample_rate as f32 / max_hz).floor() as usize).max(2);
        self.nsdf = Vec::with_capacity(self.max_period + 1);
        self.key_maxima = Vec::with_capacity(self.max_period / 2 + 1);
        Ok(())
    }

    /// Set a new sample rate, keeping the current Hz range.
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), Error> {
        if sample_rate == 0 {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        let previous_rate = self.sample_rate;
        self.sample_rate = sample_rate;
        if let Err(err) = self.set_hz_range(self.min_hz, self.max_hz) {
            self.sample_rate = previous_rate;
            return Err(err);
        }
        Ok(())
    }

    /// Set the minimum clarity a detected period needs to count as pitched.
    pub fn set_confidence_threshold(&mut self, threshold: f32) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::ParameterError(format!(
                "Invalid pitch detection confidence: {threshold}. Must be in range [0.0, 1.0]"
            )));
        }
        self.confidence_threshold = threshold;
        Ok(())
    }

    /// Detect the fundamental frequency of the given window in Hz.
    ///
    /// Returns `None` for silent or unpitched windows and for pitches outside of the
    /// configured Hz range.
    pub fn detect_pitch(&mut self, window: &[f32]) -> Option<f32> {
        self.last_clarity = 0.0;
        if window.len() < 2 * self.min_period {
            return None;
        }
        self.compute_nsdf(window)?;
        self.collect_key_maxima();

        let highest = self
            .key_maxima
            .iter()
            .map(|(_, value)| *value)
            .fold(f32::MIN, f32::max);
        let &(lag, clarity) = self
            .key_maxima
            .iter()
            .find(|(_, value)| *value >= highest * Self::PEAK_THRESHOLD)?;

        self.last_clarity = clarity.clamp(0.0, 1.0);
        if clarity < self.confidence_threshold {
            return None;
        }
        let period = self.interpolated_lag(lag);
        if period <= 0.0 {
            return None;
        }
        let frequency = self.sample_rate as f32 / period;
        if frequency < self.min_hz || frequency > self.max_hz {
            return None;
        }
        Some(frequency)
    }

    /// Compute the normalized square difference function for all lags up to the max period.
    /// Returns `None` for silent windows.
    fn compute_nsdf(&mut self, window: &[f32]) -> Option<()> {
        let max_lag = self.max_period.min(window.len() - 1);
        self.nsdf.clear();

        let mut energy = 2.0 * window.iter().map(|x| x * x).sum::<f32>();
        if energy < Self::SILENCE {
            return None;
        }
        for lag in 0..=max_lag {
            if lag > 0 {
                let leading = window[lag - 1];
                let trailing = window[window.len() - lag];
                energy -= leading * leading + trailing * trailing;
            }
            let autocorrelation = window[..window.len() - lag]
                .iter()
                .zip(&window[lag..])
                .map(|(a, b)| a * b)
                .sum::<f32>();
            let value = if energy > Self::SILENCE {
                2.0 * autocorrelation / energy
            } else {
                0.0
            };
            if self.nsdf.len() < self.nsdf.capacity() {
                self.nsdf.push(value);
            }
        }
        Some(())
    }

    /// Collect the highest value of each positive lobe, skipping the lobe at lag zero.
    fn collect_key_maxima(&mut self) {
        self.key_maxima.clear();
        let nsdf = &self.nsdf;
        let mut lag = 1;
        // skip initial positive lobe
        while lag < nsdf.len() && nsdf[lag] > 0.0 {
            lag += 1;
        }
        let mut lobe_max: Option<(usize, f32)> = None;
        while lag < nsdf.len() {
            let value = nsdf[lag];
            if value > 0.0 {
                if lobe_max.is_none_or(|(_, max)| value > max) {
                    lobe_max = Some((lag, value));
                }
            } else if let Some(maximum) = lobe_max.take() {
                if maximum.0 >= self.min_period && self.key_maxima.len() < self.key_maxima.capacity()
                {
                    self.key_maxima.push(maximum);
                }
            }
            lag += 1;
        }
        // lobe which is still open at the max lag
        if let Some(maximum) = lobe_max {
            if maximum.0 >= self.min_period
                && maximum.0 + 1 < nsdf.len()
                && self.key_maxima.len() < self.key_maxima.capacity()
            {
                self.key_maxima.push(maximum);
            }
        }
    }

    /// Refine a lag with a parabola through its neighbours.
    fn interpolated_lag(&self, lag: usize) -> f32 {
        if lag == 0 || lag + 1 >= self.nsdf.len() {
            return lag as f32;
        }
        let (a, b, c) = (self.nsdf[lag - 1], self.nsdf[lag], self.nsdf[lag + 1]);
        let denominator = a - 2.0 * b + c;
        if denominator.abs() < f32::EPSILON {
            return lag as f32;
        }
        lag as f32 + 0.5 * (a - c) / denominator
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn sine(frequency: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                (std::f32::consts::TAU * frequency * i as f32 / sample_rate as f32).sin() * 0.5
            })
            .collect()
    }

    #[test]
    fn periods() -> Result<(), Error> {
        let detector = PitchDetector::new(51200, 100.0, 2400.0)?;
        assert_eq!(detector.max_period(), 512);
        assert_eq!(detector.min_period(), 21);

        let detector = PitchDetector::new(44100, 80.0, 2400.0)?;
        assert_eq!(detector.max_period(), 552);
        Ok(())
    }

    #[test]
    fn invalid_ranges() {
        assert!(PitchDetector::new(0, 80.0, 2400.0).is_err());
        assert!(PitchDetector::new(44100, 0.0, 2400.0).is_err());
        assert!(PitchDetector::new(44100, 500.0, 400.0).is_err());
        assert!(PitchDetector::new(44100, 80.0, 30000.0).is_err());
    }

    #[test]
    fn detects_sines() -> Result<(), Error> {
        let mut detector = PitchDetector::new(51200, 100.0, 2400.0)?;
        for frequency in [150.0, 400.0, 1000.0] {
            let window = sine(frequency, 51200, 1024);
            let detected = detector.detect_pitch(&window);
            assert!(
                detected.is_some_and(|f| (f - frequency).abs() < (frequency * 0.005).max(1.0)),
                "expected {frequency} Hz, got {detected:?}"
            );
            assert!(detector.last_clarity() > 0.9);
        }
        Ok(())
    }

    #[test]
    fn silence_and_noise_are_unpitched() -> Result<(), Error> {
        let mut detector = PitchDetector::new(51200, 100.0, 2400.0)?;
        assert_eq!(detector.detect_pitch(&[0.0; 1024]), None);
        assert_eq!(detector.last_clarity(), 0.0);

        let mut rng = SmallRng::seed_from_u64(42);
        let noise = (0..1024)
            .map(|_| rng.random_range(-1.0..1.0))
            .collect::<Vec<f32>>();
        assert_eq!(detector.detect_pitch(&noise), None);
        Ok(())
    }

    #[test]
    fn confidence_threshold() -> Result<(), Error> {
        let mut detector = PitchDetector::new(51200, 100.0, 2400.0)?;
        assert!(detector.set_confidence_threshold(1.5).is_err());
        detector.set_confidence_threshold(1.0)?;
        // a sine with added noise never reaches full clarity
        let mut rng = SmallRng::seed_from_u64(7);
        let window = sine(400.0, 51200, 1024)
            .into_iter()
            .map(|s| s + rng.random_range(-0.2..0.2))
            .collect::<Vec<f32>>();
        assert_eq!(detector.detect_pitch(&window), None);
        detector.set_confidence_threshold(0.5)?;
        assert!(detector.detect_pitch(&window).is_some());
        Ok(())
    }
}
