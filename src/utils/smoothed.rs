//! Parameter smoothing to avoid clicks on gain and panning changes.

// -------------------------------------------------------------------------------------------------

/// Exponential smoothed value for smooth ramping, using an inertial exponential approach.
///
/// The value changes gradually towards the target based on the configurable inertia factor.
#[derive(Debug, Clone)]
pub struct SmoothedValue {
    current: f32,
    target: f32,
    inertia: f32,
    sample_rate_comp: f32,
}

impl SmoothedValue {
    pub const DEFAULT_INERTIA: f32 = 0.02;

    const UNINITIALIZED_SAMPLE_RATE: u32 = 66666;
    const UNINITIALIZED_SAMPLE_RATE_COMP: f32 = 44100.0 / Self::UNINITIALIZED_SAMPLE_RATE as f32;

    pub const fn new(value: f32, sample_rate: u32) -> Self {
        assert!(sample_rate > 0, "Invalid sample rate");
        Self {
            current: value,
            target: value,
            inertia: Self::DEFAULT_INERTIA,
            sample_rate_comp: 44100.0 / sample_rate as f32,
        }
    }

    /// Access to the current, possibly ramped value.
    #[inline(always)]
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Access to the target value.
    #[inline(always)]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// Test if ramping is necessary.
    pub fn need_ramp(&self) -> bool {
        debug_assert!(
            self.sample_rate_comp != Self::UNINITIALIZED_SAMPLE_RATE_COMP,
            "Call 'set_sample_rate' for default constructed smoothed values before using them!"
        );
        const EPSILON: f32 = f32::EPSILON * 100.0;
        let inertia_add = (self.target - self.current) * self.inertia * self.sample_rate_comp;
        inertia_add.abs() > EPSILON
    }

    /// Ramp, if needed, and get the current ramped value, else returns the target value.
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.need_ramp() {
            self.current += (self.target - self.current) * self.inertia * self.sample_rate_comp;
            self.current
        } else {
            self.current = self.target;
            self.target
        }
    }

    /// Set current and target to the same value.
    pub fn init(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    /// Set a new target value and ramp current towards it.
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Update sample rate of the smoothed value.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        debug_assert!(sample_rate > 0, "Invalid sample rate");
        self.sample_rate_comp = 44100.0 / sample_rate as f32;
    }
}

impl Default for SmoothedValue {
    fn default() -> Self {
        Self::new(0.0, Self::UNINITIALIZED_SAMPLE_RATE)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramps_towards_target() {
        let mut value = SmoothedValue::new(0.0, 44100);
        assert!(!value.need_ramp());
        value.set_target(1.0);
        assert!(value.need_ramp());
        let first = value.next();
        assert!(first > 0.0 && first < 1.0);
        for _ in 0..10000 {
            value.next();
        }
        assert_eq!(value.next(), 1.0);

        value.init(0.5);
        assert_eq!(value.current(), 0.5);
        assert_eq!(value.target(), 0.5);
    }
}
