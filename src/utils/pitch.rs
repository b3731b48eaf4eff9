//! MIDI note, pitch wheel and velocity conversions.

// -------------------------------------------------------------------------------------------------

/// Default concert pitch in Hz of the MIDI note A4 (69).
pub const DEFAULT_CONCERT_PITCH: f32 = 440.0;

/// Convert a fractional MIDI note to a frequency in Hz using the given concert pitch.
#[inline]
pub fn note_to_frequency(note: f32, concert_pitch: f32) -> f32 {
    concert_pitch * 2.0_f32.powf((note - 69.0) / 12.0)
}

/// Convert a frequency in Hz to a fractional MIDI note using the given concert pitch.
#[inline]
pub fn frequency_to_note(frequency: f32, concert_pitch: f32) -> f32 {
    69.0 + 12.0 * (frequency / concert_pitch).log2()
}

// -------------------------------------------------------------------------------------------------

/// Translates 14-bit pitch wheel positions into fractional semitone offsets, using
/// independent bend ranges for upward and downward bends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchBendTracker {
    range_up: u8,
    range_down: u8,
    last_wheel_value: u16,
}

impl PitchBendTracker {
    /// Pitch wheel value of the centered wheel.
    pub const CENTER: u16 = 8192;
    /// Maximum bend range in semitones.
    pub const MAX_RANGE: u8 = 12;

    pub fn new(range_up: u8, range_down: u8) -> Self {
        Self {
            range_up: range_up.min(Self::MAX_RANGE),
            range_down: range_down.min(Self::MAX_RANGE),
            last_wheel_value: Self::CENTER,
        }
    }

    pub fn range_up(&self) -> u8 {
        self.range_up
    }
    pub fn range_down(&self) -> u8 {
        self.range_down
    }
    pub fn last_wheel_value(&self) -> u16 {
        self.last_wheel_value
    }

    pub fn set_range(&mut self, range_up: u8, range_down: u8) {
        self.range_up = range_up.min(Self::MAX_RANGE);
        self.range_down = range_down.min(Self::MAX_RANGE);
    }

    /// Apply a new 14-bit pitch wheel position.
    pub fn set_wheel_value(&mut self, value: u16) {
        self.last_wheel_value = value.min(16383);
    }

    /// Current bend offset in (fractional) semitones.
    pub fn bend_semitones(&self) -> f32 {
        let value = self.last_wheel_value as f32 - Self::CENTER as f32;
        if value > 0.0 {
            self.range_up as f32 * value / 8191.0
        } else if value < 0.0 {
            self.range_down as f32 * value / 8192.0
        } else {
            0.0
        }
    }

    /// Apply the current bend to the given MIDI note.
    pub fn adjusted_note(&self, note: u8) -> f32 {
        note as f32 + self.bend_semitones()
    }
}

impl Default for PitchBendTracker {
    fn default() -> Self {
        Self::new(2, 2)
    }
}

// -------------------------------------------------------------------------------------------------

/// Velocity to gain mapping. With a sensitivity of 0 all velocities result in full gain,
/// with a sensitivity of 1 the gain equals the normalized velocity.
#[inline]
pub fn velocity_to_gain(velocity: f32, sensitivity: f32) -> f32 {
    let velocity = velocity.clamp(0.0, 1.0);
    let sensitivity = sensitivity.clamp(0.0, 1.0);
    (1.0 - velocity) * (1.0 - sensitivity) + velocity
}

/// Equal power panning factors for a MIDI pan value in range [0, 127], 64 = center.
#[inline]
pub fn midi_pan_factors(midi_pan: u8) -> (f32, f32) {
    let pan = (midi_pan.min(127) as f32 / 127.0).clamp(0.0, 1.0);
    let angle = pan * std::f32::consts::FRAC_PI_2;
    (angle.cos(), angle.sin())
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_frequency_conversion() {
        assert_eq!(note_to_frequency(69.0, 440.0), 440.0);
        assert!((note_to_frequency(81.0, 440.0) - 880.0).abs() < 1e-3);
        assert!((note_to_frequency(69.0, 442.0) - 442.0).abs() < 1e-3);
        assert!((frequency_to_note(220.0, 440.0) - 57.0).abs() < 1e-4);
    }

    #[test]
    fn pitch_bend() {
        let mut bend = PitchBendTracker::new(2, 12);
        assert_eq!(bend.bend_semitones(), 0.0);
        bend.set_wheel_value(16383);
        assert!((bend.bend_semitones() - 2.0).abs() < 1e-6);
        bend.set_wheel_value(0);
        assert!((bend.bend_semitones() + 12.0).abs() < 1e-6);
        assert!((bend.adjusted_note(60) - 48.0).abs() < 1e-6);
        bend.set_range(24, 24);
        assert_eq!(bend.range_up(), PitchBendTracker::MAX_RANGE);
    }

    #[test]
    fn velocity() {
        assert_eq!(velocity_to_gain(0.0, 0.0), 1.0);
        assert_eq!(velocity_to_gain(0.25, 1.0), 0.25);
        assert_eq!(velocity_to_gain(0.5, 0.5), 0.75);
    }

    #[test]
    fn pan_factors() {
        let (l, r) = midi_pan_factors(0);
        assert!((l - 1.0).abs() < 1e-6 && r.abs() < 1e-6);
        let (l, r) = midi_pan_factors(127);
        assert!(l.abs() < 1e-6 && (r - 1.0).abs() < 1e-6);
        let (l, r) = midi_pan_factors(64);
        assert!((l * l + r * r - 1.0).abs() < 1e-5);
    }
}
