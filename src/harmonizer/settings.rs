use std::time::Duration;

use crate::{utils::pitch::DEFAULT_CONCERT_PITCH, Error};

// -------------------------------------------------------------------------------------------------

/// Automatic voice which doubles the lowest (pedal pitch) or highest (descant) held keyboard
/// note at a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoVoiceSettings {
    /// Turns the auto voice on or off.
    pub enabled: bool,
    /// MIDI note threshold (0 - 127). Pedal pitch only sounds for lowest notes at or below,
    /// descant for highest notes at or above the threshold.
    pub threshold: u8,
    /// Interval in semitones to the doubled note (1 - 12).
    pub interval: u8,
}

impl AutoVoiceSettings {
    pub fn pedal_pitch() -> Self {
        Self {
            enabled: false,
            threshold: 0,
            interval: 12,
        }
    }

    pub fn descant() -> Self {
        Self {
            enabled: false,
            threshold: 127,
            interval: 12,
        }
    }

    /// Validate all parameters.
    pub fn validate(&self) -> Result<(), Error> {
        if self.threshold > 127 {
            return Err(Error::ParameterError(
                "Auto voice threshold must be a MIDI note between 0 and 127".to_string(),
            ));
        }
        if self.interval < 1 || self.interval > 12 {
            return Err(Error::ParameterError(
                "Auto voice interval must be between 1 and 12 semitones".to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Performance parameters of a [`Harmonizer`](super::Harmonizer).
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonizerSettings {
    /// When disabled, voices use a short linear fade in and out instead of the ADSR envelope.
    pub adsr_enabled: bool,
    pub attack: Duration,
    pub decay: Duration,
    /// Sustain level (0.0 - 1.0).
    pub sustain: f32,
    pub release: Duration,
    /// Fade in and out time, used when the ADSR is disabled.
    pub quick_release: Duration,
    /// Pitch wheel range in semitones (0 - 12).
    pub bend_range_up: u8,
    /// Pitch wheel range in semitones (0 - 12).
    pub bend_range_down: u8,
    /// Velocity sensitivity in percent (0 - 100).
    pub velocity_sensitivity: f32,
    /// Stereo width of the voice panning in percent (0 - 100).
    pub stereo_width: f32,
    /// Notes below this MIDI note are always centered.
    pub lowest_panned_note: u8,
    pub pedal_pitch: AutoVoiceSettings,
    pub descant: AutoVoiceSettings,
    /// Steal a playing voice when a note on finds no free voice.
    pub voice_stealing: bool,
    /// Only steal pedal pitch or descant voices when there's no other candidate.
    pub protect_auto_voices: bool,
    /// Frequency of A4 in Hz.
    pub concert_pitch: f32,
    /// Gain multiplier for notes started while the soft pedal is held (0.0 - 1.0).
    pub soft_pedal_gain: f32,
    /// Smallest sub block size MIDI events may split a render block into.
    pub min_sub_block_size: usize,
    /// When disabled, the first event of a block may split the block at one sample.
    pub strict_sub_block_size: bool,
}

impl Default for HarmonizerSettings {
    fn default() -> Self {
        Self {
            adsr_enabled: true,
            attack: Duration::from_millis(35),
            decay: Duration::from_millis(60),
            sustain: 0.8,
            release: Duration::from_millis(10),
            quick_release: Duration::from_millis(15),
            bend_range_up: 2,
            bend_range_down: 2,
            velocity_sensitivity: 100.0,
            stereo_width: 100.0,
            lowest_panned_note: 0,
            pedal_pitch: AutoVoiceSettings::pedal_pitch(),
            descant: AutoVoiceSettings::descant(),
            voice_stealing: true,
            protect_auto_voices: false,
            concert_pitch: DEFAULT_CONCERT_PITCH,
            soft_pedal_gain: 0.65,
            min_sub_block_size: 32,
            strict_sub_block_size: false,
        }
    }
}

impl HarmonizerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate all parameters.
    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.sustain) {
            return Err(Error::ParameterError(
                "Sustain level must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.bend_range_up > 12 || self.bend_range_down > 12 {
            return Err(Error::ParameterError(
                "Pitch bend range must be between 0 and 12 semitones".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.velocity_sensitivity) {
            return Err(Error::ParameterError(
                "Velocity sensitivity must be between 0 and 100 %".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.stereo_width) {
            return Err(Error::ParameterError(
                "Stereo width must be between 0 and 100 %".to_string(),
            ));
        }
        if self.lowest_panned_note > 127 {
            return Err(Error::ParameterError(
                "Lowest panned note must be a MIDI note between 0 and 127".to_string(),
            ));
        }
        self.pedal_pitch.validate()?;
        self.descant.validate()?;
        if !(self.concert_pitch.is_finite() && self.concert_pitch > 0.0) {
            return Err(Error::ParameterError(
                "Concert pitch must be a positive frequency".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.soft_pedal_gain) {
            return Err(Error::ParameterError(
                "Soft pedal gain must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.min_sub_block_size == 0 {
            return Err(Error::ParameterError(
                "Minimum sub block size must be at least one sample".to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(HarmonizerSettings::default().validate().is_ok());
        assert!(AutoVoiceSettings::pedal_pitch().validate().is_ok());
        assert!(AutoVoiceSettings::descant().validate().is_ok());
    }

    #[test]
    fn invalid_settings() {
        let settings = HarmonizerSettings {
            stereo_width: 120.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = HarmonizerSettings {
            descant: AutoVoiceSettings {
                interval: 0,
                ..AutoVoiceSettings::descant()
            },
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = HarmonizerSettings {
            concert_pitch: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
