//! Linear ADSR envelope for harmony voices.

use std::time::Duration;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Current processing stage in a [`AdsrEnvelope`].
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum AdsrStage {
    #[default]
    /// Before attack and after release (zero volume).
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

// -------------------------------------------------------------------------------------------------

/// ADSR envelope parameters that define the envelope shape for a [`AdsrEnvelope`].
#[derive(Debug, Clone, PartialEq)]
pub struct AdsrParameters {
    sample_rate: u32,
    attack_time: Duration,
    attack_rate: f32,
    decay_time: Duration,
    decay_rate: f32,
    sustain_level: f32,
    release_time: Duration,
    release_rate: f32,
}

impl AdsrParameters {
    const UNINITIALIZED_SAMPLE_RATE: u32 = 66666;

    /// Create new ADSR parameters with sustain level and attack, decay and release time
    /// durations. See [`Self::setup`] for parameter info.
    ///
    /// Note that by default no valid sample rate is set. When using the parameters within a
    /// [`AdsrEnvelope`], make sure you set a valid rate before calling process.
    pub fn new(
        attack_time: Duration,
        decay_time: Duration,
        sustain_level: f32,
        release_time: Duration,
    ) -> Result<Self, Error> {
        let mut parameters = Self {
            sample_rate: Self::UNINITIALIZED_SAMPLE_RATE,
            attack_time: Duration::ZERO,
            attack_rate: 0.0,
            decay_time: Duration::ZERO,
            decay_rate: 0.0,
            sustain_level: 1.0,
            release_time: Duration::ZERO,
            release_rate: 0.0,
        };
        parameters.setup(attack_time, decay_time, sustain_level, release_time)?;
        Ok(parameters)
    }

    /// Get currently applied sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Set a new sample rate and recalculate internal rates if needed.
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), Error> {
        if sample_rate == 0 {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        if self.sample_rate != sample_rate {
            self.sample_rate = sample_rate;
            self.setup(
                self.attack_time,
                self.decay_time,
                self.sustain_level,
                self.release_time,
            )
        } else {
            Ok(())
        }
    }

    /// Get the sustain level.
    pub fn sustain_level(&self) -> f32 {
        self.sustain_level
    }
    /// Set the sustain level. This also updates the decay rate, which depends on it.
    pub fn set_sustain_level(&mut self, level: f32) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&level) {
            return Err(Error::ParameterError(format!(
                "Invalid sustain level: {}. Must be in range [0.0, 1.0]",
                level
            )));
        }
        self.sustain_level = level;
        self.set_decay_time(self.decay_time)
    }

    /// Get attack time duration.
    pub fn attack_time(&self) -> Duration {
        self.attack_time
    }
    /// Set the attack rate based on a time duration. Attack can be zero
    /// to completely skip the attack phase.
    pub fn set_attack_time(&mut self, time: Duration) -> Result<(), Error> {
        self.attack_time = time;
        self.attack_rate = self.rate_from_time(time, 1.0);
        Ok(())
    }

    /// Get decay time duration.
    pub fn decay_time(&self) -> Duration {
        self.decay_time
    }
    /// Set the decay rate based on a time duration.
    pub fn set_decay_time(&mut self, time: Duration) -> Result<(), Error> {
        self.decay_time = time;
        self.decay_rate = self.rate_from_time(time, 1.0 - self.sustain_level);
        Ok(())
    }

    /// Get release time duration.
    pub fn release_time(&self) -> Duration {
        self.release_time
    }
    /// Set the release rate based on a time duration.
    pub fn set_release_time(&mut self, time: Duration) -> Result<(), Error> {
        self.release_time = time;
        self.release_rate = self.rate_from_time(time, 1.0);
        Ok(())
    }

    /// Set sustain level, attack, decay, and release time durations.
    ///
    /// sustain_level is in range [0.0, 1.0].
    pub fn setup(
        &mut self,
        attack_time: Duration,
        decay_time: Duration,
        sustain_level: f32,
        release_time: Duration,
    ) -> Result<(), Error> {
        self.set_sustain_level(sustain_level)?;
        self.set_attack_time(attack_time)?;
        self.set_decay_time(decay_time)?;
        self.set_release_time(release_time)?;
        Ok(())
    }

    fn rate_from_time(&self, time: Duration, range: f32) -> f32 {
        if time.is_zero() {
            f32::MAX
        } else {
            range / (time.as_secs_f32() * self.sample_rate as f32)
        }
    }
}

impl Default for AdsrParameters {
    fn default() -> Self {
        Self {
            sample_rate: Self::UNINITIALIZED_SAMPLE_RATE,
            attack_time: Duration::from_millis(35),
            attack_rate: 1.0 / (0.035 * Self::UNINITIALIZED_SAMPLE_RATE as f32),
            decay_time: Duration::from_millis(60),
            decay_rate: 0.2 / (0.060 * Self::UNINITIALIZED_SAMPLE_RATE as f32),
            sustain_level: 0.8,
            release_time: Duration::from_millis(10),
            release_rate: 1.0 / (0.010 * Self::UNINITIALIZED_SAMPLE_RATE as f32),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Linear ADSR envelope with externally defined parameter state.
///
/// Parameters are defined in an external struct which must be passed to the process function,
/// so all voices of a harmonizer can share them.
#[derive(Debug, Default, Clone)]
pub struct AdsrEnvelope {
    stage: AdsrStage,
    target_volume: f32,
    release_output: f32,
    output: f32,
}

impl AdsrEnvelope {
    const SILENCE: f32 = 0.001; // -60dB

    /// Create a new ADSR envelope with default state.
    pub fn new() -> Self {
        Self {
            stage: AdsrStage::Idle,
            target_volume: 0.0,
            release_output: 0.0,
            output: 0.0,
        }
    }

    /// Return the envelope's current stage.
    #[inline(always)]
    pub fn stage(&self) -> AdsrStage {
        self.stage
    }

    /// Return the envelope's current (last processed) output value.
    #[inline(always)]
    pub fn output(&self) -> f32 {
        self.output
    }

    /// True when the envelope is in any other stage than Idle.
    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.stage != AdsrStage::Idle
    }

    /// Sets target volume from the given volume and state to Attack.
    pub fn note_on(&mut self, parameters: &AdsrParameters, volume: f32) {
        self.target_volume = volume;
        if parameters.attack_rate == f32::MAX {
            // skip attack
            self.output = volume;
            self.target_volume = parameters.sustain_level;
            self.stage = AdsrStage::Decay;
        } else {
            self.output = 0.0;
            self.stage = AdsrStage::Attack;
        }
    }

    /// Set target volume to 0 and state to Release.
    pub fn note_off(&mut self, parameters: &AdsrParameters) {
        if parameters.release_rate != f32::MAX && self.output > f32::EPSILON {
            self.target_volume = 0.0;
            self.release_output = self.output;
            self.stage = AdsrStage::Release;
        } else {
            self.reset();
        }
    }

    /// Immediately stop the envelope and set state to Idle.
    pub fn reset(&mut self) {
        self.output = 0.0;
        self.release_output = 0.0;
        self.stage = AdsrStage::Idle;
    }

    /// Compute and return one output sample. Will return 0.0 and do nothing
    /// at all in Idle stage.
    #[inline]
    pub fn run(&mut self, parameters: &AdsrParameters) -> f32 {
        debug_assert!(
            parameters.sample_rate != AdsrParameters::UNINITIALIZED_SAMPLE_RATE,
            "Set a valid sample rate in adsr parameters before processing!"
        );

        match self.stage {
            AdsrStage::Attack => {
                self.output += parameters.attack_rate;
                if self.output >= self.target_volume {
                    self.output = self.target_volume;
                    self.target_volume = parameters.sustain_level;
                    self.stage = AdsrStage::Decay;
                }
            }
            AdsrStage::Decay => {
                let sustain_level = parameters.sustain_level;
                if self.output > sustain_level {
                    self.output -= parameters.decay_rate;
                    if self.output <= sustain_level {
                        self.output = sustain_level;
                        self.stage = AdsrStage::Sustain;
                    }
                } else {
                    // attack target < sustain level
                    self.output += parameters.decay_rate;
                    if self.output >= sustain_level {
                        self.output = sustain_level;
                        self.stage = AdsrStage::Sustain;
                    }
                }
            }
            AdsrStage::Sustain => {
                // follow sustain level changes
                self.output = parameters.sustain_level;
            }
            AdsrStage::Release => {
                self.output -= self.release_output * parameters.release_rate;
                if self.output <= Self::SILENCE {
                    self.output = 0.0;
                    self.stage = AdsrStage::Idle;
                }
            }
            AdsrStage::Idle => {
                // nothing to do
            }
        }
        self.output
    }

    /// Process a buffer of samples, writing envelope values to output.
    #[inline]
    pub fn process(&mut self, parameters: &AdsrParameters, output: &mut [f32]) {
        match self.stage {
            AdsrStage::Idle => {
                output.fill(0.0);
            }
            AdsrStage::Sustain => {
                self.output = parameters.sustain_level;
                output.fill(self.output);
            }
            _ => {
                for sample in output.iter_mut() {
                    *sample = self.run(parameters);
                }
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------
