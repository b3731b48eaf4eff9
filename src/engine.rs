use std::{sync::Arc, time::Duration};

use crossbeam_queue::ArrayQueue;

use crate::{
    adapter::{BlockRenderer, BlockSizeAdapter},
    analysis::PitchDetector,
    harmonizer::{AutoVoiceSettings, Harmonizer, HarmonizerSettings},
    midi::MidiBuffer,
    utils::{
        self,
        adsr::AdsrParameters,
        buffer::{
            add_buffers, apply_gain_ramp, copy_channel_from_interleaved, mix_interleaved_to_mono,
        },
        pitch::PitchBendTracker,
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Selects which part of a multi channel input feeds the harmonizer.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
)]
#[repr(u8)]
pub enum InputChannelMode {
    /// Use the first channel.
    #[default]
    Left,
    /// Use the second channel, or the first one for mono inputs.
    Right,
    /// Average all channels.
    Mix,
}

// -------------------------------------------------------------------------------------------------

/// Static [`Engine`] configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Number of harmony voices.
    pub num_voices: usize,
    /// Lowest detectable input pitch in Hz. Defines the engine's block size and latency.
    pub min_pitch_hz: f32,
    /// Highest detectable input pitch in Hz.
    pub max_pitch_hz: f32,
    /// Minimum pitch detection clarity (0.0 - 1.0) for a frame to count as pitched.
    pub pitch_confidence: f32,
    /// Grain spacing in samples for unpitched frames.
    pub unpitched_grain_rate: usize,
    pub input_channel_mode: InputChannelMode,
    /// Input gain, applied before the pitch detection.
    pub input_gain: f32,
    /// Gain of the dry input signal in the output.
    pub dry_gain: f32,
    /// Gain of the harmonizer voices in the output.
    pub wet_gain: f32,
    pub output_gain: f32,
    /// Initial harmonizer settings.
    pub settings: HarmonizerSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_voices: 12,
            min_pitch_hz: PitchDetector::DEFAULT_MIN_HZ,
            max_pitch_hz: PitchDetector::DEFAULT_MAX_HZ,
            pitch_confidence: PitchDetector::DEFAULT_CONFIDENCE_THRESHOLD,
            unpitched_grain_rate: 64,
            input_channel_mode: InputChannelMode::default(),
            input_gain: 1.0,
            dry_gain: 0.0,
            wet_gain: 1.0,
            output_gain: 1.0,
            settings: HarmonizerSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate all parameters. Sample rate dependent ranges are checked in
    /// [`Engine::prepare`].
    pub fn validate(&self) -> Result<(), Error> {
        if self.num_voices == 0 {
            return Err(Error::InvalidVoiceCount(self.num_voices));
        }
        if !(self.min_pitch_hz > 0.0 && self.min_pitch_hz < self.max_pitch_hz) {
            return Err(Error::ParameterError(format!(
                "Invalid pitch detection range: {} - {} Hz",
                self.min_pitch_hz, self.max_pitch_hz
            )));
        }
        if !(0.0..=1.0).contains(&self.pitch_confidence) {
            return Err(Error::ParameterError(
                "Pitch confidence must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.unpitched_grain_rate == 0 {
            return Err(Error::ParameterError(
                "Unpitched grain rate must be at least one sample".to_string(),
            ));
        }
        for gain in [
            self.input_gain,
            self.dry_gain,
            self.wet_gain,
            self.output_gain,
        ] {
            validate_gain(gain)?;
        }
        self.settings.validate()
    }
}

fn validate_gain(gain: f32) -> Result<(), Error> {
    if !(gain.is_finite() && gain >= 0.0) {
        return Err(Error::ParameterError(format!(
            "Invalid gain: {gain}. Must be a positive, finite value"
        )));
    }
    Ok(())
}

// -------------------------------------------------------------------------------------------------

/// Parameter changes which get applied in the audio thread at the start of the next
/// internal block.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    Settings(HarmonizerSettings),
    Adsr {
        attack: Duration,
        decay: Duration,
        sustain: f32,
        release: Duration,
    },
    AdsrEnabled(bool),
    QuickRelease(Duration),
    PitchBendRange {
        up: u8,
        down: u8,
    },
    VelocitySensitivity(f32),
    StereoWidth(f32),
    LowestPannedNote(u8),
    PedalPitch(AutoVoiceSettings),
    Descant(AutoVoiceSettings),
    VoiceStealing(bool),
    ProtectAutoVoices(bool),
    ConcertPitch(f32),
    SoftPedalGain(f32),
    SubBlockSize {
        min_size: usize,
        strict: bool,
    },
    Latch(bool),
    PitchConfidence(f32),
    InputGain(f32),
    DryGain(f32),
    WetGain(f32),
    OutputGain(f32),
    AllNotesOff {
        allow_tail_off: bool,
    },
}

impl EngineMessage {
    /// Check value ranges, so applying the message in the audio thread can not fail.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Settings(settings) => settings.validate(),
            Self::Adsr {
                attack,
                decay,
                sustain,
                release,
            } => AdsrParameters::new(*attack, *decay, *sustain, *release)
                .map(|_| ()),
            Self::QuickRelease(time) => {
                if time.is_zero() {
                    Err(Error::ParameterError(
                        "Quick release time must be greater than zero".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
            Self::PitchBendRange { up, down } => {
                if *up > PitchBendTracker::MAX_RANGE || *down > PitchBendTracker::MAX_RANGE {
                    Err(Error::ParameterError(format!(
                        "Invalid pitch bend range: +{up}/-{down}. Must be in range [0, 12]"
                    )))
                } else {
                    Ok(())
                }
            }
            Self::VelocitySensitivity(value) | Self::StereoWidth(value) => {
                if (0.0..=100.0).contains(value) {
                    Ok(())
                } else {
                    Err(Error::ParameterError(format!(
                        "Invalid percentage: {value}. Must be in range [0, 100]"
                    )))
                }
            }
            Self::LowestPannedNote(note) => {
                if *note <= 127 {
                    Ok(())
                } else {
                    Err(Error::ParameterError(format!("Invalid MIDI note: {note}")))
                }
            }
            Self::PedalPitch(settings) | Self::Descant(settings) => settings.validate(),
            Self::ConcertPitch(hz) => {
                if hz.is_finite() && *hz > 0.0 {
                    Ok(())
                } else {
                    Err(Error::ParameterError(format!(
                        "Invalid concert pitch: {hz} Hz"
                    )))
                }
            }
            Self::SoftPedalGain(value) | Self::PitchConfidence(value) => {
                if (0.0..=1.0).contains(value) {
                    Ok(())
                } else {
                    Err(Error::ParameterError(format!(
                        "Invalid value: {value}. Must be in range [0, 1]"
                    )))
                }
            }
            Self::SubBlockSize { min_size, .. } => {
                if *min_size == 0 {
                    Err(Error::InvalidBlockSize(*min_size))
                } else {
                    Ok(())
                }
            }
            Self::InputGain(gain)
            | Self::DryGain(gain)
            | Self::WetGain(gain)
            | Self::OutputGain(gain) => validate_gain(*gain),
            Self::AdsrEnabled(_)
            | Self::VoiceStealing(_)
            | Self::ProtectAutoVoices(_)
            | Self::Latch(_)
            | Self::AllNotesOff { .. } => Ok(()),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Changes [`Engine`] parameters from any thread while the engine is processing.
///
/// Handles are `Send` and `Sync` and can be cloned. Messages are validated before they are
/// queued and get applied at the start of the engine's next internal block.
#[derive(Clone)]
pub struct EngineHandle {
    message_queue: Arc<ArrayQueue<EngineMessage>>,
}

impl EngineHandle {
    fn new(message_queue: Arc<ArrayQueue<EngineMessage>>) -> Self {
        Self { message_queue }
    }

    /// Queue a message for the audio thread.
    pub fn send(&self, message: EngineMessage) -> Result<(), Error> {
        message.validate()?;
        self.message_queue.push(message).map_err(|message| {
            log::warn!("Engine message queue is full. Failed to send a {message:?} message.");
            Error::SendError("Engine message queue is full".to_string())
        })
    }

    pub fn set_settings(&self, settings: HarmonizerSettings) -> Result<(), Error> {
        self.send(EngineMessage::Settings(settings))
    }

    pub fn set_adsr(
        &self,
        attack: Duration,
        decay: Duration,
        sustain: f32,
        release: Duration,
    ) -> Result<(), Error> {
        self.send(EngineMessage::Adsr {
            attack,
            decay,
            sustain,
            release,
        })
    }

    pub fn set_stereo_width(&self, width: f32) -> Result<(), Error> {
        self.send(EngineMessage::StereoWidth(width))
    }

    pub fn set_pedal_pitch(&self, settings: AutoVoiceSettings) -> Result<(), Error> {
        self.send(EngineMessage::PedalPitch(settings))
    }

    pub fn set_descant(&self, settings: AutoVoiceSettings) -> Result<(), Error> {
        self.send(EngineMessage::Descant(settings))
    }

    pub fn set_latch(&self, enabled: bool) -> Result<(), Error> {
        self.send(EngineMessage::Latch(enabled))
    }

    pub fn all_notes_off(&self, allow_tail_off: bool) -> Result<(), Error> {
        self.send(EngineMessage::AllNotesOff { allow_tail_off })
    }
}

// -------------------------------------------------------------------------------------------------

/// Gain which ramps from its previous to its current value over one block.
#[derive(Debug, Clone, Copy)]
struct RampedGain {
    previous: f32,
    current: f32,
}

impl RampedGain {
    fn new(value: f32) -> Self {
        Self {
            previous: value,
            current: value,
        }
    }

    fn set(&mut self, value: f32) {
        self.current = value;
    }

    fn apply(&mut self, buffer: &mut [f32], channel_count: usize) {
        apply_gain_ramp(buffer, channel_count, self.previous, self.current);
        self.previous = self.current;
    }
}

// -------------------------------------------------------------------------------------------------

/// Renders internal blocks: detects the input pitch, runs the harmonizer and mixes the dry
/// and wet signals.
struct HarmonizerRenderer {
    harmonizer: Harmonizer,
    pitch_detector: PitchDetector,
    message_queue: Arc<ArrayQueue<EngineMessage>>,
    // previous and current input block
    window: Vec<f32>,
    dry: Vec<f32>,
    input_gain: RampedGain,
    dry_gain: RampedGain,
    wet_gain: RampedGain,
    output_gain: RampedGain,
}

impl HarmonizerRenderer {
    fn block_size(&self) -> usize {
        self.harmonizer.frame_size()
    }

    fn apply_messages(&mut self) {
        while let Some(message) = self.message_queue.pop() {
            if let Err(err) = self.apply_message(message) {
                log::warn!("Failed to apply engine message: {err}");
            }
        }
    }

    fn apply_message(&mut self, message: EngineMessage) -> Result<(), Error> {
        let harmonizer = &mut self.harmonizer;
        match message {
            EngineMessage::Settings(settings) => harmonizer.set_settings(settings)?,
            EngineMessage::Adsr {
                attack,
                decay,
                sustain,
                release,
            } => harmonizer.set_adsr(attack, decay, sustain, release)?,
            EngineMessage::AdsrEnabled(enabled) => harmonizer.set_adsr_enabled(enabled),
            EngineMessage::QuickRelease(time) => harmonizer.set_quick_release(time)?,
            EngineMessage::PitchBendRange { up, down } => {
                harmonizer.set_pitch_bend_range(up, down)?
            }
            EngineMessage::VelocitySensitivity(value) => {
                harmonizer.set_velocity_sensitivity(value)?
            }
            EngineMessage::StereoWidth(width) => harmonizer.set_stereo_width(width)?,
            EngineMessage::LowestPannedNote(note) => harmonizer.set_lowest_panned_note(note)?,
            EngineMessage::PedalPitch(settings) => harmonizer.set_pedal_pitch(settings)?,
            EngineMessage::Descant(settings) => harmonizer.set_descant(settings)?,
            EngineMessage::VoiceStealing(enabled) => harmonizer.set_voice_stealing(enabled),
            EngineMessage::ProtectAutoVoices(protect) => {
                harmonizer.set_protect_auto_voices(protect)
            }
            EngineMessage::ConcertPitch(hz) => harmonizer.set_concert_pitch(hz)?,
            EngineMessage::SoftPedalGain(gain) => harmonizer.set_soft_pedal_gain(gain)?,
            EngineMessage::SubBlockSize { min_size, strict } => {
                harmonizer.set_sub_block_size(min_size, strict)?
            }
            EngineMessage::Latch(enabled) => harmonizer.set_latch(enabled),
            EngineMessage::PitchConfidence(value) => {
                self.pitch_detector.set_confidence_threshold(value)?
            }
            EngineMessage::InputGain(gain) => self.input_gain.set(gain),
            EngineMessage::DryGain(gain) => self.dry_gain.set(gain),
            EngineMessage::WetGain(gain) => self.wet_gain.set(gain),
            EngineMessage::OutputGain(gain) => self.output_gain.set(gain),
            EngineMessage::AllNotesOff { allow_tail_off } => {
                harmonizer.all_notes_off(allow_tail_off)
            }
        }
        Ok(())
    }

    /// Move the current block into the history and append the new, gained input.
    fn push_input(&mut self, input: &[f32]) {
        let block_size = self.block_size();
        self.window.copy_within(block_size.., 0);
        let current = &mut self.window[block_size..];
        current.copy_from_slice(input);
        self.input_gain.apply(current, 1);
    }

    /// Write the dry input of the current block to both channels of `dry`.
    fn fill_dry(&mut self) {
        let block_size = self.block_size();
        for (frame, sample) in self
            .dry
            .chunks_exact_mut(2)
            .zip(&self.window[block_size..])
        {
            frame[0] = *sample;
            frame[1] = *sample;
        }
    }

    /// Copy all parameters which can be changed via messages into the given config.
    fn store_parameters(&self, config: &mut EngineConfig) {
        config.settings = self.harmonizer.settings().clone();
        config.num_voices = self.harmonizer.num_voices();
        config.pitch_confidence = self.pitch_detector.confidence_threshold();
        config.input_gain = self.input_gain.current;
        config.dry_gain = self.dry_gain.current;
        config.wet_gain = self.wet_gain.current;
        config.output_gain = self.output_gain.current;
    }

    fn reset(&mut self) {
        self.harmonizer.reset();
        self.window.fill(0.0);
        self.dry.fill(0.0);
        for gain in [
            &mut self.input_gain,
            &mut self.dry_gain,
            &mut self.wet_gain,
            &mut self.output_gain,
        ] {
            gain.previous = gain.current;
        }
    }
}

impl BlockRenderer for HarmonizerRenderer {
    fn render_block(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        midi_input: &MidiBuffer,
        midi_output: &mut MidiBuffer,
    ) {
        utils::assert_no_alloc(|| {
            self.apply_messages();
            self.push_input(input);

            let input_frequency = self.pitch_detector.detect_pitch(&self.window);
            self.harmonizer
                .render_voices(&self.window, output, input_frequency, midi_input);
            self.wet_gain.apply(output, 2);

            self.fill_dry();
            self.dry_gain.apply(&mut self.dry, 2);
            add_buffers(output, &self.dry);
            self.output_gain.apply(output, 2);

            // passthrough, then the generated pedal and descant notes
            midi_output.append_with_offset(midi_input, 0);
            midi_output.append_with_offset(self.harmonizer.generated_midi(), 0);
            self.harmonizer.clear_generated_midi();
        });
    }

    fn render_bypassed_block(&mut self, input: &[f32], output: &mut [f32]) {
        utils::assert_no_alloc(|| {
            self.apply_messages();
            self.push_input(input);
            self.fill_dry();
            output.copy_from_slice(&self.dry);
        });
    }
}

// -------------------------------------------------------------------------------------------------

/// Audio thread state of a prepared engine.
struct PreparedEngine {
    sample_rate: u32,
    adapter: BlockSizeAdapter,
    renderer: HarmonizerRenderer,
}

// -------------------------------------------------------------------------------------------------

/// Real-time polyphonic harmonizer engine.
///
/// Resynthesizes a monophonic input signal at the pitches of all MIDI notes it receives.
/// Host buffers of any size get processed in fixed internal blocks of one max pitch period
/// (`ceil(sample_rate / min_pitch_hz)`), which is also the engine's latency.
///
/// Functions which take `&mut self` must not be called concurrently with processing. Use
/// an [`EngineHandle`] to change parameters from other threads.
pub struct Engine {
    config: EngineConfig,
    message_queue: Arc<ArrayQueue<EngineMessage>>,
    prepared: Option<PreparedEngine>,
    fade_in_pending: bool,
    mono_input: Vec<f32>,
    chunk_midi_input: MidiBuffer,
    chunk_midi_output: MidiBuffer,
}

impl Engine {
    /// Number of messages the engine's message queue can hold.
    pub const MESSAGE_QUEUE_SIZE: usize = 256;
    /// Max number of frames which get deinterleaved at once.
    const INTERLEAVED_CHUNK_SIZE: usize = 1024;

    /// Create a new, unprepared engine. Call [`Self::prepare`] before processing.
    pub fn new(config: EngineConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            message_queue: Arc::new(ArrayQueue::new(Self::MESSAGE_QUEUE_SIZE)),
            prepared: None,
            fade_in_pending: false,
            mono_input: vec![0.0; Self::INTERLEAVED_CHUNK_SIZE],
            chunk_midi_input: MidiBuffer::default(),
            chunk_midi_output: MidiBuffer::default(),
        })
    }

    /// The engine's configuration. Parameters which got changed via an [`EngineHandle`] get
    /// copied into it when preparing and releasing the engine: see [`Self::settings`] for the
    /// currently applied harmonizer settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a new handle to change parameters from any thread.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(Arc::clone(&self.message_queue))
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.prepared.as_ref().map(|p| p.sample_rate)
    }

    /// Allocate all buffers and voices for the given sample rate. Playing notes get stopped.
    pub fn prepare(&mut self, sample_rate: u32) -> Result<(), Error> {
        if sample_rate == 0 {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        // keep parameters which got changed via handles since the last prepare
        if let Some(prepared) = &self.prepared {
            prepared.renderer.store_parameters(&mut self.config);
        }
        let mut pitch_detector = PitchDetector::new(
            sample_rate,
            self.config.min_pitch_hz,
            self.config.max_pitch_hz,
        )?;
        pitch_detector.set_confidence_threshold(self.config.pitch_confidence)?;

        let settings = self.config.settings.clone();
        let num_voices = self.config.num_voices;
        let block_size = pitch_detector.max_period();
        let harmonizer = self.create_harmonizer(
            sample_rate,
            block_size,
            num_voices,
            pitch_detector.min_period(),
            settings,
        )?;
        let adapter = BlockSizeAdapter::new(block_size)?;
        let renderer = HarmonizerRenderer {
            harmonizer,
            pitch_detector,
            message_queue: Arc::clone(&self.message_queue),
            window: vec![0.0; 2 * block_size],
            dry: vec![0.0; 2 * block_size],
            input_gain: RampedGain::new(self.config.input_gain),
            dry_gain: RampedGain::new(self.config.dry_gain),
            wet_gain: RampedGain::new(self.config.wet_gain),
            output_gain: RampedGain::new(self.config.output_gain),
        };
        self.prepared = Some(PreparedEngine {
            sample_rate,
            adapter,
            renderer,
        });
        self.fade_in_pending = false;
        log::info!(
            "Prepared harmonizer engine at {sample_rate} Hz with a latency of {block_size} samples"
        );
        Ok(())
    }

    fn create_harmonizer(
        &self,
        sample_rate: u32,
        block_size: usize,
        num_voices: usize,
        min_period: usize,
        settings: HarmonizerSettings,
    ) -> Result<Harmonizer, Error> {
        Harmonizer::new(
            sample_rate,
            block_size,
            num_voices,
            min_period,
            self.config.unpitched_grain_rate.min(block_size),
            settings,
        )
    }

    /// Free all buffers. Processing outputs silence until the engine gets prepared again.
    pub fn release(&mut self) {
        if let Some(prepared) = self.prepared.take() {
            prepared.renderer.store_parameters(&mut self.config);
            log::info!("Released harmonizer engine");
        }
    }

    /// Stop all voices and drop all pending audio and MIDI. The latency is preserved.
    pub fn reset(&mut self) {
        if let Some(prepared) = &mut self.prepared {
            prepared.adapter.reset();
            prepared.renderer.reset();
        }
        self.fade_in_pending = false;
    }

    /// Delay of the processed output in samples, or 0 when not prepared.
    pub fn latency_samples(&self) -> usize {
        self.prepared
            .as_ref()
            .map(|p| p.adapter.latency_samples())
            .unwrap_or(0)
    }

    /// Currently applied harmonizer settings, when prepared.
    pub fn settings(&self) -> Option<&HarmonizerSettings> {
        self.prepared
            .as_ref()
            .map(|p| p.renderer.harmonizer.settings())
    }

    /// Sorted list of all sounding notes, including released but still ringing ones.
    pub fn active_notes(&self) -> Vec<u8> {
        self.prepared
            .as_ref()
            .map(|p| p.renderer.harmonizer.active_notes())
            .unwrap_or_default()
    }

    /// Most recently detected input pitch in Hz.
    pub fn current_input_frequency(&self) -> Option<f32> {
        self.prepared
            .as_ref()
            .and_then(|p| p.renderer.harmonizer.current_input_frequency())
    }

    /// Clarity of the most recent pitch detection (0.0 - 1.0).
    pub fn pitch_clarity(&self) -> f32 {
        self.prepared
            .as_ref()
            .map(|p| p.renderer.pitch_detector.last_clarity())
            .unwrap_or(0.0)
    }

    pub fn input_channel_mode(&self) -> InputChannelMode {
        self.config.input_channel_mode
    }

    pub fn set_input_channel_mode(&mut self, mode: InputChannelMode) {
        self.config.input_channel_mode = mode;
    }

    /// Set a new pitch detection range. Changing the min pitch changes the internal block
    /// size and thus the latency, which reallocates the engine's buffers and stops all notes.
    pub fn set_pitch_detection_range(&mut self, min_hz: f32, max_hz: f32) -> Result<(), Error> {
        let config = EngineConfig {
            min_pitch_hz: min_hz,
            max_pitch_hz: max_hz,
            ..self.config.clone()
        };
        config.validate()?;
        let Some(prepared) = &mut self.prepared else {
            self.config = config;
            return Ok(());
        };
        let previous_block_size = prepared.adapter.internal_block_size();
        prepared.renderer.pitch_detector.set_hz_range(min_hz, max_hz)?;
        self.config.min_pitch_hz = min_hz;
        self.config.max_pitch_hz = max_hz;
        if prepared.renderer.pitch_detector.max_period() != previous_block_size {
            let sample_rate = prepared.sample_rate;
            self.prepare(sample_rate)?;
        }
        Ok(())
    }

    /// Set the minimum clarity (0.0 - 1.0) for frames to count as pitched.
    pub fn set_pitch_detection_confidence(&mut self, confidence: f32) -> Result<(), Error> {
        if let Some(prepared) = &mut self.prepared {
            prepared
                .renderer
                .pitch_detector
                .set_confidence_threshold(confidence)?;
        } else if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::ParameterError(
                "Pitch confidence must be between 0.0 and 1.0".to_string(),
            ));
        }
        self.config.pitch_confidence = confidence;
        Ok(())
    }

    /// Change the number of harmony voices.
    pub fn set_max_voices(&mut self, num_voices: usize) -> Result<(), Error> {
        if let Some(prepared) = &mut self.prepared {
            prepared.renderer.harmonizer.set_num_voices(num_voices)?;
        } else if num_voices == 0 {
            return Err(Error::InvalidVoiceCount(num_voices));
        }
        self.config.num_voices = num_voices;
        Ok(())
    }

    /// Process a mono input buffer into an interleaved stereo output buffer with the same
    /// number of frames. Incoming MIDI gets passed through to `midi_output`, along with
    /// generated pedal pitch and descant notes, delayed by the latency.
    pub fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        midi_input: &MidiBuffer,
        midi_output: &mut MidiBuffer,
    ) {
        self.process_with_fades(input, output, midi_input, midi_output, false, false);
    }

    /// Like [`Self::process`], fading the output of the first internal chunk in and/or the
    /// last internal chunk out.
    pub fn process_with_fades(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        midi_input: &MidiBuffer,
        midi_output: &mut MidiBuffer,
        fade_in: bool,
        fade_out: bool,
    ) {
        debug_assert_eq!(output.len(), 2 * input.len(), "Invalid output buffer size");
        let Some(prepared) = &mut self.prepared else {
            output.fill(0.0);
            return;
        };
        let fade_in = fade_in || std::mem::take(&mut self.fade_in_pending);
        prepared.adapter.process(
            &mut prepared.renderer,
            input,
            output,
            midi_input,
            midi_output,
            fade_in,
            fade_out,
        );
    }

    /// Process without harmonizing: outputs the dry input and passes MIDI through, delayed
    /// by the same latency as [`Self::process`]. The next processed block fades in.
    pub fn process_bypassed(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        midi_input: &MidiBuffer,
        midi_output: &mut MidiBuffer,
    ) {
        debug_assert_eq!(output.len(), 2 * input.len(), "Invalid output buffer size");
        let Some(prepared) = &mut self.prepared else {
            output.fill(0.0);
            return;
        };
        prepared.adapter.process_bypassed(
            &mut prepared.renderer,
            input,
            output,
            midi_input,
            midi_output,
        );
        self.fade_in_pending = true;
    }

    /// Process an interleaved input with `channel_count` channels, selecting the harmonized
    /// signal via the [`InputChannelMode`].
    pub fn process_interleaved(
        &mut self,
        input: &[f32],
        channel_count: usize,
        output: &mut [f32],
        midi_input: &MidiBuffer,
        midi_output: &mut MidiBuffer,
    ) -> Result<(), Error> {
        if channel_count == 0 || input.len() % channel_count != 0 {
            return Err(Error::ParameterError(format!(
                "Invalid interleaved input: {} samples with {channel_count} channels",
                input.len()
            )));
        }
        let num_frames = input.len() / channel_count;
        if output.len() != 2 * num_frames {
            return Err(Error::ParameterError(format!(
                "Invalid output buffer size: expected {} samples, got {}",
                2 * num_frames,
                output.len()
            )));
        }

        let mut mono_input = std::mem::take(&mut self.mono_input);
        let mut chunk_midi_input = std::mem::take(&mut self.chunk_midi_input);
        let mut chunk_midi_output = std::mem::take(&mut self.chunk_midi_output);
        let mut offset = 0;
        loop {
            let chunk_len = (num_frames - offset).min(Self::INTERLEAVED_CHUNK_SIZE);
            let is_last_chunk = offset + chunk_len == num_frames;
            let interleaved = &input[offset * channel_count..(offset + chunk_len) * channel_count];
            let mono = &mut mono_input[..chunk_len];
            match self.config.input_channel_mode {
                InputChannelMode::Left => {
                    copy_channel_from_interleaved(interleaved, channel_count, 0, mono)
                }
                InputChannelMode::Right => copy_channel_from_interleaved(
                    interleaved,
                    channel_count,
                    1.min(channel_count - 1),
                    mono,
                ),
                InputChannelMode::Mix => mix_interleaved_to_mono(interleaved, channel_count, mono),
            }
            chunk_midi_input.clear();
            let midi_span = if is_last_chunk { usize::MAX } else { chunk_len };
            chunk_midi_input.copy_range(midi_input, offset, midi_span, 0);
            chunk_midi_output.clear();
            self.process(
                mono,
                &mut output[2 * offset..2 * (offset + chunk_len)],
                &chunk_midi_input,
                &mut chunk_midi_output,
            );
            midi_output.append_with_offset(&chunk_midi_output, offset);
            offset += chunk_len;
            if is_last_chunk {
                break;
            }
        }
        self.mono_input = mono_input;
        self.chunk_midi_input = chunk_midi_input;
        self.chunk_midi_output = chunk_midi_output;
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
