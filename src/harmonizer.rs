//! Polyphonic PSOLA voice manager: allocates and steals harmony voices, applies pedals, latch
//! and auto voices, and renders all voices from the grains of the current analysis frame.

use std::time::Duration;

use crate::{
    analysis::GrainOnsetDetector,
    grains::GrainStore,
    midi::{controllers, MidiBuffer, MidiMessage},
    utils::{
        adsr::AdsrParameters,
        pitch::{note_to_frequency, velocity_to_gain, PitchBendTracker},
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

mod panning;
mod settings;
mod voice;

pub use panning::PanningManager;
pub use settings::{AutoVoiceSettings, HarmonizerSettings};

use voice::{
    AutoVoice, FrameGrain, HarmonizerVoice, SynthesisGrainScheduler, VoiceRenderContext,
};

// -------------------------------------------------------------------------------------------------

/// Polyphonic harmonizer which resynthesizes a monophonic input at the pitches of all playing
/// MIDI notes.
///
/// The harmonizer processes fixed size frames. Each frame gets analysed together with the
/// previous frame: pitch synchronous grains are captured from the frame and handed out to all
/// playing voices, which respace them to their own pitch periods.
///
/// Voices, grains and all other buffers are allocated in [`Self::new`] and when changing the
/// number of voices, so rendering frames and handling MIDI events is real-time safe.
pub struct Harmonizer {
    settings: HarmonizerSettings,
    sample_rate: u32,
    frame_size: usize,
    min_period: usize,
    unpitched_grain_rate: usize,
    max_synthesis_grains: usize,
    voices: Vec<HarmonizerVoice>,
    grain_store: GrainStore,
    onset_detector: GrainOnsetDetector,
    frame_grains: Vec<FrameGrain>,
    panner: PanningManager,
    adsr_parameters: AdsrParameters,
    quick_parameters: AdsrParameters,
    bend_tracker: PitchBendTracker,
    note_on_counter: u64,
    sustain_pedal_down: bool,
    sostenuto_pedal_down: bool,
    soft_pedal_down: bool,
    latch_enabled: bool,
    last_pedal_pitch: Option<u8>,
    last_descant_pitch: Option<u8>,
    last_midi_channel: u8,
    generated_midi: MidiBuffer,
    input_frequency: Option<f32>,
    frame_pitched: bool,
    analysis_period: usize,
    steal_order: Vec<usize>,
}

impl Harmonizer {
    /// Create a new harmonizer for frames of `frame_size` samples.
    ///
    /// `min_period` is the shortest input period in samples the pitch detector can report.
    /// Unpitched frames get resynthesized from grains `unpitched_grain_rate` samples apart.
    pub fn new(
        sample_rate: u32,
        frame_size: usize,
        num_voices: usize,
        min_period: usize,
        unpitched_grain_rate: usize,
        settings: HarmonizerSettings,
    ) -> Result<Self, Error> {
        if sample_rate == 0 {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        if frame_size == 0 {
            return Err(Error::InvalidBlockSize(frame_size));
        }
        if num_voices == 0 {
            return Err(Error::InvalidVoiceCount(num_voices));
        }
        if unpitched_grain_rate == 0 || unpitched_grain_rate > frame_size {
            return Err(Error::ParameterError(format!(
                "Invalid unpitched grain rate: {unpitched_grain_rate}. \
                 Must be in range [1, {frame_size}]"
            )));
        }
        settings.validate()?;

        let mut adsr_parameters = AdsrParameters::new(
            settings.attack,
            settings.decay,
            settings.sustain,
            settings.release,
        )?;
        adsr_parameters.set_sample_rate(sample_rate)?;
        let mut quick_parameters = Self::quick_parameters(settings.quick_release)?;
        quick_parameters.set_sample_rate(sample_rate)?;

        let min_period = min_period.clamp(1, frame_size);
        // grains span two periods, periods never exceed the frame size
        let grain_capacity = 2 * frame_size;
        let max_synthesis_grains =
            SynthesisGrainScheduler::required_grains(grain_capacity, min_period);
        let grain_store = GrainStore::new(
            Self::required_grain_slots(
                num_voices,
                max_synthesis_grains,
                frame_size,
                min_period,
                unpitched_grain_rate,
            ),
            grain_capacity,
        );

        let voices = (0..num_voices)
            .map(|_| HarmonizerVoice::new(sample_rate, max_synthesis_grains))
            .collect();
        let panner = PanningManager::new(num_voices, settings.stereo_width);
        let bend_tracker =
            PitchBendTracker::new(settings.bend_range_up, settings.bend_range_down);

        log::debug!(
            "Creating harmonizer with {num_voices} voices and a frame size of {frame_size} samples"
        );
        Ok(Self {
            settings,
            sample_rate,
            frame_size,
            min_period,
            unpitched_grain_rate,
            max_synthesis_grains,
            voices,
            grain_store,
            onset_detector: GrainOnsetDetector::new(frame_size),
            frame_grains: Vec::with_capacity(frame_size + 1),
            panner,
            adsr_parameters,
            quick_parameters,
            bend_tracker,
            note_on_counter: 0,
            sustain_pedal_down: false,
            sostenuto_pedal_down: false,
            soft_pedal_down: false,
            latch_enabled: false,
            last_pedal_pitch: None,
            last_descant_pitch: None,
            last_midi_channel: 0,
            generated_midi: MidiBuffer::default(),
            input_frequency: None,
            frame_pitched: false,
            analysis_period: unpitched_grain_rate,
            steal_order: Vec::with_capacity(num_voices),
        })
    }

    fn quick_parameters(fade_time: Duration) -> Result<AdsrParameters, Error> {
        AdsrParameters::new(fade_time, Duration::ZERO, 1.0, fade_time)
    }

    fn required_grain_slots(
        num_voices: usize,
        max_synthesis_grains: usize,
        frame_size: usize,
        min_period: usize,
        unpitched_grain_rate: usize,
    ) -> usize {
        // onsets of a frame are at least half a period apart
        let max_frame_grains = (2 * frame_size / min_period).max(frame_size / unpitched_grain_rate);
        // synthesis grains wait at most one frame and play at most two, so they only
        // reference grains of the three previous frames
        let max_referenced_grains = (num_voices * max_synthesis_grains).min(3 * max_frame_grains);
        max_referenced_grains + max_frame_grains + 2
    }

    // ---------------------------------------------------------------------------------------------

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Size of the frames passed to [`Self::render_voices`].
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn settings(&self) -> &HarmonizerSettings {
        &self.settings
    }

    pub fn num_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn num_active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Sorted list of all sounding notes, including released notes which are still ringing.
    pub fn active_notes(&self) -> Vec<u8> {
        let mut notes = self
            .voices
            .iter()
            .filter_map(|v| v.note())
            .collect::<Vec<_>>();
        notes.sort_unstable();
        notes
    }

    /// Sorted list of all sounding notes which have not been released yet.
    pub fn active_notes_not_released(&self) -> Vec<u8> {
        let mut notes = self
            .voices
            .iter()
            .filter(|v| !v.is_released())
            .filter_map(|v| v.note())
            .collect::<Vec<_>>();
        notes.sort_unstable();
        notes
    }

    /// Test if any voice is playing the given note.
    pub fn is_pitch_active(&self, note: u8, count_ringing_but_released: bool) -> bool {
        self.voices.iter().any(|v| {
            v.note() == Some(note) && (count_ringing_but_released || !v.is_released())
        })
    }

    /// Most recently detected input frequency in Hz, if any.
    pub fn current_input_frequency(&self) -> Option<f32> {
        self.input_frequency
    }

    pub fn is_latch_enabled(&self) -> bool {
        self.latch_enabled
    }

    pub fn is_sustain_pedal_down(&self) -> bool {
        self.sustain_pedal_down
    }
    pub fn is_sostenuto_pedal_down(&self) -> bool {
        self.sostenuto_pedal_down
    }
    pub fn is_soft_pedal_down(&self) -> bool {
        self.soft_pedal_down
    }

    /// Note on and off events of pedal pitch and descant voices, which got generated since
    /// the last call to [`Self::clear_generated_midi`].
    pub fn generated_midi(&self) -> &MidiBuffer {
        &self.generated_midi
    }

    pub fn clear_generated_midi(&mut self) {
        self.generated_midi.clear();
    }

    // ---------------------------------------------------------------------------------------------

    /// Render one frame.
    ///
    /// `window` holds the previous and the current input frame (2 * frame size samples),
    /// `output` receives the interleaved stereo output of the current frame. `input_frequency`
    /// is the detected pitch of the window, or `None` when it is unpitched. MIDI events are
    /// positioned relative to the frame start.
    pub fn render_voices(
        &mut self,
        window: &[f32],
        output: &mut [f32],
        input_frequency: Option<f32>,
        midi: &MidiBuffer,
    ) {
        debug_assert_eq!(window.len(), 2 * self.frame_size, "Invalid window size");
        debug_assert_eq!(output.len(), 2 * self.frame_size, "Invalid output size");
        output.fill(0.0);

        self.frame_pitched = input_frequency.is_some();
        if let Some(frequency) = input_frequency {
            self.input_frequency = Some(frequency);
        }
        self.analysis_period = match (self.frame_pitched, self.input_frequency) {
            (true, Some(frequency)) => ((self.sample_rate as f32 / frequency).round() as usize)
                .clamp(1, self.frame_size),
            _ => self.unpitched_grain_rate,
        };

        let needs_grains = !midi.is_empty() || self.voices.iter().any(|v| v.is_active());
        self.analyse_frame(window, needs_grains);

        let frame_size = self.frame_size;
        let mut start = 0;
        let mut first_event = true;
        for event in midi.iter() {
            let position = event.sample_position.min(frame_size);
            let samples_to_next = position.saturating_sub(start);
            let min_sub_block_size = if first_event && !self.settings.strict_sub_block_size {
                1
            } else {
                self.settings.min_sub_block_size
            };
            if samples_to_next >= min_sub_block_size {
                first_event = false;
                self.render_sub_block(output, start, position);
                start = position;
            }
            self.handle_midi_event(&event.message, start);
        }
        self.render_sub_block(output, start, frame_size);

        let adsr = if self.settings.adsr_enabled {
            &self.adsr_parameters
        } else {
            &self.quick_parameters
        };
        let context = VoiceRenderContext {
            frame_grains: &self.frame_grains,
            sample_rate: self.sample_rate,
            analysis_period: self.analysis_period as f32,
            pitched: self.frame_pitched,
            min_synthesis_period: self.min_period as f32,
            max_synthesis_period: self.frame_size as f32,
            adsr,
        };
        for voice in &mut self.voices {
            voice.end_frame(&context, frame_size);
        }
    }

    /// Capture grains at the pitch synchronous onsets of the current frame.
    fn analyse_frame(&mut self, window: &[f32], needs_grains: bool) {
        self.grain_store.begin_frame();
        self.frame_grains.clear();
        if !needs_grains {
            return;
        }
        let frame_size = self.frame_size;
        let period = self.analysis_period;
        let onsets = self
            .onset_detector
            .detect(&window[frame_size..], period, self.frame_pitched);
        for &onset in onsets {
            let center = frame_size + onset;
            let start = center.saturating_sub(period);
            let end = center + period - 1;
            // keep truncated grains only when there is nothing else to play
            if end >= window.len() && !self.frame_grains.is_empty() {
                break;
            }
            let end = end.min(window.len() - 1);
            match self.grain_store.store_new_grain(window, start, end) {
                Ok(id) => {
                    if self.frame_grains.len() < self.frame_grains.capacity() {
                        self.frame_grains.push(FrameGrain {
                            id,
                            start: start as isize - frame_size as isize,
                        });
                    }
                }
                Err(err) => {
                    log::debug!("Skipping remaining grains of the frame: {err}");
                    break;
                }
            }
        }
    }

    fn render_sub_block(&mut self, output: &mut [f32], start: usize, end: usize) {
        if start >= end {
            return;
        }
        let adsr = if self.settings.adsr_enabled {
            &self.adsr_parameters
        } else {
            &self.quick_parameters
        };
        let context = VoiceRenderContext {
            frame_grains: &self.frame_grains,
            sample_rate: self.sample_rate,
            analysis_period: self.analysis_period as f32,
            pitched: self.frame_pitched,
            min_synthesis_period: self.min_period as f32,
            max_synthesis_period: self.frame_size as f32,
            adsr,
        };
        for voice in &mut self.voices {
            if voice.render(&context, &mut self.grain_store, output, start, end) {
                if let Some(pan) = voice.take_owned_pan() {
                    self.panner.pan_val_turned_off(pan);
                }
            }
        }
    }

    // ---------------------------------------------------------------------------------------------

    /// Apply a MIDI message at the given position of the current frame.
    pub fn handle_midi_event(&mut self, message: &MidiMessage, position: usize) {
        match *message {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => {
                self.last_midi_channel = channel;
                self.keyboard_note_on(note, velocity as f32 / 127.0, position);
            }
            MidiMessage::NoteOff { note, .. } => {
                self.keyboard_note_off(note, true, position);
            }
            MidiMessage::PitchWheel { value, .. } => {
                self.handle_pitch_wheel(value);
            }
            MidiMessage::Controller {
                controller, value, ..
            } => match controller {
                controllers::SUSTAIN_PEDAL => self.handle_sustain_pedal(value >= 64, position),
                controllers::SOSTENUTO_PEDAL => {
                    self.handle_sostenuto_pedal(value >= 64, position)
                }
                controllers::SOFT_PEDAL => self.handle_soft_pedal(value >= 64),
                controllers::ALL_SOUND_OFF | controllers::ALL_NOTES_OFF => {
                    self.all_notes_off(true)
                }
                _ => (),
            },
            MidiMessage::Aftertouch { .. }
            | MidiMessage::ChannelPressure { .. }
            | MidiMessage::ProgramChange { .. } => {
                // passed through only
            }
        }
    }

    /// Start a new keyboard note with a normalized velocity. Returns the index of the voice
    /// playing the note, or `None` when the note got dropped.
    pub fn note_on(&mut self, note: u8, velocity: f32) -> Option<usize> {
        self.keyboard_note_on(note, velocity, 0)
    }

    /// Release a keyboard note. Notes held by a pedal or the latch keep on playing.
    pub fn note_off(&mut self, note: u8, allow_tail_off: bool) {
        self.keyboard_note_off(note, allow_tail_off, 0);
    }

    /// Stop all voices, ignoring pedals and latch.
    pub fn all_notes_off(&mut self, allow_tail_off: bool) {
        for index in 0..self.voices.len() {
            let voice = &mut self.voices[index];
            if !voice.is_active() || (allow_tail_off && voice.is_released()) {
                continue;
            }
            voice.set_key_down(false);
            voice.set_sostenuto_held(false);
            voice.set_latched(false);
            self.stop_voice(index, allow_tail_off);
        }
        self.last_pedal_pitch = None;
        self.last_descant_pitch = None;
    }

    fn keyboard_note_on(&mut self, note: u8, velocity: f32, position: usize) -> Option<usize> {
        let index = self.start_note(note, velocity, position, None);
        self.update_auto_voices(position);
        index
    }

    fn keyboard_note_off(&mut self, note: u8, allow_tail_off: bool, position: usize) {
        if self.latch_enabled {
            for voice in &mut self.voices {
                if voice.note() == Some(note)
                    && voice.auto_voice().is_none()
                    && !voice.is_released()
                {
                    voice.set_key_down(false);
                    voice.set_latched(true);
                }
            }
        } else {
            self.stop_note(note, allow_tail_off);
        }
        self.update_auto_voices(position);
    }

    /// Key up for all keyboard voices playing the note, stopping the ones no pedal holds.
    fn stop_note(&mut self, note: u8, allow_tail_off: bool) {
        for index in 0..self.voices.len() {
            let voice = &mut self.voices[index];
            if voice.note() != Some(note) || voice.auto_voice().is_some() || voice.is_released()
            {
                continue;
            }
            voice.set_key_down(false);
            if self.sustain_pedal_down || voice.is_sostenuto_held() {
                continue;
            }
            self.stop_voice(index, allow_tail_off);
        }
    }

    /// Start a note on a free or stolen voice.
    fn start_note(
        &mut self,
        note: u8,
        velocity: f32,
        position: usize,
        auto_voice: Option<AutoVoice>,
    ) -> Option<usize> {
        // retrigger
        for index in 0..self.voices.len() {
            if self.voices[index].note() == Some(note) {
                self.free_voice(index);
            }
        }

        let index = match self.find_free_voice() {
            Some(index) => index,
            None if self.settings.voice_stealing => match self.find_voice_to_steal(note) {
                Some(index) => {
                    self.free_voice(index);
                    index
                }
                None => {
                    log::debug!("Found no voice to steal for note {note}");
                    return None;
                }
            },
            None => {
                log::debug!("No free voice for note {note}, dropping it");
                return None;
            }
        };

        self.note_on_counter += 1;
        let (pan, owned) = if note < self.settings.lowest_panned_note {
            (PanningManager::CENTER, false)
        } else {
            (self.panner.get_next_pan_val(), true)
        };
        let velocity = velocity.clamp(0.0, 1.0);
        let velocity_gain =
            velocity_to_gain(velocity, self.settings.velocity_sensitivity / 100.0);
        let soft_pedal_gain = if self.soft_pedal_down {
            self.settings.soft_pedal_gain
        } else {
            1.0
        };
        let output_frequency = self.output_frequency(note);
        let adsr = if self.settings.adsr_enabled {
            &self.adsr_parameters
        } else {
            &self.quick_parameters
        };

        let voice = &mut self.voices[index];
        voice.set_pan(pan, owned);
        voice.start_note(
            note,
            self.note_on_counter,
            velocity,
            velocity_gain,
            soft_pedal_gain,
            output_frequency,
            auto_voice,
            position,
            adsr,
            &mut self.grain_store,
        );
        Some(index)
    }

    fn find_free_voice(&self) -> Option<usize> {
        self.voices.iter().position(|v| !v.is_active())
    }

    /// Pick a playing voice for a new note.
    ///
    /// The lowest and highest sounding, non released voices are protected. Candidates are,
    /// in this order: the oldest voice playing the same note, the oldest released voice, the
    /// oldest voice with its key up, the oldest voice, then the highest and the lowest voice.
    fn find_voice_to_steal(&mut self, note: u8) -> Option<usize> {
        let voices = &self.voices;
        let order = &mut self.steal_order;
        order.clear();
        order.extend((0..voices.len()).filter(|index| voices[*index].is_active()));
        order.sort_unstable_by_key(|index| voices[*index].note_on_time());

        let mut low: Option<(usize, u8)> = None;
        let mut top: Option<(usize, u8)> = None;
        for &index in order.iter() {
            let voice = &voices[index];
            let Some(voice_note) = voice.note() else {
                continue;
            };
            if voice.is_released() {
                continue;
            }
            if low.is_none_or(|(_, low_note)| voice_note < low_note) {
                low = Some((index, voice_note));
            }
            if top.is_none_or(|(_, top_note)| voice_note > top_note) {
                top = Some((index, voice_note));
            }
        }
        let low = low.map(|(index, _)| index);
        let mut top = top.map(|(index, _)| index);
        if top == low {
            top = None;
        }
        let is_protected = |index: usize| Some(index) == low || Some(index) == top;

        let order = &self.steal_order;
        let passes: &[bool] = if self.settings.protect_auto_voices {
            &[true, false]
        } else {
            &[false]
        };
        for &skip_auto_voices in passes {
            let allowed =
                |index: usize| !(skip_auto_voices && voices[index].auto_voice().is_some());
            let oldest = |predicate: &dyn Fn(usize) -> bool| {
                order
                    .iter()
                    .copied()
                    .find(|index| allowed(*index) && predicate(*index))
            };
            let found = oldest(&|index| voices[index].note() == Some(note))
                .or_else(|| oldest(&|index| !is_protected(index) && voices[index].is_released()))
                .or_else(|| oldest(&|index| !is_protected(index) && !voices[index].is_key_down()))
                .or_else(|| oldest(&|index| !is_protected(index)))
                .or_else(|| top.filter(|index| allowed(*index)))
                .or_else(|| low.filter(|index| allowed(*index)));
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Release a voice with its envelope's tail, or stop it immediately.
    fn stop_voice(&mut self, index: usize, allow_tail_off: bool) {
        if allow_tail_off {
            let adsr = if self.settings.adsr_enabled {
                &self.adsr_parameters
            } else {
                &self.quick_parameters
            };
            self.voices[index].release(adsr);
        } else {
            self.free_voice(index);
        }
    }

    /// Immediately stop a voice and return its pan value.
    fn free_voice(&mut self, index: usize) {
        let voice = &mut self.voices[index];
        voice.clear(&mut self.grain_store);
        if let Some(pan) = voice.take_owned_pan() {
            self.panner.pan_val_turned_off(pan);
        }
    }

    fn output_frequency(&self, note: u8) -> f32 {
        note_to_frequency(
            self.bend_tracker.adjusted_note(note),
            self.settings.concert_pitch,
        )
    }

    fn update_output_frequencies(&mut self) {
        for index in 0..self.voices.len() {
            if let Some(note) = self.voices[index].note() {
                let frequency = self.output_frequency(note);
                self.voices[index].set_output_frequency(frequency);
            }
        }
    }

    // ---------------------------------------------------------------------------------------------

    fn handle_pitch_wheel(&mut self, value: u16) {
        self.bend_tracker.set_wheel_value(value);
        self.update_output_frequencies();
    }

    fn handle_sustain_pedal(&mut self, down: bool, position: usize) {
        if self.sustain_pedal_down == down {
            return;
        }
        self.sustain_pedal_down = down;
        if down {
            return;
        }
        for index in 0..self.voices.len() {
            let voice = &self.voices[index];
            if voice.is_active()
                && !voice.is_released()
                && voice.auto_voice().is_none()
                && !voice.is_key_down()
                && !voice.is_sostenuto_held()
                && !voice.is_latched()
            {
                self.stop_voice(index, true);
            }
        }
        self.update_auto_voices(position);
    }

    fn handle_sostenuto_pedal(&mut self, down: bool, position: usize) {
        if self.sostenuto_pedal_down == down {
            return;
        }
        self.sostenuto_pedal_down = down;
        if down {
            // hold all currently pressed keys
            for voice in &mut self.voices {
                if voice.is_active()
                    && !voice.is_released()
                    && voice.auto_voice().is_none()
                    && voice.is_key_down()
                {
                    voice.set_sostenuto_held(true);
                }
            }
            return;
        }
        for index in 0..self.voices.len() {
            let voice = &mut self.voices[index];
            if !voice.is_sostenuto_held() {
                continue;
            }
            voice.set_sostenuto_held(false);
            if voice.is_active()
                && !voice.is_released()
                && !voice.is_key_down()
                && !voice.is_latched()
                && !self.sustain_pedal_down
            {
                self.stop_voice(index, true);
            }
        }
        self.update_auto_voices(position);
    }

    fn handle_soft_pedal(&mut self, down: bool) {
        self.soft_pedal_down = down;
    }

    /// Enable or disable the MIDI latch. While enabled, keyboard note offs are deferred until
    /// the latch gets disabled again.
    pub fn set_latch(&mut self, enabled: bool) {
        if self.latch_enabled == enabled {
            return;
        }
        self.latch_enabled = enabled;
        if enabled {
            return;
        }
        for index in 0..self.voices.len() {
            let voice = &mut self.voices[index];
            if !voice.is_latched() {
                continue;
            }
            voice.set_latched(false);
            if voice.is_active()
                && !voice.is_released()
                && !voice.is_key_down()
                && !voice.is_sostenuto_held()
                && !self.sustain_pedal_down
            {
                self.stop_voice(index, true);
            }
        }
        self.update_auto_voices(0);
    }

    // ---------------------------------------------------------------------------------------------

    fn update_auto_voices(&mut self, position: usize) {
        self.apply_auto_voice(AutoVoice::PedalPitch, position);
        self.apply_auto_voice(AutoVoice::Descant, position);
    }

    /// Move, start or stop the given auto voice so it follows the held keyboard notes.
    fn apply_auto_voice(&mut self, kind: AutoVoice, position: usize) {
        let (settings, last_note) = match kind {
            AutoVoice::PedalPitch => (self.settings.pedal_pitch, self.last_pedal_pitch),
            AutoVoice::Descant => (self.settings.descant, self.last_descant_pitch),
        };
        if !settings.enabled && last_note.is_none() {
            return;
        }
        let target = if settings.enabled {
            self.auto_voice_target(kind, &settings)
        } else {
            None
        };
        let playing_note = last_note.filter(|note| {
            self.voices.iter().any(|v| {
                v.note() == Some(*note) && v.auto_voice() == Some(kind) && !v.is_released()
            })
        });
        if target.is_some() && target.map(|(note, _)| note) == playing_note {
            return;
        }

        if let Some(note) = last_note {
            // a disabled auto voice stops immediately
            self.stop_auto_voice(kind, note, settings.enabled, position);
        }
        let mut started_note = None;
        if let Some((note, velocity)) = target {
            if !self.is_pitch_active(note, false)
                && self
                    .start_note(note, velocity, position, Some(kind))
                    .is_some()
            {
                self.add_generated_event(
                    position,
                    MidiMessage::NoteOn {
                        channel: self.last_midi_channel,
                        note,
                        velocity: (velocity * 127.0).round().clamp(1.0, 127.0) as u8,
                    },
                );
                started_note = Some(note);
            }
        }
        match kind {
            AutoVoice::PedalPitch => self.last_pedal_pitch = started_note,
            AutoVoice::Descant => self.last_descant_pitch = started_note,
        }
    }

    /// Note and velocity an auto voice should play, based on the lowest or highest sounding
    /// keyboard note.
    fn auto_voice_target(&self, kind: AutoVoice, settings: &AutoVoiceSettings) -> Option<(u8, f32)> {
        let mut keyboard_notes = self
            .voices
            .iter()
            .filter(|v| !v.is_released() && v.auto_voice().is_none())
            .filter_map(|v| v.note().map(|note| (note, v.velocity())));
        match kind {
            AutoVoice::PedalPitch => {
                let (lowest, velocity) = keyboard_notes.min_by_key(|(note, _)| *note)?;
                if lowest > settings.threshold {
                    return None;
                }
                lowest
                    .checked_sub(settings.interval)
                    .map(|note| (note, velocity))
            }
            AutoVoice::Descant => {
                let (highest, velocity) = keyboard_notes.max_by_key(|(note, _)| *note)?;
                if highest < settings.threshold {
                    return None;
                }
                Some(((highest + settings.interval).min(127), velocity))
            }
        }
    }

    fn stop_auto_voice(&mut self, kind: AutoVoice, note: u8, allow_tail_off: bool, position: usize) {
        let mut stopped = false;
        for index in 0..self.voices.len() {
            let voice = &self.voices[index];
            if voice.note() == Some(note)
                && voice.auto_voice() == Some(kind)
                && !(allow_tail_off && voice.is_released())
            {
                self.stop_voice(index, allow_tail_off);
                stopped = true;
            }
        }
        if stopped {
            self.add_generated_event(
                position,
                MidiMessage::NoteOff {
                    channel: self.last_midi_channel,
                    note,
                    velocity: 0,
                },
            );
        }
    }

    fn add_generated_event(&mut self, position: usize, message: MidiMessage) {
        if !self.generated_midi.add_event(position, message) {
            log::debug!("Generated MIDI buffer is full, dropping event");
        }
    }

    // ---------------------------------------------------------------------------------------------

    /// Change the number of voices. Removes inactive voices first, then stops playing ones.
    pub fn set_num_voices(&mut self, num_voices: usize) -> Result<(), Error> {
        if num_voices == 0 {
            return Err(Error::InvalidVoiceCount(num_voices));
        }
        if num_voices == self.voices.len() {
            return Ok(());
        }
        while self.voices.len() < num_voices {
            self.voices.push(HarmonizerVoice::new(
                self.sample_rate,
                self.max_synthesis_grains,
            ));
        }
        while self.voices.len() > num_voices {
            let index = self
                .voices
                .iter()
                .position(|v| !v.is_active())
                .unwrap_or(0);
            self.free_voice(index);
            self.voices.remove(index);
        }
        self.grain_store.reserve_slots(Self::required_grain_slots(
            num_voices,
            self.max_synthesis_grains,
            self.frame_size,
            self.min_period,
            self.unpitched_grain_rate,
        ));
        self.steal_order = Vec::with_capacity(num_voices);
        self.panner.set_number_of_voices(num_voices);
        self.reassign_pans();
        log::debug!("Harmonizer voice count changed to {num_voices}");
        Ok(())
    }

    /// Move the pans of all playing voices to the closest new pan slots.
    fn reassign_pans(&mut self) {
        for voice in &mut self.voices {
            if voice.is_active() && voice.take_owned_pan().is_some() {
                let pan = self.panner.closest_new_pan_val_from_old(voice.midi_pan());
                voice.set_pan(pan, true);
            }
        }
    }

    /// Apply a full new set of settings.
    pub fn set_settings(&mut self, settings: HarmonizerSettings) -> Result<(), Error> {
        settings.validate()?;
        self.set_adsr(
            settings.attack,
            settings.decay,
            settings.sustain,
            settings.release,
        )?;
        self.set_adsr_enabled(settings.adsr_enabled);
        self.set_quick_release(settings.quick_release)?;
        self.set_pitch_bend_range(settings.bend_range_up, settings.bend_range_down)?;
        self.set_velocity_sensitivity(settings.velocity_sensitivity)?;
        self.set_stereo_width(settings.stereo_width)?;
        self.set_lowest_panned_note(settings.lowest_panned_note)?;
        self.set_voice_stealing(settings.voice_stealing);
        self.set_protect_auto_voices(settings.protect_auto_voices);
        self.set_concert_pitch(settings.concert_pitch)?;
        self.set_soft_pedal_gain(settings.soft_pedal_gain)?;
        self.set_sub_block_size(settings.min_sub_block_size, settings.strict_sub_block_size)?;
        self.set_pedal_pitch(settings.pedal_pitch)?;
        self.set_descant(settings.descant)?;
        Ok(())
    }

    /// Set new ADSR envelope parameters. Playing voices follow the new parameters.
    pub fn set_adsr(
        &mut self,
        attack: Duration,
        decay: Duration,
        sustain: f32,
        release: Duration,
    ) -> Result<(), Error> {
        self.adsr_parameters.setup(attack, decay, sustain, release)?;
        self.settings.attack = attack;
        self.settings.decay = decay;
        self.settings.sustain = sustain;
        self.settings.release = release;
        Ok(())
    }

    /// Toggle between the ADSR envelope and plain quick fades.
    pub fn set_adsr_enabled(&mut self, enabled: bool) {
        self.settings.adsr_enabled = enabled;
    }

    /// Set the fade time which gets used when the ADSR is disabled.
    pub fn set_quick_release(&mut self, fade_time: Duration) -> Result<(), Error> {
        if fade_time.is_zero() {
            return Err(Error::ParameterError(
                "Quick release time must be greater than zero".to_string(),
            ));
        }
        self.quick_parameters.set_attack_time(fade_time)?;
        self.quick_parameters.set_release_time(fade_time)?;
        self.settings.quick_release = fade_time;
        Ok(())
    }

    pub fn set_pitch_bend_range(&mut self, range_up: u8, range_down: u8) -> Result<(), Error> {
        if range_up > PitchBendTracker::MAX_RANGE || range_down > PitchBendTracker::MAX_RANGE {
            return Err(Error::ParameterError(format!(
                "Invalid pitch bend range: +{range_up}/-{range_down}. Must be in range [0, 12]"
            )));
        }
        self.bend_tracker.set_range(range_up, range_down);
        self.settings.bend_range_up = range_up;
        self.settings.bend_range_down = range_down;
        self.update_output_frequencies();
        Ok(())
    }

    /// Set velocity sensitivity in percent. Applies to playing voices too.
    pub fn set_velocity_sensitivity(&mut self, sensitivity: f32) -> Result<(), Error> {
        if !(0.0..=100.0).contains(&sensitivity) {
            return Err(Error::ParameterError(format!(
                "Invalid velocity sensitivity: {sensitivity}. Must be in range [0, 100]"
            )));
        }
        self.settings.velocity_sensitivity = sensitivity;
        for voice in &mut self.voices {
            if voice.is_active() {
                voice.set_velocity_gain(velocity_to_gain(voice.velocity(), sensitivity / 100.0));
            }
        }
        Ok(())
    }

    /// Set stereo width in percent and spread the playing voices over it.
    pub fn set_stereo_width(&mut self, width: f32) -> Result<(), Error> {
        if !(0.0..=100.0).contains(&width) {
            return Err(Error::ParameterError(format!(
                "Invalid stereo width: {width}. Must be in range [0, 100]"
            )));
        }
        if self.settings.stereo_width == width {
            return Ok(());
        }
        self.settings.stereo_width = width;
        self.panner.update_stereo_width(width);
        self.reassign_pans();
        Ok(())
    }

    /// Set the lowest note which gets panned. Lower notes are always centered.
    pub fn set_lowest_panned_note(&mut self, note: u8) -> Result<(), Error> {
        if note > 127 {
            return Err(Error::ParameterError(format!(
                "Invalid lowest panned note: {note}. Must be in range [0, 127]"
            )));
        }
        let previous = self.settings.lowest_panned_note;
        if previous == note {
            return Ok(());
        }
        for voice in &mut self.voices {
            let Some(voice_note) = voice.note() else {
                continue;
            };
            if voice_note < note {
                if let Some(pan) = voice.take_owned_pan() {
                    self.panner.pan_val_turned_off(pan);
                }
                voice.set_pan(PanningManager::CENTER, false);
            } else if voice_note < previous && voice.owned_pan().is_none() {
                // notes which now qualify for panning
                voice.set_pan(self.panner.get_next_pan_val(), true);
            }
        }
        self.settings.lowest_panned_note = note;
        Ok(())
    }

    pub fn set_pedal_pitch(&mut self, settings: AutoVoiceSettings) -> Result<(), Error> {
        settings.validate()?;
        self.settings.pedal_pitch = settings;
        self.apply_auto_voice(AutoVoice::PedalPitch, 0);
        Ok(())
    }

    pub fn set_descant(&mut self, settings: AutoVoiceSettings) -> Result<(), Error> {
        settings.validate()?;
        self.settings.descant = settings;
        self.apply_auto_voice(AutoVoice::Descant, 0);
        Ok(())
    }

    pub fn set_voice_stealing(&mut self, enabled: bool) {
        self.settings.voice_stealing = enabled;
    }

    pub fn set_protect_auto_voices(&mut self, protect: bool) {
        self.settings.protect_auto_voices = protect;
    }

    /// Set the frequency of A4 in Hz and retune all playing voices.
    pub fn set_concert_pitch(&mut self, concert_pitch: f32) -> Result<(), Error> {
        if !(concert_pitch.is_finite() && concert_pitch > 0.0) {
            return Err(Error::ParameterError(format!(
                "Invalid concert pitch: {concert_pitch} Hz"
            )));
        }
        self.settings.concert_pitch = concert_pitch;
        self.update_output_frequencies();
        Ok(())
    }

    pub fn set_soft_pedal_gain(&mut self, gain: f32) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(Error::ParameterError(format!(
                "Invalid soft pedal gain: {gain}. Must be in range [0, 1]"
            )));
        }
        self.settings.soft_pedal_gain = gain;
        Ok(())
    }

    /// Set the smallest block size MIDI events may split a frame into.
    pub fn set_sub_block_size(&mut self, min_size: usize, strict: bool) -> Result<(), Error> {
        if min_size == 0 {
            return Err(Error::InvalidBlockSize(min_size));
        }
        self.settings.min_sub_block_size = min_size;
        self.settings.strict_sub_block_size = strict;
        Ok(())
    }

    /// Hard stop all voices and drop all grains, pedal and pitch wheel state.
    pub fn reset(&mut self) {
        for index in 0..self.voices.len() {
            self.free_voice(index);
        }
        self.panner.reset();
        self.grain_store.clear();
        self.frame_grains.clear();
        self.bend_tracker.set_wheel_value(PitchBendTracker::CENTER);
        self.sustain_pedal_down = false;
        self.sostenuto_pedal_down = false;
        self.soft_pedal_down = false;
        self.last_pedal_pitch = None;
        self.last_descant_pitch = None;
        self.generated_midi.clear();
        self.input_frequency = None;
        self.frame_pitched = false;
        self.analysis_period = self.unpitched_grain_rate;
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 51200;
    const FRAME_SIZE: usize = 512;

    fn new_harmonizer(settings: HarmonizerSettings) -> Result<Harmonizer, Error> {
        Harmonizer::new(SAMPLE_RATE, FRAME_SIZE, 12, 21, 64, settings)
    }

    fn sine_window() -> Vec<f32> {
        (0..2 * FRAME_SIZE)
            .map(|i| {
                (std::f32::consts::TAU * 400.0 * i as f32 / SAMPLE_RATE as f32).sin() * 0.5
            })
            .collect()
    }

    fn render(harmonizer: &mut Harmonizer, window: &[f32], midi: &MidiBuffer) -> Vec<f32> {
        let mut output = vec![0.0; 2 * FRAME_SIZE];
        harmonizer.render_voices(window, &mut output, Some(400.0), midi);
        output
    }

    fn note_on(note: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: 0,
            note,
            velocity: 100,
        }
    }

    fn note_off(note: u8) -> MidiMessage {
        MidiMessage::NoteOff {
            channel: 0,
            note,
            velocity: 0,
        }
    }

    fn controller(controller: u8, value: u8) -> MidiMessage {
        MidiMessage::Controller {
            channel: 0,
            controller,
            value,
        }
    }

    #[test]
    fn invalid_configurations() {
        let settings = HarmonizerSettings::default();
        assert!(Harmonizer::new(0, 512, 12, 21, 64, settings.clone()).is_err());
        assert!(Harmonizer::new(44100, 0, 12, 21, 64, settings.clone()).is_err());
        assert!(Harmonizer::new(44100, 512, 0, 21, 64, settings.clone()).is_err());
        assert!(Harmonizer::new(44100, 512, 12, 21, 0, settings).is_err());
    }

    #[test]
    fn note_release_tail() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        let window = sine_window();

        let mut midi = MidiBuffer::default();
        midi.add_event(0, note_on(60));
        let output = render(&mut harmonizer, &window, &midi);
        assert_eq!(harmonizer.active_notes(), vec![60]);
        assert_eq!(harmonizer.active_notes_not_released(), vec![60]);
        assert!(output.iter().any(|s| s.abs() > 0.0));

        // note off at sample 1000
        midi.clear();
        midi.add_event(1000 - FRAME_SIZE, note_off(60));
        render(&mut harmonizer, &window, &midi);
        assert_eq!(harmonizer.active_notes(), vec![60]);
        assert!(harmonizer.active_notes_not_released().is_empty());
        assert!(harmonizer.is_pitch_active(60, true));
        assert!(!harmonizer.is_pitch_active(60, false));

        midi.clear();
        render(&mut harmonizer, &window, &midi);
        render(&mut harmonizer, &window, &midi);
        assert_eq!(harmonizer.num_active_voices(), 0);
        assert!(harmonizer.active_notes().is_empty());

        // all grains got released
        render(&mut harmonizer, &window, &midi);
        assert_eq!(
            harmonizer.grain_store.num_free_slots(),
            harmonizer.grain_store.num_slots()
        );
        Ok(())
    }

    #[test]
    fn stealing_reassigns_exactly_one_voice() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        for note in 48..60 {
            assert!(harmonizer.note_on(note, 1.0).is_some());
        }
        assert_eq!(harmonizer.num_active_voices(), 12);
        assert!(harmonizer.note_on(60, 1.0).is_some());
        assert_eq!(harmonizer.num_active_voices(), 12);

        // lowest and highest notes are protected: the oldest remaining note gets stolen
        let mut expected = vec![48];
        expected.extend(50..=60);
        assert_eq!(harmonizer.active_notes_not_released(), expected);
        Ok(())
    }

    #[test]
    fn stealing_prefers_released_voices() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        for note in 48..60 {
            harmonizer.note_on(note, 1.0);
        }
        harmonizer.note_off(55, true);
        assert!(harmonizer.is_pitch_active(55, true));
        harmonizer.note_on(70, 1.0);
        assert!(!harmonizer.is_pitch_active(55, true));
        assert!(harmonizer.is_pitch_active(49, false));

        // with the sustain pedal down, keys which are up go first
        harmonizer.handle_midi_event(&controller(controllers::SUSTAIN_PEDAL, 127), 0);
        harmonizer.note_off(53, true);
        harmonizer.note_on(71, 1.0);
        assert!(!harmonizer.is_pitch_active(53, true));
        assert!(harmonizer.is_pitch_active(49, false));
        Ok(())
    }

    #[test]
    fn stealing_is_deterministic() -> Result<(), Error> {
        let play = || -> Result<Vec<u8>, Error> {
            let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
            for note in [60, 64, 67, 48, 72, 55, 62, 65, 69, 50, 71, 53, 57, 59, 74, 43] {
                harmonizer.note_on(note, 0.8);
                if note % 3 == 0 {
                    harmonizer.note_off(note, true);
                }
            }
            Ok(harmonizer.active_notes())
        };
        assert_eq!(play()?, play()?);
        Ok(())
    }

    #[test]
    fn no_stealing_drops_notes() -> Result<(), Error> {
        let settings = HarmonizerSettings {
            voice_stealing: false,
            ..Default::default()
        };
        let mut harmonizer = new_harmonizer(settings)?;
        for note in 48..60 {
            harmonizer.note_on(note, 1.0);
        }
        assert_eq!(harmonizer.note_on(60, 1.0), None);
        assert!(!harmonizer.is_pitch_active(60, true));
        Ok(())
    }

    #[test]
    fn retrigger_uses_a_single_voice() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        harmonizer.note_on(60, 1.0);
        harmonizer.note_on(60, 0.5);
        assert_eq!(harmonizer.active_notes(), vec![60]);
        Ok(())
    }

    #[test]
    fn sustain_and_sostenuto_pedals() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;

        harmonizer.handle_midi_event(&controller(controllers::SUSTAIN_PEDAL, 127), 0);
        harmonizer.note_on(60, 1.0);
        harmonizer.note_off(60, true);
        assert_eq!(harmonizer.active_notes_not_released(), vec![60]);
        harmonizer.handle_midi_event(&controller(controllers::SUSTAIN_PEDAL, 0), 0);
        assert!(harmonizer.active_notes_not_released().is_empty());

        harmonizer.note_on(62, 1.0);
        harmonizer.handle_midi_event(&controller(controllers::SOSTENUTO_PEDAL, 127), 0);
        harmonizer.note_off(62, true);
        harmonizer.note_on(64, 1.0);
        harmonizer.note_off(64, true);
        // only keys pressed before the pedal went down are held
        assert_eq!(harmonizer.active_notes_not_released(), vec![62]);
        harmonizer.handle_midi_event(&controller(controllers::SOSTENUTO_PEDAL, 0), 0);
        assert!(harmonizer.active_notes_not_released().is_empty());
        Ok(())
    }

    #[test]
    fn soft_pedal_and_all_notes_off() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        harmonizer.handle_midi_event(&controller(controllers::SOFT_PEDAL, 100), 0);
        assert!(harmonizer.is_soft_pedal_down());
        harmonizer.note_on(60, 1.0);
        harmonizer.note_on(64, 1.0);

        harmonizer.handle_midi_event(&controller(controllers::ALL_NOTES_OFF, 0), 0);
        assert!(harmonizer.active_notes_not_released().is_empty());
        assert_eq!(harmonizer.active_notes(), vec![60, 64]);

        harmonizer.all_notes_off(false);
        assert_eq!(harmonizer.num_active_voices(), 0);
        Ok(())
    }

    #[test]
    fn latch_defers_note_offs() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        harmonizer.set_latch(true);
        harmonizer.note_on(60, 1.0);
        harmonizer.note_on(64, 1.0);
        harmonizer.note_off(60, true);
        harmonizer.note_off(64, true);
        assert_eq!(harmonizer.active_notes_not_released(), vec![60, 64]);

        harmonizer.set_latch(false);
        assert!(harmonizer.active_notes_not_released().is_empty());
        Ok(())
    }

    #[test]
    fn pedal_pitch_follows_lowest_note() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        harmonizer.set_pedal_pitch(AutoVoiceSettings {
            enabled: true,
            threshold: 60,
            interval: 12,
        })?;

        harmonizer.note_on(55, 1.0);
        assert_eq!(harmonizer.active_notes_not_released(), vec![43, 55]);
        assert_eq!(
            harmonizer.generated_midi().events()[0].message,
            MidiMessage::NoteOn {
                channel: 0,
                note: 43,
                velocity: 127
            }
        );
        harmonizer.clear_generated_midi();

        harmonizer.note_on(50, 1.0);
        assert_eq!(harmonizer.active_notes_not_released(), vec![38, 50, 55]);
        assert_eq!(harmonizer.generated_midi().len(), 2);
        harmonizer.clear_generated_midi();

        // above the threshold no pedal pitch is played
        harmonizer.note_off(50, true);
        harmonizer.note_off(55, true);
        harmonizer.note_on(62, 1.0);
        assert_eq!(harmonizer.active_notes_not_released(), vec![62]);

        // disabling hard stops the pedal voice
        harmonizer.note_on(48, 1.0);
        assert!(harmonizer.is_pitch_active(36, false));
        harmonizer.set_pedal_pitch(AutoVoiceSettings::pedal_pitch())?;
        assert!(!harmonizer.is_pitch_active(36, true));
        Ok(())
    }

    #[test]
    fn descant_follows_highest_note() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        harmonizer.set_descant(AutoVoiceSettings {
            enabled: true,
            threshold: 60,
            interval: 7,
        })?;
        harmonizer.note_on(64, 1.0);
        harmonizer.note_on(67, 1.0);
        assert_eq!(harmonizer.active_notes_not_released(), vec![64, 67, 74]);
        harmonizer.note_off(67, true);
        assert_eq!(harmonizer.active_notes_not_released(), vec![64, 71]);
        Ok(())
    }

    #[test]
    fn voice_count_changes() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        for note in 60..64 {
            harmonizer.note_on(note, 1.0);
        }
        harmonizer.set_num_voices(16)?;
        assert_eq!(harmonizer.num_voices(), 16);
        assert_eq!(harmonizer.num_active_voices(), 4);

        harmonizer.set_num_voices(2)?;
        assert_eq!(harmonizer.num_voices(), 2);
        assert_eq!(harmonizer.num_active_voices(), 2);
        assert!(harmonizer.set_num_voices(0).is_err());

        let window = sine_window();
        render(&mut harmonizer, &window, &MidiBuffer::default());
        Ok(())
    }

    #[test]
    fn large_upward_shifts_keep_all_marks() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        // 200 Hz input: grains of 512 samples
        let window = (0..2 * FRAME_SIZE)
            .map(|i| {
                (std::f32::consts::TAU * 200.0 * i as f32 / SAMPLE_RATE as f32).sin() * 0.5
            })
            .collect::<Vec<_>>();
        let mut midi = MidiBuffer::default();
        midi.add_event(0, note_on(96));
        let mut output = vec![0.0; 2 * FRAME_SIZE];
        harmonizer.render_voices(&window, &mut output, Some(200.0), &midi);
        midi.clear();

        // marks about 24.5 samples apart overlap 20 or 21 grains
        for _ in 0..6 {
            harmonizer.render_voices(&window, &mut output, Some(200.0), &midi);
            let voice = harmonizer
                .voices
                .iter()
                .find(|v| v.is_active())
                .ok_or(Error::NotPrepared)?;
            assert!(voice.num_active_grains() >= 20);
            assert!(harmonizer.grain_store.num_free_slots() > 0);
        }
        Ok(())
    }

    #[test]
    fn pitch_wheel_retunes_voices() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        let index = harmonizer.note_on(69, 1.0).ok_or(Error::NotPrepared)?;
        assert!((harmonizer.voices[index].output_frequency() - 440.0).abs() < 1e-3);

        harmonizer.handle_midi_event(
            &MidiMessage::PitchWheel {
                channel: 0,
                value: 16383,
            },
            0,
        );
        // two semitones up
        assert!((harmonizer.voices[index].output_frequency() - 493.883).abs() < 0.01);

        harmonizer.set_concert_pitch(442.0)?;
        assert!((harmonizer.voices[index].output_frequency() - 496.128).abs() < 0.01);
        Ok(())
    }

    #[test]
    fn reset_frees_everything() -> Result<(), Error> {
        let mut harmonizer = new_harmonizer(HarmonizerSettings::default())?;
        let window = sine_window();
        let mut midi = MidiBuffer::default();
        midi.add_event(0, note_on(60));
        midi.add_event(100, note_on(64));
        render(&mut harmonizer, &window, &midi);
        assert_eq!(harmonizer.current_input_frequency(), Some(400.0));

        harmonizer.reset();
        assert_eq!(harmonizer.num_active_voices(), 0);
        assert_eq!(harmonizer.current_input_frequency(), None);
        assert_eq!(
            harmonizer.grain_store.num_free_slots(),
            harmonizer.grain_store.num_slots()
        );
        Ok(())
    }
}
