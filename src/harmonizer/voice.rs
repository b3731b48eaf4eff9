use crate::{
    grains::{GrainId, GrainStore, SynthesisGrain},
    utils::{
        adsr::{AdsrEnvelope, AdsrParameters},
        pitch::midi_pan_factors,
        smoothed::SmoothedValue,
    },
};

/// An analysis grain captured in the current frame. `start` is the grain's first sample
/// relative to the start of the current frame, so grains which reach into the previous frame
/// have negative starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FrameGrain {
    pub id: GrainId,
    pub start: isize,
}

/// Per frame state which is shared by all voices while rendering.
pub(crate) struct VoiceRenderContext<'a> {
    pub frame_grains: &'a [FrameGrain],
    pub sample_rate: u32,
    /// Period of the analysed input in samples.
    pub analysis_period: f32,
    pub pitched: bool,
    /// Range of pitched synthesis periods in samples.
    pub min_synthesis_period: f32,
    pub max_synthesis_period: f32,
    pub adsr: &'a AdsrParameters,
}

impl VoiceRenderContext<'_> {
    /// Distance of synthesis marks in samples for the given output frequency.
    fn synthesis_period(&self, output_frequency: f32) -> f32 {
        if self.pitched && output_frequency > 0.0 {
            (self.sample_rate as f32 / output_frequency)
                .clamp(self.min_synthesis_period, self.max_synthesis_period)
                .max(1.0)
        } else {
            self.analysis_period.max(1.0)
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Kind of automatically generated voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AutoVoice {
    PedalPitch,
    Descant,
}

// -------------------------------------------------------------------------------------------------

/// Places synthesis grains at pitch marks which are one synthesis period apart, overlapping
/// and adding them into a single output stream.
///
/// Marks are positions within the current frame. A grain starts when its mark is due. When
/// the most recently started grain passed its center before the next mark is due, the next
/// grain starts right away, delayed by its distance to the mark.
#[derive(Debug, Clone)]
pub(crate) struct SynthesisGrainScheduler {
    grains: Vec<SynthesisGrain>,
    next_mark: f64,
    latest: Option<usize>,
}

impl SynthesisGrainScheduler {
    /// Number of grains a scheduler needs to play grains of up to `max_grain_size` samples
    /// at marks which are at least `min_period` samples apart without dropping marks.
    pub fn required_grains(max_grain_size: usize, min_period: usize) -> usize {
        // one pending grain on top of the overlapping ones
        max_grain_size.div_ceil(min_period.max(1)) + 2
    }

    pub fn new(max_grains: usize) -> Self {
        Self {
            grains: vec![SynthesisGrain::new(); max_grains.max(1)],
            next_mark: 0.0,
            latest: None,
        }
    }

    #[cfg(test)]
    pub fn next_mark(&self) -> f64 {
        self.next_mark
    }

    #[cfg(test)]
    pub fn num_active_grains(&self) -> usize {
        self.grains.iter().filter(|g| g.is_active()).count()
    }

    /// Restart scheduling with a first mark at the given frame position.
    pub fn start(&mut self, position: usize, store: &mut GrainStore) {
        self.stop(store);
        self.next_mark = position as f64;
    }

    /// Stop all grains, releasing their analysis grains.
    pub fn stop(&mut self, store: &mut GrainStore) {
        for grain in &mut self.grains {
            grain.stop(store);
        }
        self.latest = None;
    }

    /// Start grains for all marks which are due at `position`. Call once per sample, before
    /// fetching the sample. Due marks without a free grain get dropped.
    pub fn arm(
        &mut self,
        position: usize,
        synthesis_period: f32,
        frame_grains: &[FrameGrain],
        store: &mut GrainStore,
    ) {
        let synthesis_period = synthesis_period.max(1.0) as f64;
        while self.next_mark < (position + 1) as f64 {
            self.start_grain(position, frame_grains, store);
            self.next_mark += synthesis_period;
        }
        let latest_passed_center = self.latest.is_some_and(|slot| {
            let grain = &self.grains[slot];
            !grain.is_active() || grain.is_past_halfway()
        });
        if latest_passed_center && self.start_grain(position, frame_grains, store) {
            self.next_mark += synthesis_period;
        }
    }

    /// Start the frame grain closest to the next mark on a free grain.
    fn start_grain(
        &mut self,
        position: usize,
        frame_grains: &[FrameGrain],
        store: &mut GrainStore,
    ) -> bool {
        let Some(slot) = self.grains.iter().position(|g| !g.is_active()) else {
            return false;
        };
        let mark = self.next_mark.floor() as isize;
        let Some(frame_grain) = frame_grains
            .iter()
            .min_by_key(|g| (g.start - mark).unsigned_abs())
        else {
            return false;
        };
        let zeroes = (mark - position as isize).max(0) as usize;
        self.grains[slot].start_new_grain(frame_grain.id, zeroes, store);
        self.latest = Some(slot);
        true
    }

    /// Sum of all grain outputs for the current sample.
    #[inline]
    pub fn next_sample(&mut self, store: &mut GrainStore) -> f32 {
        let mut sample = 0.0;
        for grain in &mut self.grains {
            if grain.is_active() {
                sample += grain.get_next_sample(store);
            }
        }
        sample
    }

    /// Move the marks into the next frame's coordinates. Marks which could not be armed in
    /// the finished frame are skipped.
    pub fn end_frame(&mut self, frame_size: usize, synthesis_period: f32) {
        let frame_size = frame_size as f64;
        while self.next_mark < frame_size {
            self.next_mark += synthesis_period.max(1.0) as f64;
        }
        self.next_mark -= frame_size;
    }
}

// -------------------------------------------------------------------------------------------------

/// A single harmony voice: resynthesizes the analysed input at the pitch of one MIDI note.
#[derive(Debug, Clone)]
pub(crate) struct HarmonizerVoice {
    note: Option<u8>,
    note_on_time: u64,
    key_down: bool,
    released: bool,
    sostenuto_held: bool,
    latched: bool,
    auto_voice: Option<AutoVoice>,
    velocity: f32,
    velocity_gain: f32,
    soft_pedal_gain: f32,
    output_frequency: f32,
    midi_pan: u8,
    owns_pan: bool,
    pan_left: SmoothedValue,
    pan_right: SmoothedValue,
    envelope: AdsrEnvelope,
    scheduler: SynthesisGrainScheduler,
}

impl HarmonizerVoice {
    /// Create a new voice which plays up to `max_grains` overlapping synthesis grains.
    pub fn new(sample_rate: u32, max_grains: usize) -> Self {
        let (left, right) = midi_pan_factors(64);
        Self {
            note: None,
            note_on_time: 0,
            key_down: false,
            released: false,
            sostenuto_held: false,
            latched: false,
            auto_voice: None,
            velocity: 0.0,
            velocity_gain: 1.0,
            soft_pedal_gain: 1.0,
            output_frequency: 0.0,
            midi_pan: 64,
            owns_pan: false,
            pan_left: SmoothedValue::new(left, sample_rate),
            pan_right: SmoothedValue::new(right, sample_rate),
            envelope: AdsrEnvelope::new(),
            scheduler: SynthesisGrainScheduler::new(max_grains),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.note.is_some()
    }

    pub fn note(&self) -> Option<u8> {
        self.note
    }

    pub fn note_on_time(&self) -> u64 {
        self.note_on_time
    }

    pub fn is_key_down(&self) -> bool {
        self.key_down
    }
    pub fn set_key_down(&mut self, down: bool) {
        self.key_down = down;
    }

    /// True when the note got stopped and the voice is playing its release tail.
    pub fn is_released(&self) -> bool {
        self.is_active() && self.released
    }

    pub fn is_sostenuto_held(&self) -> bool {
        self.sostenuto_held
    }
    pub fn set_sostenuto_held(&mut self, held: bool) {
        self.sostenuto_held = held;
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }
    pub fn set_latched(&mut self, latched: bool) {
        self.latched = latched;
    }

    pub fn auto_voice(&self) -> Option<AutoVoice> {
        self.auto_voice
    }

    /// Normalized velocity (0 - 1) of the current note.
    pub fn velocity(&self) -> f32 {
        self.velocity
    }
    pub fn set_velocity_gain(&mut self, gain: f32) {
        self.velocity_gain = gain;
    }

    #[cfg(test)]
    pub fn output_frequency(&self) -> f32 {
        self.output_frequency
    }
    pub fn set_output_frequency(&mut self, frequency: f32) {
        self.output_frequency = frequency;
    }

    pub fn midi_pan(&self) -> u8 {
        self.midi_pan
    }

    /// The pan value, when it got taken from the panning manager.
    pub fn owned_pan(&self) -> Option<u8> {
        if self.owns_pan {
            Some(self.midi_pan)
        } else {
            None
        }
    }

    /// Hand back ownership of the pan value, if any, so it can be returned to the panner.
    pub fn take_owned_pan(&mut self) -> Option<u8> {
        let pan = self.owned_pan();
        self.owns_pan = false;
        pan
    }

    /// Set a new MIDI pan value. Playing voices ramp towards it.
    pub fn set_pan(&mut self, midi_pan: u8, owned: bool) {
        self.midi_pan = midi_pan;
        self.owns_pan = owned;
        let (left, right) = midi_pan_factors(midi_pan);
        self.pan_left.set_target(left);
        self.pan_right.set_target(right);
    }

    #[cfg(test)]
    pub fn num_active_grains(&self) -> usize {
        self.scheduler.num_active_grains()
    }

    /// Start playing a new note, with its first synthesis mark at the given frame position.
    #[allow(clippy::too_many_arguments)]
    pub fn start_note(
        &mut self,
        note: u8,
        note_on_time: u64,
        velocity: f32,
        velocity_gain: f32,
        soft_pedal_gain: f32,
        output_frequency: f32,
        auto_voice: Option<AutoVoice>,
        position: usize,
        adsr: &AdsrParameters,
        store: &mut GrainStore,
    ) {
        self.note = Some(note);
        self.note_on_time = note_on_time;
        self.key_down = true;
        self.released = false;
        self.sostenuto_held = false;
        self.latched = false;
        self.auto_voice = auto_voice;
        self.velocity = velocity;
        self.velocity_gain = velocity_gain;
        self.soft_pedal_gain = soft_pedal_gain;
        self.output_frequency = output_frequency;
        // new notes start at their pan position without ramping
        self.pan_left.init(self.pan_left.target());
        self.pan_right.init(self.pan_right.target());
        self.envelope.note_on(adsr, 1.0);
        self.scheduler.start(position, store);
    }

    /// Move into the release stage of the envelope.
    pub fn release(&mut self, adsr: &AdsrParameters) {
        if self.is_active() && !self.released {
            self.released = true;
            self.key_down = false;
            self.envelope.note_off(adsr);
        }
    }

    /// Immediately stop the voice and free it.
    pub fn clear(&mut self, store: &mut GrainStore) {
        self.scheduler.stop(store);
        self.envelope.reset();
        self.note = None;
        self.key_down = false;
        self.released = false;
        self.sostenuto_held = false;
        self.latched = false;
        self.auto_voice = None;
    }

    /// Render samples `[start, end)` of the current frame, adding them to the interleaved
    /// stereo `output`. Returns true when the voice finished its release and got freed.
    pub fn render(
        &mut self,
        context: &VoiceRenderContext,
        store: &mut GrainStore,
        output: &mut [f32],
        start: usize,
        end: usize,
    ) -> bool {
        if !self.is_active() {
            return false;
        }
        let synthesis_period = context.synthesis_period(self.output_frequency);
        // more overlapping grains when shifting up
        let compensation = (synthesis_period / context.analysis_period.max(1.0)).min(1.0);
        let gain = compensation * self.velocity_gain * self.soft_pedal_gain;

        for (position, frame) in output
            .chunks_exact_mut(2)
            .enumerate()
            .take(end)
            .skip(start)
        {
            self.scheduler
                .arm(position, synthesis_period, context.frame_grains, store);
            let envelope = self.envelope.run(context.adsr);
            let sample = self.scheduler.next_sample(store) * gain * envelope;
            frame[0] += sample * self.pan_left.next();
            frame[1] += sample * self.pan_right.next();
            if !self.envelope.is_active() {
                self.clear(store);
                return true;
            }
        }
        false
    }

    /// Move synthesis marks into the next frame.
    pub fn end_frame(&mut self, context: &VoiceRenderContext, frame_size: usize) {
        if self.is_active() {
            let synthesis_period = context.synthesis_period(self.output_frequency);
            self.scheduler.end_frame(frame_size, synthesis_period);
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn capture_grains(
        input: &[f32],
        starts: &[usize],
        size: usize,
        store: &mut GrainStore,
    ) -> Result<Vec<FrameGrain>, Error> {
        starts
            .iter()
            .map(|start| {
                let id = store.store_new_grain(input, *start, start + size - 1)?;
                Ok(FrameGrain {
                    id,
                    start: *start as isize,
                })
            })
            .collect()
    }

    /// Run the scheduler like a voice does over `[start, end)`, returning the number of active
    /// grains after arming each sample.
    fn run_scheduler(
        scheduler: &mut SynthesisGrainScheduler,
        start: usize,
        end: usize,
        synthesis_period: f32,
        frame_grains: &[FrameGrain],
        store: &mut GrainStore,
    ) -> Vec<usize> {
        (start..end)
            .map(|position| {
                scheduler.arm(position, synthesis_period, frame_grains, store);
                let active = scheduler.num_active_grains();
                scheduler.next_sample(store);
                active
            })
            .collect()
    }

    #[test]
    fn scheduler_arms_due_marks_on_time() -> Result<(), Error> {
        let input = vec![1.0; 256];
        let mut store = GrainStore::new(8, 64);
        let frame_grains = capture_grains(&input, &[0], 64, &mut store)?;

        // marks 10 samples apart, grains of 64 samples: up to 7 grains overlap
        let max_grains = SynthesisGrainScheduler::required_grains(64, 10);
        assert_eq!(max_grains, 9);
        let mut scheduler = SynthesisGrainScheduler::new(max_grains);
        scheduler.start(0, &mut store);
        let active = run_scheduler(&mut scheduler, 0, 200, 10.0, &frame_grains, &mut store);
        for (position, count) in active.iter().enumerate() {
            let expected = (0..=position)
                .step_by(10)
                .filter(|mark| position - mark < 64)
                .count();
            assert_eq!(*count, expected, "at position {position}");
        }
        assert_eq!(scheduler.next_mark(), 200.0);

        scheduler.end_frame(200, 10.0);
        assert_eq!(scheduler.next_mark(), 0.0);
        scheduler.stop(&mut store);
        assert_eq!(scheduler.num_active_grains(), 0);
        assert_eq!(store.grain(frame_grains[0].id).ref_count(), 0);
        Ok(())
    }

    #[test]
    fn scheduler_starts_next_grain_after_halfway() -> Result<(), Error> {
        let input = vec![1.0; 256];
        let mut store = GrainStore::new(8, 64);
        let frame_grains = capture_grains(&input, &[0, 64], 64, &mut store)?;

        // marks 100 samples apart: grains start ahead of their mark, delayed by zeroes
        let mut scheduler = SynthesisGrainScheduler::new(4);
        scheduler.start(0, &mut store);
        run_scheduler(&mut scheduler, 0, 32, 100.0, &frame_grains, &mut store);
        assert_eq!(scheduler.num_active_grains(), 1);
        assert_eq!(scheduler.next_mark(), 100.0);

        scheduler.arm(32, 100.0, &frame_grains, &mut store);
        assert_eq!(scheduler.num_active_grains(), 2);
        assert_eq!(scheduler.next_mark(), 200.0);
        let pending = scheduler
            .grains
            .iter()
            .find(|g| g.zeroes_left() > 0)
            .map(|g| (g.zeroes_left(), g.grain()));
        assert_eq!(pending, Some((68, Some(frame_grains[1].id))));

        // the pending grain plays exactly at its mark
        scheduler.next_sample(&mut store);
        run_scheduler(&mut scheduler, 33, 100, 100.0, &frame_grains, &mut store);
        let playing = scheduler
            .grains
            .iter()
            .filter(|g| g.is_active())
            .map(|g| (g.zeroes_left(), g.reading_index()))
            .collect::<Vec<_>>();
        assert_eq!(playing, vec![(0, 0)]);
        Ok(())
    }

    #[test]
    fn scheduler_drops_marks_without_free_grains() -> Result<(), Error> {
        let input = vec![1.0; 256];
        let mut store = GrainStore::new(8, 64);
        let frame_grains = capture_grains(&input, &[0], 64, &mut store)?;

        let mut scheduler = SynthesisGrainScheduler::new(2);
        scheduler.start(0, &mut store);
        run_scheduler(&mut scheduler, 0, 40, 10.0, &frame_grains, &mut store);
        assert_eq!(scheduler.num_active_grains(), 2);
        assert_eq!(store.grain(frame_grains[0].id).ref_count(), 2);
        // marks at 20 and 30 got dropped, not delayed
        assert!(scheduler.grains.iter().all(|g| g.zeroes_left() == 0));
        assert_eq!(scheduler.next_mark(), 40.0);
        Ok(())
    }

    #[test]
    fn voice_lifecycle() -> Result<(), Error> {
        let sample_rate = 48000;
        let input = (0..256)
            .map(|i| (i as f32 * 0.1).sin())
            .collect::<Vec<_>>();
        let mut store = GrainStore::new(32, 128);
        let frame_grains = capture_grains(&input, &[0, 50, 100], 100, &mut store)?;
        let mut adsr = AdsrParameters::default();
        adsr.set_sample_rate(sample_rate)?;
        let context = VoiceRenderContext {
            frame_grains: &frame_grains,
            sample_rate,
            analysis_period: 50.0,
            pitched: true,
            min_synthesis_period: 20.0,
            max_synthesis_period: 128.0,
            adsr: &adsr,
        };

        let mut voice = HarmonizerVoice::new(
            sample_rate,
            SynthesisGrainScheduler::required_grains(100, 20),
        );
        assert!(!voice.is_active());
        voice.set_pan(64, false);
        voice.start_note(60, 1, 1.0, 1.0, 1.0, 480.0, None, 0, &adsr, &mut store);
        assert!(voice.is_active() && voice.is_key_down());

        let mut output = vec![0.0; 256];
        assert!(!voice.render(&context, &mut store, &mut output, 0, 128));
        assert!(output.iter().any(|s| *s != 0.0));
        assert!(voice.num_active_grains() > 0);
        voice.end_frame(&context, 128);

        voice.release(&adsr);
        assert!(voice.is_released());
        let mut freed = false;
        for _ in 0..100 {
            if voice.render(&context, &mut store, &mut output, 0, 128) {
                freed = true;
                break;
            }
            voice.end_frame(&context, 128);
        }
        assert!(freed);
        assert!(!voice.is_active());
        assert_eq!(voice.num_active_grains(), 0);
        for grain in &frame_grains {
            assert_eq!(store.grain(grain.id).ref_count(), 0);
        }
        Ok(())
    }
}
