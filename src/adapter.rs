use crate::{
    midi::MidiBuffer,
    utils::{buffer::apply_gain_ramp, fifo::AudioFifo},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Renders fixed size blocks of mono input into interleaved stereo output.
///
/// Implementations are driven by a [`BlockSizeAdapter`], which calls the render functions
/// in the real-time audio thread, so they must not block or allocate.
pub trait BlockRenderer {
    /// Render one block. `input` holds exactly one internal block of mono samples and
    /// `output` the same number of interleaved stereo frames. MIDI events are positioned
    /// relative to the block start. Events which should be sent out along with the block
    /// are added to `midi_output`.
    fn render_block(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        midi_input: &MidiBuffer,
        midi_output: &mut MidiBuffer,
    );

    /// Render one block while bypassed. By default the dry input gets copied to both output
    /// channels.
    fn render_bypassed_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (frame, sample) in output.chunks_exact_mut(2).zip(input) {
            frame[0] = *sample;
            frame[1] = *sample;
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Feeds host buffers of any size into a [`BlockRenderer`] which only processes blocks of a
/// fixed internal size.
///
/// Input samples and MIDI events are queued until a full internal block is available. The
/// rendered output is queued as well and drained in host sized chunks. The output queue
/// starts with one internal block of silence, so the adapter adds a constant latency of
/// exactly one internal block, independent from the host's block sizes.
pub struct BlockSizeAdapter {
    internal_block_size: usize,
    input_fifo: AudioFifo,
    output_fifo: AudioFifo,
    midi_input_fifo: MidiBuffer,
    midi_output_fifo: MidiBuffer,
    input_block: Vec<f32>,
    output_block: Vec<f32>,
    block_midi_input: MidiBuffer,
    block_midi_output: MidiBuffer,
}

impl BlockSizeAdapter {
    /// Max number of queued MIDI events in each direction.
    const MIDI_FIFO_CAPACITY: usize = 2 * MidiBuffer::DEFAULT_CAPACITY;

    pub fn new(internal_block_size: usize) -> Result<Self, Error> {
        if internal_block_size == 0 {
            return Err(Error::InvalidBlockSize(internal_block_size));
        }
        let mut adapter = Self {
            internal_block_size,
            // the input never holds more than one block plus one host chunk
            input_fifo: AudioFifo::new(2 * internal_block_size, 1),
            output_fifo: AudioFifo::new(2 * internal_block_size, 2),
            midi_input_fifo: MidiBuffer::with_capacity(Self::MIDI_FIFO_CAPACITY),
            midi_output_fifo: MidiBuffer::with_capacity(Self::MIDI_FIFO_CAPACITY),
            input_block: vec![0.0; internal_block_size],
            output_block: vec![0.0; 2 * internal_block_size],
            block_midi_input: MidiBuffer::default(),
            block_midi_output: MidiBuffer::with_capacity(Self::MIDI_FIFO_CAPACITY),
        };
        adapter.reset();
        Ok(adapter)
    }

    /// Size of the blocks passed to the renderer.
    pub fn internal_block_size(&self) -> usize {
        self.internal_block_size
    }

    /// Delay in samples between input and output.
    pub fn latency_samples(&self) -> usize {
        self.internal_block_size
    }

    /// Reallocate all queues for a new internal block size. Pending input and output
    /// gets dropped.
    pub fn set_internal_block_size(&mut self, internal_block_size: usize) -> Result<(), Error> {
        if internal_block_size == self.internal_block_size {
            self.reset();
            return Ok(());
        }
        *self = Self::new(internal_block_size)?;
        log::info!("Internal block size changed to {internal_block_size} samples");
        Ok(())
    }

    /// Drop all pending input and output, then prime the output with the latency's silence.
    pub fn reset(&mut self) {
        self.input_fifo.clear();
        self.output_fifo.clear();
        self.midi_input_fifo.clear();
        self.midi_output_fifo.clear();
        self.output_fifo.push_silence(self.internal_block_size);
    }

    /// Process a mono input buffer into an interleaved stereo output buffer of the same
    /// number of frames. Events from `midi_input` are forwarded to the renderer, events
    /// the renderer emits get added to `midi_output`, delayed by the latency.
    ///
    /// With `fade_in` or `fade_out` set, the first or last internal chunk of the output is
    /// faded in or out linearly.
    #[allow(clippy::too_many_arguments)]
    pub fn process<R: BlockRenderer>(
        &mut self,
        renderer: &mut R,
        input: &[f32],
        output: &mut [f32],
        midi_input: &MidiBuffer,
        midi_output: &mut MidiBuffer,
        fade_in: bool,
        fade_out: bool,
    ) {
        self.process_chunks(
            renderer,
            input,
            output,
            midi_input,
            midi_output,
            (fade_in, fade_out),
            false,
        );
    }

    /// Process without rendering: the renderer's bypass function fills the output, and MIDI
    /// is passed through. Input and output stay aligned to the same latency as in
    /// [`Self::process`].
    pub fn process_bypassed<R: BlockRenderer>(
        &mut self,
        renderer: &mut R,
        input: &[f32],
        output: &mut [f32],
        midi_input: &MidiBuffer,
        midi_output: &mut MidiBuffer,
    ) {
        self.process_chunks(
            renderer,
            input,
            output,
            midi_input,
            midi_output,
            (false, false),
            true,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn process_chunks<R: BlockRenderer>(
        &mut self,
        renderer: &mut R,
        input: &[f32],
        output: &mut [f32],
        midi_input: &MidiBuffer,
        midi_output: &mut MidiBuffer,
        (fade_in, fade_out): (bool, bool),
        bypassed: bool,
    ) {
        debug_assert_eq!(output.len(), 2 * input.len(), "Invalid output buffer size");
        let num_frames = input.len();
        if num_frames == 0 {
            // queue events for the next block
            let stored = self.input_fifo.num_stored_frames();
            self.queue_midi_input(midi_input, 0, usize::MAX, stored);
            return;
        }

        let mut offset = 0;
        while offset < num_frames {
            let chunk_len = (num_frames - offset).min(self.internal_block_size);
            let is_first_chunk = offset == 0;
            let is_last_chunk = offset + chunk_len == num_frames;

            let stored = self.input_fifo.num_stored_frames();
            let pushed = self.input_fifo.push(&input[offset..offset + chunk_len]);
            debug_assert_eq!(pushed, chunk_len, "Input FIFO overflow");
            // events past the end of the input go with the last chunk
            let midi_span = if is_last_chunk { usize::MAX } else { chunk_len };
            self.queue_midi_input(midi_input, offset, midi_span, stored);

            while self.input_fifo.num_stored_frames() >= self.internal_block_size {
                self.render_next_block(renderer, bypassed);
            }

            let output_chunk = &mut output[2 * offset..2 * (offset + chunk_len)];
            let popped = self.output_fifo.pop(output_chunk);
            debug_assert_eq!(popped, chunk_len, "Output FIFO underflow");
            if popped < chunk_len {
                output_chunk[2 * popped..].fill(0.0);
            }
            if midi_output.copy_range(&self.midi_output_fifo, 0, chunk_len, offset) > 0 {
                log::debug!("MIDI output buffer is full, dropping events");
            }
            self.midi_output_fifo.remove_and_shift(chunk_len);

            if fade_in && is_first_chunk {
                apply_gain_ramp(output_chunk, 2, 0.0, 1.0);
            }
            if fade_out && is_last_chunk {
                apply_gain_ramp(output_chunk, 2, 1.0, 0.0);
            }
            offset += chunk_len;
        }
    }

    fn queue_midi_input(
        &mut self,
        midi_input: &MidiBuffer,
        source_start: usize,
        num_samples: usize,
        destination_start: usize,
    ) {
        if self
            .midi_input_fifo
            .copy_range(midi_input, source_start, num_samples, destination_start)
            > 0
        {
            log::debug!("MIDI input queue is full, dropping events");
        }
    }

    fn render_next_block<R: BlockRenderer>(&mut self, renderer: &mut R, bypassed: bool) {
        let block_size = self.internal_block_size;
        self.input_fifo.pop(&mut self.input_block);

        self.block_midi_input.clear();
        self.block_midi_input
            .copy_range(&self.midi_input_fifo, 0, block_size, 0);
        self.midi_input_fifo.remove_and_shift(block_size);

        self.block_midi_output.clear();
        if bypassed {
            renderer.render_bypassed_block(&self.input_block, &mut self.output_block);
            self.block_midi_output
                .append_with_offset(&self.block_midi_input, 0);
        } else {
            renderer.render_block(
                &self.input_block,
                &mut self.output_block,
                &self.block_midi_input,
                &mut self.block_midi_output,
            );
        }

        let stored = self.output_fifo.num_stored_frames();
        let pushed = self.output_fifo.push(&self.output_block);
        debug_assert_eq!(pushed, block_size, "Output FIFO overflow");
        if self
            .midi_output_fifo
            .append_with_offset(&self.block_midi_output, stored)
            > 0
        {
            log::debug!("MIDI output queue is full, dropping events");
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiMessage;

    /// Copies the input to both channels, adding a per block offset, and echoes all events.
    #[derive(Default)]
    struct CountingRenderer {
        blocks: usize,
    }

    impl BlockRenderer for CountingRenderer {
        fn render_block(
            &mut self,
            input: &[f32],
            output: &mut [f32],
            midi_input: &MidiBuffer,
            midi_output: &mut MidiBuffer,
        ) {
            let offset = self.blocks as f32 * 0.001;
            for (frame, sample) in output.chunks_exact_mut(2).zip(input) {
                frame[0] = *sample + offset;
                frame[1] = *sample - offset;
            }
            midi_output.append_with_offset(midi_input, 0);
            self.blocks += 1;
        }
    }

    fn note_on(note: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: 0,
            note,
            velocity: 100,
        }
    }

    #[test]
    fn invalid_block_size() {
        assert!(BlockSizeAdapter::new(0).is_err());
    }

    #[test]
    fn latency_is_one_block() -> Result<(), Error> {
        let mut adapter = BlockSizeAdapter::new(64)?;
        let mut renderer = CountingRenderer::default();
        assert_eq!(adapter.latency_samples(), 64);

        let mut input = vec![0.0; 100];
        input[0] = 1.0;
        let mut midi_input = MidiBuffer::default();
        midi_input.add_event(3, note_on(60));
        let mut output = vec![0.0; 200];
        let mut midi_output = MidiBuffer::default();
        adapter.process(
            &mut renderer,
            &input,
            &mut output,
            &midi_input,
            &mut midi_output,
            false,
            false,
        );
        assert!(output[..128].iter().all(|s| *s == 0.0));
        assert_eq!(output[128], 1.0);
        assert_eq!(output[129], 1.0);
        assert_eq!(midi_output.events()[0].sample_position, 67);
        Ok(())
    }

    #[test]
    fn zero_length_blocks() -> Result<(), Error> {
        let mut adapter = BlockSizeAdapter::new(64)?;
        let mut renderer = CountingRenderer::default();
        let mut midi_input = MidiBuffer::default();
        midi_input.add_event(0, note_on(60));
        let mut midi_output = MidiBuffer::default();
        adapter.process(
            &mut renderer,
            &[],
            &mut [],
            &midi_input,
            &mut midi_output,
            false,
            false,
        );
        assert!(midi_output.is_empty());
        assert_eq!(renderer.blocks, 0);

        // the queued event shows up after the latency
        let input = vec![0.0; 128];
        let mut output = vec![0.0; 256];
        adapter.process(
            &mut renderer,
            &input,
            &mut output,
            &MidiBuffer::default(),
            &mut midi_output,
            false,
            false,
        );
        assert_eq!(midi_output.len(), 1);
        assert_eq!(midi_output.events()[0].sample_position, 64);
        Ok(())
    }

    #[test]
    fn host_block_size_does_not_change_output() -> Result<(), Error> {
        const NUM_FRAMES: usize = 5000;
        let input = (0..NUM_FRAMES)
            .map(|i| (i as f32 * 0.01).sin())
            .collect::<Vec<_>>();
        let mut midi_input = MidiBuffer::default();
        for (position, note) in [(10, 60), (700, 62), (701, 64), (4990, 65)] {
            midi_input.add_event(position, note_on(note));
        }

        let mut adapter = BlockSizeAdapter::new(512)?;
        let mut renderer = CountingRenderer::default();
        let mut expected = vec![0.0; 2 * NUM_FRAMES];
        let mut expected_midi = MidiBuffer::default();
        adapter.process(
            &mut renderer,
            &input,
            &mut expected,
            &midi_input,
            &mut expected_midi,
            false,
            false,
        );

        let mut adapter = BlockSizeAdapter::new(512)?;
        let mut renderer = CountingRenderer::default();
        let mut output = vec![0.0; 2 * NUM_FRAMES];
        let mut output_midi = MidiBuffer::default();
        let mut block_midi_input = MidiBuffer::default();
        let mut block_midi_output = MidiBuffer::default();
        let mut offset = 0;
        while offset < NUM_FRAMES {
            let len = 37.min(NUM_FRAMES - offset);
            block_midi_input.clear();
            block_midi_input.copy_range(&midi_input, offset, len, 0);
            block_midi_output.clear();
            adapter.process(
                &mut renderer,
                &input[offset..offset + len],
                &mut output[2 * offset..2 * (offset + len)],
                &block_midi_input,
                &mut block_midi_output,
                false,
                false,
            );
            output_midi.append_with_offset(&block_midi_output, offset);
            offset += len;
        }

        assert_eq!(output, expected);
        assert_eq!(output_midi, expected_midi);
        assert_eq!(
            output_midi
                .iter()
                .map(|e| e.sample_position)
                .collect::<Vec<_>>(),
            vec![522, 1212, 1213]
        );
        Ok(())
    }

    #[test]
    fn fades_and_bypass() -> Result<(), Error> {
        let mut adapter = BlockSizeAdapter::new(16)?;
        let mut renderer = CountingRenderer::default();
        let input = vec![1.0; 16];
        let mut output = vec![0.0; 32];
        let mut midi_output = MidiBuffer::default();
        let midi_input = MidiBuffer::default();

        adapter.process_bypassed(
            &mut renderer,
            &input,
            &mut output,
            &midi_input,
            &mut midi_output,
        );
        assert!(output.iter().all(|s| *s == 0.0));
        assert_eq!(renderer.blocks, 0);

        adapter.process(
            &mut renderer,
            &input,
            &mut output,
            &midi_input,
            &mut midi_output,
            true,
            false,
        );
        // dry bypassed block, faded in
        assert_eq!(output[0], 0.0);
        assert_eq!(output[30], 1.0);
        assert_eq!(output[31], 1.0);

        adapter.process(
            &mut renderer,
            &input,
            &mut output,
            &midi_input,
            &mut midi_output,
            false,
            true,
        );
        assert_eq!(output[0], 1.0);
        assert_eq!(output[30], 0.0);

        adapter.reset();
        adapter.process(
            &mut renderer,
            &input,
            &mut output,
            &midi_input,
            &mut midi_output,
            false,
            false,
        );
        assert!(output.iter().all(|s| *s == 0.0));
        Ok(())
    }
}
