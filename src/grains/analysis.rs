use assume::assume;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Handle of an [`AnalysisGrain`] slot within a [`GrainStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrainId(usize);

impl GrainId {
    /// Slot index in the store.
    pub fn index(&self) -> usize {
        self.0
    }
}

// -------------------------------------------------------------------------------------------------

/// Hann windowed snippet of the input signal, spanning roughly two pitch periods around a grain
/// onset.
///
/// The sample buffer is allocated once with a fixed capacity. Grains are overwritten in place
/// when the store reuses their slot, which only happens when no synthesis grain is reading them.
#[derive(Debug, Clone)]
pub struct AnalysisGrain {
    samples: Vec<f32>,
    size: usize,
    orig_start: usize,
    orig_end: usize,
    ref_count: usize,
    claimed: bool, // held by the current analysis frame
}

impl AnalysisGrain {
    /// Create a new empty grain which can hold up to `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            size: 0,
            orig_start: 0,
            orig_end: 0,
            ref_count: 0,
            claimed: false,
        }
    }

    /// Copy samples `[start, end]` (inclusive) of `input` and apply a Hann window to them.
    pub fn store_new_grain(&mut self, input: &[f32], start: usize, end: usize) -> Result<(), Error> {
        debug_assert!(
            self.ref_count == 0,
            "Trying to overwrite a grain which is still in use"
        );
        if end < start || end >= input.len() {
            return Err(Error::ParameterError(format!(
                "Invalid grain span [{start}, {end}] for an input of {} samples",
                input.len()
            )));
        }
        let size = end - start + 1;
        if size > self.samples.len() {
            return Err(Error::GrainCapacityExceeded {
                required: size,
                capacity: self.samples.len(),
            });
        }
        self.samples[..size].copy_from_slice(&input[start..=end]);
        apply_hann_window(&mut self.samples[..size]);
        self.size = size;
        self.orig_start = start;
        self.orig_end = end;
        Ok(())
    }

    /// Reset the grain to an empty, unreferenced state.
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
        self.size = 0;
        self.orig_start = 0;
        self.orig_end = 0;
        self.ref_count = 0;
        self.claimed = false;
    }

    /// Windowed sample at the given index. Index must be smaller than the grain's size.
    #[inline]
    pub(crate) fn sample(&self, index: usize) -> f32 {
        debug_assert!(index < self.size, "Grain sample index out of bounds");
        assume!(unsafe: self.size <= self.samples.len(), "Size is checked when storing grains");
        self.samples[..self.size][index]
    }

    /// The windowed samples of this grain.
    pub fn samples(&self) -> &[f32] {
        &self.samples[..self.size]
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Max number of samples this grain can hold.
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Index of the first sample in the analysed input.
    pub fn orig_start(&self) -> usize {
        self.orig_start
    }

    /// Index of the last sample in the analysed input.
    pub fn orig_end(&self) -> usize {
        self.orig_end
    }

    /// Number of synthesis grains currently reading from this grain.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    fn is_free(&self) -> bool {
        self.ref_count == 0 && !self.claimed
    }
}

/// Apply a symmetric Hann window `0.5 - 0.5 * cos(2πi / (N - 1))` in place.
pub fn apply_hann_window(samples: &mut [f32]) {
    let len = samples.len();
    if len < 2 {
        // a single sample window would divide by zero
        return;
    }
    let multiplier = std::f32::consts::TAU / (len - 1) as f32;
    for (index, sample) in samples.iter_mut().enumerate() {
        *sample *= 0.5 - 0.5 * (index as f32 * multiplier).cos();
    }
}

// -------------------------------------------------------------------------------------------------

/// Arena of preallocated [`AnalysisGrain`] slots, shared by all voices of a harmonizer.
///
/// Synthesis grains only hold [`GrainId`] handles and register themselves via
/// [`Self::acquire`] and [`Self::release`]. A slot gets reused for a new grain only when it is
/// neither referenced by a synthesis grain nor part of the current analysis frame.
#[derive(Debug, Clone, Default)]
pub struct GrainStore {
    grains: Vec<AnalysisGrain>,
}

impl GrainStore {
    /// Create a new store with `num_slots` grains of the given sample capacity each.
    pub fn new(num_slots: usize, grain_capacity: usize) -> Self {
        Self {
            grains: (0..num_slots)
                .map(|_| AnalysisGrain::new(grain_capacity))
                .collect(),
        }
    }

    /// Number of grain slots.
    pub fn num_slots(&self) -> usize {
        self.grains.len()
    }

    /// Sample capacity of each grain slot.
    pub fn grain_capacity(&self) -> usize {
        self.grains.first().map(|g| g.capacity()).unwrap_or(0)
    }

    /// Grow the store to at least `num_slots` slots. Existing slots and their ids stay valid.
    pub fn reserve_slots(&mut self, num_slots: usize) {
        let grain_capacity = self.grain_capacity();
        while self.grains.len() < num_slots {
            self.grains.push(AnalysisGrain::new(grain_capacity));
        }
    }

    /// Number of slots which can currently take a new grain.
    pub fn num_free_slots(&self) -> usize {
        self.grains.iter().filter(|g| g.is_free()).count()
    }

    /// Start a new analysis frame: grains of the previous frame which no longer are referenced
    /// by any synthesis grain become available for reuse.
    pub fn begin_frame(&mut self) {
        for grain in &mut self.grains {
            grain.claimed = false;
        }
    }

    /// Capture a new windowed grain from `input[start..=end]` into a free slot and claim it
    /// for the current frame.
    pub fn store_new_grain(
        &mut self,
        input: &[f32],
        start: usize,
        end: usize,
    ) -> Result<GrainId, Error> {
        let index = self
            .grains
            .iter()
            .position(|g| g.is_free())
            .ok_or(Error::GrainStoreExhausted)?;
        let grain = &mut self.grains[index];
        grain.store_new_grain(input, start, end)?;
        grain.claimed = true;
        Ok(GrainId(index))
    }

    /// Access a grain by its id.
    #[inline]
    pub fn grain(&self, id: GrainId) -> &AnalysisGrain {
        &self.grains[id.0]
    }

    /// Register a new reader of the given grain.
    #[inline]
    pub fn acquire(&mut self, id: GrainId) {
        self.grains[id.0].ref_count += 1;
    }

    /// Unregister a reader of the given grain.
    #[inline]
    pub fn release(&mut self, id: GrainId) {
        let grain = &mut self.grains[id.0];
        debug_assert!(grain.ref_count > 0, "Unbalanced grain release");
        grain.ref_count = grain.ref_count.saturating_sub(1);
    }

    /// Reset all grains. Only valid when no synthesis grain is holding a reference.
    pub fn clear(&mut self) {
        for grain in &mut self.grains {
            grain.clear();
        }
    }
}

// -------------------------------------------------------------------------------------------------
