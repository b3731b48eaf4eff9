use super::{GrainId, GrainStore};

// -------------------------------------------------------------------------------------------------

/// Playback cursor over a single [`AnalysisGrain`](super::AnalysisGrain) in a [`GrainStore`].
///
/// A started grain first emits `zeroes_left` silent samples, which respaces it into the future,
/// then the windowed grain samples. It stops and releases its grain reference on its own once
/// the last sample has been read.
#[derive(Debug, Clone, Default)]
pub struct SynthesisGrain {
    grain: Option<GrainId>,
    size: usize,
    reading_index: usize,
    zeroes_left: usize,
    halfway_index: usize,
}

impl SynthesisGrain {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the grain has unread samples.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.grain.is_some()
    }

    /// The grain this cursor is reading from, if any.
    pub fn grain(&self) -> Option<GrainId> {
        self.grain
    }

    /// Next index to read from the analysis grain.
    pub fn reading_index(&self) -> usize {
        self.reading_index
    }

    /// Number of silent samples left before the grain starts.
    pub fn zeroes_left(&self) -> usize {
        self.zeroes_left
    }

    /// The grain's center, rounded to the nearest sample.
    pub fn halfway_index(&self) -> usize {
        self.halfway_index
    }

    /// True once the grain played its first half. Inactive grains never pass it.
    #[inline]
    pub fn is_past_halfway(&self) -> bool {
        self.is_active() && self.zeroes_left == 0 && self.reading_index >= self.halfway_index
    }

    /// Start playing the given grain after `zeroes` silent samples.
    pub fn start_new_grain(&mut self, id: GrainId, zeroes: usize, store: &mut GrainStore) {
        if self.is_active() {
            self.stop(store);
        }
        let size = store.grain(id).size();
        debug_assert!(size > 0, "Trying to play an empty grain");
        if size == 0 {
            return;
        }
        store.acquire(id);
        self.grain = Some(id);
        self.size = size;
        self.reading_index = 0;
        self.zeroes_left = zeroes;
        self.halfway_index = (size as f32 * 0.5).round() as usize;
    }

    /// Produce the next output sample. Must be called exactly once per output sample while
    /// the grain is active. Returns silence when inactive.
    #[inline]
    pub fn get_next_sample(&mut self, store: &mut GrainStore) -> f32 {
        let Some(id) = self.grain else {
            return 0.0;
        };
        if self.zeroes_left > 0 {
            debug_assert!(self.reading_index == 0);
            self.zeroes_left -= 1;
            return 0.0;
        }
        let sample = store.grain(id).sample(self.reading_index);
        self.reading_index += 1;
        if self.reading_index >= self.size {
            self.stop(store);
        }
        sample
    }

    /// Number of remaining output samples, silent ones included.
    #[cfg(test)]
    pub(crate) fn samples_left(&self) -> usize {
        if self.is_active() {
            self.size - self.reading_index + self.zeroes_left
        } else {
            0
        }
    }

    /// Stop playback and release the grain reference.
    pub fn stop(&mut self, store: &mut GrainStore) {
        if let Some(id) = self.grain.take() {
            store.release(id);
        }
        self.size = 0;
        self.reading_index = 0;
        self.zeroes_left = 0;
        self.halfway_index = 0;
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn lifecycle() -> Result<(), Error> {
        let input = (0..64).map(|i| (i as f32 * 0.3).sin()).collect::<Vec<_>>();
        let mut store = GrainStore::new(4, 32);
        let id = store.store_new_grain(&input, 8, 27)?;
        let expected = store.grain(id).samples().to_vec();
        assert_eq!(expected.len(), 20);

        let mut grain = SynthesisGrain::new();
        assert!(!grain.is_active());
        assert_eq!(grain.samples_left(), 0);
        assert_eq!(grain.get_next_sample(&mut store), 0.0);

        grain.start_new_grain(id, 3, &mut store);
        assert!(grain.is_active());
        assert!(!grain.is_past_halfway());
        assert_eq!(store.grain(id).ref_count(), 1);
        assert_eq!(grain.samples_left(), 23);
        assert_eq!(grain.halfway_index(), 10);

        // silent part
        for _ in 0..3 {
            assert_eq!(grain.get_next_sample(&mut store), 0.0);
        }
        assert_eq!(grain.zeroes_left(), 0);
        assert_eq!(grain.samples_left(), 20);

        // playing part
        let mut output = Vec::new();
        while grain.is_active() {
            assert!(grain.reading_index() < expected.len());
            assert_eq!(grain.is_past_halfway(), output.len() >= 10);
            output.push(grain.get_next_sample(&mut store));
        }
        assert!(!grain.is_past_halfway());
        assert_eq!(output, expected);
        assert_eq!(store.grain(id).ref_count(), 0);
        assert_eq!(grain.samples_left(), 0);
        Ok(())
    }

    #[test]
    fn restart_and_stop_release_references() -> Result<(), Error> {
        let input = vec![1.0; 64];
        let mut store = GrainStore::new(4, 32);
        let first = store.store_new_grain(&input, 0, 15)?;
        let second = store.store_new_grain(&input, 16, 31)?;

        let mut a = SynthesisGrain::new();
        let mut b = SynthesisGrain::new();
        a.start_new_grain(first, 0, &mut store);
        b.start_new_grain(first, 8, &mut store);
        assert_eq!(store.grain(first).ref_count(), 2);

        a.start_new_grain(second, 0, &mut store);
        assert_eq!(store.grain(first).ref_count(), 1);
        assert_eq!(store.grain(second).ref_count(), 1);

        a.stop(&mut store);
        b.stop(&mut store);
        assert_eq!(store.grain(first).ref_count(), 0);
        assert_eq!(store.grain(second).ref_count(), 0);
        assert!(!a.is_active() && !b.is_active());
        Ok(())
    }
}
