//! Pitch synchronous grains: windowed analysis grains, captured from the input signal, and
//! synthesis grains which replay them respaced at a new pitch period.

mod analysis;
mod synthesis;

pub use analysis::{apply_hann_window, AnalysisGrain, GrainId, GrainStore};
pub use synthesis::SynthesisGrain;
