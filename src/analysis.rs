//! Analysis of the input signal: pitch detection and pitch synchronous grain onsets.

mod onsets;
mod pitch;

pub use onsets::GrainOnsetDetector;
pub use pitch::PitchDetector;
