#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod adapter;
mod analysis;
mod engine;
mod error;
mod grains;
mod harmonizer;

// public, flat re-exports
pub use error::Error;

pub use adapter::{BlockRenderer, BlockSizeAdapter};
pub use analysis::{GrainOnsetDetector, PitchDetector};
pub use engine::{Engine, EngineConfig, EngineHandle, EngineMessage, InputChannelMode};
pub use grains::{AnalysisGrain, GrainId, GrainStore, SynthesisGrain};
pub use harmonizer::{AutoVoiceSettings, Harmonizer, HarmonizerSettings, PanningManager};

// public mods
pub mod midi;
pub mod utils;
