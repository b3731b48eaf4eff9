use std::{error, fmt};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by choralis.
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    InvalidSampleRate(u32),
    InvalidBlockSize(usize),
    InvalidVoiceCount(usize),
    GrainCapacityExceeded { required: usize, capacity: usize },
    GrainStoreExhausted,
    NotPrepared,
    ParameterError(String),
    MidiParseError(String),
    SendError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSampleRate(rate) => write!(f, "Invalid sample rate: {rate}"),
            Self::InvalidBlockSize(size) => write!(f, "Invalid block size: {size}"),
            Self::InvalidVoiceCount(count) => write!(f, "Invalid voice count: {count}"),
            Self::GrainCapacityExceeded { required, capacity } => write!(
                f,
                "Grain span of {required} samples exceeds the grain capacity of {capacity} samples"
            ),
            Self::GrainStoreExhausted => write!(f, "No free analysis grain slot available"),
            Self::NotPrepared => write!(f, "Engine is not prepared for playback"),
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::MidiParseError(str) => write!(f, "Failed to parse MIDI message: {str}"),
            Self::SendError(str) => write!(f, "Failed to send engine message: {str}"),
        }
    }
}

impl From<midly::Error> for Error {
    fn from(err: midly::Error) -> Self {
        Error::MidiParseError(err.to_string())
    }
}
