//! Sample accurate MIDI events and buffers for the audio thread.

use midly::{
    live::LiveEvent,
    num::{u14, u4, u7},
};

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Controller numbers the harmonizer reacts to.
pub mod controllers {
    pub const SUSTAIN_PEDAL: u8 = 64;
    pub const SOSTENUTO_PEDAL: u8 = 66;
    pub const SOFT_PEDAL: u8 = 67;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const ALL_NOTES_OFF: u8 = 123;
}

// -------------------------------------------------------------------------------------------------

/// A channel voice message with plain integer payloads.
///
/// Values are stored unmasked: conversions to bytes mask them to their valid MIDI ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    Aftertouch { channel: u8, note: u8, pressure: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    Controller { channel: u8, controller: u8, value: u8 },
    /// 14-bit pitch wheel position, 8192 is centered.
    PitchWheel { channel: u8, value: u16 },
    ProgramChange { channel: u8, program: u8 },
}

impl MidiMessage {
    /// Parse a single channel voice message from raw MIDI bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        match LiveEvent::parse(bytes)? {
            LiveEvent::Midi { channel, message } => Self::from_midly(channel, message),
            _ => Err(Error::MidiParseError(
                "not a channel voice message".to_string(),
            )),
        }
    }

    /// Append the message's raw MIDI bytes to the given byte buffer.
    pub fn write_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), Error> {
        self.to_live_event()
            .write(bytes)
            .map_err(|err| Error::MidiParseError(err.to_string()))
    }

    fn from_midly(channel: u4, message: midly::MidiMessage) -> Result<Self, Error> {
        let channel = channel.as_int();
        let message = match message {
            midly::MidiMessage::NoteOn { key, vel } => {
                // note-on with zero velocity is a note-off
                if vel.as_int() == 0 {
                    Self::NoteOff {
                        channel,
                        note: key.as_int(),
                        velocity: 0,
                    }
                } else {
                    Self::NoteOn {
                        channel,
                        note: key.as_int(),
                        velocity: vel.as_int(),
                    }
                }
            }
            midly::MidiMessage::NoteOff { key, vel } => Self::NoteOff {
                channel,
                note: key.as_int(),
                velocity: vel.as_int(),
            },
            midly::MidiMessage::Aftertouch { key, vel } => Self::Aftertouch {
                channel,
                note: key.as_int(),
                pressure: vel.as_int(),
            },
            midly::MidiMessage::Controller { controller, value } => Self::Controller {
                channel,
                controller: controller.as_int(),
                value: value.as_int(),
            },
            midly::MidiMessage::ProgramChange { program } => Self::ProgramChange {
                channel,
                program: program.as_int(),
            },
            midly::MidiMessage::ChannelAftertouch { vel } => Self::ChannelPressure {
                channel,
                pressure: vel.as_int(),
            },
            midly::MidiMessage::PitchBend { bend } => Self::PitchWheel {
                channel,
                value: bend.0.as_int(),
            },
        };
        Ok(message)
    }

    fn to_live_event(self) -> LiveEvent<'static> {
        let seven = |value: u8| u7::from(value & 0x7f);
        let (channel, message) = match self {
            Self::NoteOn {
                channel,
                note,
                velocity,
            } => (
                channel,
                midly::MidiMessage::NoteOn {
                    key: seven(note),
                    vel: seven(velocity),
                },
            ),
            Self::NoteOff {
                channel,
                note,
                velocity,
            } => (
                channel,
                midly::MidiMessage::NoteOff {
                    key: seven(note),
                    vel: seven(velocity),
                },
            ),
            Self::Aftertouch {
                channel,
                note,
                pressure,
            } => (
                channel,
                midly::MidiMessage::Aftertouch {
                    key: seven(note),
                    vel: seven(pressure),
                },
            ),
            Self::ChannelPressure { channel, pressure } => (
                channel,
                midly::MidiMessage::ChannelAftertouch {
                    vel: seven(pressure),
                },
            ),
            Self::Controller {
                channel,
                controller,
                value,
            } => (
                channel,
                midly::MidiMessage::Controller {
                    controller: seven(controller),
                    value: seven(value),
                },
            ),
            Self::PitchWheel { channel, value } => (
                channel,
                midly::MidiMessage::PitchBend {
                    bend: midly::PitchBend(u14::from(value & 0x3fff)),
                },
            ),
            Self::ProgramChange { channel, program } => (
                channel,
                midly::MidiMessage::ProgramChange {
                    program: seven(program),
                },
            ),
        };
        LiveEvent::Midi {
            channel: u4::from(channel & 0x0f),
            message,
        }
    }

    /// MIDI channel (0-15) of the message.
    pub fn channel(&self) -> u8 {
        match *self {
            Self::NoteOn { channel, .. }
            | Self::NoteOff { channel, .. }
            | Self::Aftertouch { channel, .. }
            | Self::ChannelPressure { channel, .. }
            | Self::Controller { channel, .. }
            | Self::PitchWheel { channel, .. }
            | Self::ProgramChange { channel, .. } => channel,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A MIDI message with a sample offset relative to the start of the block it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub sample_position: usize,
    pub message: MidiMessage,
}

impl MidiEvent {
    pub fn new(sample_position: usize, message: MidiMessage) -> Self {
        Self {
            sample_position,
            message,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Time ordered list of [`MidiEvent`]s with a fixed capacity.
///
/// Events with equal positions keep their insertion order. Adding events to a full buffer
/// drops them instead of reallocating, so a preallocated buffer is safe to use in the audio
/// thread.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
}

impl MidiBuffer {
    /// Default number of preallocated events.
    pub const DEFAULT_CAPACITY: usize = 512;

    /// Create a new empty buffer, preallocating space for the given number of events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.events.capacity()
    }

    /// Remove all events, keeping the allocated capacity.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Access the events, ordered by their sample positions.
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &MidiEvent> {
        self.events.iter()
    }

    /// Sample position of the last event, if any.
    pub fn last_event_position(&self) -> Option<usize> {
        self.events.last().map(|e| e.sample_position)
    }

    /// Insert a new event at the given sample position, after all events at the same or an
    /// earlier position. Returns false, when the buffer is full and the event got dropped.
    pub fn add_event(&mut self, sample_position: usize, message: MidiMessage) -> bool {
        if self.events.len() == self.events.capacity() {
            return false;
        }
        let index = self
            .events
            .partition_point(|e| e.sample_position <= sample_position);
        self.events
            .insert(index, MidiEvent::new(sample_position, message));
        true
    }

    /// Add all events from `other`, shifting their positions by `offset`.
    /// Returns the number of events which could not be added because the buffer is full.
    pub fn append_with_offset(&mut self, other: &MidiBuffer, offset: usize) -> usize {
        self.copy_range(other, 0, usize::MAX, offset)
    }

    /// Copy events from `source` which are positioned in range
    /// `[source_start, source_start + num_samples)`. Copied events are moved to
    /// `position - source_start + destination_start`.
    /// Returns the number of events which could not be added because the buffer is full.
    pub fn copy_range(
        &mut self,
        source: &MidiBuffer,
        source_start: usize,
        num_samples: usize,
        destination_start: usize,
    ) -> usize {
        let source_end = source_start.saturating_add(num_samples);
        let mut dropped = 0;
        for event in source
            .events
            .iter()
            .skip_while(|e| e.sample_position < source_start)
            .take_while(|e| e.sample_position < source_end)
        {
            let position = event.sample_position - source_start + destination_start;
            if !self.add_event(position, event.message) {
                dropped += 1;
            }
        }
        dropped
    }

    /// Remove all events positioned before `num_samples` and move all remaining events
    /// `num_samples` towards the buffer start.
    pub fn remove_and_shift(&mut self, num_samples: usize) {
        self.events.retain(|e| e.sample_position >= num_samples);
        for event in &mut self.events {
            event.sample_position -= num_samples;
        }
    }
}

impl Default for MidiBuffer {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(note: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: 0,
            note,
            velocity: 100,
        }
    }

    #[test]
    fn parse_and_write_bytes() -> Result<(), Error> {
        let message = MidiMessage::from_bytes(&[0x91, 60, 100])?;
        assert_eq!(
            message,
            MidiMessage::NoteOn {
                channel: 1,
                note: 60,
                velocity: 100
            }
        );
        assert_eq!(
            MidiMessage::from_bytes(&[0x90, 60, 0])?,
            MidiMessage::NoteOff {
                channel: 0,
                note: 60,
                velocity: 0
            }
        );
        assert_eq!(
            MidiMessage::from_bytes(&[0xE0, 0x00, 0x40])?,
            MidiMessage::PitchWheel {
                channel: 0,
                value: 8192
            }
        );
        assert!(MidiMessage::from_bytes(&[0xF8]).is_err());
        assert!(MidiMessage::from_bytes(&[]).is_err());

        let mut bytes = Vec::new();
        MidiMessage::Controller {
            channel: 2,
            controller: controllers::SUSTAIN_PEDAL,
            value: 127,
        }
        .write_bytes(&mut bytes)?;
        assert_eq!(bytes, vec![0xB2, 64, 127]);
        Ok(())
    }

    #[test]
    fn events_stay_sorted() {
        let mut buffer = MidiBuffer::with_capacity(8);
        assert!(buffer.add_event(10, note_on(1)));
        assert!(buffer.add_event(5, note_on(2)));
        assert!(buffer.add_event(10, note_on(3)));
        assert!(buffer.add_event(0, note_on(4)));
        let notes = buffer
            .iter()
            .map(|e| match e.message {
                MidiMessage::NoteOn { note, .. } => note,
                _ => 0,
            })
            .collect::<Vec<_>>();
        assert_eq!(notes, vec![4, 2, 1, 3]);
        assert_eq!(buffer.last_event_position(), Some(10));
    }

    #[test]
    fn full_buffer_drops_events() {
        let mut buffer = MidiBuffer::with_capacity(2);
        let capacity = buffer.capacity();
        for _ in 0..capacity {
            assert!(buffer.add_event(0, note_on(1)));
        }
        assert!(!buffer.add_event(0, note_on(2)));
        assert_eq!(buffer.len(), capacity);
    }

    #[test]
    fn copy_range_and_shift() {
        let mut source = MidiBuffer::with_capacity(8);
        source.add_event(0, note_on(1));
        source.add_event(4, note_on(2));
        source.add_event(8, note_on(3));

        let mut destination = MidiBuffer::with_capacity(8);
        assert_eq!(destination.copy_range(&source, 4, 4, 100), 0);
        assert_eq!(destination.events(), &[MidiEvent::new(100, note_on(2))]);

        destination.clear();
        destination.append_with_offset(&source, 10);
        assert_eq!(destination.len(), 3);
        assert_eq!(destination.events()[2].sample_position, 18);

        source.remove_and_shift(4);
        assert_eq!(
            source.events(),
            &[MidiEvent::new(0, note_on(2)), MidiEvent::new(4, note_on(3))]
        );
    }
}
