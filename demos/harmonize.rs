//! Renders a synthetic sung vowel through the harmonizer engine, playing a chord on top of it,
//! and writes the result into a wav file.

use std::path::PathBuf;

use arg::{parse_args, Args};

use choralis::{
    midi::{MidiBuffer, MidiMessage},
    AutoVoiceSettings, Engine, EngineConfig, HarmonizerSettings,
};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

const SAMPLE_RATE: u32 = 48000;
const BLOCK_SIZE: usize = 256;

// -------------------------------------------------------------------------------------------------

/// Program arguments.
#[derive(Args, Debug, Default)]
struct Arguments {
    #[arg(short = "o", long = "output")]
    /// Path of the rendered wav file. By default "harmonized.wav".
    output_path: Option<PathBuf>,
    #[arg(short = "p", long = "pitch")]
    /// Pitch of the sung input vowel in Hz. By default 220 Hz.
    pitch: Option<f32>,
    #[arg(short = "s", long = "seconds")]
    /// Length of the rendered file in seconds. By default 4 seconds.
    seconds: Option<f32>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level to \"debug\", \"info\", \"warn\" or \"error\".
    log_level: Option<log::Level>,
}

// -------------------------------------------------------------------------------------------------

/// Sawtooth like harmonics, shaped by the formants of an "ah" vowel, with a slight vibrato.
fn sung_vowel(pitch: f32, num_frames: usize) -> Vec<f32> {
    const FORMANTS: [(f32, f32); 3] = [(700.0, 130.0), (1220.0, 70.0), (2600.0, 160.0)];
    let sample_rate = SAMPLE_RATE as f32;
    let num_harmonics = ((sample_rate / 2.0) / (pitch * 1.05)) as usize;
    let mut phase = 0.0_f32;
    (0..num_frames)
        .map(|frame| {
            let time = frame as f32 / sample_rate;
            let vibrato = 1.0 + 0.006 * (std::f32::consts::TAU * 5.5 * time).sin();
            phase = (phase + pitch * vibrato / sample_rate).fract();
            let mut sample = 0.0;
            for harmonic in 1..=num_harmonics {
                let frequency = pitch * harmonic as f32;
                let gain = FORMANTS
                    .iter()
                    .map(|(center, width)| {
                        let distance = (frequency - center) / width;
                        1.0 / (1.0 + distance * distance)
                    })
                    .sum::<f32>();
                sample += gain / harmonic as f32
                    * (std::f32::consts::TAU * phase * harmonic as f32).sin();
            }
            sample * 0.2
        })
        .collect()
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args::<Arguments>();
    simple_logger::SimpleLogger::new()
        .with_level(args.log_level.unwrap_or(DEFAULT_LOG_LEVEL).to_level_filter())
        .init()?;

    let pitch = args.pitch.unwrap_or(220.0);
    let seconds = args.seconds.unwrap_or(4.0).max(1.0);
    let output_path = args
        .output_path
        .unwrap_or_else(|| PathBuf::from("harmonized.wav"));

    // harmonize with a slow attack and a pedal pitch one octave below the chord
    let mut engine = Engine::new(EngineConfig {
        dry_gain: 0.5,
        settings: HarmonizerSettings {
            attack: std::time::Duration::from_millis(120),
            release: std::time::Duration::from_millis(300),
            pedal_pitch: AutoVoiceSettings {
                enabled: true,
                threshold: 64,
                interval: 12,
            },
            ..Default::default()
        },
        ..Default::default()
    })?;
    engine.prepare(SAMPLE_RATE)?;
    log::info!("Engine latency: {} samples", engine.latency_samples());

    let num_frames = (seconds * SAMPLE_RATE as f32) as usize;
    let input = sung_vowel(pitch, num_frames);

    // A minor chord, released half a second before the end
    let chord = [57_u8, 60, 64];
    let release_frame = num_frames - SAMPLE_RATE as usize / 2;
    let mut midi = MidiBuffer::with_capacity(16);
    for note in chord {
        midi.add_event(
            0,
            MidiMessage::NoteOn {
                channel: 0,
                note,
                velocity: 100,
            },
        );
        midi.add_event(
            release_frame,
            MidiMessage::NoteOff {
                channel: 0,
                note,
                velocity: 0,
            },
        );
    }

    let mut output = vec![0.0; 2 * num_frames];
    let mut block_midi_input = MidiBuffer::default();
    let mut block_midi_output = MidiBuffer::default();
    let mut offset = 0;
    while offset < num_frames {
        let len = BLOCK_SIZE.min(num_frames - offset);
        block_midi_input.clear();
        block_midi_input.copy_range(&midi, offset, len, 0);
        block_midi_output.clear();
        engine.process(
            &input[offset..offset + len],
            &mut output[2 * offset..2 * (offset + len)],
            &block_midi_input,
            &mut block_midi_output,
        );
        for event in block_midi_output.iter() {
            log::debug!(
                "MIDI out at frame {}: {:?}",
                offset + event.sample_position,
                event.message
            );
        }
        offset += len;
    }

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&output_path, spec)?;
    for sample in output {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    println!("Wrote harmonized output to '{}'", output_path.display());
    Ok(())
}
