// Standard MIDI File input/output for piano-rolls.
//
// Converts a Pianoroll to an SMF for playback and back again for prompt
// ingestion. Frame times map to MIDI ticks through the frame grid:
// FRAMES_PER_BEAT frames per quarter note, TICKS_PER_QUARTER ticks per
// quarter note. Reading quantizes note times to the frame grid, the
// same information the tokenizer would discard anyway.
//
// Uses the `midly` crate. Output is SMF Format 1: a tempo track plus a
// single piano track.

use crate::pianoroll::{FRAMES_PER_BEAT, MIDI_KEY_OFFSET, N_KEYS, Note, Pianoroll};
use midly::{
    Format, Header, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::collections::HashMap;
use std::io;
use std::path::Path;

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

/// Ticks per frame (60 at 32 frames per bar).
const TICKS_PER_FRAME: u32 = TICKS_PER_QUARTER as u32 / FRAMES_PER_BEAT;

/// Convert a Pianoroll to MIDI and write to a file.
pub fn write_midi(pr: &Pianoroll, bpm: u16, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let smf = pianoroll_to_smf(pr, bpm);
    let mut buf = Vec::new();
    smf.write(&mut buf)?;
    std::fs::write(path, &buf)?;
    Ok(())
}

/// Read a MIDI file and quantize it to a Pianoroll.
pub fn read_midi(path: &Path) -> Result<Pianoroll, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    smf_to_pianoroll(&bytes)
}

/// Convert a Pianoroll to an in-memory SMF.
pub fn pianoroll_to_smf(pr: &Pianoroll, bpm: u16) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // Track 0: tempo track
    let mut tempo_track: Track<'static> = Vec::new();
    let tempo_microseconds = 60_000_000 / u32::from(bpm.max(1));
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(midly::MetaMessage::Tempo(u24::new(tempo_microseconds))),
    });
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(midly::MetaMessage::EndOfTrack),
    });
    smf.tracks.push(tempo_track);

    // Track 1: the piano. Gather on/off events in tick order, offs
    // before ons at the same tick so re-struck keys come out clean.
    let channel = u4::new(0);
    let mut events: Vec<(u32, bool, u8, u8)> = Vec::new();
    for note in pr.notes() {
        let key = note.pitch.min(N_KEYS - 1) + MIDI_KEY_OFFSET;
        let on_tick = note.onset * TICKS_PER_FRAME;
        let off_tick = note.end() * TICKS_PER_FRAME;
        events.push((on_tick, true, key, note.velocity.min(127)));
        events.push((off_tick, false, key, 0));
    }
    events.sort_by_key(|&(tick, is_on, key, _)| (tick, is_on, key));

    let mut track: Track<'static> = Vec::new();
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Midi {
            channel,
            message: MidiMessage::ProgramChange { program: u7::new(0) },
        },
    });

    let mut last_tick: u32 = 0;
    for (tick, is_on, key, vel) in events {
        let delta = tick - last_tick;
        let message = if is_on {
            MidiMessage::NoteOn { key: u7::new(key), vel: u7::new(vel) }
        } else {
            MidiMessage::NoteOff { key: u7::new(key), vel: u7::new(0) }
        };
        track.push(TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi { channel, message },
        });
        last_tick = tick;
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(midly::MetaMessage::EndOfTrack),
    });
    smf.tracks.push(track);

    smf
}

/// Parse SMF bytes into a Pianoroll, quantizing to the frame grid.
///
/// All tracks are merged; keys outside the 88-key range are dropped.
/// A NoteOn with velocity 0 counts as a NoteOff (running-status idiom).
pub fn smf_to_pianoroll(bytes: &[u8]) -> Result<Pianoroll, Box<dyn std::error::Error>> {
    let smf = Smf::parse(bytes)?;
    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(tpq) => u32::from(tpq.as_int()),
        Timing::Timecode(..) => {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "SMPTE-timed MIDI files are not supported",
            )));
        }
    };
    let ticks_per_frame = f64::from(ticks_per_quarter) / f64::from(FRAMES_PER_BEAT);

    let mut notes: Vec<Note> = Vec::new();
    let mut max_frame: u32 = 0;
    for track in &smf.tracks {
        let mut tick: u64 = 0;
        // key -> (onset frame, velocity); last NoteOn wins per key
        let mut sounding: HashMap<u8, (u32, u8)> = HashMap::new();
        for event in track {
            tick += u64::from(event.delta.as_int());
            let frame = quantize(tick, ticks_per_frame);
            max_frame = max_frame.max(frame);
            if let TrackEventKind::Midi { message, .. } = event.kind {
                match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        let key = key.as_int();
                        if key >= MIDI_KEY_OFFSET && key < MIDI_KEY_OFFSET + N_KEYS {
                            sounding.insert(key - MIDI_KEY_OFFSET, (frame, vel.as_int()));
                        }
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        let key = key.as_int();
                        if key < MIDI_KEY_OFFSET {
                            continue;
                        }
                        let pitch = key - MIDI_KEY_OFFSET;
                        if let Some((onset, velocity)) = sounding.remove(&pitch) {
                            notes.push(Note {
                                onset,
                                duration: frame.saturating_sub(onset).max(1),
                                pitch,
                                velocity,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        // Keys left sounding at end-of-track close at the final frame.
        for (pitch, (onset, velocity)) in sounding {
            let frame = quantize(tick, ticks_per_frame);
            notes.push(Note {
                onset,
                duration: frame.saturating_sub(onset).max(1),
                pitch,
                velocity,
            });
        }
    }

    Ok(Pianoroll::from_notes(notes).with_duration(max_frame))
}

fn quantize(tick: u64, ticks_per_frame: f64) -> u32 {
    (tick as f64 / ticks_per_frame).round() as u32
}
