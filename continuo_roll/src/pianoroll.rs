// Frame-quantized piano-roll representation.
//
// A piece is an ordered collection of notes, each with an onset frame,
// a duration in frames, a key index on an 88-key piano, and a raw MIDI
// velocity. The overall duration may extend past the last note (trailing
// silence is meaningful and survives tokenization).
//
// Notes are kept sorted by (onset, pitch) so that tokenization and MIDI
// output can walk the piece in time order without re-sorting.

use serde::{Deserialize, Serialize};

/// Frames per 4/4 bar. The positional resolution of the whole system;
/// must match the grid the scoring model was trained on.
pub const FRAMES_PER_BAR: u32 = 32;

/// Frames per quarter-note beat (4/4).
pub const FRAMES_PER_BEAT: u32 = FRAMES_PER_BAR / 4;

/// Number of keys on the piano. Key index 0 is A0 (MIDI 21).
pub const N_KEYS: u8 = 88;

/// MIDI note number of key index 0.
pub const MIDI_KEY_OFFSET: u8 = 21;

/// A single note: onset and duration in frames, key index, raw velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Onset time in frames from the start of the piece.
    pub onset: u32,
    /// Duration in frames, always at least 1.
    pub duration: u32,
    /// Key index 0..88 (0 = A0).
    pub pitch: u8,
    /// Raw MIDI velocity 0..=127.
    pub velocity: u8,
}

impl Note {
    /// First frame after the note stops sounding.
    pub fn end(&self) -> u32 {
        self.onset + self.duration
    }
}

/// An ordered set of notes plus an overall duration in frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pianoroll {
    notes: Vec<Note>,
    duration: u32,
}

impl Pianoroll {
    /// A piece with no notes and zero duration.
    pub fn empty() -> Self {
        Pianoroll::default()
    }

    /// Build from a note list. Notes are sorted by (onset, pitch),
    /// zero-length notes are stretched to one frame, and the duration
    /// is derived from the latest note end.
    pub fn from_notes(mut notes: Vec<Note>) -> Self {
        for note in &mut notes {
            if note.duration == 0 {
                note.duration = 1;
            }
        }
        notes.sort_by_key(|n| (n.onset, n.pitch));
        let duration = notes.iter().map(Note::end).max().unwrap_or(0);
        Pianoroll { notes, duration }
    }

    /// Extend the overall duration (e.g. to keep trailing silence).
    /// The duration never shrinks below the latest note end.
    pub fn with_duration(mut self, frames: u32) -> Self {
        self.duration = self.duration.max(frames);
        self
    }

    /// Insert a note, keeping the (onset, pitch) order.
    pub fn add_note(&mut self, mut note: Note) {
        if note.duration == 0 {
            note.duration = 1;
        }
        let at = self
            .notes
            .partition_point(|n| (n.onset, n.pitch) <= (note.onset, note.pitch));
        self.duration = self.duration.max(note.end());
        self.notes.insert(at, note);
    }

    /// All notes, sorted by (onset, pitch).
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Overall duration in frames.
    pub fn duration(&self) -> u32 {
        self.duration
    }

    /// True if the piece has no notes.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Notes that sound at some point within `[start, end)`.
    pub fn notes_between(&self, start: u32, end: u32) -> impl Iterator<Item = &Note> {
        self.notes
            .iter()
            .filter(move |n| n.onset < end && n.end() > start)
    }
}
