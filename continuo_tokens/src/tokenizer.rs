// Piano-roll <-> token sequence conversion and frame positions.
//
// tokenize walks the frame grid in time order: releases due in a frame
// come first (ascending pitch), then onsets (ascending pitch, each a
// Pitch+Velocity pair), with one NextFrame between consecutive frames.
// detokenize inverts the walk. The round trip is exact for anything
// already quantized to the frame grid; sub-frame timing was never
// representable to begin with.
//
// Velocity is bucketed: bucket = velocity * n_velocity / 128, and
// un-bucketing lands on the bucket's midpoint, so bucket values survive
// a round trip unchanged.
//
// get_frame_indices produces the position sequence the scoring model
// consumes: one non-negative frame number per token, incrementing by
// exactly one on the token that follows a NextFrame and flat elsewhere.

use crate::token::Token;
use crate::vocab::{TokenError, Vocabulary};
use continuo_roll::pianoroll::{Note, Pianoroll};
use std::collections::BTreeMap;

/// Converts piano-rolls to token sequences and back, and carries the
/// vocabulary the scoring model was trained against.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: Vocabulary,
    token_seq_len: usize,
}

impl Tokenizer {
    /// The configuration the served checkpoints were trained with:
    /// 88 keys, 32 velocity buckets, 10240+1 tokens of context.
    pub fn standard() -> Self {
        Tokenizer::new(88, 32, 10241)
    }

    pub fn new(n_pitch: u8, n_velocity: u8, token_seq_len: usize) -> Self {
        Tokenizer { vocab: Vocabulary::new(n_pitch, n_velocity), token_seq_len }
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Fixed sequence length used for padding, and the context bound of
    /// the scoring model.
    pub fn token_seq_len(&self) -> usize {
        self.token_seq_len
    }

    /// Quantize a raw MIDI velocity (0..=127) to a bucket.
    pub fn velocity_bucket(&self, velocity: u8) -> u8 {
        let n = u16::from(self.vocab.n_velocity());
        ((u16::from(velocity.min(127)) * n) / 128) as u8
    }

    /// Midpoint velocity of a bucket (inverse of `velocity_bucket` up
    /// to bucket resolution).
    pub fn bucket_velocity(&self, bucket: u8) -> u8 {
        let step = 128 / u16::from(self.vocab.n_velocity());
        (u16::from(bucket) * step + step / 2).min(127) as u8
    }

    /// Convert a piano-roll into a token sequence.
    ///
    /// With `pad`, the result is right-padded with `End` filler (or
    /// truncated) to exactly `token_seq_len` tokens; padding holds the
    /// frame position flat, and the real length is recoverable as the
    /// index of the first `End` plus one.
    pub fn tokenize(&self, pr: &Pianoroll, pad: bool) -> Result<Vec<Token>, TokenError> {
        let duration = pr.duration();
        // Events grouped by frame. Notes are already (onset, pitch)
        // sorted, so onset lists come out in ascending pitch order.
        let mut onsets: BTreeMap<u32, Vec<(u8, u8)>> = BTreeMap::new();
        let mut releases: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
        for note in pr.notes() {
            if note.pitch >= self.vocab.n_pitch() {
                return Err(TokenError::UnknownToken(Token::Pitch { pitch: note.pitch }));
            }
            onsets
                .entry(note.onset)
                .or_default()
                .push((note.pitch, self.velocity_bucket(note.velocity)));
            // A release on the final frame boundary stays implicit; End
            // closes it on the way back.
            if note.end() < duration {
                releases.entry(note.end()).or_default().push(note.pitch);
            }
        }
        for frame_releases in releases.values_mut() {
            frame_releases.sort_unstable();
        }

        let mut tokens = vec![Token::Start];
        for frame in 0..duration {
            if frame > 0 {
                tokens.push(Token::NextFrame);
            }
            if let Some(pitches) = releases.get(&frame) {
                for &pitch in pitches {
                    tokens.push(Token::Off { pitch });
                }
            }
            if let Some(events) = onsets.get(&frame) {
                for &(pitch, bucket) in events {
                    tokens.push(Token::Pitch { pitch });
                    tokens.push(Token::Velocity { bucket });
                }
            }
        }
        tokens.push(Token::End);

        if pad {
            tokens.truncate(self.token_seq_len);
            tokens.resize(self.token_seq_len, Token::End);
        }
        Ok(tokens)
    }

    /// The frame-position sequence for a token sequence: one value per
    /// token. With `infer_next_frame`, one extra speculative value is
    /// appended: the position the next, not-yet-generated token will
    /// occupy.
    pub fn get_frame_indices(&self, tokens: &[Token], infer_next_frame: bool) -> Vec<u32> {
        let mut positions = Vec::with_capacity(tokens.len() + usize::from(infer_next_frame));
        let mut current: u32 = 0;
        let mut after_frame_advance = false;
        for &token in tokens {
            if after_frame_advance {
                current += 1;
            }
            positions.push(current);
            after_frame_advance = token.advances_frame();
        }
        if infer_next_frame {
            if after_frame_advance {
                current += 1;
            }
            positions.push(current);
        }
        positions
    }

    /// Reconstruct a piano-roll from a token sequence.
    ///
    /// Total: generated sequences are grammar-legal by construction, so
    /// ill-formed input (an unpaired Pitch or Velocity, an Off for a
    /// silent key) is skipped rather than reported. Keys still sounding
    /// when the sequence ends are closed at the final frame boundary.
    pub fn detokenize(&self, tokens: &[Token]) -> Pianoroll {
        let mut frame: u32 = 0;
        let mut saw_event = false;
        // key -> (onset frame, velocity)
        let mut sounding: BTreeMap<u8, (u32, u8)> = BTreeMap::new();
        let mut pending_pitch: Option<u8> = None;
        let mut notes: Vec<Note> = Vec::new();

        for &token in tokens {
            match token {
                Token::Start => {}
                Token::End => break,
                Token::NextFrame => {
                    frame += 1;
                    saw_event = true;
                    pending_pitch = None;
                }
                Token::Pitch { pitch } => {
                    pending_pitch = Some(pitch);
                }
                Token::Velocity { bucket } => {
                    if let Some(pitch) = pending_pitch.take() {
                        saw_event = true;
                        // A re-struck key ends the sounding note first.
                        if let Some((onset, velocity)) = sounding.remove(&pitch) {
                            notes.push(Note {
                                onset,
                                duration: frame.saturating_sub(onset).max(1),
                                pitch,
                                velocity,
                            });
                        }
                        sounding.insert(pitch, (frame, self.bucket_velocity(bucket)));
                    }
                }
                Token::Off { pitch } => {
                    pending_pitch = None;
                    if let Some((onset, velocity)) = sounding.remove(&pitch) {
                        saw_event = true;
                        notes.push(Note {
                            onset,
                            duration: frame.saturating_sub(onset).max(1),
                            pitch,
                            velocity,
                        });
                    }
                }
            }
        }

        if !saw_event && sounding.is_empty() {
            return Pianoroll::empty();
        }
        let duration = frame + 1;
        for (pitch, (onset, velocity)) in sounding {
            notes.push(Note {
                onset,
                duration: duration.saturating_sub(onset).max(1),
                pitch,
                velocity,
            });
        }
        Pianoroll::from_notes(notes).with_duration(duration)
    }
}
