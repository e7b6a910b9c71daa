// Dense token <-> index bijection.
//
// The vocabulary is closed: every token variant across its configured
// payload range gets exactly one index, and indices are dense in
// 0..size with no gaps. Construction is purely arithmetic over
// (n_pitch, n_velocity), so two vocabularies built with the same
// parameters always agree, which is the consistency a trained
// checkpoint depends on.
//
// Canonical index order: Start, End, NextFrame, Pitch 0..n_pitch,
// Velocity 0..n_velocity, Off 0..n_pitch.

use crate::token::Token;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors from token/index lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// A token's payload falls outside the configured ranges.
    UnknownToken(Token),
    /// An index at or beyond the vocabulary size.
    IndexOutOfRange { idx: usize, vocab_size: usize },
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::UnknownToken(token) => {
                write!(f, "token {token:?} is outside the configured vocabulary")
            }
            TokenError::IndexOutOfRange { idx, vocab_size } => {
                write!(f, "index {idx} out of range for vocabulary of size {vocab_size}")
            }
        }
    }
}

impl std::error::Error for TokenError {}

/// The closed set of tokens and their dense integer indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    n_pitch: u8,
    n_velocity: u8,
}

// Marker tokens occupy the first three indices.
const IDX_START: usize = 0;
const IDX_END: usize = 1;
const IDX_NEXT_FRAME: usize = 2;
const N_MARKERS: usize = 3;

impl Vocabulary {
    /// Build the vocabulary for `n_pitch` keys and `n_velocity` loudness
    /// buckets. The standard configuration is (88, 32).
    pub fn new(n_pitch: u8, n_velocity: u8) -> Self {
        Vocabulary { n_pitch, n_velocity }
    }

    /// Number of distinct tokens (the model's output dimensionality).
    pub fn size(&self) -> usize {
        N_MARKERS + 2 * usize::from(self.n_pitch) + usize::from(self.n_velocity)
    }

    /// Number of keys.
    pub fn n_pitch(&self) -> u8 {
        self.n_pitch
    }

    /// Number of velocity buckets.
    pub fn n_velocity(&self) -> u8 {
        self.n_velocity
    }

    /// Look up a token's index.
    pub fn get_idx(&self, token: Token) -> Result<usize, TokenError> {
        let pitch_base = N_MARKERS;
        let velocity_base = pitch_base + usize::from(self.n_pitch);
        let off_base = velocity_base + usize::from(self.n_velocity);
        match token {
            Token::Start => Ok(IDX_START),
            Token::End => Ok(IDX_END),
            Token::NextFrame => Ok(IDX_NEXT_FRAME),
            Token::Pitch { pitch } if pitch < self.n_pitch => {
                Ok(pitch_base + usize::from(pitch))
            }
            Token::Velocity { bucket } if bucket < self.n_velocity => {
                Ok(velocity_base + usize::from(bucket))
            }
            Token::Off { pitch } if pitch < self.n_pitch => Ok(off_base + usize::from(pitch)),
            Token::Pitch { .. } | Token::Velocity { .. } | Token::Off { .. } => {
                Err(TokenError::UnknownToken(token))
            }
        }
    }

    /// Map a whole token sequence to indices.
    pub fn tokens_to_indices(&self, tokens: &[Token]) -> Result<Vec<u32>, TokenError> {
        tokens
            .iter()
            .map(|&t| self.get_idx(t).map(|idx| idx as u32))
            .collect()
    }

    /// Inverse lookup: index to token.
    pub fn index_to_token(&self, idx: usize) -> Result<Token, TokenError> {
        let pitch_base = N_MARKERS;
        let velocity_base = pitch_base + usize::from(self.n_pitch);
        let off_base = velocity_base + usize::from(self.n_velocity);
        match idx {
            IDX_START => Ok(Token::Start),
            IDX_END => Ok(Token::End),
            IDX_NEXT_FRAME => Ok(Token::NextFrame),
            _ if idx < velocity_base => Ok(Token::Pitch { pitch: (idx - pitch_base) as u8 }),
            _ if idx < off_base => Ok(Token::Velocity { bucket: (idx - velocity_base) as u8 }),
            _ if idx < self.size() => Ok(Token::Off { pitch: (idx - off_base) as u8 }),
            _ => Err(TokenError::IndexOutOfRange { idx, vocab_size: self.size() }),
        }
    }

    /// All tokens in canonical index order. `tokens().nth(i)` is the
    /// token at index `i`.
    pub fn tokens(&self) -> impl Iterator<Item = Token> {
        let n_pitch = self.n_pitch;
        let n_velocity = self.n_velocity;
        [Token::Start, Token::End, Token::NextFrame]
            .into_iter()
            .chain((0..n_pitch).map(|pitch| Token::Pitch { pitch }))
            .chain((0..n_velocity).map(|bucket| Token::Velocity { bucket }))
            .chain((0..n_pitch).map(|pitch| Token::Off { pitch }))
    }
}
