// The token sum type and the event grammar.
//
// One token is one discrete musical event. A note onset is the adjacent
// pair Pitch{p} then Velocity{b}; Off{p} releases a sounding pitch.
// NextFrame advances the time grid by one frame. Start opens a sequence
// and End closes it; padding (when requested) is repeated End.
//
// Releases that land exactly on the piece's final frame boundary are
// not written as Off tokens; End closes whatever is still sounding.
//
// The grammar below is the complete legality relation used to mask the
// model's output distribution before sampling. It is an exhaustive
// match over a closed enum, so a new token kind cannot be added without
// the compiler pointing here.

use serde::{Deserialize, Serialize};

/// One discrete musical event in the generation vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Token {
    /// Sequence-begin marker. Only ever the first token.
    Start,
    /// Sequence terminator (and padding filler).
    End,
    /// Advance the time grid by one frame.
    NextFrame,
    /// First half of a note onset: which key. Must be completed by a
    /// Velocity token.
    Pitch { pitch: u8 },
    /// Second half of a note onset: quantized loudness bucket.
    Velocity { bucket: u8 },
    /// Release of a sounding key.
    Off { pitch: u8 },
}

impl Token {
    /// Whether `self` may legally follow `last`.
    ///
    /// The full relation:
    /// - nothing follows `End`;
    /// - `Velocity` follows `Pitch`, and only `Velocity` does;
    /// - `Start` never follows anything (it is never sampled);
    /// - everywhere else a new event may begin: `Pitch`, `Off`,
    ///   `NextFrame` or `End` are all legal. `End` directly after
    ///   `Start` is allowed: a promptless request may legally produce
    ///   the empty piece.
    pub fn may_follow(self, last: Token) -> bool {
        match last {
            Token::End => false,
            Token::Pitch { .. } => matches!(self, Token::Velocity { .. }),
            Token::Start | Token::NextFrame | Token::Velocity { .. } | Token::Off { .. } => {
                !matches!(self, Token::Start | Token::Velocity { .. })
            }
        }
    }

    /// True for the frame-advance token.
    pub fn advances_frame(self) -> bool {
        matches!(self, Token::NextFrame)
    }

    /// True for the sequence terminator.
    pub fn is_end(self) -> bool {
        matches!(self, Token::End)
    }
}
