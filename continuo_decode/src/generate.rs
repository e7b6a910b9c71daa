// The decode state machine: INITIALIZING -> STEPPING -> TERMINATED.
//
// INITIALIZING builds the running token/index/position sequences from
// the prompt (or a bare Start). Each STEPPING iteration: governor
// clearance, one forward pass over the whole growing sequence, sample
// the next event under the grammar mask, append to all three sequences,
// then check the stop conditions, terminator first, then the budget.
// TERMINATED hands the full sequence to the tokenizer's detokenize.
//
// The forward pass recomputes the full sequence every iteration; any
// incremental caching is the model's business, not the loop's.
//
// A zero budget never touches the model: the result is the prompt,
// round-tripped through the tokenizer.

use continuo_roll::pianoroll::Pianoroll;
use continuo_tokens::sampling::{SampleError, SamplingMethod};
use continuo_tokens::token::Token;
use continuo_tokens::tokenizer::Tokenizer;
use continuo_tokens::vocab::TokenError;
use rand::Rng;
use std::fmt;

use crate::governor::{TempSensor, ThermalGovernor};
use crate::model::{ModelError, ScoringModel};

/// How much to generate: a fixed number of decode iterations, or music
/// until this many frames have been produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Tokens(usize),
    Frames(u32),
}

/// Any failure of one generation request. All of these surface to the
/// caller; none are retried internally.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateError {
    Token(TokenError),
    Sample(SampleError),
    Model(ModelError),
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::Token(e) => write!(f, "tokenization failed: {e}"),
            GenerateError::Sample(e) => write!(f, "sampling failed: {e}"),
            GenerateError::Model(e) => write!(f, "model invocation failed: {e}"),
        }
    }
}

impl std::error::Error for GenerateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GenerateError::Token(e) => Some(e),
            GenerateError::Sample(e) => Some(e),
            GenerateError::Model(e) => Some(e),
        }
    }
}

impl From<TokenError> for GenerateError {
    fn from(e: TokenError) -> Self {
        GenerateError::Token(e)
    }
}

impl From<SampleError> for GenerateError {
    fn from(e: SampleError) -> Self {
        GenerateError::Sample(e)
    }
}

impl From<ModelError> for GenerateError {
    fn from(e: ModelError) -> Self {
        GenerateError::Model(e)
    }
}

/// Generate a continuation and return it as a piano-roll.
///
/// This is the sole entry point the serving layer calls into.
pub fn generate<M: ScoringModel, S: TempSensor>(
    model: &M,
    governor: &ThermalGovernor<S>,
    tokenizer: &Tokenizer,
    prompt: Option<&Pianoroll>,
    budget: Budget,
    method: SamplingMethod,
    rng: &mut impl Rng,
) -> Result<Pianoroll, GenerateError> {
    let tokens = generate_tokens(model, governor, tokenizer, prompt, budget, method, rng)?;
    Ok(tokenizer.detokenize(&tokens))
}

/// The decode loop itself, returning the raw token sequence (prompt
/// tokens included).
pub fn generate_tokens<M: ScoringModel, S: TempSensor>(
    model: &M,
    governor: &ThermalGovernor<S>,
    tokenizer: &Tokenizer,
    prompt: Option<&Pianoroll>,
    budget: Budget,
    method: SamplingMethod,
    rng: &mut impl Rng,
) -> Result<Vec<Token>, GenerateError> {
    // INITIALIZING
    let mut tokens = match prompt {
        Some(pr) => {
            let mut tokens = tokenizer.tokenize(pr, false)?;
            // The prompt's terminator would stop generation before it
            // starts; the continuation grows where it stood.
            if tokens.last() == Some(&Token::End) {
                tokens.pop();
            }
            tokens
        }
        None => vec![Token::Start],
    };
    let mut indices = tokenizer.vocab().tokens_to_indices(&tokens)?;
    let mut positions = tokenizer.get_frame_indices(&tokens, true);
    // The speculative slot is the position the next sampled token will
    // occupy. Correct no matter which token arrives, since a token's
    // position depends only on its predecessor.
    let mut next_position = positions.pop().unwrap_or(0);
    let mut last = *tokens.last().unwrap_or(&Token::Start);

    let vocab_size = tokenizer.vocab().size();
    let mut frames_generated: u32 = 0;
    let mut steps: usize = 0;

    // STEPPING
    while !budget_exhausted(budget, steps, frames_generated)
        && tokens.len() < tokenizer.token_seq_len()
    {
        governor.cooldown();

        let rows = model.forward(&indices, &positions)?;
        let row = validate_logits(&rows, indices.len(), vocab_size)?;
        let token = tokenizer.sample_from_logits(row, last, method, rng)?;

        tokens.push(token);
        indices.push(tokenizer.vocab().get_idx(token)? as u32);
        positions.push(next_position);
        if token.advances_frame() {
            next_position += 1;
            frames_generated += 1;
        }
        last = token;
        steps += 1;

        if token.is_end() {
            break;
        }
    }

    // TERMINATED
    Ok(tokens)
}

fn budget_exhausted(budget: Budget, steps: usize, frames_generated: u32) -> bool {
    match budget {
        Budget::Tokens(limit) => steps >= limit,
        Budget::Frames(limit) => frames_generated >= limit,
    }
}

/// Shape-check the model output and return the final row.
fn validate_logits(
    rows: &[Vec<f32>],
    seq_len: usize,
    vocab_size: usize,
) -> Result<&[f32], ModelError> {
    let last_row_len = rows.last().map_or(0, Vec::len);
    if rows.len() != seq_len || last_row_len != vocab_size {
        return Err(ModelError::ShapeMismatch {
            expected: (seq_len, vocab_size),
            got: (rows.len(), last_row_len),
        });
    }
    let row = &rows[rows.len() - 1];
    if row.iter().any(|v| v.is_nan()) {
        return Err(ModelError::InvalidLogits);
    }
    Ok(row)
}
