// Sampling policies: turning model logits into the next event.
//
// The pipeline is the same for both policies:
//   stable softmax -> grammar mask -> renormalize -> restrict -> draw.
// The grammar mask zeroes every token that may not follow the previous
// one (token.rs); if nothing legal keeps probability mass, the
// distribution is degenerate and the request fails; that means either
// a grammar bug or a malformed prompt, not something to paper over.
//
// Nucleus keeps the smallest descending-probability prefix reaching
// cumulative mass p; top-k keeps the k most probable legal entries.
// Ties order by ascending vocabulary index so the candidate set is
// deterministic for a given distribution.

use crate::token::Token;
use crate::tokenizer::Tokenizer;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which policy turns the distribution into a concrete token.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SamplingMethod {
    /// Top-p: smallest high-probability prefix with cumulative mass >= p.
    Nucleus { p: f64 },
    /// The k highest-probability legal entries.
    TopK { k: usize },
}

/// No legal next-token candidate kept any probability mass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleError {
    DegenerateDistribution,
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleError::DegenerateDistribution => {
                write!(f, "no legal next-token candidates remain after grammar masking")
            }
        }
    }
}

impl std::error::Error for SampleError {}

impl Tokenizer {
    /// Sample the next token from raw logits, under the event grammar.
    ///
    /// `last` is the previously emitted token; only tokens that may
    /// legally follow it keep probability mass. Logits are normalized
    /// with the max-subtraction softmax, so arbitrarily large inputs
    /// stay finite.
    pub fn sample_from_logits(
        &self,
        logits: &[f32],
        last: Token,
        method: SamplingMethod,
        rng: &mut impl Rng,
    ) -> Result<Token, SampleError> {
        // Legal candidates with their raw logits, in vocabulary order.
        let mut candidates: Vec<(usize, Token, f64)> = self
            .vocab()
            .tokens()
            .enumerate()
            .filter(|&(_, token)| token.may_follow(last))
            .filter_map(|(idx, token)| logits.get(idx).map(|&l| (idx, token, f64::from(l))))
            .collect();
        if candidates.is_empty() {
            return Err(SampleError::DegenerateDistribution);
        }

        // Softmax over the legal entries (masking before normalizing is
        // equivalent to normalizing then renormalizing the legal mass).
        let max_logit = candidates.iter().map(|&(_, _, l)| l).fold(f64::NEG_INFINITY, f64::max);
        let mut total = 0.0;
        for entry in &mut candidates {
            entry.2 = (entry.2 - max_logit).exp();
            total += entry.2;
        }
        if !total.is_finite() || total <= 0.0 {
            return Err(SampleError::DegenerateDistribution);
        }

        // Descending probability, ties by ascending vocabulary index.
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));

        let kept = match method {
            SamplingMethod::TopK { k } => {
                if k == 0 {
                    return Err(SampleError::DegenerateDistribution);
                }
                &candidates[..k.min(candidates.len())]
            }
            SamplingMethod::Nucleus { p } => {
                let threshold = p.clamp(0.0, 1.0) * total;
                let mut cumulative = 0.0;
                let mut cut = candidates.len();
                for (i, &(_, _, mass)) in candidates.iter().enumerate() {
                    cumulative += mass;
                    if cumulative >= threshold {
                        cut = i + 1;
                        break;
                    }
                }
                &candidates[..cut]
            }
        };

        let kept_total: f64 = kept.iter().map(|&(_, _, mass)| mass).sum();
        if !kept_total.is_finite() || kept_total <= 0.0 {
            return Err(SampleError::DegenerateDistribution);
        }

        // Proportional draw by cumulative walk.
        let r = rng.random::<f64>() * kept_total;
        let mut cumulative = 0.0;
        for &(_, token, mass) in kept {
            cumulative += mass;
            if cumulative > r {
                return Ok(token);
            }
        }
        Ok(kept[kept.len() - 1].1)
    }
}
