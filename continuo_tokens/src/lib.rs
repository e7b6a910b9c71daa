// Continuo token crate: the symbolic-event layer of the generator.
//
// A piece of music becomes a flat sequence of discrete events: note
// onsets (pitch + velocity bucket), note releases, frame advances, and
// the start/end markers. This crate owns that mapping in both
// directions plus the sampling policies that turn a scoring model's
// output distribution into the next concrete event.
//
// - token.rs: the Token sum type and the event grammar (which token may
//   follow which)
// - vocab.rs: dense, deterministic token <-> index bijection
// - tokenizer.rs: piano-roll -> tokens, tokens -> piano-roll, and the
//   frame-position sequence fed to the scoring model
// - sampling.rs: nucleus / top-k sampling under the grammar mask
//
// The token sequence is the source of truth during generation; the
// piano-roll is recovered from it only at the very end.

pub mod sampling;
pub mod token;
pub mod tokenizer;
pub mod vocab;
