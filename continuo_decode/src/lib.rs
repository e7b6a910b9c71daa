// Continuo decode crate: the generation control loop.
//
// One generation request is a strictly sequential loop: pace against
// the thermal governor, score the running sequence with the model, turn
// the final distribution into the next event under the sampling policy,
// update the token/index/position bookkeeping, and stop on the
// terminator or a budget. Everything stateful lives on the request's
// own stack; the only shared pieces are the governor and the model
// weights, both behind `&`.
//
// - model.rs: the opaque scoring-model capability and its failure modes
// - governor.rs: thermal backpressure (block while the GPU runs hot)
// - generate.rs: the decode state machine and the `generate` entry
//   point the serving layer calls into
//
// The scoring model is a capability, not a base class: anything that
// maps (indices, positions) to per-position logits can drive the loop.

pub mod generate;
pub mod governor;
pub mod model;
