// Continuo piano-roll crate.
//
// The piano-roll is the data contract between the generation core and
// everything around it: prompts come in as piano-rolls, generated
// continuations go out as piano-rolls, and MIDI is derived from them at
// the edges. Time is quantized to a fixed frame grid (32 frames per
// 4/4 bar), the positional resolution the whole system shares.
//
// - pianoroll.rs: Note/Pianoroll types and frame-grid queries
// - midi.rs: Standard MIDI File input/output via `midly`
//
// The piano-roll is the source of truth. MIDI is derived from it,
// never the other way around.

pub mod midi;
pub mod pianoroll;
