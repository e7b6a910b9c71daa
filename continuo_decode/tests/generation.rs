// End-to-end tests of the decode loop with stubbed collaborators.
//
// The scoring model is replaced by stubs (always-terminate, always
// advance, scripted) and the thermal sensor by a cold fake, so every
// behavior of the loop itself (termination, budgets, zero-budget
// short-circuit, error propagation) is observable without a real
// network or GPU.

use continuo_decode::generate::{Budget, GenerateError, generate, generate_tokens};
use continuo_decode::governor::{SensorError, TempSensor, ThermalGovernor};
use continuo_decode::model::{ModelError, ScoringModel};
use continuo_roll::pianoroll::{Note, Pianoroll};
use continuo_tokens::sampling::SamplingMethod;
use continuo_tokens::token::Token;
use continuo_tokens::tokenizer::Tokenizer;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::atomic::{AtomicUsize, Ordering};

struct ColdSensor;

impl TempSensor for ColdSensor {
    fn read_temp(&self) -> Result<f32, SensorError> {
        Ok(25.0)
    }
}

fn cold_governor() -> ThermalGovernor<ColdSensor> {
    ThermalGovernor::new(ColdSensor, 64.0, 3.0)
}

/// Always puts all probability mass on one vocabulary index.
struct BiasedModel {
    favored: usize,
    vocab_size: usize,
    calls: AtomicUsize,
}

impl BiasedModel {
    fn favoring(tokenizer: &Tokenizer, token: Token) -> Self {
        BiasedModel {
            favored: tokenizer.vocab().get_idx(token).unwrap(),
            vocab_size: tokenizer.vocab().size(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl ScoringModel for BiasedModel {
    fn forward(&self, indices: &[u32], positions: &[u32]) -> Result<Vec<Vec<f32>>, ModelError> {
        assert_eq!(indices.len(), positions.len(), "core must feed equal-length sequences");
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut row = vec![-10.0; self.vocab_size];
        row[self.favored] = 10.0;
        Ok(vec![row; indices.len()])
    }
}

/// Plays back a fixed token script, then favors End.
struct ScriptedModel {
    script: Vec<usize>,
    base_len: usize,
    end_idx: usize,
    vocab_size: usize,
}

impl ScriptedModel {
    fn new(tokenizer: &Tokenizer, base_len: usize, script: &[Token]) -> Self {
        ScriptedModel {
            script: script
                .iter()
                .map(|&t| tokenizer.vocab().get_idx(t).unwrap())
                .collect(),
            base_len,
            end_idx: tokenizer.vocab().get_idx(Token::End).unwrap(),
            vocab_size: tokenizer.vocab().size(),
        }
    }
}

impl ScoringModel for ScriptedModel {
    fn forward(&self, indices: &[u32], _positions: &[u32]) -> Result<Vec<Vec<f32>>, ModelError> {
        let step = indices.len() - self.base_len;
        let favored = self.script.get(step).copied().unwrap_or(self.end_idx);
        let mut row = vec![-10.0; self.vocab_size];
        row[favored] = 10.0;
        Ok(vec![row; indices.len()])
    }
}

fn tokenizer() -> Tokenizer {
    Tokenizer::new(88, 32, 512)
}

fn prompt_roll(tokenizer: &Tokenizer) -> Pianoroll {
    // Bucket-midpoint velocities so the prompt survives the round trip
    // byte-for-byte, and a trailing silent frame so every release is an
    // explicit event (a note still sounding at the end of the prompt
    // would, correctly, sustain into the continuation).
    let vel = tokenizer.bucket_velocity(16);
    Pianoroll::from_notes(vec![
        Note { onset: 0, duration: 2, pitch: 39, velocity: vel },
        Note { onset: 2, duration: 1, pitch: 43, velocity: vel },
    ])
    .with_duration(4)
}

#[test]
fn end_biased_model_terminates_after_one_iteration() {
    let tk = tokenizer();
    let model = BiasedModel::favoring(&tk, Token::End);
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(1);

    let tokens = generate_tokens(
        &model,
        &governor,
        &tk,
        None,
        Budget::Tokens(100),
        SamplingMethod::Nucleus { p: 0.9 },
        &mut rng,
    )
    .unwrap();
    assert_eq!(tokens, vec![Token::Start, Token::End]);
    assert_eq!(model.calls(), 1, "the loop must stop on End, not run out the budget");
}

#[test]
fn promptless_end_is_the_empty_piece() {
    let tk = tokenizer();
    let model = BiasedModel::favoring(&tk, Token::End);
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(2);

    let pr = generate(
        &model,
        &governor,
        &tk,
        None,
        Budget::Tokens(100),
        SamplingMethod::TopK { k: 5 },
        &mut rng,
    )
    .unwrap();
    assert!(pr.is_empty());
    assert_eq!(pr.duration(), 0);
}

#[test]
fn frame_budget_produces_exactly_that_many_frames() {
    let tk = tokenizer();
    let model = BiasedModel::favoring(&tk, Token::NextFrame);
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(3);

    let tokens = generate_tokens(
        &model,
        &governor,
        &tk,
        None,
        Budget::Frames(4),
        SamplingMethod::Nucleus { p: 0.9 },
        &mut rng,
    )
    .unwrap();
    let frames = tokens.iter().filter(|t| t.advances_frame()).count();
    assert_eq!(frames, 4);
    assert_eq!(tokens.len(), 5, "Start plus exactly four NextFrame tokens");
    assert_eq!(model.calls(), 4);
}

#[test]
fn token_budget_bounds_the_iteration_count() {
    let tk = tokenizer();
    let model = BiasedModel::favoring(&tk, Token::NextFrame);
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(4);

    let tokens = generate_tokens(
        &model,
        &governor,
        &tk,
        None,
        Budget::Tokens(7),
        SamplingMethod::TopK { k: 3 },
        &mut rng,
    )
    .unwrap();
    assert_eq!(tokens.len(), 8); // Start + 7 sampled
    assert_eq!(model.calls(), 7);
}

#[test]
fn zero_token_budget_never_touches_the_model() {
    let tk = tokenizer();
    let model = BiasedModel::favoring(&tk, Token::NextFrame);
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(5);
    let prompt = prompt_roll(&tk);

    let pr = generate(
        &model,
        &governor,
        &tk,
        Some(&prompt),
        Budget::Tokens(0),
        SamplingMethod::Nucleus { p: 0.9 },
        &mut rng,
    )
    .unwrap();
    assert_eq!(model.calls(), 0);
    assert_eq!(pr, prompt);
}

#[test]
fn zero_frame_budget_never_touches_the_model() {
    let tk = tokenizer();
    let model = BiasedModel::favoring(&tk, Token::NextFrame);
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(6);
    let prompt = prompt_roll(&tk);

    let pr = generate(
        &model,
        &governor,
        &tk,
        Some(&prompt),
        Budget::Frames(0),
        SamplingMethod::TopK { k: 2 },
        &mut rng,
    )
    .unwrap();
    assert_eq!(model.calls(), 0);
    assert_eq!(pr, prompt);
}

#[test]
fn prompt_continuation_keeps_the_prompt() {
    let tk = tokenizer();
    let model = BiasedModel::favoring(&tk, Token::NextFrame);
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(7);
    let prompt = prompt_roll(&tk);

    let pr = generate(
        &model,
        &governor,
        &tk,
        Some(&prompt),
        Budget::Frames(2),
        SamplingMethod::Nucleus { p: 0.9 },
        &mut rng,
    )
    .unwrap();
    assert_eq!(pr.notes(), prompt.notes());
    assert_eq!(pr.duration(), prompt.duration() + 2);
}

#[test]
fn scripted_model_composes_a_note() {
    let tk = tokenizer();
    let script = [
        Token::Pitch { pitch: 39 },
        Token::Velocity { bucket: 20 },
        Token::NextFrame,
        Token::NextFrame,
        Token::Off { pitch: 39 },
        Token::End,
    ];
    let model = ScriptedModel::new(&tk, 1, &script);
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(8);

    let pr = generate(
        &model,
        &governor,
        &tk,
        None,
        Budget::Tokens(100),
        SamplingMethod::TopK { k: 1 },
        &mut rng,
    )
    .unwrap();
    assert_eq!(
        pr.notes(),
        &[Note { onset: 0, duration: 2, pitch: 39, velocity: tk.bucket_velocity(20) }]
    );
    assert_eq!(pr.duration(), 3);
}

#[test]
fn generated_positions_follow_the_frame_rule() {
    let tk = tokenizer();
    let script = [
        Token::Pitch { pitch: 10 },
        Token::Velocity { bucket: 5 },
        Token::NextFrame,
        Token::Pitch { pitch: 12 },
        Token::Velocity { bucket: 5 },
        Token::End,
    ];
    let model = ScriptedModel::new(&tk, 1, &script);
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(9);

    let tokens = generate_tokens(
        &model,
        &governor,
        &tk,
        None,
        Budget::Tokens(100),
        SamplingMethod::TopK { k: 1 },
        &mut rng,
    )
    .unwrap();
    let positions = tk.get_frame_indices(&tokens, false);
    assert_eq!(positions, vec![0, 0, 0, 0, 1, 1, 1]);
}

#[test]
fn context_cap_stops_a_runaway_frame_budget() {
    let tk = Tokenizer::new(88, 32, 16);
    let model = BiasedModel::favoring(&tk, Token::NextFrame);
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(10);

    let tokens = generate_tokens(
        &model,
        &governor,
        &tk,
        None,
        Budget::Frames(10_000),
        SamplingMethod::TopK { k: 1 },
        &mut rng,
    )
    .unwrap();
    assert_eq!(tokens.len(), 16, "generation must stop at the context bound");
}

#[test]
fn nan_logits_are_fatal() {
    struct NanModel {
        vocab_size: usize,
    }
    impl ScoringModel for NanModel {
        fn forward(&self, indices: &[u32], _: &[u32]) -> Result<Vec<Vec<f32>>, ModelError> {
            Ok(vec![vec![f32::NAN; self.vocab_size]; indices.len()])
        }
    }

    let tk = tokenizer();
    let model = NanModel { vocab_size: tk.vocab().size() };
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(11);

    let err = generate(
        &model,
        &governor,
        &tk,
        None,
        Budget::Tokens(10),
        SamplingMethod::Nucleus { p: 0.9 },
        &mut rng,
    )
    .unwrap_err();
    assert_eq!(err, GenerateError::Model(ModelError::InvalidLogits));
}

#[test]
fn shape_mismatch_is_fatal() {
    struct TruncatedModel {
        vocab_size: usize,
    }
    impl ScoringModel for TruncatedModel {
        fn forward(&self, _: &[u32], _: &[u32]) -> Result<Vec<Vec<f32>>, ModelError> {
            // One row short, as a caching bug would produce.
            Ok(vec![vec![0.0; self.vocab_size]])
        }
    }

    let tk = tokenizer();
    let model = TruncatedModel { vocab_size: tk.vocab().size() };
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(12);
    let prompt = prompt_roll(&tk);

    let err = generate(
        &model,
        &governor,
        &tk,
        Some(&prompt),
        Budget::Tokens(10),
        SamplingMethod::TopK { k: 5 },
        &mut rng,
    )
    .unwrap_err();
    assert!(matches!(err, GenerateError::Model(ModelError::ShapeMismatch { .. })));
}

#[test]
fn backend_failure_propagates_unretried() {
    struct FailingModel {
        calls: AtomicUsize,
    }
    impl ScoringModel for FailingModel {
        fn forward(&self, _: &[u32], _: &[u32]) -> Result<Vec<Vec<f32>>, ModelError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(ModelError::Backend("device lost".into()))
        }
    }

    let tk = tokenizer();
    let model = FailingModel { calls: AtomicUsize::new(0) };
    let governor = cold_governor();
    let mut rng = StdRng::seed_from_u64(13);

    let err = generate(
        &model,
        &governor,
        &tk,
        None,
        Budget::Tokens(10),
        SamplingMethod::Nucleus { p: 0.9 },
        &mut rng,
    )
    .unwrap_err();
    assert_eq!(err, GenerateError::Model(ModelError::Backend("device lost".into())));
    assert_eq!(model.calls.load(Ordering::Relaxed), 1, "model failures are never retried");
}

#[test]
fn hot_sensor_pauses_then_generation_completes() {
    use std::sync::Mutex;
    use std::time::Duration;

    struct CoolingSensor {
        readings: Mutex<Vec<f32>>,
    }
    impl TempSensor for CoolingSensor {
        fn read_temp(&self) -> Result<f32, SensorError> {
            let mut readings = self.readings.lock().unwrap();
            if readings.len() > 1 { Ok(readings.pop().unwrap()) } else { Ok(readings[0]) }
        }
    }

    let tk = tokenizer();
    let model = BiasedModel::favoring(&tk, Token::NextFrame);
    let sensor = CoolingSensor { readings: Mutex::new(vec![40.0, 58.0, 66.0, 70.0]) };
    let governor =
        ThermalGovernor::new(sensor, 64.0, 3.0).with_poll_interval(Duration::from_millis(1));
    let mut rng = StdRng::seed_from_u64(14);

    let pr = generate(
        &model,
        &governor,
        &tk,
        None,
        Budget::Frames(3),
        SamplingMethod::TopK { k: 1 },
        &mut rng,
    )
    .unwrap();
    assert_eq!(pr.duration(), 4);
    assert_eq!(model.calls(), 3);
}
