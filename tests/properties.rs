//! Property tests for the invariants in spec.md §8, generated with
//! `proptest` the way `sonido-core`/`sonido-effects` test their own DSP
//! invariants (SPEC_FULL.md §9.4).

use proptest::prelude::*;
use timbre::ast::opflag;

fn finite_freq() -> impl Strategy<Value = f64> {
    20.0f64..4000.0
}

fn finite_amp() -> impl Strategy<Value = f64> {
    0.0f64..1.0
}

fn finite_pan() -> impl Strategy<Value = f64> {
    -1.0f64..1.0
}

fn finite_time_ms() -> impl Strategy<Value = i64> {
    1i64..2000
}

/// A single-voice, single-carrier script with randomized parameters —
/// small enough to stay well-typed for every generated combination.
fn single_voice_script(freq: f64, amp: f64, pan: f64, time_ms: i64) -> String {
    format!("W sin f {freq} a {amp} c {pan} t {time_ms}")
}

proptest! {
    /// Every operator id referenced by a graph/adjacency is `< operator_count`,
    /// every voice id is `< voice_count`, and each program event carries at
    /// most one operator_update (spec.md §8 "Invariants").
    #[test]
    fn ids_stay_in_bounds_and_updates_are_singular(
        freq in finite_freq(), amp in finite_amp(), pan in finite_pan(), time_ms in finite_time_ms(),
    ) {
        let script = single_voice_script(freq, amp, pan, time_ms);
        let (program, diags) = timbre::compile_str(&script);
        prop_assert!(diags.is_empty());
        for event in &program.events {
            if let Some(vu) = &event.voice_update {
                prop_assert!(vu.voice_id.0 < program.voice_count);
                for &op in &vu.carriers {
                    prop_assert!(op.0 < program.operator_count);
                }
            }
            if let Some(ou) = &event.operator_update {
                prop_assert!(ou.op_id.0 < program.operator_count);
                for &op in ou.fmods.iter().chain(&ou.pmods).chain(&ou.amods) {
                    prop_assert!(op.0 < program.operator_count);
                }
            }
            // "at most one operator update per event" is a structural
            // invariant of `ProgramEvent` itself (a single `Option` field),
            // so it holds by construction; nothing further to assert.
            prop_assert!(event.wait_ms >= 0);
        }
    }

    /// Cumulative `wait_ms` across the whole event list is monotonic
    /// non-decreasing (every individual wait is non-negative).
    #[test]
    fn wait_ms_sum_is_monotonic(
        freq in finite_freq(), amp in finite_amp(), pan in finite_pan(), time_ms in finite_time_ms(),
    ) {
        let script = single_voice_script(freq, amp, pan, time_ms);
        let (program, _diags) = timbre::compile_str(&script);
        let mut running = 0i64;
        for event in &program.events {
            prop_assert!(event.wait_ms >= 0);
            let next = running + event.wait_ms;
            prop_assert!(next >= running);
            running = next;
        }
    }

    /// Panning law: rendering a single carrier with an explicit pan, the
    /// interleaved stereo frames sum back to the mono signal exactly
    /// (spec.md §8 "left + right == s bit-exact at every sample") — checked
    /// here one level up, on the raw f64 accumulator before int16 quantization.
    #[test]
    fn panning_law_holds_before_quantization(
        pan in finite_pan(), amp in finite_amp(),
    ) {
        use timbre::engine::render::run_op;
        use timbre::engine::state::EngineState;

        let script = format!("W sin f 440 a {amp} c {pan} t 100");
        let (program, diags) = timbre::compile_str(&script);
        prop_assert!(diags.is_empty());

        let mut engine = EngineState::new(program.voice_count, program.operator_count, 44_100);
        for event in &program.events {
            if let Some(vu) = &event.voice_update {
                engine.voices[vu.voice_id.0 as usize].apply(vu);
            }
            if let Some(ou) = &event.operator_update {
                engine.operators[ou.op_id.0 as usize].apply(ou, 44_100.0);
            }
        }

        let len = 64;
        let mut mono = vec![0.0f64; len];
        run_op(&mut engine, timbre::program::OpId(0), None, &mut mono, 0, false);
        let p = engine.voices[0].pan;
        for &s in &mono {
            let right = (s * (p + 1.0) / 2.0).round();
            let left = s - right;
            prop_assert!((left + right - s).abs() < 1e-9);
        }
    }
}

/// Changed-field masks never set bits the script didn't actually touch —
/// spot check with a concrete script rather than a generator, since the
/// mask vocabulary (`opflag`) is a small closed set.
#[test]
fn label_override_mask_is_exactly_what_was_overridden() {
    let (program, diags) = timbre::compile_str("'a W sin f 440 t 1000 / 10 :a a 0.9 p 0.25");
    assert!(diags.is_empty());
    let update = program.events[1].operator_update.as_ref().unwrap();
    assert_eq!(update.changed, opflag::AMP | opflag::PHASE);
}
