//! End-to-end coverage of the six scenarios in spec.md §8, driven entirely
//! through the public crate API (compile → lower → render), the way
//! `phonon`'s `tests/test_e2e_audio_rendering.rs` exercises its own
//! pipeline end to end.

use std::sync::{Arc, Mutex};

use timbre::engine::{render_program, RenderConfig};
use timbre::error::Diagnostic;
use timbre::sink::Sink;

#[derive(Clone)]
struct MemSink(Arc<Mutex<Vec<i16>>>);

impl MemSink {
    fn new() -> (Self, Arc<Mutex<Vec<i16>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        (Self(buf.clone()), buf)
    }
}

impl Sink for MemSink {
    fn open(&mut self, _channels: u16, _sample_rate: &mut u32) -> Result<(), Diagnostic> {
        Ok(())
    }
    fn write(&mut self, frames: &[i16]) -> Result<(), Diagnostic> {
        self.0.lock().unwrap().extend_from_slice(frames);
        Ok(())
    }
    fn close(&mut self) -> Result<(), Diagnostic> {
        Ok(())
    }
}

fn render(script: &str, sample_rate: u32, max_frames: Option<u64>) -> (timbre::Program, Vec<i16>) {
    let (program, diags) = timbre::compile_str(script);
    assert!(diags.is_empty(), "unexpected warnings: {:?}", diags.warnings);
    let (sink, buf) = MemSink::new();
    let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(sink)];
    let config = RenderConfig { sample_rate, max_frames };
    render_program(&program, config, &mut sinks).unwrap();
    let frames = buf.lock().unwrap().clone();
    (program, frames)
}

/// Scenario 1: single sine beep, 440 Hz, 1 s, amp 0.5.
#[test]
fn scenario_1_single_sine_beep() {
    let (program, frames) = render("W sin f 440 t 1000 a 0.5", 44_100, None);
    assert_eq!(program.voice_count, 1);
    assert_eq!(program.operator_count, 1);
    assert_eq!(frames.len(), 44_100 * 2);
    let peak = frames.iter().map(|&s| s.unsigned_abs()).max().unwrap();
    assert!(peak <= 16_384, "peak {peak} should not exceed half-scale for amp 0.5");
    for pair in frames.chunks_exact(2) {
        assert_eq!(pair[0], pair[1], "pan 0 should yield equal channels");
    }
}

/// Scenario 2: two-op FM, carrier 200Hz/500ms modulated by a ratio-2
/// operator; expect two operators in one voice and carrier time preserved.
#[test]
fn scenario_2_two_op_fm() {
    let (program, frames) = render("W sin f 200 t 500 f!{ W sin f 50 r 2 a 0.8 }", 44_100, None);
    assert_eq!(program.voice_count, 1);
    assert_eq!(program.operator_count, 2);
    assert_eq!(frames.len() / 2, 22_050);

    let carrier = program.events[0].operator_update.as_ref().unwrap();
    assert_eq!(carrier.time_ms, Some(500));
    let modulator = program.events[1].operator_update.as_ref().unwrap();
    assert!(modulator.is_ratio, "`r 2` marks the modulator's frequency as a ratio to its parent carrier");
    assert_eq!(modulator.freq, 2.0);

    // Audible sideband structure: FM against a silent carrier-only render
    // changes the signal (a crude proxy for "spectral centroid > 200 Hz"
    // without pulling in an FFT dependency for this one assertion).
    let (_plain, plain_frames) = render("W sin f 200 t 500", 44_100, None);
    assert_ne!(frames, plain_frames, "FM should audibly differ from the unmodulated carrier");
}

/// Scenario 3: duration grouping — two program events with voice duration
/// 200ms then 300ms, total program length 500ms, voice id reused.
#[test]
fn scenario_3_duration_grouping() {
    let (program, frames) = render("W sin f 300 t 200 | W sin f 400 t 300", 1000, None);
    assert_eq!(program.events.len(), 2);
    assert_eq!(program.events[1].wait_ms, 200);
    let v0 = program.events[0].voice_update.as_ref().unwrap().voice_id;
    let v1 = program.events[1].voice_update.as_ref().unwrap().voice_id;
    assert_eq!(v0, v1, "voice slot should be reused across the duration scope boundary");
    assert_eq!(frames.len() / 2, 500, "total program length should be 500ms at 1kHz");
}

/// Scenario 4: label reference override — at t=500ms, op 0's amp changes
/// to 0.25 with no other parameter in the change mask.
#[test]
fn scenario_4_label_reference_override() {
    let (program, _frames) = render("'a W sin f 440 t 1000 / 500 :a a 0.25", 44_100, None);
    assert_eq!(program.events.len(), 2);
    let second = &program.events[1];
    assert_eq!(second.wait_ms, 500);
    let op = second.operator_update.as_ref().unwrap();
    assert_eq!(op.op_id.0, 0);
    assert_eq!(op.amp, 0.25);
    assert_eq!(op.changed, timbre::ast::opflag::AMP);
}

/// Scenario 5: pan law — hard right at 1kHz leaves the left channel at
/// zero and the right channel at full amplitude for all 100 samples.
#[test]
fn scenario_5_pan_law() {
    let (_program, frames) = render("W sin f 440 c R t 100", 1000, None);
    assert_eq!(frames.len(), 200);
    for pair in frames.chunks_exact(2) {
        assert_eq!(pair[0], 0, "left channel must be silent when panned hard right");
    }
    let any_sound = frames.chunks_exact(2).any(|p| p[1] != 0);
    assert!(any_sound, "right channel should carry the full signal");
}

/// Scenario 6: an infinite-time carrier with a finite (1s) phase
/// modulator keeps rendering past the modulator's lifetime; capped here
/// by `max_frames` since there is no sink-close signal in a unit test.
#[test]
fn scenario_6_infinite_carrier_outlives_finite_modulator() {
    let (program, frames) = render(
        "W sin f 300 t inf p!{ W sin f 5 t 1000 }",
        8_000,
        Some(16_000),
    );
    assert_eq!(program.operator_count, 2);
    assert_eq!(frames.len() / 2, 16_000);
    // Still producing non-silent output well past the modulator's 1s life.
    let tail = &frames[frames.len() - 2000..];
    assert!(tail.iter().any(|&s| s != 0), "carrier should keep sounding after its modulator finishes");
}
