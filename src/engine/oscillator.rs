//! Waveform generators (spec.md §4.6): a phase in `[0,1)` to a sample in
//! `[-1,1]`, and the phase-accumulator advance used between samples.

use crate::ast::WaveKind;

pub fn sample(wave: WaveKind, phase: f64) -> f64 {
    let p = phase.rem_euclid(1.0);
    match wave {
        WaveKind::Sine => (std::f64::consts::TAU * p).sin(),
        WaveKind::Square => {
            if p < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        WaveKind::Triangle => 4.0 * (p - (p + 0.5).floor()).abs() - 1.0,
        WaveKind::Sawtooth => 2.0 * p - 1.0,
    }
}

/// Advances a running phase accumulator by one sample at `freq` Hz.
pub fn advance(phase: f64, freq: f64, sample_rate: f64) -> f64 {
    (phase + freq / sample_rate).rem_euclid(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_starts_at_zero_and_peaks_at_quarter_phase() {
        assert!((sample(WaveKind::Sine, 0.0) - 0.0).abs() < 1e-9);
        assert!((sample(WaveKind::Sine, 0.25) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn square_flips_sign_at_midpoint() {
        assert_eq!(sample(WaveKind::Square, 0.1), 1.0);
        assert_eq!(sample(WaveKind::Square, 0.6), -1.0);
    }

    #[test]
    fn triangle_peaks_at_quarter_and_three_quarter_phase() {
        assert!((sample(WaveKind::Triangle, 0.0) - (-1.0)).abs() < 1e-9);
        assert!((sample(WaveKind::Triangle, 0.5) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sawtooth_ramps_from_negative_to_positive_one() {
        assert!((sample(WaveKind::Sawtooth, 0.0) - (-1.0)).abs() < 1e-9);
        assert!((sample(WaveKind::Sawtooth, 0.999_999) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn advance_wraps_past_one() {
        let p = advance(0.9, 4410.0, 44100.0);
        assert!((p - 0.0).abs() < 1e-9);
    }
}
