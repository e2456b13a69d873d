//! Block rendering (spec.md §4.6, "Rendering a block"): the recursive
//! `run_op` walk that turns one operator's modulator subtree into samples,
//! and the voice mixdown/panning that turns a block of voices into
//! interleaved stereo int16.
//!
//! Grounded in shape on `phonon::block_processor::BlockProcessor`'s
//! topological "gather inputs, process node, store output" loop, adapted
//! from a DAG of independent nodes to `timbre`'s recursive modulator trees
//! (each operator's fmods/pmods/amods are rendered depth-first per call
//! rather than scheduled once for a whole graph).

use crate::engine::oscillator;
use crate::engine::state::EngineState;
use crate::program::{OpId, VoiceId};

/// Recursively renders one operator's block into `acc`.
///
/// `parent_freq` is the enclosing carrier's per-sample frequency buffer,
/// used when this operator is in ratio mode; `None` for a voice's
/// top-level carriers. `acc_ind` distinguishes the first contributor to a
/// shared accumulator (store) from later ones (mix in): additive for tone
/// output, multiplicative for envelope output. `wave_env` renders a
/// unipolar `[0,1]` modulation envelope instead of a signed tone.
pub fn run_op(
    engine: &mut EngineState,
    op_id: OpId,
    parent_freq: Option<&[f64]>,
    acc: &mut [f64],
    acc_ind: usize,
    wave_env: bool,
) {
    let len = acc.len();

    // Step 1: silence prefix. A block straddling the end of a silence
    // prefix renders as pure silence; the tone resumes on the next block.
    let silence = engine.operators[op_id.0 as usize].residual_silence_samples;
    if silence > 0 {
        if acc_ind == 0 {
            for s in acc.iter_mut() {
                *s = 0.0;
            }
        }
        let consumed = (len as i64).min(silence) as usize;
        decrement(engine, op_id, consumed);
        return;
    }

    // Step 2: clip the block to whatever time remains.
    let residual = engine.operators[op_id.0 as usize].residual_time_samples;
    let active_len = if residual == crate::engine::state::SAMPLES_INF {
        len
    } else {
        len.min(residual.max(0) as usize)
    };

    let sample_rate = engine.sample_rate as f64;
    let is_ratio = engine.operators[op_id.0 as usize].is_ratio;
    let base_freq = engine.operators[op_id.0 as usize].freq;
    let dynfreq = engine.operators[op_id.0 as usize].dynfreq;

    // Step 3: per-sample frequency buffer.
    let mut freq_buf = engine.scratch.acquire(len);
    if let Some(ramp) = engine.operators[op_id.0 as usize].freq_ramp.as_mut() {
        for i in 0..active_len {
            let v = ramp.step(sample_rate);
            freq_buf[i] = if is_ratio {
                v * parent_freq.map(|p| p[i]).unwrap_or(1.0)
            } else {
                v
            };
        }
        if ramp.is_finished() {
            engine.operators[op_id.0 as usize].freq_ramp = None;
        }
    } else {
        for i in 0..active_len {
            freq_buf[i] = if is_ratio {
                base_freq * parent_freq.map(|p| p[i]).unwrap_or(1.0)
            } else {
                base_freq
            };
        }
    }

    let fmods = engine.operators[op_id.0 as usize].fmods.clone();
    if !fmods.is_empty() {
        for &fmod in &fmods {
            let mut fm_buf = engine.scratch.acquire(len);
            run_op(engine, fmod, Some(&freq_buf), &mut fm_buf, 0, true);
            for i in 0..active_len {
                let parent_component = if is_ratio { parent_freq.map(|p| p[i]).unwrap_or(1.0) } else { 1.0 };
                let target = dynfreq.unwrap_or(freq_buf[i]) * parent_component;
                freq_buf[i] += (target - freq_buf[i]) * fm_buf[i];
            }
            engine.scratch.release(fm_buf);
        }
    }

    // Step 4: phase-offset buffer from pmods (additive sum of envelopes).
    let pmods = engine.operators[op_id.0 as usize].pmods.clone();
    let mut phase_offset = engine.scratch.acquire(len);
    for &pmod in &pmods {
        let mut pm_buf = engine.scratch.acquire(len);
        run_op(engine, pmod, Some(&freq_buf), &mut pm_buf, 0, true);
        for i in 0..active_len {
            phase_offset[i] += pm_buf[i];
        }
        engine.scratch.release(pm_buf);
    }

    if wave_env {
        // Step 6: float [0,1] envelope.
        let wave = engine.operators[op_id.0 as usize].wave;
        let mut phase = engine.operators[op_id.0 as usize].phase;
        for i in 0..active_len {
            let env = (oscillator::sample(wave, phase + phase_offset[i]) + 1.0) * 0.5;
            if acc_ind == 0 {
                acc[i] = env;
            } else {
                acc[i] *= env;
            }
            phase = oscillator::advance(phase, freq_buf[i], sample_rate);
        }
        engine.operators[op_id.0 as usize].phase = phase;
    } else {
        // Step 5: per-sample amplitude, then generate signed samples.
        let amods = engine.operators[op_id.0 as usize].amods.clone();
        let base_amp = engine.operators[op_id.0 as usize].amp;
        let dynamp = engine.operators[op_id.0 as usize].dynamp;
        let mut amp_buf = engine.scratch.acquire(len);
        if !amods.is_empty() {
            for i in 0..active_len {
                amp_buf[i] = base_amp;
            }
            for &amod in &amods {
                let mut am_buf = engine.scratch.acquire(len);
                run_op(engine, amod, Some(&freq_buf), &mut am_buf, 0, true);
                for i in 0..active_len {
                    let target = dynamp.unwrap_or(amp_buf[i]);
                    amp_buf[i] += am_buf[i] * (target - amp_buf[i]);
                }
                engine.scratch.release(am_buf);
            }
        } else if let Some(ramp) = engine.operators[op_id.0 as usize].amp_ramp.as_mut() {
            for i in 0..active_len {
                amp_buf[i] = ramp.step(sample_rate);
            }
            if ramp.is_finished() {
                engine.operators[op_id.0 as usize].amp_ramp = None;
            }
        } else {
            for i in 0..active_len {
                amp_buf[i] = base_amp;
            }
        }

        let wave = engine.operators[op_id.0 as usize].wave;
        let mut phase = engine.operators[op_id.0 as usize].phase;
        const SCALE: f64 = 32767.0;
        for i in 0..active_len {
            let s = oscillator::sample(wave, phase + phase_offset[i]) * amp_buf[i] * SCALE;
            if acc_ind == 0 {
                acc[i] = s;
            } else {
                acc[i] += s;
            }
            phase = oscillator::advance(phase, freq_buf[i], sample_rate);
        }
        engine.operators[op_id.0 as usize].phase = phase;
        engine.scratch.release(amp_buf);
    }

    engine.scratch.release(freq_buf);
    engine.scratch.release(phase_offset);

    // Step 7: advance residual time; zero-fill the tail once finished.
    decrement(engine, op_id, active_len);
    if active_len < len && acc_ind == 0 {
        for s in acc[active_len..].iter_mut() {
            *s = 0.0;
        }
    }
}

fn decrement(engine: &mut EngineState, op_id: OpId, samples: usize) {
    let state = &mut engine.operators[op_id.0 as usize];
    if state.residual_time_samples != crate::engine::state::SAMPLES_INF {
        state.residual_time_samples = (state.residual_time_samples - samples as i64).max(0);
    }
    state.residual_silence_samples = (state.residual_silence_samples - samples as i64).max(0);
}

/// Renders and mixes down every active voice for one block, returning the
/// interleaved stereo samples (still `f64`, int16-scaled; the caller
/// quantizes on write). `AMP_DIV_VOICES` divides each voice's mono sample
/// by the total voice count before panning (spec.md §4.6 "Voice mixdown").
pub fn render_block(
    engine: &mut EngineState,
    len: usize,
    amp_div_voices: bool,
) -> Vec<f64> {
    let mut stereo = vec![0.0f64; len * 2];
    let voice_count = engine.voices.len().max(1) as f64;
    for vi in 0..engine.voices.len() {
        let voice_id = VoiceId(vi as u32);
        if engine.voice_finished(voice_id) {
            continue;
        }
        let carriers = engine.voices[vi].carriers.clone();
        if carriers.is_empty() {
            continue;
        }
        let mut mono = engine.scratch.acquire(len);
        for (i, &carrier) in carriers.iter().enumerate() {
            run_op(engine, carrier, None, &mut mono, i, false);
        }

        let pan = engine.voices[vi].pan;
        let pan_ramp_active = engine.voices[vi].pan_ramp.is_some();
        let sample_rate = engine.sample_rate as f64;
        for i in 0..len {
            let mut s = mono[i];
            if amp_div_voices {
                s /= voice_count;
            }
            let p = if pan_ramp_active {
                engine.voices[vi].pan_ramp.as_mut().unwrap().step(sample_rate)
            } else {
                pan
            };
            let right = (s * (p + 1.0) / 2.0).round();
            let left = s - right;
            stereo[i * 2] += left;
            stereo[i * 2 + 1] += right;
        }
        if pan_ramp_active && engine.voices[vi].pan_ramp.as_ref().unwrap().is_finished() {
            engine.voices[vi].pan_ramp = None;
        }
        engine.scratch.release(mono);
    }
    stereo
}
