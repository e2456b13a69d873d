//! Synthesis engine (spec.md §4.6): drives a lowered [`crate::program::Program`]
//! block by block, applying timed updates and writing interleaved stereo
//! PCM to one or more [`crate::sink::Sink`]s.
//!
//! Submodules: [`oscillator`] (waveform generators), [`ramp`] (valit
//! interpolation), [`state`] (per-operator/per-voice runtime state and the
//! scratch buffer pool), [`render`] (the recursive `run_op` block
//! renderer). This module owns the event-stepping driver that ties them
//! together, grounded on `phonon::render::Renderer`'s
//! config-in/stats-out shape (SPEC_FULL.md §9.3, §10).

pub mod oscillator;
pub mod ramp;
pub mod render;
pub mod state;

use crate::ast::ms_to_samples;
use crate::error::Diagnostic;
use crate::program::Program;
use crate::sink::Sink;
use crate::stats::RenderStats;
use state::EngineState;

/// Samples rendered per block; spec.md §4.6 calls for "256-1024".
pub const BLOCK_LEN: usize = 512;

/// Engine configuration, kept as an explicit struct rather than free
/// function arguments so the CLI's `clap` surface maps onto it directly
/// (SPEC_FULL.md §9.3), mirroring `phonon::render::RenderConfig`.
#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    pub sample_rate: u32,
    /// Hard cap on frames rendered, independent of program/voice
    /// completion; the only way to bound a script with a `TIME_INF`
    /// carrier when rendering to a file rather than a live device
    /// (spec.md §8 scenario 6, "renders until sink closes").
    pub max_frames: Option<u64>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            max_frames: None,
        }
    }
}

/// Renders `program` to `sinks`, returning summary statistics. Opens every
/// sink with `config.sample_rate`, which a sink may reduce in place (spec.md
/// §4.7); the engine always runs at whatever rate the *last* sink settled
/// on, since `EngineState` needs one rate for every oscillator.
pub fn render_program(
    program: &Program,
    config: RenderConfig,
    sinks: &mut [Box<dyn Sink>],
) -> Result<RenderStats, Diagnostic> {
    let mut sample_rate = config.sample_rate;
    for sink in sinks.iter_mut() {
        sink.open(2, &mut sample_rate)?;
    }
    tracing::info!(sample_rate, voices = program.voice_count, operators = program.operator_count, "render starting");

    let mut engine = EngineState::new(program.voice_count, program.operator_count, sample_rate);
    let mut all_samples: Vec<i16> = Vec::new();
    let mut frames_written: u64 = 0;

    let result = (|| -> Result<(), Diagnostic> {
        for event in &program.events {
            let wait_samples = ms_to_samples(event.wait_ms.max(0), sample_rate as f64);
            render_and_emit(
                &mut engine,
                wait_samples,
                program.amp_div_voices,
                config.max_frames,
                &mut frames_written,
                sinks,
                &mut all_samples,
            )?;
            if let Some(max) = config.max_frames {
                if frames_written >= max {
                    return Ok(());
                }
            }

            if let Some(vu) = &event.voice_update {
                tracing::debug!(voice = vu.voice_id.0, changed = vu.changed, "voice update");
                engine.voices[vu.voice_id.0 as usize].apply(vu);
            }
            if let Some(ou) = &event.operator_update {
                tracing::debug!(op = ou.op_id.0, changed = ou.changed, "operator update");
                engine.operators[ou.op_id.0 as usize].apply(ou, sample_rate as f64);
            }
        }

        // Drain whatever is still sounding once the event list is exhausted.
        while engine.any_voice_active() {
            if let Some(max) = config.max_frames {
                if frames_written >= max {
                    break;
                }
            }
            let remaining = config.max_frames.map(|m| (m - frames_written) as usize);
            let block = remaining.map(|r| r.min(BLOCK_LEN)).unwrap_or(BLOCK_LEN);
            render_and_emit(
                &mut engine,
                block as i64,
                program.amp_div_voices,
                config.max_frames,
                &mut frames_written,
                sinks,
                &mut all_samples,
            )?;
        }
        Ok(())
    })();

    for sink in sinks.iter_mut() {
        sink.close()?;
    }

    result?;
    tracing::info!(frames = frames_written, "render finished");
    Ok(RenderStats::from_samples(&all_samples, sample_rate))
}

/// Renders exactly `samples` frames (chunked into `BLOCK_LEN`-sized
/// blocks), quantizes to int16, and writes them to every sink.
#[allow(clippy::too_many_arguments)]
fn render_and_emit(
    engine: &mut EngineState,
    samples: i64,
    amp_div_voices: bool,
    max_frames: Option<u64>,
    frames_written: &mut u64,
    sinks: &mut [Box<dyn Sink>],
    accum: &mut Vec<i16>,
) -> Result<(), Diagnostic> {
    let mut remaining = samples.max(0) as u64;
    while remaining > 0 {
        if let Some(max) = max_frames {
            if *frames_written >= max {
                break;
            }
        }
        let mut this_block = remaining.min(BLOCK_LEN as u64) as usize;
        if let Some(max) = max_frames {
            this_block = this_block.min((max - *frames_written) as usize);
        }
        if this_block == 0 {
            break;
        }
        let stereo = render::render_block(engine, this_block, amp_div_voices);
        let mut frames = Vec::with_capacity(stereo.len());
        for s in stereo {
            frames.push(s.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
        }
        for sink in sinks.iter_mut() {
            sink.write(&frames)?;
        }
        accum.extend_from_slice(&frames);
        *frames_written += this_block as u64;
        remaining -= this_block as u64;
    }
    Ok(())
}
