//! Per-operator and per-voice runtime state (spec.md §4.6, "State per
//! operator" / "State per voice"), plus the scratch buffer pool recursive
//! modulation renders into.
//!
//! Grounded on `phonon::buffer_pool::BufferPool`: same acquire/release
//! pool shape, simplified to single-threaded `Vec`-backed storage since
//! the engine has no concurrency (spec.md §5).

use crate::ast::{TimeMs, WaveKind, TIME_INF};
use crate::engine::ramp::RampState;
use crate::program::{opflag, voiceflag, OpId, OperatorUpdate, VoiceUpdate};

/// `TIME_INF` expressed in samples rather than milliseconds.
pub const SAMPLES_INF: i64 = i64::MAX;

fn ms_to_samples_or_inf(ms: TimeMs, sample_rate: f64) -> i64 {
    if ms == TIME_INF {
        SAMPLES_INF
    } else {
        (ms as f64 * 1e-3 * sample_rate).round() as i64
    }
}

#[derive(Debug, Clone)]
pub struct OperatorState {
    pub wave: WaveKind,
    pub freq: f64,
    pub is_ratio: bool,
    pub dynfreq: Option<f64>,
    /// Running oscillator phase, advanced every sample; only reset by an
    /// update that explicitly touches `opflag::PHASE`.
    pub phase: f64,
    pub amp: f64,
    pub dynamp: Option<f64>,
    pub freq_ramp: Option<RampState>,
    pub amp_ramp: Option<RampState>,
    pub fmods: Vec<OpId>,
    pub pmods: Vec<OpId>,
    pub amods: Vec<OpId>,
    pub residual_time_samples: i64,
    pub residual_silence_samples: i64,
}

impl Default for OperatorState {
    fn default() -> Self {
        Self {
            wave: WaveKind::Sine,
            freq: 100.0,
            is_ratio: false,
            dynfreq: None,
            phase: 0.0,
            amp: 1.0,
            dynamp: None,
            freq_ramp: None,
            amp_ramp: None,
            fmods: Vec::new(),
            pmods: Vec::new(),
            amods: Vec::new(),
            residual_time_samples: 0,
            residual_silence_samples: 0,
        }
    }
}

impl OperatorState {
    pub fn is_finished(&self) -> bool {
        self.residual_time_samples == 0
    }

    /// Applies a lowered update (spec.md §4.6 "Executing an event", step 3):
    /// merge changed fields, replace adjacency wholesale if present, reset
    /// residual time/silence only if time was set, and never reset phase
    /// unless phase was explicitly set (regardless of whether wave changed).
    pub fn apply(&mut self, update: &OperatorUpdate, sample_rate: f64) {
        if update.changed & opflag::WAVE != 0 {
            self.wave = update.wave;
        }
        let old_freq = self.freq;
        if update.changed & opflag::FREQ != 0 {
            self.freq = update.freq;
            self.is_ratio = update.is_ratio;
        }
        if update.changed & opflag::DYNFREQ != 0 {
            self.dynfreq = update.dynfreq;
        }
        if update.changed & opflag::PHASE != 0 {
            self.phase = update.phase.rem_euclid(1.0);
        }
        let old_amp = self.amp;
        if update.changed & opflag::AMP != 0 {
            self.amp = update.amp;
        }
        if update.changed & opflag::DYNAMP != 0 {
            self.dynamp = update.dynamp;
        }
        if update.changed & opflag::ADJACENCY != 0 {
            self.fmods = update.fmods.clone();
            self.pmods = update.pmods.clone();
            self.amods = update.amods.clone();
        }
        if update.changed & opflag::TIME != 0 {
            self.residual_time_samples = ms_to_samples_or_inf(update.time_ms.unwrap_or(TIME_INF), sample_rate);
            self.residual_silence_samples = ms_to_samples_or_inf(update.silence_ms, sample_rate);
        }
        if update.changed & opflag::FREQ_RAMP != 0 {
            self.freq_ramp = update.freq_ramp.as_ref().map(|r| RampState::start(old_freq, r));
        }
        if update.changed & opflag::AMP_RAMP != 0 {
            self.amp_ramp = update.amp_ramp.as_ref().map(|r| RampState::start(old_amp, r));
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VoiceState {
    pub pan: f64,
    pub pan_ramp: Option<RampState>,
    pub carriers: Vec<OpId>,
}

impl VoiceState {
    pub fn apply(&mut self, update: &VoiceUpdate) {
        if update.changed & voiceflag::PAN != 0 {
            self.pan = update.pan;
        }
        if update.changed & voiceflag::PAN_RAMP != 0 {
            self.pan_ramp = update.pan_ramp.as_ref().map(|r| RampState::start(self.pan, r));
        }
        if update.changed & voiceflag::GRAPH != 0 {
            self.carriers = update.carriers.clone();
        }
    }
}

/// A stack of reusable scratch buffers for recursive modulator rendering
/// (spec.md §4.6, "Buffer depth"). Sized lazily: deeper recursion just
/// grows the pool once, after which every subsequent block reuses it.
#[derive(Debug, Default)]
pub struct ScratchPool {
    free: Vec<Vec<f64>>,
}

impl ScratchPool {
    pub fn acquire(&mut self, len: usize) -> Vec<f64> {
        match self.free.pop() {
            Some(mut buf) => {
                buf.clear();
                buf.resize(len, 0.0);
                buf
            }
            None => vec![0.0; len],
        }
    }

    pub fn release(&mut self, buf: Vec<f64>) {
        self.free.push(buf);
    }
}

/// All mutable synthesis state for one program render: every operator and
/// voice slot the lowerer's tables allocated, plus shared scratch space.
pub struct EngineState {
    pub operators: Vec<OperatorState>,
    pub voices: Vec<VoiceState>,
    pub sample_rate: u32,
    pub scratch: ScratchPool,
}

impl EngineState {
    pub fn new(voice_count: u32, operator_count: u32, sample_rate: u32) -> Self {
        Self {
            operators: vec![OperatorState::default(); operator_count as usize],
            voices: vec![VoiceState::default(); voice_count as usize],
            sample_rate,
            scratch: ScratchPool::default(),
        }
    }

    /// A voice is finished when every carrier in its graph has finished
    /// (spec.md §4.6): an empty carrier list also counts as finished.
    pub fn voice_finished(&self, voice_id: crate::program::VoiceId) -> bool {
        let voice = &self.voices[voice_id.0 as usize];
        voice
            .carriers
            .iter()
            .all(|c| self.operators[c.0 as usize].is_finished())
    }

    pub fn any_voice_active(&self) -> bool {
        (0..self.voices.len()).any(|i| !self.voice_finished(crate::program::VoiceId(i as u32)))
    }
}
