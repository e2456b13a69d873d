//! The lowered program (spec.md §3 "Program event (post-lowering)", §4.5):
//! a flat, timed sequence of at-most-one-operator-update events over a
//! fixed voice/operator table, with stable integer IDs instead of the
//! parse tree's arena references.

use crate::ast::{Ramp, TimeMs, WaveKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(pub u32);

/// Which fields an update actually touches; re-exported from `ast` so the
/// lowerer and engine share one vocabulary for "changed" bits.
pub use crate::ast::{opflag, voiceflag};

/// A full replacement of an operator's static parameters, as produced by
/// the lowerer merging parse-tree fields with `on_prev` inheritance
/// already resolved (the engine never walks `on_prev` chains itself).
#[derive(Debug, Clone)]
pub struct OperatorUpdate {
    pub op_id: OpId,
    pub changed: u16,
    pub wave: WaveKind,
    pub time_ms: Option<TimeMs>,
    pub silence_ms: TimeMs,
    pub freq: f64,
    pub is_ratio: bool,
    pub dynfreq: Option<f64>,
    pub phase: f64,
    pub amp: f64,
    pub dynamp: Option<f64>,
    pub freq_ramp: Option<Ramp>,
    pub amp_ramp: Option<Ramp>,
    /// Present (possibly empty) exactly when `changed & opflag::ADJACENCY`;
    /// gives the full replacement adjacency for this operator's mods.
    pub fmods: Vec<OpId>,
    pub pmods: Vec<OpId>,
    pub amods: Vec<OpId>,
}

#[derive(Debug, Clone)]
pub struct VoiceUpdate {
    pub voice_id: VoiceId,
    pub changed: u16,
    pub pan: f64,
    pub pan_ramp: Option<Ramp>,
    /// Present exactly when `changed & voiceflag::GRAPH`: the voice's full
    /// top-level carrier list.
    pub carriers: Vec<OpId>,
}

/// One immutable, timed instruction to the engine (spec.md §3).
#[derive(Debug, Clone)]
pub struct ProgramEvent {
    pub wait_ms: TimeMs,
    pub voice_update: Option<VoiceUpdate>,
    pub operator_update: Option<OperatorUpdate>,
}

/// The complete lowered output for one script (spec.md §4.5).
#[derive(Debug, Default)]
pub struct Program {
    pub events: Vec<ProgramEvent>,
    pub voice_count: u32,
    pub operator_count: u32,
    pub name: Option<String>,
    /// Set when the script never explicitly overrode amplitude scaling;
    /// the engine then divides carrier amplitude by voice count.
    pub amp_div_voices: bool,
}

impl Program {
    pub fn total_wait_ms(&self) -> i64 {
        self.events.iter().map(|e| e.wait_ms).sum()
    }
}
