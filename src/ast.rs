//! Parse-tree data model (spec.md §3): operator nodes, voice nodes, and
//! the ramps ("valits") that can drive freq/amp/pan.
//!
//! Nodes live in a flat arena and reference each other by index rather than
//! by owning pointer, so parameter-inheritance back-edges (`on_prev`,
//! `voice_prev`) and modulator-tree down-edges are both just integers
//! (design note in spec.md §9, "Cyclic references").

use crate::symtab::Symbol;

pub type TimeMs = i64;

/// Sentinel meaning "runs until the enclosing scope finishes" (spec.md §3).
pub const TIME_INF: TimeMs = i64::MAX;

pub fn is_time_inf(t: TimeMs) -> bool {
    t == TIME_INF
}

/// Converts a finite millisecond duration to a sample count.
pub fn ms_to_samples(ms: TimeMs, sample_rate: f64) -> u64 {
    debug_assert!(!is_time_inf(ms));
    (ms as f64 * 1e-3 * sample_rate).round() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveKind {
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

impl WaveKind {
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "sin" => Some(WaveKind::Sine),
            "sqr" => Some(WaveKind::Square),
            "tri" => Some(WaveKind::Triangle),
            "saw" => Some(WaveKind::Sawtooth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampShape {
    Linear,
    Exponential,
    Logarithmic,
    Sinusoidal,
}

/// A parameter ramp ("valit"): interpolates toward `target` over
/// `duration_ms`, following `shape` (spec.md §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    pub target: f64,
    pub duration_ms: TimeMs,
    pub shape: RampShape,
}

/// Arena index for an `OperatorNode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Which fields of an `OperatorNode`/`VoiceNode` a given event actually
/// changes (spec.md §3, "changed-params bitmask"). A freshly-defined node
/// (no `on_prev`/`voice_prev`) always carries `ALL`; a `:label` reference
/// only carries the bits for parameters the script explicitly overrode —
/// the rest are inherited by leaving the already-allocated slot alone.
pub mod opflag {
    pub const WAVE: u16 = 1 << 0;
    pub const TIME: u16 = 1 << 1;
    pub const SILENCE: u16 = 1 << 2;
    pub const FREQ: u16 = 1 << 3;
    pub const DYNFREQ: u16 = 1 << 4;
    pub const PHASE: u16 = 1 << 5;
    pub const AMP: u16 = 1 << 6;
    pub const DYNAMP: u16 = 1 << 7;
    pub const FREQ_RAMP: u16 = 1 << 8;
    pub const AMP_RAMP: u16 = 1 << 9;
    pub const ADJACENCY: u16 = 1 << 10;
    pub const ALL: u16 = (1 << 11) - 1;
}

pub mod voiceflag {
    pub const PAN: u16 = 1 << 0;
    pub const PAN_RAMP: u16 = 1 << 1;
    pub const GRAPH: u16 = 1 << 2;
    pub const ALL: u16 = (1 << 3) - 1;
}

#[derive(Debug, Clone)]
pub struct OperatorNode {
    pub wave: WaveKind,
    /// `None` until the timing passes fill it in (spec.md §4.4 "Timing
    /// passes"); `Some(TIME_INF)` is the explicit infinite sentinel.
    pub time_ms: Option<TimeMs>,
    pub time_explicit: bool,
    pub silence_ms: TimeMs,
    /// Base frequency in Hz, or a ratio to the parent carrier's
    /// instantaneous frequency when `is_ratio` is set.
    pub freq: f64,
    pub is_ratio: bool,
    pub dynfreq: Option<f64>,
    /// Wrapped into `[0, 1)`.
    pub phase: f64,
    pub amp: f64,
    pub dynamp: Option<f64>,
    pub freq_ramp: Option<Ramp>,
    pub amp_ramp: Option<Ramp>,
    pub fmods: Vec<NodeId>,
    pub pmods: Vec<NodeId>,
    pub amods: Vec<NodeId>,
    /// Set by a `:label` reference: inherit parameters from this earlier
    /// node before applying whatever this node overrides.
    pub on_prev: Option<NodeId>,
    pub label: Option<Symbol>,
    /// Created via `E` rather than `W`: a unit-gain modulator carrier.
    pub is_envelope: bool,
    /// Which fields above were actually set by this event; see `opflag`.
    pub changed: u16,
}

impl OperatorNode {
    pub fn defaults() -> Self {
        Self {
            wave: WaveKind::Sine,
            time_ms: None,
            time_explicit: false,
            silence_ms: 0,
            freq: 100.0,
            is_ratio: false,
            // Mirrors the static value until a `param!` sets a distinct
            // dynamic target; a bare `param!{ ... }` modulator sublist
            // attaches without disturbing it (spec.md §4.6 FM/AM mix formula).
            dynfreq: Some(100.0),
            phase: 0.0,
            amp: 1.0,
            dynamp: Some(1.0),
            freq_ramp: None,
            amp_ramp: None,
            fmods: Vec::new(),
            pmods: Vec::new(),
            amods: Vec::new(),
            on_prev: None,
            label: None,
            is_envelope: false,
            changed: opflag::ALL,
        }
    }

    /// A node created from a `:label` reference: inherits everything from
    /// `prev` except what the event goes on to explicitly override.
    pub fn inheriting(prev: NodeId) -> Self {
        let mut n = Self::defaults();
        n.on_prev = Some(prev);
        n.changed = 0;
        n
    }
}

/// A timed event carrying a voice's top-level carriers (spec.md §3).
#[derive(Debug, Clone)]
pub struct VoiceNode {
    pub wait_ms: TimeMs,
    pub pan: f64,
    pub pan_ramp: Option<Ramp>,
    pub carriers: Vec<NodeId>,
    /// Set when a top-level `:label` names a *root* operator (one that was
    /// itself a voice's top-level carrier): the index, in `ParseTree::events`,
    /// of the event that owns that voice. Lets the lowerer reuse that
    /// voice's id instead of the free-slot search when this event also
    /// introduces new top-level carriers (spec.md §3, §4.5).
    pub voice_prev: Option<usize>,
    pub changed: u16,
}

impl VoiceNode {
    pub fn defaults() -> Self {
        Self {
            wait_ms: 0,
            pan: 0.0,
            pan_ramp: None,
            carriers: Vec::new(),
            voice_prev: None,
            changed: voiceflag::ALL,
        }
    }
}

/// Owns every `OperatorNode` produced while parsing one script.
#[derive(Debug, Default)]
pub struct Arena {
    operators: Vec<OperatorNode>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, node: OperatorNode) -> NodeId {
        let id = NodeId(self.operators.len() as u32);
        self.operators.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &OperatorNode {
        &self.operators[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut OperatorNode {
        &mut self.operators[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

/// The complete parse result for a script: every operator in one arena,
/// the flat, timed sequence of voice events that reference into it, and
/// the event indices where each `|`-delimited duration scope begins.
#[derive(Debug, Default)]
pub struct ParseTree {
    pub arena: Arena,
    pub events: Vec<VoiceNode>,
    pub scope_starts: Vec<usize>,
}
