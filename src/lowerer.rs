//! Parse tree → `Program` (spec.md §4.5).
//!
//! Two passes over the parse tree settle timing (nested-modulator time
//! inheritance, then duration-scope grouping) before the main lowering
//! walk allocates stable voice/operator IDs, merges each event's changed
//! fields into per-slot resolved state, and flattens the result into a
//! strict sequence of at-most-one-operator-update `ProgramEvent`s.

use std::collections::{HashMap, HashSet};

use crate::ast::{opflag, voiceflag, Arena, NodeId, ParseTree, Ramp, TimeMs, VoiceNode, WaveKind,
    TIME_INF};
use crate::program::{OpId, OperatorUpdate, Program, ProgramEvent, VoiceId, VoiceUpdate};

/// Resolves nested-modulator nodes' unset `time_ms` from whichever carrier
/// lists them (spec.md §4.4 "nested times default to the carrier's
/// envelope length").
fn apply_modulator_time_inheritance(arena: &mut Arena) {
    let n = arena.len();
    let mut parent_time: Vec<Option<TimeMs>> = vec![None; n];
    for i in 0..n {
        let node = arena.get(NodeId(i as u32));
        let t = node.time_ms;
        let children: Vec<NodeId> = node
            .fmods
            .iter()
            .chain(node.pmods.iter())
            .chain(node.amods.iter())
            .copied()
            .collect();
        for child in children {
            if parent_time[child.0 as usize].is_none() {
                parent_time[child.0 as usize] = t;
            }
        }
    }
    for i in 0..n {
        let node = arena.get_mut(NodeId(i as u32));
        if node.time_ms.is_none() {
            node.time_ms = Some(parent_time[i].unwrap_or(1000));
        }
    }
}

/// Groups events by `|`-delimited duration scope: unset carrier times fill
/// out to the scope's total length, and the event after the scope absorbs
/// that length as additional delay (spec.md §4.4 "Timing passes").
fn apply_duration_scopes(tree: &mut ParseTree) {
    let scope_starts = tree.scope_starts.clone();
    let total = tree.events.len();
    for (si, &start) in scope_starts.iter().enumerate() {
        let end = scope_starts.get(si + 1).copied().unwrap_or(total);
        if start >= end {
            continue;
        }
        // `cum[k]` is time elapsed since this scope's own first event, not
        // counting that first event's `wait_ms` (which is delay carried
        // over from whatever came before the scope, not internal to it).
        let mut cum = vec![0i64; end - start];
        let mut running = 0i64;
        for (k, idx) in (start..end).enumerate() {
            if k > 0 {
                running += tree.events[idx].wait_ms;
            }
            cum[k] = running;
        }
        let mut scope_length = 0i64;
        for (k, idx) in (start..end).enumerate() {
            for &carrier in &tree.events[idx].carriers {
                if let Some(t) = tree.arena.get(carrier).time_ms {
                    if t != TIME_INF {
                        scope_length = scope_length.max(cum[k] + t);
                    }
                }
            }
        }
        for (k, idx) in (start..end).enumerate() {
            let carriers = tree.events[idx].carriers.clone();
            for carrier in carriers {
                let node = tree.arena.get_mut(carrier);
                if !node.time_explicit {
                    node.time_ms = Some((scope_length - cum[k]).max(0));
                }
            }
        }
        if end < total {
            tree.events[end].wait_ms += scope_length;
        }
    }
}

#[derive(Debug, Clone)]
struct OpSlot {
    residual_ms: TimeMs,
    wave: WaveKind,
    time_ms: Option<TimeMs>,
    silence_ms: TimeMs,
    freq: f64,
    is_ratio: bool,
    dynfreq: Option<f64>,
    phase: f64,
    amp: f64,
    dynamp: Option<f64>,
    freq_ramp: Option<Ramp>,
    amp_ramp: Option<Ramp>,
    fmods: Vec<OpId>,
    pmods: Vec<OpId>,
    amods: Vec<OpId>,
}

impl Default for OpSlot {
    fn default() -> Self {
        Self {
            residual_ms: 0,
            wave: WaveKind::Sine,
            time_ms: None,
            silence_ms: 0,
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
        }
    }
}

#[derive(Debug, Clone, Default)]
struct VoiceSlot {
    residual_ms: TimeMs,
    pan: f64,
    pan_ramp: Option<Ramp>,
    carriers: Vec<OpId>,
}

struct Lowerer<'a> {
    arena: &'a Arena,
    node_to_op: HashMap<NodeId, OpId>,
    op_slots: Vec<OpSlot>,
    voice_slots: Vec<VoiceSlot>,
    last_voice_id: Option<VoiceId>,
    out_events: Vec<ProgramEvent>,
    amp_explicit_anywhere: bool,
    /// The `VoiceId` (if any) each parse-tree event in `tree.events` ended
    /// up assigned, in the same order, so a later event's `voice_prev`
    /// (an index into that same list) can be resolved by lookup rather than
    /// re-derived (spec.md §4.5, §3 "an optional reference to a previous
    /// voice event").
    event_voice: Vec<Option<VoiceId>>,
}

impl<'a> Lowerer<'a> {
    fn new(arena: &'a Arena) -> Self {
        Self {
            arena,
            node_to_op: HashMap::new(),
            op_slots: Vec::new(),
            voice_slots: Vec::new(),
            last_voice_id: None,
            out_events: Vec::new(),
            amp_explicit_anywhere: false,
            event_voice: Vec::new(),
        }
    }

    fn decrement_residuals(&mut self, wait_ms: TimeMs) {
        for slot in &mut self.voice_slots {
            if slot.residual_ms != TIME_INF {
                slot.residual_ms = (slot.residual_ms - wait_ms).max(0);
            }
        }
        for slot in &mut self.op_slots {
            if slot.residual_ms != TIME_INF {
                slot.residual_ms = (slot.residual_ms - wait_ms).max(0);
            }
        }
    }

    fn collect_depth_first(&self, id: NodeId, out: &mut Vec<NodeId>) {
        out.push(id);
        let node = self.arena.get(id);
        for &m in &node.fmods {
            self.collect_depth_first(m, out);
        }
        for &m in &node.pmods {
            self.collect_depth_first(m, out);
        }
        for &m in &node.amods {
            self.collect_depth_first(m, out);
        }
    }

    fn find_or_alloc_free_op_slot(&mut self, pending: &HashSet<OpId>) -> OpId {
        let found = (0..self.op_slots.len())
            .find(|&i| self.op_slots[i].residual_ms == 0 && !pending.contains(&OpId(i as u32)));
        match found {
            Some(i) => OpId(i as u32),
            None => {
                let id = OpId(self.op_slots.len() as u32);
                self.op_slots.push(OpSlot::default());
                id
            }
        }
    }

    fn find_or_alloc_free_voice_slot(&mut self) -> VoiceId {
        match (0..self.voice_slots.len()).find(|&i| self.voice_slots[i].residual_ms == 0) {
            Some(i) => VoiceId(i as u32),
            None => {
                let id = VoiceId(self.voice_slots.len() as u32);
                self.voice_slots.push(VoiceSlot::default());
                id
            }
        }
    }

    /// Assigns (without yet merging field state) a stable `OpId` to every
    /// node in `order` that doesn't already have one.
    fn lower_event_ids(&mut self, order: &[NodeId]) {
        let mut pending = HashSet::new();
        for &id in order {
            if self.node_to_op.contains_key(&id) {
                continue;
            }
            let node = self.arena.get(id);
            let op_id = match node.on_prev {
                Some(prev) => *self
                    .node_to_op
                    .get(&prev)
                    .expect("on_prev target resolved before its dependents"),
                None => self.find_or_alloc_free_op_slot(&pending),
            };
            self.node_to_op.insert(id, op_id);
            pending.insert(op_id);
        }
    }

    fn resolve_voice_update(&mut self, vn: &VoiceNode) -> Option<VoiceUpdate> {
        let touches_graph = vn.changed & voiceflag::GRAPH != 0;
        let touches_pan = vn.changed & (voiceflag::PAN | voiceflag::PAN_RAMP) != 0;
        if !touches_graph && !touches_pan {
            return None;
        }
        let voice_id = if touches_graph {
            // spec.md §4.5: "If the event references a previous voice
            // (voice_prev), reuse that voice's id" is the first rule of
            // voice allocation, ahead of the free-slot search below.
            let id = vn
                .voice_prev
                .and_then(|idx| self.event_voice.get(idx).copied().flatten())
                .unwrap_or_else(|| self.find_or_alloc_free_voice_slot());
            self.last_voice_id = Some(id);
            id
        } else {
            match self.last_voice_id {
                Some(id) => id,
                None => self.find_or_alloc_free_voice_slot(),
            }
        };
        let slot = &mut self.voice_slots[voice_id.0 as usize];
        let mut changed = 0u16;
        if touches_pan {
            slot.pan = vn.pan;
            slot.pan_ramp = vn.pan_ramp;
            changed |= vn.changed & (voiceflag::PAN | voiceflag::PAN_RAMP);
        }
        if touches_graph {
            slot.carriers = vn.carriers.iter().map(|c| self.node_to_op[c]).collect();
            let residual = vn.carriers.iter().filter_map(|c| self.arena.get(*c).time_ms).fold(
                0i64,
                |acc, t| if t == TIME_INF { TIME_INF } else { acc.max(t) },
            );
            slot.residual_ms = residual;
            changed |= voiceflag::GRAPH;
        }
        Some(VoiceUpdate {
            voice_id,
            changed,
            pan: slot.pan,
            pan_ramp: slot.pan_ramp,
            carriers: slot.carriers.clone(),
        })
    }

    fn build_updates(&mut self, order: &[NodeId]) -> Vec<OperatorUpdate> {
        let mut out = Vec::with_capacity(order.len());
        for &id in order {
            let op_id = self.node_to_op[&id];
            let node = self.arena.get(id);
            let changed = node.changed;
            if changed & opflag::AMP != 0 {
                self.amp_explicit_anywhere = true;
            }
            let fmods: Vec<OpId> = node.fmods.iter().map(|c| self.node_to_op[c]).collect();
            let pmods: Vec<OpId> = node.pmods.iter().map(|c| self.node_to_op[c]).collect();
            let amods: Vec<OpId> = node.amods.iter().map(|c| self.node_to_op[c]).collect();
            let slot = &mut self.op_slots[op_id.0 as usize];
            if changed & opflag::WAVE != 0 {
                slot.wave = node.wave;
            }
            if changed & opflag::TIME != 0 {
                slot.time_ms = node.time_ms;
                slot.residual_ms = node.time_ms.unwrap_or(0);
                slot.silence_ms = 0;
            }
            if changed & opflag::FREQ != 0 {
                slot.freq = node.freq;
                slot.is_ratio = node.is_ratio;
            }
            if changed & opflag::DYNFREQ != 0 {
                slot.dynfreq = node.dynfreq;
            }
            if changed & opflag::PHASE != 0 {
                slot.phase = node.phase;
            }
            if changed & opflag::AMP != 0 {
                slot.amp = node.amp;
            }
            if changed & opflag::DYNAMP != 0 {
                slot.dynamp = node.dynamp;
            }
            if changed & opflag::FREQ_RAMP != 0 {
                slot.freq_ramp = node.freq_ramp;
            }
            if changed & opflag::AMP_RAMP != 0 {
                slot.amp_ramp = node.amp_ramp;
            }
            if changed & opflag::ADJACENCY != 0 {
                slot.fmods = fmods;
                slot.pmods = pmods;
                slot.amods = amods;
            }
            out.push(OperatorUpdate {
                op_id,
                changed,
                wave: slot.wave,
                time_ms: slot.time_ms,
                silence_ms: slot.silence_ms,
                freq: slot.freq,
                is_ratio: slot.is_ratio,
                dynfreq: slot.dynfreq,
                phase: slot.phase,
                amp: slot.amp,
                dynamp: slot.dynamp,
                freq_ramp: slot.freq_ramp,
                amp_ramp: slot.amp_ramp,
                fmods: slot.fmods.clone(),
                pmods: slot.pmods.clone(),
                amods: slot.amods.clone(),
            });
        }
        out
    }

    fn process_voice_event(&mut self, vn: &VoiceNode) {
        self.decrement_residuals(vn.wait_ms);

        let mut order = Vec::new();
        for &c in &vn.carriers {
            self.collect_depth_first(c, &mut order);
        }
        self.lower_event_ids(&order);

        let voice_update = self.resolve_voice_update(vn);
        self.event_voice.push(voice_update.as_ref().map(|vu| vu.voice_id));
        let updates = self.build_updates(&order);

        if updates.is_empty() {
            if vn.wait_ms != 0 || voice_update.is_some() {
                self.out_events.push(ProgramEvent {
                    wait_ms: vn.wait_ms,
                    voice_update,
                    operator_update: None,
                });
            }
            return;
        }

        for (i, upd) in updates.into_iter().enumerate() {
            self.out_events.push(ProgramEvent {
                wait_ms: if i == 0 { vn.wait_ms } else { 0 },
                voice_update: if i == 0 { voice_update.clone() } else { None },
                operator_update: Some(upd),
            });
        }
    }

    fn finish(self) -> Program {
        Program {
            events: self.out_events,
            voice_count: self.voice_slots.len() as u32,
            operator_count: self.op_slots.len() as u32,
            name: None,
            amp_div_voices: !self.amp_explicit_anywhere,
        }
    }
}

pub fn lower(mut tree: ParseTree) -> Program {
    apply_modulator_time_inheritance(&mut tree.arena);
    apply_duration_scopes(&mut tree);
    let mut lowerer = Lowerer::new(&tree.arena);
    for vn in &tree.events {
        lowerer.process_voice_event(vn);
    }
    lowerer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    #[test]
    fn single_sine_beep_lowers_to_one_voice_one_operator() {
        let (tree, diags) = parse_str("W sin f 440 t 1000 a 0.5");
        assert!(diags.is_empty());
        let program = lower(tree);
        assert_eq!(program.voice_count, 1);
        assert_eq!(program.operator_count, 1);
        assert_eq!(program.events.len(), 1);
        let evt = &program.events[0];
        assert!(evt.voice_update.is_some());
        let op = evt.operator_update.as_ref().unwrap();
        assert_eq!(op.freq, 440.0);
        assert_eq!(op.amp, 0.5);
        assert!(program.amp_div_voices == false);
    }

    #[test]
    fn label_reference_emits_operator_only_update() {
        let (tree, diags) = parse_str("'a W sin f 440 t 1000 / 500 :a a 0.25");
        assert!(diags.is_empty());
        let program = lower(tree);
        assert_eq!(program.voice_count, 1);
        assert_eq!(program.operator_count, 1);
        assert_eq!(program.events.len(), 2);
        let second = &program.events[1];
        assert_eq!(second.wait_ms, 500);
        assert!(second.voice_update.is_none());
        let op = second.operator_update.as_ref().unwrap();
        assert_eq!(op.op_id.0, 0);
        assert_eq!(op.amp, 0.25);
        assert_eq!(op.freq, 440.0);
    }

    #[test]
    fn duration_scope_reuses_voice_and_operator_slots_after_prior_finishes() {
        // The first group's voice AND operator slot are both fully spent by
        // the time the second group starts (its 200ms delay exactly clears
        // the 200ms carrier from group one), so both get reused rather than
        // growing the table — spec.md §4.5 "else find a free slot".
        let (tree, diags) = parse_str("W sin f 300 t 200 | W sin f 400 t 300");
        assert!(diags.is_empty());
        let program = lower(tree);
        assert_eq!(program.voice_count, 1);
        assert_eq!(program.operator_count, 1);
        assert_eq!(program.events.len(), 2);
        assert_eq!(program.events[1].wait_ms, 200);
        let v0 = program.events[0].voice_update.as_ref().unwrap();
        let v1 = program.events[1].voice_update.as_ref().unwrap();
        assert_eq!(v0.voice_id.0, v1.voice_id.0);
        let op0 = program.events[0].operator_update.as_ref().unwrap();
        let op1 = program.events[1].operator_update.as_ref().unwrap();
        assert_eq!(op0.op_id.0, op1.op_id.0);
        assert_eq!(op1.freq, 400.0);
    }

    #[test]
    fn fm_pair_splits_into_two_operator_updates() {
        let (tree, diags) = parse_str("W sin f 200 t 500 f!{ W sin r 2 a 0.8 }");
        assert!(diags.is_empty());
        let program = lower(tree);
        assert_eq!(program.operator_count, 2);
        assert_eq!(program.events.len(), 2);
        assert!(program.events[0].voice_update.is_some());
        assert!(program.events[1].voice_update.is_none());
        assert_eq!(program.events[1].wait_ms, 0);
        let carrier = program.events[0].operator_update.as_ref().unwrap();
        assert_eq!(carrier.fmods.len(), 1);
    }
}
