//! Hand-written recursive-descent parser over the `Scanner` (spec.md §4.4).
//!
//! The grammar is line- and scope-oriented; most tokens are single ASCII
//! bytes, optionally followed by a numeric expression or a braced
//! modulator sublist. Errors are never exceptions: every `parse_*` helper
//! records a `Diagnostic` and keeps going, exactly like the scanner below
//! it (spec.md §7, "no error propagates as an unwindable exception").
//!
//! A handful of grammar corners spec.md describes only at the semantic
//! level (ramp authoring syntax; `<`/`>` nesting) are given a small,
//! explicit concrete syntax here — see DESIGN.md for what was invented and
//! why.

use std::collections::HashMap;

use crate::ast::{opflag, voiceflag, Arena, NodeId, OperatorNode, ParseTree, Ramp, RampShape,
    TimeMs, VoiceNode, WaveKind, TIME_INF};
use crate::error::{Diagnostic, Diagnostics, ErrorKind};
use crate::numexpr::NumExpr;
use crate::scanner::{is_ident_start, Scanner, LNBRK};
use crate::symtab::{Symbol, SymbolTable};
use crate::text_source::{TextSource, MARKER};

#[derive(Debug, Clone, Copy)]
struct Defaults {
    pan: f64,
    amp: f64,
    time_ms: TimeMs,
    freq: f64,
    ratio: f64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            pan: 0.0,
            amp: 1.0,
            time_ms: 1000,
            freq: 100.0,
            ratio: 1.0,
        }
    }
}

/// Why a `Defaults` snapshot was pushed onto `Parser::defaults_stack`
/// (spec.md §4.4 "Scope state"): a `Settings` frame is popped by the next
/// line break or `>` (whichever comes first), a `Nest` frame only by its
/// matching `>`, so a settings block opened inside `<...>` never leaks its
/// defaults past the closing `>`, and one opened at the top level never
/// outlives its own line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopePush {
    Settings,
    Nest,
}

pub struct Parser {
    scanner: Scanner,
    symtab: SymbolTable<NodeId>,
    arena: Arena,
    events: Vec<VoiceNode>,
    scope_starts: Vec<usize>,
    current: VoiceNode,
    defaults: Defaults,
    defaults_stack: Vec<(Defaults, ScopePush)>,
    pending_label: Option<Symbol>,
    nesting_depth: u32,
    /// Labels attached to a *root* (top-level carrier) operator, mapped to
    /// the index that event will occupy in `events` once flushed — the
    /// "voice-level label" spec.md §3/§4.5 distinguishes from an ordinary
    /// operator label: a later top-level `:name` reference resolves it to
    /// reuse that voice (`VoiceNode::voice_prev`) instead of just inheriting
    /// the operator's parameters. Labels attached to nested modulators never
    /// enter this map, since they have no voice of their own to continue.
    label_voice: HashMap<Symbol, usize>,
}

fn pan_lookup(name: &str) -> Option<f64> {
    match name {
        "C" => Some(0.0),
        "L" => Some(-1.0),
        "R" => Some(1.0),
        _ => None,
    }
}

impl Parser {
    pub fn new(source: TextSource) -> Self {
        Self {
            scanner: Scanner::new(source),
            symtab: SymbolTable::new(),
            arena: Arena::new(),
            events: Vec::new(),
            scope_starts: vec![0],
            current: Self::fresh_event(),
            defaults: Defaults::default(),
            defaults_stack: Vec::new(),
            pending_label: None,
            nesting_depth: 0,
            label_voice: HashMap::new(),
        }
    }

    pub fn parse(mut self) -> (ParseTree, Diagnostics) {
        loop {
            let c = self.scanner.get_c_skip_space();
            match c {
                MARKER => {
                    self.finish_event();
                    break;
                }
                LNBRK => self.finish_event(),
                b'|' => {
                    self.finish_event();
                    self.scope_starts.push(self.events.len());
                }
                b'\'' => self.parse_label_attach(),
                b':' => self.parse_label_reference(),
                b'/' => self.parse_delay_before_next(),
                b'\\' => self.parse_delay_current(),
                b'W' => {
                    let label = self.pending_label;
                    let id = self.parse_operator_def(false, true);
                    self.current.carriers.push(id);
                    self.current.changed |= voiceflag::GRAPH;
                    if let Some(sym) = label {
                        self.label_voice.insert(sym, self.events.len());
                    }
                }
                b'E' => {
                    let label = self.pending_label;
                    let id = self.parse_operator_def(true, true);
                    self.current.carriers.push(id);
                    self.current.changed |= voiceflag::GRAPH;
                    if let Some(sym) = label {
                        self.label_voice.insert(sym, self.events.len());
                    }
                }
                b'S' => {
                    self.defaults_stack.push((self.defaults, ScopePush::Settings));
                    self.parse_settings_block();
                }
                b'<' => {
                    self.defaults_stack.push((self.defaults, ScopePush::Nest));
                    self.nesting_depth += 1;
                }
                b'>' => {
                    if self.nesting_depth == 0 {
                        self.warn(ErrorKind::Syntactic, "unmatched '>'");
                    } else {
                        self.pop_settings_frames();
                        if let Some((d, ScopePush::Nest)) = self.defaults_stack.pop() {
                            self.defaults = d;
                        }
                        self.nesting_depth -= 1;
                    }
                }
                b'Q' => {
                    self.finish_event();
                    break;
                }
                other => {
                    self.warn(
                        ErrorKind::Syntactic,
                        format!("unexpected token '{}' at top level", other as char),
                    );
                }
            }
        }
        let tree = ParseTree {
            arena: self.arena,
            events: self.events,
            scope_starts: self.scope_starts,
        };
        (tree, self.scanner.diagnostics)
    }

    fn warn(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let (line, col) = (self.scanner.line(), self.scanner.column());
        let mut d = Diagnostic::new(kind, line, col, message);
        if let Some(p) = self.scanner.path() {
            d = d.with_path(p);
        }
        self.scanner.diagnostics.push(d);
    }

    /// A `VoiceNode` placeholder with nothing changed yet. Distinct from
    /// `VoiceNode::defaults()`, whose `changed = ALL` means "freshly
    /// allocated, inherit nothing" for a node that already has content —
    /// here nothing has happened yet, so the mask starts at zero and
    /// accumulates bits as the parser actually sets fields.
    fn fresh_event() -> VoiceNode {
        let mut v = VoiceNode::defaults();
        v.changed = 0;
        v
    }

    /// Pops every `Settings`-tagged frame off the top of `defaults_stack`,
    /// restoring `self.defaults` to what it was before the corresponding
    /// `S`. Stops at the first `Nest` frame, which only its matching `>`
    /// may pop (spec.md §4.4 "line-break and `>`/`}` events pop these on
    /// exit").
    fn pop_settings_frames(&mut self) {
        while let Some((_, ScopePush::Settings)) = self.defaults_stack.last() {
            let (d, _) = self.defaults_stack.pop().unwrap();
            self.defaults = d;
        }
    }

    fn finish_event(&mut self) {
        self.pop_settings_frames();
        let has_content =
            !self.current.carriers.is_empty() || self.current.changed != 0 || self.current.wait_ms != 0;
        if has_content {
            self.events.push(std::mem::replace(&mut self.current, Self::fresh_event()));
        } else {
            self.current = Self::fresh_event();
        }
    }

    fn parse_label_attach(&mut self) {
        let c = self.scanner.get_c_skip_space();
        if !is_ident_start(c) {
            self.warn(ErrorKind::Syntactic, "expected a label name after '\''");
            self.scanner.unget_c(c);
            return;
        }
        let name = self.scanner.read_identifier(c);
        self.pending_label = Some(self.symtab.intern(&name));
    }

    fn parse_label_reference(&mut self) {
        let c = self.scanner.get_c_skip_space();
        if !is_ident_start(c) {
            self.warn(ErrorKind::Syntactic, "expected a label name after ':'");
            self.scanner.unget_c(c);
            return;
        }
        let name = self.scanner.read_identifier(c);
        let sym = self.symtab.intern(&name);
        let Some(&prev_id) = self.symtab.payload_of(sym) else {
            self.warn(ErrorKind::Semantic, format!("undefined label '{name}'"));
            return;
        };
        // No `finish_event` here: a bare `:label` joins whatever event is
        // already open (exactly like another `W`/`E` carrier would), so any
        // delay already accumulated via a preceding `/` lands on this same
        // event instead of being flushed out as a carrier-less one.
        let mut node = OperatorNode::inheriting(prev_id);
        self.parse_operator_params(&mut node, true);
        let id = self.arena.alloc(node);
        self.symtab.attach(sym, id);
        // Referencing a label only updates that operator's parameters; the
        // voice it already belongs to is untouched (no graph change), so
        // this event carries no voice_update (see DESIGN.md decision #4) —
        // unless this label names a voice-level (root-carrier) operator, in
        // which case we record which earlier event owns that voice so a
        // later top-level `W`/`E` in *this* event (if any) continues that
        // voice instead of allocating a fresh one (spec.md §4.5, "if the
        // event references a previous voice, reuse that voice's id").
        self.current.carriers.push(id);
        if let Some(&voice_idx) = self.label_voice.get(&sym) {
            self.current.voice_prev = Some(voice_idx);
        }
    }

    fn parse_delay_before_next(&mut self) {
        self.finish_event();
        let c = self.scanner.get_c_skip_space();
        if c == b't' && !is_ident_start(self.peek_raw_after_t()) {
            // "/t": delay by the most recently defined node's time.
            let ms = self
                .arena
                .len()
                .checked_sub(1)
                .map(|i| self.arena.get(NodeId(i as u32)))
                .and_then(|n| n.time_ms)
                .filter(|&t| t != TIME_INF)
                .unwrap_or_else(|| {
                    self.warn(ErrorKind::Semantic, "'/t' has no prior node with a known time");
                    0
                });
            self.current.wait_ms += ms;
            return;
        }
        self.scanner.unget_c(c);
        match self.scanner.get_int(false) {
            Some((ms, _)) => self.current.wait_ms += ms.max(0),
            None => self.warn(ErrorKind::Syntactic, "expected milliseconds or 't' after '/'"),
        }
    }

    fn peek_raw_after_t(&mut self) -> u8 {
        let c = self.scanner.get_c();
        self.scanner.unget_c(c);
        c
    }

    fn parse_delay_current(&mut self) {
        match self.scanner.get_int(false) {
            Some((ms, _)) => self.current.wait_ms += ms.max(0),
            None => self.warn(ErrorKind::Syntactic, "expected milliseconds after '\\\\'"),
        }
    }

    fn parse_settings_block(&mut self) {
        loop {
            let c = self.scanner.get_c_skip_space();
            match c {
                b'a' => {
                    if let Some(v) = self.read_plain_number() {
                        self.defaults.amp = v;
                    }
                }
                b'c' => {
                    if let Some(v) = self.read_pan_value() {
                        self.defaults.pan = v;
                    }
                }
                b'f' => {
                    if let Some(v) = self.read_plain_number() {
                        self.defaults.freq = v;
                    }
                }
                b'r' => {
                    if let Some(v) = self.read_plain_number() {
                        self.defaults.ratio = v;
                    }
                }
                b't' => {
                    if let Some(ms) = self.read_time_value() {
                        self.defaults.time_ms = ms;
                    }
                }
                _ => {
                    self.scanner.unget_c(c);
                    return;
                }
            }
        }
    }

    fn read_plain_number(&mut self) -> Option<f64> {
        let mut expr = NumExpr::new(&mut self.scanner, &pan_lookup);
        match expr.parse() {
            Ok(Some(v)) => Some(v),
            Ok(None) => {
                self.warn(ErrorKind::Syntactic, "expected a number");
                None
            }
            Err(d) => {
                self.scanner.diagnostics.push(d);
                None
            }
        }
    }

    fn read_pan_value(&mut self) -> Option<f64> {
        self.read_plain_number()
    }

    fn read_time_value(&mut self) -> Option<TimeMs> {
        let c = self.scanner.get_c_skip_space();
        if is_ident_start(c) {
            let ident = self.scanner.read_identifier(c);
            if ident == "inf" {
                return Some(TIME_INF);
            }
            self.warn(ErrorKind::Syntactic, format!("unknown time value '{ident}'"));
            return None;
        }
        self.scanner.unget_c(c);
        match self.scanner.get_int(false) {
            Some((ms, _)) => {
                if ms < 0 {
                    self.warn(ErrorKind::Semantic, "negative time clamped to 0");
                    Some(0)
                } else {
                    Some(ms)
                }
            }
            None => {
                self.warn(ErrorKind::Syntactic, "expected milliseconds or 'inf'");
                None
            }
        }
    }

    /// Parses `W <wave>` / `E` and its following parameter tokens, either
    /// as a top-level carrier (`is_root`) or inside a modulator sublist.
    fn parse_operator_def(&mut self, is_envelope: bool, is_root: bool) -> NodeId {
        let wave = if is_envelope {
            WaveKind::Sine
        } else {
            let c = self.scanner.get_c_skip_space();
            if is_ident_start(c) {
                let ident = self.scanner.read_identifier(c);
                WaveKind::from_keyword(&ident).unwrap_or_else(|| {
                    self.warn(ErrorKind::Syntactic, format!("unknown wave name '{ident}'"));
                    WaveKind::Sine
                })
            } else {
                self.warn(ErrorKind::Syntactic, "expected a wave name after 'W'");
                self.scanner.unget_c(c);
                WaveKind::Sine
            }
        };

        let mut node = OperatorNode::defaults();
        node.wave = wave;
        node.is_envelope = is_envelope;
        node.freq = self.defaults.freq;
        node.amp = self.defaults.amp;
        node.time_ms = Some(self.defaults.time_ms);
        node.time_explicit = false;

        if let Some(sym) = self.pending_label.take() {
            node.label = Some(sym);
        }

        self.parse_operator_params(&mut node, is_root);

        let id = self.arena.alloc(node);
        if let Some(sym) = self.arena.get(id).label {
            self.symtab.attach(sym, id);
        }
        id
    }

    /// Parses zero or more parameter introducers (`a c f r p t w`) until a
    /// token that doesn't belong to this node is seen, which is pushed
    /// back for the caller. `c` (pan) always targets the enclosing voice
    /// event, per spec.md §3 (panning is a voice-level attribute).
    fn parse_operator_params(&mut self, node: &mut OperatorNode, is_root: bool) {
        loop {
            let c = self.scanner.get_c_skip_space();
            match c {
                b'a' => self.parse_amp_param(node),
                b'f' => self.parse_freq_param(node, false, is_root),
                b'r' => self.parse_freq_param(node, true, is_root),
                b'p' => self.parse_phase_param(node),
                b't' => {
                    if let Some(ms) = self.read_time_value() {
                        node.time_ms = Some(ms);
                        node.time_explicit = true;
                        node.changed |= opflag::TIME;
                    }
                }
                b'w' => {
                    let wc = self.scanner.get_c_skip_space();
                    if is_ident_start(wc) {
                        let ident = self.scanner.read_identifier(wc);
                        match WaveKind::from_keyword(&ident) {
                            Some(w) => {
                                node.wave = w;
                                node.changed |= opflag::WAVE;
                            }
                            None => self.warn(
                                ErrorKind::Syntactic,
                                format!("unknown wave name '{ident}'"),
                            ),
                        }
                    } else {
                        self.scanner.unget_c(wc);
                        self.warn(ErrorKind::Syntactic, "expected a wave name after 'w'");
                    }
                }
                b'c' => {
                    if let Some(v) = self.read_pan_value() {
                        self.current.pan = v;
                        self.current.changed |= voiceflag::PAN;
                    }
                }
                _ => {
                    self.scanner.unget_c(c);
                    return;
                }
            }
        }
    }

    fn try_bang(&mut self) -> bool {
        self.scanner.try_c(b'!')
    }

    fn parse_amp_param(&mut self, node: &mut OperatorNode) {
        if self.try_bang() {
            if self.scanner.try_c(b'{') {
                node.amods = self.parse_mod_list();
                node.changed |= opflag::ADJACENCY;
                return;
            }
            if let Some(v) = self.read_plain_number() {
                if let Some(ramp) = self.try_parse_ramp_suffix(v) {
                    node.amp_ramp = Some(ramp);
                    node.changed |= opflag::AMP_RAMP;
                } else {
                    node.dynamp = Some(v);
                    node.changed |= opflag::DYNAMP;
                }
            }
        } else if let Some(v) = self.read_plain_number() {
            node.amp = v;
            node.changed |= opflag::AMP;
        }
    }

    fn parse_freq_param(&mut self, node: &mut OperatorNode, is_ratio: bool, is_root: bool) {
        if is_ratio && is_root {
            self.warn(ErrorKind::Semantic, "ratio parameter on a root carrier has no parent frequency");
        }
        if self.try_bang() {
            if self.scanner.try_c(b'{') {
                node.fmods = self.parse_mod_list();
                node.changed |= opflag::ADJACENCY;
                return;
            }
            if let Some(v) = self.read_plain_number() {
                node.is_ratio = is_ratio;
                node.changed |= opflag::FREQ;
                if let Some(ramp) = self.try_parse_ramp_suffix(v) {
                    node.freq_ramp = Some(ramp);
                    node.changed |= opflag::FREQ_RAMP;
                } else {
                    node.dynfreq = Some(v);
                    node.changed |= opflag::DYNFREQ;
                }
            }
        } else if let Some(v) = self.read_plain_number() {
            node.freq = v;
            node.is_ratio = is_ratio;
            node.changed |= opflag::FREQ;
        }
    }

    fn parse_phase_param(&mut self, node: &mut OperatorNode) {
        if self.try_bang() {
            if self.scanner.try_c(b'{') {
                node.pmods = self.parse_mod_list();
                node.changed |= opflag::ADJACENCY;
                return;
            }
            if let Some(v) = self.read_plain_number() {
                node.phase = v.rem_euclid(1.0);
                node.changed |= opflag::PHASE;
            }
        } else if let Some(v) = self.read_plain_number() {
            node.phase = v.rem_euclid(1.0);
            node.changed |= opflag::PHASE;
        }
    }

    /// Small invented concrete syntax for authoring a ramp after a dynamic
    /// target value: `<target>/<ms>/<shape>`, shape one of
    /// `lin|exp|log|sin`. Spec.md describes ramp *semantics* but never a
    /// concrete authoring syntax; see DESIGN.md.
    fn try_parse_ramp_suffix(&mut self, target: f64) -> Option<Ramp> {
        if !self.scanner.try_c(b'/') {
            return None;
        }
        let ms = match self.scanner.get_int(false) {
            Some((ms, _)) => ms.max(0),
            None => {
                self.warn(ErrorKind::Syntactic, "expected ramp duration in ms after '/'");
                return None;
            }
        };
        if !self.scanner.try_c(b'/') {
            self.warn(ErrorKind::Syntactic, "expected '/<shape>' to complete ramp");
            return None;
        }
        let c = self.scanner.get_c_skip_space();
        if !is_ident_start(c) {
            self.warn(ErrorKind::Syntactic, "expected a ramp shape name");
            self.scanner.unget_c(c);
            return None;
        }
        let ident = self.scanner.read_identifier(c);
        let shape = match ident.as_str() {
            "lin" => RampShape::Linear,
            "exp" => RampShape::Exponential,
            "log" => RampShape::Logarithmic,
            "sin" => RampShape::Sinusoidal,
            _ => {
                self.warn(ErrorKind::Syntactic, format!("unknown ramp shape '{ident}'"));
                RampShape::Linear
            }
        };
        Some(Ramp {
            target,
            duration_ms: ms,
            shape,
        })
    }

    /// Parses the body of a `{ ... }` modulator sublist: an ordered list
    /// of operator definitions (spec.md §4.4, "nested sublists inherit
    /// the same rules recursively").
    fn parse_mod_list(&mut self) -> Vec<NodeId> {
        let mut list = Vec::new();
        loop {
            let c = self.scanner.get_c_skip_space();
            match c {
                MARKER => {
                    self.warn(ErrorKind::Syntactic, "unterminated modulator sublist");
                    return list;
                }
                LNBRK => continue,
                b'}' => return list,
                b'W' => list.push(self.parse_operator_def(false, false)),
                b'E' => list.push(self.parse_operator_def(true, false)),
                b'\'' => self.parse_label_attach(),
                b':' => {
                    if let Some(id) = self.parse_label_reference_in_sublist() {
                        list.push(id);
                    }
                }
                other => {
                    self.warn(
                        ErrorKind::Syntactic,
                        format!("unexpected token '{}' in modulator sublist", other as char),
                    );
                }
            }
        }
    }

    fn parse_label_reference_in_sublist(&mut self) -> Option<NodeId> {
        let c = self.scanner.get_c_skip_space();
        if !is_ident_start(c) {
            self.warn(ErrorKind::Syntactic, "expected a label name after ':'");
            self.scanner.unget_c(c);
            return None;
        }
        let name = self.scanner.read_identifier(c);
        let sym = self.symtab.intern(&name);
        let Some(&prev_id) = self.symtab.payload_of(sym) else {
            self.warn(ErrorKind::Semantic, format!("undefined label '{name}'"));
            return None;
        };
        let mut node = OperatorNode::inheriting(prev_id);
        self.parse_operator_params(&mut node, false);
        let id = self.arena.alloc(node);
        self.symtab.attach(sym, id);
        Some(id)
    }
}

pub fn parse_str(source: &str) -> (ParseTree, Diagnostics) {
    Parser::new(TextSource::from_str(source)).parse()
}

pub fn parse_path(path: impl AsRef<std::path::Path>) -> std::io::Result<(ParseTree, Diagnostics)> {
    Ok(Parser::new(TextSource::from_path(path)?).parse())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sine_beep() {
        let (tree, diags) = parse_str("W sin f 440 t 1000 a 0.5");
        assert!(diags.is_empty());
        assert_eq!(tree.events.len(), 1);
        assert_eq!(tree.arena.len(), 1);
        let op = tree.arena.get(NodeId(0));
        assert_eq!(op.wave, WaveKind::Sine);
        assert_eq!(op.freq, 440.0);
        assert_eq!(op.time_ms, Some(1000));
        assert_eq!(op.amp, 0.5);
    }

    #[test]
    fn two_op_fm_nests_a_modulator() {
        let (tree, diags) = parse_str("W sin f 200 t 500 f!{ W sin r 2 a 0.8 }");
        assert!(diags.is_empty());
        assert_eq!(tree.arena.len(), 2);
        let carrier = tree.arena.get(NodeId(0));
        assert_eq!(carrier.fmods, vec![NodeId(1)]);
        let modulator = tree.arena.get(NodeId(1));
        assert_eq!(modulator.freq, 2.0);
        assert!(modulator.is_ratio);
        assert_eq!(modulator.amp, 0.8);
    }

    #[test]
    fn duration_scope_delimiter_splits_events() {
        let (tree, _diags) = parse_str("W sin f 300 t 200 | W sin f 400 t 300");
        assert_eq!(tree.events.len(), 2);
        assert_eq!(tree.scope_starts, vec![0, 1]);
    }

    #[test]
    fn label_reference_updates_without_new_carrier_event() {
        let (tree, diags) = parse_str("'a W sin f 440 t 1000 / 500 :a a 0.25");
        assert!(diags.is_empty());
        assert_eq!(tree.events.len(), 2);
        assert_eq!(tree.events[1].wait_ms, 500);
        assert_eq!(tree.events[1].changed & voiceflag::GRAPH, 0);
        let updated = tree.arena.get(tree.events[1].carriers[0]);
        assert_eq!(updated.amp, 0.25);
        assert_eq!(updated.changed, opflag::AMP);
        assert_eq!(updated.on_prev, Some(NodeId(0)));
    }

    #[test]
    fn pan_letters_resolve() {
        let (tree, diags) = parse_str("W sin f 440 c R t 100");
        assert!(diags.is_empty());
        assert_eq!(tree.events[0].pan, 1.0);
    }

    #[test]
    fn time_inf_sentinel() {
        let (tree, diags) = parse_str("W sin f 300 t inf p!{ W sin f 5 t 1000 }");
        assert!(diags.is_empty());
        let carrier = tree.arena.get(NodeId(0));
        assert_eq!(carrier.time_ms, Some(TIME_INF));
        assert_eq!(carrier.pmods.len(), 1);
    }

    #[test]
    fn unknown_wave_name_warns_but_continues() {
        let (tree, diags) = parse_str("W bogus f 1");
        assert!(!diags.is_empty());
        assert_eq!(tree.arena.get(NodeId(0)).wave, WaveKind::Sine);
    }
}
