//! Lowerer behavior that needs more than one script to observe: operator
//! slot reuse across unrelated definitions (SPEC_FULL.md §12 decision 2),
//! the `TIME_INF` voice-duration exclusion (decision 1), and voice-level
//! `:label` references taking priority over the free-slot search (spec.md
//! §4.5).

use timbre::ast::TIME_INF;
use timbre::parser::parse_str;

fn lower(script: &str) -> timbre::Program {
    let (tree, diags) = parse_str(script);
    assert!(diags.is_empty(), "unexpected warnings: {:?}", diags.warnings);
    timbre::lowerer::lower(tree)
}

/// A short, unrelated operator defined after an earlier one has fully
/// elapsed should reuse its slot rather than grow the operator table.
#[test]
fn finished_operator_slot_is_reassigned_to_a_later_unrelated_definition() {
    let program = lower("W sin f 100 t 100 | W sqr f 999 t 50");
    assert_eq!(
        program.operator_count, 1,
        "the second, unrelated operator should reuse the first operator's freed slot"
    );
    let second = program.events[1].operator_update.as_ref().unwrap();
    assert_eq!(second.op_id.0, 0);
    assert_eq!(second.freq, 999.0);
}

/// A voice whose only carrier runs for `t inf` never reaches a residual
/// duration of zero, so it is never reused by the duration-elapsed path —
/// only an explicit `:label` reference can touch it again.
#[test]
fn time_inf_carrier_excludes_voice_from_residual_duration_reuse() {
    let program = lower("W sin f 200 t inf | W sqr f 300 t 50");
    assert_eq!(
        program.voice_count, 2,
        "an infinite-duration voice must not be reused by the free-slot search"
    );
    let carrier = program.events[0].operator_update.as_ref().unwrap();
    assert_eq!(carrier.time_ms, Some(TIME_INF));
}

/// Two carriers in the same duration scope, one finite and one infinite:
/// the scope's length is governed by the finite one only (decision 1,
/// "exclude TIME_INF from the max(time_ms) computation").
#[test]
fn duration_scope_length_ignores_infinite_carriers_in_the_max() {
    let program = lower("W sin f 100 t inf W sqr f 200 t 300 | W tri f 50 t 10");
    // The group's finite carrier (300ms) governs the next event's delay;
    // the infinite one does not pin the scope open forever.
    assert_eq!(program.events.last().unwrap().wait_ms, 300);
}

/// A top-level `:label` naming an earlier voice's root carrier must reuse
/// that voice's id even when an unrelated, shorter-lived voice has since
/// freed up a slot that the plain free-slot search would otherwise pick
/// (spec.md §4.5, "if the event references a previous voice, reuse that
/// voice's id" is the first rule, ahead of the free-slot fallback).
#[test]
fn voice_label_reference_reuses_its_own_voice_over_a_coincidentally_free_slot() {
    let program = lower(
        "'a W sin f 300 t 1000\n\
         / 10 W sqr f 999 t 50\n\
         / 60 :a W tri f 500 t 10\n",
    );
    assert_eq!(program.voice_count, 2, "the unrelated short voice still gets its own slot");

    // The third line carries two operator updates (the inherited label
    // reference, then the new `W`), so it expands to two `ProgramEvent`s;
    // the voice update rides on the first of them.
    let vu = program.events[2]
        .voice_update
        .as_ref()
        .expect("third event changes the graph, so it carries a voice update");
    assert_eq!(vu.voice_id.0, 0, "must reuse 'a's voice, not voice 1 (which just went idle)");
    assert_eq!(vu.carriers.len(), 2, "the labeled carrier and the new W both land in this voice");
}
