//! Block rendering throughput for a representative FM operator graph,
//! mirroring `phonon`'s `voice_simd_bench` (SPEC_FULL.md §9.4).
//!
//! Run with: cargo bench --bench engine_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use timbre::engine::render::render_block;
use timbre::engine::state::EngineState;
use timbre::engine::BLOCK_LEN;
use timbre::error::Diagnostic;
use timbre::sink::Sink;

/// A sink that discards everything; isolates render cost from I/O.
struct NullSink;

impl Sink for NullSink {
    fn open(&mut self, _channels: u16, _sample_rate: &mut u32) -> Result<(), Diagnostic> {
        Ok(())
    }
    fn write(&mut self, _frames: &[i16]) -> Result<(), Diagnostic> {
        Ok(())
    }
    fn close(&mut self) -> Result<(), Diagnostic> {
        Ok(())
    }
}

fn compile_bench_program(script: &str) -> timbre::Program {
    let (program, _diags) = timbre::compile_str(script);
    program
}

/// Raw `render_block` throughput for a single sine carrier, no modulation.
fn bench_simple_carrier(c: &mut Criterion) {
    let program = compile_bench_program("W sin f 440 t inf a 0.5");
    let mut group = c.benchmark_group("render_block");
    group.bench_function(BenchmarkId::new("single_carrier", BLOCK_LEN), |b| {
        let mut engine = EngineState::new(program.voice_count, program.operator_count, 44_100);
        if let Some(vu) = &program.events[0].voice_update {
            engine.voices[vu.voice_id.0 as usize].apply(vu);
        }
        if let Some(ou) = &program.events[0].operator_update {
            engine.operators[ou.op_id.0 as usize].apply(ou, 44_100.0);
        }
        b.iter(|| black_box(render_block(&mut engine, BLOCK_LEN, false)));
    });
    group.finish();
}

/// A three-level FM stack (carrier <- fmod <- fmod), to exercise the
/// recursive scratch-buffer path (spec.md §4.6 "Buffer depth").
fn bench_fm_stack(c: &mut Criterion) {
    let script = "W sin f 220 t inf a!{ W sin f 4 t inf a 1 } \
                  f!{ W sin f 5 r 2 a 0.6 f!{ W sin f 30 r 3 a 0.3 } }";
    let program = compile_bench_program(script);
    let mut group = c.benchmark_group("render_block");
    group.bench_function(BenchmarkId::new("three_level_fm", BLOCK_LEN), |b| {
        let mut engine = EngineState::new(program.voice_count, program.operator_count, 44_100);
        for event in &program.events {
            if let Some(vu) = &event.voice_update {
                engine.voices[vu.voice_id.0 as usize].apply(vu);
            }
            if let Some(ou) = &event.operator_update {
                engine.operators[ou.op_id.0 as usize].apply(ou, 44_100.0);
            }
        }
        b.iter(|| black_box(render_block(&mut engine, BLOCK_LEN, false)));
    });
    group.finish();
}

/// End-to-end: compile + drive a full one-second program through the
/// event-stepping driver into a discarding sink.
fn bench_full_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_program");
    group.sample_size(20);
    group.bench_function("one_second_sine", |b| {
        b.iter(|| {
            let program = compile_bench_program("W sin f 440 t 1000 a 0.5");
            let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(NullSink)];
            let config = timbre::engine::RenderConfig { sample_rate: 44_100, max_frames: None };
            black_box(timbre::engine::render_program(&program, config, &mut sinks).unwrap());
        })
    });
    group.finish();
}

criterion_group!(benches, bench_simple_carrier, bench_fm_stack, bench_full_render);
criterion_main!(benches);
