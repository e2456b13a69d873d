//! `timbre` CLI: compiles a score script to a lowered program and renders
//! it to a WAV file and/or a live audio device (spec.md §6, "CLI surface").
//!
//! Modeled on `phonon::main`'s `Cli`/`Commands` shape (SPEC_FULL.md §9.3):
//! two subcommands, `render` (script → WAV) and `play` (script → `cpal`
//! device), sharing a verbosity flag that drives a `tracing-subscriber`
//! `EnvFilter`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use timbre::engine::{render_program, RenderConfig};
use timbre::sink::{DeviceSink, Sink, WavSink};

#[derive(Parser)]
#[command(name = "timbre")]
#[command(about = "A score-driven FM/additive synthesis engine", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). Overridden by RUST_LOG.
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress warnings; only fatal errors are printed.
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Print the lowered program (voice/operator updates, graphs,
    /// adjacency) before rendering (SPEC_FULL.md §10).
    #[arg(long, global = true)]
    dump_program: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a script to a WAV file.
    Render {
        /// Script path; omit when `-e` supplies inline source.
        input: Option<PathBuf>,

        /// Inline script source, instead of a file path.
        #[arg(short = 'e', long)]
        eval: Option<String>,

        /// Output WAV path.
        #[arg(short, long)]
        output: PathBuf,

        /// Sample rate in Hz.
        #[arg(short = 'r', long, default_value = "44100")]
        sample_rate: u32,

        /// Hard cap on rendered frames, for scripts with an unterminated
        /// (`t inf`) carrier.
        #[arg(long)]
        max_frames: Option<u64>,
    },
    /// Render a script straight to the default audio output device.
    Play {
        /// Script path; omit when `-e` supplies inline source.
        input: Option<PathBuf>,

        #[arg(short = 'e', long)]
        eval: Option<String>,

        #[arg(short = 'r', long, default_value = "44100")]
        sample_rate: u32,

        #[arg(long)]
        max_frames: Option<u64>,

        /// Also write the played audio to this WAV path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn read_source(input: &Option<PathBuf>, eval: &Option<String>) -> Result<String, Box<dyn std::error::Error>> {
    match (input, eval) {
        (_, Some(src)) => Ok(src.clone()),
        (Some(path), None) => Ok(std::fs::read_to_string(path)?),
        (None, None) => Err("expected a script path or -e <inline source>".into()),
    }
}

fn compile_and_report(source: &str) -> timbre::Program {
    let (program, diags) = timbre::compile_str(source);
    for w in &diags.warnings {
        eprintln!("{w}");
    }
    program
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Render { input, eval, output, sample_rate, max_frames } => {
            let source = read_source(&input, &eval)?;
            let program = compile_and_report(&source);
            if cli.dump_program {
                println!("{}", dump_program(&program));
            }
            let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(WavSink::new(&output))];
            let config = RenderConfig { sample_rate, max_frames };
            let stats = render_program(&program, config, &mut sinks)?;
            stats.print_summary();
        }
        Commands::Play { input, eval, sample_rate, max_frames, output } => {
            let source = read_source(&input, &eval)?;
            let program = compile_and_report(&source);
            if cli.dump_program {
                println!("{}", dump_program(&program));
            }
            let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(DeviceSink::new())];
            if let Some(path) = &output {
                sinks.push(Box::new(WavSink::new(path)));
            }
            let config = RenderConfig { sample_rate, max_frames };
            let stats = render_program(&program, config, &mut sinks)?;
            stats.print_summary();
        }
    }
    Ok(())
}

/// Human-readable dump of a lowered program's event list, in the spirit of
/// `phonon::render::RenderStats::print_summary` (SPEC_FULL.md §10).
fn dump_program(program: &timbre::Program) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "program: {} voice(s), {} operator(s), {} event(s), amp_div_voices={}",
        program.voice_count,
        program.operator_count,
        program.events.len(),
        program.amp_div_voices
    );
    for (i, ev) in program.events.iter().enumerate() {
        let _ = write!(out, "  [{i}] wait_ms={}", ev.wait_ms);
        if let Some(vu) = &ev.voice_update {
            let _ = write!(out, " voice#{}(pan={:.2})", vu.voice_id.0, vu.pan);
        }
        if let Some(ou) = &ev.operator_update {
            let _ = write!(
                out,
                " op#{}(wave={:?}, freq={:.2}, amp={:.2})",
                ou.op_id.0, ou.wave, ou.freq, ou.amp
            );
        }
        let _ = writeln!(out);
    }
    out
}
