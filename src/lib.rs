//! `timbre`: a small scripting language and synthesis engine for
//! additive/FM sound. A script describes operators (oscillators),
//! organizes them into voices, and schedules parameter changes over time;
//! this crate parses that script, lowers it into a flat event program,
//! and renders the program to 16-bit PCM audio.
//!
//! Pipeline: [`text_source`] → [`scanner`] → [`parser`] (using
//! [`numexpr`] and [`symtab`]) produces an [`ast::ParseTree`];
//! [`lowerer`] turns that into a [`program::Program`]; [`engine`] renders
//! the program to blocks of interleaved stereo samples, which [`sink`]
//! writes out.

pub mod ast;
pub mod engine;
pub mod error;
pub mod lowerer;
pub mod numexpr;
pub mod parser;
pub mod program;
pub mod scanner;
pub mod sink;
pub mod stats;
pub mod symtab;
pub mod text_source;

pub use error::{Diagnostic, Diagnostics, ErrorKind};
pub use program::Program;

/// Parses and lowers a complete script in one call.
pub fn compile_str(source: &str) -> (Program, Diagnostics) {
    let (tree, diags) = parser::parse_str(source);
    (lowerer::lower(tree), diags)
}

/// Parses and lowers a script read from a file.
pub fn compile_path(path: impl AsRef<std::path::Path>) -> std::io::Result<(Program, Diagnostics)> {
    let (tree, diags) = parser::parse_path(path)?;
    Ok((lowerer::lower(tree), diags))
}
