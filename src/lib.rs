//! Merges layered radiology report preferences and compiles them into a numbered
//! instruction document for a report-writing model.
//!
//! ```text
//! layers -> merge::effective_configuration -> compiler::compile -> assembler::assemble
//! ```

pub mod assembler;
pub mod compat;
pub mod compiler;
pub mod config;
pub mod merge;
pub mod rules_text;

use serde_json::Value;

pub use assembler::{assemble, AssembleError, Assembler};
pub use compiler::{compile, compile_with_globals, CompiledDirectives};
pub use config::{default_configuration, Configuration};
pub use merge::{effective_configuration, merge_layers, merge_values};

/// Merge, compile and assemble in one call with the default assembler.
pub fn build_document<I>(findings: &str, template: Option<&str>, layers: I) -> String
where
    I: IntoIterator<Item = Option<Value>>,
{
    let config = effective_configuration(layers);
    assemble(findings, template, &compile(&config))
}
