use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use radiology_directives::rules_text::GlobalRules;
use radiology_directives::{compat, compile_with_globals, effective_configuration, Assembler};

#[derive(Parser, Debug)]
#[command(
    name = "radiology-directives",
    about = "Merges layered report preferences and prints the instruction document for report generation.",
    version,
    author = ""
)]
struct Args {
    /// Findings text file. Use '-' to read from STDIN.
    #[arg(short, long)]
    findings: PathBuf,

    /// Optional report template file.
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// JSON configuration layer, lowest precedence first (repeatable).
    #[arg(short, long = "layer")]
    layers: Vec<PathBuf>,

    /// Legacy flat JSON configuration, applied after all --layer files.
    #[arg(long)]
    legacy: Option<PathBuf>,

    /// Free-text global findings rules.
    #[arg(long)]
    findings_rules: Option<PathBuf>,

    /// Free-text global impression rules.
    #[arg(long)]
    impression_rules: Option<PathBuf>,

    /// File whose contents replace the leading role sentence.
    #[arg(long)]
    role_prompt: Option<PathBuf>,

    /// Optional output file. Use '-' to write to STDOUT.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// What to print.
    #[arg(long, value_enum, default_value_t = Emit::Document)]
    emit: Emit,

    /// Reject findings or template text that contains the findings delimiters.
    #[arg(long)]
    strict_delimiters: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Emit {
    Document,
    Directives,
    Config,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let layers = collect_layers(&args)?;
    let config = effective_configuration(layers);
    let globals = load_global_rules(&args)?;

    let rendered = match args.emit {
        Emit::Config => {
            serde_json::to_string_pretty(&config).context("failed to serialize effective configuration")?
        }
        Emit::Directives => {
            serde_json::to_string_pretty(&compile_with_globals(&config, &globals)).context("failed to serialize directives")?
        }
        Emit::Document => {
            let findings = read_input(&args.findings)?;
            let template = args.template.as_deref().map(read_file).transpose()?;

            let mut assembler = Assembler::new().strict(args.strict_delimiters);
            if let Some(path) = &args.role_prompt {
                assembler = assembler.with_role_prompt(read_file(path)?);
            }

            let compiled = compile_with_globals(&config, &globals);
            info!(
                general = compiled.general.len(),
                findings = compiled.findings.len(),
                impression = compiled.impression.len(),
                custom = compiled.custom.len(),
                "compiled directive sections"
            );
            assembler
                .assemble(&findings, template.as_deref(), &compiled)
                .context("failed to assemble directive document")?
        }
    };

    write_output(args.output.as_deref(), &rendered)
}

/// Layers in precedence order: `--layer` files, then `--legacy`.
fn collect_layers(args: &Args) -> Result<Vec<Option<Value>>> {
    let mut layers = Vec::new();

    for path in &args.layers {
        layers.push(Some(load_layer(path)?));
    }

    if let Some(path) = &args.legacy {
        let legacy = load_layer(path)?;
        if compat::detect_shape(&legacy) != compat::LayerShape::LegacyFlat {
            debug!(path = %path.display(), "legacy file does not look flat, merging as-is");
        }
        layers.push(Some(compat::upgrade_legacy(legacy)));
    }

    Ok(layers)
}

fn load_global_rules(args: &Args) -> Result<GlobalRules> {
    let findings = args.findings_rules.as_deref().map(read_file).transpose()?;
    let impression = args.impression_rules.as_deref().map(read_file).transpose()?;
    let globals = GlobalRules::parse(findings.as_deref(), impression.as_deref());
    debug!(empty = globals.is_empty(), "loaded global rules text");
    Ok(globals)
}

fn load_layer(path: &Path) -> Result<Value> {
    let raw = read_file(path)?;
    let layer: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse layer JSON: {}", path.display()))?;
    if !layer.is_object() {
        bail!("configuration layer must be a JSON object: {}", path.display());
    }
    Ok(layer)
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read findings from STDIN")?;
        return Ok(buffer);
    }
    read_file(path)
}

fn write_output(path: Option<&Path>, contents: &str) -> Result<()> {
    match path {
        Some(p) if p != Path::new("-") => {
            let mut file = fs::File::create(p)
                .with_context(|| format!("failed to create output file: {}", p.display()))?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("failed to write output file: {}", p.display()))?;
        }
        _ => {
            io::stdout()
                .write_all(contents.as_bytes())
                .context("failed to write to STDOUT")?;
        }
    }

    Ok(())
}
