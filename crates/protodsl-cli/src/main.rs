//! `protodsl`: the code-generator front end (§6.3, §11). Reads a validated
//! `Protocol` AST as JSON and writes the thin Rust crate
//! `protodsl-codegen::generate` produces. The only place in this workspace
//! that installs a `tracing` subscriber — every library crate only emits
//! events.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use protodsl_codegen::emit_manifest::emit_manifest;
use protodsl_core::ast::Protocol;

#[derive(Parser)]
#[command(name = "protodsl", about = "Code generator for protodsl protocol definitions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a protocol AST and emit a Rust crate that runs it.
    Generate {
        /// Path to a JSON-serialized `protodsl_core::ast::Protocol`.
        #[arg(long)]
        input: PathBuf,

        /// Target module path prefix for the generated crate's `lib.rs`.
        #[arg(long)]
        namespace: String,

        /// Directory generated files are written into.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// When present, also emit a Cargo.toml fragment under this package name.
        #[arg(long)]
        lib_name: Option<String>,

        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let Command::Generate {
        input,
        namespace,
        out_dir,
        lib_name,
        verbose,
    } = cli.command;

    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    run_generate(&input, &namespace, &out_dir, lib_name.as_deref())
}

fn run_generate(input: &PathBuf, namespace: &str, out_dir: &PathBuf, lib_name: Option<&str>) -> Result<()> {
    let source = fs::read_to_string(input)
        .with_context(|| format!("reading AST input {}", input.display()))?;
    let protocol: Protocol =
        serde_json::from_str(&source).with_context(|| format!("parsing AST input {}", input.display()))?;

    protocol.validate().map_err(|e| {
        tracing::error!(error = %e, "protocol AST failed validation");
        anyhow::anyhow!("{e}")
    })?;

    let output = protodsl_codegen::generate(&protocol, namespace, "../protodsl-core", "../protodsl-runtime")
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    fs::create_dir_all(out_dir.join("src")).with_context(|| format!("creating {}/src", out_dir.display()))?;
    for (relative_path, contents) in &output.files {
        let path = out_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "wrote generated file");
    }

    if let Some(lib_name) = lib_name {
        let manifest = emit_manifest(lib_name, "../protodsl-core", "../protodsl-runtime");
        let manifest_path = out_dir.join("Cargo.toml");
        fs::write(&manifest_path, manifest).with_context(|| format!("writing {}", manifest_path.display()))?;
        tracing::debug!(path = %manifest_path.display(), "wrote Cargo.toml fragment");
    }

    tracing::info!(files = output.files.len(), out_dir = %out_dir.display(), "code generation complete");
    Ok(())
}
