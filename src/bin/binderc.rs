//! Binder compiler command line.
//!
//! Usage:
//!   binderc ./layouts --out ./generated --min-api 21

use binder_compiler_native::{
    compile_directory, finalize_output, init_tracing, write_output, CompileOptions,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "binderc")]
#[command(about = "Generate binder classes from binding graphs", long_about = None)]
struct Args {
    /// Directory searched recursively for `*.binding.json` units
    input: PathBuf,

    /// Output root for generated sources
    #[arg(long, default_value = "./generated")]
    out: PathBuf,

    /// Lowest platform level of the host app
    #[arg(long, default_value_t = 1)]
    min_api: u32,

    /// Directory holding flag layouts of previous builds
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Omit the flag mapping comment from generated binders
    #[arg(long)]
    no_flag_mapping: bool,

    /// Package of the generated property table (defaults to the first unit's)
    #[arg(long)]
    br_package: Option<String>,
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let options = CompileOptions {
        min_api: args.min_api,
        emit_flag_mapping: !args.no_flag_mapping,
        cache_dir: args.cache_dir,
        ..CompileOptions::default()
    };

    let results = compile_directory(&args.input, &options);
    if results.is_empty() {
        eprintln!("no *.binding.json files under {}", args.input.display());
        return ExitCode::FAILURE;
    }

    let br_package = args.br_package.unwrap_or_else(|| {
        results
            .iter()
            .find(|r| r.source.is_some())
            .map(|r| r.package.clone())
            .unwrap_or_default()
    });
    let output = finalize_output(&results, &br_package, &options);
    for error in &output.errors {
        eprintln!("{}", error);
    }
    if output.has_errors {
        return ExitCode::FAILURE;
    }

    match write_output(&output, &args.out) {
        Ok(written) => {
            println!("generated {} file(s) in {}", written.len(), args.out.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
