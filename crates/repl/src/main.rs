//! ember - interpreter for the Ember language
//!
//! Usage:
//!   ember            # interactive REPL
//!   ember script.em  # run a file
//!
//! Exit codes: 0 on success, 64 usage, 65 compile error, 70 runtime error,
//! 74 when the script file cannot be read. The `EMBER_LOG` environment
//! variable controls tracing output (e.g. `EMBER_LOG=debug`).

mod config;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ember_runtime::{InterpretResult, Vm, VmOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ember")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Interpreter for the Ember language", long_about = None)]
struct Args {
    /// Script to run; starts the REPL when omitted.
    path: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("EMBER_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(64);
        }
    };

    let options = match config::load(std::path::Path::new("Ember.toml")) {
        Ok(Some(config)) => config.vm_options(),
        Ok(None) => VmOptions::default(),
        Err(e) => {
            eprintln!("Ember.toml: {e}");
            return ExitCode::from(64);
        }
    };

    let mut vm = Vm::with_options(options);
    match args.path {
        Some(path) => run_file(&mut vm, &path),
        None => {
            if let Err(e) = repl::run(&mut vm) {
                eprintln!("repl error: {e}");
                return ExitCode::from(74);
            }
            ExitCode::SUCCESS
        }
    }
}

fn run_file(vm: &mut Vm, path: &std::path::Path) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(_) => {
            eprintln!("Could not open file \"{}\".", path.display());
            return ExitCode::from(74);
        }
    };
    match vm.interpret(&source) {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError => ExitCode::from(65),
        InterpretResult::RuntimeError => ExitCode::from(70),
    }
}
