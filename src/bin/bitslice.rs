//! Bit-slicing driver.
//!
//! Reads a module in the textual IR, runs the bit-slicing pass and prints the
//! transformed module.
//!
//! # Usage
//!
//! ```bash
//! # Transform a file and print the result
//! bitslice input.bsir
//!
//! # Transform stdin, show statistics and execute @main afterwards
//! bitslice --stats --run main --dump-global state < input.bsir
//! ```

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use bitslicer::core::SlicerConfig;
use bitslicer::interp::Interpreter;
use bitslicer::ir::Module;
use bitslicer::slicer::slice_module;

#[derive(Parser, Debug)]
#[command(name = "bitslice")]
#[command(about = "Rewrite marked byte buffers of an IR module into bit-sliced form")]
struct Args {
    /// Input module (reads stdin when omitted)
    input: Option<PathBuf>,

    /// Print session statistics to stderr
    #[arg(long)]
    stats: bool,

    /// Do not print the transformed module
    #[arg(long)]
    no_print: bool,

    /// Execute this function with the interpreter after transforming
    #[arg(long)]
    run: Option<String>,

    /// Arguments for --run (comma-separated)
    #[arg(long, value_delimiter = ',', requires = "run")]
    args: Vec<u64>,

    /// Print the bytes of these globals after --run (comma-separated)
    #[arg(long, value_delimiter = ',', requires = "run")]
    dump_global: Vec<String>,

    /// Exit with an error status when the pass reported diagnostics
    #[arg(long)]
    deny_diagnostics: bool,

    /// Downgrade capacity errors to warnings
    #[arg(long)]
    no_capacity_check: bool,

    /// Skip verification of transformed functions
    #[arg(long)]
    no_verify: bool,

    /// Remove slicer tags from the output
    #[arg(long)]
    no_tags: bool,

    /// Raise the default log level (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn read_input(path: Option<&PathBuf>) -> io::Result<String> {
    match path {
        Some(path) => fs::read_to_string(path),
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let text = match read_input(args.input.as_ref()) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("error: cannot read input: {}", err);
            return ExitCode::FAILURE;
        }
    };
    let mut module = match Module::parse(&text) {
        Ok(module) => module,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let config = SlicerConfig {
        enforce_capacity: !args.no_capacity_check,
        keep_tags: !args.no_tags,
        verify: !args.no_verify,
        ..SlicerConfig::default()
    };
    let report = slice_module(&mut module, &config);
    log::info!("pass finished, changed = {}", report.changed);

    for diag in &report.diagnostics {
        eprintln!("{}", diag);
    }
    if args.stats {
        eprint!("{}", report.stats);
    }
    if !args.no_print {
        print!("{}", module);
    }

    if let Some(func) = &args.run {
        let mut interp = Interpreter::new(&module).with_markers(config.markers.clone());
        match interp.call(func, &args.args) {
            Ok(Some(value)) => println!("; @{} returned {}", func, value),
            Ok(None) => println!("; @{} returned", func),
            Err(err) => {
                eprintln!("error: running @{}: {}", func, err);
                return ExitCode::FAILURE;
            }
        }
        for name in &args.dump_global {
            match interp.global_bytes(name) {
                Ok(bytes) => println!("; @{} = {:?}", name, bytes),
                Err(err) => {
                    eprintln!("error: {}", err);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    if args.deny_diagnostics && !report.diagnostics.is_empty() {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
