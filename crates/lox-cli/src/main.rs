//! Lox command-line front-end
//!
//! Two modes: with a script path, compile and run it (exit 65 on compile
//! errors, 70 on runtime errors); with no path, start a REPL. Extra
//! positional arguments are a usage error (exit 64).

mod repl;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;
use lox_runtime::{bytecode, compile, Heap, LoxError, Vm, VmOptions};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Bytecode interpreter for the Lox language
#[derive(Parser)]
#[command(name = "lox", version, about)]
struct Cli {
    /// Script to run; omit to start a REPL
    scripts: Vec<PathBuf>,

    /// Print the compiled bytecode instead of executing
    #[arg(long)]
    dump: bool,

    /// Trace each instruction as it executes
    #[arg(long)]
    trace: bool,

    /// Run the garbage collector at every allocation
    #[arg(long)]
    gc_stress: bool,

    /// Log garbage collection activity to stderr
    #[arg(long)]
    gc_log: bool,
}

fn main() {
    let cli = Cli::parse();
    let options = VmOptions {
        gc_stress: cli.gc_stress,
        gc_log: cli.gc_log,
        trace_execution: cli.trace,
    };

    let code = match cli.scripts.len() {
        0 => repl::run(options),
        1 => run_file(&cli.scripts[0], options, cli.dump),
        _ => {
            eprintln!("Usage: lox [script]");
            64
        }
    };
    std::process::exit(code);
}

fn run_file(path: &Path, options: VmOptions, dump: bool) -> i32 {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Could not read \"{}\": {}.", path.display(), error);
            return 74;
        }
    };

    if dump {
        return dump_bytecode(&source);
    }

    let mut vm = Vm::with_options(options);
    match vm.interpret(&source) {
        Ok(()) => 0,
        Err(error @ LoxError::Compile(_)) => {
            report_error(&error);
            65
        }
        Err(error @ LoxError::Runtime(_)) => {
            report_error(&error);
            70
        }
    }
}

fn dump_bytecode(source: &str) -> i32 {
    let mut heap = Heap::new();
    match compile(source, &mut heap) {
        Ok(function) => {
            print!("{}", bytecode::disassemble(&heap, function));
            0
        }
        Err(errors) => {
            for error in errors {
                eprintln!("{}", error);
            }
            65
        }
    }
}

fn report_error(error: &LoxError) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
    let _ = writeln!(&mut stderr, "{}", error);
    let _ = stderr.reset();
}
