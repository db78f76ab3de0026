//! ember — the CLI driver around the language core (§6, §10.7). Not part of
//! the core itself: it only wires together `compile` and `State::call` and
//! renders whatever they return.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use tracing_subscriber::EnvFilter;

use ember_lang::{compile, FrontendError, State, StateOptions};

#[derive(ClapParser)]
#[command(name = "ember", version, about = "ember — a small register-VM scripting language")]
struct Cli {
    /// Source file to run
    file: Option<PathBuf>,

    /// Evaluate a snippet of source inline instead of reading a file
    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (source, label) = if let Some(code) = cli.eval {
        (code, "<eval>".to_string())
    } else if let Some(path) = cli.file {
        let label = path.display().to_string();
        match fs::read_to_string(&path) {
            Ok(s) => (s, label),
            Err(e) => {
                eprintln!("{}", ember_lang::errors::format_simple_error(&format!("could not read '{}': {}", label, e)));
                return ExitCode::from(1);
            }
        }
    } else {
        eprintln!("{}", ember_lang::errors::format_simple_error("usage: ember <file> | ember -e <code>"));
        return ExitCode::from(1);
    };

    run(&source, &label)
}

fn run(source: &str, label: &str) -> ExitCode {
    let mut state = State::new(StateOptions::default());
    let proto = match compile(&mut state.heap, source, &[]) {
        Ok(p) => p,
        Err(err) => {
            report_frontend_error(source, label, &err);
            return ExitCode::from(1);
        }
    };

    match state.call(&proto, &[]) {
        Ok(value) => {
            println!("{}", value.display(&state.heap));
            ExitCode::from(0)
        }
        Err(e) => {
            eprintln!(
                "{}",
                ember_lang::errors::format_simple_error(&format!("[{}] runtime error at pc {}: {:?}: {}", label, e.pc, e.kind, e.message))
            );
            ExitCode::from(2)
        }
    }
}

fn report_frontend_error(source: &str, label: &str, err: &FrontendError) {
    eprintln!(
        "{}",
        ember_lang::errors::format_error(source, err.line(), err.col(), &format!("[{}] {}", label, err))
    );
}
