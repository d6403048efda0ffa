use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;
use rustyline::{error::ReadlineError, DefaultEditor};

use ember_lib::vm::{InterpretResult, Vm};

#[cfg(feature = "dev")]
mod debugger;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// the script to run. Starts a repl if omitted
    script: Option<PathBuf>,

    /// print the bytecode of the script instead of running it
    #[cfg(feature = "dev")]
    #[arg(short = 'd', long)]
    disassemble: bool,

    /// step through the script in an interactive debugger
    #[cfg(feature = "dev")]
    #[arg(short = 'b', long)]
    debug_bytecode: bool,
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let cli = Cli::parse();
    match &cli.script {
        Some(path) => run_file(&cli, path),
        None => {
            repl()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_file(cli: &Cli, path: &Path) -> Result<ExitCode> {
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    if let Some(code) = dev_modes(cli, &src)? {
        return Ok(code);
    }

    let mut vm = Vm::new();
    let code = match vm.interpret(&src) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            exit_code(e.kind())
        }
    };
    debug!(
        "{} objects, {} bytes on the heap at exit",
        vm.heap().object_count(),
        vm.heap().bytes_allocated()
    );
    Ok(code)
}

/// the exit codes of sysexits.h
fn exit_code(result: InterpretResult) -> ExitCode {
    match result {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError => ExitCode::from(65),
        InterpretResult::RuntimeError => ExitCode::from(70),
    }
}

/// Each line is compiled and run on its own, but on the same vm, so globals defined in
/// one line are visible in the next
fn repl() -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let mut vm = Vm::new();
    loop {
        match rl.readline("> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                if let Err(e) = vm.interpret(&line) {
                    eprintln!("{}", e);
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => return Ok(()),
            Err(other) => return Err(other.into()),
        }
    }
}

#[cfg(not(feature = "dev"))]
fn dev_modes(_: &Cli, _: &str) -> Result<Option<ExitCode>> {
    Ok(None)
}

/// handles the dev flags, returns the exit code if one of them took over
#[cfg(feature = "dev")]
fn dev_modes(cli: &Cli, src: &str) -> Result<Option<ExitCode>> {
    use crossterm::{self as ct, terminal};
    use ember_lib::{compiler, core};
    use std::io::{stdout, Write};

    if cli.disassemble {
        let mut heap = core::Heap::new();
        let code = match compiler::compile(src, &mut heap) {
            Ok(script) => {
                print!("{}", core::disassemble_function(script, &heap));
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                exit_code(InterpretResult::CompileError)
            }
        };
        return Ok(Some(code));
    }

    if cli.debug_bytecode {
        let mut stdout = stdout();
        ct::execute!(stdout, terminal::EnterAlternateScreen)?;
        let res = debugger::run(src, &mut stdout);
        ct::execute!(stdout, terminal::LeaveAlternateScreen)?;
        // the program's own output was shown in a pane, repeat it on the normal screen
        stdout.write_all(&res?)?;
        return Ok(Some(ExitCode::SUCCESS));
    }

    Ok(None)
}
