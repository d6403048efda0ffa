//! Runs every `tests/*.em` script with the release build of `ember` and compares what it
//! prints against `tests/<name>.out`. If a `tests/<name>.err` exists, stderr has to match
//! it as well.

use anyhow::{anyhow, bail, Context, Result};
use glob::glob;
use std::result::Result as StdResult;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const EMBER: &str = "../target/release/ember";

fn main() -> Result<()> {
    compile_ember().context("compiling interpreter")?;

    let scripts: Vec<PathBuf> = glob("tests/*.em")?.collect::<StdResult<_, _>>()?;
    let mut failed = 0;
    for script in &scripts {
        match check(script) {
            Ok(()) => println!("{}: passed", script.display()),
            Err(e) => {
                failed += 1;
                println!("{}: failed\n{:#}", script.display(), e);
            }
        }
    }
    println!("{} of {} scripts passed", scripts.len() - failed, scripts.len());
    if failed > 0 {
        bail!("{} scripts failed", failed);
    }
    Ok(())
}

fn check(script: &Path) -> Result<()> {
    let expected_stdout = fs::read_to_string(script.with_extension("out"))
        .context(format!("loading expected output for {}", script.display()))?;
    let expected_stderr = fs::read_to_string(script.with_extension("err")).ok();

    let output = Command::new(EMBER)
        .arg(script)
        .output()
        .context(format!("running script {}", script.display()))?;
    let stdout = String::from_utf8(output.stdout)?;
    if stdout != expected_stdout {
        bail!("actual output:\n{}", stdout);
    }
    if let Some(expected_stderr) = expected_stderr {
        let stderr = String::from_utf8(output.stderr)?;
        if stderr != expected_stderr {
            bail!("actual error output:\n{}", stderr);
        }
    }
    Ok(())
}

fn compile_ember() -> Result<()> {
    let st = Command::new("cargo")
        .args(["build", "--release", "-p", "ember"])
        .current_dir("..")
        .status()?;
    if st.success() {
        Ok(())
    } else {
        Err(anyhow!("compiling the interpreter failed"))
    }
}
