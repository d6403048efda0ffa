use std::io::{Stdout, Write};

use anyhow::{anyhow, bail, Result};
use crossterm::{self as ct, terminal};
use ember_lib::vm::{ExecOutcome, Vm};
use rustyline::{error::ReadlineError, DefaultEditor};

#[derive(PartialEq, Clone)]
enum UserCommand {
    Next,
    LastCommand,
    ShowStack,
    ShowGlobals,
    ShowStackAt(usize),
    Quit,
}

/// Steps through the script one instruction per command. Returns what the script printed.
pub fn run(src: &str, stdout: &mut Stdout) -> Result<Vec<u8>> {
    let mut vm = Vm::with_output(Vec::new());
    vm.load(src)?;
    let mut rl = DefaultEditor::new()?;
    let mut last_cmd: Option<UserCommand> = None;

    use UserCommand::*;
    loop {
        render_state(stdout, &vm, src)?;
        stdout.flush()?;
        let cmd = repeat_last(read_line(&mut rl)?, &last_cmd);
        match &cmd {
            LastCommand => {
                // only reached if there was no last command, in which case it's a noop
            }
            Next => match vm.step() {
                Ok(ExecOutcome::Continue) => {}
                Ok(ExecOutcome::Finished) => return Ok(vm.into_output()),
                Err(e) => bail!("{}", e),
            },
            ShowStack => {
                for (i, value) in vm.stack().iter().enumerate().rev() {
                    println!("{}: {}", i, vm.heap().display(*value));
                }
            }
            ShowGlobals => {
                let heap = vm.heap();
                for entry in vm.globals().iter() {
                    println!(
                        "{} = {}",
                        heap.display(entry.key.into()),
                        heap.display(entry.value)
                    );
                }
            }
            ShowStackAt(i) => match vm.stack().get(*i) {
                Some(value) => println!("{}", vm.heap().display(*value)),
                None => println!("Invalid stack index"),
            },
            Quit => return Ok(vm.into_output()),
        }
        last_cmd = Some(cmd);
    }
}

fn read_line(rl: &mut DefaultEditor) -> Result<UserCommand> {
    loop {
        let line = rl.readline("> ");
        use ReadlineError::*;
        match line {
            Ok(line) => match parse_line(&line) {
                Ok(cmd) => return Ok(cmd),
                Err(e) => eprintln!("Error: {}", e),
            },
            Err(Interrupted | Eof) => return Ok(UserCommand::Quit),
            Err(other) => return Err(other.into()),
        }
    }
}

/// an empty line repeats the previous command
fn repeat_last(cmd: UserCommand, last: &Option<UserCommand>) -> UserCommand {
    match (cmd, last) {
        (UserCommand::LastCommand, Some(last)) => last.clone(),
        (cmd, _) => cmd,
    }
}

fn parse_line(line: &str) -> Result<UserCommand> {
    use UserCommand::*;
    let elems: Vec<_> = line.split_whitespace().collect();
    match elems.as_slice() {
        [] => Ok(LastCommand),
        ["n" | "next"] => Ok(Next),
        ["s" | "stack"] => Ok(ShowStack),
        ["s" | "stack", idx] => Ok(ShowStackAt(idx.parse()?)),
        ["g" | "globals"] => Ok(ShowGlobals),
        ["q" | "quit"] => Ok(Quit),
        _ => Err(anyhow!("Invalid Command")),
    }
}

struct Rect {
    w: u16,
    h: u16,
    x: u16,
    y: u16,
}

struct Rects {
    bc: Rect,
    src: Rect,
    stack: Rect,
    output: Rect,
}

impl Rect {
    pub fn render(
        &self,
        stdout: &mut Stdout,
        lines: impl IntoIterator<Item = String>,
    ) -> Result<()> {
        let wu = self.w as usize;
        let mut lines = lines.into_iter();
        for i in 0..self.h {
            ct::queue!(stdout, ct::cursor::MoveTo(self.x, self.y + i))?;
            let line: String = lines.next().unwrap_or_default().chars().take(wu).collect();
            write!(stdout, "{:<width$}", line, width = wu)?;
        }
        Ok(())
    }
}

fn render_state(stdout: &mut Stdout, vm: &Vm<Vec<u8>>, src: &str) -> Result<()> {
    let curr_cursor = ct::cursor::position()?;
    let rects = compute_rects(terminal::size()?);
    render_src(stdout, &rects.src, src, vm.current_line())?;
    render_bc(stdout, &rects.bc, vm)?;
    render_stack(stdout, &rects.stack, vm)?;
    render_output(stdout, &rects.output, vm.output())?;
    ct::queue!(stdout, ct::cursor::MoveTo(curr_cursor.0, curr_cursor.1))?;
    Ok(())
}

/// the source, scrolled so the current line is visible and marked
fn render_src(stdout: &mut Stdout, rect: &Rect, src: &str, line: Option<usize>) -> Result<()> {
    let current = line.unwrap_or(1);
    let skip = current.saturating_sub(rect.h as usize / 2);
    let lines = src
        .lines()
        .enumerate()
        .skip(skip)
        .map(|(i, text)| {
            let marker = if i + 1 == current { '>' } else { ' ' };
            format!("{}{:4} {}", marker, i + 1, text)
        });
    rect.render(stdout, lines)
}

/// the instructions of the current function, starting at the next one
fn render_bc(stdout: &mut Stdout, rect: &Rect, vm: &Vm<Vec<u8>>) -> Result<()> {
    let Some((chunk, mut offset)) = vm.current_instruction() else {
        return rect.render(stdout, std::iter::empty());
    };
    let mut lines = vec![];
    while offset < chunk.code.len() && lines.len() < rect.h as usize {
        let (line, next) = chunk.disassemble_instruction(offset, vm.heap());
        lines.push(line);
        offset = next;
    }
    rect.render(stdout, lines)
}

fn render_stack(stdout: &mut Stdout, rect: &Rect, vm: &Vm<Vec<u8>>) -> Result<()> {
    let stack = vm.stack();
    let padding = (rect.h as usize).saturating_sub(stack.len() + 1);
    let lines = std::iter::once(String::from("Stack:"))
        .chain(std::iter::repeat(String::new()).take(padding))
        .chain(
            stack
                .iter()
                .enumerate()
                .rev()
                .map(|(i, value)| format!("{}: {}", i, vm.heap().display(*value))),
        );
    rect.render(stdout, lines)
}

/// the last lines the script printed
fn render_output(stdout: &mut Stdout, rect: &Rect, output: &[u8]) -> Result<()> {
    let output = String::from_utf8_lossy(output);
    let lines: Vec<_> = output.lines().collect();
    let skip = lines.len().saturating_sub((rect.h as usize).saturating_sub(1));
    rect.render(
        stdout,
        std::iter::once(String::from("Output:"))
            .chain(lines.into_iter().skip(skip).map(String::from)),
    )
}

fn compute_rects((term_w, term_h): (u16, u16)) -> Rects {
    let width14 = term_w / 4;
    let width12 = term_w / 2;
    let width34 = term_w * 3 / 4;
    let height45 = term_h * 4 / 5;
    let height12 = term_h / 2;

    Rects {
        src: Rect {
            x: 0,
            y: 0,
            w: width12,
            h: height45,
        },
        bc: Rect {
            x: width12,
            y: 0,
            w: width14,
            h: height45,
        },
        stack: Rect {
            x: width34,
            y: 0,
            w: width14,
            h: height12,
        },
        output: Rect {
            x: width34,
            y: height12,
            w: width14,
            h: height45 - height12,
        },
    }
}
