//! Line-oriented shell running between ticks.
//!
//! Lines are read on a separate thread and queued; the tick loop drains the
//! queue before each tick so commands never race a trigger.
//!
//! Built-ins:
//!   help          – list bridge commands with their docstrings
//!   quit | exit   – stop the tick loop
//!
//! Anything else is dispatched to the [`CommandTable`] as
//! `<entity>.<command> args...`.

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use dgbridge_runtime::{CommandTable, CommandValue};

/// What the tick loop should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Spawn the stdin reader.  The channel closes on EOF or a read error.
pub fn spawn_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            }
        }
    });
    rx
}

pub fn prompt() {
    print!("{} ", "dgbridge>".bold().cyan());
    io::stdout().flush().ok();
}

/// Run one line and print its outcome.
pub fn handle_line(commands: &CommandTable, line: &str) -> Flow {
    let line = line.trim();
    match line {
        "" => {}
        "help" => print_help(commands),
        "quit" | "exit" => {
            println!("{}", "Goodbye.".green());
            return Flow::Quit;
        }
        _ => match commands.execute_line(line) {
            Ok(CommandValue::None) => println!("{}", "ok".green()),
            Ok(value) => println!("{value}"),
            Err(e) => println!("{}: {}", "Error".red(), e),
        },
    }
    Flow::Continue
}

fn print_help(commands: &CommandTable) {
    println!();
    println!("{}", "Bridge commands".bold().underline());
    for name in commands.names() {
        let doc = commands.docstring(&name).unwrap_or_default();
        println!("  {}", name.bold().cyan());
        for doc_line in doc.lines() {
            println!("      {}", doc_line.dimmed());
        }
    }
    println!("  {}  – stop the bridge", "quit  exit".bold().cyan());
    println!();
}
