//! Interactive REPL
//!
//! Line-based loop with history. Meta commands start with `/`:
//!
//! ```text
//! /exit  - Exit the interpreter.
//! /eval  - Load file and run.
//! /mem   - Print memory statistics.
//! /help  - Print this help message.
//! /clear - Clean console.
//! ```
//!
//! A trailing `\` continues the current buffer on the next line; empty
//! input re-prompts.

use ember_runtime::Vm;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

const PROMPT: &str = "> ";

pub fn run(vm: &mut Vm) -> Result<(), ReadlineError> {
    println!("Ember {}", env!("CARGO_PKG_VERSION"));

    let mut editor = DefaultEditor::new()?;
    let mut buffer = String::new();

    loop {
        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e),
        };

        if buffer.is_empty() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(command) = trimmed.strip_prefix('/') {
                let _ = editor.add_history_entry(trimmed);
                if !run_meta_command(vm, command) {
                    break;
                }
                continue;
            }
        }

        if let Some(continued) = line.strip_suffix('\\') {
            buffer.push_str(continued);
            buffer.push('\n');
            continue;
        }

        buffer.push_str(&line);
        let _ = editor.add_history_entry(buffer.as_str());
        vm.interpret_repl(&buffer);
        buffer.clear();
    }

    Ok(())
}

/// False when the REPL should exit.
fn run_meta_command(vm: &mut Vm, command: &str) -> bool {
    let (name, rest) = match command.split_once(' ') {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name {
        "exit" => return false,
        "help" => print_help(),
        "clear" => print!("\x1b[2J\x1b[1;1H"),
        "mem" => print_memory(vm),
        "eval" => {
            let path = rest.trim_matches('"');
            if path.is_empty() {
                eprintln!("Usage: /eval <path>");
            } else {
                match std::fs::read_to_string(path) {
                    Ok(source) => {
                        vm.interpret_repl(&source);
                    }
                    Err(e) => eprintln!("Could not open file \"{path}\": {e}"),
                }
            }
        }
        _ => eprintln!("Unknown command '/{name}' (try /help)."),
    }
    true
}

fn print_help() {
    println!("Commands:");
    println!("/exit  - Exit the interpreter.");
    println!("/eval  - Load file and run.");
    println!("/mem   - Print memory statistics.");
    println!("/help  - Print this help message.");
    println!("/clear - Clean console.");
    println!();
    println!("About:");
    println!("input '\\' at end of line to continue on the next line.");
}

fn print_memory(vm: &Vm) {
    println!("heap bytes      : {}", vm.heap.bytes_allocated);
    println!("static bytes    : {}", vm.heap.bytes_static);
    println!("live objects    : {}", vm.heap.live_object_count());
    println!("interned strings: {}", vm.heap.string_count());
    println!("functions       : {}", vm.heap.function_count());
    println!("next collection : {}", vm.heap.next_gc);
}
