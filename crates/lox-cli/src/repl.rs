//! Interactive REPL
//!
//! One VM lives for the whole session, so globals and interned strings
//! persist from line to line. Errors print and the loop continues; only
//! EOF (Ctrl-D) ends the session.

use lox_runtime::{Vm, VmOptions};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

pub fn run(options: VmOptions) -> i32 {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(error) => {
            eprintln!("Could not start line editor: {}", error);
            return 74;
        }
    };

    let mut vm = Vm::with_options(options);
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                if let Err(error) = vm.interpret(&line) {
                    eprintln!("{}", error);
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return 0,
            Err(error) => {
                eprintln!("Read error: {}", error);
                return 74;
            }
        }
    }
}
