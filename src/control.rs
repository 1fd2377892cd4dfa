use std::io::BufRead;
use std::sync::Arc;

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Seek(f64),
    Quit,
}

/// Maps one line of terminal input to a command. Arrow keys arrive as
/// their escape sequences, the words work anywhere.
pub fn parse_command(line: &str) -> Option<Command> {
    match line.trim() {
        "\x1b[D" | "left" | "h" => Some(Command::Seek(-10.0)),
        "\x1b[C" | "right" | "l" => Some(Command::Seek(10.0)),
        "\x1b[B" | "down" | "j" => Some(Command::Seek(-60.0)),
        "\x1b[A" | "up" | "k" => Some(Command::Seek(60.0)),
        "q" | "quit" | "\x1b" => Some(Command::Quit),
        _ => None,
    }
}

pub fn apply(session: &Session, command: Command) {
    match command {
        Command::Seek(increment) => session.seek_relative(increment),
        Command::Quit => {
            tracing::info!("quit requested");
            session.finish();
        }
    }
}

/// Reads commands from stdin until end of input or quit. The thread is
/// left detached, it may stay blocked in a read after the session ends.
pub fn spawn(session: Arc<Session>) -> std::io::Result<()> {
    crate::thread::spawn("avsync/control", move || {
        let stdin = std::io::stdin();

        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };

            if session.is_finished() {
                break;
            }

            match parse_command(&line) {
                Some(command) => {
                    apply(&session, command);
                    if command == Command::Quit {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => tracing::warn!(input = line.trim(), "unknown command"),
            }
        }
    })?;

    Ok(())
}
