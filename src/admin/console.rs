//! Stdin admin console.
//!
//! Shares the interpreter with the remote channel; responses go to stdout
//! rather than back over a socket.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use super::interpreter::AdminInterpreter;

pub async fn run(interpreter: Arc<AdminInterpreter>, mut shutdown: broadcast::Receiver<()>) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    tracing::info!("admin console ready, type 'help'");
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    for out in interpreter.execute(&line) {
                        println!("{out}");
                    }
                }
                // EOF or a broken stdin ends the console, not the process
                _ => break,
            }
        }
    }
}
