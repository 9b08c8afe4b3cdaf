//! Remote admin command channel.
//!
//! One-shot request/response: the caller sends one command line, the LB
//! writes zero or more response lines followed by a literal `END`, then
//! closes the socket.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::admin::interpreter::AdminInterpreter;

use super::read_request_line;

pub async fn run(
    listener: TcpListener,
    interpreter: Arc<AdminInterpreter>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _peer)) => {
                    let interpreter = Arc::clone(&interpreter);
                    tokio::spawn(handle_admin(stream, interpreter));
                }
                Err(e) => tracing::warn!(error = %e, "admin accept failed"),
            }
        }
    }
}

async fn handle_admin(stream: TcpStream, interpreter: Arc<AdminInterpreter>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let Some(line) = read_request_line(&mut reader).await else {
        return;
    };

    let mut response = String::new();
    for out in interpreter.execute(&line) {
        response.push_str(&out);
        response.push('\n');
    }
    response.push_str("END\n");
    let _ = write_half.write_all(response.as_bytes()).await;
}
