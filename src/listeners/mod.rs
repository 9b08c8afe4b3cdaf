//! The four accept loops: client handshakes, server registration, the
//! status feed, and the admin command channel.
//!
//! Every loop follows the same shape: `select!` between `accept()` and the
//! shutdown signal, one spawned task per accepted connection, and handler
//! failures that never escape to the loop.

pub mod admin;
pub mod client;
pub mod server_channel;
pub mod status;

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::timeout;

/// Read timeout for the single request line on a freshly accepted socket.
pub(crate) const LINE_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Read one `\n`-terminated line, bounded by [`LINE_READ_TIMEOUT`].
/// `None` on timeout, EOF, or I/O error.
pub(crate) async fn read_request_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Option<String> {
    let mut line = String::new();
    match timeout(LINE_READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(n)) if n > 0 => Some(line.trim().to_string()),
        _ => None,
    }
}
