//! Management CLI for the load balancer's admin channel.
//!
//! Sends one command line, prints response lines until the `END` sentinel.

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "lbctl")]
#[command(about = "Management CLI for the switchboard load balancer")]
struct Cli {
    /// Load balancer host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Admin command port.
    #[arg(long, short, default_value_t = 11117)]
    port: u16,

    /// Admin command, e.g. `servers` or `setweight 10.0.0.1:9001 3`.
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let stream = TcpStream::connect((cli.host.as_str(), cli.port)).await?;
    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(format!("{}\n", cli.command.join(" ")).as_bytes())
        .await?;

    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line == "END" {
            break;
        }
        println!("{line}");
    }
    Ok(())
}
