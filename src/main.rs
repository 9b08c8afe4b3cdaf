//! Load balancer binary.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchboard::admin::{console, AdminInterpreter};
use switchboard::{Lb, Ports, Settings, Shutdown};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Line-protocol load balancer for a small compute cluster")]
struct Args {
    /// Client handshake port.
    #[arg(long, default_value_t = 11114)]
    client_port: u16,

    /// Server registration/report port.
    #[arg(long, default_value_t = 11115)]
    registration_port: u16,

    /// Read-only JSON status port.
    #[arg(long, default_value_t = 11116)]
    status_port: u16,

    /// Remote admin command port.
    #[arg(long, default_value_t = 11117)]
    admin_port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let ports = Ports {
        client: args.client_port,
        registration: args.registration_port,
        status: args.status_port,
        admin: args.admin_port,
    };

    let lb = Lb::bind(ports, Settings::default()).await?;
    tracing::info!(
        clients = %lb.client_addr()?,
        servers = %lb.registration_addr()?,
        status = %lb.status_addr()?,
        admin = %lb.admin_addr()?,
        "load balancer listening"
    );

    let shutdown = Shutdown::new();

    // stdin console shares the interpreter with the remote admin channel
    let interpreter = Arc::new(AdminInterpreter::new(lb.state()));
    tokio::spawn(console::run(interpreter, shutdown.subscribe()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.trigger();
            }
        });
    }

    lb.run(&shutdown).await;
    tracing::info!("shutdown complete");
    Ok(())
}
