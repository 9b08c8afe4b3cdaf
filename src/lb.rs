//! The load balancer: four bound listeners plus the shared state behind
//! them.
//!
//! Binding is split from running so callers (and tests) can bind ephemeral
//! ports and read the resulting addresses before anything starts accepting.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::AdminInterpreter;
use crate::config::{Ports, Settings, SharedSettings};
use crate::health::evictor::Evictor;
use crate::health::prober::Prober;
use crate::lifecycle::Shutdown;
use crate::listeners;
use crate::registry::{now_ms, Registry};

/// Startup failures. Anything here aborts the process.
#[derive(Debug, Error)]
pub enum LbError {
    #[error("failed to bind {role} listener: {source}")]
    Bind {
        role: &'static str,
        source: std::io::Error,
    },
}

/// State shared by every listener and background task.
pub struct LbState {
    pub registry: Registry,
    pub settings: SharedSettings,
    /// Epoch milliseconds at construction; the status feed's `upSince`.
    pub started_at_ms: u64,
    client_seq: AtomicU64,
}

impl LbState {
    pub fn new(settings: Settings) -> Self {
        Self {
            registry: Registry::new(),
            settings: SharedSettings::new(settings),
            started_at_ms: now_ms(),
            client_seq: AtomicU64::new(1),
        }
    }

    /// Monotonic counter backing generated `Client-<N>` names.
    pub fn next_client_id(&self) -> u64 {
        self.client_seq.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct Lb {
    state: Arc<LbState>,
    client_listener: TcpListener,
    registration_listener: TcpListener,
    status_listener: TcpListener,
    admin_listener: TcpListener,
}

impl Lb {
    /// Bind all four listeners. A failure on any port is fatal.
    pub async fn bind(ports: Ports, settings: Settings) -> Result<Self, LbError> {
        let client_listener = bind("client", ports.client).await?;
        let registration_listener = bind("registration", ports.registration).await?;
        let status_listener = bind("status", ports.status).await?;
        let admin_listener = bind("admin", ports.admin).await?;
        Ok(Self {
            state: Arc::new(LbState::new(settings)),
            client_listener,
            registration_listener,
            status_listener,
            admin_listener,
        })
    }

    pub fn state(&self) -> Arc<LbState> {
        Arc::clone(&self.state)
    }

    pub fn client_addr(&self) -> std::io::Result<SocketAddr> {
        self.client_listener.local_addr()
    }

    pub fn registration_addr(&self) -> std::io::Result<SocketAddr> {
        self.registration_listener.local_addr()
    }

    pub fn status_addr(&self) -> std::io::Result<SocketAddr> {
        self.status_listener.local_addr()
    }

    pub fn admin_addr(&self) -> std::io::Result<SocketAddr> {
        self.admin_listener.local_addr()
    }

    /// Spawn the four accept loops plus the prober and the evictor, then
    /// wait for all of them to observe shutdown.
    pub async fn run(self, shutdown: &Shutdown) {
        let Lb {
            state,
            client_listener,
            registration_listener,
            status_listener,
            admin_listener,
        } = self;
        let interpreter = Arc::new(AdminInterpreter::new(Arc::clone(&state)));
        let prober = Prober::new(Arc::clone(&state), state.settings.subscribe_ping_interval());
        let evictor = Evictor::new(Arc::clone(&state));

        let tasks = [
            tokio::spawn(listeners::client::run(
                client_listener,
                Arc::clone(&state),
                shutdown.subscribe(),
            )),
            tokio::spawn(listeners::server_channel::run(
                registration_listener,
                Arc::clone(&state),
                shutdown.subscribe(),
            )),
            tokio::spawn(listeners::status::run(
                status_listener,
                Arc::clone(&state),
                shutdown.subscribe(),
            )),
            tokio::spawn(listeners::admin::run(
                admin_listener,
                interpreter,
                shutdown.subscribe(),
            )),
            tokio::spawn(prober.run(shutdown.subscribe())),
            tokio::spawn(evictor.run(shutdown.subscribe())),
        ];
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn bind(role: &'static str, port: u16) -> Result<TcpListener, LbError> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|source| LbError::Bind { role, source })
}
