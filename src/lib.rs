//! Switchboard — a line-protocol load balancer for a small compute cluster.
//!
//! One process, four TCP listeners:
//!
//! ```text
//!   clients ──HELLO──▶ client port ──▶ balancer ──▶ "host:port" reply
//!   servers ──!join/!leave/!report──▶ registration port ──▶ registry
//!   anyone  ──connect──▶ status port ──▶ one JSON document
//!   anyone  ──command──▶ admin port  ──▶ response lines + END
//! ```
//!
//! Servers heartbeat by re-sending `!join`; the prober measures their RTT
//! with a one-line ping/pong; the evictor drops whoever goes quiet. Three
//! selection policies route clients: weighted round-robin, lowest RTT, and
//! sticky-with-fallback.

// Core subsystems
pub mod balancer;
pub mod config;
pub mod lb;
pub mod registry;

// Surfaces
pub mod admin;
pub mod listeners;

// Background tasks and cross-cutting concerns
pub mod health;
pub mod lifecycle;

pub use config::{Mode, Ports, Settings};
pub use lb::{Lb, LbState};
pub use lifecycle::Shutdown;
