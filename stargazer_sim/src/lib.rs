//! Stargazer Deterministic Simulation Testing (DST) Harness
//!
//! This crate provides the "Matrix" - a controlled environment where the
//! whole Stargazer deployment (Auth, Manager, Compute nodes) runs
//! deterministically inside one process.
//!
//! # Core Principle: The Reactor Pattern
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: paused tokio clock, advanced only when every task is idle
//! - **Network**: `SimNetwork` with per-endpoint latency, partitions and corruption
//! - **Randomness**: token secrets, bodies and fault draws derive from one seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SimCluster                           │
//! │   ┌────────┐        ┌─────────┐        ┌───────────┐        │
//! │   │  Auth  │◄──────►│ Manager │◄──────►│ Compute×N │        │
//! │   └────────┘        └─────────┘        └───────────┘        │
//! │        ▲      SimNetwork (latency / partition / garble)     │
//! │        │                 │                                  │
//! │   ┌────┴─────────────────▼────────────┐                     │
//! │   │              Oracle               │                     │
//! │   │   (serial reference integration)  │                     │
//! │   └───────────────────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use stargazer_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 3).run(ScenarioId::NodeTimeout);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod network;
mod oracle;
mod runner;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{BodyPosition, FrameRecorder, SimExport, SimFrame};
pub use network::{NetworkStats, SimNetwork};
pub use oracle::{fingerprint, BodyCloud, Oracle};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{ComputeHandle, SimCluster, SimConfig};
