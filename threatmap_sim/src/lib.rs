//! Threat Map Deterministic Replay Harness
//!
//! This crate runs the threat map core in a controlled environment where
//! every source of non-determinism is intercepted:
//! - **Time**: a virtual clock that only moves when the runner advances it
//! - **Backend**: a scripted transport with injected failures and pushes
//! - **Data**: synthetic feeds derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │  ┌────────────┐   payload   ┌──────────────┐             │
//! │  │ FeedOracle │────────────►│ ScriptedFeed │             │
//! │  │ (truth)    │             │ (/data, push)│             │
//! │  └────────────┘             └──────┬───────┘             │
//! │                                    │ fetch               │
//! │  ┌────────────┐  tick/push/zoom ┌──▼───────────────────┐ │
//! │  │ SimContext │────────────────►│ RefreshCycle +       │ │
//! │  │ (clock)    │                 │ MapRenderer          │ │
//! │  └────────────┘                 └──────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use threatmap_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_duration(60.0).run(ScenarioId::Outage);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod network;
mod oracle;
mod runner;
pub mod scenarios;

pub use context::{SimContext, SIM_EPOCH_SECS};
pub use exporter::{MarkerPoint, SimEvent, SimExport, SimFrame, ZoneCounts};
pub use network::ScriptedFeed;
pub use oracle::{FeedOracle, Malformed, SimTrack, HOTSPOTS};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
