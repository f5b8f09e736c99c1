//! # Zonesync Engine
//!
//! An incremental sync engine between a local entity store and a
//! zone-partitioned remote record service.
//!
//! This crate provides:
//! - `SyncEngine`, the per-account orchestrator: lifecycle, sync triggers,
//!   wake-signal handling, sharing, and the local read/write path
//! - Delta fetch with opaque change tokens at database and zone level,
//!   committed only after the changes they cover are durably applied
//! - Push with conflict detection and pluggable resolution
//!   (`ResolutionPolicy`, default `ClientFieldsWin`)
//! - A record-mirror cache preserving server-assigned metadata between
//!   cycles
//! - A bounded operation queue, a retry scheduler for service
//!   backpressure, and an observer event feed with drain-then-notify
//! - `RemoteService`, the seam to the real service, plus two in-crate
//!   implementations: `MockRemote` (scripted responses) and
//!   `LoopbackRemote` (a faithful in-memory service)
//!
//! ## Key Invariants
//!
//! - A change token is persisted only after the batch it accompanies is
//!   applied; a crash in between re-fetches, and applying a batch twice
//!   converges to the same state.
//! - All local mutations serialize through one writer gate; readers never
//!   block behind it.
//! - Stopping the engine is advisory: work in flight finishes, everything
//!   else bails at its next stage boundary.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod engine;
mod error;
mod events;
mod fetch;
mod loopback;
mod meta;
mod mirror;
mod push;
mod queue;
mod record_cache;
mod remote;
mod retry;
mod state_store;
mod zones;

pub use config::EngineConfig;
pub use conflict::{ClientFieldsWin, ConflictResolver, ResolutionPolicy};
pub use engine::{SyncEngine, WakeAck, WakeSignal};
pub use error::{SyncError, SyncResult};
pub use events::{EngineEvent, EventFeed};
pub use loopback::{LoopbackCounts, LoopbackRemote};
pub use mirror::DatabaseMirror;
pub use remote::{MockRemote, RemoteService};
pub use state_store::{ApplyCounts, SyncStateStore};
