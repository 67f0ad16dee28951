//! # Firethorn ECS
//!
//! Frame-scheduled Entity-Component-System world runtime.
//!
//! A world runs a user-built schedule of systems through five phases:
//! startup once, then `frame_start → async → frame_end` every frame
//! under an optional FPS ceiling, then shutdown once. The async phase
//! is the only one that parallelizes: systems are grouped into batches
//! at schedule-build time so that no two systems in a batch declare
//! conflicting component locks, and `run_after` constraints order the
//! batches.
//!
//! ## Core Types
//!
//! - [`Entity`] — Opaque identifier grouping components
//! - [`Component`] — Capability trait for component types, the unit of locking
//! - [`Stores`] — Shared component/resource/event tables behind one handle
//! - [`Event`] — Keyed transient datum, produced in frame N and consumed in N+1
//!
//! ## Systems & Scheduling
//!
//! - [`System`] — Async system trait with a static [`LockSet`] declaration
//! - [`ScheduleBuilder`] — `add_*_system` registration with system sets
//! - [`SystemOptions`] — `run_after`, `run_if`, `run_in_state`, `run_not_in_state`
//! - [`States`] / [`State`] / [`NextState`] — Discrete world states gating systems
//!
//! ## Lifecycle
//!
//! - [`World::spawn`] — Build the schedule and start the driver task
//! - [`WorldHandle`] — Shutdown, debug snapshots, store access
//! - [`Clock`] — Per-frame timing resource maintained by the driver
//!
//! ## Example
//!
//! ```ignore
//! use firethorn_ecs::*;
//!
//! let handle = World::spawn(
//!     WorldOptions { fps_limit: FpsLimit::Limited(60), ..Default::default() },
//!     StartupEvents::new().with(0, LevelRequested("intro".into())),
//!     |schedule| {
//!         schedule
//!             .init_state(GameState::Loading)
//!             .add_startup_system(SpawnBoard)
//!             .add_system(Movement, SystemOptions::new())
//!             .add_system(Collision, SystemOptions::new().run_after::<Movement>())
//!             .add_frame_end_system(Cleanup, SystemOptions::new())
//!             .add_shutdown_system(SaveScores)
//!     },
//! )?;
//!
//! // ... later
//! handle.shutdown().await?;
//! ```
//!
//! See `DESIGN.md` at the repository root for architecture decisions.

mod access;
mod batching;
mod component;
mod condition;
mod entity;
mod events;
mod frame;
mod runner;
mod schedule;
mod state;
mod stores;
mod system;
mod world;

pub use access::LockSet;
pub use component::Component;
pub use entity::Entity;
pub use events::{Event, EventBatch, StartupEvents};
pub use frame::{Clock, FrameData, FrameSnapshot, FrameStatus, TimerState};
pub use schedule::{Phase, ScheduleBuilder, ScheduleError, SystemOptions};
pub use state::{NextState, State, States};
pub use stores::Stores;
pub use system::{System, SystemContext};
pub use world::{FpsLimit, World, WorldError, WorldHandle, WorldOptions};
