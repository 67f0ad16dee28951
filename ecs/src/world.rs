use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::events::{Event, StartupEvents};
use crate::frame::FrameSnapshot;
use crate::runner::{DriverEvent, FrameDriver};
use crate::schedule::{ScheduleBuilder, ScheduleError};
use crate::stores::Stores;

/// Frame-rate ceiling of a world.
///
/// With `Unlimited`, frames are gated only by system completion. A
/// limit throttles but never aborts: a frame that overruns its budget
/// finishes late and the next one starts immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FpsLimit {
    /// No ceiling; the frame timer fires with zero delay.
    #[default]
    Unlimited,
    /// At most this many frames per second. Zero is rejected with
    /// [`ScheduleError::BadConfig`] at world construction.
    Limited(u32),
}

impl FpsLimit {
    /// The minimum duration of one frame.
    pub(crate) fn frame_budget(self) -> Duration {
        match self {
            FpsLimit::Unlimited => Duration::ZERO,
            FpsLimit::Limited(fps) => Duration::from_secs_f64(1.0 / f64::from(fps)),
        }
    }
}

/// World-level configuration.
#[derive(Debug, Clone, Default)]
pub struct WorldOptions {
    /// Frame-rate ceiling. Defaults to unlimited.
    pub fps_limit: FpsLimit,
    /// Enables the debug snapshot surface. Defaults to off, in which
    /// case [`WorldHandle::debug_snapshot`] returns
    /// [`WorldError::DebugDisabled`].
    pub debug: bool,
}

/// Runtime errors of a running world.
///
/// Everything except [`DebugDisabled`](WorldError::DebugDisabled) is
/// fatal: the driver terminates and the error surfaces from
/// [`WorldHandle::shutdown`] / [`WorldHandle::join`]. Nothing is
/// retried; recovery belongs to whoever owns the handle.
#[derive(Debug, Clone, Error)]
pub enum WorldError {
    /// A run-condition predicate panicked during the per-frame refresh.
    #[error("run condition `{condition}` failed to evaluate")]
    BadCondition {
        /// Label of the offending condition.
        condition: String,
    },
    /// A completion signal arrived for a system that is not awaited;
    /// the scheduling state is corrupt.
    #[error("unexpected completion signal for system `{system}`")]
    UnexpectedCompletion {
        /// Type name of the reported system.
        system: &'static str,
    },
    /// A system task panicked.
    #[error("system `{system}` crashed: {message}")]
    SystemCrash {
        /// Type name of the crashed system.
        system: &'static str,
        /// The panic message.
        message: String,
    },
    /// Debug snapshot requested on a world spawned without the debug
    /// toggle. Non-fatal.
    #[error("debug surface is disabled for this world")]
    DebugDisabled,
    /// The world task is gone (already shut down or crashed).
    #[error("the world has terminated")]
    Terminated,
}

/// Entry point for constructing and running a world.
pub struct World;

impl World {
    /// Builds the schedule and starts the world's driver task.
    ///
    /// `setup` receives the [`ScheduleBuilder`] and registers systems;
    /// any build error (duplicate system, unknown predecessor, bad
    /// config) is returned synchronously. The startup events are
    /// batched into the frame data the startup systems run against.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        options: WorldOptions,
        startup_events: StartupEvents,
        setup: impl FnOnce(ScheduleBuilder) -> ScheduleBuilder,
    ) -> Result<WorldHandle, ScheduleError> {
        let schedule = Arc::new(setup(ScheduleBuilder::new()).finalize(&options)?);
        let stores = Arc::new(Stores::new());
        let (driver, tx) = FrameDriver::new(
            Arc::clone(&schedule),
            Arc::clone(&stores),
            options.fps_limit,
            startup_events.into_records(),
        );
        let driver = tokio::spawn(driver.run());

        Ok(WorldHandle {
            tx,
            driver,
            stores,
            debug: options.debug,
        })
    }
}

/// Owning handle to a running world.
///
/// Dropping the handle does not stop the world; call
/// [`shutdown`](WorldHandle::shutdown) to run the shutdown systems and
/// terminate, or [`join`](WorldHandle::join) to wait for a crash.
pub struct WorldHandle {
    tx: mpsc::UnboundedSender<DriverEvent>,
    driver: JoinHandle<Result<(), WorldError>>,
    stores: Arc<Stores>,
    debug: bool,
}

impl WorldHandle {
    /// The shared stores of this world.
    ///
    /// Reads are allowed from anywhere at any time; the event table
    /// additionally accepts inserts from any task.
    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    /// Appends an event under the given key id, observable by systems
    /// in the next frame.
    pub fn insert_event<E: Event>(&self, key: u64, event: E) {
        self.stores.insert_event(key, event);
    }

    /// Returns an immutable snapshot of the frame state.
    ///
    /// Only available when the world was spawned with
    /// [`WorldOptions::debug`]; otherwise returns
    /// [`WorldError::DebugDisabled`] without contacting the driver.
    pub async fn debug_snapshot(&self) -> Result<FrameSnapshot, WorldError> {
        if !self.debug {
            return Err(WorldError::DebugDisabled);
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DriverEvent::Snapshot { reply })
            .map_err(|_| WorldError::Terminated)?;
        rx.await.map_err(|_| WorldError::Terminated)
    }

    /// Signals shutdown, waits for the shutdown systems to finish, and
    /// returns the driver's final result.
    pub async fn shutdown(self) -> Result<(), WorldError> {
        let (ack, ack_rx) = oneshot::channel();
        if self.tx.send(DriverEvent::Shutdown { ack }).is_ok() {
            let _ = ack_rx.await;
        }
        self.driver.await.map_err(|_| WorldError::Terminated)?
    }

    /// Waits for the world to terminate on its own (fatal error),
    /// without requesting shutdown.
    pub async fn join(self) -> Result<(), WorldError> {
        self.driver.await.map_err(|_| WorldError::Terminated)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_budget_is_zero() {
        assert_eq!(FpsLimit::Unlimited.frame_budget(), Duration::ZERO);
    }

    #[test]
    fn limited_budget_is_frame_period() {
        let budget = FpsLimit::Limited(60).frame_budget();
        let millis = budget.as_secs_f64() * 1000.0;
        assert!((millis - 16.666).abs() < 0.1, "got {millis} ms");

        assert_eq!(FpsLimit::Limited(100).frame_budget(), Duration::from_millis(10));
    }

    #[test]
    fn options_default_to_unlimited_without_debug() {
        let options = WorldOptions::default();
        assert_eq!(options.fps_limit, FpsLimit::Unlimited);
        assert!(!options.debug);
    }
}
