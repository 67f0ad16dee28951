use std::time::Duration;

use crate::events::EventBatch;

/// Frame timing resource maintained by the frame driver.
///
/// Inserted by the implementation-internal default-resources startup
/// system and refreshed at every frame start, before any frame system
/// runs. Systems read it through the resource table; only the driver
/// writes it.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    delta: Duration,
    elapsed: Duration,
    frame: u64,
}

impl Clock {
    /// Time between the start of the current frame and the previous one.
    ///
    /// Measured with a monotonic clock, never wall time. Zero during
    /// startup and the first frame.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// The delta in milliseconds.
    pub fn delta_ms(&self) -> f64 {
        self.delta.as_secs_f64() * 1000.0
    }

    /// Total time since the world started.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The current frame number. Zero during startup.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub(crate) fn advance(&mut self, delta: Duration, frame: u64) {
        self.delta = delta;
        self.elapsed += delta;
        self.frame = frame;
    }
}

/// The phase the frame driver is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Running startup systems, before the first frame.
    Startup,
    /// Running the sequential frame-start systems.
    FrameStart,
    /// Running the batched async systems.
    Async,
    /// Running the sequential frame-end systems.
    FrameEnd,
    /// All systems of the frame have drained; waiting for the frame timer.
    FrameEnded,
}

/// State of the per-frame rate-limit timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// The frame budget has not elapsed yet.
    Running,
    /// The frame budget elapsed; the next frame may begin once all
    /// systems have drained.
    Finished,
}

/// The immutable per-frame input handed to every dispatched system.
#[derive(Debug)]
pub struct FrameData {
    pub(crate) delta: Duration,
    pub(crate) batches: Vec<EventBatch>,
    pub(crate) frame: u64,
}

impl FrameData {
    /// Time since the previous frame started.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// The delta in milliseconds.
    pub fn delta_ms(&self) -> f64 {
        self.delta.as_secs_f64() * 1000.0
    }

    /// The event batches drained for this frame, in order.
    pub fn event_batches(&self) -> &[EventBatch] {
        &self.batches
    }

    /// The current frame number. Zero during startup.
    pub fn frame(&self) -> u64 {
        self.frame
    }
}

/// Immutable snapshot of the frame driver's state.
///
/// Returned by [`WorldHandle::debug_snapshot`](crate::WorldHandle::debug_snapshot)
/// when the world was spawned with the debug toggle enabled.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Current phase.
    pub status: FrameStatus,
    /// Frame timer state.
    pub timer: TimerState,
    /// Delta of the current frame.
    pub delta: Duration,
    /// Current frame number.
    pub frame: u64,
    /// Names of the systems currently in flight.
    pub awaiting: Vec<&'static str>,
    /// Number of systems (sync) or batches (async) still queued in the
    /// current phase.
    pub queued: usize,
}
