use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::condition::ConditionCache;
use crate::events::{batch_events, EventRecord};
use crate::frame::{Clock, FrameData, FrameSnapshot, FrameStatus, TimerState};
use crate::schedule::{Phase, Schedule};
use crate::stores::Stores;
use crate::system::{SystemContext, SystemId};
use crate::world::{FpsLimit, WorldError};

/// Messages consumed by the frame driver's state machine.
pub(crate) enum DriverEvent {
    /// Advance the current phase: dispatch the next system or batch.
    Tick,
    /// A dispatched system task finished (or crashed).
    Completion {
        system: SystemId,
        outcome: Result<(), String>,
    },
    /// The frame-rate budget elapsed.
    FrameTimerFired,
    /// Run the shutdown systems and terminate.
    Shutdown { ack: oneshot::Sender<()> },
    /// Reply with an immutable snapshot of the frame state.
    Snapshot { reply: oneshot::Sender<FrameSnapshot> },
}

/// Remaining work of the current phase.
enum WorkQueue {
    /// Sync phases: one system at a time, insertion order.
    Sequential(VecDeque<SystemId>),
    /// Async phase: one conflict-free batch at a time, plan order.
    Batched(VecDeque<Vec<SystemId>>),
}

impl WorkQueue {
    fn len(&self) -> usize {
        match self {
            WorkQueue::Sequential(queue) => queue.len(),
            WorkQueue::Batched(queue) => queue.len(),
        }
    }
}

/// Outcome of popping the work queue.
enum Popped {
    System(SystemId),
    Batch(Vec<SystemId>),
    Exhausted,
}

/// The long-running state machine driving a world's frames.
///
/// One driver task owns the frame state exclusively. It suspends only
/// while awaiting its event channel: system tasks report completions,
/// a timer task reports the frame budget, and the world handle injects
/// shutdown and snapshot requests. A frame boundary occurs only when
/// the phase queue has drained (`FrameEnded`) *and* the frame timer
/// has fired, so an FPS ceiling throttles frames without ever aborting
/// running systems.
pub(crate) struct FrameDriver {
    schedule: Arc<Schedule>,
    stores: Arc<Stores>,
    fps_limit: FpsLimit,
    tx: mpsc::UnboundedSender<DriverEvent>,
    rx: mpsc::UnboundedReceiver<DriverEvent>,
    status: FrameStatus,
    timer: TimerState,
    queue: WorkQueue,
    /// Identifiers of the system tasks currently in flight.
    await_set: HashSet<SystemId>,
    cache: ConditionCache,
    frame_data: Arc<FrameData>,
    last_frame_at: Instant,
    delta: Duration,
    frame: u64,
}

impl FrameDriver {
    pub(crate) fn new(
        schedule: Arc<Schedule>,
        stores: Arc<Stores>,
        fps_limit: FpsLimit,
        startup_events: Vec<EventRecord>,
    ) -> (Self, mpsc::UnboundedSender<DriverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let frame_data = Arc::new(FrameData {
            delta: Duration::ZERO,
            batches: batch_events(startup_events),
            frame: 0,
        });
        let queue = WorkQueue::Sequential(schedule.startup.iter().copied().collect());

        let driver = Self {
            schedule,
            stores,
            fps_limit,
            tx: tx.clone(),
            rx,
            status: FrameStatus::Startup,
            timer: TimerState::Running,
            queue,
            await_set: HashSet::new(),
            cache: ConditionCache::default(),
            frame_data,
            last_frame_at: Instant::now(),
            delta: Duration::ZERO,
            frame: 0,
        };
        (driver, tx)
    }

    /// Runs the world to completion: startup, frames, shutdown.
    pub(crate) async fn run(mut self) -> Result<(), WorldError> {
        for hook in &self.schedule.state_hooks {
            (hook.init)(&self.stores);
        }
        log::debug!(
            "world started: {} systems, {} async batches",
            self.schedule.slots.len(),
            self.schedule.batches.len(),
        );
        self.send(DriverEvent::Tick);

        let result = self.drive().await;
        if let Err(error) = &result {
            log::error!("world terminated: {error}");
        }
        result
    }

    async fn drive(&mut self) -> Result<(), WorldError> {
        while let Some(event) = self.rx.recv().await {
            match event {
                DriverEvent::Tick => self.run_next_system()?,
                DriverEvent::Completion { system, outcome } => {
                    self.on_completion(system, outcome)?;
                }
                DriverEvent::FrameTimerFired => {
                    self.timer = TimerState::Finished;
                    if self.status == FrameStatus::FrameEnded {
                        self.start_frame()?;
                    }
                }
                DriverEvent::Shutdown { ack } => {
                    let result = self.run_shutdown().await;
                    let _ = ack.send(());
                    return result;
                }
                DriverEvent::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
            }
        }
        Ok(())
    }

    /// Dispatches the next unit of work, advancing phases as queues
    /// drain. No-op while systems are still in flight.
    fn run_next_system(&mut self) -> Result<(), WorldError> {
        if !self.await_set.is_empty() {
            return Ok(());
        }

        loop {
            match self.pop_work() {
                Popped::System(id) => {
                    if self.enabled(id) {
                        self.dispatch(id);
                        return Ok(());
                    }
                    log::debug!(
                        "skipping `{}`: run conditions not met",
                        self.schedule.slots[id.0].name,
                    );
                }
                Popped::Batch(ids) => {
                    let enabled: Vec<SystemId> =
                        ids.into_iter().filter(|id| self.enabled(*id)).collect();
                    for id in &enabled {
                        self.dispatch(*id);
                    }
                    if !enabled.is_empty() {
                        return Ok(());
                    }
                }
                Popped::Exhausted => match self.status {
                    FrameStatus::Startup => return self.start_frame(),
                    FrameStatus::FrameStart => {
                        self.status = FrameStatus::Async;
                        self.queue =
                            WorkQueue::Batched(self.schedule.batches.iter().cloned().collect());
                    }
                    FrameStatus::Async => {
                        self.status = FrameStatus::FrameEnd;
                        self.queue =
                            WorkQueue::Sequential(self.schedule.frame_end.iter().copied().collect());
                    }
                    FrameStatus::FrameEnd => {
                        self.status = FrameStatus::FrameEnded;
                        return self.end_frame();
                    }
                    FrameStatus::FrameEnded => return Ok(()),
                },
            }
        }
    }

    fn pop_work(&mut self) -> Popped {
        match &mut self.queue {
            WorkQueue::Sequential(queue) => match queue.pop_front() {
                Some(id) => Popped::System(id),
                None => Popped::Exhausted,
            },
            WorkQueue::Batched(queue) => match queue.pop_front() {
                Some(batch) => Popped::Batch(batch),
                None => Popped::Exhausted,
            },
        }
    }

    /// Whether a system's run conditions all hold this frame. Startup
    /// and shutdown systems are gate-less.
    fn enabled(&self, id: SystemId) -> bool {
        let slot = &self.schedule.slots[id.0];
        match slot.phase {
            Phase::Startup | Phase::Shutdown => true,
            _ => self.cache.passes(&slot.conditions),
        }
    }

    /// Spawns one task for the system and tracks it in the await-set.
    fn dispatch(&mut self, id: SystemId) {
        let slot = &self.schedule.slots[id.0];
        log::debug!("dispatching `{}`", slot.name);

        let system = Arc::clone(&slot.system);
        let ctx = SystemContext::new(
            Arc::clone(&self.stores),
            Arc::clone(&self.frame_data),
            slot.locks.clone(),
            slot.name,
        );
        let tx = self.tx.clone();
        self.await_set.insert(id);

        tokio::spawn(async move {
            // The inner spawn isolates panics: a crashed system still
            // reports a completion instead of wedging the driver.
            let joined = tokio::spawn(async move { system.run_boxed(&ctx).await }).await;
            let outcome = joined.map_err(join_error_message);
            let _ = tx.send(DriverEvent::Completion {
                system: id,
                outcome,
            });
        });
    }

    fn on_completion(
        &mut self,
        system: SystemId,
        outcome: Result<(), String>,
    ) -> Result<(), WorldError> {
        let name = self.schedule.slots[system.0].name;
        if !self.await_set.remove(&system) {
            return Err(WorldError::UnexpectedCompletion { system: name });
        }
        if let Err(message) = outcome {
            return Err(WorldError::SystemCrash {
                system: name,
                message,
            });
        }
        if self.await_set.is_empty() {
            self.run_next_system()
        } else {
            Ok(())
        }
    }

    /// Begins the next frame: delta, state transitions, event batches,
    /// condition cache, frame timer.
    fn start_frame(&mut self) -> Result<(), WorldError> {
        let now = Instant::now();
        self.delta = now - self.last_frame_at;
        self.last_frame_at = now;
        self.frame += 1;

        for hook in &self.schedule.state_hooks {
            (hook.apply)(&self.stores);
        }

        let batches = batch_events(self.stores.drain_events());
        self.cache = ConditionCache::refresh(&self.schedule.conditions, &self.stores)?;
        self.frame_data = Arc::new(FrameData {
            delta: self.delta,
            batches,
            frame: self.frame,
        });

        let (delta, frame) = (self.delta, self.frame);
        self.stores
            .update_resource::<Clock>(|clock| clock.advance(delta, frame));

        log::debug!("frame {frame} started, delta {:?}", self.delta);
        self.status = FrameStatus::FrameStart;
        self.queue = WorkQueue::Sequential(self.schedule.frame_start.iter().copied().collect());
        self.arm_frame_timer();
        self.send(DriverEvent::Tick);
        Ok(())
    }

    /// All frame systems drained; the next frame may start once the
    /// frame timer has also fired.
    fn end_frame(&mut self) -> Result<(), WorldError> {
        if self.timer == TimerState::Finished {
            self.start_frame()
        } else {
            Ok(())
        }
    }

    fn arm_frame_timer(&mut self) {
        self.timer = TimerState::Running;
        let budget = self.fps_limit.frame_budget();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if !budget.is_zero() {
                tokio::time::sleep(budget).await;
            }
            let _ = tx.send(DriverEvent::FrameTimerFired);
        });
    }

    /// Runs shutdown systems synchronously, in insertion order, against
    /// the last known frame data.
    async fn run_shutdown(&mut self) -> Result<(), WorldError> {
        log::debug!(
            "shutting down: {} shutdown systems",
            self.schedule.shutdown.len()
        );
        for &id in &self.schedule.shutdown {
            let slot = &self.schedule.slots[id.0];
            let system = Arc::clone(&slot.system);
            let ctx = SystemContext::new(
                Arc::clone(&self.stores),
                Arc::clone(&self.frame_data),
                slot.locks.clone(),
                slot.name,
            );
            let joined = tokio::spawn(async move { system.run_boxed(&ctx).await }).await;
            if let Err(error) = joined {
                return Err(WorldError::SystemCrash {
                    system: slot.name,
                    message: join_error_message(error),
                });
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            status: self.status,
            timer: self.timer,
            delta: self.delta,
            frame: self.frame,
            awaiting: self
                .await_set
                .iter()
                .map(|id| self.schedule.slots[id.0].name)
                .collect(),
            queued: self.queue.len(),
        }
    }

    fn send(&self, event: DriverEvent) {
        let _ = self.tx.send(event);
    }
}

/// Extracts a printable message from a crashed system task.
fn join_error_message(error: tokio::task::JoinError) -> String {
    if error.is_panic() {
        match error.into_panic().downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "panicked with a non-string payload".to_string(),
            },
        }
    } else {
        "system task was cancelled".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleBuilder;
    use crate::world::WorldOptions;

    fn empty_schedule() -> Arc<Schedule> {
        Arc::new(
            ScheduleBuilder::new()
                .finalize(&WorldOptions::default())
                .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_completion_is_fatal() {
        let (driver, tx) = FrameDriver::new(
            empty_schedule(),
            Arc::new(Stores::new()),
            FpsLimit::Unlimited,
            Vec::new(),
        );
        let handle = tokio::spawn(driver.run());

        // Forge a completion for the internal startup system. It is
        // absorbed in place of the real one, so when the genuine
        // completion arrives the await-set no longer expects it.
        tx.send(DriverEvent::Completion {
            system: SystemId(0),
            outcome: Ok(()),
        })
        .unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(WorldError::UnexpectedCompletion { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_frame_progress() {
        let (driver, tx) = FrameDriver::new(
            empty_schedule(),
            Arc::new(Stores::new()),
            FpsLimit::Limited(100),
            Vec::new(),
        );
        let handle = tokio::spawn(driver.run());

        // Let startup and a few 10 ms frames elapse on the paused clock.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (reply, rx) = oneshot::channel();
        tx.send(DriverEvent::Snapshot { reply }).unwrap();
        let snapshot = rx.await.unwrap();
        assert!(snapshot.frame >= 2);

        let (ack, ack_rx) = oneshot::channel();
        tx.send(DriverEvent::Shutdown { ack }).unwrap();
        ack_rx.await.unwrap();
        handle.await.unwrap().unwrap();
    }
}
