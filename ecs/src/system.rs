use std::any::TypeId;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::access::LockSet;
use crate::component::Component;
use crate::entity::Entity;
use crate::events::{Event, EventBatch};
use crate::frame::FrameData;
use crate::stores::Stores;

/// Dense index of a system in the finalized schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SystemId(pub(crate) usize);

/// A schedulable unit of work over the world.
///
/// Implementing this trait is the capability that makes a type
/// addable to the schedule. A system declares the component types it
/// may mutate via [`locked_components`](System::locked_components) and
/// receives the current frame's data (delta and event batches) plus
/// the shared stores through the [`SystemContext`].
///
/// Systems may read both stores freely; writes are only legal to the
/// declared locks. The schedule keeps write-conflicting systems out of
/// the same parallel batch, so no runtime locking is needed beyond the
/// store handle's own short-lived table guards.
///
/// ```
/// use firethorn_ecs::{LockSet, System, SystemContext, Component};
///
/// #[derive(Clone)]
/// struct Position(f32);
/// impl Component for Position {}
///
/// struct Drift;
/// impl System for Drift {
///     fn locked_components(&self) -> LockSet {
///         LockSet::new().add::<Position>()
///     }
///
///     async fn run(&self, ctx: &SystemContext) {
///         let step = ctx.delta().as_secs_f32();
///         for entity in ctx.stores().entities_with::<Position>() {
///             if let Some(p) = ctx.get_component::<Position>(entity) {
///                 ctx.set_component(entity, Position(p.0 + step));
///             }
///         }
///     }
/// }
/// ```
pub trait System: Send + Sync + 'static {
    /// The component types this system may mutate.
    ///
    /// Defaults to no locks (a read-only system).
    fn locked_components(&self) -> LockSet {
        LockSet::new()
    }

    /// Executes one run of the system against the current frame.
    fn run<'a>(&'a self, ctx: &'a SystemContext) -> impl Future<Output = ()> + Send + 'a;
}

/// Object-safe adapter over [`System`], used by the schedule and the
/// frame driver.
pub(crate) trait DynSystem: Send + Sync {
    fn run_boxed<'a>(
        &'a self,
        ctx: &'a SystemContext,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    fn locked_components(&self) -> LockSet;
}

impl<S: System> DynSystem for S {
    fn run_boxed<'a>(
        &'a self,
        ctx: &'a SystemContext,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.run(ctx))
    }

    fn locked_components(&self) -> LockSet {
        System::locked_components(self)
    }
}

/// Execution context handed to a running system.
///
/// Owned by the task running the system (the shared pieces sit behind
/// `Arc`), so dispatch never borrows the driver.
pub struct SystemContext {
    stores: Arc<Stores>,
    frame: Arc<FrameData>,
    locks: LockSet,
    system_name: &'static str,
}

impl SystemContext {
    pub(crate) fn new(
        stores: Arc<Stores>,
        frame: Arc<FrameData>,
        locks: LockSet,
        system_name: &'static str,
    ) -> Self {
        Self {
            stores,
            frame,
            locks,
            system_name,
        }
    }

    /// The shared stores handle.
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// The current frame's data.
    pub fn frame(&self) -> &FrameData {
        &self.frame
    }

    /// Time since the previous frame started.
    pub fn delta(&self) -> Duration {
        self.frame.delta()
    }

    /// The event batches drained for this frame, in order.
    pub fn event_batches(&self) -> &[EventBatch] {
        self.frame.event_batches()
    }

    /// Allocates a fresh entity id.
    pub fn spawn_entity(&self) -> Entity {
        self.stores.spawn_entity()
    }

    /// Returns a copy of entity's component of type `C`, if present.
    pub fn get_component<C: Component + Clone>(&self, entity: Entity) -> Option<C> {
        self.stores.get_component(entity)
    }

    /// Inserts or replaces entity's component of type `C`.
    ///
    /// Debug builds assert the write is covered by this system's
    /// declared locks; release builds trust the schedule.
    pub fn set_component<C: Component>(&self, entity: Entity, component: C) {
        self.assert_locked::<C>();
        self.stores.set_component(entity, component);
    }

    /// Removes entity's component of type `C`. Returns whether it existed.
    pub fn delete_component<C: Component>(&self, entity: Entity) -> bool {
        self.assert_locked::<C>();
        self.stores.delete_component::<C>(entity)
    }

    /// Appends an event under the given key id, observable next frame.
    pub fn send_event<E: Event>(&self, key: u64, event: E) {
        self.stores.insert_event(key, event);
    }

    fn assert_locked<C: Component>(&self) {
        debug_assert!(
            self.locks.covers(TypeId::of::<C>()),
            "system `{}` writes component `{}` without declaring a lock",
            self.system_name,
            std::any::type_name::<C>(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Position(f32);
    impl Component for Position {}

    #[derive(Debug, Clone)]
    struct Velocity(f32);
    impl Component for Velocity {}

    fn test_ctx(locks: LockSet) -> SystemContext {
        let stores = Arc::new(Stores::new());
        let frame = Arc::new(FrameData {
            delta: Duration::from_millis(16),
            batches: Vec::new(),
            frame: 1,
        });
        SystemContext::new(stores, frame, locks, "test_system")
    }

    #[test]
    fn context_exposes_frame_data() {
        let ctx = test_ctx(LockSet::new());
        assert_eq!(ctx.delta(), Duration::from_millis(16));
        assert_eq!(ctx.frame().frame(), 1);
        assert!(ctx.event_batches().is_empty());
    }

    #[test]
    fn locked_write_round_trips() {
        let ctx = test_ctx(LockSet::new().add::<Position>());
        let e = ctx.spawn_entity();
        ctx.set_component(e, Position(1.0));
        assert_eq!(ctx.get_component::<Position>(e), Some(Position(1.0)));
        assert!(ctx.delete_component::<Position>(e));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "without declaring a lock")]
    fn undeclared_write_panics_in_debug() {
        let ctx = test_ctx(LockSet::new().add::<Position>());
        let e = ctx.spawn_entity();
        ctx.set_component(e, Velocity(1.0));
    }

    #[test]
    fn reads_do_not_require_locks() {
        let ctx = test_ctx(LockSet::new());
        let e = ctx.spawn_entity();
        assert_eq!(ctx.get_component::<Position>(e), None);
        assert!(!ctx.stores().has_component::<Position>(e));
    }

    #[test]
    fn default_lock_set_is_empty() {
        struct NoLocks;
        impl System for NoLocks {
            async fn run(&self, _ctx: &SystemContext) {}
        }
        assert!(System::locked_components(&NoLocks).is_empty());
    }
}
